use fbed_core::{path, FbedResult};

/// Image recompression applied by `add_file` when `raw` is false.
///
/// On success the stored name gets the configured save format appended; an
/// error keeps the original bytes under the original name.
pub trait Compressor: Send + Sync {
    fn compress(&self, data: &[u8]) -> FbedResult<Vec<u8>>;
}

/// Extensions eligible for recompression. GIF is left alone so animations
/// survive.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tif", "tiff", "bmp"];

pub fn is_image(logical: &str) -> bool {
    let (_, ext) = path::split_ext(path::file_name(logical));
    let ext = ext.trim_start_matches('.');
    IMAGE_EXTENSIONS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(ext))
}

#[cfg(feature = "image")]
pub use imaging::ImageCompressor;

#[cfg(feature = "image")]
mod imaging {
    use super::Compressor;
    use fbed_core::config::ImageConfig;
    use fbed_core::{FbedError, FbedResult};
    use image::codecs::jpeg::JpegEncoder;
    use image::ImageFormat;
    use std::io::Cursor;

    /// Re-encodes images into the configured save format.
    ///
    /// JPEG quality drops from the configured maximum towards the minimum as
    /// the input grows: `min + (max - min) * 0.99^(size / target_size)`.
    pub struct ImageCompressor {
        format: ImageFormat,
        target_size: f64,
        min_quality: f64,
        max_quality: f64,
    }

    impl ImageCompressor {
        pub fn from_config(config: &ImageConfig) -> FbedResult<Self> {
            let format = ImageFormat::from_extension(&config.save_format)
                .filter(|f| f.writing_enabled())
                .ok_or_else(|| {
                    FbedError::Config(format!(
                        "image.save_format {:?} cannot be written",
                        config.save_format
                    ))
                })?;
            Ok(ImageCompressor {
                format,
                target_size: config.target_size.max(1.0),
                min_quality: config.jpeg_min_quality,
                max_quality: config.jpeg_max_quality,
            })
        }

        pub fn jpeg_quality(&self, size: usize) -> u8 {
            let ratio = 0.99f64.powf(size as f64 / self.target_size);
            let quality = self.min_quality + (self.max_quality - self.min_quality) * ratio;
            quality.clamp(1.0, 100.0) as u8
        }
    }

    impl Compressor for ImageCompressor {
        fn compress(&self, data: &[u8]) -> FbedResult<Vec<u8>> {
            let img = image::load_from_memory(data)
                .map_err(|e| FbedError::Compression(format!("decode: {e}")))?;
            let mut out = Vec::new();
            let encoded = match self.format {
                // JPEG has no alpha channel
                ImageFormat::Jpeg => JpegEncoder::new_with_quality(&mut out, self.jpeg_quality(data.len()))
                    .encode_image(&img.to_rgb8()),
                format => img.write_to(&mut Cursor::new(&mut out), format),
            };
            encoded.map_err(|e| FbedError::Compression(format!("encode: {e}")))?;
            Ok(out)
        }
    }

}
