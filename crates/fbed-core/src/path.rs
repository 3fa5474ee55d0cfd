//! Logical paths: root-relative, forward-slash separated, free of `.`/`..`.
//!
//! Every logical path produced here starts with `/` and never ends with one
//! (except the root itself). Containment is decided per component, so `/ab`
//! is not inside `/a`.

/// The logical root of the store.
pub const ROOT: &str = "/";

/// Normalise a user-supplied logical path.
///
/// Backslashes are treated as separators, empty and `.` components are
/// dropped and `..` removes the previous component. Returns `None` when a
/// `..` would climb above the root.
pub fn clean(raw: &str) -> Option<String> {
    let normalized = raw.replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();
    for seg in normalized.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            s => parts.push(s),
        }
    }
    Some(format!("/{}", parts.join("/")))
}

/// Join a cleaned parent path and a single child name.
pub fn join(parent: &str, name: &str) -> String {
    if parent == ROOT {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Parent of a cleaned logical path; `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(i) => Some(&path[..i]),
        None => Some(ROOT),
    }
}

/// Last component of a cleaned logical path (empty for the root).
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

/// True when `ancestor` equals `path` or contains it.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    if ancestor == ROOT || path == ancestor {
        return true;
    }
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

/// Split a file name into stem and extension, the extension keeping its dot.
///
/// Mirrors the usual "last dot" rule: `a.tar.gz` → (`a.tar`, `.gz`),
/// `README` → (`README`, ``).
pub fn split_ext(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) => (&name[..i], &name[i..]),
        None => (name, ""),
    }
}

/// Public URL under which a stored file is served.
pub fn file_url(path: &str) -> String {
    if path == ROOT {
        "/file".to_string()
    } else {
        format!("/file{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn clean_normalises() {
        assert_eq!(clean("").as_deref(), Some("/"));
        assert_eq!(clean("a/b/../c").as_deref(), Some("/a/c"));
        assert_eq!(clean("//a/./b/").as_deref(), Some("/a/b"));
        assert_eq!(clean("a\\b\\c.txt").as_deref(), Some("/a/b/c.txt"));
    }

    #[test]
    fn clean_rejects_escape() {
        assert_eq!(clean("../../etc/passwd"), None);
        assert_eq!(clean("/a/../../b"), None);
        assert_eq!(clean(".."), None);
    }

    #[test]
    fn parent_and_name() {
        assert_eq!(parent("/a/b/c.txt"), Some("/a/b"));
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/"), None);
        assert_eq!(file_name("/a/b/c.txt"), "c.txt");
        assert_eq!(file_name("/"), "");
    }

    #[test]
    fn within_is_component_wise() {
        assert!(is_within("/a/b", "/a"));
        assert!(is_within("/a", "/a"));
        assert!(is_within("/anything", "/"));
        assert!(!is_within("/ab", "/a"));
        assert!(!is_within("/a", "/a/b"));
    }

    #[test]
    fn ext_split() {
        assert_eq!(split_ext("x.png"), ("x", ".png"));
        assert_eq!(split_ext("a.tar.gz"), ("a.tar", ".gz"));
        assert_eq!(split_ext("README"), ("README", ""));
    }

    #[test]
    fn url_from_path() {
        assert_eq!(file_url("/a/b.txt"), "/file/a/b.txt");
    }

    proptest! {
        #[test]
        fn cleaned_paths_are_canonical(raw in "[a-z./\\\\]{0,40}") {
            if let Some(p) = clean(&raw) {
                prop_assert!(p.starts_with('/'));
                prop_assert!(!p.split('/').any(|s| s == ".." || s == "."));
                prop_assert!(p == ROOT || !p.ends_with('/'));
                prop_assert_eq!(clean(&p), Some(p.clone()));
            }
        }
    }
}
