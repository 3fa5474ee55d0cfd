//! fbed-sync: digest-guided push/pull reconciliation between two stores,
//! plus pulling trees off an frp static file server

pub mod client;
pub mod frp;
pub mod peer;
pub mod reconcile;
pub mod retry;
pub mod token;

pub use client::HttpPeer;
pub use frp::FrpClient;
pub use peer::{Download, Peer};
pub use reconcile::Reconciler;
pub use retry::RetryPolicy;
pub use token::{Claims, TokenIssuer};
