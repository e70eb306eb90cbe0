pub mod abr;
pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod hls;
pub mod logger;
pub mod network;
pub mod proxy;
pub mod segment;
pub mod session;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use error::{ProxyError, Result};

pub mod prelude {
    pub use crate::config::{DrmPolicy, ProxyConfig};
    pub use crate::diagnostics::{Diagnostics, KeyStatus};
    pub use crate::hls::{QualityPolicy, QualityProfile, Rendition, VariantPlaylist};
    pub use crate::proxy::AuxiliaryAssetType;
    pub use crate::session::{PlayerState, PlayerStatus, ProxySession};
}
