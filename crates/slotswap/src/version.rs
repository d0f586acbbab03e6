//! Version information for slotswap.

/// slotswap version from Cargo.toml.
pub const SLOTSWAP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version information reported by the health check.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    pub slotswap: &'static str,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            slotswap: SLOTSWAP_VERSION,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }
}
