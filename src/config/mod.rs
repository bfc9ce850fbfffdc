//! Scan configuration: the JSON config document, its validation, and the
//! getter layer the pipeline reads.

mod loader;
mod types;

pub use loader::{load_config, validate_config, ConfigError};
pub use types::{
    CdpSetting, FingerprintSetting, ForceReload, OneOrMany, ReferrerHeaders, ScanConfig,
    SiteConfig, WindowCleanup, KNOWN_RESOURCE_TYPES,
};
