//! Configuration port.
//!
//! Components never reach for ambient/global configuration; a provider is
//! injected at construction. Lookups are resolved by component type name
//! first, then fall back to the `default` profile.

/// Well-known keys consumed by this crate.
pub mod keys {
    pub const DEFAULT_REQUEST_TIMEOUT: &str = "default_request_timeout";
    pub const TIME_OF_DATA_TOLERANCE: &str = "time_of_data_tolerance";
    pub const DELAY: &str = "delay";
    pub const MIN_DELAY: &str = "min_delay";
    pub const MAX_MISSED_MSG: &str = "max_missed_msg";
}

/// The profile every component-specific lookup falls back to.
pub const DEFAULT_PROFILE: &str = "default";

pub trait ConfigProvider: Send + Sync {
    /// Raw lookup for one component profile. No fallback here.
    fn get(&self, component: &str, key: &str) -> Option<f64>;
}

/// Component lookup with fallback to the default profile, then to a hard
/// default supplied by the caller.
pub fn resolve(cfg: &dyn ConfigProvider, component: &str, key: &str, hard_default: f64) -> f64 {
    cfg.get(component, key)
        .or_else(|| cfg.get(DEFAULT_PROFILE, key))
        .unwrap_or(hard_default)
}

/// Built-in default profile. Real deployments wrap their own settings source
/// in a [`ConfigProvider`]; tests and the demo binary use this one.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticConfig;

impl ConfigProvider for StaticConfig {
    fn get(&self, component: &str, key: &str) -> Option<f64> {
        if component != DEFAULT_PROFILE {
            return None;
        }
        match key {
            keys::DEFAULT_REQUEST_TIMEOUT => Some(30.0),
            keys::TIME_OF_DATA_TOLERANCE => Some(10.0),
            keys::DELAY => Some(5.0),
            keys::MIN_DELAY => Some(0.5),
            keys::MAX_MISSED_MSG => Some(3.0),
            _ => None,
        }
    }
}
