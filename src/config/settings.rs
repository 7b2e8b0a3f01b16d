use serde::Deserialize;

/// Top-level configuration settings for the bus.
///
/// Includes behavioural settings for the bus itself and the hard limits
/// enforced on traffic passing through it.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub bus: BusSettings,
    pub limits: LimitSettings,
}

/// Behavioural settings for the bus.
///
/// Controls routing depth, wildcard policy and the cadence of background
/// maintenance.
#[derive(Debug, Deserialize, Clone)]
pub struct BusSettings {
    pub allow_global_wildcard: bool,
    pub max_route_depth: usize,
    pub cleanup_interval_ms: u64,
    pub default_request_timeout_ms: u64,
}

/// Hard limits enforced on published traffic.
///
/// Covers message and payload sizes, the retained-store capacity and the
/// per-publisher rate window.
#[derive(Debug, Deserialize, Clone)]
pub struct LimitSettings {
    pub max_message_bytes: usize,
    pub max_payload_bytes: usize,
    pub max_retained: usize,
    pub rate_limit_max: u32,
    pub rate_limit_window_ms: i64,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub bus: Option<PartialBusSettings>,
    pub limits: Option<PartialLimitSettings>,
}

/// Partial bus settings.
///
/// Used when loading bus configuration from external sources with optional values.
#[derive(Debug, Deserialize)]
pub struct PartialBusSettings {
    pub allow_global_wildcard: Option<bool>,
    pub max_route_depth: Option<usize>,
    pub cleanup_interval_ms: Option<u64>,
    pub default_request_timeout_ms: Option<u64>,
}

/// Partial limit settings.
///
/// Used for limit configuration from external sources with optional values.
#[derive(Debug, Deserialize)]
pub struct PartialLimitSettings {
    pub max_message_bytes: Option<usize>,
    pub max_payload_bytes: Option<usize>,
    pub max_retained: Option<usize>,
    pub rate_limit_max: Option<u32>,
    pub rate_limit_window_ms: Option<i64>,
}

/// Provides default values for `Settings`.
///
/// Ensures the bus has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            bus: BusSettings {
                allow_global_wildcard: false,
                max_route_depth: 8,
                cleanup_interval_ms: 30_000,
                default_request_timeout_ms: 5_000,
            },
            limits: LimitSettings {
                max_message_bytes: 64 * 1024,
                max_payload_bytes: 48 * 1024,
                max_retained: 256,
                rate_limit_max: 100,
                rate_limit_window_ms: 1_000,
            },
        }
    }
}
