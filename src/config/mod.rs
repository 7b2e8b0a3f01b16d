mod settings;


use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{BusSettings, LimitSettings, Settings};

/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
/// Returns a `Settings` struct containing the bus and limit configurations
pub fn load_config() -> Result<Settings, ConfigError> {
    dotenvy::dotenv().ok();

    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(Environment::default().separator("__").try_parsing(true));

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    // Merge with defaults
    let default = Settings::default();

    Ok(Settings {
        bus: BusSettings {
            allow_global_wildcard: partial
                .bus
                .as_ref()
                .and_then(|b| b.allow_global_wildcard)
                .unwrap_or(default.bus.allow_global_wildcard),
            max_route_depth: partial
                .bus
                .as_ref()
                .and_then(|b| b.max_route_depth)
                .unwrap_or(default.bus.max_route_depth),
            cleanup_interval_ms: partial
                .bus
                .as_ref()
                .and_then(|b| b.cleanup_interval_ms)
                .unwrap_or(default.bus.cleanup_interval_ms),
            default_request_timeout_ms: partial
                .bus
                .as_ref()
                .and_then(|b| b.default_request_timeout_ms)
                .unwrap_or(default.bus.default_request_timeout_ms),
        },
        limits: LimitSettings {
            max_message_bytes: partial
                .limits
                .as_ref()
                .and_then(|l| l.max_message_bytes)
                .unwrap_or(default.limits.max_message_bytes),
            max_payload_bytes: partial
                .limits
                .as_ref()
                .and_then(|l| l.max_payload_bytes)
                .unwrap_or(default.limits.max_payload_bytes),
            max_retained: partial
                .limits
                .as_ref()
                .and_then(|l| l.max_retained)
                .unwrap_or(default.limits.max_retained),
            rate_limit_max: partial
                .limits
                .as_ref()
                .and_then(|l| l.rate_limit_max)
                .unwrap_or(default.limits.rate_limit_max),
            rate_limit_window_ms: partial
                .limits
                .as_ref()
                .and_then(|l| l.rate_limit_window_ms)
                .unwrap_or(default.limits.rate_limit_window_ms),
        },
    })
}
