//! Tracing setup for embedders that want the bus's default log format.

use tracing::Level;

/// Initialize the global tracing subscriber at the given level name.
///
/// Unknown names fall back to `info`. Uses `try_init` so tests and host
/// applications that already installed a subscriber can call this freely.
pub fn init(default_level: &str) {
    let lvl = match default_level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" | "warning" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    };

    let _ = tracing_subscriber::fmt()
        .with_max_level(lvl)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::init;

    #[test]
    fn init_accepts_any_level_name() {
        init("info");
        init("debug");
        init("not-a-level");
    }
}
