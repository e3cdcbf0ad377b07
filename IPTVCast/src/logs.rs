use castconfig::Config;
use tracing::Level;
use tracing_subscriber::{
    EnvFilter, Registry,
    filter::LevelFilter,
    layer::SubscriberExt,
    reload,
    util::SubscriberInitExt,
};

/// Poignée sur le niveau de log courant
pub struct LogControl {
    reload_handle: reload::Handle<LevelFilter, Registry>,
}

impl LogControl {
    pub fn set_max_level(&self, level: Level) {
        if let Err(e) = self.reload_handle.reload(LevelFilter::from_level(level)) {
            eprintln!("Failed to reload log level filter: {e}");
        }
    }
}

/// Installe le subscriber : filtre rechargeable, console optionnelle.
///
/// `RUST_LOG`, s'il est défini, remplace le niveau configuré.
pub fn init_logging(config: &Config) -> LogControl {
    let configured = config
        .get_log_min_level()
        .ok()
        .and_then(|l| string_to_level(&l))
        .map(LevelFilter::from_level)
        .unwrap_or(LevelFilter::INFO);

    let env_filter = EnvFilter::try_from_default_env().ok();
    let initial = if env_filter.is_some() {
        LevelFilter::TRACE
    } else {
        configured
    };
    let (filter, reload_handle) = reload::Layer::new(initial);

    let enable_console = config.get_log_enable_console().unwrap_or(true);
    let console = enable_console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_ansi(true)
    });

    Registry::default()
        .with(filter)
        .with(env_filter)
        .with(console)
        .init();

    LogControl { reload_handle }
}

fn string_to_level(s: &str) -> Option<Level> {
    match s.trim().to_uppercase().as_str() {
        "ERROR" => Some(Level::ERROR),
        "WARN" | "WARNING" => Some(Level::WARN),
        "INFO" => Some(Level::INFO),
        "DEBUG" => Some(Level::DEBUG),
        "TRACE" => Some(Level::TRACE),
        _ => None,
    }
}
