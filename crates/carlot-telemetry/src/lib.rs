use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "carlot_presence" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines on stdout when true, human-readable otherwise.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: true,
        }
    }
}

impl TelemetryConfig {
    /// Build from textual levels; unknown level names fall back to INFO.
    pub fn from_levels(level: &str, module_levels: &[(String, String)], json: bool) -> Self {
        Self {
            log_level: parse_level(level).unwrap_or(Level::INFO),
            module_levels: module_levels
                .iter()
                .filter_map(|(module, lvl)| parse_level(lvl).map(|l| (module.clone(), l)))
                .collect(),
            json,
        }
    }

    /// The filter directive used when RUST_LOG is not set.
    pub fn filter_directive(&self) -> String {
        let mut filter_str = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter_str
    }
}

/// Parse a level name case-insensitively.
pub fn parse_level(s: &str) -> Option<Level> {
    s.trim().parse().ok()
}

/// Returned by [`init_telemetry`]; records which filter ended up active.
pub struct TelemetryGuard {
    directive: String,
    from_env: bool,
}

impl TelemetryGuard {
    /// The filter directive in effect, e.g. `info,carlot_presence=debug`.
    pub fn directive(&self) -> &str {
        &self.directive
    }

    /// True when `RUST_LOG` overrode the configured levels.
    pub fn from_env(&self) -> bool {
        self.from_env
    }
}

/// Initialize the tracing subscriber. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let (env_filter, from_env) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (EnvFilter::new(config.filter_directive()), false),
    };
    let directive = env_filter.to_string();

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    let result = tracing_subscriber::registry().with(fmt_layer).try_init();
    if let Err(e) = result {
        eprintln!("carlot-telemetry: subscriber already installed: {e}");
    }

    TelemetryGuard {
        directive,
        from_env,
    }
}
