use eyre::Result;
use tracing::Subscriber;
use tracing_subscriber::{
    filter::{LevelFilter, Targets},
    prelude::*,
    registry::LookupSpan,
    Layer,
};

/// Logging level. A "higher level" means more will be logged.
#[derive(Default, Debug, Clone, Copy, serde::Deserialize, PartialOrd, Ord, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Level {
    /// Off
    Off = 0,
    /// Error
    Error = 1,
    /// Warn
    Warn = 2,
    /// Debug
    Debug = 4,
    /// Trace
    Trace = 5,
    /// Info
    #[serde(other)]
    #[default]
    Info = 3,
}

impl From<Level> for LevelFilter {
    fn from(level: Level) -> LevelFilter {
        match level {
            Level::Off => LevelFilter::OFF,
            Level::Error => LevelFilter::ERROR,
            Level::Warn => LevelFilter::WARN,
            Level::Debug => LevelFilter::DEBUG,
            Level::Trace => LevelFilter::TRACE,
            Level::Info => LevelFilter::INFO,
        }
    }
}

/// Output format of the log lines.
#[derive(Default, Debug, Clone, Copy, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Style {
    /// Multi-line, human oriented
    Pretty,
    /// One JSON object per line
    Json,
    /// Single line, fields abbreviated
    Compact,
    /// Single line with every field, the default
    #[serde(other)]
    #[default]
    Full,
}

impl Style {
    fn layer<S>(self) -> Box<dyn Layer<S> + Send + Sync>
    where
        S: Subscriber + for<'a> LookupSpan<'a> + 'static,
    {
        let layer = tracing_subscriber::fmt::layer();
        match self {
            Style::Pretty => layer.pretty().boxed(),
            Style::Json => layer.json().boxed(),
            Style::Compact => layer.compact().boxed(),
            Style::Full => layer.boxed(),
        }
    }
}

/// Configuration for the tracing subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
pub struct TracingConfig {
    #[serde(default)]
    pub fmt: Style,
    #[serde(default)]
    pub level: Level,
}

impl TracingConfig {
    fn targets(&self) -> Targets {
        let mut targets = Targets::new().with_default(self.level);
        if self.level < Level::Trace {
            // only show these debug and trace logs at trace level
            targets = targets.with_target("hyper", Level::Info);
            targets = targets.with_target("reqwest", Level::Info);
        }
        targets
    }

    /// Builds the subscriber and installs it as the global default.
    pub fn start_tracing(&self) -> Result<()> {
        let subscriber = tracing_subscriber::Registry::default()
            .with(self.targets())
            .with(self.fmt.layer())
            .with(tracing_error::ErrorLayer::default());

        subscriber.try_init()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_values() {
        let conf: TracingConfig =
            serde_json::from_str(r#"{ "fmt": "json", "level": "debug" }"#).unwrap();
        assert_eq!(conf.fmt, Style::Json);
        assert_eq!(conf.level, Level::Debug);
    }

    #[test]
    fn unknown_values_fall_back_to_defaults() {
        let conf: TracingConfig =
            serde_json::from_str(r#"{ "fmt": "fancy", "level": "loud" }"#).unwrap();
        assert_eq!(conf, TracingConfig::default());
        assert_eq!(conf.level, Level::Info);
        assert_eq!(conf.fmt, Style::Full);
    }

    #[test]
    fn levels_are_ordered_by_verbosity() {
        assert!(Level::Off < Level::Error);
        assert!(Level::Warn < Level::Info);
        assert!(Level::Info < Level::Debug);
        assert!(Level::Debug < Level::Trace);
    }

    #[test]
    fn noisy_targets_are_quieted_below_trace() {
        let targets = TracingConfig {
            fmt: Style::Full,
            level: Level::Debug,
        }
        .targets();
        assert!(targets.would_enable("chief_keeper::manager", &tracing::Level::DEBUG));
        assert!(!targets.would_enable("hyper::client", &tracing::Level::DEBUG));
        assert!(targets.would_enable("hyper::client", &tracing::Level::INFO));
    }
}
