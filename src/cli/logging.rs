//! Log layer construction: verbosity count, `--log-filter` override, and a
//! selectable output format, wired through `clap`'s derive API.

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Debug, clap::Args)]
pub struct Options {
    /// Verbose mode (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Env-filter compatible log filter, overrides --verbose when set
    #[arg(long, env, default_value = "")]
    log_filter: String,

    /// Log format
    #[arg(long, env, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

impl Options {
    /// Installs the global `tracing` subscriber. Called once at startup.
    pub fn init(&self) {
        let filter = if self.log_filter.is_empty() {
            EnvFilter::new(self.default_level())
        } else {
            EnvFilter::new(&self.log_filter)
        };

        let builder = tracing_subscriber::fmt().with_env_filter(filter);
        match self.log_format {
            LogFormat::Compact => builder.compact().init(),
            LogFormat::Pretty => builder.pretty().init(),
            LogFormat::Json => builder.json().init(),
        }
    }

    fn default_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
