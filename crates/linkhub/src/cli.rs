//! Command line handling for the server binary.

use std::path::PathBuf;

use linkhub_core::{Error, Result, ServerConfig};

/// Usage text printed for `--help`.
pub const USAGE: &str = "Usage: linkhub [--config <path>]\n\n\
    Options:\n  \
    --config <path>  YAML configuration file\n  \
    -h, --help       Print this help\n\n\
    Environment overrides: MAX_SESSIONS, SESSION_DIR, DATA_DIR, COUNTRY_CODE_PHONE, ENGINE_COMMAND";

/// Parsed command line options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOptions {
    /// Configuration file, if given
    pub config: Option<PathBuf>,
    /// Whether help was requested
    pub help: bool,
}

impl CliOptions {
    /// Parse arguments, excluding the program name.
    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut options = Self::default();
        let mut args = args.into_iter().map(Into::into);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    let path = args
                        .next()
                        .ok_or_else(|| Error::InvalidInput("--config needs a path".to_string()))?;
                    options.config = Some(PathBuf::from(path));
                }
                "--help" | "-h" => options.help = true,
                other => {
                    if let Some(path) = other.strip_prefix("--config=") {
                        options.config = Some(PathBuf::from(path));
                    } else {
                        return Err(Error::InvalidInput(format!("Unknown argument: {}", other)));
                    }
                }
            }
        }

        Ok(options)
    }

    /// Load the configuration file (or defaults) and apply environment
    /// overrides.
    pub fn load_config(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };
        config.apply_env()?;
        Ok(config)
    }
}
