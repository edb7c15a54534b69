//! CLI error handling with user-friendly messages.

use std::fmt;
use std::process;

use globelayer::config::ConfigFileError;
use globelayer::ImageryError;

/// Errors surfaced to the user by the CLI.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(std::io::Error),
    /// Config file could not be loaded
    Config(ConfigFileError),
    /// Invalid command-line arguments
    Arguments(String),
    /// Layer or provider could not be created
    Layer(ImageryError),
    /// Tokio runtime could not be started
    Runtime(std::io::Error),
}

impl CliError {
    /// Print the error and exit with status 1.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::Config(_) = self {
            eprintln!();
            eprintln!(
                "Check the file passed with --config (default: ~/.globelayer/config.ini)."
            );
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(e) => write!(f, "Failed to initialize logging: {}", e),
            CliError::Config(e) => write!(f, "{}", e),
            CliError::Arguments(msg) => write!(f, "Invalid arguments: {}", msg),
            CliError::Layer(e) => write!(f, "Failed to create imagery layer: {}", e),
            CliError::Runtime(e) => write!(f, "Failed to start async runtime: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::LoggingInit(e) | CliError::Runtime(e) => Some(e),
            CliError::Config(e) => Some(e),
            CliError::Layer(e) => Some(e),
            CliError::Arguments(_) => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e)
    }
}

impl From<ImageryError> for CliError {
    fn from(e: ImageryError) -> Self {
        CliError::Layer(e)
    }
}
