use thiserror::Error;

use crate::event::BusError;
use crate::source::SourceError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Source {name} failed: {source}")]
    Source {
        name: &'static str,
        #[source]
        source: SourceError,
    },

    #[error("Event bus error: {0}")]
    Bus(#[from] BusError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Error for a start where no source ended up running
    ///
    /// Reports the first failure, or a configuration error when every
    /// source was disabled and nothing was attempted.
    pub fn nothing_running(failures: Vec<(&'static str, SourceError)>) -> Self {
        match failures.into_iter().next() {
            Some((name, source)) => AppError::Source { name, source },
            None => AppError::Config("every source is disabled".to_string()),
        }
    }
}
