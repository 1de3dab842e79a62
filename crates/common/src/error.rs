//! Common error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("DAP worker stopped")]
    WorkerStopped,
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::Channel("sending into a closed channel".into()).to_string(),
            "Channel error: sending into a closed channel"
        );
        assert_eq!(Error::WorkerStopped.to_string(), "DAP worker stopped");
    }
}
