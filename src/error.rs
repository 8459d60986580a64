use thiserror::Error;

/// Street mapper error types
///
/// The first four variants are the recoverable, loop-local conditions of the
/// segmentation and telemetry pipeline. None of them stops the control loop.
#[derive(Error, Debug)]
pub enum MapperError {
    #[error("No GPS fix (satellites={satellites})")]
    NoFix { satellites: u32 },

    #[error("Transport disconnected")]
    TransportDisconnected,

    #[error("Reconnect failed ({attempts} consecutive attempts)")]
    ReconnectFailure { attempts: u32 },

    #[error("Insufficient window data ({have}/{need} samples)")]
    InsufficientWindowData { have: usize, need: usize },

    #[error("Mapping already active")]
    AlreadyMapping,

    #[error("Mapping not active")]
    NotMapping,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Position source error: {0}")]
    Source(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MapperError {
    /// Domain conditions the loop logs and moves past
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MapperError::NoFix { .. }
                | MapperError::TransportDisconnected
                | MapperError::ReconnectFailure { .. }
                | MapperError::InsufficientWindowData { .. }
                | MapperError::AlreadyMapping
                | MapperError::NotMapping
                | MapperError::UnknownCommand(_)
                | MapperError::Transport(_)
        )
    }
}

/// Result type for mapper operations
pub type MapperResult<T> = Result<T, MapperError>;
