use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the audio layer
#[derive(Error, Debug)]
pub enum Error {
    /// The audio thread did not signal startup in time
    #[error("audio thread failed to start")]
    StartupTimeout,

    /// The audio thread is gone and the command queue is closed
    #[error("audio command queue closed")]
    QueueClosed,

    /// Platform route switch failed
    #[error("platform device error: {0}")]
    Platform(String),

    /// A sound name was not found in the registry
    #[error("unknown sound: {0}")]
    UnknownSound(String),
}
