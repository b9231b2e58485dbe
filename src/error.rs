use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure a pipeline stage can surface. Stages construct their own
/// kind; the orchestrator logs and forwards.
#[derive(Debug, Error)]
pub enum Error {
    #[error("compression: {0}")]
    Compression(&'static str),

    #[error("envelope: {0}")]
    BadCiphertext(&'static str),

    /// The asymmetric unwrap of the session key failed.
    #[error("envelope: asymmetric unwrap failed")]
    AuthFailure,

    #[error("key: {0}")]
    Key(String),

    /// No start/end marker pair delimits a data region in the recording.
    #[error("no frame detected in recording")]
    NoFrame,

    #[error("demodulation: {0}")]
    Demod(String),

    #[error("audio: {0}")]
    Audio(String),

    /// The receive window closed without capturing any signal.
    #[error("receive timed out with no signal")]
    ReceiveTimeout,

    #[error("config: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
