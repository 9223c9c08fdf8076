use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Not connected")]
    NotConnected,

    #[error("No conversation selected")]
    NoCounterpart,

    #[error("Message text is empty")]
    EmptyMessage,

    #[error("Server rejected request ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
