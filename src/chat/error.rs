use std::fmt;

/// Errors that can occur during chat operations
#[derive(Debug)]
pub enum ChatError {
    /// Transport-level connect failure (the only error a `connect()` call surfaces)
    ConnectError(String),

    /// Live connection error after connect
    TransportError(String),

    /// HTTP request error
    HttpError(String),

    /// JSON parsing error
    JsonError(String),

    /// Authentication error (invalid token, missing scopes)
    AuthError(String),

    /// Operation requires an active connection
    NotConnected,

    /// Operation requires a resolved channel
    NoChannel,

    /// Operation requires an authenticated session
    NotAuthenticated,

    /// Message deletion requires a message id
    MissingMessageId,

    /// A moderation call failed (also surfaced as a system notice)
    ModerationError(String),
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::ConnectError(msg) => write!(f, "Connect error: {}", msg),
            ChatError::TransportError(msg) => write!(f, "Transport error: {}", msg),
            ChatError::HttpError(msg) => write!(f, "HTTP error: {}", msg),
            ChatError::JsonError(msg) => write!(f, "JSON error: {}", msg),
            ChatError::AuthError(msg) => write!(f, "Authentication error: {}", msg),
            ChatError::NotConnected => write!(f, "Not connected to a chat room"),
            ChatError::NoChannel => write!(f, "No channel configured"),
            ChatError::NotAuthenticated => write!(f, "Not authenticated"),
            ChatError::MissingMessageId => write!(f, "Message deletion requires a message id"),
            ChatError::ModerationError(msg) => write!(f, "Moderation error: {}", msg),
        }
    }
}

impl std::error::Error for ChatError {}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::JsonError(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChatError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ChatError::TransportError(err.to_string())
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::HttpError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
