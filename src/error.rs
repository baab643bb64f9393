#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl BotError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BotError::Timeout(_))
    }
}

impl From<reqwest::Error> for BotError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BotError::Timeout(e.to_string())
        } else if e.is_decode() {
            BotError::Decode(e.to_string())
        } else {
            BotError::Transport(e.to_string())
        }
    }
}

impl From<url::ParseError> for BotError {
    fn from(e: url::ParseError) -> Self {
        BotError::Config(e.to_string())
    }
}
