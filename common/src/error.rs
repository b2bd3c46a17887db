use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link rejected configuration: {0}")]
    Config(String),
    #[error("link driver error: {0}")]
    Driver(String),
}

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("display init failed: {0}")]
    Init(String),
    #[error("display bus error: {0}")]
    Bus(String),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings namespace `{0}` unavailable")]
    Namespace(String),
    #[error("settings read failed for `{key}`: {reason}")]
    Read { key: String, reason: String },
    #[error("settings write failed for `{key}`: {reason}")]
    Write { key: String, reason: String },
}
