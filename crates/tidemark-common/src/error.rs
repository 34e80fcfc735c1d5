use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("registration error: {0}")]
    Registration(String),

    #[error("migration {version} failed: {reason}")]
    Migration { version: String, reason: String },
}

impl Error {
    /// The version a failed run stopped at, if the error came from one.
    pub fn failed_version(&self) -> Option<&str> {
        match self {
            Error::Migration { version, .. } => Some(version),
            _ => None,
        }
    }
}
