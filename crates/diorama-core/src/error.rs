pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid config JSON: {message}")]
    InvalidConfigJson { message: String },

    #[error("Config must be a JSON object, got {found}")]
    ConfigNotObject { found: &'static str },
}
