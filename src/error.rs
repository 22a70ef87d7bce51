use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sidecar config error: {0}")]
    Sidecar(String),

    #[error("search prefix is {len} bytes but bucket addressing needs at least {min}")]
    PrefixTooShort { len: usize, min: usize },
}
