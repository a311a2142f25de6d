use thiserror::Error;

use crate::client::ExchangeError;
use crate::session::StorageError;

#[derive(Error, Debug)]
pub enum ChatBubbleError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),
}
