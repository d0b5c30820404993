use thiserror::Error;

use crate::agent::AgentError;
use crate::config::ConfigError;
use crate::results::StoreError;
use crate::sidecar::{EnvError, ProtocolError};
use crate::task::TaskError;
use crate::tools::ToolError;

/// Any failure surfaced by the library.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Environment(#[from] EnvError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
