use std::io;

use thiserror::Error;

use crate::remote::protocol::ProtocolError;
use crate::state::Status;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    // 協調的な停止。失敗ではない
    #[error("cancelled")]
    Cancelled,

    #[error("philosopher {id} is {status}, not thinking")]
    NotThinking { id: usize, status: Status },

    #[error("philosopher {id} is not seated at a table of {n}")]
    UnknownPhilosopher { id: usize, n: usize },

    #[error("a ring needs at least 2 philosophers, got {0}")]
    Ring(usize),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("coordinator rejected the request: {0}")]
    Rejected(String),

    #[error("unexpected reply from coordinator: {0:?}")]
    UnexpectedReply(String),

    #[error("coordinator closed the connection")]
    Disconnected,

    #[error(transparent)]
    Io(#[from] io::Error),
}
