// 哲学者プロセスとコーディネータの間の行プロトコル
// 1 行のコマンドに 1 行で応答する。送信を重ねても順番に応答する
//
// REGISTER:<id>  -> OK | ERROR:<reason>
// TOMAR:<id>     -> OK (食事が許可されてから返す)
// SOLTAR:<id>    -> OK
// PING           -> PONG
// その他         -> ERROR:<reason>

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub const REGISTER: &str = "REGISTER";
pub const TAKE: &str = "TOMAR";
pub const RELEASE: &str = "SOLTAR";
pub const PING: &str = "PING";

pub const OK: &str = "OK";
pub const PONG: &str = "PONG";
pub const ERROR: &str = "ERROR";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty command")]
    Empty,
    #[error("unknown command {0:?}")]
    Unknown(String),
    #[error("{0} needs a philosopher id")]
    MissingId(&'static str),
    #[error("invalid philosopher id {0:?}")]
    BadId(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Register(usize),
    Take(usize),
    Release(usize),
    Ping,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Pong,
    Error(String),
}

impl FromStr for Request {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Err(ProtocolError::Empty);
        }

        let (command, arg) = match line.split_once(':') {
            Some((command, arg)) => (command, Some(arg)),
            None => (line, None),
        };

        let id = |name: &'static str| -> Result<usize, ProtocolError> {
            let arg = arg.ok_or(ProtocolError::MissingId(name))?;
            arg.trim()
                .parse()
                .map_err(|_| ProtocolError::BadId(arg.to_string()))
        };

        match command {
            REGISTER => Ok(Request::Register(id(REGISTER)?)),
            TAKE => Ok(Request::Take(id(TAKE)?)),
            RELEASE => Ok(Request::Release(id(RELEASE)?)),
            PING if arg.is_none() => Ok(Request::Ping),
            _ => Err(ProtocolError::Unknown(line.to_string())),
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Register(id) => write!(f, "{REGISTER}:{id}"),
            Request::Take(id) => write!(f, "{TAKE}:{id}"),
            Request::Release(id) => write!(f, "{RELEASE}:{id}"),
            Request::Ping => f.write_str(PING),
        }
    }
}

impl FromStr for Reply {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_end_matches(['\r', '\n']);
        match line {
            OK => Ok(Reply::Ok),
            PONG => Ok(Reply::Pong),
            "" => Err(ProtocolError::Empty),
            _ => match line.split_once(':') {
                Some((ERROR, reason)) => Ok(Reply::Error(reason.to_string())),
                _ => Err(ProtocolError::Unknown(line.to_string())),
            },
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ok => f.write_str(OK),
            Reply::Pong => f.write_str(PONG),
            // 理由に改行が入ると 1 行 1 応答が崩れる
            Reply::Error(reason) => write!(f, "{ERROR}:{}", reason.replace(['\r', '\n'], " ")),
        }
    }
}
