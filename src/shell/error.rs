use nix::errno::Errno;
use thiserror::Error;

use crate::shell::parser::ParseError;
use crate::shell::readline::ReadlineError;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("syntax error: {0}")]
    Parse(#[from] ParseError),
    /// fork/pipe/waitpid 等系统调用失败，当前命令树被放弃
    #[error("{op}: {source}")]
    Os {
        op: &'static str,
        #[source]
        source: Errno,
    },
    /// 重定向目标无法按要求打开，只发生在 fork 出来的子进程里
    #[error("{path}: {source}")]
    Redirect {
        path: String,
        #[source]
        source: Errno,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("readline error: {0}")]
    Readline(#[from] ReadlineError),
}

impl ShellError {
    pub fn os(op: &'static str, source: Errno) -> Self {
        ShellError::Os { op, source }
    }
}

pub type Result<T> = std::result::Result<T, ShellError>;
