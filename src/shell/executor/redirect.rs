use std::os::fd::RawFd;

use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::{close, dup2};

use crate::shell::error::{Result, ShellError};
use crate::shell::parser::ast::{RedirectOp, Redirection};

fn output_flags(operator: &RedirectOp) -> OFlag {
    let mode = match operator {
        RedirectOp::Append => OFlag::O_APPEND,
        _ => OFlag::O_TRUNC,
    };
    OFlag::O_WRONLY | OFlag::O_CREAT | mode
}

fn redirect_to(redirection: &Redirection, flags: OFlag, target: RawFd) -> Result<()> {
    let mode = Mode::S_IRUSR | Mode::S_IWUSR | Mode::S_IRGRP | Mode::S_IROTH;
    let fd = open(redirection.filename.as_str(), flags, mode).map_err(|source| {
        ShellError::Redirect {
            path: redirection.filename.clone(),
            source,
        }
    })?;
    if fd != target {
        dup2(fd, target).map_err(|e| ShellError::os("dup2", e))?;
        close(fd).map_err(|e| ShellError::os("close", e))?;
    }
    Ok(())
}

/// 在子进程里把重定向接到标准输入/输出上
pub fn apply(input: &Option<Redirection>, output: &Option<Redirection>) -> Result<()> {
    if let Some(redirection) = input {
        redirect_to(redirection, OFlag::O_RDONLY, libc::STDIN_FILENO)?;
    }
    if let Some(redirection) = output {
        redirect_to(
            redirection,
            output_flags(&redirection.operator),
            libc::STDOUT_FILENO,
        )?;
    }
    Ok(())
}

/// 把管道的一端接到 target 上，并关掉管道两端的原始描述符
pub fn connect_pipe_end(fd: RawFd, target: RawFd, unused: RawFd) -> Result<()> {
    dup2(fd, target).map_err(|e| ShellError::os("dup2", e))?;
    close(fd).map_err(|e| ShellError::os("close", e))?;
    close(unused).map_err(|e| ShellError::os("close", e))?;
    Ok(())
}
