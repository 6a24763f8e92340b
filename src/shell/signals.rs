use log::warn;
use nix::sys::signal::{signal, SigHandler, Signal};

const SHELL_IGNORED: [Signal; 2] = [Signal::SIGINT, Signal::SIGQUIT];

fn set_handler(handler: SigHandler) {
    for sig in SHELL_IGNORED {
        // SAFETY: 只在 SIG_IGN 与 SIG_DFL 之间切换，不安装自定义处理函数
        if let Err(e) = unsafe { signal(sig, handler) } {
            warn!("设置信号 {} 处理方式失败: {}", sig, e);
        }
    }
}

/// shell 本身忽略 Ctrl-C、Ctrl-\
pub fn ignore_block_signals() {
    set_handler(SigHandler::SigIgn);
}

/// 子进程恢复默认处理，否则 exec 之后仍会忽略这些信号
pub fn restore_default_signals() {
    set_handler(SigHandler::SigDfl);
}
