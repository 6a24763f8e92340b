use log::{debug, error, warn};
use std::io::Write;

use crate::shell::error::{Result, ShellError};
use crate::shell::executor::{Executor, Variable};
use crate::shell::parser::{lex, parse, Token};
use crate::shell::readline::{ReadlineError, ReadlineManager};
use crate::shell::signals;
use crate::utils::config::Config;
use crate::utils::theme::Theme;

pub struct Shell<'a> {
    config: &'a Config,
    theme: Theme,
    readline: ReadlineManager<'a>,
    executor: Executor,
    command_number: usize,
}

/// 展开 `$?`、`$NAME` 与 `${NAME}`，变量值取自 shell 的变量表
fn expand_line(line: &str, variables: &Variable) -> String {
    let line = line.replace("$?", &variables.status().to_string());
    shellexpand::env_with_context_no_errors(&line, |name| variables.get(name)).into_owned()
}

fn dump_list(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(|token| format!("{}:{}", token.text, token.kind))
        .collect::<Vec<_>>()
        .join(" ")
}

impl<'a> Shell<'a> {
    pub fn new(config: &'a Config) -> Result<Self> {
        Ok(Self {
            config,
            theme: Theme::load_theme(&config.theme),
            readline: ReadlineManager::new(config)?,
            executor: Executor::new(Variable::from_process()),
            command_number: 1,
        })
    }

    pub fn run(&mut self) -> Result<()> {
        debug!("初始化 {}...", self.config.name);

        // 忽略 Ctrl-C、Ctrl-\，由前台子进程自己处理
        signals::ignore_block_signals();

        self.readline.load_history();

        println!(
            "{}",
            (self.theme.success_style)(self.theme.get_message("welcome"))
        );
        println!(
            "{}",
            (self.theme.warning_style)(self.theme.get_message("help"))
        );
        debug!("{} 准备就绪...", self.config.name);

        self.run_loop()?;
        self.readline.save_history();

        let pending = self.executor.jobs().get_jobs().len();
        if pending > 0 {
            warn!("退出时仍有 {} 个后台任务未结束", pending);
        }
        debug!("退出 {}...", self.config.name);
        Ok(())
    }

    fn prompt(&self) -> String {
        let symbol = if self.executor.variables().status() == 0 {
            (self.theme.success_style)(self.theme.get_message("success_symbol"))
        } else {
            (self.theme.error_style)(self.theme.get_message("error_symbol"))
        };
        let prompt = format!("({}){}", self.command_number, self.theme.get_message("prompt"));
        format!("{} {}", symbol, (self.theme.prompt_style)(prompt))
    }

    fn run_loop(&mut self) -> Result<()> {
        loop {
            // 每次回到提示符前回收已结束的后台任务
            self.executor.reap_jobs();
            std::io::stdout().flush()?;
            let prompt = self.prompt();

            match self.readline.readline(&prompt) {
                Ok(line) => {
                    if line.trim() == "exit" {
                        debug!("退出 {}...", self.config.name);
                        println!(
                            "{}",
                            (self.theme.success_style)(self.theme.get_message("exit"))
                        );
                        break;
                    }
                    self.handle_input(&line)?;
                }
                Err(err) => match err {
                    ReadlineError::Eof => {
                        warn!("接收到 EOF 信号，退出 {}...", self.config.name);
                        println!(
                            "\n{}",
                            (self.theme.warning_style)(self.theme.get_message("eof_signal"))
                        );
                        break;
                    }
                    ReadlineError::Interrupted => {
                        warn!("接收到中断信号...");
                        println!(
                            "\n{}",
                            (self.theme.warning_style)(self.theme.get_message("interrupt_signal"))
                        );
                    }
                    err => {
                        error!("发生错误: {}", err);
                        eprintln!(
                            "{}: {}",
                            (self.theme.error_style)(self.theme.get_message("error")),
                            err
                        );
                    }
                },
            }
        }
        Ok(())
    }

    fn handle_input(&mut self, line: &str) -> Result<()> {
        if line.trim().is_empty() {
            return Ok(());
        }
        self.readline.add_history(line)?;

        let expanded = expand_line(line, self.executor.variables());
        let tokens = lex(&expanded);
        if tokens.is_empty() {
            return Ok(());
        }
        if self.config.dump_list {
            println!("{}", dump_list(&tokens));
        }

        // 解析出错时丢弃这一行，重新提示
        let tree = match parse(&tokens) {
            Ok(tree) => tree,
            Err(e) => {
                self.report_error(&ShellError::from(e));
                return Ok(());
            }
        };
        debug!("解析结果: {:?}", tree);
        self.command_number += 1;

        if let Err(e) = self.executor.run(&tree) {
            self.report_error(&e);
        }
        Ok(())
    }

    fn report_error(&self, err: &ShellError) {
        error!("{}", err);
        eprintln!(
            "{} {}",
            (self.theme.error_style)(self.theme.get_message("error_symbol")),
            (self.theme.error_style)(format!("bsh: {}", err)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_line_uses_shell_variables() {
        let mut vars = Variable::new();
        vars.set("NAME", "zako");
        vars.set_status(2);
        assert_eq!(
            expand_line("echo $NAME ${NAME}s $? $MISSING", &vars),
            "echo zako zakos 2 $MISSING"
        );
    }

    #[test]
    fn test_dump_list() {
        let tokens = lex("cat < in >> out && ls");
        assert_eq!(
            dump_list(&tokens),
            "cat:word <:< in:word >>:>> out:word &&:&& ls:word"
        );
    }
}
