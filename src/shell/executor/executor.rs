use log::{debug, warn};
use std::ffi::CString;
use std::io::{self, Write};
use std::os::fd::AsRawFd;
use std::{env, process};

use nix::errno::Errno;
use nix::unistd::{chdir, execvp, fork, pipe, ForkResult, Pid};

use crate::shell::error::{Result, ShellError};
use crate::shell::parser::ast::{Node, SimpleCommand, Subshell};
use crate::shell::signals;

use super::job_manager::{backgrounded_message, wait_for, JobManager};
use super::redirect;
use super::variable::Variable;

pub struct Executor {
    variables: Variable,
    jobs: JobManager,
}

impl Executor {
    pub fn new(variables: Variable) -> Self {
        Self {
            variables,
            jobs: JobManager::new(),
        }
    }

    pub fn variables(&self) -> &Variable {
        &self.variables
    }

    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }

    pub fn reap_jobs(&mut self) {
        self.jobs.reap_finished();
    }

    /// 执行一整棵命令树，并把结果写入 `?`。
    /// 系统调用失败时放弃这棵树，`?` 记为 1
    pub fn run(&mut self, node: &Node) -> Result<i32> {
        self.reap_jobs();
        debug!("执行命令树 ({:?}): {}", node.kind(), node);

        let result = self.execute(node);
        let status = match &result {
            Ok(status) => *status,
            Err(_) => 1,
        };
        self.variables.set_status(status);
        result
    }

    pub fn execute(&mut self, node: &Node) -> Result<i32> {
        match node {
            Node::Simple(command) => self.execute_simple(command),
            Node::Subshell(subshell) => self.execute_subshell(subshell),
            Node::Pipe(left, right) => self.execute_pipe(left, right),
            Node::And(..) | Node::Or(..) => self.execute_conditional(node, None),
            Node::Seq(left, right) => {
                let status = self.execute(left)?;
                match right {
                    Some(right) => self.execute(right),
                    None => Ok(status),
                }
            }
            Node::Background(left, right) => self.execute_background(left, right.as_deref()),
        }
    }

    // 子进程里执行，出错时打印并返回 1，而不是回到调用方
    fn execute_or_report(&mut self, node: &Node) -> i32 {
        match self.execute(node) {
            Ok(status) => status,
            Err(e) => {
                eprintln!("bsh: {}", e);
                1
            }
        }
    }

    /// `&&` / `||`。carried 为 Some 时左边被跳过，直接以携带的状态参与判断，
    /// 这样 `A && B || C` 在 A 失败时仍会执行 C
    fn execute_conditional(&mut self, node: &Node, carried: Option<i32>) -> Result<i32> {
        let (left, right, is_and) = match node {
            Node::And(left, right) => (left, right, true),
            Node::Or(left, right) => (left, right, false),
            _ => {
                return match carried {
                    Some(status) => {
                        debug!("跳过: {}", node);
                        Ok(status)
                    }
                    None => self.execute(node),
                }
            }
        };

        let status = match carried {
            Some(status) => {
                debug!("跳过: {}", left);
                status
            }
            None => self.execute(left)?,
        };

        let proceed = if is_and { status == 0 } else { status != 0 };
        if proceed {
            self.execute_conditional(right, None)
        } else {
            self.execute_conditional(right, Some(status))
        }
    }

    /// fork 出子进程执行 body，子进程以 body 的返回值退出
    fn spawn_child<F>(&mut self, body: F) -> Result<Pid>
    where
        F: FnOnce(&mut Self) -> i32,
    {
        // 先清空缓冲区，避免子进程重复输出
        flush_std_streams();

        // SAFETY: 子进程只做重定向、执行命令树或 exec，随后直接退出
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                signals::restore_default_signals();
                self.jobs.forget_all();
                let status = body(self);
                flush_std_streams();
                process::exit(status)
            }
            Ok(ForkResult::Parent { child }) => {
                debug!("创建子进程 {}", child);
                Ok(child)
            }
            Err(e) => Err(ShellError::os("fork", e)),
        }
    }

    fn execute_simple(&mut self, command: &SimpleCommand) -> Result<i32> {
        // 处理内建命令
        if let Some(status) = self.handle_builtin(command) {
            debug!("执行内建命令: {}", command);
            return Ok(status);
        }

        // 执行外部命令
        debug!("执行外部命令: {}", command);
        let pid = self.spawn_child(|_| exec_program(command))?;
        wait_for(pid)
    }

    fn execute_subshell(&mut self, subshell: &Subshell) -> Result<i32> {
        let pid = self.spawn_child(|exec| {
            if let Err(e) = redirect::apply(&subshell.input, &subshell.output) {
                eprintln!("bsh: {}", e);
                return 1;
            }
            for local in &subshell.locals {
                env::set_var(&local.name, &local.value);
                exec.variables.set(local.name.clone(), local.value.clone());
            }
            exec.execute_or_report(&subshell.body)
        })?;
        wait_for(pid)
    }

    /// 左右两边各自在子进程中执行，shell 自己的标准输入输出保持不变
    fn execute_pipe(&mut self, left: &Node, right: &Node) -> Result<i32> {
        let (read, write) = pipe().map_err(|e| ShellError::os("pipe", e))?;
        let (read_fd, write_fd) = (read.as_raw_fd(), write.as_raw_fd());

        let left_pid = self.spawn_child(move |exec| {
            if let Err(e) = redirect::connect_pipe_end(write_fd, libc::STDOUT_FILENO, read_fd) {
                eprintln!("bsh: {}", e);
                return 1;
            }
            exec.execute_or_report(left)
        })?;

        let right_pid = self.spawn_child(move |exec| {
            if let Err(e) = redirect::connect_pipe_end(read_fd, libc::STDIN_FILENO, write_fd) {
                eprintln!("bsh: {}", e);
                return 1;
            }
            exec.execute_or_report(right)
        });

        // 父进程关闭两端，读端才能在写端全部关闭后读到 EOF
        drop(read);
        drop(write);

        let right_pid = match right_pid {
            Ok(pid) => pid,
            Err(e) => {
                if let Err(wait_err) = wait_for(left_pid) {
                    warn!("等待管道左侧 {} 失败: {}", left_pid, wait_err);
                }
                return Err(e);
            }
        };

        if let Err(e) = wait_for(left_pid) {
            warn!("等待管道左侧 {} 失败: {}", left_pid, e);
        }
        wait_for(right_pid)
    }

    fn execute_background(&mut self, left: &Node, right: Option<&Node>) -> Result<i32> {
        let pid = self.spawn_child(|exec| exec.execute_or_report(left))?;
        eprintln!("{}", backgrounded_message(pid));
        let index = self.jobs.add_job(pid, left.to_string());
        debug!("后台任务 [{}] {}", index, pid);

        match right {
            Some(right) => self.execute(right),
            None => Ok(0),
        }
    }

    // 处理内建命令
    fn handle_builtin(&mut self, command: &SimpleCommand) -> Option<i32> {
        match command.program.as_str() {
            "cd" => Some(self.builtin_cd(command)),
            "wait" => Some(self.builtin_wait(command)),
            _ => None,
        }
    }

    fn builtin_cd(&mut self, command: &SimpleCommand) -> i32 {
        let target = match command.arguments.as_slice() {
            [] => match self.variables.get("HOME") {
                Some(home) => home.to_string(),
                None => {
                    eprintln!("bsh: cd: HOME not set");
                    return 1;
                }
            },
            [dir] => shellexpand::tilde_with_context(dir, || self.variables.get("HOME")).into_owned(),
            _ => {
                eprintln!("bsh: cd: too many arguments");
                return 1;
            }
        };

        match chdir(target.as_str()) {
            Ok(()) => {
                debug!("切换目录: {}", target);
                0
            }
            Err(errno) => {
                eprintln!("bsh: cd: {}: {}", target, errno.desc());
                errno as i32
            }
        }
    }

    fn builtin_wait(&mut self, command: &SimpleCommand) -> i32 {
        if !command.arguments.is_empty() {
            eprintln!("bsh: wait: usage: wait");
            return 1;
        }
        self.jobs.wait_all();
        0
    }
}

fn flush_std_streams() {
    if let Err(e) = io::stdout().flush() {
        warn!("刷新标准输出失败: {}", e);
    }
    if let Err(e) = io::stderr().flush() {
        warn!("刷新标准错误失败: {}", e);
    }
}

/// 在子进程里执行外部程序：重定向、导出本地变量，然后 exec。
/// 只有失败时才会返回，返回值是子进程的退出码
fn exec_program(command: &SimpleCommand) -> i32 {
    if let Err(e) = redirect::apply(&command.input, &command.output) {
        eprintln!("bsh: {}", e);
        return 1;
    }

    for local in &command.locals {
        env::set_var(&local.name, &local.value);
    }

    let argv = match command
        .argv()
        .map(CString::new)
        .collect::<std::result::Result<Vec<_>, _>>()
    {
        Ok(argv) => argv,
        Err(e) => {
            eprintln!("bsh: {}: {}", command.program, e);
            return 1;
        }
    };

    match execvp(&argv[0], &argv) {
        Ok(never) => match never {},
        Err(Errno::ENOENT) => {
            eprintln!("bsh: {}: command not found", command.program);
            127
        }
        Err(errno) => {
            eprintln!("bsh: {}: {}", command.program, errno.desc());
            126
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::parser::{lex, parse};
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    // 会改变工作目录的测试必须串行
    static CWD_LOCK: Mutex<()> = Mutex::new(());

    fn temp_path(name: &str) -> PathBuf {
        let path = env::temp_dir().join(format!("bsh-test-{}-{}", process::id(), name));
        let _ = fs::remove_file(&path);
        path
    }

    #[allow(clippy::unwrap_used)]
    fn run_line(exec: &mut Executor, line: &str) -> i32 {
        let tree = parse(&lex(line)).unwrap();
        exec.run(&tree).unwrap()
    }

    fn executor() -> Executor {
        Executor::new(Variable::new())
    }

    fn show(path: &Path) -> String {
        path.display().to_string()
    }

    #[test]
    fn test_simple_status() {
        let mut exec = executor();
        assert_eq!(run_line(&mut exec, "true"), 0);
        assert_eq!(run_line(&mut exec, "false"), 1);
        assert_eq!(run_line(&mut exec, "sh -c 'exit 42'"), 42);
    }

    #[test]
    fn test_run_mirrors_status_into_variables() {
        let mut exec = executor();
        run_line(&mut exec, "false");
        assert_eq!(exec.variables().get("?"), Some("1"));
        run_line(&mut exec, "true");
        assert_eq!(exec.variables().status(), 0);
    }

    #[test]
    fn test_signaled_child_reports_128_plus_signal() {
        let mut exec = executor();
        assert_eq!(run_line(&mut exec, "sh -c 'kill -9 $$'"), 137);
    }

    #[test]
    fn test_command_not_found() {
        let mut exec = executor();
        assert_eq!(run_line(&mut exec, "bsh-no-such-program-xyz"), 127);
        // 子进程的失败不影响 shell 本身
        assert_eq!(run_line(&mut exec, "true"), 0);
    }

    #[test]
    fn test_and_or_short_circuit() {
        let mut exec = executor();
        let (a, b, c, d) = (
            temp_path("and-a"),
            temp_path("and-b"),
            temp_path("or-c"),
            temp_path("or-d"),
        );

        assert_eq!(run_line(&mut exec, &format!("false && touch {}", show(&a))), 1);
        assert!(!a.exists());
        assert_eq!(run_line(&mut exec, &format!("true && touch {}", show(&b))), 0);
        assert!(b.exists());
        assert_eq!(run_line(&mut exec, &format!("true || touch {}", show(&c))), 0);
        assert!(!c.exists());
        assert_eq!(run_line(&mut exec, &format!("false || touch {}", show(&d))), 0);
        assert!(d.exists());

        assert_eq!(run_line(&mut exec, "sh -c 'exit 3' && true"), 3);
        assert_eq!(run_line(&mut exec, "false || sh -c 'exit 4'"), 4);
    }

    #[test]
    fn test_skipped_operand_still_resolves_next_operator() {
        let mut exec = executor();
        let (a, b, c) = (
            temp_path("skip-a"),
            temp_path("skip-b"),
            temp_path("skip-c"),
        );

        let line = format!("false && touch {} || touch {}", show(&a), show(&b));
        assert_eq!(run_line(&mut exec, &line), 0);
        assert!(!a.exists());
        assert!(b.exists());

        let line = format!("true || touch {} && touch {}", show(&a), show(&c));
        assert_eq!(run_line(&mut exec, &line), 0);
        assert!(!a.exists());
        assert!(c.exists());

        let line = format!("false && touch {} && touch {}", show(&a), show(&a));
        assert_eq!(run_line(&mut exec, &line), 1);
        assert!(!a.exists());
    }

    fn touch(path: &Path) -> Box<Node> {
        let mut command = SimpleCommand::new("touch");
        command.arguments.push(show(path));
        Box::new(Node::Simple(command))
    }

    fn simple(program: &str) -> Box<Node> {
        Box::new(Node::Simple(SimpleCommand::new(program)))
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_skipped_list_on_right_returns_carried_status() {
        let mut exec = executor();
        let (a, b) = (temp_path("carry-seq"), temp_path("carry-bg"));

        // 解析器不会生成这种形状，手工构造
        let tree = Node::And(simple("false"), Box::new(Node::Seq(touch(&a), None)));
        assert_eq!(exec.run(&tree).unwrap(), 1);
        assert!(!a.exists());

        let tree = Node::Or(simple("true"), Box::new(Node::Background(touch(&b), None)));
        assert_eq!(exec.run(&tree).unwrap(), 0);
        assert!(!b.exists());
        assert!(exec.jobs().get_jobs().is_empty());
    }

    #[test]
    fn test_seq_returns_last_status() {
        let mut exec = executor();
        assert_eq!(run_line(&mut exec, "false ; true"), 0);
        assert_eq!(run_line(&mut exec, "true ; false"), 1);
        assert_eq!(run_line(&mut exec, "false ;"), 1);
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_pipeline() {
        let mut exec = executor();
        assert_eq!(run_line(&mut exec, "false | true"), 0);
        assert_eq!(run_line(&mut exec, "true | false"), 1);
        assert_eq!(run_line(&mut exec, "true | true | sh -c 'exit 5'"), 5);

        let out = temp_path("pipe-out");
        let line = format!("echo hi | cat | tr a-z A-Z > {}", show(&out));
        assert_eq!(run_line(&mut exec, &line), 0);
        assert_eq!(fs::read_to_string(&out).unwrap(), "HI\n");
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_output_redirection_truncates_and_appends() {
        let mut exec = executor();
        let out = temp_path("redirect-out");

        run_line(&mut exec, &format!("echo hi > {}", show(&out)));
        run_line(&mut exec, &format!("echo hi > {}", show(&out)));
        assert_eq!(fs::read_to_string(&out).unwrap(), "hi\n");

        fs::remove_file(&out).unwrap();
        run_line(&mut exec, &format!("echo hi >> {}", show(&out)));
        run_line(&mut exec, &format!("echo hi >> {}", show(&out)));
        assert_eq!(fs::read_to_string(&out).unwrap(), "hi\nhi\n");
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_input_redirection() {
        let mut exec = executor();
        let (input, out) = (temp_path("redirect-in"), temp_path("redirect-in-out"));
        fs::write(&input, "b\na\n").unwrap();

        let line = format!("sort < {} > {}", show(&input), show(&out));
        assert_eq!(run_line(&mut exec, &line), 0);
        assert_eq!(fs::read_to_string(&out).unwrap(), "a\nb\n");
    }

    #[test]
    fn test_redirection_failure_only_fails_the_child() {
        let mut exec = executor();
        assert_eq!(run_line(&mut exec, "cat < /bsh-no-such-dir/input"), 1);
        assert_eq!(run_line(&mut exec, "echo hi > /bsh-no-such-dir/output"), 1);
        assert_eq!(run_line(&mut exec, "true"), 0);
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_locals_are_scoped_to_the_command() {
        let mut exec = executor();
        let out = temp_path("locals");

        let line = format!("BSH_TEST_LOCAL=1 printenv BSH_TEST_LOCAL > {}", show(&out));
        assert_eq!(run_line(&mut exec, &line), 0);
        assert_eq!(fs::read_to_string(&out).unwrap(), "1\n");

        assert!(env::var("BSH_TEST_LOCAL").is_err());
        assert_eq!(run_line(&mut exec, "printenv BSH_TEST_LOCAL"), 1);

        // 同一行里后面的命令也看不到
        let line = "BSH_TEST_LOCAL=1 printenv BSH_TEST_LOCAL ; printenv BSH_TEST_LOCAL";
        assert_eq!(run_line(&mut exec, line), 1);
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_subshell_applies_redirections_and_locals_to_body() {
        let mut exec = executor();
        let out = temp_path("subshell");

        let line = format!(
            "BSH_TEST_SUB=x (printenv BSH_TEST_SUB ; echo done) > {}",
            show(&out)
        );
        assert_eq!(run_line(&mut exec, &line), 0);
        assert_eq!(fs::read_to_string(&out).unwrap(), "x\ndone\n");
        assert!(env::var("BSH_TEST_SUB").is_err());

        assert_eq!(run_line(&mut exec, "(true ; sh -c 'exit 7')"), 7);
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_subshell_isolates_directory_change() {
        let _guard = CWD_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut exec = executor();
        let before = env::current_dir().unwrap();

        assert_eq!(run_line(&mut exec, "(cd /)"), 0);
        assert_eq!(env::current_dir().unwrap(), before);
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_cd_builtin() {
        let _guard = CWD_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let before = env::current_dir().unwrap();
        let home = fs::canonicalize(env::temp_dir()).unwrap();

        let mut vars = Variable::new();
        vars.set("HOME", home.display().to_string());
        let mut exec = Executor::new(vars);

        assert_eq!(run_line(&mut exec, "cd a b"), 1);
        assert_eq!(env::current_dir().unwrap(), before);

        assert_eq!(run_line(&mut exec, "cd /bsh-no-such-dir"), Errno::ENOENT as i32);
        assert_eq!(env::current_dir().unwrap(), before);

        assert_eq!(run_line(&mut exec, "cd"), 0);
        assert_eq!(fs::canonicalize(env::current_dir().unwrap()).unwrap(), home);

        assert_eq!(run_line(&mut exec, "cd /"), 0);
        assert_eq!(run_line(&mut exec, "cd ~"), 0);
        assert_eq!(fs::canonicalize(env::current_dir().unwrap()).unwrap(), home);

        // 没有 HOME 时报错，目录不变
        let mut exec = executor();
        assert_eq!(run_line(&mut exec, "cd"), 1);
        assert_eq!(fs::canonicalize(env::current_dir().unwrap()).unwrap(), home);

        env::set_current_dir(before).unwrap();
    }

    #[test]
    fn test_background_does_not_block_and_wait_reaps() {
        let mut exec = executor();

        let started = Instant::now();
        assert_eq!(run_line(&mut exec, "sleep 1 &"), 0);
        assert!(started.elapsed() < Duration::from_millis(900));
        assert_eq!(exec.jobs().get_jobs().len(), 1);

        assert_eq!(run_line(&mut exec, "wait"), 0);
        assert!(exec.jobs().get_jobs().is_empty());
        assert!(started.elapsed() >= Duration::from_millis(900));

        assert_eq!(run_line(&mut exec, "wait now"), 1);
    }

    #[test]
    fn test_background_continues_with_right_side() {
        let mut exec = executor();
        // 后台任务要在计数前仍在运行，否则会在下一次 run 时被回收
        assert_eq!(run_line(&mut exec, "sleep 1 & false"), 1);
        assert_eq!(run_line(&mut exec, "sleep 1 & true"), 0);
        assert_eq!(exec.jobs().get_jobs().len(), 2);
        run_line(&mut exec, "wait");
    }

    #[test]
    fn test_finished_jobs_are_reaped_at_entry() {
        let mut exec = executor();
        run_line(&mut exec, "true &");
        assert_eq!(exec.jobs().get_jobs().len(), 1);

        let deadline = Instant::now() + Duration::from_secs(5);
        while !exec.jobs().get_jobs().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
            exec.reap_jobs();
        }
        assert!(exec.jobs().get_jobs().is_empty());
    }
}
