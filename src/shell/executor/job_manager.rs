use std::fmt;

use log::{debug, error, warn};
use nix::errno::Errno;
use nix::sys::wait::waitpid;
use nix::sys::wait::WaitPidFlag as WF;
use nix::sys::wait::WaitStatus as WS;
use nix::unistd::Pid;

use crate::shell::error::{Result, ShellError};

#[derive(Debug, Clone)]
pub struct Job {
    pub pid: Pid,
    pub index: usize,
    pub command: String,
}

impl Job {
    fn new(pid: Pid, index: usize, command: String) -> Self {
        Self {
            pid,
            index,
            command,
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} {}", self.index, self.pid, self.command)
    }
}

/// 把 waitpid 的结果换算成退出状态：正常退出取退出码，被信号杀死为 128 + 信号值。
/// 停止、继续等通知返回 None，调用方应继续等待
pub fn decode_status(status: WS) -> Option<i32> {
    match status {
        WS::Exited(_, code) => Some(code),
        WS::Signaled(_, sig, _core_dumped) => Some(128 + sig as i32),
        _ => None,
    }
}

/// 阻塞等待指定子进程结束
pub fn wait_for(pid: Pid) -> Result<i32> {
    loop {
        match waitpid(pid, None) {
            Ok(ws) => {
                if let Some(status) = decode_status(ws) {
                    debug!("子进程 {} 结束，状态 {}", pid, status);
                    return Ok(status);
                }
            }
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(ShellError::os("waitpid", e)),
        }
    }
}

pub fn backgrounded_message(pid: Pid) -> String {
    format!("Backgrounded: {}", pid)
}

pub fn completed_message(pid: Pid, status: i32) -> String {
    format!("Completed: {} ({})", pid, status)
}

/// 后台任务表。只回收自己登记过的子进程
#[derive(Debug, Clone, Default)]
pub struct JobManager {
    jobs: Vec<Job>,
}

impl JobManager {
    pub fn new() -> Self {
        Self { jobs: Vec::new() }
    }

    pub fn get_jobs(&self) -> &[Job] {
        &self.jobs
    }

    fn find_available_index(&self) -> usize {
        let mut index = 1;
        while self.jobs.iter().any(|job| job.index == index) {
            index += 1;
        }
        index
    }

    pub fn add_job(&mut self, pid: Pid, command: String) -> usize {
        let index = self.find_available_index();
        let job = Job::new(pid, index, command);
        debug!("登记后台任务 {}", &job);
        self.jobs.push(job);
        index
    }

    /// 非阻塞地回收已经结束的后台任务，返回本次回收的 (pid, 状态)
    pub fn reap_finished(&mut self) -> Vec<(Pid, i32)> {
        let mut running = Vec::with_capacity(self.jobs.len());
        let mut completed = Vec::new();

        for job in self.jobs.drain(..) {
            match waitpid(job.pid, Some(WF::WNOHANG)) {
                Ok(WS::StillAlive) => running.push(job),
                Ok(ws) => match decode_status(ws) {
                    Some(status) => {
                        debug!("回收后台任务 {}", &job);
                        eprintln!("{}", completed_message(job.pid, status));
                        completed.push((job.pid, status));
                    }
                    None => running.push(job),
                },
                Err(Errno::ECHILD) => {
                    warn!("后台任务 {} 已不是子进程，移出任务表", &job);
                }
                Err(e) => {
                    error!("回收后台任务 {} 失败: {}", &job, e);
                    running.push(job);
                }
            }
        }

        self.jobs = running;
        completed
    }

    /// 阻塞直到所有后台任务都被回收
    pub fn wait_all(&mut self) -> Vec<(Pid, i32)> {
        let mut completed = Vec::new();
        for job in std::mem::take(&mut self.jobs) {
            match wait_for(job.pid) {
                Ok(status) => {
                    eprintln!("{}", completed_message(job.pid, status));
                    completed.push((job.pid, status));
                }
                Err(ShellError::Os {
                    source: Errno::ECHILD,
                    ..
                }) => warn!("后台任务 {} 已不是子进程", &job),
                Err(e) => error!("等待后台任务 {} 失败: {}", &job, e),
            }
        }
        completed
    }

    /// fork 出来的子进程不继承父进程的任务
    pub fn forget_all(&mut self) {
        self.jobs.clear();
    }
}
