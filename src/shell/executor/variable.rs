use std::collections::HashMap;
use std::env;

/// 保存上一条命令退出状态的变量名
pub const STATUS_VAR: &str = "?";

/// Shell 可见的变量表：启动时的环境变量快照，加上 `?` 这类 shell 自己维护的值
#[derive(Debug, Clone, Default)]
pub struct Variable {
    vars: HashMap<String, String>,
}

impl Variable {
    pub fn new() -> Self {
        Self {
            vars: HashMap::new(),
        }
    }

    pub fn from_process() -> Self {
        let mut variable = Self::new();
        variable.vars.extend(env::vars());
        variable.set_status(0);
        variable
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn set_status(&mut self, status: i32) {
        self.set(STATUS_VAR, status.to_string());
    }

    pub fn status(&self) -> i32 {
        self.get(STATUS_VAR)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }
}
