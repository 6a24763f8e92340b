use dotenv::dotenv;
use rustyline::EditMode;
use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;

pub struct Config {
    pub name: String,
    pub config_dir: PathBuf,
    pub theme: String,
    pub history_file: PathBuf,
    pub editor_mode: String,
    pub logger_level: String,
    pub logger_dir: PathBuf,
    /// 解析前打印 token 列表
    pub dump_list: bool,
}

impl Config {
    fn get_config_dir(home: Option<String>) -> PathBuf {
        match home {
            Some(home) => PathBuf::from(home).join(".config/bsh"),
            None => PathBuf::from("tmp"),
        }
    }

    fn default(home: Option<String>) -> Self {
        let config_dir = Self::get_config_dir(home);
        Config {
            name: String::from(env!("CARGO_PKG_NAME")),
            theme: String::from("default"),
            history_file: config_dir.join(".bsh_history"),
            editor_mode: String::from("emacs"),
            logger_level: String::from("warn"),
            logger_dir: config_dir.join("logs"),
            dump_list: false,
            config_dir,
        }
    }

    /// 按 key 查询配置项，方便在不改动进程环境的情况下测试
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        // 默认配置
        let mut config = Config::default(lookup("HOME"));

        if let Some(theme) = lookup("BSH_THEME") {
            config.theme = theme;
        }

        if let Some(editor) = lookup("BSH_EDITOR") {
            config.editor_mode = editor;
        }

        if let Some(history) = lookup("BSH_HISTORY") {
            config.history_file = PathBuf::from(history);
        }

        if let Some(level) = lookup("BSH_LOG_LEVEL") {
            config.logger_level = level;
        }

        if let Some(dir) = lookup("BSH_LOG_DIR") {
            config.logger_dir = PathBuf::from(dir);
        }

        config.dump_list = lookup("DUMP_LIST").is_some();
        config
    }

    pub fn new() -> io::Result<Self> {
        // 优先加载环境变量
        if cfg!(debug_assertions) {
            dotenv::from_filename(".env.development").ok();
        } else {
            dotenv().ok();
        }

        // 从环境变量加载配置
        let config = Self::from_lookup(|key| env::var(key).ok());

        // 确保历史文件目录存在
        if let Some(parent) = config.history_file.parent() {
            fs::create_dir_all(parent)?;
        }

        Ok(config)
    }

    pub fn get_edit_mode(&self) -> EditMode {
        match self.editor_mode.to_lowercase().as_str() {
            "vi" => EditMode::Vi,
            _ => EditMode::Emacs,
        }
    }
}
