use colored::Colorize;
use std::collections::HashMap;

type Style = Box<dyn Fn(String) -> String>;

pub struct Theme {
    messages: HashMap<&'static str, &'static str>,
    pub prompt_style: Style,
    pub success_style: Style,
    pub error_style: Style,
    pub warning_style: Style,
}

const DEFAULT_MESSAGES: [(&str, &str); 9] = [
    ("welcome", "欢迎使用 bsh"),
    ("help", "输入 exit 或按 Ctrl-D 退出"),
    ("exit", "再见"),
    ("eof_signal", "收到 EOF，退出 bsh"),
    ("interrupt_signal", "输入 exit 或按 Ctrl-D 退出"),
    ("error", "错误"),
    ("prompt", "$ "),
    ("success_symbol", "✓"),
    ("error_symbol", "✗"),
];

impl Default for Theme {
    fn default() -> Self {
        Theme {
            messages: DEFAULT_MESSAGES.into_iter().collect(),
            prompt_style: Box::new(|s| s.bright_cyan().to_string()),
            success_style: Box::new(|s| s.bright_magenta().to_string()),
            error_style: Box::new(|s| s.bright_red().to_string()),
            warning_style: Box::new(|s| s.yellow().to_string()),
        }
    }
}

impl Theme {
    pub fn load_theme(theme_name: &str) -> Theme {
        match theme_name {
            "dark" => {
                let mut theme = Theme {
                    prompt_style: Box::new(|s| s.bright_purple().to_string()),
                    success_style: Box::new(|s| s.magenta().to_string()),
                    error_style: Box::new(|s| s.red().to_string()),
                    warning_style: Box::new(|s| s.bright_blue().to_string()),
                    ..Theme::default()
                };
                theme.messages.insert("prompt", "➤ ");
                theme.messages.insert("welcome", "欢迎使用 bsh (dark)");
                theme
            }
            _ => Theme::default(),
        }
    }

    /// 找不到对应文案时直接返回 key
    pub fn get_message(&self, key: &str) -> String {
        self.messages.get(key).copied().unwrap_or(key).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_theme_falls_back_to_default() {
        let theme = Theme::load_theme("no-such-theme");
        assert_eq!(theme.get_message("prompt"), "$ ");
        assert_eq!(theme.get_message("welcome"), "欢迎使用 bsh");
    }

    #[test]
    fn test_dark_theme_overrides_some_messages() {
        let theme = Theme::load_theme("dark");
        assert_eq!(theme.get_message("prompt"), "➤ ");
        assert_eq!(theme.get_message("welcome"), "欢迎使用 bsh (dark)");
        assert_eq!(theme.get_message("exit"), "再见");
        assert_eq!(theme.get_message("error_symbol"), "✗");
        assert_eq!(theme.get_message("missing"), "missing");
    }

    #[test]
    fn test_styles_keep_text() {
        colored::control::set_override(false);
        let theme = Theme::default();
        assert_eq!((theme.error_style)("boom".to_string()), "boom");
    }
}
