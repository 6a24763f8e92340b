use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TokenKind {
    Word,
    RedirIn,     // <
    RedirOut,    // >
    RedirAppend, // >>
    Pipe,        // |
    And,         // &&
    Or,          // ||
    Seq,         // ;
    Background,  // &
    LParen,      // (
    RParen,      // )
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::Word => "word",
            TokenKind::RedirIn => "<",
            TokenKind::RedirOut => ">",
            TokenKind::RedirAppend => ">>",
            TokenKind::Pipe => "|",
            TokenKind::And => "&&",
            TokenKind::Or => "||",
            TokenKind::Seq => ";",
            TokenKind::Background => "&",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
        };
        f.write_str(name)
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Token {
    pub text: String,
    pub kind: TokenKind,
}

impl Token {
    pub fn new(text: impl Into<String>, kind: TokenKind) -> Self {
        Self {
            text: text.into(),
            kind,
        }
    }

    pub fn word(text: impl Into<String>) -> Self {
        Self::new(text, TokenKind::Word)
    }
}

const METACHARS: &str = "<>;&|()";

/// 把一行输入切分为 token 序列，空行得到空序列
pub fn lex(line: &str) -> Vec<Token> {
    let mut lexer = Lexer::new(line);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token() {
        tokens.push(token);
    }
    tokens
}

pub struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.chars().peekable(),
        }
    }

    pub fn next_token(&mut self) -> Option<Token> {
        self.skip_whitespace();

        let c = self.peek_char()?;
        let token = match c {
            '|' => self.read_operator('|', TokenKind::Pipe, TokenKind::Or),
            '&' => self.read_operator('&', TokenKind::Background, TokenKind::And),
            '>' => self.read_operator('>', TokenKind::RedirOut, TokenKind::RedirAppend),
            '<' => self.read_single(TokenKind::RedirIn),
            ';' => self.read_single(TokenKind::Seq),
            '(' => self.read_single(TokenKind::LParen),
            ')' => self.read_single(TokenKind::RParen),
            _ => self.read_word(),
        };
        Some(token)
    }

    fn read_char(&mut self) -> Option<char> {
        self.input.next()
    }

    fn peek_char(&mut self) -> Option<char> {
        self.input.peek().copied()
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if !c.is_whitespace() {
                break;
            }
            self.read_char();
        }
    }

    fn read_single(&mut self, kind: TokenKind) -> Token {
        let mut text = String::new();
        text.extend(self.read_char());
        Token::new(text, kind)
    }

    // 读取可以重复一次的运算符，如 | 与 ||、> 与 >>
    fn read_operator(&mut self, c: char, single: TokenKind, double: TokenKind) -> Token {
        self.read_char();
        if self.peek_char() == Some(c) {
            self.read_char();
            Token::new(format!("{c}{c}"), double)
        } else {
            Token::new(c.to_string(), single)
        }
    }

    fn read_word(&mut self) -> Token {
        let mut word = String::new();

        while let Some(c) = self.peek_char() {
            if c.is_whitespace() || METACHARS.contains(c) {
                break;
            }
            if c == '"' || c == '\'' {
                self.read_quoted_into(&mut word);
                continue;
            }
            word.extend(self.read_char());
        }

        Token::word(word)
    }

    // 引号内的内容原样并入当前单词，反斜杠转义下一个字符
    fn read_quoted_into(&mut self, word: &mut String) {
        let quote = self.read_char();
        let mut escaped = false;

        while let Some(c) = self.read_char() {
            match (escaped, c) {
                (true, _) => {
                    word.push(c);
                    escaped = false;
                }
                (false, '\\') => escaped = true,
                (false, c) if Some(c) == quote => break,
                (false, c) => word.push(c),
            }
        }
    }
}
