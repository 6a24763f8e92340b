use thiserror::Error;

use super::ast::{Assignment, Node, RedirectOp, Redirection, SimpleCommand, Subshell};
use super::lexer::{Token, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unexpected token `{0}`")]
    UnexpectedToken(String),
    #[error("unexpected end of input")]
    UnexpectedEnd,
    #[error("expected filename after `{0}`")]
    MissingRedirectTarget(String),
    #[error("duplicate {0} redirection")]
    DuplicateRedirection(&'static str),
    #[error("missing command")]
    MissingCommand,
    #[error("unbalanced parenthesis")]
    UnbalancedParen,
    #[error("empty subshell")]
    EmptySubshell,
}

/// 解析完整的 token 序列；有剩余 token 也算错误，出错时不会返回半棵树
pub fn parse(tokens: &[Token]) -> Result<Node, ParseError> {
    Parser::new(tokens).parse_command()
}

// stage 上的本地变量与重定向
#[derive(Default)]
struct StageParts {
    locals: Vec<Assignment>,
    input: Option<Redirection>,
    output: Option<Redirection>,
}

impl StageParts {
    fn is_empty(&self) -> bool {
        self.locals.is_empty() && self.input.is_none() && self.output.is_none()
    }
}

pub struct Parser<'a> {
    tokens: &'a [Token],
    position: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Parser {
            tokens,
            position: 0,
        }
    }

    fn current_token(&self) -> Option<&'a Token> {
        self.tokens.get(self.position)
    }

    fn current_kind(&self) -> Option<TokenKind> {
        self.current_token().map(|token| token.kind)
    }

    fn next_token(&mut self) {
        self.position += 1;
    }

    // <command> = <list> / <list> ; / <list> &
    pub fn parse_command(&mut self) -> Result<Node, ParseError> {
        let node = self.parse_list()?;
        match self.current_token() {
            None => Ok(node),
            Some(token) if token.kind == TokenKind::RParen => Err(ParseError::UnbalancedParen),
            Some(token) => Err(ParseError::UnexpectedToken(token.text.clone())),
        }
    }

    // <list> = <and-or> / <and-or> ; <list> / <and-or> & <list>
    fn parse_list(&mut self) -> Result<Node, ParseError> {
        let left = Box::new(self.parse_and_or()?);

        let kind = match self.current_kind() {
            Some(kind @ (TokenKind::Seq | TokenKind::Background)) => kind,
            _ => return Ok(*left),
        };
        self.next_token();

        // 结尾的 ; 或 & 没有右子树
        let right = match self.current_kind() {
            None | Some(TokenKind::RParen) => None,
            Some(_) => Some(Box::new(self.parse_list()?)),
        };

        Ok(if kind == TokenKind::Seq {
            Node::Seq(left, right)
        } else {
            Node::Background(left, right)
        })
    }

    // <and-or> = <pipeline> / <pipeline> && <and-or> / <pipeline> || <and-or>
    fn parse_and_or(&mut self) -> Result<Node, ParseError> {
        let left = self.parse_pipeline()?;

        match self.current_kind() {
            Some(TokenKind::And) => {
                self.next_token();
                let right = self.parse_and_or()?;
                Ok(Node::And(Box::new(left), Box::new(right)))
            }
            Some(TokenKind::Or) => {
                self.next_token();
                let right = self.parse_and_or()?;
                Ok(Node::Or(Box::new(left), Box::new(right)))
            }
            _ => Ok(left),
        }
    }

    // <pipeline> = <stage> / <stage> | <pipeline>
    fn parse_pipeline(&mut self) -> Result<Node, ParseError> {
        let left = self.parse_stage()?;

        if self.current_kind() == Some(TokenKind::Pipe) {
            self.next_token();
            let right = self.parse_pipeline()?;
            return Ok(Node::Pipe(Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    // <stage> = <simple> / (<command>)，前面可以有赋值与重定向
    fn parse_stage(&mut self) -> Result<Node, ParseError> {
        let mut parts = StageParts::default();

        loop {
            match self.current_token() {
                Some(token) if token.kind == TokenKind::Word => {
                    match parse_assignment(&token.text) {
                        Some(assignment) => {
                            parts.locals.push(assignment);
                            self.next_token();
                        }
                        None => break,
                    }
                }
                Some(token) if is_redirection(token.kind) => self.parse_redirection(&mut parts)?,
                _ => break,
            }
        }

        match self.current_token() {
            Some(token) if token.kind == TokenKind::Word => self.parse_simple_command(parts),
            Some(token) if token.kind == TokenKind::LParen => self.parse_subshell(parts),
            _ if !parts.is_empty() => Err(ParseError::MissingCommand),
            Some(token) if token.kind == TokenKind::RParen => Err(ParseError::UnbalancedParen),
            Some(token) => Err(ParseError::UnexpectedToken(token.text.clone())),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn parse_simple_command(&mut self, mut parts: StageParts) -> Result<Node, ParseError> {
        // 解析命令名
        let program = match self.current_token() {
            Some(token) if token.kind == TokenKind::Word => token.text.clone(),
            _ => return Err(ParseError::MissingCommand),
        };
        self.next_token();
        let mut command = SimpleCommand::new(program);

        // 解析参数和重定向
        loop {
            match self.current_token() {
                Some(token) if token.kind == TokenKind::Word => {
                    command.arguments.push(token.text.clone());
                    self.next_token();
                }
                Some(token) if is_redirection(token.kind) => self.parse_redirection(&mut parts)?,
                _ => break,
            }
        }

        command.locals = parts.locals;
        command.input = parts.input;
        command.output = parts.output;
        Ok(Node::Simple(command))
    }

    fn parse_subshell(&mut self, mut parts: StageParts) -> Result<Node, ParseError> {
        self.next_token(); // 跳过 (
        if self.current_kind() == Some(TokenKind::RParen) {
            return Err(ParseError::EmptySubshell);
        }

        let body = self.parse_list()?;
        match self.current_token() {
            Some(token) if token.kind == TokenKind::RParen => self.next_token(),
            Some(token) => return Err(ParseError::UnexpectedToken(token.text.clone())),
            None => return Err(ParseError::UnbalancedParen),
        }

        // ) 之后只允许重定向
        loop {
            match self.current_token() {
                Some(token) if is_redirection(token.kind) => self.parse_redirection(&mut parts)?,
                Some(token) if token.kind == TokenKind::Word || token.kind == TokenKind::LParen => {
                    return Err(ParseError::UnexpectedToken(token.text.clone()));
                }
                _ => break,
            }
        }

        Ok(Node::Subshell(Subshell {
            locals: parts.locals,
            body: Box::new(body),
            input: parts.input,
            output: parts.output,
        }))
    }

    fn parse_redirection(&mut self, parts: &mut StageParts) -> Result<(), ParseError> {
        let Some(op_token) = self.current_token() else {
            return Err(ParseError::UnexpectedEnd);
        };
        self.next_token(); // 跳过重定向操作符

        let filename = match self.current_token() {
            Some(token) if token.kind == TokenKind::Word => token.text.clone(),
            _ => return Err(ParseError::MissingRedirectTarget(op_token.text.clone())),
        };
        self.next_token();

        let (operator, slot, which) = match op_token.kind {
            TokenKind::RedirIn => (RedirectOp::Input, &mut parts.input, "input"),
            TokenKind::RedirOut => (RedirectOp::Output, &mut parts.output, "output"),
            TokenKind::RedirAppend => (RedirectOp::Append, &mut parts.output, "output"),
            _ => return Err(ParseError::UnexpectedToken(op_token.text.clone())),
        };
        if slot.is_some() {
            return Err(ParseError::DuplicateRedirection(which));
        }
        *slot = Some(Redirection { operator, filename });
        Ok(())
    }
}

fn is_redirection(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::RedirIn | TokenKind::RedirOut | TokenKind::RedirAppend
    )
}

/// `NAME=value`，NAME 由字母、数字和下划线组成且不以数字开头
fn parse_assignment(word: &str) -> Option<Assignment> {
    let (name, value) = word.split_once('=')?;
    let mut chars = name.chars();
    let first = chars.next()?;
    if !(first.is_ascii_alphabetic() || first == '_')
        || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return None;
    }
    Some(Assignment {
        name: name.to_string(),
        value: value.to_string(),
    })
}
