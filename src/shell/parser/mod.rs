pub mod ast;
mod lexer;
#[allow(clippy::module_inception)]
mod parser;

pub use lexer::{lex, Token, TokenKind};
pub use parser::{parse, ParseError};
