//! docsql AST - SQL lexer, parser and translator
//!
//! SQL text is tokenized, parsed into an [`ast::Statement`] and translated
//! into a [`docsql_ir::TranslatedQuery`].

pub mod ast;
mod error;
mod lexer;
mod parser;
mod to_ir;

pub use ast::*;
pub use error::{CompileError, Position, SyntaxError, TranslationError};
pub use lexer::{tokenize, Keyword, Token, TokenKind};
pub use parser::parse;
pub use to_ir::{translate, Translator};

use docsql_ir::{Params, TranslatedQuery};

/// Parse and translate one statement.
pub fn compile(sql: &str, params: &Params) -> Result<TranslatedQuery, CompileError> {
    let statement = parse(sql)?;
    Ok(translate(&statement, params)?)
}
