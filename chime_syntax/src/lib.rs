//! The Chime syntax crate: source management, lexing, parsing, the AST
//! data model and the memoized tree walker.

#[macro_use]
extern crate bitflags;

pub mod ast;
pub mod lexer;
pub mod parse;
pub mod source;
pub mod token;
pub mod walk;

pub use crate::source::SourceManager;
