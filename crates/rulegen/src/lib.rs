pub mod ast;
pub mod config;
pub mod context;
pub mod error;
pub mod lexer;
pub mod lower;
pub mod parser;
pub mod pool;
pub mod registry;
pub mod relations;
pub mod span;
pub mod token_table;

#[cfg(test)]
mod tests;

pub use config::Config;
pub use context::{compile, CompilationContext, CompileOutput, Phase};
pub use error::{CompileError, SyntaxError};
