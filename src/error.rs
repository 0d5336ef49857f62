//! Error taxonomy for the compiler (lexical / structural / semantic / io).
//!
//! All three source-facing kinds are fatal: the driver reports a one-line
//! message naming the kind and the offending token where known, then
//! exits nonzero. See [`crate::driver`] for how a partial output file is
//! cleaned up when compilation fails mid-stream.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    /// Unclassifiable token, unterminated string, or out-of-range integer.
    #[error("lexical error near line {line}: {message}")]
    Lexical { line: usize, message: String },

    /// Unexpected token, or a missing terminator, while parsing a grammar
    /// production.
    #[error("structural error near line {line}: expected {expected}, found {found:?}")]
    Structural {
        line: usize,
        expected: String,
        found: String,
    },

    /// An identifier used as an assignment target or rvalue could not be
    /// resolved in either scope.
    #[error("semantic error near line {line}: unresolved identifier '{name}'")]
    Semantic { line: usize, name: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CompileError>;
