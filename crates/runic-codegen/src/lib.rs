//! Code generation: lowers a parsed spellbook to standalone Rust source
//! whose runtime behaviour mirrors the interpreter.
//!
//! The flat rule lists become trees, sibling equality tests coalesce
//! into switches, and each page is emitted once per endian variant the
//! book can actually reach. Output is deterministic: generating from
//! the same book twice gives byte-identical source.

mod emit;
mod expr;
mod tree;
mod usage;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub use emit::{compile, generate, CodegenOptions};
pub use usage::{compute_usage, PageUsage};

#[derive(Debug, Error)]
pub enum CodegenError {
    /// A `default` or `clear` rule with no parent to hold its marker.
    #[error("default or clear rule without an enclosing marker: {line}")]
    MissingDefaultMarker { line: String },

    #[error("failed to write generated code to {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type CodegenResult<T> = std::result::Result<T, CodegenError>;
