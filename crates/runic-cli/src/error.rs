use std::path::PathBuf;

use miette::Diagnostic;
use runic_codegen::CodegenError;
use runic_rules::ParseError;
use thiserror::Error;

/// CLI-level error type wrapping the library errors with diagnostics.
#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error("failed to parse rules: {source}")]
    #[diagnostic(code(runic::cli::parse_error))]
    Parse {
        #[source]
        source: ParseError,
    },

    #[error("failed to read target {path:?}")]
    #[diagnostic(code(runic::cli::io_error))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("code generation failed: {source}")]
    #[diagnostic(code(runic::cli::codegen_error))]
    Codegen {
        #[source]
        source: CodegenError,
    },
}

impl From<ParseError> for CliError {
    fn from(source: ParseError) -> Self {
        CliError::Parse { source }
    }
}

impl From<CodegenError> for CliError {
    fn from(source: CodegenError) -> Self {
        CliError::Codegen { source }
    }
}
