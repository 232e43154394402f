//! Error types for code generation

use covenant_ast::SourceLocation;
use std::fmt;

/// Error type for code generation.
///
/// These are input-expressiveness failures: the contract is well-formed but
/// asks for something the code generator cannot emit yet. Compilation stops
/// and no bytecode is produced. Broken internal invariants (unplaced jump
/// targets, stack model asymmetry) are bugs and panic instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompilerError {
    /// A value whose wire encoding does not fit into a single word.
    UnsupportedType { location: SourceLocation, type_name: String },
    /// A stack slot beyond the reach of `SWAP16`/`DUP16`.
    StackTooDeep,
    /// The final assembly pass rejected the item stream.
    Assembly { message: String },
}

impl fmt::Display for CompilerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompilerError::UnsupportedType { location, type_name } => {
                write!(
                    f,
                    "type {} not yet supported (source bytes {}..{})",
                    type_name, location.start, location.end
                )
            }
            CompilerError::StackTooDeep => {
                write!(f, "stack too deep, try removing local variables")
            }
            CompilerError::Assembly { message } => write!(f, "assembly failed: {message}"),
        }
    }
}

impl std::error::Error for CompilerError {}

/// Result type for code generation operations.
pub type Result<T> = std::result::Result<T, CompilerError>;
