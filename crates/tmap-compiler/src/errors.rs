// errors.rs -- the fatal tier of compile failures
//
// A half-built tile is not a meaningful artifact, so any of these
// aborts the whole compile. Warnings (mixed contents, microbrushes,
// dropped slivers) are logged and never reach this type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    /// A fixed-capacity table filled up. Raise the limit and recompile.
    #[error("{table} overflow ({value} >= {limit})")]
    TableOverflow {
        table: &'static str,
        value: usize,
        limit: usize,
    },

    #[error("entity {entity}, brush {brush}: {reason}")]
    BadBrush {
        entity: usize,
        brush: usize,
        reason: String,
    },

    #[error("parse error at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("bad plane normal ({0:.3} {1:.3} {2:.3})")]
    BadNormal(f32, f32, f32),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CompileError>;

/// Bounds-checks a table counter against its compile limit.
pub fn check_limit(table: &'static str, value: usize, limit: usize) -> Result<()> {
    if value >= limit {
        return Err(CompileError::TableOverflow { table, value, limit });
    }
    Ok(())
}
