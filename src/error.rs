//! Small error-handling helpers shared across modules. Everything here
//! rides on `anyhow`, plus one structured error the pipeline needs to
//! distinguish programmatically: linker label saturation.

use std::fmt;

/// The one error the driver needs to tell apart from the general "something
/// went wrong, abort" case.
#[derive(Debug)]
pub enum LinkerError {
    LabelOverflow { limit: i32 },
}

impl fmt::Display for LinkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkerError::LabelOverflow { limit } => write!(
                f,
                "too many sources for the 32-bit dynamic range of the mask (limit {limit})"
            ),
        }
    }
}

impl std::error::Error for LinkerError {}

/// Log a soft warning: continue execution, but make sure the operator
/// sees it.
pub fn soft_warn(message: impl fmt::Display) {
    tracing::warn!("{message}");
}
