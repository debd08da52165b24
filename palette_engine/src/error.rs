// Error taxonomy for palette resolution.
//
// Two levels:
// - `ResolveError` is raised by the individual stages (inversion lookup, chord
//   resolution, ornament expansion, envelope quantization). Stages don't know
//   which slot they're working on.
// - `PaletteError` is what callers of `pipeline::resolve_palette` see. It wraps
//   a `ResolveError` with the slot (or ornament chord) index that failed, or
//   carries an I/O / JSON failure from the loader.
//
// Every `ResolveError` is either a configuration problem (the palette is
// malformed) or a precondition violation (the caller asked for something the
// engine must never produce, e.g. a zero-length envelope segment). Nothing is
// retried or silently corrected: the first error aborts the pass.

use thiserror::Error;

/// Broad classification of a [`ResolveError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or out-of-range palette parameters.
    Configuration,
    /// A contract breach inside the engine's callers.
    Precondition,
}

/// Failure of a single resolution stage.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    #[error("invalid {parameter}: {message}")]
    Configuration {
        parameter: &'static str,
        message: String,
    },
    #[error("inversion index {index} out of range (table has {rows} rows)")]
    InversionOutOfRange { index: usize, rows: usize },
    #[error("inversion row has {available} intervals, density {density} needs {needed}")]
    InversionTooShort {
        density: u8,
        needed: usize,
        available: usize,
    },
    #[error("ornament {number} does not exist (palette defines {available})")]
    UnknownOrnament { number: usize, available: usize },
    #[error("ornament {number} has an empty value sequence")]
    EmptyOrnament { number: usize },
    #[error("ornament {number} references basic chord {value} (table has {available})")]
    OrnamentValueOutOfRange {
        number: usize,
        value: usize,
        available: usize,
    },
    #[error(
        "ornament {number} has {count} sub-events of at least {min_ms}ms, which cannot fit in {duration_ms}ms"
    )]
    OrnamentTooLong {
        number: usize,
        count: usize,
        min_ms: u32,
        duration_ms: u32,
    },
    #[error("ornament {number} selected but the palette has no ornament settings")]
    MissingOrnamentTable { number: usize },
    #[error("precondition violated: {0}")]
    Precondition(String),
}

impl ResolveError {
    /// Shorthand for a configuration error on a named parameter.
    pub fn config(parameter: &'static str, message: impl Into<String>) -> Self {
        ResolveError::Configuration {
            parameter,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ResolveError::Precondition(_) => ErrorKind::Precondition,
            _ => ErrorKind::Configuration,
        }
    }
}

/// Failure to load or resolve a whole palette.
#[derive(Debug, Error)]
pub enum PaletteError {
    #[error("slot {slot}: {source}")]
    Slot { slot: usize, source: ResolveError },
    #[error("ornament basic chord {index}: {source}")]
    OrnamentChord { index: usize, source: ResolveError },
    #[error("failed to read palette: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse palette: {0}")]
    Json(#[from] serde_json::Error),
}

impl PaletteError {
    /// The underlying stage error, if this failure came from resolution.
    pub fn resolve_error(&self) -> Option<&ResolveError> {
        match self {
            PaletteError::Slot { source, .. } | PaletteError::OrnamentChord { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }

    /// Index of the failing slot, if any.
    pub fn slot(&self) -> Option<usize> {
        match self {
            PaletteError::Slot { slot, .. } => Some(*slot),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            ResolveError::config("duration", "must be positive").kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            ResolveError::InversionOutOfRange { index: 4, rows: 2 }.kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            ResolveError::Precondition("zero-length segment".into()).kind(),
            ErrorKind::Precondition
        );
    }

    #[test]
    fn test_slot_context_in_message() {
        let err = PaletteError::Slot {
            slot: 3,
            source: ResolveError::config("root pitch", "200 exceeds 127"),
        };
        assert_eq!(err.to_string(), "slot 3: invalid root pitch: 200 exceeds 127");
        assert_eq!(err.slot(), Some(3));
        assert!(err.resolve_error().is_some());
    }
}
