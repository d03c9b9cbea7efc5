//! Error taxonomy for startup validation and fatal invariant violations.
//!
//! Per-tick sensor problems are not errors: they degrade to the fallback
//! drive command inside [`crate::Pilot::tick`].

use thiserror::Error;

use crate::homography::HomographyError;

/// Errors surfaced by the control core.
#[derive(Debug, Error)]
pub enum PilotError {
    /// Rectification quads do not define an invertible perspective map.
    #[error("degenerate rectification geometry: {0}")]
    DegenerateGeometry(String),

    /// Homography estimation failed while building the rectifier.
    #[error("homography estimation failed: {0}")]
    Homography(#[from] HomographyError),

    /// A configuration value is out of its admissible range.
    #[error("invalid configuration: {field}: {reason}")]
    InvalidConfig {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Human-readable constraint that was violated.
        reason: String,
    },

    /// An evidence counter would exceed its integer range.
    ///
    /// Raised before any cell is written, so the map keeps its previous
    /// state. The tick that hits it issues no new command.
    #[error("evidence counter overflow at cell ({ix}, {iy}) in {channel} channel")]
    EvidenceOverflow {
        /// Grid column.
        ix: usize,
        /// Grid row.
        iy: usize,
        /// Channel name.
        channel: &'static str,
    },

    /// Reading a configuration file failed.
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing a configuration file failed.
    #[error("config parse: {0}")]
    Json(#[from] serde_json::Error),
}

impl PilotError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }
}
