//! Error taxonomy for the raster data plane.
//!
//! Cancellation is not represented here: a canceled read yields
//! [`ReadOutcome::Canceled`](crate::source::ReadOutcome), and an RPC inverse
//! that hits its iteration cap reports
//! [`Convergence::BestEffort`](crate::coord::Convergence) instead of failing.

use thiserror::Error;

use crate::source::TileAddress;

/// Errors that can occur while reading, caching, or geolocating imagery.
#[derive(Debug, Error)]
pub enum RasterError {
    /// The dataset or frame could not be opened.
    #[error("Source unavailable: {uri} ({reason})")]
    SourceUnavailable { uri: String, reason: String },

    /// The transform cannot be inverted, so the dataset cannot be geolocated.
    #[error("Degenerate transform: {0}")]
    DegenerateTransform(String),

    /// The durable cache failed validation. Stores rebuild on this error
    /// rather than surfacing it.
    #[error("Cache corrupt: {0}")]
    CacheCorrupt(String),

    /// The tile address lies outside the source grid.
    #[error("Invalid tile address {0}")]
    InvalidTile(TileAddress),

    /// A read rectangle or destination size is empty or out of bounds.
    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    /// Catalog could not be loaded, saved, or queried.
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// I/O error from the durable store or a source file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decode failure.
    #[error("Decode error: {0}")]
    Decode(#[from] image::ImageError),
}

impl RasterError {
    /// Creates a [`RasterError::SourceUnavailable`].
    pub fn unavailable(uri: impl Into<String>, reason: impl ToString) -> Self {
        Self::SourceUnavailable {
            uri: uri.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this failure is scoped to a single frame and should be skipped
    /// rather than reported to the caller.
    pub fn is_frame_scoped(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable { .. } | Self::Decode(_) | Self::DegenerateTransform(_)
        )
    }
}
