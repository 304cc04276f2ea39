//! Error handling.

use std::error::Error;
use thiserror::Error;

/// Enum with all errors in this crate.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CogError {
    /// The first two bytes of the stream were neither `II` nor `MM`.
    #[error("bad magic bytes: {0:?}")]
    BadMagic([u8; 2]),

    /// The TIFF version field was not `42`.
    ///
    /// BigTIFF's `43` is a valid TIFF version but is explicitly unsupported.
    #[error("unsupported TIFF version {0}, only classic TIFF (42) is supported")]
    UnsupportedVersion(u16),

    /// The byte order mark was `MM` (big-endian); only little-endian is supported.
    #[error("unsupported byte order: only little-endian (II) TIFFs are supported")]
    UnsupportedByteOrder,

    /// A read was requested fully or partially beyond the end of the source.
    #[error("offset {0} is out of range of the source")]
    OffsetOutOfRange(u64),

    /// The backing store returned fewer bytes than requested.
    #[error("short read at offset {offset}: wanted {want} bytes, got {got}")]
    ShortRead { offset: u64, want: u64, got: u64 },

    /// The backing store failed to service a range request.
    #[error("transport error: {0}")]
    TransportError(Box<dyn Error + Send + Sync>),

    /// A required tag was absent (or malformed) on an image.
    #[error("missing required tag: {0}")]
    MissingTag(&'static str),

    /// `get_image`/`get_tile_raw` was called with an overview index that does not exist.
    #[error("no such overview: {0}")]
    NoSuchOverview(usize),

    /// A tile was requested from an image that has no tile layout (strip-based TIFF).
    #[error("image is not tiled")]
    NotTiled,

    /// A tile was requested outside of the image's tile grid.
    #[error("tile ({x}, {y}) is out of range")]
    TileOutOfRange { x: u32, y: u32 },

    /// End of file error, raised by a [`crate::reader::AsyncFileReader`] implementation.
    #[error("End of File: expected to read {0} bytes, got {1}")]
    EndOfFile(usize, usize),

    /// I/O error.
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Error while fetching data using object store.
    #[cfg(feature = "object_store")]
    #[error(transparent)]
    ObjectStore(#[from] object_store::Error),

    /// Reqwest error
    #[cfg(feature = "reqwest")]
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    /// Catch-all for conditions not otherwise represented above.
    #[error("{0}")]
    General(String),

    /// External error
    #[error(transparent)]
    External(Box<dyn std::error::Error + Send + Sync>),
}

impl CogError {
    /// Wrap an arbitrary backing-store failure as a [`CogError::TransportError`].
    pub fn transport(err: impl Error + Send + Sync + 'static) -> Self {
        Self::TransportError(Box::new(err))
    }
}

/// Crate-specific result type.
pub type CogResult<T> = std::result::Result<T, CogError>;
