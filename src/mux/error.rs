//! Error types for container reading and writing.

use thiserror::Error;

/// Errors that can occur while reading or writing a container.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MuxError {
    /// The data does not start with an IVF signature.
    #[error("Invalid IVF signature")]
    InvalidSignature,

    /// The container holds a codec other than VP8.
    #[error("Unsupported codec: {0:?}")]
    UnsupportedCodec([u8; 4]),

    /// The data ended inside a header or frame.
    #[error("Truncated container")]
    Truncated,

    /// A frame payload does not fit the 32-bit size field.
    #[error("Frame of {0} bytes is too large")]
    FrameTooLarge(usize),

    /// An IO error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
