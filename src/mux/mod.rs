//! Containers for coded frames.
//!
//! The encoder hands every finished frame payload to a [`ContainerWriter`]
//! and never looks at the framing itself. Two writers are provided:
//!
//! - **IVF** ([`IvfWriter`], [`IvfReader`]): the usual file container for
//!   raw VP8 streams.
//! - **Memory** ([`MemoryWriter`]): keeps the payloads in a `Vec`, for tests
//!   and for callers that do their own framing.

mod error;
mod ivf;

pub use error::MuxError;
pub use ivf::{IvfFrame, IvfReader, IvfWriter};

/// Destination of coded frames.
pub trait ContainerWriter {
    /// Display width of the stream.
    fn width(&self) -> u16;

    /// Display height of the stream.
    fn height(&self) -> u16;

    /// Appends one frame payload.
    fn write_frame(&mut self, payload: &[u8]) -> Result<(), MuxError>;
}

impl<C: ContainerWriter + ?Sized> ContainerWriter for &mut C {
    fn width(&self) -> u16 {
        (**self).width()
    }

    fn height(&self) -> u16 {
        (**self).height()
    }

    fn write_frame(&mut self, payload: &[u8]) -> Result<(), MuxError> {
        (**self).write_frame(payload)
    }
}

/// Collects frame payloads in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryWriter {
    width: u16,
    height: u16,
    frames: Vec<Vec<u8>>,
}

impl MemoryWriter {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            frames: Vec::new(),
        }
    }

    pub fn frames(&self) -> &[Vec<u8>] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<Vec<u8>> {
        self.frames
    }
}

impl ContainerWriter for MemoryWriter {
    fn width(&self) -> u16 {
        self.width
    }

    fn height(&self) -> u16 {
        self.height
    }

    fn write_frame(&mut self, payload: &[u8]) -> Result<(), MuxError> {
        self.frames.push(payload.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_writer_keeps_payloads_in_order() {
        fn push<C: ContainerWriter>(mut sink: C, payload: &[u8]) -> (u16, u16) {
            sink.write_frame(payload).unwrap();
            (sink.width(), sink.height())
        }

        let mut writer = MemoryWriter::new(32, 16);
        assert_eq!(push(&mut writer, &[1]), (32, 16));
        writer.write_frame(&[2, 3]).unwrap();
        assert_eq!(writer.frames(), &[vec![1], vec![2, 3]]);
        assert_eq!(writer.into_frames().len(), 2);
    }
}
