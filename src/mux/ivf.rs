//! IVF container.
//!
//! A 32-byte file header (`DKIF`, version 0, fourcc `VP80`, dimensions,
//! time base and frame count) followed by frames, each a 12-byte header
//! (payload size and 64-bit timestamp) and the payload.
//!
//! # Example
//!
//! ```rust
//! use zenvp8::mux::{ContainerWriter, IvfReader, IvfWriter};
//!
//! let mut writer = IvfWriter::new(Vec::new(), 64, 48, (30, 1))?;
//! writer.write_frame(&[1, 2, 3])?;
//! let bytes = writer.into_inner();
//!
//! let mut reader = IvfReader::new(bytes.as_slice())?;
//! assert_eq!((reader.width(), reader.height()), (64, 48));
//! assert_eq!(reader.next_frame()?.unwrap().data, vec![1, 2, 3]);
//! assert!(reader.next_frame()?.is_none());
//! # Ok::<(), zenvp8::mux::MuxError>(())
//! ```

use std::io::{Read, Seek, SeekFrom, Write};

use byteorder_lite::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::error::MuxError;
use super::ContainerWriter;

const SIGNATURE: [u8; 4] = *b"DKIF";
const FOURCC: [u8; 4] = *b"VP80";
const HEADER_SIZE: u16 = 32;
const FRAME_HEADER_SIZE: usize = 12;
/// Byte offset of the frame count in the file header.
const FRAME_COUNT_OFFSET: u64 = 24;

/// Writes VP8 frames into an IVF stream.
///
/// The file header is written by [`IvfWriter::new`]. The frame count field
/// is only correct after [`IvfWriter::finish`], which needs a seekable sink.
#[derive(Debug)]
pub struct IvfWriter<W: Write> {
    inner: W,
    width: u16,
    height: u16,
    frame_count: u32,
}

impl<W: Write> IvfWriter<W> {
    /// Writes the file header. `frame_rate` is `(numerator, denominator)`;
    /// timestamps count frames.
    pub fn new(mut inner: W, width: u16, height: u16, frame_rate: (u32, u32)) -> Result<Self, MuxError> {
        inner.write_all(&SIGNATURE)?;
        inner.write_u16::<LittleEndian>(0)?;
        inner.write_u16::<LittleEndian>(HEADER_SIZE)?;
        inner.write_all(&FOURCC)?;
        inner.write_u16::<LittleEndian>(width)?;
        inner.write_u16::<LittleEndian>(height)?;
        inner.write_u32::<LittleEndian>(frame_rate.0)?;
        inner.write_u32::<LittleEndian>(frame_rate.1)?;
        inner.write_u32::<LittleEndian>(0)?;
        inner.write_u32::<LittleEndian>(0)?;
        Ok(Self {
            inner,
            width,
            height,
            frame_count: 0,
        })
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Returns the sink without patching the frame count.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Seek> IvfWriter<W> {
    /// Patches the frame count into the file header and returns the sink.
    pub fn finish(mut self) -> Result<W, MuxError> {
        let end = self.inner.stream_position()?;
        self.inner.seek(SeekFrom::Start(FRAME_COUNT_OFFSET))?;
        self.inner.write_u32::<LittleEndian>(self.frame_count)?;
        self.inner.seek(SeekFrom::Start(end))?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> ContainerWriter for IvfWriter<W> {
    fn width(&self) -> u16 {
        self.width
    }

    fn height(&self) -> u16 {
        self.height
    }

    fn write_frame(&mut self, payload: &[u8]) -> Result<(), MuxError> {
        let size = u32::try_from(payload.len()).map_err(|_| MuxError::FrameTooLarge(payload.len()))?;
        self.inner.write_u32::<LittleEndian>(size)?;
        self.inner.write_u64::<LittleEndian>(u64::from(self.frame_count))?;
        self.inner.write_all(payload)?;
        self.frame_count += 1;
        Ok(())
    }
}

/// One frame read back from an IVF stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IvfFrame {
    pub pts: u64,
    pub data: Vec<u8>,
}

/// Reads frames from an IVF stream.
#[derive(Debug)]
pub struct IvfReader<R: Read> {
    inner: R,
    width: u16,
    height: u16,
    frame_rate: (u32, u32),
    frame_count: u32,
}

impl<R: Read> IvfReader<R> {
    /// Parses the file header.
    pub fn new(mut inner: R) -> Result<Self, MuxError> {
        let mut header = [0u8; HEADER_SIZE as usize];
        if read_full(&mut inner, &mut header)? < header.len() {
            return Err(MuxError::Truncated);
        }
        if header[..4] != SIGNATURE {
            return Err(MuxError::InvalidSignature);
        }
        let mut fields = &header[4..];
        let _version = fields.read_u16::<LittleEndian>()?;
        let header_size = fields.read_u16::<LittleEndian>()?;
        let mut fourcc = [0u8; 4];
        fields.read_exact(&mut fourcc)?;
        if fourcc != FOURCC {
            return Err(MuxError::UnsupportedCodec(fourcc));
        }
        let width = fields.read_u16::<LittleEndian>()?;
        let height = fields.read_u16::<LittleEndian>()?;
        let rate = fields.read_u32::<LittleEndian>()?;
        let scale = fields.read_u32::<LittleEndian>()?;
        let frame_count = fields.read_u32::<LittleEndian>()?;

        // Longer headers carry fields this reader does not use.
        let extra = usize::from(header_size.saturating_sub(HEADER_SIZE));
        if extra > 0 {
            let mut skipped = vec![0u8; extra];
            if read_full(&mut inner, &mut skipped)? < extra {
                return Err(MuxError::Truncated);
            }
        }

        Ok(Self {
            inner,
            width,
            height,
            frame_rate: (rate, scale),
            frame_count,
        })
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn frame_rate(&self) -> (u32, u32) {
        self.frame_rate
    }

    /// Frame count from the file header; zero if the writer never patched it.
    pub fn declared_frame_count(&self) -> u32 {
        self.frame_count
    }

    /// The next frame, or `None` at a clean end of stream.
    pub fn next_frame(&mut self) -> Result<Option<IvfFrame>, MuxError> {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        match read_full(&mut self.inner, &mut header)? {
            0 => return Ok(None),
            FRAME_HEADER_SIZE => {}
            _ => return Err(MuxError::Truncated),
        }
        let mut fields = &header[..];
        let size = fields.read_u32::<LittleEndian>()? as usize;
        let pts = fields.read_u64::<LittleEndian>()?;
        let mut data = vec![0u8; size];
        if read_full(&mut self.inner, &mut data)? < size {
            return Err(MuxError::Truncated);
        }
        Ok(Some(IvfFrame { pts, data }))
    }
}

/// Reads until `buf` is full or the stream ends; returns the bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, MuxError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn header_layout() {
        let writer = IvfWriter::new(Vec::new(), 320, 240, (25, 1)).unwrap();
        let bytes = writer.into_inner();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[..4], b"DKIF");
        assert_eq!(&bytes[8..12], b"VP80");
        assert_eq!(u16::from_le_bytes([bytes[12], bytes[13]]), 320);
        assert_eq!(u16::from_le_bytes([bytes[14], bytes[15]]), 240);
        assert_eq!(u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]), 25);
    }

    #[test]
    fn finish_patches_frame_count() {
        let mut writer = IvfWriter::new(Cursor::new(Vec::new()), 16, 16, (30, 1)).unwrap();
        writer.write_frame(&[9; 5]).unwrap();
        writer.write_frame(&[]).unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        assert_eq!(bytes.len(), 32 + 2 * 12 + 5);

        let mut reader = IvfReader::new(bytes.as_slice()).unwrap();
        assert_eq!(reader.declared_frame_count(), 2);
        assert_eq!(reader.frame_rate(), (30, 1));
        let first = reader.next_frame().unwrap().unwrap();
        assert_eq!((first.pts, first.data), (0, vec![9; 5]));
        let second = reader.next_frame().unwrap().unwrap();
        assert_eq!((second.pts, second.data.len()), (1, 0));
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn rejects_foreign_and_truncated_data() {
        assert!(matches!(
            IvfReader::new(&b"RIFF0000WEBPVP8 "[..]),
            Err(MuxError::Truncated)
        ));
        let mut bytes = IvfWriter::new(Vec::new(), 16, 16, (30, 1)).unwrap().into_inner();
        let mut foreign = bytes.clone();
        foreign[..4].copy_from_slice(b"RIFF");
        assert!(matches!(
            IvfReader::new(foreign.as_slice()),
            Err(MuxError::InvalidSignature)
        ));
        let mut vp9 = bytes.clone();
        vp9[8..12].copy_from_slice(b"VP90");
        assert!(matches!(
            IvfReader::new(vp9.as_slice()),
            Err(MuxError::UnsupportedCodec(fourcc)) if &fourcc == b"VP90"
        ));

        bytes.extend_from_slice(&[10, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 2]);
        let mut reader = IvfReader::new(bytes.as_slice()).unwrap();
        assert!(matches!(reader.next_frame(), Err(MuxError::Truncated)));
    }
}
