//! Re-encoding a source against an existing encoding of it.
//!
//! The predecessor stream is decoded alongside. Its first picture is reached
//! with a switching frame coded against this encoder's current state; every
//! later frame keeps the predecessor's predictions and has its residues
//! recomputed from the source. Optionally the entropy tables are steered to
//! the predecessor's after every frame, so either stream's remaining frames
//! can follow.

use std::collections::VecDeque;
use std::io::Read;

use enough::Stop;

use super::api::{EncodeError, EncodeOutcome, Encoder};
use super::switching::fix_probability_tables;
use crate::decoder::{parse_frame, Decoder};
use crate::metrics::ssim;
use crate::mux::{ContainerWriter, IvfReader, MuxError};
use crate::raster::Raster;
use crate::state::DecoderState;

/// One source picture and the similarity it should be coded with.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFrame {
    pub raster: Raster,
    pub minimum_ssim: f64,
}

/// Supplies source pictures in display order.
pub trait FrameSource {
    fn next_frame(&mut self) -> Option<SourceFrame>;

    /// Restarts from the first picture. Returns false when the source cannot
    /// rewind.
    fn rewind(&mut self) -> bool {
        false
    }
}

/// Pictures held in memory.
#[derive(Debug, Clone, Default)]
pub struct VecFrameSource {
    frames: Vec<SourceFrame>,
    position: usize,
}

impl VecFrameSource {
    pub fn new(frames: Vec<SourceFrame>) -> Self {
        Self { frames, position: 0 }
    }

    /// Every raster with the same similarity target.
    pub fn from_rasters(rasters: impl IntoIterator<Item = Raster>, minimum_ssim: f64) -> Self {
        Self::new(
            rasters
                .into_iter()
                .map(|raster| SourceFrame { raster, minimum_ssim })
                .collect(),
        )
    }
}

impl FrameSource for VecFrameSource {
    fn next_frame(&mut self) -> Option<SourceFrame> {
        let frame = self.frames.get(self.position).cloned()?;
        self.position += 1;
        Some(frame)
    }

    fn rewind(&mut self) -> bool {
        self.position = 0;
        true
    }
}

/// Supplies the frame payloads of a predecessor stream.
pub trait PredecessorSource {
    /// The next payload, or `None` at the end of the stream.
    fn next_payload(&mut self) -> Result<Option<Vec<u8>>, MuxError>;
}

impl<R: Read> PredecessorSource for IvfReader<R> {
    fn next_payload(&mut self) -> Result<Option<Vec<u8>>, MuxError> {
        Ok(self.next_frame()?.map(|frame| frame.data))
    }
}

impl PredecessorSource for VecDeque<Vec<u8>> {
    fn next_payload(&mut self) -> Result<Option<Vec<u8>>, MuxError> {
        Ok(self.pop_front())
    }
}

/// Settings of [`Encoder::reencode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReencodeOptions {
    /// Quantizer index of the switching frame.
    pub quantizer: u8,
    /// Search modes for the switching frame instead of repeating the last
    /// reference with a residue.
    pub refine_switching: bool,
    /// Rewrite every frame's probability updates so this stream's tables
    /// follow the predecessor's.
    pub fix_probability_tables: bool,
}

impl Default for ReencodeOptions {
    fn default() -> Self {
        Self {
            quantizer: 32,
            refine_switching: true,
            fix_probability_tables: true,
        }
    }
}

impl<W: ContainerWriter> Encoder<W> {
    /// Re-encodes `source` frame by frame against `predecessor`, a stream
    /// whose decoder starts out in `predecessor_state`. Stops at the end of
    /// either input and returns one outcome per written frame.
    ///
    /// A frame that fails leaves everything written before it in place.
    /// `stop` is polled before every frame and once per macroblock row.
    pub fn reencode(
        &mut self,
        source: &mut dyn FrameSource,
        predecessor: &mut dyn PredecessorSource,
        predecessor_state: DecoderState,
        options: &ReencodeOptions,
        stop: &dyn Stop,
    ) -> Result<Vec<EncodeOutcome>, EncodeError> {
        let mut reference = Decoder::from_state(predecessor_state);
        let mut outcomes = Vec::new();

        while let Some(payload) = predecessor.next_payload()? {
            stop.check()?;
            let Some(source_frame) = source.next_frame() else {
                break;
            };
            self.check_dimensions(&source_frame.raster)?;

            let predecessor_frame = parse_frame(&payload, reference.state())?;
            let predecessor_output = reference.decode_frame(&predecessor_frame)?;

            let mut encoded = if outcomes.is_empty() {
                let switching = self.create_switching_frame(options.quantizer)?;
                if options.refine_switching {
                    self.refine(&switching, &self.state, &predecessor_output, stop)?
                } else {
                    self.recode(&predecessor_output, &switching, &self.state, stop)?
                }
            } else {
                self.recode(&source_frame.raster, &predecessor_frame, &self.state, stop)?
            };

            if options.fix_probability_tables {
                let current = self.state.probabilities.clone();
                fix_probability_tables(&mut encoded.frame, &current, &reference.state().probabilities);
            }

            let size = self.write_and_commit(&encoded.frame, &encoded.reconstructed)?;
            let similarity = ssim(&encoded.reconstructed, &source_frame.raster);
            log::debug!(
                "re-encoded frame {}: ssim {similarity:.5}, {size} bytes",
                outcomes.len()
            );
            outcomes.push(EncodeOutcome {
                ssim: similarity,
                quantizer: encoded.frame.header.quantizer.y_ac,
                target_met: similarity >= source_frame.minimum_ssim,
                size,
            });
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::EncoderConfig;
    use crate::mux::MemoryWriter;
    use enough::{StopReason, Unstoppable};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Lets a fixed number of checks pass, then cancels.
    struct StopAfter(AtomicUsize);

    impl Stop for StopAfter {
        fn check(&self) -> Result<(), StopReason> {
            let left = self.0.load(Ordering::Relaxed);
            if left == 0 {
                return Err(StopReason::Cancelled);
            }
            self.0.store(left - 1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn gradient(width: usize, height: usize, shift: usize) -> Raster {
        let mut raster = Raster::new(width, height);
        for y in 0..height {
            for x in 0..width {
                raster.y.set(x, y, ((x + shift) * 5 + y * 3) as u8);
                raster.u.set(x / 2, y / 2, (100 + x + shift) as u8);
            }
        }
        raster
    }

    /// A three frame predecessor stream of a moving gradient.
    fn predecessor(sources: &[Raster]) -> VecDeque<Vec<u8>> {
        let mut enc = Encoder::new(MemoryWriter::new(32, 32), EncoderConfig::new());
        for raster in sources {
            enc.encode(raster, 0.9, Some(36)).unwrap();
        }
        enc.into_writer().into_frames().into()
    }

    fn sources() -> Vec<Raster> {
        (0..3).map(|shift| gradient(32, 32, shift * 2)).collect()
    }

    /// An encoder whose stream has shown a different picture.
    fn elsewhere() -> Encoder<MemoryWriter> {
        let mut enc = Encoder::new(MemoryWriter::new(32, 32), EncoderConfig::new());
        enc.encode(&Raster::filled(32, 32, 60, 90, 170), 0.9, Some(20))
            .unwrap();
        enc
    }

    #[test]
    fn reencoded_stream_decodes_like_the_encoder_state() {
        let sources = sources();
        let mut payloads = predecessor(&sources);
        let mut enc = elsewhere();
        let mut replay = enc.export_decoder();

        let outcomes = enc
            .reencode(
                &mut VecFrameSource::from_rasters(sources, 0.5),
                &mut payloads,
                DecoderState::new(32, 32),
                &ReencodeOptions::default(),
                &Unstoppable,
            )
            .unwrap();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(enc.writer().frames().len(), 4);
        assert_eq!(enc.frames_encoded(), 4);

        for (payload, outcome) in enc.writer().frames()[1..].iter().zip(&outcomes) {
            assert_eq!(payload.len(), outcome.size);
            replay.decode(payload).unwrap();
        }
        assert_eq!(replay.state(), enc.state());
    }

    #[test]
    fn fixed_tables_follow_the_predecessor() {
        let sources = sources();
        let payloads = predecessor(&sources);
        let mut reference = Decoder::new(32, 32);
        for payload in &payloads {
            reference.decode(payload).unwrap();
        }

        let mut enc = elsewhere();
        enc.reencode(
            &mut VecFrameSource::from_rasters(sources, 0.5),
            &mut payloads.clone(),
            DecoderState::new(32, 32),
            &ReencodeOptions::default(),
            &Unstoppable,
        )
        .unwrap();
        assert_eq!(enc.state().probabilities, reference.state().probabilities);
    }

    #[test]
    fn stops_at_the_shorter_input() {
        let sources = sources();
        let mut payloads = predecessor(&sources);
        let mut enc = elsewhere();
        let options = ReencodeOptions {
            refine_switching: false,
            fix_probability_tables: false,
            ..ReencodeOptions::default()
        };
        let outcomes = enc
            .reencode(
                &mut VecFrameSource::from_rasters(sources.into_iter().take(2), 0.5),
                &mut payloads,
                DecoderState::new(32, 32),
                &options,
                &Unstoppable,
            )
            .unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(enc.writer().frames().len(), 3);
    }

    #[test]
    fn cancels_inside_a_frame() {
        let sources = sources();
        let mut payloads = predecessor(&sources);
        let mut enc = elsewhere();
        let before = enc.state().clone();
        // The frame-level check passes; the first row check cancels.
        let result = enc.reencode(
            &mut VecFrameSource::from_rasters(sources, 0.5),
            &mut payloads,
            DecoderState::new(32, 32),
            &ReencodeOptions::default(),
            &StopAfter(AtomicUsize::new(1)),
        );
        assert!(matches!(result, Err(EncodeError::Cancelled(StopReason::Cancelled))));
        assert_eq!(enc.state(), &before);
        assert_eq!(enc.writer().frames().len(), 1);
    }

    #[test]
    fn frame_source_rewinds() {
        let mut source = VecFrameSource::from_rasters([Raster::new(16, 16)], 0.9);
        assert!(source.next_frame().is_some());
        assert!(source.next_frame().is_none());
        assert!(source.rewind());
        assert_eq!(source.next_frame().map(|f| f.minimum_ssim), Some(0.9));
    }
}
