//! Frame-by-frame encoding into a container.
//!
//! # API
//!
//! ```rust
//! use zenvp8::mux::MemoryWriter;
//! use zenvp8::{Encoder, EncoderConfig, Raster};
//!
//! let mut encoder = Encoder::new(MemoryWriter::new(32, 32), EncoderConfig::new());
//! let frame = Raster::filled(32, 32, 120, 128, 128);
//! let ssim = encoder.encode(&frame, 0.95, None)?;
//! assert!(ssim >= 0.95);
//! assert_eq!(encoder.writer().frames().len(), 1);
//! # Ok::<(), zenvp8::EncodeError>(())
//! ```
//!
//! Every frame goes through the convergence loop: it is encoded at a
//! starting quantizer and re-encoded at finer quantizers until the
//! reconstruction reaches the requested similarity or the finest quantizer
//! has been tried. Missing the target is not an error; the best attempt is
//! written and [`EncodeOutcome::target_met`] reports the shortfall.

use enough::{Stop, Unstoppable};
use thiserror::Error;

use super::config::EncoderConfig;
use super::cost::TokenStats;
use super::probability::{calc_prob, MvComponentCounts};
use super::vp8::{encode_raster, EncodedFrame, FrameRequest, Modes};
use super::writer::{frame_size, write_frame};
use crate::common::tables::MAX_QUANTIZER_INDEX;
use crate::decoder::{commit_frame, DecodeError, Decoder};
use crate::frame::{Frame, FrameKind, InterHeader, ReferenceFrame};
use crate::mux::{ContainerWriter, MuxError};
use crate::raster::Raster;
use crate::state::{DecoderState, ProbabilityTables};

/// Error that can occur during encoding.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EncodeError {
    /// An IO error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The raster does not have the dimensions of the stream, or they are
    /// outside what a frame header can carry.
    #[error("Invalid dimensions: {actual:?}, expected {expected:?}")]
    InvalidDimensions {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    /// A macroblock predicts from a reference slot that holds no frame.
    #[error("Reference frame {0:?} is unavailable")]
    ReferenceUnavailable(ReferenceFrame),

    /// A quantizer index above the largest one.
    #[error("Invalid quantizer index: {0}")]
    InvalidQuantizer(u8),

    /// The container rejected a frame.
    #[error("Container error: {0}")]
    Container(#[from] MuxError),

    /// A predecessor frame could not be decoded.
    #[error("Predecessor stream error: {0}")]
    Predecessor(#[from] DecodeError),

    /// Encoding was cancelled via a [`enough::Stop`].
    #[error("Encoding cancelled: {0}")]
    Cancelled(enough::StopReason),
}

impl From<enough::StopReason> for EncodeError {
    fn from(reason: enough::StopReason) -> Self {
        Self::Cancelled(reason)
    }
}

/// What the convergence loop achieved for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodeOutcome {
    /// Similarity of the decoded frame to the source.
    pub ssim: f64,
    /// Quantizer index of the written frame.
    pub quantizer: u8,
    /// Whether `ssim` reached the requested minimum.
    pub target_met: bool,
    /// Payload size in bytes.
    pub size: usize,
}

/// Statistics of a first pass, used to seed the rate estimates of the
/// committed second pass.
#[derive(Debug, Clone)]
pub struct FirstPassStats {
    quantizer: u8,
    ssim: f64,
    skip_ratio: f64,
    intra_ratio: f64,
    tokens: TokenStats,
    mv_counts: MvComponentCounts,
    y_modes: Option<[u8; 4]>,
    uv_modes: Option<[u8; 3]>,
}

impl FirstPassStats {
    fn gather(encoded: &EncodedFrame, quantizer: u8) -> Self {
        let macroblocks = &encoded.frame.macroblocks;
        let count = macroblocks.len().max(1) as f64;
        let skipped = macroblocks.iter().filter(|mb| mb.skip).count() as f64;
        let intra = macroblocks.iter().filter(|mb| !mb.prediction.is_inter()).count() as f64;
        let (y_modes, uv_modes) = encoded
            .frame
            .header
            .kind
            .inter_header()
            .map_or((None, None), |inter| (inter.y_mode_probs, inter.uv_mode_probs));
        Self {
            quantizer,
            ssim: encoded.ssim,
            skip_ratio: skipped / count,
            intra_ratio: intra / count,
            tokens: encoded.tokens.clone(),
            mv_counts: encoded.mv_counts,
            y_modes,
            uv_modes,
        }
    }

    /// Quantizer the first pass settled on.
    pub fn quantizer(&self) -> u8 {
        self.quantizer
    }

    pub fn ssim(&self) -> f64 {
        self.ssim
    }

    /// Fraction of macroblocks without coefficients.
    pub fn skip_ratio(&self) -> f64 {
        self.skip_ratio
    }

    /// Fraction of intra macroblocks.
    pub fn intra_ratio(&self) -> f64 {
        self.intra_ratio
    }

    /// `baseline` with every probability the first pass observed replaced
    /// by the value its counts suggest.
    pub fn seeded(&self, baseline: &ProbabilityTables) -> ProbabilityTables {
        let mut probs = baseline.clone();
        for (t, bands) in probs.coefficients.iter_mut().enumerate() {
            for (b, contexts) in bands.iter_mut().enumerate() {
                for (c, nodes) in contexts.iter_mut().enumerate() {
                    for (p, prob) in nodes.iter_mut().enumerate() {
                        let [zeros, ones] = self.tokens.counts(t, b, c, p);
                        if zeros + ones > 0 {
                            *prob = calc_prob(zeros, zeros + ones);
                        }
                    }
                }
            }
        }
        for (probs, counts) in probs.motion_vectors.iter_mut().zip(&self.mv_counts) {
            for (prob, &[zeros, ones]) in probs.iter_mut().zip(counts) {
                if zeros + ones > 0 {
                    *prob = (calc_prob(zeros, zeros + ones) & !1).max(1);
                }
            }
        }
        if let Some(y) = self.y_modes {
            probs.y_modes = y;
        }
        if let Some(uv) = self.uv_modes {
            probs.uv_modes = uv;
        }
        probs
    }
}

/// Result of one convergence run.
struct Convergence {
    encoded: EncodedFrame,
    quantizer: u8,
    target_met: bool,
}

/// Encoder of one stream.
///
/// Holds the [`DecoderState`] a decoder of the written stream will be in,
/// and advances it with every committed frame.
#[derive(Debug)]
pub struct Encoder<W: ContainerWriter> {
    pub(super) config: EncoderConfig,
    pub(super) state: DecoderState,
    pub(super) output: W,
    frames_encoded: u64,
    /// Frames committed since the last key frame.
    since_key: u64,
    /// Quantizer the next convergence search starts from.
    quantizer_hint: Option<u8>,
}

impl<W: ContainerWriter> Encoder<W> {
    /// Encoder for a new stream with the dimensions of `output`. The first
    /// frame is a key frame.
    pub fn new(output: W, config: EncoderConfig) -> Self {
        let state = DecoderState::new(usize::from(output.width()), usize::from(output.height()));
        Self {
            config,
            state,
            output,
            frames_encoded: 0,
            since_key: 0,
            quantizer_hint: None,
        }
    }

    /// Encoder that continues from where `decoder` is. The output must
    /// have the decoder's dimensions.
    pub fn from_decoder(decoder: &Decoder, output: W, config: EncoderConfig) -> Result<Self, EncodeError> {
        let state = decoder.state().clone();
        let expected = (usize::from(output.width()), usize::from(output.height()));
        if (state.width, state.height) != expected {
            return Err(EncodeError::InvalidDimensions {
                expected,
                actual: (state.width, state.height),
            });
        }
        Ok(Self {
            state,
            ..Self::new(output, config)
        })
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// State of a decoder that has read everything written so far.
    pub fn state(&self) -> &DecoderState {
        &self.state
    }

    /// A decoder in the same state as this encoder.
    pub fn export_decoder(&self) -> Decoder {
        Decoder::from_state(self.state.clone())
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }

    pub fn writer(&self) -> &W {
        &self.output
    }

    pub fn into_writer(self) -> W {
        self.output
    }

    /// Encodes and writes one frame whose reconstruction reaches
    /// `minimum_ssim` if any quantizer allows it. `quantizer` skips the
    /// search and uses that index. Returns the achieved similarity.
    pub fn encode(&mut self, raster: &Raster, minimum_ssim: f64, quantizer: Option<u8>) -> Result<f64, EncodeError> {
        self.encode_with_outcome(raster, minimum_ssim, quantizer)
            .map(|outcome| outcome.ssim)
    }

    /// Like [`Encoder::encode`], reporting the full outcome.
    pub fn encode_with_outcome(
        &mut self,
        raster: &Raster,
        minimum_ssim: f64,
        quantizer: Option<u8>,
    ) -> Result<EncodeOutcome, EncodeError> {
        self.encode_with_stop(raster, minimum_ssim, quantizer, &Unstoppable)
    }

    /// Like [`Encoder::encode_with_outcome`], polling `stop` between
    /// macroblock rows and between trials. Nothing is written or committed
    /// when cancelled.
    pub fn encode_with_stop(
        &mut self,
        raster: &Raster,
        minimum_ssim: f64,
        quantizer: Option<u8>,
        stop: &dyn Stop,
    ) -> Result<EncodeOutcome, EncodeError> {
        if self.config.two_pass {
            let stats = self.first_pass(raster, minimum_ssim, quantizer, stop)?;
            return self.encode_second_pass(raster, minimum_ssim, quantizer, &stats, stop);
        }
        self.check_dimensions(raster)?;
        let kind = self.next_frame_kind();
        let start = self.start_quantizer(quantizer);
        let result = self.converge(raster, &kind, minimum_ssim, quantizer, start, None, stop)?;
        self.commit(result)
    }

    /// Runs the convergence loop without writing or committing anything and
    /// returns its statistics.
    pub fn first_pass(
        &self,
        raster: &Raster,
        minimum_ssim: f64,
        quantizer: Option<u8>,
        stop: &dyn Stop,
    ) -> Result<FirstPassStats, EncodeError> {
        self.check_dimensions(raster)?;
        let kind = self.next_frame_kind();
        let start = self.start_quantizer(quantizer);
        let result = self.converge(raster, &kind, minimum_ssim, quantizer, start, None, stop)?;
        log::debug!(
            "first pass: q {} ssim {:.5}",
            result.quantizer,
            result.encoded.ssim
        );
        Ok(FirstPassStats::gather(&result.encoded, result.quantizer))
    }

    /// Committed encode with rate estimates seeded from `stats`, starting
    /// the search at the first pass's quantizer. `stats` must come from
    /// [`Encoder::first_pass`] on the same raster and encoder state.
    pub fn encode_second_pass(
        &mut self,
        raster: &Raster,
        minimum_ssim: f64,
        quantizer: Option<u8>,
        stats: &FirstPassStats,
        stop: &dyn Stop,
    ) -> Result<EncodeOutcome, EncodeError> {
        self.check_dimensions(raster)?;
        let kind = self.next_frame_kind();
        let estimate = stats.seeded(&self.baseline(&kind));
        let start = quantizer.unwrap_or(stats.quantizer);
        let result = self.converge(raster, &kind, minimum_ssim, quantizer, start, Some(&estimate), stop)?;
        self.commit(result)
    }

    pub(super) fn check_dimensions(&self, raster: &Raster) -> Result<(), EncodeError> {
        let expected = (usize::from(self.output.width()), usize::from(self.output.height()));
        let actual = (raster.width(), raster.height());
        if actual != expected {
            return Err(EncodeError::InvalidDimensions { expected, actual });
        }
        Ok(())
    }

    /// Key frame when nothing can be predicted from or the key frame
    /// interval has elapsed.
    pub(super) fn next_frame_kind(&self) -> FrameKind {
        let interval_due = self
            .config
            .key_frame_interval
            .is_some_and(|n| self.since_key >= u64::from(n));
        if self.state.references.last.is_none() || interval_due {
            FrameKind::Key
        } else {
            FrameKind::Inter(InterHeader::default())
        }
    }

    /// Tables a frame of `kind` starts from.
    fn baseline(&self, kind: &FrameKind) -> ProbabilityTables {
        match kind {
            FrameKind::Key => ProbabilityTables::default(),
            FrameKind::Inter(_) => self.state.probabilities.clone(),
        }
    }

    fn start_quantizer(&self, quantizer: Option<u8>) -> u8 {
        quantizer
            .or(self.quantizer_hint)
            .unwrap_or(self.config.initial_quantizer)
    }

    /// Encodes `raster` as a frame of `kind` at `quantizer` against the
    /// current state, without committing it.
    pub(crate) fn encode_with_quantizer(
        &self,
        raster: &Raster,
        kind: &FrameKind,
        quantizer: u8,
        estimate: Option<&ProbabilityTables>,
        stop: &dyn Stop,
    ) -> Result<EncodedFrame, EncodeError> {
        let request = FrameRequest {
            original: raster,
            state: &self.state,
            kind: kind.clone(),
            quantizer,
            estimate,
            modes: Modes::Search,
        };
        encode_raster(&self.config, &request, stop)
    }

    /// Re-encodes at finer quantizers until the similarity target is met.
    ///
    /// The step shrinks with the quantizer, so coarse settings are left
    /// quickly and fine ones are tried closely. When even quantizer 0 misses
    /// the target, the most similar attempt wins.
    #[allow(clippy::too_many_arguments)]
    fn converge(
        &self,
        raster: &Raster,
        kind: &FrameKind,
        minimum_ssim: f64,
        fixed: Option<u8>,
        start: u8,
        estimate: Option<&ProbabilityTables>,
        stop: &dyn Stop,
    ) -> Result<Convergence, EncodeError> {
        if let Some(quantizer) = fixed {
            if quantizer > MAX_QUANTIZER_INDEX {
                return Err(EncodeError::InvalidQuantizer(quantizer));
            }
        }

        let mut quantizer = start.min(MAX_QUANTIZER_INDEX);
        let mut best = self.trial(raster, kind, quantizer, estimate, stop)?;
        let mut best_quantizer = quantizer;
        while best.ssim < minimum_ssim && fixed.is_none() && quantizer > 0 {
            quantizer = quantizer.saturating_sub((quantizer / 4).max(1));
            let encoded = self.trial(raster, kind, quantizer, estimate, stop)?;
            if encoded.ssim > best.ssim {
                best = encoded;
                best_quantizer = quantizer;
            }
        }

        let target_met = best.ssim >= minimum_ssim;
        if !target_met && fixed.is_none() {
            log::warn!(
                "similarity {:.5} below target {minimum_ssim} at q {best_quantizer}",
                best.ssim
            );
        }
        Ok(Convergence {
            encoded: best,
            quantizer: best_quantizer,
            target_met,
        })
    }

    /// One convergence trial.
    fn trial(
        &self,
        raster: &Raster,
        kind: &FrameKind,
        quantizer: u8,
        estimate: Option<&ProbabilityTables>,
        stop: &dyn Stop,
    ) -> Result<EncodedFrame, EncodeError> {
        stop.check()?;
        let encoded = self.encode_with_quantizer(raster, kind, quantizer, estimate, stop)?;
        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "q {quantizer}: ssim {:.5}, {} bytes",
                encoded.ssim,
                frame_size(&encoded.frame, &self.state.probabilities)
            );
        }
        Ok(encoded)
    }

    /// Writes a converged frame and advances the state past it.
    fn commit(&mut self, result: Convergence) -> Result<EncodeOutcome, EncodeError> {
        let Convergence {
            encoded,
            quantizer,
            target_met,
        } = result;
        let size = self.write_and_commit(&encoded.frame, &encoded.reconstructed)?;
        // The next search starts slightly coarser.
        self.quantizer_hint = Some(quantizer.saturating_add(4).min(MAX_QUANTIZER_INDEX));

        Ok(EncodeOutcome {
            ssim: encoded.ssim,
            quantizer,
            target_met,
            size,
        })
    }

    /// Writes `frame` and advances the state past it. `reconstructed` must be
    /// the frame's decoded output. Returns the payload size.
    pub(super) fn write_and_commit(&mut self, frame: &Frame, reconstructed: &Raster) -> Result<usize, EncodeError> {
        let payload = write_frame(frame, &self.state.probabilities);
        self.output.write_frame(&payload)?;
        commit_frame(&mut self.state, &frame.header, reconstructed);

        self.frames_encoded += 1;
        self.since_key = if frame.is_key() { 1 } else { self.since_key + 1 };
        Ok(payload.len())
    }
}
