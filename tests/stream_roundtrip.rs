//! Encode/decode roundtrips through the IVF container.
//!
//! Every frame the encoder commits must decode, from the written bytes alone,
//! to exactly the reconstruction the encoder measured and kept as reference.

use std::io::Cursor;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use zenvp8::mux::{IvfReader, IvfWriter, MemoryWriter};
use zenvp8::{ssim, Decoder, Encoder, EncoderConfig, Raster};

/// Gradient with seeded noise, moving right by `shift` pixels.
fn generate_frame(width: usize, height: usize, shift: usize, seed: u64) -> Raster {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut raster = Raster::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let base = ((x + shift) * 200 / (width + 8)) + y * 40 / height;
            raster.y.set(x, y, (base + rng.gen_range(0..12)) as u8);
        }
    }
    for y in 0..height.div_ceil(2) {
        for x in 0..width.div_ceil(2) {
            raster.u.set(x, y, (110 + (x + shift / 2) % 32) as u8);
            raster.v.set(x, y, (140 - y % 24) as u8);
        }
    }
    raster
}

fn generate_sequence(width: usize, height: usize, count: usize) -> Vec<Raster> {
    (0..count)
        .map(|i| generate_frame(width, height, i * 2, 11))
        .collect()
}

fn roundtrip_ivf(config: EncoderConfig, frames: &[Raster], minimum_ssim: f64) {
    let (width, height) = (frames[0].width(), frames[0].height());
    let writer = IvfWriter::new(Cursor::new(Vec::new()), width as u16, height as u16, (30, 1)).unwrap();
    let mut encoder = Encoder::new(writer, config);
    let mut outcomes = Vec::new();
    for frame in frames {
        outcomes.push(
            encoder
                .encode_with_outcome(frame, minimum_ssim, None)
                .unwrap_or_else(|e| panic!("encode failed at {width}x{height}: {e}")),
        );
    }
    let final_state = encoder.state().clone();
    let bytes = encoder.into_writer().finish().unwrap().into_inner();

    let mut reader = IvfReader::new(bytes.as_slice()).unwrap();
    assert_eq!(
        (usize::from(reader.width()), usize::from(reader.height())),
        (width, height)
    );
    assert_eq!(reader.declared_frame_count() as usize, frames.len());

    let mut decoder = Decoder::new(width, height);
    for (i, (frame, outcome)) in frames.iter().zip(&outcomes).enumerate() {
        let payload = reader.next_frame().unwrap().expect("missing frame");
        assert_eq!(payload.pts, i as u64);
        assert_eq!(payload.data.len(), outcome.size, "size mismatch at frame {i}");
        let decoded = decoder
            .decode(&payload.data)
            .unwrap_or_else(|e| panic!("decode failed at frame {i}: {e}"));
        let similarity = ssim(&decoded, frame);
        assert!(
            (similarity - outcome.ssim).abs() < 1e-9,
            "frame {i}: decoded ssim {similarity}, encoder reported {}",
            outcome.ssim
        );
        if outcome.target_met {
            assert!(similarity >= minimum_ssim);
        }
    }
    assert!(reader.next_frame().unwrap().is_none());
    assert_eq!(decoder.state(), &final_state);
}

#[test]
fn sequence_roundtrip() {
    roundtrip_ivf(EncoderConfig::new(), &generate_sequence(64, 48, 4), 0.9);
}

#[test]
fn partial_macroblock_roundtrip() {
    roundtrip_ivf(EncoderConfig::new(), &generate_sequence(33, 17, 3), 0.85);
}

#[test]
fn two_pass_roundtrip() {
    let config = EncoderConfig::new().with_two_pass(true);
    roundtrip_ivf(config, &generate_sequence(48, 32, 3), 0.9);
}

#[test]
fn without_trellis_roundtrip() {
    let config = EncoderConfig::new()
        .with_trellis(false)
        .with_loop_filter_sharpness(3)
        .with_key_frame_interval(Some(2));
    roundtrip_ivf(config, &generate_sequence(32, 32, 4), 0.9);
}

#[test]
fn fixed_rate_multiplier_roundtrip() {
    let config = EncoderConfig::new().with_rate_multiplier(Some(64));
    roundtrip_ivf(config, &generate_sequence(32, 32, 2), 0.9);
}

#[test]
fn higher_target_costs_more_bytes() {
    let frame = generate_frame(64, 64, 0, 3);
    let size_at = |minimum_ssim: f64| {
        let mut encoder = Encoder::new(MemoryWriter::new(64, 64), EncoderConfig::new());
        let outcome = encoder.encode_with_outcome(&frame, minimum_ssim, None).unwrap();
        assert!(outcome.target_met, "target {minimum_ssim} missed");
        (outcome.size, outcome.quantizer)
    };
    let (loose_size, loose_q) = size_at(0.7);
    let (tight_size, tight_q) = size_at(0.95);
    assert!(tight_q <= loose_q);
    assert!(tight_size >= loose_size);
}

#[test]
fn inter_frames_are_cheaper_than_key_frames() {
    let frames = generate_sequence(64, 64, 3);
    let mut encoder = Encoder::new(MemoryWriter::new(64, 64), EncoderConfig::new());
    let sizes: Vec<usize> = frames
        .iter()
        .map(|frame| encoder.encode_with_outcome(frame, 0.0, Some(40)).unwrap().size)
        .collect();
    assert!(sizes[1] < sizes[0], "inter {} vs key {}", sizes[1], sizes[0]);
    assert!(sizes[2] < sizes[0], "inter {} vs key {}", sizes[2], sizes[0]);
}

#[test]
fn decoder_can_join_mid_stream() {
    let frames = generate_sequence(32, 32, 3);
    let mut encoder = Encoder::new(MemoryWriter::new(32, 32), EncoderConfig::new());
    encoder.encode(&frames[0], 0.9, None).unwrap();

    let mut late = encoder.export_decoder();
    encoder.encode(&frames[1], 0.9, None).unwrap();
    encoder.encode(&frames[2], 0.9, None).unwrap();
    for payload in &encoder.writer().frames()[1..] {
        late.decode(payload).unwrap();
    }
    assert_eq!(late.state(), encoder.state());

    let mut resumed = Encoder::from_decoder(&late, MemoryWriter::new(32, 32), EncoderConfig::new()).unwrap();
    resumed.encode(&frames[0], 0.9, Some(30)).unwrap();
    late.decode(&resumed.writer().frames()[0]).unwrap();
    assert_eq!(late.state(), resumed.state());
}
