//! Boolean entropy decoder (RFC 6386, section 7.3).
//!
//! Reads past the end of the input yield zero bytes; [`BoolDecoder::check`]
//! reports truncation once more bytes were consumed than the encoder's flush
//! could have left out.

use super::DecodeError;

/// Zero bytes a well-formed partition may be short of: the reader runs two
/// bytes ahead of the last decoded bit.
const MAX_OVERRUN: usize = 2;

pub(crate) struct BoolDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    /// Two-byte window; the top byte is compared against the split.
    value: u32,
    /// Current range, in [128, 255] between calls.
    range: u32,
    /// Bits shifted out of the low byte since the last load.
    bit_count: u32,
    overrun: usize,
}

impl<'a> BoolDecoder<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        let mut decoder = Self {
            data,
            pos: 0,
            value: 0,
            range: 255,
            bit_count: 0,
            overrun: 0,
        };
        decoder.value = (u32::from(decoder.next_byte()) << 8) | u32::from(decoder.next_byte());
        decoder
    }

    fn next_byte(&mut self) -> u8 {
        match self.data.get(self.pos) {
            Some(&b) => {
                self.pos += 1;
                b
            }
            None => {
                self.overrun += 1;
                0
            }
        }
    }

    pub(crate) fn read_bool(&mut self, prob: u8) -> bool {
        let split = 1 + (((self.range - 1) * u32::from(prob)) >> 8);
        let big_split = split << 8;
        let bit = if self.value >= big_split {
            self.range -= split;
            self.value -= big_split;
            true
        } else {
            self.range = split;
            false
        };

        while self.range < 128 {
            self.value <<= 1;
            self.range <<= 1;
            self.bit_count += 1;
            if self.bit_count == 8 {
                self.bit_count = 0;
                self.value |= u32::from(self.next_byte());
            }
        }
        bit
    }

    pub(crate) fn read_flag(&mut self) -> bool {
        self.read_bool(128)
    }

    /// Reads an `n`-bit unsigned value, most significant bit first.
    pub(crate) fn read_literal(&mut self, n: u8) -> u32 {
        (0..n).fold(0, |v, _| (v << 1) | u32::from(self.read_flag()))
    }

    /// Presence flag, magnitude and sign; zero when absent.
    pub(crate) fn read_optional_signed_value(&mut self, n: u8) -> i32 {
        if !self.read_flag() {
            return 0;
        }
        let magnitude = self.read_literal(n) as i32;
        if self.read_flag() {
            -magnitude
        } else {
            magnitude
        }
    }

    /// Reads a tree-coded value starting at node `start`.
    pub(crate) fn read_tree(&mut self, tree: &[i8], probs: &[u8], start: usize) -> i8 {
        let mut node = start;
        loop {
            let next = tree[node + usize::from(self.read_bool(probs[node >> 1]))];
            if next <= 0 {
                return -next;
            }
            node = next as usize;
        }
    }

    /// Fails if the input ran out before the reads so far were satisfied.
    pub(crate) fn check<T>(&self, value: T) -> Result<T, DecodeError> {
        if self.overrun > MAX_OVERRUN {
            Err(DecodeError::Truncated)
        } else {
            Ok(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::tables::{BPRED_MODE_TREE, DCT_TOKEN_TREE, COEFF_PROBS, KEYFRAME_BPRED_MODE_PROBS};
    use crate::encoder::writer::arithmetic::ArithmeticEncoder;

    #[test]
    fn trees_round_trip() {
        let mut encoder = ArithmeticEncoder::with_capacity(64);
        let probs = &KEYFRAME_BPRED_MODE_PROBS[2][5];
        for mode in 0..10 {
            encoder.write_with_tree(&BPRED_MODE_TREE, probs, mode);
        }
        let token_probs = &COEFF_PROBS[1][3][2];
        for token in 0..11 {
            encoder.write_with_tree(&DCT_TOKEN_TREE, token_probs, token);
        }
        // Tokens after a zero skip the end-of-block node.
        encoder.write_with_tree_start_index(&DCT_TOKEN_TREE, token_probs, 4, 2);
        let bytes = encoder.flush_and_get_buffer();

        let mut decoder = BoolDecoder::new(&bytes);
        for mode in 0..10 {
            assert_eq!(decoder.read_tree(&BPRED_MODE_TREE, probs, 0), mode);
        }
        for token in 0..11 {
            assert_eq!(decoder.read_tree(&DCT_TOKEN_TREE, token_probs, 0), token);
        }
        assert_eq!(decoder.read_tree(&DCT_TOKEN_TREE, token_probs, 2), 4);
        decoder.check(()).unwrap();
    }

    #[test]
    fn empty_input_is_truncated_after_a_few_reads() {
        let mut decoder = BoolDecoder::new(&[]);
        for _ in 0..64 {
            decoder.read_flag();
        }
        assert!(matches!(decoder.check(()), Err(DecodeError::Truncated)));
    }
}
