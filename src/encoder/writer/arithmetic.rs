// Boolean entropy encoder of RFC 6386, section 7.

use crate::common::tokens::tree_path;

pub(crate) struct ArithmeticEncoder {
    /// the entropy values that have been encoded so far
    writer: Vec<u8>,
    /// value of the current bytes being encoded
    bottom: u32,
    /// the range for the next bit, must be between 128 and 255 inclusive
    range: u32,
    /// number of bits that have been encoded in the current byte
    bit_num: i32,
}

impl ArithmeticEncoder {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            writer: Vec::with_capacity(capacity),
            bottom: 0,
            range: 255,
            bit_num: 24,
        }
    }

    // Handle carry propagation: add one to output, handling 0xFF overflow chains.
    fn add_one_to_output(&mut self) {
        let mut i = self.writer.len();
        while i > 0 {
            i -= 1;
            if self.writer[i] < 255 {
                self.writer[i] += 1;
                return;
            }
            self.writer[i] = 0;
        }
        self.writer.insert(0, 1);
    }

    pub(crate) fn write_flag(&mut self, flag: bool) {
        self.write_bool(flag, 128);
    }

    pub(crate) fn write_bool(&mut self, bool_to_write: bool, probability: u8) {
        let split = 1 + (((self.range - 1) * u32::from(probability)) >> 8);

        if bool_to_write {
            self.bottom += split;
            self.range -= split;
        } else {
            self.range = split;
        }

        while self.range < 128 {
            self.range <<= 1;

            if self.bottom & (1 << 31) != 0 {
                self.add_one_to_output();
            }
            self.bottom <<= 1;

            self.bit_num -= 1;
            // we have a byte now so can write it
            if self.bit_num == 0 {
                self.writer.push((self.bottom >> 24) as u8);
                // only keep low 3 bytes
                self.bottom &= (1 << 24) - 1;
                self.bit_num = 8;
            }
        }
    }

    /// Writes the low `num_bits` of `value`, most significant first.
    pub(crate) fn write_literal(&mut self, num_bits: u8, value: u32) {
        for bit in (0..num_bits).rev() {
            self.write_flag((value >> bit) & 1 == 1);
        }
    }

    /// Presence flag, magnitude, then sign (set for negative values).
    pub(crate) fn write_optional_signed_value(&mut self, num_bits: u8, value: Option<i8>) {
        self.write_flag(value.is_some());
        if let Some(value) = value {
            self.write_literal(num_bits, u32::from(value.unsigned_abs()));
            self.write_flag(value < 0);
        }
    }

    pub(crate) fn write_with_tree(&mut self, tree: &[i8], probabilities: &[u8], value: i8) {
        self.write_with_tree_start_index(tree, probabilities, value, 0);
    }

    pub(crate) fn write_with_tree_start_index(
        &mut self,
        tree: &[i8],
        probabilities: &[u8],
        value: i8,
        start_index: usize,
    ) {
        for &(node, bit) in tree_path(tree, value, start_index).steps() {
            self.write_bool(bit, probabilities[usize::from(node)]);
        }
    }

    /// Flushes any remaining bits to the writer and consumes the encoder altogether
    pub(crate) fn flush_and_get_buffer(mut self) -> Vec<u8> {
        let mut c = self.bit_num;
        let mut v = self.bottom;
        if self.bottom & (1 << (32 - self.bit_num)) != 0 {
            self.add_one_to_output();
        }
        v <<= c & 0b111;
        c = (c >> 3) - 1;
        while c >= 0 {
            v <<= 8;
            c -= 1;
        }
        c = 3;
        while c >= 0 {
            self.writer.push((v >> 24) as u8);
            v <<= 8;
            c -= 1;
        }
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::tables::{KEYFRAME_YMODE_PROBS, KEYFRAME_YMODE_TREE};
    use crate::decoder::bool_decoder::BoolDecoder;

    #[test]
    fn test_arithmetic_encoder_short() {
        let mut encoder = ArithmeticEncoder::with_capacity(16);
        encoder.write_flag(false);
        encoder.write_bool(true, 10);
        encoder.write_bool(false, 250);
        encoder.write_literal(1, 1);
        encoder.write_literal(3, 5);
        encoder.write_literal(8, 64);
        encoder.write_literal(8, 185);
        let bytes = encoder.flush_and_get_buffer();
        assert_eq!(&[104, 101, 107, 128], &*bytes);
    }

    #[test]
    fn test_arithmetic_encoder_hello() {
        let mut encoder = ArithmeticEncoder::with_capacity(16);
        encoder.write_flag(false);
        encoder.write_bool(true, 10);
        encoder.write_bool(false, 250);
        encoder.write_literal(1, 1);
        encoder.write_literal(3, 5);
        encoder.write_literal(8, 64);
        encoder.write_literal(8, 185);
        encoder.write_literal(8, 31);
        encoder.write_literal(8, 134);
        encoder.write_optional_signed_value(2, None);
        encoder.write_optional_signed_value(2, Some(-1));
        let data = b"hello";
        let bytes = encoder.flush_and_get_buffer();
        assert_eq!(data, &bytes[..data.len()]);
    }

    #[test]
    fn test_encoder_with_decoder() {
        let mut encoder = ArithmeticEncoder::with_capacity(16);
        encoder.write_bool(true, 40);
        encoder.write_bool(true, 110);
        encoder.write_bool(false, 70);
        encoder.write_bool(false, 10);
        encoder.write_bool(false, 10);
        encoder.write_bool(true, 5);
        encoder.write_optional_signed_value(4, Some(-7));
        encoder.write_literal(7, 100);
        let buffer = encoder.flush_and_get_buffer();

        let mut decoder = BoolDecoder::new(&buffer);
        assert!(decoder.read_bool(40));
        assert!(decoder.read_bool(110));
        assert!(!decoder.read_bool(70));
        assert!(!decoder.read_bool(10));
        assert!(!decoder.read_bool(10));
        assert!(decoder.read_bool(5));
        assert_eq!(decoder.read_optional_signed_value(4), -7);
        assert_eq!(decoder.read_literal(7), 100);
        decoder.check(()).unwrap();
    }

    #[test]
    fn test_encoder_tree() {
        let mut encoder = ArithmeticEncoder::with_capacity(16);
        encoder.write_with_tree(&KEYFRAME_YMODE_TREE, &KEYFRAME_YMODE_PROBS, 3);
        let write_buffer = encoder.flush_and_get_buffer();
        assert_eq!(&[233, 64, 0, 0], &*write_buffer);
    }
}
