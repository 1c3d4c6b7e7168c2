//! 4x4 integer transforms (RFC 6386 section 14).
//!
//! All functions operate in place on a row-major block of 16 values.

/// 16 bit fixed point version of cos(PI/8) * sqrt(2) - 1
const CONST1: i64 = 20091;
/// 16 bit fixed point version of sin(PI/8) * sqrt(2)
const CONST2: i64 = 35468;

/// Forward DCT of a residual block.
pub(crate) fn forward_dct(block: &mut [i32; 16]) {
    let mut tmp = [0i64; 16];

    for (row, out) in block.chunks_exact(4).zip(tmp.chunks_exact_mut(4)) {
        let a = i64::from(row[0] + row[3]) * 8;
        let b = i64::from(row[1] + row[2]) * 8;
        let c = i64::from(row[1] - row[2]) * 8;
        let d = i64::from(row[0] - row[3]) * 8;

        out[0] = a + b;
        out[2] = a - b;
        out[1] = (c * 2217 + d * 5352 + 14500) >> 12;
        out[3] = (d * 2217 - c * 5352 + 7500) >> 12;
    }

    for i in 0..4 {
        let a = tmp[i] + tmp[12 + i];
        let b = tmp[4 + i] + tmp[8 + i];
        let c = tmp[4 + i] - tmp[8 + i];
        let d = tmp[i] - tmp[12 + i];

        block[i] = ((a + b + 7) >> 4) as i32;
        block[8 + i] = ((a - b + 7) >> 4) as i32;
        block[4 + i] = (((c * 2217 + d * 5352 + 12000) >> 16) + i64::from(d != 0)) as i32;
        block[12 + i] = ((d * 2217 - c * 5352 + 51000) >> 16) as i32;
    }
}

/// Inverse DCT, columns first as the decoder does it.
pub(crate) fn inverse_dct(block: &mut [i32; 16]) {
    // Intermediate products exceed i32 for extreme inputs.
    let mut tmp = [0i64; 16];

    for i in 0..4 {
        let (c0, c1, c2, c3) = (
            i64::from(block[i]),
            i64::from(block[4 + i]),
            i64::from(block[8 + i]),
            i64::from(block[12 + i]),
        );
        let a1 = c0 + c2;
        let b1 = c0 - c2;
        let c = ((c1 * CONST2) >> 16) - (c3 + ((c3 * CONST1) >> 16));
        let d = (c1 + ((c1 * CONST1) >> 16)) + ((c3 * CONST2) >> 16);

        tmp[i] = a1 + d;
        tmp[4 + i] = b1 + c;
        tmp[8 + i] = b1 - c;
        tmp[12 + i] = a1 - d;
    }

    for (row, out) in tmp.chunks_exact(4).zip(block.chunks_exact_mut(4)) {
        let a1 = row[0] + row[2];
        let b1 = row[0] - row[2];
        let c = ((row[1] * CONST2) >> 16) - (row[3] + ((row[3] * CONST1) >> 16));
        let d = (row[1] + ((row[1] * CONST1) >> 16)) + ((row[3] * CONST2) >> 16);

        out[0] = ((a1 + d + 4) >> 3) as i32;
        out[1] = ((b1 + c + 4) >> 3) as i32;
        out[2] = ((b1 - c + 4) >> 3) as i32;
        out[3] = ((a1 - d + 4) >> 3) as i32;
    }
}

/// Forward Walsh-Hadamard transform of the 16 luma DC values.
pub(crate) fn forward_wht(block: &mut [i32; 16]) {
    let mut tmp = [0i64; 16];

    for (row, out) in block.chunks_exact(4).zip(tmp.chunks_exact_mut(4)) {
        let a = i64::from(row[0]) + i64::from(row[3]);
        let b = i64::from(row[1]) + i64::from(row[2]);
        let c = i64::from(row[1]) - i64::from(row[2]);
        let d = i64::from(row[0]) - i64::from(row[3]);

        out[0] = a + b;
        out[1] = c + d;
        out[2] = a - b;
        out[3] = d - c;
    }

    // Halve with rounding away from zero on the positive side.
    let halve = |v: i64| ((v + i64::from(v > 0)) / 2) as i32;

    for i in 0..4 {
        let a = tmp[i] + tmp[12 + i];
        let b = tmp[4 + i] + tmp[8 + i];
        let c = tmp[4 + i] - tmp[8 + i];
        let d = tmp[i] - tmp[12 + i];

        block[i] = halve(a + b);
        block[4 + i] = halve(c + d);
        block[8 + i] = halve(a - b);
        block[12 + i] = halve(d - c);
    }
}

/// Inverse Walsh-Hadamard transform (RFC 6386 section 14.3).
pub(crate) fn inverse_wht(block: &mut [i32; 16]) {
    for i in 0..4 {
        let a1 = block[i] + block[12 + i];
        let b1 = block[4 + i] + block[8 + i];
        let c1 = block[4 + i] - block[8 + i];
        let d1 = block[i] - block[12 + i];

        block[i] = a1 + b1;
        block[4 + i] = c1 + d1;
        block[8 + i] = a1 - b1;
        block[12 + i] = d1 - c1;
    }

    for row in block.chunks_exact_mut(4) {
        let a1 = row[0] + row[3];
        let b1 = row[1] + row[2];
        let c1 = row[1] - row[2];
        let d1 = row[0] - row[3];

        row[0] = (a1 + b1 + 3) >> 3;
        row[1] = (c1 + d1 + 3) >> 3;
        row[2] = (a1 - b1 + 3) >> 3;
        row[3] = (d1 - c1 + 3) >> 3;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dct_inverse() {
        const BLOCK: [i32; 16] = [
            38, 6, 210, 107, 42, 125, 185, 151, 241, 224, 125, 233, 227, 8, 57, 96,
        ];

        let mut block = BLOCK;
        forward_dct(&mut block);
        inverse_dct(&mut block);

        assert_eq!(BLOCK, block);
    }

    #[test]
    fn test_dc_only_block_is_flat() {
        for dc in [-2048, -37, -1, 0, 1, 5, 300, 2047] {
            let mut block = [0i32; 16];
            block[0] = dc;
            inverse_dct(&mut block);
            assert_eq!(block, [(dc + 4) >> 3; 16], "dc = {dc}");
        }
    }

    #[test]
    fn test_flat_residual_is_dc_dominated() {
        let mut block = [9i32; 16];
        forward_dct(&mut block);
        assert_eq!(block[0], 72);
        // Rounding constants leave at most a unit of energy elsewhere.
        assert!(block[1..].iter().all(|&c| c.abs() <= 1));
    }

    #[test]
    fn test_wht_constant_round_trip() {
        for d in [-40, -3, 0, 1, 17, 255] {
            let mut block = [d; 16];
            forward_wht(&mut block);
            assert!(block[1..].iter().all(|&c| c == 0));
            inverse_wht(&mut block);
            assert_eq!(block, [d; 16]);
        }
    }
}
