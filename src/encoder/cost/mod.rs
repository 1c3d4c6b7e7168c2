//! Rate and distortion measures for mode decision.
//!
//! Rates are expressed in 1/256 bit, distortions as pixel-domain sums of
//! squared errors. [`rdcost`] combines the two into the single score every
//! candidate is ranked by.
//!
//! ## Module organization
//!
//! - [`lambda`]: rate weights derived from the quantizer
//! - [`level_costs`]: precomputed coefficient level costs
//! - [`stats`]: token statistics for probability adaptation

pub(crate) mod lambda;
pub(crate) mod level_costs;
pub(crate) mod stats;

use std::sync::OnceLock;

use crate::common::tokens::tree_path;

pub(crate) use lambda::Lambdas;
pub(crate) use level_costs::LevelCosts;
pub(crate) use stats::TokenStats;

/// Default distortion weight; rates are in 1/256 bit so this puts one unit
/// of squared error on the same scale as one bit.
pub const DEFAULT_DISTORTION_MULTIPLIER: u32 = 256;

/// Cost of a bit coded at probability 128.
pub(crate) const ONE_BIT: u32 = 256;

/// `-log2(p / 256)` in 1/256 bit for `p` in `0..=256`.
fn entropy_cost() -> &'static [u16; 257] {
    static TABLE: OnceLock<[u16; 257]> = OnceLock::new();
    TABLE.get_or_init(|| {
        core::array::from_fn(|p| {
            if p == 0 {
                // Unreachable probability; priced like a very unlikely bit.
                return 16 * 256;
            }
            let bits = -(p as f64 / 256.0).log2();
            (bits * 256.0).round() as u16
        })
    })
}

/// Cost in 1/256 bit of coding `bit` where `prob` is the probability of zero.
#[inline]
pub fn bit_cost(bit: bool, prob: u8) -> u16 {
    let table = entropy_cost();
    if bit {
        table[256 - usize::from(prob)]
    } else {
        table[usize::from(prob)]
    }
}

/// Cost of coding `value` with a boolean tree, starting at node `start`.
pub(crate) fn tree_cost(tree: &[i8], probs: &[u8], value: i8, start: usize) -> u32 {
    tree_path(tree, value, start)
        .steps()
        .iter()
        .map(|&(node, bit)| u32::from(bit_cost(bit, probs[usize::from(node)])))
        .sum()
}

/// Combined rate/distortion score. Saturates instead of overflowing.
#[inline]
pub fn rdcost(rate: u32, distortion: u64, rate_multiplier: u32, distortion_multiplier: u32) -> u64 {
    u64::from(rate)
        .saturating_mul(u64::from(rate_multiplier))
        .saturating_add(distortion.saturating_mul(u64::from(distortion_multiplier)))
}

/// Sum of absolute differences between two same-size blocks.
pub fn sad(block: &[u8], prediction: &[u8]) -> u32 {
    debug_assert_eq!(block.len(), prediction.len());
    block
        .iter()
        .zip(prediction)
        .map(|(&a, &b)| u32::from(a.abs_diff(b)))
        .sum()
}

/// Sum of squared differences between two same-size blocks.
pub fn sse(block: &[u8], prediction: &[u8]) -> u32 {
    debug_assert_eq!(block.len(), prediction.len());
    block
        .iter()
        .zip(prediction)
        .map(|(&a, &b)| {
            let d = u32::from(a.abs_diff(b));
            d * d
        })
        .sum()
}

/// Variance of the difference between two blocks, times the pixel count:
/// `sse - (sum of differences)² / n`.
pub fn variance(block: &[u8], prediction: &[u8]) -> u32 {
    let n = block.len() as i64;
    if n == 0 {
        return 0;
    }
    let sum: i64 = block
        .iter()
        .zip(prediction)
        .map(|(&a, &b)| i64::from(a) - i64::from(b))
        .sum();
    let mean_sq = (sum * sum) / n;
    (i64::from(sse(block, prediction)) - mean_sq) as u32
}

/// Whether every pixel of a packed block holds the same value.
pub(crate) fn is_flat_source(block: &[u8]) -> bool {
    block
        .split_first()
        .map_or(true, |(&first, rest)| rest.iter().all(|&p| p == first))
}

/// Mean difference between two same-size blocks, rounded half away from
/// zero.
pub fn avg(block: &[u8], prediction: &[u8]) -> i32 {
    debug_assert_eq!(block.len(), prediction.len());
    let n = block.len() as i64;
    if n == 0 {
        return 0;
    }
    let sum: i64 = block
        .iter()
        .zip(prediction)
        .map(|(&a, &b)| i64::from(a) - i64::from(b))
        .sum();
    ((sum + sum.signum() * (n / 2)) / n) as i32
}
