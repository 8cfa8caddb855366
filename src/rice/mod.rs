//! Golomb-Rice coding of non-negative integer sequences.
//!
//! A value `v` is stored as `v >> k` one-bits, a terminating zero bit,
//! then the low `k` bits of `v` in big-endian order. `k` is the Rice
//! parameter, one byte per stream. The index body interleaves two such
//! streams (offset differences and granule differences), one code from
//! each in turn.

use crate::bits::{BitReader, BitWriter};
use crate::error::{Error, Result};

/// Number of bits needed to Rice-code `value` with parameter `k`.
pub fn bits_required(value: i64, k: u8) -> i64 {
    debug_assert!(value >= 0);
    (value >> k) + k as i64 + 1
}

/// Total bits needed to Rice-code every value in `values` with parameter `k`.
pub fn total_bits(values: &[i64], k: u8) -> i64 {
    values.iter().map(|&v| bits_required(v, k)).sum()
}

/// Select the Rice parameter minimizing the coded size of `values`.
///
/// From "Selecting the Golomb Parameter in Rice Coding" (Kiely, IPN
/// progress report 42-159): the optimum lies in
/// `[floor(log2((2/3)(mean+1))), ceil(log2(mean))]`. The interval is
/// provably at most 2 wide, but floating-point error may break that, so
/// the whole interval is searched.
pub fn optimal_parameter(values: &[i64]) -> u8 {
    if values.is_empty() {
        return 0;
    }
    let total: i64 = values.iter().sum();
    let mean = total as f64 / values.len() as f64;
    if mean <= 0.0 {
        return 0;
    }
    let lower_bound = ((2.0 / 3.0) * (mean + 1.0)).log2().floor().max(0.0) as u8;
    let upper_bound = mean.log2().ceil().max(0.0) as u8;
    if upper_bound > lower_bound {
        let mut optimal = upper_bound;
        let mut best_cost = total_bits(values, upper_bound);
        for k in lower_bound..upper_bound {
            let cost = total_bits(values, k);
            if cost < best_cost {
                best_cost = cost;
                optimal = k;
            }
        }
        optimal
    } else {
        // upper_bound == lower_bound, unless floating point imprecision
        // collapsed the interval.
        upper_bound
    }
}

/// Append one Rice code for `value` to `bits`.
fn write_one(bits: &mut BitWriter, value: i64, k: u8) {
    debug_assert!(value >= 0);
    let quotient = value >> k;
    for _ in 0..quotient {
        bits.write_bit(true);
    }
    bits.write_bit(false);
    bits.write_bits(value as u64, k);
}

/// Read one Rice code, or `None` if the buffer runs out mid-code.
fn read_one(bits: &mut BitReader<'_>, k: u8) -> Option<i64> {
    let mut quotient = 0i64;
    while bits.read_bit()? {
        quotient += 1;
    }
    let remainder = bits.read_bits(k)? as i64;
    Some((quotient << k) | remainder)
}

/// Interleave two equal-length streams into one Rice-coded byte vector:
/// one code from `first`, then one from `second`, until both drain. The
/// last byte is right-padded with zero bits.
pub fn encode_alternating(first: &[i64], second: &[i64], k_first: u8, k_second: u8) -> Vec<u8> {
    debug_assert_eq!(first.len(), second.len());
    let mut bits = BitWriter::new();
    for (&a, &b) in first.iter().zip(second.iter()) {
        write_one(&mut bits, a, k_first);
        write_one(&mut bits, b, k_second);
    }
    bits.finish()
}

/// Decode `num_pairs` interleaved Rice codes back into two sequences.
///
/// Reading stops as soon as the pairs are extracted; trailing padding is
/// ignored.
pub fn decode_alternating(
    bytes: &[u8],
    num_pairs: usize,
    k_first: u8,
    k_second: u8,
) -> Result<(Vec<i64>, Vec<i64>)> {
    let mut bits = BitReader::new(bytes);
    let mut first = Vec::with_capacity(num_pairs);
    let mut second = Vec::with_capacity(num_pairs);
    for i in 0..num_pairs {
        let a = read_one(&mut bits, k_first)
            .ok_or_else(|| Error::MalformedIndex(format!("Rice body ended at pair {}", i)))?;
        let b = read_one(&mut bits, k_second)
            .ok_or_else(|| Error::MalformedIndex(format!("Rice body ended at pair {}", i)))?;
        first.push(a);
        second.push(b);
    }
    Ok((first, second))
}
