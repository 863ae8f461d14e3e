// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The PRBS23-driven coefficient generator that defines which uncoded
//! fragments a given parity fragment XORs together.
//!
//! This is wire-format-critical: the encoder and every decoder must compute
//! the exact same row for the same `(N, j)` pair, bit for bit. Do not touch
//! the state-update formula or the loop structure below without also
//! breaking every sender that has ever shipped firmware with this scheme.

use alloc::vec;
use alloc::vec::Vec;

/// Advances the 23-bit LFSR one step.
///
/// `x` is treated as a non-negative integer; the division by two is an
/// arithmetic right shift, and the new top bit is the XOR of bit 0 and bit 5
/// of the previous state, matching the reference `floor(x / 2)` plus tap
/// computation bit for bit.
fn prbs23_next(x: u32) -> u32 {
    let bit0 = x & 1;
    let bit5 = (x >> 5) & 1;
    (x >> 1) | ((bit0 ^ bit5) << 22)
}

/// Produces deterministic parity coefficient rows for a session with `N`
/// uncoded fragments.
#[derive(Debug, Clone, Copy)]
pub struct ParityGenerator {
    n: u16,
}

impl ParityGenerator {
    pub fn new(n: u16) -> Self {
        Self { n }
    }

    /// Returns the length-`N` coefficient row for parity fragment `i`
    /// (`i > N`, 1-based). `c[k] == true` means uncoded fragment `k` (0-based)
    /// was XORed into this parity at the encoder.
    pub fn row(&self, i: u32) -> Vec<bool> {
        let n = self.n as u32;
        let j = i - n;

        // `m` breaks the degenerate PRBS23 orbit that appears when N is a
        // power of two: without it the modulus N would divide evenly into
        // the LFSR period and starve some fragment indices entirely.
        let m = if n.is_power_of_two() { 1 } else { 0 };
        let modulus = n + m;

        let mut x = 1u32.wrapping_add(1001u32.wrapping_mul(j));
        let mut c = vec![false; n as usize];

        let draws = n / 2;
        for _ in 0..draws {
            // The reference always advances the LFSR before taking a modulus
            // from the new state, even for the very first draw of a row; the
            // loop guard starts `r` at an out-of-range value purely to force
            // one iteration.
            let mut r = n;
            while r >= n {
                x = prbs23_next(x);
                r = x % modulus;
            }
            // A draw that lands on an already-set position still counts
            // toward the loop's budget: the reference increments its
            // position counter unconditionally after the inner draw loop.
            c[r as usize] = true;
        }

        c
    }
}
