// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The flash-backed Gaussian-elimination-over-GF(2) state machine.
//!
//! [`Decoder`] never owns a [`UnalignedStore`]; every method that needs flash
//! access takes one by `&mut` reference, mirroring how [`crate::session`]
//! holds the store exclusively for the life of a session while the decoder
//! only ever borrows it for the duration of a single call.

use alloc::vec;
use alloc::vec::Vec;

use ringbuf::ringbuf_entry;
use unwrap_lite::UnwrapLite;

use crate::error::StoreError;
use crate::flash::{FlashStore, UnalignedStore};
use crate::matrix::{first_one, vector_is_null, xor_bytes, xor_into, TriMatrix};
use crate::parity::ParityGenerator;

/// Outcome of reducing a single frame against the decoder's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderOutcome {
    /// Accepted; the image is not yet fully recovered.
    Ongoing,
    /// Accepted, and this frame was the one that completed recovery.
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Log {
    Empty,
    DataAccepted { index: u32 },
    ParityDependent { index: u32 },
    ParityRedundant { index: u32 },
    PivotAdded { index: u32, pos: u32 },
    BackSubstituted { l: u32 },
    Complete,
}

ringbuf::ringbuf!(RINGBUF, Log, 64, Log::Empty);

/// Flash-backed Gaussian-elimination decoder for one fragmentation session.
///
/// Holds exactly the state listed in the data model: the presence vector,
/// the packed triangular matrix, the pivot-occupied vector, and the
/// diagonalisation counter. All of it is per-instance; there is no
/// process-wide state to reset between sessions.
pub struct Decoder {
    n: u16,
    f: u16,
    flash_offset: u32,
    missing_index: Vec<u32>,
    /// Live missing-slot count. Stabilizes once the first parity frame has
    /// been processed, but is read fresh at every matrix access rather than
    /// cached, matching the reference addressing scheme.
    l: usize,
    last_seen_index: u32,
    matrix: TriMatrix,
    pivots: Vec<bool>,
    m2l: usize,
    parity_gen: ParityGenerator,
}

impl Decoder {
    pub fn new(n: u16, f: u16, flash_offset: u32) -> Self {
        Self {
            n,
            f,
            flash_offset,
            missing_index: vec![0u32; n as usize],
            l: 0,
            last_seen_index: 0,
            matrix: TriMatrix::new(),
            pivots: Vec::new(),
            m2l: 0,
            parity_gen: ParityGenerator::new(n),
        }
    }

    /// Count of slots currently known to be missing (never decremented when
    /// a previously-missing slot later arrives as data — see §4.3.1).
    pub fn lost_count(&self) -> u32 {
        self.l as u32
    }

    fn slot_addr(&self, k: usize) -> u32 {
        self.flash_offset + (k as u32) * (self.f as u32)
    }

    /// §4.3.1: missing-slot accounting, common to data and parity frames.
    fn account_missing(&mut self, i: u32) {
        let upper = core::cmp::min(i.saturating_sub(1), self.n as u32);
        let mut q = self.last_seen_index;
        while q < upper {
            if q < self.n as u32 {
                self.l += 1;
                self.missing_index[q as usize] = self.l as u32;
                if self.pivots.len() < self.l {
                    self.pivots.resize(self.l, false);
                }
            }
            q += 1;
        }
        self.last_seen_index = core::cmp::min(i, self.n as u32 + 1);
    }

    /// Finds the slot whose missing ordinal equals `ordinal` (1-based).
    ///
    /// The invariants in §3 guarantee every ordinal in `1..=L` appears
    /// exactly once in `missing_index`; a miss here means the pivot/ordinal
    /// bookkeeping has diverged; from the caller's own data, which should
    /// never happen.
    fn slot_of_missing(&self, ordinal: u32) -> usize {
        self.missing_index
            .iter()
            .position(|&m| m == ordinal)
            .unwrap_lite()
    }

    /// §4.3.2: data-frame handling. `i` is the 1-based fragment index.
    pub fn process_data<S: FlashStore>(
        &mut self,
        store: &mut UnalignedStore<S>,
        i: u32,
        payload: &[u8],
    ) -> Result<DecoderOutcome, StoreError> {
        self.account_missing(i);
        self.missing_index[(i - 1) as usize] = 0;

        store.program(self.slot_addr((i - 1) as usize), payload)?;
        ringbuf_entry!(RINGBUF, Log::DataAccepted { index: i });

        if i == self.n as u32 && self.l == 0 {
            ringbuf_entry!(RINGBUF, Log::Complete);
            return Ok(DecoderOutcome::Complete);
        }
        Ok(DecoderOutcome::Ongoing)
    }

    /// §4.3.3: parity-frame reduction, with §4.3.4 back-substitution folded
    /// in once the matrix has been fully diagonalised.
    pub fn process_parity<S: FlashStore>(
        &mut self,
        store: &mut UnalignedStore<S>,
        i: u32,
        payload: &mut [u8],
    ) -> Result<DecoderOutcome, StoreError> {
        self.account_missing(i);

        let c = self.parity_gen.row(i);
        let f = self.f as usize;
        let mut scratch = vec![0u8; f];
        let mut v = vec![false; self.l];

        for (k, &set) in c.iter().enumerate() {
            if !set {
                continue;
            }
            if self.missing_index[k] == 0 {
                store.read(self.slot_addr(k), &mut scratch)?;
                xor_bytes(payload, &scratch);
            } else {
                v[(self.missing_index[k] - 1) as usize] = true;
            }
        }

        if vector_is_null(&v) {
            ringbuf_entry!(RINGBUF, Log::ParityDependent { index: i });
            return Ok(DecoderOutcome::Ongoing);
        }

        let mut first = first_one(&v).unwrap_lite();
        while self.pivots[first] {
            let u = self.matrix.extract_row(first, self.l);
            xor_into(&mut v, &u);

            let k_star = self.slot_of_missing((first + 1) as u32);
            store.read(self.slot_addr(k_star), &mut scratch)?;
            xor_bytes(payload, &scratch);

            if vector_is_null(&v) {
                ringbuf_entry!(RINGBUF, Log::ParityRedundant { index: i });
                return Ok(DecoderOutcome::Ongoing);
            }
            first = first_one(&v).unwrap_lite();
        }

        self.matrix.push_row(&v, first, self.l);
        let k_star = self.slot_of_missing((first + 1) as u32);
        store.program(self.slot_addr(k_star), payload)?;
        self.pivots[first] = true;
        self.m2l += 1;
        ringbuf_entry!(
            RINGBUF,
            Log::PivotAdded {
                index: i,
                pos: first as u32
            }
        );

        if self.m2l == self.l {
            self.back_substitute(store)?;
            ringbuf_entry!(RINGBUF, Log::Complete);
            return Ok(DecoderOutcome::Complete);
        }

        Ok(DecoderOutcome::Ongoing)
    }

    /// §4.3.4: once every pivot has been assigned, recover each originally
    /// missing slot's actual content from the reduced rows stored in it.
    fn back_substitute<S: FlashStore>(
        &mut self,
        store: &mut UnalignedStore<S>,
    ) -> Result<(), StoreError> {
        if self.l < 2 {
            return Ok(());
        }

        let f = self.f as usize;
        let mut scratch = vec![0u8; f];

        for i in (0..self.l - 1).rev() {
            let mut u_i = self.matrix.extract_row(i, self.l);
            let slot_i = self.slot_of_missing((i + 1) as u32);
            let mut data_i = vec![0u8; f];
            store.read(self.slot_addr(slot_i), &mut data_i)?;

            for j in (i + 1..self.l).rev() {
                let u_j = self.matrix.extract_row(j, self.l);
                if u_i[j] {
                    xor_into(&mut u_i, &u_j);
                    self.matrix.push_row(&u_i, i, self.l);

                    let slot_j = self.slot_of_missing((j + 1) as u32);
                    store.read(self.slot_addr(slot_j), &mut scratch)?;
                    xor_bytes(&mut data_i, &scratch);
                }
            }

            store.program(self.slot_addr(slot_i), &data_i)?;
        }

        ringbuf_entry!(
            RINGBUF,
            Log::BackSubstituted {
                l: self.l as u32
            }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec as StdVec;

    struct FakeFlash {
        data: StdVec<u8>,
    }

    impl FakeFlash {
        fn new(size: usize) -> Self {
            Self {
                data: vec![0xFFu8; size],
            }
        }
    }

    impl FlashStore for FakeFlash {
        fn read_size(&self) -> u32 {
            8
        }
        fn erase_size(&self) -> u32 {
            8
        }
        fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), StoreError> {
            let addr = addr as usize;
            buf.copy_from_slice(&self.data[addr..addr + buf.len()]);
            Ok(())
        }
        fn program(&mut self, addr: u32, buf: &[u8]) -> Result<(), StoreError> {
            let addr = addr as usize;
            self.data[addr..addr + buf.len()].copy_from_slice(buf);
            Ok(())
        }
        fn erase(&mut self, addr: u32, len: u32) -> Result<(), StoreError> {
            let addr = addr as usize;
            let len = len as usize;
            for b in &mut self.data[addr..addr + len] {
                *b = 0xFF;
            }
            Ok(())
        }
    }

    fn xor_frag(a: &[u8], b: &[u8]) -> StdVec<u8> {
        a.iter().zip(b).map(|(x, y)| x ^ y).collect()
    }

    #[test]
    fn s1_in_order_data_only() {
        let flash = FakeFlash::new(64);
        let mut store = UnalignedStore::init(flash).unwrap();
        store.erase(0, 32).unwrap();

        let frags: [&[u8]; 4] = [
            &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08],
            &[0x09, 0x0A, 0x09, 0x0A, 0x09, 0x0A, 0x09, 0x0A],
            &[0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18],
            &[0x19, 0x1A, 0x19, 0x1A, 0x19, 0x1A, 0x19, 0x1A],
        ];

        let mut dec = Decoder::new(4, 8, 0);
        let mut outcome = DecoderOutcome::Ongoing;
        for (idx, frag) in frags.iter().enumerate() {
            outcome = dec.process_data(&mut store, (idx + 1) as u32, frag).unwrap();
        }
        assert_eq!(outcome, DecoderOutcome::Complete);

        let mut out = [0u8; 32];
        store.read(0, &mut out).unwrap();
        let expected: StdVec<u8> = frags.concat();
        assert_eq!(&out[..], &expected[..]);
    }

    #[test]
    fn s2_recovers_two_dropped_fragments() {
        let flash = FakeFlash::new(64);
        let mut store = UnalignedStore::init(flash).unwrap();
        store.erase(0, 32).unwrap();

        let f1 = [0x01u8, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let f2 = [0x09u8, 0x0A, 0x09, 0x0A, 0x09, 0x0A, 0x09, 0x0A];
        let f3 = [0x11u8, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18];
        let f4 = [0x19u8, 0x1A, 0x19, 0x1A, 0x19, 0x1A, 0x19, 0x1A];

        let p1 = xor_frag(&f1, &f2);
        let p2 = xor_frag(&xor_frag(&f2, &f3), &f4);

        let mut dec = Decoder::new(4, 8, 0);
        dec.process_data(&mut store, 1, &f1).unwrap();
        dec.process_data(&mut store, 3, &f3).unwrap();

        let mut p1buf = p1.clone();
        let r1 = dec.process_parity(&mut store, 5, &mut p1buf).unwrap();

        let mut p2buf = p2.clone();
        let r2 = dec.process_parity(&mut store, 6, &mut p2buf).unwrap();

        assert!(matches!(r1, DecoderOutcome::Ongoing) || matches!(r1, DecoderOutcome::Complete));
        assert_eq!(r2, DecoderOutcome::Complete);

        let mut out = [0u8; 32];
        store.read(0, &mut out).unwrap();
        assert_eq!(&out[0..8], &f1[..]);
        assert_eq!(&out[8..16], &f2[..]);
        assert_eq!(&out[16..24], &f3[..]);
        assert_eq!(&out[24..32], &f4[..]);
    }

    #[test]
    fn s4_incomplete_session_reports_loss() {
        let flash = FakeFlash::new(32);
        let mut store = UnalignedStore::init(flash).unwrap();
        store.erase(0, 32).unwrap();

        let mut dec = Decoder::new(8, 4, 0);
        let frag = [0xAAu8, 0xBB, 0xCC, 0xDD];
        let mut last = DecoderOutcome::Ongoing;
        for idx in [1u32, 2, 3, 4, 5, 6, 8] {
            last = dec.process_data(&mut store, idx, &frag).unwrap();
        }
        assert_eq!(last, DecoderOutcome::Ongoing);
        assert_eq!(dec.lost_count(), 1);
    }
}
