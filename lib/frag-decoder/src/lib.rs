// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Flash-backed FEC decoder for LoRaWAN fragmented data-block transport.
//!
//! A sender splits an image into `N` fixed-size fragments and appends up to
//! `R` XOR-coded parity fragments. This crate reassembles the image on a
//! receiver that sees any `N` of the `N + R` fragments, in any order,
//! performing the Gaussian elimination over GF(2) in place against a
//! byte-addressable flash store rather than in RAM.
//!
//! [`session::Session`] is the entry point: it owns a [`decoder::Decoder`]
//! and a [`flash::UnalignedStore`], and turns a stream of `(index, payload)`
//! frames into a reconstructed image. [`integrity`] verifies the result once
//! the session reports completion.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod decoder;
pub mod error;
pub mod flash;
pub mod integrity;
pub mod matrix;
pub mod parity;
pub mod session;

pub use error::{FrameOutcome, SessionError, StoreError};
pub use flash::{FlashStore, UnalignedStore};
pub use session::{Session, SessionOpts};
