// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Orchestrates one fragmentation session: validates setup parameters, erases
//! the image region once, and routes each incoming frame to [`crate::decoder`]
//! for data handling or parity reduction.
//!
//! [`Session`] is the only thing a FUOTA command layer needs to drive; it owns
//! the [`UnalignedStore`] exclusively for its lifetime, the way the teacher's
//! update servers own their flash handle for the life of one update.

use ringbuf::ringbuf_entry;

use crate::decoder::{Decoder, DecoderOutcome};
use crate::error::{FrameOutcome, SessionError};
use crate::flash::{FlashStore, UnalignedStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Log {
    Empty,
    Initialized { n: u16, f: u16, r: u16 },
    SizeRejected { index: u32, len: u32 },
    Failed { index: u32 },
    IgnoredAfterComplete { index: u32 },
}

ringbuf::ringbuf!(RINGBUF, Log, 32, Log::Empty);

/// Session setup parameters, fixed for the lifetime of a [`Session`].
///
/// Supplied by the upper FUOTA command layer that parses the fragmentation
/// session-setup packet; this crate does not parse wire bytes itself (§6).
#[derive(Debug, Clone, Copy)]
pub struct SessionOpts {
    /// Number of uncoded fragments.
    pub n: u16,
    /// Fragment size in bytes.
    pub f: u16,
    /// Padding bytes after the last uncoded fragment. Not consumed by the
    /// decoder directly; carried through for callers that need to trim the
    /// final fragment once reconstruction completes.
    pub p: u16,
    /// Maximum number of parity fragments the sender may transmit.
    pub r: u16,
    /// Byte offset at which the image begins in the underlying store.
    pub flash_offset: u32,
}

impl SessionOpts {
    fn validate(&self) -> Result<(), SessionError> {
        if self.n == 0 || self.f == 0 {
            return Err(SessionError::InvalidParameters);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    Running,
    Completed,
    Failed,
}

/// Per-session state machine: owns the [`Decoder`] and the exclusive
/// [`UnalignedStore`] borrow, and turns a stream of `(index, payload)` frames
/// into a reconstructed image.
pub struct Session<S: FlashStore> {
    opts: SessionOpts,
    store: UnalignedStore<S>,
    decoder: Decoder,
    state: State,
    received: u32,
}

impl<S: FlashStore> Session<S> {
    /// Validates `opts` and wraps `flash` in an [`UnalignedStore`].
    ///
    /// Returns a fully-valid `Session` or an error; there is no
    /// partially-initialized state for a caller to observe (§9).
    pub fn new(flash: S, opts: SessionOpts) -> Result<Self, SessionError> {
        opts.validate()?;
        let store = UnalignedStore::init(flash).map_err(SessionError::from)?;
        let decoder = Decoder::new(opts.n, opts.f, opts.flash_offset);

        Ok(Self {
            opts,
            store,
            decoder,
            state: State::Init,
            received: 0,
        })
    }

    /// Erases the image region and moves the session from `Init` to
    /// `Running`. Must be called exactly once before the first
    /// [`Session::process_frame`] call.
    pub fn initialize(&mut self) -> Result<(), SessionError> {
        let len = (self.opts.n as u32) * (self.opts.f as u32);
        self.store
            .erase(self.opts.flash_offset, len)
            .map_err(SessionError::from)?;

        self.state = State::Running;
        ringbuf_entry!(
            RINGBUF,
            Log::Initialized {
                n: self.opts.n,
                f: self.opts.f,
                r: self.opts.r,
            }
        );
        Ok(())
    }

    /// Feeds one frame into the session.
    ///
    /// `index` is 1-based: `1..=N` routes to data handling, `N+1..=N+R`
    /// routes to parity reduction. An index outside `1..=N+R` is outside the
    /// session's agreed frame space (§6) and is ignored rather than routed to
    /// the decoder. Once the session has reported `Complete`, further frames
    /// are silently ignored and return `Ok`.
    pub fn process_frame(
        &mut self,
        index: u32,
        payload: &[u8],
    ) -> Result<FrameOutcome, SessionError> {
        if payload.len() != self.opts.f as usize {
            ringbuf_entry!(
                RINGBUF,
                Log::SizeRejected {
                    index,
                    len: payload.len() as u32,
                }
            );
            return Err(SessionError::SizeIncorrect);
        }

        match self.state {
            State::Completed => {
                ringbuf_entry!(RINGBUF, Log::IgnoredAfterComplete { index });
                return Ok(FrameOutcome::Complete);
            }
            State::Failed => return Err(SessionError::FlashWriteError),
            State::Init | State::Running => {}
        }

        let n = self.opts.n as u32;
        let max_index = n + self.opts.r as u32;
        if index == 0 || index > max_index {
            return Ok(FrameOutcome::Ok);
        }

        self.received += 1;

        let outcome = if index <= n {
            self.decoder.process_data(&mut self.store, index, payload)
        } else {
            let mut buf = alloc::vec::Vec::from(payload);
            self.decoder.process_parity(&mut self.store, index, &mut buf)
        };

        match outcome {
            Ok(DecoderOutcome::Ongoing) => Ok(FrameOutcome::Ok),
            Ok(DecoderOutcome::Complete) => {
                self.state = State::Completed;
                Ok(FrameOutcome::Complete)
            }
            Err(e) => {
                self.state = State::Failed;
                ringbuf_entry!(RINGBUF, Log::Failed { index });
                Err(SessionError::from(e))
            }
        }
    }

    /// Total number of frames routed to the decoder via
    /// [`Session::process_frame`], excluding frames rejected for bad size and
    /// frames ignored post-Complete.
    ///
    /// Saturates at `u16::MAX` rather than wrapping; a session receiving more
    /// than 65535 frames has long since either completed or been abandoned.
    pub fn received_count(&self) -> u16 {
        self.received.try_into().unwrap_or(u16::MAX)
    }

    /// Number of image slots currently known to be missing.
    pub fn lost_count(&self) -> u32 {
        self.decoder.lost_count()
    }

    /// Gives back the wrapped store, e.g. so [`crate::integrity`] can stream
    /// the reconstructed image once this session reports `Complete`.
    pub fn into_store(self) -> UnalignedStore<S> {
        self.store
    }
}
