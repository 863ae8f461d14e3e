// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error taxonomy for the flash store and the fragmentation session.
//!
//! Discriminants are appended, never reordered: a session's `Failed` state
//! carries one of these across the same boundary a FUOTA client uses to
//! report status upstream, so changing existing values would be a protocol
//! break the same way reordering `drv_update_api::UpdateError` would be.

/// Errors raised by [`crate::flash::UnalignedStore`] and the `FlashStore`
/// implementations it wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum StoreError {
    /// The store was used before a successful `init()`.
    Uninitialised = 1,
    /// The page buffer (or another session buffer) could not be allocated.
    NoMemory,
    /// `erase()` was called with an address that isn't erase-block aligned.
    UnalignedErase,
    /// The underlying `FlashStore` reported a read failure.
    ReadFailed,
    /// The underlying `FlashStore` reported a program failure.
    ProgramFailed,
    /// The underlying `FlashStore` reported an erase failure.
    EraseFailed,
}

/// Errors and non-error outcomes produced by [`crate::session::Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SessionError {
    /// `N` or `F` was zero, or some other session parameter was out of range.
    InvalidParameters = 1,
    /// A frame's payload length did not equal `F`. Recoverable; the session
    /// continues.
    SizeIncorrect,
    /// A read, program, or erase against the underlying store failed. Fatal
    /// for the session.
    FlashWriteError,
    /// Initial allocation of session buffers failed. The session is unusable.
    NoMemory,
}

impl From<StoreError> for SessionError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NoMemory => SessionError::NoMemory,
            StoreError::Uninitialised
            | StoreError::UnalignedErase
            | StoreError::ReadFailed
            | StoreError::ProgramFailed
            | StoreError::EraseFailed => SessionError::FlashWriteError,
        }
    }
}

/// Outcome of feeding one frame to a [`crate::session::Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was processed; the session is not yet complete.
    Ok,
    /// The frame was processed and completed reconstruction of the image.
    Complete,
}
