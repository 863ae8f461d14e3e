// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Byte-addressable access over a page/erase-aligned flash device.

use alloc::vec;
use alloc::vec::Vec;

use ringbuf::ringbuf_entry;
use static_assertions::const_assert;

use crate::error::StoreError;

/// AT45-style devices report a smaller binary-mode page that is really laid
/// out as 528 bytes on the wire; promoting the page size to 528 lets a single
/// page buffer hold a whole physical page instead of splitting writes across
/// two.
const AT45_PAGE_SIZE: u32 = 528;
const_assert!(AT45_PAGE_SIZE > 0);
const_assert!(AT45_PAGE_SIZE % 16 == 0);

/// Below this, a reported read size isn't a real flash page geometry — no
/// genuine NOR or AT45 part reports a read granularity of a few bytes — so
/// promotion is skipped rather than risk reading past a small device.
const AT45_PROMOTION_MIN_READ_SIZE: u32 = 128;

/// A page-aligned, sector-erasable block device.
///
/// Implementors back real SPI NOR or AT45 parts on target, and an in-memory
/// buffer in host-side tests. [`UnalignedStore`] is the only consumer; it
/// never assumes anything about the medium beyond these four operations.
pub trait FlashStore {
    /// Size, in bytes, of one row (the unit [`FlashStore::read`] and
    /// [`FlashStore::program`] operate on efficiently).
    fn read_size(&self) -> u32;

    /// Size, in bytes, of one erase block. Always a multiple of
    /// [`FlashStore::read_size`].
    fn erase_size(&self) -> u32;

    /// Reads `buf.len()` bytes starting at `addr`.
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), StoreError>;

    /// Programs `buf` at `addr`. The target range must already be erased.
    fn program(&mut self, addr: u32, buf: &[u8]) -> Result<(), StoreError>;

    /// Erases `len` bytes starting at `addr`. Both must be multiples of
    /// [`FlashStore::erase_size`].
    fn erase(&mut self, addr: u32, len: u32) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Log {
    Empty,
    Init { page_size: u32 },
    PageMiss { page: u32 },
    Erase { addr: u32, len: u32 },
}

ringbuf::ringbuf!(RINGBUF, Log, 32, Log::Empty);

/// Turns a page-aligned [`FlashStore`] into a byte-granular read/program
/// interface, backed by a single page-sized read-modify-write cache.
///
/// Byte-granular `program` is only safe within a region that is monotonically
/// filled after a single erase: this type never erases-before-program on your
/// behalf. Callers (in this crate, [`crate::session::Session`]) are
/// responsible for erasing the target region once up front.
pub struct UnalignedStore<S: FlashStore> {
    store: S,
    page_size: u32,
    page_buf: Vec<u8>,
    last_page: Option<u32>,
}

impl<S: FlashStore> UnalignedStore<S> {
    /// Queries `store`'s geometry and allocates the one page-sized buffer
    /// this store will use for the rest of its life.
    pub fn init(store: S) -> Result<Self, StoreError> {
        let read_size = store.read_size();
        let page_size = if read_size >= AT45_PROMOTION_MIN_READ_SIZE
            && read_size < AT45_PAGE_SIZE
            && AT45_PAGE_SIZE % read_size == 0
        {
            AT45_PAGE_SIZE
        } else {
            read_size
        };

        if page_size == 0 {
            return Err(StoreError::Uninitialised);
        }

        ringbuf_entry!(RINGBUF, Log::Init { page_size });

        Ok(Self {
            store,
            page_size,
            page_buf: vec![0u8; page_size as usize],
            last_page: None,
        })
    }

    /// The page size this store settled on during `init`.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    fn page_of(&self, addr: u32) -> u32 {
        addr / self.page_size
    }

    fn fill_page(&mut self, page: u32) -> Result<(), StoreError> {
        if self.last_page == Some(page) {
            return Ok(());
        }
        ringbuf_entry!(RINGBUF, Log::PageMiss { page });
        self.store
            .read(page * self.page_size, &mut self.page_buf)?;
        self.last_page = Some(page);
        Ok(())
    }

    /// Reads `dst.len()` bytes starting at `addr`, splitting the request
    /// across pages and serving each page from the RMW cache.
    pub fn read(&mut self, addr: u32, dst: &mut [u8]) -> Result<(), StoreError> {
        let mut addr = addr;
        let mut remaining = dst;

        while !remaining.is_empty() {
            let page = self.page_of(addr);
            self.fill_page(page)?;

            let page_off = (addr % self.page_size) as usize;
            let n = remaining.len().min(self.page_size as usize - page_off);
            remaining[..n].copy_from_slice(&self.page_buf[page_off..page_off + n]);

            addr += n as u32;
            remaining = &mut remaining[n..];
        }

        Ok(())
    }

    /// Programs `src` starting at `addr`, merging each affected page through
    /// the RMW cache and writing the whole page back.
    pub fn program(&mut self, addr: u32, src: &[u8]) -> Result<(), StoreError> {
        let mut addr = addr;
        let mut remaining = src;

        while !remaining.is_empty() {
            let page = self.page_of(addr);
            self.fill_page(page)?;

            let page_off = (addr % self.page_size) as usize;
            let n = remaining.len().min(self.page_size as usize - page_off);
            self.page_buf[page_off..page_off + n].copy_from_slice(&remaining[..n]);

            self.store.program(page * self.page_size, &self.page_buf)?;
            self.last_page = Some(page);

            addr += n as u32;
            remaining = &remaining[n..];
        }

        Ok(())
    }

    /// Erases `[addr, addr + len)`, rounding `len` up to a whole number of
    /// erase blocks. `addr` must already be erase-block aligned.
    pub fn erase(&mut self, addr: u32, len: u32) -> Result<(), StoreError> {
        let erase_size = self.store.erase_size();
        if addr % erase_size != 0 {
            return Err(StoreError::UnalignedErase);
        }

        let rounded = len.div_ceil(erase_size) * erase_size;
        ringbuf_entry!(
            RINGBUF,
            Log::Erase {
                addr,
                len: rounded
            }
        );

        self.store.erase(addr, rounded)?;

        if let Some(page) = self.last_page {
            let page_addr = page * self.page_size;
            if page_addr >= addr && page_addr < addr + rounded {
                self.last_page = None;
            }
        }

        Ok(())
    }
}
