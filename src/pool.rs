//! User-space buffer pool and the conversion scratch buffer.
//!
//! The pool is an arena of equally sized, page-aligned blocks addressed by
//! index. It is populated in one step and released in one step: a failed
//! allocation never leaves a partial pool behind.

#![allow(unsafe_code)]

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use log::{debug, error};

use crate::error::{CameraError, Result};

/// Fallback when the system page size cannot be queried.
const DEFAULT_PAGE_SIZE: usize = 4096;

/// System memory page size in bytes.
pub fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size)
        .ok()
        .filter(|size| *size > 0)
        .unwrap_or(DEFAULT_PAGE_SIZE)
}

/// Smallest multiple of `page` that is at least `size`.
#[must_use]
pub const fn round_up_to_page(size: usize, page: usize) -> usize {
    size.div_ceil(page) * page
}

/// One zero-initialised heap block with a fixed alignment.
pub struct AlignedBlock {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the block exclusively owns its allocation.
unsafe impl Send for AlignedBlock {}

impl AlignedBlock {
    /// Allocate `len` bytes aligned to `align`. Returns `None` on failure.
    pub fn new(len: usize, align: usize) -> Option<Self> {
        if len == 0 {
            return None;
        }
        let layout = Layout::from_size_align(len, align).ok()?;
        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        NonNull::new(ptr).map(|ptr| Self { ptr, layout })
    }

    /// Length in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.layout.size()
    }

    /// Always false; zero-sized blocks are never created.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    /// Start address of the block.
    #[must_use]
    pub fn address(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Block contents.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr points to layout.size() initialised bytes owned by self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    /// Mutable block contents.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }
}

impl Drop for AlignedBlock {
    fn drop(&mut self) {
        // SAFETY: ptr was returned by alloc_zeroed with this layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl std::fmt::Debug for AlignedBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBlock")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("len", &self.len())
            .finish()
    }
}

/// Source of pool blocks.
pub trait BlockAllocator {
    /// Allocate one block, or `None` if memory is unavailable.
    fn allocate(&mut self, len: usize, align: usize) -> Option<AlignedBlock>;
}

/// Allocates from the global heap.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl BlockAllocator for SystemAllocator {
    fn allocate(&mut self, len: usize, align: usize) -> Option<AlignedBlock> {
        AlignedBlock::new(len, align)
    }
}

/// Fixed-count pool of page-aligned capture buffers.
#[derive(Debug, Default)]
pub struct BufferPool {
    blocks: Vec<AlignedBlock>,
    buffer_len: usize,
}

impl BufferPool {
    /// Create an empty pool.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            blocks: Vec::new(),
            buffer_len: 0,
        }
    }

    /// Allocate `count` buffers of at least `requested_size` bytes each.
    pub fn allocate(&mut self, count: u32, requested_size: usize) -> Result<()> {
        self.allocate_with(count, requested_size, page_size(), &mut SystemAllocator)
    }

    /// Allocate using a specific page size and allocator.
    ///
    /// Either all `count` buffers are allocated or none are kept.
    pub fn allocate_with<A: BlockAllocator>(
        &mut self,
        count: u32,
        requested_size: usize,
        page: usize,
        allocator: &mut A,
    ) -> Result<()> {
        debug!("allocate pool count:{count} size:{requested_size}");

        if count == 0 || requested_size == 0 {
            return Err(CameraError::BufferAllocation(format!(
                "invalid request count:{count} size:{requested_size}"
            )));
        }
        if !self.blocks.is_empty() {
            return Err(CameraError::BufferAllocation(
                "pool already allocated".to_owned(),
            ));
        }

        let buffer_len = round_up_to_page(requested_size, page);
        debug!("pagesize={page} buffer_len={buffer_len}");

        let mut blocks = Vec::with_capacity(count as usize);
        for index in 0..count {
            let Some(block) = allocator.allocate(buffer_len, page) else {
                error!("aligned allocation {index} of {count} failed");
                // Blocks allocated so far are released with `blocks`.
                return Err(CameraError::BufferAllocation(format!(
                    "buffer {index} of {count} ({buffer_len} bytes)"
                )));
            };
            blocks.push(block);
        }

        self.blocks = blocks;
        self.buffer_len = buffer_len;
        Ok(())
    }

    /// Release every buffer. Does nothing on an empty pool.
    pub fn free(&mut self) {
        if self.blocks.is_empty() {
            return;
        }
        debug!("free pool count:{}", self.blocks.len());
        self.blocks.clear();
        self.buffer_len = 0;
    }

    /// Number of buffers held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the pool holds no buffers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Page-aligned length shared by every buffer.
    #[must_use]
    pub const fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    /// Contents of buffer `index`.
    #[must_use]
    pub fn buffer(&self, index: usize) -> Option<&[u8]> {
        self.blocks.get(index).map(AlignedBlock::as_slice)
    }

    /// Mutable contents of buffer `index`.
    pub fn buffer_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        self.blocks.get_mut(index).map(AlignedBlock::as_mut_slice)
    }

    /// Start address of buffer `index`.
    #[must_use]
    pub fn address(&self, index: usize) -> Option<usize> {
        self.blocks.get(index).map(AlignedBlock::address)
    }

    /// Iterate over `(index, buffer)` pairs.
    pub fn buffers_mut(&mut self) -> impl Iterator<Item = (u32, &mut [u8])> {
        (0u32..)
            .zip(self.blocks.iter_mut())
            .map(|(index, block)| (index, block.as_mut_slice()))
    }
}

/// Single output buffer used when a frame needs conversion.
///
/// Allocated on first use and resized in place when the output
/// dimensions or format change.
#[derive(Debug, Default)]
pub struct ScratchBuffer {
    data: Option<Vec<u8>>,
}

impl ScratchBuffer {
    /// Make sure the buffer holds exactly `len` bytes.
    pub fn ensure(&mut self, len: usize) -> &mut [u8] {
        let data = self.data.get_or_insert_with(|| {
            debug!("allocate scratch buffer {len} bytes");
            Vec::new()
        });
        if data.len() != len {
            data.resize(len, 0);
        }
        data
    }

    /// Current contents; empty before the first conversion.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        self.data.as_deref().unwrap_or_default()
    }
}
