//! Native storage backing one or more matrix handles
//!
//! A [`BufferOwner`] is the only place matrix memory is allocated or freed.
//! Handles never hold it directly; they hold a [`BufferRef`], a counted
//! reference whose last release drops the owner and, for owned storage,
//! frees the memory. Because the count lives in an `Arc`, a buffer can only
//! be freed once: there is no way to release a reference twice.

use std::ptr::NonNull;
use std::sync::Arc;

use matbind_core::{checked_byte_len, validate_alignment, ElementType, Layout, MatError, Result};
#[cfg(feature = "mmap")]
use memmap2::MmapMut;
use parking_lot::RwLock;

use crate::ledger::MemoryLedger;

/// Caller-owned memory the buffer reads and writes but never frees
struct ExternalRegion {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: ExternalRegion is safe to Send and share between threads because:
// 1. The caller of `BufferOwner::wrap` guarantees the memory outlives the owner
// 2. Every access goes through the owner's RwLock, so writers are exclusive
// 3. The region itself has no thread affinity
unsafe impl Send for ExternalRegion {}
unsafe impl Sync for ExternalRegion {}

enum Storage {
    /// Zeroed words; `u64` backing keeps every element type aligned
    Owned { words: Box<[u64]>, len: usize },
    External(ExternalRegion),
    #[cfg(feature = "mmap")]
    Mapped(MmapMut),
}

impl Storage {
    fn bytes(&self) -> &[u8] {
        match self {
            Storage::Owned { words, len } => &bytemuck::cast_slice::<u64, u8>(words)[..*len],
            // SAFETY: ptr/len validated at wrap time, caller keeps the memory alive
            Storage::External(region) => unsafe {
                std::slice::from_raw_parts(region.ptr.as_ptr(), region.len)
            },
            #[cfg(feature = "mmap")]
            Storage::Mapped(map) => &map[..],
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match self {
            Storage::Owned { words, len } => {
                &mut bytemuck::cast_slice_mut::<u64, u8>(words)[..*len]
            }
            // SAFETY: as above; &mut self plus the RwLock write guard give exclusivity
            Storage::External(region) => unsafe {
                std::slice::from_raw_parts_mut(region.ptr.as_ptr(), region.len)
            },
            #[cfg(feature = "mmap")]
            Storage::Mapped(map) => &mut map[..],
        }
    }
}

/// Contiguous native memory plus the layout it was created with
pub struct BufferOwner {
    id: u64,
    layout: Layout,
    byte_len: usize,
    owned: bool,
    storage: RwLock<Storage>,
    ledger: Arc<MemoryLedger>,
}

impl BufferOwner {
    /// Allocate zero-initialised storage for a packed `rows x cols` matrix
    ///
    /// Fails with an allocation error when the size overflows or exceeds the
    /// ledger's per-request limit.
    pub fn allocate(
        rows: usize,
        cols: usize,
        elem: ElementType,
        ledger: &Arc<MemoryLedger>,
    ) -> Result<BufferRef> {
        let byte_len = checked_byte_len(rows, cols, elem)?;
        let limit = ledger.allocation_limit();
        if byte_len > limit {
            return Err(MatError::AllocationLimit {
                requested: byte_len,
                limit,
            });
        }
        let layout = Layout::packed(rows, cols, elem)?;
        let words = vec![0u64; byte_len.div_ceil(8)].into_boxed_slice();
        let id = ledger.record_allocation(byte_len);
        tracing::trace!(buffer = id, rows, cols, %elem, bytes = byte_len, "allocated buffer");

        Ok(BufferRef(Arc::new(Self {
            id,
            layout,
            byte_len,
            owned: true,
            storage: RwLock::new(Storage::Owned {
                words,
                len: byte_len,
            }),
            ledger: Arc::clone(ledger),
        })))
    }

    /// Reference caller-owned memory without taking over its deallocation
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes for as long as
    /// any [`BufferRef`] (and therefore any matrix handle) built on it is
    /// alive, and nothing else may access the memory while a handle writes.
    pub unsafe fn wrap(
        ptr: *mut u8,
        len: usize,
        rows: usize,
        cols: usize,
        elem: ElementType,
        stride: usize,
        ledger: &Arc<MemoryLedger>,
    ) -> Result<BufferRef> {
        let ptr = NonNull::new(ptr).ok_or(MatError::PointerMisaligned { align: elem.align() })?;
        validate_alignment(ptr.as_ptr(), elem)?;
        let layout = Layout::strided(rows, cols, elem, stride)?;
        layout.check_fits(0, len)?;
        Ok(Self::external(
            layout,
            len,
            Storage::External(ExternalRegion { ptr, len }),
            ledger,
        ))
    }

    /// Reference a writable memory map; the map stays alive inside the owner
    #[cfg(feature = "mmap")]
    pub fn wrap_mmap(
        map: MmapMut,
        rows: usize,
        cols: usize,
        elem: ElementType,
        stride: usize,
        ledger: &Arc<MemoryLedger>,
    ) -> Result<BufferRef> {
        validate_alignment(map.as_ptr(), elem)?;
        let layout = Layout::strided(rows, cols, elem, stride)?;
        let len = map.len();
        layout.check_fits(0, len)?;
        Ok(Self::external(layout, len, Storage::Mapped(map), ledger))
    }

    fn external(
        layout: Layout,
        byte_len: usize,
        storage: Storage,
        ledger: &Arc<MemoryLedger>,
    ) -> BufferRef {
        let id = ledger.record_wrap();
        tracing::trace!(
            buffer = id,
            rows = layout.rows,
            cols = layout.cols,
            stride = layout.stride,
            "wrapped external buffer"
        );
        BufferRef(Arc::new(Self {
            id,
            layout,
            byte_len,
            owned: false,
            storage: RwLock::new(storage),
            ledger: Arc::clone(ledger),
        }))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Layout the buffer was created with
    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn elem_type(&self) -> ElementType {
        self.layout.elem
    }

    /// Bytes addressable through this buffer
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    /// Ledger this buffer reports to; copies are accounted to the same one
    pub fn ledger(&self) -> &Arc<MemoryLedger> {
        &self.ledger
    }

    /// False for wrapped memory the buffer will not free
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Run `f` over the raw bytes with shared access
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let storage = self.storage.read();
        f(storage.bytes())
    }

    /// Run `f` over the raw bytes with exclusive access
    pub fn write<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut storage = self.storage.write();
        f(storage.bytes_mut())
    }
}

impl Drop for BufferOwner {
    fn drop(&mut self) {
        // storage itself is dropped right after this, freeing owned words
        if self.owned {
            self.ledger.record_deallocation(self.byte_len);
            tracing::trace!(buffer = self.id, bytes = self.byte_len, "freed buffer");
        } else {
            self.ledger.record_unwrap();
            tracing::trace!(buffer = self.id, "released external buffer");
        }
    }
}

impl std::fmt::Debug for BufferOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferOwner")
            .field("id", &self.id)
            .field("layout", &self.layout)
            .field("byte_len", &self.byte_len)
            .field("owned", &self.owned)
            .finish()
    }
}

/// Counted reference to a [`BufferOwner`]
#[derive(Debug)]
pub struct BufferRef(Arc<BufferOwner>);

impl BufferRef {
    /// Take another reference to the same buffer
    pub fn retain(&self) -> BufferRef {
        BufferRef(Arc::clone(&self.0))
    }

    /// Give this reference up; the last release frees the buffer
    pub fn release(self) {
        drop(self)
    }

    /// Number of live references, this one included
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// True when both references point at the same buffer
    pub fn same_buffer(&self, other: &BufferRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::ops::Deref for BufferRef {
    type Target = BufferOwner;

    fn deref(&self) -> &BufferOwner {
        &self.0
    }
}
