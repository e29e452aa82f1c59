//! The host-visible matrix object
//!
//! A [`MatHandle`] is a bounds-checked window onto a [`BufferOwner`]: a byte
//! offset plus its own layout. Views share the owner through a retained
//! [`BufferRef`]; copies allocate a new owner. Every element access is
//! checked against the handle's shape, never the owner's full extent.

use std::sync::Arc;

use matbind_core::{with_element, ElementType, Layout, MatError, MatrixElement, Result, Scalar};

use crate::buffer::{BufferOwner, BufferRef};
use crate::ledger::MemoryLedger;
use crate::worker::MatSnapshot;

/// Serialisable description of a handle, used by host-side inspection
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MatInfo {
    pub rows: usize,
    pub cols: usize,
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub elem_type: ElementType,
    pub continuous: bool,
    /// Byte offset into the shared buffer
    pub offset: usize,
    /// References held on the buffer, this handle's included
    pub buffer_refs: usize,
    /// False for wrapped external memory
    pub owned: bool,
}

/// Matrix handle: shared or exclusive reference to native storage
#[derive(Debug)]
pub struct MatHandle {
    owner: Option<BufferRef>,
    offset: usize,
    layout: Layout,
}

impl MatHandle {
    /// Element type reported by handles that hold no buffer
    pub const EMPTY_ELEMENT_TYPE: ElementType = ElementType::U8;

    /// Zero-shape handle without storage
    pub fn empty() -> Self {
        Self {
            owner: None,
            offset: 0,
            layout: Layout::empty(Self::EMPTY_ELEMENT_TYPE),
        }
    }

    /// Allocate a zero-filled `rows x cols` matrix
    pub fn new(
        rows: usize,
        cols: usize,
        elem: ElementType,
        ledger: &Arc<MemoryLedger>,
    ) -> Result<Self> {
        let owner = BufferOwner::allocate(rows, cols, elem, ledger)?;
        Ok(Self::from_buffer(owner))
    }

    /// Handle spanning the whole layout a buffer was created with
    pub fn from_buffer(owner: BufferRef) -> Self {
        let layout = owner.layout();
        Self {
            owner: Some(owner),
            offset: 0,
            layout,
        }
    }

    /// Build a matrix from row-major values
    pub fn from_scalars(
        rows: usize,
        cols: usize,
        elem: ElementType,
        values: &[Scalar],
        ledger: &Arc<MemoryLedger>,
    ) -> Result<Self> {
        let count = rows.checked_mul(cols).ok_or(MatError::SizeOverflow)?;
        if values.len() != count {
            return Err(MatError::ValueCountMismatch {
                expected: count,
                actual: values.len(),
            });
        }
        let mat = Self::new(rows, cols, elem, ledger)?;
        if let Some(owner) = &mat.owner {
            owner.write(|bytes| encode_all(elem, values, bytes))?;
        }
        Ok(mat)
    }

    pub fn rows(&self) -> usize {
        self.layout.rows
    }

    pub fn cols(&self) -> usize {
        self.layout.cols
    }

    pub fn elem_type(&self) -> ElementType {
        self.layout.elem
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.layout.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.is_empty()
    }

    pub fn is_continuous(&self) -> bool {
        self.layout.is_continuous()
    }

    /// False once the handle has been released
    pub fn is_live(&self) -> bool {
        self.owner.is_some()
    }

    pub fn buffer(&self) -> Option<&BufferRef> {
        self.owner.as_ref()
    }

    /// True when both handles are backed by the same buffer
    pub fn shares_buffer_with(&self, other: &MatHandle) -> bool {
        match (&self.owner, &other.owner) {
            (Some(a), Some(b)) => a.same_buffer(b),
            _ => false,
        }
    }

    pub fn info(&self) -> MatInfo {
        MatInfo {
            rows: self.rows(),
            cols: self.cols(),
            elem_type: self.elem_type(),
            continuous: self.is_continuous(),
            offset: self.offset,
            buffer_refs: self.owner.as_ref().map_or(0, BufferRef::ref_count),
            owned: self.owner.as_ref().map_or(true, |owner| owner.is_owned()),
        }
    }

    /// Element at `(row, col)`
    pub fn get(&self, row: usize, col: usize) -> Result<Scalar> {
        let (owner, at) = self.locate(row, col)?;
        let elem = self.elem_type();
        Ok(owner.read(|bytes| decode(elem, &bytes[at..at + elem.size_bytes()])))
    }

    /// Store `value` at `(row, col)`, rejecting lossy narrowing
    pub fn set(&mut self, row: usize, col: usize, value: Scalar) -> Result<()> {
        let (owner, at) = self.locate(row, col)?;
        let elem = self.elem_type();
        owner.write(|bytes| encode(elem, value, &mut bytes[at..at + elem.size_bytes()]))
    }

    /// Write `value` into every element of this handle's region
    pub fn fill(&mut self, value: Scalar) -> Result<()> {
        let Some(owner) = &self.owner else {
            return Ok(());
        };
        let elem = self.elem_type();
        let size = elem.size_bytes();
        // encode once so a rejected value leaves the region untouched
        let mut pattern = [0u8; 8];
        encode(elem, value, &mut pattern[..size])?;
        let layout = self.layout;
        let offset = self.offset;
        owner.write(|bytes| {
            for range in layout.row_ranges(offset) {
                for slot in bytes[range].chunks_exact_mut(size) {
                    slot.copy_from_slice(&pattern[..size]);
                }
            }
        });
        Ok(())
    }

    /// All elements in row-major order
    pub fn to_vec(&self) -> Vec<Scalar> {
        let Some(owner) = &self.owner else {
            return Vec::new();
        };
        let elem = self.elem_type();
        let size = elem.size_bytes();
        owner.read(|bytes| {
            self.layout
                .row_ranges(self.offset)
                .flat_map(|range| bytes[range].chunks_exact(size))
                .map(|slot| decode(elem, slot))
                .collect()
        })
    }

    /// Reinterpret the same elements under a new shape
    ///
    /// Succeeds only when the element count is unchanged. Storage is not
    /// touched, so row-major index `i` maps to the same slot before and
    /// after.
    pub fn reshape(&mut self, new_rows: usize, new_cols: usize) -> Result<()> {
        let mismatch = MatError::ShapeMismatch {
            rows: self.rows(),
            cols: self.cols(),
            new_rows,
            new_cols,
        };
        let count = new_rows.checked_mul(new_cols).ok_or(mismatch)?;
        if count != self.len() {
            return Err(mismatch);
        }
        if !self.is_continuous() {
            return Err(MatError::NonContiguous);
        }
        let layout = Layout::packed(new_rows, new_cols, self.elem_type())?;
        if let Some(owner) = &self.owner {
            layout.check_fits(self.offset, owner.byte_len())?;
        }
        self.layout = layout;
        Ok(())
    }

    /// Sub-matrix sharing this handle's buffer
    ///
    /// The region `[row, row + rows) x [col, col + cols)` must lie inside
    /// this handle's shape. The buffer is retained for the view's lifetime.
    pub fn view(&self, row: usize, col: usize, rows: usize, cols: usize) -> Result<MatHandle> {
        let out_of_range = MatError::OutOfRange {
            row,
            col,
            rows: self.rows(),
            cols: self.cols(),
        };
        let row_end = row.checked_add(rows).ok_or(out_of_range)?;
        let col_end = col.checked_add(cols).ok_or(out_of_range)?;
        if row_end > self.rows() || col_end > self.cols() {
            return Err(out_of_range);
        }
        let Some(owner) = &self.owner else {
            // only a 0x0 region of an empty handle gets here
            return Ok(MatHandle::empty());
        };

        let size = self.elem_type().size_bytes();
        let layout = Layout {
            rows,
            cols,
            elem: self.elem_type(),
            stride: self.layout.stride,
        };
        let offset = self.offset + row * self.layout.stride + col * size;
        // an empty region may start past a short final row; it reads nothing
        let offset = if layout.is_empty() {
            offset.min(owner.byte_len())
        } else {
            offset
        };
        layout.check_fits(offset, owner.byte_len())?;

        Ok(MatHandle {
            owner: Some(owner.retain()),
            offset,
            layout,
        })
    }

    /// Deep copy of this handle's region into a new packed buffer
    ///
    /// The copy never observes later writes to the source.
    pub fn deep_clone(&self) -> Result<MatHandle> {
        let Some(owner) = &self.owner else {
            return Ok(MatHandle::empty());
        };
        let ledger = owner.ledger();
        let copy = BufferOwner::allocate(self.rows(), self.cols(), self.elem_type(), ledger)?;
        let row_bytes = self.layout.row_bytes();
        owner.read(|src| {
            copy.write(|dst| {
                for (row, range) in self.layout.row_ranges(self.offset).enumerate() {
                    let start = row * row_bytes;
                    dst[start..start + row_bytes].copy_from_slice(&src[range]);
                }
            })
        });
        tracing::debug!(source = owner.id(), copy = copy.id(), "cloned matrix");
        Ok(MatHandle::from_buffer(copy))
    }

    /// Packed copy of the region for work off the host thread
    pub fn snapshot(&self) -> MatSnapshot {
        let data = self
            .owner
            .as_ref()
            .map(|owner| owner.read(|bytes| self.layout.gather(self.offset, bytes)))
            .unwrap_or_default();
        MatSnapshot::new(self.rows(), self.cols(), self.elem_type(), data)
    }

    /// Drop this handle's buffer reference
    ///
    /// Safe to call repeatedly; only the first call releases anything. The
    /// handle is empty afterwards.
    pub fn release(&mut self) {
        if let Some(owner) = self.owner.take() {
            tracing::trace!(buffer = owner.id(), refs = owner.ref_count(), "releasing handle");
            owner.release();
        }
        self.offset = 0;
        self.layout = Layout::empty(self.layout.elem);
    }

    fn locate(&self, row: usize, col: usize) -> Result<(&BufferRef, usize)> {
        let at = self.layout.offset_of(row, col)?;
        let owner = self.owner.as_ref().ok_or(MatError::OutOfRange {
            row,
            col,
            rows: 0,
            cols: 0,
        })?;
        Ok((owner, self.offset + at))
    }
}

impl Default for MatHandle {
    fn default() -> Self {
        Self::empty()
    }
}

impl Drop for MatHandle {
    fn drop(&mut self) {
        self.release();
    }
}

fn decode(elem: ElementType, slot: &[u8]) -> Scalar {
    with_element!(elem, |E| bytemuck::pod_read_unaligned::<E>(slot).to_scalar())
}

fn encode(elem: ElementType, value: Scalar, slot: &mut [u8]) -> Result<()> {
    with_element!(elem, |E| {
        let typed = E::from_scalar(value)?;
        slot.copy_from_slice(bytemuck::bytes_of(&typed));
        Ok(())
    })
}

fn encode_all(elem: ElementType, values: &[Scalar], bytes: &mut [u8]) -> Result<()> {
    let size = elem.size_bytes();
    for (value, slot) in values.iter().zip(bytes.chunks_exact_mut(size)) {
        encode(elem, *value, slot)?;
    }
    Ok(())
}
