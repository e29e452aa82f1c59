//! Shape and stride validation for matrix buffers
//!
//! Pure arithmetic, no memory access. Every size computation is checked so
//! that a hostile shape can never wrap around `usize`.

use core::ops::Range;

use crate::element::ElementType;
use crate::error::{MatError, Result};

/// Row-major 2-D layout: `rows` rows of `cols` elements, `stride` bytes apart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Layout {
    pub rows: usize,
    pub cols: usize,
    pub elem: ElementType,
    /// Distance between the starts of consecutive rows, in bytes
    pub stride: usize,
}

impl Layout {
    /// Zero-sized layout
    pub const fn empty(elem: ElementType) -> Self {
        Self {
            rows: 0,
            cols: 0,
            elem,
            stride: 0,
        }
    }

    /// Layout with rows packed back to back
    pub fn packed(rows: usize, cols: usize, elem: ElementType) -> Result<Self> {
        let stride = match cols.checked_mul(elem.size_bytes()) {
            Some(stride) => stride,
            // zero rows occupy no bytes whatever the row width
            None if rows == 0 => 0,
            None => return Err(MatError::SizeOverflow),
        };
        let layout = Self {
            rows,
            cols,
            elem,
            stride,
        };
        layout.required_bytes()?;
        Ok(layout)
    }

    /// Layout with an explicit row stride
    ///
    /// The stride must cover a full row and keep every row aligned to the
    /// element size.
    pub fn strided(rows: usize, cols: usize, elem: ElementType, stride: usize) -> Result<Self> {
        let size = elem.size_bytes();
        let min = cols.checked_mul(size).ok_or(MatError::SizeOverflow)?;
        if stride < min {
            return Err(MatError::StrideTooSmall { stride, min });
        }
        if stride % size != 0 {
            return Err(MatError::StrideMisaligned {
                stride,
                elem_size: size,
            });
        }
        let layout = Self {
            rows,
            cols,
            elem,
            stride,
        };
        layout.required_bytes()?;
        Ok(layout)
    }

    /// Number of elements, `rows * cols`
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    /// Bytes of one packed row
    pub fn row_bytes(&self) -> usize {
        self.cols * self.elem.size_bytes()
    }

    /// True when rows follow each other without padding
    ///
    /// A layout without elements has no padding to speak of.
    pub fn is_continuous(&self) -> bool {
        self.is_empty() || self.rows <= 1 || self.stride == self.row_bytes()
    }

    /// Smallest byte length that holds every element of this layout
    pub fn required_bytes(&self) -> Result<usize> {
        if self.is_empty() {
            return Ok(0);
        }
        let row = checked_byte_len(1, self.cols, self.elem)?;
        (self.rows - 1)
            .checked_mul(self.stride)
            .and_then(|lead| lead.checked_add(row))
            .ok_or(MatError::SizeOverflow)
    }

    /// Byte offset of `(row, col)` relative to the layout start
    pub fn offset_of(&self, row: usize, col: usize) -> Result<usize> {
        if row >= self.rows || col >= self.cols {
            return Err(MatError::OutOfRange {
                row,
                col,
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(row * self.stride + col * self.elem.size_bytes())
    }

    /// Byte ranges of each row, shifted by `base`
    pub fn row_ranges(&self, base: usize) -> impl Iterator<Item = Range<usize>> + '_ {
        let row_bytes = self.row_bytes();
        (0..self.rows).map(move |row| {
            let start = base + row * self.stride;
            start..start + row_bytes
        })
    }

    /// Verify that the layout, starting at `base`, fits in `available` bytes
    pub fn check_fits(&self, base: usize, available: usize) -> Result<()> {
        let required = base
            .checked_add(self.required_bytes()?)
            .ok_or(MatError::SizeOverflow)?;
        if required > available {
            return Err(MatError::BufferTooSmall {
                required,
                available,
            });
        }
        Ok(())
    }

    /// Copy the rows of this layout out of `bytes` into a packed vector
    #[cfg(feature = "alloc")]
    pub fn gather(&self, base: usize, bytes: &[u8]) -> alloc::vec::Vec<u8> {
        let mut packed = alloc::vec::Vec::with_capacity(self.len() * self.elem.size_bytes());
        for range in self.row_ranges(base) {
            packed.extend_from_slice(&bytes[range]);
        }
        packed
    }
}

/// `rows * cols * size_of(elem)` with overflow protection
pub const fn checked_byte_len(rows: usize, cols: usize, elem: ElementType) -> Result<usize> {
    match rows.checked_mul(cols) {
        Some(count) => match count.checked_mul(elem.size_bytes()) {
            // Keep room for pointer offsets, which are isize
            Some(bytes) if bytes <= isize::MAX as usize => Ok(bytes),
            _ => Err(MatError::SizeOverflow),
        },
        None => Err(MatError::SizeOverflow),
    }
}

/// Validate alignment of a raw pointer for the given element type
///
/// This is a pure address check; the pointer is never dereferenced.
pub fn validate_alignment(ptr: *const u8, elem: ElementType) -> Result<()> {
    let align = elem.align();
    if (ptr as usize) % align != 0 {
        return Err(MatError::PointerMisaligned { align });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_layout() {
        let layout = Layout::packed(2, 3, ElementType::F64).unwrap();
        assert_eq!(layout.stride, 24);
        assert_eq!(layout.required_bytes(), Ok(48));
        assert!(layout.is_continuous());
        assert_eq!(layout.offset_of(1, 2), Ok(40));
        assert!(matches!(
            layout.offset_of(2, 0),
            Err(MatError::OutOfRange { row: 2, .. })
        ));
    }

    #[test]
    fn test_strided_validation() {
        assert_eq!(
            Layout::strided(4, 4, ElementType::I32, 12),
            Err(MatError::StrideTooSmall { stride: 12, min: 16 })
        );
        assert_eq!(
            Layout::strided(4, 4, ElementType::I32, 18),
            Err(MatError::StrideMisaligned {
                stride: 18,
                elem_size: 4
            })
        );
        let layout = Layout::strided(3, 2, ElementType::U16, 8).unwrap();
        assert!(!layout.is_continuous());
        // last row needs only its packed width
        assert_eq!(layout.required_bytes(), Ok(2 * 8 + 4));
        assert_eq!(layout.check_fits(0, 19), Err(MatError::BufferTooSmall {
            required: 20,
            available: 19
        }));
        assert_eq!(layout.check_fits(0, 20), Ok(()));
    }

    #[test]
    fn test_overflow_is_rejected() {
        assert_eq!(
            checked_byte_len(usize::MAX, 2, ElementType::U8),
            Err(MatError::SizeOverflow)
        );
        assert_eq!(
            checked_byte_len(usize::MAX / 4, 1, ElementType::F64),
            Err(MatError::SizeOverflow)
        );
        assert!(Layout::packed(usize::MAX / 2, 3, ElementType::U8).is_err());
        assert_eq!(checked_byte_len(0, usize::MAX, ElementType::U64), Ok(0));
    }

    #[test]
    fn test_empty_layouts_need_no_bytes() {
        assert_eq!(Layout::empty(ElementType::F32).required_bytes(), Ok(0));
        assert_eq!(
            Layout::packed(0, 7, ElementType::F32).unwrap().required_bytes(),
            Ok(0)
        );

        let wide = Layout::packed(0, usize::MAX / 4, ElementType::F64).unwrap();
        assert_eq!(wide.stride, 0);
        assert_eq!(wide.required_bytes(), Ok(0));
        assert!(Layout::packed(1, usize::MAX / 4, ElementType::F64).is_err());

        // two rows of nothing, padded apart
        let hollow = Layout {
            rows: 2,
            cols: 0,
            elem: ElementType::I32,
            stride: 16,
        };
        assert!(hollow.is_continuous());
    }

    #[test]
    fn test_validate_alignment() {
        let aligned: [u64; 2] = [0; 2];
        let ptr = aligned.as_ptr() as *const u8;
        assert_eq!(validate_alignment(ptr, ElementType::F64), Ok(()));
        assert_eq!(
            validate_alignment(ptr.wrapping_add(1), ElementType::I32),
            Err(MatError::PointerMisaligned { align: 4 })
        );
        assert_eq!(validate_alignment(ptr.wrapping_add(1), ElementType::U8), Ok(()));
    }
}
