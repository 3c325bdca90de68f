//! Positionally addressable inputs

use std::ops::{Add, Range};

use gridfold_device::{DeviceError, DeviceSlice};
use num_traits::NumCast;

use crate::ops::Element;

/// An immutable sequence of items read tile by tile by worker groups.
///
/// Cloning must be cheap: every launched kernel holds its own clone.
pub trait ItemSource<T>: Clone + Send + Sync + 'static {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append the items at positions `range` to `out`.
    fn read(&self, range: Range<usize>, out: &mut Vec<T>) -> gridfold_device::Result<()>;
}

impl<T: Element> ItemSource<T> for DeviceSlice<T> {
    fn len(&self) -> usize {
        DeviceSlice::len(self)
    }

    fn read(&self, range: Range<usize>, out: &mut Vec<T>) -> gridfold_device::Result<()> {
        self.read_range(range, out)
    }
}

fn check_range(range: &Range<usize>, len: usize) -> gridfold_device::Result<()> {
    if range.start > range.end || range.end > len {
        return Err(DeviceError::InvalidAccess(format!(
            "range {}..{} outside source of {} items",
            range.start, range.end, len
        )));
    }
    Ok(())
}

/// `start, start + 1, start + 2, ...` without any backing memory.
#[derive(Debug, Clone, Copy)]
pub struct CountingSource<T> {
    start: T,
    len: usize,
}

impl<T> CountingSource<T> {
    pub fn new(start: T, len: usize) -> Self {
        Self { start, len }
    }
}

impl<T: Element + NumCast + Add<Output = T>> ItemSource<T> for CountingSource<T> {
    fn len(&self) -> usize {
        self.len
    }

    fn read(&self, range: Range<usize>, out: &mut Vec<T>) -> gridfold_device::Result<()> {
        check_range(&range, self.len)?;
        out.reserve(range.len());
        for index in range {
            let offset = <T as NumCast>::from(index)
                .ok_or_else(|| DeviceError::InvalidAccess(format!("index {index} not representable")))?;
            out.push(self.start + offset);
        }
        Ok(())
    }
}

/// The same value repeated `len` times.
#[derive(Debug, Clone, Copy)]
pub struct ConstantSource<T> {
    value: T,
    len: usize,
}

impl<T> ConstantSource<T> {
    pub fn new(value: T, len: usize) -> Self {
        Self { value, len }
    }
}

impl<T: Element> ItemSource<T> for ConstantSource<T> {
    fn len(&self) -> usize {
        self.len
    }

    fn read(&self, range: Range<usize>, out: &mut Vec<T>) -> gridfold_device::Result<()> {
        check_range(&range, self.len)?;
        out.extend(std::iter::repeat(self.value).take(range.len()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridfold_device::{BufferHandle, DeviceBuffer};

    #[test]
    fn counting_source_yields_offsets() {
        let source = CountingSource::new(10i64, 100);
        let mut out = Vec::new();
        source.read(3..6, &mut out).unwrap();
        assert_eq!(out, vec![13, 14, 15]);
        assert!(source.read(99..101, &mut out).is_err());
    }

    #[test]
    fn counting_source_rejects_unrepresentable_indices() {
        let source = CountingSource::new(0u8, 300);
        let mut out = Vec::new();
        assert!(source.read(250..256, &mut out).is_ok());
        assert!(source.read(256..257, &mut out).is_err());
    }

    #[test]
    fn constant_source_repeats() {
        let source = ConstantSource::new(1.5f32, 4);
        let mut out = vec![0.0];
        source.read(1..4, &mut out).unwrap();
        assert_eq!(out, vec![0.0, 1.5, 1.5, 1.5]);
        assert!(!source.is_empty());
    }

    #[test]
    fn device_slices_are_sources() {
        let buffer = DeviceBuffer::zeroed(BufferHandle::new(7), 32);
        let slice = buffer.slice::<u32>(0, 8).unwrap();
        slice.copy_from_host(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();

        let mut out = Vec::new();
        ItemSource::read(&slice, 6..8, &mut out).unwrap();
        assert_eq!(out, vec![7, 8]);
        assert_eq!(ItemSource::len(&slice), 8);
    }
}
