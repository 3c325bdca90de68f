//! Scratch allocation
//!
//! A dispatch needs several temporaries but receives one caller-owned blob.
//! [`ScratchLayout::plan`] lays the requested extents out back to back at
//! [`SCRATCH_ALIGNMENT`]-byte boundaries; [`ScratchLayout::bind`] checks a
//! real buffer against that layout and hands out typed views of each
//! sub-region.

use std::mem::size_of;

use bytemuck::Pod;
use gridfold_device::{DeviceBuffer, DeviceError, DeviceSlice};

use crate::error::{ReduceError, Result};

/// Alignment of every sub-region, enough for any element type in use.
pub const SCRATCH_ALIGNMENT: usize = 256;

/// Offsets of each requested extent within one scratch blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchLayout {
    extents: Vec<usize>,
    offsets: Vec<usize>,
    total_bytes: usize,
}

impl ScratchLayout {
    /// Lay out `extents` (in bytes). Pure and infallible.
    ///
    /// `total_bytes` is never zero, so an execute call always has a real
    /// allocation to bind even when no temporaries are needed.
    pub fn plan(extents: &[usize]) -> Self {
        let mut offsets = Vec::with_capacity(extents.len());
        let mut cursor = 0usize;
        for &extent in extents {
            offsets.push(cursor);
            cursor = cursor.saturating_add(round_up(extent, SCRATCH_ALIGNMENT));
        }

        Self {
            extents: extents.to_vec(),
            offsets,
            total_bytes: cursor.max(1),
        }
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn extents(&self) -> &[usize] {
        &self.extents
    }

    /// Check `buffer` against the layout.
    ///
    /// Fails with [`ReduceError::InvalidScratchSize`] when the buffer is
    /// smaller than [`ScratchLayout::total_bytes`].
    pub fn bind(&self, buffer: &DeviceBuffer) -> Result<ScratchRegions> {
        let provided = buffer.len();
        if provided < self.total_bytes {
            return Err(ReduceError::InvalidScratchSize {
                required: self.total_bytes,
                provided,
            });
        }
        Ok(ScratchRegions {
            buffer: buffer.clone(),
            layout: self.clone(),
        })
    }
}

fn round_up(value: usize, align: usize) -> usize {
    value.div_ceil(align).saturating_mul(align)
}

/// A scratch buffer sliced according to a [`ScratchLayout`].
#[derive(Debug, Clone)]
pub struct ScratchRegions {
    buffer: DeviceBuffer,
    layout: ScratchLayout,
}

impl ScratchRegions {
    /// Sub-region `index` viewed as as many `T` as fit in its extent.
    pub fn region<T: Pod>(&self, index: usize) -> Result<DeviceSlice<T>> {
        let (offset, extent) = self
            .layout
            .offsets
            .get(index)
            .zip(self.layout.extents.get(index))
            .ok_or_else(|| {
                ReduceError::Scratch(DeviceError::InvalidAccess(format!(
                    "scratch region {index} of {} requested",
                    self.layout.extents.len()
                )))
            })?;

        let len = extent / size_of::<T>().max(1);
        self.buffer.slice::<T>(*offset, len).map_err(ReduceError::Scratch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridfold_device::BufferHandle;
    use proptest::prelude::*;

    fn buffer(len: usize) -> DeviceBuffer {
        DeviceBuffer::zeroed(BufferHandle::new(1), len)
    }

    #[test]
    fn empty_layout_still_needs_one_byte() {
        let layout = ScratchLayout::plan(&[]);
        assert_eq!(layout.total_bytes(), 1);
        assert!(layout.offsets().is_empty());
        assert!(layout.bind(&buffer(1)).is_ok());
        assert_eq!(
            layout.bind(&buffer(0)).unwrap_err(),
            ReduceError::InvalidScratchSize {
                required: 1,
                provided: 0
            }
        );
    }

    #[test]
    fn regions_are_aligned_and_packed() {
        let layout = ScratchLayout::plan(&[100, 16, 512]);
        assert_eq!(layout.offsets(), &[0, 256, 512]);
        assert_eq!(layout.total_bytes(), 1024);
    }

    #[test]
    fn bind_rejects_short_buffers() {
        let layout = ScratchLayout::plan(&[40, 16]);
        let required = layout.total_bytes();
        assert!(matches!(
            layout.bind(&buffer(required - 1)),
            Err(ReduceError::InvalidScratchSize { provided, .. }) if provided == required - 1
        ));
        assert!(layout.bind(&buffer(required + 64)).is_ok());
    }

    #[test]
    fn typed_regions_do_not_overlap() {
        let layout = ScratchLayout::plan(&[10 * 4, 16]);
        let regions = layout.bind(&buffer(layout.total_bytes())).unwrap();

        let partials = regions.region::<u32>(0).unwrap();
        let counters = regions.region::<u64>(1).unwrap();
        assert_eq!(partials.len(), 10);
        assert_eq!(counters.len(), 2);

        partials.fill(u32::MAX).unwrap();
        assert_eq!(counters.to_vec().unwrap(), vec![0, 0]);
        assert!(regions.region::<u8>(2).is_err());
    }

    proptest! {
        #[test]
        fn layouts_are_aligned_disjoint_and_sufficient(extents in proptest::collection::vec(0usize..10_000, 0..8)) {
            let layout = ScratchLayout::plan(&extents);
            let mut previous_end = 0usize;
            for (offset, extent) in layout.offsets().iter().zip(layout.extents()) {
                prop_assert_eq!(offset % SCRATCH_ALIGNMENT, 0);
                prop_assert!(*offset >= previous_end);
                previous_end = offset + extent;
            }
            prop_assert!(layout.total_bytes() >= previous_end);
            prop_assert!(layout.total_bytes() >= 1);
            prop_assert_eq!(ScratchLayout::plan(&extents), layout);
        }
    }
}
