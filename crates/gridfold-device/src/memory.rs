//! Device memory
//!
//! A [`DeviceBuffer`] is a shared, lock-guarded byte region. Cloning a
//! buffer clones the handle, not the bytes, so kernels capture clones and
//! write into the same storage the host later reads back.
//!
//! Typed access goes through [`DeviceSlice`], a bounds- and
//! alignment-checked view of `len` elements at a byte offset. Reads and
//! writes use `bytemuck` unaligned copies, so the backing `Vec<u8>` never
//! needs a particular alignment.

use std::fmt;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use bytemuck::Pod;
use gridfold_tracing::performance::{record_transfer, Transfer};
use parking_lot::RwLock;

use crate::error::{DeviceError, Result};

/// Handle to an allocated buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

impl BufferHandle {
    pub const fn new(id: u64) -> Self {
        BufferHandle(id)
    }

    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf{}", self.0)
    }
}

/// A region of device memory.
#[derive(Clone)]
pub struct DeviceBuffer {
    handle: BufferHandle,
    storage: Arc<RwLock<Vec<u8>>>,
}

impl DeviceBuffer {
    /// Zero-initialised buffer of `len` bytes.
    pub fn zeroed(handle: BufferHandle, len: usize) -> Self {
        Self {
            handle,
            storage: Arc::new(RwLock::new(vec![0u8; len])),
        }
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn len(&self) -> usize {
        self.storage.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn copy_from_host(&self, offset: usize, data: &[u8]) -> Result<()> {
        let start = Instant::now();
        let mut storage = self.storage.write();
        let range = check_range(offset, data.len(), storage.len())?;
        storage[range].copy_from_slice(data);
        record_transfer(Transfer::HostToDevice, data.len(), start.elapsed().as_micros() as u64);
        Ok(())
    }

    pub fn copy_to_host(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        let start = Instant::now();
        let storage = self.storage.read();
        let range = check_range(offset, out.len(), storage.len())?;
        out.copy_from_slice(&storage[range]);
        record_transfer(Transfer::DeviceToHost, out.len(), start.elapsed().as_micros() as u64);
        Ok(())
    }

    /// Load one value at a byte offset.
    pub fn load<T: Pod>(&self, offset: usize) -> Result<T> {
        let storage = self.storage.read();
        let range = check_range(offset, size_of::<T>(), storage.len())?;
        Ok(bytemuck::pod_read_unaligned(&storage[range]))
    }

    /// Store one value at a byte offset.
    pub fn store<T: Pod>(&self, offset: usize, value: T) -> Result<()> {
        let mut storage = self.storage.write();
        let range = check_range(offset, size_of::<T>(), storage.len())?;
        storage[range].copy_from_slice(bytemuck::bytes_of(&value));
        Ok(())
    }

    /// Atomically claim the next value of a `u64` counter.
    ///
    /// Reads the counter at `counter_offset` and the bound at `bound_offset`
    /// under one exclusive lock. If the counter is below the bound it is
    /// incremented and its previous value returned; otherwise nothing is
    /// written and `None` is returned. Concurrent callers never observe the
    /// same value.
    pub fn fetch_increment_bounded(&self, counter_offset: usize, bound_offset: usize) -> Result<Option<u64>> {
        let mut storage = self.storage.write();
        let counter_range = check_range(counter_offset, size_of::<u64>(), storage.len())?;
        let bound_range = check_range(bound_offset, size_of::<u64>(), storage.len())?;

        let current: u64 = bytemuck::pod_read_unaligned(&storage[counter_range.clone()]);
        let bound: u64 = bytemuck::pod_read_unaligned(&storage[bound_range]);
        if current >= bound {
            return Ok(None);
        }
        storage[counter_range].copy_from_slice(bytemuck::bytes_of(&(current + 1)));
        Ok(Some(current))
    }

    /// Typed view of `len` elements starting at byte `offset`.
    pub fn slice<T: Pod>(&self, offset: usize, len: usize) -> Result<DeviceSlice<T>> {
        if size_of::<T>() == 0 {
            return Err(DeviceError::InvalidAccess(
                "zero-sized element types have no device representation".to_string(),
            ));
        }
        if offset % align_of::<T>() != 0 {
            return Err(DeviceError::Misaligned {
                offset,
                align: align_of::<T>(),
            });
        }
        let bytes = len
            .checked_mul(size_of::<T>())
            .ok_or_else(|| DeviceError::InvalidAccess(format!("slice of {len} elements overflows")))?;
        check_range(offset, bytes, self.len())?;

        Ok(DeviceSlice {
            buffer: self.clone(),
            offset,
            len,
            _marker: PhantomData,
        })
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("handle", &self.handle)
            .field("len", &self.len())
            .finish()
    }
}

fn check_range(offset: usize, size: usize, buffer_size: usize) -> Result<Range<usize>> {
    match offset.checked_add(size) {
        Some(end) if end <= buffer_size => Ok(offset..end),
        _ => Err(DeviceError::BufferOutOfBounds {
            offset,
            size,
            buffer_size,
        }),
    }
}

/// Typed, bounds-checked view into a [`DeviceBuffer`].
pub struct DeviceSlice<T> {
    buffer: DeviceBuffer,
    offset: usize,
    len: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for DeviceSlice<T> {
    fn clone(&self) -> Self {
        Self {
            buffer: self.buffer.clone(),
            offset: self.offset,
            len: self.len,
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for DeviceSlice<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSlice")
            .field("buffer", &self.buffer.handle)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

impl<T: Pod> DeviceSlice<T> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn buffer(&self) -> &DeviceBuffer {
        &self.buffer
    }

    /// Byte offset of element `index`, checked against the view length.
    pub fn byte_offset(&self, index: usize) -> Result<usize> {
        if index >= self.len {
            return Err(DeviceError::BufferOutOfBounds {
                offset: index * size_of::<T>(),
                size: size_of::<T>(),
                buffer_size: self.len * size_of::<T>(),
            });
        }
        Ok(self.offset + index * size_of::<T>())
    }

    pub fn get(&self, index: usize) -> Result<T> {
        self.buffer.load(self.byte_offset(index)?)
    }

    pub fn set(&self, index: usize, value: T) -> Result<()> {
        self.buffer.store(self.byte_offset(index)?, value)
    }

    /// Append the elements in `range` to `out`.
    pub fn read_range(&self, range: Range<usize>, out: &mut Vec<T>) -> Result<()> {
        if range.start > range.end || range.end > self.len {
            return Err(DeviceError::BufferOutOfBounds {
                offset: range.start * size_of::<T>(),
                size: range.len() * size_of::<T>(),
                buffer_size: self.len * size_of::<T>(),
            });
        }
        let start = self.offset + range.start * size_of::<T>();
        let end = self.offset + range.end * size_of::<T>();

        let storage = self.buffer.storage.read();
        out.extend(
            storage[start..end]
                .chunks_exact(size_of::<T>())
                .map(bytemuck::pod_read_unaligned::<T>),
        );
        Ok(())
    }

    /// Overwrite the view from host data of exactly the same length.
    pub fn copy_from_host(&self, data: &[T]) -> Result<()> {
        if data.len() != self.len {
            return Err(DeviceError::InvalidAccess(format!(
                "host slice of {} elements does not match view of {}",
                data.len(),
                self.len
            )));
        }
        self.buffer.copy_from_host(self.offset, bytemuck::cast_slice(data))
    }

    /// Fill every element with `value`.
    pub fn fill(&self, value: T) -> Result<()> {
        let element = bytemuck::bytes_of(&value);
        let mut storage = self.buffer.storage.write();
        let end = self.offset + self.len * size_of::<T>();
        for chunk in storage[self.offset..end].chunks_exact_mut(size_of::<T>()) {
            chunk.copy_from_slice(element);
        }
        Ok(())
    }

    pub fn to_vec(&self) -> Result<Vec<T>> {
        let start = Instant::now();
        let mut out = Vec::with_capacity(self.len);
        self.read_range(0..self.len, &mut out)?;
        record_transfer(Transfer::DeviceToHost, self.len * size_of::<T>(), start.elapsed().as_micros() as u64);
        Ok(out)
    }
}
