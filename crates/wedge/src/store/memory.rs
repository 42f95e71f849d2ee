//! Linear memory instances.
//!
//! The byte buffer lives behind `Arc<RwLock<_>>`: cloning a
//! [`MemoryInstance`] yields another handle to the same memory, which is how
//! shared memories are handed to several stores and threads. Every access is
//! bounds-checked against the current size.
//!
//! Atomic read-modify-write sequences hold the memory's own atomic lock, so
//! they stay linearizable no matter which engine or store issues them.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{LinkError, Trap};
use crate::module::types::{MemoryType, MAX_PAGES, PAGE_SIZE};

#[derive(Debug, Clone)]
pub struct MemoryInstance {
    ty: MemoryType,
    data: Arc<MemoryData>,
}

#[derive(Debug)]
struct MemoryData {
    bytes: RwLock<Vec<u8>>,
    atomic: Mutex<()>,
}

impl MemoryInstance {
    /// Allocate a zeroed memory of `ty.limits.min` pages.
    pub fn new(ty: MemoryType) -> Result<Self, LinkError> {
        let limits = ty.limits;
        if limits.min > MAX_PAGES {
            return Err(LinkError::InvalidLimits(format!(
                "memory minimum {} exceeds {MAX_PAGES} pages",
                limits.min
            )));
        }
        if let Some(max) = limits.max {
            if max > MAX_PAGES || max < limits.min {
                return Err(LinkError::InvalidLimits(format!(
                    "memory limits {}..{max} are invalid",
                    limits.min
                )));
            }
        }
        if ty.shared && limits.max.is_none() {
            return Err(LinkError::InvalidLimits(
                "shared memory requires a maximum".into(),
            ));
        }
        let bytes = zeroed(limits.min * PAGE_SIZE)?;
        Ok(MemoryInstance {
            ty,
            data: Arc::new(MemoryData {
                bytes: RwLock::new(bytes),
                atomic: Mutex::new(()),
            }),
        })
    }

    /// Allocate a memory meant to be imported by several stores.
    pub fn new_shared(min: u64, max: u64) -> Result<Self, LinkError> {
        Self::new(MemoryType::shared(min, max))
    }

    /// The type this memory currently satisfies: the declared type with the
    /// minimum raised to the current size.
    pub fn ty(&self) -> MemoryType {
        let mut ty = self.ty;
        ty.limits.min = self.size_pages();
        ty
    }

    pub fn size_pages(&self) -> u64 {
        self.size_bytes() / PAGE_SIZE
    }

    pub fn size_bytes(&self) -> u64 {
        self.read_guard().len() as u64
    }

    /// Grow by `delta` pages, returning the previous size in pages. Growth
    /// past the declared maximum or the address-space limit fails without
    /// changing the size.
    pub fn grow(&self, delta: u64) -> Option<u64> {
        let mut data = self.write_guard();
        let prev = data.len() as u64 / PAGE_SIZE;
        let new = prev.checked_add(delta)?;
        let max = self.ty.limits.max.unwrap_or(MAX_PAGES).min(MAX_PAGES);
        if new > max {
            return None;
        }
        let new_len = usize::try_from(new * PAGE_SIZE).ok()?;
        let cur = data.len();
        data.try_reserve_exact(new_len - cur).ok()?;
        data.resize(new_len, 0);
        Some(prev)
    }

    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), Trap> {
        let data = self.read_guard();
        let range = bounds(&data, offset, buf.len() as u64)?;
        buf.copy_from_slice(&data[range]);
        Ok(())
    }

    pub fn read_vec(&self, offset: u64, len: u64) -> Result<Vec<u8>, Trap> {
        let data = self.read_guard();
        let range = bounds(&data, offset, len)?;
        Ok(data[range].to_vec())
    }

    pub fn write(&self, offset: u64, bytes: &[u8]) -> Result<(), Trap> {
        let mut data = self.write_guard();
        let range = bounds(&data, offset, bytes.len() as u64)?;
        data[range].copy_from_slice(bytes);
        Ok(())
    }

    pub fn read_u32(&self, offset: u64) -> Result<u32, Trap> {
        self.load::<4>(offset).map(u32::from_le_bytes)
    }

    pub fn write_u32(&self, offset: u64, value: u32) -> Result<(), Trap> {
        self.store(offset, value.to_le_bytes())
    }

    pub(crate) fn load<const N: usize>(&self, offset: u64) -> Result<[u8; N], Trap> {
        let mut buf = [0u8; N];
        self.read(offset, &mut buf)?;
        Ok(buf)
    }

    pub(crate) fn store<const N: usize>(&self, offset: u64, bytes: [u8; N]) -> Result<(), Trap> {
        self.write(offset, &bytes)
    }

    pub(crate) fn fill(&self, offset: u64, value: u8, len: u64) -> Result<(), Trap> {
        let mut data = self.write_guard();
        let range = bounds(&data, offset, len)?;
        data[range].fill(value);
        Ok(())
    }

    /// `memory.copy` within one memory; overlapping ranges are handled.
    pub(crate) fn copy_within(&self, dst: u64, src: u64, len: u64) -> Result<(), Trap> {
        let mut data = self.write_guard();
        let src_range = bounds(&data, src, len)?;
        let dst_range = bounds(&data, dst, len)?;
        data.copy_within(src_range, dst_range.start);
        Ok(())
    }

    /// Whether two handles refer to the same underlying buffer.
    pub fn same(&self, other: &MemoryInstance) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Serializes atomic instructions on this memory across every handle,
    /// store and engine that shares it.
    pub(crate) fn lock_atomics(&self) -> MutexGuard<'_, ()> {
        self.data
            .atomic
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.data.bytes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.data.bytes.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn zeroed(len: u64) -> Result<Vec<u8>, LinkError> {
    let size = usize::try_from(len).map_err(|_| LinkError::OutOfMemory(len))?;
    let mut bytes = Vec::new();
    bytes
        .try_reserve_exact(size)
        .map_err(|_| LinkError::OutOfMemory(len))?;
    bytes.resize(size, 0);
    Ok(bytes)
}

fn bounds(data: &[u8], offset: u64, len: u64) -> Result<std::ops::Range<usize>, Trap> {
    let end = offset.checked_add(len).ok_or(Trap::MemoryOutOfBounds)?;
    if end > data.len() as u64 {
        return Err(Trap::MemoryOutOfBounds);
    }
    Ok(offset as usize..end as usize)
}
