//! Per-component resource handle tables.

use crate::error::{Error, Result};
use crate::store::TaskId;

/// Largest number of live handles one table may hold.
pub const MAX_HANDLES: usize = (1 << 28) - 1;

/// Identifies a resource type defined by some component instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceType(pub(crate) u32);

impl ResourceType {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// One slot of a resource table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandle {
    /// Representation chosen by the implementing component.
    pub rep: u32,
    pub ty: ResourceType,
    /// `true` for `own` handles, `false` for `borrow` handles.
    pub own: bool,
    /// Task a borrow handle was created for. A scoped borrow must be
    /// dropped before that task completes.
    pub scope: Option<TaskId>,
    /// Number of outstanding borrows lent out of this handle.
    pub lend_count: u32,
    /// Set while an `own` handle is being transferred by a call.
    pub(crate) consumed: bool,
}

impl ResourceHandle {
    pub(crate) fn own(rep: u32, ty: ResourceType) -> Self {
        ResourceHandle {
            rep,
            ty,
            own: true,
            scope: None,
            lend_count: 0,
            consumed: false,
        }
    }

    pub(crate) fn borrow(rep: u32, ty: ResourceType, scope: Option<TaskId>) -> Self {
        ResourceHandle {
            rep,
            ty,
            own: false,
            scope,
            lend_count: 0,
            consumed: false,
        }
    }
}

/// Handle table. Index 0 is never handed out; freed indices are reused.
#[derive(Debug)]
pub(crate) struct ResourceTable {
    slots: Vec<Option<ResourceHandle>>,
    free: Vec<u32>,
}

impl Default for ResourceTable {
    fn default() -> Self {
        ResourceTable {
            slots: vec![None],
            free: Vec::new(),
        }
    }
}

impl ResourceTable {
    pub(crate) fn insert(&mut self, handle: ResourceHandle) -> Result<u32> {
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(handle);
            return Ok(index);
        }
        if self.slots.len() > MAX_HANDLES {
            return Err(Error::ResourceTableFull);
        }
        self.slots.push(Some(handle));
        Ok(self.slots.len() as u32 - 1)
    }

    pub(crate) fn get(&self, index: u32) -> Result<&ResourceHandle> {
        self.slots
            .get(index as usize)
            .and_then(Option::as_ref)
            .ok_or(Error::UnknownHandle(index))
    }

    pub(crate) fn get_mut(&mut self, index: u32) -> Result<&mut ResourceHandle> {
        self.slots
            .get_mut(index as usize)
            .and_then(Option::as_mut)
            .ok_or(Error::UnknownHandle(index))
    }

    pub(crate) fn remove(&mut self, index: u32) -> Result<ResourceHandle> {
        let handle = self
            .slots
            .get_mut(index as usize)
            .and_then(Option::take)
            .ok_or(Error::UnknownHandle(index))?;
        self.free.push(index);
        Ok(handle)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_zero_is_reserved_and_slots_are_reused() {
        let mut table = ResourceTable::default();
        let rt = ResourceType(0);
        let a = table.insert(ResourceHandle::own(10, rt)).unwrap();
        let b = table.insert(ResourceHandle::own(11, rt)).unwrap();
        assert_eq!((a, b), (1, 2));
        assert!(matches!(table.get(0), Err(Error::UnknownHandle(0))));

        assert_eq!(table.remove(a).unwrap().rep, 10);
        assert!(table.get(a).is_err());
        assert!(matches!(table.remove(a), Err(Error::UnknownHandle(1))));
        let c = table.insert(ResourceHandle::borrow(12, rt, None)).unwrap();
        assert_eq!(c, a);
        assert!(!table.get(c).unwrap().own);
        assert_eq!(table.len(), 2);
    }
}
