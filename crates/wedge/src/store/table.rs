use crate::error::{LinkError, Trap};
use crate::module::types::TableType;
use crate::value::Ref;

/// Upper bound on table length.
pub(crate) const MAX_TABLE_SIZE: u64 = 10_000_000;

#[derive(Debug, Clone)]
pub struct TableInstance {
    ty: TableType,
    elems: Vec<Ref>,
}

impl TableInstance {
    pub fn new(ty: TableType, init: Ref) -> Result<Self, LinkError> {
        let limits = ty.limits;
        if let Some(max) = limits.max {
            if max < limits.min {
                return Err(LinkError::InvalidLimits(format!(
                    "table limits {}..{max} are invalid",
                    limits.min
                )));
            }
        }
        if limits.min > MAX_TABLE_SIZE {
            return Err(LinkError::InvalidLimits(format!(
                "table minimum {} is too large",
                limits.min
            )));
        }
        Ok(TableInstance {
            ty,
            elems: vec![init; limits.min as usize],
        })
    }

    /// Declared type with the minimum raised to the current size.
    pub fn ty(&self) -> TableType {
        let mut ty = self.ty;
        ty.limits.min = self.size() as u64;
        ty
    }

    pub fn size(&self) -> u32 {
        self.elems.len() as u32
    }

    pub fn get(&self, index: u32) -> Result<Ref, Trap> {
        self.elems
            .get(index as usize)
            .copied()
            .ok_or(Trap::TableOutOfBounds)
    }

    pub fn set(&mut self, index: u32, value: Ref) -> Result<(), Trap> {
        let slot = self
            .elems
            .get_mut(index as usize)
            .ok_or(Trap::TableOutOfBounds)?;
        *slot = value;
        Ok(())
    }

    /// Grow by `delta` slots filled with `init`, returning the old size.
    pub fn grow(&mut self, delta: u32, init: Ref) -> Option<u32> {
        let prev = self.size();
        let new = (prev as u64).checked_add(delta as u64)?;
        let max = self.ty.limits.max.unwrap_or(MAX_TABLE_SIZE).min(MAX_TABLE_SIZE);
        if new > max {
            return None;
        }
        self.elems.resize(new as usize, init);
        Some(prev)
    }

    pub fn fill(&mut self, dst: u32, value: Ref, len: u32) -> Result<(), Trap> {
        let range = self.range(dst, len)?;
        self.elems[range].fill(value);
        Ok(())
    }

    /// Write `items` starting at `dst`. Nothing is written when the range
    /// does not fit.
    pub fn init(&mut self, dst: u32, items: &[Ref]) -> Result<(), Trap> {
        let range = self.range(dst, items.len() as u32)?;
        self.elems[range].copy_from_slice(items);
        Ok(())
    }

    pub fn slice(&self, src: u32, len: u32) -> Result<&[Ref], Trap> {
        let range = self.range(src, len)?;
        Ok(&self.elems[range])
    }

    pub(crate) fn copy_within(&mut self, dst: u32, src: u32, len: u32) -> Result<(), Trap> {
        let src_range = self.range(src, len)?;
        let dst_range = self.range(dst, len)?;
        self.elems.copy_within(src_range, dst_range.start);
        Ok(())
    }

    fn range(&self, start: u32, len: u32) -> Result<std::ops::Range<usize>, Trap> {
        let end = (start as usize)
            .checked_add(len as usize)
            .ok_or(Trap::TableOutOfBounds)?;
        if end > self.elems.len() {
            return Err(Trap::TableOutOfBounds);
        }
        Ok(start as usize..end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::types::{Limits, ValType};

    fn table(min: u64, max: Option<u64>) -> TableInstance {
        TableInstance::new(
            TableType {
                elem: ValType::FuncRef,
                limits: Limits { min, max },
            },
            Ref::Func(None),
        )
        .unwrap()
    }

    #[test]
    fn init_is_all_or_nothing() {
        let mut t = table(2, None);
        let items = [Ref::Extern(Some(1)), Ref::Extern(Some(2)), Ref::Extern(Some(3))];
        assert!(matches!(t.init(0, &items), Err(Trap::TableOutOfBounds)));
        assert!(t.get(0).unwrap().is_null());
        t.init(0, &items[..2]).unwrap();
        assert_eq!(t.get(1).unwrap(), Ref::Extern(Some(2)));
    }

    #[test]
    fn grow_stops_at_max() {
        let mut t = table(1, Some(3));
        assert_eq!(t.grow(2, Ref::Func(None)), Some(1));
        assert_eq!(t.grow(1, Ref::Func(None)), None);
        assert_eq!(t.size(), 3);
    }
}
