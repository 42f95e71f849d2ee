use crate::error::{Error, Result};
use crate::value::{Ref, Val};

/// Operand stack. Pops are typed; a tag mismatch is reported as
/// `TypeNotMatch` instead of being reinterpreted.
#[derive(Debug, Default)]
pub(crate) struct ValueStack {
    vals: Vec<Val>,
}

impl ValueStack {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        ValueStack {
            vals: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.vals.len()
    }

    #[inline]
    pub(crate) fn push(&mut self, val: Val) {
        self.vals.push(val);
    }

    pub(crate) fn extend(&mut self, vals: impl IntoIterator<Item = Val>) {
        self.vals.extend(vals);
    }

    #[inline]
    pub(crate) fn pop(&mut self) -> Result<Val> {
        self.vals.pop().ok_or(Error::Fault("operand stack underflow"))
    }

    #[inline]
    pub(crate) fn peek(&self) -> Result<Val> {
        self.vals
            .last()
            .copied()
            .ok_or(Error::Fault("operand stack underflow"))
    }

    #[inline]
    pub(crate) fn pop_i32(&mut self) -> Result<i32> {
        self.pop()?.as_i32()
    }

    #[inline]
    pub(crate) fn pop_i64(&mut self) -> Result<i64> {
        self.pop()?.as_i64()
    }

    #[inline]
    pub(crate) fn pop_f32(&mut self) -> Result<f32> {
        self.pop()?.as_f32()
    }

    #[inline]
    pub(crate) fn pop_f64(&mut self) -> Result<f64> {
        self.pop()?.as_f64()
    }

    #[inline]
    pub(crate) fn pop_ref(&mut self) -> Result<Ref> {
        self.pop()?.as_reference()
    }

    /// Pop an i32 used as an unsigned address, length or index.
    #[inline]
    pub(crate) fn pop_u32(&mut self) -> Result<u32> {
        Ok(self.pop_i32()? as u32)
    }

    /// Pop the top `n` values, preserving their order.
    pub(crate) fn pop_n(&mut self, n: usize) -> Result<Vec<Val>> {
        let start = self
            .vals
            .len()
            .checked_sub(n)
            .ok_or(Error::Fault("operand stack underflow"))?;
        Ok(self.vals.split_off(start))
    }

    /// Drop everything above `height` except the top `keep` values.
    pub(crate) fn unwind(&mut self, height: usize, keep: usize) -> Result<()> {
        let start = self
            .vals
            .len()
            .checked_sub(keep)
            .filter(|start| *start >= height)
            .ok_or(Error::Fault("operand stack underflow"))?;
        self.vals.drain(height..start);
        Ok(())
    }

    pub(crate) fn truncate(&mut self, height: usize) {
        self.vals.truncate(height);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwind_keeps_top_values() {
        let mut stack = ValueStack::default();
        stack.extend([Val::I32(1), Val::I32(2), Val::I32(3), Val::I64(4)]);
        stack.unwind(1, 2).unwrap();
        assert_eq!(stack.pop_n(3).unwrap(), vec![Val::I32(1), Val::I32(3), Val::I64(4)]);
    }

    #[test]
    fn typed_pop_rejects_mismatch() {
        let mut stack = ValueStack::default();
        stack.push(Val::F32(1.0));
        assert!(matches!(stack.pop_i32(), Err(Error::TypeNotMatch { .. })));
        assert!(matches!(stack.pop(), Err(Error::Fault(_))));
    }
}
