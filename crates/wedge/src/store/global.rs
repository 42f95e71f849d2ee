use crate::error::{Error, Result};
use crate::module::types::GlobalType;
use crate::value::Val;

#[derive(Debug, Clone)]
pub struct GlobalInstance {
    ty: GlobalType,
    value: Val,
}

impl GlobalInstance {
    pub fn new(ty: GlobalType, value: Val) -> Result<Self> {
        value.expect_type(ty.content)?;
        Ok(GlobalInstance { ty, value })
    }

    pub fn ty(&self) -> GlobalType {
        self.ty
    }

    pub fn get(&self) -> Val {
        self.value
    }

    /// Overwrite the value. Immutable globals and values of another type are
    /// rejected and leave the stored value untouched.
    pub fn set(&mut self, value: Val) -> Result<()> {
        if !self.ty.mutable {
            return Err(Error::ImmutableGlobal);
        }
        value.expect_type(self.ty.content)?;
        self.value = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::types::ValType;

    #[test]
    fn mismatched_write_keeps_value() {
        let mut g = GlobalInstance::new(
            GlobalType {
                content: ValType::I32,
                mutable: true,
            },
            Val::I32(7),
        )
        .unwrap();
        assert!(matches!(
            g.set(Val::I64(1)),
            Err(Error::TypeNotMatch { .. })
        ));
        assert_eq!(g.get(), Val::I32(7));
        g.set(Val::I32(8)).unwrap();
        assert_eq!(g.get(), Val::I32(8));
    }

    #[test]
    fn immutable_rejects_writes() {
        let mut g = GlobalInstance::new(
            GlobalType {
                content: ValType::F32,
                mutable: false,
            },
            Val::F32(1.0),
        )
        .unwrap();
        assert!(matches!(g.set(Val::F32(2.0)), Err(Error::ImmutableGlobal)));
        assert_eq!(g.get(), Val::F32(1.0));
    }
}
