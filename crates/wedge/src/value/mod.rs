use crate::error::{Error, Result};
use crate::module::types::ValType;
use crate::store::FuncAddr;

/// A reference value. `None` is the null reference of that type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ref {
    Func(Option<FuncAddr>),
    Extern(Option<u32>),
}

impl Ref {
    pub fn null(ty: ValType) -> Option<Ref> {
        match ty {
            ValType::FuncRef => Some(Ref::Func(None)),
            ValType::ExternRef => Some(Ref::Extern(None)),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Ref::Func(None) | Ref::Extern(None))
    }

    pub fn ty(&self) -> ValType {
        match self {
            Ref::Func(_) => ValType::FuncRef,
            Ref::Extern(_) => ValType::ExternRef,
        }
    }
}

/// Dynamic WASM value for untyped function calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Val {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Ref(Ref),
}

impl Val {
    pub fn ty(&self) -> ValType {
        match self {
            Val::I32(_) => ValType::I32,
            Val::I64(_) => ValType::I64,
            Val::F32(_) => ValType::F32,
            Val::F64(_) => ValType::F64,
            Val::Ref(r) => r.ty(),
        }
    }

    /// Default value of a local or fresh global of type `ty`.
    pub fn zero_for(ty: ValType) -> Val {
        match ty {
            ValType::I32 => Val::I32(0),
            ValType::I64 => Val::I64(0),
            ValType::F32 => Val::F32(0.0),
            ValType::F64 => Val::F64(0.0),
            ValType::FuncRef => Val::Ref(Ref::Func(None)),
            ValType::ExternRef => Val::Ref(Ref::Extern(None)),
        }
    }

    pub fn as_i32(&self) -> Result<i32> {
        match self {
            Val::I32(v) => Ok(*v),
            other => Err(mismatch(ValType::I32, other)),
        }
    }

    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Val::I64(v) => Ok(*v),
            other => Err(mismatch(ValType::I64, other)),
        }
    }

    pub fn as_f32(&self) -> Result<f32> {
        match self {
            Val::F32(v) => Ok(*v),
            other => Err(mismatch(ValType::F32, other)),
        }
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Val::F64(v) => Ok(*v),
            other => Err(mismatch(ValType::F64, other)),
        }
    }

    pub fn as_reference(&self) -> Result<Ref> {
        match self {
            Val::Ref(r) => Ok(*r),
            other => Err(mismatch(ValType::FuncRef, other)),
        }
    }

    /// Check this value against an expected type.
    pub fn expect_type(&self, expected: ValType) -> Result<()> {
        if self.ty() == expected {
            Ok(())
        } else {
            Err(mismatch(expected, self))
        }
    }

    /// Bitwise equality, which distinguishes NaN payloads and signed zeros.
    pub fn bits_eq(&self, other: &Val) -> bool {
        match (self, other) {
            (Val::F32(a), Val::F32(b)) => a.to_bits() == b.to_bits(),
            (Val::F64(a), Val::F64(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a == b,
        }
    }
}

fn mismatch(expected: ValType, found: &Val) -> Error {
    Error::TypeNotMatch {
        expected: vec![expected],
        found: vec![found.ty()],
    }
}

/// Check a whole argument or result list against its declared types. A
/// count mismatch reports both full lists.
pub(crate) fn check_types(vals: &[Val], tys: &[ValType]) -> Result<()> {
    if vals.len() != tys.len() {
        return Err(Error::TypeNotMatch {
            expected: tys.to_vec(),
            found: vals.iter().map(Val::ty).collect(),
        });
    }
    vals.iter()
        .zip(tys)
        .try_for_each(|(v, ty)| v.expect_type(*ty))
}

impl From<i32> for Val {
    fn from(v: i32) -> Self {
        Val::I32(v)
    }
}

impl From<i64> for Val {
    fn from(v: i64) -> Self {
        Val::I64(v)
    }
}

impl From<f32> for Val {
    fn from(v: f32) -> Self {
        Val::F32(v)
    }
}

impl From<f64> for Val {
    fn from(v: f64) -> Self {
        Val::F64(v)
    }
}

/// Convert a single Rust value to/from a `Val`.
pub trait WasmVal: Sized {
    fn to_val(&self) -> Val;
    fn from_val(val: &Val) -> Result<Self>;
}

macro_rules! impl_wasm_val {
    ($($ty:ty => $as:ident),* $(,)?) => {
        $(
            impl WasmVal for $ty {
                fn to_val(&self) -> Val {
                    Val::from(*self)
                }
                fn from_val(val: &Val) -> Result<Self> {
                    val.$as()
                }
            }

            impl WasmArgs for $ty {
                fn to_vals(&self) -> Vec<Val> {
                    vec![self.to_val()]
                }
            }

            impl WasmResults for $ty {
                fn from_vals(vals: &[Val]) -> Result<Self> {
                    expect_len(vals, 1)?;
                    Self::from_val(&vals[0])
                }
            }
        )*
    };
}

impl_wasm_val!(i32 => as_i32, i64 => as_i64, f32 => as_f32, f64 => as_f64);

/// Convert Rust types into WASM call arguments.
pub trait WasmArgs {
    fn to_vals(&self) -> Vec<Val>;
}

/// Convert WASM results back into Rust types.
pub trait WasmResults: Sized {
    fn from_vals(vals: &[Val]) -> Result<Self>;
}

impl WasmArgs for () {
    fn to_vals(&self) -> Vec<Val> {
        vec![]
    }
}

impl WasmResults for () {
    fn from_vals(vals: &[Val]) -> Result<Self> {
        expect_len(vals, 0)
    }
}

fn expect_len(vals: &[Val], expected: usize) -> Result<()> {
    if vals.len() == expected {
        Ok(())
    } else {
        Err(Error::Canonical(format!(
            "expected {expected} results, got {}",
            vals.len()
        )))
    }
}

macro_rules! impl_wasm_tuples {
    ($(($($T:ident),+)),* $(,)?) => {
        $(
            impl<$($T: WasmVal),+> WasmArgs for ($($T,)+) {
                #[allow(non_snake_case)]
                fn to_vals(&self) -> Vec<Val> {
                    let ($($T,)+) = self;
                    vec![$($T.to_val()),+]
                }
            }

            impl<$($T: WasmVal),+> WasmResults for ($($T,)+) {
                #[allow(non_snake_case)]
                fn from_vals(vals: &[Val]) -> Result<Self> {
                    expect_len(vals, impl_wasm_tuples!(@count $($T),+))?;
                    let mut iter = vals.iter();
                    Ok(($({
                        let v: &Val = iter
                            .next()
                            .ok_or_else(|| Error::Canonical("missing result".into()))?;
                        $T::from_val(v)?
                    },)+))
                }
            }
        )*
    };

    (@count $($T:ident),+) => {
        <[()]>::len(&[$(impl_wasm_tuples!(@unit $T)),+])
    };

    (@unit $T:ident) => { () };
}

impl_wasm_tuples!(
    (A),
    (A, B),
    (A, B, C),
    (A, B, C, D),
    (A, B, C, D, E),
    (A, B, C, D, E, F),
    (A, B, C, D, E, F, G),
    (A, B, C, D, E, F, G, H),
);
