//! Stack-only numeric operators.

use crate::error::{Result, Trap};
use crate::interpreter::stack::ValueStack;
use crate::module::instr::NumOp;
use crate::value::Val;

macro_rules! unop {
    ($stack:expr, $pop:ident, $wrap:path, |$a:ident| $body:expr) => {{
        let $a = $stack.$pop()?;
        $stack.push($wrap($body));
    }};
}

macro_rules! binop {
    ($stack:expr, $pop:ident, $wrap:path, |$a:ident, $b:ident| $body:expr) => {{
        let $b = $stack.$pop()?;
        let $a = $stack.$pop()?;
        $stack.push($wrap($body));
    }};
}

macro_rules! cmpop {
    ($stack:expr, $pop:ident, |$a:ident, $b:ident| $body:expr) => {{
        let $b = $stack.$pop()?;
        let $a = $stack.$pop()?;
        $stack.push(Val::I32(($body) as i32));
    }};
}

/// Binary operator that may trap.
macro_rules! binop_trap {
    ($stack:expr, $pop:ident, $wrap:path, |$a:ident, $b:ident| $body:expr) => {{
        let $b = $stack.$pop()?;
        let $a = $stack.$pop()?;
        let result: std::result::Result<_, Trap> = $body;
        $stack.push($wrap(result?));
    }};
}

/// Trapping float-to-int truncation. `$lo` is exclusive, `$hi` exclusive.
macro_rules! trunc_op {
    ($stack:expr, $pop:ident, $wrap:path, $int:ty, $lo:expr, $hi:expr) => {{
        let a = $stack.$pop()?;
        if a.is_nan() {
            return Err(Trap::InvalidConversionToInteger.into());
        }
        let t = a.trunc();
        if !(t > $lo && t < $hi) {
            return Err(Trap::IntegerOverflow.into());
        }
        $stack.push($wrap(t as $int as _));
    }};
}

/// Saturating truncation; Rust's float-to-int casts already saturate and
/// map NaN to zero.
macro_rules! trunc_sat {
    ($stack:expr, $pop:ident, $wrap:path, $int:ty) => {{
        let a = $stack.$pop()?;
        $stack.push($wrap(a as $int as _));
    }};
}

pub(crate) fn exec(stack: &mut ValueStack, op: NumOp) -> Result<()> {
    use NumOp::*;
    match op {
        I32Eqz => unop!(stack, pop_i32, Val::I32, |a| (a == 0) as i32),
        I32Eq => cmpop!(stack, pop_i32, |a, b| a == b),
        I32Ne => cmpop!(stack, pop_i32, |a, b| a != b),
        I32LtS => cmpop!(stack, pop_i32, |a, b| a < b),
        I32LtU => cmpop!(stack, pop_i32, |a, b| (a as u32) < (b as u32)),
        I32GtS => cmpop!(stack, pop_i32, |a, b| a > b),
        I32GtU => cmpop!(stack, pop_i32, |a, b| (a as u32) > (b as u32)),
        I32LeS => cmpop!(stack, pop_i32, |a, b| a <= b),
        I32LeU => cmpop!(stack, pop_i32, |a, b| (a as u32) <= (b as u32)),
        I32GeS => cmpop!(stack, pop_i32, |a, b| a >= b),
        I32GeU => cmpop!(stack, pop_i32, |a, b| (a as u32) >= (b as u32)),

        I64Eqz => {
            let a = stack.pop_i64()?;
            stack.push(Val::I32((a == 0) as i32));
        }
        I64Eq => cmpop!(stack, pop_i64, |a, b| a == b),
        I64Ne => cmpop!(stack, pop_i64, |a, b| a != b),
        I64LtS => cmpop!(stack, pop_i64, |a, b| a < b),
        I64LtU => cmpop!(stack, pop_i64, |a, b| (a as u64) < (b as u64)),
        I64GtS => cmpop!(stack, pop_i64, |a, b| a > b),
        I64GtU => cmpop!(stack, pop_i64, |a, b| (a as u64) > (b as u64)),
        I64LeS => cmpop!(stack, pop_i64, |a, b| a <= b),
        I64LeU => cmpop!(stack, pop_i64, |a, b| (a as u64) <= (b as u64)),
        I64GeS => cmpop!(stack, pop_i64, |a, b| a >= b),
        I64GeU => cmpop!(stack, pop_i64, |a, b| (a as u64) >= (b as u64)),

        F32Eq => cmpop!(stack, pop_f32, |a, b| a == b),
        F32Ne => cmpop!(stack, pop_f32, |a, b| a != b),
        F32Lt => cmpop!(stack, pop_f32, |a, b| a < b),
        F32Gt => cmpop!(stack, pop_f32, |a, b| a > b),
        F32Le => cmpop!(stack, pop_f32, |a, b| a <= b),
        F32Ge => cmpop!(stack, pop_f32, |a, b| a >= b),
        F64Eq => cmpop!(stack, pop_f64, |a, b| a == b),
        F64Ne => cmpop!(stack, pop_f64, |a, b| a != b),
        F64Lt => cmpop!(stack, pop_f64, |a, b| a < b),
        F64Gt => cmpop!(stack, pop_f64, |a, b| a > b),
        F64Le => cmpop!(stack, pop_f64, |a, b| a <= b),
        F64Ge => cmpop!(stack, pop_f64, |a, b| a >= b),

        I32Clz => unop!(stack, pop_i32, Val::I32, |a| a.leading_zeros() as i32),
        I32Ctz => unop!(stack, pop_i32, Val::I32, |a| a.trailing_zeros() as i32),
        I32Popcnt => unop!(stack, pop_i32, Val::I32, |a| a.count_ones() as i32),
        I32Add => binop!(stack, pop_i32, Val::I32, |a, b| a.wrapping_add(b)),
        I32Sub => binop!(stack, pop_i32, Val::I32, |a, b| a.wrapping_sub(b)),
        I32Mul => binop!(stack, pop_i32, Val::I32, |a, b| a.wrapping_mul(b)),
        I32DivS => binop_trap!(stack, pop_i32, Val::I32, |a, b| {
            if b == 0 {
                Err(Trap::IntegerDivideByZero)
            } else if a == i32::MIN && b == -1 {
                Err(Trap::IntegerOverflow)
            } else {
                Ok(a / b)
            }
        }),
        I32DivU => binop_trap!(stack, pop_i32, Val::I32, |a, b| {
            (a as u32)
                .checked_div(b as u32)
                .map(|v| v as i32)
                .ok_or(Trap::IntegerDivideByZero)
        }),
        I32RemS => binop_trap!(stack, pop_i32, Val::I32, |a, b| {
            if b == 0 {
                Err(Trap::IntegerDivideByZero)
            } else {
                Ok(a.wrapping_rem(b))
            }
        }),
        I32RemU => binop_trap!(stack, pop_i32, Val::I32, |a, b| {
            (a as u32)
                .checked_rem(b as u32)
                .map(|v| v as i32)
                .ok_or(Trap::IntegerDivideByZero)
        }),
        I32And => binop!(stack, pop_i32, Val::I32, |a, b| a & b),
        I32Or => binop!(stack, pop_i32, Val::I32, |a, b| a | b),
        I32Xor => binop!(stack, pop_i32, Val::I32, |a, b| a ^ b),
        I32Shl => binop!(stack, pop_i32, Val::I32, |a, b| a.wrapping_shl(b as u32)),
        I32ShrS => binop!(stack, pop_i32, Val::I32, |a, b| a.wrapping_shr(b as u32)),
        I32ShrU => binop!(stack, pop_i32, Val::I32, |a, b| {
            (a as u32).wrapping_shr(b as u32) as i32
        }),
        I32Rotl => binop!(stack, pop_i32, Val::I32, |a, b| {
            (a as u32).rotate_left(b as u32 % 32) as i32
        }),
        I32Rotr => binop!(stack, pop_i32, Val::I32, |a, b| {
            (a as u32).rotate_right(b as u32 % 32) as i32
        }),

        I64Clz => unop!(stack, pop_i64, Val::I64, |a| a.leading_zeros() as i64),
        I64Ctz => unop!(stack, pop_i64, Val::I64, |a| a.trailing_zeros() as i64),
        I64Popcnt => unop!(stack, pop_i64, Val::I64, |a| a.count_ones() as i64),
        I64Add => binop!(stack, pop_i64, Val::I64, |a, b| a.wrapping_add(b)),
        I64Sub => binop!(stack, pop_i64, Val::I64, |a, b| a.wrapping_sub(b)),
        I64Mul => binop!(stack, pop_i64, Val::I64, |a, b| a.wrapping_mul(b)),
        I64DivS => binop_trap!(stack, pop_i64, Val::I64, |a, b| {
            if b == 0 {
                Err(Trap::IntegerDivideByZero)
            } else if a == i64::MIN && b == -1 {
                Err(Trap::IntegerOverflow)
            } else {
                Ok(a / b)
            }
        }),
        I64DivU => binop_trap!(stack, pop_i64, Val::I64, |a, b| {
            (a as u64)
                .checked_div(b as u64)
                .map(|v| v as i64)
                .ok_or(Trap::IntegerDivideByZero)
        }),
        I64RemS => binop_trap!(stack, pop_i64, Val::I64, |a, b| {
            if b == 0 {
                Err(Trap::IntegerDivideByZero)
            } else {
                Ok(a.wrapping_rem(b))
            }
        }),
        I64RemU => binop_trap!(stack, pop_i64, Val::I64, |a, b| {
            (a as u64)
                .checked_rem(b as u64)
                .map(|v| v as i64)
                .ok_or(Trap::IntegerDivideByZero)
        }),
        I64And => binop!(stack, pop_i64, Val::I64, |a, b| a & b),
        I64Or => binop!(stack, pop_i64, Val::I64, |a, b| a | b),
        I64Xor => binop!(stack, pop_i64, Val::I64, |a, b| a ^ b),
        I64Shl => binop!(stack, pop_i64, Val::I64, |a, b| a.wrapping_shl(b as u32)),
        I64ShrS => binop!(stack, pop_i64, Val::I64, |a, b| a.wrapping_shr(b as u32)),
        I64ShrU => binop!(stack, pop_i64, Val::I64, |a, b| {
            (a as u64).wrapping_shr(b as u32) as i64
        }),
        I64Rotl => binop!(stack, pop_i64, Val::I64, |a, b| {
            (a as u64).rotate_left((b as u64 % 64) as u32) as i64
        }),
        I64Rotr => binop!(stack, pop_i64, Val::I64, |a, b| {
            (a as u64).rotate_right((b as u64 % 64) as u32) as i64
        }),

        F32Abs => unop!(stack, pop_f32, Val::F32, |a| f32::from_bits(a.to_bits() & 0x7fff_ffff)),
        F32Neg => unop!(stack, pop_f32, Val::F32, |a| f32::from_bits(a.to_bits() ^ 0x8000_0000)),
        F32Ceil => unop!(stack, pop_f32, Val::F32, |a| a.ceil()),
        F32Floor => unop!(stack, pop_f32, Val::F32, |a| a.floor()),
        F32Trunc => unop!(stack, pop_f32, Val::F32, |a| a.trunc()),
        F32Nearest => unop!(stack, pop_f32, Val::F32, |a| wasm_nearest(a)),
        F32Sqrt => unop!(stack, pop_f32, Val::F32, |a| a.sqrt()),
        F32Add => binop!(stack, pop_f32, Val::F32, |a, b| a + b),
        F32Sub => binop!(stack, pop_f32, Val::F32, |a, b| a - b),
        F32Mul => binop!(stack, pop_f32, Val::F32, |a, b| a * b),
        F32Div => binop!(stack, pop_f32, Val::F32, |a, b| a / b),
        F32Min => binop!(stack, pop_f32, Val::F32, |a, b| wasm_min(a, b)),
        F32Max => binop!(stack, pop_f32, Val::F32, |a, b| wasm_max(a, b)),
        F32Copysign => binop!(stack, pop_f32, Val::F32, |a, b| a.copysign(b)),

        F64Abs => unop!(stack, pop_f64, Val::F64, |a| {
            f64::from_bits(a.to_bits() & 0x7fff_ffff_ffff_ffff)
        }),
        F64Neg => unop!(stack, pop_f64, Val::F64, |a| {
            f64::from_bits(a.to_bits() ^ 0x8000_0000_0000_0000)
        }),
        F64Ceil => unop!(stack, pop_f64, Val::F64, |a| a.ceil()),
        F64Floor => unop!(stack, pop_f64, Val::F64, |a| a.floor()),
        F64Trunc => unop!(stack, pop_f64, Val::F64, |a| a.trunc()),
        F64Nearest => unop!(stack, pop_f64, Val::F64, |a| wasm_nearest(a)),
        F64Sqrt => unop!(stack, pop_f64, Val::F64, |a| a.sqrt()),
        F64Add => binop!(stack, pop_f64, Val::F64, |a, b| a + b),
        F64Sub => binop!(stack, pop_f64, Val::F64, |a, b| a - b),
        F64Mul => binop!(stack, pop_f64, Val::F64, |a, b| a * b),
        F64Div => binop!(stack, pop_f64, Val::F64, |a, b| a / b),
        F64Min => binop!(stack, pop_f64, Val::F64, |a, b| wasm_min(a, b)),
        F64Max => binop!(stack, pop_f64, Val::F64, |a, b| wasm_max(a, b)),
        F64Copysign => binop!(stack, pop_f64, Val::F64, |a, b| a.copysign(b)),

        I32WrapI64 => unop!(stack, pop_i64, Val::I32, |a| a as i32),
        I32TruncF32S => trunc_op!(stack, pop_f32, Val::I32, i32, -2147483904.0f32, 2147483648.0f32),
        I32TruncF32U => trunc_op!(stack, pop_f32, Val::I32, u32, -1.0f32, 4294967296.0f32),
        I32TruncF64S => trunc_op!(stack, pop_f64, Val::I32, i32, -2147483649.0f64, 2147483648.0f64),
        I32TruncF64U => trunc_op!(stack, pop_f64, Val::I32, u32, -1.0f64, 4294967296.0f64),
        I64ExtendI32S => unop!(stack, pop_i32, Val::I64, |a| a as i64),
        I64ExtendI32U => unop!(stack, pop_i32, Val::I64, |a| a as u32 as i64),
        I64TruncF32S => trunc_op!(
            stack, pop_f32, Val::I64, i64,
            -9223373136366403584.0f32,
            9223372036854775808.0f32
        ),
        I64TruncF32U => trunc_op!(
            stack, pop_f32, Val::I64, u64,
            -1.0f32,
            18446744073709551616.0f32
        ),
        I64TruncF64S => trunc_op!(
            stack, pop_f64, Val::I64, i64,
            -9223372036854777856.0f64,
            9223372036854775808.0f64
        ),
        I64TruncF64U => trunc_op!(
            stack, pop_f64, Val::I64, u64,
            -1.0f64,
            18446744073709551616.0f64
        ),
        F32ConvertI32S => unop!(stack, pop_i32, Val::F32, |a| a as f32),
        F32ConvertI32U => unop!(stack, pop_i32, Val::F32, |a| a as u32 as f32),
        F32ConvertI64S => unop!(stack, pop_i64, Val::F32, |a| a as f32),
        F32ConvertI64U => unop!(stack, pop_i64, Val::F32, |a| a as u64 as f32),
        F32DemoteF64 => unop!(stack, pop_f64, Val::F32, |a| a as f32),
        F64ConvertI32S => unop!(stack, pop_i32, Val::F64, |a| a as f64),
        F64ConvertI32U => unop!(stack, pop_i32, Val::F64, |a| a as u32 as f64),
        F64ConvertI64S => unop!(stack, pop_i64, Val::F64, |a| a as f64),
        F64ConvertI64U => unop!(stack, pop_i64, Val::F64, |a| a as u64 as f64),
        F64PromoteF32 => unop!(stack, pop_f32, Val::F64, |a| a as f64),
        I32ReinterpretF32 => unop!(stack, pop_f32, Val::I32, |a| a.to_bits() as i32),
        I64ReinterpretF64 => unop!(stack, pop_f64, Val::I64, |a| a.to_bits() as i64),
        F32ReinterpretI32 => unop!(stack, pop_i32, Val::F32, |a| f32::from_bits(a as u32)),
        F64ReinterpretI64 => unop!(stack, pop_i64, Val::F64, |a| f64::from_bits(a as u64)),
        I32Extend8S => unop!(stack, pop_i32, Val::I32, |a| a as i8 as i32),
        I32Extend16S => unop!(stack, pop_i32, Val::I32, |a| a as i16 as i32),
        I64Extend8S => unop!(stack, pop_i64, Val::I64, |a| a as i8 as i64),
        I64Extend16S => unop!(stack, pop_i64, Val::I64, |a| a as i16 as i64),
        I64Extend32S => unop!(stack, pop_i64, Val::I64, |a| a as i32 as i64),
        I32TruncSatF32S => trunc_sat!(stack, pop_f32, Val::I32, i32),
        I32TruncSatF32U => trunc_sat!(stack, pop_f32, Val::I32, u32),
        I32TruncSatF64S => trunc_sat!(stack, pop_f64, Val::I32, i32),
        I32TruncSatF64U => trunc_sat!(stack, pop_f64, Val::I32, u32),
        I64TruncSatF32S => trunc_sat!(stack, pop_f32, Val::I64, i64),
        I64TruncSatF32U => trunc_sat!(stack, pop_f32, Val::I64, u64),
        I64TruncSatF64S => trunc_sat!(stack, pop_f64, Val::I64, i64),
        I64TruncSatF64U => trunc_sat!(stack, pop_f64, Val::I64, u64),
    }
    Ok(())
}

/// WASM float min with NaN propagation and signed zero handling.
fn wasm_min<F: Float>(a: F, b: F) -> F {
    if a.is_nan() || b.is_nan() {
        F::NAN
    } else if a.is_zero() && b.is_zero() {
        if a.is_sign_negative() || b.is_sign_negative() {
            F::NEG_ZERO
        } else {
            F::ZERO
        }
    } else {
        a.float_min(b)
    }
}

/// WASM float max with NaN propagation and signed zero handling.
fn wasm_max<F: Float>(a: F, b: F) -> F {
    if a.is_nan() || b.is_nan() {
        F::NAN
    } else if a.is_zero() && b.is_zero() {
        if a.is_sign_positive() || b.is_sign_positive() {
            F::ZERO
        } else {
            F::NEG_ZERO
        }
    } else {
        a.float_max(b)
    }
}

/// Round to nearest, ties to even. Keeps the sign of zero results.
fn wasm_nearest<F: Float>(a: F) -> F {
    a.round_even()
}

trait Float: Copy {
    const NAN: Self;
    const ZERO: Self;
    const NEG_ZERO: Self;
    fn is_nan(self) -> bool;
    fn is_zero(self) -> bool;
    fn is_sign_negative(self) -> bool;
    fn is_sign_positive(self) -> bool;
    fn float_min(self, other: Self) -> Self;
    fn float_max(self, other: Self) -> Self;
    fn round_even(self) -> Self;
}

macro_rules! impl_float {
    ($($ty:ty),*) => {
        $(
            impl Float for $ty {
                const NAN: Self = <$ty>::NAN;
                const ZERO: Self = 0.0;
                const NEG_ZERO: Self = -0.0;
                fn is_nan(self) -> bool { self.is_nan() }
                fn is_zero(self) -> bool { self == 0.0 }
                fn is_sign_negative(self) -> bool { self.is_sign_negative() }
                fn is_sign_positive(self) -> bool { self.is_sign_positive() }
                fn float_min(self, other: Self) -> Self { self.min(other) }
                fn float_max(self, other: Self) -> Self { self.max(other) }
                fn round_even(self) -> Self { self.round_ties_even() }
            }
        )*
    };
}

impl_float!(f32, f64);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn run(op: NumOp, args: &[Val]) -> Result<Val> {
        let mut stack = ValueStack::default();
        stack.extend(args.iter().copied());
        exec(&mut stack, op)?;
        stack.pop()
    }

    fn trap_of(result: Result<Val>) -> Trap {
        match result {
            Err(Error::Trap(trap)) => trap,
            other => panic!("expected trap, got {other:?}"),
        }
    }

    #[test]
    fn division_traps() {
        assert!(matches!(
            trap_of(run(NumOp::I32DivS, &[Val::I32(1), Val::I32(0)])),
            Trap::IntegerDivideByZero
        ));
        assert!(matches!(
            trap_of(run(NumOp::I32DivS, &[Val::I32(i32::MIN), Val::I32(-1)])),
            Trap::IntegerOverflow
        ));
        assert_eq!(
            run(NumOp::I32RemS, &[Val::I32(i32::MIN), Val::I32(-1)]).unwrap(),
            Val::I32(0)
        );
        assert_eq!(
            run(NumOp::I64DivU, &[Val::I64(-1), Val::I64(2)]).unwrap(),
            Val::I64(i64::MAX)
        );
    }

    #[test]
    fn truncation_bounds() {
        assert_eq!(
            run(NumOp::I32TruncF32S, &[Val::F32(-2147483648.0)]).unwrap(),
            Val::I32(i32::MIN)
        );
        assert!(matches!(
            trap_of(run(NumOp::I32TruncF32S, &[Val::F32(2147483648.0)])),
            Trap::IntegerOverflow
        ));
        assert!(matches!(
            trap_of(run(NumOp::I32TruncF64U, &[Val::F64(f64::NAN)])),
            Trap::InvalidConversionToInteger
        ));
        assert_eq!(
            run(NumOp::I32TruncF64U, &[Val::F64(-0.9)]).unwrap(),
            Val::I32(0)
        );
        assert_eq!(
            run(NumOp::I32TruncSatF32U, &[Val::F32(-5.0)]).unwrap(),
            Val::I32(0)
        );
        assert_eq!(
            run(NumOp::I64TruncSatF64S, &[Val::F64(f64::NAN)]).unwrap(),
            Val::I64(0)
        );
    }

    #[test]
    fn float_edge_cases() {
        let min = run(NumOp::F32Min, &[Val::F32(0.0), Val::F32(-0.0)]).unwrap();
        assert!(min.as_f32().unwrap().is_sign_negative());
        let max = run(NumOp::F64Max, &[Val::F64(f64::NAN), Val::F64(1.0)]).unwrap();
        assert!(max.as_f64().unwrap().is_nan());
        assert_eq!(run(NumOp::F32Nearest, &[Val::F32(2.5)]).unwrap(), Val::F32(2.0));
        assert_eq!(run(NumOp::F64Nearest, &[Val::F64(3.5)]).unwrap(), Val::F64(4.0));
        let neg = run(NumOp::F32Neg, &[Val::F32(f32::from_bits(0x7fc0_0001))]).unwrap();
        assert_eq!(neg.as_f32().unwrap().to_bits(), 0xffc0_0001);
    }

    #[test]
    fn shifts_and_rotates_mask_counts() {
        assert_eq!(run(NumOp::I32Shl, &[Val::I32(1), Val::I32(33)]).unwrap(), Val::I32(2));
        assert_eq!(
            run(NumOp::I32Rotr, &[Val::I32(1), Val::I32(1)]).unwrap(),
            Val::I32(i32::MIN)
        );
        assert_eq!(
            run(NumOp::I64ShrU, &[Val::I64(-1), Val::I64(63)]).unwrap(),
            Val::I64(1)
        );
    }
}
