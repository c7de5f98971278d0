//! Lane-wise evaluation of the 128-bit vector operators.
//!
//! Vectors are held as a `u128` in little-endian lane order and split
//! into lane arrays at each operator.

use super::Value;
use riptide_environ::{SimdBinaryOp, SimdShape, SimdShiftOp, SimdUnaryOp};

fn to_u8x16(v: u128) -> [u8; 16] {
    v.to_le_bytes()
}

fn from_u8x16(lanes: [u8; 16]) -> u128 {
    u128::from_le_bytes(lanes)
}

fn to_u16x8(v: u128) -> [u16; 8] {
    let b = v.to_le_bytes();
    core::array::from_fn(|i| u16::from_le_bytes([b[2 * i], b[2 * i + 1]]))
}

fn from_u16x8(lanes: [u16; 8]) -> u128 {
    let mut b = [0; 16];
    for (i, lane) in lanes.iter().enumerate() {
        b[2 * i..2 * i + 2].copy_from_slice(&lane.to_le_bytes());
    }
    u128::from_le_bytes(b)
}

fn to_u32x4(v: u128) -> [u32; 4] {
    let b = v.to_le_bytes();
    core::array::from_fn(|i| {
        u32::from_le_bytes([b[4 * i], b[4 * i + 1], b[4 * i + 2], b[4 * i + 3]])
    })
}

fn from_u32x4(lanes: [u32; 4]) -> u128 {
    let mut b = [0; 16];
    for (i, lane) in lanes.iter().enumerate() {
        b[4 * i..4 * i + 4].copy_from_slice(&lane.to_le_bytes());
    }
    u128::from_le_bytes(b)
}

fn to_u64x2(v: u128) -> [u64; 2] {
    [v as u64, (v >> 64) as u64]
}

fn from_u64x2(lanes: [u64; 2]) -> u128 {
    lanes[0] as u128 | (lanes[1] as u128) << 64
}

fn to_f32x4(v: u128) -> [f32; 4] {
    let lanes = to_u32x4(v);
    core::array::from_fn(|i| f32::from_bits(lanes[i]))
}

fn from_f32x4(lanes: [f32; 4]) -> u128 {
    from_u32x4(core::array::from_fn(|i| lanes[i].to_bits()))
}

fn to_f64x2(v: u128) -> [f64; 2] {
    let lanes = to_u64x2(v);
    [f64::from_bits(lanes[0]), f64::from_bits(lanes[1])]
}

fn from_f64x2(lanes: [f64; 2]) -> u128 {
    from_u64x2([lanes[0].to_bits(), lanes[1].to_bits()])
}

pub(super) fn splat(shape: SimdShape, value: Value) -> u128 {
    match shape {
        SimdShape::I8x16 => {
            let v = int_operand(&value) as u8;
            from_u8x16([v; 16])
        }
        SimdShape::I16x8 => {
            let v = int_operand(&value) as u16;
            from_u16x8([v; 8])
        }
        SimdShape::I32x4 => {
            let v = int_operand(&value) as u32;
            from_u32x4([v; 4])
        }
        SimdShape::I64x2 => {
            let v = int_operand(&value) as u64;
            from_u64x2([v; 2])
        }
        SimdShape::F32x4 => match value {
            Value::F32(bits) => from_u32x4([bits; 4]),
            _ => unreachable!("validated operand type"),
        },
        SimdShape::F64x2 => match value {
            Value::F64(bits) => from_u64x2([bits; 2]),
            _ => unreachable!("validated operand type"),
        },
    }
}

fn int_operand(value: &Value) -> u64 {
    match value {
        Value::I32(v) => *v as u32 as u64,
        Value::I64(v) => *v as u64,
        _ => unreachable!("validated operand type"),
    }
}

pub(super) fn extract_lane(shape: SimdShape, lane: u8, signed: bool, v: u128) -> Value {
    let lane = lane as usize;
    match shape {
        SimdShape::I8x16 => {
            let b = to_u8x16(v)[lane];
            Value::I32(if signed { b as i8 as i32 } else { b as i32 })
        }
        SimdShape::I16x8 => {
            let w = to_u16x8(v)[lane];
            Value::I32(if signed { w as i16 as i32 } else { w as i32 })
        }
        SimdShape::I32x4 => Value::I32(to_u32x4(v)[lane] as i32),
        SimdShape::I64x2 => Value::I64(to_u64x2(v)[lane] as i64),
        SimdShape::F32x4 => Value::F32(to_u32x4(v)[lane]),
        SimdShape::F64x2 => Value::F64(to_u64x2(v)[lane]),
    }
}

pub(super) fn replace_lane(shape: SimdShape, lane: u8, v: u128, value: Value) -> u128 {
    let lane = lane as usize;
    match shape {
        SimdShape::I8x16 => {
            let mut lanes = to_u8x16(v);
            lanes[lane] = int_operand(&value) as u8;
            from_u8x16(lanes)
        }
        SimdShape::I16x8 => {
            let mut lanes = to_u16x8(v);
            lanes[lane] = int_operand(&value) as u16;
            from_u16x8(lanes)
        }
        SimdShape::I32x4 => {
            let mut lanes = to_u32x4(v);
            lanes[lane] = int_operand(&value) as u32;
            from_u32x4(lanes)
        }
        SimdShape::I64x2 => {
            let mut lanes = to_u64x2(v);
            lanes[lane] = int_operand(&value) as u64;
            from_u64x2(lanes)
        }
        SimdShape::F32x4 => {
            let mut lanes = to_u32x4(v);
            lanes[lane] = match value {
                Value::F32(bits) => bits,
                _ => unreachable!("validated operand type"),
            };
            from_u32x4(lanes)
        }
        SimdShape::F64x2 => {
            let mut lanes = to_u64x2(v);
            lanes[lane] = match value {
                Value::F64(bits) => bits,
                _ => unreachable!("validated operand type"),
            };
            from_u64x2(lanes)
        }
    }
}

pub(super) fn shuffle(lanes: &[u8; 16], a: u128, b: u128) -> u128 {
    let a = to_u8x16(a);
    let b = to_u8x16(b);
    from_u8x16(core::array::from_fn(|i| {
        let sel = lanes[i] as usize;
        if sel < 16 {
            a[sel]
        } else {
            b[sel - 16]
        }
    }))
}

pub(super) fn swizzle(a: u128, selectors: u128) -> u128 {
    let a = to_u8x16(a);
    let selectors = to_u8x16(selectors);
    from_u8x16(core::array::from_fn(|i| {
        let sel = selectors[i] as usize;
        if sel < 16 {
            a[sel]
        } else {
            0
        }
    }))
}

pub(super) fn binary(op: SimdBinaryOp, shape: SimdShape, a: u128, b: u128) -> u128 {
    if shape.is_float() {
        return float_binary(op, shape, a, b);
    }
    macro_rules! int_lanes {
        ($to:ident, $from:ident, $uprim:ty, $iprim:ty) => {{
            let a = $to(a);
            let b = $to(b);
            let mask = |c: bool| if c { <$uprim>::MAX } else { 0 };
            $from(core::array::from_fn(|i| match op {
                SimdBinaryOp::Add => a[i].wrapping_add(b[i]),
                SimdBinaryOp::Sub => a[i].wrapping_sub(b[i]),
                SimdBinaryOp::Mul => a[i].wrapping_mul(b[i]),
                SimdBinaryOp::Eq => mask(a[i] == b[i]),
                SimdBinaryOp::Ne => mask(a[i] != b[i]),
                SimdBinaryOp::LtS => mask((a[i] as $iprim) < (b[i] as $iprim)),
                SimdBinaryOp::LtU => mask(a[i] < b[i]),
                SimdBinaryOp::GtS => mask((a[i] as $iprim) > (b[i] as $iprim)),
                SimdBinaryOp::GtU => mask(a[i] > b[i]),
                SimdBinaryOp::LeS => mask((a[i] as $iprim) <= (b[i] as $iprim)),
                SimdBinaryOp::LeU => mask(a[i] <= b[i]),
                SimdBinaryOp::GeS => mask((a[i] as $iprim) >= (b[i] as $iprim)),
                SimdBinaryOp::GeU => mask(a[i] >= b[i]),
                SimdBinaryOp::Div
                | SimdBinaryOp::Min
                | SimdBinaryOp::Max
                | SimdBinaryOp::Lt
                | SimdBinaryOp::Gt
                | SimdBinaryOp::Le
                | SimdBinaryOp::Ge => unreachable!("float-only vector operator"),
            }))
        }};
    }
    match shape {
        SimdShape::I8x16 => int_lanes!(to_u8x16, from_u8x16, u8, i8),
        SimdShape::I16x8 => int_lanes!(to_u16x8, from_u16x8, u16, i16),
        SimdShape::I32x4 => int_lanes!(to_u32x4, from_u32x4, u32, i32),
        SimdShape::I64x2 => int_lanes!(to_u64x2, from_u64x2, u64, i64),
        SimdShape::F32x4 | SimdShape::F64x2 => unreachable!("handled above"),
    }
}

fn float_binary(op: SimdBinaryOp, shape: SimdShape, a: u128, b: u128) -> u128 {
    // Comparisons produce integer lane masks, everything else stays float.
    macro_rules! float_lanes {
        ($to:ident, $from_float:ident, $from_int:ident, $uprim:ty) => {{
            let a = $to(a);
            let b = $to(b);
            let mask = |c: bool| if c { <$uprim>::MAX } else { 0 };
            match op {
                SimdBinaryOp::Add => $from_float(core::array::from_fn(|i| a[i] + b[i])),
                SimdBinaryOp::Sub => $from_float(core::array::from_fn(|i| a[i] - b[i])),
                SimdBinaryOp::Mul => $from_float(core::array::from_fn(|i| a[i] * b[i])),
                SimdBinaryOp::Div => $from_float(core::array::from_fn(|i| a[i] / b[i])),
                SimdBinaryOp::Min => $from_float(core::array::from_fn(|i| fmin(a[i], b[i]))),
                SimdBinaryOp::Max => $from_float(core::array::from_fn(|i| fmax(a[i], b[i]))),
                SimdBinaryOp::Eq => $from_int(core::array::from_fn(|i| mask(a[i] == b[i]))),
                SimdBinaryOp::Ne => $from_int(core::array::from_fn(|i| mask(a[i] != b[i]))),
                SimdBinaryOp::Lt => $from_int(core::array::from_fn(|i| mask(a[i] < b[i]))),
                SimdBinaryOp::Gt => $from_int(core::array::from_fn(|i| mask(a[i] > b[i]))),
                SimdBinaryOp::Le => $from_int(core::array::from_fn(|i| mask(a[i] <= b[i]))),
                SimdBinaryOp::Ge => $from_int(core::array::from_fn(|i| mask(a[i] >= b[i]))),
                _ => unreachable!("integer-only vector operator"),
            }
        }};
    }
    match shape {
        SimdShape::F32x4 => float_lanes!(to_f32x4, from_f32x4, from_u32x4, u32),
        SimdShape::F64x2 => float_lanes!(to_f64x2, from_f64x2, from_u64x2, u64),
        _ => unreachable!("float shape"),
    }
}

fn fmin<F: PartialOrd + Float>(a: F, b: F) -> F {
    if a.is_nan() || b.is_nan() {
        F::nan()
    } else if a == b {
        if a.is_sign_negative() {
            a
        } else {
            b
        }
    } else if a < b {
        a
    } else {
        b
    }
}

fn fmax<F: PartialOrd + Float>(a: F, b: F) -> F {
    if a.is_nan() || b.is_nan() {
        F::nan()
    } else if a == b {
        if a.is_sign_positive() {
            a
        } else {
            b
        }
    } else if a > b {
        a
    } else {
        b
    }
}

trait Float: Copy {
    fn nan() -> Self;
    fn is_nan(self) -> bool;
    fn is_sign_negative(self) -> bool;
    fn is_sign_positive(self) -> bool;
}

impl Float for f32 {
    fn nan() -> f32 {
        f32::NAN
    }
    fn is_nan(self) -> bool {
        f32::is_nan(self)
    }
    fn is_sign_negative(self) -> bool {
        f32::is_sign_negative(self)
    }
    fn is_sign_positive(self) -> bool {
        f32::is_sign_positive(self)
    }
}

impl Float for f64 {
    fn nan() -> f64 {
        f64::NAN
    }
    fn is_nan(self) -> bool {
        f64::is_nan(self)
    }
    fn is_sign_negative(self) -> bool {
        f64::is_sign_negative(self)
    }
    fn is_sign_positive(self) -> bool {
        f64::is_sign_positive(self)
    }
}

pub(super) fn unary(op: SimdUnaryOp, shape: SimdShape, v: u128) -> Value {
    macro_rules! int_lanes {
        ($to:ident, $from:ident, $iprim:ty, $uprim:ty) => {
            match op {
                SimdUnaryOp::Neg => {
                    let lanes = $to(v);
                    Value::V128($from(core::array::from_fn(|i| lanes[i].wrapping_neg())))
                }
                SimdUnaryOp::Abs => {
                    let lanes = $to(v);
                    Value::V128($from(core::array::from_fn(|i| {
                        (lanes[i] as $iprim).wrapping_abs() as $uprim
                    })))
                }
                SimdUnaryOp::AllTrue => {
                    let lanes = $to(v);
                    Value::I32(lanes.iter().all(|&l| l != 0) as i32)
                }
                SimdUnaryOp::Sqrt => unreachable!("float-only vector operator"),
            }
        };
    }
    match shape {
        SimdShape::I8x16 => int_lanes!(to_u8x16, from_u8x16, i8, u8),
        SimdShape::I16x8 => int_lanes!(to_u16x8, from_u16x8, i16, u16),
        SimdShape::I32x4 => int_lanes!(to_u32x4, from_u32x4, i32, u32),
        SimdShape::I64x2 => int_lanes!(to_u64x2, from_u64x2, i64, u64),
        SimdShape::F32x4 => {
            let lanes = to_f32x4(v);
            Value::V128(from_f32x4(core::array::from_fn(|i| match op {
                SimdUnaryOp::Neg => -lanes[i],
                SimdUnaryOp::Abs => lanes[i].abs(),
                SimdUnaryOp::Sqrt => lanes[i].sqrt(),
                SimdUnaryOp::AllTrue => unreachable!("integer-only vector operator"),
            })))
        }
        SimdShape::F64x2 => {
            let lanes = to_f64x2(v);
            Value::V128(from_f64x2(core::array::from_fn(|i| match op {
                SimdUnaryOp::Neg => -lanes[i],
                SimdUnaryOp::Abs => lanes[i].abs(),
                SimdUnaryOp::Sqrt => lanes[i].sqrt(),
                SimdUnaryOp::AllTrue => unreachable!("integer-only vector operator"),
            })))
        }
    }
}

pub(super) fn shift(op: SimdShiftOp, shape: SimdShape, v: u128, amount: u32) -> u128 {
    macro_rules! shift_lanes {
        ($to:ident, $from:ident, $iprim:ty, $bits:expr) => {{
            let lanes = $to(v);
            let amount = amount % $bits;
            $from(core::array::from_fn(|i| match op {
                SimdShiftOp::Shl => lanes[i] << amount,
                SimdShiftOp::ShrU => lanes[i] >> amount,
                SimdShiftOp::ShrS => ((lanes[i] as $iprim) >> amount) as _,
            }))
        }};
    }
    match shape {
        SimdShape::I8x16 => shift_lanes!(to_u8x16, from_u8x16, i8, 8),
        SimdShape::I16x8 => shift_lanes!(to_u16x8, from_u16x8, i16, 16),
        SimdShape::I32x4 => shift_lanes!(to_u32x4, from_u32x4, i32, 32),
        SimdShape::I64x2 => shift_lanes!(to_u64x2, from_u64x2, i64, 64),
        SimdShape::F32x4 | SimdShape::F64x2 => unreachable!("shifts are integer shaped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splat_fills_every_lane() {
        let v = splat(SimdShape::I16x8, Value::I32(0xbeef));
        assert_eq!(to_u16x8(v), [0xbeef; 8]);
    }

    #[test]
    fn extract_respects_signedness() {
        let v = from_u8x16([0x80; 16]);
        assert!(matches!(extract_lane(SimdShape::I8x16, 3, true, v), Value::I32(-128)));
        assert!(matches!(extract_lane(SimdShape::I8x16, 3, false, v), Value::I32(128)));
    }

    #[test]
    fn comparison_produces_lane_masks() {
        let a = from_u32x4([1, 5, 5, 9]);
        let b = from_u32x4([5, 5, 1, 9]);
        let out = binary(SimdBinaryOp::LtU, SimdShape::I32x4, a, b);
        assert_eq!(to_u32x4(out), [u32::MAX, 0, 0, 0]);
    }

    #[test]
    fn shift_amount_wraps_by_lane_width() {
        let v = from_u8x16([1; 16]);
        let out = shift(SimdShiftOp::Shl, SimdShape::I8x16, v, 9);
        assert_eq!(to_u8x16(out), [2; 16]);
    }

    #[test]
    fn swizzle_zeroes_out_of_range_selectors() {
        let a = from_u8x16(core::array::from_fn(|i| i as u8 + 10));
        let sel = from_u8x16([0, 15, 16, 255, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(to_u8x16(swizzle(a, sel))[..5], [10, 25, 0, 0, 12]);
    }

    #[test]
    fn float_min_keeps_negative_zero() {
        let a = from_f32x4([-0.0, 1.0, f32::NAN, 3.0]);
        let b = from_f32x4([0.0, 2.0, 1.0, f32::NAN]);
        let out = to_f32x4(binary(SimdBinaryOp::Min, SimdShape::F32x4, a, b));
        assert!(out[0].is_sign_negative() && out[0] == 0.0);
        assert_eq!(out[1], 1.0);
        assert!(out[2].is_nan() && out[3].is_nan());
    }
}
