// Numeric payload of a Number value.
// A Number owns exactly one representation; every other width is computed on read.
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NumberType {
    U8 = 1,
    I8 = 2,
    U16 = 3,
    I16 = 4,
    U32 = 5,
    I32 = 6,
    U64 = 7,
    I64 = 8,
    F32 = 9,
    F64 = 10,
}

impl NumberType {
    pub fn from_id(id: u64) -> Option<Self> {
        Some(match id {
            1 => NumberType::U8,
            2 => NumberType::I8,
            3 => NumberType::U16,
            4 => NumberType::I16,
            5 => NumberType::U32,
            6 => NumberType::I32,
            7 => NumberType::U64,
            8 => NumberType::I64,
            9 => NumberType::F32,
            10 => NumberType::F64,
            _ => return None,
        })
    }

    /// Payload width in bytes
    pub fn width(self) -> usize {
        match self {
            NumberType::U8 | NumberType::I8 => 1,
            NumberType::U16 | NumberType::I16 => 2,
            NumberType::U32 | NumberType::I32 | NumberType::F32 => 4,
            NumberType::U64 | NumberType::I64 | NumberType::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, NumberType::F32 | NumberType::F64)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Number {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
}

/// Smallest of 1/2/4/8 bytes able to hold `v`
pub fn need_bytes(v: u64) -> usize {
    if v < 1 << 8 {
        1
    } else if v < 1 << 16 {
        2
    } else if v < 1 << 32 {
        4
    } else {
        8
    }
}

impl Number {
    /// Narrowest unsigned representation of `v`
    pub fn from_unsigned(v: u64) -> Self {
        match need_bytes(v) {
            1 => Number::U8(v as u8),
            2 => Number::U16(v as u16),
            4 => Number::U32(v as u32),
            _ => Number::U64(v),
        }
    }

    /// Narrowest signed representation of `v`. Non-negative values use the unsigned rule.
    pub fn from_signed(v: i64) -> Self {
        if v >= 0 {
            return Self::from_unsigned(v as u64);
        }
        match need_bytes(v.unsigned_abs()) {
            // -128 needs one byte, -129 does not fit an i8
            1 if v >= i8::MIN as i64 => Number::I8(v as i8),
            1 | 2 if v >= i16::MIN as i64 => Number::I16(v as i16),
            1 | 2 | 4 if v >= i32::MIN as i64 => Number::I32(v as i32),
            _ => Number::I64(v),
        }
    }

    /// Stores an f32 when `v` survives the round trip through it exactly.
    pub fn from_float(v: f64) -> Self {
        let narrow = v as f32;
        if (narrow as f64) == v || (v.is_nan() && narrow.is_nan()) {
            Number::F32(narrow)
        } else {
            Number::F64(v)
        }
    }

    pub fn number_type(&self) -> NumberType {
        match self {
            Number::U8(_) => NumberType::U8,
            Number::I8(_) => NumberType::I8,
            Number::U16(_) => NumberType::U16,
            Number::I16(_) => NumberType::I16,
            Number::U32(_) => NumberType::U32,
            Number::I32(_) => NumberType::I32,
            Number::U64(_) => NumberType::U64,
            Number::I64(_) => NumberType::I64,
            Number::F32(_) => NumberType::F32,
            Number::F64(_) => NumberType::F64,
        }
    }

    /// Zero of the same subtype
    pub fn zero(ty: NumberType) -> Self {
        match ty {
            NumberType::U8 => Number::U8(0),
            NumberType::I8 => Number::I8(0),
            NumberType::U16 => Number::U16(0),
            NumberType::I16 => Number::I16(0),
            NumberType::U32 => Number::U32(0),
            NumberType::I32 => Number::I32(0),
            NumberType::U64 => Number::U64(0),
            NumberType::I64 => Number::I64(0),
            NumberType::F32 => Number::F32(0.0),
            NumberType::F64 => Number::F64(0.0),
        }
    }

    pub fn is_float(&self) -> bool {
        self.number_type().is_float()
    }

    /// Integer value widened losslessly; `None` for floats
    pub fn as_i128(&self) -> Option<i128> {
        Some(match *self {
            Number::U8(v) => v as i128,
            Number::I8(v) => v as i128,
            Number::U16(v) => v as i128,
            Number::I16(v) => v as i128,
            Number::U32(v) => v as i128,
            Number::I32(v) => v as i128,
            Number::U64(v) => v as i128,
            Number::I64(v) => v as i128,
            Number::F32(_) | Number::F64(_) => return None,
        })
    }

    pub fn as_u8(&self) -> u8 {
        self.as_u64() as u8
    }
    pub fn as_i8(&self) -> i8 {
        self.as_i64() as i8
    }
    pub fn as_u16(&self) -> u16 {
        self.as_u64() as u16
    }
    pub fn as_i16(&self) -> i16 {
        self.as_i64() as i16
    }
    pub fn as_u32(&self) -> u32 {
        self.as_u64() as u32
    }
    pub fn as_i32(&self) -> i32 {
        self.as_i64() as i32
    }

    pub fn as_u64(&self) -> u64 {
        match *self {
            Number::U8(v) => v as u64,
            Number::I8(v) => v as u64,
            Number::U16(v) => v as u64,
            Number::I16(v) => v as u64,
            Number::U32(v) => v as u64,
            Number::I32(v) => v as u64,
            Number::U64(v) => v,
            Number::I64(v) => v as u64,
            Number::F32(v) => v as u64,
            Number::F64(v) => v as u64,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match *self {
            Number::U8(v) => v as i64,
            Number::I8(v) => v as i64,
            Number::U16(v) => v as i64,
            Number::I16(v) => v as i64,
            Number::U32(v) => v as i64,
            Number::I32(v) => v as i64,
            Number::U64(v) => v as i64,
            Number::I64(v) => v,
            Number::F32(v) => v as i64,
            Number::F64(v) => v as i64,
        }
    }

    pub fn as_f32(&self) -> f32 {
        match *self {
            Number::F32(v) => v,
            _ => self.as_f64() as f32,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Number::U8(v) => v as f64,
            Number::I8(v) => v as f64,
            Number::U16(v) => v as f64,
            Number::I16(v) => v as f64,
            Number::U32(v) => v as f64,
            Number::I32(v) => v as f64,
            Number::U64(v) => v as f64,
            Number::I64(v) => v as f64,
            Number::F32(v) => v as f64,
            Number::F64(v) => v,
        }
    }
}

// Numeric equality across subtypes: integers exactly, anything involving a float as f64.
impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        match (self.as_i128(), other.as_i128()) {
            (Some(a), Some(b)) => a == b,
            _ => self.as_f64() == other.as_f64(),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Number::U8(v) => write!(f, "{v}"),
            Number::I8(v) => write!(f, "{v}"),
            Number::U16(v) => write!(f, "{v}"),
            Number::I16(v) => write!(f, "{v}"),
            Number::U32(v) => write!(f, "{v}"),
            Number::I32(v) => write!(f, "{v}"),
            Number::U64(v) => write!(f, "{v}"),
            Number::I64(v) => write!(f, "{v}"),
            Number::F32(v) => write!(f, "{v:?}"),
            Number::F64(v) => write!(f, "{v:?}"),
        }
    }
}

macro_rules! number_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(impl From<$t> for Number {
            fn from(v: $t) -> Self {
                Number::$variant(v)
            }
        })*
    };
}

number_from! {
    u8 => U8, i8 => I8, u16 => U16, i16 => I16, u32 => U32,
    i32 => I32, u64 => U64, i64 => I64, f32 => F32, f64 => F64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrowest_unsigned_boundaries() {
        assert_eq!(Number::from_unsigned(255).number_type(), NumberType::U8);
        assert_eq!(Number::from_unsigned(256).number_type(), NumberType::U16);
        assert_eq!(Number::from_unsigned(65535).number_type(), NumberType::U16);
        assert_eq!(Number::from_unsigned(65536).number_type(), NumberType::U32);
        assert_eq!(Number::from_unsigned(4294967295).number_type(), NumberType::U32);
        assert_eq!(Number::from_unsigned(4294967296).number_type(), NumberType::U64);
    }

    #[test]
    fn narrowest_signed_boundaries() {
        assert_eq!(Number::from_signed(-128).number_type(), NumberType::I8);
        assert_eq!(Number::from_signed(-129).number_type(), NumberType::I16);
        assert_eq!(Number::from_signed(-32768).number_type(), NumberType::I16);
        assert_eq!(Number::from_signed(-32769).number_type(), NumberType::I32);
        assert_eq!(Number::from_signed(i64::MIN).number_type(), NumberType::I64);
        assert_eq!(Number::from_signed(7).number_type(), NumberType::U8);
    }

    #[test]
    fn float_narrowing_and_equality() {
        assert_eq!(Number::from_float(1.5).number_type(), NumberType::F32);
        assert_eq!(Number::from_float(0.1).number_type(), NumberType::F64);
        assert_eq!(Number::U8(3), Number::I64(3));
        assert_eq!(Number::F32(2.0), Number::U16(2));
        assert_ne!(Number::U64(u64::MAX), Number::I64(-1));
    }
}
