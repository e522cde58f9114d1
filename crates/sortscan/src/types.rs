//! Element type registry.
//!
//! Every sizing and comparison decision in the engines goes through [`ElemType`].
//! Element data travels as raw little-endian bytes; the helpers here decode,
//! compare and accumulate those bytes according to each type's native semantics.

use std::cmp::Ordering;

use half::f16;
use serde::{Deserialize, Serialize};
use strum_macros::EnumIter;

use crate::error::{Error, Result};

/// Fixed-width numeric element types, in registry order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElemType {
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    Half,
    Float,
    Double,
}

/// A decoded element, widened so that arithmetic never loses range before
/// being truncated back into a concrete type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i128),
    Float(f64),
}

impl ElemType {
    pub const COUNT: usize = 11;

    pub fn all() -> impl Iterator<Item = ElemType> {
        use strum::IntoEnumIterator;
        ElemType::iter()
    }

    /// Looks up a type by its position in the registry.
    pub fn from_index(index: usize) -> Result<Self> {
        Self::all()
            .nth(index)
            .ok_or_else(|| Error::UnknownType(format!("#{index}")))
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Case-sensitive exact lookup by name.
    pub fn by_name(name: &str) -> Result<Self> {
        Self::all()
            .find(|t| t.name() == name)
            .ok_or_else(|| Error::UnknownType(name.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Char => "char",
            Self::UChar => "uchar",
            Self::Short => "short",
            Self::UShort => "ushort",
            Self::Int => "int",
            Self::UInt => "uint",
            Self::Long => "long",
            Self::ULong => "ulong",
            Self::Half => "half",
            Self::Float => "float",
            Self::Double => "double",
        }
    }

    /// Size in bytes of one element.
    pub fn size(&self) -> usize {
        match self {
            Self::Char | Self::UChar => 1,
            Self::Short | Self::UShort | Self::Half => 2,
            Self::Int | Self::UInt | Self::Float => 4,
            Self::Long | Self::ULong | Self::Double => 8,
        }
    }

    pub fn bits(&self) -> u32 {
        self.size() as u32 * 8
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::Half | Self::Float | Self::Double)
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            Self::Char | Self::Short | Self::Int | Self::Long | Self::Half | Self::Float | Self::Double
        )
    }

    /// Three-way comparison of two encoded elements.
    ///
    /// Floats compare with `<`/`>` only, so NaN compares equal to everything.
    ///
    /// # Panics
    /// If either slice is not exactly `self.size()` bytes long.
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match (self.decode(a), self.decode(b)) {
            (Value::Int(x), Value::Int(y)) => x.cmp(&y),
            (Value::Float(x), Value::Float(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => unreachable!("decode yields one representation per type"),
        }
    }

    /// Decodes one little-endian element.
    ///
    /// # Panics
    /// If `bytes` is not exactly `self.size()` bytes long.
    pub fn decode(&self, bytes: &[u8]) -> Value {
        assert_eq!(
            bytes.len(),
            self.size(),
            "{} element must be {} bytes",
            self.name(),
            self.size()
        );
        match self {
            Self::Char => Value::Int(bytes[0] as i8 as i128),
            Self::UChar => Value::Int(bytes[0] as i128),
            Self::Short => Value::Int(i16::from_le_bytes([bytes[0], bytes[1]]) as i128),
            Self::UShort => Value::Int(u16::from_le_bytes([bytes[0], bytes[1]]) as i128),
            Self::Int => Value::Int(i32::from_le_bytes(le4(bytes)) as i128),
            Self::UInt => Value::Int(u32::from_le_bytes(le4(bytes)) as i128),
            Self::Long => Value::Int(i64::from_le_bytes(le8(bytes)) as i128),
            Self::ULong => Value::Int(u64::from_le_bytes(le8(bytes)) as i128),
            Self::Half => Value::Float(f16::from_le_bytes([bytes[0], bytes[1]]).to_f64()),
            Self::Float => Value::Float(f32::from_le_bytes(le4(bytes)) as f64),
            Self::Double => Value::Float(f64::from_le_bytes(le8(bytes))),
        }
    }

    /// Encodes a value into `out`, truncating integers to this type's width
    /// (two's complement wraparound) and converting across int/float as `as` does.
    pub fn encode(&self, value: Value, out: &mut [u8]) {
        let int = match value {
            Value::Int(v) => v,
            Value::Float(v) => v as i128,
        };
        let float = match value {
            Value::Int(v) => v as f64,
            Value::Float(v) => v,
        };
        match self {
            Self::Char | Self::UChar => out[0] = int as u8,
            Self::Short | Self::UShort => out.copy_from_slice(&(int as u16).to_le_bytes()),
            Self::Int | Self::UInt => out.copy_from_slice(&(int as u32).to_le_bytes()),
            Self::Long | Self::ULong => out.copy_from_slice(&(int as u64).to_le_bytes()),
            Self::Half => out.copy_from_slice(&f16::from_f64(float).to_le_bytes()),
            Self::Float => out.copy_from_slice(&(float as f32).to_le_bytes()),
            Self::Double => out.copy_from_slice(&float.to_le_bytes()),
        }
    }

    /// The additive identity of this type.
    pub fn zero(&self) -> Value {
        if self.is_float() {
            Value::Float(0.0)
        } else {
            Value::Int(0)
        }
    }

    /// Adds two values with this type's arithmetic: integer sums wrap to the
    /// type's width and float sums round to its precision.
    pub fn add(&self, a: Value, b: Value) -> Value {
        if self.is_float() {
            let x = as_float(a) + as_float(b);
            Value::Float(match self {
                Self::Half => f16::from_f64(x).to_f64(),
                Self::Float => x as f32 as f64,
                _ => x,
            })
        } else {
            Value::Int(wrap(as_int(a).wrapping_add(as_int(b)), self.bits()))
        }
    }

    /// Maps an encoded element to an unsigned integer whose natural order
    /// matches this type's comparison order. Used by radix passes.
    pub fn radix_key(&self, bytes: &[u8]) -> u64 {
        let bits = self.bits();
        let mut raw = 0u64;
        for (i, b) in bytes.iter().enumerate().take(self.size()) {
            raw |= (*b as u64) << (8 * i);
        }
        let sign = 1u64 << (bits - 1);
        let mask = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
        if self.is_float() {
            if raw & sign != 0 {
                !raw & mask
            } else {
                raw | sign
            }
        } else if self.is_signed() {
            raw ^ sign
        } else {
            raw
        }
    }

    /// WGSL scalar type used by the GPU backend, if the type has one.
    pub fn wgsl_name(&self) -> Option<&'static str> {
        match self {
            Self::Int => Some("i32"),
            Self::UInt => Some("u32"),
            Self::Float => Some("f32"),
            _ => None,
        }
    }
}

impl std::fmt::Display for ElemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ElemType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::by_name(s)
    }
}

fn le4(b: &[u8]) -> [u8; 4] {
    [b[0], b[1], b[2], b[3]]
}

fn le8(b: &[u8]) -> [u8; 8] {
    [b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]
}

fn as_int(v: Value) -> i128 {
    match v {
        Value::Int(x) => x,
        Value::Float(x) => x as i128,
    }
}

fn as_float(v: Value) -> f64 {
    match v {
        Value::Int(x) => x as f64,
        Value::Float(x) => x,
    }
}

// Keeps the low `bits` bits so repeated sums cannot overflow i128.
fn wrap(v: i128, bits: u32) -> i128 {
    let m = (1i128 << bits) - 1;
    v & m
}

/// Rust types that can be handed to the typed host helpers.
pub trait Element: bytemuck::Pod {
    const TYPE: ElemType;
}

macro_rules! impl_element {
    ($($t:ty => $e:ident),* $(,)?) => {
        $(impl Element for $t {
            const TYPE: ElemType = ElemType::$e;
        })*
    };
}

impl_element!(
    i8 => Char,
    u8 => UChar,
    i16 => Short,
    u16 => UShort,
    i32 => Int,
    u32 => UInt,
    i64 => Long,
    u64 => ULong,
    f16 => Half,
    f32 => Float,
    f64 => Double,
);

#[cfg(test)]
mod tests;
