//! Typed reads of raw OD bytes, modeled as a tagged union over the CiA type codes.

use super::DataType;

/// A typed value decoded from (or about to be encoded to) the little-endian bytes stored
/// in a [`Variable`](super::Variable).
///
/// Mirrors the CiA 301 data type set rather than exposing the raw buffer, so callers of
/// the typed OD readers get a checked conversion instead of reinterpreting bytes by hand.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
	Bool(bool),
	I8(i8),
	I16(i16),
	I32(i32),
	I64(i64),
	U8(u8),
	U16(u16),
	U32(u32),
	U64(u64),
	F32(f32),
	F64(f64),
	Str(String),
	Bytes(Vec<u8>),
}

/// A value's data type did not match the requested conversion, or its bytes were malformed.
#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
#[error("value does not hold the requested type")]
pub struct ValueTypeMismatch;

impl Value {
	/// Decode raw little-endian bytes per `data_type`.
	pub fn from_bytes(data_type: DataType, data: &[u8]) -> Result<Self, ValueTypeMismatch> {
		fn array<const N: usize>(data: &[u8]) -> Result<[u8; N], ValueTypeMismatch> {
			data.try_into().map_err(|_| ValueTypeMismatch)
		}

		Ok(match data_type {
			DataType::Boolean => Self::Bool(*data.first().ok_or(ValueTypeMismatch)? != 0),
			DataType::Integer8 => Self::I8(i8::from_le_bytes(array(data)?)),
			DataType::Integer16 => Self::I16(i16::from_le_bytes(array(data)?)),
			DataType::Integer32 => Self::I32(i32::from_le_bytes(array(data)?)),
			DataType::Integer64 => Self::I64(i64::from_le_bytes(array(data)?)),
			DataType::Unsigned8 => Self::U8(u8::from_le_bytes(array(data)?)),
			DataType::Unsigned16 => Self::U16(u16::from_le_bytes(array(data)?)),
			DataType::Unsigned32 => Self::U32(u32::from_le_bytes(array(data)?)),
			DataType::Unsigned64 => Self::U64(u64::from_le_bytes(array(data)?)),
			DataType::Real32 => Self::F32(f32::from_le_bytes(array(data)?)),
			DataType::Real64 => Self::F64(f64::from_le_bytes(array(data)?)),
			DataType::VisibleString | DataType::UnicodeString => {
				Self::Str(String::from_utf8_lossy(data).into_owned())
			}
			DataType::OctetString | DataType::Domain | DataType::Unknown => Self::Bytes(data.to_vec()),
		})
	}

	/// Parse a textual EDS property (`DefaultValue`, `LowLimit`, ...) into a value of the
	/// given type, accepting `0x`-prefixed hex for integers.
	pub fn from_str(data_type: DataType, text: &str) -> Result<Self, ValueTypeMismatch> {
		fn parse_int<T: num_traits_fromstr::FromStrRadix>(text: &str) -> Result<T, ValueTypeMismatch> {
			let text = text.trim();
			if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
				T::from_str_radix(hex, 16).map_err(|_| ValueTypeMismatch)
			} else {
				text.parse().map_err(|_| ValueTypeMismatch)
			}
		}

		Ok(match data_type {
			DataType::Boolean => Self::Bool(matches!(text.trim(), "1" | "true" | "TRUE")),
			DataType::Integer8 => Self::I8(parse_int(text)?),
			DataType::Integer16 => Self::I16(parse_int(text)?),
			DataType::Integer32 => Self::I32(parse_int(text)?),
			DataType::Integer64 => Self::I64(parse_int(text)?),
			DataType::Unsigned8 => Self::U8(parse_int(text)?),
			DataType::Unsigned16 => Self::U16(parse_int(text)?),
			DataType::Unsigned32 => Self::U32(parse_int(text)?),
			DataType::Unsigned64 => Self::U64(parse_int(text)?),
			DataType::Real32 => Self::F32(text.trim().parse().map_err(|_| ValueTypeMismatch)?),
			DataType::Real64 => Self::F64(text.trim().parse().map_err(|_| ValueTypeMismatch)?),
			DataType::VisibleString | DataType::UnicodeString => Self::Str(text.to_owned()),
			DataType::OctetString | DataType::Domain | DataType::Unknown => Self::Bytes(text.as_bytes().to_vec()),
		})
	}

	/// Encode to little-endian wire bytes.
	pub fn to_bytes(&self) -> Vec<u8> {
		match self {
			Self::Bool(v) => vec![*v as u8],
			Self::I8(v) => v.to_le_bytes().to_vec(),
			Self::I16(v) => v.to_le_bytes().to_vec(),
			Self::I32(v) => v.to_le_bytes().to_vec(),
			Self::I64(v) => v.to_le_bytes().to_vec(),
			Self::U8(v) => v.to_le_bytes().to_vec(),
			Self::U16(v) => v.to_le_bytes().to_vec(),
			Self::U32(v) => v.to_le_bytes().to_vec(),
			Self::U64(v) => v.to_le_bytes().to_vec(),
			Self::F32(v) => v.to_le_bytes().to_vec(),
			Self::F64(v) => v.to_le_bytes().to_vec(),
			Self::Str(v) => v.as_bytes().to_vec(),
			Self::Bytes(v) => v.clone(),
		}
	}

	pub fn as_u32(&self) -> Option<u32> {
		match *self {
			Self::U8(v) => Some(v.into()),
			Self::U16(v) => Some(v.into()),
			Self::U32(v) => Some(v),
			Self::Bool(v) => Some(v.into()),
			_ => None,
		}
	}

	pub fn as_u64(&self) -> Option<u64> {
		match *self {
			Self::U8(v) => Some(v.into()),
			Self::U16(v) => Some(v.into()),
			Self::U32(v) => Some(v.into()),
			Self::U64(v) => Some(v),
			_ => None,
		}
	}
}

/// Tiny local shim so [`Value::from_str`] can share one generic parser for every
/// unsigned/signed integer width without pulling in a crate just for `from_str_radix`.
mod num_traits_fromstr {
	pub trait FromStrRadix: Sized {
		fn from_str_radix(s: &str, radix: u32) -> Result<Self, ()>;
	}

	macro_rules! impl_for {
		($($t:ty),*) => {
			$(
				impl FromStrRadix for $t {
					fn from_str_radix(s: &str, radix: u32) -> Result<Self, ()> {
						<$t>::from_str_radix(s, radix).map_err(|_| ())
					}
				}
			)*
		};
	}

	impl_for!(i8, i16, i32, i64, u8, u16, u32, u64);
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::{assert, let_assert};

	#[test]
	fn round_trips_unsigned16() {
		let value = Value::from_bytes(DataType::Unsigned16, &[0x11, 0x11]).unwrap();
		assert!(value == Value::U16(0x1111));
		assert!(value.to_bytes() == [0x11, 0x11]);
	}

	#[test]
	fn parses_hex_default_value() {
		let_assert!(Ok(value) = Value::from_str(DataType::Unsigned32, "0x2005"));
		assert!(value == Value::U32(0x2005));
	}

	#[test]
	fn rejects_wrong_length() {
		let_assert!(Err(_) = Value::from_bytes(DataType::Unsigned32, &[1, 2]));
	}
}
