use crate::error::InvalidDataLength;
use crate::CanId;

/// An inline, fixed-capacity buffer holding the data bytes of a CAN frame (0 to 8 bytes).
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct CanData {
	len: u8,
	data: [u8; 8],
}

impl CanData {
	/// The empty data buffer.
	pub const EMPTY: Self = Self { len: 0, data: [0; 8] };

	/// Get the data as a byte slice.
	pub fn as_slice(&self) -> &[u8] {
		&self.data[..self.len as usize]
	}

	/// Get the number of data bytes.
	pub fn len(&self) -> usize {
		self.len as usize
	}

	/// Returns `true` if there are no data bytes.
	pub fn is_empty(&self) -> bool {
		self.len == 0
	}
}

impl TryFrom<&[u8]> for CanData {
	type Error = InvalidDataLength;

	fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
		if value.len() > 8 {
			return Err(InvalidDataLength { len: value.len() });
		}
		let mut data = [0u8; 8];
		data[..value.len()].copy_from_slice(value);
		Ok(Self { len: value.len() as u8, data })
	}
}

impl std::ops::Deref for CanData {
	type Target = [u8];
	fn deref(&self) -> &[u8] {
		self.as_slice()
	}
}

impl std::fmt::Debug for CanData {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{:02X?}", self.as_slice())
	}
}

/// A single CAN 2.0A frame: an identifier, a data length code and up to 8 data bytes.
#[derive(Copy, Clone)]
pub struct CanFrame {
	id: CanId,
	rtr: bool,
	data: CanData,
}

impl CanFrame {
	/// Create a new data frame with the given identifier and payload.
	///
	/// Fails if `data` is longer than 8 bytes.
	pub fn new(id: impl Into<CanId>, data: impl TryInto<CanData, Error = InvalidDataLength>) -> Result<Self, InvalidDataLength> {
		Ok(Self {
			id: id.into(),
			rtr: false,
			data: data.try_into()?,
		})
	}

	/// Create a new remote transmission request frame for `data_len` bytes.
	pub fn new_rtr(id: impl Into<CanId>, data_len: u8) -> Result<Self, InvalidDataLength> {
		if data_len > 8 {
			return Err(InvalidDataLength { len: data_len as usize });
		}
		Ok(Self {
			id: id.into(),
			rtr: true,
			data: CanData { len: data_len, data: [0; 8] },
		})
	}

	/// Get the CAN identifier of the frame.
	pub fn id(&self) -> CanId {
		self.id
	}

	/// Returns `true` if this is a remote transmission request frame.
	pub fn is_rtr(&self) -> bool {
		self.rtr
	}

	/// Get the data bytes of the frame.
	///
	/// For RTR frames this is always empty, use [`Self::data_length_code()`] for the requested length.
	pub fn data(&self) -> &[u8] {
		if self.rtr {
			&[]
		} else {
			self.data.as_slice()
		}
	}

	/// Get the data length code (DLC) of the frame.
	pub fn data_length_code(&self) -> u8 {
		self.data.len as u8
	}

	/// Reconstruct a frame from its raw parts, as reported by the kernel.
	///
	/// Used by the platform socket layer when translating a received `struct can_frame`
	/// back into the public frame type.
	pub(crate) fn from_raw_parts(id: CanId, rtr: bool, data: &[u8]) -> Self {
		let mut buf = [0u8; 8];
		let len = data.len().min(8);
		buf[..len].copy_from_slice(&data[..len]);
		Self {
			id,
			rtr,
			data: CanData { len: len as u8, data: buf },
		}
	}
}

impl std::fmt::Debug for CanFrame {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let mut debug = f.debug_struct("CanFrame");
		debug
			.field("id", &self.id())
			.field("is_rtr", &self.is_rtr())
			.field("data_length_code", &self.data_length_code());
		if !self.is_rtr() {
			debug.field("data", &self.data());
		}
		debug.finish()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::{assert, let_assert};

	#[test]
	fn can_frame_roundtrip() {
		let_assert!(Ok(frame) = CanFrame::new(0x123u16, &[1, 2, 3, 4][..]));
		assert!(frame.data() == [1, 2, 3, 4]);
		assert!(frame.data_length_code() == 4);
		assert!(!frame.is_rtr());
	}

	#[test]
	fn data_too_long_is_rejected() {
		let data = [0u8; 9];
		assert!(let Err(_) = CanFrame::new(0x123u16, &data[..]));
	}
}
