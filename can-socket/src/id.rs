use crate::error::InvalidId;

/// The highest valid value for a standard CAN ID.
pub const MAX_STANDARD_ID: u16 = 0x7FF;

/// The highest valid value for an extended CAN ID.
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

/// A CAN ID, either standard (11 bit) or extended (29 bit).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum CanId {
	/// A standard 11 bit CAN ID.
	Standard(StandardId),

	/// An extended 29 bit CAN ID.
	Extended(ExtendedId),
}

/// A standard 11 bit CAN ID.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct StandardId {
	id: u16,
}

/// An extended 29 bit CAN ID.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct ExtendedId {
	id: u32,
}

impl CanId {
	/// Create a new CAN ID from a raw value.
	///
	/// If the value fits in an 11 bit standard CAN ID, this returns [`Self::Standard`].
	/// Otherwise, if it fits in a 29 bit extended CAN ID, this returns [`Self::Extended`].
	pub const fn new(id: u32) -> Result<Self, InvalidId> {
		if id <= MAX_STANDARD_ID as u32 {
			Ok(Self::Standard(StandardId { id: id as u16 }))
		} else {
			match ExtendedId::new(id) {
				Ok(id) => Ok(Self::Extended(id)),
				Err(e) => Err(e),
			}
		}
	}

	/// Create a new standard CAN ID from a raw value.
	pub const fn new_standard(id: u16) -> Result<Self, InvalidId> {
		match StandardId::new(id) {
			Ok(id) => Ok(Self::Standard(id)),
			Err(e) => Err(e),
		}
	}

	/// Get the raw value as a `u32`.
	pub const fn as_u32(self) -> u32 {
		match self {
			Self::Standard(id) => id.as_u16() as u32,
			Self::Extended(id) => id.as_u32(),
		}
	}

	/// Get `self` as a [`StandardId`], or `None` if this is an extended ID.
	pub const fn to_standard(self) -> Option<StandardId> {
		match self {
			Self::Standard(id) => Some(id),
			Self::Extended(_) => None,
		}
	}

	/// Returns `true` if this is an extended CAN ID.
	pub const fn is_extended(self) -> bool {
		matches!(self, Self::Extended(_))
	}
}

impl StandardId {
	/// Create a new standard CAN ID, failing if the value does not fit in 11 bits.
	pub const fn new(id: u16) -> Result<Self, InvalidId> {
		if id <= MAX_STANDARD_ID {
			Ok(Self { id })
		} else {
			Err(InvalidId { id: id as u32, extended: false })
		}
	}

	/// Create a new standard CAN ID without checking that it fits in 11 bits.
	///
	/// # Safety
	/// The caller must ensure `id <= MAX_STANDARD_ID`.
	pub const unsafe fn new_unchecked(id: u16) -> Self {
		Self { id }
	}

	/// Get the raw `u16` value.
	pub const fn as_u16(self) -> u16 {
		self.id
	}
}

impl ExtendedId {
	/// Create a new extended CAN ID, failing if the value does not fit in 29 bits.
	pub const fn new(id: u32) -> Result<Self, InvalidId> {
		if id <= MAX_EXTENDED_ID {
			Ok(Self { id })
		} else {
			Err(InvalidId { id, extended: true })
		}
	}

	/// Get the raw `u32` value.
	pub const fn as_u32(self) -> u32 {
		self.id
	}
}

impl From<StandardId> for CanId {
	fn from(value: StandardId) -> Self {
		Self::Standard(value)
	}
}

impl From<ExtendedId> for CanId {
	fn from(value: ExtendedId) -> Self {
		Self::Extended(value)
	}
}

impl std::fmt::Debug for CanId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Standard(id) => write!(f, "Standard(0x{:03X})", id.as_u16()),
			Self::Extended(id) => write!(f, "Extended(0x{:08X})", id.as_u32()),
		}
	}
}

impl std::fmt::Debug for StandardId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "0x{:03X}", self.id)
	}
}

impl std::fmt::Debug for ExtendedId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "0x{:08X}", self.id)
	}
}
