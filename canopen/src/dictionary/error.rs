//! Object dictionary access errors and SDO abort codes.

use thiserror::Error;

/// Error accessing an object dictionary entry, independent of the transport that
/// surfaces it (SDO abort code, PDO mapping rejection, internal streamer call).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
pub enum OdError {
	#[error("object does not exist in the object dictionary")]
	IndexNotExist,
	#[error("sub-index does not exist")]
	SubNotExist,
	#[error("unsupported access to an object")]
	UnsupportedAccess,
	#[error("attempt to read a write-only object")]
	WriteOnly,
	#[error("attempt to write a read-only object")]
	ReadOnly,
	#[error("object cannot be mapped to a PDO")]
	NoMap,
	#[error("number of mapped objects would exceed the PDO length")]
	MapLen,
	#[error("general parameter incompatibility")]
	ParIncompat,
	#[error("general internal incompatibility in the device")]
	DevIncompat,
	#[error("access failed due to a hardware error")]
	HwError,
	#[error("data type does not match, length of service parameter does not match")]
	TypeMismatch,
	#[error("data type does not match, length of service parameter too high")]
	DataTooLong,
	#[error("data type does not match, length of service parameter too low")]
	DataTooShort,
	#[error("value range of parameter exceeded")]
	InvalidValue,
	#[error("value of parameter written too high")]
	ValueHigh,
	#[error("value of parameter written too low")]
	ValueLow,
	#[error("no data available")]
	NoData,
	#[error("data cannot be transferred or stored to the application")]
	DataTransfer,
	#[error("data cannot be transferred or stored because of local control")]
	DataLocalCtrl,
	#[error("data cannot be transferred or stored because of the present device state")]
	DataDevState,
	#[error("general error")]
	General,
}

impl OdError {
	/// The CiA 301 32-bit SDO abort code for this error.
	pub fn abort_code(self) -> u32 {
		match self {
			Self::UnsupportedAccess => 0x0601_0000,
			Self::WriteOnly => 0x0601_0001,
			Self::ReadOnly => 0x0601_0002,
			Self::IndexNotExist => 0x0602_0000,
			Self::NoMap => 0x0604_0041,
			Self::MapLen => 0x0604_0042,
			Self::ParIncompat => 0x0604_0043,
			Self::DevIncompat => 0x0604_0047,
			Self::HwError => 0x0606_0000,
			Self::TypeMismatch => 0x0607_0010,
			Self::DataTooLong => 0x0607_0012,
			Self::DataTooShort => 0x0607_0013,
			Self::SubNotExist => 0x0609_0011,
			Self::InvalidValue => 0x0609_0030,
			Self::ValueHigh => 0x0609_0031,
			Self::ValueLow => 0x0609_0032,
			Self::General => 0x0800_0000,
			Self::DataTransfer => 0x0800_0020,
			Self::DataLocalCtrl => 0x0800_0021,
			Self::DataDevState => 0x0800_0022,
			Self::NoData => 0x0800_0024,
		}
	}
}

/// Failure to parse an EDS/DCF text dictionary.
#[derive(Debug, Error)]
pub enum LoadError {
	#[error("failed to read EDS source")]
	Io(#[from] std::io::Error),
	#[error("EDS syntax error: {0}")]
	Syntax(String),
}

impl From<String> for LoadError {
	fn from(message: String) -> Self {
		Self::Syntax(message)
	}
}
