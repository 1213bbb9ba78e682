//! SDO abort codes and the client/server-side error types that wrap them.

use thiserror::Error;

use crate::dictionary::OdError;

/// The reason an SDO transfer was aborted, per CiA 301 section 7.2.4.3.17 (table 22).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[derive(num_enum::IntoPrimitive, num_enum::TryFromPrimitive)]
#[repr(u32)]
pub enum AbortReason {
	ToggleBitNotAlternated = 0x0503_0000,
	SdoProtocolTimedOut = 0x0504_0000,
	InvalidOrUnknownCommandSpecifier = 0x0504_0001,
	InvalidBlockSize = 0x0504_0002,
	InvalidSequenceNumber = 0x0504_0003,
	CrcError = 0x0504_0004,
	OutOfMemory = 0x0504_0005,
	UnsupportedObjectAccess = 0x0601_0000,
	ReadFromWriteOnlyObject = 0x0601_0001,
	WriteToReadOnlyObject = 0x0601_0002,
	ObjectDoesNotExist = 0x0602_0000,
	ObjectCanNotBeMapped = 0x0604_0041,
	NumberAndLengthOfObjectsExceedPdoLength = 0x0604_0042,
	GeneralParameterError = 0x0604_0043,
	GeneralInternalError = 0x0604_0047,
	HardwareError = 0x0606_0000,
	LengthMismatch = 0x0607_0010,
	LengthTooHigh = 0x0607_0012,
	LengthTooLow = 0x0607_0013,
	SubIndexDoesNotExist = 0x0609_0011,
	ObjectValueInvalid = 0x0609_0030,
	ObjectValueTooHigh = 0x0609_0031,
	ObjectValueTooLow = 0x0609_0032,
	MaximumBelowMinimum = 0x0609_0036,
	ResourceNotAvailable = 0x060A_0023,
	GeneralError = 0x0800_0000,
	CanNotTransferData = 0x0800_0020,
	LocalControlError = 0x0800_0021,
	InvalidDeviceStateForTransfer = 0x0800_0022,
	FailedToGenerateDynamicDictionary = 0x0800_0023,
	NoDataAvailable = 0x0800_0024,
}

impl std::fmt::Display for AbortReason {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::ToggleBitNotAlternated => write!(f, "toggle bit not alternated"),
			Self::SdoProtocolTimedOut => write!(f, "SDO protocol timed out"),
			Self::InvalidOrUnknownCommandSpecifier => write!(f, "invalid or unknown command specifier"),
			Self::InvalidBlockSize => write!(f, "invalid block size"),
			Self::InvalidSequenceNumber => write!(f, "invalid sequence number"),
			Self::CrcError => write!(f, "CRC error"),
			Self::OutOfMemory => write!(f, "out of memory"),
			Self::UnsupportedObjectAccess => write!(f, "unsupported access to an object"),
			Self::ReadFromWriteOnlyObject => write!(f, "attempt to read a write only object"),
			Self::WriteToReadOnlyObject => write!(f, "attempt to write a read only object"),
			Self::ObjectDoesNotExist => write!(f, "object does not exist in the object dictionary"),
			Self::ObjectCanNotBeMapped => write!(f, "object cannot be mapped to the PDO"),
			Self::NumberAndLengthOfObjectsExceedPdoLength => write!(f, "the number and length of mapped objects exceeds PDO length"),
			Self::GeneralParameterError => write!(f, "general parameter incompatibility"),
			Self::GeneralInternalError => write!(f, "general internal incompatibility in the device"),
			Self::HardwareError => write!(f, "access failed due to a hardware error"),
			Self::LengthMismatch => write!(f, "data type does not match, length of service parameter does not match"),
			Self::LengthTooHigh => write!(f, "data type does not match, length of service parameter too high"),
			Self::LengthTooLow => write!(f, "data type does not match, length of service parameter too low"),
			Self::SubIndexDoesNotExist => write!(f, "sub-index does not exist"),
			Self::ObjectValueInvalid => write!(f, "invalid value for parameter"),
			Self::ObjectValueTooHigh => write!(f, "value of parameter written is too high"),
			Self::ObjectValueTooLow => write!(f, "value of parameter written is too low"),
			Self::MaximumBelowMinimum => write!(f, "maximum value is less than minimum value"),
			Self::ResourceNotAvailable => write!(f, "resource not available: SDO connection"),
			Self::GeneralError => write!(f, "general error"),
			Self::CanNotTransferData => write!(f, "data cannot be transferred or stored to the application"),
			Self::LocalControlError => write!(f, "data cannot be transferred or stored because of local control"),
			Self::InvalidDeviceStateForTransfer => write!(f, "data cannot be transferred or stored because of the present device state"),
			Self::FailedToGenerateDynamicDictionary => write!(f, "dynamic object dictionary generation failed or no object dictionary is present"),
			Self::NoDataAvailable => write!(f, "no data available"),
		}
	}
}

impl From<OdError> for AbortReason {
	fn from(error: OdError) -> Self {
		match error {
			OdError::IndexNotExist => Self::ObjectDoesNotExist,
			OdError::SubNotExist => Self::SubIndexDoesNotExist,
			OdError::UnsupportedAccess => Self::UnsupportedObjectAccess,
			OdError::WriteOnly => Self::ReadFromWriteOnlyObject,
			OdError::ReadOnly => Self::WriteToReadOnlyObject,
			OdError::NoMap => Self::ObjectCanNotBeMapped,
			OdError::MapLen => Self::NumberAndLengthOfObjectsExceedPdoLength,
			OdError::ParIncompat => Self::GeneralParameterError,
			OdError::DevIncompat => Self::GeneralInternalError,
			OdError::HwError => Self::HardwareError,
			OdError::TypeMismatch => Self::LengthMismatch,
			OdError::DataTooLong => Self::LengthTooHigh,
			OdError::DataTooShort => Self::LengthTooLow,
			OdError::InvalidValue => Self::ObjectValueInvalid,
			OdError::ValueHigh => Self::ObjectValueTooHigh,
			OdError::ValueLow => Self::ObjectValueTooLow,
			OdError::NoData => Self::NoDataAvailable,
			OdError::DataTransfer => Self::CanNotTransferData,
			OdError::DataLocalCtrl => Self::LocalControlError,
			OdError::DataDevState => Self::InvalidDeviceStateForTransfer,
			OdError::General => Self::GeneralError,
		}
	}
}

/// Error that can occur during an SDO client transfer.
#[derive(Debug, Error)]
pub enum SdoError {
	#[error("failed to transmit CAN frame: {0}")]
	SendFailed(std::io::Error),

	#[error("timeout while waiting for a response")]
	Timeout,

	#[error("the transfer was aborted by the server: {0}")]
	TransferAborted(AbortReasonOrUnknown),

	#[error("{0}")]
	MalformedResponse(#[from] MalformedResponse),

	#[error("unexpected response: expected {expected}, got {actual}")]
	UnexpectedResponse { expected: super::ServerCommand, actual: super::ServerCommand },

	#[error("invalid toggle bit in server response")]
	InvalidToggleFlag,

	#[error("received {actual} bytes, server advertised {expected}")]
	WrongDataCount { expected: usize, actual: usize },

	#[error("data length {0} exceeds the maximum representable SDO transfer size")]
	DataLengthExceedsMaximum(usize),

	#[error("block transfer CRC mismatch: expected {expected:04X}, computed {computed:04X}")]
	CrcMismatch { expected: u16, computed: u16 },

	#[error("server rejected the requested block size")]
	BlockSizeRejected,

	#[error("an SDO transfer is already in progress on this client")]
	TransferInProgress,
}

/// Wraps a decoded [`AbortReason`], or the raw 32-bit code if the server sent a value this
/// crate does not recognize.
#[derive(Debug, Copy, Clone)]
pub struct AbortReasonOrUnknown(pub Result<AbortReason, u32>);

impl std::fmt::Display for AbortReasonOrUnknown {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self.0 {
			Ok(reason) => write!(f, "{reason}"),
			Err(code) => write!(f, "unknown abort code 0x{code:08X}"),
		}
	}
}

/// The response from the server does not follow the correct format for an SDO response.
#[derive(Debug, Error)]
pub enum MalformedResponse {
	#[error("wrong frame size: expected 8 bytes, got {0}")]
	WrongFrameSize(usize),

	#[error("invalid server command specifier: 0x{0:02X}")]
	InvalidServerCommand(u8),
}
