use crate::dictionary::OdError;
use crate::sdo::SdoError;

/// An error that can occur when getting or setting a PDO mapping of a remote node over SDO.
#[derive(Debug)]
#[derive(thiserror::Error)]
pub enum PdoConfigError {
	#[error(transparent)]
	InvalidPdoNumber(#[from] InvalidPdoNumber),
	#[error(transparent)]
	SdoError(#[from] SdoError),
	#[error("remote node does not support an RPDO inhibit time")]
	InhibitTimeNotSupported,
	#[error("remote node does not support an RPDO/TPDO deadline or event timer")]
	DeadlineTimerNotSupported,
	#[error("remote node does not support a TPDO event timer")]
	EventTimerNotSupported,
	#[error("remote node does not support the `nth sync` start value")]
	StartSyncNotSupported,
}

/// The PDO number is not valid.
#[derive(Debug, Clone)]
#[derive(thiserror::Error)]
#[error("invalid PDO number: value must be between 0 and 511 (inclusive), but got {value}")]
pub struct InvalidPdoNumber {
	pub(super) value: u16,
}

/// The value for the `nth sync` TPDO mode is invalid.
#[derive(Debug, Clone)]
#[derive(thiserror::Error)]
#[error("invalid value for PDO mode `nth sync`: value must be between 1 and 240 (inclusive), but got {value}")]
pub struct InvalidSyncInterval {
	pub(super) value: u8,
}

/// Rejection of a write to a PDO communication or mapping object in the local dictionary.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[derive(thiserror::Error)]
pub enum MappingError {
	#[error("mapping cannot be changed while the PDO is valid")]
	PdoValid,
	#[error("individual mapping entries cannot be changed while sub-index 0 is non-zero")]
	MappingCountNotZero,
	#[error(transparent)]
	Od(#[from] OdError),
	#[error("mapped object cannot be mapped to this kind of PDO")]
	NotMappable,
	#[error("total mapped length would exceed 8 bytes")]
	TooLong,
}

impl From<MappingError> for OdError {
	fn from(error: MappingError) -> Self {
		match error {
			MappingError::PdoValid => OdError::ParIncompat,
			MappingError::MappingCountNotZero => OdError::ParIncompat,
			MappingError::Od(error) => error,
			MappingError::NotMappable => OdError::NoMap,
			MappingError::TooLong => OdError::MapLen,
		}
	}
}
