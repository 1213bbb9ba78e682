//! Standard CiA 301 emergency error codes and the local error-status bit register.

/// A CiA 301 emergency error code (the `err_lo`/`err_hi` bytes of an EMCY frame).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
	NoError = 0x0000,
	Generic = 0x1000,
	Current = 0x2000,
	Voltage = 0x3000,
	Temperature = 0x4000,
	DeviceHardware = 0x5000,
	DeviceSoftware = 0x6000,
	Monitoring = 0x8000,
	Communication = 0x8100,
	CanOverrun = 0x8110,
	CanErrorPassive = 0x8120,
	Heartbeat = 0x8130,
	BusOffRecovered = 0x8140,
	Protocol = 0x8200,
	PdoNotProcessed = 0x8210,
	PdoLengthExceeded = 0x8220,
	SyncDataLength = 0x8240,
	RpdoTimeout = 0x8250,
}

/// Which error-status bit (of the 80-bit CiA 301 bitmap) a given runtime condition sets.
///
/// Each bit is independently latched: [`crate::emcy::Emcy::error`] only emits a frame on
/// the set→clear or clear→set edge, never on a repeated identical call.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ErrorBit {
	Generic,
	BusWarning,
	TxPassive,
	RxPassive,
	BusOff,
	TxOverflow,
	RxOverflow,
	PdoLate,
	RpdoLength,
	RpdoTimeout,
	SyncTimeout,
	HeartbeatConsumer,
	HeartbeatConsumerRemoteReset,
}

impl ErrorBit {
	/// Bit position within the 80-bit (10 byte) error-status bitmap of 0x1003-adjacent
	/// bookkeeping. Only used to detect duplicate set/clear calls, never placed on the wire.
	pub fn bit_index(self) -> usize {
		match self {
			Self::Generic => 0,
			Self::BusWarning => 1,
			Self::TxPassive => 2,
			Self::RxPassive => 3,
			Self::BusOff => 4,
			Self::TxOverflow => 5,
			Self::RxOverflow => 6,
			Self::PdoLate => 7,
			Self::RpdoLength => 8,
			Self::RpdoTimeout => 9,
			Self::SyncTimeout => 10,
			Self::HeartbeatConsumer => 11,
			Self::HeartbeatConsumerRemoteReset => 12,
		}
	}

	/// The wire error code emitted when this bit transitions to set.
	pub fn error_code(self) -> ErrorCode {
		match self {
			Self::Generic => ErrorCode::Generic,
			Self::BusWarning => ErrorCode::Communication,
			Self::TxPassive | Self::RxPassive => ErrorCode::CanErrorPassive,
			Self::BusOff => ErrorCode::Communication,
			Self::TxOverflow | Self::RxOverflow => ErrorCode::CanOverrun,
			Self::PdoLate => ErrorCode::PdoNotProcessed,
			Self::RpdoLength => ErrorCode::PdoLengthExceeded,
			Self::RpdoTimeout => ErrorCode::RpdoTimeout,
			Self::SyncTimeout => ErrorCode::SyncDataLength,
			Self::HeartbeatConsumer | Self::HeartbeatConsumerRemoteReset => ErrorCode::Heartbeat,
		}
	}
}
