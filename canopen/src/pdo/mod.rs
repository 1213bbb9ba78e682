//! Process Data Objects: the cyclic/event-driven CAN frames that move mapped Object
//! Dictionary entries without the overhead of an SDO transfer.
//!
//! [`common`] holds the shared 0x1400+/0x1600+ (or 0x1800+/0x1A00+) communication and
//! mapping state behind one PDO. [`rpdo`] and [`tpdo`] are the live consumer/producer built
//! on top of it for a [`crate::node::LocalNode`]. [`config`] configures PDOs of a remote
//! node over SDO, for [`crate::node::RemoteNode`].

mod common;
mod config;
mod error;
mod mapping;
mod rpdo;
mod tpdo;
mod types;

pub use common::PdoCommon;
pub use config::{
	configure_pdo_mapping, configure_rpdo, configure_tpdo, enable_rpdo, enable_tpdo, read_pdo_mapping, read_rpdo_communication_parameters,
	read_rpdo_configuration, read_tpdo_communication_parameters, read_tpdo_configuration, write_rpdo_communication_parameters,
	write_tpdo_communication_parameters,
};
pub use error::{InvalidPdoNumber, InvalidSyncInterval, MappingError, PdoConfigError};
pub use rpdo::Rpdo;
pub use tpdo::Tpdo;
pub use types::{
	PdoMapping, RpdoCommunicationParameters, RpdoConfiguration, RpdoKind, RpdoTransmissionType, TpdoCommunicationParameters, TpdoConfiguration,
	TpdoKind, TpdoTransmissionType,
};
