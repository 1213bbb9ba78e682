//! The COB-ID pair an SDO client/server uses to talk: request and response.

use can_socket::StandardId;

/// The address pair used for one SDO channel, backed by OD entries 0x1200+ (server) and
/// 0x1280+ (client).
#[derive(Debug, Copy, Clone)]
pub struct SdoAddress {
	/// The COB ID (excluding the node ID) used to send SDO commands.
	command_address: u16,

	/// The COB ID (excluding the node ID) the server uses to reply to SDO commands.
	response_address: u16,
}

impl SdoAddress {
	/// Make a new SDO address pair from raw (unshifted) command and response base addresses.
	pub fn new(command_address: u16, response_address: u16) -> Result<Self, can_socket::error::InvalidId> {
		StandardId::new(command_address)?;
		StandardId::new(response_address)?;
		Ok(Self { command_address, response_address })
	}

	/// The predefined connection set's default SDO addresses: 0x600 (to server) and
	/// 0x580 (from server).
	pub fn standard() -> Self {
		Self { command_address: 0x600, response_address: 0x580 }
	}

	/// The CAN-ID for sending SDO commands to `node_id`.
	pub fn command_id(self, node_id: u8) -> StandardId {
		StandardId::new(self.command_address | u16::from(node_id)).expect("node id out of range")
	}

	/// The CAN-ID for receiving SDO responses from `node_id`.
	pub fn response_id(self, node_id: u8) -> StandardId {
		StandardId::new(self.response_address | u16::from(node_id)).expect("node id out of range")
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::assert;

	#[test]
	fn standard_addresses_shift_in_node_id() {
		let address = SdoAddress::standard();
		assert!(address.command_id(0x30).as_u16() == 0x630);
		assert!(address.response_id(0x30).as_u16() == 0x5B0);
	}
}
