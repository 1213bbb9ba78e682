//! RPDO/TPDO configuration of a remote node over SDO, for [`crate::node::RemoteNode`].
//!
//! Every function here addresses a PDO by its global number `0..512`, the same scheme CiA
//! 301 uses for 0x1400..0x15FF/0x1600..0x17FF (RPDO) and 0x1800..0x19FF/0x1A00..0x1BFF (TPDO).

use std::time::Duration;

use can_socket::CanId;

use crate::sdo::{MalformedResponse, ObjectIndex, SdoClient, SdoError};

use super::{
	InvalidPdoNumber, PdoConfigError, PdoMapping, RpdoCommunicationParameters, RpdoConfiguration, RpdoTransmissionType, TpdoCommunicationParameters,
	TpdoConfiguration, TpdoTransmissionType,
};

fn rpdo_communication_params_object(pdo: u16) -> Result<u16, InvalidPdoNumber> {
	if pdo < 512 { Ok(0x1400 + pdo) } else { Err(InvalidPdoNumber { value: pdo }) }
}

fn rpdo_mapping_object(pdo: u16) -> Result<u16, InvalidPdoNumber> {
	if pdo < 512 { Ok(0x1600 + pdo) } else { Err(InvalidPdoNumber { value: pdo }) }
}

fn tpdo_communication_params_object(pdo: u16) -> Result<u16, InvalidPdoNumber> {
	if pdo < 512 { Ok(0x1800 + pdo) } else { Err(InvalidPdoNumber { value: pdo }) }
}

fn tpdo_mapping_object(pdo: u16) -> Result<u16, InvalidPdoNumber> {
	if pdo < 512 { Ok(0x1A00 + pdo) } else { Err(InvalidPdoNumber { value: pdo }) }
}

async fn upload_u8(client: &SdoClient, node_id: u8, object: ObjectIndex) -> Result<u8, SdoError> {
	let mut buf = Vec::new();
	client.upload(node_id, object, &mut buf).await?;
	buf.first().copied().ok_or_else(|| SdoError::MalformedResponse(MalformedResponse::WrongFrameSize(buf.len())))
}

async fn upload_u16(client: &SdoClient, node_id: u8, object: ObjectIndex) -> Result<u16, SdoError> {
	let mut buf = Vec::new();
	client.upload(node_id, object, &mut buf).await?;
	let bytes: [u8; 2] = buf[..].try_into().map_err(|_| SdoError::MalformedResponse(MalformedResponse::WrongFrameSize(buf.len())))?;
	Ok(u16::from_le_bytes(bytes))
}

async fn upload_u32(client: &SdoClient, node_id: u8, object: ObjectIndex) -> Result<u32, SdoError> {
	let mut buf = Vec::new();
	client.upload(node_id, object, &mut buf).await?;
	let bytes: [u8; 4] = buf[..].try_into().map_err(|_| SdoError::MalformedResponse(MalformedResponse::WrongFrameSize(buf.len())))?;
	Ok(u32::from_le_bytes(bytes))
}

/// Read the configuration of an RPDO.
pub async fn read_rpdo_configuration(client: &SdoClient, node_id: u8, pdo: u16) -> Result<RpdoConfiguration, PdoConfigError> {
	let mapping_index = rpdo_mapping_object(pdo)?;
	let communication = read_rpdo_communication_parameters(client, node_id, pdo).await?;
	let mapping = read_pdo_mapping(client, node_id, mapping_index).await?;
	Ok(RpdoConfiguration { communication, mapping })
}

/// Read the configuration of a TPDO.
pub async fn read_tpdo_configuration(client: &SdoClient, node_id: u8, pdo: u16) -> Result<TpdoConfiguration, PdoConfigError> {
	let mapping_index = tpdo_mapping_object(pdo)?;
	let communication = read_tpdo_communication_parameters(client, node_id, pdo).await?;
	let mapping = read_pdo_mapping(client, node_id, mapping_index).await?;
	Ok(TpdoConfiguration { communication, mapping })
}

/// Read the communication parameters of an RPDO.
pub async fn read_rpdo_communication_parameters(client: &SdoClient, node_id: u8, pdo: u16) -> Result<RpdoCommunicationParameters, PdoConfigError> {
	let config_index = rpdo_communication_params_object(pdo)?;

	let valid_subindices = upload_u8(client, node_id, ObjectIndex::new(config_index, 0)).await?;
	let cob_id = upload_u32(client, node_id, ObjectIndex::new(config_index, 1)).await?;
	let mode = upload_u8(client, node_id, ObjectIndex::new(config_index, 2)).await?;
	let inhibit_time_100us = if valid_subindices >= 3 { upload_u16(client, node_id, ObjectIndex::new(config_index, 3)).await? } else { 0 };
	let deadline_timer_ms = if valid_subindices >= 5 { upload_u16(client, node_id, ObjectIndex::new(config_index, 5)).await? } else { 0 };

	Ok(RpdoCommunicationParameters {
		enabled: cob_id & (1 << 31) == 0,
		cob_id: CanId::new(cob_id & 0x1FFF_FFFF).unwrap(),
		mode: RpdoTransmissionType::from_u8(mode),
		inhibit_time_100us,
		deadline_timer_ms,
	})
}

/// Read the communication parameters of a TPDO.
pub async fn read_tpdo_communication_parameters(client: &SdoClient, node_id: u8, pdo: u16) -> Result<TpdoCommunicationParameters, PdoConfigError> {
	let config_index = tpdo_communication_params_object(pdo)?;

	let valid_subindices = upload_u8(client, node_id, ObjectIndex::new(config_index, 0)).await?;
	let cob_id = upload_u32(client, node_id, ObjectIndex::new(config_index, 1)).await?;
	let mode = upload_u8(client, node_id, ObjectIndex::new(config_index, 2)).await?;
	let inhibit_time_100us = if valid_subindices >= 3 { upload_u16(client, node_id, ObjectIndex::new(config_index, 3)).await? } else { 0 };
	let event_timer_ms = if valid_subindices >= 5 { upload_u16(client, node_id, ObjectIndex::new(config_index, 5)).await? } else { 0 };
	let start_sync = if valid_subindices >= 6 { upload_u8(client, node_id, ObjectIndex::new(config_index, 6)).await? } else { 0 };

	Ok(TpdoCommunicationParameters {
		enabled: cob_id & (1 << 31) == 0,
		rtr_allowed: cob_id & (1 << 30) == 0,
		cob_id: CanId::new(cob_id & 0x1FFF_FFFF).unwrap(),
		mode: TpdoTransmissionType::from_u8(mode),
		inhibit_time_100us,
		event_timer_ms,
		start_sync,
	})
}

/// Read the mapping table of a PDO (RPDO or TPDO) at `object_index` (0x1600+/0x1A00+).
pub async fn read_pdo_mapping(client: &SdoClient, node_id: u8, object_index: u16) -> Result<Vec<PdoMapping>, PdoConfigError> {
	let count = upload_u8(client, node_id, ObjectIndex::new(object_index, 0)).await?;
	let mut mapping = Vec::with_capacity(count.into());
	for sub in 1..=count {
		let raw = upload_u32(client, node_id, ObjectIndex::new(object_index, sub)).await?;
		mapping.push(PdoMapping::from_u32(raw));
	}
	Ok(mapping)
}

/// Enable or disable an RPDO by toggling COB-ID bit 31.
pub async fn enable_rpdo(client: &SdoClient, node_id: u8, pdo: u16, enabled: bool) -> Result<(), PdoConfigError> {
	let object = ObjectIndex::new(rpdo_communication_params_object(pdo)?, 1);
	let cob_id = upload_u32(client, node_id, object).await?;
	let cob_id = if enabled { cob_id & !(1 << 31) } else { cob_id | (1 << 31) };
	client.download(node_id, object, &cob_id.to_le_bytes()).await?;
	Ok(())
}

/// Enable or disable a TPDO by toggling COB-ID bit 31.
pub async fn enable_tpdo(client: &SdoClient, node_id: u8, pdo: u16, enabled: bool) -> Result<(), PdoConfigError> {
	let object = ObjectIndex::new(tpdo_communication_params_object(pdo)?, 1);
	let cob_id = upload_u32(client, node_id, object).await?;
	let cob_id = if enabled { cob_id & !(1 << 31) } else { cob_id | (1 << 31) };
	client.download(node_id, object, &cob_id.to_le_bytes()).await?;
	Ok(())
}

/// Push the full configuration of an RPDO to a remote node: disable, write communication
/// parameters and mapping, then re-enable if requested.
pub async fn configure_rpdo(client: &SdoClient, node_id: u8, pdo: u16, config: &RpdoConfiguration) -> Result<(), PdoConfigError> {
	let mapping_index = rpdo_mapping_object(pdo)?;
	enable_rpdo(client, node_id, pdo, false).await?;
	write_rpdo_communication_parameters(client, node_id, pdo, &config.communication).await?;
	configure_pdo_mapping(client, node_id, mapping_index, &config.mapping).await?;
	if config.communication.enabled {
		enable_rpdo(client, node_id, pdo, true).await?;
	}
	Ok(())
}

/// Push the full configuration of a TPDO to a remote node.
pub async fn configure_tpdo(client: &SdoClient, node_id: u8, pdo: u16, config: &TpdoConfiguration) -> Result<(), PdoConfigError> {
	let mapping_index = tpdo_mapping_object(pdo)?;
	enable_tpdo(client, node_id, pdo, false).await?;
	write_tpdo_communication_parameters(client, node_id, pdo, &config.communication).await?;
	configure_pdo_mapping(client, node_id, mapping_index, &config.mapping).await?;
	if config.communication.enabled {
		enable_tpdo(client, node_id, pdo, true).await?;
	}
	Ok(())
}

/// Write the communication parameters of an RPDO. The COB-ID is written with bit 31 (and,
/// for extended ids, bit 29) set so the PDO stays disabled through the rest of the write.
pub async fn write_rpdo_communication_parameters(
	client: &SdoClient,
	node_id: u8,
	pdo: u16,
	params: &RpdoCommunicationParameters,
) -> Result<(), PdoConfigError> {
	let config_index = rpdo_communication_params_object(pdo)?;
	let valid_subindices = upload_u32(client, node_id, ObjectIndex::new(config_index, 0)).await?;
	if valid_subindices < 3 && params.inhibit_time_100us > 0 {
		return Err(PdoConfigError::InhibitTimeNotSupported);
	}
	if valid_subindices < 5 && params.deadline_timer_ms > 0 {
		return Err(PdoConfigError::DeadlineTimerNotSupported);
	}

	let cob_id = match params.cob_id {
		CanId::Standard(id) => u32::from(id.as_u16()) | (1 << 31),
		CanId::Extended(id) => id.as_u32() | (1 << 29) | (1 << 31),
	};
	client.download(node_id, ObjectIndex::new(config_index, 1), &cob_id.to_le_bytes()).await?;
	client.download(node_id, ObjectIndex::new(config_index, 2), &[params.mode.to_u8()]).await?;
	if valid_subindices >= 3 {
		client.download(node_id, ObjectIndex::new(config_index, 3), &params.inhibit_time_100us.to_le_bytes()).await?;
	}
	if valid_subindices >= 5 {
		client.download(node_id, ObjectIndex::new(config_index, 5), &params.deadline_timer_ms.to_le_bytes()).await?;
	}
	Ok(())
}

/// Write the communication parameters of a TPDO.
pub async fn write_tpdo_communication_parameters(
	client: &SdoClient,
	node_id: u8,
	pdo: u16,
	params: &TpdoCommunicationParameters,
) -> Result<(), PdoConfigError> {
	let config_index = tpdo_communication_params_object(pdo)?;
	let valid_subindices = upload_u32(client, node_id, ObjectIndex::new(config_index, 0)).await?;
	if valid_subindices < 3 && params.inhibit_time_100us > 0 {
		return Err(PdoConfigError::InhibitTimeNotSupported);
	}
	if valid_subindices < 5 && params.event_timer_ms > 0 {
		return Err(PdoConfigError::EventTimerNotSupported);
	}
	if valid_subindices < 6 && params.start_sync > 0 {
		return Err(PdoConfigError::StartSyncNotSupported);
	}

	let cob_id = match params.cob_id {
		CanId::Standard(id) => u32::from(id.as_u16()) | (1 << 31),
		CanId::Extended(id) => id.as_u32() | (1 << 29) | (1 << 31),
	};
	let cob_id = if params.rtr_allowed { cob_id & !(1 << 30) } else { cob_id | (1 << 30) };

	client.download(node_id, ObjectIndex::new(config_index, 1), &cob_id.to_le_bytes()).await?;
	client.download(node_id, ObjectIndex::new(config_index, 2), &[params.mode.to_u8()]).await?;
	if valid_subindices >= 3 {
		client.download(node_id, ObjectIndex::new(config_index, 3), &params.inhibit_time_100us.to_le_bytes()).await?;
	}
	if valid_subindices >= 5 {
		client.download(node_id, ObjectIndex::new(config_index, 5), &params.event_timer_ms.to_le_bytes()).await?;
	}
	if valid_subindices >= 6 {
		client.download(node_id, ObjectIndex::new(config_index, 6), &[params.start_sync]).await?;
	}
	Ok(())
}

/// Write the mapping table of a PDO: zero the entry count, write every slot, then commit
/// the final count, so an observing consumer never sees a half-written mapping as valid.
pub async fn configure_pdo_mapping(client: &SdoClient, node_id: u8, object_index: u16, mapping: &[PdoMapping]) -> Result<(), PdoConfigError> {
	client.download(node_id, ObjectIndex::new(object_index, 0), &[0u8]).await?;
	for (i, entry) in mapping.iter().enumerate() {
		client.download(node_id, ObjectIndex::new(object_index, i as u8 + 1), &entry.to_u32().to_le_bytes()).await?;
	}
	client.download(node_id, ObjectIndex::new(object_index, 0), &[mapping.len() as u8]).await?;
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::assert;

	#[test]
	fn object_index_helpers_match_predefined_ranges() {
		assert!(rpdo_communication_params_object(3).unwrap() == 0x1403);
		assert!(rpdo_mapping_object(3).unwrap() == 0x1603);
		assert!(tpdo_communication_params_object(3).unwrap() == 0x1803);
		assert!(tpdo_mapping_object(3).unwrap() == 0x1A03);
	}

	#[test]
	fn object_index_helpers_reject_out_of_range_pdo() {
		assert!(rpdo_communication_params_object(512).is_err());
	}

	#[test]
	fn rpdo_cob_id_decoding_respects_enable_and_extended_bits() {
		let enabled_standard = 0x0000_0200u32;
		assert!(enabled_standard & (1 << 31) == 0);
		let disabled_extended = 0x8000_0000u32 | (1 << 29) | 0x1000;
		assert!(disabled_extended & (1 << 31) != 0);
	}
}
