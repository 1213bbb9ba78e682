//! Expedited and segmented SDO download (client writes an object to a server).

use super::{expect_server_command, server_command, SdoClient};
use crate::sdo::{AbortReason, ClientCommand, ObjectIndex, ServerCommand, SdoError};

pub(super) async fn download(client: &SdoClient, node_id: u8, object: ObjectIndex, data: &[u8]) -> Result<(), SdoError> {
	log::debug!("sending initiate download request to node {node_id:#04X} for {object:?}, {} bytes", data.len());
	let mut session = client.open_session(node_id).await;

	let result = if data.len() <= 4 {
		expedited(&mut session, object, data).await
	} else {
		segmented(&mut session, object, data).await
	};
	if result.is_err() {
		session.abort(object, AbortReason::GeneralError).await;
	}
	result
}

async fn expedited(session: &mut super::ClientSession, object: ObjectIndex, data: &[u8]) -> Result<(), SdoError> {
	debug_assert!(data.len() <= 4);
	let n_empty = 4 - data.len() as u8;
	let index = object.index.to_le_bytes();
	let mut payload = [0u8; 8];
	payload[0] = u8::from(ClientCommand::InitiateDownload) << 5 | n_empty << 2 | 0x03;
	payload[1] = index[0];
	payload[2] = index[1];
	payload[3] = object.subindex;
	payload[4..][..data.len()].copy_from_slice(data);
	session.send(payload).await?;

	let response = session.recv().await?;
	expect_server_command(&response, ServerCommand::InitiateDownload)?;
	Ok(())
}

async fn segmented(session: &mut super::ClientSession, object: ObjectIndex, data: &[u8]) -> Result<(), SdoError> {
	let total_len: u32 = data.len().try_into().map_err(|_| SdoError::DataLengthExceedsMaximum(data.len()))?;
	let index = object.index.to_le_bytes();
	let len_bytes = total_len.to_le_bytes();
	session
		.send([u8::from(ClientCommand::InitiateDownload) << 5 | 0x01, index[0], index[1], object.subindex, len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
		.await?;

	let response = session.recv().await?;
	expect_server_command(&response, ServerCommand::InitiateDownload)?;
	log::debug!("initiating segmented download, {total_len} bytes");

	let chunks: Vec<&[u8]> = data.chunks(7).collect();
	let chunk_count = chunks.len().max(1);
	for (i, chunk) in chunks.iter().enumerate() {
		let complete = i + 1 == chunk_count;
		let toggle = i % 2 == 1;
		let n_empty = 7 - chunk.len() as u8;
		let ccs = u8::from(ClientCommand::SegmentDownload);
		let mut payload = [0u8; 8];
		payload[0] = ccs << 5 | u8::from(toggle) << 4 | n_empty << 1 | u8::from(complete);
		payload[1..][..chunk.len()].copy_from_slice(chunk);
		session.send(payload).await?;

		let response = session.recv().await?;
		let (command, response_data) = server_command(&response)?;
		if command == ServerCommand::AbortTransfer {
			return Err(SdoError::TransferAborted(crate::sdo::parse_abort_reason(response_data)));
		}
		expect_server_command(&response, ServerCommand::SegmentDownload)?;
		let response_toggle = response_data[0] & 0x10 != 0;
		if response_toggle != toggle {
			return Err(SdoError::InvalidToggleFlag);
		}
	}
	log::debug!("segmented download complete");
	Ok(())
}
