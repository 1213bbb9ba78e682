//! Expedited and segmented SDO upload (client reads an object from a server).

use super::{expect_server_command, server_command, SdoClient};
use crate::sdo::{AbortReason, ObjectIndex, ServerCommand, SdoError};

pub(super) async fn upload(client: &SdoClient, node_id: u8, object: ObjectIndex, buf: &mut Vec<u8>) -> Result<usize, SdoError> {
	log::debug!("sending initiate upload request to node {node_id:#04X} for {object:?}");
	let mut session = client.open_session(node_id).await;

	let result = run(&mut session, object, buf).await;
	if result.is_err() {
		session.abort(object, AbortReason::GeneralError).await;
	}
	result
}

async fn run(session: &mut super::ClientSession, object: ObjectIndex, buf: &mut Vec<u8>) -> Result<usize, SdoError> {
	let index = object.index.to_le_bytes();
	session
		.send([(u8::from(crate::sdo::ClientCommand::InitiateUpload)) << 5, index[0], index[1], object.subindex, 0, 0, 0, 0])
		.await?;

	let response = session.recv().await?;
	let (command, data) = server_command(&response)?;
	if command == ServerCommand::AbortTransfer {
		return Err(SdoError::TransferAborted(crate::sdo::parse_abort_reason(data)));
	}
	expect_server_command(&response, ServerCommand::InitiateUpload)?;

	let n_empty = data[0] >> 2 & 0x03;
	let expedited = data[0] & 0x02 != 0;
	let size_set = data[0] & 0x01 != 0;

	if expedited {
		let len = if size_set { 4 - n_empty as usize } else { 4 };
		buf.clear();
		buf.extend_from_slice(&data[4..][..len]);
		log::debug!("received expedited upload response, {len} bytes");
		return Ok(len);
	}
	if !size_set {
		return Err(SdoError::MalformedResponse(crate::sdo::MalformedResponse::WrongFrameSize(0)));
	}

	let total_len = u32::from_le_bytes(data[4..8].try_into().unwrap()) as usize;
	buf.clear();
	buf.reserve(total_len);
	log::debug!("initiating segmented upload, advertised length {total_len}");

	let mut toggle = false;
	loop {
		let ccs = u8::from(crate::sdo::ClientCommand::SegmentUpload);
		session.send([ccs << 5 | u8::from(toggle) << 4, 0, 0, 0, 0, 0, 0, 0]).await?;

		let response = session.recv().await?;
		let (command, data) = server_command(&response)?;
		if command == ServerCommand::AbortTransfer {
			return Err(SdoError::TransferAborted(crate::sdo::parse_abort_reason(data)));
		}
		expect_server_command(&response, ServerCommand::SegmentUpload)?;

		let response_toggle = data[0] & 0x10 != 0;
		if response_toggle != toggle {
			return Err(SdoError::InvalidToggleFlag);
		}
		let n_empty = (data[0] >> 1 & 0x07) as usize;
		let complete = data[0] & 0x01 != 0;
		let len = 7 - n_empty;

		if buf.len() + len > total_len {
			return Err(SdoError::WrongDataCount { expected: total_len, actual: buf.len() + len });
		}
		buf.extend_from_slice(&data[1..][..len]);

		if complete {
			break;
		}
		toggle = !toggle;
	}

	if buf.len() != total_len {
		return Err(SdoError::WrongDataCount { expected: total_len, actual: buf.len() });
	}
	log::debug!("segmented upload complete, {} bytes", buf.len());
	Ok(buf.len())
}
