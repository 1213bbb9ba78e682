//! Block upload/download: client side.
//!
//! Negotiates a block size once, streams sub-blocks without waiting for a per-segment ack,
//! and verifies the transfer with a CRC-16/CCITT over the whole payload. Retransmission on a
//! dropped sub-block is not implemented: an ack that does not cover every sub-block sent so
//! far aborts the transfer, same as a lower-level timeout would.

use super::{server_command, SdoClient};
use crate::sdo::crc16_ccitt;
use crate::sdo::{AbortReason, ClientCommand, ObjectIndex, ServerCommand, SdoError};

const BLOCK_SIZE: u8 = 127;

pub(super) async fn upload(client: &SdoClient, node_id: u8, object: ObjectIndex, buf: &mut Vec<u8>) -> Result<usize, SdoError> {
	let mut session = client.open_session(node_id).await;
	let result = run_upload(&mut session, object, buf).await;
	if result.is_err() {
		session.abort(object, AbortReason::GeneralError).await;
	}
	result
}

async fn run_upload(session: &mut super::ClientSession, object: ObjectIndex, buf: &mut Vec<u8>) -> Result<usize, SdoError> {
	let index = object.index.to_le_bytes();
	session
		.send([u8::from(ClientCommand::BlockUpload) << 5 | 0x04, index[0], index[1], object.subindex, BLOCK_SIZE, 0, 0, 0])
		.await?;

	let response = session.recv().await?;
	let (command, data) = server_command(&response)?;
	if command == ServerCommand::AbortTransfer {
		return Err(SdoError::TransferAborted(crate::sdo::parse_abort_reason(data)));
	}
	if command != ServerCommand::BlockUpload {
		return Err(SdoError::UnexpectedResponse { expected: ServerCommand::BlockUpload, actual: command });
	}
	let size_set = data[0] & 0x02 != 0;
	let total_len = if size_set { u32::from_le_bytes(data[4..8].try_into().unwrap()) as usize } else { usize::MAX };
	log::debug!("block upload negotiated, advertised length {size_set}:{total_len}");

	session.send([u8::from(ClientCommand::BlockUpload) << 5 | 0x03, 0, 0, 0, 0, 0, 0, 0]).await?;

	buf.clear();
	'blocks: loop {
		let mut last_seq = 0u8;
		loop {
			let segment = session.recv().await?;
			let seq = segment[0] & 0x7F;
			let last = segment[0] & 0x80 != 0;
			last_seq = seq;
			buf.extend_from_slice(&segment[1..8]);
			if last || seq >= BLOCK_SIZE {
				if last {
					break 'blocks;
				}
				break;
			}
		}
		session.send([u8::from(ClientCommand::BlockUpload) << 5 | 0x02, last_seq, BLOCK_SIZE, 0, 0, 0, 0, 0]).await?;
	}

	let end = session.recv().await?;
	let (command, end_data) = server_command(&end)?;
	if command == ServerCommand::AbortTransfer {
		return Err(SdoError::TransferAborted(crate::sdo::parse_abort_reason(end_data)));
	}
	if command != ServerCommand::BlockUpload {
		return Err(SdoError::UnexpectedResponse { expected: ServerCommand::BlockUpload, actual: command });
	}
	let final_empty = end_data[0] >> 2 & 0x07;
	buf.truncate(buf.len() - final_empty as usize);
	let expected_crc = u16::from_le_bytes([end_data[1], end_data[2]]);
	let computed_crc = crc16_ccitt(buf);
	if expected_crc != computed_crc {
		return Err(SdoError::CrcMismatch { expected: expected_crc, computed: computed_crc });
	}

	session.send([u8::from(ClientCommand::BlockUpload) << 5 | 0x01, 0, 0, 0, 0, 0, 0, 0]).await?;
	log::debug!("block upload complete, {} bytes", buf.len());
	Ok(buf.len())
}

pub(super) async fn download(client: &SdoClient, node_id: u8, object: ObjectIndex, data: &[u8]) -> Result<(), SdoError> {
	let mut session = client.open_session(node_id).await;
	let result = run_download(&mut session, object, data).await;
	if result.is_err() {
		session.abort(object, AbortReason::GeneralError).await;
	}
	result
}

async fn run_download(session: &mut super::ClientSession, object: ObjectIndex, data: &[u8]) -> Result<(), SdoError> {
	let total_len: u32 = data.len().try_into().map_err(|_| SdoError::DataLengthExceedsMaximum(data.len()))?;
	let index = object.index.to_le_bytes();
	let len_bytes = total_len.to_le_bytes();
	session
		.send([u8::from(ClientCommand::BlockDownload) << 5 | 0x06, index[0], index[1], object.subindex, len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
		.await?;

	let response = session.recv().await?;
	let (command, data_reply) = server_command(&response)?;
	if command == ServerCommand::AbortTransfer {
		return Err(SdoError::TransferAborted(crate::sdo::parse_abort_reason(data_reply)));
	}
	if command != ServerCommand::BlockDownload {
		return Err(SdoError::UnexpectedResponse { expected: ServerCommand::BlockDownload, actual: command });
	}
	let block_size = data_reply[4].max(1);
	log::debug!("block download negotiated, block size {block_size}");

	let chunks: Vec<&[u8]> = data.chunks(7).collect();
	let last_chunk_index = chunks.len().saturating_sub(1);
	let mut final_empty = 0u8;
	for block in chunks.chunks(block_size as usize) {
		for (i, chunk) in block.iter().enumerate() {
			let seq = (i + 1) as u8;
			let is_last_chunk_overall = std::ptr::eq(*chunk, chunks[last_chunk_index]);
			let mut payload = [0u8; 8];
			payload[0] = seq | (u8::from(is_last_chunk_overall) << 7);
			payload[1..][..chunk.len()].copy_from_slice(chunk);
			if is_last_chunk_overall {
				final_empty = 7 - chunk.len() as u8;
			}
			session.send(payload).await?;
		}

		let ack = session.recv().await?;
		let (command, ack_data) = server_command(&ack)?;
		if command == ServerCommand::AbortTransfer {
			return Err(SdoError::TransferAborted(crate::sdo::parse_abort_reason(ack_data)));
		}
		if command != ServerCommand::BlockDownload {
			return Err(SdoError::UnexpectedResponse { expected: ServerCommand::BlockDownload, actual: command });
		}
		if ack_data[1] as usize != block.len() {
			return Err(SdoError::BlockSizeRejected);
		}
	}

	let crc = crc16_ccitt(data);
	let crc_bytes = crc.to_le_bytes();
	session
		.send([u8::from(ClientCommand::BlockDownload) << 5 | 0x01 | final_empty << 2, crc_bytes[0], crc_bytes[1], 0, 0, 0, 0, 0])
		.await?;

	let end = session.recv().await?;
	let (command, end_data) = server_command(&end)?;
	if command == ServerCommand::AbortTransfer {
		return Err(SdoError::TransferAborted(crate::sdo::parse_abort_reason(end_data)));
	}
	if command != ServerCommand::BlockDownload {
		return Err(SdoError::UnexpectedResponse { expected: ServerCommand::BlockDownload, actual: command });
	}
	log::debug!("block download complete");
	Ok(())
}
