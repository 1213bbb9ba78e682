//! Block upload/download: server side.
//!
//! Mirrors [`super::super::client::block`]'s wire format. Unlike the expedited/segmented
//! path, block transfer's data frames carry no command specifier at all once negotiated
//! (just a sequence number and a last-segment flag), so [`super::SdoServer::handle`] checks
//! the session's phase before deciding whether to decode a frame as a control command or as
//! a raw data segment.

use crate::dictionary::{OdError, StreamStatus, Streamer};
use crate::sdo::crc16_ccitt_update;

use super::session::{ack_frame, abort, Response, Session};
use super::{AbortReason, ObjectIndex, SdoServer};

const MIN_BLOCK_SIZE: u8 = 1;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum UploadPhase {
	Negotiated,
	Streaming,
	AwaitingEndAck,
}

pub(super) struct UploadState {
	pub object: ObjectIndex,
	offset: usize,
	block_size: u8,
	seq: u8,
	crc: u16,
	phase: UploadPhase,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum DownloadPhase {
	ReceivingSegments,
	AwaitingEnd,
}

pub(super) struct DownloadState {
	pub object: ObjectIndex,
	offset: usize,
	block_size: u8,
	seq: u8,
	crc: u16,
	expected_len: Option<usize>,
	phase: DownloadPhase,
	/// The raw (possibly zero-padded) bytes of the final segment when `expected_len` is
	/// `None`: with no declared total length, the true payload length of this segment isn't
	/// known until the end-of-block-download frame's `n_empty` field arrives, so the write
	/// and the CRC update are both deferred until then instead of guessing a full 7 bytes.
	pending_last: Option<[u8; 7]>,
}

impl DownloadState {
	pub(super) fn is_receiving_segments(&self) -> bool {
		self.phase == DownloadPhase::ReceivingSegments
	}
}

pub(super) async fn handle_upload(server: &SdoServer, guard: &mut Option<Session>, data: &[u8; 8]) -> Response {
	match guard.as_mut() {
		None => initiate(server, guard, data).await,
		Some(Session::BlockUpload(state)) => {
			let object = state.object;
			let phase = state.phase;
			let expected_seq = state.seq;
			match phase {
				UploadPhase::Negotiated => {
					if data[0] & 0x03 != 3 {
						return abort(guard, object, AbortReason::InvalidOrUnknownCommandSpecifier);
					}
					let Some(Session::BlockUpload(state)) = guard.as_mut() else { return Response::None };
					state.phase = UploadPhase::Streaming;
					send_round(server, guard).await;
					Response::None
				}
				UploadPhase::Streaming => {
					if data[0] & 0x03 != 2 {
						return abort(guard, object, AbortReason::InvalidOrUnknownCommandSpecifier);
					}
					if data[1] != expected_seq {
						return abort(guard, object, AbortReason::InvalidSequenceNumber);
					}
					let next_block_size = data[2].max(MIN_BLOCK_SIZE);
					let Some(Session::BlockUpload(state)) = guard.as_mut() else { return Response::None };
					state.block_size = next_block_size;
					send_round(server, guard).await;
					Response::None
				}
				UploadPhase::AwaitingEndAck => {
					if data[0] & 0x03 != 1 {
						return abort(guard, object, AbortReason::InvalidOrUnknownCommandSpecifier);
					}
					*guard = None;
					Response::None
				}
			}
		}
		Some(other) => {
			// A block upload frame arrived while some other transfer (expedited, segmented,
			// or a different index's block transfer) was in progress. Rather than guess
			// whether this is a fresh initiate colliding on the wire format, abandon the
			// stale session and treat it as one: a client only sends a block-upload frame
			// on an idle connection or as a continuation we'd already have matched above.
			let stale = other.object();
			log::debug!("node {:#04X} abandoning stale SDO session on {stale:?} for a new block upload", server.node_id);
			initiate(server, guard, data).await
		}
	}
}

async fn initiate(server: &SdoServer, guard: &mut Option<Session>, data: &[u8; 8]) -> Response {
	let object = ObjectIndex::new(u16::from_le_bytes([data[1], data[2]]), data[3]);
	let Some(entry) = server.dictionary.entry(object.index) else {
		return abort(guard, object, OdError::IndexNotExist.into());
	};
	let Some(var) = entry.sub(object.subindex) else {
		return abort(guard, object, OdError::SubNotExist.into());
	};
	if !var.access.is_readable() {
		return abort(guard, object, OdError::WriteOnly.into());
	}

	let requested_block_size = data[4].clamp(MIN_BLOCK_SIZE, 127);
	let known_length = if entry.extension.is_some() { None } else { Some(var.len().await) };

	let index = object.index.to_le_bytes();
	let mut out = [0u8; 8];
	out[0] = u8::from(super::super::ServerCommand::BlockUpload) << 5 | 0x04 | u8::from(known_length.is_some()) << 1;
	out[1] = index[0];
	out[2] = index[1];
	out[3] = object.subindex;
	if let Some(len) = known_length {
		out[4..8].copy_from_slice(&(len as u32).to_le_bytes());
	}
	*guard = Some(Session::BlockUpload(UploadState { object, offset: 0, block_size: requested_block_size, seq: 0, crc: 0, phase: UploadPhase::Negotiated }));
	server.send(out).await;
	Response::None
}

async fn send_round(server: &SdoServer, guard: &mut Option<Session>) {
	let Some(Session::BlockUpload(state)) = guard.as_ref() else { return };
	let object = state.object;
	let block_size = state.block_size;
	let mut offset = state.offset;
	let mut crc = state.crc;
	let mut seq = 0u8;
	let mut done = false;

	while seq < block_size {
		let Some(entry) = server.dictionary.entry(object.index) else {
			return finish_with_abort(server, guard, object, OdError::IndexNotExist.into()).await;
		};
		let mut chunk = [0u8; 7];
		let result = if let Some(extension) = &entry.extension {
			let mut streamer = Streamer::over_extension_at(extension, object.subindex, offset);
			streamer.read_chunk(&mut chunk).await
		} else {
			let Some(var) = entry.sub(object.subindex) else {
				return finish_with_abort(server, guard, object, OdError::SubNotExist.into()).await;
			};
			let mut streamer = Streamer::over_variable_at(var, offset);
			streamer.read_chunk(&mut chunk).await
		};
		let (n, status) = match result {
			Ok(result) => result,
			Err(error) => return finish_with_abort(server, guard, object, error.into()).await,
		};

		seq += 1;
		offset += n;
		crc = crc16_ccitt_update(crc, &chunk[..n]);
		done = status == StreamStatus::Done;

		let mut out = [0u8; 8];
		out[0] = seq | (u8::from(done) << 7);
		out[1..][..n].copy_from_slice(&chunk[..n]);
		server.send(out).await;

		if done {
			break;
		}
	}

	let Some(Session::BlockUpload(state)) = guard.as_mut() else { return };
	state.offset = offset;
	state.crc = crc;
	state.seq = seq;

	if done {
		let final_empty = last_chunk_empty_count(server, state).await;
		let crc_bytes = crc.to_le_bytes();
		let mut out = [0u8; 8];
		out[0] = u8::from(super::super::ServerCommand::BlockUpload) << 5 | 0x01 | final_empty << 2;
		out[1] = crc_bytes[0];
		out[2] = crc_bytes[1];
		server.send(out).await;
		state.phase = UploadPhase::AwaitingEndAck;
	}
}

/// Re-derive how many padding bytes the last sent segment carried, for the end-of-block
/// frame's `n_empty` field. The object's total length is known for plain variables; for
/// streamed extensions the last chunk is always full size since the handler signals `Done`
/// only once it has nothing left, which in practice lands on a 7-byte boundary or is
/// reported short by the handler itself.
async fn last_chunk_empty_count(server: &SdoServer, state: &UploadState) -> u8 {
	let Some(entry) = server.dictionary.entry(state.object.index) else { return 0 };
	let Some(var) = entry.sub(state.object.subindex) else { return 0 };
	if entry.extension.is_some() {
		return 0;
	}
	let total = var.len().await;
	let remainder = total % 7;
	if remainder == 0 { 0 } else { (7 - remainder) as u8 }
}

async fn finish_with_abort(server: &SdoServer, guard: &mut Option<Session>, object: ObjectIndex, reason: AbortReason) {
	*guard = None;
	server.send_abort(object, reason).await;
}

pub(super) async fn handle_download(server: &SdoServer, guard: &mut Option<Session>, data: &[u8; 8]) -> Response {
	match guard.as_mut() {
		None => initiate_download(server, guard, data).await,
		Some(Session::BlockDownload(state)) => match state.phase {
			DownloadPhase::ReceivingSegments => continue_download_segment(server, guard, data).await,
			DownloadPhase::AwaitingEnd => {
				let object = state.object;
				if data[0] & 0x03 != 1 {
					return abort(guard, object, AbortReason::InvalidOrUnknownCommandSpecifier);
				}
				let n_empty = usize::from(data[0] >> 2 & 0x07);
				let expected_crc = u16::from_le_bytes([data[1], data[2]]);

				if let Some(raw) = state.pending_last {
					let true_len = 7usize.saturating_sub(n_empty);
					let chunk = &raw[..true_len];
					let Some(entry) = server.dictionary.entry(object.index) else {
						return abort(guard, object, OdError::IndexNotExist.into());
					};
					let offset = state.offset;
					let result = if let Some(extension) = &entry.extension {
						let mut streamer = Streamer::over_extension_at(extension, object.subindex, offset);
						streamer.write_chunk(chunk, true).await
					} else {
						let Some(var) = entry.sub(object.subindex) else {
							return abort(guard, object, OdError::SubNotExist.into());
						};
						let mut streamer = Streamer::over_variable_at(var, offset);
						streamer.write_chunk(chunk, true).await
					};
					if let Err(error) = result {
						return abort(guard, object, error.into());
					}
					let Some(Session::BlockDownload(state)) = guard.as_mut() else { return Response::None };
					state.offset += true_len;
					state.crc = crc16_ccitt_update(state.crc, chunk);
					state.pending_last = None;
				}

				let Some(Session::BlockDownload(state)) = guard.as_ref() else { return Response::None };
				let computed_crc = state.crc;
				if expected_crc != computed_crc {
					return abort(guard, object, AbortReason::CrcError);
				}
				*guard = None;
				Response::Reply(ack_frame(super::super::ServerCommand::BlockDownload, object))
			}
		},
		Some(other) => {
			let stale = other.object();
			log::debug!("node {:#04X} abandoning stale SDO session on {stale:?} for a new block download", server.node_id);
			initiate_download(server, guard, data).await
		}
	}
}

async fn initiate_download(server: &SdoServer, guard: &mut Option<Session>, data: &[u8; 8]) -> Response {
	let object = ObjectIndex::new(u16::from_le_bytes([data[1], data[2]]), data[3]);
	let Some(entry) = server.dictionary.entry(object.index) else {
		return abort(guard, object, OdError::IndexNotExist.into());
	};
	let Some(var) = entry.sub(object.subindex) else {
		return abort(guard, object, OdError::SubNotExist.into());
	};
	if var.access.is_const() {
		return abort(guard, object, OdError::ReadOnly.into());
	}

	let size_set = data[0] & 0x02 != 0;
	let expected_len = size_set.then(|| u32::from_le_bytes(data[4..8].try_into().unwrap()) as usize);

	let block_size: u8 = 127;
	let index = object.index.to_le_bytes();
	let mut out = [0u8; 8];
	out[0] = u8::from(super::super::ServerCommand::BlockDownload) << 5 | 0x04;
	out[1] = index[0];
	out[2] = index[1];
	out[3] = object.subindex;
	out[4] = block_size;
	*guard = Some(Session::BlockDownload(DownloadState {
		object,
		offset: 0,
		block_size,
		seq: 0,
		crc: 0,
		expected_len,
		phase: DownloadPhase::ReceivingSegments,
		pending_last: None,
	}));
	server.send(out).await;
	Response::None
}

async fn continue_download_segment(server: &SdoServer, guard: &mut Option<Session>, data: &[u8; 8]) -> Response {
	let Some(Session::BlockDownload(state)) = guard.as_mut() else { return Response::None };
	let object = state.object;
	let seq = data[0] & 0x7F;
	let last = data[0] & 0x80 != 0;
	let expected_seq = state.seq + 1;
	if seq != expected_seq {
		return abort(guard, object, AbortReason::InvalidSequenceNumber);
	}

	if last && state.expected_len.is_none() {
		// True length of this segment isn't known until the end-of-block-download frame's
		// `n_empty` arrives; stash the raw bytes and defer the write and CRC update.
		let mut raw = [0u8; 7];
		raw.copy_from_slice(&data[1..8]);
		state.pending_last = Some(raw);
		state.seq = seq;
		state.phase = DownloadPhase::AwaitingEnd;
		return Response::None;
	}

	let n = if last { infer_last_chunk_len(state, data) } else { 7 };
	let chunk = &data[1..][..n];

	let Some(entry) = server.dictionary.entry(object.index) else {
		return abort(guard, object, OdError::IndexNotExist.into());
	};
	let offset = state.offset;
	let result = if let Some(extension) = &entry.extension {
		let mut streamer = Streamer::over_extension_at(extension, object.subindex, offset);
		streamer.write_chunk(chunk, last).await
	} else {
		let Some(var) = entry.sub(object.subindex) else {
			return abort(guard, object, OdError::SubNotExist.into());
		};
		let mut streamer = Streamer::over_variable_at(var, offset);
		streamer.write_chunk(chunk, last).await
	};
	if let Err(error) = result {
		return abort(guard, object, error.into());
	}

	let Some(Session::BlockDownload(state)) = guard.as_mut() else { return Response::None };
	state.offset += n;
	state.seq = seq;
	state.crc = crc16_ccitt_update(state.crc, chunk);

	if last {
		state.phase = DownloadPhase::AwaitingEnd;
		return Response::None;
	}

	if seq == state.block_size {
		let ack_seq = state.seq;
		let next_block_size = state.block_size;
		state.seq = 0;
		let mut out = [0u8; 8];
		out[0] = u8::from(super::super::ServerCommand::BlockDownload) << 5 | 0x02;
		out[1] = ack_seq;
		out[2] = next_block_size;
		return Response::Reply(out);
	}
	Response::None
}

/// The final segment's true length when the download declared its total length up front.
/// Only called once `expected_len` is known; without one, [`continue_download_segment`]
/// defers the last chunk until the end-of-block-download frame's `n_empty` field instead.
fn infer_last_chunk_len(state: &DownloadState, _data: &[u8; 8]) -> usize {
	let total = state.expected_len.expect("infer_last_chunk_len is only called with a known expected_len");
	let remaining = total.saturating_sub(state.offset);
	remaining.clamp(1, 7)
}
