//! Expedited and segmented transfer state, and the request/response framing shared with
//! block transfer ([`super::block`]).

use crate::dictionary::{Extension, OdError, StreamStatus, Streamer, Variable};

use super::{AbortReason, ObjectIndex, SdoServer};

/// What a command handler tells [`super::SdoServer::handle`] to do next.
pub(super) enum Response {
	Reply([u8; 8]),
	Abort(ObjectIndex, AbortReason),
	/// The frame was spurious (no matching session); drop it silently.
	None,
}

/// State of one multi-frame transfer in progress. `None` in [`SdoServer::session`] means idle.
pub(super) enum Session {
	UploadSegmented { object: ObjectIndex, offset: usize, toggle: bool },
	DownloadSegmented { object: ObjectIndex, offset: usize, toggle: bool },
	BlockUpload(super::block::UploadState),
	BlockDownload(super::block::DownloadState),
}

impl Session {
	pub(super) fn object(&self) -> ObjectIndex {
		match self {
			Self::UploadSegmented { object, .. } => *object,
			Self::DownloadSegmented { object, .. } => *object,
			Self::BlockUpload(state) => state.object,
			Self::BlockDownload(state) => state.object,
		}
	}
}

pub(super) fn abort(guard: &mut Option<Session>, object: ObjectIndex, reason: AbortReason) -> Response {
	*guard = None;
	Response::Abort(object, reason)
}

fn parse_object(data: &[u8; 8]) -> ObjectIndex {
	ObjectIndex::new(u16::from_le_bytes([data[1], data[2]]), data[3])
}

pub(super) async fn initiate_upload(server: &SdoServer, guard: &mut Option<Session>, data: &[u8; 8]) -> Response {
	let object = parse_object(data);
	let Some(entry) = server.dictionary.entry(object.index) else {
		return abort(guard, object, OdError::IndexNotExist.into());
	};
	let Some(var) = entry.sub(object.subindex) else {
		return abort(guard, object, OdError::SubNotExist.into());
	};
	if !var.access.is_readable() {
		return abort(guard, object, OdError::WriteOnly.into());
	}

	if entry.extension.is_some() {
		return start_segmented_upload(guard, object, None);
	}

	let len = var.len().await;
	if len <= 4 {
		let mut chunk = [0u8; 4];
		let n = var.read_at(0, &mut chunk).await;
		let index = object.index.to_le_bytes();
		let mut out = [0u8; 8];
		out[0] = u8::from(super::super::ServerCommand::InitiateUpload) << 5 | (4 - n as u8) << 2 | 0x03;
		out[1] = index[0];
		out[2] = index[1];
		out[3] = object.subindex;
		out[4..][..n].copy_from_slice(&chunk[..n]);
		*guard = None;
		Response::Reply(out)
	} else {
		start_segmented_upload(guard, object, Some(len))
	}
}

fn start_segmented_upload(guard: &mut Option<Session>, object: ObjectIndex, len: Option<usize>) -> Response {
	let index = object.index.to_le_bytes();
	let mut out = [0u8; 8];
	out[0] = u8::from(super::super::ServerCommand::InitiateUpload) << 5 | u8::from(len.is_some());
	out[1] = index[0];
	out[2] = index[1];
	out[3] = object.subindex;
	if let Some(len) = len {
		out[4..8].copy_from_slice(&(len as u32).to_le_bytes());
	}
	*guard = Some(Session::UploadSegmented { object, offset: 0, toggle: false });
	Response::Reply(out)
}

pub(super) async fn continue_upload(server: &SdoServer, guard: &mut Option<Session>, data: &[u8; 8]) -> Response {
	let Some(Session::UploadSegmented { object, offset, toggle }) = guard.as_mut() else {
		log::warn!("unexpected upload segment on node {:#04X}: no transfer in progress", server.node_id);
		return Response::None;
	};
	let object = *object;
	let req_toggle = data[0] & 0x10 != 0;
	if req_toggle != *toggle {
		return abort(guard, object, AbortReason::ToggleBitNotAlternated);
	}

	let Some(entry) = server.dictionary.entry(object.index) else {
		return abort(guard, object, OdError::IndexNotExist.into());
	};

	let mut chunk = [0u8; 7];
	let result = if let Some(extension) = &entry.extension {
		let mut streamer = Streamer::over_extension_at(extension, object.subindex, *offset);
		streamer.read_chunk(&mut chunk).await
	} else {
		let Some(var) = entry.sub(object.subindex) else {
			return abort(guard, object, OdError::SubNotExist.into());
		};
		let mut streamer = Streamer::over_variable_at(var, *offset);
		streamer.read_chunk(&mut chunk).await
	};

	let (n, status) = match result {
		Ok(result) => result,
		Err(error) => return abort(guard, object, error.into()),
	};

	let complete = status == StreamStatus::Done;
	let toggle_bit = *toggle;
	let mut out = [0u8; 8];
	out[0] = u8::from(super::super::ServerCommand::SegmentUpload) << 5 | u8::from(toggle_bit) << 4 | (7 - n as u8) << 1 | u8::from(complete);
	out[1..][..n].copy_from_slice(&chunk[..n]);

	if complete {
		*guard = None;
	} else if let Some(Session::UploadSegmented { offset, toggle, .. }) = guard.as_mut() {
		*offset += n;
		*toggle = !*toggle;
	}
	Response::Reply(out)
}

pub(super) async fn initiate_download(server: &SdoServer, guard: &mut Option<Session>, data: &[u8; 8]) -> Response {
	let object = parse_object(data);
	let Some(entry) = server.dictionary.entry(object.index) else {
		return abort(guard, object, OdError::IndexNotExist.into());
	};
	let Some(var) = entry.sub(object.subindex) else {
		return abort(guard, object, OdError::SubNotExist.into());
	};
	if var.access.is_const() {
		return abort(guard, object, OdError::ReadOnly.into());
	}

	let expedited = data[0] & 0x02 != 0;
	let size_set = data[0] & 0x01 != 0;

	if expedited {
		let n_empty = (data[0] >> 2 & 0x03) as usize;
		let n = if size_set { 4 - n_empty } else { 4 };
		let chunk = &data[4..][..n];
		let result = write_whole(entry_extension(entry), var, object.subindex, chunk).await;
		if let Err(error) = result {
			return abort(guard, object, error.into());
		}
		*guard = None;
		Response::Reply(ack_frame(super::super::ServerCommand::InitiateDownload, object))
	} else {
		*guard = Some(Session::DownloadSegmented { object, offset: 0, toggle: false });
		Response::Reply(ack_frame(super::super::ServerCommand::InitiateDownload, object))
	}
}

pub(super) async fn continue_download(server: &SdoServer, guard: &mut Option<Session>, data: &[u8; 8]) -> Response {
	let Some(Session::DownloadSegmented { object, offset, toggle }) = guard.as_mut() else {
		log::warn!("unexpected download segment on node {:#04X}: no transfer in progress", server.node_id);
		return Response::None;
	};
	let object = *object;
	let req_toggle = data[0] & 0x10 != 0;
	if req_toggle != *toggle {
		return abort(guard, object, AbortReason::ToggleBitNotAlternated);
	}

	let n_empty = (data[0] >> 1 & 0x07) as usize;
	let complete = data[0] & 0x01 != 0;
	let n = 7 - n_empty;
	let chunk = &data[1..][..n];

	let Some(entry) = server.dictionary.entry(object.index) else {
		return abort(guard, object, OdError::IndexNotExist.into());
	};
	let offset_now = *offset;
	let result = if let Some(extension) = &entry.extension {
		let mut streamer = Streamer::over_extension_at(extension, object.subindex, offset_now);
		streamer.write_chunk(chunk, complete).await
	} else {
		let Some(var) = entry.sub(object.subindex) else {
			return abort(guard, object, OdError::SubNotExist.into());
		};
		let mut streamer = Streamer::over_variable_at(var, offset_now);
		streamer.write_chunk(chunk, complete).await
	};
	if let Err(error) = result {
		return abort(guard, object, error.into());
	}

	let toggle_bit = req_toggle;
	if complete {
		*guard = None;
	} else if let Some(Session::DownloadSegmented { offset, toggle, .. }) = guard.as_mut() {
		*offset += n;
		*toggle = !*toggle;
	}
	let mut out = [0u8; 8];
	out[0] = u8::from(super::super::ServerCommand::SegmentDownload) << 5 | u8::from(toggle_bit) << 4;
	Response::Reply(out)
}

fn entry_extension(entry: &crate::dictionary::Entry) -> Option<&Extension> {
	entry.extension.as_ref()
}

async fn write_whole(extension: Option<&Extension>, var: &Variable, sub_index: u8, chunk: &[u8]) -> Result<(), OdError> {
	if let Some(extension) = extension {
		extension.write(sub_index, 0, chunk)?;
		Ok(())
	} else {
		var.set_bytes(chunk).await
	}
}

pub(super) fn ack_frame(command: super::super::ServerCommand, object: ObjectIndex) -> [u8; 8] {
	let index = object.index.to_le_bytes();
	[u8::from(command) << 5, index[0], index[1], object.subindex, 0, 0, 0, 0]
}
