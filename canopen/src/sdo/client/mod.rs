//! SDO client: initiates reads/writes against a remote node's Object Dictionary.

mod block;
mod download;
mod upload;

use std::sync::Arc;
use std::time::Duration;

use can_socket::CanFrame;
use tokio::sync::{mpsc, Mutex};

use crate::bus::BusManager;
use crate::clock::Clock;
use crate::dictionary::{DataType, Value};

use super::{SdoAddress, SdoError, ObjectIndex};

/// Initiates SDO transfers against remote nodes.
///
/// Only one transfer runs at a time per client (an open design question resolved this way:
/// concurrent transfers would need per-node session tracking the predefined connection set
/// does not give us a cheap way to demultiplex).
pub struct SdoClient {
	bus: Arc<BusManager>,
	clock: Clock,
	address: SdoAddress,
	timeout: Duration,
	lock: Mutex<()>,
}

impl SdoClient {
	pub fn new(bus: Arc<BusManager>, address: SdoAddress, timeout: Duration, clock: Clock) -> Self {
		Self { bus, clock, address, timeout, lock: Mutex::new(()) }
	}

	/// Read the full value at `object` on `node_id` into `buf` using expedited or segmented
	/// upload. Returns the number of bytes read.
	pub async fn upload(&self, node_id: u8, object: ObjectIndex, buf: &mut Vec<u8>) -> Result<usize, SdoError> {
		let _guard = self.lock.lock().await;
		upload::upload(self, node_id, object, buf).await
	}

	/// Write `data` to `object` on `node_id` using expedited or segmented download.
	pub async fn download(&self, node_id: u8, object: ObjectIndex, data: &[u8]) -> Result<(), SdoError> {
		let _guard = self.lock.lock().await;
		download::download(self, node_id, object, data).await
	}

	/// Read the full value at `object` on `node_id` into `buf` using block upload, falling
	/// back to segmented upload if the server refuses the block protocol.
	pub async fn block_upload(&self, node_id: u8, object: ObjectIndex, buf: &mut Vec<u8>) -> Result<usize, SdoError> {
		let _guard = self.lock.lock().await;
		match block::upload(self, node_id, object, buf).await {
			Err(SdoError::TransferAborted(_)) => upload::upload(self, node_id, object, buf).await,
			other => other,
		}
	}

	/// Write `data` to `object` on `node_id` using block download, falling back to segmented
	/// download if the server refuses the block protocol.
	pub async fn block_download(&self, node_id: u8, object: ObjectIndex, data: &[u8]) -> Result<(), SdoError> {
		let _guard = self.lock.lock().await;
		match block::download(self, node_id, object, data).await {
			Err(SdoError::TransferAborted(_)) => download::download(self, node_id, object, data).await,
			other => other,
		}
	}

	/// Typed read: upload the raw bytes then decode per `data_type`.
	pub async fn read_value(&self, node_id: u8, object: ObjectIndex, data_type: DataType) -> Result<Value, SdoError> {
		let mut buf = Vec::new();
		self.upload(node_id, object, &mut buf).await?;
		Value::from_bytes(data_type, &buf).map_err(|_| SdoError::MalformedResponse(super::MalformedResponse::WrongFrameSize(buf.len())))
	}

	/// Typed write: encode `value` to little-endian bytes and download them.
	pub async fn write_value(&self, node_id: u8, object: ObjectIndex, value: &Value) -> Result<(), SdoError> {
		self.download(node_id, object, &value.to_bytes()).await
	}

	/// Open a correlated request/response channel with `node_id`'s SDO server.
	async fn open_session(&self, node_id: u8) -> ClientSession {
		let (tx, rx) = mpsc::unbounded_channel();
		let token = self
			.bus
			.subscribe(self.address.response_id(node_id), 0x7FF, false, move |frame| {
				let _ = tx.send(*frame);
			})
			.await;
		ClientSession {
			bus: self.bus.clone(),
			token,
			rx,
			command_id: self.address.command_id(node_id),
			timeout: self.timeout,
			_clock: self.clock,
		}
	}
}

impl std::fmt::Debug for SdoClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SdoClient").finish_non_exhaustive()
	}
}

/// One open client-side transfer's correlated request/response channel.
///
/// Unsubscribes on drop; the unsubscribe itself runs as a detached task since `Drop` cannot
/// await, which is harmless since a stray in-flight frame or two is simply ignored.
struct ClientSession {
	bus: Arc<BusManager>,
	token: crate::bus::SubscriptionToken,
	rx: mpsc::UnboundedReceiver<CanFrame>,
	command_id: can_socket::StandardId,
	timeout: Duration,
	_clock: Clock,
}

impl ClientSession {
	async fn send(&self, data: [u8; 8]) -> Result<(), SdoError> {
		let frame = CanFrame::new(self.command_id, &data[..]).expect("8 bytes always fits a CAN frame");
		self.bus.send(&frame).await.map_err(SdoError::SendFailed)
	}

	async fn recv(&mut self) -> Result<[u8; 8], SdoError> {
		let frame = tokio::time::timeout(self.timeout, self.rx.recv())
			.await
			.map_err(|_| SdoError::Timeout)?
			.ok_or(SdoError::Timeout)?;
		let data: [u8; 8] = frame.data().try_into().map_err(|_| super::MalformedResponse::WrongFrameSize(frame.data().len()))?;
		Ok(data)
	}

	async fn abort(&self, object: ObjectIndex, reason: super::AbortReason) {
		let payload = super::abort_payload(object, reason);
		let frame = CanFrame::new(self.command_id, &payload[..]).expect("8 bytes always fits a CAN frame");
		let _ = self.bus.send(&frame).await;
	}
}

impl Drop for ClientSession {
	fn drop(&mut self) {
		let bus = self.bus.clone();
		let token = self.token;
		tokio::spawn(async move { bus.unsubscribe(token).await });
	}
}

/// Extract the server command specifier and raw data from a response frame.
fn server_command(data: &[u8; 8]) -> Result<(super::ServerCommand, &[u8; 8]), SdoError> {
	let command = super::ServerCommand::try_from(data[0] >> 5).map_err(|e| super::MalformedResponse::InvalidServerCommand(e.number))?;
	Ok((command, data))
}

/// Check that `data` carries the expected server command, turning an abort frame into a
/// [`SdoError::TransferAborted`] and anything else into [`SdoError::UnexpectedResponse`].
fn expect_server_command(data: &[u8; 8], expected: super::ServerCommand) -> Result<(), SdoError> {
	let (command, data) = server_command(data)?;
	if command == expected {
		Ok(())
	} else if command == super::ServerCommand::AbortTransfer {
		Err(SdoError::TransferAborted(super::parse_abort_reason(data)))
	} else {
		Err(SdoError::UnexpectedResponse { expected, actual: command })
	}
}
