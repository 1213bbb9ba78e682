//! SDO server: answers transfers against the local Object Dictionary.
//!
//! One session runs at a time per server, matching the predefined connection set (a server
//! only ever listens on a single command COB-ID per node). A new initiate request received
//! while a session is in progress aborts the old one, per CiA 301's "only one SDO transfer
//! per connection" rule.

mod block;
mod session;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use can_socket::CanFrame;
use tokio::sync::Mutex;

use crate::bus::{BusManager, SubscriptionToken};
use crate::clock::Clock;
use crate::dictionary::ObjectDictionary;

use super::{AbortReason, ClientCommand, ObjectIndex, SdoAddress};
use session::Session;

/// Answers SDO requests from clients targeting this node's Object Dictionary.
pub struct SdoServer {
	bus: Arc<BusManager>,
	dictionary: Arc<ObjectDictionary>,
	node_id: u8,
	address: SdoAddress,
	timeout: Duration,
	clock: Clock,
	session: Mutex<Option<Session>>,
	generation: AtomicU64,
}

impl SdoServer {
	pub fn new(bus: Arc<BusManager>, dictionary: Arc<ObjectDictionary>, node_id: u8, address: SdoAddress, timeout: Duration, clock: Clock) -> Self {
		Self { bus, dictionary, node_id, address, timeout, clock, session: Mutex::new(None), generation: AtomicU64::new(0) }
	}

	/// Subscribe to this node's SDO command COB-ID.
	pub async fn attach(self: &Arc<Self>) -> SubscriptionToken {
		let server = self.clone();
		let command_id = self.address.command_id(self.node_id);
		self.bus
			.subscribe(command_id, 0x7FF, false, move |frame| {
				let server = server.clone();
				let frame = *frame;
				tokio::spawn(async move { server.handle(&frame).await });
			})
			.await
	}

	async fn send(&self, data: [u8; 8]) {
		let response_id = self.address.response_id(self.node_id);
		let frame = CanFrame::new(response_id, &data[..]).expect("8 bytes always fits a CAN frame");
		if let Err(error) = self.bus.send(&frame).await {
			log::warn!("failed to send SDO response for node {:#04X}: {error}", self.node_id);
		}
	}

	async fn send_abort(&self, object: ObjectIndex, reason: AbortReason) {
		self.send(super::abort_payload(object, reason)).await;
	}

	/// Arm a watchdog that aborts the in-progress session if no further client frame is seen
	/// within the configured timeout. CiA 301 mandates an abort with `SdoProtocolTimedOut` in
	/// this case.
	fn arm_timeout(self: &Arc<Self>, generation: u64) {
		let server = self.clone();
		let timeout = self.timeout;
		tokio::spawn(async move {
			server.clock.sleep(timeout).await;
			let mut session = server.session.lock().await;
			if server.generation.load(Ordering::Acquire) != generation {
				return; // superseded by a newer frame or a completed transfer
			}
			if let Some(active) = session.take() {
				log::warn!("SDO session on node {:#04X} timed out", server.node_id);
				server.send_abort(active.object(), AbortReason::SdoProtocolTimedOut).await;
			}
		});
	}

	async fn handle(self: &Arc<Self>, frame: &CanFrame) {
		let Ok(data): Result<[u8; 8], _> = frame.data().try_into() else {
			log::warn!("malformed SDO request from node {:#04X}: wrong frame size", self.node_id);
			return;
		};

		let mut guard = self.session.lock().await;
		self.generation.fetch_add(1, Ordering::AcqRel);

		// Once a block download is past negotiation, its data frames carry no command
		// specifier at all: just a sequence number and a last-segment flag. Route those
		// directly, bypassing the ordinary client-command decode below.
		if let Some(Session::BlockDownload(state)) = guard.as_ref() {
			if state.is_receiving_segments() {
				let response = block::handle_download(self, &mut guard, &data).await;
				self.finish(guard, response).await;
				return;
			}
		}

		let Ok(command) = ClientCommand::try_from(data[0] >> 5) else {
			log::warn!("malformed SDO request from node {:#04X}: invalid command specifier", self.node_id);
			return;
		};

		if command == ClientCommand::AbortTransfer {
			log::debug!("client aborted SDO transfer on node {:#04X}", self.node_id);
			*guard = None;
			return;
		}

		let response = match command {
			ClientCommand::InitiateUpload => session::initiate_upload(self, &mut guard, &data).await,
			ClientCommand::InitiateDownload => session::initiate_download(self, &mut guard, &data).await,
			ClientCommand::SegmentUpload => session::continue_upload(self, &mut guard, &data).await,
			ClientCommand::SegmentDownload => session::continue_download(self, &mut guard, &data).await,
			ClientCommand::BlockUpload => block::handle_upload(self, &mut guard, &data).await,
			ClientCommand::BlockDownload => block::handle_download(self, &mut guard, &data).await,
			ClientCommand::AbortTransfer => unreachable!("handled above"),
		};
		self.finish(guard, response).await;
	}

	async fn finish(self: &Arc<Self>, guard: tokio::sync::MutexGuard<'_, Option<Session>>, response: session::Response) {
		let still_open = guard.is_some();
		let generation = self.generation.load(Ordering::Acquire);
		drop(guard);

		match response {
			session::Response::Reply(payload) => self.send(payload).await,
			session::Response::Abort(object, reason) => self.send_abort(object, reason).await,
			session::Response::None => {}
		}

		if still_open {
			self.arm_timeout(generation);
		}
	}
}

impl std::fmt::Debug for SdoServer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SdoServer").field("node_id", &self.node_id).finish_non_exhaustive()
	}
}
