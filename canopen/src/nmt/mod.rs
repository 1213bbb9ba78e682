//! Network Management: node lifecycle state machine and heartbeat producer.

use std::sync::Arc;
use std::time::Duration;

use can_socket::CanFrame;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use tokio::sync::Mutex;

use crate::bus::BusManager;
use crate::clock::{Clock, Deadline};
use crate::id::{CanOpenIdExt, NMT_COMMAND_ID};

/// The NMT state of a CANopen device.
#[repr(u8)]
#[derive(IntoPrimitive, TryFromPrimitive, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum NmtState {
	Initializing = 0x00,
	Stopped = 0x04,
	Operational = 0x05,
	PreOperational = 0x7F,
}

impl std::fmt::Display for NmtState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Initializing => write!(f, "initializing"),
			Self::Stopped => write!(f, "stopped"),
			Self::Operational => write!(f, "operational"),
			Self::PreOperational => write!(f, "pre-operational"),
		}
	}
}

/// An incoming NMT command.
#[repr(u8)]
#[derive(IntoPrimitive, TryFromPrimitive, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum NmtCommand {
	Start = 1,
	Stop = 2,
	GoToPreOperational = 128,
	Reset = 129,
	ResetCommunication = 130,
}

/// What a node-level reset request asks the owning [`crate::node::LocalNode`] to do.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ResetRequest {
	Node,
	Communication,
}

/// Node lifecycle state machine plus producer heartbeat.
pub struct Nmt {
	node_id: u8,
	clock: Clock,
	state: Mutex<NmtState>,
	startup_to_operational: bool,
	heartbeat: Mutex<Deadline>,
	state_change_callback: Mutex<Option<Arc<dyn Fn(NmtState) + Send + Sync>>>,
}

impl Nmt {
	pub fn new(node_id: u8, startup_to_operational: bool, heartbeat_period: Duration, clock: Clock) -> Self {
		Self {
			node_id,
			clock,
			state: Mutex::new(NmtState::Initializing),
			startup_to_operational,
			heartbeat: Mutex::new(Deadline::with_period(heartbeat_period, &clock)),
			state_change_callback: Mutex::new(None),
		}
	}

	pub async fn set_state_change_callback(&self, callback: impl Fn(NmtState) + Send + Sync + 'static) {
		*self.state_change_callback.lock().await = Some(Arc::new(callback));
	}

	pub async fn state(&self) -> NmtState {
		*self.state.lock().await
	}

	/// Run the startup transition (INITIALIZING → OPERATIONAL or PRE_OPERATIONAL) and
	/// emit the boot-up heartbeat.
	pub async fn start(&self, bus: &BusManager) {
		let target = if self.startup_to_operational { NmtState::Operational } else { NmtState::PreOperational };
		self.set_state(bus, target).await;
	}

	/// Reconfigure the heartbeat producer period (0x1017, already converted to a `Duration`).
	/// A zero period disables the producer.
	pub async fn set_heartbeat_period(&self, period: Duration) {
		self.heartbeat.lock().await.set_period(period, &self.clock);
	}

	async fn set_state(&self, bus: &BusManager, new_state: NmtState) {
		*self.state.lock().await = new_state;
		self.send_heartbeat(bus).await;
		if let Some(callback) = self.state_change_callback.lock().await.clone() {
			callback(new_state);
		}
	}

	async fn send_heartbeat(&self, bus: &BusManager) {
		let state = *self.state.lock().await;
		let frame = CanFrame::new(self.node_id.heartbeat_id(), &[state.into()][..]).expect("1 byte always fits a CAN frame");
		if let Err(error) = bus.send(&frame).await {
			log::warn!("failed to send heartbeat for node {:#04X}: {error}", self.node_id);
		}
		self.heartbeat.lock().await.reset(&self.clock);
	}

	/// Handle an incoming NMT command frame (id 0x000, DLC 2: `[cmd, target]`).
	///
	/// Returns a [`ResetRequest`] if the command asks the node to tear down and rebuild.
	pub async fn handle_command(&self, bus: &BusManager, frame: &CanFrame) -> Option<ResetRequest> {
		let data = frame.data();
		if data.len() != 2 {
			log::warn!("malformed NMT command: DLC {}", data.len());
			return None;
		}
		let target = data[1];
		if target != 0 && target != self.node_id {
			return None;
		}
		let Ok(command) = NmtCommand::try_from(data[0]) else {
			log::warn!("unknown NMT command byte {:#04X}", data[0]);
			return None;
		};

		match command {
			NmtCommand::Start => {
				self.set_state(bus, NmtState::Operational).await;
				None
			}
			NmtCommand::Stop => {
				self.set_state(bus, NmtState::Stopped).await;
				None
			}
			NmtCommand::GoToPreOperational => {
				self.set_state(bus, NmtState::PreOperational).await;
				None
			}
			NmtCommand::Reset => Some(ResetRequest::Node),
			NmtCommand::ResetCommunication => Some(ResetRequest::Communication),
		}
	}

	/// Apply an error-driven transition: call when the bus goes off, or a monitored
	/// heartbeat producer times out / signals a remote reset.
	pub async fn on_error_condition(&self, bus: &BusManager, stop_instead_of_preop: bool) {
		let state = *self.state.lock().await;
		if state == NmtState::Operational {
			let target = if stop_instead_of_preop { NmtState::Stopped } else { NmtState::PreOperational };
			self.set_state(bus, target).await;
		}
	}

	/// Auto-recover to OPERATIONAL from PRE_OPERATIONAL once errors have cleared, if the
	/// device's auto-op-on-recovery control bit is set.
	pub async fn on_error_cleared(&self, bus: &BusManager, auto_recover: bool) {
		let state = *self.state.lock().await;
		if state == NmtState::PreOperational && auto_recover {
			self.set_state(bus, NmtState::Operational).await;
		}
	}

	/// Periodic tick: emit the heartbeat if its period has elapsed.
	pub async fn process(&self, bus: &BusManager) {
		let expired = self.heartbeat.lock().await.has_expired(&self.clock);
		if expired {
			self.send_heartbeat(bus).await;
		}
	}

	/// Subscribe to the NMT command service id on `bus`. Each matching frame runs
	/// [`Self::handle_command`] on a fresh task; `on_reset` is invoked with the resulting
	/// [`ResetRequest`], if any, so the node scheduler can tear down and rebuild.
	pub async fn subscribe<F>(self: &Arc<Self>, bus: &Arc<BusManager>, on_reset: F) -> crate::bus::SubscriptionToken
	where
		F: Fn(ResetRequest) + Send + Sync + 'static,
	{
		let nmt = self.clone();
		let bus_for_task = bus.clone();
		let on_reset = Arc::new(on_reset);
		bus.subscribe(can_socket::StandardId::new(NMT_COMMAND_ID).unwrap(), 0x7FF, false, move |frame| {
			let nmt = nmt.clone();
			let bus = bus_for_task.clone();
			let on_reset = on_reset.clone();
			let frame = *frame;
			tokio::spawn(async move {
				if let Some(request) = nmt.handle_command(&bus, &frame).await {
					on_reset(request);
				}
			});
		})
		.await
	}
}

impl std::fmt::Debug for Nmt {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Nmt").field("node_id", &format_args!("{:#04X}", self.node_id)).finish_non_exhaustive()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::assert;

	#[test]
	fn command_expected_targets_decode() {
		assert!(NmtCommand::try_from(1u8).unwrap() == NmtCommand::Start);
		assert!(NmtCommand::try_from(129u8).unwrap() == NmtCommand::Reset);
	}
}
