//! Heartbeat consumer: per-monitored-node timeouts and NMT-state transitions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use can_socket::CanFrame;
use tokio::sync::Mutex;

use crate::bus::BusManager;
use crate::clock::{Clock, Deadline};
use crate::emcy::{Emcy, ErrorBit};
use crate::id::CanOpenIdExt;
use crate::nmt::NmtState;

/// Consumer-side state of one monitored producer, from 0x1016 sub-entry `(nodeid<<16)|period_ms`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum HbState {
	Unconfigured,
	Unknown,
	Active,
	Timeout,
}

/// Event emitted by the consumer for a single monitored node, for application callbacks.
#[derive(Debug, Clone, Copy)]
pub enum HbEvent {
	Started,
	Boot,
	Timeout,
	Changed(NmtState),
}

struct Monitor {
	deadline: Deadline,
	state: HbState,
	last_nmt_state: Option<NmtState>,
}

/// Tracks every monitored producer configured via 0x1016 and aggregates an
/// all-monitored-active latch.
pub struct HeartbeatConsumer {
	clock: Clock,
	monitors: Mutex<HashMap<u8, Monitor>>,
	event_callback: Mutex<Option<Arc<dyn Fn(u8, HbEvent) + Send + Sync>>>,
	all_active: std::sync::atomic::AtomicBool,
	any_timeout: std::sync::atomic::AtomicBool,
}

impl HeartbeatConsumer {
	pub fn new(clock: Clock) -> Self {
		Self {
			clock,
			monitors: Mutex::new(HashMap::new()),
			event_callback: Mutex::new(None),
			all_active: std::sync::atomic::AtomicBool::new(false),
			any_timeout: std::sync::atomic::AtomicBool::new(false),
		}
	}

	pub async fn set_event_callback(&self, callback: impl Fn(u8, HbEvent) + Send + Sync + 'static) {
		*self.event_callback.lock().await = Some(Arc::new(callback));
	}

	/// Add or replace the monitor for `node_id` with the given heartbeat period (ms).
	pub async fn configure(&self, node_id: u8, period_ms: u16) {
		let mut monitors = self.monitors.lock().await;
		if period_ms == 0 {
			monitors.remove(&node_id);
			return;
		}
		monitors.insert(
			node_id,
			Monitor { deadline: Deadline::with_period(Duration::from_millis(period_ms.into()), &self.clock), state: HbState::Unknown, last_nmt_state: None },
		);
	}

	/// Handle a heartbeat frame (DLC 1) from `node_id`.
	pub async fn handle(&self, node_id: u8, frame: &CanFrame, emcy: &Emcy) {
		let Some(&byte) = frame.data().first() else {
			log::warn!("malformed heartbeat from node {node_id:#04X}: empty payload");
			return;
		};
		let Ok(state) = NmtState::try_from(byte) else {
			log::warn!("malformed heartbeat from node {node_id:#04X}: unknown state byte {byte:#04X}");
			return;
		};

		let mut monitors = self.monitors.lock().await;
		let Some(monitor) = monitors.get_mut(&node_id) else {
			return; // not configured for monitoring
		};
		monitor.deadline.reset(&self.clock);

		if state == NmtState::Initializing && monitor.state == HbState::Active {
			emcy.error(true, ErrorBit::HeartbeatConsumerRemoteReset, node_id.into()).await;
			self.emit(node_id, HbEvent::Boot).await;
		} else if monitor.state != HbState::Active {
			self.emit(node_id, HbEvent::Started).await;
		}
		if monitor.state == HbState::Timeout {
			emcy.error(false, ErrorBit::HeartbeatConsumer, node_id.into()).await;
		}
		monitor.state = HbState::Active;

		if monitor.last_nmt_state != Some(state) {
			monitor.last_nmt_state = Some(state);
			self.emit(node_id, HbEvent::Changed(state)).await;
		}
		drop(monitors);
		self.update_aggregate().await;
	}

	/// Periodic tick: check every monitor's deadline and raise per-node timeouts.
	pub async fn process(&self, emcy: &Emcy) {
		let mut timed_out = Vec::new();
		{
			let mut monitors = self.monitors.lock().await;
			for (&node_id, monitor) in monitors.iter_mut() {
				if monitor.state != HbState::Timeout && monitor.deadline.has_expired(&self.clock) {
					monitor.state = HbState::Timeout;
					timed_out.push(node_id);
				}
			}
		}
		for node_id in timed_out {
			emcy.error(true, ErrorBit::HeartbeatConsumer, node_id.into()).await;
			self.emit(node_id, HbEvent::Timeout).await;
		}
		self.update_aggregate().await;
	}

	async fn update_aggregate(&self) {
		let monitors = self.monitors.lock().await;
		let all_active = !monitors.is_empty() && monitors.values().all(|m| m.state == HbState::Active);
		let any_timeout = monitors.values().any(|m| m.state == HbState::Timeout);
		self.all_active.store(all_active, std::sync::atomic::Ordering::Relaxed);
		self.any_timeout.store(any_timeout, std::sync::atomic::Ordering::Relaxed);
	}

	/// Returns `true` once every configured monitor has reported `Active` at least once.
	/// Vacuously `false` with no monitors configured — use [`Self::has_timeout`] to test for
	/// an actual error condition instead.
	pub fn all_monitored_active(&self) -> bool {
		self.all_active.load(std::sync::atomic::Ordering::Relaxed)
	}

	/// Returns `true` if any configured monitor is currently timed out. Vacuously `false`
	/// with no monitors configured.
	pub fn has_timeout(&self) -> bool {
		self.any_timeout.load(std::sync::atomic::Ordering::Relaxed)
	}

	async fn emit(&self, node_id: u8, event: HbEvent) {
		if let Some(callback) = self.event_callback.lock().await.clone() {
			callback(node_id, event);
		}
	}

	/// Subscribe to every monitored node's heartbeat CAN-ID.
	pub async fn attach(self: &Arc<Self>, bus: &BusManager, node_id: u8, emcy: Arc<Emcy>) -> crate::bus::SubscriptionToken {
		let consumer = self.clone();
		bus.subscribe(node_id.heartbeat_id(), 0x7FF, false, move |frame| {
			let consumer = consumer.clone();
			let emcy = emcy.clone();
			let frame = *frame;
			tokio::spawn(async move { consumer.handle(node_id, &frame, &emcy).await });
		})
		.await
	}
}

impl std::fmt::Debug for HeartbeatConsumer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HeartbeatConsumer").finish_non_exhaustive()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::assert;
	use can_socket::StandardId;

	#[tokio::test]
	async fn fresh_heartbeat_marks_monitor_active() {
		let consumer = HeartbeatConsumer::new(Clock);
		consumer.configure(0x22, 100).await;
		let emcy = Emcy::new(0x23, 8, Duration::ZERO, Clock);
		let frame = CanFrame::new(StandardId::new(0x7A2).unwrap(), &[NmtState::Operational.into()][..]).unwrap();
		consumer.handle(0x22, &frame, &emcy).await;
		assert!(consumer.monitors.lock().await.get(&0x22).unwrap().state == HbState::Active);
	}

	#[tokio::test]
	async fn aggregate_latches_once_every_monitor_is_active() {
		let consumer = HeartbeatConsumer::new(Clock);
		consumer.configure(0x22, 100).await;
		consumer.configure(0x23, 100).await;
		let emcy = Emcy::new(0x01, 8, Duration::ZERO, Clock);
		let frame = CanFrame::new(StandardId::new(0x700).unwrap(), &[NmtState::Operational.into()][..]).unwrap();
		consumer.handle(0x22, &frame, &emcy).await;
		assert!(!consumer.all_monitored_active());
		consumer.handle(0x23, &frame, &emcy).await;
		assert!(consumer.all_monitored_active());
	}
}
