//! Emergency service: error FIFO, producer, consumer callback, status bits.

mod error;

pub use error::{ErrorBit, ErrorCode};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use can_socket::{CanFrame, StandardId};
use tokio::sync::Mutex;

use crate::bus::{BusManager, ControllerStatus};
use crate::clock::{Clock, Deadline};
use crate::id::CanOpenIdExt;

/// One queued-but-not-yet-transmitted emergency record, tied to 0x1003's sub-count.
#[derive(Debug, Clone, Copy)]
struct PendingError {
	code: u16,
	register: u8,
	bit: u8,
	info: u32,
}

type RxCallback = dyn Fn(u8, u16, u8, u32) + Send + Sync;

/// Per-node emergency producer/consumer.
///
/// Holds the 80-bit (modeled here as a compact bitset over [`ErrorBit`]) error-status
/// latch, the error register byte, a bounded FIFO capped at 0x1003's sub-count, and the
/// inhibit timer gating producer transmissions.
pub struct Emcy {
	node_id: u8,
	clock: Clock,
	bits: Mutex<u16>,
	fifo: Mutex<VecDeque<PendingError>>,
	fifo_capacity: usize,
	error_register: AtomicU8,
	producer_enabled: AtomicBool,
	inhibit: Mutex<Deadline>,
	rx_callback: Mutex<Option<Arc<RxCallback>>>,
}

impl Emcy {
	pub fn new(node_id: u8, fifo_capacity: usize, inhibit_time: Duration, clock: Clock) -> Self {
		Self {
			node_id,
			clock,
			bits: Mutex::new(0),
			fifo: Mutex::new(VecDeque::new()),
			fifo_capacity: fifo_capacity.max(1),
			error_register: AtomicU8::new(0),
			producer_enabled: AtomicBool::new(true),
			inhibit: Mutex::new(Deadline::with_period(inhibit_time, &clock)),
			rx_callback: Mutex::new(None),
		}
	}

	/// Register the callback invoked for both remotely received and self-emitted EMCY frames.
	pub async fn set_rx_callback(&self, callback: impl Fn(u8, u16, u8, u32) + Send + Sync + 'static) {
		*self.rx_callback.lock().await = Some(Arc::new(callback));
	}

	pub fn enable_producer(&self, enabled: bool) {
		self.producer_enabled.store(enabled, Ordering::Relaxed);
	}

	pub fn error_register(&self) -> u8 {
		self.error_register.load(Ordering::Relaxed)
	}

	/// Set or clear `bit`. A duplicate set/clear is a no-op; on a real edge, push a record
	/// to the FIFO (dropping the newest entry on overflow) and mark the error register bit.
	pub async fn error(&self, set: bool, bit: ErrorBit, info: u32) {
		let mask = 1u16 << bit.bit_index();
		let mut bits = self.bits.lock().await;
		let was_set = *bits & mask != 0;
		if set == was_set {
			return;
		}
		if set {
			*bits |= mask;
		} else {
			*bits &= !mask;
		}
		self.error_register.fetch_or(0x01, Ordering::Relaxed); // generic error bit, cleared by application policy
		drop(bits);

		let code = if set { bit.error_code() as u16 } else { ErrorCode::NoError as u16 };
		let record = PendingError { code, register: self.error_register(), bit: bit.bit_index() as u8, info };

		let mut fifo = self.fifo.lock().await;
		if fifo.len() >= self.fifo_capacity {
			log::warn!("EMCY FIFO full for node {:#04X}, dropping new error", self.node_id);
			return;
		}
		fifo.push_back(record);
	}

	/// Poll controller status for edge transitions and, if `pre_or_op`, drain the FIFO
	/// (honoring the inhibit timer) by sending EMCY frames on the bus.
	pub async fn process(&self, bus: &BusManager, pre_or_op: bool, previous: &mut ControllerStatus) {
		let current = bus.controller_status();
		self.error(current.tx_warning || current.rx_warning, ErrorBit::BusWarning, 0).await;
		self.error(current.tx_passive, ErrorBit::TxPassive, 0).await;
		self.error(current.rx_passive, ErrorBit::RxPassive, 0).await;
		self.error(current.bus_off, ErrorBit::BusOff, 0).await;
		self.error(current.tx_overflow, ErrorBit::TxOverflow, 0).await;
		self.error(current.rx_overflow, ErrorBit::RxOverflow, 0).await;
		self.error(current.pdo_late, ErrorBit::PdoLate, 0).await;
		*previous = current;

		if !pre_or_op {
			return;
		}

		loop {
			if self.inhibit.lock().await.is_armed() && !self.inhibit.lock().await.has_expired(&self.clock) {
				return;
			}
			let Some(record) = self.fifo.lock().await.pop_front() else {
				return;
			};
			if !self.producer_enabled.load(Ordering::Relaxed) {
				continue;
			}
			self.transmit(bus, record).await;
			self.inhibit.lock().await.reset(&self.clock);
		}
	}

	async fn transmit(&self, bus: &BusManager, record: PendingError) {
		let mut data = [0u8; 8];
		data[0..2].copy_from_slice(&record.code.to_le_bytes());
		data[2] = record.register;
		data[3] = record.bit;
		data[4..8].copy_from_slice(&record.info.to_le_bytes());

		let frame = CanFrame::new(self.node_id.emcy_id(), &data[..]).expect("8 bytes always fits a CAN frame");
		if let Err(error) = bus.send(&frame).await {
			log::warn!("failed to send EMCY frame: {error}");
			return;
		}
		if let Some(callback) = self.rx_callback.lock().await.clone() {
			callback(self.node_id, record.code, record.bit, record.info);
		}
	}

	/// Decode an EMCY frame received from another node and invoke the rx callback.
	pub async fn handle(&self, producer_node_id: u8, frame: &CanFrame) {
		let data = frame.data();
		if data.len() < 8 {
			log::warn!("malformed EMCY frame from node {producer_node_id:#04X}: short DLC");
			return;
		}
		let code = u16::from_le_bytes([data[0], data[1]]);
		let bit = data[3];
		let info = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
		if let Some(callback) = self.rx_callback.lock().await.clone() {
			callback(producer_node_id, code, bit, info);
		}
	}

	/// Subscribe this node's Emcy consumer to the EMCY CAN-ID range on `bus`.
	pub async fn subscribe(self: &Arc<Self>, bus: &BusManager, producer_node_id: u8) -> crate::bus::SubscriptionToken {
		let emcy = self.clone();
		bus.subscribe(producer_node_id.emcy_id(), 0x7FF, false, move |frame| {
			let emcy = emcy.clone();
			let frame = *frame;
			tokio::spawn(async move { emcy.handle(producer_node_id, &frame).await });
		})
		.await
	}
}

impl std::fmt::Debug for Emcy {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Emcy").field("node_id", &format_args!("{:#04X}", self.node_id)).finish_non_exhaustive()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::assert;

	#[tokio::test]
	async fn duplicate_set_is_a_no_op() {
		let emcy = Emcy::new(0x30, 8, Duration::ZERO, Clock);
		emcy.error(true, ErrorBit::Generic, 0).await;
		emcy.error(true, ErrorBit::Generic, 0).await;
		assert!(emcy.fifo.lock().await.len() == 1);
	}

	#[tokio::test]
	async fn fifo_is_capacity_bounded() {
		let emcy = Emcy::new(0x30, 2, Duration::ZERO, Clock);
		emcy.error(true, ErrorBit::Generic, 0).await;
		emcy.error(true, ErrorBit::BusWarning, 0).await;
		emcy.error(true, ErrorBit::BusOff, 0).await;
		assert!(emcy.fifo.lock().await.len() == 2);
	}
}
