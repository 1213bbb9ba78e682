//! TPDO producer: builds frames from mapped OD entries and fires them on SYNC, on an
//! application event, or on the event timer, subject to the inhibit time.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use can_socket::{CanFrame, StandardId};
use tokio::sync::Mutex;

use crate::bus::BusManager;
use crate::clock::{Clock, Deadline};
use crate::dictionary::ObjectDictionary;
use crate::sync::{SyncConsumer, SyncEvent};

use super::common::PdoCommon;
use super::types::TpdoTransmissionType;

/// Live TPDO producer backing one 0x1800+/0x1A00+ pair.
pub struct Tpdo {
	common: Arc<PdoCommon>,
	dictionary: Arc<ObjectDictionary>,
	clock: Clock,
	inhibit: Mutex<Deadline>,
	configured_inhibit_100us: AtomicU16,
	event_timer: Mutex<Deadline>,
	configured_event_timer_ms: AtomicU16,
	event_pending: AtomicBool,
	queued_during_inhibit: AtomicBool,
	sync_count: std::sync::Mutex<u16>,
}

impl Tpdo {
	pub fn new(common: Arc<PdoCommon>, dictionary: Arc<ObjectDictionary>, clock: Clock) -> Arc<Self> {
		let inhibit_100us = common.inhibit_time_100us();
		let timer_ms = common.timer_ms();
		Arc::new(Self {
			common,
			dictionary,
			clock,
			inhibit: Mutex::new(Deadline::with_period(inhibit_period(inhibit_100us), &clock)),
			configured_inhibit_100us: AtomicU16::new(inhibit_100us),
			event_timer: Mutex::new(Deadline::with_period(Duration::from_millis(timer_ms.into()), &clock)),
			configured_event_timer_ms: AtomicU16::new(timer_ms),
			event_pending: AtomicBool::new(false),
			queued_during_inhibit: AtomicBool::new(false),
			sync_count: std::sync::Mutex::new(0),
		})
	}

	/// Spawn the background tasks reacting to the PDO's valid/invalid transitions (a TPDO
	/// becoming invalid clears any pending event so it doesn't fire stale data on
	/// reactivation) and to SYNC reception, which is what actually drives a synchronous
	/// TPDO's transmission.
	pub fn attach(self: &Arc<Self>, bus: Arc<BusManager>, sync: Arc<SyncConsumer>) {
		let tpdo = self.clone();
		tokio::spawn(async move {
			let mut valid = tpdo.common.watch_valid();
			loop {
				if !*valid.borrow_and_update() {
					tpdo.event_pending.store(false, Ordering::Relaxed);
					tpdo.queued_during_inhibit.store(false, Ordering::Relaxed);
					*tpdo.sync_count.lock().unwrap() = 0;
				}
				if valid.changed().await.is_err() {
					return;
				}
			}
		});

		let tpdo = self.clone();
		tokio::spawn(async move { tpdo.run_sync(bus, sync).await });
	}

	async fn run_sync(self: Arc<Self>, bus: Arc<BusManager>, sync: Arc<SyncConsumer>) {
		let mut events = sync.subscribe();
		loop {
			match events.recv().await {
				Ok(event) => self.on_sync(&bus, &event).await,
				Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
				Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
			}
		}
	}

	/// Notify the producer that a mapped value changed. Event-driven PDOs attempt
	/// transmission immediately (subject to inhibit); synchronous-acyclic PDOs just latch
	/// the event for the next SYNC.
	pub async fn notify_event(&self, bus: &BusManager) {
		if !self.common.is_valid() {
			return;
		}
		let mode = TpdoTransmissionType::from_u8(self.common.mode());
		if mode.is_event_driven() {
			self.try_transmit(bus).await;
		} else {
			self.event_pending.store(true, Ordering::Relaxed);
		}
	}

	/// Handle one SYNC reception: fire on acyclic-synchronous PDOs with a pending event, or
	/// on the Nth SYNC for cyclic-synchronous PDOs.
	pub async fn on_sync(&self, bus: &BusManager, event: &SyncEvent) {
		if !self.common.is_valid() {
			return;
		}
		let mode = TpdoTransmissionType::from_u8(self.common.mode());
		if mode.is_sync_acyclic() {
			if self.event_pending.swap(false, Ordering::Relaxed) {
				self.try_transmit(bus).await;
			}
			return;
		}
		let Some(interval) = mode.sync_interval() else { return };

		let start_sync = self.common.start_sync();
		if start_sync > 0 {
			if let Some(counter) = event.counter {
				if counter.get() != start_sync {
					return;
				}
			}
		}

		let fire = cyclic_should_fire(&mut self.sync_count.lock().unwrap(), interval);
		if fire {
			self.try_transmit(bus).await;
		}
	}

	/// Periodic tick: re-arm changed inhibit/event-timer periods, flush a transmission that
	/// was held back by the inhibit timer, and force one on event-timer expiry.
	pub async fn process(&self, bus: &BusManager) {
		if !self.common.is_valid() {
			return;
		}

		let configured_inhibit = self.common.inhibit_time_100us();
		if self.configured_inhibit_100us.swap(configured_inhibit, Ordering::Relaxed) != configured_inhibit {
			self.inhibit.lock().await.set_period(inhibit_period(configured_inhibit), &self.clock);
		}
		let configured_timer_ms = self.common.timer_ms();
		if self.configured_event_timer_ms.swap(configured_timer_ms, Ordering::Relaxed) != configured_timer_ms {
			self.event_timer.lock().await.set_period(Duration::from_millis(configured_timer_ms.into()), &self.clock);
		}

		let inhibit_elapsed = self.inhibit.lock().await.has_expired(&self.clock);
		if inhibit_elapsed && self.queued_during_inhibit.swap(false, Ordering::Relaxed) {
			self.transmit(bus).await;
		}

		let timer_expired = self.event_timer.lock().await.has_expired(&self.clock);
		if timer_expired && TpdoTransmissionType::from_u8(self.common.mode()).is_event_driven() {
			self.event_timer.lock().await.reset(&self.clock);
			self.try_transmit(bus).await;
		}
	}

	/// Attempt a transmission now, queuing it to fire as soon as the inhibit timer allows if
	/// it can't go out immediately.
	async fn try_transmit(&self, bus: &BusManager) {
		let mut inhibit = self.inhibit.lock().await;
		if inhibit.is_armed() && !inhibit.has_expired(&self.clock) {
			self.queued_during_inhibit.store(true, Ordering::Relaxed);
			return;
		}
		drop(inhibit);
		self.transmit(bus).await;
	}

	async fn transmit(&self, bus: &BusManager) {
		let Some(frame) = self.build_frame().await else {
			return;
		};
		if let Err(error) = bus.send(&frame).await {
			log::warn!("failed to send TPDO frame: {error}");
			return;
		}
		self.inhibit.lock().await.reset(&self.clock);
	}

	/// Build the outgoing frame from the current mapping and OD contents, without touching
	/// the bus or the inhibit timer. A "dummy" mapped entry contributes zero bytes.
	async fn build_frame(&self) -> Option<CanFrame> {
		let id = StandardId::new(self.common.can_id())?;
		let mut payload = Vec::with_capacity(8);
		for mapping in self.common.mapping() {
			let len = usize::from(mapping.bit_length / 8);
			if mapping.is_dummy() {
				payload.extend(std::iter::repeat(0u8).take(len));
				continue;
			}
			match self.dictionary.read_bytes(mapping.object.index, mapping.object.subindex).await {
				Ok(mut bytes) => {
					bytes.resize(len, 0);
					payload.extend_from_slice(&bytes[..len]);
				}
				Err(error) => {
					log::warn!("TPDO mapped read of {:#06X}:{} failed: {error}", mapping.object.index, mapping.object.subindex);
					payload.extend(std::iter::repeat(0u8).take(len));
				}
			}
		}

		match CanFrame::new(id, &payload[..]) {
			Ok(frame) => Some(frame),
			Err(_) => {
				log::warn!("TPDO mapping produced a payload longer than 8 bytes");
				None
			}
		}
	}
}

fn inhibit_period(units_100us: u16) -> Duration {
	Duration::from_micros(u64::from(units_100us) * 100)
}

/// Advance a cyclic-synchronous TPDO's SYNC counter, returning whether this SYNC triggers
/// a transmission (every `interval`th one).
fn cyclic_should_fire(sync_count: &mut u16, interval: u8) -> bool {
	*sync_count += 1;
	if *sync_count >= u16::from(interval) {
		*sync_count = 0;
		true
	} else {
		false
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::dictionary::{AccessType, DataType, Entry, Object, Variable};
	use crate::pdo::PdoMapping;
	use assert2::assert;

	fn dict_with_mappable_u16(value: u16) -> Arc<ObjectDictionary> {
		let mut dict = ObjectDictionary::empty(0x10);
		let mut var = Variable::new(0x6401, 1, "input", DataType::Unsigned16, AccessType::READ_ONLY, value.to_le_bytes().to_vec());
		var.tpdo_mappable = true;
		dict.insert(Entry::new(0x6401, "input", Object::Variable(var)));
		Arc::new(dict)
	}

	fn configured_tpdo(dict: Arc<ObjectDictionary>, mode: u8, mapping: &[PdoMapping]) -> Arc<Tpdo> {
		let common = PdoCommon::new(dict.clone(), false, 0x190);
		common.configure_for_test(mode, mapping);
		Tpdo::new(common, dict, Clock)
	}

	#[tokio::test]
	async fn build_frame_reads_mapped_entry_little_endian() {
		let dict = dict_with_mappable_u16(0xBEEF);
		let mapping = PdoMapping { object: crate::ObjectIndex::new(0x6401, 1), bit_length: 16 };
		let tpdo = configured_tpdo(dict, 0xFF, &[mapping]);
		let frame = tpdo.build_frame().await.unwrap();
		assert!(frame.data() == [0xEF, 0xBE]);
	}

	#[tokio::test]
	async fn build_frame_pads_dummy_entries_with_zero() {
		let dict = dict_with_mappable_u16(0x1234);
		let dummy = PdoMapping { object: crate::ObjectIndex::new(0x0002, 0), bit_length: 16 };
		let real = PdoMapping { object: crate::ObjectIndex::new(0x6401, 1), bit_length: 16 };
		let tpdo = configured_tpdo(dict, 0xFF, &[dummy, real]);
		let frame = tpdo.build_frame().await.unwrap();
		assert!(frame.data() == [0x00, 0x00, 0x34, 0x12]);
	}

	#[test]
	fn cyclic_counter_fires_every_nth_sync() {
		let mut count = 0u16;
		let fires: Vec<bool> = (0..6).map(|_| cyclic_should_fire(&mut count, 3)).collect();
		assert!(fires == [false, false, true, false, false, true]);
	}

	#[test]
	fn inhibit_period_converts_100us_units() {
		assert!(inhibit_period(10) == Duration::from_millis(1));
	}
}
