//! RPDO consumer: reacts to frames on one RPDO's CAN-ID, staging synchronous payloads for
//! the next SYNC and copying asynchronous ones into the dictionary immediately.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;

use can_socket::{CanFrame, StandardId};
use tokio::sync::Mutex;

use crate::bus::{BusManager, SubscriptionToken};
use crate::clock::{Clock, Deadline};
use crate::dictionary::ObjectDictionary;
use crate::emcy::{Emcy, ErrorBit};
use crate::sync::SyncConsumer;

use super::common::PdoCommon;
use super::types::RpdoTransmissionType;

/// Live RPDO consumer backing one 0x1400+/0x1600+ pair.
pub struct Rpdo {
	common: Arc<PdoCommon>,
	dictionary: Arc<ObjectDictionary>,
	emcy: Arc<Emcy>,
	clock: Clock,
	staged: Mutex<Option<Vec<u8>>>,
	subscription: Mutex<Option<SubscriptionToken>>,
	timer: Mutex<Deadline>,
	configured_timer_ms: AtomicU16,
	length_mismatch: AtomicBool,
	timed_out: AtomicBool,
}

impl Rpdo {
	pub fn new(common: Arc<PdoCommon>, dictionary: Arc<ObjectDictionary>, emcy: Arc<Emcy>, clock: Clock) -> Arc<Self> {
		let timer_ms = common.timer_ms();
		let timer = Deadline::with_period(std::time::Duration::from_millis(timer_ms.into()), &clock);
		Arc::new(Self {
			common,
			dictionary,
			emcy,
			clock,
			staged: Mutex::new(None),
			subscription: Mutex::new(None),
			timer: Mutex::new(timer),
			configured_timer_ms: AtomicU16::new(timer_ms),
			length_mismatch: AtomicBool::new(false),
			timed_out: AtomicBool::new(false),
		})
	}

	/// Spawn the background tasks that keep this RPDO's bus subscription in sync with its
	/// valid/invalid transitions and that copy staged synchronous frames on every SYNC.
	pub fn attach(self: &Arc<Self>, bus: Arc<BusManager>, sync: Arc<SyncConsumer>) {
		let rpdo = self.clone();
		tokio::spawn(async move { rpdo.run_subscription(bus).await });

		let rpdo = self.clone();
		tokio::spawn(async move { rpdo.run_sync(sync).await });
	}

	async fn run_subscription(self: Arc<Self>, bus: Arc<BusManager>) {
		let mut valid = self.common.watch_valid();
		loop {
			let is_valid = *valid.borrow_and_update();
			let mut subscription = self.subscription.lock().await;
			match (is_valid, subscription.take()) {
				(true, existing) => {
					if let Some(token) = existing {
						bus.unsubscribe(token).await;
					}
					let Some(id) = StandardId::new(self.common.can_id()) else {
						continue;
					};
					let rpdo = self.clone();
					let token = bus.subscribe(id, 0x7FF, false, move |frame| {
						let rpdo = rpdo.clone();
						let frame = *frame;
						tokio::spawn(async move { rpdo.handle(&frame).await });
					})
					.await;
					*subscription = Some(token);
				}
				(false, Some(token)) => bus.unsubscribe(token).await,
				(false, None) => {}
			}
			drop(subscription);
			if valid.changed().await.is_err() {
				return;
			}
		}
	}

	async fn run_sync(self: Arc<Self>, sync: Arc<SyncConsumer>) {
		let mut events = sync.subscribe();
		loop {
			match events.recv().await {
				Ok(_event) => {
					if let Some(frame) = self.staged.lock().await.take() {
						self.copy_to_dictionary(&frame).await;
					}
				}
				Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
				Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
			}
		}
	}

	/// Handle one received RPDO frame: validate length against the mapping, then either
	/// stage it for the next SYNC or copy it into the dictionary right away.
	async fn handle(&self, frame: &CanFrame) {
		self.timer.lock().await.reset(&self.clock);
		if self.timed_out.swap(false, Ordering::Relaxed) {
			self.emcy.error(false, ErrorBit::RpdoTimeout, 0).await;
		}

		let mapping = self.common.mapping();
		let expected: usize = mapping.iter().map(|m| usize::from(m.bit_length / 8)).sum();
		let data = frame.data();

		if data.len() < expected {
			if !self.length_mismatch.swap(true, Ordering::Relaxed) {
				self.emcy.error(true, ErrorBit::RpdoLength, 0).await;
			}
			return;
		}
		if data.len() > expected {
			if !self.length_mismatch.swap(true, Ordering::Relaxed) {
				self.emcy.error(true, ErrorBit::RpdoLength, 0).await;
			}
		} else if self.length_mismatch.swap(false, Ordering::Relaxed) {
			self.emcy.error(false, ErrorBit::RpdoLength, 0).await;
		}

		let payload = data[..expected].to_vec();
		if RpdoTransmissionType::from_u8(self.common.mode()).is_sync() {
			*self.staged.lock().await = Some(payload);
		} else {
			self.copy_to_dictionary(&payload).await;
		}
	}

	async fn copy_to_dictionary(&self, data: &[u8]) {
		let mut offset = 0;
		for mapping in self.common.mapping() {
			let len = usize::from(mapping.bit_length / 8);
			if mapping.is_dummy() {
				offset += len;
				continue;
			}
			let Some(chunk) = data.get(offset..offset + len) else {
				log::warn!("RPDO mapped write to {:#06X}:{} skipped: staged frame too short", mapping.object.index, mapping.object.subindex);
				break;
			};
			if let Err(error) = self.dictionary.write_bytes(mapping.object.index, mapping.object.subindex, chunk).await {
				log::warn!("RPDO mapped write to {:#06X}:{} failed: {error}", mapping.object.index, mapping.object.subindex);
			}
			offset += len;
		}
	}

	/// Periodic tick: pick up a changed 0x1400+/5 event-timer period and raise `RpdoTimeout`
	/// if no frame has arrived within it.
	pub async fn process(&self) {
		let configured_ms = self.common.timer_ms();
		let mut timer = self.timer.lock().await;
		if self.configured_timer_ms.swap(configured_ms, Ordering::Relaxed) != configured_ms {
			timer.set_period(std::time::Duration::from_millis(configured_ms.into()), &self.clock);
		}
		if !timer.has_expired(&self.clock) {
			return;
		}
		drop(timer);
		if !self.timed_out.swap(true, Ordering::Relaxed) {
			self.emcy.error(true, ErrorBit::RpdoTimeout, 0).await;
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::dictionary::{AccessType, DataType, Entry, Object, Variable};
	use crate::pdo::PdoMapping;
	use assert2::assert;

	fn dict_with_mappable_u16() -> Arc<ObjectDictionary> {
		let mut dict = ObjectDictionary::empty(0x10);
		let mut var = Variable::new(0x6200, 1, "output", DataType::Unsigned16, AccessType::READ_WRITE, vec![0; 2]);
		var.rpdo_mappable = true;
		dict.insert(Entry::new(0x6200, "output", Object::Variable(var)));
		Arc::new(dict)
	}

	fn configured_rpdo(dict: Arc<ObjectDictionary>, mode: u8) -> (Arc<PdoCommon>, Arc<Rpdo>) {
		let common = PdoCommon::new(dict.clone(), true, 0x210);
		let mapping = PdoMapping { object: crate::ObjectIndex::new(0x6200, 1), bit_length: 16 };
		common.configure_for_test(mode, &[mapping]);
		let emcy = Arc::new(Emcy::new(0x10, 8, std::time::Duration::ZERO, Clock));
		(common.clone(), Rpdo::new(common, dict, emcy, Clock))
	}

	#[tokio::test]
	async fn synchronous_frame_is_staged_until_sync() {
		let dict = dict_with_mappable_u16();
		let (_common, rpdo) = configured_rpdo(dict.clone(), 0xFE);
		let frame = CanFrame::new(StandardId::new(0x210).unwrap(), &0x1234u16.to_le_bytes()[..]).unwrap();
		rpdo.handle(&frame).await;
		assert_unchanged(&dict).await;
		assert!(rpdo.staged.lock().await.is_none());
	}

	async fn assert_unchanged(dict: &ObjectDictionary) {
		use crate::dictionary::Value;
		assert!(matches!(dict.read_value(0x6200, 1).await, Ok(Value::U16(0))));
	}

	#[tokio::test]
	async fn sync_transmission_type_stages_then_sync_commits() {
		let dict = dict_with_mappable_u16();
		let (_common, rpdo) = configured_rpdo(dict.clone(), 1);
		let frame = CanFrame::new(StandardId::new(0x210).unwrap(), &0x1234u16.to_le_bytes()[..]).unwrap();
		rpdo.handle(&frame).await;
		use crate::dictionary::Value;
		assert!(matches!(dict.read_value(0x6200, 1).await, Ok(Value::U16(0))));
		let staged = rpdo.staged.lock().await.take().unwrap();
		rpdo.copy_to_dictionary(&staged).await;
		assert!(matches!(dict.read_value(0x6200, 1).await, Ok(Value::U16(0x1234))));
	}

	#[tokio::test]
	async fn event_driven_frame_copies_immediately() {
		let dict = dict_with_mappable_u16();
		let (_common, rpdo) = configured_rpdo(dict.clone(), 0xFF);
		let frame = CanFrame::new(StandardId::new(0x210).unwrap(), &0x1234u16.to_le_bytes()[..]).unwrap();
		rpdo.handle(&frame).await;
		use crate::dictionary::Value;
		assert!(matches!(dict.read_value(0x6200, 1).await, Ok(Value::U16(0x1234))));
	}

	#[tokio::test]
	async fn short_frame_raises_length_error_and_is_dropped() {
		let dict = dict_with_mappable_u16();
		let (_common, rpdo) = configured_rpdo(dict.clone(), 0xFF);
		let frame = CanFrame::new(StandardId::new(0x210).unwrap(), &[0x01][..]).unwrap();
		rpdo.handle(&frame).await;
		assert!(rpdo.length_mismatch.load(Ordering::Relaxed));
		use crate::dictionary::Value;
		assert!(matches!(dict.read_value(0x6200, 1).await, Ok(Value::U16(0))));
	}
}
