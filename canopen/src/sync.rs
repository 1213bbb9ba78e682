//! SYNC producer/consumer: the network time pulse driving synchronous PDO transmission.

use std::num::NonZeroU8;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use can_socket::{CanFrame, StandardId};
use tokio::sync::{broadcast, Mutex};

use crate::bus::BusManager;
use crate::clock::{Clock, Deadline};
use crate::emcy::{Emcy, ErrorBit};
use crate::id::SYNC_ID;

/// Cyclic SYNC producer. Active when `enabled` (0x1005 bit 30) and `period` (0x1006) is
/// non-zero.
pub struct SyncProducer {
	cob_id: StandardId,
	enabled: std::sync::atomic::AtomicBool,
	deadline: Mutex<Deadline>,
	counter: AtomicU8,
	counter_overflow: u8,
	clock: Clock,
}

impl SyncProducer {
	pub fn new(cob_id: StandardId, period: Duration, counter_overflow: u8, clock: Clock) -> Self {
		Self {
			cob_id,
			enabled: std::sync::atomic::AtomicBool::new(!period.is_zero()),
			deadline: Mutex::new(Deadline::with_period(period, &clock)),
			counter: AtomicU8::new(0),
			counter_overflow,
			clock,
		}
	}

	pub fn set_enabled(&self, enabled: bool) {
		self.enabled.store(enabled, Ordering::Relaxed);
	}

	pub async fn set_period(&self, period: Duration) {
		self.deadline.lock().await.set_period(period, &self.clock);
	}

	/// Emit a SYNC frame if the producer is enabled and the period has elapsed.
	pub async fn process(&self, bus: &BusManager) {
		if !self.enabled.load(Ordering::Relaxed) {
			return;
		}
		let expired = self.deadline.lock().await.has_expired(&self.clock);
		if !expired {
			return;
		}
		self.deadline.lock().await.reset(&self.clock);

		let frame = if self.counter_overflow == 0 {
			CanFrame::new(self.cob_id, &[][..])
		} else {
			let previous = self.counter.load(Ordering::Relaxed);
			let counter = if previous >= self.counter_overflow { 1 } else { previous + 1 };
			self.counter.store(counter, Ordering::Relaxed);
			CanFrame::new(self.cob_id, &[counter][..])
		};
		let frame = frame.expect("SYNC payload is at most 1 byte");
		if let Err(error) = bus.send(&frame).await {
			log::warn!("failed to send SYNC frame: {error}");
		}
	}
}

/// A SYNC reception, delivered to every subscriber.
#[derive(Debug, Clone, Copy)]
pub struct SyncEvent {
	pub counter: Option<NonZeroU8>,
}

/// SYNC consumer: tracks reception timeout and fans `SyncEvent`s out to subscribers.
///
/// Subscribers are slow-receive safe: [`broadcast`] drops the oldest buffered event for a
/// lagging receiver instead of backpressuring the producer.
pub struct SyncConsumer {
	timeout: Mutex<Deadline>,
	clock: Clock,
	sender: broadcast::Sender<SyncEvent>,
	timed_out: std::sync::atomic::AtomicBool,
}

impl SyncConsumer {
	pub fn new(period: Duration, clock: Clock) -> Self {
		let timeout_period = period.mul_f64(1.5);
		let (sender, _) = broadcast::channel(32);
		Self { timeout: Mutex::new(Deadline::with_period(timeout_period, &clock)), clock, sender, timed_out: std::sync::atomic::AtomicBool::new(false) }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
		self.sender.subscribe()
	}

    /// Reconfigure the expected SYNC period (and with it, the 1.5x timeout window).
	pub async fn set_period(&self, period: Duration) {
		self.timeout.lock().await.set_period(period.mul_f64(1.5), &self.clock);
	}

	/// Handle a received SYNC frame: reset the timeout, decode the optional counter, and
	/// notify subscribers.
	pub async fn handle(&self, frame: &CanFrame, emcy: &Emcy) {
		self.timeout.lock().await.reset(&self.clock);
		if self.timed_out.swap(false, Ordering::Relaxed) {
			emcy.error(false, ErrorBit::SyncTimeout, 0).await;
		}

		let counter = frame.data().first().copied().and_then(NonZeroU8::new);
		let _ = self.sender.send(SyncEvent { counter });
	}

	/// Periodic tick: raise `SYNC_TIMEOUT` if no SYNC has arrived within 1.5x the period.
	pub async fn process(&self, emcy: &Emcy) {
		let expired = self.timeout.lock().await.has_expired(&self.clock);
		if expired && !self.timed_out.swap(true, Ordering::Relaxed) {
			emcy.error(true, ErrorBit::SyncTimeout, 0).await;
		}
	}

	/// Subscribe this consumer to the SYNC service id on `bus`.
	pub async fn attach(self: &Arc<Self>, bus: &BusManager, emcy: Arc<Emcy>) -> crate::bus::SubscriptionToken {
		let consumer = self.clone();
		bus.subscribe(StandardId::new(SYNC_ID).unwrap(), 0x7FF, false, move |frame| {
			let consumer = consumer.clone();
			let emcy = emcy.clone();
			let frame = *frame;
			tokio::spawn(async move { consumer.handle(&frame, &emcy).await });
		})
		.await
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::assert;

	#[test]
	fn counter_wraps_at_overflow() {
		let counter = AtomicU8::new(0);
		let overflow = 5u8;
		let mut sequence = Vec::new();
		for _ in 0..7 {
			let previous = counter.load(Ordering::Relaxed);
			let next = if previous >= overflow { 1 } else { previous + 1 };
			counter.store(next, Ordering::Relaxed);
			sequence.push(next);
		}
		assert!(sequence == [1, 2, 3, 4, 5, 1, 2]);
	}

	#[tokio::test]
	async fn consumer_delivers_counter_to_subscribers() {
		let consumer = Arc::new(SyncConsumer::new(Duration::from_millis(100), Clock));
		let emcy = Emcy::new(0x30, 8, Duration::ZERO, Clock);
		let mut rx = consumer.subscribe();
		let frame = CanFrame::new(StandardId::new(0x080).unwrap(), &[3u8][..]).unwrap();
		consumer.handle(&frame, &emcy).await;
		let event = rx.try_recv().unwrap();
		assert!(event.counter == NonZeroU8::new(3));
	}
}
