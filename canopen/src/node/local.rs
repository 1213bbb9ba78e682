//! A node whose Object Dictionary lives on this process: the services that answer requests
//! and emit PDOs/heartbeats/EMCYs for this node's own identity.

use std::sync::Arc;
use std::time::Duration;

use can_socket::StandardId;
use tokio::sync::Mutex;

use crate::bus::{BusManager, ControllerStatus, SubscriptionToken};
use crate::clock::Clock;
use crate::dictionary::ObjectDictionary;
use crate::emcy::Emcy;
use crate::heartbeat::HeartbeatConsumer;
use crate::id::SYNC_ID;
use crate::nmt::{Nmt, NmtState, ResetRequest};
use crate::pdo::{PdoCommon, Rpdo, Tpdo};
use crate::sdo::{SdoAddress, SdoServer};
use crate::sync::{SyncConsumer, SyncProducer};

/// Construction-time parameters for a [`LocalNode`]; everything CiA 301 leaves as a
/// per-device choice rather than a protocol constant.
#[derive(Debug, Clone)]
pub struct LocalNodeConfig {
	pub startup_to_operational: bool,
	pub heartbeat_period: Duration,
	pub emcy_fifo_capacity: usize,
	pub emcy_inhibit_time: Duration,
	/// SYNC period this node produces. Zero means this node does not produce SYNC (it may
	/// still consume one produced by another node on the bus).
	pub sync_period: Duration,
	pub sync_counter_overflow: u8,
	pub sdo_address: SdoAddress,
	pub sdo_timeout: Duration,
}

impl Default for LocalNodeConfig {
	fn default() -> Self {
		Self {
			startup_to_operational: true,
			heartbeat_period: Duration::from_millis(1000),
			emcy_fifo_capacity: 8,
			emcy_inhibit_time: Duration::ZERO,
			sync_period: Duration::ZERO,
			sync_counter_overflow: 0,
			sdo_address: SdoAddress::standard(),
			sdo_timeout: Duration::from_millis(1000),
		}
	}
}

/// A locally hosted CANopen node: one Object Dictionary plus the services that make it
/// visible on the bus (SDO server, EMCY/NMT/SYNC/heartbeat producers and consumers, and its
/// configured RPDOs/TPDOs).
///
/// Built once with its full set of PDOs; [`crate::node::ResetRequest`] handling tears down
/// and rebuilds only the bus-facing subscriptions, never the PDO engine itself, since this
/// crate doesn't re-parse the EDS on a reset.
pub struct LocalNode {
	node_id: u8,
	bus: Arc<BusManager>,
	dictionary: Arc<ObjectDictionary>,
	emcy: Arc<Emcy>,
	nmt: Arc<Nmt>,
	sync_producer: Option<Arc<SyncProducer>>,
	sync_consumer: Arc<SyncConsumer>,
	heartbeat_consumer: Arc<HeartbeatConsumer>,
	sdo_server: Arc<SdoServer>,
	rpdos: Vec<Arc<Rpdo>>,
	tpdos: Vec<Arc<Tpdo>>,
	subscriptions: Mutex<Vec<SubscriptionToken>>,
	previous_controller_status: Mutex<ControllerStatus>,
}

impl LocalNode {
	/// Build a node's services. `rpdo_commons`/`tpdo_commons` are the [`PdoCommon`] handles
	/// already wired into `dictionary`'s 0x1400+/0x1600+ and 0x1800+/0x1A00+ entries via
	/// [`PdoCommon::comm_extension`]/[`PdoCommon::mapping_extension`].
	pub fn new(
		node_id: u8,
		bus: Arc<BusManager>,
		dictionary: Arc<ObjectDictionary>,
		config: LocalNodeConfig,
		rpdo_commons: Vec<Arc<PdoCommon>>,
		tpdo_commons: Vec<Arc<PdoCommon>>,
	) -> Arc<Self> {
		let clock = Clock;
		let emcy = Arc::new(Emcy::new(node_id, config.emcy_fifo_capacity, config.emcy_inhibit_time, clock));
		let nmt = Arc::new(Nmt::new(node_id, config.startup_to_operational, config.heartbeat_period, clock));
		let sync_producer = if config.sync_period.is_zero() {
			None
		} else {
			Some(Arc::new(SyncProducer::new(StandardId::new(SYNC_ID).unwrap(), config.sync_period, config.sync_counter_overflow, clock)))
		};
		let sync_consumer = Arc::new(SyncConsumer::new(config.sync_period, clock));
		let heartbeat_consumer = Arc::new(HeartbeatConsumer::new(clock));
		let sdo_server = Arc::new(SdoServer::new(bus.clone(), dictionary.clone(), node_id, config.sdo_address, config.sdo_timeout, clock));

		let rpdos = rpdo_commons.into_iter().map(|common| Rpdo::new(common, dictionary.clone(), emcy.clone(), clock)).collect();
		let tpdos = tpdo_commons.into_iter().map(|common| Tpdo::new(common, dictionary.clone(), clock)).collect();

		Arc::new(Self {
			node_id,
			bus,
			dictionary,
			emcy,
			nmt,
			sync_producer,
			sync_consumer,
			heartbeat_consumer,
			sdo_server,
			rpdos,
			tpdos,
			subscriptions: Mutex::new(Vec::new()),
			previous_controller_status: Mutex::new(ControllerStatus::default()),
		})
	}

	pub fn node_id(&self) -> u8 {
		self.node_id
	}

	pub fn dictionary(&self) -> &Arc<ObjectDictionary> {
		&self.dictionary
	}

	pub fn emcy(&self) -> &Arc<Emcy> {
		&self.emcy
	}

	pub fn nmt(&self) -> &Arc<Nmt> {
		&self.nmt
	}

	pub fn heartbeat_consumer(&self) -> &Arc<HeartbeatConsumer> {
		&self.heartbeat_consumer
	}

	/// Start monitoring another node's heartbeat at `period_ms` (0x1016 semantics).
	pub async fn monitor_heartbeat(&self, node_id: u8, period_ms: u16) {
		self.heartbeat_consumer.configure(node_id, period_ms).await;
		let token = self.heartbeat_consumer.attach(&self.bus, node_id, self.emcy.clone()).await;
		self.subscriptions.lock().await.push(token);
	}

	/// Subscribe every bus-facing service and run the NMT startup transition. Must be called
	/// exactly once, before the owning [`crate::network::Network`] starts ticking this node.
	pub async fn attach(self: &Arc<Self>) {
		let node = self.clone();
		let (reset_tx, mut reset_rx) = tokio::sync::mpsc::unbounded_channel();
		let nmt_token = self.nmt.subscribe(&self.bus, move |request| {
			let _ = reset_tx.send(request);
		})
		.await;
		self.subscriptions.lock().await.push(nmt_token);

		self.start_services().await;
		self.nmt.start(&self.bus).await;

		tokio::spawn(async move {
			while let Some(request) = reset_rx.recv().await {
				node.handle_reset(request).await;
			}
		});
	}

	/// Subscribe everything except the NMT command listener itself: the SYNC consumer, every
	/// RPDO/TPDO, and any configured heartbeat monitors. Split out from [`Self::attach`] so a
	/// reset can tear these down and rebuild them without losing the ability to receive a
	/// second reset command.
	async fn start_services(self: &Arc<Self>) {
		let mut subscriptions = Vec::new();
		subscriptions.push(self.sdo_server.attach().await);
		subscriptions.push(self.sync_consumer.attach(&self.bus, self.emcy.clone()).await);
		for rpdo in &self.rpdos {
			rpdo.attach(self.bus.clone(), self.sync_consumer.clone());
		}
		for tpdo in &self.tpdos {
			tpdo.attach(self.bus.clone(), self.sync_consumer.clone());
		}
		self.subscriptions.lock().await.extend(subscriptions);
	}

	async fn stop_services(&self) {
		let mut subscriptions = self.subscriptions.lock().await;
		for token in subscriptions.drain(..) {
			self.bus.unsubscribe(token).await;
		}
	}

	async fn handle_reset(self: &Arc<Self>, request: ResetRequest) {
		log::info!("node {:#04X} handling {request:?}", self.node_id);
		self.stop_services().await;

		let nmt = self.nmt.clone();
		let node = self.clone();
		let (reset_tx, mut reset_rx) = tokio::sync::mpsc::unbounded_channel();
		let nmt_token = nmt.subscribe(&self.bus, move |request| {
			let _ = reset_tx.send(request);
		})
		.await;
		self.subscriptions.lock().await.push(nmt_token);

		self.start_services().await;
		self.nmt.start(&self.bus).await;

		tokio::spawn(async move {
			while let Some(request) = reset_rx.recv().await {
				node.handle_reset(request).await;
			}
		});
	}

	/// The ~10ms periodic tick: SYNC, and every RPDO/TPDO's own processing.
	pub async fn background_tick(&self) {
		if let Some(producer) = &self.sync_producer {
			producer.process(&self.bus).await;
		}
		self.sync_consumer.process(&self.emcy).await;
		for rpdo in &self.rpdos {
			rpdo.process().await;
		}
		for tpdo in &self.tpdos {
			tpdo.process(&self.bus).await;
		}
	}

	/// The ~1ms periodic tick: NMT heartbeat, EMCY flush, heartbeat-consumer timeouts, and
	/// the error-driven NMT transitions those two feed into.
	pub async fn main_tick(&self) {
		self.nmt.process(&self.bus).await;
		let pre_or_op = !matches!(self.nmt.state().await, NmtState::Initializing);
		let mut previous = self.previous_controller_status.lock().await;
		self.emcy.process(&self.bus, pre_or_op, &mut previous).await;
		let bus_off = previous.bus_off;
		drop(previous);
		self.heartbeat_consumer.process(&self.emcy).await;

		if bus_off {
			self.nmt.on_error_condition(&self.bus, true).await;
		} else if self.heartbeat_consumer.has_timeout() {
			self.nmt.on_error_condition(&self.bus, false).await;
		} else {
			self.nmt.on_error_cleared(&self.bus, true).await;
		}
	}

	pub async fn shutdown(&self) {
		self.stop_services().await;
	}
}

impl std::fmt::Debug for LocalNode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LocalNode").field("node_id", &format_args!("{:#04X}", self.node_id)).finish_non_exhaustive()
	}
}
