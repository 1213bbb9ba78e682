//! Top-level scheduler: owns the bus, a default SDO client, and every node on it, and drives
//! the two periodic loops ([`LocalNode::background_tick`]/[`LocalNode::main_tick`] and their
//! [`RemoteNode`] counterparts) that make the whole stack run without an explicit event loop
//! in the embedding application.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::bus::BusManager;
use crate::clock::Clock;
use crate::emcy::Emcy;
use crate::node::{LocalNode, Node, RemoteNode};
use crate::sdo::{SdoAddress, SdoClient};
use crate::sync::SyncConsumer;

/// Rejection of an attempt to register a node with [`Network`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[derive(thiserror::Error)]
pub enum NetworkError {
	#[error("node id {0:#04X} is already registered on this network")]
	DuplicateNodeId(u8),
}

/// Construction-time parameters for a [`Network`].
#[derive(Debug, Clone)]
pub struct NetworkConfig {
	/// Expected network-wide SYNC period, used for this network's own SYNC timeout
	/// detection on behalf of any [`RemoteNode`]'s shadow RPDOs/TPDOs.
	pub sync_period: Duration,
	pub background_tick_period: Duration,
	pub main_tick_period: Duration,
	pub default_sdo_timeout: Duration,
}

impl Default for NetworkConfig {
	fn default() -> Self {
		Self {
			sync_period: Duration::ZERO,
			background_tick_period: Duration::from_millis(10),
			main_tick_period: Duration::from_millis(1),
			default_sdo_timeout: Duration::from_millis(1000),
		}
	}
}

/// Owns the bus and every node registered on it, and runs the background/main periodic
/// loops described in this crate's concurrency model.
///
/// [`RemoteNode`]s have no NMT/EMCY identity of their own on this bus, so `Network` keeps
/// one [`SyncConsumer`] (with a private, never-flushed [`Emcy`]) purely to drive their
/// shadow PDO engines; a [`LocalNode`] always runs its own.
pub struct Network {
	bus: Arc<BusManager>,
	default_client: Arc<SdoClient>,
	sync_consumer: Arc<SyncConsumer>,
	sync_emcy: Arc<Emcy>,
	nodes: Mutex<HashMap<u8, Node>>,
	shutdown_tx: watch::Sender<bool>,
	background_tick_period: Duration,
	main_tick_period: Duration,
	tasks: StdMutex<Vec<JoinHandle<()>>>,
	started: AtomicBool,
}

impl Network {
	pub fn new(bus: Arc<BusManager>, config: NetworkConfig) -> Arc<Self> {
		let clock = Clock;
		let default_client = Arc::new(SdoClient::new(bus.clone(), SdoAddress::standard(), config.default_sdo_timeout, clock));
		let sync_consumer = Arc::new(SyncConsumer::new(config.sync_period, clock));
		let sync_emcy = Arc::new(Emcy::new(0, 1, Duration::ZERO, clock));
		let (shutdown_tx, _) = watch::channel(false);
		Arc::new(Self {
			bus,
			default_client,
			sync_consumer,
			sync_emcy,
			nodes: Mutex::new(HashMap::new()),
			shutdown_tx,
			background_tick_period: config.background_tick_period,
			main_tick_period: config.main_tick_period,
			tasks: StdMutex::new(Vec::new()),
			started: AtomicBool::new(false),
		})
	}

	pub fn bus(&self) -> &Arc<BusManager> {
		&self.bus
	}

	/// The SDO client new [`RemoteNode`]s can share unless they need a non-default address.
	pub fn default_client(&self) -> &Arc<SdoClient> {
		&self.default_client
	}

	/// Attach and register a locally hosted node.
	pub async fn add_local_node(&self, node: Arc<LocalNode>) -> Result<(), NetworkError> {
		let mut nodes = self.nodes.lock().await;
		if nodes.contains_key(&node.node_id()) {
			return Err(NetworkError::DuplicateNodeId(node.node_id()));
		}
		node.attach().await;
		nodes.insert(node.node_id(), Node::Local(node));
		Ok(())
	}

	/// Attach and register a remote node.
	pub async fn add_remote_node(&self, node: Arc<RemoteNode>) -> Result<(), NetworkError> {
		let mut nodes = self.nodes.lock().await;
		if nodes.contains_key(&node.node_id()) {
			return Err(NetworkError::DuplicateNodeId(node.node_id()));
		}
		node.attach(self.bus.clone(), self.sync_consumer.clone());
		nodes.insert(node.node_id(), Node::Remote(node));
		Ok(())
	}

	pub async fn remove_node(&self, node_id: u8) -> Option<Node> {
		self.nodes.lock().await.remove(&node_id)
	}

	pub async fn node(&self, node_id: u8) -> Option<Node> {
		self.nodes.lock().await.get(&node_id).cloned()
	}

	/// Start the bus receive loop and the two periodic ticks. Call once; a second call is a
	/// no-op.
	pub fn start(self: &Arc<Self>) {
		if self.started.swap(true, Ordering::AcqRel) {
			return;
		}
		let bus_task = self.clone().spawn_bus_loop();
		let background_task = self.clone().spawn_background_loop();
		let main_task = self.clone().spawn_main_loop();
		self.tasks.lock().unwrap().extend([bus_task, background_task, main_task]);
	}

	fn spawn_bus_loop(self: Arc<Self>) -> JoinHandle<()> {
		tokio::spawn(async move {
			let token = self.sync_consumer.attach(&self.bus, self.sync_emcy.clone()).await;
			let mut shutdown = self.shutdown_tx.subscribe();
			loop {
				tokio::select! {
					biased;
					_ = shutdown.changed() => break,
					result = self.bus.recv_and_dispatch() => {
						if let Err(error) = result {
							log::error!("CAN bus receive failed: {error}");
						}
					}
				}
				if *shutdown.borrow() {
					break;
				}
			}
			self.bus.unsubscribe(token).await;
		})
	}

	fn spawn_background_loop(self: Arc<Self>) -> JoinHandle<()> {
		tokio::spawn(async move {
			let mut shutdown = self.shutdown_tx.subscribe();
			let mut ticker = tokio::time::interval(self.background_tick_period);
			loop {
				tokio::select! {
					biased;
					_ = shutdown.changed() => break,
					_ = ticker.tick() => {
						if *shutdown.borrow() {
							break;
						}
						self.run_background_tick().await;
					}
				}
			}
		})
	}

	fn spawn_main_loop(self: Arc<Self>) -> JoinHandle<()> {
		tokio::spawn(async move {
			let mut shutdown = self.shutdown_tx.subscribe();
			let mut ticker = tokio::time::interval(self.main_tick_period);
			loop {
				tokio::select! {
					biased;
					_ = shutdown.changed() => break,
					_ = ticker.tick() => {
						if *shutdown.borrow() {
							break;
						}
						self.run_main_tick().await;
					}
				}
			}
		})
	}

	async fn run_background_tick(&self) {
		self.sync_consumer.process(&self.sync_emcy).await;
		let nodes = self.nodes.lock().await;
		for node in nodes.values() {
			match node {
				Node::Local(local) => local.background_tick().await,
				Node::Remote(remote) => remote.background_tick(&self.bus).await,
			}
		}
	}

	async fn run_main_tick(&self) {
		let nodes = self.nodes.lock().await;
		for node in nodes.values() {
			if let Node::Local(local) = node {
				local.main_tick().await;
			}
		}
	}

	/// Signal both periodic loops and the bus loop to stop, and join them.
	pub async fn shutdown(&self) {
		let _ = self.shutdown_tx.send(true);
		let handles: Vec<_> = self.tasks.lock().unwrap().drain(..).collect();
		for handle in handles {
			let _ = handle.await;
		}
	}
}

impl std::fmt::Debug for Network {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Network").finish_non_exhaustive()
	}
}
