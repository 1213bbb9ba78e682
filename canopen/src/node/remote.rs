//! A node whose Object Dictionary lives on another device: reached over SDO, and optionally
//! shadowed locally so this process can act as the PDO master for it.

use std::sync::Arc;

use crate::clock::Clock;
use crate::dictionary::ObjectDictionary;
use crate::pdo::{self, PdoCommon, PdoConfigError, Rpdo, RpdoConfiguration, Tpdo, TpdoConfiguration};
use crate::sdo::SdoClient;

use crate::bus::BusManager;
use crate::sync::SyncConsumer;

/// A node reached only through its SDO server. `dictionary` is optional: supplying one lets
/// this process run the [`Rpdo`]/[`Tpdo`] engine against the remote node's predefined PDOs,
/// exactly as [`crate::node::LocalNode`] does for its own identity; without one, only ad hoc
/// SDO reads/writes and PDO (re)configuration are available.
pub struct RemoteNode {
	node_id: u8,
	client: Arc<SdoClient>,
	dictionary: Option<Arc<ObjectDictionary>>,
	rpdos: Vec<Arc<Rpdo>>,
	tpdos: Vec<Arc<Tpdo>>,
}

impl RemoteNode {
	/// `rpdo_commons`/`tpdo_commons` mirror the node's PDO configuration, as obtained from
	/// [`pdo::read_rpdo_configuration`]/[`pdo::read_tpdo_configuration`] and built into
	/// [`PdoCommon`] handles over `dictionary`. Pass empty vectors (and `None`) for a node
	/// this process only ever talks to over SDO.
	pub fn new(
		node_id: u8,
		client: Arc<SdoClient>,
		dictionary: Option<Arc<ObjectDictionary>>,
		rpdo_commons: Vec<Arc<PdoCommon>>,
		tpdo_commons: Vec<Arc<PdoCommon>>,
	) -> Arc<Self> {
		let clock = Clock;
		let (rpdos, tpdos) = match &dictionary {
			Some(dictionary) => {
				let rpdos = rpdo_commons
					.into_iter()
					.map(|common| Rpdo::new(common, dictionary.clone(), dummy_emcy(), clock))
					.collect();
				let tpdos = tpdo_commons.into_iter().map(|common| Tpdo::new(common, dictionary.clone(), clock)).collect();
				(rpdos, tpdos)
			}
			None => (Vec::new(), Vec::new()),
		};
		Arc::new(Self { node_id, client, dictionary, rpdos, tpdos })
	}

	pub fn node_id(&self) -> u8 {
		self.node_id
	}

	pub fn client(&self) -> &Arc<SdoClient> {
		&self.client
	}

	pub fn dictionary(&self) -> Option<&Arc<ObjectDictionary>> {
		self.dictionary.as_ref()
	}

	/// Subscribe this node's shadow RPDOs/TPDOs, if any, to the bus.
	pub fn attach(self: &Arc<Self>, bus: Arc<BusManager>, sync: Arc<SyncConsumer>) {
		for rpdo in &self.rpdos {
			rpdo.attach(bus.clone(), sync.clone());
		}
		for tpdo in &self.tpdos {
			tpdo.attach(bus.clone(), sync.clone());
		}
	}

	/// The ~10ms periodic tick for this node's shadow TPDOs (inhibit/event timers, queued
	/// transmissions) and RPDOs (event timeout bookkeeping).
	pub async fn background_tick(&self, bus: &BusManager) {
		for rpdo in &self.rpdos {
			rpdo.process().await;
		}
		for tpdo in &self.tpdos {
			tpdo.process(bus).await;
		}
	}

	pub async fn read_rpdo_configuration(&self, pdo: u16) -> Result<RpdoConfiguration, PdoConfigError> {
		pdo::read_rpdo_configuration(&self.client, self.node_id, pdo).await
	}

	pub async fn read_tpdo_configuration(&self, pdo: u16) -> Result<TpdoConfiguration, PdoConfigError> {
		pdo::read_tpdo_configuration(&self.client, self.node_id, pdo).await
	}

	pub async fn configure_rpdo(&self, pdo: u16, config: &RpdoConfiguration) -> Result<(), PdoConfigError> {
		pdo::configure_rpdo(&self.client, self.node_id, pdo, config).await
	}

	pub async fn configure_tpdo(&self, pdo: u16, config: &TpdoConfiguration) -> Result<(), PdoConfigError> {
		pdo::configure_tpdo(&self.client, self.node_id, pdo, config).await
	}
}

/// RPDO construction needs an [`crate::emcy::Emcy`] to raise length-mismatch/timeout errors
/// against. A shadow RPDO for a remote node has no EMCY identity of its own on this bus, so
/// it gets a private one whose errors are simply never flushed to the wire.
fn dummy_emcy() -> Arc<crate::emcy::Emcy> {
	Arc::new(crate::emcy::Emcy::new(0, 1, std::time::Duration::ZERO, Clock))
}

impl std::fmt::Debug for RemoteNode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RemoteNode").field("node_id", &format_args!("{:#04X}", self.node_id)).finish_non_exhaustive()
	}
}
