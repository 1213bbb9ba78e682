//! End-to-end coverage over an in-memory CAN bus: a client/server pair (or a producer and a
//! plain listener) exchanging real frames through [`LoopbackBus`], with no SocketCAN
//! interface involved. Mirrors `can-socket/tests/socket.rs`'s one-file-per-concern layout,
//! with small helpers kept at the top instead of a shared `support` module.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert2::assert;
use can_socket::{CanFrame, StandardId};
use tokio::sync::broadcast;

use canopen::bus::{BusManager, Transport};
use canopen::clock::Clock;
use canopen::dictionary::{AccessType, DataType, Entry, Object, ObjectDictionary, Record, Value, Variable};
use canopen::emcy::Emcy;
use canopen::heartbeat::HeartbeatConsumer;
use canopen::id::CanOpenIdExt;
use canopen::pdo::{PdoCommon, PdoMapping, Tpdo};
use canopen::sdo::{AbortReason, ObjectIndex, SdoAddress, SdoClient, SdoError, SdoServer};
use canopen::sync::{SyncConsumer, SyncProducer};

/// A shared in-memory CAN medium: every attached endpoint sees every frame sent by any
/// *other* endpoint, exactly like a real bus, and never its own.
struct LoopbackMedium {
	sender: broadcast::Sender<(u64, CanFrame)>,
	next_id: AtomicU64,
}

impl LoopbackMedium {
	fn new() -> Arc<Self> {
		let (sender, _) = broadcast::channel(1024);
		Arc::new(Self { sender, next_id: AtomicU64::new(0) })
	}

	fn attach(self: &Arc<Self>) -> LoopbackBus {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		LoopbackBus { id, medium: self.clone(), receiver: tokio::sync::Mutex::new(self.sender.subscribe()) }
	}
}

/// One endpoint on a [`LoopbackMedium`]. Implements [`Transport`] so it can back a
/// [`BusManager`] directly; also usable bare, for test code that just wants to inject or
/// observe raw frames without running a full node on top.
struct LoopbackBus {
	id: u64,
	medium: Arc<LoopbackMedium>,
	receiver: tokio::sync::Mutex<broadcast::Receiver<(u64, CanFrame)>>,
}

impl LoopbackBus {
	async fn send_frame(&self, frame: &CanFrame) -> std::io::Result<()> {
		self.medium
			.sender
			.send((self.id, *frame))
			.map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "no loopback receivers attached"))?;
		Ok(())
	}

	async fn recv_frame(&self) -> std::io::Result<CanFrame> {
		let mut receiver = self.receiver.lock().await;
		loop {
			match receiver.recv().await {
				Ok((sender_id, frame)) if sender_id != self.id => return Ok(frame),
				Ok(_) => continue,
				Err(broadcast::error::RecvError::Lagged(_)) => continue,
				Err(broadcast::error::RecvError::Closed) => {
					return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "loopback medium closed"));
				}
			}
		}
	}
}

#[async_trait::async_trait]
impl Transport for LoopbackBus {
	async fn send(&self, frame: &CanFrame) -> std::io::Result<()> {
		self.send_frame(frame).await
	}

	async fn recv(&self) -> std::io::Result<CanFrame> {
		self.recv_frame().await
	}
}

/// Spawn the dispatch loop a node-side [`BusManager`] needs to actually deliver inbound
/// frames to its subscribers; without this nothing a node subscribes to is ever woken.
fn spawn_dispatch_loop(bus: Arc<BusManager>) {
	tokio::spawn(async move {
		while bus.recv_and_dispatch().await.is_ok() {}
	});
}

/// Install a PDO's communication (0x1400+/0x1800+) and mapping (0x1600+/0x1A00+) records
/// into `dict`, wired to `common`'s extensions. The sub-variables carry the CiA 301 wire
/// types only; their own buffers are never read, since the attached extension intercepts
/// every access.
fn install_pdo_object(dict: &mut ObjectDictionary, common: &Arc<PdoCommon>, is_rpdo: bool, comm_index: u16, mapping_index: u16) {
	let mut comm = Record::new(comm_index, "PDO communication parameter");
	comm.push(Variable::new(comm_index, 0, "highest sub-index supported", DataType::Unsigned8, AccessType::READ_ONLY, vec![0]));
	comm.push(Variable::new(comm_index, 1, "COB-ID", DataType::Unsigned32, AccessType::READ_WRITE, vec![0; 4]));
	comm.push(Variable::new(comm_index, 2, "transmission type", DataType::Unsigned8, AccessType::READ_WRITE, vec![0]));
	comm.push(Variable::new(comm_index, 3, "inhibit time", DataType::Unsigned16, AccessType::READ_WRITE, vec![0; 2]));
	comm.push(Variable::new(comm_index, 4, "reserved", DataType::Unsigned8, AccessType::READ_WRITE, vec![0]));
	comm.push(Variable::new(comm_index, 5, "event timer", DataType::Unsigned16, AccessType::READ_WRITE, vec![0; 2]));
	if !is_rpdo {
		comm.push(Variable::new(comm_index, 6, "SYNC start value", DataType::Unsigned8, AccessType::READ_WRITE, vec![0]));
	}
	let mut comm_entry = Entry::new(comm_index, "PDO communication parameter", Object::Record(comm));
	comm_entry.extension = Some(common.comm_extension());
	dict.insert(comm_entry);

	let mut mapping = Record::new(mapping_index, "PDO mapping parameter");
	mapping.push(Variable::new(mapping_index, 0, "number of mapped objects", DataType::Unsigned8, AccessType::READ_WRITE, vec![0]));
	for sub in 1..=8u8 {
		mapping.push(Variable::new(mapping_index, sub, "mapped object", DataType::Unsigned32, AccessType::READ_WRITE, vec![0; 4]));
	}
	let mut mapping_entry = Entry::new(mapping_index, "PDO mapping parameter", Object::Record(mapping));
	mapping_entry.extension = Some(common.mapping_extension());
	dict.insert(mapping_entry);
}

/// A dictionary containing only the mapped target variable(s), used as [`PdoCommon`]'s
/// internal lookup dictionary. Mapping validation only ever inspects a target entry's
/// static type/mappable flags (never its live value), so this never needs to be the same
/// instance the node actually reads and writes through.
fn shape_dict_with_u16(node_id: u8, index: u16, sub_index: u8, tpdo_mappable: bool, rpdo_mappable: bool) -> Arc<ObjectDictionary> {
	let mut dict = ObjectDictionary::empty(node_id);
	let mut var = Variable::new(index, sub_index, "mapped", DataType::Unsigned16, AccessType::READ_WRITE, vec![0; 2]);
	var.tpdo_mappable = tpdo_mappable;
	var.rpdo_mappable = rpdo_mappable;
	dict.insert(Entry::new(index, "mapped", Object::Variable(var)));
	Arc::new(dict)
}

const SERVER_NODE_ID: u8 = 0x20;

#[tokio::test]
async fn expedited_sdo_upload_round_trips_over_the_wire() {
	let mut dict = ObjectDictionary::empty(SERVER_NODE_ID);
	dict.insert(Entry::new(
		0x2000,
		"demo value",
		Object::Variable(Variable::new(0x2000, 0, "demo value", DataType::Unsigned16, AccessType::READ_WRITE, 0x1234u16.to_le_bytes().to_vec())),
	));
	let dict = Arc::new(dict);

	let medium = LoopbackMedium::new();
	let server_bus = Arc::new(BusManager::with_transport(medium.attach()));
	let client_bus = Arc::new(BusManager::with_transport(medium.attach()));
	spawn_dispatch_loop(server_bus.clone());
	spawn_dispatch_loop(client_bus.clone());

	let server = Arc::new(SdoServer::new(server_bus, dict, SERVER_NODE_ID, SdoAddress::standard(), Duration::from_millis(500), Clock));
	server.attach().await;

	let client = SdoClient::new(client_bus, SdoAddress::standard(), Duration::from_millis(500), Clock);
	let value = client.read_value(SERVER_NODE_ID, ObjectIndex::new(0x2000, 0), DataType::Unsigned16).await.unwrap();
	assert!(value == Value::U16(0x1234));
}

#[tokio::test]
async fn tpdo_fires_on_sync_with_the_mapped_value() {
	let node_id = 0x21;
	let lookup = shape_dict_with_u16(node_id, 0x6401, 1, true, false);
	let tpdo_common = PdoCommon::new(lookup, false, 0x1A1);

	let mut dict = ObjectDictionary::empty(node_id);
	let mut mapped = Variable::new(0x6401, 1, "analog input", DataType::Unsigned16, AccessType::READ_WRITE, vec![0; 2]);
	mapped.tpdo_mappable = true;
	dict.insert(Entry::new(0x6401, "analog input", Object::Variable(mapped)));
	install_pdo_object(&mut dict, &tpdo_common, false, 0x1800, 0x1A00);
	let dict = Arc::new(dict);

	let medium = LoopbackMedium::new();
	let node_bus = Arc::new(BusManager::with_transport(medium.attach()));
	let client_bus = Arc::new(BusManager::with_transport(medium.attach()));
	let tester = medium.attach();
	spawn_dispatch_loop(node_bus.clone());
	spawn_dispatch_loop(client_bus.clone());

	let server = Arc::new(SdoServer::new(node_bus.clone(), dict.clone(), node_id, SdoAddress::standard(), Duration::from_millis(500), Clock));
	server.attach().await;
	let client = SdoClient::new(client_bus, SdoAddress::standard(), Duration::from_millis(500), Clock);

	// Map the analog input into slot 1, every-SYNC cyclic mode, then enable at CAN-ID 0x1A1.
	let mapping = PdoMapping { object: ObjectIndex::new(0x6401, 1), bit_length: 16 };
	client.download(node_id, ObjectIndex::new(0x1A00, 1), &mapping.to_u32().to_le_bytes()).await.unwrap();
	client.download(node_id, ObjectIndex::new(0x1A00, 0), &[1]).await.unwrap();
	client.download(node_id, ObjectIndex::new(0x1800, 2), &[1]).await.unwrap();
	client.download(node_id, ObjectIndex::new(0x1800, 1), &0x1A1u32.to_le_bytes()).await.unwrap();
	assert!(tpdo_common.is_valid());

	let tpdo = Tpdo::new(tpdo_common.clone(), dict.clone(), Clock);
	let emcy = Arc::new(Emcy::new(node_id, 8, Duration::ZERO, Clock));
	let sync_consumer = Arc::new(SyncConsumer::new(Duration::from_millis(100), Clock));
	sync_consumer.attach(&node_bus, emcy).await;
	tpdo.attach(node_bus.clone(), sync_consumer);

	dict.write_bytes(0x6401, 1, &0xBEEFu16.to_le_bytes()).await.unwrap();

	let sync_frame = CanFrame::new(StandardId::new(0x080).unwrap(), &[][..]).unwrap();
	tester.send_frame(&sync_frame).await.unwrap();

	let received = tokio::time::timeout(Duration::from_secs(1), tester.recv_frame()).await.unwrap().unwrap();
	assert!(received.id().as_u32() == 0x1A1);
	assert!(received.data() == [0xEF, 0xBE]);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_consumer_reports_timeout_then_recovers() {
	let node_id = 0x22;
	let monitored_id = 0x23;

	let medium = LoopbackMedium::new();
	let node_bus = Arc::new(BusManager::with_transport(medium.attach()));
	let tester = medium.attach();
	spawn_dispatch_loop(node_bus.clone());

	let emcy = Arc::new(Emcy::new(node_id, 8, Duration::ZERO, Clock));
	let consumer = Arc::new(HeartbeatConsumer::new(Clock));
	consumer.configure(monitored_id, 100).await;
	consumer.attach(&node_bus, monitored_id, emcy.clone()).await;

	tokio::time::advance(Duration::from_millis(150)).await;
	consumer.process(&emcy).await;
	assert!(consumer.has_timeout());

	let heartbeat = CanFrame::new(monitored_id.heartbeat_id(), &[canopen::nmt::NmtState::Operational.into()][..]).unwrap();
	tester.send_frame(&heartbeat).await.unwrap();
	// Let the dispatch loop and the spawned handler run before re-checking.
	tokio::time::advance(Duration::from_millis(1)).await;
	tokio::task::yield_now().await;
	tokio::task::yield_now().await;

	assert!(!consumer.has_timeout());
}

#[tokio::test]
async fn rpdo_mapping_write_is_rejected_while_the_pdo_is_valid() {
	let node_id = 0x24;
	let lookup = shape_dict_with_u16(node_id, 0x6200, 1, false, true);
	let rpdo_common = PdoCommon::new(lookup, true, 0x224);

	let mut dict = ObjectDictionary::empty(node_id);
	let mut mapped = Variable::new(0x6200, 1, "setpoint", DataType::Unsigned16, AccessType::READ_WRITE, vec![0; 2]);
	mapped.rpdo_mappable = true;
	dict.insert(Entry::new(0x6200, "setpoint", Object::Variable(mapped)));
	install_pdo_object(&mut dict, &rpdo_common, true, 0x1400, 0x1600);
	let dict = Arc::new(dict);

	let medium = LoopbackMedium::new();
	let node_bus = Arc::new(BusManager::with_transport(medium.attach()));
	let client_bus = Arc::new(BusManager::with_transport(medium.attach()));
	spawn_dispatch_loop(node_bus.clone());
	spawn_dispatch_loop(client_bus.clone());

	let server = Arc::new(SdoServer::new(node_bus, dict, node_id, SdoAddress::standard(), Duration::from_millis(500), Clock));
	server.attach().await;
	let client = SdoClient::new(client_bus, SdoAddress::standard(), Duration::from_millis(500), Clock);

	let mapping = PdoMapping { object: ObjectIndex::new(0x6200, 1), bit_length: 16 };
	client.download(node_id, ObjectIndex::new(0x1600, 1), &mapping.to_u32().to_le_bytes()).await.unwrap();
	client.download(node_id, ObjectIndex::new(0x1600, 0), &[1]).await.unwrap();
	canopen::pdo::enable_rpdo(&client, node_id, 0, true).await.unwrap();
	assert!(rpdo_common.is_valid());

	let other = PdoMapping { object: ObjectIndex::new(0x6200, 1), bit_length: 8 };
	let result = client.download(node_id, ObjectIndex::new(0x1600, 1), &other.to_u32().to_le_bytes()).await;
	let Err(SdoError::TransferAborted(reason)) = result else {
		panic!("expected the mapping write to be aborted, got {result:?}");
	};
	assert!(reason.0 == Ok(AbortReason::GeneralParameterError));
}

#[tokio::test(start_paused = true)]
async fn sync_producer_emits_on_its_configured_period() {
	let producer = SyncProducer::new(StandardId::new(0x080).unwrap(), Duration::from_millis(100), 0, Clock);

	let medium = LoopbackMedium::new();
	let node_bus = Arc::new(BusManager::with_transport(medium.attach()));
	let tester = medium.attach();

	producer.process(&node_bus).await; // not due yet
	assert!(tokio::time::timeout(Duration::from_millis(10), tester.recv_frame()).await.is_err());

	tokio::time::advance(Duration::from_millis(100)).await;
	producer.process(&node_bus).await;

	let frame = tokio::time::timeout(Duration::from_millis(10), tester.recv_frame()).await.unwrap().unwrap();
	assert!(frame.id().as_u32() == 0x080);
	assert!(frame.data().is_empty());
}

#[tokio::test]
async fn block_upload_transfers_a_large_domain_value() {
	let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 256) as u8).collect();

	let mut dict = ObjectDictionary::empty(SERVER_NODE_ID);
	dict.insert(Entry::new(
		0x2001,
		"firmware image",
		Object::Variable(Variable::new(0x2001, 0, "firmware image", DataType::Domain, AccessType::READ_WRITE, payload.clone())),
	));
	let dict = Arc::new(dict);

	let medium = LoopbackMedium::new();
	let server_bus = Arc::new(BusManager::with_transport(medium.attach()));
	let client_bus = Arc::new(BusManager::with_transport(medium.attach()));
	spawn_dispatch_loop(server_bus.clone());
	spawn_dispatch_loop(client_bus.clone());

	let server = Arc::new(SdoServer::new(server_bus, dict, SERVER_NODE_ID, SdoAddress::standard(), Duration::from_millis(2000), Clock));
	server.attach().await;
	let client = SdoClient::new(client_bus, SdoAddress::standard(), Duration::from_millis(2000), Clock);

	let mut buf = Vec::new();
	let n = client.block_upload(SERVER_NODE_ID, ObjectIndex::new(0x2001, 0), &mut buf).await.unwrap();
	assert!(n == payload.len());
	assert!(buf == payload);
}
