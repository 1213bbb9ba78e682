//! Vtable-style capability for OD entries backed by something other than a plain buffer.
//!
//! Control registers (0x1005 SYNC COB-ID, 0x1017 heartbeat period, PDO comm/mapping
//! parameters, ...) and DOMAIN entries backed by a file or other streaming source are
//! modeled as an [`Extension`]: SDO traffic and internal reads flow through it instead of
//! touching the entry's byte buffer directly.

use std::sync::Arc;

use super::OdError;

/// Status returned by an extension's reader/writer, mirroring the streamer contract used
/// for segmented/block SDO transfers: a call may finish the logical operation (`Done`) or
/// leave more data pending (`Partial`).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StreamStatus {
	Done,
	Partial,
}

/// The back-object + reader/writer pair attached to an [`Entry`](super::Entry).
///
/// Implementors own whatever state the control register reconfigures (a PDO, the NMT
/// producer period, ...) and are reached through `dyn` dispatch rather than a closure pair,
/// so one implementation can serve several sub-indices of the same entry consistently.
pub trait ExtensionHandler: Send + Sync {
	/// Read `sub_index` starting at `offset` into `out`, returning the number of bytes
	/// written and whether the logical value has more data pending.
	fn read(&self, sub_index: u8, offset: usize, out: &mut [u8]) -> Result<(usize, StreamStatus), OdError>;

	/// Write `data` to `sub_index` at `offset`.
	fn write(&self, sub_index: u8, offset: usize, data: &[u8]) -> Result<StreamStatus, OdError>;
}

/// An [`ExtensionHandler`] plus the per-sub-index PDO mapping flags the entry exposes.
#[derive(Clone)]
pub struct Extension {
	handler: Arc<dyn ExtensionHandler>,
	/// 32-bit PDO flag word per sub-index (bit 0: TPDO-mappable, bit 1: RPDO-mappable),
	/// indexed densely from sub-index 0.
	pdo_flags: Arc<Vec<u32>>,
}

impl Extension {
	pub fn new(handler: impl ExtensionHandler + 'static, pdo_flags: Vec<u32>) -> Self {
		Self { handler: Arc::new(handler), pdo_flags: Arc::new(pdo_flags) }
	}

	pub fn read(&self, sub_index: u8, offset: usize, out: &mut [u8]) -> Result<(usize, StreamStatus), OdError> {
		self.handler.read(sub_index, offset, out)
	}

	pub fn write(&self, sub_index: u8, offset: usize, data: &[u8]) -> Result<StreamStatus, OdError> {
		self.handler.write(sub_index, offset, data)
	}

	pub fn tpdo_mappable(&self, sub_index: u8) -> bool {
		self.pdo_flags.get(sub_index as usize).is_some_and(|flags| flags & 0x1 != 0)
	}

	pub fn rpdo_mappable(&self, sub_index: u8) -> bool {
		self.pdo_flags.get(sub_index as usize).is_some_and(|flags| flags & 0x2 != 0)
	}
}

impl std::fmt::Debug for Extension {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Extension").finish_non_exhaustive()
	}
}
