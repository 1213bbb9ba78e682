//! Shared state behind a PDO's communication and mapping objects: one [`PdoCommon`] backs
//! both the 0x1400+/0x1800+ communication record and the 0x1600+/0x1A00+ mapping record for
//! a single PDO, and is read directly by [`super::rpdo::Rpdo`]/[`super::tpdo::Tpdo`] on
//! every frame.
//!
//! [`crate::dictionary::ExtensionHandler`] is a synchronous trait, so the state here lives
//! behind a plain [`std::sync::Mutex`] rather than the `tokio::sync::Mutex` used elsewhere
//! in this crate; nothing ever awaits while holding it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::dictionary::{Extension, ExtensionHandler, ObjectDictionary, OdError, StreamStatus};
use crate::id;

use super::{MappingError, PdoMapping};

const MAX_MAPPED: usize = 8;

struct PdoState {
	disabled: bool,
	rtr_disabled: bool,
	can_id: u16,
	mode: u8,
	inhibit_time_100us: u16,
	timer_ms: u16,
	start_sync: u8,
	slots: [u32; MAX_MAPPED],
	nb_mapped: u8,
}

/// Shared communication/mapping state for one RPDO or TPDO.
///
/// `valid` mirrors CiA 301's definition: COB-ID bit 31 clear, CAN-ID non-zero and not in
/// the restricted set, and at least one mapped entry. [`Self::valid_changed`] is notified
/// on every transition so the live [`super::rpdo::Rpdo`]/[`super::tpdo::Tpdo`] can
/// subscribe or tear down its bus presence without the synchronous extension callback
/// needing to touch the (async) [`crate::bus::BusManager`] itself.
pub struct PdoCommon {
	dictionary: Arc<ObjectDictionary>,
	is_rpdo: bool,
	state: Mutex<PdoState>,
	valid_tx: watch::Sender<bool>,
	cached_valid: AtomicBool,
}

impl PdoCommon {
	pub fn new(dictionary: Arc<ObjectDictionary>, is_rpdo: bool, predefined_id: u16) -> Arc<Self> {
		let state = PdoState {
			disabled: true,
			rtr_disabled: false,
			can_id: predefined_id,
			mode: 0xFF,
			inhibit_time_100us: 0,
			timer_ms: 0,
			start_sync: 0,
			slots: [0; MAX_MAPPED],
			nb_mapped: 0,
		};
		let (valid_tx, _) = watch::channel(false);
		Arc::new(Self { dictionary, is_rpdo, state: Mutex::new(state), valid_tx, cached_valid: AtomicBool::new(false) })
	}

	pub fn is_valid(&self) -> bool {
		self.cached_valid.load(Ordering::Acquire)
	}

	pub fn watch_valid(&self) -> watch::Receiver<bool> {
		self.valid_tx.subscribe()
	}

	pub fn can_id(&self) -> u16 {
		self.state.lock().unwrap().can_id
	}

	pub fn mode(&self) -> u8 {
		self.state.lock().unwrap().mode
	}

	pub fn rtr_disabled(&self) -> bool {
		self.state.lock().unwrap().rtr_disabled
	}

	pub fn inhibit_time_100us(&self) -> u16 {
		self.state.lock().unwrap().inhibit_time_100us
	}

	pub fn timer_ms(&self) -> u16 {
		self.state.lock().unwrap().timer_ms
	}

	pub fn start_sync(&self) -> u8 {
		self.state.lock().unwrap().start_sync
	}

	pub fn mapping(&self) -> Vec<PdoMapping> {
		let state = self.state.lock().unwrap();
		state.slots[..usize::from(state.nb_mapped)].iter().map(|&raw| PdoMapping::from_u32(raw)).collect()
	}

	fn recompute_valid(&self, state: &PdoState) {
		let valid = !state.disabled && state.can_id != 0 && state.nb_mapped > 0 && !id::is_restricted(state.can_id);
		self.cached_valid.store(valid, Ordering::Release);
		let _ = self.valid_tx.send(valid);
	}

	/// The [`Extension`] backing this PDO's 0x1400+/0x1800+ communication record.
	pub fn comm_extension(self: &Arc<Self>) -> Extension {
		let flags = vec![0; 7];
		Extension::new(CommHandler { common: self.clone() }, flags)
	}

	/// The [`Extension`] backing this PDO's 0x1600+/0x1A00+ mapping record.
	pub fn mapping_extension(self: &Arc<Self>) -> Extension {
		let flags = vec![0; MAX_MAPPED + 1];
		Extension::new(MappingHandler { common: self.clone() }, flags)
	}

	/// Force communication parameters and mapping directly, bypassing the usual
	/// disabled-while-editing and per-entry validation rules. Test-only: production
	/// configuration always goes through [`Self::comm_extension`]/[`Self::mapping_extension`].
	#[cfg(test)]
	pub(crate) fn configure_for_test(&self, mode: u8, mapping: &[PdoMapping]) {
		let mut state = self.state.lock().unwrap();
		state.disabled = false;
		state.mode = mode;
		for (slot, entry) in state.slots.iter_mut().zip(mapping) {
			*slot = entry.to_u32();
		}
		state.nb_mapped = mapping.len() as u8;
		self.recompute_valid(&state);
	}
}

struct CommHandler {
	common: Arc<PdoCommon>,
}

impl ExtensionHandler for CommHandler {
	fn read(&self, sub_index: u8, offset: usize, out: &mut [u8]) -> Result<(usize, StreamStatus), OdError> {
		let state = self.common.state.lock().unwrap();
		let bytes: Vec<u8> = match sub_index {
			0 => vec![if self.common.is_rpdo { 5 } else { 6 }],
			1 => encode_cob_id(&state, self.common.is_rpdo).to_le_bytes().to_vec(),
			2 => vec![state.mode],
			3 => state.inhibit_time_100us.to_le_bytes().to_vec(),
			4 => vec![0],
			5 => state.timer_ms.to_le_bytes().to_vec(),
			6 if !self.common.is_rpdo => vec![state.start_sync],
			_ => return Err(OdError::SubNotExist),
		};
		copy_from(&bytes, offset, out)
	}

	fn write(&self, sub_index: u8, _offset: usize, data: &[u8]) -> Result<StreamStatus, OdError> {
		let mut state = self.common.state.lock().unwrap();
		match sub_index {
			1 => {
				let raw = u32::from_le_bytes(data.try_into().map_err(|_| OdError::TypeMismatch)?);
				state.disabled = raw & (1 << 31) != 0;
				if !self.common.is_rpdo {
					state.rtr_disabled = raw & (1 << 30) != 0;
				}
				state.can_id = (raw & 0x7FF) as u16;
			}
			2 => state.mode = *data.first().ok_or(OdError::DataTooShort)?,
			3 => state.inhibit_time_100us = u16::from_le_bytes(data.try_into().map_err(|_| OdError::TypeMismatch)?),
			5 => state.timer_ms = u16::from_le_bytes(data.try_into().map_err(|_| OdError::TypeMismatch)?),
			6 if !self.common.is_rpdo => state.start_sync = *data.first().ok_or(OdError::DataTooShort)?,
			0 | 4 => return Err(OdError::ReadOnly),
			_ => return Err(OdError::SubNotExist),
		}
		self.common.recompute_valid(&state);
		Ok(StreamStatus::Done)
	}
}

/// Build the wire `u32` for comm sub-index 1: bit 31 disabled, bit 30 RTR-disallowed
/// (TPDO only), bit 29 reserved for extended CAN-IDs (never set; this engine only runs
/// PDOs on standard 11-bit identifiers once activated).
fn encode_cob_id(state: &PdoState, is_rpdo: bool) -> u32 {
	let mut raw = u32::from(state.can_id);
	if state.disabled {
		raw |= 1 << 31;
	}
	if !is_rpdo && state.rtr_disabled {
		raw |= 1 << 30;
	}
	raw
}

struct MappingHandler {
	common: Arc<PdoCommon>,
}

impl ExtensionHandler for MappingHandler {
	fn read(&self, sub_index: u8, offset: usize, out: &mut [u8]) -> Result<(usize, StreamStatus), OdError> {
		let state = self.common.state.lock().unwrap();
		let bytes = if sub_index == 0 {
			vec![state.nb_mapped]
		} else if usize::from(sub_index) <= MAX_MAPPED {
			state.slots[usize::from(sub_index) - 1].to_le_bytes().to_vec()
		} else {
			return Err(OdError::SubNotExist);
		};
		copy_from(&bytes, offset, out)
	}

	fn write(&self, sub_index: u8, _offset: usize, data: &[u8]) -> Result<StreamStatus, OdError> {
		let mut state = self.common.state.lock().unwrap();
		if !state.disabled {
			return Err(MappingError::PdoValid.into());
		}

		if sub_index == 0 {
			let count = *data.first().ok_or(OdError::DataTooShort)?;
			if count as usize > MAX_MAPPED {
				return Err(OdError::MapLen);
			}
			let mapping: Vec<PdoMapping> = state.slots[..count as usize].iter().map(|&raw| PdoMapping::from_u32(raw)).collect();
			super::mapping::validate_all(&self.common.dictionary, self.common.is_rpdo, &mapping)?;
			state.nb_mapped = count;
		} else if usize::from(sub_index) <= MAX_MAPPED {
			if state.nb_mapped != 0 {
				return Err(MappingError::MappingCountNotZero.into());
			}
			let raw = u32::from_le_bytes(data.try_into().map_err(|_| OdError::TypeMismatch)?);
			super::mapping::validate_one(&self.common.dictionary, self.common.is_rpdo, PdoMapping::from_u32(raw))?;
			state.slots[usize::from(sub_index) - 1] = raw;
		} else {
			return Err(OdError::SubNotExist);
		}
		self.common.recompute_valid(&state);
		Ok(StreamStatus::Done)
	}
}

fn copy_from(bytes: &[u8], offset: usize, out: &mut [u8]) -> Result<(usize, StreamStatus), OdError> {
	if offset >= bytes.len() {
		return Ok((0, StreamStatus::Done));
	}
	let remaining = &bytes[offset..];
	let n = remaining.len().min(out.len());
	out[..n].copy_from_slice(&remaining[..n]);
	Ok((n, StreamStatus::Done))
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::dictionary::{AccessType, DataType, Entry, Object, Variable};
	use assert2::assert;

	fn dict_with_mappable_u16() -> ObjectDictionary {
		let mut dict = ObjectDictionary::empty(0x10);
		let mut var = Variable::new(0x6401, 1, "input", DataType::Unsigned16, AccessType::READ_ONLY, vec![0; 2]);
		var.tpdo_mappable = true;
		var.rpdo_mappable = true;
		dict.insert(Entry::new(0x6401, "input", Object::Variable(var)));
		dict
	}

	#[test]
	fn mapping_rejected_while_pdo_is_valid() {
		let common = PdoCommon::new(Arc::new(dict_with_mappable_u16()), true, 0x200);
		common.state.lock().unwrap().disabled = false;
		let handler = MappingHandler { common: common.clone() };
		let mapping = PdoMapping { object: crate::ObjectIndex::new(0x6401, 1), bit_length: 16 };
		assert!(let Err(_) = handler.write(1, 0, &mapping.to_u32().to_le_bytes()));
	}

	#[test]
	fn mapping_count_locks_further_slot_writes() {
		let common = PdoCommon::new(Arc::new(dict_with_mappable_u16()), true, 0x200);
		let handler = MappingHandler { common: common.clone() };
		let mapping = PdoMapping { object: crate::ObjectIndex::new(0x6401, 1), bit_length: 16 };
		handler.write(1, 0, &mapping.to_u32().to_le_bytes()).unwrap();
		handler.write(0, 0, &[1]).unwrap();
		assert!(common.mapping() == vec![mapping]);
		assert!(let Err(_) = handler.write(2, 0, &mapping.to_u32().to_le_bytes()));
	}

	#[test]
	fn activating_pdo_flips_valid_and_notifies_watchers() {
		let common = PdoCommon::new(Arc::new(dict_with_mappable_u16()), true, 0x200);
		let mut watcher = common.watch_valid();
		let mapping_handler = MappingHandler { common: common.clone() };
		let mapping = PdoMapping { object: crate::ObjectIndex::new(0x6401, 1), bit_length: 16 };
		mapping_handler.write(1, 0, &mapping.to_u32().to_le_bytes()).unwrap();
		mapping_handler.write(0, 0, &[1]).unwrap();
		assert!(!common.is_valid());

		let comm_handler = CommHandler { common: common.clone() };
		comm_handler.write(1, 0, &0x200u32.to_le_bytes()).unwrap();
		assert!(common.is_valid());
		assert!(*watcher.borrow_and_update());
	}
}
