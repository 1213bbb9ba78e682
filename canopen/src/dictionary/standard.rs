//! Minimum set of CiA 301 standard entries the core relies on if the loaded EDS omits them.

use super::{AccessType, Array, DataType, Entry, Object, ObjectDictionary, Record, Variable};

/// Insert any of the minimum standard entries listed that the loaded EDS did not already
/// define, with CiA 301 default contents. Real device EDS files normally define all of
/// these explicitly; this only fills gaps so the core services always find their control
/// registers.
pub fn ensure_minimum_entries(dict: &mut ObjectDictionary) {
	let node_id = dict.node_id();

	ensure_var(dict, 0x1000, "Device type", DataType::Unsigned32, AccessType::READ_ONLY, 0u32.to_le_bytes().to_vec());
	ensure_var(dict, 0x1001, "Error register", DataType::Unsigned8, AccessType::READ_ONLY, vec![0]);
	ensure_error_history(dict);
	ensure_var(dict, 0x1005, "COB-ID SYNC", DataType::Unsigned32, AccessType::READ_WRITE, 0x80u32.to_le_bytes().to_vec());
	ensure_var(dict, 0x1006, "Communication cycle period", DataType::Unsigned32, AccessType::READ_WRITE, 0u32.to_le_bytes().to_vec());
	ensure_var(dict, 0x1007, "Synchronous window length", DataType::Unsigned32, AccessType::READ_WRITE, 0u32.to_le_bytes().to_vec());
	ensure_var(dict, 0x1014, "COB-ID EMCY", DataType::Unsigned32, AccessType::READ_WRITE, (0x80u32 | u32::from(node_id)).to_le_bytes().to_vec());
	ensure_var(dict, 0x1015, "Inhibit time EMCY", DataType::Unsigned16, AccessType::READ_WRITE, 0u16.to_le_bytes().to_vec());
	ensure_heartbeat_consumers(dict);
	ensure_var(dict, 0x1017, "Producer heartbeat time", DataType::Unsigned16, AccessType::READ_WRITE, 0u16.to_le_bytes().to_vec());
	ensure_identity(dict);
	ensure_var(dict, 0x1019, "Synchronous counter overflow value", DataType::Unsigned8, AccessType::READ_WRITE, vec![0]);
}

fn ensure_var(dict: &mut ObjectDictionary, index: u16, name: &str, data_type: DataType, access: AccessType, default: Vec<u8>) {
	if dict.entry(index).is_some() {
		return;
	}
	let var = Variable::new(index, 0, name, data_type, access, default);
	dict.insert(Entry::new(index, name, Object::Variable(var)));
}

fn ensure_error_history(dict: &mut ObjectDictionary) {
	if dict.entry(0x1003).is_some() {
		return;
	}
	let mut array = Array::new(0x1003, "Pre-defined error field");
	array.push(Variable::new(0x1003, 0, "Number of errors", DataType::Unsigned8, AccessType::READ_WRITE, vec![0]));
	for sub in 1..=8u8 {
		array.push(Variable::new(0x1003, sub, &format!("Standard error field {sub}"), DataType::Unsigned32, AccessType::READ_ONLY, vec![0; 4]));
	}
	dict.insert(Entry::new(0x1003, "Pre-defined error field", Object::Array(array)));
}

fn ensure_heartbeat_consumers(dict: &mut ObjectDictionary) {
	if dict.entry(0x1016).is_some() {
		return;
	}
	let mut array = Array::new(0x1016, "Consumer heartbeat time");
	array.push(Variable::new(0x1016, 0, "Number of entries", DataType::Unsigned8, AccessType::READ_WRITE, vec![0]));
	dict.insert(Entry::new(0x1016, "Consumer heartbeat time", Object::Array(array)));
}

fn ensure_identity(dict: &mut ObjectDictionary) {
	if dict.entry(0x1018).is_some() {
		return;
	}
	let mut record = Record::new(0x1018, "Identity object");
	record.push(Variable::new(0x1018, 0, "Number of entries", DataType::Unsigned8, AccessType::READ_ONLY, vec![4]));
	record.push(Variable::new(0x1018, 1, "Vendor ID", DataType::Unsigned32, AccessType::READ_ONLY, vec![0; 4]));
	record.push(Variable::new(0x1018, 2, "Product code", DataType::Unsigned32, AccessType::READ_ONLY, vec![0; 4]));
	record.push(Variable::new(0x1018, 3, "Revision number", DataType::Unsigned32, AccessType::READ_ONLY, vec![0; 4]));
	record.push(Variable::new(0x1018, 4, "Serial number", DataType::Unsigned32, AccessType::READ_ONLY, vec![0; 4]));
	dict.insert(Entry::new(0x1018, "Identity object", Object::Record(record)));
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::assert;

	#[test]
	fn fills_in_missing_minimum_entries() {
		let mut dict = ObjectDictionary::empty(0x10);
		ensure_minimum_entries(&mut dict);
		assert!(dict.entry(0x1000).is_some());
		assert!(dict.entry(0x1017).is_some());
		assert!(dict.entry(0x1018).is_some());
	}
}
