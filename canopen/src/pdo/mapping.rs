//! Mapping-entry validation against the object dictionary.
//!
//! Mirrors CiA 301's requirement that a PDO's mapped entries add up to at most 8 bytes and
//! that every mapped sub-index actually declares itself mappable for this PDO direction.
//! Like most implementations that don't target CAN-FD, bit-level sub-byte packing isn't
//! supported: every mapping entry's length must be a whole number of bytes.

use crate::dictionary::ObjectDictionary;

use super::{MappingError, PdoMapping};

pub(super) fn validate_one(dictionary: &ObjectDictionary, is_rpdo: bool, mapping: PdoMapping) -> Result<(), MappingError> {
	if mapping.bit_length == 0 || mapping.bit_length % 8 != 0 {
		return Err(MappingError::NotMappable);
	}
	if mapping.is_dummy() {
		return Ok(());
	}

	let entry = dictionary.entry(mapping.object.index).ok_or(crate::dictionary::OdError::IndexNotExist)?;
	let var = entry.sub(mapping.object.subindex).ok_or(crate::dictionary::OdError::SubNotExist)?;

	let mappable = if let Some(extension) = &entry.extension {
		if is_rpdo { extension.rpdo_mappable(mapping.object.subindex) } else { extension.tpdo_mappable(mapping.object.subindex) }
	} else if is_rpdo {
		var.rpdo_mappable
	} else {
		var.tpdo_mappable
	};
	if !mappable {
		return Err(MappingError::NotMappable);
	}

	let Some(size) = var.data_type.fixed_size() else {
		return Err(MappingError::NotMappable);
	};
	if usize::from(mapping.bit_length / 8) > size {
		return Err(MappingError::TooLong);
	}
	Ok(())
}

pub(super) fn validate_all(dictionary: &ObjectDictionary, is_rpdo: bool, mapping: &[PdoMapping]) -> Result<(), MappingError> {
	let mut total_bits = 0u32;
	for &entry in mapping {
		validate_one(dictionary, is_rpdo, entry)?;
		total_bits += u32::from(entry.bit_length);
	}
	if total_bits > 64 {
		return Err(MappingError::TooLong);
	}
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::dictionary::{AccessType, DataType, Entry, Object, Variable};
	use crate::ObjectIndex;
	use assert2::assert;

	fn sample_dict() -> ObjectDictionary {
		let mut dict = ObjectDictionary::empty(0x10);
		let mut mappable = Variable::new(0x6401, 1, "input", DataType::Unsigned32, AccessType::READ_ONLY, vec![0; 4]);
		mappable.tpdo_mappable = true;
		dict.insert(Entry::new(0x6401, "input", Object::Variable(mappable)));
		let not_mappable = Variable::new(0x1008, 0, "device name", DataType::VisibleString, AccessType::READ_ONLY, Vec::new());
		dict.insert(Entry::new(0x1008, "device name", Object::Variable(not_mappable)));
		dict
	}

	#[test]
	fn accepts_whole_byte_mappable_entry() {
		let dict = sample_dict();
		let mapping = PdoMapping { object: ObjectIndex::new(0x6401, 1), bit_length: 32 };
		assert!(let Ok(()) = validate_one(&dict, false, mapping));
	}

	#[test]
	fn rejects_sub_byte_length() {
		let dict = sample_dict();
		let mapping = PdoMapping { object: ObjectIndex::new(0x6401, 1), bit_length: 4 };
		assert!(let Err(MappingError::NotMappable) = validate_one(&dict, false, mapping));
	}

	#[test]
	fn rejects_entry_not_flagged_mappable() {
		let dict = sample_dict();
		let mapping = PdoMapping { object: ObjectIndex::new(0x6401, 1), bit_length: 32 };
		assert!(let Err(MappingError::NotMappable) = validate_one(&dict, true, mapping));
	}

	#[test]
	fn rejects_variable_length_type() {
		let dict = sample_dict();
		let mapping = PdoMapping { object: ObjectIndex::new(0x1008, 0), bit_length: 8 };
		assert!(let Err(MappingError::NotMappable) = validate_one(&dict, false, mapping));
	}

	#[test]
	fn dummy_entry_skips_dictionary_lookup() {
		let dict = sample_dict();
		let mapping = PdoMapping { object: ObjectIndex::new(0x0002, 0), bit_length: 8 };
		assert!(let Ok(()) = validate_one(&dict, true, mapping));
	}

	#[test]
	fn rejects_total_length_over_eight_bytes() {
		let dict = sample_dict();
		let mapping = vec![
			PdoMapping { object: ObjectIndex::new(0x6401, 1), bit_length: 32 },
			PdoMapping { object: ObjectIndex::new(0x6401, 1), bit_length: 32 },
			PdoMapping { object: ObjectIndex::new(0x6401, 1), bit_length: 8 },
		];
		assert!(let Err(MappingError::TooLong) = validate_all(&dict, false, &mapping));
	}
}
