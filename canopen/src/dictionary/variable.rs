//! A single addressable (index, sub-index) OD entry.

use tokio::sync::RwLock;

use super::{AccessType, DataType, OdError, Value};

/// One scalar or string OD value, living inside a VAR/DOMAIN entry or as one slot of an
/// ARRAY/RECORD.
///
/// Every variable owns its data behind a dedicated lock; readers/writers (including SDO
/// streamers) take the lock only for the duration of a single chunked copy, never across
/// a network suspension point.
pub struct Variable {
	pub index: u16,
	pub sub_index: u8,
	pub name: String,
	pub data_type: DataType,
	pub access: AccessType,
	pub tpdo_mappable: bool,
	pub rpdo_mappable: bool,
	pub low: Option<Value>,
	pub high: Option<Value>,
	default: Vec<u8>,
	data: RwLock<Vec<u8>>,
}

impl Variable {
	pub fn new(index: u16, sub_index: u8, name: impl Into<String>, data_type: DataType, access: AccessType, default: Vec<u8>) -> Self {
		Self {
			index,
			sub_index,
			name: name.into(),
			data_type,
			access,
			tpdo_mappable: false,
			rpdo_mappable: false,
			low: None,
			high: None,
			data: RwLock::new(default.clone()),
			default,
		}
	}

	/// The static wire size for this variable's data type, or its current length for
	/// variable-length types (strings, domains).
	pub async fn len(&self) -> usize {
		match self.data_type.fixed_size() {
			Some(size) => size,
			None => self.data.read().await.len(),
		}
	}

	/// Copy the current bytes into `out`, starting at `offset`. Returns the number of
	/// bytes written; short writes mean `out` was shorter than the remaining data.
	pub async fn read_at(&self, offset: usize, out: &mut [u8]) -> usize {
		let data = self.data.read().await;
		if offset >= data.len() {
			return 0;
		}
		let remaining = &data[offset..];
		let n = remaining.len().min(out.len());
		out[..n].copy_from_slice(&remaining[..n]);
		n
	}

	/// Get the full current value as owned bytes.
	pub async fn get_bytes(&self) -> Vec<u8> {
		self.data.read().await.clone()
	}

    /// Decode the current value as a typed [`Value`].
	pub async fn get_value(&self) -> Result<Value, OdError> {
		let data = self.data.read().await;
		Value::from_bytes(self.data_type, &data).map_err(|_| OdError::TypeMismatch)
	}

	/// Overwrite the whole value, checking fixed-size types against the declared length
	/// and scalar limits against `low`/`high` when present.
	pub async fn set_bytes(&self, new_data: &[u8]) -> Result<(), OdError> {
		if !self.access.is_writable() {
			return Err(OdError::ReadOnly);
		}
		if let Some(size) = self.data_type.fixed_size() {
			if new_data.len() > size {
				return Err(OdError::DataTooLong);
			}
			if new_data.len() < size {
				return Err(OdError::DataTooShort);
			}
		}
		self.check_limits(new_data)?;
		*self.data.write().await = new_data.to_vec();
		Ok(())
	}

	/// Write a chunk at `offset`, growing the buffer for variable-length types. Used by
	/// segmented/block SDO downloads.
	pub async fn write_at(&self, offset: usize, chunk: &[u8]) -> Result<(), OdError> {
		if !self.access.is_writable() {
			return Err(OdError::ReadOnly);
		}
		let mut data = self.data.write().await;
		let end = offset + chunk.len();
		if let Some(size) = self.data_type.fixed_size() {
			if end > size {
				return Err(OdError::DataTooLong);
			}
		}
		if data.len() < end {
			data.resize(end, 0);
		}
		data[offset..end].copy_from_slice(chunk);
		Ok(())
	}

	/// Reset to the EDS-declared default value.
	pub async fn reset_to_default(&self) {
		*self.data.write().await = self.default.clone();
	}

	fn check_limits(&self, new_data: &[u8]) -> Result<(), OdError> {
		let Ok(value) = Value::from_bytes(self.data_type, new_data) else {
			return Ok(()); // non-scalar types carry no numeric limits
		};
		if let Some(low) = &self.low {
			if let (Some(value), Some(low)) = (value.as_u64(), low.as_u64()) {
				if value < low {
					return Err(OdError::ValueLow);
				}
			}
		}
		if let Some(high) = &self.high {
			if let (Some(value), Some(high)) = (value.as_u64(), high.as_u64()) {
				if value > high {
					return Err(OdError::ValueHigh);
				}
			}
		}
		Ok(())
	}
}

impl Clone for Variable {
	fn clone(&self) -> Self {
		Self {
			index: self.index,
			sub_index: self.sub_index,
			name: self.name.clone(),
			data_type: self.data_type,
			access: self.access,
			tpdo_mappable: self.tpdo_mappable,
			rpdo_mappable: self.rpdo_mappable,
			low: self.low.clone(),
			high: self.high.clone(),
			default: self.default.clone(),
			data: RwLock::new(self.default.clone()),
		}
	}
}

impl std::fmt::Debug for Variable {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Variable")
			.field("index", &format_args!("{:#06X}", self.index))
			.field("sub_index", &self.sub_index)
			.field("name", &self.name)
			.field("data_type", &self.data_type)
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::assert;

	#[tokio::test]
	async fn rejects_write_to_read_only() {
		let var = Variable::new(0x1000, 0, "device type", DataType::Unsigned32, AccessType::READ_ONLY, vec![0; 4]);
		assert!(let Err(OdError::ReadOnly) = var.set_bytes(&[1, 2, 3, 4]).await);
	}

	#[tokio::test]
	async fn enforces_declared_limits() {
		let mut var = Variable::new(0x2000, 0, "limited", DataType::Unsigned8, AccessType::READ_WRITE, vec![0]);
		var.low = Some(Value::U8(10));
		var.high = Some(Value::U8(20));
		assert!(let Err(OdError::ValueLow) = var.set_bytes(&[5]).await);
		assert!(let Err(OdError::ValueHigh) = var.set_bytes(&[25]).await);
		assert!(let Ok(()) = var.set_bytes(&[15]).await);
	}

	#[tokio::test]
	async fn chunked_write_grows_variable_length_buffer() {
		let var = Variable::new(0x1008, 0, "device name", DataType::VisibleString, AccessType::READ_WRITE, Vec::new());
		var.write_at(0, b"canopen").await.unwrap();
		assert!(var.get_bytes().await == b"canopen");
	}
}
