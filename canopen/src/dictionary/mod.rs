//! The Object Dictionary: the typed, hierarchical, mappable data store every service
//! reads or mutates, plus its EDS loader and streaming I/O abstraction.

mod access;
mod data_type;
mod eds;
mod error;
mod extension;
mod object;
mod standard;
mod streamer;
mod value;
mod variable;

pub use access::AccessType;
pub use data_type::DataType;
pub use error::{LoadError, OdError};
pub use extension::{Extension, ExtensionHandler, StreamStatus};
pub use object::{Array, Entry, Object, Record};
pub use streamer::Streamer;
pub use value::{Value, ValueTypeMismatch};
pub use variable::Variable;

use std::collections::HashMap;

/// The node-scoped Object Dictionary: every index this node exposes, keyed by index and,
/// redundantly, by name for EDS-driven tooling.
pub struct ObjectDictionary {
	node_id: u8,
	entries: HashMap<u16, Entry>,
	names: HashMap<String, u16>,
}

impl ObjectDictionary {
	/// Create an empty dictionary for `node_id`, with no entries.
	pub fn empty(node_id: u8) -> Self {
		Self { node_id, entries: HashMap::new(), names: HashMap::new() }
	}

	/// Parse an EDS/DCF document into a dictionary for `node_id`. `$NODEID` placeholders
	/// in default values are substituted at parse time.
	pub fn load(node_id: u8, content: &str) -> Result<Self, LoadError> {
		let mut dict = eds::parse(node_id, content)?;
		standard::ensure_minimum_entries(&mut dict);
		Ok(dict)
	}

	pub fn node_id(&self) -> u8 {
		self.node_id
	}

	pub fn insert(&mut self, entry: Entry) {
		self.names.insert(entry.name.clone(), entry.index);
		self.entries.insert(entry.index, entry);
	}

	pub fn entry(&self, index: u16) -> Option<&Entry> {
		self.entries.get(&index)
	}

	pub fn entry_mut(&mut self, index: u16) -> Option<&mut Entry> {
		self.entries.get_mut(&index)
	}

	pub fn entry_by_name(&self, name: &str) -> Option<&Entry> {
		self.entries.get(self.names.get(name)?)
	}

	/// Look up a single variable by (index, sub-index).
	pub fn sub(&self, index: u16, sub_index: u8) -> Option<&Variable> {
		self.entry(index)?.sub(sub_index)
	}

	pub fn sub_mut(&mut self, index: u16, sub_index: u8) -> Option<&mut Variable> {
		self.entry_mut(index)?.sub_mut(sub_index)
	}

	/// Attach an extension to `index`; control registers and streaming DOMAIN entries are
	/// added this way after the dictionary loads.
	pub fn add_extension(&mut self, index: u16, extension: Extension) -> Result<(), OdError> {
		self.entry_mut(index).ok_or(OdError::IndexNotExist)?.extension = Some(extension);
		Ok(())
	}

	/// Typed read of (index, sub-index): goes through the entry's extension if present,
	/// otherwise reads the variable's current bytes directly.
	pub async fn read_value(&self, index: u16, sub_index: u8) -> Result<Value, OdError> {
		let entry = self.entry(index).ok_or(OdError::IndexNotExist)?;
		let var = entry.sub(sub_index).ok_or(OdError::SubNotExist)?;
		if !var.access.is_readable() {
			return Err(OdError::WriteOnly);
		}
		if let Some(extension) = &entry.extension {
			let mut buf = vec![0u8; var.len().await.max(8)];
			let (n, _status) = extension.read(sub_index, 0, &mut buf)?;
			buf.truncate(n);
			return Value::from_bytes(var.data_type, &buf).map_err(|_| OdError::TypeMismatch);
		}
		var.get_value().await
	}

	/// Raw read of (index, sub-index): like [`Self::read_value`] but returns the wire bytes
	/// directly instead of decoding them, for callers (PDO mapping) that only move bytes
	/// around without caring about the underlying type.
	pub async fn read_bytes(&self, index: u16, sub_index: u8) -> Result<Vec<u8>, OdError> {
		let entry = self.entry(index).ok_or(OdError::IndexNotExist)?;
		let var = entry.sub(sub_index).ok_or(OdError::SubNotExist)?;
		if !var.access.is_readable() {
			return Err(OdError::WriteOnly);
		}
		if let Some(extension) = &entry.extension {
			let mut buf = vec![0u8; var.len().await.max(8)];
			let (n, _status) = extension.read(sub_index, 0, &mut buf)?;
			buf.truncate(n);
			return Ok(buf);
		}
		Ok(var.get_bytes().await)
	}

	/// Typed write of (index, sub-index): goes through the entry's extension if present,
	/// otherwise writes the variable's bytes directly (enforcing access rights and limits).
	pub async fn write_bytes(&self, index: u16, sub_index: u8, data: &[u8]) -> Result<(), OdError> {
		let entry = self.entry(index).ok_or(OdError::IndexNotExist)?;
		let var = entry.sub(sub_index).ok_or(OdError::SubNotExist)?;
		if var.access.is_const() {
			return Err(OdError::ReadOnly);
		}
		if let Some(extension) = &entry.extension {
			extension.write(sub_index, 0, data)?;
			return Ok(());
		}
		var.set_bytes(data).await
	}
}

impl std::fmt::Debug for ObjectDictionary {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ObjectDictionary").field("node_id", &self.node_id).field("entries", &self.entries.len()).finish()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::{assert, let_assert};

	fn sample_dict() -> ObjectDictionary {
		let content = "\
[1000]
ParameterName=Device type
ObjectType=0x7
DataType=0x0007
AccessType=ro
DefaultValue=0x00000000

[2003]
ParameterName=Demo u16
ObjectType=0x7
DataType=0x0006
AccessType=rw
DefaultValue=0x1111
";
		ObjectDictionary::load(0x30, content).unwrap()
	}

	#[tokio::test]
	async fn reads_default_value() {
		let dict = sample_dict();
		let_assert!(Ok(Value::U16(v)) = dict.read_value(0x2003, 0).await);
		assert!(v == 0x1111);
	}

	#[tokio::test]
	async fn write_then_read_round_trips() {
		let dict = sample_dict();
		dict.write_bytes(0x2003, 0, &0x2222u16.to_le_bytes()).await.unwrap();
		let_assert!(Ok(Value::U16(v)) = dict.read_value(0x2003, 0).await);
		assert!(v == 0x2222);
	}

	#[tokio::test]
	async fn rejects_write_to_readonly_device_type() {
		let dict = sample_dict();
		let_assert!(Err(OdError::ReadOnly) = dict.write_bytes(0x1000, 0, &[1, 2, 3, 4]).await);
	}
}
