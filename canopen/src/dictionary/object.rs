//! Array and Record container objects, and the top-level Entry/Object split.

use std::collections::HashMap;

use super::{Extension, Variable};

/// A dense ARRAY object: sub-index 0 holds the highest populated sub-index count, and
/// sub-indices `1..=n` are homogeneous [`Variable`]s.
#[derive(Debug)]
pub struct Array {
	pub name: String,
	pub index: u16,
	subs: HashMap<u8, Variable>,
	names: HashMap<String, u8>,
}

/// A sparse RECORD object: sub-indices are individually named and typed.
#[derive(Debug)]
pub struct Record {
	pub name: String,
	pub index: u16,
	subs: HashMap<u8, Variable>,
	names: HashMap<String, u8>,
}

macro_rules! impl_container {
	($ty:ident) => {
		impl $ty {
			pub fn new(index: u16, name: impl Into<String>) -> Self {
				Self { name: name.into(), index, subs: HashMap::new(), names: HashMap::new() }
			}

			pub fn push(&mut self, var: Variable) {
				self.names.insert(var.name.clone(), var.sub_index);
				self.subs.insert(var.sub_index, var);
			}

			pub fn get(&self, sub_index: u8) -> Option<&Variable> {
				self.subs.get(&sub_index)
			}

			pub fn get_mut(&mut self, sub_index: u8) -> Option<&mut Variable> {
				self.subs.get_mut(&sub_index)
			}

			pub fn get_by_name(&self, name: &str) -> Option<&Variable> {
				self.subs.get(self.names.get(name)?)
			}

			pub fn highest_sub_index(&self) -> u8 {
				self.subs.keys().copied().max().unwrap_or(0)
			}

			pub fn sub_indices(&self) -> impl Iterator<Item = u8> + '_ {
				self.subs.keys().copied()
			}
		}
	};
}

impl_container!(Array);
impl_container!(Record);

/// The contents of one OD [`Entry`].
#[derive(Debug)]
pub enum Object {
	/// A single VAR or DOMAIN entry.
	Variable(Variable),
	Array(Array),
	Record(Record),
}

impl Object {
	pub fn get(&self, sub_index: u8) -> Option<&Variable> {
		match self {
			Self::Variable(var) => (sub_index == 0).then_some(var),
			Self::Array(array) => array.get(sub_index),
			Self::Record(record) => record.get(sub_index),
		}
	}

	pub fn get_mut(&mut self, sub_index: u8) -> Option<&mut Variable> {
		match self {
			Self::Variable(var) => (sub_index == 0).then_some(var),
			Self::Array(array) => array.get_mut(sub_index),
			Self::Record(record) => record.get_mut(sub_index),
		}
	}
}

/// One index in the object dictionary: its contents plus an optional extension that
/// intercepts reads/writes instead of the default byte-buffer access.
pub struct Entry {
	pub index: u16,
	pub name: String,
	pub object: Object,
	pub extension: Option<Extension>,
}

impl Entry {
	pub fn new(index: u16, name: impl Into<String>, object: Object) -> Self {
		Self { index, name: name.into(), object, extension: None }
	}

	pub fn sub(&self, sub_index: u8) -> Option<&Variable> {
		self.object.get(sub_index)
	}

	pub fn sub_mut(&mut self, sub_index: u8) -> Option<&mut Variable> {
		self.object.get_mut(sub_index)
	}
}

impl std::fmt::Debug for Entry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Entry")
			.field("index", &format_args!("{:#06X}", self.index))
			.field("name", &self.name)
			.field("has_extension", &self.extension.is_some())
			.finish()
	}
}
