//! EDS/DCF text loader: the external INI-like format feeding [`ObjectDictionary::load`].

use std::collections::HashMap;

use ini_core as ini;

use super::{AccessType, Array, DataType, Entry, LoadError, Object, ObjectDictionary, Record, Value, Variable};

const OBJECT_TYPE_VARIABLE: u32 = 7;
const OBJECT_TYPE_ARRAY: u32 = 8;
const OBJECT_TYPE_RECORD: u32 = 9;

type Properties = HashMap<String, String>;

/// Parse an EDS/DCF document into an [`ObjectDictionary`] for `node_id`.
///
/// Recognizes `[IIII]` top-level sections and `[IIIIsubSS]` sub-entry sections. `$NODEID`
/// placeholders inside `DefaultValue`/`ParameterValue` are substituted with `node_id`
/// before the value is parsed.
pub fn parse(node_id: u8, content: &str) -> Result<ObjectDictionary, LoadError> {
	let mut dict = ObjectDictionary::empty(node_id);

	let mut section_name: Option<String> = None;
	let mut properties: Properties = HashMap::new();

	for item in ini::Parser::new(content) {
		match item {
			ini::Item::Section(name) => {
				if let Some(name) = section_name.take() {
					process_section(&mut dict, &name, &properties)?;
					properties.clear();
				}
				section_name = Some(name.to_owned());
			}
			ini::Item::Property(key, value) => {
				properties.insert(key.to_owned(), value.unwrap_or_default().to_owned());
			}
			_ => {}
		}
	}
	if let Some(name) = section_name {
		process_section(&mut dict, &name, &properties)?;
	}

	Ok(dict)
}

fn process_section(dict: &mut ObjectDictionary, section: &str, properties: &Properties) -> Result<(), LoadError> {
	if let Some(index) = parse_top_level_index(section) {
		add_top_level_entry(dict, index, section, properties)
	} else if let Some((index, sub_index)) = parse_sub_index(section) {
		add_sub_entry(dict, index, sub_index, section, properties)
	} else {
		Ok(()) // [DeviceInfo], [Comments], NrOfRxPDO and similar bookkeeping sections
	}
}

fn parse_top_level_index(section: &str) -> Option<u16> {
	(section.len() == 4 && section.bytes().all(|b| b.is_ascii_hexdigit())).then(|| u16::from_str_radix(section, 16).ok())?
}

fn parse_sub_index(section: &str) -> Option<(u16, u8)> {
	if section.len() <= 7 || !section[4..7].eq_ignore_ascii_case("sub") {
		return None;
	}
	let index = u16::from_str_radix(&section[0..4], 16).ok()?;
	let sub_index = u8::from_str_radix(&section[7..], 16).or_else(|_| section[7..].parse()).ok()?;
	Some((index, sub_index))
}

fn add_top_level_entry(dict: &mut ObjectDictionary, index: u16, section: &str, properties: &Properties) -> Result<(), LoadError> {
	let name = properties.get("ParameterName").ok_or_else(|| format!("{section}: missing ParameterName"))?;
	let object_type = properties.get("ObjectType").map(|v| parse_hex_or_dec::<u32>(v)).unwrap_or(OBJECT_TYPE_VARIABLE);

	let object = match object_type {
		OBJECT_TYPE_VARIABLE => Object::Variable(build_variable(dict.node_id, index, 0, name, properties)?),
		OBJECT_TYPE_ARRAY => Object::Array(Array::new(index, name.clone())),
		OBJECT_TYPE_RECORD => Object::Record(Record::new(index, name.clone())),
		other => return Err(format!("{section}: unsupported ObjectType {other}").into()),
	};

	dict.insert(Entry::new(index, name.clone(), object));
	Ok(())
}

fn add_sub_entry(dict: &mut ObjectDictionary, index: u16, sub_index: u8, section: &str, properties: &Properties) -> Result<(), LoadError> {
	let name = properties.get("ParameterName").ok_or_else(|| format!("{section}: missing ParameterName"))?;
	let var = build_variable(dict.node_id, index, sub_index, name, properties)?;

	let entry = dict.entry_mut(index).ok_or_else(|| format!("{section}: no top-level entry for sub-index"))?;
	match &mut entry.object {
		Object::Array(array) => array.push(var),
		Object::Record(record) => record.push(var),
		Object::Variable(_) => return Err(format!("{section}: sub-entry under a VAR object").into()),
	}
	Ok(())
}

fn build_variable(node_id: u8, index: u16, sub_index: u8, name: &str, properties: &Properties) -> Result<Variable, LoadError> {
	let data_type = properties
		.get("DataType")
		.map(|v| DataType::from_u32(parse_hex_or_dec(v)))
		.unwrap_or(DataType::Unsigned32);
	let access = properties.get("AccessType").map(|v| AccessType::parse(v)).unwrap_or(AccessType::READ_WRITE);
	let pdo_mappable = properties.get("PDOMapping").map(|v| v.trim() == "1").unwrap_or(false);

	let default = match properties.get("DefaultValue").filter(|v| !v.is_empty()) {
		Some(raw) => value_bytes(node_id, data_type, raw)?,
		None => data_type.as_default_bytes(),
	};

	let mut var = Variable::new(index, sub_index, name, data_type, access, default);
	var.tpdo_mappable = pdo_mappable;
	var.rpdo_mappable = pdo_mappable;
	if let Some(raw) = properties.get("LowLimit").filter(|v| !v.is_empty()) {
		var.low = Value::from_str(data_type, &substitute_node_id(node_id, raw)).ok();
	}
	if let Some(raw) = properties.get("HighLimit").filter(|v| !v.is_empty()) {
		var.high = Value::from_str(data_type, &substitute_node_id(node_id, raw)).ok();
	}
	Ok(var)
}

fn value_bytes(node_id: u8, data_type: DataType, raw: &str) -> Result<Vec<u8>, LoadError> {
	let substituted = substitute_node_id(node_id, raw);
	Value::from_str(data_type, &substituted)
		.map(|v| v.to_bytes())
		.map_err(|_| format!("invalid default value {raw:?} for {data_type:?}").into())
}

/// Replace `$NODEID` with the node id and evaluate a trailing/leading `+` sum, per the
/// EDS convention `$NODEID+0x200` / `0x200+$NODEID`.
fn substitute_node_id(node_id: u8, expression: &str) -> String {
	if !expression.contains("$NODEID") {
		return expression.to_owned();
	}
	let replaced = expression.replace("$NODEID", &node_id.to_string());
	let sum: i64 = replaced
		.split('+')
		.map(str::trim)
		.filter_map(|part| {
			if let Some(hex) = part.strip_prefix("0x").or_else(|| part.strip_prefix("0X")) {
				i64::from_str_radix(hex, 16).ok()
			} else {
				part.parse().ok()
			}
		})
		.sum();
	sum.to_string()
}

fn parse_hex_or_dec<T: TryFrom<u64>>(text: &str) -> T
where
	T: Default,
{
	let text = text.trim();
	let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
		u64::from_str_radix(hex, 16).ok()
	} else {
		text.parse().ok()
	};
	parsed.and_then(|v| T::try_from(v).ok()).unwrap_or_default()
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::{assert, let_assert};

	#[test]
	fn parses_minimal_eds() {
		let content = "\
[1000]
ParameterName=Device type
ObjectType=0x7
DataType=0x0007
AccessType=ro
DefaultValue=0x00000000

[2005]
ParameterName=Demo value
ObjectType=0x7
DataType=0x0005
AccessType=rw
DefaultValue=0x42
";
		let_assert!(Ok(dict) = parse(0x30, content));
		assert!(dict.entry(0x1000).is_some());
		let entry = dict.entry(0x2005).unwrap();
		assert!(entry.sub(0).unwrap().data_type == DataType::Unsigned8);
	}

	#[test]
	fn substitutes_nodeid_in_default_value() {
		assert!(substitute_node_id(0x30, "$NODEID+0x200") == "560");
		assert!(substitute_node_id(0x30, "0x200+$NODEID") == "560");
	}
}
