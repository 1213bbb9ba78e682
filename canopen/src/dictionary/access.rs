//! EDS `AccessType` (ro / wo / rw / const).

/// Access rights of a [`Variable`](super::Variable), as declared by the EDS `AccessType`
/// property.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct AccessType {
	read: bool,
	write: bool,
	/// `const` objects are readable but can never be written, even by local code.
	constant: bool,
}

impl AccessType {
	pub const NONE: Self = Self { read: false, write: false, constant: false };
	pub const READ_ONLY: Self = Self { read: true, write: false, constant: false };
	pub const WRITE_ONLY: Self = Self { read: false, write: true, constant: false };
	pub const READ_WRITE: Self = Self { read: true, write: true, constant: false };
	pub const CONST: Self = Self { read: true, write: false, constant: true };

	/// Parse an EDS `AccessType` value (`ro`, `wo`, `rw`, `rwr`, `rww`, `const`), defaulting
	/// to [`Self::READ_WRITE`] for anything unrecognized.
	pub fn parse(value: &str) -> Self {
		match value.to_ascii_lowercase().as_str() {
			"ro" => Self::READ_ONLY,
			"wo" => Self::WRITE_ONLY,
			"rw" | "rwr" | "rww" => Self::READ_WRITE,
			"const" => Self::CONST,
			_ => Self::READ_WRITE,
		}
	}

	pub fn is_readable(self) -> bool {
		self.read
	}

	pub fn is_writable(self) -> bool {
		self.write
	}

	pub fn is_const(self) -> bool {
		self.constant
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::assert;

	#[test]
	fn parses_eds_access_keywords() {
		assert!(AccessType::parse("ro") == AccessType::READ_ONLY);
		assert!(AccessType::parse("RW") == AccessType::READ_WRITE);
		assert!(AccessType::parse("const").is_const());
		assert!(!AccessType::parse("const").is_writable());
	}
}
