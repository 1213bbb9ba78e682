use crate::CanId;

/// A kernel-level receive filter for a [`crate::CanSocket`].
///
/// By default a socket receives every frame on the interface it is bound to.
/// Installing one or more filters with [`crate::CanSocket::set_filters()`] restricts
/// reception to frames matching at least one of the filters.
#[repr(transparent)]
#[derive(Copy, Clone)]
pub struct CanFilter {
	filter: crate::sys::CanFilter,
}

impl CanFilter {
	/// Create a new pass-all filter for the given ID.
	///
	/// The mask is zero until restricted with [`Self::match_id_mask()`] or [`Self::match_exact_id()`].
	pub const fn new(id: CanId) -> Self {
		Self {
			filter: crate::sys::CanFilter::new(id),
		}
	}

	/// Restrict the filter to `frame.id & mask == filter.id & mask`.
	///
	/// Only the low 29 bits of the mask are used.
	#[must_use = "returns a new filter, does not modify the existing filter"]
	pub const fn match_id_mask(mut self, mask: u32) -> Self {
		self.filter = self.filter.match_id_mask(mask);
		self
	}

	/// Restrict the filter to an exact ID match, including standard/extended kind.
	#[must_use = "returns a new filter, does not modify the existing filter"]
	pub const fn match_exact_id(mut self) -> Self {
		self.filter = self.filter.match_exact_id();
		self
	}

	/// Restrict the filter to RTR frames only.
	#[must_use = "returns a new filter, does not modify the existing filter"]
	pub const fn match_rtr_only(mut self) -> Self {
		self.filter = self.filter.match_rtr_only();
		self
	}

	/// Restrict the filter to data frames only.
	///
	/// Overrides a previous [`Self::match_rtr_only()`].
	#[must_use = "returns a new filter, does not modify the existing filter"]
	pub const fn match_data_only(mut self) -> Self {
		self.filter = self.filter.match_data_only();
		self
	}

	/// Invert the filter: only frames that would normally *not* match will match.
	#[must_use = "returns a new filter, does not modify the existing filter"]
	pub const fn inverted(mut self, inverted: bool) -> Self {
		self.filter = self.filter.inverted(inverted);
		self
	}
}
