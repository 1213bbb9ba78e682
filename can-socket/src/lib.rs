//! No-frills CAN sockets, synchronous or async with tokio.

pub mod error;

#[cfg(feature = "tokio")]
pub mod tokio;

mod id;
pub use id::{CanId, ExtendedId, StandardId, MAX_EXTENDED_ID, MAX_STANDARD_ID};

mod filter;
pub use filter::CanFilter;

mod frame;
pub use frame::{CanData, CanFrame};

mod interface;
pub use interface::CanInterface;

mod socket;
pub use socket::CanSocket;

mod sys;

/// A type that can act as a timeout or absolute deadline.
pub trait Deadline {
	/// Get the instant at which the timeout/deadline expires.
	fn deadline(&self) -> std::time::Instant;
}

impl Deadline for std::time::Duration {
	/// Compute the deadline relative to now.
	///
	/// Uses [`tokio::time::Instant`][::tokio::time::Instant] when the `tokio` feature is
	/// enabled, so `tokio::time::pause()`/`advance()` work as expected in tests.
	fn deadline(&self) -> std::time::Instant {
		#[cfg(feature = "tokio")]
		{
			(::tokio::time::Instant::now() + *self).into_std()
		}
		#[cfg(not(feature = "tokio"))]
		{
			std::time::Instant::now() + *self
		}
	}
}

impl Deadline for std::time::Instant {
	fn deadline(&self) -> std::time::Instant {
		*self
	}
}

#[cfg(feature = "tokio")]
impl Deadline for ::tokio::time::Instant {
	fn deadline(&self) -> std::time::Instant {
		self.into_std()
	}
}
