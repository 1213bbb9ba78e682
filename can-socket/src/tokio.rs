//! Asynchronous CAN socket built on tokio's reactor.

use tokio::io::unix::AsyncFd;

use crate::{CanFilter, CanFrame, CanInterface};

/// An asynchronous CAN socket.
///
/// Mirrors [`crate::CanSocket`] but integrates with the tokio reactor instead of blocking.
pub struct CanSocket {
	io: AsyncFd<crate::sys::Socket>,
}

impl std::fmt::Debug for CanSocket {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		use std::os::unix::io::AsRawFd;
		f.debug_struct("CanSocket").field("fd", &self.as_raw_fd()).finish()
	}
}

impl CanSocket {
	/// Create a new socket bound to a named CAN interface.
	///
	/// Not async: binding either succeeds or fails immediately.
	pub fn bind(interface: impl AsRef<str>) -> std::io::Result<Self> {
		let inner = crate::sys::Socket::new(true)?;
		let interface = inner.get_interface_by_name(interface.as_ref())?;
		inner.bind(&interface)?;
		Ok(Self { io: AsyncFd::new(inner)? })
	}

	/// Create a new socket bound to an interface by index.
	pub fn bind_interface_index(index: u32) -> std::io::Result<Self> {
		let inner = crate::sys::Socket::new(true)?;
		inner.bind(&crate::sys::CanInterface::from_index(index))?;
		Ok(Self { io: AsyncFd::new(inner)? })
	}

	/// Create a new socket bound to all CAN interfaces on the system.
	pub fn bind_all() -> std::io::Result<Self> {
		Self::bind_interface_index(0)
	}

	/// Get the interface this socket is bound to.
	pub fn local_addr(&self) -> std::io::Result<CanInterface> {
		Ok(CanInterface { inner: self.io.get_ref().local_addr()? })
	}

	/// Send a frame over the socket.
	pub async fn send(&self, frame: &CanFrame) -> std::io::Result<()> {
		self.io.async_io(tokio::io::Interest::WRITABLE, |inner| inner.send(frame)).await
	}

	/// Send a frame over a particular interface.
	pub async fn send_to(&self, frame: &CanFrame, interface: &CanInterface) -> std::io::Result<()> {
		self.io.async_io(tokio::io::Interest::WRITABLE, |inner| inner.send_to(frame, &interface.inner)).await
	}

	/// Receive a frame from the socket.
	pub async fn recv(&self) -> std::io::Result<CanFrame> {
		self.io.async_io(tokio::io::Interest::READABLE, |inner| inner.recv()).await
	}

	/// Receive a frame, together with the interface it was received on.
	pub async fn recv_from(&self) -> std::io::Result<(CanFrame, CanInterface)> {
		let (frame, interface) = self.io.async_io(tokio::io::Interest::READABLE, |inner| inner.recv_from()).await?;
		Ok((frame, CanInterface { inner: interface }))
	}

	/// Set the list of receive filters on the socket.
	pub fn set_filters(&self, filters: &[CanFilter]) -> std::io::Result<()> {
		self.io.get_ref().set_filters(filters)
	}

	/// Enable or disable the loopback option. See [`crate::CanSocket::set_loopback()`].
	pub fn set_loopback(&self, enable: bool) -> std::io::Result<()> {
		self.io.get_ref().set_loopback(enable)
	}

	/// Enable or disable delivery of this socket's own sent frames back to itself.
	pub fn set_receive_own_messages(&self, enable: bool) -> std::io::Result<()> {
		self.io.get_ref().set_receive_own_messages(enable)
	}
}

impl std::os::fd::AsFd for CanSocket {
	fn as_fd(&self) -> std::os::fd::BorrowedFd<'_> {
		self.io.as_fd()
	}
}

impl From<CanSocket> for std::os::fd::OwnedFd {
	fn from(value: CanSocket) -> Self {
		value.io.into_inner().into()
	}
}

impl TryFrom<std::os::fd::OwnedFd> for CanSocket {
	type Error = std::io::Error;

	fn try_from(value: std::os::fd::OwnedFd) -> std::io::Result<Self> {
		Ok(Self { io: AsyncFd::new(value.into())? })
	}
}

impl std::os::fd::AsRawFd for CanSocket {
	fn as_raw_fd(&self) -> std::os::fd::RawFd {
		self.io.as_raw_fd()
	}
}

impl std::os::fd::IntoRawFd for CanSocket {
	fn into_raw_fd(self) -> std::os::fd::RawFd {
		self.io.into_inner().into_raw_fd()
	}
}
