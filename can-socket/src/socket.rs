use crate::{CanFilter, CanFrame, CanInterface};

/// A synchronous CAN socket.
///
/// Used to send and receive [`CanFrame`]s over the network.
///
/// Although the socket is synchronous, it can be put into non-blocking mode with
/// [`Self::set_nonblocking()`].
#[repr(transparent)]
pub struct CanSocket {
	inner: crate::sys::Socket,
}

impl std::fmt::Debug for CanSocket {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		use std::os::unix::io::AsRawFd;
		f.debug_struct("CanSocket").field("fd", &self.as_raw_fd()).finish()
	}
}

impl CanSocket {
	/// Create a new socket bound to a named CAN interface.
	pub fn bind(interface: impl AsRef<str>) -> std::io::Result<Self> {
		let inner = crate::sys::Socket::new(false)?;
		let interface = inner.get_interface_by_name(interface.as_ref())?;
		inner.bind(&interface)?;
		Ok(Self { inner })
	}

	/// Create a new socket bound to an interface by index.
	pub fn bind_interface_index(index: u32) -> std::io::Result<Self> {
		let inner = crate::sys::Socket::new(false)?;
		inner.bind(&crate::sys::CanInterface::from_index(index))?;
		Ok(Self { inner })
	}

	/// Create a new socket bound to all CAN interfaces on the system.
	///
	/// Use [`Self::recv_from()`] to learn which interface a frame arrived on and
	/// [`Self::send_to()`] to send on a particular interface.
	pub fn bind_all() -> std::io::Result<Self> {
		Self::bind_interface_index(0)
	}

	/// Get the interface this socket is bound to.
	///
	/// If the socket is bound to all interfaces, the returned interface reports index 0.
	pub fn local_addr(&self) -> std::io::Result<CanInterface> {
		Ok(CanInterface { inner: self.inner.local_addr()? })
	}

	/// Put the socket in non-blocking or blocking mode.
	pub fn set_nonblocking(&self, non_blocking: bool) -> std::io::Result<()> {
		self.inner.set_nonblocking(non_blocking)
	}

	/// Send a frame over the socket.
	///
	/// Success only means the kernel accepted the frame for transmission,
	/// not that it was transmitted on the bus.
	pub fn send(&self, frame: &CanFrame) -> std::io::Result<()> {
		self.inner.send(frame)
	}

	/// Send a frame over a particular interface.
	///
	/// Requires the socket to be bound to all interfaces.
	pub fn send_to(&self, frame: &CanFrame, interface: &CanInterface) -> std::io::Result<()> {
		self.inner.send_to(frame, &interface.inner)
	}

	/// Receive a frame from the socket.
	pub fn recv(&self) -> std::io::Result<CanFrame> {
		self.inner.recv()
	}

	/// Receive a frame, together with the interface it was received on.
	pub fn recv_from(&self) -> std::io::Result<(CanFrame, CanInterface)> {
		let (frame, interface) = self.inner.recv_from()?;
		Ok((frame, CanInterface { inner: interface }))
	}

	/// Set the list of receive filters on the socket.
	///
	/// A frame only needs to match one of the filters to be delivered.
	/// With no filters installed, the socket receives all frames from the bus.
	pub fn set_filters(&self, filters: &[CanFilter]) -> std::io::Result<()> {
		self.inner.set_filters(filters)
	}

	/// Check whether the loopback option is enabled.
	///
	/// Enabled by default: frames sent by other sockets on the same interface are
	/// also delivered to this socket.
	pub fn get_loopback(&self) -> std::io::Result<bool> {
		self.inner.get_loopback()
	}

	/// Enable or disable the loopback option.
	pub fn set_loopback(&self, enable: bool) -> std::io::Result<()> {
		self.inner.set_loopback(enable)
	}

	/// Check whether frames sent on this socket are also delivered back to it.
	///
	/// Requires the loopback option to be enabled as well.
	pub fn get_receive_own_messages(&self) -> std::io::Result<bool> {
		self.inner.get_receive_own_messages()
	}

	/// Enable or disable delivery of this socket's own sent frames back to itself.
	pub fn set_receive_own_messages(&self, enable: bool) -> std::io::Result<()> {
		self.inner.set_receive_own_messages(enable)
	}
}

impl std::os::fd::AsFd for CanSocket {
	fn as_fd(&self) -> std::os::fd::BorrowedFd<'_> {
		self.inner.as_fd()
	}
}

impl From<CanSocket> for std::os::fd::OwnedFd {
	fn from(value: CanSocket) -> Self {
		value.inner.into()
	}
}

impl From<std::os::fd::OwnedFd> for CanSocket {
	fn from(value: std::os::fd::OwnedFd) -> Self {
		Self { inner: value.into() }
	}
}

impl std::os::fd::AsRawFd for CanSocket {
	fn as_raw_fd(&self) -> std::os::fd::RawFd {
		self.inner.as_raw_fd()
	}
}

impl std::os::fd::IntoRawFd for CanSocket {
	fn into_raw_fd(self) -> std::os::fd::RawFd {
		self.inner.into_raw_fd()
	}
}

impl std::os::fd::FromRawFd for CanSocket {
	unsafe fn from_raw_fd(fd: std::os::fd::RawFd) -> Self {
		Self { inner: crate::sys::Socket::from_raw_fd(fd) }
	}
}
