use filedesc::FileDesc;
use std::ffi::{c_int, c_uint, c_void, CString};
use std::mem::MaybeUninit;

use crate::{CanId, StandardId};

/// Raw `struct can_frame` layout as defined by `linux/can.h`.
#[repr(C)]
#[derive(Copy, Clone)]
#[allow(non_camel_case_types)]
struct can_frame {
	can_id: u32,
	can_dlc: u8,
	_pad: u8,
	_res0: u8,
	_res1: u8,
	data: [u8; 8],
}

#[derive(Debug)]
pub struct Socket {
	fd: FileDesc,
}

#[repr(transparent)]
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CanInterface {
	index: u32,
}

#[repr(transparent)]
#[derive(Copy, Clone)]
pub struct CanFilter {
	filter: libc::can_filter,
}

impl CanInterface {
	pub fn from_index(index: u32) -> Self {
		Self { index }
	}

	pub fn from_name(name: &str) -> std::io::Result<Self> {
		let name = CString::new(name)
			.map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "interface name contains a null byte"))?;
		let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
		if index == 0 {
			return Err(std::io::Error::last_os_error());
		}
		Ok(Self::from_index(index))
	}

	pub fn index(&self) -> u32 {
		self.index
	}

	pub fn get_name(&self) -> std::io::Result<String> {
		let mut buffer = vec![0u8; libc::IF_NAMESIZE];
		let name = unsafe { libc::if_indextoname(self.index, buffer.as_mut_ptr().cast()) };
		if name.is_null() {
			return Err(std::io::Error::last_os_error());
		}
		if let Some(len) = buffer.iter().position(|&byte| byte == 0) {
			buffer.truncate(len);
		}
		String::from_utf8(buffer).map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "interface name is not valid UTF-8"))
	}

	fn to_address(&self) -> libc::sockaddr_can {
		unsafe {
			let mut addr: libc::sockaddr_can = std::mem::zeroed();
			addr.can_family = libc::AF_CAN as _;
			addr.can_ifindex = self.index as _;
			addr
		}
	}
}

impl Socket {
	pub fn new(non_blocking: bool) -> std::io::Result<Self> {
		let flags = match non_blocking {
			true => libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
			false => libc::SOCK_CLOEXEC,
		};
		unsafe {
			let fd = check_int(libc::socket(libc::PF_CAN, libc::SOCK_RAW | flags, libc::CAN_RAW))?;
			Ok(Self { fd: FileDesc::from_raw_fd(fd) })
		}
	}

	pub fn set_nonblocking(&self, non_blocking: bool) -> std::io::Result<()> {
		unsafe {
			let flags = check_int(libc::fcntl(self.fd.as_raw_fd(), libc::F_GETFL))?;
			let flags = match non_blocking {
				true => flags | libc::O_NONBLOCK,
				false => flags & !libc::O_NONBLOCK,
			};
			check_int(libc::fcntl(self.fd.as_raw_fd(), libc::F_SETFL, flags))?;
		}
		Ok(())
	}

	pub fn get_interface_by_name(&self, name: &str) -> std::io::Result<CanInterface> {
		unsafe {
			let mut req: libc::ifreq = std::mem::zeroed();
			if name.len() + 1 > std::mem::size_of_val(&req.ifr_name) {
				return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "interface name too long"));
			}
			if name.as_bytes().iter().any(|&byte| byte == 0) {
				return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "interface name contains a null byte"));
			}
			std::ptr::copy(name.as_ptr().cast(), req.ifr_name.as_mut_ptr(), name.len());
			check_int(libc::ioctl(self.fd.as_raw_fd(), libc::SIOCGIFINDEX as _, &mut req))?;
			Ok(CanInterface::from_index(req.ifr_ifru.ifru_ifindex as u32))
		}
	}

	pub fn bind(&self, interface: &CanInterface) -> std::io::Result<()> {
		unsafe {
			let addr = interface.to_address();
			check_int(libc::bind(self.fd.as_raw_fd(), &addr as *const _ as *const _, std::mem::size_of_val(&addr) as _))?;
			Ok(())
		}
	}

	pub fn local_addr(&self) -> std::io::Result<CanInterface> {
		unsafe {
			let mut addr: libc::sockaddr_can = std::mem::zeroed();
			let mut len = std::mem::size_of_val(&addr) as libc::socklen_t;
			check_int(libc::getsockname(self.fd.as_raw_fd(), &mut addr as *mut _ as *mut _, &mut len))?;
			Ok(CanInterface::from_index(addr.can_ifindex as u32))
		}
	}

	pub fn send(&self, frame: &crate::CanFrame) -> std::io::Result<()> {
		let raw = encode(frame);
		unsafe {
			let written = check_isize(libc::send(self.fd.as_raw_fd(), &raw as *const _ as *const c_void, std::mem::size_of_val(&raw), 0))?;
			debug_assert!(written as usize == std::mem::size_of_val(&raw));
		}
		Ok(())
	}

	pub fn send_to(&self, frame: &crate::CanFrame, interface: &CanInterface) -> std::io::Result<()> {
		let raw = encode(frame);
		let address = interface.to_address();
		unsafe {
			let written = check_isize(libc::sendto(
				self.fd.as_raw_fd(),
				&raw as *const _ as *const c_void,
				std::mem::size_of_val(&raw),
				0,
				&address as *const _ as *const _,
				std::mem::size_of_val(&address) as _,
			))?;
			debug_assert!(written as usize == std::mem::size_of_val(&raw));
		}
		Ok(())
	}

	pub fn recv(&self) -> std::io::Result<crate::CanFrame> {
		let mut raw: MaybeUninit<can_frame> = MaybeUninit::uninit();
		unsafe {
			let read = check_isize(libc::recv(self.fd.as_raw_fd(), raw.as_mut_ptr().cast(), std::mem::size_of_val(&raw), 0))?;
			debug_assert!(read as usize == std::mem::size_of_val(&raw));
			Ok(decode(raw.assume_init()))
		}
	}

	pub fn recv_from(&self) -> std::io::Result<(crate::CanFrame, CanInterface)> {
		let mut raw: MaybeUninit<can_frame> = MaybeUninit::uninit();
		let mut addr: libc::sockaddr_can = unsafe { std::mem::zeroed() };
		unsafe {
			let mut len = std::mem::size_of_val(&addr) as libc::socklen_t;
			let read = check_isize(libc::recvfrom(
				self.fd.as_raw_fd(),
				raw.as_mut_ptr().cast(),
				std::mem::size_of_val(&raw),
				0,
				&mut addr as *mut _ as *mut _,
				&mut len,
			))?;
			debug_assert!(read as usize == std::mem::size_of_val(&raw));
			Ok((decode(raw.assume_init()), CanInterface { index: addr.can_ifindex as u32 }))
		}
	}

	pub fn set_filters(&self, filters: &[crate::CanFilter]) -> std::io::Result<()> {
		let len = std::mem::size_of_val(filters)
			.try_into()
			.map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "filter list too large"))?;
		unsafe {
			check_int(libc::setsockopt(self.fd.as_raw_fd(), libc::SOL_CAN_RAW, libc::CAN_RAW_FILTER, filters.as_ptr().cast(), len))?;
		}
		Ok(())
	}

	pub fn get_loopback(&self) -> std::io::Result<bool> {
		self.get_bool_opt(libc::CAN_RAW_LOOPBACK)
	}

	pub fn set_loopback(&self, enable: bool) -> std::io::Result<()> {
		self.set_bool_opt(libc::CAN_RAW_LOOPBACK, enable)
	}

	pub fn get_receive_own_messages(&self) -> std::io::Result<bool> {
		self.get_bool_opt(libc::CAN_RAW_RECV_OWN_MSGS)
	}

	pub fn set_receive_own_messages(&self, enable: bool) -> std::io::Result<()> {
		self.set_bool_opt(libc::CAN_RAW_RECV_OWN_MSGS, enable)
	}

	fn get_bool_opt(&self, name: c_int) -> std::io::Result<bool> {
		let mut enabled: c_int = 0;
		let mut len: c_uint = std::mem::size_of::<c_int>() as c_uint;
		unsafe {
			check_int(libc::getsockopt(
				self.fd.as_raw_fd(),
				libc::SOL_CAN_RAW,
				name,
				&mut enabled as *mut c_int as *mut c_void,
				&mut len,
			))?;
		}
		Ok(enabled != 0)
	}

	fn set_bool_opt(&self, name: c_int, enable: bool) -> std::io::Result<()> {
		let enable = c_int::from(enable);
		unsafe {
			check_int(libc::setsockopt(
				self.fd.as_raw_fd(),
				libc::SOL_CAN_RAW,
				name,
				&enable as *const c_int as *const c_void,
				std::mem::size_of_val(&enable) as u32,
			))?;
		}
		Ok(())
	}
}

fn encode(frame: &crate::CanFrame) -> can_frame {
	let mut raw: can_frame = unsafe { std::mem::zeroed() };
	raw.can_id = match frame.id() {
		CanId::Standard(id) => id.as_u16() as u32,
		CanId::Extended(id) => id.as_u32() | libc::CAN_EFF_FLAG,
	};
	if frame.is_rtr() {
		raw.can_id |= libc::CAN_RTR_FLAG;
	}
	raw.can_dlc = frame.data_length_code();
	raw.data[..frame.data().len()].copy_from_slice(frame.data());
	raw
}

fn decode(raw: can_frame) -> crate::CanFrame {
	let is_extended = raw.can_id & libc::CAN_EFF_FLAG != 0;
	let is_rtr = raw.can_id & libc::CAN_RTR_FLAG != 0;
	let id = if is_extended {
		CanId::new(raw.can_id & libc::CAN_EFF_MASK).expect("kernel reported an invalid extended CAN id")
	} else {
		CanId::Standard(StandardId::new((raw.can_id & libc::CAN_SFF_MASK) as u16).expect("kernel reported an invalid standard CAN id"))
	};
	let len = (raw.can_dlc as usize).min(8);
	crate::CanFrame::from_raw_parts(id, is_rtr, &raw.data[..len])
}

impl CanFilter {
	pub const fn new(id: CanId) -> Self {
		match id {
			CanId::Standard(id) => Self {
				filter: libc::can_filter { can_id: id.as_u16() as u32, can_mask: 0 },
			},
			CanId::Extended(id) => Self {
				filter: libc::can_filter { can_id: id.as_u32() | libc::CAN_EFF_FLAG, can_mask: 0 },
			},
		}
	}

	#[must_use]
	pub const fn match_id_mask(mut self, mask: u32) -> Self {
		self.filter.can_mask |= mask & libc::CAN_EFF_MASK;
		self
	}

	#[must_use]
	pub const fn match_exact_id(mut self) -> Self {
		self.filter.can_mask |= libc::CAN_EFF_MASK | libc::CAN_EFF_FLAG;
		self
	}

	#[must_use]
	pub const fn match_rtr_only(mut self) -> Self {
		self.filter.can_id |= libc::CAN_RTR_FLAG;
		self.filter.can_mask |= libc::CAN_RTR_FLAG;
		self
	}

	#[must_use]
	pub const fn match_data_only(mut self) -> Self {
		self.filter.can_id &= !libc::CAN_RTR_FLAG;
		self.filter.can_mask |= libc::CAN_RTR_FLAG;
		self
	}

	#[must_use]
	pub const fn inverted(mut self, inverted: bool) -> Self {
		if inverted {
			self.filter.can_id |= libc::CAN_INV_FILTER;
		} else {
			self.filter.can_id &= !libc::CAN_INV_FILTER;
		}
		self
	}
}

fn check_int(return_value: c_int) -> std::io::Result<c_int> {
	if return_value == -1 {
		Err(std::io::Error::last_os_error())
	} else {
		Ok(return_value)
	}
}

fn check_isize(return_value: isize) -> std::io::Result<isize> {
	if return_value == -1 {
		Err(std::io::Error::last_os_error())
	} else {
		Ok(return_value)
	}
}

impl std::os::fd::AsFd for Socket {
	fn as_fd(&self) -> std::os::fd::BorrowedFd<'_> {
		self.fd.as_fd()
	}
}

impl From<Socket> for std::os::fd::OwnedFd {
	fn from(value: Socket) -> Self {
		value.fd.into()
	}
}

impl From<std::os::fd::OwnedFd> for Socket {
	fn from(value: std::os::fd::OwnedFd) -> Self {
		Self { fd: FileDesc::from(value) }
	}
}

impl std::os::fd::AsRawFd for Socket {
	fn as_raw_fd(&self) -> std::os::fd::RawFd {
		self.fd.as_raw_fd()
	}
}

impl std::os::fd::IntoRawFd for Socket {
	fn into_raw_fd(self) -> std::os::fd::RawFd {
		self.fd.into_raw_fd()
	}
}

impl std::os::fd::FromRawFd for Socket {
	unsafe fn from_raw_fd(fd: std::os::fd::RawFd) -> Self {
		Self { fd: FileDesc::from_raw_fd(fd) }
	}
}
