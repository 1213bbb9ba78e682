#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "linux")]
pub use linux::{CanFilter, CanInterface, Socket};

#[cfg(not(target_os = "linux"))]
compile_error!("can-socket only supports Linux (SocketCAN)");
