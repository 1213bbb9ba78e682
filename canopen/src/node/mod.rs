//! Nodes: a [`LocalNode`] hosts an Object Dictionary on this process; a [`RemoteNode`] is
//! reached over SDO. [`crate::network::Network`] schedules both uniformly through [`Node`].

mod local;
mod remote;

pub use local::{LocalNode, LocalNodeConfig};
pub use remote::RemoteNode;

pub use crate::nmt::ResetRequest;

use std::sync::Arc;

/// Either kind of node a [`crate::network::Network`] can schedule.
#[derive(Clone)]
pub enum Node {
	Local(Arc<LocalNode>),
	Remote(Arc<RemoteNode>),
}

impl Node {
	pub fn node_id(&self) -> u8 {
		match self {
			Self::Local(node) => node.node_id(),
			Self::Remote(node) => node.node_id(),
		}
	}
}

impl std::fmt::Debug for Node {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Local(node) => node.fmt(f),
			Self::Remote(node) => node.fmt(f),
		}
	}
}
