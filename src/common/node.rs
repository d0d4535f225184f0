//! Struct and implementation of a Chord node descriptor.
use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};

use crate::common::Id;

#[derive(Debug, Clone, Eq)]
/// A node on the ring: its address and the Id derived from it.
///
/// Two descriptors are the same node iff their Ids are equal.
pub struct Node {
    id: Id,
    ip: String,
    port: u16,
}

impl Node {
    /// Creates a new Node, deriving its Id on a ring of `bits` width.
    pub fn new(ip: impl Into<String>, port: u16, bits: u32) -> Node {
        let ip = ip.into();

        Node {
            id: Id::for_node(&ip, port, bits),
            ip,
            port,
        }
    }

    // === Getters ===

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `ip:port` form, as hashed into the Id.
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Display for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn id_is_derived_from_address() {
        let node = Node::new("127.0.0.1", 8001, 160);

        assert_eq!(node.id(), &Id::hash("127.0.0.1:8001"));
        assert_eq!(node.address(), "127.0.0.1:8001");
        assert_eq!(node, Node::new(String::from("127.0.0.1"), 8001, 160));
        assert_ne!(node, Node::new("127.0.0.1", 8002, 160));
    }

    #[test]
    fn narrow_ring() {
        let node = Node::new("127.0.0.1", 8001, 8);

        assert_eq!(&node.id().0[..19], &[0; 19]);
    }
}
