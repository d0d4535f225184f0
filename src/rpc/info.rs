use crate::common::{Id, Node};

/// Snapshot of a node's position and routing state on the ring.
#[derive(Debug, Clone)]
pub struct Info {
    pub(crate) me: Node,
    pub(crate) successor: Node,
    pub(crate) predecessor: Option<Node>,
    pub(crate) fingers: Vec<Node>,
    pub(crate) bits: u32,
}

impl Info {
    /// This node's [Id]
    pub fn id(&self) -> &Id {
        self.me.id()
    }

    /// This node's own descriptor.
    pub fn node(&self) -> &Node {
        &self.me
    }

    pub fn successor(&self) -> &Node {
        &self.successor
    }

    pub fn predecessor(&self) -> Option<&Node> {
        self.predecessor.as_ref()
    }

    /// Finger table, `fingers()[i]` approximates the successor of `id + 2^i`.
    pub fn fingers(&self) -> &[Node] {
        &self.fingers
    }

    /// Ring width in bits.
    pub fn bits(&self) -> u32 {
        self.bits
    }
}
