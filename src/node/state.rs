use crate::common::Node;

/// Mutable routing state of a node, always accessed behind the ring's lock.
#[derive(Debug, Clone)]
pub(crate) struct RingState {
    pub successor: Node,
    pub predecessor: Option<Node>,
    pub fingers: Vec<Node>,
}

impl RingState {
    /// A ring of one: successor and every finger point back to `me`.
    pub fn new(me: &Node, bits: u32) -> Self {
        Self {
            successor: me.clone(),
            predecessor: None,
            fingers: vec![me.clone(); bits as usize],
        }
    }

    /// Sets the successor, keeping the first finger in sync so routing
    /// always knows about it.
    pub fn set_successor(&mut self, node: Node) {
        if let Some(first) = self.fingers.first_mut() {
            *first = node.clone();
        }
        self.successor = node;
    }

    /// Sets finger `index` to `node` only if it still holds `expected`.
    ///
    /// The first finger moves together with the successor. Returns whether
    /// anything was written.
    pub fn replace_finger(&mut self, index: usize, expected: &Node, node: Node) -> bool {
        if index == 0 {
            if &self.successor != expected {
                return false;
            }
            self.set_successor(node);

            return true;
        }

        match self.fingers.get_mut(index) {
            Some(finger) if finger == expected => {
                *finger = node;
                true
            }
            _ => false,
        }
    }

    /// Points every finger at `dead` back to `me`.
    pub fn forget(&mut self, dead: &Node, me: &Node) {
        for finger in self.fingers.iter_mut().filter(|finger| finger.id() == dead.id()) {
            *finger = me.clone();
        }
    }
}
