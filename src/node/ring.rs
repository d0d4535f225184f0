//! Chord lookup and maintenance algorithms over the local ring state.

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tracing::{debug, info, trace};

use super::state::RingState;
use crate::common::{in_open_closed, in_open_open, Id, Node};
use crate::rpc::{Info, PeerHandle};
use crate::{Error, Result};

/// Fingers pinged by one successor failover.
const MAX_FAILOVER_PINGS: usize = 3;

/// The local peer: its descriptor and routing state.
///
/// Routing state is only read through snapshots, and no lock is held while
/// talking to other nodes. Writes that depend on a remote answer re-check
/// the state they were computed from before applying.
#[derive(Debug)]
pub(crate) struct Ring {
    me: Node,
    bits: u32,
    request_timeout: Duration,
    state: RwLock<RingState>,
}

/// One step of a lookup walk, either this node or a remote one.
enum Hop<'a> {
    Local(&'a Ring),
    Remote(PeerHandle),
}

impl Hop<'_> {
    fn node(&self) -> Node {
        match self {
            Hop::Local(ring) => ring.me.clone(),
            Hop::Remote(peer) => peer.node().clone(),
        }
    }

    fn successor(&self) -> Option<Node> {
        match self {
            Hop::Local(ring) => Some(ring.successor()),
            Hop::Remote(peer) => peer.get_successor(),
        }
    }

    fn closest_preceding_finger(&self, id: &Id) -> Option<Node> {
        match self {
            Hop::Local(ring) => Some(ring.closest_preceding_finger(id)),
            Hop::Remote(peer) => peer.closest_preceding_finger(id),
        }
    }
}

impl Ring {
    pub fn new(me: Node, bits: u32, request_timeout: Duration) -> Self {
        Self {
            state: RwLock::new(RingState::new(&me, bits)),
            me,
            bits,
            request_timeout,
        }
    }

    // === Getters ===

    pub fn me(&self) -> &Node {
        &self.me
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn successor(&self) -> Node {
        self.read().successor.clone()
    }

    pub fn predecessor(&self) -> Option<Node> {
        self.read().predecessor.clone()
    }

    pub fn fingers(&self) -> Vec<Node> {
        self.read().fingers.clone()
    }

    pub fn info(&self) -> Info {
        let state = self.read().clone();

        Info {
            me: self.me.clone(),
            successor: state.successor,
            predecessor: state.predecessor,
            fingers: state.fingers,
            bits: self.bits,
        }
    }

    /// Handle to talk to `node`.
    pub fn peer(&self, node: Node) -> PeerHandle {
        PeerHandle::new(node, self.bits, self.request_timeout)
    }

    // === Lookups ===

    /// Node responsible for `id`: the successor of its predecessor.
    ///
    /// Returns `None` if the predecessor found doesn't answer.
    pub fn find_successor(&self, id: &Id) -> Option<Node> {
        let predecessor = self.find_predecessor(id);

        if predecessor == self.me {
            Some(self.successor())
        } else {
            self.peer(predecessor).get_successor()
        }
    }

    /// Walks the ring towards `id` until reaching the node whose successor
    /// interval `(node, successor]` contains it.
    ///
    /// Stops early, returning the best node reached so far, if a hop doesn't
    /// answer, makes no progress, or the walk exceeds `2 * bits` hops.
    pub fn find_predecessor(&self, id: &Id) -> Node {
        let mut hop = Hop::Local(self);

        for _ in 0..self.max_hops() {
            let node = hop.node();

            let Some(successor) = hop.successor() else {
                break;
            };
            if in_open_closed(id, node.id(), successor.id()) {
                break;
            }

            let Some(closer) = hop.closest_preceding_finger(id) else {
                break;
            };
            if closer == node {
                break;
            }

            trace!(context = "lookup_hop", %id, from = %node, to = %closer);

            hop = self.hop(closer);
        }

        hop.node()
    }

    /// Highest finger strictly between this node and `id`, or this node
    /// itself if there is none.
    pub fn closest_preceding_finger(&self, id: &Id) -> Node {
        self.read()
            .fingers
            .iter()
            .rev()
            .find(|finger| in_open_open(finger.id(), self.me.id(), id))
            .cloned()
            .unwrap_or_else(|| self.me.clone())
    }

    // === Membership ===

    /// `node` thinks it might be our predecessor.
    ///
    /// Adopted if it lies in `(predecessor, me]`, or anywhere when there is no
    /// predecessor yet. We are never our own predecessor. Returns whether the
    /// predecessor changed.
    pub fn notify(&self, node: Node) -> bool {
        if node == self.me {
            return false;
        }

        let mut state = self.write();

        let adopt = match &state.predecessor {
            Some(predecessor) => in_open_closed(node.id(), predecessor.id(), self.me.id()),
            None => true,
        };

        if adopt && state.predecessor.as_ref() != Some(&node) {
            info!(node = %self.me, predecessor = %node, "New predecessor");
            state.predecessor = Some(node);
            return true;
        }

        false
    }

    /// Join the ring `node` is part of, asking it for our successor.
    ///
    /// The rest of the ring learns about us through stabilization.
    pub fn join(&self, node: &Node) -> Result<()> {
        if node == &self.me {
            debug!(node = %self.me, "Ignoring request to join self");
            return Ok(());
        }

        self.write().predecessor = None;

        let successor = self
            .peer(node.clone())
            .find_successor(self.me.id())
            .ok_or_else(|| Error::PeerUnreachable(node.address()))?;

        info!(node = %self.me, bootstrap = %node, %successor, "Joined ring");

        self.write().set_successor(successor);

        Ok(())
    }

    // === Maintenance ===

    /// Asks our successor for its predecessor, adopts it as successor if it
    /// sits between us, then notifies the successor about us.
    pub fn stabilize(&self) -> Result<()> {
        let mut successor = self.successor();

        let candidate = if successor == self.me {
            self.predecessor()
        } else {
            match self.peer(successor.clone()).get_predecessor() {
                Some(candidate) => Some(candidate),
                None => {
                    self.replace_failed_successor(&successor);
                    return Err(Error::PeerUnreachable(successor.address()));
                }
            }
        };

        if let Some(candidate) = candidate {
            if in_open_open(candidate.id(), self.me.id(), successor.id()) {
                let mut state = self.write();

                if state.successor == successor {
                    info!(node = %self.me, successor = %candidate, "New successor");
                    state.set_successor(candidate);
                }
                successor = state.successor.clone();
            }
        }

        if successor != self.me {
            self.peer(successor).notify(&self.me);
        }

        Ok(())
    }

    /// Resolves finger `index` again. Returns false if the lookup failed.
    ///
    /// The answer is dropped if the finger changed while the lookup ran.
    pub fn fix_finger(&self, index: u32) -> bool {
        let start = self.me.id().finger_start(index, self.bits);
        let index = index as usize;

        let Some(expected) = self.read().fingers.get(index).cloned() else {
            return false;
        };

        match self.find_successor(&start) {
            Some(node) => {
                if !self.write().replace_finger(index, &expected, node) {
                    trace!(node = %self.me, index, "Finger changed during lookup");
                }
                true
            }
            None => false,
        }
    }

    /// Pings the predecessor, clearing it if it doesn't answer.
    /// Returns true if it was cleared.
    pub fn check_predecessor(&self) -> bool {
        let Some(predecessor) = self.predecessor() else {
            return false;
        };

        if predecessor == self.me || self.peer(predecessor.clone()).ping() {
            return false;
        }

        let mut state = self.write();
        if state.predecessor.as_ref() != Some(&predecessor) {
            return false;
        }

        info!(node = %self.me, %predecessor, "Predecessor unreachable, clearing it");
        state.predecessor = None;

        true
    }

    // === Private Methods ===

    /// Falls back to the closest live finger, or to ourselves once no finger
    /// is left to try.
    ///
    /// At most [MAX_FAILOVER_PINGS] fingers are pinged per call. Fingers that
    /// don't answer are forgotten, and if none of them did the dead successor
    /// is kept so the next stabilize tries the following ones.
    fn replace_failed_successor(&self, dead: &Node) {
        let mut seen = HashSet::new();
        let mut candidates = self.fingers();
        candidates.retain(|finger| {
            finger != dead && finger != &self.me && seen.insert(*finger.id())
        });

        let exhausted = candidates.len() <= MAX_FAILOVER_PINGS;

        let mut unreachable = Vec::new();
        let mut replacement = None;

        for candidate in candidates.into_iter().take(MAX_FAILOVER_PINGS) {
            if self.peer(candidate.clone()).ping() {
                replacement = Some(candidate);
                break;
            }
            unreachable.push(candidate);
        }

        let mut state = self.write();
        state.forget(dead, &self.me);
        for node in &unreachable {
            state.forget(node, &self.me);
        }

        if &state.successor != dead {
            // Moved on meanwhile, only restore the first finger.
            let successor = state.successor.clone();
            state.set_successor(successor);
            return;
        }

        match replacement {
            Some(successor) => {
                info!(node = %self.me, %dead, %successor, "Successor unreachable, failing over");
                state.set_successor(successor);
            }
            None if exhausted => {
                info!(node = %self.me, %dead, "Successor unreachable, no live finger left");
                state.set_successor(self.me.clone());
            }
            None => {
                debug!(
                    node = %self.me,
                    %dead,
                    tried = unreachable.len(),
                    "Successor unreachable, no live finger yet"
                );
                state.set_successor(dead.clone());
            }
        }
    }

    fn hop(&self, node: Node) -> Hop<'_> {
        if node == self.me {
            Hop::Local(self)
        } else {
            Hop::Remote(self.peer(node))
        }
    }

    fn max_hops(&self) -> usize {
        2 * self.bits as usize
    }

    fn read(&self) -> RwLockReadGuard<'_, RingState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RingState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
