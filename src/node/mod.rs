//! Chord node: ring state, its maintenance threads and the public handle.

mod maintenance;
mod ring;
mod state;

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::Sender;
use tracing::{debug, info};

pub(crate) use ring::Ring;

use crate::common::{Id, Node};
use crate::rpc::{Config, Info, PeerHandle, Transport};
use crate::Result;

/// A node participating in a Chord ring.
///
/// Cheap to clone, every clone drives the same node. The node serves requests
/// and runs its maintenance loops on background threads until
/// [ChordNode::shutdown] is called.
#[derive(Debug, Clone)]
pub struct ChordNode(Arc<Shared>);

#[derive(Debug)]
struct Shared {
    ring: Arc<Ring>,
    request_timeout: Duration,
    /// Dropping this sender stops every background thread.
    stop: Mutex<Option<Sender<()>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ChordNode {
    /// Returns a builder to edit settings before creating a node.
    pub fn builder() -> ChordBuilder {
        ChordBuilder::default()
    }

    /// Starts a node serving requests received on `transport`.
    ///
    /// The node starts as a ring of one, call [ChordNode::join] to enter an
    /// existing ring. The transport must be reachable at `config.ip` and
    /// `config.port`, that address is what other nodes learn about this one.
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        let me = Node::new(&config.ip, config.port, config.bits);
        let ring = Arc::new(Ring::new(me, config.bits, config.request_timeout));

        info!(node = %ring.me(), id = %ring.me().id(), bits = config.bits, "Chord node started");

        let (stop, receiver) = flume::bounded::<()>(0);
        let mut threads = Vec::with_capacity(4);

        {
            let (ring, receiver) = (ring.clone(), receiver.clone());
            threads.push(spawn("chord-server", move || {
                maintenance::serve(ring, transport, receiver)
            })?);
        }
        {
            let (ring, receiver) = (ring.clone(), receiver.clone());
            let interval = config.stabilize_interval;
            threads.push(spawn("chord-stabilize", move || {
                maintenance::stabilize(ring, interval, receiver)
            })?);
        }
        {
            let (ring, receiver) = (ring.clone(), receiver.clone());
            let (interval, delay) = (config.fix_fingers_interval, config.fix_finger_delay);
            threads.push(spawn("chord-fix-fingers", move || {
                maintenance::fix_fingers(ring, interval, delay, receiver)
            })?);
        }
        {
            let ring = ring.clone();
            let interval = config.check_predecessor_interval;
            threads.push(spawn("chord-check-predecessor", move || {
                maintenance::check_predecessor(ring, interval, receiver)
            })?);
        }

        Ok(ChordNode(Arc::new(Shared {
            ring,
            request_timeout: config.request_timeout,
            stop: Mutex::new(Some(stop)),
            threads: Mutex::new(threads),
        })))
    }

    // === Getters ===

    /// This node's [Id]
    pub fn id(&self) -> &Id {
        self.0.ring.me().id()
    }

    /// This node's own descriptor.
    pub fn node(&self) -> &Node {
        self.0.ring.me()
    }

    /// Snapshot of the node's routing state.
    pub fn info(&self) -> Info {
        self.0.ring.info()
    }

    pub fn successor(&self) -> Node {
        self.0.ring.successor()
    }

    pub fn predecessor(&self) -> Option<Node> {
        self.0.ring.predecessor()
    }

    // === Ring operations ===

    /// Finds the node responsible for `id`, or `None` if the lookup hit an
    /// unreachable node.
    pub fn find_successor(&self, id: &Id) -> Option<Node> {
        self.0.ring.find_successor(&id.masked(self.0.ring.bits()))
    }

    pub fn find_predecessor(&self, id: &Id) -> Node {
        self.0.ring.find_predecessor(&id.masked(self.0.ring.bits()))
    }

    pub fn closest_preceding_finger(&self, id: &Id) -> Node {
        self.0
            .ring
            .closest_preceding_finger(&id.masked(self.0.ring.bits()))
    }

    /// Offers `node` as this node's predecessor, returns true if it was adopted.
    pub fn notify(&self, node: Node) -> bool {
        self.0.ring.notify(node)
    }

    /// Joins the ring `node` belongs to.
    ///
    /// Only the successor is learned here, the rest of the routing state
    /// follows from the maintenance loops.
    pub fn join(&self, node: &Node) -> Result<()> {
        self.0.ring.join(node)
    }

    /// Same as [ChordNode::join] for a node known by its address.
    pub fn join_address(&self, ip: &str, port: u16) -> Result<()> {
        self.join(&self.node_at(ip, port))
    }

    /// Describes the node at `ip:port` using this ring's width.
    pub fn node_at(&self, ip: &str, port: u16) -> Node {
        Node::new(ip, port, self.0.ring.bits())
    }

    /// A client handle to `node`, using this node's ring width and timeout.
    pub fn peer(&self, node: Node) -> PeerHandle {
        PeerHandle::new(node, self.0.ring.bits(), self.0.request_timeout)
    }

    /// Stops serving requests and every maintenance loop, blocking until all
    /// background threads are done.
    ///
    /// Calling it more than once is a no-op. The transport is left open,
    /// closing it is up to its owner.
    pub fn shutdown(&self) {
        let stop = self
            .0
            .stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if stop.is_none() {
            return;
        }
        drop(stop);

        let threads = std::mem::take(
            &mut *self
                .0
                .threads
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        for handle in threads {
            let _ = handle.join();
        }

        debug!(node = %self.node(), "Chord node shutdown");
    }
}

fn spawn<F>(name: &str, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    Ok(thread::Builder::new().name(name.to_string()).spawn(f)?)
}

/// Builder for [ChordNode].
#[derive(Debug, Default, Clone)]
pub struct ChordBuilder(Config);

impl ChordBuilder {
    /// Ip address other nodes reach this node on.
    pub fn ip(&mut self, ip: &str) -> &mut Self {
        self.0.ip = ip.to_string();

        self
    }

    /// Port other nodes reach this node on.
    pub fn port(&mut self, port: u16) -> &mut Self {
        self.0.port = port;

        self
    }

    /// Ring width in bits, between 1 and 160.
    pub fn bits(&mut self, bits: u32) -> &mut Self {
        self.0.bits = bits;

        self
    }

    pub fn request_timeout(&mut self, request_timeout: Duration) -> &mut Self {
        self.0.request_timeout = request_timeout;

        self
    }

    pub fn stabilize_interval(&mut self, interval: Duration) -> &mut Self {
        self.0.stabilize_interval = interval;

        self
    }

    /// Pause between two sweeps of the finger table.
    pub fn fix_fingers_interval(&mut self, interval: Duration) -> &mut Self {
        self.0.fix_fingers_interval = interval;

        self
    }

    /// Pause between two finger entries within a sweep.
    pub fn fix_finger_delay(&mut self, delay: Duration) -> &mut Self {
        self.0.fix_finger_delay = delay;

        self
    }

    pub fn check_predecessor_interval(&mut self, interval: Duration) -> &mut Self {
        self.0.check_predecessor_interval = interval;

        self
    }

    /// Starts a [ChordNode] serving requests received on `transport`.
    pub fn build(&self, transport: Arc<dyn Transport>) -> Result<ChordNode> {
        ChordNode::new(self.0.clone(), transport)
    }
}
