//! Local rings for tests and demos.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::common::{Node, MAX_BITS};
use crate::node::ChordNode;
use crate::rpc::TcpTransport;
use crate::Result;

/// Create a testnet of Chord nodes on the loopback interface, every node
/// joining the ring through the first one.
///
/// Maintenance runs on much shorter intervals than the defaults so rings
/// converge within seconds.
#[derive(Debug)]
pub struct Testnet {
    pub nodes: Vec<ChordNode>,
    transports: Vec<Arc<TcpTransport>>,
}

impl Testnet {
    pub fn new(count: usize) -> Result<Testnet> {
        Self::with_bits(count, MAX_BITS)
    }

    /// Same as [Testnet::new] on a ring of `bits` width.
    pub fn with_bits(count: usize, bits: u32) -> Result<Testnet> {
        let mut testnet = Testnet {
            nodes: Vec::with_capacity(count),
            transports: Vec::with_capacity(count),
        };

        for _ in 0..count {
            let transport = Arc::new(TcpTransport::bind("127.0.0.1:0")?);
            let port = transport.local_addr().port();

            let node = ChordNode::builder()
                .ip("127.0.0.1")
                .port(port)
                .bits(bits)
                .request_timeout(Duration::from_millis(500))
                .stabilize_interval(Duration::from_millis(50))
                .fix_fingers_interval(Duration::from_millis(200))
                .fix_finger_delay(Duration::from_millis(1))
                .check_predecessor_interval(Duration::from_millis(50))
                .build(transport.clone())?;

            if let Some(bootstrap) = testnet.nodes.first() {
                node.join(bootstrap.node())?;
            }

            testnet.nodes.push(node);
            testnet.transports.push(transport);
        }

        Ok(testnet)
    }

    /// Live nodes sorted by Id, the order they should have on the ring.
    pub fn ring_order(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self
            .nodes
            .iter()
            .zip(&self.transports)
            .filter(|(_, transport)| !transport.is_closed())
            .map(|(node, _)| node.node().clone())
            .collect();

        nodes.sort_by(|a, b| a.id().cmp(b.id()));

        nodes
    }

    /// True once every live node's successor and predecessor are its
    /// neighbours in Id order.
    pub fn is_converged(&self) -> bool {
        let order = self.ring_order();
        let count = order.len();

        self.nodes
            .iter()
            .zip(&self.transports)
            .filter(|(_, transport)| !transport.is_closed())
            .all(|(node, _)| {
                let Some(position) = order.iter().position(|n| n == node.node()) else {
                    return false;
                };

                let successor = &order[(position + 1) % count];
                let predecessor = &order[(position + count - 1) % count];

                let info = node.info();

                if count == 1 {
                    return info.successor() == node.node()
                        && info.predecessor().map_or(true, |p| p == node.node());
                }

                info.successor() == successor && info.predecessor() == Some(predecessor)
            })
    }

    /// Polls [Testnet::is_converged] until it holds, returns false on timeout.
    pub fn wait_until_converged(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            if self.is_converged() {
                return true;
            }

            thread::sleep(Duration::from_millis(50));
        }

        debug!("Testnet did not converge in {:?}", timeout);

        self.is_converged()
    }

    /// Shuts the node at `index` down and closes its transport, as if it
    /// crashed.
    pub fn stop(&self, index: usize) {
        if let Some(node) = self.nodes.get(index) {
            node.shutdown();
        }
        if let Some(transport) = self.transports.get(index) {
            transport.close();
        }
    }
}

impl Drop for Testnet {
    fn drop(&mut self) {
        for index in 0..self.nodes.len() {
            self.stop(index);
        }
    }
}
