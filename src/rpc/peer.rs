//! Client side of the ring RPCs: a handle to a remote node.

use std::io;
use std::time::Duration;

use tracing::{debug, trace};

use super::socket::RequestSocket;
use crate::common::{decode_node, Frame, Id, Node, Request};

/// A lightweight reference to a remote node exposing the ring operations.
///
/// Holds no connection: every call opens a fresh one, sends a single request
/// and drops the connection whatever the outcome. A peer that fails to answer
/// within the request timeout is reported as `None` (or `false`), never as an
/// error.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    node: Node,
    bits: u32,
    request_timeout: Duration,
}

impl PeerHandle {
    /// `bits` is the ring width used to derive Ids of nodes in responses.
    pub fn new(node: Node, bits: u32, request_timeout: Duration) -> Self {
        Self {
            node,
            bits,
            request_timeout,
        }
    }

    // === Getters ===

    pub fn node(&self) -> &Node {
        &self.node
    }

    // === Ring operations ===

    pub fn find_successor(&self, id: &Id) -> Option<Node> {
        self.request_node(Request::FindSuccessor(*id))
    }

    pub fn find_predecessor(&self, id: &Id) -> Option<Node> {
        self.request_node(Request::FindPredecessor(*id))
    }

    pub fn get_successor(&self) -> Option<Node> {
        self.request_node(Request::GetSuccessor)
    }

    /// The remote node answers with itself if it has no predecessor.
    pub fn get_predecessor(&self) -> Option<Node> {
        self.request_node(Request::GetPredecessor)
    }

    pub fn closest_preceding_finger(&self, id: &Id) -> Option<Node> {
        self.request_node(Request::ClosestPrecedingFinger(*id))
    }

    /// Tells the remote node that `node` might be its predecessor.
    ///
    /// Fire and forget, no response is awaited.
    pub fn notify(&self, node: &Node) {
        let request = Request::Notify {
            ip: node.ip().to_string(),
            port: node.port(),
        };

        let result = RequestSocket::connect(self.node.ip(), self.node.port(), self.request_timeout)
            .and_then(|mut socket| socket.send(&request.to_frame()));

        if let Err(error) = result {
            debug!(peer = %self.node, ?error, "Failed to notify peer");
        }
    }

    /// Returns true if the node answered at all before the timeout.
    pub fn ping(&self) -> bool {
        self.request(&Request::Ping).is_some()
    }

    // === Private Methods ===

    fn request_node(&self, request: Request) -> Option<Node> {
        let frame = self.request(&request)?;

        match decode_node(&frame) {
            Ok((ip, port)) => Some(Node::new(ip, port, self.bits)),
            Err(error) => {
                debug!(
                    peer = %self.node,
                    operation = request.opcode().name(),
                    ?error,
                    "Invalid node reference in response"
                );
                None
            }
        }
    }

    fn request(&self, request: &Request) -> Option<Frame> {
        trace!(context = "rpc_request", peer = %self.node, ?request);

        match self.try_request(request) {
            Ok(frame) => Some(frame),
            Err(error) => {
                debug!(
                    peer = %self.node,
                    operation = request.opcode().name(),
                    ?error,
                    "Request failed"
                );
                None
            }
        }
    }

    fn try_request(&self, request: &Request) -> io::Result<Frame> {
        let mut socket =
            RequestSocket::connect(self.node.ip(), self.node.port(), self.request_timeout)?;

        socket.send(&request.to_frame())?;
        socket.recv()
    }
}
