//! Serving ring requests received on a node's transport.

use bytes::Bytes;
use tracing::{debug, trace};

use crate::common::{Envelope, Frame, Node, Request, Response};
use crate::node::Ring;

/// Handles one inbound frame, returning the reply frame if there is one.
///
/// Invalid frames (wrong subsystem, unknown operation, bad arguments) are
/// logged and dropped without a reply.
pub(crate) fn handle_frame(ring: &Ring, frame: &[Bytes]) -> Option<Frame> {
    let envelope = match Envelope::from_frame(frame) {
        Ok(envelope) => envelope,
        Err(error) => {
            debug!(node = %ring.me(), ?error, "Dropping invalid request");
            return None;
        }
    };

    trace!(context = "server_request", request = ?envelope.request);

    let response = handle_request(ring, envelope.request.clone())?;

    Some(envelope.reply(&response))
}

/// Answers a single request against the local ring state.
pub(crate) fn handle_request(ring: &Ring, request: Request) -> Option<Response> {
    let bits = ring.bits();

    match request {
        Request::FindSuccessor(id) => match ring.find_successor(&id.masked(bits)) {
            Some(successor) => Some(Response::node(&successor)),
            None => {
                debug!(node = %ring.me(), %id, "Could not resolve successor");
                None
            }
        },
        Request::FindPredecessor(id) => {
            Some(Response::node(&ring.find_predecessor(&id.masked(bits))))
        }
        Request::GetSuccessor => Some(Response::node(&ring.successor())),
        Request::GetPredecessor => {
            let predecessor = ring.predecessor().unwrap_or_else(|| ring.me().clone());
            Some(Response::node(&predecessor))
        }
        Request::Notify { ip, port } => {
            ring.notify(Node::new(ip, port, bits));
            None
        }
        Request::Ping => Some(Response::Pong),
        Request::ClosestPrecedingFinger(id) => Some(Response::node(
            &ring.closest_preceding_finger(&id.masked(bits)),
        )),
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;
    use crate::common::{encode_id, encode_node, Id};

    fn ring() -> Ring {
        Ring::new(
            Node::new("127.0.0.1", 8001, 160),
            160,
            Duration::from_millis(300),
        )
    }

    fn frame(parts: &[&[u8]]) -> Frame {
        parts.iter().map(|p| Bytes::copy_from_slice(p)).collect()
    }

    #[test]
    fn multiplexed_reply_keeps_client_address() {
        let ring = ring();

        let reply = handle_frame(&ring, &frame(&[&[0, 0, 0, 0, 3], b"Chord", b"Get_S"])).unwrap();

        assert_eq!(reply[0].as_ref(), &[0, 0, 0, 0, 3]);
        assert_eq!(&reply[1..], &encode_node("127.0.0.1", 8001));
    }

    #[test]
    fn direct_reply() {
        let ring = ring();

        let reply = handle_frame(&ring, &frame(&[b"Chord", b"Ping"])).unwrap();

        assert_eq!(reply, frame(&[b""]));
    }

    #[test]
    fn get_predecessor_defaults_to_self() {
        let ring = ring();

        assert_eq!(
            handle_request(&ring, Request::GetPredecessor),
            Some(Response::node(ring.me()))
        );
    }

    #[test]
    fn notify_has_no_reply() {
        let ring = ring();
        let other = Node::new("127.0.0.1", 8002, 160);

        let mut request = frame(&[b"Chord", b"Notify"]);
        request.extend(encode_node(other.ip(), other.port()));

        assert!(handle_frame(&ring, &request).is_none());
        assert_eq!(ring.predecessor(), Some(other.clone()));
        assert_eq!(
            handle_request(&ring, Request::GetPredecessor),
            Some(Response::node(&other))
        );
    }

    #[test]
    fn lookups_on_a_single_node() {
        let ring = ring();
        let id = Id::random();

        for request in [
            Request::FindSuccessor(id),
            Request::FindPredecessor(id),
            Request::ClosestPrecedingFinger(id),
        ] {
            assert_eq!(
                handle_request(&ring, request),
                Some(Response::node(ring.me()))
            );
        }

        let reply = handle_frame(
            &ring,
            &[
                Bytes::from_static(b"Chord"),
                Bytes::from_static(b"Find_S"),
                encode_id(&id),
            ],
        );
        assert_eq!(reply, Some(Response::node(ring.me()).to_parts()));
    }

    #[test]
    fn invalid_requests_are_dropped() {
        let ring = ring();

        for invalid in [
            frame(&[]),
            frame(&[b"Chord", b"Store_K", b"key"]),
            frame(&[&[0, 0, 0, 0, 1], b"Storage", b"Ping"]),
            frame(&[b"Chord", b"Notify", b"127.0.0.1"]),
            frame(&[b"Chord", b"Find_S", &[1; 21]]),
        ] {
            assert!(handle_frame(&ring, &invalid).is_none());
        }

        assert_eq!(ring.predecessor(), None);
    }
}
