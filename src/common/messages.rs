//! Chord wire protocol: operation codes and multipart message shapes.
//!
//! Every request starts with the [CHORD_SUBSYSTEM] tag followed by an
//! [Opcode] and its arguments. Ids travel as raw big-endian bytes, node
//! references as two parts: the UTF-8 ip and a 2 byte big-endian port.

use bytes::Bytes;

use crate::common::{Id, Node};
use crate::{Error, Result};

/// An ordered list of byte parts sent as one message.
pub type Frame = Vec<Bytes>;

/// Tag prefixed to every Chord request.
pub const CHORD_SUBSYSTEM: &[u8] = b"Chord";

pub const FIND_SUCCESSOR: &[u8] = b"Find_S";
pub const FIND_PREDECESSOR: &[u8] = b"Find_P";
pub const GET_SUCCESSOR: &[u8] = b"Get_S";
pub const GET_PREDECESSOR: &[u8] = b"Get_P";
pub const NOTIFY: &[u8] = b"Notify";
pub const PING: &[u8] = b"Ping";
pub const CLOSEST_PRECEDING_FINGER: &[u8] = b"Closest_PF";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    FindSuccessor,
    FindPredecessor,
    GetSuccessor,
    GetPredecessor,
    Notify,
    Ping,
    ClosestPrecedingFinger,
}

impl Opcode {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Opcode::FindSuccessor => FIND_SUCCESSOR,
            Opcode::FindPredecessor => FIND_PREDECESSOR,
            Opcode::GetSuccessor => GET_SUCCESSOR,
            Opcode::GetPredecessor => GET_PREDECESSOR,
            Opcode::Notify => NOTIFY,
            Opcode::Ping => PING,
            Opcode::ClosestPrecedingFinger => CLOSEST_PRECEDING_FINGER,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Opcode> {
        Ok(match bytes {
            FIND_SUCCESSOR => Opcode::FindSuccessor,
            FIND_PREDECESSOR => Opcode::FindPredecessor,
            GET_SUCCESSOR => Opcode::GetSuccessor,
            GET_PREDECESSOR => Opcode::GetPredecessor,
            NOTIFY => Opcode::Notify,
            PING => Opcode::Ping,
            CLOSEST_PRECEDING_FINGER => Opcode::ClosestPrecedingFinger,
            other => return Err(Error::UnsupportedOperation(other.to_vec())),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Opcode::FindSuccessor => "FIND_SUCCESSOR",
            Opcode::FindPredecessor => "FIND_PREDECESSOR",
            Opcode::GetSuccessor => "GET_SUCCESSOR",
            Opcode::GetPredecessor => "GET_PREDECESSOR",
            Opcode::Notify => "NOTIFY",
            Opcode::Ping => "PING",
            Opcode::ClosestPrecedingFinger => "CLOSEST_PRECEDING_FINGER",
        }
    }

    /// Number of argument parts following the opcode.
    fn arity(&self) -> usize {
        match self {
            Opcode::FindSuccessor | Opcode::FindPredecessor | Opcode::ClosestPrecedingFinger => 1,
            Opcode::Notify => 2,
            Opcode::GetSuccessor | Opcode::GetPredecessor | Opcode::Ping => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    FindSuccessor(Id),
    FindPredecessor(Id),
    GetSuccessor,
    GetPredecessor,
    Notify { ip: String, port: u16 },
    Ping,
    ClosestPrecedingFinger(Id),
}

impl Request {
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::FindSuccessor(_) => Opcode::FindSuccessor,
            Request::FindPredecessor(_) => Opcode::FindPredecessor,
            Request::GetSuccessor => Opcode::GetSuccessor,
            Request::GetPredecessor => Opcode::GetPredecessor,
            Request::Notify { .. } => Opcode::Notify,
            Request::Ping => Opcode::Ping,
            Request::ClosestPrecedingFinger(_) => Opcode::ClosestPrecedingFinger,
        }
    }

    /// `[Chord, opcode, ...args]`
    pub fn to_frame(&self) -> Frame {
        let mut frame = vec![
            Bytes::from_static(CHORD_SUBSYSTEM),
            Bytes::from_static(self.opcode().as_bytes()),
        ];

        match self {
            Request::FindSuccessor(id)
            | Request::FindPredecessor(id)
            | Request::ClosestPrecedingFinger(id) => frame.push(encode_id(id)),
            Request::Notify { ip, port } => frame.extend(encode_node(ip, *port)),
            Request::GetSuccessor | Request::GetPredecessor | Request::Ping => {}
        }

        frame
    }

    /// Parses `[Chord, opcode, ...args]`.
    pub fn from_parts(parts: &[Bytes]) -> Result<Request> {
        let (subsystem, rest) = parts.split_first().ok_or(Error::EmptyFrame)?;
        if subsystem.as_ref() != CHORD_SUBSYSTEM {
            return Err(Error::WrongSubsystem(subsystem.to_vec()));
        }

        let (operation, args) = rest.split_first().ok_or(Error::MalformedRequest {
            operation: "<missing opcode>",
            expected: 1,
            got: 0,
        })?;
        let opcode = Opcode::from_bytes(operation)?;

        if args.len() != opcode.arity() {
            return Err(Error::MalformedRequest {
                operation: opcode.name(),
                expected: opcode.arity(),
                got: args.len(),
            });
        }

        Ok(match opcode {
            Opcode::FindSuccessor => Request::FindSuccessor(Id::from_bytes(&args[0])?),
            Opcode::FindPredecessor => Request::FindPredecessor(Id::from_bytes(&args[0])?),
            Opcode::ClosestPrecedingFinger => {
                Request::ClosestPrecedingFinger(Id::from_bytes(&args[0])?)
            }
            Opcode::Notify => {
                let (ip, port) = decode_node(args)?;
                Request::Notify { ip, port }
            }
            Opcode::GetSuccessor => Request::GetSuccessor,
            Opcode::GetPredecessor => Request::GetPredecessor,
            Opcode::Ping => Request::Ping,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// `[ip, port]`
    Node { ip: String, port: u16 },
    /// `[""]`
    Pong,
}

impl Response {
    pub fn node(node: &Node) -> Response {
        Response::Node {
            ip: node.ip().to_string(),
            port: node.port(),
        }
    }

    pub fn to_parts(&self) -> Frame {
        match self {
            Response::Node { ip, port } => encode_node(ip, *port).to_vec(),
            Response::Pong => vec![Bytes::new()],
        }
    }
}

/// An inbound request and the routing address its reply goes back to.
///
/// Requests arrive either directly as `[Chord, opcode, ...]` or multiplexed
/// through a shared endpoint as `[client_address, Chord, opcode, ...]`.
///
/// A frame is multiplexed whenever its second part is the `Chord` tag, so a
/// client address that is itself `Chord` is still routed back. No opcode is
/// named `Chord`, which keeps direct frames unambiguous.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub return_address: Option<Bytes>,
    pub request: Request,
}

impl Envelope {
    pub fn from_frame(frame: &[Bytes]) -> Result<Envelope> {
        match frame {
            [] => Err(Error::EmptyFrame),
            [_, second, ..] if second.as_ref() == CHORD_SUBSYSTEM => Ok(Envelope {
                return_address: Some(frame[0].clone()),
                request: Request::from_parts(&frame[1..])?,
            }),
            [first, ..] if first.as_ref() == CHORD_SUBSYSTEM => Ok(Envelope {
                return_address: None,
                request: Request::from_parts(frame)?,
            }),
            [address, rest @ ..] => Ok(Envelope {
                return_address: Some(address.clone()),
                request: Request::from_parts(rest)?,
            }),
        }
    }

    /// Response frame addressed to whoever sent this request.
    pub fn reply(&self, response: &Response) -> Frame {
        let mut frame = Vec::with_capacity(3);

        if let Some(address) = &self.return_address {
            frame.push(address.clone());
        }
        frame.extend(response.to_parts());

        frame
    }
}

pub fn encode_id(id: &Id) -> Bytes {
    Bytes::copy_from_slice(id.as_bytes())
}

pub fn encode_node(ip: &str, port: u16) -> [Bytes; 2] {
    [
        Bytes::copy_from_slice(ip.as_bytes()),
        Bytes::copy_from_slice(&port.to_be_bytes()),
    ]
}

/// Decodes a `[ip, port]` pair.
pub fn decode_node(parts: &[Bytes]) -> Result<(String, u16)> {
    if parts.len() != 2 {
        return Err(Error::MalformedRequest {
            operation: "node reference",
            expected: 2,
            got: parts.len(),
        });
    }

    let ip = std::str::from_utf8(&parts[0])
        .map_err(|_| Error::InvalidUtf8)?
        .to_string();

    Ok((ip, decode_port(&parts[1])?))
}

/// Big-endian port, 1 or 2 bytes.
pub fn decode_port(bytes: &[u8]) -> Result<u16> {
    match *bytes {
        [low] => Ok(low as u16),
        [high, low] => Ok(u16::from_be_bytes([high, low])),
        _ => Err(Error::InvalidPortSize(bytes.len())),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parts(raw: &[&[u8]]) -> Frame {
        raw.iter().map(|p| Bytes::copy_from_slice(p)).collect()
    }

    #[test]
    fn opcodes() {
        for opcode in [
            Opcode::FindSuccessor,
            Opcode::FindPredecessor,
            Opcode::GetSuccessor,
            Opcode::GetPredecessor,
            Opcode::Notify,
            Opcode::Ping,
            Opcode::ClosestPrecedingFinger,
        ] {
            assert_eq!(Opcode::from_bytes(opcode.as_bytes()).unwrap(), opcode);
        }

        assert!(matches!(
            Opcode::from_bytes(b"Store_K"),
            Err(Error::UnsupportedOperation(op)) if op == b"Store_K"
        ));
    }

    #[test]
    fn request_frame_shape() {
        let id = Id::hash("key");
        let frame = Request::FindSuccessor(id).to_frame();

        assert_eq!(frame.len(), 3);
        assert_eq!(frame[0].as_ref(), b"Chord");
        assert_eq!(frame[1].as_ref(), b"Find_S");
        assert_eq!(frame[2].as_ref(), id.as_bytes());

        assert_eq!(Request::from_parts(&frame).unwrap(), Request::FindSuccessor(id));
        assert_eq!(Request::Ping.to_frame(), parts(&[b"Chord", b"Ping"]));
    }

    #[test]
    fn node_reference_round_trip() {
        let node = Node::new("192.168.1.20", 8001, 160);
        let request = Request::Notify {
            ip: node.ip().to_string(),
            port: node.port(),
        };

        let frame = request.to_frame();
        assert_eq!(frame[3].as_ref(), &[0x1f, 0x41]);

        match Request::from_parts(&frame).unwrap() {
            Request::Notify { ip, port } => {
                assert_eq!(Node::new(ip, port, 160).id(), node.id());
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn short_ids_and_ports_are_padded() {
        let request = Request::from_parts(&parts(&[b"Chord", b"Closest_PF", &[1, 0]])).unwrap();

        assert_eq!(
            request,
            Request::ClosestPrecedingFinger(Id::from_bytes([1, 0]).unwrap())
        );
        assert_eq!(decode_port(&[80]).unwrap(), 80);
        assert!(matches!(decode_port(&[0, 0, 80]), Err(Error::InvalidPortSize(3))));
    }

    #[test]
    fn malformed_requests() {
        assert!(matches!(
            Request::from_parts(&parts(&[b"Storage", b"Ping"])),
            Err(Error::WrongSubsystem(_))
        ));
        assert!(matches!(
            Request::from_parts(&parts(&[b"Chord", b"Notify", b"127.0.0.1"])),
            Err(Error::MalformedRequest {
                operation: "NOTIFY",
                expected: 2,
                got: 1
            })
        ));
        assert!(matches!(
            Request::from_parts(&parts(&[b"Chord", b"Find_S"])),
            Err(Error::MalformedRequest { got: 0, .. })
        ));
        assert!(matches!(
            Request::from_parts(&parts(&[b"Chord", b"Notify", &[0xff, 0xfe], &[1]])),
            Err(Error::InvalidUtf8)
        ));
        assert!(matches!(Request::from_parts(&[]), Err(Error::EmptyFrame)));
    }

    #[test]
    fn envelope_direct_and_multiplexed() {
        let direct = Envelope::from_frame(&parts(&[b"Chord", b"Get_P"])).unwrap();
        assert_eq!(direct.return_address, None);
        assert_eq!(direct.request, Request::GetPredecessor);
        assert_eq!(direct.reply(&Response::Pong), parts(&[b""]));

        let routed = Envelope::from_frame(&parts(&[&[0, 0, 0, 0, 7], b"Chord", b"Ping"])).unwrap();
        assert_eq!(routed.request, Request::Ping);
        assert_eq!(
            routed.reply(&Response::Node {
                ip: "10.0.0.1".into(),
                port: 8001
            }),
            parts(&[&[0, 0, 0, 0, 7], b"10.0.0.1", &[0x1f, 0x41]])
        );

        assert!(matches!(
            Envelope::from_frame(&parts(&[&[1], b"Other", b"Ping"])),
            Err(Error::WrongSubsystem(_))
        ));
    }

    #[test]
    fn client_address_equal_to_the_subsystem_tag() {
        let routed = Envelope::from_frame(&parts(&[b"Chord", b"Chord", b"Get_S"])).unwrap();

        assert_eq!(routed.return_address, Some(Bytes::from_static(b"Chord")));
        assert_eq!(routed.request, Request::GetSuccessor);
        assert_eq!(
            routed.reply(&Response::Pong),
            parts(&[b"Chord", b""])
        );
    }
}
