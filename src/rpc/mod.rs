//! Ring RPC plumbing: configuration, framing, transports and the peer client.

pub mod config;
mod info;
mod peer;
pub mod socket;
mod transport;

pub use config::{
    Config, DEFAULT_BITS, DEFAULT_CHECK_PREDECESSOR_INTERVAL, DEFAULT_FIX_FINGERS_INTERVAL,
    DEFAULT_FIX_FINGER_DELAY, DEFAULT_PORT, DEFAULT_REQUEST_TIMEOUT, DEFAULT_STABILIZE_INTERVAL,
};
pub use info::Info;
pub use peer::PeerHandle;
pub use transport::{TcpTransport, Transport, DEFAULT_IDLE_TIMEOUT};
