#![doc = include_str!("../README.md")]

// Public modules
mod common;

mod error;
mod node;
pub mod rpc;
mod server;
mod testnet;

pub use crate::common::{in_open_closed, in_open_open, messages, Id, Node, ID_SIZE, MAX_BITS};
pub use bytes::Bytes;
pub use error::{Error, Result};
pub use node::{ChordBuilder, ChordNode};
pub use testnet::Testnet;
