//! Chord node Id or a lookup target, a point on the `2^m` identifier ring.
use rand::Rng;
use std::fmt::{self, Debug, Display, Formatter};

use crate::{Error, Result};

/// The size of node IDs in bytes.
pub const ID_SIZE: usize = 20;
/// Widest supported ring, the full SHA-1 digest.
pub const MAX_BITS: u32 = ID_SIZE as u32 * 8;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// Chord node Id or a lookup target, stored as a big-endian unsigned integer.
///
/// Ids of a ring of width `m` are always reduced modulo `2^m`, so plain byte
/// ordering is the integer ordering. Ring position tests must still go through
/// [in_open_closed] and [in_open_open] to account for wraparound.
pub struct Id(pub [u8; ID_SIZE]);

impl Id {
    pub fn random() -> Id {
        let mut rng = rand::thread_rng();
        let random_bytes: [u8; ID_SIZE] = rng.gen();

        Id(random_bytes)
    }

    /// SHA-1 of `data` interpreted as a big-endian integer.
    pub fn hash<T: AsRef<[u8]>>(data: T) -> Id {
        Id(sha1_smol::Sha1::from(data).digest().bytes())
    }

    /// Id of the node reachable at `ip:port` on a ring of `bits` width.
    pub fn for_node(ip: &str, port: u16, bits: u32) -> Id {
        Id::hash(format!("{ip}:{port}")).masked(bits)
    }

    /// Create a new Id from big-endian bytes, shorter inputs are left padded.
    /// Returns Err if `bytes` is empty or longer than [ID_SIZE].
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Id> {
        let bytes = bytes.as_ref();
        if bytes.is_empty() || bytes.len() > ID_SIZE {
            return Err(Error::InvalidIdSize(bytes.len()));
        }

        let mut tmp: [u8; ID_SIZE] = [0; ID_SIZE];
        tmp[ID_SIZE - bytes.len()..].copy_from_slice(bytes);

        Ok(Id(tmp))
    }

    /// `2^exponent`, `exponent` must be lower than [MAX_BITS].
    pub fn pow2(exponent: u32) -> Id {
        debug_assert!(exponent < MAX_BITS);

        let mut bytes = [0; ID_SIZE];
        bytes[ID_SIZE - 1 - (exponent / 8) as usize] = 1 << (exponent % 8);

        Id(bytes)
    }

    /// Reduce this Id modulo `2^bits`.
    pub fn masked(mut self, bits: u32) -> Id {
        let cleared = (MAX_BITS - bits.min(MAX_BITS)) as usize;
        let full_bytes = cleared / 8;

        for byte in &mut self.0[..full_bytes] {
            *byte = 0;
        }

        let remaining = cleared % 8;
        if remaining > 0 {
            self.0[full_bytes] &= 0xff >> remaining;
        }

        self
    }

    /// Addition modulo `2^160`.
    pub fn wrapping_add(&self, other: &Id) -> Id {
        let mut out = [0; ID_SIZE];
        let mut carry = 0u16;

        for i in (0..ID_SIZE).rev() {
            let sum = self.0[i] as u16 + other.0[i] as u16 + carry;
            out[i] = sum as u8;
            carry = sum >> 8;
        }

        Id(out)
    }

    /// Start of the `index`th finger interval: `(self + 2^index) mod 2^bits`.
    pub fn finger_start(&self, index: u32, bits: u32) -> Id {
        self.wrapping_add(&Id::pow2(index)).masked(bits)
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }
}

/// Whether `k` lies in `(start, end]` walking clockwise from `start`.
///
/// `start == end` denotes the whole ring, so every `k` matches.
pub fn in_open_closed(k: &Id, start: &Id, end: &Id) -> bool {
    if start == end {
        return true;
    }

    if start < end {
        start < k && k <= end
    } else {
        k > start || k <= end
    }
}

/// Whether `k` lies in `(start, end)` walking clockwise from `start`.
///
/// `start == end` denotes the whole ring except `start` itself.
pub fn in_open_open(k: &Id, start: &Id, end: &Id) -> bool {
    if start == end {
        return k != start;
    }

    if start < end {
        start < k && k < end
    } else {
        k > start || k < end
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }

        Ok(())
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({self})")
    }
}
