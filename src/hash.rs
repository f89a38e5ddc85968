//! Module implement content identifiers and their typed wrappers.
//!
//! A [Hash] is a 32-byte BLAKE3 digest over the canonical serialization
//! of an object. Every hash space gets its own wrapper type, [FileId],
//! [RevisionId] and friends, so that identifiers from different spaces
//! cannot be mixed up by accident. Cross casting is always explicit,
//! through `inner()`/`From`.

use std::{fmt, result, str::FromStr};

use crate::{Error, Result};

/// Width of a content identifier in bytes.
pub const HASH_WIDTH: usize = 32;

/// Fixed-width cryptographic content identifier. Equality is structural.
/// The all-zero value is the distinguished null hash, refer [Hash::null].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash([u8; HASH_WIDTH]);

impl Hash {
    /// Digest arbitrary bytes into an identifier.
    pub fn digest(data: &[u8]) -> Hash {
        Hash(*blake3::hash(data).as_bytes())
    }

    /// The distinguished "no such object" value.
    pub fn null() -> Hash {
        Hash([0; HASH_WIDTH])
    }

    pub fn is_null(&self) -> bool {
        self.0 == [0; HASH_WIDTH]
    }

    pub fn from_bytes(data: &[u8]) -> Result<Hash> {
        if data.len() != HASH_WIDTH {
            err_at!(InvalidInput, msg: "hash width {} != {}", data.len(), HASH_WIDTH)?
        }
        let mut bytes = [0; HASH_WIDTH];
        bytes.copy_from_slice(data);
        Ok(Hash(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Lowercase hex form, the external identifier format.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "{}", &self.to_hex()[..8])
    }
}

impl FromStr for Hash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Hash> {
        let data = err_at!(UserError, hex::decode(s), "bad hex identifier")?;
        Hash::from_bytes(&data)
    }
}

macro_rules! typed_hash {
    ($(#[$attr:meta])* $type:ident) => {
        $(#[$attr])*
        #[derive(
            Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
        )]
        pub struct $type(pub Hash);

        impl $type {
            pub fn digest(data: &[u8]) -> $type {
                $type(Hash::digest(data))
            }

            pub fn null() -> $type {
                $type(Hash::null())
            }

            pub fn is_null(&self) -> bool {
                self.0.is_null()
            }

            pub fn inner(&self) -> Hash {
                self.0
            }

            pub fn to_hex(&self) -> String {
                self.0.to_hex()
            }
        }

        impl From<Hash> for $type {
            fn from(hash: Hash) -> $type {
                $type(hash)
            }
        }

        impl fmt::Display for $type {
            fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $type {
            fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
                write!(f, concat!(stringify!($type), "({:?})"), self.0)
            }
        }

        impl FromStr for $type {
            type Err = Error;

            fn from_str(s: &str) -> Result<$type> {
                Ok($type(Hash::from_str(s)?))
            }
        }
    };
}

typed_hash!(
    /// Identifier for file content blobs.
    FileId
);
typed_hash!(
    /// Identifier for the manifest form of a roster, the restricted
    /// serialization without markings.
    ManifestId
);
typed_hash!(
    /// Identifier for the full roster serialization, markings included.
    RosterId
);
typed_hash!(
    /// Identifier for a revision, the hash of its canonical serialization.
    RevisionId
);
typed_hash!(
    /// Identifier for a public key, the hash of its stored key data.
    KeyId
);
typed_hash!(
    /// Identifier for a cert, the hash of its canonical signable encoding.
    CertId
);
typed_hash!(
    /// Identifier for a branch epoch.
    EpochId
);

/// First node identifier handed out by the persistent counter.
pub const FIRST_NODE: u64 = 1;

/// Start of the temporary node range, used for merge scratch rosters.
/// Identifiers at or above this value must never be persisted.
pub const FIRST_TEMP_NODE: u64 = 1 << 63;

/// Dense identifier for a tree node within the revision graph.
///
/// Node ids are allocated from a monotonically increasing counter
/// persisted in the database. A disjoint temporary range exists for
/// merge scratch rosters, refer [FIRST_TEMP_NODE]. Zero is the
/// reserved null node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeId(pub u64);

impl NodeId {
    pub fn null() -> NodeId {
        NodeId(0)
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    pub fn is_temp(&self) -> bool {
        self.0 >= FIRST_TEMP_NODE
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        if self.is_temp() {
            write!(f, "NodeId(t{})", self.0 - FIRST_TEMP_NODE)
        } else {
            write!(f, "NodeId({})", self.0)
        }
    }
}

#[cfg(test)]
#[path = "hash_test.rs"]
mod hash_test;
