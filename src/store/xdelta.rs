//! Module implement compact byte deltas between two blob versions.
//!
//! A delta is a sequence of instructions, either copy a run out of the
//! source version or insert literal bytes. Matching runs are found with
//! a block-hash table over the source, the computation is deterministic
//! so the same `(old, new)` pair always serializes to the same delta.

use cbordata::Cborize;

use std::{collections::HashMap, convert::TryFrom};

use crate::{util, Result};

const DELTA_VER: u32 = 0x0030_0001;

// Block granularity of the source hash table.
const BLOCK: usize = 64;

#[derive(Clone, Debug, Eq, PartialEq, Cborize)]
pub enum Insn {
    Copy { off: u64, len: u64 },
    Insert { data: Vec<u8> },
}

impl Insn {
    const ID: u32 = DELTA_VER;
}

/// Edit script recovering one version from another.
#[derive(Clone, Debug, Eq, PartialEq, Cborize)]
pub struct Delta {
    insns: Vec<Insn>,
}

impl Delta {
    pub const ID: u32 = DELTA_VER;

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        util::into_cbor_bytes(self.clone())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Delta> {
        Ok(util::from_cbor_bytes::<Delta>(data)?.0)
    }

    /// Serialized footprint estimate, used to decide nothing; kept for
    /// observability.
    pub fn len_insns(&self) -> usize {
        self.insns.len()
    }
}

/// Compute the delta turning `old` into `new`.
pub fn diff(old: &[u8], new: &[u8]) -> Delta {
    let mut blocks: HashMap<u64, Vec<usize>> = HashMap::new();
    let mut off = 0;
    while off + BLOCK <= old.len() {
        let hash = util::checksum(&old[off..off + BLOCK]);
        blocks.entry(hash).or_insert_with(Vec::new).push(off);
        off += BLOCK;
    }

    let mut insns = vec![];
    let mut pending: Vec<u8> = vec![];
    let mut pos = 0;
    while pos < new.len() {
        let matched = if pos + BLOCK <= new.len() {
            let hash = util::checksum(&new[pos..pos + BLOCK]);
            match blocks.get(&hash) {
                Some(candidates) => candidates
                    .iter()
                    .find(|off| old[**off..**off + BLOCK] == new[pos..pos + BLOCK])
                    .copied(),
                None => None,
            }
        } else {
            None
        };

        match matched {
            Some(off) => {
                // extend the match forward as far as bytes agree.
                let mut len = BLOCK;
                while off + len < old.len()
                    && pos + len < new.len()
                    && old[off + len] == new[pos + len]
                {
                    len += 1;
                }
                if !pending.is_empty() {
                    insns.push(Insn::Insert { data: std::mem::take(&mut pending) });
                }
                insns.push(Insn::Copy { off: off as u64, len: len as u64 });
                pos += len;
            }
            None => {
                pending.push(new[pos]);
                pos += 1;
            }
        }
    }
    if !pending.is_empty() {
        insns.push(Insn::Insert { data: pending });
    }

    Delta { insns }
}

/// Apply `delta` to `base`, producing the target version.
pub fn patch(base: &[u8], delta: &Delta) -> Result<Vec<u8>> {
    let mut out = vec![];
    for insn in delta.insns.iter() {
        match insn {
            Insn::Copy { off, len } => {
                let off = err_at!(FailConvert, usize::try_from(*off))?;
                let len = err_at!(FailConvert, usize::try_from(*len))?;
                match base.get(off..off + len) {
                    Some(run) => out.extend_from_slice(run),
                    None => err_at!(
                        Corrupt, msg: "delta copy {}+{} outside base {}", off, len, base.len()
                    )?,
                }
            }
            Insn::Insert { data } => out.extend_from_slice(data),
        }
    }
    Ok(out)
}

/// Given `old` and a delta `old -> new`, materialize `new` and the
/// inverse delta `new -> old`.
pub fn invert(old: &[u8], delta: &Delta) -> Result<(Vec<u8>, Delta)> {
    let new = patch(old, delta)?;
    let reverse = diff(&new, old);
    Ok((new, reverse))
}

#[cfg(test)]
#[path = "xdelta_test.rs"]
mod xdelta_test;
