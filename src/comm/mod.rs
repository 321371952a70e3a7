pub mod local;
pub mod message;

pub use local::LocalComm;
pub use message::{MessageConfig, StringMessage};

use crate::error::CommError;

pub type Tag = u64;

/// Tag allocation for the protocols layered on one communicator.
///
/// Every logical exchange owns a stride of tags so its sub-messages (chars,
/// indices, LCPs) and any concurrently pending protocol never collide on a
/// `(sender, tag)` pair. FIFO per `(sender, tag)` then guarantees correct
/// correlation.
pub mod tags {
    use super::Tag;

    pub const SPLIT_BASE: Tag = 16;
    pub const LCP_AVERAGE: Tag = 512;
    pub const APPLY_SCAN: Tag = 768;

    pub fn split(level: usize) -> Tag {
        SPLIT_BASE + 2 * level as Tag
    }

    pub fn partition(level: usize, splitter: usize) -> Tag {
        1_024 + 4_096 * level as Tag + 16 * splitter as Tag
    }

    pub fn exchange(level: usize) -> Tag {
        1_048_576 + 16 * level as Tag
    }

    pub fn apply(depth: usize) -> Tag {
        2_097_152 + 16 * depth as Tag
    }
}

/// Point-to-point communication substrate for one process group.
///
/// Implementations provide ranks, sized receive (backed by probing), FIFO
/// delivery per `(sender, tag)`, and group splitting; the collectives the
/// sort protocols need are derived from those primitives below. All calls
/// block until locally complete, and every failure is fatal to the whole
/// computation; there is no retry.
pub trait Communicator: Clone {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    fn send(&self, dest: usize, tag: Tag, payload: &[u8]) -> Result<(), CommError>;
    fn recv(&self, src: usize, tag: Tag) -> Result<Vec<u8>, CommError>;

    /// Size of the next matching message without consuming it.
    fn probe(&self, src: usize, tag: Tag) -> Result<usize, CommError>;

    /// Splits into disjoint subgroups: one group per `color`, members
    /// ordered by `(key, parent rank)`. Collective over the whole group.
    fn split(&self, color: usize, key: usize, tag: Tag) -> Result<Self, CommError>;

    fn bcast(&self, root: usize, tag: Tag, payload: Option<&[u8]>) -> Result<Vec<u8>, CommError> {
        if self.rank() == root {
            let data = payload.expect("broadcast root must supply a payload");
            for dest in 0..self.size() {
                if dest != root {
                    self.send(dest, tag, data)?;
                }
            }
            Ok(data.to_vec())
        } else {
            self.recv(root, tag)
        }
    }

    /// Personalized all-to-all: `parts[d]` goes to rank `d`; returns one
    /// payload per source rank. Self-delivery included.
    fn alltoallv(&self, parts: &[Vec<u8>], tag: Tag) -> Result<Vec<Vec<u8>>, CommError> {
        assert_eq!(parts.len(), self.size(), "one payload per destination");
        for (dest, part) in parts.iter().enumerate() {
            self.send(dest, tag, part)?;
        }
        (0..self.size()).map(|src| self.recv(src, tag)).collect()
    }

    fn allgather_u64(&self, value: u64, tag: Tag) -> Result<Vec<u64>, CommError> {
        let bytes = value.to_le_bytes();
        for dest in 0..self.size() {
            self.send(dest, tag, &bytes)?;
        }
        let mut out = Vec::with_capacity(self.size());
        for src in 0..self.size() {
            let payload = self.recv(src, tag)?;
            let arr: [u8; 8] = payload
                .as_slice()
                .try_into()
                .map_err(|_| CommError::MalformedPayload {
                    rank: src,
                    reason: "expected an 8-byte value",
                })?;
            out.push(u64::from_le_bytes(arr));
        }
        Ok(out)
    }

    /// Exclusive prefix sum over ranks; rank 0 gets 0.
    fn exscan_sum(&self, value: u64, tag: Tag) -> Result<u64, CommError> {
        let all = self.allgather_u64(value, tag)?;
        Ok(all[..self.rank()].iter().sum())
    }

    fn allreduce_sum(&self, value: u64, tag: Tag) -> Result<u64, CommError> {
        let all = self.allgather_u64(value, tag)?;
        Ok(all.iter().sum())
    }
}

pub(crate) fn u64s_to_bytes(values: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 8);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub(crate) fn bytes_to_u64s(bytes: &[u8], src: usize) -> Result<Vec<u64>, CommError> {
    if bytes.len() % 8 != 0 {
        return Err(CommError::MalformedPayload {
            rank: src,
            reason: "u64 array payload not a multiple of 8 bytes",
        });
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
        .collect())
}
