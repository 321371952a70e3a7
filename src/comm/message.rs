use std::ops::Range;

use super::{Communicator, Tag, bytes_to_u64s, u64s_to_bytes};
use crate::container::StringContainer;
use crate::error::CommError;

/// Which optional arrays a message batch carries. Decided once per protocol
/// step; sender and receiver must agree.
#[derive(Clone, Copy, Debug, Default)]
pub struct MessageConfig {
    pub with_indices: bool,
    pub with_lcps: bool,
}

/// One batch of strings in wire form: the character buffer with a single
/// terminator byte after each string, optionally a parallel array of 64-bit
/// source indices, optionally a parallel array of LCP values (each entry
/// meaningful only relative to the preceding string of the same batch).
///
/// The three arrays travel as separate sub-messages on `tag`, `tag + 1` and
/// `tag + 2`, correlated by the FIFO guarantee of the substrate. When LCPs
/// are omitted the receiving container is left unordered, which forces
/// recomputation; absent LCPs are unknown, never zero.
pub struct StringMessage {
    pub raw: Vec<u8>,
    pub indices: Option<Vec<u64>>,
    pub lcps: Option<Vec<u64>>,
}

impl StringMessage {
    pub fn num_strings(&self) -> usize {
        if let Some(indices) = &self.indices {
            indices.len()
        } else if let Some(lcps) = &self.lcps {
            lcps.len()
        } else {
            self.raw.iter().filter(|&&b| b == 0).count()
        }
    }

    /// Serializes the strings of `range` out of a sorted container. The
    /// first string of the batch gets LCP 0: its in-container predecessor
    /// does not travel with it. With `compress` set, every string is sent
    /// without its LCP-with-predecessor bytes (the batch head in full).
    pub fn from_container(
        cont: &StringContainer,
        range: Range<usize>,
        config: MessageConfig,
        compress: bool,
    ) -> Self {
        assert!(
            !compress || (config.with_lcps && cont.is_ordered()),
            "prefix compression requires valid LCPs on both ends"
        );

        let mut raw = Vec::new();
        let mut indices = config.with_indices.then(Vec::new);
        let mut lcps = config.with_lcps.then(Vec::new);

        for i in range.clone() {
            let lcp = if i == range.start { 0 } else { cont.lcp(i) };
            let s = cont.str_at(i);
            let strip = if compress { lcp as usize } else { 0 };
            raw.extend_from_slice(&s[strip..]);
            raw.push(0);
            if let Some(indices) = &mut indices {
                indices.push(
                    cont.index_at(i)
                        .expect("message config asks for indices the container lacks"),
                );
            }
            if let Some(lcps) = &mut lcps {
                lcps.push(lcp);
            }
        }

        StringMessage { raw, indices, lcps }
    }

    pub fn from_strings(strings: &[Vec<u8>]) -> Self {
        let mut raw = Vec::with_capacity(strings.iter().map(|s| s.len() + 1).sum());
        for s in strings {
            debug_assert!(!s.contains(&0));
            raw.extend_from_slice(s);
            raw.push(0);
        }
        StringMessage {
            raw,
            indices: None,
            lcps: None,
        }
    }

    pub fn to_strings(&self) -> Vec<Vec<u8>> {
        self.raw
            .split(|&b| b == 0)
            .take(self.num_strings())
            .map(|s| s.to_vec())
            .collect()
    }

    pub fn send<C: Communicator>(&self, comm: &C, dest: usize, tag: Tag) -> Result<(), CommError> {
        comm.send(dest, tag, &self.raw)?;
        if let Some(indices) = &self.indices {
            comm.send(dest, tag + 1, &u64s_to_bytes(indices))?;
        }
        if let Some(lcps) = &self.lcps {
            comm.send(dest, tag + 2, &u64s_to_bytes(lcps))?;
        }
        Ok(())
    }

    pub fn recv<C: Communicator>(
        comm: &C,
        src: usize,
        tag: Tag,
        config: MessageConfig,
    ) -> Result<Self, CommError> {
        let raw = comm.recv(src, tag)?;
        let indices = if config.with_indices {
            Some(bytes_to_u64s(&comm.recv(src, tag + 1)?, src)?)
        } else {
            None
        };
        let lcps = if config.with_lcps {
            Some(bytes_to_u64s(&comm.recv(src, tag + 2)?, src)?)
        } else {
            None
        };
        let msg = StringMessage { raw, indices, lcps };
        msg.check_counts(src)?;
        Ok(msg)
    }

    /// The parallel arrays must always agree on the string count.
    pub(crate) fn check_counts(&self, src: usize) -> Result<(), CommError> {
        let terminators = self.raw.iter().filter(|&&b| b == 0).count();
        let consistent = self.indices.as_ref().is_none_or(|ix| ix.len() == terminators)
            && self.lcps.as_ref().is_none_or(|l| l.len() == terminators)
            && self.raw.last().is_none_or(|&b| b == 0);
        if consistent {
            Ok(())
        } else {
            Err(CommError::MalformedPayload {
                rank: src,
                reason: "sub-message counts disagree",
            })
        }
    }

    /// Appends this batch to a container as one run. Returns the number of
    /// strings appended. Without LCPs the batch is appended with zeroed
    /// entries and the container stays unordered (recompute before merging).
    pub fn append_to(&self, cont: &mut StringContainer) -> usize {
        let count = self.num_strings();
        let mut offset = 0;
        for i in 0..count {
            let end = offset
                + self.raw[offset..]
                    .iter()
                    .position(|&b| b == 0)
                    .expect("terminator count already validated");
            let lcp = match (&self.lcps, i) {
                (_, 0) => 0, // run boundary: predecessor lives on another process
                (Some(lcps), _) => lcps[i],
                (None, _) => 0,
            };
            let index = self.indices.as_ref().map(|ix| ix[i]);
            cont.push_with_index(&self.raw[offset..end], lcp, index);
            offset = end + 1;
        }
        count
    }
}
