use std::mem;

use crate::container::{RunCursor, StringContainer};

/// A node of the tournament: the stream id of the comparison *loser* at this
/// position, annotated with the LCP between the losing and winning string of
/// that comparison. That cached value is exactly the loser's LCP against
/// whatever wins further up, which is what lets the next comparison resume
/// where this one stopped instead of rescanning verified prefix bytes.
#[derive(Clone, Copy, Debug)]
struct Node {
    idx: usize,
    lcp: u64,
}

/// LCP-aware k-way tournament (loser) tree.
///
/// Merges `k` sorted runs of one container into a single sorted run while
/// maintaining LCP values. The runtime arity is padded to the next power of
/// two with permanently empty cursors; an empty cursor loses every
/// comparison, which also covers `k = 1` and exhausted streams.
///
/// Layout: one-based arrays of length `cap + 1`. `streams[0]` is a
/// permanently empty cursor, `streams[1..=k]` are the real runs. `nodes[1]`
/// holds the overall winner, `nodes[2..=cap]` hold losers; the conceptual
/// leaf of stream `s` is `cap + s` and the replay path upward is
/// `i -> (i + 1) / 2`.
///
/// Unsorted input streams are a caller bug and are rejected by debug
/// assertions, not by `Result`.
pub struct LcpLoserTree<'a> {
    streams: Vec<RunCursor<'a>>,
    nodes: Vec<Node>,
    cap: usize,
    compressed: bool,
}

impl<'a> LcpLoserTree<'a> {
    /// Builds the tree over `ranges` (offset, size) of `cont`, seeded with a
    /// prefix length the caller already knows all runs to share.
    pub fn new(cont: &'a StringContainer, ranges: &[(usize, usize)], known_common_lcp: u64) -> Self {
        assert!(!ranges.is_empty(), "loser tree needs at least one stream");
        let k = ranges.len();
        let cap = k.next_power_of_two();
        let compressed = cont.is_prefix_compressed();

        let mut streams = Vec::with_capacity(cap + 1);
        streams.push(cont.cursor(0, 0));
        for &(start, size) in ranges {
            debug_assert!(
                compressed || cont.range_is_sorted(start, start + size),
                "input streams must be sorted"
            );
            streams.push(cont.cursor(start, start + size));
        }
        for _ in k..cap {
            streams.push(cont.cursor(0, 0));
        }

        let mut tree = Self {
            streams,
            nodes: vec![Node { idx: 0, lcp: 0 }; cap + 1],
            cap,
            compressed,
        };
        tree.init(known_common_lcp);
        tree
    }

    /// Play one comparison edge: after the call, `defender` holds the losing
    /// stream with `defender.lcp = lcp(loser, winner)` and `contender` holds
    /// the winning stream.
    fn play(streams: &[RunCursor<'a>], compressed: bool, contender: &mut Node, defender: &mut Node) {
        if streams[defender.idx].is_empty() {
            return;
        }
        if streams[contender.idx].is_empty() {
            mem::swap(contender, defender);
            return;
        }

        if defender.lcp > contender.lcp {
            // deeper cached match against the common reference: defender is
            // the smaller string
            mem::swap(contender, defender);
        } else if defender.lcp == contender.lcp {
            // resume the byte comparison where the cached match stopped
            let ds = &streams[defender.idx];
            let cs = &streams[contender.idx];
            let s1 = ds.head();
            let s2 = cs.head();
            let b1 = if compressed { ds.head_lcp() } else { 0 };
            let b2 = if compressed { cs.head_lcp() } else { 0 };
            let l1 = b1 + s1.len() as u64;
            let l2 = b2 + s2.len() as u64;

            let mut lcp = defender.lcp;
            debug_assert!(lcp >= b1 && lcp >= b2);
            while lcp < l1 && lcp < l2 && s1[(lcp - b1) as usize] == s2[(lcp - b2) as usize] {
                lcp += 1;
            }

            let defender_wins = if lcp < l1 && lcp < l2 {
                s1[(lcp - b1) as usize] < s2[(lcp - b2) as usize]
            } else if l1 == l2 {
                // fully equal strings: lower stream id first
                defender.idx < contender.idx
            } else {
                l1 < l2
            };
            if defender_wins {
                mem::swap(contender, defender);
            }
            defender.lcp = lcp;
        }
        // defender.lcp < contender.lcp: winner already determined, no bytes touched
    }

    fn init(&mut self, known_common_lcp: u64) {
        for s in 1..=self.cap {
            let mut contender = Node {
                idx: s,
                lcp: known_common_lcp,
            };
            let mut node = self.cap + s;
            while node % 2 == 0 && node > 2 {
                node >>= 1;
                Self::play(
                    &self.streams,
                    self.compressed,
                    &mut contender,
                    &mut self.nodes[node],
                );
            }
            node = (node + 1) / 2;
            self.nodes[node] = contender;
        }
    }

    /// True once every stream is exhausted.
    pub fn is_done(&self) -> bool {
        self.streams[self.nodes[1].idx].is_empty()
    }

    /// Emits up to `length` strings in sorted order into `out`, writing each
    /// emitted string's LCP relative to the *previous emitted* string.
    ///
    /// Per emitted string, `origins` (when given) records the 0-based input
    /// stream it came from and `saved_lcps` its original intra-stream LCP,
    /// which allows lossless prefix reconstruction after a compressed merge.
    /// Returns the number of strings emitted; short counts mean exhaustion.
    pub fn write_merged(
        &mut self,
        out: &mut StringContainer,
        length: usize,
        mut origins: Option<&mut Vec<u32>>,
        mut saved_lcps: Option<&mut Vec<u64>>,
    ) -> usize {
        let mut emitted = 0;
        while emitted < length {
            let winner = self.nodes[1];
            let w = winner.idx;
            if self.streams[w].is_empty() {
                // empty streams lose every game: an empty winner means all
                // streams are drained
                break;
            }

            if let Some(saved) = saved_lcps.as_deref_mut() {
                saved.push(self.streams[w].head_lcp());
            }
            if let Some(origins) = origins.as_deref_mut() {
                origins.push((w - 1) as u32);
            }
            out.push_with_index(self.streams[w].head(), winner.lcp, self.streams[w].head_index());
            self.streams[w].advance();
            emitted += 1;

            // run the winner stream's next head back up the tree
            let mut contender = winner;
            if !self.streams[w].is_empty() {
                // the just-emitted string was this stream's predecessor, so
                // the in-run LCP is already the LCP against the last output
                contender.lcp = self.streams[w].head_lcp();
            }
            let mut node = self.cap + w;
            while node > 2 {
                node = (node + 1) / 2;
                Self::play(
                    &self.streams,
                    self.compressed,
                    &mut contender,
                    &mut self.nodes[node],
                );
            }
            self.nodes[1] = contender;
        }
        emitted
    }
}
