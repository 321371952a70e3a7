pub mod loser_tree;

pub use loser_tree::LcpLoserTree;

use crate::container::StringContainer;

/// Result of a k-way merge: the sorted output container, the 0-based input
/// stream each output string came from, and (in compressed mode) the
/// original intra-stream LCPs needed to rebuild full strings.
pub struct MergeOutcome {
    pub container: StringContainer,
    pub origins: Vec<u32>,
    pub saved_lcps: Option<Vec<u64>>,
}

/// Merges the consecutive runs of `cont` described by `counts` into a single
/// sorted run. `counts` must cover the container exactly; zero counts are not
/// allowed (drop them before calling). Equal strings come out in run order.
pub fn merge_runs(
    cont: &StringContainer,
    counts: &[usize],
    known_common_lcp: u64,
    save_stream_lcps: bool,
) -> MergeOutcome {
    assert!(!counts.is_empty(), "merge needs at least one run");
    assert_eq!(
        counts.iter().sum::<usize>(),
        cont.len(),
        "run counts must cover the container"
    );

    let mut ranges = Vec::with_capacity(counts.len());
    let mut offset = 0;
    for &count in counts {
        assert!(count > 0, "empty runs must be dropped before merging");
        ranges.push((offset, count));
        offset += count;
    }

    let mut out = StringContainer::with_capacity(cont.len(), cont.char_size(), cont.has_indices());
    if cont.is_prefix_compressed() {
        out.mark_prefix_compressed();
    }
    let mut origins = Vec::with_capacity(cont.len());
    let mut saved = save_stream_lcps.then(|| Vec::with_capacity(cont.len()));

    let mut tree = LcpLoserTree::new(cont, &ranges, known_common_lcp);
    let emitted = tree.write_merged(&mut out, cont.len(), Some(&mut origins), saved.as_mut());
    assert_eq!(emitted, cont.len());

    out.mark_ordered();
    MergeOutcome {
        container: out,
        origins,
        saved_lcps: saved,
    }
}

/// Stable two-way merge of sorted string lists; on ties `a` comes first.
/// This is the sample-merging step of the median selection protocol.
pub fn merge_sorted(a: &[Vec<u8>], b: &[Vec<u8>]) -> Vec<Vec<u8>> {
    debug_assert!(a.is_sorted());
    debug_assert!(b.is_sorted());

    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if b[j] < a[i] {
            out.push(b[j].clone());
            j += 1;
        } else {
            out.push(a[i].clone());
            i += 1;
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}
