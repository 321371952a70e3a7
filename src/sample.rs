use crate::container::StringContainer;

/// Splitter candidates for the `part`-th of `groups` boundaries: a window of
/// up to `bound` strings centered on the local `part/groups` quantile of a
/// sorted run, optionally truncated to `max_len` bytes. The window is itself
/// sorted, and truncation keeps it sorted because prefix truncation is
/// order-preserving.
pub fn quantile_window(
    cont: &StringContainer,
    part: usize,
    groups: usize,
    bound: usize,
    max_len: Option<usize>,
) -> Vec<Vec<u8>> {
    assert!(groups > 1 && part > 0 && part < groups, "interior quantiles only");
    assert!(bound > 0);
    debug_assert!(cont.is_ordered() || cont.len() <= 1);

    let len = cont.len();
    if len == 0 {
        return Vec::new();
    }

    let take = bound.min(len);
    let center = len * part / groups;
    let lo = center.saturating_sub(take / 2).min(len - take);

    (lo..lo + take)
        .map(|i| {
            let s = cont.str_at(i);
            let cut = max_len.map_or(s.len(), |m| m.min(s.len()));
            s[..cut].to_vec()
        })
        .collect()
}

/// Classifies a sorted run against ordered splitters: returns one interval
/// size per bucket (`splitters.len() + 1` of them) covering `[0, len)`.
/// Strings equal to a splitter go to the bucket right of it.
pub fn partition_by_splitters(cont: &StringContainer, splitters: &[Vec<u8>]) -> Vec<usize> {
    debug_assert!(cont.is_ordered() || cont.len() <= 1);

    let mut sizes = Vec::with_capacity(splitters.len() + 1);
    let mut prev = 0;
    for splitter in splitters {
        let bound = lower_bound(cont, prev, splitter);
        sizes.push(bound - prev);
        prev = bound;
    }
    sizes.push(cont.len() - prev);
    sizes
}

/// First position in `[from, len)` whose string is not less than `key`.
fn lower_bound(cont: &StringContainer, from: usize, key: &[u8]) -> usize {
    let mut lo = from;
    let mut hi = cont.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if cont.str_at(mid) < key {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}
