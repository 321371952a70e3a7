use crate::comm::{Communicator, MessageConfig, StringMessage, Tag};
use crate::error::CommError;
use crate::merge::merge_sorted;
use crate::rand::BitSource;

/// Binary-tree median selection.
///
/// Every participant holds a locally sorted sample of at most `n` strings;
/// the group cooperatively computes one representative median string, which
/// every rank returns. The reduction is a binomial tree keyed by the rank's
/// trailing zero bits: rank `r > 0` absorbs partners `r + 2^it` for
/// `it < trailing_zeros(r)` and then forwards its running sample to
/// `r - 2^trailing_zeros(r)`; rank 0 runs `ceil(log2(size))` iterations and
/// ends up holding a sample of the whole group, takes its median, and
/// broadcasts it. `O(log size)` rounds, at most `n` strings held per rank at
/// any step.
///
/// The result is a median of samples, not the true global median; it seeds
/// a partition, not the final order. With a single-rank group it *is* the
/// true median of the local sample.
///
/// Two decisions are randomized to avoid systematic bias over repeated
/// calls: which central window survives a trim whose excess is odd, and
/// which of the two central elements of an even-sized sample is the median.
pub fn select<C: Communicator>(
    comm: &C,
    mut sample: Vec<Vec<u8>>,
    n: usize,
    tag: Tag,
    bits: &mut BitSource,
) -> Result<Vec<u8>, CommError> {
    assert!(n > 0, "sample bound must be positive");
    assert!(sample.len() <= n, "local sample exceeds the bound");
    debug_assert!(sample.is_sorted());

    let rank = comm.rank();
    let size = comm.size();
    if size == 1 {
        return Ok(select_median(&sample, bits));
    }

    let config = MessageConfig::default();
    let iterations = if rank > 0 {
        rank.trailing_zeros() as usize
    } else {
        (usize::BITS - (size - 1).leading_zeros()) as usize
    };

    for it in 0..iterations {
        let source = rank + (1 << it);
        if source >= size {
            continue;
        }
        let received = StringMessage::recv(comm, source, tag, config)?.to_strings();
        debug_assert!(received.len() <= n);
        let merged = merge_sorted(&sample, &received);
        sample = trim_to_bound(merged, n, bits);
    }

    let median = if rank == 0 {
        let median = select_median(&sample, bits);
        let msg = StringMessage::from_strings(std::slice::from_ref(&median));
        for dest in 1..size {
            msg.send(comm, dest, tag + 4)?;
        }
        median
    } else {
        let target = rank - (1 << rank.trailing_zeros());
        StringMessage::from_strings(&sample).send(comm, target, tag)?;
        let msg = StringMessage::recv(comm, 0, tag + 4, config)?;
        msg.to_strings().into_iter().next().unwrap_or_default()
    };

    Ok(median)
}

/// Keeps the central `n`-sized window of an oversized merged sample. When
/// the excess is odd the exact center is ambiguous by one element; a coin
/// decides between the two candidate windows.
fn trim_to_bound(mut merged: Vec<Vec<u8>>, n: usize, bits: &mut BitSource) -> Vec<Vec<u8>> {
    if merged.len() <= n {
        return merged;
    }
    let excess = merged.len() - n;
    let mut offset = excess / 2;
    if excess % 2 == 1 {
        offset += bits.next_bit() as usize;
    }
    merged.drain(..offset);
    merged.truncate(n);
    merged
}

/// True median of a sorted sample; for even sizes a coin picks between the
/// two central elements. An empty sample yields the empty string.
fn select_median(sample: &[Vec<u8>], bits: &mut BitSource) -> Vec<u8> {
    if sample.is_empty() {
        return Vec::new();
    }
    if sample.len() % 2 == 0 {
        let shift = bits.next_bit() as usize;
        sample[sample.len() / 2 - shift].clone()
    } else {
        sample[sample.len() / 2].clone()
    }
}
