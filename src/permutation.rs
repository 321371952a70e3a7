use crate::comm::{Communicator, Tag, bytes_to_u64s, tags, u64s_to_bytes};
use crate::container::StringContainer;
use crate::error::CommError;
use crate::multi_level::Grouping;

/// Accumulates, across the redistribution rounds of a sort, enough origin
/// metadata to later reconstruct where every original string ended up.
///
/// Lifecycle: `begin` once after local sorting, `push` once per
/// partition/exchange/merge round (in post-merge string order), then `apply`
/// performs one more communication round and fills
/// `out[original_local_index] = global sorted position` for every string
/// this process contributed. `apply` is a bijection: every contributed
/// string receives exactly one output position and vice versa (the
/// non-unique variant collapses equal keys onto their first representative
/// by design).
///
/// Mismatched counts between rounds are caller bugs and fail fast.
pub trait PermutationTracker {
    /// Whether the string exchange must carry per-string source indices.
    fn needs_indices(&self) -> bool;

    fn begin(&mut self, container: &mut StringContainer, rank: u32);

    fn push(&mut self, container: &StringContainer, origin_ranks: Vec<u32>, recv_counts: Vec<u64>);

    fn apply<C: Communicator>(
        &self,
        out: &mut [u64],
        global_index_offset: u64,
        grouping: &Grouping<C>,
    ) -> Result<(), CommError>;
}

/// Tracker for callers that do not need the permutation at all.
pub struct NoPermutation;

impl PermutationTracker for NoPermutation {
    fn needs_indices(&self) -> bool {
        false
    }

    fn begin(&mut self, container: &mut StringContainer, _rank: u32) {
        container.clear_indices();
    }

    fn push(&mut self, _container: &StringContainer, _ranks: Vec<u32>, _counts: Vec<u64>) {}

    fn apply<C: Communicator>(
        &self,
        _out: &mut [u64],
        _offset: u64,
        _grouping: &Grouping<C>,
    ) -> Result<(), CommError> {
        Ok(())
    }
}

/// Single-level tracker: every string carries its `(rank, index)` origin
/// through the one redistribution round, and `apply` routes each final
/// position straight back to the origin rank in one all-to-all.
#[derive(Default)]
pub struct SimplePermutation {
    ranks: Vec<u32>,
    strings: Vec<u64>,
}

impl SimplePermutation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    pub fn rank(&self, n: usize) -> u32 {
        self.ranks[n]
    }

    pub fn string(&self, n: usize) -> u64 {
        self.strings[n]
    }
}

impl PermutationTracker for SimplePermutation {
    fn needs_indices(&self) -> bool {
        true
    }

    fn begin(&mut self, _container: &mut StringContainer, _rank: u32) {}

    fn push(&mut self, container: &StringContainer, origin_ranks: Vec<u32>, _recv_counts: Vec<u64>) {
        let indices = container
            .indices()
            .expect("single-level tracking needs index metadata on the wire");
        assert_eq!(origin_ranks.len(), indices.len());
        self.ranks = origin_ranks;
        self.strings = indices.to_vec();
    }

    fn apply<C: Communicator>(
        &self,
        out: &mut [u64],
        global_index_offset: u64,
        grouping: &Grouping<C>,
    ) -> Result<(), CommError> {
        assert!(
            grouping.levels.is_empty(),
            "single-level tracking cannot follow a multi-level schedule"
        );
        let comm = &grouping.comm_root;

        let local_index_offset = comm.exscan_sum(self.len() as u64, tags::APPLY_SCAN)?;
        let index_offset = global_index_offset + local_index_offset;

        // (origin local index, final global position) pairs, routed by rank
        let mut parts: Vec<Vec<u64>> = vec![Vec::new(); comm.size()];
        for i in 0..self.len() {
            parts[self.ranks[i] as usize].extend([self.strings[i], index_offset + i as u64]);
        }
        let payloads: Vec<Vec<u8>> = parts.iter().map(|p| u64s_to_bytes(p)).collect();
        let received = comm.alltoallv(&payloads, tags::apply(0))?;

        for (src, payload) in received.into_iter().enumerate() {
            for pair in bytes_to_u64s(&payload, src)?.chunks_exact(2) {
                out[pair[0] as usize] = pair[1];
            }
        }
        Ok(())
    }
}

/// Per-round origin record of the multi-level trackers: for every string in
/// post-merge order the exchange rank it arrived from, plus how many strings
/// each exchange rank contributed.
struct RemotePermutation {
    ranks: Vec<u32>,
    counts: Vec<u64>,
}

/// Multi-round tracker: records the local permutation once (the original
/// index of every string after local sorting) and one `RemotePermutation`
/// per round. `apply` replays the rounds in reverse, routing each string's
/// resolved global position backward along the chain of moves until it
/// reaches the origin process, then indexes the local permutation.
#[derive(Default)]
pub struct MultiLevelPermutation {
    local: Vec<u64>,
    levels: Vec<RemotePermutation>,
}

impl MultiLevelPermutation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }
}

impl PermutationTracker for MultiLevelPermutation {
    fn needs_indices(&self) -> bool {
        false
    }

    fn begin(&mut self, container: &mut StringContainer, _rank: u32) {
        self.local = container
            .indices()
            .expect("multi-level tracking needs indices at the first level")
            .to_vec();
        // origins travel via per-round receive counts, not on the wire
        container.clear_indices();
    }

    fn push(&mut self, _container: &StringContainer, origin_ranks: Vec<u32>, recv_counts: Vec<u64>) {
        assert_eq!(
            origin_ranks.len(),
            recv_counts.iter().sum::<u64>() as usize,
            "origin ranks must match the receive counts"
        );
        self.levels.push(RemotePermutation {
            ranks: origin_ranks,
            counts: recv_counts,
        });
    }

    fn apply<C: Communicator>(
        &self,
        out: &mut [u64],
        global_index_offset: u64,
        grouping: &Grouping<C>,
    ) -> Result<(), CommError> {
        apply_multi_level(
            &self.local,
            &self.levels,
            grouping,
            out,
            |rp, root| {
                let local_index_offset =
                    root.exscan_sum(rp.ranks.len() as u64, tags::APPLY_SCAN)?;
                let index_offset = global_index_offset + local_index_offset;
                Ok((0..rp.ranks.len() as u64).map(|i| index_offset + i).collect())
            },
            global_index_offset,
        )
    }
}

/// Multi-level tracker for inputs with repeated sort keys: additionally
/// carries one small delta per string of the final round. A delta of 1
/// starts a new run of equal keys, 0 continues one, so equal adjacent
/// strings share the global index of their first representative while
/// `(rank, index, offset)` stays unique. The first string of a process
/// always starts a new run.
#[derive(Default)]
pub struct NonUniquePermutation {
    inner: MultiLevelPermutation,
    index_offsets: Vec<u8>,
}

impl NonUniquePermutation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.inner.depth()
    }

    pub fn index_offsets(&self) -> &[u8] {
        &self.index_offsets
    }
}

impl PermutationTracker for NonUniquePermutation {
    fn needs_indices(&self) -> bool {
        false
    }

    fn begin(&mut self, container: &mut StringContainer, rank: u32) {
        self.inner.begin(container, rank);
    }

    fn push(&mut self, container: &StringContainer, origin_ranks: Vec<u32>, recv_counts: Vec<u64>) {
        // only the offsets of the deepest round are consulted by apply
        self.index_offsets = (0..container.len())
            .map(|i| (i == 0 || container.str_at(i) != container.str_at(i - 1)) as u8)
            .collect();
        self.inner.push(container, origin_ranks, recv_counts);
    }

    fn apply<C: Communicator>(
        &self,
        out: &mut [u64],
        global_index_offset: u64,
        grouping: &Grouping<C>,
    ) -> Result<(), CommError> {
        apply_multi_level(
            &self.inner.local,
            &self.inner.levels,
            grouping,
            out,
            |rp, root| {
                assert_eq!(self.index_offsets.len(), rp.ranks.len());
                let local_offset_sum: u64 =
                    self.index_offsets.iter().map(|&d| d as u64).sum();
                let local_index_offset = root.exscan_sum(local_offset_sum, tags::APPLY_SCAN)?;

                let mut current = global_index_offset + local_index_offset;
                let mut values = Vec::with_capacity(rp.ranks.len());
                for &delta in &self.index_offsets {
                    current += delta as u64;
                    values.push(current - 1);
                }
                Ok(values)
            },
            global_index_offset,
        )
    }
}

/// Reverse replay shared by the multi-level variants. `first_indices`
/// produces, for the deepest round only, the global position of every
/// locally held string in post-merge order; shallower rounds forward what
/// the deeper round routed back.
fn apply_multi_level<C, F>(
    local: &[u64],
    levels: &[RemotePermutation],
    grouping: &Grouping<C>,
    out: &mut [u64],
    first_indices: F,
    global_index_offset: u64,
) -> Result<(), CommError>
where
    C: Communicator,
    F: FnOnce(&RemotePermutation, &C) -> Result<Vec<u64>, CommError>,
{
    let root = &grouping.comm_root;
    if root.size() == 1 {
        for (i, &orig) in local.iter().enumerate() {
            out[orig as usize] = global_index_offset + i as u64;
        }
        return Ok(());
    }

    assert_eq!(
        levels.len(),
        grouping.num_rounds(),
        "one push per redistribution round"
    );

    let mut first_indices = Some(first_indices);
    let mut recv_buf: Vec<u64> = Vec::new();
    for depth in (0..levels.len()).rev() {
        let rp = &levels[depth];
        let is_deepest = depth == levels.len() - 1;
        let comm = if is_deepest {
            &grouping.comm_final
        } else {
            &grouping.levels[depth].comm_exchange
        };
        assert_eq!(rp.counts.len(), comm.size(), "level counts mismatch");

        let values = if is_deepest {
            (first_indices.take().unwrap())(rp, root)?
        } else {
            assert_eq!(recv_buf.len(), rp.ranks.len(), "level size mismatch");
            std::mem::take(&mut recv_buf)
        };

        // group the resolved positions by the rank each string came from
        let mut offsets = exclusive_scan(&rp.counts);
        let mut send_buf = vec![0u64; rp.ranks.len()];
        for (i, &rank) in rp.ranks.iter().enumerate() {
            send_buf[offsets[rank as usize]] = values[i];
            offsets[rank as usize] += 1;
        }

        recv_buf = alltoallv_u64(comm, &send_buf, &rp.counts, tags::apply(depth))?;
    }

    assert_eq!(recv_buf.len(), local.len());
    for (i, &global) in recv_buf.iter().enumerate() {
        out[local[i] as usize] = global;
    }
    Ok(())
}

fn exclusive_scan(counts: &[u64]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(counts.len());
    let mut sum = 0usize;
    for &c in counts {
        offsets.push(sum);
        sum += c as usize;
    }
    offsets
}

/// All-to-all of `u64` values: `counts[d]` consecutive entries of `send_buf`
/// go to rank `d`; the result concatenates the received values in source
/// rank order.
fn alltoallv_u64<C: Communicator>(
    comm: &C,
    send_buf: &[u64],
    counts: &[u64],
    tag: Tag,
) -> Result<Vec<u64>, CommError> {
    assert_eq!(counts.iter().sum::<u64>() as usize, send_buf.len());
    let offsets = exclusive_scan(counts);
    let payloads: Vec<Vec<u8>> = counts
        .iter()
        .zip(&offsets)
        .map(|(&c, &o)| u64s_to_bytes(&send_buf[o..o + c as usize]))
        .collect();

    let received = comm.alltoallv(&payloads, tag)?;
    let mut out = Vec::with_capacity(send_buf.len());
    for (src, payload) in received.into_iter().enumerate() {
        out.extend(bytes_to_u64s(&payload, src)?);
    }
    Ok(out)
}
