use std::time::Instant;

use crate::comm::{Communicator, MessageConfig, StringMessage, bytes_to_u64s, tags, u64s_to_bytes};
use crate::container::StringContainer;
use crate::error::{CommError, SortError};
use crate::merge::merge_runs;
use crate::multi_level::Grouping;
use crate::permutation::PermutationTracker;
use crate::rand::BitSource;
use crate::sample::{partition_by_splitters, quantile_window};
use crate::select::select;
use crate::stats::{LevelStats, SortStats};

/// Local sequential sorter collaborator: must leave the container sorted
/// lexicographically (stable on equal strings) with valid adjacent LCPs.
/// Any correct comparison or radix sort qualifies.
pub trait LocalSorter {
    fn sort(&self, container: &mut StringContainer);
}

/// Comparison-based reference sorter.
pub struct StdLocalSorter;

impl LocalSorter for StdLocalSorter {
    fn sort(&self, container: &mut StringContainer) {
        container.sort_lexicographic();
    }
}

/// Splitter/partition policy collaborator: returns `num_groups` interval
/// sizes partitioning the sorted local run `[0, len)`.
pub trait PartitionPolicy {
    fn compute_partition<C: Communicator>(
        &self,
        container: &StringContainer,
        num_groups: usize,
        max_len: Option<usize>,
        comm: &C,
        level: usize,
        bits: &mut BitSource,
    ) -> Result<Vec<usize>, CommError>;
}

/// Default policy: splitter `j` of `g - 1` is the distributed median of
/// every process's local `j/g`-quantile window, one median selection per
/// splitter; local strings are then classified by binary search with ties
/// going right of the splitter.
pub struct MedianPartition {
    pub sample_size: usize,
}

impl Default for MedianPartition {
    fn default() -> Self {
        Self { sample_size: 64 }
    }
}

impl PartitionPolicy for MedianPartition {
    fn compute_partition<C: Communicator>(
        &self,
        container: &StringContainer,
        num_groups: usize,
        max_len: Option<usize>,
        comm: &C,
        level: usize,
        bits: &mut BitSource,
    ) -> Result<Vec<usize>, CommError> {
        if num_groups == 1 {
            // a group of one keeps everything: nothing to partition
            return Ok(vec![container.len()]);
        }

        let mut splitters = Vec::with_capacity(num_groups - 1);
        for part in 1..num_groups {
            let sample =
                quantile_window(container, part, num_groups, self.sample_size, max_len);
            let splitter = select(
                comm,
                sample,
                self.sample_size,
                tags::partition(level, part),
                bits,
            )?;
            splitters.push(splitter);
        }
        Ok(partition_by_splitters(container, &splitters))
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SortConfig {
    /// Base seed for the deterministic tie-breaking bits.
    pub seed: u64,
    /// Transmit strings without their LCP-with-predecessor bytes and
    /// reconstruct after merging.
    pub compress_prefixes: bool,
    /// Truncate splitter candidates to `100 * (global average LCP + 5)`
    /// bytes, bounding splitter traffic on long-key inputs.
    pub bound_splitter_length: bool,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            seed: 0x5eed,
            compress_prefixes: false,
            bound_splitter_length: true,
        }
    }
}

/// Distributed merge-sort orchestrator.
///
/// One pass per grouping level: sample, select splitters, partition,
/// redistribute within the level's exchange communicator, LCP-merge the
/// received runs, record origins with the permutation tracker. After the
/// final pass the container is globally sorted with one run per process and
/// process ranks in key order.
pub struct DistributedMergeSort<P = MedianPartition, L = StdLocalSorter> {
    partition: P,
    local_sorter: L,
    config: SortConfig,
}

impl Default for DistributedMergeSort {
    fn default() -> Self {
        Self::new(MedianPartition::default(), StdLocalSorter, SortConfig::default())
    }
}

impl<P: PartitionPolicy, L: LocalSorter> DistributedMergeSort<P, L> {
    pub fn new(partition: P, local_sorter: L, config: SortConfig) -> Self {
        Self {
            partition,
            local_sorter,
            config,
        }
    }

    /// Sorts the union of all participating containers. Collective over the
    /// grouping; consumes the local container and returns its sorted
    /// successor.
    pub fn sort<C: Communicator, T: PermutationTracker>(
        &self,
        mut container: StringContainer,
        grouping: &Grouping<C>,
        tracker: &mut T,
    ) -> Result<(StringContainer, SortStats), SortError> {
        let mut stats = SortStats {
            input_strings: container.len(),
            input_chars: container.char_size(),
            ..SortStats::default()
        };
        let root = &grouping.comm_root;

        container.attach_indices(0);
        let started = Instant::now();
        self.local_sorter.sort(&mut container);
        stats.local_sort_time = started.elapsed();
        assert!(
            container.is_ordered(),
            "local sorter must leave the container ordered"
        );
        tracker.begin(&mut container, root.rank() as u32);

        if root.size() == 1 {
            return Ok((container, stats));
        }

        let max_len = if self.config.bound_splitter_length {
            let average = global_lcp_average(&container, root)?;
            Some((100 * (average + 5)) as usize)
        } else {
            None
        };

        for (level, schedule) in grouping.levels.iter().enumerate() {
            container = self.round(
                container,
                &schedule.comm_orig,
                &schedule.comm_exchange,
                schedule.num_groups,
                level,
                max_len,
                tracker,
                &mut stats,
            )?;
        }

        let comm = &grouping.comm_final;
        container = self.round(
            container,
            comm,
            comm,
            comm.size(),
            grouping.levels.len(),
            max_len,
            tracker,
            &mut stats,
        )?;

        Ok((container, stats))
    }

    #[allow(clippy::too_many_arguments)]
    fn round<C: Communicator, T: PermutationTracker>(
        &self,
        container: StringContainer,
        comm_orig: &C,
        comm_exchange: &C,
        num_groups: usize,
        level: usize,
        max_len: Option<usize>,
        tracker: &mut T,
        stats: &mut SortStats,
    ) -> Result<StringContainer, SortError> {
        let mut level_stats = LevelStats {
            num_groups,
            group_size: comm_orig.size() / num_groups,
            ..LevelStats::default()
        };

        let started = Instant::now();
        let mut bits = BitSource::derived(self.config.seed, comm_orig.rank(), level);
        let interval_sizes = self.partition.compute_partition(
            &container,
            num_groups,
            max_len,
            comm_orig,
            level,
            &mut bits,
        )?;
        assert_eq!(
            interval_sizes.iter().sum::<usize>(),
            container.len(),
            "partition must cover the local run"
        );
        assert_eq!(
            interval_sizes.len(),
            comm_exchange.size(),
            "one bucket per exchange member"
        );
        level_stats.partition_time = started.elapsed();

        let merged = self.exchange_and_merge(
            container,
            &interval_sizes,
            comm_exchange,
            level,
            tracker,
            &mut level_stats,
        )?;
        stats.levels.push(level_stats);
        Ok(merged)
    }

    fn exchange_and_merge<C: Communicator, T: PermutationTracker>(
        &self,
        container: StringContainer,
        interval_sizes: &[usize],
        comm: &C,
        level: usize,
        tracker: &mut T,
        stats: &mut LevelStats,
    ) -> Result<StringContainer, SortError> {
        let tag = tags::exchange(level);
        let msg_config = MessageConfig {
            with_indices: tracker.needs_indices(),
            with_lcps: true,
        };
        let compress = self.config.compress_prefixes;

        let started = Instant::now();
        let mut chars_parts = Vec::with_capacity(comm.size());
        let mut index_parts = msg_config.with_indices.then(|| Vec::with_capacity(comm.size()));
        let mut lcp_parts = Vec::with_capacity(comm.size());
        let mut offset = 0;
        for &size in interval_sizes {
            let msg =
                StringMessage::from_container(&container, offset..offset + size, msg_config, compress);
            offset += size;
            chars_parts.push(msg.raw);
            if let Some(parts) = &mut index_parts {
                parts.push(u64s_to_bytes(msg.indices.as_ref().unwrap()));
            }
            lcp_parts.push(u64s_to_bytes(msg.lcps.as_ref().unwrap()));
        }
        drop(container);

        // chars, indices and LCPs travel as separately tagged all-to-alls
        let recv_chars = comm.alltoallv(&chars_parts, tag)?;
        let recv_indices = match index_parts {
            Some(parts) => Some(comm.alltoallv(&parts, tag + 1)?),
            None => None,
        };
        let recv_lcps = comm.alltoallv(&lcp_parts, tag + 2)?;

        // one run per source rank, in rank order
        let chars_total = recv_chars.iter().map(|c| c.len()).sum();
        let mut received = StringContainer::with_capacity(0, chars_total, msg_config.with_indices);
        if compress {
            received.mark_prefix_compressed();
        }
        let mut recv_counts = Vec::with_capacity(comm.size());
        let mut recv_indices = recv_indices.map(|v| v.into_iter());
        for (src, raw) in recv_chars.into_iter().enumerate() {
            let indices = match &mut recv_indices {
                Some(iter) => Some(bytes_to_u64s(&iter.next().unwrap(), src)?),
                None => None,
            };
            let lcps = Some(bytes_to_u64s(&recv_lcps[src], src)?);
            let msg = StringMessage { raw, indices, lcps };
            msg.check_counts(src)?;
            recv_counts.push(msg.append_to(&mut received) as u64);
        }
        stats.exchange_time = started.elapsed();
        stats.recv_strings = received.len();
        stats.recv_chars = received.char_size();

        let started = Instant::now();
        let mut merge_counts = Vec::new();
        let mut stream_sources = Vec::new();
        for (src, &count) in recv_counts.iter().enumerate() {
            if count > 0 {
                merge_counts.push(count as usize);
                stream_sources.push(src as u32);
            }
        }

        let (merged, origins) = if merge_counts.is_empty() {
            let mut empty = StringContainer::with_capacity(0, 0, msg_config.with_indices);
            empty.mark_ordered();
            (empty, Vec::new())
        } else {
            let outcome = merge_runs(&received, &merge_counts, 0, compress);
            let mut merged = outcome.container;
            if compress {
                merged.extend_prefixes(outcome.saved_lcps.as_ref().unwrap());
            }
            (merged, outcome.origins)
        };
        stats.merge_time = started.elapsed();

        let origin_ranks = origins
            .into_iter()
            .map(|stream| stream_sources[stream as usize])
            .collect();
        tracker.push(&merged, origin_ranks, recv_counts);
        Ok(merged)
    }
}

/// Global average adjacent LCP, the basis of the splitter length bound.
fn global_lcp_average<C: Communicator>(
    container: &StringContainer,
    comm: &C,
) -> Result<u64, CommError> {
    let lcp_sum: u64 = container.lcps().iter().sum();
    let sum = comm.allreduce_sum(lcp_sum, tags::LCP_AVERAGE)?;
    let count = comm.allreduce_sum(container.len() as u64, tags::LCP_AVERAGE + 1)?;
    Ok(if count == 0 { 0 } else { sum / count })
}
