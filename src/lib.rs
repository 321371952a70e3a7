//! Distributed string sorting core.
//!
//! Given a collection of byte strings partitioned across cooperating
//! processes, produce a globally sorted order (and optionally the inverse
//! permutation mapping every original string to its final position) with
//! bounded per-process memory and a small number of communication rounds.
//!
//! The three load-bearing pieces:
//!
//! - [`merge::LcpLoserTree`] merges `k` locally sorted runs while caching
//!   longest-common-prefix information in the tournament nodes, so a byte
//!   range, once matched, is never rescanned.
//! - [`select::select`] lets a process group agree on a representative
//!   median string through a binary-tree reduction in `O(log g)` rounds with
//!   `O(n)` strings of memory per rank.
//! - [`permutation`] trackers accumulate origin metadata across
//!   redistribution rounds and reconstruct the global inverse permutation
//!   with one extra communication round.
//!
//! [`sorter::DistributedMergeSort`] ties them together: per grouping level
//! it selects splitters, partitions the local run, redistributes buckets
//! within the level's exchange communicator and LCP-merges the received
//! runs; after the final level every process holds one sorted run and
//! process ranks are in key order.
//!
//! The communication substrate is a collaborator behind the
//! [`comm::Communicator`] trait; [`comm::LocalComm`] is the in-process
//! reference transport (one thread per simulated process). A failed peer is
//! fatal to the whole computation; there is no recovery path.

pub mod comm;
pub mod container;
pub mod error;
pub mod merge;
pub mod multi_level;
pub mod permutation;
pub mod rand;
pub mod sample;
pub mod select;
pub mod sorter;
pub mod stats;

pub use comm::{Communicator, LocalComm, MessageConfig, StringMessage};
pub use container::{StringContainer, common_prefix_len};
pub use error::{CommError, SortError};
pub use merge::{LcpLoserTree, MergeOutcome, merge_runs};
pub use multi_level::{Grouping, Level};
pub use permutation::{
    MultiLevelPermutation, NoPermutation, NonUniquePermutation, PermutationTracker,
    SimplePermutation,
};
pub use crate::rand::BitSource;
pub use sorter::{
    DistributedMergeSort, LocalSorter, MedianPartition, PartitionPolicy, SortConfig,
    StdLocalSorter,
};
pub use stats::{LevelStats, SortStats};
