use crate::comm::{Communicator, tags};
use crate::error::CommError;

/// One stage of a hierarchical redistribution schedule.
///
/// At this level the processes of `comm_orig` (the group being partitioned,
/// size `s`) are carved into `num_groups` target groups of equal size.
/// Splitter selection runs over `comm_orig`; the redistribution itself runs
/// over `comm_exchange`, which contains exactly one member of every target
/// group: member `j` of the exchange communicator belongs to target group
/// `j`, so bucket `j` of the partition is sent to exchange rank `j`.
pub struct Level<C: Communicator> {
    pub comm_orig: C,
    pub comm_exchange: C,
    pub num_groups: usize,
}

/// Ordered sequence of process groupings, coarse to fine, ending in the
/// final group that performs the last full partition/exchange/merge. The
/// degenerate schedule has no intermediate levels and a final group spanning
/// every process. Read-only once constructed.
pub struct Grouping<C: Communicator> {
    pub comm_root: C,
    pub levels: Vec<Level<C>>,
    pub comm_final: C,
}

impl<C: Communicator> Grouping<C> {
    /// The canonical single-level deployment: one all-to-all over the whole
    /// group.
    pub fn single_level(comm: C) -> Self {
        Grouping {
            comm_root: comm.clone(),
            levels: Vec::new(),
            comm_final: comm,
        }
    }

    /// Builds a multi-level schedule from the target group sizes, coarse to
    /// fine: each size must strictly divide its predecessor (starting at the
    /// full group size). E.g. 8 processes with `[2]` form one level of four
    /// groups of two, then a final pass inside each pair.
    ///
    /// Collective: every member of `comm` must call this with equal
    /// arguments.
    pub fn multi_level(comm: C, group_sizes: &[usize]) -> Result<Self, CommError> {
        let comm_root = comm.clone();
        let mut current = comm;
        let mut levels = Vec::with_capacity(group_sizes.len());

        for (depth, &target) in group_sizes.iter().enumerate() {
            let size = current.size();
            assert!(
                target > 0 && target < size && size % target == 0,
                "group size {} does not divide the current group of {}",
                target,
                size
            );
            let rank = current.rank();
            let num_groups = size / target;

            // same position across all target groups => one member per group
            let comm_exchange = current.split(rank % target, rank / target, tags::split(2 * depth))?;
            debug_assert_eq!(comm_exchange.size(), num_groups);

            let next = current.split(rank / target, rank % target, tags::split(2 * depth + 1))?;
            debug_assert_eq!(next.size(), target);

            levels.push(Level {
                comm_orig: current,
                comm_exchange,
                num_groups,
            });
            current = next;
        }

        Ok(Grouping {
            comm_root,
            levels,
            comm_final: current,
        })
    }

    /// Number of redistribution rounds a sort over this grouping performs.
    pub fn num_rounds(&self) -> usize {
        self.levels.len() + 1
    }
}
