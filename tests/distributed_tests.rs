use std::thread;

use dss::{
    BitSource, Communicator, DistributedMergeSort, Grouping, LocalComm, MultiLevelPermutation,
    NonUniquePermutation, PermutationTracker, SimplePermutation, SortConfig, StringContainer,
    select::select,
    sorter::{MedianPartition, StdLocalSorter},
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Runs `body` on every endpoint of a fresh cluster, one thread per
/// simulated process, and returns the per-rank results in rank order.
fn run_cluster<T, F>(size: usize, body: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(LocalComm) -> T + Send + Sync + Clone + 'static,
{
    let handles: Vec<_> = LocalComm::cluster(size)
        .into_iter()
        .map(|comm| {
            let body = body.clone();
            thread::spawn(move || body(comm))
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

fn strings_of(cont: &StringContainer) -> Vec<Vec<u8>> {
    (0..cont.len()).map(|i| cont.str_at(i).to_vec()).collect()
}

fn random_strings(rank: usize, count: usize, max_len: usize) -> Vec<Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(0xfeed + rank as u64);
    (0..count)
        .map(|_| {
            let len = rng.random_range(1..=max_len);
            (0..len).map(|_| rng.random_range(b'a'..=b'f')).collect()
        })
        .collect()
}

/// Checks the global outcome of a sort: concatenation in rank order is the
/// sorted multiset of the inputs, and the reported inverse permutation sends
/// every original string to the position actually holding it.
fn check_sorted_with_permutation(
    inputs: &[Vec<Vec<u8>>],
    results: &[(Vec<Vec<u8>>, Vec<u64>)],
) {
    let global: Vec<Vec<u8>> = results.iter().flat_map(|(s, _)| s.iter().cloned()).collect();
    let mut expected: Vec<Vec<u8>> = inputs.iter().flatten().cloned().collect();
    expected.sort();
    assert_eq!(global, expected, "concatenation must be the sorted input");

    let mut seen = vec![false; global.len()];
    for (rank, (_, permutation)) in results.iter().enumerate() {
        assert_eq!(permutation.len(), inputs[rank].len());
        for (i, &position) in permutation.iter().enumerate() {
            let position = position as usize;
            assert!(!seen[position], "two strings mapped to position {}", position);
            seen[position] = true;
            assert_eq!(
                global[position], inputs[rank][i],
                "rank {} string {} landed elsewhere",
                rank, i
            );
        }
    }
    assert!(seen.iter().all(|&s| s), "every position must be claimed");
}

#[test]
fn median_selection_is_unanimous_and_from_the_samples() {
    for size in [1usize, 2, 3, 4, 7, 8] {
        let medians = run_cluster(size, move |comm| {
            let rank = comm.rank();
            let mut sample = random_strings(rank, 9, 5);
            sample.sort();
            let mut bits = BitSource::derived(99, rank, 0);
            select(&comm, sample, 16, 1_000, &mut bits).unwrap()
        });

        let first = &medians[0];
        assert!(
            medians.iter().all(|m| m == first),
            "selection must agree on every rank (size {})",
            size
        );
        let union: Vec<Vec<u8>> = (0..size).flat_map(|r| random_strings(r, 9, 5)).collect();
        assert!(union.contains(first), "median must come from the samples");
    }
}

#[test]
fn median_of_single_element_samples() {
    let medians = run_cluster(4, |comm| {
        let mut bits = BitSource::derived(7, comm.rank(), 0);
        select(&comm, vec![b"m".to_vec()], 4, 1_000, &mut bits).unwrap()
    });
    assert!(medians.iter().all(|m| m == b"m"));
}

#[test]
fn median_tolerates_empty_samples() {
    let medians = run_cluster(4, |comm| {
        let rank = comm.rank();
        let sample = if rank % 2 == 0 {
            vec![b"q".to_vec()]
        } else {
            Vec::new()
        };
        let mut bits = BitSource::derived(3, rank, 0);
        select(&comm, sample, 4, 1_000, &mut bits).unwrap()
    });
    let first = &medians[0];
    assert!(medians.iter().all(|m| m == first));
    assert_eq!(first, &b"q".to_vec());
}

#[test]
fn two_process_pivot_scenario_reconstructs_origins() {
    // rank 0 holds "b", rank 1 holds "a"; the global order is ["a", "b"]
    let results = run_cluster(2, |comm| {
        let rank = comm.rank();
        let grouping = Grouping::single_level(comm);
        let input = if rank == 0 { vec![b"b".to_vec()] } else { vec![b"a".to_vec()] };
        let container = StringContainer::from_strings(input.iter());

        let sorter = DistributedMergeSort::default();
        let mut tracker = SimplePermutation::new();
        let (sorted, _) = sorter.sort(container, &grouping, &mut tracker).unwrap();

        let mut permutation = vec![u64::MAX; 1];
        tracker.apply(&mut permutation, 0, &grouping).unwrap();

        let origins: Vec<(u32, u64)> = (0..tracker.len())
            .map(|i| (tracker.rank(i), tracker.string(i)))
            .collect();
        (strings_of(&sorted), permutation, origins)
    });

    let global: Vec<Vec<u8>> = results.iter().flat_map(|(s, _, _)| s.iter().cloned()).collect();
    assert_eq!(global, vec![b"a".to_vec(), b"b".to_vec()]);

    // position 0 came from (rank 1, index 0), position 1 from (rank 0, index 0)
    let origins: Vec<(u32, u64)> = results.iter().flat_map(|(_, _, o)| o.iter().copied()).collect();
    assert_eq!(origins, vec![(1, 0), (0, 0)]);

    // the inverse permutation: rank 0's "b" went to position 1, rank 1's "a" to 0
    assert_eq!(results[0].1, vec![1]);
    assert_eq!(results[1].1, vec![0]);
}

#[test]
fn single_level_sort_with_simple_permutation() {
    let size = 4;
    let inputs: Vec<Vec<Vec<u8>>> = (0..size).map(|r| random_strings(r, 40, 6)).collect();

    let results = run_cluster(size, move |comm| {
        let rank = comm.rank();
        let grouping = Grouping::single_level(comm);
        let container = StringContainer::from_strings(random_strings(rank, 40, 6).iter());

        let sorter = DistributedMergeSort::default();
        let mut tracker = SimplePermutation::new();
        let (sorted, stats) = sorter.sort(container, &grouping, &mut tracker).unwrap();
        assert_eq!(stats.levels.len(), 1);

        let mut permutation = vec![u64::MAX; 40];
        tracker.apply(&mut permutation, 0, &grouping).unwrap();
        (strings_of(&sorted), permutation)
    });

    check_sorted_with_permutation(&inputs, &results);
}

#[test]
fn single_level_sort_with_multi_level_tracking() {
    let size = 4;
    let inputs: Vec<Vec<Vec<u8>>> = (0..size).map(|r| random_strings(r, 32, 5)).collect();

    let results = run_cluster(size, move |comm| {
        let rank = comm.rank();
        let grouping = Grouping::single_level(comm);
        let container = StringContainer::from_strings(random_strings(rank, 32, 5).iter());

        let sorter = DistributedMergeSort::default();
        let mut tracker = MultiLevelPermutation::new();
        let (sorted, _) = sorter.sort(container, &grouping, &mut tracker).unwrap();

        let mut permutation = vec![u64::MAX; 32];
        tracker.apply(&mut permutation, 0, &grouping).unwrap();
        (strings_of(&sorted), permutation)
    });

    check_sorted_with_permutation(&inputs, &results);
}

#[test]
fn multi_level_sort_over_two_levels() {
    let size = 4;
    let counts = [50usize, 10, 30, 40];
    let inputs: Vec<Vec<Vec<u8>>> = (0..size).map(|r| random_strings(r, counts[r], 7)).collect();

    let results = run_cluster(size, move |comm| {
        let rank = comm.rank();
        let grouping = Grouping::multi_level(comm, &[2]).unwrap();
        let container = StringContainer::from_strings(random_strings(rank, counts[rank], 7).iter());

        let sorter = DistributedMergeSort::default();
        let mut tracker = MultiLevelPermutation::new();
        let (sorted, stats) = sorter.sort(container, &grouping, &mut tracker).unwrap();
        assert_eq!(stats.levels.len(), 2);

        let mut permutation = vec![u64::MAX; counts[rank]];
        tracker.apply(&mut permutation, 0, &grouping).unwrap();
        (strings_of(&sorted), permutation)
    });

    check_sorted_with_permutation(&inputs, &results);
}

#[test]
fn multi_level_sort_over_eight_processes_and_two_stages() {
    let size = 8;
    let inputs: Vec<Vec<Vec<u8>>> = (0..size).map(|r| random_strings(r, 25, 6)).collect();

    let results = run_cluster(size, move |comm| {
        let rank = comm.rank();
        let grouping = Grouping::multi_level(comm, &[4, 2]).unwrap();
        let container = StringContainer::from_strings(random_strings(rank, 25, 6).iter());

        let sorter = DistributedMergeSort::default();
        let mut tracker = MultiLevelPermutation::new();
        let (sorted, stats) = sorter.sort(container, &grouping, &mut tracker).unwrap();
        assert_eq!(stats.levels.len(), 3);

        let mut permutation = vec![u64::MAX; 25];
        tracker.apply(&mut permutation, 0, &grouping).unwrap();
        (strings_of(&sorted), permutation)
    });

    check_sorted_with_permutation(&inputs, &results);
}

#[test]
fn compressed_exchange_matches_the_plain_one() {
    let size = 4;
    let sort_with = move |compress: bool| {
        run_cluster(size, move |comm| {
            let rank = comm.rank();
            let grouping = Grouping::single_level(comm);
            let container = StringContainer::from_strings(random_strings(rank, 30, 8).iter());

            let config = SortConfig {
                compress_prefixes: compress,
                ..SortConfig::default()
            };
            let sorter =
                DistributedMergeSort::new(MedianPartition::default(), StdLocalSorter, config);
            let mut tracker = MultiLevelPermutation::new();
            let (sorted, _) = sorter.sort(container, &grouping, &mut tracker).unwrap();
            (strings_of(&sorted), sorted.lcps().to_vec())
        })
    };

    let plain = sort_with(false);
    let compressed = sort_with(true);
    assert_eq!(plain, compressed);
}

#[test]
fn non_unique_tracking_collapses_equal_keys() {
    let size = 3;
    // duplicate-heavy inputs
    let make_input = |rank: usize| -> Vec<Vec<u8>> {
        let mut rng = StdRng::seed_from_u64(0xd0 + rank as u64);
        (0..20)
            .map(|_| {
                let c = rng.random_range(b'a'..=b'b');
                vec![c; rng.random_range(1..=2)]
            })
            .collect()
    };
    let inputs: Vec<Vec<Vec<u8>>> = (0..size).map(make_input).collect();

    let results = run_cluster(size, move |comm| {
        let rank = comm.rank();
        let grouping = Grouping::single_level(comm);
        let container = StringContainer::from_strings(make_input(rank).iter());

        let sorter = DistributedMergeSort::default();
        let mut tracker = NonUniquePermutation::new();
        let (sorted, _) = sorter.sort(container, &grouping, &mut tracker).unwrap();

        let mut permutation = vec![u64::MAX; 20];
        tracker.apply(&mut permutation, 0, &grouping).unwrap();
        (strings_of(&sorted), permutation)
    });

    // model: walk the final distribution in rank order; a new index starts
    // at every process boundary and at every key change within a process
    let mut class_of_position: Vec<u64> = Vec::new();
    let mut next = 0u64;
    for (sorted, _) in &results {
        for (i, s) in sorted.iter().enumerate() {
            if i == 0 || s != &sorted[i - 1] {
                class_of_position.push(next);
                next += 1;
            } else {
                class_of_position.push(*class_of_position.last().unwrap());
            }
        }
    }

    let global: Vec<Vec<u8>> = results.iter().flat_map(|(s, _)| s.iter().cloned()).collect();
    let mut expected: Vec<Vec<u8>> = inputs.iter().flatten().cloned().collect();
    expected.sort();
    assert_eq!(global, expected);

    // every original string's reported index is the class of some position
    // holding an equal string
    for (rank, (_, permutation)) in results.iter().enumerate() {
        for (i, &index) in permutation.iter().enumerate() {
            let position = class_of_position
                .iter()
                .position(|&class| class == index)
                .expect("reported index must exist");
            assert_eq!(global[position], inputs[rank][i]);
        }
    }
}

#[test]
fn degenerate_inputs_are_defined_behavior() {
    // one rank holds everything, the others are empty
    let size = 3;
    let results = run_cluster(size, move |comm| {
        let rank = comm.rank();
        let grouping = Grouping::single_level(comm);
        let input: Vec<Vec<u8>> = if rank == 1 {
            vec![b"c".to_vec(), b"a".to_vec(), b"b".to_vec()]
        } else {
            Vec::new()
        };
        let container = StringContainer::from_strings(input.iter());

        let sorter = DistributedMergeSort::default();
        let mut tracker = MultiLevelPermutation::new();
        let (sorted, _) = sorter.sort(container, &grouping, &mut tracker).unwrap();

        let mut permutation = vec![u64::MAX; input.len()];
        tracker.apply(&mut permutation, 0, &grouping).unwrap();
        (strings_of(&sorted), permutation)
    });

    let global: Vec<Vec<u8>> = results.iter().flat_map(|(s, _)| s.iter().cloned()).collect();
    assert_eq!(global, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    assert_eq!(results[1].1, vec![2, 0, 1]);
}

#[test]
fn global_index_offset_shifts_the_permutation() {
    let results = run_cluster(2, |comm| {
        let rank = comm.rank();
        let grouping = Grouping::single_level(comm);
        let input = if rank == 0 { vec![b"b".to_vec()] } else { vec![b"a".to_vec()] };
        let container = StringContainer::from_strings(input.iter());

        let sorter = DistributedMergeSort::default();
        let mut tracker = MultiLevelPermutation::new();
        sorter.sort(container, &grouping, &mut tracker).unwrap();

        let mut permutation = vec![u64::MAX; 1];
        tracker.apply(&mut permutation, 100, &grouping).unwrap();
        permutation
    });
    assert_eq!(results[0], vec![101]);
    assert_eq!(results[1], vec![100]);
}
