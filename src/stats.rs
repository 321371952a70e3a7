use std::fmt;
use std::time::Duration;

/// Statistics for one partition/exchange/merge round.
#[derive(Clone, Debug, Default)]
pub struct LevelStats {
    pub num_groups: usize,
    pub group_size: usize,
    pub partition_time: Duration,
    pub exchange_time: Duration,
    pub merge_time: Duration,
    pub recv_strings: usize,
    pub recv_chars: usize,
}

/// Statistics for a whole distributed sort call on one process.
///
/// Purely observational: nothing reads these back, and dropping them changes
/// no behavior.
#[derive(Clone, Debug, Default)]
pub struct SortStats {
    pub input_strings: usize,
    pub input_chars: usize,
    pub local_sort_time: Duration,
    pub levels: Vec<LevelStats>,
}

impl SortStats {
    pub fn total_merge_time(&self) -> Duration {
        self.levels.iter().map(|l| l.merge_time).sum()
    }

    pub fn total_exchange_time(&self) -> Duration {
        self.levels.iter().map(|l| l.exchange_time).sum()
    }
}

impl fmt::Display for SortStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "SortStats:")?;
        writeln!(
            f,
            "  Input: {} strings, {} chars",
            self.input_strings, self.input_chars
        )?;
        writeln!(f, "  Local sort: {} ms", self.local_sort_time.as_millis())?;
        for (i, level) in self.levels.iter().enumerate() {
            writeln!(
                f,
                "  Level {}: {} groups of {}",
                i, level.num_groups, level.group_size
            )?;
            writeln!(
                f,
                "    partition={} ms, exchange={} ms, merge={} ms",
                level.partition_time.as_millis(),
                level.exchange_time.as_millis(),
                level.merge_time.as_millis()
            )?;
            writeln!(
                f,
                "    received: {} strings, {} chars",
                level.recv_strings, level.recv_chars
            )?;
        }
        Ok(())
    }
}
