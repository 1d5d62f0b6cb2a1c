//! Adaptive estimate of how much memory one cached b-tree page takes.

use crate::access::row::SearchRow;

/// Number of samples averaged before switching to the slow nudge.
pub const MEMORY_FACTOR: i64 = 64;

/// Fixed overhead of a cached b-tree page object.
pub const MEMORY_PAGE_BTREE: usize = 184;

pub const MEMORY_POINTER: usize = 8;

/// Every this many page changes one sample is taken.
const SAMPLE_INTERVAL: i32 = 10;

#[derive(Debug, Clone)]
pub struct MemoryEstimator {
    memory_per_page: i64,
    memory_count: i64,
    countdown: i32,
}

impl MemoryEstimator {
    pub fn new(page_size: usize) -> Self {
        Self {
            memory_per_page: ((MEMORY_PAGE_BTREE + page_size) >> 2) as i64,
            memory_count: 0,
            countdown: 0,
        }
    }

    pub fn memory_per_page(&self) -> usize {
        self.memory_per_page.max(0) as usize
    }

    /// Whether the next page change should be sampled. Counts down and
    /// fires once per `SAMPLE_INTERVAL + 1` calls, starting with the first.
    pub fn is_change_required(&mut self) -> bool {
        let previous = self.countdown;
        self.countdown -= 1;
        if previous <= 0 {
            self.countdown = SAMPLE_INTERVAL;
            return true;
        }
        false
    }

    /// Fold one observed page size into the running average.
    pub fn change(&mut self, x: i64) {
        if self.memory_count < MEMORY_FACTOR {
            self.memory_count += 1;
            self.memory_per_page += (x - self.memory_per_page) / self.memory_count;
        } else {
            let step = if x > self.memory_per_page { 1 } else { -1 };
            self.memory_per_page += step + (x - self.memory_per_page) / MEMORY_FACTOR;
        }
    }

    /// The sample value for a page holding `rows`, already scaled down by four.
    pub fn page_sample(page_size: usize, rows: &[SearchRow]) -> i64 {
        let mut memory = MEMORY_PAGE_BTREE + page_size;
        memory += rows.len() * (4 + MEMORY_POINTER);
        memory += rows.iter().map(SearchRow::memory).sum::<usize>();
        (memory >> 2) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_estimate() {
        let estimator = MemoryEstimator::new(4096);
        assert_eq!(estimator.memory_per_page(), (184 + 4096) / 4);
    }

    #[test]
    fn test_sampling_interval() {
        let mut estimator = MemoryEstimator::new(1024);
        let fired: Vec<bool> = (0..23).map(|_| estimator.is_change_required()).collect();
        assert!(fired[0]);
        assert!(fired[11]);
        assert!(fired[22]);
        assert_eq!(fired.iter().filter(|f| **f).count(), 3);
    }

    #[test]
    fn test_coarse_phase_is_running_average() {
        let mut estimator = MemoryEstimator::new(0);
        estimator.memory_per_page = 0;
        estimator.change(100);
        assert_eq!(estimator.memory_per_page(), 100);
        estimator.change(200);
        assert_eq!(estimator.memory_per_page(), 150);
    }

    #[test]
    fn test_converges_after_coarse_phase() {
        let mut estimator = MemoryEstimator::new(4096);
        for _ in 0..2000 {
            estimator.change(500);
        }
        let estimate = estimator.memory_per_page() as i64;
        assert!((estimate - 500).abs() <= 2, "estimate {}", estimate);

        // past the coarse phase a single outlier only moves it a little
        estimator.change(50_000);
        let moved = estimator.memory_per_page() as i64 - estimate;
        assert!(moved > 0 && moved < 1000, "moved {}", moved);
    }
}
