//! Pollrate and batching negotiation
//!
//! Every handle that enables a node records the period and report latency
//! it wants. The node runs at the fastest period and the shortest timeout
//! requested by anyone; unconstrained entries take no part in the minimum.

use std::collections::BTreeMap;

use crate::constants::buffer::{DEFAULT_IIO_BUFFER_LEN, IIO_BUFFER_MULTIPLIER};
use crate::constants::timing::{period_ns_to_hz, UNCONSTRAINED};

/// Period and timeout requested by one handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRequest {
    pub period_ns: i64,
    pub timeout_ns: i64,
}

impl DelayRequest {
    pub const UNCONSTRAINED: Self = Self {
        period_ns: UNCONSTRAINED,
        timeout_ns: UNCONSTRAINED,
    };

    pub fn new(period_ns: i64, timeout_ns: i64) -> Self {
        Self { period_ns, timeout_ns }
    }
}

/// Non-positive and sentinel values express no constraint
pub fn is_constrained(value_ns: i64) -> bool {
    value_ns > 0 && value_ns != UNCONSTRAINED
}

/// Requests keyed by the handle that made them
#[derive(Debug, Clone, Default)]
pub struct PollrateTable {
    requests: BTreeMap<i32, DelayRequest>,
}

impl PollrateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request, returning the one it replaces
    pub fn set(&mut self, handle: i32, request: DelayRequest) -> Option<DelayRequest> {
        if request == DelayRequest::UNCONSTRAINED {
            self.requests.remove(&handle)
        } else {
            self.requests.insert(handle, request)
        }
    }

    /// Put back what [`set`](Self::set) returned
    pub fn restore(&mut self, handle: i32, previous: Option<DelayRequest>) {
        match previous {
            Some(request) => {
                self.requests.insert(handle, request);
            }
            None => {
                self.requests.remove(&handle);
            }
        }
    }

    pub fn get(&self, handle: i32) -> Option<DelayRequest> {
        self.requests.get(&handle).copied()
    }

    pub fn min_period(&self) -> i64 {
        self.requests
            .values()
            .map(|r| r.period_ns)
            .filter(|p| is_constrained(*p))
            .min()
            .unwrap_or(UNCONSTRAINED)
    }

    pub fn min_timeout(&self) -> i64 {
        self.requests
            .values()
            .map(|r| r.timeout_ns)
            .filter(|t| is_constrained(*t))
            .min()
            .unwrap_or(UNCONSTRAINED)
    }

    pub fn aggregate(&self) -> DelayRequest {
        DelayRequest::new(self.min_period(), self.min_timeout())
    }
}

/// Smallest available frequency at or above the requested rate, else the highest
pub fn select_sampling_frequency(available: &[f64], period_ns: i64) -> Option<f64> {
    let requested_hz = period_ns_to_hz(period_ns);
    let tolerance = requested_hz * 1e-9;

    available
        .iter()
        .copied()
        .filter(|f| *f + tolerance >= requested_hz)
        .fold(None, |best: Option<f64>, f| Some(best.map_or(f, |b| b.min(f))))
        .or_else(|| {
            available
                .iter()
                .copied()
                .fold(None, |best: Option<f64>, f| Some(best.map_or(f, |b| b.max(f))))
        })
}

/// Samples to batch in the hardware FIFO; 0 disables batching
pub fn compute_fifo_length(timeout_ns: i64, actual_period_ns: i64, fifo_max: u32) -> u32 {
    if !is_constrained(timeout_ns) || !is_constrained(actual_period_ns) {
        return 0;
    }
    let samples = timeout_ns / actual_period_ns;
    samples.clamp(0, i64::from(fifo_max)) as u32
}

/// Kernel buffer length backing a FIFO length
pub fn kernel_buffer_length(fifo_len: u32) -> u32 {
    fifo_len
        .saturating_mul(IIO_BUFFER_MULTIPLIER)
        .max(DEFAULT_IIO_BUFFER_LEN)
}

/// Hardware pollrate state of one device
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HwPollrate {
    /// Frequency last written, `None` until a period is requested
    pub frequency_hz: Option<f64>,
    /// Period the device actually runs at, 0 while unknown
    pub actual_period_ns: i64,
    pub fifo_len: u32,
}

impl Default for HwPollrate {
    fn default() -> Self {
        Self {
            frequency_hz: None,
            actual_period_ns: 0,
            fifo_len: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconstrained_excluded_from_minimum() {
        let mut table = PollrateTable::new();
        assert_eq!(table.min_period(), UNCONSTRAINED);

        table.set(1, DelayRequest::new(20_000_000, UNCONSTRAINED));
        table.set(2, DelayRequest::new(10_000_000, 500_000_000));
        table.set(3, DelayRequest::new(0, -1));
        assert_eq!(table.min_period(), 10_000_000);
        assert_eq!(table.min_timeout(), 500_000_000);
    }

    #[test]
    fn test_set_and_restore() {
        let mut table = PollrateTable::new();
        table.set(1, DelayRequest::new(20_000_000, 0));
        let prev = table.set(1, DelayRequest::new(5_000_000, 0));
        assert_eq!(table.min_period(), 5_000_000);
        table.restore(1, prev);
        assert_eq!(table.min_period(), 20_000_000);

        let prev = table.set(2, DelayRequest::new(1_000_000, 0));
        table.restore(2, prev);
        assert_eq!(table.get(2), None);
    }

    #[test]
    fn test_unconstrained_request_clears_entry() {
        let mut table = PollrateTable::new();
        table.set(4, DelayRequest::new(10_000_000, 0));
        table.set(4, DelayRequest::UNCONSTRAINED);
        assert_eq!(table.get(4), None);
    }

    #[test]
    fn test_select_frequency() {
        let freqs = [50.0, 100.0, 200.0];
        // 80 Hz
        assert_eq!(select_sampling_frequency(&freqs, 12_500_000), Some(100.0));
        // exact match
        assert_eq!(select_sampling_frequency(&freqs, 20_000_000), Some(50.0));
        // faster than anything available
        assert_eq!(select_sampling_frequency(&freqs, 1_000_000), Some(200.0));
        assert_eq!(select_sampling_frequency(&[], 1_000_000), None);
    }

    #[test]
    fn test_fifo_length() {
        assert_eq!(compute_fifo_length(500_000_000, 10_000_000, 20), 20);
        assert_eq!(compute_fifo_length(50_000_000, 10_000_000, 20), 5);
        assert_eq!(compute_fifo_length(UNCONSTRAINED, 10_000_000, 20), 0);
        assert_eq!(compute_fifo_length(500_000_000, 0, 20), 0);
        assert_eq!(compute_fifo_length(500_000_000, 10_000_000, 0), 0);
    }

    #[test]
    fn test_kernel_buffer_length() {
        assert_eq!(kernel_buffer_length(0), 2);
        assert_eq!(kernel_buffer_length(1), 2);
        assert_eq!(kernel_buffer_length(20), 40);
    }
}
