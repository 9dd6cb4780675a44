//! Interval profiling for kernel work.

use std::sync::Mutex;
use std::time::Instant;
use serde::Serialize;

/// Receives labelled time intervals.
pub trait Profiler: Send + Sync {
    fn add_interval(&self, label: &str, start: Instant, end: Instant);
}

/// One recorded interval, in nanoseconds since the profiler was created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interval {
    pub label: String,
    pub start_ns: u64,
    pub end_ns: u64,
}

impl Interval {
    pub fn duration_ns(&self) -> u64 {
        self.end_ns.saturating_sub(self.start_ns)
    }
}

#[derive(Serialize)]
struct TraceEvent<'a> {
    name: &'a str,
    ph: &'static str,
    ts: f64,
    dur: f64,
    pid: u32,
    tid: u32,
}

/// A profiler that keeps every interval in memory.
#[derive(Debug)]
pub struct IntervalProfiler {
    epoch: Instant,
    worker: u32,
    intervals: Mutex<Vec<Interval>>,
}

impl IntervalProfiler {
    /// `worker` identifies this profiler's lane in exported traces.
    pub fn new(worker: u32) -> Self {
        Self {
            epoch: Instant::now(),
            worker,
            intervals: Mutex::new(vec![]),
        }
    }

    /// Snapshot of every interval recorded so far, in recording order
    pub fn intervals(&self) -> Vec<Interval> {
        self.intervals
            .lock()
            .map(|intervals| intervals.clone())
            .unwrap_or_default()
    }

    /// Total time spent in intervals carrying `label`
    pub fn total_ns(&self, label: &str) -> u64 {
        self.intervals()
            .iter()
            .filter(|interval| interval.label == label)
            .map(Interval::duration_ns)
            .sum()
    }

    /// Export as Chrome trace-event JSON; timestamps are microseconds.
    pub fn to_trace_json(&self) -> serde_json::Result<String> {
        let intervals = self.intervals();
        let events: Vec<TraceEvent> = intervals
            .iter()
            .map(|interval| TraceEvent {
                name: &interval.label,
                ph: "X",
                ts: interval.start_ns as f64 / 1000.0,
                dur: interval.duration_ns() as f64 / 1000.0,
                pid: self.worker,
                tid: 0,
            })
            .collect();
        serde_json::to_string(&events)
    }

    fn since_epoch(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.epoch).as_nanos() as u64
    }
}

impl Profiler for IntervalProfiler {
    fn add_interval(&self, label: &str, start: Instant, end: Instant) {
        let interval = Interval {
            label: label.to_string(),
            start_ns: self.since_epoch(start),
            end_ns: self.since_epoch(end),
        };
        if let Ok(mut intervals) = self.intervals.lock() {
            intervals.push(interval);
        }
    }
}
