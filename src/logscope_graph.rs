//! Time bucketing for the histogram and brush-to-range mapping.

use crate::logscope_core::{GraphEntry, Millis, TimeRange};

const SECOND: Millis = 1_000;
const MINUTE: Millis = 60 * SECOND;
const HOUR: Millis = 60 * MINUTE;
const DAY: Millis = 24 * HOUR;
const YEAR: Millis = 365 * DAY;

/// Candidate bucket widths, smallest first.
pub const NICE_INTERVALS_MS: [Millis; 15] = [
    SECOND,
    5 * SECOND,
    10 * SECOND,
    30 * SECOND,
    MINUTE,
    5 * MINUTE,
    10 * MINUTE,
    30 * MINUTE,
    HOUR,
    3 * HOUR,
    12 * HOUR,
    DAY,
    7 * DAY,
    30 * DAY,
    YEAR,
];

const MAX_BUCKETS_HARD: Millis = 10_000;

/// Smallest nice interval that fits `range` into at most `max_buckets` buckets.
pub fn bucket_interval(range: &TimeRange, max_buckets: usize) -> Millis {
    let max_buckets = Millis::try_from(max_buckets.max(1)).unwrap_or(MAX_BUCKETS_HARD);
    let span = range.span_ms().max(1);
    let raw = (span + max_buckets - 1) / max_buckets;
    NICE_INTERVALS_MS
        .iter()
        .copied()
        .find(|interval| *interval >= raw)
        .unwrap_or_else(|| ((raw + YEAR - 1) / YEAR) * YEAR)
}

pub fn interval_label(interval_ms: Millis) -> String {
    let units = [(YEAR, "y"), (DAY, "d"), (HOUR, "h"), (MINUTE, "m"), (SECOND, "s")];
    for (unit, suffix) in units {
        if interval_ms >= unit && interval_ms % unit == 0 {
            return format!("{}{suffix}", interval_ms / unit);
        }
    }
    format!("{interval_ms}ms")
}

#[derive(Clone, Debug, PartialEq)]
pub struct Bucket {
    pub start: Millis,
    pub count: u64,
    pub mean: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Histogram {
    pub range: TimeRange,
    pub interval_ms: Millis,
    pub buckets: Vec<Bucket>,
}

impl Histogram {
    /// Empty buckets covering `range`, aligned to multiples of the interval.
    pub fn empty(range: TimeRange, interval_ms: Millis) -> Self {
        let span = range.span_ms();
        let floor_interval = (span + MAX_BUCKETS_HARD - 1) / MAX_BUCKETS_HARD;
        let interval_ms = interval_ms.max(floor_interval).max(1);
        let first = range.from_ms().div_euclid(interval_ms) * interval_ms;
        let last = range.to_ms().div_euclid(interval_ms) * interval_ms;

        let mut buckets = Vec::new();
        let mut start = first;
        while start <= last {
            buckets.push(Bucket { start, count: 0, mean: None });
            start += interval_ms;
        }
        Self { range, interval_ms, buckets }
    }

    pub fn from_timestamps(
        range: TimeRange,
        interval_ms: Millis,
        timestamps: impl IntoIterator<Item = Millis>,
    ) -> Self {
        let mut histogram = Self::empty(range, interval_ms);
        for timestamp in timestamps {
            histogram.add(timestamp);
        }
        histogram
    }

    fn slot(&self, timestamp: Millis) -> Option<usize> {
        let first = self.buckets.first()?.start;
        let aligned = timestamp.div_euclid(self.interval_ms) * self.interval_ms;
        if aligned < first {
            return None;
        }
        let idx = usize::try_from((aligned - first) / self.interval_ms).ok()?;
        (idx < self.buckets.len()).then_some(idx)
    }

    pub fn add(&mut self, timestamp: Millis) -> bool {
        match self.slot(timestamp) {
            Some(idx) => {
                self.buckets[idx].count += 1;
                true
            }
            None => false,
        }
    }

    /// Adds server-side bucket counts. Repeated calls (one per segment) accumulate.
    pub fn merge_entries(&mut self, entries: &[GraphEntry]) {
        for entry in entries {
            let Some(idx) = self.slot(entry.time) else {
                continue;
            };
            let bucket = &mut self.buckets[idx];
            if let Some(mean) = entry.mean {
                let previous = bucket.mean.unwrap_or(0.0) * bucket.count as f64;
                let combined = bucket.count + entry.count;
                bucket.mean = if combined == 0 {
                    Some(mean)
                } else {
                    Some((previous + mean * entry.count as f64) / combined as f64)
                };
            }
            bucket.count += entry.count;
        }
    }

    pub fn max_count(&self) -> u64 {
        self.buckets.iter().map(|bucket| bucket.count).max().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.buckets.iter().map(|bucket| bucket.count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Pixel extent of a rendered chart and the time range it spans.
#[derive(Clone, Debug, PartialEq)]
pub struct ChartGeometry {
    pub width: u32,
    pub range: TimeRange,
}

impl ChartGeometry {
    pub fn new(width: u32, range: TimeRange) -> Self {
        Self { width, range }
    }

    pub fn time_at(&self, px: u32) -> Millis {
        if self.width == 0 {
            return self.range.from_ms();
        }
        let px = i128::from(px.min(self.width));
        let span = i128::from(self.range.span_ms());
        let offset = span * px / i128::from(self.width);
        self.range.from_ms() + offset as Millis
    }

    pub fn px_at(&self, timestamp: Millis) -> u32 {
        let span = self.range.span_ms();
        if span == 0 || self.width == 0 {
            return 0;
        }
        let offset = (timestamp - self.range.from_ms()).clamp(0, span);
        let px = i128::from(offset) * i128::from(self.width) / i128::from(span);
        px as u32
    }

    /// Maps a selected pixel span onto the chart's time range. Empty spans select nothing.
    pub fn brush(&self, px_from: u32, px_to: u32) -> Option<TimeRange> {
        if self.width == 0 {
            return None;
        }
        let (start, end) = if px_from <= px_to { (px_from, px_to) } else { (px_to, px_from) };
        let (start, end) = (start.min(self.width), end.min(self.width));
        if start == end {
            return None;
        }
        TimeRange::from_millis(self.time_at(start), self.time_at(end))
    }
}
