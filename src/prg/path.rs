//! Ordered sequences of `Interval`s describing a walk through a `LocalGraph`.

use std::fmt;
use std::str::FromStr;

use super::interval::Interval;

/// An ordered, possibly-empty sequence of non-overlapping intervals whose
/// total length equals the kmer window they represent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Path {
    intervals: Vec<Interval>,
}

impl Path {
    pub fn new(intervals: Vec<Interval>) -> Self {
        Path { intervals }
    }

    pub fn empty() -> Self {
        Path::default()
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    pub fn push(&mut self, interval: Interval) {
        self.intervals.push(interval);
    }

    pub fn length(&self) -> usize {
        self.intervals.iter().map(Interval::length).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Extract the subpath of `length` bases starting `start` bases into this
    /// path, splitting intervals at their boundaries as necessary.
    pub fn subpath(&self, start: usize, length: usize) -> Path {
        let mut out = Vec::new();
        let mut consumed = 0usize;
        let mut remaining_skip = start;
        let mut remaining_take = length;

        for interval in &self.intervals {
            if remaining_take == 0 {
                break;
            }
            let ilen = interval.length();
            if remaining_skip >= ilen {
                remaining_skip -= ilen;
                consumed += ilen;
                continue;
            }
            let local_start = interval.start + remaining_skip;
            let available = ilen - remaining_skip;
            let take = available.min(remaining_take);
            out.push(Interval::new(local_start, local_start + take));
            remaining_take -= take;
            remaining_skip = 0;
            consumed += ilen;
        }
        let _ = consumed;
        Path::new(out)
    }
}

impl PartialOrd for Path {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Path {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.intervals.cmp(&other.intervals)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.intervals.is_empty() {
            return write!(f, "{{}}");
        }
        let parts: Vec<String> = self.intervals.iter().map(|i| i.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid path serialization: {0}")]
pub struct PathParseError(String);

impl FromStr for Path {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "{}" || s.is_empty() {
            return Ok(Path::empty());
        }
        let mut intervals = Vec::new();
        for part in s.split(',') {
            let (start_s, end_s) = part
                .split_once('-')
                .ok_or_else(|| PathParseError(s.to_owned()))?;
            let start: usize = start_s.parse().map_err(|_| PathParseError(s.to_owned()))?;
            let end: usize = end_s.parse().map_err(|_| PathParseError(s.to_owned()))?;
            intervals.push(Interval::new(start, end));
        }
        Ok(Path::new(intervals))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn subpath_extracts_across_interval_boundary() {
        let path = Path::new(vec![Interval::new(0, 4), Interval::new(10, 13)]);
        // path represents positions [0,1,2,3] ++ [10,11,12] => length 7
        let sub = path.subpath(2, 3);
        assert_eq!(sub.intervals(), &[Interval::new(2, 4), Interval::new(10, 11)]);
    }

    #[test]
    fn round_trips_through_display_and_parse() {
        let path = Path::new(vec![Interval::new(0, 4), Interval::new(10, 13)]);
        let s = path.to_string();
        let parsed: Path = s.parse().unwrap();
        assert_eq!(path, parsed);
    }

    #[test]
    fn empty_path_round_trips() {
        let path = Path::empty();
        assert_eq!(path.to_string(), "{}");
        let parsed: Path = "{}".parse().unwrap();
        assert_eq!(parsed, Path::empty());
    }

    #[test]
    fn total_ordering_is_lexicographic_by_intervals() {
        let a = Path::new(vec![Interval::new(0, 2)]);
        let b = Path::new(vec![Interval::new(0, 3)]);
        assert!(a < b);
    }
}
