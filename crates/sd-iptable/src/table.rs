use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use thiserror::Error;
use tracing::warn;

use crate::cidr::Interval;
use crate::{DEFAULT_GROUP, FIRST_SOURCE_GROUP, GroupId};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TableError {
    #[error("Range {first_start}-{first_end} (group {first_group}) overlaps {second_start}-{second_end} (group {second_group})")]
    Overlap {
        first_start: Ipv4Addr,
        first_end: Ipv4Addr,
        first_group: GroupId,
        second_start: Ipv4Addr,
        second_end: Ipv4Addr,
        second_group: GroupId,
    },
}

/// What to do when two configured ranges share addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Fail the build.
    #[default]
    Reject,
    /// Log and keep going. Shared addresses belong to the range listed
    /// first: earlier source, then earlier line.
    Allow,
}

/// Sorted, immutable interval table.
///
/// Built once before serving and only read afterwards, so lookups need no
/// synchronization when the table is shared behind an `Arc`.
#[derive(Debug, Default)]
pub struct IntervalTable {
    intervals: Box<[Interval]>,
}

impl IntervalTable {
    /// Build from intervals that already carry their group, in precedence
    /// order.
    pub fn new(intervals: Vec<Interval>, policy: OverlapPolicy) -> Result<Self, TableError> {
        let mut sorted = intervals.clone();
        sorted.sort_unstable_by_key(|iv| (iv.start, iv.end));

        let mut overlapping = false;
        for pair in sorted.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if b.start <= a.end {
                let err = TableError::Overlap {
                    first_start: a.first_address(),
                    first_end: a.last_address(),
                    first_group: a.group,
                    second_start: b.first_address(),
                    second_end: b.last_address(),
                    second_group: b.group,
                };
                match policy {
                    OverlapPolicy::Reject => return Err(err),
                    OverlapPolicy::Allow => warn!("{}", err),
                }
                overlapping = true;
            }
        }

        // The lookup needs disjoint ranges
        if overlapping {
            sorted = flatten(&intervals);
        }

        Ok(Self {
            intervals: sorted.into_boxed_slice(),
        })
    }

    /// Build from one interval list per source. Source `i` becomes group
    /// `FIRST_SOURCE_GROUP + i`.
    pub fn from_sources<I>(sources: I, policy: OverlapPolicy) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = Vec<Interval>>,
    {
        let mut all = Vec::new();
        for (i, source) in sources.into_iter().enumerate() {
            let group = FIRST_SOURCE_GROUP + i as GroupId;
            all.extend(source.into_iter().map(|iv| iv.with_group(group)));
        }
        Self::new(all, policy)
    }

    /// Group of `ip`, or `DEFAULT_GROUP` when no range covers it.
    ///
    /// O(log n), no allocation.
    pub fn classify(&self, ip: Ipv4Addr) -> GroupId {
        self.classify_u32(u32::from(ip))
    }

    pub fn classify_u32(&self, ip: u32) -> GroupId {
        let idx = self.intervals.partition_point(|iv| iv.end < ip);
        match self.intervals.get(idx) {
            Some(iv) if iv.start <= ip => iv.group,
            _ => DEFAULT_GROUP,
        }
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interval> {
        self.intervals.iter()
    }

    /// Number of distinct groups present in the table.
    pub fn group_count(&self) -> usize {
        let mut groups: Vec<GroupId> = self.intervals.iter().map(|iv| iv.group).collect();
        groups.sort_unstable();
        groups.dedup();
        groups.len()
    }
}

/// Split overlapping intervals into sorted, disjoint pieces. Where several
/// intervals cover an address, the one earliest in `intervals` wins.
/// Adjacent pieces of the same group are merged.
fn flatten(intervals: &[Interval]) -> Vec<Interval> {
    // (boundary, rank); a range opens at `start` and closes at `end + 1`
    let mut opens: Vec<(u64, usize)> = Vec::with_capacity(intervals.len());
    let mut closes: Vec<(u64, usize)> = Vec::with_capacity(intervals.len());
    for (rank, iv) in intervals.iter().enumerate() {
        opens.push((u64::from(iv.start), rank));
        closes.push((u64::from(iv.end) + 1, rank));
    }
    opens.sort_unstable();
    closes.sort_unstable();

    let mut boundaries: Vec<u64> = opens.iter().chain(&closes).map(|&(at, _)| at).collect();
    boundaries.sort_unstable();
    boundaries.dedup();

    let mut active = BTreeSet::new();
    let (mut next_open, mut next_close) = (0, 0);
    let mut pieces: Vec<Interval> = Vec::new();

    for window in boundaries.windows(2) {
        let (at, until) = (window[0], window[1]);
        while next_close < closes.len() && closes[next_close].0 == at {
            active.remove(&closes[next_close].1);
            next_close += 1;
        }
        while next_open < opens.len() && opens[next_open].0 == at {
            active.insert(opens[next_open].1);
            next_open += 1;
        }

        let Some(&winner) = active.first() else { continue };
        let group = intervals[winner].group;
        // `at < until <= 2^32`, so both bounds fit
        let (start, end) = (at as u32, (until - 1) as u32);
        match pieces.last_mut() {
            Some(last) if last.group == group && u64::from(last.end) + 1 == at => last.end = end,
            _ => pieces.push(Interval { start, end, group }),
        }
    }

    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_LOCAL_GROUP;

    fn cidr(entry: &str) -> Interval {
        Interval::parse_cidr(entry).unwrap()
    }

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_single_range_lookup() {
        let table =
            IntervalTable::new(vec![cidr("1.2.3.0/24").with_group(1)], OverlapPolicy::Reject).unwrap();
        assert_eq!(table.classify(ip("1.2.3.100")), 1);
        assert_eq!(table.classify(ip("1.2.4.1")), DEFAULT_GROUP);
    }

    #[test]
    fn test_every_address_in_range_and_neighbours() {
        let iv = cidr("10.0.8.0/22").with_group(7);
        let table = IntervalTable::new(vec![iv], OverlapPolicy::Reject).unwrap();

        for addr in iv.start..=iv.end {
            assert_eq!(table.classify_u32(addr), 7);
        }
        assert_eq!(table.classify_u32(iv.start - 1), DEFAULT_GROUP);
        assert_eq!(table.classify_u32(iv.end + 1), DEFAULT_GROUP);
    }

    #[test]
    fn test_sources_are_numbered_from_two() {
        let table = IntervalTable::from_sources(
            vec![
                vec![cidr("1.0.0.0/24"), cidr("1.0.4.0/22")],
                vec![cidr("2.0.0.0/16")],
                vec![cidr("3.3.3.3/32")],
            ],
            OverlapPolicy::Reject,
        )
        .unwrap();

        assert_eq!(table.classify(ip("1.0.0.9")), FIRST_SOURCE_GROUP);
        assert_eq!(table.classify(ip("1.0.7.255")), FIRST_SOURCE_GROUP);
        assert_eq!(table.classify(ip("2.0.200.1")), FIRST_SOURCE_GROUP + 1);
        assert_eq!(table.classify(ip("3.3.3.3")), FIRST_SOURCE_GROUP + 2);
        assert_eq!(table.classify(ip("1.0.1.0")), DEFAULT_GROUP);
        assert_eq!(table.group_count(), 3);
        assert!(table.iter().all(|iv| iv.group != DEFAULT_GROUP && iv.group != DEFAULT_LOCAL_GROUP));
    }

    #[test]
    fn test_sorted_after_build() {
        let table = IntervalTable::from_sources(
            vec![
                vec![cidr("200.1.0.0/16"), cidr("5.0.0.0/8")],
                vec![cidr("100.0.0.0/8"), cidr("1.1.1.0/24")],
            ],
            OverlapPolicy::Reject,
        )
        .unwrap();

        let starts: Vec<u32> = table.iter().map(|iv| iv.start).collect();
        assert!(starts.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_overlap_rejected() {
        let err = IntervalTable::from_sources(
            vec![vec![cidr("10.0.0.0/8")], vec![cidr("10.1.0.0/16")]],
            OverlapPolicy::Reject,
        )
        .unwrap_err();

        assert!(matches!(err, TableError::Overlap { first_group: 2, second_group: 3, .. }));
    }

    fn assert_disjoint(table: &IntervalTable) {
        let ivs: Vec<&Interval> = table.iter().collect();
        assert!(ivs.iter().all(|iv| iv.start <= iv.end));
        assert!(ivs.windows(2).all(|w| w[0].end < w[1].start));
    }

    #[test]
    fn test_overlap_allowed_earlier_source_wins() {
        let table = IntervalTable::from_sources(
            vec![vec![cidr("10.0.0.0/8")], vec![cidr("10.1.0.0/16")]],
            OverlapPolicy::Allow,
        )
        .unwrap();
        assert_disjoint(&table);
        assert_eq!(table.len(), 1);
        assert_eq!(table.classify(ip("10.1.2.3")), FIRST_SOURCE_GROUP);
    }

    #[test]
    fn test_wide_range_enclosing_narrow_ones() {
        let table = IntervalTable::from_sources(
            vec![vec![cidr("10.0.0.0/8")], vec![cidr("10.1.0.0/16"), cidr("10.2.0.0/16")]],
            OverlapPolicy::Allow,
        )
        .unwrap();
        assert_disjoint(&table);
        for addr in ["10.0.0.0", "10.1.0.1", "10.2.255.255", "10.200.0.1", "10.255.255.255"] {
            assert_eq!(table.classify(ip(addr)), FIRST_SOURCE_GROUP, "{addr}");
        }
        assert_eq!(table.classify(ip("11.0.0.0")), DEFAULT_GROUP);
    }

    #[test]
    fn test_narrow_earlier_source_punches_hole() {
        let table = IntervalTable::from_sources(
            vec![vec![cidr("10.1.0.0/16"), cidr("10.3.0.0/16")], vec![cidr("10.0.0.0/8")]],
            OverlapPolicy::Allow,
        )
        .unwrap();
        assert_disjoint(&table);
        assert_eq!(table.len(), 5);

        let wide = FIRST_SOURCE_GROUP + 1;
        assert_eq!(table.classify(ip("10.0.255.255")), wide);
        assert_eq!(table.classify(ip("10.1.0.0")), FIRST_SOURCE_GROUP);
        assert_eq!(table.classify(ip("10.1.255.255")), FIRST_SOURCE_GROUP);
        assert_eq!(table.classify(ip("10.2.0.0")), wide);
        assert_eq!(table.classify(ip("10.3.4.5")), FIRST_SOURCE_GROUP);
        assert_eq!(table.classify(ip("10.200.0.1")), wide);
        assert_eq!(table.classify(ip("9.255.255.255")), DEFAULT_GROUP);
    }

    #[test]
    fn test_overlap_at_top_of_address_space() {
        let table = IntervalTable::from_sources(
            vec![vec![cidr("255.255.255.0/24")], vec![cidr("255.0.0.0/8")]],
            OverlapPolicy::Allow,
        )
        .unwrap();
        assert_disjoint(&table);
        assert_eq!(table.classify(ip("255.255.255.255")), FIRST_SOURCE_GROUP);
        assert_eq!(table.classify(ip("255.255.254.255")), FIRST_SOURCE_GROUP + 1);
    }

    #[test]
    fn test_adjacent_ranges_do_not_overlap() {
        let table = IntervalTable::from_sources(
            vec![vec![cidr("1.0.2.0/23")], vec![cidr("1.0.4.0/23")]],
            OverlapPolicy::Reject,
        )
        .unwrap();
        assert_eq!(table.classify(ip("1.0.3.255")), 2);
        assert_eq!(table.classify(ip("1.0.4.0")), 3);
    }

    #[test]
    fn test_empty_table() {
        let table = IntervalTable::default();
        assert!(table.is_empty());
        assert_eq!(table.classify(ip("8.8.8.8")), DEFAULT_GROUP);
        assert_eq!(table.classify(ip("0.0.0.0")), DEFAULT_GROUP);
        assert_eq!(table.classify(ip("255.255.255.255")), DEFAULT_GROUP);
    }

    #[test]
    fn test_full_space_edges() {
        let table = IntervalTable::new(
            vec![cidr("0.0.0.0/8").with_group(4), cidr("255.0.0.0/8").with_group(5)],
            OverlapPolicy::Reject,
        )
        .unwrap();
        assert_eq!(table.classify(ip("0.0.0.0")), 4);
        assert_eq!(table.classify(ip("255.255.255.255")), 5);
        assert_eq!(table.classify(ip("128.0.0.1")), DEFAULT_GROUP);
    }
}
