// SPDX-License-Identifier: GPL-3.0-only

//! Alignment and byte-range arithmetic shared by the partition engine

use num_format::{Locale, ToFormattedString};

/// One mebibyte; partition starts and ends are aligned to it.
pub const MIB: u64 = 1024 * 1024;

/// Sectors kept free at the end of the disk for the secondary GPT
/// (header plus a 128-entry array at 512-byte sectors).
pub const GPT_TAIL_SECTORS: u64 = 33;

/// Round `value` up to a multiple of `unit`.
pub fn ceil_to(value: u64, unit: u64) -> u64 {
    value.div_ceil(unit) * unit
}

/// Round `value` down to a multiple of `unit`.
pub fn floor_to(value: u64, unit: u64) -> u64 {
    (value / unit) * unit
}

/// Complement of a set of closed ranges within `[min, max]`.
///
/// Ranges may arrive unsorted, overlapping, or engulfing one another; they are
/// merged as they are walked. Ranges outside `[min, max]` are clipped away.
pub fn find_range_gaps(ranges: &[(u64, u64)], min: u64, max: u64) -> Vec<(u64, u64)> {
    let mut sorted: Vec<(u64, u64)> = ranges
        .iter()
        .copied()
        .filter(|(start, last)| start <= last && *last >= min && *start <= max)
        .collect();
    sorted.sort_unstable();

    let mut gaps = Vec::new();
    // None once the cursor has moved past u64::MAX or past max.
    let mut cursor = Some(min);

    for (start, last) in sorted {
        let Some(pos) = cursor else { break };
        if start > pos {
            gaps.push((pos, start - 1));
        }
        if last >= pos {
            cursor = last.checked_add(1).filter(|next| *next <= max);
        }
    }

    if let Some(pos) = cursor {
        if pos <= max {
            gaps.push((pos, max));
        }
    }

    gaps
}

/// Convert bytes to human-readable format (e.g., "1.50 GB")
pub fn bytes_to_pretty(bytes: &u64, add_bytes: bool) -> String {
    let mut steps = 0;
    let mut val: f64 = *bytes as f64;

    while val > 1024. && steps <= 8 {
        val /= 1024.;
        steps += 1;
    }

    let unit = match steps {
        0 => "B",
        1 => "KB",
        2 => "MB",
        3 => "GB",
        4 => "TB",
        5 => "PB",
        6 => "EB",
        7 => "ZB",
        8 => "YB",
        _ => "Not Supported",
    };

    if add_bytes {
        let bytes_str = bytes.to_formatted_string(&Locale::en);
        format!("{:.2} {} ({} bytes)", val, unit, bytes_str)
    } else {
        format!("{:.2} {}", val, unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_helpers() {
        assert_eq!(ceil_to(98, 4), 100);
        assert_eq!(ceil_to(100, 4), 100);
        assert_eq!(floor_to(98, 4), 96);
        assert_eq!(floor_to(100, 4), 100);
        assert_eq!(ceil_to(1, MIB), MIB);
        assert_eq!(floor_to(MIB - 1, MIB), 0);
    }

    #[test]
    fn gaps_without_ranges() {
        assert_eq!(find_range_gaps(&[], 0, 100), vec![(0, 100)]);
    }

    #[test]
    fn gaps_around_strict_subset() {
        assert_eq!(
            find_range_gaps(&[(50, 59)], 0, 100),
            vec![(0, 49), (60, 100)]
        );
    }

    #[test]
    fn gaps_with_left_and_right_overlap() {
        assert_eq!(find_range_gaps(&[(0, 50)], 0, 100), vec![(51, 100)]);
        assert_eq!(find_range_gaps(&[(11, 100)], 0, 100), vec![(0, 10)]);
    }

    #[test]
    fn gaps_between_disjoint_ranges() {
        assert_eq!(
            find_range_gaps(&[(11, 49), (60, 90)], 0, 100),
            vec![(0, 10), (50, 59), (91, 100)]
        );
        assert_eq!(
            find_range_gaps(&[(10, 40), (50, 100)], 0, 110),
            vec![(0, 9), (41, 49), (101, 110)]
        );
    }

    #[test]
    fn no_gaps_when_fully_covered() {
        assert_eq!(find_range_gaps(&[(0, 10), (11, 100)], 0, 100), Vec::<(u64, u64)>::new());
        assert_eq!(find_range_gaps(&[(0, 200)], 0, 100), Vec::<(u64, u64)>::new());
    }

    #[test]
    fn engulfed_and_unsorted_ranges_are_merged() {
        assert_eq!(
            find_range_gaps(&[(60, 70), (20, 80), (30, 40)], 0, 100),
            vec![(0, 19), (81, 100)]
        );
    }

    #[test]
    fn ranges_outside_bounds_are_ignored() {
        assert_eq!(
            find_range_gaps(&[(0, 4), (200, 300)], 5, 100),
            vec![(5, 100)]
        );
    }

    #[test]
    fn handles_ranges_touching_u64_max() {
        assert_eq!(
            find_range_gaps(&[(10, u64::MAX)], 0, u64::MAX),
            vec![(0, 9)]
        );
    }

    #[test]
    fn pretty_bytes() {
        assert_eq!(bytes_to_pretty(&(200 * MIB), false), "200.00 MB");
    }
}
