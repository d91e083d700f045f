use std::cmp::Ordering;

/// Version the host reports for a module it has no version record for.
pub const NOT_INSTALLED: &str = "0.0.0";

pub fn is_sentinel(version: &str) -> bool {
    compare(version, NOT_INSTALLED) == Ordering::Equal
}

/// Dot-separated numeric segment comparison. Missing segments count as zero,
/// so "1.2" == "1.2.0". Non-numeric segments also count as zero.
pub fn compare(left: &str, right: &str) -> Ordering {
    let left = segments(left);
    let right = segments(right);
    let len = left.len().max(right.len());
    for index in 0..len {
        let a = left.get(index).copied().unwrap_or(0);
        let b = right.get(index).copied().unwrap_or(0);
        match a.cmp(&b) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

pub fn is_newer(candidate: &str, current: &str) -> bool {
    compare(current, candidate) == Ordering::Less
}

fn segments(raw: &str) -> Vec<u64> {
    let raw = raw
        .trim()
        .trim_start_matches('v')
        .split(['-', '+'])
        .next()
        .unwrap_or("");
    raw.split('.')
        .map(|part| part.trim().parse::<u64>().unwrap_or(0))
        .collect()
}
