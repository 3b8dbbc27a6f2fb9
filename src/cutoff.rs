//! Per-gene read-count cut-off estimation.
//!
//! The counts of every feature found at the spots where a gene is expressed
//! are sorted and their squared cumulative sum is compared against a uniform
//! ramp. The position of the largest gap is the change point; the cut-off is
//! the first count strictly above the count found there.

const MIN_SEGMENT_LEN: usize = 2;

pub fn estimate_read_cutoff(counts: &[u32]) -> u32 {
    let Some(&min) = counts.iter().min() else {
        return 0;
    };
    let n = counts.len();
    if n < MIN_SEGMENT_LEN + 1 || counts.iter().all(|&c| c == counts[0]) {
        return min;
    }

    let mut sorted = counts.to_vec();
    sorted.sort_unstable();

    // cumulative[i] = sum of squares of the i smallest counts
    let mut cumulative = Vec::with_capacity(n + 1);
    cumulative.push(0.0f64);
    let mut acc = 0.0f64;
    for &c in &sorted {
        acc += (c as f64) * (c as f64);
        cumulative.push(acc);
    }
    let total = acc;

    let mut tau = 0usize;
    let mut best = f64::MIN;
    for (i, step) in (MIN_SEGMENT_LEN..n).enumerate() {
        let gap = (cumulative[step] / total - step as f64 / n as f64).abs();
        if gap > best {
            best = gap;
            tau = i;
        }
    }

    let pivot = sorted[tau];
    let upper = sorted.partition_point(|&c| c <= pivot);
    sorted.get(upper).copied().unwrap_or(pivot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trivial_inputs_use_minimum() {
        assert_eq!(estimate_read_cutoff(&[]), 0);
        assert_eq!(estimate_read_cutoff(&[7, 3]), 3);
        assert_eq!(estimate_read_cutoff(&[4, 4, 4, 4]), 4);
    }

    #[test]
    fn bimodal_counts_split_at_high_group() {
        assert_eq!(estimate_read_cutoff(&[10, 1, 1, 10, 1, 1, 10]), 10);
    }

    #[test]
    fn result_is_an_observed_count() {
        let counts = [3, 8, 1, 12, 5, 5, 40, 2, 9];
        let cut = estimate_read_cutoff(&counts);
        assert!(counts.contains(&cut));
    }
}
