//! Aligning the sample streams of two armbands.
//!
//! Two dongles feed two independent controllers, each stamping its own
//! 200 Hz grid. Rows are paired by timestamp proximity: for each sample of
//! the first stream, the second stream's cursor advances while it lags by
//! more than the threshold; the first sample is skipped when the second
//! stream is ahead by more than the threshold; otherwise a pair is emitted
//! and the cursor moves on.

use crate::stream::JointSample;

/// Maximum timestamp difference, in seconds, between paired rows.
pub const COPY_THRESHOLD: f64 = 30.0 / 1000.0;

/// Align two ascending timestamp sequences. Returns `(first, second)` index
/// pairs; every emitted pair satisfies `|t_first - t_second| <= threshold`.
pub fn align_streams(first: &[f64], second: &[f64], threshold: f64) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    let mut second_offset = 0usize;

    for (first_idx, &t_first) in first.iter().enumerate() {
        // Let the second stream catch up while it lags.
        while second_offset < second.len() && t_first - second[second_offset] > threshold {
            second_offset += 1;
        }
        if second_offset >= second.len() {
            break;
        }
        // Second stream is ahead; drop this first-stream sample instead.
        if second[second_offset] - t_first > threshold {
            continue;
        }
        pairs.push((first_idx, second_offset));
        second_offset += 1;
    }

    pairs
}

/// Pair two joint-sample streams using [`COPY_THRESHOLD`].
pub fn pair_samples<'a>(
    first: &'a [JointSample],
    second: &'a [JointSample],
) -> Vec<(&'a JointSample, &'a JointSample)> {
    let t_first: Vec<f64> = first.iter().map(|s| s.timestamp).collect();
    let t_second: Vec<f64> = second.iter().map(|s| s.timestamp).collect();
    align_streams(&t_first, &t_second, COPY_THRESHOLD)
        .into_iter()
        .map(|(i, j)| (&first[i], &second[j]))
        .collect()
}
