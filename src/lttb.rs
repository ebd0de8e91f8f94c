//! Largest-Triangle-Three-Buckets downsampling.
//!
//! LTTB keeps the visual shape of a line series while reducing it to a fixed
//! number of points. The first and last points are always kept; the interior
//! is split into `target - 2` buckets and each bucket contributes the point
//! forming the largest triangle with the previously selected point and the
//! mean of the following bucket.

/// Select the indices LTTB keeps when reducing `points` to `target`.
///
/// Returns all indices when `points.len() <= target` or `target == 0`.
/// Indices are strictly increasing, so they can be applied to any number of
/// parallel arrays.
pub fn select_indices(points: &[(f64, f64)], target: usize) -> Vec<usize> {
    let n = points.len();
    if target == 0 || n <= target {
        return (0..n).collect();
    }
    match target {
        1 => return vec![0],
        2 => return vec![0, n - 1],
        _ => {}
    }

    let bucket_width = (n - 2) as f64 / (target - 2) as f64;
    let bucket_bound = |i: usize| ((i as f64 * bucket_width).floor() as usize + 1).min(n - 1);

    let mut selected = Vec::with_capacity(target);
    selected.push(0);
    let mut a = 0;

    for bucket in 0..target - 2 {
        let range_start = bucket_bound(bucket);
        let range_end = bucket_bound(bucket + 1).max(range_start + 1);

        // The final bucket's successor is the last point itself.
        let next_end = if bucket + 3 >= target {
            n
        } else {
            bucket_bound(bucket + 2)
        };
        let (cx, cy) = mean(&points[range_end.min(next_end)..next_end]);

        let (ax, ay) = points[a];
        let mut best = range_start;
        let mut best_area = -1.0;
        for (offset, &(bx, by)) in points[range_start..range_end].iter().enumerate() {
            let area = 0.5 * ((ax - cx) * (by - ay) - (ax - bx) * (cy - ay)).abs();
            if area > best_area {
                best_area = area;
                best = range_start + offset;
            }
        }

        selected.push(best);
        a = best;
    }

    selected.push(n - 1);
    selected
}

/// Downsample `points` to `target` points with LTTB.
pub fn downsample(points: &[(f64, f64)], target: usize) -> Vec<(f64, f64)> {
    select_indices(points, target)
        .into_iter()
        .map(|i| points[i])
        .collect()
}

/// Arithmetic mean of a bucket, `(0, 0)` when empty.
fn mean(bucket: &[(f64, f64)]) -> (f64, f64) {
    if bucket.is_empty() {
        return (0.0, 0.0);
    }
    let (sx, sy) = bucket
        .iter()
        .fold((0.0, 0.0), |(sx, sy), &(x, y)| (sx + x, sy + y));
    let len = bucket.len() as f64;
    (sx / len, sy / len)
}
