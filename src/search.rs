//! Index lookup helpers over sorted time axes and raw value slices.
use num_traits::Float;

/// Perform a linear local search looking to the left (decreasing)
pub fn nearest_left<T: Float>(vec: &[T], target_val: T, start_index: usize) -> usize {
    let mut nearest_index = start_index;
    let mut next_index = start_index;
    if next_index == 0 {
        return 0;
    }
    let mut best_distance = (vec[next_index] - target_val).abs();
    while vec[next_index] > target_val {
        next_index -= 1;
        let dist = (vec[next_index] - target_val).abs();
        if dist < best_distance {
            best_distance = dist;
            nearest_index = next_index;
        }
        if next_index == 0 {
            break;
        }
    }
    nearest_index
}

/// Perform a linear local search looking to the right (increasing)
pub fn nearest_right<T: Float>(vec: &[T], target_val: T, start_index: usize) -> usize {
    let mut nearest_index = start_index;
    let mut next_index = start_index;
    let n = vec.len() - 1;
    if next_index >= n {
        return n;
    }
    let mut best_distance = (vec[next_index] - target_val).abs();
    while vec[next_index] < target_val {
        next_index += 1;
        let dist = (vec[next_index] - target_val).abs();
        if dist < best_distance {
            best_distance = dist;
            nearest_index = next_index;
        }
        if next_index == n {
            break;
        }
    }
    nearest_index
}

/// Find the index in a sorted `vec` whose value is closest to `target_val`
pub fn nearest<T: Float>(vec: &[T], target_val: T) -> usize {
    if vec.is_empty() {
        return 0;
    }
    let n = vec.len() - 1;

    if target_val > vec[n] {
        return n;
    } else if target_val < vec[0] {
        return 0;
    }

    let near = match vec.binary_search_by(|x| x.partial_cmp(&target_val).unwrap()) {
        Ok(i) => i,
        Err(i) => i,
    };
    if near <= n {
        if vec[near] <= target_val {
            nearest_right(vec, target_val, near)
        } else {
            nearest_left(vec, target_val, near)
        }
    } else {
        n
    }
}

pub fn binsearch<T: Float>(array: &[T], q: T) -> usize {
    match array.binary_search_by(|x| x.partial_cmp(&q).unwrap()) {
        Ok(i) => i,
        Err(i) => i,
    }
}

/// The index of the smallest value in `slice`, ties broken towards the
/// lower index. Returns 0 for an empty slice.
pub fn argmin<T: Float>(slice: &[T]) -> usize {
    let mut best = 0;
    for (i, v) in slice.iter().enumerate() {
        if *v < slice[best] {
            best = i;
        }
    }
    best
}

/// The index of the largest value in `slice`, ties broken towards the
/// lower index. Returns 0 for an empty slice.
pub fn argmax<T: Float>(slice: &[T]) -> usize {
    let mut best = 0;
    for (i, v) in slice.iter().enumerate() {
        if *v > slice[best] {
            best = i;
        }
    }
    best
}
