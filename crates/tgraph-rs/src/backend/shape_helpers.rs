//! Shape arithmetic shared by inference, rewrites and backends.

use crate::backend::spec::Dimension;

/// Normalizes a possibly negative axis against `rank`.
pub fn normalize_axis(axis: isize, rank: usize) -> Option<usize> {
    let rank = rank as isize;
    let normalized = if axis < 0 { axis + rank } else { axis };
    (0..rank).contains(&normalized).then_some(normalized as usize)
}

/// Normalizes a scalar index against an extent of `len`.
pub fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let normalized = if index < 0 { index + len } else { index };
    (0..len).contains(&normalized).then_some(normalized as usize)
}

/// Clamped `(start, stop, step)` for a slice over `len` elements.
///
/// `step` must be non-zero. Bounds follow Python's `slice.indices`.
pub fn slice_indices(
    len: usize,
    start: Option<i64>,
    stop: Option<i64>,
    step: Option<i64>,
) -> (i64, i64, i64) {
    let n = len as i64;
    let step = step.unwrap_or(1);
    let (lower, upper) = if step < 0 { (-1, n - 1) } else { (0, n) };
    let clamp = |bound: i64| {
        if bound < 0 {
            (bound + n).max(lower)
        } else {
            bound.min(upper)
        }
    };
    let start = match start {
        Some(bound) => clamp(bound),
        None if step < 0 => upper,
        None => lower,
    };
    let stop = match stop {
        Some(bound) => clamp(bound),
        None if step < 0 => lower,
        None => upper,
    };
    (start, stop, step)
}

/// Number of elements selected by `slice_indices`.
pub fn slice_len(start: i64, stop: i64, step: i64) -> usize {
    if step > 0 && stop > start {
        ((stop - start + step - 1) / step) as usize
    } else if step < 0 && start > stop {
        ((start - stop - step - 1) / -step) as usize
    } else {
        0
    }
}

/// Right-aligned broadcast of two dimension lists, or `None` on a static mismatch.
pub fn broadcast_dims(lhs: &[Dimension], rhs: &[Dimension]) -> Option<Vec<Dimension>> {
    let rank = lhs.len().max(rhs.len());
    let mut out = Vec::with_capacity(rank);
    for idx in 0..rank {
        let a = lookup_right_aligned(lhs, idx, rank);
        let b = lookup_right_aligned(rhs, idx, rank);
        let dim = match (a, b) {
            (Dimension::Static(x), Dimension::Static(y)) if x == y => Dimension::Static(x),
            (Dimension::Static(1), other) | (other, Dimension::Static(1)) => other,
            (Dimension::Static(_), Dimension::Static(_)) => return None,
            (Dimension::Unknown, Dimension::Static(n)) | (Dimension::Static(n), Dimension::Unknown) => {
                Dimension::Static(n)
            }
            (Dimension::Unknown, Dimension::Unknown) => Dimension::Unknown,
        };
        out.push(dim);
    }
    Some(out)
}

fn lookup_right_aligned(dims: &[Dimension], idx: usize, rank: usize) -> Dimension {
    let offset = rank - dims.len();
    if idx < offset {
        Dimension::Static(1)
    } else {
        dims[idx - offset]
    }
}

/// Computes `product(dims)` with overflow checking.
pub fn checked_element_count_or_error<E, F>(dims: &[usize], mut on_overflow: F) -> Result<usize, E>
where
    F: FnMut() -> E,
{
    let mut count = 1usize;
    for dim in dims {
        count = count.checked_mul(*dim).ok_or_else(&mut on_overflow)?;
    }
    Ok(count)
}

/// Builds row-major contiguous strides.
pub fn contiguous_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![0usize; dims.len()];
    let mut stride = 1usize;
    for axis in (0..dims.len()).rev() {
        strides[axis] = stride;
        stride = stride.saturating_mul(dims[axis]);
    }
    strides
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_len_matches_python_semantics() {
        let (a, b, c) = slice_indices(6, Some(0), Some(3), None);
        assert_eq!(slice_len(a, b, c), 3);
        let (a, b, c) = slice_indices(7, None, None, Some(-1));
        assert_eq!((a, b, c), (6, -1, -1));
        assert_eq!(slice_len(a, b, c), 7);
        let (a, b, c) = slice_indices(5, Some(4), Some(3), Some(-1));
        assert_eq!(slice_len(a, b, c), 1);
        let (a, b, c) = slice_indices(4, None, Some(-2), None);
        assert_eq!(slice_len(a, b, c), 2);
        let (a, b, c) = slice_indices(5, Some(-1), None, None);
        assert_eq!(slice_len(a, b, c), 1);
        let (a, b, c) = slice_indices(5, Some(10), Some(30), None);
        assert_eq!(slice_len(a, b, c), 0);
    }

    #[test]
    fn broadcast_prefers_known_extents() {
        let lhs = [Dimension::Static(1), Dimension::Unknown];
        let rhs = [Dimension::Static(3), Dimension::Static(4)];
        assert_eq!(
            broadcast_dims(&lhs, &rhs),
            Some(vec![Dimension::Static(3), Dimension::Static(4)])
        );
        assert_eq!(
            broadcast_dims(&[Dimension::Static(2)], &[Dimension::Static(3)]),
            None
        );
        assert_eq!(
            broadcast_dims(&[Dimension::Static(5)], &[Dimension::Static(2), Dimension::Static(1)]),
            Some(vec![Dimension::Static(2), Dimension::Static(5)])
        );
    }

    #[test]
    fn normalize_axis_rejects_out_of_range() {
        assert_eq!(normalize_axis(-1, 3), Some(2));
        assert_eq!(normalize_axis(3, 3), None);
        assert_eq!(normalize_axis(-4, 3), None);
    }
}
