//! Lagged window helpers and the early-season fill policy
//!
//! Every helper here looks only at values strictly before the index it is
//! asked about, so a game's own result never leaks into its features.
//! Undefined results are `None`; `fill_early_season_default` is the single
//! place they become numbers.

/// Value used for a feature that has no defined value yet
pub const FILL_VALUE: f64 = 0.0;

/// Map an undefined (or non-finite) feature value to the fill value
pub fn fill_early_season_default(value: Option<f64>) -> f64 {
    match value {
        Some(v) if v.is_finite() => v,
        _ => FILL_VALUE,
    }
}

/// Mean of the present values, `None` if there are none
pub fn mean_present(values: &[Option<f64>]) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for v in values.iter().flatten() {
        if v.is_finite() {
            sum += *v;
            count += 1;
        }
    }

    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// The `window` entries immediately before `index`, if that many exist
pub fn lagged_slice<T>(series: &[T], index: usize, window: usize) -> Option<&[T]> {
    if window == 0 || index < window || index > series.len() {
        None
    } else {
        Some(&series[index - window..index])
    }
}

/// Mean of the `window` games before `index`
pub fn lagged_mean(series: &[Option<f64>], index: usize, window: usize) -> Option<f64> {
    lagged_slice(series, index, window).and_then(mean_present)
}

/// Mean of every game before `index`
pub fn lagged_season_mean(series: &[Option<f64>], index: usize) -> Option<f64> {
    if index == 0 || index > series.len() {
        None
    } else {
        mean_present(&series[..index])
    }
}

/// Difference of two optional values, defined only when both are
pub fn optional_diff(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a - b),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().copied().map(Some).collect()
    }

    #[test]
    fn test_fill_policy() {
        assert_eq!(fill_early_season_default(None), 0.0);
        assert_eq!(fill_early_season_default(Some(f64::NAN)), 0.0);
        assert_eq!(fill_early_season_default(Some(f64::INFINITY)), 0.0);
        assert_eq!(fill_early_season_default(Some(-1.5)), -1.5);
    }

    #[test]
    fn test_lagged_mean_excludes_current() {
        let s = series(&[1.0, 2.0, 3.0, 10.0]);
        // Index 3 sees games 0..3 only
        assert_eq!(lagged_mean(&s, 3, 3), Some(2.0));
        assert_eq!(lagged_mean(&s, 3, 2), Some(2.5));
    }

    #[test]
    fn test_lagged_mean_needs_full_window() {
        let s = series(&[1.0, 2.0, 3.0]);
        assert_eq!(lagged_mean(&s, 0, 1), None);
        assert_eq!(lagged_mean(&s, 2, 3), None);
        assert_eq!(lagged_mean(&s, 3, 3), Some(2.0));
    }

    #[test]
    fn test_lagged_mean_skips_missing_values() {
        let s = vec![Some(1.0), None, Some(3.0)];
        assert_eq!(lagged_mean(&s, 3, 3), Some(2.0));
        let empty = vec![None, None];
        assert_eq!(lagged_mean(&empty, 2, 2), None);
    }

    #[test]
    fn test_season_mean() {
        let s = series(&[1.0, 0.0, 1.0, 1.0]);
        assert_eq!(lagged_season_mean(&s, 0), None);
        assert_eq!(lagged_season_mean(&s, 1), Some(1.0));
        assert_eq!(lagged_season_mean(&s, 4), Some(0.75));
    }

    #[test]
    fn test_optional_diff() {
        assert_eq!(optional_diff(Some(3.0), Some(1.0)), Some(2.0));
        assert_eq!(optional_diff(None, Some(1.0)), None);
    }
}
