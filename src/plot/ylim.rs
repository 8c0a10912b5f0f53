//! Y-axis limits for a metric panel.
//!
//! The range of the observed data picks a step (0.1, 0.01, 0.001 or 0.0001);
//! the limits are the extremes padded by one step and rounded to that step's
//! number of decimals. Padding by a full step before rounding to nearest keeps
//! every observation inside the limits.

use crate::error::AppError;

/// Padded, rounded axis limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YLimits {
    pub min: f64,
    pub max: f64,
    /// Decimals the limits were rounded to.
    pub decimals: u32,
}

impl YLimits {
    /// Tick labels switch to scientific notation below this upper limit.
    pub fn use_scientific(&self) -> bool {
        self.max < 0.01
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }
}

/// Round to `decimals` places, half away from zero.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    (value * scale).round() / scale
}

/// Step and decimals for a data range.
fn step_for_range(range: f64) -> (f64, u32) {
    if range > 0.1 {
        (0.1, 1)
    } else if range > 0.01 {
        (0.01, 2)
    } else if range > 0.001 {
        (0.001, 3)
    } else {
        (0.0001, 4)
    }
}

/// Limits for data spanning `[data_min, data_max]`.
pub fn limits_for_range(data_min: f64, data_max: f64) -> YLimits {
    let (step, decimals) = step_for_range(data_max - data_min);
    let max = round_to(data_max + step, decimals);
    let lower = data_min - step;
    // Non-negative data never gets a negative axis.
    let min = if data_min >= 0.0 {
        round_to(lower.max(0.0), decimals)
    } else {
        round_to(lower, decimals)
    };
    YLimits { min, max, decimals }
}

/// Limits covering every value in `values`.
pub fn padded_limits(values: impl IntoIterator<Item = f64>) -> Result<YLimits, AppError> {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for v in values {
        if !v.is_finite() {
            return Err(AppError::new(4, format!("Cannot compute axis limits: non-finite value {v}.")));
        }
        lo = lo.min(v);
        hi = hi.max(v);
    }
    if !(lo.is_finite() && hi.is_finite()) {
        return Err(AppError::new(4, "Cannot compute axis limits: no values."));
    }
    Ok(limits_for_range(lo, hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_covers(lo: f64, hi: f64) -> YLimits {
        let lim = limits_for_range(lo, hi);
        assert!(lim.min <= lo, "min {} > data_min {lo}", lim.min);
        assert!(lim.max >= hi, "max {} < data_max {hi}", lim.max);
        lim
    }

    #[test]
    fn step_follows_the_data_range() {
        let lim = check_covers(0.31, 0.62);
        assert_eq!((lim.min, lim.max, lim.decimals), (0.2, 0.7, 1));

        let lim = check_covers(0.412, 0.448);
        assert_eq!((lim.min, lim.max, lim.decimals), (0.4, 0.46, 2));

        let lim = check_covers(0.0011, 0.0019);
        assert_eq!(lim.decimals, 4);
        assert!(lim.use_scientific());
    }

    #[test]
    fn lower_limit_clamps_at_zero_only_for_non_negative_data() {
        let lim = check_covers(0.05, 0.6);
        assert_eq!(lim.min, 0.0);

        check_covers(-0.35, 0.2);
        let lim = limits_for_range(-0.35, 0.2);
        assert!(lim.min < 0.0);
    }

    #[test]
    fn limits_always_cover_the_data() {
        let mut seed = 0x2545_f491_4f6c_dd1du64;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            (seed >> 11) as f64 / (1u64 << 53) as f64
        };
        for _ in 0..2000 {
            let scale = 10f64.powi(-((next() * 5.0) as i32));
            let a = (next() - 0.2) * scale * 3.0;
            let b = a + next() * scale;
            check_covers(a, b);
        }
    }

    #[test]
    fn rule_is_idempotent() {
        let values = [0.43, 0.51, 0.38, 0.6];
        let once = padded_limits(values).unwrap();
        let mut reversed = values;
        reversed.reverse();
        assert_eq!(padded_limits(reversed).unwrap(), once);

        // Re-rounding the limits changes nothing.
        assert_eq!(round_to(once.min, once.decimals), once.min);
        assert_eq!(round_to(once.max, once.decimals), once.max);
    }

    #[test]
    fn empty_or_non_finite_input_is_an_error() {
        assert!(padded_limits(Vec::new()).is_err());
        assert!(padded_limits([0.1, f64::NAN]).is_err());
    }
}
