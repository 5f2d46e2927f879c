/// Scalar helpers shared by the rheology, thermal and swarm code.

/// Assert that the percentage deviation between two values stays below a threshold
///
/// Computes `deviation(actual, expected)` and panics with both values when it
/// reaches `max_deviation` percent.
#[macro_export]
macro_rules! assert_deviation {
    ($actual:expr, $expected:expr, $max_deviation:expr) => {
        {
            let actual_val = $actual;
            let expected_val = $expected;
            let max_dev = $max_deviation;
            let actual_deviation = $crate::math_utils::deviation(actual_val, expected_val);

            if actual_deviation >= max_dev {
                panic!(
                    "assertion failed: deviation {:.2}% >= {:.2}%\n  actual: {:?},\n  expected: {:?}",
                    actual_deviation, max_dev, actual_val, expected_val
                );
            }
        }
    };
    ($actual:expr, $expected:expr, $max_deviation:expr, $($arg:tt)+) => {
        {
            let actual_val = $actual;
            let expected_val = $expected;
            let max_dev = $max_deviation;
            let actual_deviation = $crate::math_utils::deviation(actual_val, expected_val);

            if actual_deviation >= max_dev {
                panic!(
                    "assertion failed: deviation {:.2}% >= {:.2}%: {}\n  actual: {:?},\n  expected: {:?}",
                    actual_deviation, max_dev, format_args!($($arg)+), actual_val, expected_val
                );
            }
        }
    };
}

/// Linear interpolation between two values
///
/// # Examples
/// ```
/// use litho_rift_rust::math_utils::lerp;
///
/// assert_eq!(lerp(0.0, 10.0, 0.5), 5.0);
/// // cohesion halfway through softening
/// assert_eq!(lerp(15.0e6, 1.5e6, 0.5), 8.25e6);
/// ```
pub fn lerp(a: f64, b: f64, ratio: f64) -> f64 {
    a + (b - a) * ratio
}

/// Position of `value` inside `[a, b]` as a ratio, clamped to `[0, 1]`.
///
/// A degenerate interval returns 0 below `a` and 1 at or above it, which is the
/// step function the interval collapses to.
///
/// # Examples
/// ```
/// use litho_rift_rust::math_utils::clamped_ratio;
///
/// assert_eq!(clamped_ratio(0.0, 0.25, 0.125), 0.5);
/// assert_eq!(clamped_ratio(0.0, 0.25, 3.0), 1.0);
/// assert_eq!(clamped_ratio(0.05, 0.15, 0.0), 0.0);
/// ```
pub fn clamped_ratio(a: f64, b: f64, value: f64) -> f64 {
    if (b - a).abs() < f64::EPSILON {
        return if value < a { 0.0 } else { 1.0 };
    }
    ((value - a) / (b - a)).clamp(0.0, 1.0)
}

/// Weighted harmonic mean `Σw / Σ(w/x)`.
///
/// Returns `None` for an empty or zero-weight input.
pub fn weighted_harmonic_mean(pairs: impl IntoIterator<Item = (f64, f64)>) -> Option<f64> {
    let mut weight_sum = 0.0;
    let mut inverse_sum = 0.0;
    for (weight, value) in pairs {
        weight_sum += weight;
        inverse_sum += weight / value;
    }
    if weight_sum <= 0.0 {
        None
    } else {
        Some(weight_sum / inverse_sum)
    }
}

/// Gaussian bump `exp(-((x - centre) / width)^2)`.
pub fn gaussian(x: f64, centre: f64, width: f64) -> f64 {
    let s = (x - centre) / width;
    (-s * s).exp()
}

/// Evaluates `a0 + a1 x + a2 x^2 + a3 x^3` by Horner's rule.
pub fn cubic(coefficients: [f64; 4], x: f64) -> f64 {
    let [a0, a1, a2, a3] = coefficients;
    a0 + x * (a1 + x * (a2 + x * a3))
}

/// Calculate the percentage deviation between two values
///
/// Uses `expected` as the base of the percentage.
///
/// # Examples
/// ```
/// use litho_rift_rust::math_utils::deviation;
///
/// assert_eq!(deviation(105.0, 100.0), 5.0);
/// assert_eq!(deviation(95.0, 100.0), 5.0);
/// ```
pub fn deviation(actual: f64, expected: f64) -> f64 {
    if expected.abs() < f64::EPSILON {
        if actual.abs() < f64::EPSILON {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        ((actual - expected).abs() / expected.abs()) * 100.0
    }
}
