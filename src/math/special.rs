//! Special functions used to build and invert sampling distributions.
//!
//! All routines are pure. Functions with a restricted domain return
//! [`NumericalError::OutOfDomain`] instead of producing NaN.

use std::f64::consts::{FRAC_2_SQRT_PI, PI, SQRT_2};

use crate::error::{NumericalError, Result};

/// Lanczos approximation parameters (g = 7, n = 9).
const LANCZOS_G: f64 = 7.0;
const LANCZOS_COEFFS: [f64; 9] = [
    0.999_999_999_999_809_9,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_572e-6,
    1.505_632_735_149_311_6e-7,
];

const BETA_CF_MAX_ITERATIONS: usize = 300;
const INVERSE_BETA_MAX_ITERATIONS: usize = 200;
const BETA_CF_EPSILON: f64 = 1e-15;
const FP_MIN: f64 = 1e-300;

/// Below this magnitude `erf` uses its power series, above it the
/// continued fraction for `erfc`.
const ERF_SERIES_LIMIT: f64 = 2.0;
const ERFC_CF_TERMS: usize = 80;

fn out_of_domain(function: &'static str, argument: String) -> NumericalError {
    NumericalError::OutOfDomain { function, argument }
}

/// Lanczos series sum for `x` (already shifted by one).
fn lanczos_sum(x: f64) -> f64 {
    let mut sum = LANCZOS_COEFFS[0];
    for (i, &c) in LANCZOS_COEFFS.iter().enumerate().skip(1) {
        #[allow(clippy::cast_precision_loss)]
        let offset = i as f64;
        sum += c / (x + offset);
    }
    sum
}

/// The gamma function `Γ(x)` for `x > 0`.
///
/// Overflows to `f64::INFINITY` for `x > 171.6`.
///
/// # Errors
///
/// Returns [`NumericalError::OutOfDomain`] if `x` is not a positive finite number.
pub fn gamma(x: f64) -> Result<f64> {
    if x.is_nan() || x <= 0.0 || x.is_infinite() {
        return Err(out_of_domain("gamma", format!("x = {x}")).into());
    }
    Ok(gamma_positive(x))
}

fn gamma_positive(x: f64) -> f64 {
    if x < 0.5 {
        // Reflection keeps the Lanczos series in its accurate range.
        PI / ((PI * x).sin() * gamma_positive(1.0 - x))
    } else {
        let x = x - 1.0;
        let t = x + LANCZOS_G + 0.5;
        (2.0 * PI).sqrt() * t.powf(x + 0.5) * (-t).exp() * lanczos_sum(x)
    }
}

/// Natural logarithm of the gamma function for `x > 0`.
///
/// # Errors
///
/// Returns [`NumericalError::OutOfDomain`] if `x` is not a positive finite number.
pub fn ln_gamma(x: f64) -> Result<f64> {
    if x.is_nan() || x <= 0.0 || x.is_infinite() {
        return Err(out_of_domain("ln_gamma", format!("x = {x}")).into());
    }
    Ok(ln_gamma_positive(x))
}

fn ln_gamma_positive(x: f64) -> f64 {
    if x < 0.5 {
        (PI / (PI * x).sin()).ln() - ln_gamma_positive(1.0 - x)
    } else {
        let x = x - 1.0;
        let t = x + LANCZOS_G + 0.5;
        0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + lanczos_sum(x).ln()
    }
}

/// The error function. Defined for every real `x`; NaN propagates.
#[must_use]
pub fn erf(x: f64) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    if x < 0.0 {
        return -erf(-x);
    }
    if x < ERF_SERIES_LIMIT {
        erf_series(x)
    } else {
        1.0 - erfc_continued_fraction(x)
    }
}

/// The complementary error function `1 - erf(x)`, accurate in the tail.
#[must_use]
pub fn erfc(x: f64) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    if x < 0.0 {
        return 2.0 - erfc(-x);
    }
    if x < ERF_SERIES_LIMIT {
        1.0 - erf_series(x)
    } else {
        erfc_continued_fraction(x)
    }
}

/// `erf(x) = 2/sqrt(pi) * exp(-x^2) * sum 2^n x^(2n+1) / (2n+1)!!`.
///
/// Every term is positive, so the sum carries no cancellation.
fn erf_series(x: f64) -> f64 {
    let x2 = x * x;
    let mut term = x;
    let mut sum = x;
    let mut n = 0.0_f64;
    while term > sum * 1e-17 {
        n += 1.0;
        term *= 2.0 * x2 / (2.0 * n + 1.0);
        sum += term;
    }
    FRAC_2_SQRT_PI * (-x2).exp() * sum
}

/// `erfc(x) = exp(-x^2)/sqrt(pi) / (x + (1/2)/(x + 1/(x + (3/2)/(x + ...))))`
/// evaluated backwards from a fixed depth; valid for `x >= 2`.
fn erfc_continued_fraction(x: f64) -> f64 {
    let mut t = x;
    for n in (1..=ERFC_CF_TERMS).rev() {
        #[allow(clippy::cast_precision_loss)]
        let a = n as f64 / 2.0;
        t = x + a / t;
    }
    (-x * x).exp() / (PI.sqrt() * t)
}

/// Standard normal cumulative distribution function.
#[must_use]
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / SQRT_2)
}

/// Inverse of the standard normal CDF for `p` in `(0, 1)`.
///
/// Uses a rational initial guess refined by two Halley steps on [`erfc`].
///
/// # Errors
///
/// Returns [`NumericalError::OutOfDomain`] if `p` is not strictly inside `(0, 1)`.
pub fn inverse_normal_cdf(p: f64) -> Result<f64> {
    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_69e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.024_25;

    if p.is_nan() || p <= 0.0 || p >= 1.0 {
        return Err(out_of_domain("inverse_normal_cdf", format!("p = {p}")).into());
    }

    let mut x = if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    for _ in 0..2 {
        let e = normal_cdf(x) - p;
        let u = e * (2.0 * PI).sqrt() * (x * x / 2.0).exp();
        x -= u / (1.0 + x * u / 2.0);
    }
    Ok(x)
}

fn check_beta_args(function: &'static str, a: f64, b: f64, x: f64) -> Result<()> {
    if !(a.is_finite() && b.is_finite() && a > 0.0 && b > 0.0) {
        return Err(out_of_domain(function, format!("a = {a}, b = {b}")).into());
    }
    if !(0.0..=1.0).contains(&x) {
        return Err(out_of_domain(function, format!("x = {x}")).into());
    }
    Ok(())
}

/// Regularized incomplete beta function `I_x(a, b)`.
///
/// # Errors
///
/// Returns [`NumericalError::OutOfDomain`] unless `a > 0`, `b > 0` and
/// `0 <= x <= 1`, and [`NumericalError::NoConvergence`] if the continued
/// fraction does not settle.
pub fn regularized_incomplete_beta(a: f64, b: f64, x: f64) -> Result<f64> {
    check_beta_args("regularized_incomplete_beta", a, b, x)?;
    if x == 0.0 {
        return Ok(0.0);
    }
    if (x - 1.0).abs() < f64::EPSILON * 0.5 {
        return Ok(1.0);
    }

    let ln_front = ln_gamma_positive(a + b) - ln_gamma_positive(a) - ln_gamma_positive(b)
        + a * x.ln()
        + b * (1.0 - x).ln();
    let front = ln_front.exp();

    if x < (a + 1.0) / (a + b + 2.0) {
        Ok(front * beta_continued_fraction(a, b, x)? / a)
    } else {
        Ok(1.0 - front * beta_continued_fraction(b, a, 1.0 - x)? / b)
    }
}

/// Modified Lentz evaluation of the incomplete beta continued fraction.
fn beta_continued_fraction(a: f64, b: f64, x: f64) -> Result<f64> {
    let clamp = |v: f64| if v.abs() < FP_MIN { FP_MIN } else { v };

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 / clamp(1.0 - qab * x / qap);
    let mut h = d;

    for m in 1..=BETA_CF_MAX_ITERATIONS {
        #[allow(clippy::cast_precision_loss)]
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 / clamp(1.0 + aa * d);
        c = clamp(1.0 + aa / c);
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 / clamp(1.0 + aa * d);
        c = clamp(1.0 + aa / c);
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < BETA_CF_EPSILON {
            return Ok(h);
        }
    }

    Err(NumericalError::NoConvergence {
        function: "regularized_incomplete_beta",
        iterations: BETA_CF_MAX_ITERATIONS,
    }
    .into())
}

/// Inverse of [`regularized_incomplete_beta`] in `x`: finds `x` with
/// `I_x(a, b) = p`.
///
/// Newton steps on the beta density, kept inside a shrinking bracket; a
/// step that leaves the bracket falls back to bisection.
///
/// # Errors
///
/// Returns [`NumericalError::OutOfDomain`] unless `a > 0`, `b > 0` and
/// `0 <= p <= 1`.
pub fn inverse_regularized_incomplete_beta(a: f64, b: f64, p: f64) -> Result<f64> {
    check_beta_args("inverse_regularized_incomplete_beta", a, b, p)?;
    if p == 0.0 {
        return Ok(0.0);
    }
    if p == 1.0 {
        return Ok(1.0);
    }

    let ln_beta = ln_gamma_positive(a) + ln_gamma_positive(b) - ln_gamma_positive(a + b);
    let density = |x: f64| ((a - 1.0) * x.ln() + (b - 1.0) * (1.0 - x).ln() - ln_beta).exp();

    let mut lo = 0.0_f64;
    let mut hi = 1.0_f64;
    let mut x = a / (a + b);
    for _ in 0..INVERSE_BETA_MAX_ITERATIONS {
        let f = regularized_incomplete_beta(a, b, x)? - p;
        if f == 0.0 {
            return Ok(x);
        }
        if f < 0.0 {
            lo = x;
        } else {
            hi = x;
        }
        let slope = density(x);
        let newton = x - f / slope;
        let next = if slope.is_finite() && slope > 0.0 && newton > lo && newton < hi {
            newton
        } else {
            0.5 * (lo + hi)
        };
        if (next - x).abs() < 1e-15 || hi - lo < 1e-15 {
            return Ok(next);
        }
        x = next;
    }
    Ok(x)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn gamma_integers_are_factorials() {
        assert_relative_eq!(gamma(1.0).unwrap(), 1.0, max_relative = 1e-12);
        assert_relative_eq!(gamma(5.0).unwrap(), 24.0, max_relative = 1e-12);
        assert_relative_eq!(gamma(10.0).unwrap(), 362_880.0, max_relative = 1e-12);
    }

    #[test]
    fn gamma_half_integers() {
        assert_relative_eq!(gamma(0.5).unwrap(), PI.sqrt(), max_relative = 1e-12);
        assert_relative_eq!(gamma(1.5).unwrap(), 0.5 * PI.sqrt(), max_relative = 1e-12);
        assert_relative_eq!(gamma(0.1).unwrap(), 9.513_507_698_668_732, max_relative = 1e-10);
    }

    #[test]
    fn gamma_rejects_non_positive() {
        assert!(gamma(0.0).is_err());
        assert!(gamma(-1.5).is_err());
        assert!(gamma(f64::NAN).is_err());
        assert!(ln_gamma(-3.0).is_err());
    }

    #[test]
    fn ln_gamma_matches_reference() {
        assert_relative_eq!(ln_gamma(100.0).unwrap(), 359.134_205_369_575_4, max_relative = 1e-12);
        assert_relative_eq!(ln_gamma(0.25).unwrap(), 1.288_022_524_698_077_5, max_relative = 1e-10);
        assert_relative_eq!(ln_gamma(3.0).unwrap(), 2.0_f64.ln(), max_relative = 1e-12);
    }

    #[test]
    fn erf_reference_values() {
        assert!(erf(0.0).abs() < 1e-16);
        assert_relative_eq!(erf(0.5), 0.520_499_877_813_046_5, max_relative = 1e-12);
        assert_relative_eq!(erf(1.0), 0.842_700_792_949_714_9, max_relative = 1e-12);
        assert_relative_eq!(erf(2.5), 0.999_593_047_982_555, max_relative = 1e-12);
        assert_relative_eq!(erf(-1.0), -0.842_700_792_949_714_9, max_relative = 1e-12);
    }

    #[test]
    fn erfc_is_accurate_in_the_tail() {
        assert_relative_eq!(erfc(3.0), 2.209_049_699_858_544e-5, max_relative = 1e-9);
        assert_relative_eq!(erfc(5.0), 1.537_459_794_428_035e-12, max_relative = 1e-9);
        assert_relative_eq!(erfc(-1.0), 1.842_700_792_949_715, max_relative = 1e-12);
        assert_relative_eq!(erf(1.7) + erfc(1.7), 1.0, max_relative = 1e-14);
    }

    #[test]
    fn inverse_normal_round_trip() {
        for &p in &[1e-6, 0.01, 0.2, 0.5, 0.8, 0.975, 1.0 - 1e-6] {
            let x = inverse_normal_cdf(p).unwrap();
            assert_relative_eq!(normal_cdf(x), p, max_relative = 1e-9);
        }
        assert_relative_eq!(inverse_normal_cdf(0.975).unwrap(), 1.959_963_984_540_054, max_relative = 1e-9);
        assert!(inverse_normal_cdf(0.0).is_err());
        assert!(inverse_normal_cdf(1.0).is_err());
    }

    #[test]
    fn incomplete_beta_reference_values() {
        // I_0.5(2, 3) = 11/16 from the binomial expansion.
        assert_relative_eq!(
            regularized_incomplete_beta(2.0, 3.0, 0.5).unwrap(),
            0.6875,
            max_relative = 1e-12
        );
        // I_x(1, 1) = x
        assert_relative_eq!(regularized_incomplete_beta(1.0, 1.0, 0.3).unwrap(), 0.3, max_relative = 1e-12);
        // I_x(a, b) = 1 - I_{1-x}(b, a)
        let lhs = regularized_incomplete_beta(2.5, 7.0, 0.8).unwrap();
        let rhs = 1.0 - regularized_incomplete_beta(7.0, 2.5, 0.2).unwrap();
        assert_relative_eq!(lhs, rhs, max_relative = 1e-12);
        assert_relative_eq!(regularized_incomplete_beta(0.5, 0.5, 0.5).unwrap(), 0.5, max_relative = 1e-10);
    }

    #[test]
    fn incomplete_beta_endpoints_and_domain() {
        assert!(regularized_incomplete_beta(2.0, 2.0, 0.0).unwrap().abs() < 1e-16);
        assert_relative_eq!(regularized_incomplete_beta(2.0, 2.0, 1.0).unwrap(), 1.0);
        assert!(regularized_incomplete_beta(0.0, 2.0, 0.5).is_err());
        assert!(regularized_incomplete_beta(2.0, -1.0, 0.5).is_err());
        assert!(regularized_incomplete_beta(2.0, 2.0, 1.5).is_err());
    }

    #[test]
    fn inverse_incomplete_beta_round_trip() {
        for &(a, b) in &[(2.0, 5.0), (15.0, 3.0), (0.7, 0.9)] {
            for &p in &[0.05, 0.5, 0.93] {
                let x = inverse_regularized_incomplete_beta(a, b, p).unwrap();
                assert_relative_eq!(regularized_incomplete_beta(a, b, x).unwrap(), p, max_relative = 1e-9);
            }
        }
    }

    #[test]
    fn inverse_incomplete_beta_handles_peaked_and_skewed_shapes() {
        for &(a, b, p) in &[(60.0, 60.0, 0.3), (0.2, 8.0, 0.999), (8.0, 0.3, 0.01), (1.0, 1.0, 0.42)] {
            let x = inverse_regularized_incomplete_beta(a, b, p).unwrap();
            assert!((0.0..=1.0).contains(&x));
            assert_relative_eq!(regularized_incomplete_beta(a, b, x).unwrap(), p, max_relative = 1e-8);
        }
        assert_relative_eq!(inverse_regularized_incomplete_beta(1.0, 1.0, 0.42).unwrap(), 0.42, epsilon = 1e-12);
    }
}
