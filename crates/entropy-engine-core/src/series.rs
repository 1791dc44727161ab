//! Gene-model series kernels and special functions.
//!
//! Steady-state distributions for the externally regulated binary gene from
//! Ramos et al. (2007 & 2010), parameterized by:
//!
//! ```text
//! N  = k/ρ          mean expression of an equivalent constitutive gene
//! ε  = (f + h)/ρ    ratio of switching rates to degradation rate
//! pₐ = f/(f + h)    probability of the ON promoter state
//! ```
//!
//! The marginal distribution is
//!
//! ```text
//!       Nⁿ  (ε⋅pₐ)ₙ
//! φₙ =  ──⋅─────────⋅M(ε⋅pₐ + n, ε + n, -N)
//!       n!   (ε)ₙ
//! ```
//!
//! with M the confluent hypergeometric function (Kummer's M) and `(x)ₙ` the
//! Pochhammer symbol. Everything is evaluated in f64 through logarithms of
//! gamma functions; a value that cannot be computed comes back as NaN so the
//! dispatcher can escalate or fall back.

use std::f64::consts::{LN_2, PI};
use std::sync::Arc;

use crate::kernel::{Bindings, SeriesKernel};

/// Hard cap on Kummer series terms before reporting non-convergence.
const KUMMER_MAX_TERMS: u64 = 10_000;

/// Above this mean the positive Kummer series overflows f64.
const MAX_MEAN: f64 = 700.0;

/// Natural log of the gamma function (Lanczos approximation, g = 7).
///
/// Accurate to about 15 significant digits for positive arguments, which is
/// the most f64 evaluation can honor regardless of the requested precision.
pub fn ln_gamma(x: f64) -> f64 {
    const G: f64 = 7.0;
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_93,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_13,
        -176.615_029_162_140_59,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_571_6e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x.is_nan() {
        return f64::NAN;
    }
    if x < 0.5 {
        // Reflection formula; poles at non-positive integers come out inf.
        return (PI / (PI * x).sin()).ln() - ln_gamma(1.0 - x);
    }

    let x = x - 1.0;
    let t = x + G + 0.5;
    let mut a = COEFFS[0];
    for (i, &c) in COEFFS.iter().enumerate().skip(1) {
        a += c / (x + i as f64);
    }
    0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
}

/// Pochhammer symbol (rising factorial): `x⋅(x+1)⋅⋅⋅(x+n-1)`.
pub fn pochhammer(x: f64, n: u64) -> f64 {
    (0..n).fold(1.0, |acc, i| acc * (x + i as f64))
}

/// Raw Kummer series `Σⱼ (a)ⱼ/(b)ⱼ ⋅ zʲ/j!`, intended for `z >= 0` where
/// every term is positive and the sum is numerically stable.
fn kummer_series(a: f64, b: f64, z: f64, tol: f64) -> f64 {
    if b <= 0.0 && b.fract() == 0.0 {
        return f64::NAN;
    }
    let mut term = 1.0_f64;
    let mut sum = 1.0_f64;
    for j in 0..KUMMER_MAX_TERMS {
        let jf = j as f64;
        term *= (a + jf) / (b + jf) * z / (jf + 1.0);
        sum += term;
        if !sum.is_finite() {
            return f64::NAN;
        }
        if term.abs() <= tol * sum.abs().max(1.0) {
            return sum;
        }
    }
    f64::NAN
}

/// Confluent hypergeometric function M(a, b, z) by direct series.
///
/// Negative arguments go through the Kummer transformation
/// `M(a, b, z) = e^z ⋅ M(b - a, b, -z)` so the series keeps positive terms.
/// Stand-in for an arbitrary-precision implementation: results are f64 and
/// large |z| (beyond ~700) reports non-convergence as NaN.
pub fn kummer_m(a: f64, b: f64, z: f64, tol: f64) -> f64 {
    if z < 0.0 {
        z.exp() * kummer_series(b - a, b, -z, tol)
    } else {
        kummer_series(a, b, z, tol)
    }
}

/// Convergence tolerance for a requested decimal-digit precision. f64 can
/// honor at most ~16 digits; tighter requests saturate there.
fn tolerance(precision: u32) -> f64 {
    10f64.powi(-(precision.min(16) as i32))
}

/// Steady-state distribution building block:
///
/// ```text
///             Nⁿ (x)ₙ
/// dist(n)  =  ──⋅────⋅M(x + n, y + n, -N)
///             n! (y)ₙ
/// ```
///
/// Computed as `exp(ln_prefix - N + ln M₊)` with the transformed positive
/// series `M₊ = M(y - x, y + n, N)`, so large `n` neither overflows nor
/// cancels. Requires `x, y, N > 0`.
pub fn dist(x: f64, y: f64, n_mean: f64, n: u64, precision: u32) -> f64 {
    if !(x > 0.0 && y > 0.0 && n_mean > 0.0) || n_mean > MAX_MEAN {
        return f64::NAN;
    }
    let nf = n as f64;
    let m_pos = kummer_series(y - x, y + nf, n_mean, tolerance(precision));
    if !m_pos.is_finite() || m_pos <= 0.0 {
        return f64::NAN;
    }
    let ln_prefix = nf * n_mean.ln() - ln_gamma(nf + 1.0) + ln_gamma(x + nf) - ln_gamma(x)
        - ln_gamma(y + nf)
        + ln_gamma(y);
    (ln_prefix - n_mean + m_pos.ln()).exp()
}

/// Marginal probability of `n` gene products.
pub fn phi_n(epsilon: f64, palpha: f64, n_mean: f64, n: u64, precision: u32) -> f64 {
    dist(epsilon * palpha, epsilon, n_mean, n, precision)
}

/// Joint probability of `n` products and the promoter ON.
pub fn alpha_n(epsilon: f64, palpha: f64, n_mean: f64, n: u64, precision: u32) -> f64 {
    palpha * dist(1.0 + epsilon * palpha, 1.0 + epsilon, n_mean, n, precision)
}

/// Joint probability of `n` products and the promoter OFF.
pub fn beta_n(epsilon: f64, palpha: f64, n_mean: f64, n: u64, precision: u32) -> f64 {
    (1.0 - palpha) * dist(epsilon * palpha, 1.0 + epsilon, n_mean, n, precision)
}

/// Mean number of products with the promoter ON: `(ε⋅pₐ + 1)/(1 + ε)⋅N`.
pub fn mean_on(epsilon: f64, palpha: f64, n_mean: f64) -> f64 {
    (epsilon * palpha + 1.0) / (epsilon + 1.0) * n_mean
}

/// Mean number of products with the promoter OFF: `ε⋅pₐ/(1 + ε)⋅N`.
pub fn mean_off(epsilon: f64, palpha: f64, n_mean: f64) -> f64 {
    (epsilon * palpha) / (epsilon + 1.0) * n_mean
}

/// Fano factor of the marginal distribution: `1 + N⋅(1 - pₐ)/(1 + ε)`.
pub fn fano(epsilon: f64, palpha: f64, n_mean: f64) -> f64 {
    1.0 + n_mean * (1.0 - palpha) / (1.0 + epsilon)
}

/// Variance of the marginal distribution: `μ⋅F` with `μ = pₐ⋅N`.
pub fn variance(epsilon: f64, palpha: f64, n_mean: f64) -> f64 {
    n_mean * palpha * fano(epsilon, palpha, n_mean)
}

/// One `-q⋅log₂(q)` entropy contribution. Underflowed probabilities
/// contribute zero; the zero-partial-sum check downstream flags parameter
/// regions where everything underflows.
fn entropy_term(q: f64) -> f64 {
    if q.is_nan() {
        f64::NAN
    } else if q <= 0.0 {
        0.0
    } else {
        -q * q.log2()
    }
}

fn get(subs: &Bindings, name: &str) -> f64 {
    subs.get(name).copied().unwrap_or(f64::NAN)
}

/// Shannon entropy of a constitutive gene with mean expression N:
///
/// ```text
///                     ∞
/// H = -N⋅log₂(N/e) +  Σ  Nⁿ/n!⋅e⁻ᴺ⋅log₂(n!)
///                    n=0
/// ```
pub struct ConstitutiveEntropy;

impl SeriesKernel for ConstitutiveEntropy {
    fn term(&self, n: u64, subs: &Bindings, _precision: u32) -> f64 {
        let n_mean = get(subs, "N");
        if !(n_mean > 0.0) || n_mean > MAX_MEAN {
            return f64::NAN;
        }
        let nf = n as f64;
        let ln_fact = ln_gamma(nf + 1.0);
        (nf * n_mean.ln() - ln_fact - n_mean).exp() * ln_fact / LN_2
    }

    fn offset(&self, subs: &Bindings, _precision: u32) -> f64 {
        let n_mean = get(subs, "N");
        if !(n_mean > 0.0) {
            return f64::NAN;
        }
        // -N⋅log₂(N/e)
        -n_mean * (n_mean.ln() - 1.0) / LN_2
    }
}

/// Marginal entropy of the externally regulated gene: `H = -Σ φₙ⋅log₂(φₙ)`.
pub struct ExternalEntropy;

impl SeriesKernel for ExternalEntropy {
    fn term(&self, n: u64, subs: &Bindings, precision: u32) -> f64 {
        entropy_term(phi_n(
            get(subs, "epsilon"),
            get(subs, "p_a"),
            get(subs, "N"),
            n,
            precision,
        ))
    }
}

/// Entropy conditional to the ON state: `H_ON = -Σ (αₙ/pₐ)⋅log₂(αₙ/pₐ)`.
pub struct OnEntropy;

impl SeriesKernel for OnEntropy {
    fn term(&self, n: u64, subs: &Bindings, precision: u32) -> f64 {
        let palpha = get(subs, "p_a");
        if !(palpha > 0.0) {
            return f64::NAN;
        }
        let joint = alpha_n(get(subs, "epsilon"), palpha, get(subs, "N"), n, precision);
        entropy_term(joint / palpha)
    }
}

/// Entropy conditional to the OFF state:
/// `H_OFF = -Σ (βₙ/(1-pₐ))⋅log₂(βₙ/(1-pₐ))`.
pub struct OffEntropy;

impl SeriesKernel for OffEntropy {
    fn term(&self, n: u64, subs: &Bindings, precision: u32) -> f64 {
        let palpha = get(subs, "p_a");
        if !(palpha < 1.0) {
            return f64::NAN;
        }
        let joint = beta_n(get(subs, "epsilon"), palpha, get(subs, "N"), n, precision);
        entropy_term(joint / (1.0 - palpha))
    }
}

/// Convenience constructors for the kernels as trait objects.
pub fn constitutive_kernel() -> Arc<dyn SeriesKernel> {
    Arc::new(ConstitutiveEntropy)
}

pub fn external_kernel() -> Arc<dyn SeriesKernel> {
    Arc::new(ExternalEntropy)
}

pub fn on_kernel() -> Arc<dyn SeriesKernel> {
    Arc::new(OnEntropy)
}

pub fn off_kernel() -> Arc<dyn SeriesKernel> {
    Arc::new(OffEntropy)
}
