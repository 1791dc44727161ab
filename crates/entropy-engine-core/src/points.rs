//! Stable plot-grid generation.
//!
//! Figures sample their curves on grids aligned to power-of-two bounds, so
//! overlapping ranges land on the same abscissae and share cache entries
//! instead of recomputing nearly identical points.

use crate::error::{EngineError, EngineResult};

/// Largest grid exponent; keeps degenerate ranges from exploding.
const MAX_GRID_EXP: u32 = 20;

/// Generate at least `min_points` stable points in `[xmin, xmax]`.
///
/// `xmin > xmax` yields a descending grid. With `logspace` the grid is
/// geometric over the range shifted by one (so zero is admissible).
pub fn plot_points(
    xmin: f64,
    xmax: f64,
    min_points: usize,
    logspace: bool,
) -> EngineResult<Vec<f64>> {
    let reverse = xmin > xmax;
    let (lo, hi) = if reverse { (xmax, xmin) } else { (xmin, xmax) };
    if lo < 0.0 {
        return Err(EngineError::Argument("xmin must be >= 0".into()));
    }
    if !(hi > lo) {
        return Err(EngineError::Argument("empty plot range".into()));
    }

    let mut points = ascending_points(lo, hi, min_points, logspace);
    if reverse {
        points.reverse();
    }

    // Off-by-one in edge cases: ask for one more point and retry.
    if points.len() < min_points {
        return plot_points(xmin, xmax, min_points + 1, logspace);
    }
    Ok(points)
}

fn ascending_points(lo: f64, hi: f64, min_points: usize, logspace: bool) -> Vec<f64> {
    // Work in log10 of the one-shifted range when logspace is requested.
    let (wlo, whi) = if logspace {
        ((lo + 1.0).log10(), (hi + 1.0).log10())
    } else {
        (lo, hi)
    };

    let bound = 2f64.powi(whi.log2().ceil() as i32);
    // Discount the 3 extra points: lo, hi and the 1 added to 2^n.
    let range_points = min_points as f64 * bound / (whi - wlo) - 3.0;
    let n_points = if range_points.is_finite() && range_points >= 1.0 {
        let exp = (range_points.log2().ceil() as u32).min(MAX_GRID_EXP);
        2usize.pow(exp) + 1
    } else {
        min_points.max(2)
    };

    let step = bound / (n_points - 1) as f64;
    let (flo, fhi) = if logspace { (lo + 1.0, hi + 1.0) } else { (lo, hi) };

    let mut points: Vec<f64> = (0..n_points)
        .map(|i| {
            let x = step * i as f64;
            if logspace {
                10f64.powf(x)
            } else {
                x
            }
        })
        .filter(|&x| flo < x && x < fhi)
        .collect();
    points.insert(0, flo);
    points.push(fhi);

    if logspace {
        for p in &mut points {
            *p -= 1.0;
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_and_ordering() {
        let points = plot_points(0.0, 8.0, 5, false).unwrap();
        assert!(points.len() >= 5);
        assert_eq!(points[0], 0.0);
        assert_eq!(*points.last().unwrap(), 8.0);
        assert!(points.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn deterministic() {
        let a = plot_points(0.0, 8.0, 5, false).unwrap();
        let b = plot_points(0.0, 8.0, 5, false).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn overlapping_ranges_share_interior_points() {
        let wide = plot_points(0.0, 8.0, 5, false).unwrap();
        let narrow = plot_points(0.0, 6.0, 5, false).unwrap();
        for p in narrow.iter().filter(|&&p| p > 0.0 && p < 6.0) {
            assert!(
                wide.contains(p),
                "interior point {p} of the narrow grid missing from the wide grid"
            );
        }
    }

    #[test]
    fn reversed_range_descends() {
        let points = plot_points(8.0, 0.0, 5, false).unwrap();
        assert_eq!(points[0], 8.0);
        assert_eq!(*points.last().unwrap(), 0.0);
        assert!(points.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn logspace_keeps_endpoints() {
        let points = plot_points(0.0, 99.0, 8, true).unwrap();
        assert!(points.len() >= 8);
        assert!((points[0] - 0.0).abs() < 1e-12);
        assert!((points.last().unwrap() - 99.0).abs() < 1e-9);
        assert!(points.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn negative_min_rejected() {
        assert!(matches!(
            plot_points(-1.0, 5.0, 4, false),
            Err(EngineError::Argument(_))
        ));
    }

    #[test]
    fn empty_range_rejected() {
        assert!(matches!(
            plot_points(3.0, 3.0, 4, false),
            Err(EngineError::Argument(_))
        ));
    }
}
