// Cubic Bezier easing used to time-parameterize moves
//
// A curve with control points (x_i, y_i) is treated as a function y(x): solve
// x(t) = x for the curve parameter t, then evaluate y(t).

use std::f64::consts::PI;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrajectoryError {
    #[error("Bezier control point x values must be non-decreasing, got {0:?}")]
    NonMonotonic([f64; 4]),

    #[error("No curve parameter maps to x = {0}")]
    NoRoot(f64),
}

/// Relative size below which a leading coefficient counts as zero
const DEGENERATE: f64 = 1e-12;

/// `y` on the curve through `points` at abscissa `x`.
///
/// The x coordinates must be non-decreasing so x(t) is monotonic on [0, 1].
/// The root inside [0, 1] is used when there is one, otherwise the first real
/// root found.
pub fn bezier_y(points: [(f64, f64); 4], x: f64) -> Result<f64, TrajectoryError> {
    let [(x0, y0), (x1, y1), (x2, y2), (x3, y3)] = points;
    if !(x0 <= x1 && x1 <= x2 && x2 <= x3) {
        return Err(TrajectoryError::NonMonotonic([x0, x1, x2, x3]));
    }

    // x(t) - x in power form
    let a = x3 - 3.0 * x2 + 3.0 * x1 - x0;
    let b = 3.0 * x2 - 6.0 * x1 + 3.0 * x0;
    let c = 3.0 * x1 - 3.0 * x0;
    let d = x0 - x;

    let roots = real_cubic_roots(a, b, c, d);
    let t = roots
        .iter()
        .copied()
        .find(|t| (-1e-9..=1.0 + 1e-9).contains(t))
        .map(|t| t.clamp(0.0, 1.0))
        .or_else(|| roots.first().copied())
        .ok_or(TrajectoryError::NoRoot(x))?;
    let t = polish(a, b, c, d, t);

    let s = 1.0 - t;
    Ok(s * s * s * y0 + 3.0 * s * s * t * y1 + 3.0 * s * t * t * y2 + t * t * t * y3)
}

/// Ease-in/ease-out from `start` at time 0 to `target` at `duration`; flat at both ends
pub fn ease(start: f64, target: f64, duration: f64, elapsed: f64) -> Result<f64, TrajectoryError> {
    let half = duration / 2.0;
    bezier_y(
        [(0.0, start), (half, start), (half, target), (duration, target)],
        elapsed,
    )
}

/// Newton steps against rounding in the closed-form roots
fn polish(a: f64, b: f64, c: f64, d: f64, mut t: f64) -> f64 {
    for _ in 0..2 {
        let f = ((a * t + b) * t + c) * t + d;
        let df = (3.0 * a * t + 2.0 * b) * t + c;
        if df.abs() < 1e-12 {
            break;
        }
        t -= f / df;
    }
    t
}

fn real_cubic_roots(a: f64, b: f64, c: f64, d: f64) -> Vec<f64> {
    let scale = a.abs().max(b.abs()).max(c.abs()).max(d.abs());
    if scale == 0.0 {
        return vec![0.0];
    }
    if a.abs() <= DEGENERATE * scale {
        return real_quadratic_roots(b, c, d, scale);
    }

    // Depressed cubic u^3 + p u + q with t = u - b / 3
    let (b, c, d) = (b / a, c / a, d / a);
    let shift = b / 3.0;
    let p = c - b * b / 3.0;
    let q = 2.0 * b * b * b / 27.0 - b * c / 3.0 + d;
    let disc = (q / 2.0).powi(2) + (p / 3.0).powi(3);

    let roots = if disc > 1e-14 {
        let s = disc.sqrt();
        vec![(-q / 2.0 + s).cbrt() + (-q / 2.0 - s).cbrt()]
    } else if disc >= -1e-14 {
        if p.abs() < 1e-14 {
            vec![0.0]
        } else {
            vec![3.0 * q / p, -3.0 * q / (2.0 * p)]
        }
    } else {
        let m = 2.0 * (-p / 3.0).sqrt();
        let theta = ((3.0 * q / (2.0 * p)) * (-3.0 / p).sqrt())
            .clamp(-1.0, 1.0)
            .acos()
            / 3.0;
        (0..3)
            .map(|k| m * (theta - 2.0 * PI * k as f64 / 3.0).cos())
            .collect()
    };

    roots.into_iter().map(|u| u - shift).collect()
}

fn real_quadratic_roots(a: f64, b: f64, c: f64, scale: f64) -> Vec<f64> {
    if a.abs() <= DEGENERATE * scale {
        if b.abs() <= DEGENERATE * scale {
            return Vec::new();
        }
        return vec![-c / b];
    }
    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return Vec::new();
    }
    let s = disc.sqrt();
    vec![(-b - s) / (2.0 * a), (-b + s) / (2.0 * a)]
}
