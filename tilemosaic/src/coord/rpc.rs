//! Rational polynomial coefficient (RPC) camera model.
//!
//! Image line and sample are each expressed as a ratio of two 20-term cubic
//! polynomials in normalized latitude (P), longitude (L) and height (H):
//!
//! ```text
//! line_n   = LineNum(P, L, H) / LineDen(P, L, H)
//! sample_n = SampNum(P, L, H) / SampDen(P, L, H)
//! ```
//!
//! The inverse holds height fixed and runs Newton iteration over (P, L)
//! using the analytical 2×2 Jacobian.

use super::{Convergence, GroundEstimate, GroundPoint, ImagePoint};
use crate::error::RasterError;

/// Default iteration cap for the inverse solve.
pub const DEFAULT_MAX_ITERATIONS: u32 = 15;

/// Default residual tolerance, in normalized image units.
pub const DEFAULT_TOLERANCE: f64 = 1e-4;

/// WGS84 geographic.
const RPC_SRID: i32 = 4326;

const NUM_TERMS: usize = 20;

/// Exponents of (P, L, H) for each polynomial term.
const EXPONENTS: [[i32; 3]; NUM_TERMS] = [
    [0, 0, 0],
    [0, 1, 0],
    [1, 0, 0],
    [0, 0, 1],
    [1, 1, 0],
    [0, 1, 1],
    [1, 0, 1],
    [0, 2, 0],
    [2, 0, 0],
    [0, 0, 2],
    [1, 1, 1],
    [0, 3, 0],
    [2, 1, 0],
    [0, 1, 2],
    [1, 2, 0],
    [3, 0, 0],
    [1, 0, 2],
    [0, 2, 1],
    [2, 0, 1],
    [0, 0, 3],
];

/// The four 20-term coefficient vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCoefficients {
    pub line_num: [f64; NUM_TERMS],
    pub line_den: [f64; NUM_TERMS],
    pub samp_num: [f64; NUM_TERMS],
    pub samp_den: [f64; NUM_TERMS],
}

/// Offsets and scales for the five normalized quantities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RpcNormalization {
    pub line_off: f64,
    pub line_scale: f64,
    pub samp_off: f64,
    pub samp_scale: f64,
    pub lat_off: f64,
    pub lat_scale: f64,
    pub lon_off: f64,
    pub lon_scale: f64,
    pub height_off: f64,
    pub height_scale: f64,
}

/// RPC image model.
#[derive(Debug, Clone)]
pub struct RpcModel {
    coefficients: RpcCoefficients,
    norm: RpcNormalization,
    max_iterations: u32,
    tolerance: f64,
}

/// Value and partial derivatives w.r.t. P and L of one rational polynomial.
struct RatioEval {
    value: f64,
    d_p: f64,
    d_l: f64,
}

impl RpcModel {
    pub fn new(coefficients: RpcCoefficients, norm: RpcNormalization) -> Result<Self, RasterError> {
        let scales = [
            norm.line_scale,
            norm.samp_scale,
            norm.lat_scale,
            norm.lon_scale,
            norm.height_scale,
        ];
        if scales.iter().any(|s| *s == 0.0 || !s.is_finite()) {
            return Err(RasterError::DegenerateTransform(
                "RPC normalization scale is zero".to_string(),
            ));
        }

        Ok(Self {
            coefficients,
            norm,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance: DEFAULT_TOLERANCE,
        })
    }

    /// Fits a bilinear RPC to four ground points at the image corners.
    ///
    /// Corners are given clockwise from the upper-left pixel corner:
    /// `(0, 0)`, `(width, 0)`, `(width, height)`, `(0, height)`.
    pub fn from_corner_points(
        width: u32,
        height: u32,
        corners: [GroundPoint; 4],
    ) -> Result<Self, RasterError> {
        if width == 0 || height == 0 {
            return Err(RasterError::DegenerateTransform(
                "image has zero extent".to_string(),
            ));
        }

        let (lat_min, lat_max) = min_max(corners.iter().map(|c| c.y));
        let (lon_min, lon_max) = min_max(corners.iter().map(|c| c.x));
        let half_w = width as f64 / 2.0;
        let half_h = height as f64 / 2.0;

        let norm = RpcNormalization {
            line_off: half_h,
            line_scale: half_h,
            samp_off: half_w,
            samp_scale: half_w,
            lat_off: (lat_min + lat_max) / 2.0,
            lat_scale: non_zero((lat_max - lat_min) / 2.0),
            lon_off: (lon_min + lon_max) / 2.0,
            lon_scale: non_zero((lon_max - lon_min) / 2.0),
            height_off: 0.0,
            height_scale: 1.0,
        };

        // Normalized image corners in the same order as `corners`.
        let image_corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];

        // Fit value = a0 + a1·L + a2·P + a3·L·P through the four corners.
        let mut system = [[0.0; 4]; 4];
        for (row, corner) in system.iter_mut().zip(corners.iter()) {
            let p = (corner.y - norm.lat_off) / norm.lat_scale;
            let l = (corner.x - norm.lon_off) / norm.lon_scale;
            *row = [1.0, l, p, l * p];
        }
        let samples = image_corners.map(|(s, _)| s);
        let lines = image_corners.map(|(_, l)| l);

        let samp_fit = solve4(system, samples)?;
        let line_fit = solve4(system, lines)?;

        // Terms 0, 1, 2, 4 are 1, L, P and L·P.
        let mut coefficients = RpcCoefficients {
            line_num: [0.0; NUM_TERMS],
            line_den: [0.0; NUM_TERMS],
            samp_num: [0.0; NUM_TERMS],
            samp_den: [0.0; NUM_TERMS],
        };
        for (term, i) in [0usize, 1, 2, 4].into_iter().zip(0..4) {
            coefficients.line_num[term] = line_fit[i];
            coefficients.samp_num[term] = samp_fit[i];
        }
        coefficients.line_den[0] = 1.0;
        coefficients.samp_den[0] = 1.0;

        Self::new(coefficients, norm)
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn srid(&self) -> i32 {
        RPC_SRID
    }

    pub fn normalization(&self) -> &RpcNormalization {
        &self.norm
    }

    /// Ground (lon, lat, height) → image (sample, line).
    pub fn forward(&self, ground: GroundPoint) -> Result<ImagePoint, RasterError> {
        let h = ground.z.unwrap_or(self.norm.height_off);
        let p = (ground.y - self.norm.lat_off) / self.norm.lat_scale;
        let l = (ground.x - self.norm.lon_off) / self.norm.lon_scale;
        let hn = (h - self.norm.height_off) / self.norm.height_scale;

        let line = ratio(&self.coefficients.line_num, &self.coefficients.line_den, p, l, hn)?;
        let samp = ratio(&self.coefficients.samp_num, &self.coefficients.samp_den, p, l, hn)?;

        Ok(ImagePoint {
            x: samp.value * self.norm.samp_scale + self.norm.samp_off,
            y: line.value * self.norm.line_scale + self.norm.line_off,
        })
    }

    /// Image → ground at the model's height offset.
    pub fn inverse(&self, image: ImagePoint) -> Result<GroundEstimate, RasterError> {
        self.inverse_at(image, self.norm.height_off)
    }

    /// Image → ground at a fixed height above ellipsoid.
    ///
    /// Returns the lowest-residual iterate as [`Convergence::BestEffort`]
    /// when the tolerance is not reached within the iteration cap. A
    /// singular Jacobian is a [`RasterError::DegenerateTransform`].
    pub fn inverse_at(&self, image: ImagePoint, height: f64) -> Result<GroundEstimate, RasterError> {
        let target_line = (image.y - self.norm.line_off) / self.norm.line_scale;
        let target_samp = (image.x - self.norm.samp_off) / self.norm.samp_scale;
        let hn = (height - self.norm.height_off) / self.norm.height_scale;

        let mut p = 0.0;
        let mut l = 0.0;
        let mut best = (p, l, f64::INFINITY);
        let mut steps = 0;

        loop {
            let line = ratio(&self.coefficients.line_num, &self.coefficients.line_den, p, l, hn)?;
            let samp = ratio(&self.coefficients.samp_num, &self.coefficients.samp_den, p, l, hn)?;

            let d_line = target_line - line.value;
            let d_samp = target_samp - samp.value;
            let residual = d_line.hypot(d_samp);

            if residual < best.2 {
                best = (p, l, residual);
            }
            if residual <= self.tolerance {
                return Ok(self.estimate(p, l, height, Convergence::Converged { iterations: steps }));
            }
            if steps == self.max_iterations {
                break;
            }

            // J = [[dLine/dL, dLine/dP], [dSamp/dL, dSamp/dP]]
            let (a, b, c, d) = (line.d_l, line.d_p, samp.d_l, samp.d_p);
            let det = a * d - b * c;
            if det == 0.0 || !det.is_finite() {
                return Err(RasterError::DegenerateTransform(format!(
                    "RPC Jacobian is singular at iteration {}",
                    steps + 1
                )));
            }

            l += (d * d_line - b * d_samp) / det;
            p += (-c * d_line + a * d_samp) / det;
            steps += 1;
        }

        let (p, l, residual) = best;
        Ok(self.estimate(
            p,
            l,
            height,
            Convergence::BestEffort {
                residual,
                iterations: steps,
            },
        ))
    }

    fn estimate(&self, p: f64, l: f64, height: f64, convergence: Convergence) -> GroundEstimate {
        GroundEstimate {
            point: GroundPoint::with_height(
                l * self.norm.lon_scale + self.norm.lon_off,
                p * self.norm.lat_scale + self.norm.lat_off,
                height,
            ),
            convergence,
        }
    }
}

/// Evaluates `num / den` and its derivatives w.r.t. P and L.
fn ratio(
    num: &[f64; NUM_TERMS],
    den: &[f64; NUM_TERMS],
    p: f64,
    l: f64,
    h: f64,
) -> Result<RatioEval, RasterError> {
    let (n, n_p, n_l) = polynomial(num, p, l, h);
    let (d, d_p, d_l) = polynomial(den, p, l, h);

    if d == 0.0 || !d.is_finite() {
        return Err(RasterError::DegenerateTransform(
            "RPC denominator vanishes".to_string(),
        ));
    }

    let d2 = d * d;
    Ok(RatioEval {
        value: n / d,
        d_p: (n_p * d - n * d_p) / d2,
        d_l: (n_l * d - n * d_l) / d2,
    })
}

/// Returns (value, ∂/∂P, ∂/∂L) of a 20-term cubic.
fn polynomial(coefficients: &[f64; NUM_TERMS], p: f64, l: f64, h: f64) -> (f64, f64, f64) {
    let mut value = 0.0;
    let mut d_p = 0.0;
    let mut d_l = 0.0;

    for (coefficient, [ep, el, eh]) in coefficients.iter().zip(EXPONENTS.iter()) {
        if *coefficient == 0.0 {
            continue;
        }
        let hp = h.powi(*eh);
        value += coefficient * p.powi(*ep) * l.powi(*el) * hp;
        if *ep > 0 {
            d_p += coefficient * (*ep as f64) * p.powi(ep - 1) * l.powi(*el) * hp;
        }
        if *el > 0 {
            d_l += coefficient * (*el as f64) * p.powi(*ep) * l.powi(el - 1) * hp;
        }
    }

    (value, d_p, d_l)
}

/// Gaussian elimination with partial pivoting.
fn solve4(mut a: [[f64; 4]; 4], mut b: [f64; 4]) -> Result<[f64; 4], RasterError> {
    for col in 0..4 {
        let pivot = (col..4)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < 1e-12 {
            return Err(RasterError::DegenerateTransform(
                "corner points are collinear".to_string(),
            ));
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in (col + 1)..4 {
            let factor = a[row][col] / a[col][col];
            for k in col..4 {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0; 4];
    for row in (0..4).rev() {
        let tail: f64 = ((row + 1)..4).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Ok(x)
}

fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

fn non_zero(v: f64) -> f64 {
    if v.abs() < f64::EPSILON {
        1.0
    } else {
        v
    }
}
