//! Pixel ↔ ground coordinate models.
//!
//! Every opened dataset carries one [`CoordinateModel`]. Two variants exist:
//!
//! - [`AffineModel`]: a six-coefficient geotransform with a closed-form
//!   inverse, used by north-up and simply rotated imagery.
//! - [`RpcModel`]: rational polynomial coefficients for precision imagery.
//!   The forward direction (ground → image) is closed-form; the inverse is
//!   solved iteratively and reports whether it converged.
//!
//! Models are immutable after construction and can be shared across threads.
//!
//! # Example
//!
//! ```
//! use tilemosaic::coord::{AffineModel, CoordinateModel, ImagePoint};
//!
//! let model = CoordinateModel::Affine(
//!     AffineModel::new([10.0, 0.001, 0.0, 50.0, 0.0, -0.001], 4326).unwrap(),
//! );
//! let ground = model.inverse(ImagePoint::new(100.0, 200.0)).unwrap().point;
//! assert!((ground.x - 10.1).abs() < 1e-9);
//! assert!((ground.y - 49.8).abs() < 1e-9);
//! ```

mod affine;
mod rpc;

pub use affine::AffineModel;
pub use rpc::{RpcCoefficients, RpcModel, RpcNormalization, DEFAULT_MAX_ITERATIONS, DEFAULT_TOLERANCE};

use crate::error::RasterError;

/// A location in image pixel space. `x` is the sample (column), `y` the line (row).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImagePoint {
    pub x: f64,
    pub y: f64,
}

impl ImagePoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A location on the ground in the model's native spatial reference.
///
/// For geographic references `x` is longitude and `y` latitude. `z` is the
/// height above ellipsoid; `None` lets the model pick its default.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundPoint {
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
}

impl GroundPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, z: None }
    }

    pub fn with_height(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z: Some(z) }
    }
}

/// How an inverse result was obtained.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Convergence {
    /// Closed-form inverse.
    Exact,
    /// Iteration reached the residual tolerance after `iterations` steps.
    Converged { iterations: u32 },
    /// Iteration cap reached; the lowest-residual iterate was returned.
    BestEffort { residual: f64, iterations: u32 },
}

impl Convergence {
    /// True unless the result is a best-effort estimate.
    pub fn is_converged(&self) -> bool {
        !matches!(self, Convergence::BestEffort { .. })
    }
}

/// Result of an image → ground inversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundEstimate {
    pub point: GroundPoint,
    pub convergence: Convergence,
}

/// Coordinate model for one dataset.
#[derive(Debug, Clone)]
pub enum CoordinateModel {
    Affine(AffineModel),
    Rpc(RpcModel),
}

impl CoordinateModel {
    /// Ground → image.
    pub fn forward(&self, ground: GroundPoint) -> Result<ImagePoint, RasterError> {
        match self {
            CoordinateModel::Affine(m) => Ok(m.forward(ground)),
            CoordinateModel::Rpc(m) => m.forward(ground),
        }
    }

    /// Image → ground.
    ///
    /// RPC models hold elevation at the model's height offset; use
    /// [`RpcModel::inverse_at`] to supply a terrain height.
    pub fn inverse(&self, image: ImagePoint) -> Result<GroundEstimate, RasterError> {
        match self {
            CoordinateModel::Affine(m) => Ok(GroundEstimate {
                point: m.inverse(image),
                convergence: Convergence::Exact,
            }),
            CoordinateModel::Rpc(m) => m.inverse(image),
        }
    }

    pub fn native_spatial_reference_id(&self) -> i32 {
        match self {
            CoordinateModel::Affine(m) => m.srid(),
            CoordinateModel::Rpc(m) => m.srid(),
        }
    }

    /// Whether this model is suitable for precision geolocation.
    pub fn is_precise(&self) -> bool {
        matches!(self, CoordinateModel::Rpc(_))
    }
}

impl From<AffineModel> for CoordinateModel {
    fn from(m: AffineModel) -> Self {
        CoordinateModel::Affine(m)
    }
}

impl From<RpcModel> for CoordinateModel {
    fn from(m: RpcModel) -> Self {
        CoordinateModel::Rpc(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affine_dispatch_reports_exact() {
        let model: CoordinateModel = AffineModel::new([0.0, 1.0, 0.0, 0.0, 0.0, 1.0], 3857)
            .unwrap()
            .into();

        let estimate = model.inverse(ImagePoint::new(3.0, 4.0)).unwrap();
        assert_eq!(estimate.convergence, Convergence::Exact);
        assert_eq!(estimate.point, GroundPoint::new(3.0, 4.0));
        assert_eq!(model.native_spatial_reference_id(), 3857);
        assert!(!model.is_precise());
    }

    #[test]
    fn test_rpc_dispatch() {
        let corners = [
            GroundPoint::new(10.0, 50.1),
            GroundPoint::new(10.1, 50.1),
            GroundPoint::new(10.1, 50.0),
            GroundPoint::new(10.0, 50.0),
        ];
        let model: CoordinateModel = RpcModel::from_corner_points(1000, 1000, corners)
            .unwrap()
            .into();

        assert!(model.is_precise());
        assert_eq!(model.native_spatial_reference_id(), 4326);
        let image = model.forward(GroundPoint::new(10.05, 50.05)).unwrap();
        assert!((image.x - 500.0).abs() < 1e-6);
        assert!((image.y - 500.0).abs() < 1e-6);
    }

    #[test]
    fn test_best_effort_not_converged() {
        let c = Convergence::BestEffort {
            residual: 0.5,
            iterations: 15,
        };
        assert!(!c.is_converged());
        assert!(Convergence::Converged { iterations: 2 }.is_converged());
    }
}
