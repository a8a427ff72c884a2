//! Catalogued source images.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use geo::{Intersects, LineString, Point, Polygon};
use serde::{Deserialize, Serialize};

use crate::coord::{AffineModel, CoordinateModel, GroundPoint, RpcModel};
use crate::error::RasterError;
use crate::spatial::Bounds;

/// SRID of WGS84 geographic coordinates.
pub const WGS84_SRID: i32 = 4326;

fn default_srid() -> i32 {
    WGS84_SRID
}

/// One source image with a known ground footprint.
///
/// Frames are identified by path: equality and hashing ignore every other
/// field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub path: PathBuf,
    pub imagery_type: String,
    /// Footprint corners as (lon, lat), clockwise from upper left.
    pub corners: [(f64, f64); 4],
    /// Native ground sample distance in meters.
    pub min_gsd: f64,
    /// Coarsest GSD the frame is displayed at.
    pub max_gsd: f64,
    #[serde(default = "default_srid")]
    pub srid: i32,
    #[serde(default)]
    pub precise: bool,
}

impl Frame {
    pub fn new(
        path: impl Into<PathBuf>,
        imagery_type: impl Into<String>,
        corners: [(f64, f64); 4],
        min_gsd: f64,
        max_gsd: f64,
    ) -> Self {
        Self {
            path: path.into(),
            imagery_type: imagery_type.into(),
            corners,
            min_gsd,
            max_gsd,
            srid: WGS84_SRID,
            precise: false,
        }
    }

    /// Frame whose footprint is the axis-aligned box `bounds`.
    pub fn from_bounds(
        path: impl Into<PathBuf>,
        imagery_type: impl Into<String>,
        bounds: Bounds,
        min_gsd: f64,
        max_gsd: f64,
    ) -> Self {
        let corners = [
            (bounds.min_x, bounds.max_y),
            (bounds.max_x, bounds.max_y),
            (bounds.max_x, bounds.min_y),
            (bounds.min_x, bounds.min_y),
        ];
        Self::new(path, imagery_type, corners, min_gsd, max_gsd)
    }

    pub fn with_srid(mut self, srid: i32) -> Self {
        self.srid = srid;
        self
    }

    pub fn with_precise(mut self, precise: bool) -> Self {
        self.precise = precise;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bounds(&self) -> Bounds {
        let mut bounds = Bounds::new(
            self.corners[0].0,
            self.corners[0].1,
            self.corners[0].0,
            self.corners[0].1,
        );
        for &(x, y) in &self.corners[1..] {
            bounds.min_x = bounds.min_x.min(x);
            bounds.min_y = bounds.min_y.min(y);
            bounds.max_x = bounds.max_x.max(x);
            bounds.max_y = bounds.max_y.max(y);
        }
        bounds
    }

    /// Footprint as a closed polygon.
    pub fn polygon(&self) -> Polygon<f64> {
        Polygon::new(LineString::from(self.corners.to_vec()), vec![])
    }

    pub fn intersects(&self, region: &Bounds) -> bool {
        self.bounds().intersects(region) && self.polygon().intersects(&region.to_polygon())
    }

    /// True when the point lies inside or on the footprint.
    pub fn covers_point(&self, x: f64, y: f64) -> bool {
        self.bounds().contains_point(x, y) && self.polygon().intersects(&Point::new(x, y))
    }

    /// Pixel/ground model for this frame's `width`×`height` image.
    ///
    /// Precise frames get an RPC fitted through all four corners. Others
    /// get an affine transform through the upper-left, upper-right and
    /// lower-left corners.
    pub fn coordinate_model(&self, width: u32, height: u32) -> Result<CoordinateModel, RasterError> {
        if self.precise {
            let corners = self.corners.map(|(x, y)| GroundPoint::new(x, y));
            return Ok(CoordinateModel::Rpc(RpcModel::from_corner_points(
                width, height, corners,
            )?));
        }
        if width == 0 || height == 0 {
            return Err(RasterError::DegenerateTransform(
                "image has zero extent".to_string(),
            ));
        }

        let [ul, ur, _, ll] = self.corners;
        let (w, h) = (width as f64, height as f64);
        let coefficients = [
            ul.0,
            (ur.0 - ul.0) / w,
            (ll.0 - ul.0) / h,
            ul.1,
            (ur.1 - ul.1) / w,
            (ll.1 - ul.1) / h,
        ];
        Ok(CoordinateModel::Affine(AffineModel::new(coefficients, self.srid)?))
    }
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for Frame {}

impl Hash for Frame {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

/// Ordering of frames by native GSD, then imagery type, then path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameOrder {
    #[default]
    FinestFirst,
    /// Back-to-front render order.
    CoarsestFirst,
}

impl FrameOrder {
    pub fn compare(self, a: &Frame, b: &Frame) -> Ordering {
        let by_gsd = match self {
            FrameOrder::FinestFirst => a.min_gsd.total_cmp(&b.min_gsd),
            FrameOrder::CoarsestFirst => b.min_gsd.total_cmp(&a.min_gsd),
        };
        by_gsd
            .then_with(|| a.imagery_type.cmp(&b.imagery_type))
            .then_with(|| a.path.cmp(&b.path))
    }

    pub fn sort(self, frames: &mut [Frame]) {
        frames.sort_by(|a, b| self.compare(a, b));
    }
}
