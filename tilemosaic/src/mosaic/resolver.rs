//! Resolution-aware frame selection.

use std::collections::HashSet;
use std::fmt;
use std::ops::Bound;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use geo::{BooleanOps, ConvexHull, MultiPoint, MultiPolygon, Point, Polygon, Relate};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::catalog::{CatalogFilter, FrameCatalog};
use super::frame::{Frame, FrameOrder};
use crate::error::RasterError;
use crate::spatial::Bounds;

/// Meters spanned by one degree at the equator.
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Pixels of overlap added around every accepted frame.
pub const DEFAULT_BUFFER_PIXELS: f64 = 2.0;

/// How the target GSD constrains selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SelectionMode {
    /// Every intersecting frame, finest first.
    IgnoreResolution,
    /// Only frames near the target GSD, never much finer or coarser.
    #[default]
    MaximumResolution,
    /// Frames near the target first, then finer fill, then coarser
    /// fallback when nothing else qualifies.
    MinimumResolution,
}

impl fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SelectionMode::IgnoreResolution => "ignore",
            SelectionMode::MaximumResolution => "max",
            SelectionMode::MinimumResolution => "min",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for SelectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ignore" | "ignore-resolution" => Ok(SelectionMode::IgnoreResolution),
            "max" | "maximum" | "maximum-resolution" => Ok(SelectionMode::MaximumResolution),
            "min" | "minimum" | "minimum-resolution" => Ok(SelectionMode::MinimumResolution),
            other => Err(format!("unknown selection mode '{}'", other)),
        }
    }
}

/// A view rectangle in degrees. `west > east` crosses the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Region {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Result<Self, RasterError> {
        let region = Self {
            west,
            south,
            east,
            north,
        };
        let finite = [west, south, east, north].iter().all(|v| v.is_finite());
        if !finite || south > north || west.abs() > 180.0 || east.abs() > 180.0 {
            return Err(RasterError::InvalidRegion(format!("{:?}", region)));
        }
        Ok(region)
    }

    pub fn from_bounds(bounds: Bounds) -> Self {
        Self {
            west: bounds.min_x,
            south: bounds.min_y,
            east: bounds.max_x,
            north: bounds.max_y,
        }
    }

    pub fn crosses_antimeridian(&self) -> bool {
        self.west > self.east
    }

    /// One box, or two when the region wraps across 180°.
    pub fn parts(&self) -> Vec<Bounds> {
        if self.crosses_antimeridian() {
            vec![
                Bounds::new(self.west, self.south, 180.0, self.north),
                Bounds::new(-180.0, self.south, self.east, self.north),
            ]
        } else {
            vec![Bounds::new(self.west, self.south, self.east, self.north)]
        }
    }

    pub fn intersects_frame(&self, frame: &Frame) -> bool {
        self.parts().iter().any(|part| frame.intersects(part))
    }
}

/// Parameters of one resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct MosaicQuery {
    pub region: Region,
    /// Target ground sample distance in meters.
    pub target_gsd: f64,
    pub mode: SelectionMode,
    pub imagery_types: Option<Vec<String>>,
    /// Size of one view pixel in degrees. Derived from the target GSD when
    /// unset.
    pub degrees_per_pixel: Option<f64>,
}

impl MosaicQuery {
    pub fn new(region: Region, target_gsd: f64) -> Self {
        Self {
            region,
            target_gsd,
            mode: SelectionMode::default(),
            imagery_types: None,
            degrees_per_pixel: None,
        }
    }

    pub fn with_mode(mut self, mode: SelectionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_imagery_types(mut self, types: Option<Vec<String>>) -> Self {
        self.imagery_types = types;
        self
    }

    pub fn with_degrees_per_pixel(mut self, degrees: f64) -> Self {
        self.degrees_per_pixel = Some(degrees);
        self
    }

    pub fn degrees_per_pixel(&self) -> f64 {
        self.degrees_per_pixel
            .unwrap_or(self.target_gsd / METERS_PER_DEGREE)
    }
}

/// One catalog sweep within a resolution.
struct Pass {
    gsd: (Bound<f64>, Bound<f64>),
    order: FrameOrder,
}

/// Running union of accepted footprints over one view box.
struct Coverage {
    view: Polygon<f64>,
    buffer: f64,
    covered: Option<MultiPolygon<f64>>,
    selected: Vec<Frame>,
}

impl Coverage {
    fn new(view: Bounds, buffer: f64) -> Self {
        Self {
            view: view.to_polygon(),
            buffer,
            covered: None,
            selected: Vec::new(),
        }
    }

    fn is_complete(&self) -> bool {
        self.covered
            .as_ref()
            .is_some_and(|c| c.relate(&self.view).is_covers())
    }

    /// Accepts the frame unless the coverage already contains it.
    fn offer(&mut self, frame: &Frame) -> bool {
        let footprint = frame.polygon();
        if let Some(covered) = &self.covered {
            if covered.relate(&footprint).is_covers() {
                trace!(path = %frame.path.display(), "Frame already covered");
                return false;
            }
        }

        // The first frame seeds the coverage as is; later ones are buffered
        self.covered = Some(match self.covered.take() {
            Some(covered) => covered.union(&MultiPolygon::new(vec![expand(frame, self.buffer)])),
            None => MultiPolygon::new(vec![footprint]),
        });
        self.selected.push(frame.clone());
        true
    }
}

/// Convex hull of the corners pushed out by `by` in eight directions.
fn expand(frame: &Frame, by: f64) -> Polygon<f64> {
    const DIRECTIONS: [(f64, f64); 8] = [
        (1.0, 0.0),
        (1.0, 1.0),
        (0.0, 1.0),
        (-1.0, 1.0),
        (-1.0, 0.0),
        (-1.0, -1.0),
        (0.0, -1.0),
        (1.0, -1.0),
    ];
    let points: Vec<Point<f64>> = frame
        .corners
        .iter()
        .flat_map(|&(x, y)| {
            DIRECTIONS
                .iter()
                .map(move |&(dx, dy)| Point::new(x + dx * by, y + dy * by))
        })
        .collect();
    MultiPoint::new(points).convex_hull()
}

/// Picks the ordered set of frames that covers a region at a resolution.
///
/// # Selection
///
/// ```text
///  t = target GSD, gsd = frame native GSD
///
///  Ignore    all frames                       finest first
///  Maximum   t/2 <= gsd <= 2t                 finest first
///  Minimum   1) t/2 <= gsd <= 2t              coarsest first
///            2) t/16 <= gsd < t/2             coarsest first
///            3) gsd > 2t, if 1-2 found none   finest first
/// ```
///
/// Within a sweep, frames already inside the accumulated coverage are
/// skipped, and selection ends as soon as the coverage contains the view.
pub struct MosaicResolver {
    catalog: Arc<dyn FrameCatalog>,
    buffer_pixels: f64,
}

impl MosaicResolver {
    pub fn new(catalog: Arc<dyn FrameCatalog>) -> Self {
        Self {
            catalog,
            buffer_pixels: DEFAULT_BUFFER_PIXELS,
        }
    }

    pub fn with_buffer_pixels(mut self, pixels: f64) -> Self {
        self.buffer_pixels = pixels;
        self
    }

    pub fn catalog(&self) -> &Arc<dyn FrameCatalog> {
        &self.catalog
    }

    pub fn query(&self, query: &MosaicQuery) -> Result<Vec<Frame>, RasterError> {
        if !(query.target_gsd.is_finite() && query.target_gsd > 0.0) {
            return Err(RasterError::InvalidRegion(format!(
                "target GSD {} must be positive",
                query.target_gsd
            )));
        }

        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut frames = Vec::new();
        for part in query.region.parts() {
            for frame in self.resolve_part(query, part)? {
                if seen.insert(frame.path.clone()) {
                    frames.push(frame);
                }
            }
        }

        debug!(
            mode = %query.mode,
            target_gsd = query.target_gsd,
            frames = frames.len(),
            "Resolved mosaic"
        );
        Ok(frames)
    }

    fn resolve_part(&self, query: &MosaicQuery, view: Bounds) -> Result<Vec<Frame>, RasterError> {
        let t = query.target_gsd;
        let mut coverage = Coverage::new(view, self.buffer_pixels * query.degrees_per_pixel());
        let mut seen = HashSet::new();

        let passes = match query.mode {
            SelectionMode::IgnoreResolution => vec![Pass {
                gsd: (Bound::Unbounded, Bound::Unbounded),
                order: FrameOrder::FinestFirst,
            }],
            SelectionMode::MaximumResolution => vec![Pass {
                gsd: (Bound::Included(t / 2.0), Bound::Included(t * 2.0)),
                order: FrameOrder::FinestFirst,
            }],
            SelectionMode::MinimumResolution => vec![
                Pass {
                    gsd: (Bound::Included(t / 2.0), Bound::Included(t * 2.0)),
                    order: FrameOrder::CoarsestFirst,
                },
                Pass {
                    gsd: (Bound::Included(t / 16.0), Bound::Excluded(t / 2.0)),
                    order: FrameOrder::CoarsestFirst,
                },
            ],
        };

        for pass in &passes {
            if self.sweep(query, view, pass, &mut coverage, &mut seen)? {
                return Ok(coverage.selected);
            }
        }

        if query.mode == SelectionMode::MinimumResolution && coverage.selected.is_empty() {
            let fallback = Pass {
                gsd: (Bound::Excluded(t * 2.0), Bound::Unbounded),
                order: FrameOrder::FinestFirst,
            };
            self.sweep(query, view, &fallback, &mut coverage, &mut seen)?;
        }
        Ok(coverage.selected)
    }

    /// Offers one pass's candidates. Returns true once the view is covered.
    fn sweep(
        &self,
        query: &MosaicQuery,
        view: Bounds,
        pass: &Pass,
        coverage: &mut Coverage,
        seen: &mut HashSet<PathBuf>,
    ) -> Result<bool, RasterError> {
        let filter = CatalogFilter::new()
            .region(view)
            .imagery_types(query.imagery_types.clone())
            .gsd(pass.gsd)
            .order(pass.order);

        for frame in self.catalog.query(&filter)? {
            if !seen.insert(frame.path.clone()) {
                continue;
            }
            coverage.offer(&frame);
            if coverage.is_complete() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mosaic::MemoryCatalog;

    fn frame(path: &str, bounds: Bounds, gsd: f64) -> Frame {
        Frame::from_bounds(path, "ortho", bounds, gsd, gsd * 8.0)
    }

    fn resolver(frames: Vec<Frame>) -> MosaicResolver {
        MosaicResolver::new(Arc::new(MemoryCatalog::from_frames(frames)))
    }

    fn paths(frames: &[Frame]) -> Vec<&str> {
        frames.iter().map(|f| f.path.to_str().unwrap()).collect()
    }

    fn unit_view() -> Region {
        Region::new(0.0, 0.0, 1.0, 1.0).unwrap()
    }

    #[test]
    fn test_region_validation() {
        assert!(Region::new(0.0, 1.0, 1.0, 0.0).is_err());
        assert!(Region::new(0.0, 0.0, 190.0, 1.0).is_err());
        assert!(Region::new(f64::NAN, 0.0, 1.0, 1.0).is_err());
        assert!(Region::new(170.0, 0.0, -170.0, 1.0).is_ok());
    }

    #[test]
    fn test_antimeridian_parts() {
        let region = Region::new(170.0, -5.0, -170.0, 5.0).unwrap();
        assert!(region.crosses_antimeridian());
        assert_eq!(
            region.parts(),
            vec![
                Bounds::new(170.0, -5.0, 180.0, 5.0),
                Bounds::new(-180.0, -5.0, -170.0, 5.0)
            ]
        );
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("max".parse::<SelectionMode>(), Ok(SelectionMode::MaximumResolution));
        assert_eq!("Minimum".parse::<SelectionMode>(), Ok(SelectionMode::MinimumResolution));
        assert_eq!("ignore".parse::<SelectionMode>(), Ok(SelectionMode::IgnoreResolution));
        assert!("best".parse::<SelectionMode>().is_err());
        assert_eq!(SelectionMode::MinimumResolution.to_string(), "min");
    }

    #[test]
    fn test_covering_frame_ends_selection() {
        let resolver = resolver(vec![
            frame("base.png", Bounds::new(-1.0, -1.0, 2.0, 2.0), 1.0),
            frame("patch-a.png", Bounds::new(0.1, 0.1, 0.4, 0.4), 2.0),
            frame("patch-b.png", Bounds::new(0.5, 0.5, 0.9, 0.9), 3.0),
        ]);

        let query = MosaicQuery::new(unit_view(), 1.0).with_mode(SelectionMode::IgnoreResolution);
        let frames = resolver.query(&query).unwrap();
        assert_eq!(paths(&frames), vec!["base.png"]);
    }

    #[test]
    fn test_covered_candidate_skipped() {
        let resolver = resolver(vec![
            frame("left.png", Bounds::new(-0.1, -0.1, 0.5, 1.1), 1.0),
            frame("inside-left.png", Bounds::new(0.1, 0.1, 0.3, 0.3), 2.0),
            frame("right.png", Bounds::new(0.45, -0.1, 1.1, 1.1), 3.0),
            frame("late.png", Bounds::new(0.0, 0.0, 1.0, 1.0), 4.0),
        ]);

        let query = MosaicQuery::new(unit_view(), 1.0).with_mode(SelectionMode::IgnoreResolution);
        let frames = resolver.query(&query).unwrap();
        assert_eq!(paths(&frames), vec!["left.png", "right.png"]);
    }

    #[test]
    fn test_first_frame_not_buffered() {
        // 0.01 short of the right edge, inside the 0.02 buffer
        let resolver = resolver(vec![
            frame("wide.png", Bounds::new(0.0, 0.0, 0.99, 1.0), 1.0),
            frame("edge.png", Bounds::new(0.9, 0.0, 1.0, 1.0), 2.0),
        ]);

        let query = MosaicQuery::new(unit_view(), 1.0)
            .with_mode(SelectionMode::IgnoreResolution)
            .with_degrees_per_pixel(0.01);
        let frames = resolver.query(&query).unwrap();
        assert_eq!(paths(&frames), vec!["wide.png", "edge.png"]);
    }

    #[test]
    fn test_maximum_resolution_band() {
        let resolver = resolver(vec![
            frame("fine.png", Bounds::new(0.0, 0.0, 0.5, 1.0), 0.5),
            frame("near.png", Bounds::new(0.0, 0.0, 0.5, 1.0), 3.0),
            frame("coarse.png", Bounds::new(0.5, 0.0, 1.0, 1.0), 9.0),
        ]);

        let frames = resolver.query(&MosaicQuery::new(unit_view(), 4.0)).unwrap();
        assert_eq!(paths(&frames), vec!["near.png"]);
    }

    #[test]
    fn test_minimum_resolution_falls_back_to_coarser() {
        let resolver = resolver(vec![
            frame("coarse.png", Bounds::new(0.0, 0.0, 1.0, 1.0), 20.0),
            frame("coarser.png", Bounds::new(0.0, 0.0, 1.0, 1.0), 50.0),
        ]);

        let query = MosaicQuery::new(unit_view(), 4.0).with_mode(SelectionMode::MinimumResolution);
        let frames = resolver.query(&query).unwrap();
        assert_eq!(paths(&frames), vec!["coarse.png"]);

        // Maximum resolution never widens
        let query = query.with_mode(SelectionMode::MaximumResolution);
        assert!(resolver.query(&query).unwrap().is_empty());
    }

    #[test]
    fn test_minimum_resolution_skips_fallback_when_band_matched() {
        let resolver = resolver(vec![
            frame("band.png", Bounds::new(0.0, 0.0, 0.5, 1.0), 4.0),
            frame("coarse.png", Bounds::new(0.0, 0.0, 1.0, 1.0), 20.0),
        ]);

        let query = MosaicQuery::new(unit_view(), 4.0).with_mode(SelectionMode::MinimumResolution);
        assert_eq!(paths(&resolver.query(&query).unwrap()), vec!["band.png"]);
    }

    #[test]
    fn test_type_filter_applies() {
        let resolver = resolver(vec![
            Frame::from_bounds("sar.png", "sar", Bounds::new(0.0, 0.0, 1.0, 1.0), 4.0, 40.0),
            frame("ortho.png", Bounds::new(0.0, 0.0, 1.0, 1.0), 4.0),
        ]);

        let query = MosaicQuery::new(unit_view(), 4.0).with_imagery_types(Some(vec!["sar".to_string()]));
        assert_eq!(paths(&resolver.query(&query).unwrap()), vec!["sar.png"]);
    }

    #[test]
    fn test_antimeridian_union_keeps_first_seen_order() {
        let resolver = resolver(vec![
            frame("east-side.png", Bounds::new(170.0, -5.0, 180.0, 5.0), 2.0),
            frame("west-side.png", Bounds::new(-180.0, -5.0, -170.0, 5.0), 1.0),
        ]);

        let region = Region::new(172.0, -1.0, -172.0, 1.0).unwrap();
        let query = MosaicQuery::new(region, 2.0).with_mode(SelectionMode::IgnoreResolution);
        let frames = resolver.query(&query).unwrap();
        assert_eq!(paths(&frames), vec!["east-side.png", "west-side.png"]);
    }

    #[test]
    fn test_non_positive_gsd_rejected() {
        let resolver = resolver(Vec::new());
        let result = resolver.query(&MosaicQuery::new(unit_view(), 0.0));
        assert!(matches!(result, Err(RasterError::InvalidRegion(_))));
    }

    #[test]
    fn test_default_pixel_size_from_gsd() {
        let query = MosaicQuery::new(unit_view(), METERS_PER_DEGREE);
        assert_eq!(query.degrees_per_pixel(), 1.0);
        assert_eq!(query.with_degrees_per_pixel(0.25).degrees_per_pixel(), 0.25);
    }
}
