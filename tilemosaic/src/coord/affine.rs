//! Six-coefficient affine geotransform.

use super::{GroundPoint, ImagePoint};
use crate::error::RasterError;

/// Affine pixel → ground transform.
///
/// Coefficients follow the common geotransform layout:
///
/// ```text
/// x = c[0] + c[1]·px + c[2]·py
/// y = c[3] + c[4]·px + c[5]·py
/// ```
///
/// The inverse is computed once at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct AffineModel {
    image_to_ground: [f64; 6],
    ground_to_image: [f64; 6],
    srid: i32,
}

impl AffineModel {
    /// Builds the model, rejecting all-zero or singular coefficients.
    pub fn new(coefficients: [f64; 6], srid: i32) -> Result<Self, RasterError> {
        if coefficients.iter().all(|c| *c == 0.0) {
            return Err(RasterError::DegenerateTransform(
                "geotransform is all zero".to_string(),
            ));
        }
        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(RasterError::DegenerateTransform(
                "geotransform has non-finite coefficients".to_string(),
            ));
        }

        let [c0, a, b, c3, c, d] = coefficients;
        let det = a * d - b * c;
        if det == 0.0 || !det.is_finite() {
            return Err(RasterError::DegenerateTransform(format!(
                "geotransform is not invertible (determinant {})",
                det
            )));
        }

        // px = ia·(x - c0) + ib·(y - c3), py = ic·(x - c0) + id·(y - c3)
        let ia = d / det;
        let ib = -b / det;
        let ic = -c / det;
        let id = a / det;
        let ground_to_image = [
            -(ia * c0 + ib * c3),
            ia,
            ib,
            -(ic * c0 + id * c3),
            ic,
            id,
        ];

        Ok(Self {
            image_to_ground: coefficients,
            ground_to_image,
            srid,
        })
    }

    /// North-up transform from an origin and pixel size.
    pub fn north_up(
        origin_x: f64,
        origin_y: f64,
        pixel_width: f64,
        pixel_height: f64,
        srid: i32,
    ) -> Result<Self, RasterError> {
        Self::new(
            [origin_x, pixel_width, 0.0, origin_y, 0.0, -pixel_height],
            srid,
        )
    }

    pub fn coefficients(&self) -> [f64; 6] {
        self.image_to_ground
    }

    pub fn srid(&self) -> i32 {
        self.srid
    }

    pub fn forward(&self, ground: GroundPoint) -> ImagePoint {
        let t = &self.ground_to_image;
        ImagePoint {
            x: t[0] + t[1] * ground.x + t[2] * ground.y,
            y: t[3] + t[4] * ground.x + t[5] * ground.y,
        }
    }

    pub fn inverse(&self, image: ImagePoint) -> GroundPoint {
        let t = &self.image_to_ground;
        GroundPoint::new(
            t[0] + t[1] * image.x + t[2] * image.y,
            t[3] + t[4] * image.x + t[5] * image.y,
        )
    }

    /// Approximate ground sample distance in native units per pixel.
    pub fn pixel_size(&self) -> f64 {
        let t = &self.image_to_ground;
        let sx = (t[1] * t[1] + t[4] * t[4]).sqrt();
        let sy = (t[2] * t[2] + t[5] * t[5]).sqrt();
        (sx * sy).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_zero_is_degenerate() {
        let result = AffineModel::new([0.0; 6], 4326);
        assert!(matches!(result, Err(RasterError::DegenerateTransform(_))));
    }

    #[test]
    fn test_singular_is_degenerate() {
        // Columns are parallel
        let result = AffineModel::new([5.0, 1.0, 2.0, 5.0, 2.0, 4.0], 4326);
        assert!(matches!(result, Err(RasterError::DegenerateTransform(_))));
    }

    #[test]
    fn test_north_up_corners() {
        let model = AffineModel::north_up(-120.0, 40.0, 0.5, 0.25, 4326).unwrap();

        assert_eq!(model.inverse(ImagePoint::new(0.0, 0.0)), GroundPoint::new(-120.0, 40.0));
        assert_eq!(
            model.inverse(ImagePoint::new(10.0, 8.0)),
            GroundPoint::new(-115.0, 38.0)
        );

        let px = model.forward(GroundPoint::new(-115.0, 38.0));
        assert!((px.x - 10.0).abs() < 1e-12);
        assert!((px.y - 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_pixel_size() {
        let model = AffineModel::north_up(0.0, 0.0, 2.0, 2.0, 32633).unwrap();
        assert!((model.pixel_size() - 2.0).abs() < 1e-12);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn well_conditioned() -> impl Strategy<Value = [f64; 6]> {
            (
                -1000.0..1000.0_f64,
                0.01..10.0_f64,
                -1.0..1.0_f64,
                -1000.0..1000.0_f64,
                -1.0..1.0_f64,
                0.01..10.0_f64,
            )
                .prop_map(|(c0, a, b, c3, c, d)| [c0, a, b, c3, c, -d])
                .prop_filter("determinant away from zero", |m| (m[1] * m[5] - m[2] * m[4]).abs() > 1e-2)
        }

        proptest! {
            #[test]
            fn test_forward_inverse_roundtrip(
                coefficients in well_conditioned(),
                px in -10_000.0..10_000.0_f64,
                py in -10_000.0..10_000.0_f64,
            ) {
                let model = AffineModel::new(coefficients, 4326).unwrap();
                let image = ImagePoint::new(px, py);

                let back = model.forward(model.inverse(image));

                prop_assert!((back.x - px).abs() < 1e-6, "x {} vs {}", back.x, px);
                prop_assert!((back.y - py).abs() < 1e-6, "y {} vs {}", back.y, py);
            }
        }
    }
}
