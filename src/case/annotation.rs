use geo::{Area, Centroid, Geometry, MultiPoint, MultiPolygon};
use nalgebra::Vector2;
use std::collections::BTreeMap;

use crate::geometry::{self, raster::Mask};
use crate::io::annotation_record::AnnotationRecord;

/// Contours and points drawn by one reader on one image frame.
///
/// Built on demand from an annotation record and dropped after use. Every
/// lookup answers with an empty sentinel instead of failing when the reader
/// did not draw the requested shape.
#[derive(Debug, Clone, Default)]
pub struct Annotation {
    pub sop: String,
    contours: BTreeMap<String, Geometry<f64>>,
    points: BTreeMap<String, Geometry<f64>>,
    pub pixel_size: Option<(f64, f64)>,
    pub image_size: Option<(u32, u32)>,
}

impl Annotation {
    /// Annotation of a frame the reader never touched.
    pub fn empty(sop: &str) -> Self {
        Annotation {
            sop: sop.to_string(),
            ..Default::default()
        }
    }

    pub fn new(
        sop: &str,
        contours: BTreeMap<String, Geometry<f64>>,
        points: BTreeMap<String, Geometry<f64>>,
    ) -> Self {
        Annotation {
            sop: sop.to_string(),
            contours,
            points,
            pixel_size: None,
            image_size: None,
        }
    }

    pub fn from_record(sop: &str, record: &AnnotationRecord) -> Self {
        Annotation {
            sop: sop.to_string(),
            contours: record
                .contours
                .iter()
                .map(|(name, shape)| (name.clone(), shape.to_geometry()))
                .collect(),
            points: record
                .points
                .iter()
                .map(|(name, shape)| (name.clone(), shape.to_geometry()))
                .collect(),
            pixel_size: record.pixel_size.map(|[r, c]| (r, c)),
            image_size: record.image_size.map(|[h, w]| (h, w)),
        }
    }

    pub fn has_contour(&self, name: &str) -> bool {
        self.contours
            .get(name)
            .is_some_and(|g| geometry::is_polygonal(g) && !geometry::is_empty(g))
    }

    pub fn get_contour(&self, name: &str) -> MultiPolygon<f64> {
        if !self.has_contour(name) {
            return geometry::empty_contour();
        }
        self.contours
            .get(name)
            .and_then(geometry::polygonal)
            .unwrap_or_else(geometry::empty_contour)
    }

    pub fn has_point(&self, name: &str) -> bool {
        self.points
            .get(name)
            .is_some_and(|g| geometry::is_pointlike(g) && !geometry::is_empty(g))
    }

    pub fn get_point(&self, name: &str) -> MultiPoint<f64> {
        if !self.has_point(name) {
            return geometry::empty_points();
        }
        self.points
            .get(name)
            .and_then(geometry::pointlike)
            .unwrap_or_else(geometry::empty_points)
    }

    /// Contour area in pixel units, 0 if absent.
    pub fn contour_area(&self, name: &str) -> f64 {
        self.get_contour(name).unsigned_area()
    }

    pub fn get_contour_as_mask(&self, name: &str, height: u32, width: u32) -> Mask {
        geometry::to_mask(&self.get_contour(name), height, width)
    }

    /// Distance between the first coordinates of two named points, scaled by
    /// the in-plane pixel spacing when the record carries it. NaN if either
    /// point is missing.
    pub fn point_distance(&self, from: &str, to: &str) -> f64 {
        let (Some(a), Some(b)) = (self.first_point(from), self.first_point(to)) else {
            return f64::NAN;
        };
        let scale = self.pixel_size.map_or(1.0, |(row, _)| row);
        (b - a).norm() * scale
    }

    /// Direction of the line from one named point to another, in degrees
    /// counterclockwise from the image x axis. NaN if either point is missing.
    pub fn point_angle(&self, from: &str, to: &str) -> f64 {
        let (Some(a), Some(b)) = (self.first_point(from), self.first_point(to)) else {
            return f64::NAN;
        };
        let d = b - a;
        if d.norm() == 0.0 {
            return f64::NAN;
        }
        d.y.atan2(d.x).to_degrees()
    }

    fn first_point(&self, name: &str) -> Option<Vector2<f64>> {
        self.get_point(name)
            .0
            .first()
            .map(|p| Vector2::new(p.x(), p.y()))
    }

    /// Splits a contour mask into `nr_bins` angular sectors around the contour
    /// centroid. Sector 0 starts at the direction of the reference point and the
    /// sectors advance counterclockwise. `None` if the contour or the reference
    /// point is missing.
    pub fn angular_bin_masks(
        &self,
        contour: &str,
        reference_point: &str,
        nr_bins: usize,
        height: u32,
        width: u32,
    ) -> Option<Vec<Mask>> {
        if nr_bins == 0 {
            return None;
        }
        let centroid = self.get_contour(contour).centroid()?;
        let reference = self.first_point(reference_point)?;
        let center = Vector2::new(centroid.x(), centroid.y());
        let start = reference - center;
        if start.norm() == 0.0 {
            return None;
        }
        let start_angle = start.y.atan2(start.x);

        let mask = self.get_contour_as_mask(contour, height, width);
        let mut bins: Vec<Mask> = (0..nr_bins).map(|_| Mask::new(width, height)).collect();
        let sector = std::f64::consts::TAU / nr_bins as f64;
        for (x, y, px) in mask.enumerate_pixels() {
            if px[0] == 0 {
                continue;
            }
            let d = Vector2::new(x as f64 + 0.5, y as f64 + 0.5) - center;
            let angle = (d.y.atan2(d.x) - start_angle).rem_euclid(std::f64::consts::TAU);
            let bin = ((angle / sector) as usize).min(nr_bins - 1);
            bins[bin].put_pixel(x, y, *px);
        }
        Some(bins)
    }
}
