pub mod ops;
pub mod raster;

use geo::{Geometry, HasDimensions, MultiPoint, MultiPolygon, Point};

pub use ops::{dice, has_overlapping_parts, hausdorff, overlap_comparison, OverlapComparison};
pub use raster::{to_mask, to_polygon, Mask};

/// The sentinel returned for every absent contour. Its area is zero and it
/// can be fed to every operation in this module.
pub fn empty_contour() -> MultiPolygon<f64> {
    MultiPolygon::new(Vec::new())
}

pub fn empty_points() -> MultiPoint<f64> {
    MultiPoint::new(Vec::new())
}

/// Normalizes a polygonal geometry into a `MultiPolygon`.
///
/// Returns `None` for every non-polygonal geometry type (lines, points, ...).
pub fn polygonal(geom: &Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geom {
        Geometry::Polygon(p) => Some(MultiPolygon::new(vec![p.clone()])),
        Geometry::MultiPolygon(mp) => Some(mp.clone()),
        _ => None,
    }
}

/// Normalizes a point-like geometry into a `MultiPoint`.
pub fn pointlike(geom: &Geometry<f64>) -> Option<MultiPoint<f64>> {
    match geom {
        Geometry::Point(p) => Some(MultiPoint::new(vec![*p])),
        Geometry::MultiPoint(mp) => Some(mp.clone()),
        _ => None,
    }
}

pub fn is_polygonal(geom: &Geometry<f64>) -> bool {
    matches!(geom, Geometry::Polygon(_) | Geometry::MultiPolygon(_))
}

pub fn is_pointlike(geom: &Geometry<f64>) -> bool {
    matches!(geom, Geometry::Point(_) | Geometry::MultiPoint(_))
}

pub fn is_empty(geom: &Geometry<f64>) -> bool {
    geom.is_empty()
}

/// First and last coordinate of a line or point pair, used for direction based
/// measurements. `None` if the geometry does not describe two distinct ends.
pub fn endpoints(geom: &Geometry<f64>) -> Option<(Point<f64>, Point<f64>)> {
    let (first, last) = match geom {
        Geometry::LineString(ls) => (ls.0.first()?, ls.0.last()?),
        Geometry::MultiPoint(mp) => (&mp.0.first()?.0, &mp.0.last()?.0),
        Geometry::Line(l) => (&l.start, &l.end),
        _ => return None,
    };
    if first == last {
        return None;
    }
    Some((Point::from(*first), Point::from(*last)))
}
