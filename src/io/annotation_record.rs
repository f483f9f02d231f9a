use anyhow::{Context, Result};
use geo::{Geometry, LineString, MultiPoint, MultiPolygon, Point, Polygon};
use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// GeoJSON-like serialized geometry as stored in per-frame annotation files.
///
/// ```text
/// {"type": "Polygon", "coordinates": [[[x, y], [x, y], ...]]}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum ShapeRecord {
    Point([f64; 2]),
    MultiPoint(Vec<[f64; 2]>),
    LineString(Vec<[f64; 2]>),
    Polygon(Vec<Vec<[f64; 2]>>),
    MultiPolygon(Vec<Vec<Vec<[f64; 2]>>>),
}

fn ring_from(coords: &[[f64; 2]]) -> LineString<f64> {
    LineString::from(coords.to_vec())
}

fn polygon_from(rings: &[Vec<[f64; 2]>]) -> Polygon<f64> {
    match rings.split_first() {
        Some((exterior, interiors)) => Polygon::new(
            ring_from(exterior),
            interiors.iter().map(|r| ring_from(r)).collect(),
        ),
        None => Polygon::new(LineString::new(Vec::new()), Vec::new()),
    }
}

fn rings_of(polygon: &Polygon<f64>) -> Vec<Vec<[f64; 2]>> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors().iter())
        .map(|ring| ring.coords().map(|c| [c.x, c.y]).collect())
        .collect()
}

impl ShapeRecord {
    pub fn to_geometry(&self) -> Geometry<f64> {
        match self {
            ShapeRecord::Point(p) => Geometry::Point(Point::from(*p)),
            ShapeRecord::MultiPoint(pts) => Geometry::MultiPoint(MultiPoint::from(pts.clone())),
            ShapeRecord::LineString(coords) => Geometry::LineString(ring_from(coords)),
            ShapeRecord::Polygon(rings) => Geometry::Polygon(polygon_from(rings)),
            ShapeRecord::MultiPolygon(polys) => Geometry::MultiPolygon(MultiPolygon::new(
                polys.iter().map(|p| polygon_from(p)).collect(),
            )),
        }
    }

    /// `None` for geometry types the annotation format does not carry.
    pub fn from_geometry(geom: &Geometry<f64>) -> Option<ShapeRecord> {
        match geom {
            Geometry::Point(p) => Some(ShapeRecord::Point([p.x(), p.y()])),
            Geometry::MultiPoint(mp) => Some(ShapeRecord::MultiPoint(
                mp.0.iter().map(|p| [p.x(), p.y()]).collect(),
            )),
            Geometry::LineString(ls) => Some(ShapeRecord::LineString(
                ls.coords().map(|c| [c.x, c.y]).collect(),
            )),
            Geometry::Polygon(p) => Some(ShapeRecord::Polygon(rings_of(p))),
            Geometry::MultiPolygon(mp) => Some(ShapeRecord::MultiPolygon(
                mp.0.iter().map(rings_of).collect(),
            )),
            _ => None,
        }
    }
}

/// One annotation file, keyed by the SOPInstanceUID of its image frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationRecord {
    #[serde(default)]
    pub contours: BTreeMap<String, ShapeRecord>,
    #[serde(default)]
    pub points: BTreeMap<String, ShapeRecord>,
    /// (row spacing, column spacing) in mm
    #[serde(default)]
    pub pixel_size: Option<[f64; 2]>,
    /// (height, width) in pixels
    #[serde(default)]
    pub image_size: Option<[u32; 2]>,
}

impl AnnotationRecord {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<AnnotationRecord> {
        let file = File::open(&path)
            .with_context(|| format!("failed to open annotation file {:?}", path.as_ref()))?;
        let record = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse annotation file {:?}", path.as_ref()))?;
        Ok(record)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create output directory: {:?}", parent))?;
        }
        let file = File::create(&path)
            .with_context(|| format!("failed to create annotation file {:?}", path.as_ref()))?;
        serde_json::to_writer(BufWriter::new(file), self)?;
        Ok(())
    }
}
