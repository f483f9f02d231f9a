use anyhow::Result;
use geo::{Coord, Geometry, LineString, MultiPolygon, Polygon};
use std::f64::consts::PI;
use std::path::Path;

use crate::case::view::SAX_CINE_TAG;
use crate::case::{Case, FrameMeta};
use crate::io::annotation_record::{AnnotationRecord, ShapeRecord};

pub use crate::case::view::{LV_ED, LV_ES};

/// Generates a closed ellipse contour for testing
pub fn ellipse_contour(cx: f64, cy: f64, major: f64, minor: f64, num_points: usize) -> MultiPolygon<f64> {
    let mut coords: Vec<Coord<f64>> = (0..num_points)
        .map(|i| {
            let theta = 2.0 * PI * (i as f64) / (num_points as f64);
            Coord {
                x: cx + major * theta.cos(),
                y: cy + minor * theta.sin(),
            }
        })
        .collect();
    if let Some(first) = coords.first().copied() {
        coords.push(first);
    }
    MultiPolygon::new(vec![Polygon::new(LineString::new(coords), Vec::new())])
}

/// Axis-aligned square with its lower corner at (x, y)
pub fn square(x: f64, y: f64, side: f64) -> MultiPolygon<f64> {
    let ring = LineString::from(vec![
        (x, y),
        (x + side, y),
        (x + side, y + side),
        (x, y + side),
        (x, y),
    ]);
    MultiPolygon::new(vec![Polygon::new(ring, Vec::new())])
}

/// Frame at a slice location with unit pixel spacing on a 64x64 grid
pub fn meta_at(position: f64, instance_number: i32) -> FrameMeta {
    FrameMeta {
        slice_location: Some(position),
        instance_number,
        pixel_spacing: Some([1.0, 1.0]),
        slice_thickness: Some(8.0),
        rows: 64,
        columns: 64,
        ..Default::default()
    }
}

/// Annotation file content holding a single square contour
pub fn square_record(contour: &str, x: f64, y: f64, side: f64) -> AnnotationRecord {
    let mut record = AnnotationRecord::default();
    insert_square(&mut record, contour, x, y, side);
    record
}

fn insert_square(record: &mut AnnotationRecord, contour: &str, x: f64, y: f64, side: f64) {
    let geom = Geometry::MultiPolygon(square(x, y, side));
    if let Some(shape) = ShapeRecord::from_geometry(&geom) {
        record.contours.insert(contour.to_string(), shape);
    }
}

/// Builds a cine case from contour areas given as `[phase][slice]` pixel
/// counts. Each drawn contour is a square of that area; frames are 10 mm
/// apart with 1.5 mm pixels and 8 mm slice thickness.
pub fn synthetic_contours(
    dir: &Path,
    case_name: &str,
    reader: &str,
    uid: &str,
    contours: &[(&str, &[Vec<Option<f64>>])],
) -> Result<Case> {
    let nr_phases = contours.iter().map(|(_, a)| a.len()).max().unwrap_or(0);
    let nr_slices = contours
        .iter()
        .flat_map(|(_, a)| a.iter().map(Vec::len))
        .max()
        .unwrap_or(0);

    let mut case = Case::new(case_name, reader, uid);
    for phase in 0..nr_phases {
        for slice in 0..nr_slices {
            let sop = format!("{}.{}.{}", uid, slice, phase);
            let mut meta = meta_at(slice as f64 * 10.0, phase as i32 + 1);
            meta.pixel_spacing = Some([1.5, 1.5]);
            case.add_image(SAX_CINE_TAG, &sop, dir.join(format!("{}.png", sop)), meta);

            let mut record = AnnotationRecord::default();
            for (name, areas) in contours {
                if let Some(Some(area)) = areas.get(phase).and_then(|p| p.get(slice)) {
                    insert_square(&mut record, name, 10.0, 10.0, area.sqrt());
                }
            }
            if !record.contours.is_empty() {
                let path = dir.join(format!("{}.json", sop));
                record.write(&path)?;
                case.add_annotation(&sop, path);
            }
        }
    }
    Ok(case)
}

pub fn synthetic_case(
    dir: &Path,
    case_name: &str,
    reader: &str,
    uid: &str,
    contour: &str,
    areas: &[Vec<Option<f64>>],
) -> Result<Case> {
    synthetic_contours(dir, case_name, reader, uid, &[(contour, areas)])
}

/// Per-contour `[phase][slice]` areas of a short-axis cine stack
#[derive(Debug, Clone, Default)]
pub struct CineSlices {
    pub lv_endo: Vec<Vec<Option<f64>>>,
    pub lv_myo: Vec<Vec<Option<f64>>>,
    pub rv_endo: Vec<Vec<Option<f64>>>,
}

pub fn synthetic_cine_case(
    dir: &Path,
    case_name: &str,
    reader: &str,
    uid: &str,
    slices: &CineSlices,
) -> Result<Case> {
    synthetic_contours(
        dir,
        case_name,
        reader,
        uid,
        &[
            ("lv_endo", slices.lv_endo.as_slice()),
            ("lv_myo", slices.lv_myo.as_slice()),
            ("rv_endo", slices.rv_endo.as_slice()),
        ],
    )
}
