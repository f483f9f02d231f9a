use anyhow::{anyhow, Result};
use tracing::warn;

use super::category::Category;
use super::view::ViewedCase;
use crate::error::CompareError;
use crate::metrics::{format_value, mean_intensity};

/// Myocardial tissue density in g/ml.
pub const MYOCARDIAL_DENSITY: f64 = 1.05;

/// How a clinical result is derived from a viewed case.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measure {
    /// summed contour volume (ml) at the category's phase
    Volume {
        category: &'static str,
        contour: &'static str,
    },
    /// contour volume times tissue density (g)
    Mass {
        category: &'static str,
        contour: &'static str,
        density: f64,
    },
    StrokeVolume {
        ed: &'static str,
        es: &'static str,
        contour: &'static str,
    },
    EjectionFraction {
        ed: &'static str,
        es: &'static str,
        contour: &'static str,
    },
    /// the category's resolved phase index
    Phase { category: &'static str },
    /// summed contour area (cm²) at the category's phase
    Area {
        category: &'static str,
        contour: &'static str,
    },
    /// mean pixel value inside the contour over all slices
    MeanIntensity {
        category: &'static str,
        contour: &'static str,
    },
}

/// A named scalar derived from one reader's annotations. Stateless:
/// evaluated on every query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClinicalResult {
    pub name: &'static str,
    pub unit: &'static str,
    /// clinically acceptable difference between two readers
    pub tol_range: Option<f64>,
    pub measure: Measure,
}

impl ClinicalResult {
    pub fn compute(&self, case: &ViewedCase) -> Result<f64> {
        match self.measure {
            Measure::Volume { category, contour } => volume(category_of(case, category)?, contour),
            Measure::Mass {
                category,
                contour,
                density,
            } => Ok(volume(category_of(case, category)?, contour)? * density),
            Measure::StrokeVolume { ed, es, contour } => {
                let edv = volume(category_of(case, ed)?, contour)?;
                let esv = volume(category_of(case, es)?, contour)?;
                Ok(edv - esv)
            }
            Measure::EjectionFraction { ed, es, contour } => {
                let edv = volume(category_of(case, ed)?, contour)?;
                let esv = volume(category_of(case, es)?, contour)?;
                if edv == 0.0 {
                    return Ok(f64::NAN);
                }
                Ok(100.0 * (edv - esv) / edv)
            }
            Measure::Phase { category } => Ok(category_of(case, category)?
                .phase
                .map_or(f64::NAN, |p| p as f64)),
            Measure::Area { category, contour } => area_cm2(category_of(case, category)?, contour),
            Measure::MeanIntensity { category, contour } => {
                intensity(category_of(case, category)?, contour)
            }
        }
    }

    /// NaN when the value cannot be derived.
    pub fn get_val(&self, case: &ViewedCase) -> f64 {
        match self.compute(case) {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    clinical_result = self.name,
                    case = %case.case.case_name,
                    reader = %case.case.reader_name,
                    error = %e,
                    "clinical result failed"
                );
                f64::NAN
            }
        }
    }

    pub fn get_val_string(&self, case: &ViewedCase) -> String {
        format_value(self.get_val(case))
    }
}

fn category_of<'a>(case: &'a ViewedCase, name: &str) -> Result<&'a Category> {
    case.category(name)
        .ok_or_else(|| CompareError::UnknownCategory(name.to_string()).into())
}

/// Sums `f(area_px, row_spacing, col_spacing, thickness)` over the contoured
/// slices of the category's phase.
fn sum_over_slices<F>(category: &Category, contour: &str, needs_thickness: bool, f: F) -> Result<f64>
where
    F: Fn(f64, f64, f64, f64) -> f64,
{
    let Some(phase) = category.phase else {
        return Ok(f64::NAN);
    };
    let case = category.case();
    let mut total = 0.0;
    for slice in 0..category.nr_slices {
        let anno = category.get_anno_or_empty(slice, phase)?;
        if !anno.has_contour(contour) {
            continue;
        }
        let sop = category.sop(slice, phase).unwrap_or_default();
        let (row, col) = case
            .get_spacing(sop)
            .or(anno.pixel_size)
            .ok_or_else(|| anyhow!("missing pixel spacing for frame {}", sop))?;
        let thickness = match case.get_slice_thickness(sop) {
            Some(t) => t,
            None if needs_thickness => return Err(anyhow!("missing slice thickness for frame {}", sop)),
            None => 0.0,
        };
        total += f(anno.contour_area(contour), row, col, thickness);
    }
    Ok(total)
}

fn volume(category: &Category, contour: &str) -> Result<f64> {
    sum_over_slices(category, contour, true, |area, row, col, thickness| {
        area * row * col * thickness / 1000.0
    })
}

fn area_cm2(category: &Category, contour: &str) -> Result<f64> {
    sum_over_slices(category, contour, false, |area, row, col, _| area * row * col / 100.0)
}

fn intensity(category: &Category, contour: &str) -> Result<f64> {
    let Some(phase) = category.phase else {
        return Ok(f64::NAN);
    };
    let mut weighted = 0.0;
    let mut pixels = 0usize;
    for slice in 0..category.nr_slices {
        let anno = category.get_anno_or_empty(slice, phase)?;
        if !anno.has_contour(contour) {
            continue;
        }
        let img = category.get_img(slice, phase)?;
        let polys = anno.get_contour(contour);
        let mean = mean_intensity(&polys, &img);
        if mean.is_nan() {
            continue;
        }
        let count = crate::geometry::to_mask(&polys, img.height(), img.width())
            .pixels()
            .filter(|p| p[0] > 0)
            .count();
        weighted += mean * count as f64;
        pixels += count;
    }
    if pixels == 0 {
        return Ok(f64::NAN);
    }
    Ok(weighted / pixels as f64)
}
