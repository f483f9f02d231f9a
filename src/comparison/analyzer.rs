use anyhow::Result;
use geo::Geometry;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::CaseComparison;
use crate::case::annotation::Annotation;
use crate::case::category::{classify_from_presence, Category, Position};
use crate::case::PixelArray;
use crate::metrics::{Metric, MetricContext};

#[derive(Debug, Clone, PartialEq)]
pub struct MetricValue {
    pub name: &'static str,
    pub unit: &'static str,
    pub value: f64,
}

/// One row of the per-slice table: a contour at one slice of one category,
/// seen by both readers.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceComparison {
    pub case_name: String,
    pub reader1: String,
    pub reader2: String,
    pub studyinstanceuid: String,
    pub sop1: Option<String>,
    pub sop2: Option<String>,
    pub category: &'static str,
    pub contour: &'static str,
    pub slice: usize,
    pub nr_slices: usize,
    /// 0 at the first slice, 1 at the last
    pub depth_fraction: f64,
    pub phase1: usize,
    pub phase2: usize,
    pub has_contour1: bool,
    pub has_contour2: bool,
    pub position1: Position,
    pub position2: Position,
    pub metrics: Vec<MetricValue>,
}

impl SliceComparison {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.iter().find(|m| m.name == name).map(|m| m.value)
    }

    pub fn contoured_by_both(&self) -> bool {
        self.has_contour1 && self.has_contour2
    }
}

fn depth_fraction(slice: usize, nr_slices: usize) -> f64 {
    if nr_slices <= 1 {
        0.0
    } else {
        slice as f64 / (nr_slices - 1) as f64
    }
}

/// Builds the per-slice table of a case comparison.
#[derive(Debug, Clone, Copy)]
pub struct Analyzer {
    /// Compare reader 2 at reader 1's phase instead of its own.
    pub fixed_phase_first_reader: bool,
}

impl Default for Analyzer {
    fn default() -> Self {
        Analyzer {
            fixed_phase_first_reader: true,
        }
    }
}

/// Everything shared by the rows of one category pair.
struct PairInput<'a> {
    cat1: &'a Category,
    cat2: &'a Category,
    contour: &'static str,
    phase1: usize,
    phase2: usize,
    presence1: Vec<bool>,
    presence2: Vec<bool>,
    nr_slices: usize,
}

impl Analyzer {
    pub fn new(fixed_phase_first_reader: bool) -> Self {
        Analyzer {
            fixed_phase_first_reader,
        }
    }

    /// Resolves the phases to compare, `None` when the pair is skipped.
    pub fn phase_pair(&self, cat1: &Category, cat2: &Category) -> Option<(usize, usize)> {
        let phase1 = cat1.phase?;
        if self.fixed_phase_first_reader {
            Some((phase1, phase1))
        } else {
            Some((phase1, cat2.phase?))
        }
    }

    pub fn analyze(&self, comparison: &CaseComparison) -> Result<Vec<SliceComparison>> {
        let view = comparison.view();
        let metrics = view.metrics();
        let mut rows = Vec::new();

        for &contour in view.contour_names {
            for (cat1, cat2) in comparison.category_pairs_for_contour(contour)? {
                let Some((phase1, phase2)) = self.phase_pair(cat1, cat2) else {
                    debug!(
                        case = comparison.case_name(),
                        category = cat1.name(),
                        contour,
                        phase1 = ?cat1.phase,
                        phase2 = ?cat2.phase,
                        "phase not resolved, category pair skipped"
                    );
                    continue;
                };
                let input = PairInput {
                    cat1,
                    cat2,
                    contour,
                    phase1,
                    phase2,
                    presence1: cat1.presence(phase1, contour)?,
                    presence2: cat2.presence(phase2, contour)?,
                    nr_slices: cat1.nr_slices.max(cat2.nr_slices),
                };
                let pair_rows = (0..input.nr_slices)
                    .into_par_iter()
                    .map(|slice| self.row(comparison, &input, &metrics, slice))
                    .collect::<Result<Vec<_>>>()?;
                rows.extend(pair_rows);
            }
        }

        info!(
            case = comparison.case_name(),
            view = view.name,
            rows = rows.len(),
            fixed_phase_first_reader = self.fixed_phase_first_reader,
            "slice table built"
        );
        Ok(rows)
    }

    fn row(
        &self,
        comparison: &CaseComparison,
        input: &PairInput,
        metrics: &[Box<dyn Metric>],
        slice: usize,
    ) -> Result<SliceComparison> {
        let (cat1, cat2) = (input.cat1, input.cat2);
        let anno1 = cat1.get_anno_or_empty(slice, input.phase1)?;
        let anno2 = cat2.get_anno_or_empty(slice, input.phase2)?;
        let sop1 = cat1.sop(slice, input.phase1);
        let sop2 = cat2.sop(slice, input.phase2);

        let (pixels1, pixels2) = if comparison.view().needs_pixels {
            (
                load_pixels(cat1, slice, input.phase1),
                load_pixels(cat2, slice, input.phase2),
            )
        } else {
            (None, None)
        };
        let ctx = MetricContext {
            pixel_spacing: scale(cat1, cat2, sop1, sop2, |c, s| c.get_spacing(s))
                .or(anno1.pixel_size)
                .or(anno2.pixel_size),
            slice_thickness: scale(cat1, cat2, sop1, sop2, |c, s| c.get_slice_thickness(s)),
            pixels1: pixels1.as_ref(),
            pixels2: pixels2.as_ref(),
        };

        let geo1 = contour_geometry(&anno1, input.contour);
        let geo2 = contour_geometry(&anno2, input.contour);
        let metrics = metrics
            .iter()
            .map(|m| MetricValue {
                name: m.name(),
                unit: m.unit(),
                value: m.get_val(&geo1, &geo2, &ctx),
            })
            .collect();

        let (case1, case2) = (cat1.case(), cat2.case());
        Ok(SliceComparison {
            case_name: case1.case_name.clone(),
            reader1: case1.reader_name.clone(),
            reader2: case2.reader_name.clone(),
            studyinstanceuid: case1.studyinstanceuid.clone(),
            sop1: sop1.map(str::to_string),
            sop2: sop2.map(str::to_string),
            category: cat1.name(),
            contour: input.contour,
            slice,
            nr_slices: input.nr_slices,
            depth_fraction: depth_fraction(slice, input.nr_slices),
            phase1: input.phase1,
            phase2: input.phase2,
            has_contour1: anno1.has_contour(input.contour),
            has_contour2: anno2.has_contour(input.contour),
            position1: classify_from_presence(&input.presence1, slice),
            position2: classify_from_presence(&input.presence2, slice),
            metrics,
        })
    }
}

fn contour_geometry(anno: &Annotation, contour: &str) -> Geometry<f64> {
    Geometry::MultiPolygon(anno.get_contour(contour))
}

/// Frame scale from reader 1's frame, falling back to reader 2's.
fn scale<T, F>(cat1: &Category, cat2: &Category, sop1: Option<&str>, sop2: Option<&str>, f: F) -> Option<T>
where
    F: Fn(&crate::case::Case, &str) -> Option<T>,
{
    sop1.and_then(|s| f(cat1.case(), s))
        .or_else(|| sop2.and_then(|s| f(cat2.case(), s)))
}

fn load_pixels(category: &Category, slice: usize, phase: usize) -> Option<PixelArray> {
    category.sop(slice, phase)?;
    match category.get_img(slice, phase) {
        Ok(img) => Some(img),
        Err(e) => {
            warn!(
                category = category.name(),
                slice,
                phase,
                error = %e,
                "pixel data not available"
            );
            None
        }
    }
}
