use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::annotation::Annotation;
use super::{Case, FrameMeta, PixelArray};
use crate::error::CompareError;

/// Slice positions closer than this (mm) belong to the same slice.
const SLICE_POSITION_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    /// phase with the smallest total marker area (end-systole)
    Min,
    /// phase with the largest total marker area (end-diastole)
    Max,
}

/// Configuration of a category: which frames it covers and how its target
/// phase is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategorySpec {
    pub name: &'static str,
    pub view_tag: &'static str,
    pub marker_contour: &'static str,
    pub objective: Objective,
}

/// Cardiac position of a slice relative to the contoured stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Basal,
    Midv,
    Apical,
    Outside,
}

impl Position {
    pub fn as_str(&self) -> &'static str {
        match self {
            Position::Basal => "basal",
            Position::Midv => "midv",
            Position::Apical => "apical",
            Position::Outside => "outside",
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The frames of one case along (slice, phase), with the phase that
/// represents this category resolved once at construction.
#[derive(Debug, Clone)]
pub struct Category {
    pub spec: CategorySpec,
    case: Arc<Case>,
    index: BTreeMap<(usize, usize), String>,
    pub nr_slices: usize,
    pub nr_phases: usize,
    /// `None` when the reader never drew the marker contour.
    pub phase: Option<usize>,
}

impl Category {
    pub fn new(case: Arc<Case>, spec: CategorySpec) -> Result<Category> {
        let (index, nr_slices, nr_phases) = build_index(&case, spec.view_tag);
        let mut category = Category {
            spec,
            case,
            index,
            nr_slices,
            nr_phases,
            phase: None,
        };
        category.phase = category.resolve_phase()?;
        debug!(
            case = %category.case.case_name,
            reader = %category.case.reader_name,
            category = spec.name,
            nr_slices,
            nr_phases,
            phase = ?category.phase,
            "category resolved"
        );
        Ok(category)
    }

    pub fn name(&self) -> &'static str {
        self.spec.name
    }

    pub fn case(&self) -> &Case {
        &self.case
    }

    pub fn sop(&self, slice: usize, phase: usize) -> Option<&str> {
        self.index.get(&(slice, phase)).map(String::as_str)
    }

    /// Annotation at (slice, phase). Positions outside the index are an error,
    /// callers check `nr_slices`/`nr_phases` first.
    pub fn get_anno(&self, slice: usize, phase: usize) -> Result<Annotation> {
        let sop = self.sop(slice, phase).ok_or(CompareError::IndexNotFound {
            category: self.spec.name.to_string(),
            slice,
            phase,
        })?;
        self.case.load_anno(sop)
    }

    /// Like `get_anno`, but a position without frame reads as an empty annotation.
    pub fn get_anno_or_empty(&self, slice: usize, phase: usize) -> Result<Annotation> {
        match self.sop(slice, phase) {
            Some(sop) => self.case.load_anno(sop),
            None => Ok(Annotation::empty("")),
        }
    }

    pub fn get_img(&self, slice: usize, phase: usize) -> Result<PixelArray> {
        let sop = self.sop(slice, phase).ok_or(CompareError::IndexNotFound {
            category: self.spec.name.to_string(),
            slice,
            phase,
        })?;
        self.case.get_pixel_array(sop)
    }

    /// Summed contour area (pixels) per phase; `None` for phases where no
    /// slice carries the contour.
    pub fn phase_areas(&self, contour: &str) -> Result<Vec<Option<f64>>> {
        let mut areas = Vec::with_capacity(self.nr_phases);
        for phase in 0..self.nr_phases {
            let mut total: Option<f64> = None;
            for slice in 0..self.nr_slices {
                let anno = self.get_anno_or_empty(slice, phase)?;
                if anno.has_contour(contour) {
                    *total.get_or_insert(0.0) += anno.contour_area(contour);
                }
            }
            areas.push(total);
        }
        Ok(areas)
    }

    fn resolve_phase(&self) -> Result<Option<usize>> {
        let areas = self.phase_areas(self.spec.marker_contour)?;
        let mut best: Option<(usize, f64)> = None;
        for (phase, area) in areas.into_iter().enumerate() {
            let Some(area) = area else { continue };
            let better = match best {
                None => true,
                Some((_, current)) => match self.spec.objective {
                    Objective::Min => area < current,
                    Objective::Max => area > current,
                },
            };
            if better {
                best = Some((phase, area));
            }
        }
        Ok(best.map(|(phase, _)| phase))
    }

    /// Contour presence for every slice at one phase.
    pub fn presence(&self, phase: usize, contour: &str) -> Result<Vec<bool>> {
        (0..self.nr_slices)
            .map(|slice| Ok(self.get_anno_or_empty(slice, phase)?.has_contour(contour)))
            .collect()
    }
}

/// Sorts the frames of a view into (slice, phase) order: slices by position
/// along the slice normal, phases by trigger time and instance number.
fn build_index(case: &Case, view_tag: &str) -> (BTreeMap<(usize, usize), String>, usize, usize) {
    let mut frames: Vec<(&str, &FrameMeta, f64)> = Vec::new();
    for sop in case.sops_for_view(view_tag) {
        let Some(meta) = case.frame_meta(sop) else { continue };
        match meta.slice_position() {
            Some(pos) => frames.push((sop, meta, pos)),
            None => warn!(sop, "frame without slice position, skipped"),
        }
    }
    frames.sort_by(|a, b| a.2.total_cmp(&b.2));

    let mut slices: Vec<Vec<(&str, &FrameMeta)>> = Vec::new();
    let mut last_pos: Option<f64> = None;
    for (sop, meta, pos) in frames {
        match last_pos {
            Some(p) if (pos - p).abs() < SLICE_POSITION_TOLERANCE => {}
            _ => {
                slices.push(Vec::new());
                last_pos = Some(pos);
            }
        }
        if let Some(slice) = slices.last_mut() {
            slice.push((sop, meta));
        }
    }

    let mut index = BTreeMap::new();
    let mut nr_phases = 0;
    for (slice_idx, slice) in slices.iter_mut().enumerate() {
        slice.sort_by_key(|(_, m)| m.instance_number);
        if slice.iter().all(|(_, m)| m.trigger_time.is_some()) {
            slice.sort_by(|a, b| {
                let (ta, tb) = (a.1.trigger_time.unwrap_or(0.0), b.1.trigger_time.unwrap_or(0.0));
                ta.total_cmp(&tb)
            });
        }
        nr_phases = nr_phases.max(slice.len());
        for (phase_idx, (sop, _)) in slice.iter().enumerate() {
            index.insert((slice_idx, phase_idx), sop.to_string());
        }
    }
    (index, slices.len(), nr_phases)
}

/// Position of a slice given the contour presence of its stack.
///
/// A contoured slice without contoured neighbours on either side is
/// reported as `Midv`.
pub fn classify_from_presence(presence: &[bool], slice: usize) -> Position {
    if !presence.get(slice).copied().unwrap_or(false) {
        return Position::Outside;
    }
    if slice == 0 {
        return Position::Basal;
    }
    if slice == presence.len() - 1 {
        return Position::Apical;
    }
    match (presence[slice - 1], presence[slice + 1]) {
        (true, true) => Position::Midv,
        (true, false) => Position::Apical,
        (false, true) => Position::Basal,
        (false, false) => Position::Midv,
    }
}

pub fn classify_position(
    category: &Category,
    slice: usize,
    phase: usize,
    contour: &str,
) -> Result<Position> {
    let presence = category.presence(phase, contour)?;
    Ok(classify_from_presence(&presence, slice))
}
