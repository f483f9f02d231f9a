//! Static registry of clinical views.
//!
//! A view names the contours it compares, the categories each contour is
//! evaluated in, the metrics of the per-slice table and the clinical results
//! derived from a case. Applying a view to a case yields a `ViewedCase`;
//! the case itself is never modified.

use anyhow::Result;
use rayon::prelude::*;
use tracing::info;

use std::sync::Arc;

use super::category::{Category, CategorySpec, Objective};
use super::clinical::{ClinicalResult, Measure, MYOCARDIAL_DENSITY};
use super::Case;
use crate::error::CompareError;
use crate::metrics::{
    AbsMlDiffMetric, AreaDiffMetric, AvgIntensityDiffMetric, DiceMetric, HausdorffMetric, Metric,
    MlDiffMetric,
};

pub const SAX_CINE_TAG: &str = "SAX CINE";
pub const SAX_T1_TAG: &str = "SAX T1";

pub const LV_ES: CategorySpec = CategorySpec {
    name: "SAX LV ES",
    view_tag: SAX_CINE_TAG,
    marker_contour: "lv_endo",
    objective: Objective::Min,
};
pub const LV_ED: CategorySpec = CategorySpec {
    name: "SAX LV ED",
    view_tag: SAX_CINE_TAG,
    marker_contour: "lv_endo",
    objective: Objective::Max,
};
pub const RV_ES: CategorySpec = CategorySpec {
    name: "SAX RV ES",
    view_tag: SAX_CINE_TAG,
    marker_contour: "rv_endo",
    objective: Objective::Min,
};
pub const RV_ED: CategorySpec = CategorySpec {
    name: "SAX RV ED",
    view_tag: SAX_CINE_TAG,
    marker_contour: "rv_endo",
    objective: Objective::Max,
};
pub const T1_MAP: CategorySpec = CategorySpec {
    name: "SAX T1",
    view_tag: SAX_T1_TAG,
    marker_contour: "lv_myo",
    objective: Objective::Max,
};

#[derive(Debug, Clone, Copy)]
pub struct View {
    pub name: &'static str,
    pub contour_names: &'static [&'static str],
    pub categories: &'static [CategorySpec],
    /// contour name -> names of the categories it is compared in
    pub contour_categories: &'static [(&'static str, &'static [&'static str])],
    pub metrics: fn() -> Vec<Box<dyn Metric>>,
    pub clinical_results: &'static [ClinicalResult],
    /// whether the metrics need pixel data of both frames
    pub needs_pixels: bool,
}

impl View {
    pub fn categories_for(&self, contour: &str) -> Result<&'static [&'static str], CompareError> {
        self.contour_categories
            .iter()
            .find(|(name, _)| *name == contour)
            .map(|(_, cats)| *cats)
            .ok_or_else(|| CompareError::UnmappedContour {
                view: self.name.to_string(),
                contour: contour.to_string(),
            })
    }

    pub fn category_spec(&self, name: &str) -> Option<&CategorySpec> {
        self.categories.iter().find(|c| c.name == name)
    }

    pub fn metrics(&self) -> Vec<Box<dyn Metric>> {
        (self.metrics)()
    }
}

fn sax_cine_metrics() -> Vec<Box<dyn Metric>> {
    vec![
        Box::new(DiceMetric),
        Box::new(HausdorffMetric),
        Box::new(MlDiffMetric),
        Box::new(AbsMlDiffMetric),
    ]
}

fn sax_t1_metrics() -> Vec<Box<dyn Metric>> {
    vec![
        Box::new(DiceMetric),
        Box::new(HausdorffMetric),
        Box::new(AreaDiffMetric),
        Box::new(AvgIntensityDiffMetric),
    ]
}

const fn volume(name: &'static str, category: &'static str, contour: &'static str) -> ClinicalResult {
    ClinicalResult {
        name,
        unit: "ml",
        tol_range: Some(10.0),
        measure: Measure::Volume { category, contour },
    }
}

pub static SAX_CINE: View = View {
    name: "SAX CINE",
    contour_names: &["lv_endo", "lv_myo", "rv_endo"],
    categories: &[LV_ES, LV_ED, RV_ES, RV_ED],
    contour_categories: &[
        ("lv_endo", &["SAX LV ES", "SAX LV ED"]),
        ("lv_myo", &["SAX LV ED"]),
        ("rv_endo", &["SAX RV ES", "SAX RV ED"]),
    ],
    metrics: sax_cine_metrics,
    clinical_results: &[
        volume("LVESV", "SAX LV ES", "lv_endo"),
        volume("LVEDV", "SAX LV ED", "lv_endo"),
        ClinicalResult {
            name: "LVSV",
            unit: "ml",
            tol_range: Some(10.0),
            measure: Measure::StrokeVolume {
                ed: "SAX LV ED",
                es: "SAX LV ES",
                contour: "lv_endo",
            },
        },
        ClinicalResult {
            name: "LVEF",
            unit: "%",
            tol_range: Some(5.0),
            measure: Measure::EjectionFraction {
                ed: "SAX LV ED",
                es: "SAX LV ES",
                contour: "lv_endo",
            },
        },
        ClinicalResult {
            name: "LVM",
            unit: "g",
            tol_range: Some(10.0),
            measure: Measure::Mass {
                category: "SAX LV ED",
                contour: "lv_myo",
                density: MYOCARDIAL_DENSITY,
            },
        },
        volume("RVESV", "SAX RV ES", "rv_endo"),
        volume("RVEDV", "SAX RV ED", "rv_endo"),
        ClinicalResult {
            name: "RVSV",
            unit: "ml",
            tol_range: Some(10.0),
            measure: Measure::StrokeVolume {
                ed: "SAX RV ED",
                es: "SAX RV ES",
                contour: "rv_endo",
            },
        },
        ClinicalResult {
            name: "RVEF",
            unit: "%",
            tol_range: Some(5.0),
            measure: Measure::EjectionFraction {
                ed: "SAX RV ED",
                es: "SAX RV ES",
                contour: "rv_endo",
            },
        },
        ClinicalResult {
            name: "LVESP",
            unit: "#",
            tol_range: None,
            measure: Measure::Phase { category: "SAX LV ES" },
        },
        ClinicalResult {
            name: "LVEDP",
            unit: "#",
            tol_range: None,
            measure: Measure::Phase { category: "SAX LV ED" },
        },
    ],
    needs_pixels: false,
};

pub static SAX_T1_MAP: View = View {
    name: "SAX T1 MAP",
    contour_names: &["lv_myo"],
    categories: &[T1_MAP],
    contour_categories: &[("lv_myo", &["SAX T1"])],
    metrics: sax_t1_metrics,
    clinical_results: &[
        ClinicalResult {
            name: "GLOBAL T1",
            unit: "ms",
            tol_range: Some(30.0),
            measure: Measure::MeanIntensity {
                category: "SAX T1",
                contour: "lv_myo",
            },
        },
        ClinicalResult {
            name: "MYO AREA",
            unit: "cm²",
            tol_range: None,
            measure: Measure::Area {
                category: "SAX T1",
                contour: "lv_myo",
            },
        },
    ],
    needs_pixels: true,
};

pub static VIEWS: [&View; 2] = [&SAX_CINE, &SAX_T1_MAP];

pub fn view_by_name(name: &str) -> Result<&'static View, CompareError> {
    VIEWS
        .iter()
        .copied()
        .find(|v| v.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| CompareError::UnknownView(name.to_string()))
}

/// A case seen through one view: the case plus the categories the view
/// defines on it.
#[derive(Debug, Clone)]
pub struct ViewedCase {
    pub case: Arc<Case>,
    pub view: &'static View,
    pub categories: Vec<Category>,
}

impl ViewedCase {
    pub fn category(&self, name: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.name() == name)
    }

    pub fn clinical_values(&self) -> Vec<(ClinicalResult, f64)> {
        self.view
            .clinical_results
            .iter()
            .map(|cr| (*cr, cr.get_val(self)))
            .collect()
    }
}

/// Builds the view's categories on a case. Re-applying a view to the same
/// case gives an equal result.
pub fn apply_view(case: Arc<Case>, view: &'static View) -> Result<ViewedCase> {
    let categories = view
        .categories
        .par_iter()
        .map(|spec| Category::new(case.clone(), *spec))
        .collect::<Result<Vec<_>>>()?;
    info!(
        case = %case.case_name,
        reader = %case.reader_name,
        view = view.name,
        "view applied"
    );
    Ok(ViewedCase {
        case,
        view,
        categories,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::{synthetic_cine_case, CineSlices};

    #[test]
    fn test_registry_lookup() {
        assert_eq!(view_by_name("SAX CINE").unwrap().name, "SAX CINE");
        assert_eq!(view_by_name("sax t1 map").unwrap().name, "SAX T1 MAP");
        assert!(matches!(
            view_by_name("LAX CINE"),
            Err(CompareError::UnknownView(_))
        ));
    }

    #[test]
    fn test_every_mapped_category_exists() {
        for view in VIEWS {
            for contour in view.contour_names {
                for cat in view.categories_for(contour).unwrap() {
                    assert!(view.category_spec(cat).is_some(), "{} missing in {}", cat, view.name);
                }
            }
        }
    }

    #[test]
    fn test_unmapped_contour() {
        let err = SAX_CINE.categories_for("la").unwrap_err();
        assert!(matches!(err, CompareError::UnmappedContour { .. }));
    }

    #[test]
    fn test_apply_view_leaves_case_untouched() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let slices = CineSlices {
            lv_endo: vec![vec![Some(30.0); 2], vec![Some(20.0); 2]],
            lv_myo: vec![vec![Some(10.0); 2], vec![None; 2]],
            rv_endo: vec![vec![None; 2], vec![None; 2]],
        };
        let case = Arc::new(synthetic_cine_case(dir.path(), "c", "r", "1", &slices)?);
        let cine = apply_view(case.clone(), &SAX_CINE)?;
        let t1 = apply_view(case.clone(), &SAX_T1_MAP)?;
        let again = apply_view(case.clone(), &SAX_CINE)?;

        assert_eq!(cine.categories.len(), 4);
        assert_eq!(t1.categories.len(), 1);
        // no T1 frames registered on this case
        assert_eq!(t1.categories[0].nr_slices, 0);
        let phases = |v: &ViewedCase| v.categories.iter().map(|c| c.phase).collect::<Vec<_>>();
        assert_eq!(phases(&cine), phases(&again));
        assert_eq!(phases(&cine), vec![Some(1), Some(0), None, None]);
        Ok(())
    }
}
