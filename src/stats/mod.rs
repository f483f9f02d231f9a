//! Cohort statistics over case comparisons: clinical result agreement,
//! per-contour metric summaries and Bland–Altman input.

pub mod job;

use anyhow::{anyhow, Result};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::case::category::Position;
use crate::case::view::View;
use crate::comparison::{CaseComparison, SliceComparison};
use crate::io::config::AnalysisConfig;

pub use job::CohortJob;

/// Mean and sample standard deviation of the finite values of a series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeanStd {
    pub n: usize,
    pub mean: f64,
    pub std: f64,
}

pub fn mean_std<I: IntoIterator<Item = f64>>(values: I) -> MeanStd {
    let values: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
    let n = values.len();
    if n == 0 {
        return MeanStd {
            n,
            mean: f64::NAN,
            std: f64::NAN,
        };
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let std = if n < 2 {
        f64::NAN
    } else {
        (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
    };
    MeanStd { n, mean, std }
}

/// `mean ± z·std/√n` of the finite values, as (lower, upper).
pub fn confidence_interval(values: &[f64], z: f64) -> (f64, f64) {
    let stats = mean_std(values.iter().copied());
    let half = z * stats.std / (stats.n as f64).sqrt();
    (stats.mean - half, stats.mean + half)
}

/// One clinical result of one case as measured by both readers.
#[derive(Debug, Clone, PartialEq)]
pub struct ClinicalValue {
    pub name: &'static str,
    pub unit: &'static str,
    pub tol_range: Option<f64>,
    pub value1: f64,
    pub value2: f64,
}

impl ClinicalValue {
    /// reader 1 minus reader 2
    pub fn diff(&self) -> f64 {
        self.value1 - self.value2
    }

    pub fn average(&self) -> f64 {
        (self.value1 + self.value2) / 2.0
    }

    /// `None` without tolerance or when a value is missing.
    pub fn within_tolerance(&self) -> Option<bool> {
        let tol = self.tol_range?;
        let diff = self.diff();
        diff.is_finite().then(|| diff.abs() <= tol)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseClinicalResults {
    pub case_name: String,
    pub reader1: String,
    pub reader2: String,
    pub studyinstanceuid: String,
    pub values: Vec<ClinicalValue>,
}

impl CaseClinicalResults {
    pub fn from_comparison(comparison: &CaseComparison) -> Self {
        let (reader1, reader2) = comparison.readers();
        let values = comparison
            .case1
            .clinical_values()
            .into_iter()
            .zip(comparison.case2.clinical_values())
            .map(|((cr, value1), (_, value2))| ClinicalValue {
                name: cr.name,
                unit: cr.unit,
                tol_range: cr.tol_range,
                value1,
                value2,
            })
            .collect();
        CaseClinicalResults {
            case_name: comparison.case_name().to_string(),
            reader1: reader1.to_string(),
            reader2: reader2.to_string(),
            studyinstanceuid: comparison.case1.case.studyinstanceuid.clone(),
            values,
        }
    }

    pub fn value(&self, name: &str) -> Option<&ClinicalValue> {
        self.values.iter().find(|v| v.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClinicalResultSummary {
    pub name: &'static str,
    pub unit: &'static str,
    pub tol_range: Option<f64>,
    pub reader1: MeanStd,
    pub reader2: MeanStd,
    pub diff: MeanStd,
    /// confidence interval of the mean difference, (lower, upper)
    pub ci: (f64, f64),
    /// cases whose difference lies within the tolerance range
    pub within_tolerance: usize,
}

/// Per clinical result summary over the cases, in the order of the first case.
pub fn summarize_clinical_results(cases: &[CaseClinicalResults], z: f64) -> Vec<ClinicalResultSummary> {
    let Some(first) = cases.first() else {
        return Vec::new();
    };
    first
        .values
        .iter()
        .map(|template| {
            let values: Vec<&ClinicalValue> = cases.iter().filter_map(|c| c.value(template.name)).collect();
            let diffs: Vec<f64> = values.iter().map(|v| v.diff()).collect();
            ClinicalResultSummary {
                name: template.name,
                unit: template.unit,
                tol_range: template.tol_range,
                reader1: mean_std(values.iter().map(|v| v.value1)),
                reader2: mean_std(values.iter().map(|v| v.value2)),
                diff: mean_std(diffs.iter().copied()),
                ci: confidence_interval(&diffs, z),
                within_tolerance: values
                    .iter()
                    .filter(|v| v.within_tolerance() == Some(true))
                    .count(),
            }
        })
        .collect()
}

/// Which rows of the per-slice table enter a metric summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SliceSelection {
    All,
    /// Rows with `0 < Dice < 100`. Excludes slices nobody drew, and also
    /// slices both readers drew identically.
    ContouredByBoth,
}

impl SliceSelection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SliceSelection::All => "all",
            SliceSelection::ContouredByBoth => "contoured by both",
        }
    }

    pub fn includes(&self, row: &SliceComparison) -> bool {
        match self {
            SliceSelection::All => true,
            SliceSelection::ContouredByBoth => row
                .metric("Dice")
                .is_some_and(|dice| dice > 0.0 && dice < 100.0),
        }
    }
}

/// Position a row is grouped under: reader 1's, or reader 2's where reader 1
/// has nothing.
pub fn grouping_position(row: &SliceComparison) -> Position {
    if row.position1 == Position::Outside {
        row.position2
    } else {
        row.position1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSummary {
    pub contour: &'static str,
    pub metric: &'static str,
    pub unit: &'static str,
    /// `None` summarizes all positions
    pub position: Option<Position>,
    pub selection: SliceSelection,
    pub stats: MeanStd,
}

const SUMMARY_POSITIONS: [Option<Position>; 4] = [
    None,
    Some(Position::Basal),
    Some(Position::Midv),
    Some(Position::Apical),
];

pub fn summarize_metrics(view: &View, rows: &[SliceComparison]) -> Vec<MetricSummary> {
    let metrics = view.metrics();
    let mut summaries = Vec::new();
    for &contour in view.contour_names {
        let contour_rows: Vec<&SliceComparison> = rows.iter().filter(|r| r.contour == contour).collect();
        for metric in &metrics {
            for position in SUMMARY_POSITIONS {
                for selection in [SliceSelection::All, SliceSelection::ContouredByBoth] {
                    let values = contour_rows
                        .iter()
                        .filter(|r| position.is_none_or(|p| grouping_position(r) == p))
                        .filter(|r| selection.includes(r))
                        .filter_map(|r| r.metric(metric.name()));
                    summaries.push(MetricSummary {
                        contour,
                        metric: metric.name(),
                        unit: metric.unit(),
                        position,
                        selection,
                        stats: mean_std(values),
                    });
                }
            }
        }
    }
    summaries
}

/// Inputs of a Bland–Altman plot for one clinical result.
#[derive(Debug, Clone, PartialEq)]
pub struct BlandAltman {
    pub name: &'static str,
    pub unit: &'static str,
    /// (average, difference) per case
    pub pairs: Vec<(f64, f64)>,
    pub mean_diff: f64,
    pub upper_limit: f64,
    pub lower_limit: f64,
}

pub fn bland_altman(cases: &[CaseClinicalResults], z: f64) -> Vec<BlandAltman> {
    let Some(first) = cases.first() else {
        return Vec::new();
    };
    first
        .values
        .iter()
        .map(|template| {
            let pairs: Vec<(f64, f64)> = cases
                .iter()
                .filter_map(|c| c.value(template.name))
                .map(|v| (v.average(), v.diff()))
                .filter(|(avg, diff)| avg.is_finite() && diff.is_finite())
                .collect();
            let stats = mean_std(pairs.iter().map(|(_, d)| *d));
            BlandAltman {
                name: template.name,
                unit: template.unit,
                pairs,
                mean_diff: stats.mean,
                upper_limit: stats.mean + z * stats.std,
                lower_limit: stats.mean - z * stats.std,
            }
        })
        .collect()
}

/// A comparison that could not be evaluated and is left out of the statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedCase {
    pub case_name: String,
    pub reader1: String,
    pub reader2: String,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct CohortReport {
    pub view: Option<&'static str>,
    pub slice_rows: Vec<SliceComparison>,
    pub cases: Vec<CaseClinicalResults>,
    pub clinical: Vec<ClinicalResultSummary>,
    pub metrics: Vec<MetricSummary>,
    pub bland_altman: Vec<BlandAltman>,
    pub failed: Vec<FailedCase>,
}

fn evaluate(
    comparison: &CaseComparison,
    view: &View,
    config: &AnalysisConfig,
) -> Result<(CaseClinicalResults, Vec<SliceComparison>)> {
    if comparison.view().name != view.name {
        return Err(anyhow!(
            "comparison uses view {} but the cohort is analyzed in {}",
            comparison.view().name,
            view.name
        ));
    }
    let rows = comparison.slice_table(config.fixed_phase_first_reader)?.to_vec();
    Ok((CaseClinicalResults::from_comparison(comparison), rows))
}

/// Evaluates every comparison of a cohort and aggregates the results. A
/// comparison that fails is reported in `failed` and does not enter the
/// statistics.
pub fn compute_cohort_statistics(comparisons: &[CaseComparison], config: &AnalysisConfig) -> CohortReport {
    let Some(view) = comparisons.first().map(|c| c.view()) else {
        return CohortReport::default();
    };

    let outcomes: Vec<_> = comparisons
        .par_iter()
        .map(|c| (c, evaluate(c, view, config)))
        .collect();

    let mut report = CohortReport {
        view: Some(view.name),
        ..Default::default()
    };
    for (comparison, outcome) in outcomes {
        match outcome {
            Ok((case, rows)) => {
                report.cases.push(case);
                report.slice_rows.extend(rows);
            }
            Err(e) => {
                let (reader1, reader2) = comparison.readers();
                warn!(
                    case = comparison.case_name(),
                    reader1,
                    reader2,
                    error = %format!("{:#}", e),
                    "case comparison failed"
                );
                report.failed.push(FailedCase {
                    case_name: comparison.case_name().to_string(),
                    reader1: reader1.to_string(),
                    reader2: reader2.to_string(),
                    error: format!("{:#}", e),
                });
            }
        }
    }

    report.clinical = summarize_clinical_results(&report.cases, config.confidence_z);
    report.metrics = summarize_metrics(view, &report.slice_rows);
    report.bland_altman = bland_altman(&report.cases, config.confidence_z);
    info!(
        view = view.name,
        cases = report.cases.len(),
        failed = report.failed.len(),
        rows = report.slice_rows.len(),
        "cohort statistics computed"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::view::SAX_CINE;
    use crate::utils::test_utils::{synthetic_cine_case, CineSlices};
    use approx::assert_relative_eq;
    use std::path::Path;

    fn case_results(name: &str, value1: f64, value2: f64) -> CaseClinicalResults {
        CaseClinicalResults {
            case_name: name.to_string(),
            reader1: "r1".to_string(),
            reader2: "r2".to_string(),
            studyinstanceuid: format!("uid.{}", name),
            values: vec![
                ClinicalValue {
                    name: "LVEDV",
                    unit: "ml",
                    tol_range: Some(10.0),
                    value1,
                    value2,
                },
                ClinicalValue {
                    name: "LVEDP",
                    unit: "#",
                    tol_range: None,
                    value1: 0.0,
                    value2: 1.0,
                },
            ],
        }
    }

    #[test]
    fn test_mean_std_sample() {
        let stats = mean_std([2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(stats.n, 8);
        assert_relative_eq!(stats.mean, 5.0);
        assert_relative_eq!(stats.std, (32.0f64 / 7.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_mean_std_skips_nan() {
        let stats = mean_std([1.0, f64::NAN, 3.0]);
        assert_eq!(stats.n, 2);
        assert_relative_eq!(stats.mean, 2.0);
        let single = mean_std([4.0]);
        assert_eq!(single.mean, 4.0);
        assert!(single.std.is_nan());
        assert!(mean_std(Vec::new()).mean.is_nan());
    }

    #[test]
    fn test_confidence_interval_of_ten_cases() {
        let diffs = [1.5, -2.0, 3.25, 0.5, 4.0, -1.0, 2.5, 0.0, 1.75, -0.5];
        let cases: Vec<_> = diffs
            .iter()
            .enumerate()
            .map(|(i, d)| case_results(&format!("case{}", i), 100.0 + d, 100.0))
            .collect();
        let summary = summarize_clinical_results(&cases, 1.96);
        let edv = &summary[0];

        let mean = diffs.iter().sum::<f64>() / 10.0;
        let std = (diffs.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / 9.0).sqrt();
        let half = 1.96 * std / 10f64.sqrt();
        assert_relative_eq!(edv.diff.mean, mean, epsilon = 1e-9);
        assert_relative_eq!(edv.ci.0, mean - half, epsilon = 1e-9);
        assert_relative_eq!(edv.ci.1, mean + half, epsilon = 1e-9);
        assert_eq!(edv.within_tolerance, 10);
        // phases have no tolerance range
        assert_eq!(summary[1].within_tolerance, 0);
    }

    #[test]
    fn test_tolerance_flags() {
        let case = case_results("c", 125.0, 110.0);
        assert_eq!(case.value("LVEDV").unwrap().within_tolerance(), Some(false));
        assert_eq!(case.value("LVEDP").unwrap().within_tolerance(), None);
        let missing = case_results("c", f64::NAN, 110.0);
        assert_eq!(missing.value("LVEDV").unwrap().within_tolerance(), None);
    }

    #[test]
    fn test_bland_altman_limits() {
        let cases = vec![
            case_results("a", 102.0, 100.0),
            case_results("b", 96.0, 100.0),
            case_results("c", 104.0, 100.0),
            case_results("d", f64::NAN, 100.0),
        ];
        let ba = &bland_altman(&cases, 1.96)[0];
        assert_eq!(ba.pairs, vec![(101.0, 2.0), (98.0, -4.0), (102.0, 4.0)]);
        let std = mean_std([2.0, -4.0, 4.0]).std;
        assert_relative_eq!(ba.mean_diff, 2.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(ba.upper_limit, 2.0 / 3.0 + 1.96 * std, epsilon = 1e-12);
        assert_relative_eq!(ba.lower_limit, 2.0 / 3.0 - 1.96 * std, epsilon = 1e-12);
    }

    fn stack(endo: [Option<f64>; 3]) -> CineSlices {
        CineSlices {
            lv_endo: vec![endo.to_vec(), vec![Some(9.0); 3]],
            lv_myo: vec![vec![None; 3], vec![None; 3]],
            rv_endo: vec![vec![None; 3], vec![None; 3]],
        }
    }

    fn comparison(dir: &Path, name: &str, s1: &CineSlices, s2: &CineSlices) -> anyhow::Result<CaseComparison> {
        let uid = format!("1.2.{}", name);
        let c1 = synthetic_cine_case(&dir.join(name).join("r1"), name, "r1", &uid, s1)?;
        let c2 = synthetic_cine_case(&dir.join(name).join("r2"), name, "r2", &uid, s2)?;
        CaseComparison::from_cases(c1, c2, &SAX_CINE)
    }

    fn summary<'a>(
        report: &'a CohortReport,
        metric: &str,
        position: Option<Position>,
        selection: SliceSelection,
    ) -> &'a MetricSummary {
        report
            .metrics
            .iter()
            .find(|m| m.contour == "lv_endo" && m.metric == metric && m.position == position && m.selection == selection)
            .unwrap()
    }

    #[test]
    fn test_identical_contours_leave_contoured_by_both() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        // both readers draw slice 1 identically; slice 0 only by reader 1
        let s1 = stack([Some(25.0), Some(36.0), None]);
        let s2 = stack([None, Some(36.0), None]);
        let cohort = vec![comparison(dir.path(), "a", &s1, &s2)?];
        let report = compute_cohort_statistics(&cohort, &AnalysisConfig::default());
        assert!(report.failed.is_empty());

        // LV ED rows at phase 0: dice 0, 100, 100
        let all = summary(&report, "Dice", None, SliceSelection::All);
        assert_eq!(all.stats.n, 6);
        let both = summary(&report, "Dice", None, SliceSelection::ContouredByBoth);
        assert_eq!(both.stats.n, 0);
        // the slice only reader 1 drew is grouped under reader 1's position
        let basal = summary(&report, "Dice", Some(Position::Basal), SliceSelection::All);
        assert!(basal.stats.n >= 1);
        Ok(())
    }

    #[test]
    fn test_cohort_collects_failures() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let s1 = stack([Some(25.0), Some(36.0), Some(16.0)]);
        let s2 = stack([Some(16.0), Some(36.0), Some(16.0)]);
        let good = comparison(dir.path(), "good", &s1, &s2)?;
        let bad = comparison(dir.path(), "bad", &s1, &s2)?;
        std::fs::remove_dir_all(dir.path().join("bad"))?;

        let report = compute_cohort_statistics(&[good, bad], &AnalysisConfig::default());
        assert_eq!(report.view, Some("SAX CINE"));
        assert_eq!(report.cases.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].case_name, "bad");
        assert!(report.failed[0].error.contains("annotation"));

        let edv = report.clinical.iter().find(|c| c.name == "LVEDV").unwrap();
        assert_eq!(edv.diff.n, 1);
        assert_relative_eq!(edv.diff.mean, 9.0 * 1.5 * 1.5 * 8.0 / 1000.0, epsilon = 1e-9);
        let partial = summary(&report, "Dice", None, SliceSelection::ContouredByBoth);
        assert!(partial.stats.n > 0 && partial.stats.mean < 100.0);
        Ok(())
    }

    #[test]
    fn test_empty_cohort() {
        let report = compute_cohort_statistics(&[], &AnalysisConfig::default());
        assert!(report.view.is_none());
        assert!(report.cases.is_empty());
    }
}
