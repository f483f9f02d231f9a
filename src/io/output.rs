use anyhow::{Context, Result};
use csv::{Writer, WriterBuilder};

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::comparison::SliceComparison;
use crate::io::config::CsvConfig;
use crate::stats::{
    BlandAltman, CaseClinicalResults, ClinicalResultSummary, CohortReport, FailedCase, MeanStd,
    MetricSummary,
};

/// Number formatting of the exported tables: missing values are empty cells.
#[derive(Debug, Clone, Copy)]
pub struct CsvFormat {
    pub delimiter: u8,
    pub decimal: char,
}

impl CsvFormat {
    pub fn from_config(config: &CsvConfig) -> Result<Self> {
        Ok(CsvFormat {
            delimiter: config.delimiter_byte()?,
            decimal: config.decimal,
        })
    }

    pub fn number(&self, value: f64) -> String {
        if !value.is_finite() {
            return String::new();
        }
        let text = value.to_string();
        if self.decimal == '.' {
            text
        } else {
            text.replace('.', &self.decimal.to_string())
        }
    }

    fn optional(&self, value: Option<f64>) -> String {
        value.map(|v| self.number(v)).unwrap_or_default()
    }

    fn writer<W: Write>(&self, inner: W) -> Writer<W> {
        WriterBuilder::new().delimiter(self.delimiter).from_writer(inner)
    }
}

fn flag(value: bool) -> String {
    value.to_string()
}

fn mean_std_cells(format: &CsvFormat, stats: &MeanStd) -> [String; 2] {
    [format.number(stats.mean), format.number(stats.std)]
}

pub fn write_slice_table<W: Write>(inner: W, rows: &[SliceComparison], format: &CsvFormat) -> Result<()> {
    let mut wtr = format.writer(inner);
    let mut header: Vec<String> = [
        "case", "reader1", "reader2", "studyinstanceuid", "category", "contour", "slice",
        "nr_slices", "depth_fraction", "phase1", "phase2", "sop1", "sop2", "has_contour1",
        "has_contour2", "position1", "position2",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    if let Some(first) = rows.first() {
        header.extend(first.metrics.iter().map(|m| format!("{} [{}]", m.name, m.unit)));
    }
    wtr.write_record(&header)?;

    for row in rows {
        let mut record = vec![
            row.case_name.clone(),
            row.reader1.clone(),
            row.reader2.clone(),
            row.studyinstanceuid.clone(),
            row.category.to_string(),
            row.contour.to_string(),
            row.slice.to_string(),
            row.nr_slices.to_string(),
            format.number(row.depth_fraction),
            row.phase1.to_string(),
            row.phase2.to_string(),
            row.sop1.clone().unwrap_or_default(),
            row.sop2.clone().unwrap_or_default(),
            flag(row.has_contour1),
            flag(row.has_contour2),
            row.position1.to_string(),
            row.position2.to_string(),
        ];
        record.extend(row.metrics.iter().map(|m| format.number(m.value)));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// One line per case and clinical result.
pub fn write_case_clinical_results<W: Write>(
    inner: W,
    cases: &[CaseClinicalResults],
    format: &CsvFormat,
) -> Result<()> {
    let mut wtr = format.writer(inner);
    wtr.write_record([
        "case", "reader1", "reader2", "studyinstanceuid", "clinical_result", "unit", "value1",
        "value2", "diff", "within_tolerance",
    ])?;
    for case in cases {
        for value in &case.values {
            wtr.write_record([
                case.case_name.clone(),
                case.reader1.clone(),
                case.reader2.clone(),
                case.studyinstanceuid.clone(),
                value.name.to_string(),
                value.unit.to_string(),
                format.number(value.value1),
                format.number(value.value2),
                format.number(value.diff()),
                value.within_tolerance().map(flag).unwrap_or_default(),
            ])?;
        }
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_clinical_summary<W: Write>(
    inner: W,
    summaries: &[ClinicalResultSummary],
    format: &CsvFormat,
) -> Result<()> {
    let mut wtr = format.writer(inner);
    wtr.write_record([
        "clinical_result", "unit", "tol_range", "n", "mean1", "std1", "mean2", "std2",
        "mean_diff", "std_diff", "ci_lower", "ci_upper", "within_tolerance",
    ])?;
    for s in summaries {
        let [mean1, std1] = mean_std_cells(format, &s.reader1);
        let [mean2, std2] = mean_std_cells(format, &s.reader2);
        let [mean_diff, std_diff] = mean_std_cells(format, &s.diff);
        wtr.write_record([
            s.name.to_string(),
            s.unit.to_string(),
            format.optional(s.tol_range),
            s.diff.n.to_string(),
            mean1,
            std1,
            mean2,
            std2,
            mean_diff,
            std_diff,
            format.number(s.ci.0),
            format.number(s.ci.1),
            s.within_tolerance.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_metric_summary<W: Write>(inner: W, summaries: &[MetricSummary], format: &CsvFormat) -> Result<()> {
    let mut wtr = format.writer(inner);
    wtr.write_record(["contour", "metric", "unit", "position", "slices", "n", "mean", "std"])?;
    for s in summaries {
        let [mean, std] = mean_std_cells(format, &s.stats);
        wtr.write_record([
            s.contour.to_string(),
            s.metric.to_string(),
            s.unit.to_string(),
            s.position.map_or_else(|| "all".to_string(), |p| p.to_string()),
            s.selection.as_str().to_string(),
            s.stats.n.to_string(),
            mean,
            std,
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_bland_altman<W: Write>(inner: W, plots: &[BlandAltman], format: &CsvFormat) -> Result<()> {
    let mut wtr = format.writer(inner);
    wtr.write_record([
        "clinical_result", "unit", "average", "diff", "mean_diff", "lower_limit", "upper_limit",
    ])?;
    for plot in plots {
        for (average, diff) in &plot.pairs {
            wtr.write_record([
                plot.name.to_string(),
                plot.unit.to_string(),
                format.number(*average),
                format.number(*diff),
                format.number(plot.mean_diff),
                format.number(plot.lower_limit),
                format.number(plot.upper_limit),
            ])?;
        }
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_failed_cases<W: Write>(inner: W, failed: &[FailedCase], format: &CsvFormat) -> Result<()> {
    let mut wtr = format.writer(inner);
    wtr.write_record(["case", "reader1", "reader2", "error"])?;
    for f in failed {
        wtr.write_record([&f.case_name, &f.reader1, &f.reader2, &f.error])?;
    }
    wtr.flush()?;
    Ok(())
}

fn create<P: AsRef<Path>>(path: P) -> Result<File> {
    File::create(&path).with_context(|| format!("failed to create output file {:?}", path.as_ref()))
}

/// Writes every table of a cohort report into `dir`.
pub fn write_report<P: AsRef<Path>>(dir: P, report: &CohortReport, config: &CsvConfig) -> Result<()> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir).with_context(|| format!("Could not create output directory: {:?}", dir))?;
    let format = CsvFormat::from_config(config)?;

    write_slice_table(create(dir.join("slices.csv"))?, &report.slice_rows, &format)?;
    write_case_clinical_results(create(dir.join("clinical_results.csv"))?, &report.cases, &format)?;
    write_clinical_summary(create(dir.join("clinical_summary.csv"))?, &report.clinical, &format)?;
    write_metric_summary(create(dir.join("metric_summary.csv"))?, &report.metrics, &format)?;
    write_bland_altman(create(dir.join("bland_altman.csv"))?, &report.bland_altman, &format)?;
    write_failed_cases(create(dir.join("failed_cases.csv"))?, &report.failed, &format)?;
    Ok(())
}
