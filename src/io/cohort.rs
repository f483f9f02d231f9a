use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::case::{Case, ImageFileSource, View};
use crate::comparison::CaseComparison;
use crate::stats::FailedCase;

/// Case files of one case, one per reader.
#[derive(Debug, Clone, PartialEq)]
pub struct CasePair {
    pub case_name: String,
    pub reader1: PathBuf,
    pub reader2: PathBuf,
}

fn reader_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Finds `<dir>/<case>/<reader>.json` files and pairs the first two readers
/// of every case in name order. Cases with fewer readers are skipped.
pub fn discover_pairs<P: AsRef<Path>>(dir: P) -> Result<Vec<CasePair>> {
    let dir = dir.as_ref();
    let mut cases: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    let entries = std::fs::read_dir(dir).with_context(|| format!("failed to read cohort directory {:?}", dir))?;
    for entry in entries {
        let case_dir = entry?.path();
        if !case_dir.is_dir() {
            continue;
        }
        let case_name = reader_name(&case_dir);
        let mut readers: Vec<PathBuf> = std::fs::read_dir(&case_dir)
            .with_context(|| format!("failed to read case directory {:?}", case_dir))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == "json"))
            .collect();
        readers.sort();
        cases.insert(case_name, readers);
    }

    let mut pairs = Vec::new();
    for (case_name, readers) in cases {
        match readers.as_slice() {
            [first, second, ..] => pairs.push(CasePair {
                case_name,
                reader1: first.clone(),
                reader2: second.clone(),
            }),
            _ => warn!(case = %case_name, readers = readers.len(), "fewer than two readers, case skipped"),
        }
    }
    info!(dir = ?dir, pairs = pairs.len(), "cohort discovered");
    Ok(pairs)
}

/// Loads a persisted case. Relative image and annotation paths are taken
/// relative to the case file.
pub fn load_case<P: AsRef<Path>>(path: P) -> Result<Case> {
    let path = path.as_ref();
    let mut case = Case::load(path)?;
    if let Some(base) = path.parent() {
        case.rebase(base);
    }
    Ok(case)
}

/// Loads and pairs two case files for a view.
pub fn load_comparison(reader1: &Path, reader2: &Path, view: &'static View) -> Result<CaseComparison> {
    let mut case1 = load_case(reader1)?;
    let mut case2 = load_case(reader2)?;
    if view.needs_pixels {
        case1.set_pixel_source(Arc::new(ImageFileSource));
        case2.set_pixel_source(Arc::new(ImageFileSource));
    }
    CaseComparison::from_cases(case1, case2, view)
        .with_context(|| format!("failed to compare {:?} with {:?}", reader1, reader2))
}

/// Loads every pair of a cohort directory. Pairs that cannot be loaded are
/// returned as failures instead of aborting the cohort.
pub fn load_cohort<P: AsRef<Path>>(
    dir: P,
    view: &'static View,
) -> Result<(Vec<CaseComparison>, Vec<FailedCase>)> {
    let pairs = discover_pairs(&dir)?;
    if pairs.is_empty() {
        return Err(anyhow!("no case pairs found in {:?}", dir.as_ref()));
    }
    let mut comparisons = Vec::new();
    let mut failed = Vec::new();
    for pair in pairs {
        match load_comparison(&pair.reader1, &pair.reader2, view) {
            Ok(c) => comparisons.push(c),
            Err(e) => {
                warn!(case = %pair.case_name, error = %format!("{:#}", e), "case pair not loaded");
                failed.push(FailedCase {
                    case_name: pair.case_name,
                    reader1: reader_name(&pair.reader1),
                    reader2: reader_name(&pair.reader2),
                    error: format!("{:#}", e),
                });
            }
        }
    }
    Ok((comparisons, failed))
}
