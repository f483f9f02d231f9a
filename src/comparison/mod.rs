pub mod analyzer;

use anyhow::{anyhow, Context, Result};
use crossbeam::thread;
use once_cell::sync::OnceCell;

use std::sync::Arc;

use crate::case::category::Category;
use crate::case::view::{apply_view, View, ViewedCase};
use crate::case::Case;
use crate::error::CompareError;
pub use analyzer::{Analyzer, MetricValue, SliceComparison};

/// Two readers' versions of the same study, seen through the same view.
#[derive(Debug)]
pub struct CaseComparison {
    pub case1: ViewedCase,
    pub case2: ViewedCase,
    // per-slice tables, indexed by the fixed_phase_first_reader flag
    tables: [OnceCell<Vec<SliceComparison>>; 2],
}

fn check_same_study(case1: &Case, case2: &Case) -> Result<(), CompareError> {
    if case1.studyinstanceuid != case2.studyinstanceuid {
        return Err(CompareError::StudyMismatch {
            case1: format!("{} / {}", case1.case_name, case1.reader_name),
            uid1: case1.studyinstanceuid.clone(),
            case2: format!("{} / {}", case2.case_name, case2.reader_name),
            uid2: case2.studyinstanceuid.clone(),
        });
    }
    Ok(())
}

impl CaseComparison {
    pub fn new(case1: ViewedCase, case2: ViewedCase) -> Result<Self, CompareError> {
        check_same_study(&case1.case, &case2.case)?;
        if case1.view.name != case2.view.name {
            return Err(CompareError::ViewMismatch {
                view1: case1.view.name.to_string(),
                view2: case2.view.name.to_string(),
            });
        }
        Ok(CaseComparison {
            case1,
            case2,
            tables: [OnceCell::new(), OnceCell::new()],
        })
    }

    /// Pairs two cases and applies the view to both, one thread per reader.
    pub fn from_cases(case1: Case, case2: Case, view: &'static View) -> Result<Self> {
        check_same_study(&case1, &case2)?;
        let (case1, case2) = (Arc::new(case1), Arc::new(case2));

        let (viewed1, viewed2) = thread::scope(|s| -> Result<_> {
            let handle1 = s.spawn(|_| {
                apply_view(case1.clone(), view)
                    .with_context(|| format!("apply_view({}) failed", case1.reader_name))
            });
            let handle2 = s.spawn(|_| {
                apply_view(case2.clone(), view)
                    .with_context(|| format!("apply_view({}) failed", case2.reader_name))
            });
            let viewed1 = handle1
                .join()
                .map_err(|_| anyhow!("view thread for reader 1 panicked"))??;
            let viewed2 = handle2
                .join()
                .map_err(|_| anyhow!("view thread for reader 2 panicked"))??;
            Ok((viewed1, viewed2))
        })
        .map_err(|panic_payload| anyhow!("view threads panicked: {:?}", panic_payload))??;

        Ok(CaseComparison::new(viewed1, viewed2)?)
    }

    pub fn view(&self) -> &'static View {
        self.case1.view
    }

    pub fn case_name(&self) -> &str {
        &self.case1.case.case_name
    }

    pub fn readers(&self) -> (&str, &str) {
        (&self.case1.case.reader_name, &self.case2.case.reader_name)
    }

    /// The two readers' instances of one category type.
    pub fn get_categories_by_type(&self, name: &str) -> Option<(&Category, &Category)> {
        Some((self.case1.category(name)?, self.case2.category(name)?))
    }

    /// Category pairs a contour is compared in. A contour the view does not
    /// map is a configuration error.
    pub fn category_pairs_for_contour(
        &self,
        contour: &str,
    ) -> Result<Vec<(&Category, &Category)>, CompareError> {
        self.view()
            .categories_for(contour)?
            .iter()
            .map(|name| {
                self.get_categories_by_type(name)
                    .ok_or_else(|| CompareError::UnknownCategory(name.to_string()))
            })
            .collect()
    }

    /// Per-slice comparison table, computed on first request per phase policy.
    pub fn slice_table(&self, fixed_phase_first_reader: bool) -> Result<&[SliceComparison]> {
        let cell = &self.tables[usize::from(fixed_phase_first_reader)];
        let rows = cell.get_or_try_init(|| Analyzer::new(fixed_phase_first_reader).analyze(self))?;
        Ok(rows)
    }
}
