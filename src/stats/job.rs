use anyhow::{anyhow, Result};
use crossbeam::channel::{bounded, Receiver, TryRecvError};
use tracing::debug;

use std::thread;

use super::{compute_cohort_statistics, CohortReport};
use crate::comparison::CaseComparison;
use crate::io::config::AnalysisConfig;

/// Cohort statistics computed on a worker thread. The report is delivered
/// once, when the whole cohort is done; dropping the job discards it.
#[derive(Debug)]
pub struct CohortJob {
    receiver: Receiver<CohortReport>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CohortJob {
    pub fn spawn(comparisons: Vec<CaseComparison>, config: AnalysisConfig) -> Result<Self> {
        let (sender, receiver) = bounded(1);
        let handle = thread::Builder::new()
            .name("cohort-statistics".to_string())
            .spawn(move || {
                let report = compute_cohort_statistics(&comparisons, &config);
                if sender.send(report).is_err() {
                    debug!("cohort job dropped before completion, report discarded");
                }
            })?;
        Ok(CohortJob {
            receiver,
            handle: Some(handle),
        })
    }

    /// The report if the job has finished, without blocking. Returns it at
    /// most once.
    pub fn try_result(&self) -> Result<Option<CohortReport>> {
        match self.receiver.try_recv() {
            Ok(report) => Ok(Some(report)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(anyhow!("cohort job ended without a report")),
        }
    }

    /// Blocks until the report is available.
    pub fn wait(mut self) -> Result<CohortReport> {
        let report = self.receiver.recv();
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| anyhow!("cohort statistics thread panicked"))?;
        }
        report.map_err(|_| anyhow!("cohort job ended without a report"))
    }
}
