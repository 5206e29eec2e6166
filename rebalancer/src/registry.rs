//! Bounded in-process registry of rebalance runs and their reports.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use rebal::VerificationReport;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::execution::ExecutionReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub state: RunState,
    pub execution: Option<ExecutionReport>,
    pub verification: Option<VerificationReport>,
}

/// Runs keyed by id, oldest first.
///
/// Holds at most `max_runs` records while any completed run can be evicted.
/// In-progress runs are never evicted, so the registry may briefly exceed
/// its bound when every slot is busy.
#[derive(Debug)]
pub struct RunRegistry {
    max_runs: usize,
    runs: VecDeque<RunRecord>,
    seq: u64,
}

impl RunRegistry {
    pub fn new(max_runs: usize) -> Self {
        Self {
            max_runs: max_runs.max(1),
            runs: VecDeque::new(),
            seq: 0,
        }
    }

    /// Register a new in-progress run and return its id.
    pub fn begin(&mut self) -> String {
        self.seq += 1;
        let started_at = Utc::now();
        let id = format!("{}-{:04}", started_at.format("%Y%m%dT%H%M%S"), self.seq);
        self.evict();
        self.runs.push_back(RunRecord {
            id: id.clone(),
            started_at,
            state: RunState::InProgress,
            execution: None,
            verification: None,
        });
        debug!("Run {id} started ({} tracked)", self.runs.len());
        id
    }

    fn evict(&mut self) {
        while self.runs.len() >= self.max_runs {
            match self.runs.iter().position(|r| r.state == RunState::Completed) {
                Some(pos) => {
                    if let Some(old) = self.runs.remove(pos) {
                        debug!("Evicted run {}", old.id);
                    }
                }
                None => {
                    warn!(
                        "All {} tracked runs are in progress; exceeding max_runs={}",
                        self.runs.len(),
                        self.max_runs
                    );
                    break;
                }
            }
        }
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut RunRecord> {
        self.runs
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::Report(format!("unknown run {id}")))
    }

    pub fn record_execution(&mut self, id: &str, report: ExecutionReport) -> Result<()> {
        self.get_mut(id)?.execution = Some(report);
        Ok(())
    }

    pub fn record_verification(&mut self, id: &str, report: VerificationReport) -> Result<()> {
        self.get_mut(id)?.verification = Some(report);
        Ok(())
    }

    pub fn complete(&mut self, id: &str) -> Result<()> {
        self.get_mut(id)?.state = RunState::Completed;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&RunRecord> {
        self.runs.iter().find(|r| r.id == id)
    }

    pub fn latest(&self) -> Option<&RunRecord> {
        self.runs.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RunRecord> {
        self.runs.iter()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}
