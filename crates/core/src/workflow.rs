//! In-memory transaction log for compensating workflows.
//!
//! Each step moves through a small state machine. The log only accepts the
//! transitions listed in [`StepStatus::can_transition_to`]; the runner in the
//! app crate persists every accepted transition.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Committed,
    Skipped,
    Failed,
    Compensated,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Committed => "committed",
            StepStatus::Skipped => "skipped",
            StepStatus::Failed => "failed",
            StepStatus::Compensated => "compensated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(StepStatus::Pending),
            "committed" => Some(StepStatus::Committed),
            "skipped" => Some(StepStatus::Skipped),
            "failed" => Some(StepStatus::Failed),
            "compensated" => Some(StepStatus::Compensated),
            _ => None,
        }
    }

    pub fn can_transition_to(self, next: StepStatus) -> bool {
        matches!(
            (self, next),
            (StepStatus::Pending, StepStatus::Committed)
                | (StepStatus::Pending, StepStatus::Skipped)
                | (StepStatus::Pending, StepStatus::Failed)
                | (StepStatus::Committed, StepStatus::Compensated)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Committed,
    RolledBack,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Committed => "committed",
            ExecutionStatus::RolledBack => "rolled_back",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(ExecutionStatus::Running),
            "committed" => Some(ExecutionStatus::Committed),
            "rolled_back" => Some(ExecutionStatus::RolledBack),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkflowLogError {
    #[error("step {0} is already recorded")]
    DuplicateStep(String),
    #[error("step {0} is not recorded")]
    UnknownStep(String),
    #[error("step {name} cannot move from {from} to {to}")]
    InvalidTransition {
        name: String,
        from: &'static str,
        to: &'static str,
    },
    #[error("execution is already {0}")]
    Finished(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
    /// Input handed to the compensation handler, set when the step commits.
    pub compensation_input: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionLog {
    workflow: String,
    status: ExecutionStatus,
    steps: Vec<StepRecord>,
}

impl TransactionLog {
    pub fn new(workflow: impl Into<String>) -> Self {
        Self {
            workflow: workflow.into(),
            status: ExecutionStatus::Running,
            steps: Vec::new(),
        }
    }

    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|step| step.name == name)
    }

    pub fn begin(&mut self, name: &str) -> Result<(), WorkflowLogError> {
        self.ensure_running()?;
        if self.step(name).is_some() {
            return Err(WorkflowLogError::DuplicateStep(name.to_string()));
        }
        self.steps.push(StepRecord {
            name: name.to_string(),
            status: StepStatus::Pending,
            compensation_input: None,
        });
        Ok(())
    }

    pub fn commit(
        &mut self,
        name: &str,
        compensation_input: Option<String>,
    ) -> Result<(), WorkflowLogError> {
        self.ensure_running()?;
        let step = self.transition(name, StepStatus::Committed)?;
        step.compensation_input = compensation_input;
        Ok(())
    }

    pub fn skip(&mut self, name: &str) -> Result<(), WorkflowLogError> {
        self.ensure_running()?;
        self.transition(name, StepStatus::Skipped).map(|_| ())
    }

    pub fn fail(&mut self, name: &str) -> Result<(), WorkflowLogError> {
        self.ensure_running()?;
        self.transition(name, StepStatus::Failed).map(|_| ())
    }

    pub fn compensate(&mut self, name: &str) -> Result<(), WorkflowLogError> {
        self.transition(name, StepStatus::Compensated).map(|_| ())
    }

    /// Committed steps, most recent first.
    pub fn compensation_order(&self) -> Vec<&StepRecord> {
        self.steps
            .iter()
            .rev()
            .filter(|step| step.status == StepStatus::Committed)
            .collect()
    }

    pub fn finish_committed(&mut self) -> Result<(), WorkflowLogError> {
        self.ensure_running()?;
        self.status = ExecutionStatus::Committed;
        Ok(())
    }

    pub fn finish_rolled_back(&mut self) -> Result<(), WorkflowLogError> {
        self.ensure_running()?;
        self.status = ExecutionStatus::RolledBack;
        Ok(())
    }

    fn ensure_running(&self) -> Result<(), WorkflowLogError> {
        match self.status {
            ExecutionStatus::Running => Ok(()),
            other => Err(WorkflowLogError::Finished(other.as_str())),
        }
    }

    fn transition(
        &mut self,
        name: &str,
        next: StepStatus,
    ) -> Result<&mut StepRecord, WorkflowLogError> {
        let step = self
            .steps
            .iter_mut()
            .find(|step| step.name == name)
            .ok_or_else(|| WorkflowLogError::UnknownStep(name.to_string()))?;
        if !step.status.can_transition_to(next) {
            return Err(WorkflowLogError::InvalidTransition {
                name: name.to_string(),
                from: step.status.as_str(),
                to: next.as_str(),
            });
        }
        step.status = next;
        Ok(step)
    }
}
