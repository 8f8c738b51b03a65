//! `create-custom-from-product`: a two step saga that attaches a custom
//! record to a newly created product and undoes committed steps on failure.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use volja_core::workflow::{ExecutionStatus, TransactionLog, WorkflowLogError};
use volja_storage::{CustomRecord, Database, ExecutionLogError, LinkError, NewCustom};

pub const WORKFLOW_NAME: &str = "create-custom-from-product";
pub const STEP_CREATE_CUSTOM: &str = "create-custom";
pub const STEP_CREATE_LINK: &str = "create-remote-link";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductCreatedInput {
    pub product_id: String,
    pub coming_soon: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    pub execution_id: String,
    pub custom: Option<CustomRecord>,
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("step {step} failed: {reason}")]
    StepFailed { step: &'static str, reason: String },
    #[error("invalid transaction log transition: {0}")]
    Log(#[from] WorkflowLogError),
    #[error("failed to persist workflow state: {0}")]
    Persistence(#[from] ExecutionLogError),
    #[error("failed to read product link: {0}")]
    Link(#[from] LinkError),
}

#[derive(Clone)]
pub struct CustomFromProductWorkflow {
    storage: Database,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl CustomFromProductWorkflow {
    pub fn new(storage: Database, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        Self { storage, clock }
    }

    /// Runs the saga once per product. A product with a committed execution
    /// gets that execution's result back without new side effects.
    pub async fn run(&self, input: &ProductCreatedInput) -> Result<WorkflowResult, WorkflowError> {
        if let Some(previous) = self.committed_result(&input.product_id).await? {
            info!(
                stage = "workflow",
                workflow = WORKFLOW_NAME,
                execution_id = %previous.execution_id,
                product_id = %input.product_id,
                "workflow already committed for product"
            );
            return Ok(previous);
        }

        let repo = self.storage.workflows();
        let execution_id = repo
            .start_execution(WORKFLOW_NAME, &input.product_id, self.now())
            .await?;
        let mut log = TransactionLog::new(WORKFLOW_NAME);

        let custom = match self.create_custom(&execution_id, &mut log, input).await {
            Ok(custom) => custom,
            Err(reason) => {
                return Err(self
                    .roll_back(&execution_id, &mut log, input, STEP_CREATE_CUSTOM, reason)
                    .await);
            }
        };

        if let Some(record) = &custom {
            if let Err(reason) = self
                .create_link(&execution_id, &mut log, input, record)
                .await
            {
                return Err(self
                    .roll_back(&execution_id, &mut log, input, STEP_CREATE_LINK, reason)
                    .await);
            }
        }

        log.finish_committed()?;
        repo.finish_execution(&execution_id, log.status(), None, self.now())
            .await?;
        counter!("workflow_runs_total", "workflow" => WORKFLOW_NAME, "status" => "committed")
            .increment(1);
        info!(
            stage = "workflow",
            workflow = WORKFLOW_NAME,
            %execution_id,
            product_id = %input.product_id,
            custom_id = custom.as_ref().map(|record| record.id.as_str()).unwrap_or("-"),
            "workflow committed"
        );

        Ok(WorkflowResult {
            execution_id,
            custom,
        })
    }

    async fn committed_result(
        &self,
        product_id: &str,
    ) -> Result<Option<WorkflowResult>, WorkflowError> {
        let Some(execution) = self
            .storage
            .workflows()
            .latest_for_subject(WORKFLOW_NAME, product_id)
            .await?
        else {
            return Ok(None);
        };
        if execution.status != ExecutionStatus::Committed {
            return Ok(None);
        }
        let custom = self.storage.product_links().linked_custom(product_id).await?;
        Ok(Some(WorkflowResult {
            execution_id: execution.id,
            custom,
        }))
    }

    /// Step errors are returned as `Err(String)` so the caller can roll back;
    /// log and persistence failures are wrapped the same way.
    async fn create_custom(
        &self,
        execution_id: &str,
        log: &mut TransactionLog,
        input: &ProductCreatedInput,
    ) -> Result<Option<CustomRecord>, String> {
        self.begin(execution_id, log, STEP_CREATE_CUSTOM).await?;

        if !input.coming_soon {
            log.skip(STEP_CREATE_CUSTOM).map_err(|err| err.to_string())?;
            self.persist(execution_id, log, STEP_CREATE_CUSTOM).await?;
            return Ok(None);
        }

        let record = match self
            .storage
            .customs()
            .create(NewCustom {
                coming_soon: true,
                product_id: Some(input.product_id.as_str()),
                created_at: self.now(),
            })
            .await
        {
            Ok(record) => record,
            Err(err) => {
                self.fail(execution_id, log, STEP_CREATE_CUSTOM).await;
                return Err(err.to_string());
            }
        };

        log.commit(STEP_CREATE_CUSTOM, Some(record.id.clone()))
            .map_err(|err| err.to_string())?;
        self.persist(execution_id, log, STEP_CREATE_CUSTOM).await?;
        Ok(Some(record))
    }

    async fn create_link(
        &self,
        execution_id: &str,
        log: &mut TransactionLog,
        input: &ProductCreatedInput,
        record: &CustomRecord,
    ) -> Result<(), String> {
        self.begin(execution_id, log, STEP_CREATE_LINK).await?;

        if let Err(err) = self
            .storage
            .product_links()
            .create_link(&input.product_id, &record.id, self.now())
            .await
        {
            self.fail(execution_id, log, STEP_CREATE_LINK).await;
            return Err(err.to_string());
        }

        log.commit(STEP_CREATE_LINK, Some(record.id.clone()))
            .map_err(|err| err.to_string())?;
        self.persist(execution_id, log, STEP_CREATE_LINK).await
    }

    async fn roll_back(
        &self,
        execution_id: &str,
        log: &mut TransactionLog,
        input: &ProductCreatedInput,
        failed_step: &'static str,
        reason: String,
    ) -> WorkflowError {
        warn!(
            stage = "workflow",
            workflow = WORKFLOW_NAME,
            %execution_id,
            step = failed_step,
            %reason,
            "step failed, compensating"
        );

        let pending: Vec<(String, Option<String>)> = log
            .compensation_order()
            .into_iter()
            .map(|step| (step.name.clone(), step.compensation_input.clone()))
            .collect();

        for (name, compensation_input) in pending {
            match self
                .compensate(&name, &input.product_id, compensation_input.as_deref())
                .await
            {
                Ok(()) => {
                    if let Err(err) = log.compensate(&name) {
                        error!(stage = "workflow", step = %name, error = %err, "invalid compensation transition");
                        continue;
                    }
                    if let Err(err) = self.persist(execution_id, log, &name).await {
                        error!(stage = "workflow", step = %name, error = %err, "failed to persist compensation");
                    }
                }
                Err(err) => {
                    error!(stage = "workflow", step = %name, error = %err, "compensation failed");
                }
            }
        }

        if let Err(err) = log.finish_rolled_back() {
            return err.into();
        }
        if let Err(err) = self
            .storage
            .workflows()
            .finish_execution(execution_id, log.status(), Some(&reason), self.now())
            .await
        {
            return err.into();
        }
        counter!("workflow_runs_total", "workflow" => WORKFLOW_NAME, "status" => "rolled_back")
            .increment(1);

        WorkflowError::StepFailed {
            step: failed_step,
            reason,
        }
    }

    async fn compensate(
        &self,
        step: &str,
        product_id: &str,
        input: Option<&str>,
    ) -> Result<(), String> {
        let Some(custom_id) = input else {
            return Ok(());
        };
        match step {
            STEP_CREATE_CUSTOM => {
                let removed = self
                    .storage
                    .customs()
                    .delete_if_exists(custom_id)
                    .await
                    .map_err(|err| err.to_string())?;
                info!(stage = "workflow", %custom_id, removed, "custom record compensated");
                Ok(())
            }
            STEP_CREATE_LINK => {
                self.storage
                    .product_links()
                    .dismiss_link(product_id, custom_id)
                    .await
                    .map_err(|err| err.to_string())?;
                Ok(())
            }
            other => Err(format!("no compensation registered for step {other}")),
        }
    }

    async fn begin(
        &self,
        execution_id: &str,
        log: &mut TransactionLog,
        name: &str,
    ) -> Result<(), String> {
        log.begin(name).map_err(|err| err.to_string())?;
        self.persist(execution_id, log, name).await
    }

    async fn fail(&self, execution_id: &str, log: &mut TransactionLog, name: &str) {
        if let Err(err) = log.fail(name) {
            error!(stage = "workflow", step = name, error = %err, "invalid failure transition");
            return;
        }
        if let Err(err) = self.persist(execution_id, log, name).await {
            error!(stage = "workflow", step = name, error = %err, "failed to persist step failure");
        }
    }

    async fn persist(
        &self,
        execution_id: &str,
        log: &TransactionLog,
        name: &str,
    ) -> Result<(), String> {
        let Some((position, step)) = log
            .steps()
            .iter()
            .enumerate()
            .find(|(_, step)| step.name == name)
        else {
            return Err(format!("step {name} is not recorded"));
        };
        self.storage
            .workflows()
            .record_step(execution_id, position, step, self.now())
            .await
            .map_err(|err| err.to_string())
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use volja_core::workflow::StepStatus;

    async fn workflow() -> (CustomFromProductWorkflow, Database) {
        let database = Database::connect("sqlite::memory:").await.expect("connect");
        database.run_migrations().await.expect("migrations");
        let now = Utc.with_ymd_and_hms(2025, 3, 14, 10, 0, 0).unwrap();
        let workflow = CustomFromProductWorkflow::new(database.clone(), Arc::new(move || now));
        (workflow, database)
    }

    fn input(coming_soon: bool) -> ProductCreatedInput {
        ProductCreatedInput {
            product_id: "prod_1".into(),
            coming_soon,
        }
    }

    #[tokio::test]
    async fn coming_soon_creates_record_and_link() {
        let (workflow, database) = workflow().await;
        let result = workflow.run(&input(true)).await.expect("run");

        let custom = result.custom.expect("custom record");
        assert!(custom.coming_soon);
        let linked = database
            .product_links()
            .linked_custom("prod_1")
            .await
            .expect("linked")
            .expect("some");
        assert_eq!(linked.id, custom.id);

        let execution = database
            .workflows()
            .load_execution(&result.execution_id)
            .await
            .expect("load")
            .expect("some");
        assert_eq!(execution.status, ExecutionStatus::Committed);
        let statuses: Vec<StepStatus> = execution.steps.iter().map(|step| step.status).collect();
        assert_eq!(statuses, vec![StepStatus::Committed, StepStatus::Committed]);
    }

    #[tokio::test]
    async fn not_coming_soon_skips_both_steps() {
        let (workflow, database) = workflow().await;
        let result = workflow.run(&input(false)).await.expect("run");
        assert!(result.custom.is_none());
        assert!(database
            .customs()
            .list_for_product("prod_1")
            .await
            .expect("list")
            .is_empty());

        let execution = database
            .workflows()
            .load_execution(&result.execution_id)
            .await
            .expect("load")
            .expect("some");
        assert_eq!(execution.steps.len(), 1);
        assert_eq!(execution.steps[0].status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn link_failure_compensates_created_record() {
        let (workflow, database) = workflow().await;
        sqlx::query("DROP TABLE product_custom_links")
            .execute(database.pool())
            .await
            .expect("drop links table");

        let err = workflow.run(&input(true)).await.unwrap_err();
        assert!(matches!(err, WorkflowError::StepFailed { step: STEP_CREATE_LINK, .. }));

        assert!(database
            .customs()
            .list_for_product("prod_1")
            .await
            .expect("list")
            .is_empty());

        let execution = database
            .workflows()
            .latest_for_subject(WORKFLOW_NAME, "prod_1")
            .await
            .expect("latest")
            .expect("some");
        assert_eq!(execution.status, ExecutionStatus::RolledBack);
        assert!(execution.error.is_some());
        let statuses: Vec<(&str, StepStatus)> = execution
            .steps
            .iter()
            .map(|step| (step.name.as_str(), step.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                (STEP_CREATE_CUSTOM, StepStatus::Compensated),
                (STEP_CREATE_LINK, StepStatus::Failed),
            ]
        );
    }

    #[tokio::test]
    async fn second_run_for_committed_product_reuses_the_first_result() {
        let (workflow, database) = workflow().await;
        let first = workflow.run(&input(true)).await.expect("first run");
        let second = workflow.run(&input(true)).await.expect("second run");

        assert_eq!(second.execution_id, first.execution_id);
        assert_eq!(
            second.custom.map(|record| record.id),
            first.custom.map(|record| record.id)
        );
        assert_eq!(
            database
                .customs()
                .list_for_product("prod_1")
                .await
                .expect("list")
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn rolled_back_product_runs_again() {
        let (workflow, database) = workflow().await;
        sqlx::query("DROP TABLE product_custom_links")
            .execute(database.pool())
            .await
            .expect("drop links table");
        let failed = workflow.run(&input(true)).await;
        assert!(failed.is_err());

        sqlx::query(
            "CREATE TABLE product_custom_links (\
                product_id TEXT NOT NULL, \
                custom_id TEXT NOT NULL REFERENCES customs(id) ON DELETE CASCADE, \
                created_at TEXT NOT NULL, \
                PRIMARY KEY (product_id, custom_id))",
        )
        .execute(database.pool())
        .await
        .expect("recreate links table");

        let result = workflow.run(&input(true)).await.expect("retry");
        assert!(result.custom.is_some());
    }

    #[tokio::test]
    async fn compensation_without_recorded_output_is_a_no_op() {
        let (workflow, database) = workflow().await;
        workflow
            .compensate(STEP_CREATE_CUSTOM, "prod_1", None)
            .await
            .expect("no input");
        workflow
            .compensate(STEP_CREATE_LINK, "prod_1", None)
            .await
            .expect("no input");
        workflow
            .compensate(STEP_CREATE_CUSTOM, "prod_1", Some("custom_missing"))
            .await
            .expect("unknown record");
        workflow
            .compensate(STEP_CREATE_LINK, "prod_1", Some("custom_missing"))
            .await
            .expect("unknown link");

        let err = workflow
            .compensate("unknown-step", "prod_1", Some("custom_missing"))
            .await
            .unwrap_err();
        assert!(err.contains("unknown-step"));

        assert!(database
            .workflows()
            .latest_for_subject(WORKFLOW_NAME, "prod_1")
            .await
            .expect("latest")
            .is_none());
    }
}
