//! Sequential saga execution with reverse-order compensation.
//!
//! Steps run one after another against a shared context. When a step fails, the
//! steps that already completed are compensated last-to-first. A failing
//! compensation is recorded and the walk carries on with the next one.

use crate::utils::error::{PatternError, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

#[async_trait]
pub trait SagaStep<C: Send + Sync>: Send + Sync {
    fn name(&self) -> &str;

    /// Performs the step. The returned value is kept for compensation and reporting.
    async fn execute(&self, ctx: &mut C) -> Result<Value>;

    fn has_compensation(&self) -> bool {
        false
    }

    async fn compensate(&self, _ctx: &C, _output: &Value) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    Completed,
    Compensated,
    /// At least one compensation failed; the saga needs manual attention.
    CompensationFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedStep {
    pub step: String,
    pub output: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepFailure {
    pub step: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompensationOutcome {
    Compensated,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompensationRecord {
    pub step: String,
    #[serde(flatten)]
    pub outcome: CompensationOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaReport {
    pub transaction_id: String,
    pub status: SagaStatus,
    pub completed: Vec<CompletedStep>,
    pub failure: Option<StepFailure>,
    pub compensations: Vec<CompensationRecord>,
}

impl SagaReport {
    pub fn is_completed(&self) -> bool {
        self.status == SagaStatus::Completed
    }

    pub fn output(&self, step: &str) -> Option<&Value> {
        self.completed
            .iter()
            .find(|c| c.step == step)
            .map(|c| &c.output)
    }

    /// The failed step as an error, if the saga did not complete.
    pub fn failure_error(&self) -> Option<PatternError> {
        self.failure.as_ref().map(|f| PatternError::StepFailed {
            step: f.step.clone(),
            message: f.error.clone(),
        })
    }
}

pub struct Saga<C> {
    name: String,
    steps: Vec<Box<dyn SagaStep<C>>>,
}

impl<C: Send + Sync> Saga<C> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: impl SagaStep<C> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub async fn run(&self, ctx: &mut C) -> SagaReport {
        self.run_with_id(Uuid::new_v4().to_string(), ctx).await
    }

    pub async fn run_with_id(&self, transaction_id: String, ctx: &mut C) -> SagaReport {
        tracing::info!(saga = %self.name, %transaction_id, "Saga started");

        let mut completed: Vec<(usize, Value)> = Vec::with_capacity(self.steps.len());
        let mut failure = None;

        for (index, step) in self.steps.iter().enumerate() {
            tracing::info!(%transaction_id, "Step {}: {}", index + 1, step.name());
            match step.execute(ctx).await {
                Ok(output) => completed.push((index, output)),
                Err(e) => {
                    tracing::error!(%transaction_id, step = step.name(), "Step failed: {}", e);
                    failure = Some(StepFailure {
                        step: step.name().to_string(),
                        error: e.to_string(),
                    });
                    break;
                }
            }
        }

        let mut compensations = Vec::new();
        if failure.is_some() {
            tracing::info!(%transaction_id, "Starting compensation (rollback) process");
            for (index, output) in completed.iter().rev() {
                let step = &self.steps[*index];
                if !step.has_compensation() {
                    continue;
                }
                let outcome = match step.compensate(ctx, output).await {
                    Ok(()) => {
                        tracing::info!(%transaction_id, "Compensated {}", step.name());
                        CompensationOutcome::Compensated
                    }
                    Err(e) => {
                        tracing::error!(%transaction_id, "Failed to compensate {}: {}", step.name(), e);
                        CompensationOutcome::Failed {
                            error: e.to_string(),
                        }
                    }
                };
                compensations.push(CompensationRecord {
                    step: step.name().to_string(),
                    outcome,
                });
            }
        }

        let status = match (&failure, &compensations) {
            (None, _) => SagaStatus::Completed,
            (Some(_), records)
                if records
                    .iter()
                    .any(|r| matches!(r.outcome, CompensationOutcome::Failed { .. })) =>
            {
                SagaStatus::CompensationFailed
            }
            (Some(_), _) => SagaStatus::Compensated,
        };

        tracing::info!(saga = %self.name, %transaction_id, ?status, "Saga finished");

        SagaReport {
            transaction_id,
            status,
            completed: completed
                .into_iter()
                .map(|(index, output)| CompletedStep {
                    step: self.steps[index].name().to_string(),
                    output,
                })
                .collect(),
            failure,
            compensations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Context that records every action in order.
    #[derive(Default)]
    struct Journal {
        entries: Vec<String>,
    }

    struct Recorded {
        name: &'static str,
        fail: bool,
        fail_compensation: bool,
        compensable: bool,
    }

    impl Recorded {
        fn ok(name: &'static str) -> Self {
            Self {
                name,
                fail: false,
                fail_compensation: false,
                compensable: true,
            }
        }
    }

    #[async_trait]
    impl SagaStep<std::sync::Mutex<Journal>> for Recorded {
        fn name(&self) -> &str {
            self.name
        }

        async fn execute(&self, ctx: &mut std::sync::Mutex<Journal>) -> Result<Value> {
            if self.fail {
                return Err(PatternError::validation(format!("{} refused", self.name)));
            }
            ctx.get_mut()
                .unwrap()
                .entries
                .push(format!("do:{}", self.name));
            Ok(Value::String(format!("{}-id", self.name)))
        }

        fn has_compensation(&self) -> bool {
            self.compensable
        }

        async fn compensate(&self, ctx: &std::sync::Mutex<Journal>, output: &Value) -> Result<()> {
            ctx.lock()
                .unwrap()
                .entries
                .push(format!("undo:{}:{}", self.name, output.as_str().unwrap()));
            if self.fail_compensation {
                return Err(PatternError::storage("cancel failed"));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_all_steps_complete() {
        let saga = Saga::new("trip")
            .step(Recorded::ok("flight"))
            .step(Recorded::ok("hotel"));
        let mut ctx = std::sync::Mutex::new(Journal::default());

        let report = saga.run(&mut ctx).await;

        assert!(report.is_completed());
        assert!(report.compensations.is_empty());
        assert_eq!(report.output("hotel"), Some(&Value::String("hotel-id".into())));
        assert_eq!(ctx.into_inner().unwrap().entries, vec!["do:flight", "do:hotel"]);
    }

    #[tokio::test]
    async fn test_failure_compensates_in_reverse_order() {
        let saga = Saga::new("trip")
            .step(Recorded::ok("flight"))
            .step(Recorded::ok("hotel"))
            .step(Recorded {
                fail: true,
                ..Recorded::ok("car")
            });
        let mut ctx = std::sync::Mutex::new(Journal::default());

        let report = saga.run(&mut ctx).await;

        assert_eq!(report.status, SagaStatus::Compensated);
        assert_eq!(report.failure.as_ref().unwrap().step, "car");
        assert_eq!(
            ctx.into_inner().unwrap().entries,
            vec![
                "do:flight",
                "do:hotel",
                "undo:hotel:hotel-id",
                "undo:flight:flight-id"
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_compensation_does_not_stop_the_rest() {
        let saga = Saga::new("trip")
            .step(Recorded::ok("flight"))
            .step(Recorded {
                fail_compensation: true,
                ..Recorded::ok("hotel")
            })
            .step(Recorded {
                fail: true,
                ..Recorded::ok("car")
            });
        let mut ctx = std::sync::Mutex::new(Journal::default());

        let report = saga.run(&mut ctx).await;

        assert_eq!(report.status, SagaStatus::CompensationFailed);
        assert_eq!(report.compensations.len(), 2);
        assert!(matches!(
            report.compensations[0].outcome,
            CompensationOutcome::Failed { .. }
        ));
        assert_eq!(report.compensations[1].outcome, CompensationOutcome::Compensated);
    }

    #[tokio::test]
    async fn test_steps_without_compensation_are_skipped() {
        let saga = Saga::new("order")
            .step(Recorded {
                compensable: false,
                ..Recorded::ok("validate")
            })
            .step(Recorded {
                fail: true,
                ..Recorded::ok("charge")
            });
        let mut ctx = std::sync::Mutex::new(Journal::default());

        let report = saga.run(&mut ctx).await;

        assert_eq!(report.status, SagaStatus::Compensated);
        assert!(report.compensations.is_empty());
        assert!(matches!(
            report.failure_error(),
            Some(PatternError::StepFailed { ref step, .. }) if step == "charge"
        ));
    }

    #[tokio::test]
    async fn test_first_step_failure_has_nothing_to_undo() {
        let saga = Saga::new("trip").step(Recorded {
            fail: true,
            ..Recorded::ok("flight")
        });
        let mut ctx = std::sync::Mutex::new(Journal::default());

        let report = saga.run_with_id("tx-1".into(), &mut ctx).await;

        assert_eq!(report.transaction_id, "tx-1");
        assert!(report.completed.is_empty());
        assert!(report.compensations.is_empty());
        assert_eq!(report.status, SagaStatus::Compensated);
    }
}
