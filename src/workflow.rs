//! Cross-workflow calls and schedules.
//!
//! Signals, queries, updates and schedule creation follow the same
//! context rule as A2A messages: from a durable unit the client call runs as a
//! retryable unit, anywhere else it is made directly.

use crate::dispatcher::{ContextAwareDispatcher, DispatchOptions};
use crate::errors::{MessagingError, MessagingResult};
use crate::types::{option_duration_millis, Metadata};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Client of the substrate's workflow API.
#[async_trait]
pub trait WorkflowClient: Send + Sync {
    /// Deliver a fire-and-forget signal.
    async fn signal(&self, workflow_id: &str, signal_name: &str, payload: Value) -> MessagingResult<()>;

    /// Read-only query against a running workflow.
    async fn query(&self, workflow_id: &str, query_name: &str, args: Value) -> MessagingResult<Value>;

    /// Mutating call that returns the workflow's answer.
    async fn update(&self, workflow_id: &str, update_name: &str, args: Value) -> MessagingResult<Value>;

    /// Create a schedule and return its id.
    async fn create_schedule(&self, schedule: ScheduleSpec) -> MessagingResult<String>;
}

/// A schedule that starts `workflow_type` on a cron expression or interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub schedule_id: String,
    pub workflow_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(
        with = "option_duration_millis",
        rename = "interval_ms",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub interval: Option<Duration>,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub memo: Metadata,
}

impl ScheduleSpec {
    pub fn new(schedule_id: impl Into<String>, workflow_type: impl Into<String>) -> Self {
        Self {
            schedule_id: schedule_id.into(),
            workflow_type: workflow_type.into(),
            cron: None,
            interval: None,
            args: Value::Null,
            paused: false,
            memo: Metadata::new(),
        }
    }

    pub fn with_cron(mut self, expression: impl Into<String>) -> Self {
        self.cron = Some(expression.into());
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_args(mut self, args: impl Serialize) -> MessagingResult<Self> {
        self.args = serde_json::to_value(args)?;
        Ok(self)
    }

    pub fn paused(mut self) -> Self {
        self.paused = true;
        self
    }

    pub fn with_memo(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.memo.insert(key.into(), value.into());
        self
    }

    /// Ids must be non-empty and exactly one trigger set.
    pub fn validate(&self) -> MessagingResult<()> {
        require("schedule_id", &self.schedule_id)?;
        require("workflow_type", &self.workflow_type)?;
        match (&self.cron, &self.interval) {
            (Some(cron), None) if !cron.trim().is_empty() => Ok(()),
            (None, Some(interval)) if !interval.is_zero() => Ok(()),
            (Some(_), Some(_)) => Err(MessagingError::validation(
                "schedule must use either a cron expression or an interval, not both",
            )
            .with_context("schedule_id", &self.schedule_id)),
            _ => Err(MessagingError::validation(
                "schedule requires a non-empty cron expression or a non-zero interval",
            )
            .with_context("schedule_id", &self.schedule_id)),
        }
    }
}

fn require(field: &str, value: &str) -> MessagingResult<()> {
    if value.trim().is_empty() {
        return Err(MessagingError::validation(format!("{} must not be empty", field))
            .with_context("field", field));
    }
    Ok(())
}

/// Context-aware workflow calls.
#[derive(Clone)]
pub struct WorkflowCalls {
    dispatcher: Arc<ContextAwareDispatcher>,
    client: Arc<dyn WorkflowClient>,
}

impl WorkflowCalls {
    pub fn new(dispatcher: Arc<ContextAwareDispatcher>, client: Arc<dyn WorkflowClient>) -> Self {
        Self { dispatcher, client }
    }

    pub async fn signal(
        &self,
        workflow_id: &str,
        signal_name: &str,
        payload: impl Serialize,
    ) -> MessagingResult<()> {
        require("workflow_id", workflow_id)?;
        require("signal_name", signal_name)?;
        let payload = serde_json::to_value(payload)?;
        debug!(workflow_id, signal_name, "Signalling workflow");

        let (client, id, name, body) = self.owned(workflow_id, signal_name, payload.clone());
        self.dispatcher
            .dispatch_client_call(
                "workflow_signal",
                move || {
                    let (client, id, name, body) = (client.clone(), id.clone(), name.clone(), body.clone());
                    async move { client.signal(&id, &name, body).await }
                },
                || self.client.signal(workflow_id, signal_name, payload),
                DispatchOptions::default(),
            )
            .await
    }

    pub async fn query<T: DeserializeOwned>(
        &self,
        workflow_id: &str,
        query_name: &str,
        args: impl Serialize,
    ) -> MessagingResult<T> {
        require("workflow_id", workflow_id)?;
        require("query_name", query_name)?;
        let args = serde_json::to_value(args)?;
        debug!(workflow_id, query_name, "Querying workflow");

        let (client, id, name, body) = self.owned(workflow_id, query_name, args.clone());
        let value = self
            .dispatcher
            .dispatch_client_call(
                "workflow_query",
                move || {
                    let (client, id, name, body) = (client.clone(), id.clone(), name.clone(), body.clone());
                    async move { client.query(&id, &name, body).await }
                },
                || self.client.query(workflow_id, query_name, args),
                DispatchOptions::default(),
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn update<T: DeserializeOwned>(
        &self,
        workflow_id: &str,
        update_name: &str,
        args: impl Serialize,
    ) -> MessagingResult<T> {
        require("workflow_id", workflow_id)?;
        require("update_name", update_name)?;
        let args = serde_json::to_value(args)?;
        debug!(workflow_id, update_name, "Updating workflow");

        let (client, id, name, body) = self.owned(workflow_id, update_name, args.clone());
        let value = self
            .dispatcher
            .dispatch_client_call(
                "workflow_update",
                move || {
                    let (client, id, name, body) = (client.clone(), id.clone(), name.clone(), body.clone());
                    async move { client.update(&id, &name, body).await }
                },
                || self.client.update(workflow_id, update_name, args),
                DispatchOptions::default(),
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn create_schedule(&self, schedule: ScheduleSpec) -> MessagingResult<String> {
        schedule.validate()?;
        debug!(schedule_id = %schedule.schedule_id, "Creating schedule");

        let client = self.client.clone();
        let spec = schedule.clone();
        self.dispatcher
            .dispatch_client_call(
                "create_schedule",
                move || {
                    let (client, spec) = (client.clone(), spec.clone());
                    async move { client.create_schedule(spec).await }
                },
                || self.client.create_schedule(schedule),
                DispatchOptions::default(),
            )
            .await
    }

    fn owned(
        &self,
        workflow_id: &str,
        name: &str,
        body: Value,
    ) -> (Arc<dyn WorkflowClient>, String, String, Value) {
        (self.client.clone(), workflow_id.to_string(), name.to_string(), body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FixedClassifier;
    use crate::errors::ErrorCode;
    use crate::substrate::LocalSubstrate;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingClient {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl WorkflowClient for RecordingClient {
        async fn signal(&self, workflow_id: &str, signal_name: &str, _payload: Value) -> MessagingResult<()> {
            self.calls.lock().push(format!("signal:{workflow_id}:{signal_name}"));
            Ok(())
        }

        async fn query(&self, workflow_id: &str, query_name: &str, args: Value) -> MessagingResult<Value> {
            self.calls.lock().push(format!("query:{workflow_id}:{query_name}"));
            Ok(args)
        }

        async fn update(&self, workflow_id: &str, update_name: &str, _args: Value) -> MessagingResult<Value> {
            self.calls.lock().push(format!("update:{workflow_id}:{update_name}"));
            Ok(serde_json::json!({"accepted": true}))
        }

        async fn create_schedule(&self, schedule: ScheduleSpec) -> MessagingResult<String> {
            self.calls.lock().push(format!("schedule:{}", schedule.schedule_id));
            Ok(schedule.schedule_id)
        }
    }

    #[tokio::test]
    async fn test_calls_outside_substrate_go_direct() {
        let client = Arc::new(RecordingClient::default());
        let dispatcher = Arc::new(ContextAwareDispatcher::new(Arc::new(FixedClassifier::outside())));
        let calls = WorkflowCalls::new(dispatcher, client.clone());

        calls.signal("wf-1", "approve", serde_json::json!({})).await.unwrap();
        let echoed: Vec<u32> = calls.query("wf-1", "items", vec![1, 2]).await.unwrap();
        assert_eq!(echoed, vec![1, 2]);

        assert_eq!(
            *client.calls.lock(),
            vec!["signal:wf-1:approve".to_string(), "query:wf-1:items".to_string()]
        );
    }

    #[tokio::test]
    async fn test_calls_in_durable_unit_run_as_units() {
        let client = Arc::new(RecordingClient::default());
        let substrate = Arc::new(LocalSubstrate::durable());
        let dispatcher = Arc::new(ContextAwareDispatcher::for_substrate(substrate.clone()));
        let calls = WorkflowCalls::new(dispatcher, client.clone());

        #[derive(Deserialize)]
        struct Ack {
            accepted: bool,
        }
        let ack: Ack = calls.update("wf-2", "resize", 3).await.unwrap();
        assert!(ack.accepted);

        let id = calls
            .create_schedule(ScheduleSpec::new("nightly", "Report").with_cron("0 0 * * *"))
            .await
            .unwrap();
        assert_eq!(id, "nightly");
        assert_eq!(substrate.units_started(), 2);
    }

    #[tokio::test]
    async fn test_validation_happens_before_dispatch() {
        let client = Arc::new(RecordingClient::default());
        let dispatcher = Arc::new(ContextAwareDispatcher::new(Arc::new(FixedClassifier::outside())));
        let calls = WorkflowCalls::new(dispatcher, client.clone());

        let err = calls.signal("", "approve", ()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);

        let err = calls
            .create_schedule(ScheduleSpec::new("s", "Report"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);

        assert!(client.calls.lock().is_empty());
    }

    #[test]
    fn test_schedule_validation() {
        assert!(ScheduleSpec::new("s", "W").with_interval(Duration::from_secs(60)).validate().is_ok());
        assert!(ScheduleSpec::new("s", "W")
            .with_cron("* * * * *")
            .with_interval(Duration::from_secs(1))
            .validate()
            .is_err());
        assert!(ScheduleSpec::new("s", "W").with_interval(Duration::ZERO).validate().is_err());
    }
}
