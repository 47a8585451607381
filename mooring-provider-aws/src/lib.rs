//! Mooring AWS Provider
//!
//! Attaches classic ELBs and target groups to autoscaling groups, optionally
//! waiting until enough instances are healthy behind the load balancer.

pub mod attachment;
pub mod client;
pub mod error;
pub mod manager;
pub mod resources;
pub mod waiter;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use log::warn;
use mooring_core::provider::{BoxFuture, Provider, ProviderError, ProviderResult, ResourceType};
use mooring_core::resource::{Resource, ResourceId, State};
use tokio_util::sync::CancellationToken;

use crate::attachment::{AttachmentRecord, AttachmentRequest};
use crate::client::{AutoScalingApi, AwsAutoScaling};
use crate::manager::{AttachmentError, AttachmentManager};
use crate::resources::AUTOSCALING_ATTACHMENT;

/// AWS Provider
pub struct AwsProvider {
    manager: AttachmentManager<dyn AutoScalingApi>,
}

impl AwsProvider {
    /// Create a new AWS Provider for the specified region
    pub async fn new(region: &str) -> Self {
        Self::with_api(Arc::new(AwsAutoScaling::new(region).await))
    }

    /// Create a provider over any control-plane implementation
    pub fn with_api(api: Arc<dyn AutoScalingApi>) -> Self {
        Self {
            manager: AttachmentManager::new(api),
        }
    }

    /// Token that interrupts capacity waits (e.g. on Ctrl-C)
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.manager = self.manager.with_cancellation(cancel);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.manager = self.manager.with_poll_interval(poll_interval);
        self
    }

    async fn read_attachment(&self, state: State) -> ProviderResult<State> {
        let Some(record) = AttachmentRecord::from_state(&state) else {
            return Ok(State::not_found(state.id));
        };

        match self.manager.read(&record).await {
            Ok(Some(record)) => Ok(record.to_state(state.id).with_tainted(state.tainted)),
            Ok(None) => Ok(State::not_found(state.id)),
            Err(e) => Err(attachment_error(state.id, e)),
        }
    }

    async fn create_attachment(&self, resource: Resource) -> ProviderResult<State> {
        let request = AttachmentRequest::from_attributes(&resource.attributes).map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
            ProviderError::new(format!("Invalid attributes: {}", messages.join("; ")))
                .for_resource(resource.id.clone())
        })?;

        let err = match self.manager.create(&request).await {
            Ok(record) => return Ok(record.to_state(resource.id)),
            Err(e) => e,
        };

        // The attach itself went through; keep it so the next apply replaces it
        let partial = err.left_attached().map(|record| {
            warn!(
                "{} is attached to {} but the create did not complete",
                record.load_balancer, record.autoscaling_group_name
            );
            record.to_state(resource.id.clone()).with_tainted(true)
        });

        let err = attachment_error(resource.id, err);
        Err(match partial {
            Some(state) => err.with_partial_state(state),
            None => err,
        })
    }

    async fn delete_attachment(&self, state: State) -> ProviderResult<()> {
        let record = AttachmentRecord::from_state(&state).ok_or_else(|| {
            ProviderError::new("State is missing the attachment identifier or attributes")
                .for_resource(state.id.clone())
        })?;

        self.manager
            .delete(&record)
            .await
            .map_err(|e| attachment_error(state.id, e))
    }
}

fn attachment_error(id: ResourceId, err: AttachmentError) -> ProviderError {
    ProviderError::new(err.to_string())
        .for_resource(id)
        .with_cause(err)
}

fn unknown_type(id: &ResourceId) -> ProviderError {
    ProviderError::new(format!("Unknown resource type: {}", id.resource_type))
        .for_resource(id.clone())
}

impl Provider for AwsProvider {
    fn name(&self) -> &'static str {
        "aws"
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        resources::resource_types()
    }

    fn read(&self, state: &State) -> BoxFuture<'_, ProviderResult<State>> {
        let state = state.clone();
        Box::pin(async move {
            match state.id.resource_type.as_str() {
                AUTOSCALING_ATTACHMENT => self.read_attachment(state).await,
                _ => Err(unknown_type(&state.id)),
            }
        })
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move {
            match resource.id.resource_type.as_str() {
                AUTOSCALING_ATTACHMENT => self.create_attachment(resource).await,
                _ => Err(unknown_type(&resource.id)),
            }
        })
    }

    fn delete(&self, state: &State) -> BoxFuture<'_, ProviderResult<()>> {
        let state = state.clone();
        Box::pin(async move {
            match state.id.resource_type.as_str() {
                AUTOSCALING_ATTACHMENT => self.delete_attachment(state).await,
                _ => Err(unknown_type(&state.id)),
            }
        })
    }
}
