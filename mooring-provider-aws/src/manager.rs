//! Attachment lifecycle
//!
//! Create attaches and then optionally waits for capacity. The attach is not
//! rolled back when the wait fails; the error carries the record so the
//! caller can keep track of what was left behind.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::attachment::{AttachmentKind, AttachmentRecord, AttachmentRequest};
use crate::client::AutoScalingApi;
use crate::error::ApiError;
use crate::waiter::{CapacityWaiter, DEFAULT_POLL_INTERVAL, WaitConfig, WaitError};

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("Failure attaching AutoScaling Group {group} with {load_balancer}: {source}")]
    Attach {
        group: String,
        load_balancer: AttachmentKind,
        source: ApiError,
    },

    /// The load balancer is attached but never reached the wanted capacity
    #[error("Failure waiting on AutoScaling Group {group} capacity on {load_balancer}: {source}")]
    Wait {
        group: String,
        load_balancer: AttachmentKind,
        record: Box<AttachmentRecord>,
        source: WaitError,
    },

    /// The load balancer is attached but the group could not be read back
    #[error("Failure reading AutoScaling Group {group} after attaching {load_balancer}: {source}")]
    ReadBack {
        group: String,
        load_balancer: AttachmentKind,
        record: Box<AttachmentRecord>,
        source: ApiError,
    },

    #[error("Failure detaching AutoScaling Group {group} with {load_balancer}: {source}")]
    Detach {
        group: String,
        load_balancer: AttachmentKind,
        source: ApiError,
    },

    #[error("Error retrieving AutoScaling Group {group}: {source}")]
    Read { group: String, source: ApiError },
}

impl AttachmentError {
    /// The attachment left in place when create fails after the attach call
    pub fn left_attached(&self) -> Option<&AttachmentRecord> {
        match self {
            AttachmentError::Wait { record, .. } | AttachmentError::ReadBack { record, .. } => {
                Some(record.as_ref())
            }
            _ => None,
        }
    }
}

/// Create, read and delete attachments through an `AutoScalingApi`
pub struct AttachmentManager<C: AutoScalingApi + ?Sized> {
    api: Arc<C>,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl<C: AutoScalingApi + ?Sized> AttachmentManager<C> {
    pub fn new(api: Arc<C>) -> Self {
        Self {
            api,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Token that interrupts capacity waits
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn create(
        &self,
        request: &AttachmentRequest,
    ) -> Result<AttachmentRecord, AttachmentError> {
        let group = &request.autoscaling_group_name;
        let load_balancer = &request.load_balancer;

        info!("Registering asg {} with {}", group, load_balancer);
        self.api
            .attach(group, load_balancer)
            .await
            .map_err(|source| AttachmentError::Attach {
                group: group.clone(),
                load_balancer: load_balancer.clone(),
                source,
            })?;

        let record = AttachmentRecord::new(request);

        if let Some(wanted) = request.wait_for_capacity
            && wanted > 0
        {
            let config = WaitConfig {
                poll_interval: self.poll_interval,
                timeout: request.wait_timeout,
            };
            CapacityWaiter::new(self.api.as_ref(), config)
                .wait(group, load_balancer, wanted as usize, &self.cancel)
                .await
                .map_err(|source| AttachmentError::Wait {
                    group: group.clone(),
                    load_balancer: load_balancer.clone(),
                    record: Box::new(record.clone()),
                    source,
                })?;
        }

        match self.read(&record).await {
            Ok(found) => Ok(found.unwrap_or(record)),
            Err(AttachmentError::Read { source, .. }) => Err(AttachmentError::ReadBack {
                group: group.clone(),
                load_balancer: load_balancer.clone(),
                record: Box::new(record),
                source,
            }),
            Err(e) => Err(e),
        }
    }

    /// Reconcile a record against the live group
    ///
    /// `None` means the attachment is gone: either the group no longer
    /// exists or it no longer lists the load balancer.
    pub async fn read(
        &self,
        record: &AttachmentRecord,
    ) -> Result<Option<AttachmentRecord>, AttachmentError> {
        let group = &record.autoscaling_group_name;
        let Some(asg) =
            self.api
                .describe_group(group)
                .await
                .map_err(|source| AttachmentError::Read {
                    group: group.clone(),
                    source,
                })?
        else {
            info!("Autoscaling Group {:?} not found", group);
            return Ok(None);
        };

        if !asg.is_attached(&record.load_balancer) {
            warn!(
                "Association for {} was not found in ASG association",
                record.load_balancer.identifier()
            );
            return Ok(None);
        }

        Ok(Some(record.clone()))
    }

    pub async fn delete(&self, record: &AttachmentRecord) -> Result<(), AttachmentError> {
        let group = &record.autoscaling_group_name;
        info!(
            "Deleting {} association from: {}",
            record.load_balancer, group
        );
        self.api
            .detach(group, &record.load_balancer)
            .await
            .map_err(|source| AttachmentError::Detach {
                group: group.clone(),
                load_balancer: record.load_balancer.clone(),
                source,
            })
    }
}
