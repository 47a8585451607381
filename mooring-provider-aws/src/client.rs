//! Control-plane client
//!
//! `AutoScalingApi` is the narrow slice of AWS that attachments need. The
//! manager and the capacity waiter only ever see this trait; `AwsAutoScaling`
//! backs it with the real SDK clients.

use async_trait::async_trait;
use aws_config::Region;

use crate::attachment::AttachmentKind;
use crate::error::{ApiResult, classify_sdk_error};

/// Snapshot of an autoscaling group
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutoScalingGroup {
    pub name: String,
    pub load_balancer_names: Vec<String>,
    pub target_group_arns: Vec<String>,
    /// Ids of the instances currently in the group
    pub instance_ids: Vec<String>,
}

impl AutoScalingGroup {
    /// Whether the group currently lists this load balancer
    pub fn is_attached(&self, load_balancer: &AttachmentKind) -> bool {
        let attached = match load_balancer {
            AttachmentKind::ClassicElb(_) => &self.load_balancer_names,
            AttachmentKind::TargetGroup(_) => &self.target_group_arns,
        };
        attached.iter().any(|id| id == load_balancer.identifier())
    }
}

/// Health of one instance as seen by one load balancer
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceHealth {
    pub instance_id: String,
    pub state: HealthState,
}

/// Load balancer health, normalized across classic ELBs and target groups
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthState {
    /// `InService` (classic) or `healthy` (target group)
    Healthy,
    /// Target group `initial`: registration or first health checks in progress
    Pending,
    Unhealthy,
    Unknown(String),
}

impl HealthState {
    /// Map a classic ELB instance state
    pub fn from_classic(state: &str) -> Self {
        match state {
            "InService" => HealthState::Healthy,
            "OutOfService" => HealthState::Unhealthy,
            other => HealthState::Unknown(other.to_string()),
        }
    }

    /// Map a target group target health state
    pub fn from_target_group(state: &str) -> Self {
        match state {
            "healthy" => HealthState::Healthy,
            "initial" => HealthState::Pending,
            "unhealthy" | "unhealthy.draining" | "draining" | "unused" | "unavailable" => {
                HealthState::Unhealthy
            }
            other => HealthState::Unknown(other.to_string()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthState::Healthy)
    }
}

/// Autoscaling and load balancing calls used by attachments
#[async_trait]
pub trait AutoScalingApi: Send + Sync {
    /// Attach the load balancer to the group
    async fn attach(&self, group: &str, load_balancer: &AttachmentKind) -> ApiResult<()>;

    /// Detach the load balancer from the group
    async fn detach(&self, group: &str, load_balancer: &AttachmentKind) -> ApiResult<()>;

    /// Describe a group, `None` if it does not exist
    async fn describe_group(&self, group: &str) -> ApiResult<Option<AutoScalingGroup>>;

    /// Health of every instance registered with this one load balancer
    async fn describe_health(&self, load_balancer: &AttachmentKind)
    -> ApiResult<Vec<InstanceHealth>>;
}

/// `AutoScalingApi` backed by the AWS SDK
pub struct AwsAutoScaling {
    autoscaling: aws_sdk_autoscaling::Client,
    elb: aws_sdk_elasticloadbalancing::Client,
    elbv2: aws_sdk_elasticloadbalancingv2::Client,
}

impl AwsAutoScaling {
    /// Create clients for the specified region
    pub async fn new(region: &str) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;

        Self::from_conf(&config)
    }

    /// Create clients from an already loaded configuration
    pub fn from_conf(config: &aws_config::SdkConfig) -> Self {
        Self {
            autoscaling: aws_sdk_autoscaling::Client::new(config),
            elb: aws_sdk_elasticloadbalancing::Client::new(config),
            elbv2: aws_sdk_elasticloadbalancingv2::Client::new(config),
        }
    }
}

#[async_trait]
impl AutoScalingApi for AwsAutoScaling {
    async fn attach(&self, group: &str, load_balancer: &AttachmentKind) -> ApiResult<()> {
        match load_balancer {
            AttachmentKind::ClassicElb(name) => {
                self.autoscaling
                    .attach_load_balancers()
                    .auto_scaling_group_name(group)
                    .load_balancer_names(name.as_str())
                    .send()
                    .await
                    .map_err(|e| classify_sdk_error(&e))?;
            }
            AttachmentKind::TargetGroup(arn) => {
                self.autoscaling
                    .attach_load_balancer_target_groups()
                    .auto_scaling_group_name(group)
                    .target_group_arns(arn.as_str())
                    .send()
                    .await
                    .map_err(|e| classify_sdk_error(&e))?;
            }
        }
        Ok(())
    }

    async fn detach(&self, group: &str, load_balancer: &AttachmentKind) -> ApiResult<()> {
        match load_balancer {
            AttachmentKind::ClassicElb(name) => {
                self.autoscaling
                    .detach_load_balancers()
                    .auto_scaling_group_name(group)
                    .load_balancer_names(name.as_str())
                    .send()
                    .await
                    .map_err(|e| classify_sdk_error(&e))?;
            }
            AttachmentKind::TargetGroup(arn) => {
                self.autoscaling
                    .detach_load_balancer_target_groups()
                    .auto_scaling_group_name(group)
                    .target_group_arns(arn.as_str())
                    .send()
                    .await
                    .map_err(|e| classify_sdk_error(&e))?;
            }
        }
        Ok(())
    }

    async fn describe_group(&self, group: &str) -> ApiResult<Option<AutoScalingGroup>> {
        let output = self
            .autoscaling
            .describe_auto_scaling_groups()
            .auto_scaling_group_names(group)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))?;

        let Some(asg) = output
            .auto_scaling_groups()
            .iter()
            .find(|g| g.auto_scaling_group_name() == Some(group))
        else {
            return Ok(None);
        };

        let instance_ids = asg
            .instances()
            .iter()
            .filter_map(|i| i.instance_id().map(str::to_string))
            .collect();

        Ok(Some(AutoScalingGroup {
            name: group.to_string(),
            load_balancer_names: asg.load_balancer_names().to_vec(),
            target_group_arns: asg.target_group_arns().to_vec(),
            instance_ids,
        }))
    }

    async fn describe_health(
        &self,
        load_balancer: &AttachmentKind,
    ) -> ApiResult<Vec<InstanceHealth>> {
        match load_balancer {
            AttachmentKind::ClassicElb(name) => {
                let output = self
                    .elb
                    .describe_instance_health()
                    .load_balancer_name(name.as_str())
                    .send()
                    .await
                    .map_err(|e| classify_sdk_error(&e))?;

                Ok(output
                    .instance_states()
                    .iter()
                    .filter_map(|s| {
                        Some(InstanceHealth {
                            instance_id: s.instance_id()?.to_string(),
                            state: HealthState::from_classic(s.state().unwrap_or("Unknown")),
                        })
                    })
                    .collect())
            }
            AttachmentKind::TargetGroup(arn) => {
                let output = self
                    .elbv2
                    .describe_target_health()
                    .target_group_arn(arn.as_str())
                    .send()
                    .await
                    .map_err(|e| classify_sdk_error(&e))?;

                Ok(output
                    .target_health_descriptions()
                    .iter()
                    .filter_map(|d| {
                        let instance_id = d.target()?.id()?.to_string();
                        let state = d
                            .target_health()
                            .and_then(|h| h.state())
                            .map(|s| HealthState::from_target_group(s.as_str()))
                            .unwrap_or_else(|| HealthState::Unknown(String::new()));
                        Some(InstanceHealth { instance_id, state })
                    })
                    .collect())
            }
        }
    }
}
