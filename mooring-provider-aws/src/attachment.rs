//! Attachment data model
//!
//! An attachment binds one autoscaling group to one load balancer, either a
//! classic ELB (by name) or a target group (by ARN).

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::Utc;
use mooring_core::duration::parse_non_negative_duration;
use mooring_core::resource::{ResourceId, State, Value};
use mooring_core::schema::TypeError;

use crate::resources::{
    ATTR_ASG_NAME, ATTR_ELB, ATTR_TARGET_GROUP_ARN, ATTR_WAIT_CAPACITY, ATTR_WAIT_TIMEOUT,
    DEFAULT_WAIT_TIMEOUT, autoscaling_attachment_schema,
};

/// The load balancer side of an attachment
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttachmentKind {
    /// Classic ELB, registered by name
    ClassicElb(String),
    /// Target group, registered by ARN
    TargetGroup(String),
}

impl AttachmentKind {
    /// Name or ARN of the load balancer
    pub fn identifier(&self) -> &str {
        match self {
            AttachmentKind::ClassicElb(name) => name,
            AttachmentKind::TargetGroup(arn) => arn,
        }
    }

    /// Configuration attribute holding the identifier
    pub fn attribute_name(&self) -> &'static str {
        match self {
            AttachmentKind::ClassicElb(_) => ATTR_ELB,
            AttachmentKind::TargetGroup(_) => ATTR_TARGET_GROUP_ARN,
        }
    }
}

impl fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachmentKind::ClassicElb(name) => write!(f, "Elastic Load Balancer: {}", name),
            AttachmentKind::TargetGroup(arn) => write!(f, "Target Group: {}", arn),
        }
    }
}

/// Validated attachment configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentRequest {
    pub autoscaling_group_name: String,
    pub load_balancer: AttachmentKind,
    /// Healthy instances to wait for after attaching; `None` skips the wait
    pub wait_for_capacity: Option<u32>,
    pub wait_timeout: Duration,
    /// The timeout as configured, kept verbatim for the persisted record
    pub wait_timeout_raw: String,
}

impl AttachmentRequest {
    /// Validate resource attributes and build a request
    ///
    /// All errors are collected; nothing here touches the network.
    pub fn from_attributes(attributes: &HashMap<String, Value>) -> Result<Self, Vec<TypeError>> {
        let schema = autoscaling_attachment_schema();
        schema.validate(attributes)?;
        let attributes = schema.with_defaults(attributes);

        let string = |name: &str| attributes.get(name).and_then(Value::as_str);

        let autoscaling_group_name = string(ATTR_ASG_NAME).unwrap_or_default().to_string();
        let load_balancer = match (string(ATTR_ELB), string(ATTR_TARGET_GROUP_ARN)) {
            (Some(name), None) => AttachmentKind::ClassicElb(name.to_string()),
            (None, Some(arn)) => AttachmentKind::TargetGroup(arn.to_string()),
            _ => {
                return Err(vec![TypeError::MissingOneOf {
                    names: vec![ATTR_ELB.to_string(), ATTR_TARGET_GROUP_ARN.to_string()],
                }]);
            }
        };

        let wait_for_capacity = match attributes.get(ATTR_WAIT_CAPACITY).and_then(Value::as_int) {
            Some(n) => Some(u32::try_from(n).map_err(|_| {
                vec![TypeError::Invalid {
                    name: ATTR_WAIT_CAPACITY.to_string(),
                    message: format!("{} is out of range", n),
                }]
            })?),
            None => None,
        };

        let wait_timeout_raw = string(ATTR_WAIT_TIMEOUT)
            .unwrap_or(DEFAULT_WAIT_TIMEOUT)
            .to_string();
        let wait_timeout = parse_non_negative_duration(&wait_timeout_raw).map_err(|e| {
            vec![TypeError::Invalid {
                name: ATTR_WAIT_TIMEOUT.to_string(),
                message: e.to_string(),
            }]
        })?;

        Ok(Self {
            autoscaling_group_name,
            load_balancer,
            wait_for_capacity,
            wait_timeout,
            wait_timeout_raw,
        })
    }
}

/// Persisted record of a live attachment
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentRecord {
    /// Opaque identifier, `"<asg-name>-<unique-suffix>"`
    pub id: String,
    pub autoscaling_group_name: String,
    pub load_balancer: AttachmentKind,
    pub wait_for_capacity: Option<u32>,
    pub wait_timeout: String,
}

impl AttachmentRecord {
    /// Record for a freshly attached request with a newly generated identifier
    pub fn new(request: &AttachmentRequest) -> Self {
        Self {
            id: prefixed_unique_id(&format!("{}-", request.autoscaling_group_name)),
            autoscaling_group_name: request.autoscaling_group_name.clone(),
            load_balancer: request.load_balancer.clone(),
            wait_for_capacity: request.wait_for_capacity,
            wait_timeout: request.wait_timeout_raw.clone(),
        }
    }

    /// Rebuild a record from recorded state
    ///
    /// Returns `None` when the state has no identifier or lacks the group or
    /// load balancer attributes.
    pub fn from_state(state: &State) -> Option<Self> {
        let id = state.identifier.clone()?;
        let string = |name: &str| state.attributes.get(name).and_then(Value::as_str);

        let autoscaling_group_name = string(ATTR_ASG_NAME)?.to_string();
        let load_balancer = match (string(ATTR_ELB), string(ATTR_TARGET_GROUP_ARN)) {
            (Some(name), _) => AttachmentKind::ClassicElb(name.to_string()),
            (None, Some(arn)) => AttachmentKind::TargetGroup(arn.to_string()),
            (None, None) => return None,
        };
        let wait_for_capacity = state
            .attributes
            .get(ATTR_WAIT_CAPACITY)
            .and_then(Value::as_int)
            .and_then(|n| u32::try_from(n).ok());
        let wait_timeout = string(ATTR_WAIT_TIMEOUT)
            .unwrap_or(DEFAULT_WAIT_TIMEOUT)
            .to_string();

        Some(Self {
            id,
            autoscaling_group_name,
            load_balancer,
            wait_for_capacity,
            wait_timeout,
        })
    }

    /// Attribute map as stored in state
    pub fn attributes(&self) -> HashMap<String, Value> {
        let mut attributes = HashMap::from([
            (
                ATTR_ASG_NAME.to_string(),
                Value::String(self.autoscaling_group_name.clone()),
            ),
            (
                self.load_balancer.attribute_name().to_string(),
                Value::String(self.load_balancer.identifier().to_string()),
            ),
            (
                ATTR_WAIT_TIMEOUT.to_string(),
                Value::String(self.wait_timeout.clone()),
            ),
        ]);
        if let Some(n) = self.wait_for_capacity {
            attributes.insert(ATTR_WAIT_CAPACITY.to_string(), Value::Int(i64::from(n)));
        }
        attributes
    }

    pub fn to_state(&self, id: ResourceId) -> State {
        State::existing(id, self.attributes()).with_identifier(self.id.clone())
    }
}

/// `prefix` followed by a UTC timestamp and a random hex suffix
pub fn prefixed_unique_id(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}{}{}",
        prefix,
        Utc::now().format("%Y%m%d%H%M%S%3f"),
        &suffix[..8]
    )
}
