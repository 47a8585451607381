//! Resource type definitions

use mooring_core::provider::ResourceType;
use mooring_core::resource::Value;
use mooring_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

pub const AUTOSCALING_ATTACHMENT: &str = "autoscaling_attachment";

pub const ATTR_ASG_NAME: &str = "autoscaling_group_name";
pub const ATTR_ELB: &str = "elb";
pub const ATTR_TARGET_GROUP_ARN: &str = "alb_target_group_arn";
pub const ATTR_WAIT_CAPACITY: &str = "wait_for_elb_capacity";
pub const ATTR_WAIT_TIMEOUT: &str = "wait_for_capacity_timeout";

pub const DEFAULT_WAIT_TIMEOUT: &str = "10m";

/// Schema of `autoscaling_attachment`. Every attribute is ForceNew.
pub fn autoscaling_attachment_schema() -> ResourceSchema {
    ResourceSchema::new(AUTOSCALING_ATTACHMENT)
        .with_description("Attaches a load balancer to an autoscaling group")
        .attribute(
            AttributeSchema::new(ATTR_ASG_NAME, AttributeType::String)
                .required()
                .force_new()
                .with_description("Name of the autoscaling group"),
        )
        .attribute(
            AttributeSchema::new(ATTR_ELB, AttributeType::String)
                .force_new()
                .with_description("Name of a classic load balancer"),
        )
        .attribute(
            AttributeSchema::new(ATTR_TARGET_GROUP_ARN, AttributeType::String)
                .force_new()
                .with_description("ARN of a target group"),
        )
        .attribute(
            AttributeSchema::new(ATTR_WAIT_CAPACITY, types::non_negative_int())
                .force_new()
                .with_description("Healthy instances to wait for after attaching"),
        )
        .attribute(
            AttributeSchema::new(ATTR_WAIT_TIMEOUT, types::duration())
                .force_new()
                .with_default(Value::String(DEFAULT_WAIT_TIMEOUT.to_string()))
                .with_description("How long to wait for capacity"),
        )
        .exactly_one_of(&[ATTR_ELB, ATTR_TARGET_GROUP_ARN])
}

/// Autoscaling attachment resource type
pub struct AutoscalingAttachmentType;

impl ResourceType for AutoscalingAttachmentType {
    fn name(&self) -> &'static str {
        AUTOSCALING_ATTACHMENT
    }

    fn schema(&self) -> ResourceSchema {
        autoscaling_attachment_schema()
    }
}

/// All resource types handled by this provider
pub fn resource_types() -> Vec<Box<dyn ResourceType>> {
    vec![Box::new(AutoscalingAttachmentType)]
}
