//! In-memory `AutoScalingApi` for tests

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::attachment::AttachmentKind;
use crate::client::{AutoScalingApi, AutoScalingGroup, HealthState, InstanceHealth};
use crate::error::{ApiError, ApiResult};

#[derive(Default)]
struct FakeState {
    groups: HashMap<String, AutoScalingGroup>,
    health: HashMap<AttachmentKind, Vec<InstanceHealth>>,
    /// Responses returned (in order) before falling back to `health`
    scripted_health: HashMap<AttachmentKind, VecDeque<ApiResult<Vec<InstanceHealth>>>>,
    attach_error: Option<ApiError>,
    detach_error: Option<ApiError>,
    describe_group_error: Option<ApiError>,
    /// `describe_group` never returns
    hang_describe_group: bool,
    calls: Vec<String>,
}

/// Fake control plane holding groups and per-load-balancer health in memory
#[derive(Default)]
pub struct FakeAutoScaling {
    state: Mutex<FakeState>,
}

impl FakeAutoScaling {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a group with the given instances
    pub fn with_group(self, name: &str, instance_ids: &[&str]) -> Self {
        let group = AutoScalingGroup {
            name: name.to_string(),
            instance_ids: instance_ids.iter().map(|id| id.to_string()).collect(),
            ..Default::default()
        };
        self.state
            .lock()
            .unwrap()
            .groups
            .insert(name.to_string(), group);
        self
    }

    /// Record a load balancer as already attached to a group
    pub fn with_attached(self, group: &str, load_balancer: &AttachmentKind) -> Self {
        attach_to(&mut self.state.lock().unwrap(), group, load_balancer);
        self
    }

    /// Set the steady-state health reported by one load balancer
    pub fn with_health(self, load_balancer: &AttachmentKind, health: &[(&str, HealthState)]) -> Self {
        self.set_health(load_balancer, health);
        self
    }

    pub fn set_health(&self, load_balancer: &AttachmentKind, health: &[(&str, HealthState)]) {
        let health = health
            .iter()
            .map(|(id, state)| InstanceHealth {
                instance_id: id.to_string(),
                state: state.clone(),
            })
            .collect();
        self.state
            .lock()
            .unwrap()
            .health
            .insert(load_balancer.clone(), health);
    }

    /// Queue a one-off health response, consumed before the steady state
    pub fn push_health_response(
        &self,
        load_balancer: &AttachmentKind,
        response: ApiResult<Vec<InstanceHealth>>,
    ) {
        self.state
            .lock()
            .unwrap()
            .scripted_health
            .entry(load_balancer.clone())
            .or_default()
            .push_back(response);
    }

    pub fn fail_attach(&self, error: ApiError) {
        self.state.lock().unwrap().attach_error = Some(error);
    }

    pub fn fail_detach(&self, error: ApiError) {
        self.state.lock().unwrap().detach_error = Some(error);
    }

    pub fn fail_describe_group(&self, error: ApiError) {
        self.state.lock().unwrap().describe_group_error = Some(error);
    }

    /// Make every later `describe_group` call hang forever
    pub fn hang_describe_group(&self) {
        self.state.lock().unwrap().hang_describe_group = true;
    }

    pub fn remove_group(&self, name: &str) {
        self.state.lock().unwrap().groups.remove(name);
    }

    pub fn group(&self, name: &str) -> Option<AutoScalingGroup> {
        self.state.lock().unwrap().groups.get(name).cloned()
    }

    /// Names of the calls made so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == name).count()
    }
}

fn attach_to(state: &mut FakeState, group: &str, load_balancer: &AttachmentKind) {
    if let Some(asg) = state.groups.get_mut(group) {
        let list = match load_balancer {
            AttachmentKind::ClassicElb(_) => &mut asg.load_balancer_names,
            AttachmentKind::TargetGroup(_) => &mut asg.target_group_arns,
        };
        if !list.iter().any(|id| id == load_balancer.identifier()) {
            list.push(load_balancer.identifier().to_string());
        }
    }
}

#[async_trait]
impl AutoScalingApi for FakeAutoScaling {
    async fn attach(&self, group: &str, load_balancer: &AttachmentKind) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("attach".to_string());
        if let Some(err) = state.attach_error.clone() {
            return Err(err);
        }
        if !state.groups.contains_key(group) {
            return Err(ApiError::Sdk {
                code: Some("ValidationError".to_string()),
                message: format!("AutoScalingGroup name not found - {}", group),
            });
        }
        attach_to(&mut state, group, load_balancer);
        Ok(())
    }

    async fn detach(&self, group: &str, load_balancer: &AttachmentKind) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("detach".to_string());
        if let Some(err) = state.detach_error.clone() {
            return Err(err);
        }
        if let Some(asg) = state.groups.get_mut(group) {
            asg.load_balancer_names
                .retain(|id| id != load_balancer.identifier());
            asg.target_group_arns
                .retain(|id| id != load_balancer.identifier());
        }
        Ok(())
    }

    async fn describe_group(&self, group: &str) -> ApiResult<Option<AutoScalingGroup>> {
        {
            let mut state = self.state.lock().unwrap();
            state.calls.push("describe_group".to_string());
            if let Some(err) = state.describe_group_error.clone() {
                return Err(err);
            }
            if !state.hang_describe_group {
                return Ok(state.groups.get(group).cloned());
            }
        }
        std::future::pending().await
    }

    async fn describe_health(
        &self,
        load_balancer: &AttachmentKind,
    ) -> ApiResult<Vec<InstanceHealth>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("describe_health".to_string());
        if let Some(response) = state
            .scripted_health
            .get_mut(load_balancer)
            .and_then(VecDeque::pop_front)
        {
            return response;
        }
        match state.health.get(load_balancer) {
            Some(health) => Ok(health.clone()),
            None => Err(ApiError::NotFound {
                message: format!("{} not found", load_balancer),
            }),
        }
    }
}
