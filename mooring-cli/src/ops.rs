//! Command implementations over a `Provider` and a `StateBackend`

use std::collections::HashMap;
use std::io::Write;

use colored::Colorize;
use log::{debug, info, warn};
use mooring_core::differ::{Diff, create_plan};
use mooring_core::duration::parse_non_negative_duration;
use mooring_core::provider::{Provider, ProviderError, ProviderResult, ResourceType};
use mooring_core::resource::{Resource, ResourceId, State, Value};
use mooring_core::schema::ResourceSchema;
use mooring_provider_aws::resources::ATTR_WAIT_TIMEOUT;
use mooring_provider_aws::waiter::DEFAULT_WAIT_TIMEOUT;
use mooring_state::lock::DEFAULT_LOCK_TIMEOUT_SECS;
use mooring_state::{LockInfo, StateBackend, StateFile};
use tokio_util::sync::CancellationToken;

/// Counts of finished, failed and interrupted steps
#[derive(Debug, Default, PartialEq)]
pub struct Outcome {
    pub succeeded: usize,
    pub failed: usize,
    /// Steps never started because the run was interrupted
    pub skipped: usize,
}

pub fn schemas(resource_types: &[Box<dyn ResourceType>]) -> HashMap<String, ResourceSchema> {
    resource_types
        .iter()
        .map(|t| (t.name().to_string(), t.schema()))
        .collect()
}

/// Check every resource against its schema without touching the network
pub fn validate_resources(
    resources: &[Resource],
    schemas: &HashMap<String, ResourceSchema>,
) -> Result<(), String> {
    let mut all_errors = Vec::new();

    for resource in resources {
        let Some(schema) = schemas.get(&resource.id.resource_type) else {
            all_errors.push(format!(
                "{}: unknown resource type {}",
                resource.id, resource.id.resource_type
            ));
            continue;
        };

        let mut unknown: Vec<&String> = resource
            .attributes
            .keys()
            .filter(|k| !schema.attributes.contains_key(*k))
            .collect();
        unknown.sort();
        for name in unknown {
            all_errors.push(format!("{}: unknown attribute '{}'", resource.id, name));
        }

        if let Err(errors) = schema.validate(&resource.attributes) {
            for error in errors {
                all_errors.push(format!("{}: {}", resource.id, error));
            }
        }
    }

    if all_errors.is_empty() {
        Ok(())
    } else {
        Err(all_errors.join("\n"))
    }
}

/// Read every recorded resource from the live infrastructure
async fn read_recorded(
    provider: &dyn Provider,
    file: &StateFile,
) -> Result<HashMap<ResourceId, State>, String> {
    let mut states = HashMap::new();
    for (id, recorded) in file.states() {
        let state = provider
            .read(&recorded)
            .await
            .map_err(|e| format!("Failed to read state: {}", e))?;
        if !state.exists {
            info!("{} no longer exists", id);
        }
        states.insert(id, state);
    }
    Ok(states)
}

async fn load_state(backend: &dyn StateBackend) -> Result<StateFile, String> {
    backend
        .read_state()
        .await
        .map(Option::unwrap_or_default)
        .map_err(|e| format!("Failed to read state: {}", e))
}

async fn persist(backend: &dyn StateBackend, file: &mut StateFile) -> Result<(), String> {
    file.increment_serial();
    backend
        .write_state(file)
        .await
        .map_err(|e| format!("Failed to write state: {}", e))
}

/// The state lock held by a running command
struct Lease<'a> {
    backend: &'a dyn StateBackend,
    lock: LockInfo,
}

impl<'a> Lease<'a> {
    async fn acquire(backend: &'a dyn StateBackend, operation: &str) -> Result<Self, String> {
        let lock = backend
            .acquire_lock(operation)
            .await
            .map_err(|e| e.to_string())?;
        Ok(Self { backend, lock })
    }

    /// Keep the lock alive for the next `timeout_secs` seconds
    async fn renew(&mut self, timeout_secs: i64) -> Result<(), String> {
        self.lock = self
            .backend
            .extend_lock(&self.lock, timeout_secs)
            .await
            .map_err(|e| format!("Failed to renew lock: {}", e))?;
        debug!("Lock {} held until {}", self.lock.id, self.lock.expires);
        Ok(())
    }

    /// Release the lock; a release failure only surfaces if `result` is Ok
    async fn release<T>(self, result: Result<T, String>) -> Result<T, String> {
        if let Err(e) = self.backend.release_lock(&self.lock).await {
            warn!("Failed to release lock {}: {}", self.lock.id, e);
            if result.is_ok() {
                return Err(format!("Failed to release lock: {}", e));
            }
        }
        result
    }
}

/// Lock lifetime for one step, long enough to cover its capacity wait
fn step_lease_secs(resource: Option<&Resource>) -> i64 {
    let wait = resource
        .and_then(|r| r.attributes.get(ATTR_WAIT_TIMEOUT))
        .and_then(|v| match v {
            Value::String(s) => parse_non_negative_duration(s).ok(),
            _ => None,
        })
        .unwrap_or(DEFAULT_WAIT_TIMEOUT);
    let wait_secs = i64::try_from(wait.as_secs()).unwrap_or(i64::MAX);
    DEFAULT_LOCK_TIMEOUT_SECS.saturating_add(wait_secs)
}

/// Compute the changes needed to reach the declared resources
pub async fn plan(
    provider: &dyn Provider,
    backend: &dyn StateBackend,
    resources: &[Resource],
    cancel: &CancellationToken,
) -> Result<Vec<Diff>, String> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err("Interrupted".to_string()),
        plan = plan_changes(provider, backend, resources) => plan,
    }
}

async fn plan_changes(
    provider: &dyn Provider,
    backend: &dyn StateBackend,
    resources: &[Resource],
) -> Result<Vec<Diff>, String> {
    let file = load_state(backend).await?;
    let current = read_recorded(provider, &file).await?;
    Ok(create_plan(
        resources,
        &current,
        &schemas(&provider.resource_types()),
    ))
}

pub fn print_plan(plan: &[Diff]) {
    if plan.is_empty() {
        println!("{}", "No changes. Infrastructure is up-to-date.".green());
        return;
    }

    println!("{}", "Execution Plan:".cyan().bold());
    println!();
    for diff in plan {
        println!("  {}", format_diff(diff));
        if let Diff::Replace {
            changed_attributes,
            from,
            ..
        } = diff
        {
            if from.tainted {
                println!("      {}", "(tainted)".yellow());
            }
            for name in changed_attributes {
                println!("      {} {}", "~".yellow(), name);
            }
        }
    }

    let count = |f: fn(&Diff) -> bool| plan.iter().filter(|d| f(d)).count();
    println!();
    println!(
        "Plan: {} to add, {} to replace, {} to destroy.",
        count(|d| matches!(d, Diff::Create(_))).to_string().green(),
        count(|d| matches!(d, Diff::Replace { .. })).to_string().yellow(),
        count(|d| matches!(d, Diff::Delete(_))).to_string().red(),
    );
}

fn format_diff(diff: &Diff) -> String {
    match diff {
        Diff::Create(r) => format!("{} {}", "+".green().bold(), r.id),
        Diff::Replace { to, .. } => format!("{} {}", "-/+".yellow().bold(), to.id),
        Diff::Delete(s) => format!("{} {}", "-".red().bold(), s.id),
        Diff::NoChange(id) => format!("  {}", id),
    }
}

/// Record the outcome of a create, keeping partial state from a failure
fn record_create(
    file: &mut StateFile,
    provider: &str,
    result: ProviderResult<State>,
) -> ProviderResult<()> {
    match result {
        Ok(state) => {
            file.record(&state, provider);
            Ok(())
        }
        Err(e) => {
            if let Some(partial) = &e.partial_state {
                file.record(partial, provider);
            }
            Err(e)
        }
    }
}

/// Execute the plan; state is written after every step
///
/// Once `cancel` fires no further create or delete is started. The lock is
/// renewed before each step.
pub async fn apply(
    provider: &dyn Provider,
    backend: &dyn StateBackend,
    resources: &[Resource],
    cancel: &CancellationToken,
) -> Result<Outcome, String> {
    let mut lease = Lease::acquire(backend, "apply").await?;
    let result = apply_locked(provider, &mut lease, resources, cancel).await;
    lease.release(result).await
}

async fn apply_locked(
    provider: &dyn Provider,
    lease: &mut Lease<'_>,
    resources: &[Resource],
    cancel: &CancellationToken,
) -> Result<Outcome, String> {
    let backend = lease.backend;
    let mut file = load_state(backend).await?;
    let current = read_recorded(provider, &file).await?;
    for state in current.values() {
        file.record(state, provider.name());
    }
    if current.values().any(|s| !s.exists) {
        persist(backend, &mut file).await?;
    }

    let plan = create_plan(
        resources,
        &current,
        &schemas(&provider.resource_types()),
    );
    print_plan(&plan);
    if plan.is_empty() {
        return Ok(Outcome::default());
    }

    println!();
    println!("{}", "Applying changes...".cyan().bold());
    println!();

    let mut outcome = Outcome::default();
    for diff in &plan {
        let desired = match diff {
            Diff::NoChange(_) => continue,
            Diff::Create(resource) | Diff::Replace { to: resource, .. } => Some(resource),
            Diff::Delete(_) => None,
        };
        if cancel.is_cancelled() {
            println!("  {} {} (interrupted)", "-".yellow(), format_diff(diff));
            outcome.skipped += 1;
            continue;
        }
        lease.renew(step_lease_secs(desired)).await?;

        let result = match diff {
            Diff::NoChange(_) => continue,
            Diff::Create(resource) => {
                let created = provider.create(resource).await;
                record_create(&mut file, provider.name(), created)
            }
            Diff::Replace { from, to, .. } => match provider.delete(from).await {
                Ok(()) => {
                    file.remove_resource(&from.id);
                    persist(backend, &mut file).await?;
                    if cancel.is_cancelled() {
                        Err(ProviderError::new("Interrupted before the replacement was created")
                            .for_resource(to.id.clone()))
                    } else {
                        let created = provider.create(to).await;
                        record_create(&mut file, provider.name(), created)
                    }
                }
                Err(e) => Err(e),
            },
            Diff::Delete(state) => provider
                .delete(state)
                .await
                .map(|()| {
                    file.remove_resource(&state.id);
                }),
        };
        persist(backend, &mut file).await?;

        match result {
            Ok(()) => {
                println!("  {} {}", "✓".green(), format_diff(diff));
                outcome.succeeded += 1;
            }
            Err(e) => {
                println!("  {} {} - {}", "✗".red(), format_diff(diff), e);
                outcome.failed += 1;
            }
        }
    }

    println!();
    if outcome.skipped > 0 {
        println!(
            "{}",
            format!(
                "Apply interrupted. {} succeeded, {} failed, {} not started.",
                outcome.succeeded, outcome.failed, outcome.skipped
            )
            .yellow()
            .bold()
        );
    } else if outcome.failed == 0 {
        println!(
            "{}",
            format!("Apply complete! {} changes applied.", outcome.succeeded)
                .green()
                .bold()
        );
    } else {
        println!(
            "{}",
            format!(
                "Apply failed. {} succeeded, {} failed.",
                outcome.succeeded, outcome.failed
            )
            .red()
            .bold()
        );
    }
    Ok(outcome)
}

/// Drop records whose resources no longer exist; returns how many were dropped
pub async fn refresh(provider: &dyn Provider, backend: &dyn StateBackend) -> Result<usize, String> {
    let lease = Lease::acquire(backend, "refresh").await?;
    let result = refresh_locked(provider, backend).await;
    lease.release(result).await
}

async fn refresh_locked(
    provider: &dyn Provider,
    backend: &dyn StateBackend,
) -> Result<usize, String> {
    let Some(mut file) = backend
        .read_state()
        .await
        .map_err(|e| format!("Failed to read state: {}", e))?
    else {
        println!("{}", "No state to refresh.".green());
        return Ok(0);
    };

    let current = read_recorded(provider, &file).await?;
    let mut dropped = 0;
    for state in current.values() {
        if !state.exists {
            println!("  {} {} (gone)", "-".red().bold(), state.id);
            dropped += 1;
        }
        file.record(state, provider.name());
    }
    persist(backend, &mut file).await?;

    println!(
        "{}",
        format!(
            "Refresh complete! {} recorded, {} dropped.",
            file.resources.len(),
            dropped
        )
        .green()
        .bold()
    );
    Ok(dropped)
}

/// Delete every recorded resource
///
/// Without `auto_approve` the user must type `yes` first. Once `cancel`
/// fires no further delete is started.
pub async fn destroy(
    provider: &dyn Provider,
    backend: &dyn StateBackend,
    auto_approve: bool,
    cancel: &CancellationToken,
) -> Result<Outcome, String> {
    let mut lease = Lease::acquire(backend, "destroy").await?;
    let result = destroy_locked(provider, &mut lease, auto_approve, cancel).await;
    lease.release(result).await
}

async fn destroy_locked(
    provider: &dyn Provider,
    lease: &mut Lease<'_>,
    auto_approve: bool,
    cancel: &CancellationToken,
) -> Result<Outcome, String> {
    let backend = lease.backend;
    let mut file = load_state(backend).await?;
    let current = read_recorded(provider, &file).await?;
    for state in current.values() {
        file.record(state, provider.name());
    }

    let mut targets: Vec<&State> = current.values().filter(|s| s.exists).collect();
    targets.sort_by(|a, b| a.id.name.cmp(&b.id.name));

    if targets.is_empty() {
        persist(backend, &mut file).await?;
        println!("{}", "No resources to destroy.".green());
        return Ok(Outcome::default());
    }

    println!("{}", "Destroy Plan:".red().bold());
    println!();
    for state in &targets {
        println!("  {} {}", "-".red().bold(), state.id);
    }
    println!();
    println!("Plan: {} to destroy.", targets.len().to_string().red());
    println!();

    if !auto_approve {
        // The prompt blocks on stdin, so it runs off the runtime and races Ctrl-C
        let confirmed = tokio::select! {
            _ = cancel.cancelled() => return Err("Interrupted".to_string()),
            answer = tokio::task::spawn_blocking(confirm_destroy) => {
                answer.map_err(|e| e.to_string())??
            }
        };
        if !confirmed {
            println!();
            println!("{}", "Destroy cancelled.".yellow());
            return Ok(Outcome::default());
        }
    }

    println!("{}", "Destroying resources...".red().bold());
    println!();

    let mut outcome = Outcome::default();
    for state in targets {
        if cancel.is_cancelled() {
            println!("  {} {} (interrupted)", "-".yellow(), state.id);
            outcome.skipped += 1;
            continue;
        }
        lease.renew(step_lease_secs(None)).await?;

        match provider.delete(state).await {
            Ok(()) => {
                file.remove_resource(&state.id);
                persist(backend, &mut file).await?;
                println!("  {} {} {}", "✓".green(), "-".red().bold(), state.id);
                outcome.succeeded += 1;
            }
            Err(e) => {
                println!("  {} {} {} - {}", "✗".red(), "-".red().bold(), state.id, e);
                outcome.failed += 1;
            }
        }
    }

    println!();
    if outcome.skipped > 0 {
        println!(
            "{}",
            format!(
                "Destroy interrupted. {} succeeded, {} failed, {} not started.",
                outcome.succeeded, outcome.failed, outcome.skipped
            )
            .yellow()
            .bold()
        );
    } else if outcome.failed == 0 {
        println!(
            "{}",
            format!("Destroy complete! {} resources destroyed.", outcome.succeeded)
                .green()
                .bold()
        );
    } else {
        println!(
            "{}",
            format!(
                "Destroy failed. {} succeeded, {} failed.",
                outcome.succeeded, outcome.failed
            )
            .red()
            .bold()
        );
    }
    Ok(outcome)
}

fn confirm_destroy() -> Result<bool, String> {
    println!(
        "{}",
        "Do you really want to destroy all attachments?".yellow().bold()
    );
    println!(
        "  {}",
        "This action cannot be undone. Type 'yes' to confirm.".yellow()
    );
    print!("\n  Enter a value: ");
    std::io::stdout().flush().map_err(|e| e.to_string())?;

    let mut input = String::new();
    std::io::stdin()
        .read_line(&mut input)
        .map_err(|e| e.to_string())?;
    Ok(input.trim() == "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mooring_core::provider::BoxFuture;
    use mooring_core::schema::{AttributeSchema, AttributeType};
    use mooring_state::{BackendResult, LocalBackend};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct AttachmentType;

    impl ResourceType for AttachmentType {
        fn name(&self) -> &'static str {
            "autoscaling_attachment"
        }

        fn schema(&self) -> ResourceSchema {
            ResourceSchema::new("autoscaling_attachment")
                .attribute(
                    AttributeSchema::new("autoscaling_group_name", AttributeType::String)
                        .required()
                        .force_new(),
                )
                .attribute(AttributeSchema::new("elb", AttributeType::String).force_new())
                .attribute(
                    AttributeSchema::new("wait_for_capacity_timeout", AttributeType::String)
                        .force_new(),
                )
        }
    }

    /// Provider whose live resources are identifiers in a set
    #[derive(Default)]
    struct FakeProvider {
        live: Mutex<HashSet<String>>,
        calls: Mutex<Vec<String>>,
        fail_create_with_partial: Mutex<bool>,
        fail_delete: Mutex<bool>,
        /// Fired from inside `delete`, as a Ctrl-C during a detach would
        cancel_on_delete: Mutex<Option<CancellationToken>>,
    }

    impl FakeProvider {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Provider for FakeProvider {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
            vec![Box::new(AttachmentType)]
        }

        fn read(&self, state: &State) -> BoxFuture<'_, ProviderResult<State>> {
            let state = state.clone();
            Box::pin(async move {
                let live = state
                    .identifier
                    .as_ref()
                    .is_some_and(|id| self.live.lock().unwrap().contains(id));
                if live {
                    Ok(state)
                } else {
                    Ok(State::not_found(state.id))
                }
            })
        }

        fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
            let resource = resource.clone();
            Box::pin(async move {
                self.calls
                    .lock()
                    .unwrap()
                    .push(format!("create {}", resource.id.name));
                let identifier = format!("{}-id", resource.id.name);
                self.live.lock().unwrap().insert(identifier.clone());
                let state = State::existing(resource.id.clone(), resource.attributes)
                    .with_identifier(identifier);
                if *self.fail_create_with_partial.lock().unwrap() {
                    return Err(ProviderError::new("timeout waiting for capacity")
                        .for_resource(resource.id)
                        .with_partial_state(state.with_tainted(true)));
                }
                Ok(state)
            })
        }

        fn delete(&self, state: &State) -> BoxFuture<'_, ProviderResult<()>> {
            let state = state.clone();
            Box::pin(async move {
                self.calls
                    .lock()
                    .unwrap()
                    .push(format!("delete {}", state.id.name));
                if let Some(cancel) = self.cancel_on_delete.lock().unwrap().as_ref() {
                    cancel.cancel();
                }
                if *self.fail_delete.lock().unwrap() {
                    return Err(ProviderError::new("detach failed").for_resource(state.id));
                }
                if let Some(id) = &state.identifier {
                    self.live.lock().unwrap().remove(id);
                }
                Ok(())
            })
        }
    }

    /// Local backend that records every lock renewal
    struct RenewalLog {
        inner: LocalBackend,
        renewals: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl StateBackend for RenewalLog {
        async fn read_state(&self) -> BackendResult<Option<StateFile>> {
            self.inner.read_state().await
        }

        async fn write_state(&self, state: &StateFile) -> BackendResult<()> {
            self.inner.write_state(state).await
        }

        async fn acquire_lock(&self, operation: &str) -> BackendResult<LockInfo> {
            self.inner.acquire_lock(operation).await
        }

        async fn extend_lock(&self, lock: &LockInfo, timeout_secs: i64) -> BackendResult<LockInfo> {
            self.renewals.lock().unwrap().push(timeout_secs);
            self.inner.extend_lock(lock, timeout_secs).await
        }

        async fn release_lock(&self, lock: &LockInfo) -> BackendResult<()> {
            self.inner.release_lock(lock).await
        }

        async fn force_unlock(&self, lock_id: &str) -> BackendResult<()> {
            self.inner.force_unlock(lock_id).await
        }
    }

    fn attachment(name: &str, elb: &str) -> Resource {
        Resource::new("autoscaling_attachment", name)
            .with_attribute(
                "autoscaling_group_name",
                Value::String("web-asg".to_string()),
            )
            .with_attribute("elb", Value::String(elb.to_string()))
    }

    #[test]
    fn test_validate_reports_every_error() {
        let schemas = schemas(&[Box::new(AttachmentType) as Box<dyn ResourceType>]);
        let resources = vec![
            attachment("ok", "web"),
            Resource::new("autoscaling_attachment", "bad")
                .with_attribute("elbs", Value::String("web".to_string())),
        ];

        let err = validate_resources(&resources, &schemas).unwrap_err();
        assert!(err.contains("autoscaling_attachment.bad: unknown attribute 'elbs'"));
        assert!(err.contains("autoscaling_attachment.bad: Required attribute 'autoscaling_group_name' is missing"));
        assert!(!err.contains("autoscaling_attachment.ok"));
    }

    #[tokio::test]
    async fn test_apply_creates_then_is_idempotent() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("state.json"));
        let provider = FakeProvider::default();
        let resources = vec![attachment("web", "web-elb")];

        let outcome = apply(&provider, &backend, &resources, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, Outcome { succeeded: 1, failed: 0, skipped: 0 });

        let file = backend.read_state().await.unwrap().unwrap();
        assert_eq!(file.resources.len(), 1);
        assert_eq!(file.resources[0].identifier.as_deref(), Some("web-id"));

        let planned = plan(&provider, &backend, &resources, &CancellationToken::new())
            .await
            .unwrap();
        assert!(planned.is_empty());
        assert!(!backend.lock_path().exists());
    }

    #[tokio::test]
    async fn test_changed_attribute_replaces() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("state.json"));
        let provider = FakeProvider::default();

        apply(&provider, &backend, &[attachment("web", "old-elb")], &CancellationToken::new())
            .await
            .unwrap();
        let resources = vec![attachment("web", "new-elb")];

        let planned = plan(&provider, &backend, &resources, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            &planned[..],
            [Diff::Replace { changed_attributes, .. }] if changed_attributes == &vec!["elb".to_string()]
        ));

        apply(&provider, &backend, &resources, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            provider.calls(),
            vec!["create web", "delete web", "create web"]
        );
        let file = backend.read_state().await.unwrap().unwrap();
        assert_eq!(
            file.resources[0].attributes.get("elb"),
            Some(&serde_json::json!("new-elb"))
        );
    }

    #[tokio::test]
    async fn test_partial_create_is_recorded_tainted_and_replaced_next_time() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("state.json"));
        let provider = FakeProvider::default();
        *provider.fail_create_with_partial.lock().unwrap() = true;
        let resources = vec![attachment("web", "web-elb")];

        let outcome = apply(&provider, &backend, &resources, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.failed, 1);
        let file = backend.read_state().await.unwrap().unwrap();
        assert!(file.resources[0].tainted);

        *provider.fail_create_with_partial.lock().unwrap() = false;
        let planned = plan(&provider, &backend, &resources, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(&planned[..], [Diff::Replace { .. }]));

        apply(&provider, &backend, &resources, &CancellationToken::new())
            .await
            .unwrap();
        let file = backend.read_state().await.unwrap().unwrap();
        assert!(!file.resources[0].tainted);
    }

    #[tokio::test]
    async fn test_undeclared_records_are_deleted() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("state.json"));
        let provider = FakeProvider::default();

        let both = [attachment("web", "a"), attachment("api", "b")];
        apply(&provider, &backend, &both, &CancellationToken::new())
            .await
            .unwrap();
        apply(&provider, &backend, &[attachment("web", "a")], &CancellationToken::new())
            .await
            .unwrap();

        let file = backend.read_state().await.unwrap().unwrap();
        assert_eq!(file.resources.len(), 1);
        assert_eq!(file.resources[0].name, "web");
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_the_record() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("state.json"));
        let provider = FakeProvider::default();
        apply(&provider, &backend, &[attachment("web", "a")], &CancellationToken::new())
            .await
            .unwrap();

        *provider.fail_delete.lock().unwrap() = true;
        let outcome = destroy(&provider, &backend, true, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.failed, 1);
        assert_eq!(backend.read_state().await.unwrap().unwrap().resources.len(), 1);

        *provider.fail_delete.lock().unwrap() = false;
        let outcome = destroy(&provider, &backend, true, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.succeeded, 1);
        assert!(backend.read_state().await.unwrap().unwrap().resources.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_drops_vanished_records() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("state.json"));
        let provider = FakeProvider::default();
        let both = [attachment("web", "a"), attachment("api", "b")];
        apply(&provider, &backend, &both, &CancellationToken::new())
            .await
            .unwrap();

        provider.live.lock().unwrap().remove("api-id");
        assert_eq!(refresh(&provider, &backend).await.unwrap(), 1);

        let file = backend.read_state().await.unwrap().unwrap();
        assert_eq!(file.resources.len(), 1);
        assert_eq!(file.resources[0].name, "web");
    }

    #[tokio::test]
    async fn test_apply_refuses_a_held_lock() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("state.json"));
        let provider = FakeProvider::default();
        let lock = backend.acquire_lock("apply").await.unwrap();

        let err = apply(&provider, &backend, &[attachment("web", "a")], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.contains(&lock.id));
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_apply_starts_nothing_new() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("state.json"));
        let provider = FakeProvider::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = apply(
            &provider,
            &backend,
            &[attachment("web", "a"), attachment("api", "b")],
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(outcome, Outcome { succeeded: 0, failed: 0, skipped: 2 });
        assert!(provider.calls().is_empty());
        assert!(!backend.lock_path().exists());
    }

    #[tokio::test]
    async fn test_interrupted_replace_does_not_create() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("state.json"));
        let provider = FakeProvider::default();
        apply(&provider, &backend, &[attachment("web", "old-elb")], &CancellationToken::new())
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        *provider.cancel_on_delete.lock().unwrap() = Some(cancel.clone());
        let outcome = apply(&provider, &backend, &[attachment("web", "new-elb")], &cancel)
            .await
            .unwrap();

        assert_eq!(outcome.failed, 1);
        assert_eq!(provider.calls(), vec!["create web", "delete web"]);
        assert!(backend.read_state().await.unwrap().unwrap().resources.is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_destroy_stops_between_deletes() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("state.json"));
        let provider = FakeProvider::default();
        apply(
            &provider,
            &backend,
            &[attachment("api", "a"), attachment("web", "b")],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let cancel = CancellationToken::new();
        *provider.cancel_on_delete.lock().unwrap() = Some(cancel.clone());
        let outcome = destroy(&provider, &backend, true, &cancel).await.unwrap();

        assert_eq!(outcome, Outcome { succeeded: 1, failed: 0, skipped: 1 });
        let file = backend.read_state().await.unwrap().unwrap();
        assert_eq!(file.resources.len(), 1);
        assert_eq!(file.resources[0].name, "web");
    }

    #[tokio::test]
    async fn test_interrupted_plan_returns_an_error() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("state.json"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = plan(&FakeProvider::default(), &backend, &[attachment("web", "a")], &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, "Interrupted");
    }

    #[tokio::test]
    async fn test_lock_is_renewed_for_each_step() {
        let dir = tempdir().unwrap();
        let backend = RenewalLog {
            inner: LocalBackend::with_path(dir.path().join("state.json")),
            renewals: Mutex::new(Vec::new()),
        };
        let provider = FakeProvider::default();
        let long_wait = attachment("api", "a").with_attribute(
            "wait_for_capacity_timeout",
            Value::String("1h".to_string()),
        );

        apply(
            &provider,
            &backend,
            &[long_wait, attachment("web", "b")],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        // api waits up to an hour; web uses the ten minute default
        assert_eq!(
            *backend.renewals.lock().unwrap(),
            vec![DEFAULT_LOCK_TIMEOUT_SECS + 3600, DEFAULT_LOCK_TIMEOUT_SECS + 600]
        );
        assert!(!backend.inner.lock_path().exists());
    }

    #[tokio::test]
    async fn test_renewal_fails_once_the_lock_is_taken_over() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("state.json"));
        let mut lease = Lease::acquire(&backend, "apply").await.unwrap();
        backend.force_unlock(&lease.lock.id).await.unwrap();
        let other = backend.acquire_lock("destroy").await.unwrap();

        let err = lease.renew(DEFAULT_LOCK_TIMEOUT_SECS).await.unwrap_err();
        assert!(err.starts_with("Failed to renew lock"), "{}", err);
        let err = lease.release(Ok::<(), String>(())).await.unwrap_err();
        assert!(err.starts_with("Failed to release lock"), "{}", err);
        backend.release_lock(&other).await.unwrap();
    }
}
