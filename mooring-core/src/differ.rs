//! Differ - Compare desired state with current state
//!
//! Resources here have no in-place update: a change to any ForceNew attribute
//! (or a tainted state) replaces the resource, changes to other attributes
//! are ignored.

use std::collections::{HashMap, HashSet};

use crate::resource::{Resource, ResourceId, State};
use crate::schema::ResourceSchema;

/// Result of a diff operation
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// Resource does not exist -> needs creation
    Create(Resource),
    /// Resource exists but a ForceNew attribute changed -> delete then create
    Replace {
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Resource exists with no relevant differences
    NoChange(ResourceId),
    /// Resource is recorded but no longer declared -> needs deletion
    Delete(State),
}

impl Diff {
    /// Returns whether this Diff involves a change
    pub fn is_change(&self) -> bool {
        !matches!(self, Diff::NoChange(_))
    }

    pub fn id(&self) -> &ResourceId {
        match self {
            Diff::Create(resource) => &resource.id,
            Diff::Replace { to, .. } => &to.id,
            Diff::NoChange(id) => id,
            Diff::Delete(state) => &state.id,
        }
    }
}

/// Compare desired state with current state to compute a Diff
///
/// Schema defaults are applied to the desired attributes before comparing.
pub fn diff(desired: &Resource, current: &State, schema: &ResourceSchema) -> Diff {
    if !current.exists {
        return Diff::Create(desired.clone());
    }

    let desired_attrs = schema.with_defaults(&desired.attributes);
    let changed: Vec<String> = schema
        .force_new_attributes()
        .into_iter()
        .filter(|name| desired_attrs.get(*name) != current.attributes.get(*name))
        .map(str::to_string)
        .collect();

    if changed.is_empty() && !current.tainted {
        Diff::NoChange(desired.id.clone())
    } else {
        Diff::Replace {
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changed,
        }
    }
}

/// Compute Diffs for every declared resource, plus deletions for recorded
/// states that are no longer declared
///
/// Resources whose type has no schema are skipped.
pub fn create_plan(
    desired: &[Resource],
    current_states: &HashMap<ResourceId, State>,
    schemas: &HashMap<String, ResourceSchema>,
) -> Vec<Diff> {
    let mut plan = Vec::new();

    for resource in desired {
        let Some(schema) = schemas.get(&resource.id.resource_type) else {
            continue;
        };
        let current = current_states
            .get(&resource.id)
            .cloned()
            .unwrap_or_else(|| State::not_found(resource.id.clone()));

        let d = diff(resource, &current, schema);
        if d.is_change() {
            plan.push(d);
        }
    }

    let declared: HashSet<&ResourceId> = desired.iter().map(|r| &r.id).collect();
    let mut orphans: Vec<&State> = current_states
        .values()
        .filter(|s| s.exists && !declared.contains(&s.id))
        .collect();
    orphans.sort_by(|a, b| a.id.name.cmp(&b.id.name));
    plan.extend(orphans.into_iter().cloned().map(Diff::Delete));

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Value;
    use crate::schema::{AttributeSchema, AttributeType};

    fn schema() -> ResourceSchema {
        ResourceSchema::new("attachment")
            .attribute(
                AttributeSchema::new("group", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("elb", AttributeType::String).force_new())
            .attribute(
                AttributeSchema::new("timeout", AttributeType::String)
                    .force_new()
                    .with_default(Value::String("10m".to_string())),
            )
            .attribute(AttributeSchema::new("note", AttributeType::String))
    }

    fn desired() -> Resource {
        Resource::new("attachment", "web")
            .with_attribute("group", Value::String("asg".to_string()))
            .with_attribute("elb", Value::String("lb".to_string()))
    }

    fn recorded(elb: &str) -> State {
        let attrs = HashMap::from([
            ("group".to_string(), Value::String("asg".to_string())),
            ("elb".to_string(), Value::String(elb.to_string())),
            ("timeout".to_string(), Value::String("10m".to_string())),
        ]);
        State::existing(ResourceId::new("attachment", "web"), attrs).with_identifier("asg-1")
    }

    #[test]
    fn test_diff_create_when_not_exists() {
        let current = State::not_found(ResourceId::new("attachment", "web"));
        assert!(matches!(
            diff(&desired(), &current, &schema()),
            Diff::Create(_)
        ));
    }

    #[test]
    fn test_diff_no_change_applies_defaults() {
        let result = diff(&desired(), &recorded("lb"), &schema());
        assert!(matches!(result, Diff::NoChange(_)));
    }

    #[test]
    fn test_diff_replace_on_force_new_change() {
        let result = diff(&desired(), &recorded("old-lb"), &schema());
        match result {
            Diff::Replace {
                changed_attributes, ..
            } => assert_eq!(changed_attributes, vec!["elb".to_string()]),
            other => panic!("Expected Replace, got {:?}", other),
        }
    }

    #[test]
    fn test_diff_ignores_attributes_without_force_new() {
        let resource = desired().with_attribute("note", Value::String("hello".to_string()));
        let result = diff(&resource, &recorded("lb"), &schema());
        assert!(!result.is_change());
    }

    #[test]
    fn test_diff_replaces_tainted_state() {
        let result = diff(&desired(), &recorded("lb").with_tainted(true), &schema());
        assert!(matches!(result, Diff::Replace { .. }));
    }

    #[test]
    fn test_plan_deletes_undeclared_states() {
        let schemas = HashMap::from([("attachment".to_string(), schema())]);
        let orphan = State::existing(ResourceId::new("attachment", "old"), HashMap::new());
        let current = HashMap::from([
            (ResourceId::new("attachment", "web"), recorded("lb")),
            (orphan.id.clone(), orphan.clone()),
        ]);

        let plan = create_plan(&[desired()], &current, &schemas);
        assert_eq!(plan, vec![Diff::Delete(orphan)]);
    }
}
