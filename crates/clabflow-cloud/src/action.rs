//! Planned mutations of control-plane resources

use clabflow_core::ResourceId;
use serde::{Deserialize, Serialize};

/// A planned action on one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub resource: ResourceId,
    pub action_type: ActionType,
    /// Human-readable reason
    pub description: String,
}

impl Action {
    pub fn new(resource: ResourceId, action_type: ActionType, description: impl Into<String>) -> Self {
        Self {
            resource,
            action_type,
            description: description.into(),
        }
    }

    pub fn is_mutation(&self) -> bool {
        self.action_type != ActionType::NoOp
    }
}

/// Type of action to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Create,
    Update,
    Delete,
    NoOp,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Update => write!(f, "update"),
            ActionType::Delete => write!(f, "delete"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// Ordered list of actions
///
/// Order is the apply order: creates/updates by ascending kind (shared
/// resources, nodes, links), then deletes by descending kind. No-ops are
/// kept for reporting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub actions: Vec<Action>,
    pub has_changes: bool,
}

impl Plan {
    pub fn new(actions: Vec<Action>) -> Self {
        let has_changes = actions.iter().any(Action::is_mutation);
        Self {
            actions,
            has_changes,
        }
    }

    pub fn actions_by_type(&self, action_type: ActionType) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .collect()
    }

    /// Whether the plan creates or updates anything (and so needs the fabric)
    pub fn writes(&self) -> bool {
        self.actions
            .iter()
            .any(|a| matches!(a.action_type, ActionType::Create | ActionType::Update))
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.actions_by_type(ActionType::Create).len(),
            update: self.actions_by_type(ActionType::Update).len(),
            delete: self.actions_by_type(ActionType::Delete).len(),
            no_change: self.actions_by_type(ActionType::NoOp).len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub no_change: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to delete, {} unchanged",
            self.create, self.update, self.delete, self.no_change
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clabflow_core::ResourceKind;

    fn action(kind: ResourceKind, name: &str, t: ActionType) -> Action {
        Action::new(ResourceId::new(kind, name), t, "")
    }

    #[test]
    fn test_plan_summary() {
        let plan = Plan::new(vec![
            action(ResourceKind::Node, "a", ActionType::Create),
            action(ResourceKind::Node, "b", ActionType::NoOp),
            action(ResourceKind::Link, "c", ActionType::Update),
            action(ResourceKind::Link, "d", ActionType::Delete),
        ]);
        assert!(plan.has_changes);
        assert!(plan.writes());
        assert_eq!(
            plan.summary().to_string(),
            "1 to create, 1 to update, 1 to delete, 1 unchanged"
        );
    }

    #[test]
    fn test_noop_plan_has_no_changes() {
        let plan = Plan::new(vec![action(ResourceKind::Node, "a", ActionType::NoOp)]);
        assert!(!plan.has_changes);
        assert!(!plan.writes());
        assert!(!Plan::default().has_changes);
    }

    #[test]
    fn test_delete_only_plan_does_not_write() {
        let plan = Plan::new(vec![action(ResourceKind::Link, "a", ActionType::Delete)]);
        assert!(plan.has_changes);
        assert!(!plan.writes());
    }
}
