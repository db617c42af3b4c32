use serde::Serialize;
use serde_json::{Map, Value};

use super::schema::{PlanModifier, Schema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanAction {
    Create,
    Update,
    Replace,
    Delete,
    NoOp,
}

/// Outcome of planning a resource change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedChange {
    pub action: PlanAction,
    /// State the resource is expected to have after apply. `Null` marks
    /// values that stay unknown until apply, and a deleted resource.
    pub planned_state: Value,
    /// Attributes whose change forces replacement, in schema order
    pub requires_replace: Vec<String>,
}

impl PlannedChange {
    /// Set a computed attribute on the planned state
    pub fn set(&mut self, name: &str, value: Value) {
        if let Value::Object(map) = &mut self.planned_state {
            map.insert(name.to_string(), value);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.planned_state.get(name)
    }
}

fn attr<'a>(state: Option<&'a Value>, name: &str) -> &'a Value {
    state.and_then(|s| s.get(name)).unwrap_or(&Value::Null)
}

/// Compute the change from `prior` to `proposed` for a resource schema
///
/// `prior` is `None` for a resource that does not exist yet, `proposed` is
/// `None` when the resource was removed from configuration.
pub fn plan_resource(
    schema: &Schema,
    prior: Option<&Value>,
    proposed: Option<&Value>,
) -> PlannedChange {
    if proposed.is_none() {
        return PlannedChange {
            action: if prior.is_some() {
                PlanAction::Delete
            } else {
                PlanAction::NoOp
            },
            planned_state: Value::Null,
            requires_replace: Vec::new(),
        };
    }

    let mut planned = Map::new();
    let mut requires_replace = Vec::new();
    let mut changed = false;

    for (name, attribute) in &schema.attributes {
        let proposed_value = attr(proposed, name);
        let prior_value = attr(prior, name);

        if attribute.is_configurable() && !proposed_value.is_null() {
            if prior.is_some() && proposed_value != prior_value {
                changed = true;
                if attribute.has_modifier(PlanModifier::RequiresReplace) {
                    requires_replace.push(name.clone());
                }
            }
            planned.insert(name.clone(), proposed_value.clone());
            continue;
        }

        if attribute.is_configurable() && !attribute.computed {
            // Optional attribute left unset
            if prior.is_some() && !prior_value.is_null() {
                changed = true;
                if attribute.has_modifier(PlanModifier::RequiresReplace) {
                    requires_replace.push(name.clone());
                }
            }
            planned.insert(name.clone(), Value::Null);
            continue;
        }

        // Computed: unknown until apply unless the prior value can be carried over
        planned.insert(name.clone(), Value::Null);
        if attribute.has_modifier(PlanModifier::UseStateForUnknown) {
            planned.insert(name.clone(), prior_value.clone());
        }
    }

    let action = match prior {
        None => PlanAction::Create,
        Some(_) if !requires_replace.is_empty() => PlanAction::Replace,
        Some(_) if changed => PlanAction::Update,
        Some(_) => PlanAction::NoOp,
    };

    if action == PlanAction::Replace {
        // The replacement is a new object, prior computed values do not carry over
        for (name, attribute) in &schema.attributes {
            if attribute.computed && !attribute.is_configurable() {
                planned.insert(name.clone(), Value::Null);
            }
        }
    }

    PlannedChange {
        action,
        planned_state: Value::Object(planned),
        requires_replace,
    }
}
