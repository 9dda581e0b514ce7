//! Automation rule engine: condition/action runtime sitting on top of the
//! boolean expression interpreter in [`eval`]. The single piece of
//! user-programmable logic in the system.

pub mod eval;

use crate::device::DeviceCache;
use crate::error::{ErrorMiddleware, HearthError};
use crate::notifications::{Notification, NotificationCenter, Priority};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// How an automation's condition vector combines into one boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConditionLogic {
    And,
    Or,
    Custom,
}

/// One trigger descriptor. A closed set, same rationale as the event bus
/// topic registry: triggers are fired from known sources only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Trigger {
    /// Fires when `device_id`'s capability values change.
    DeviceChange { device_id: String },
    /// Fires on a schedule, `hhmm` minutes since midnight.
    Schedule { minute_of_day: u16 },
    /// Fires only when explicitly invoked by the user.
    Manual,
}

/// One condition: compare a context value against a literal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// Key resolved against the evaluation context.
    pub left_ref: String,
    /// Comparison operator name.
    pub operator: String,
    /// Literal (or `{min,max}`/list/pattern) right-hand side.
    pub right_value: Value,
}

/// One action, run in declared order when an automation fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Action {
    /// Write one device capability.
    SetCapability {
        device_id: String,
        capability: String,
        value: Value,
    },
    /// Trigger a scene/flow by id.
    RunScene { scene_id: String },
    /// Emit a notification record.
    Notify { title: String, message: String },
}

/// Cooldown/rate constraints gating re-execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraints {
    /// Minimum minutes between executions.
    pub cooldown_minutes: u32,
    /// Optional cap on executions per day.
    pub daily_limit: Option<u32>,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            cooldown_minutes: 0,
            daily_limit: None,
        }
    }
}

/// Execution/approval telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statistics {
    /// Number of times this automation has fired.
    pub execution_count: u64,
    /// Millis since epoch of the last successful execution.
    pub last_executed: Option<u64>,
    /// Millis since epoch of creation.
    pub created: u64,
    /// Times a human approved a learned suggestion.
    pub user_approvals: u32,
    /// Times a human rejected a learned suggestion.
    pub user_rejections: u32,
}

impl Statistics {
    fn new(now_millis: u64) -> Self {
        Self {
            execution_count: 0,
            last_executed: None,
            created: now_millis,
            user_approvals: 0,
            user_rejections: 0,
        }
    }
}

/// Lifecycle status. An automation is never deleted implicitly — only
/// `delete_automation` removes it; rejection just marks it inert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutomationStatus {
    Active,
    Rejected,
}

/// A user-defined (or learner-suggested) automation rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Automation {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    /// 1 (lowest) through 10 (highest).
    pub priority: u8,
    pub triggers: Vec<Trigger>,
    pub conditions: Vec<Condition>,
    pub condition_logic: ConditionLogic,
    /// Required and must parse under the closed grammar when
    /// `condition_logic == Custom`.
    pub custom_logic_expr: Option<String>,
    pub actions: Vec<Action>,
    pub constraints: Constraints,
    pub statistics: Statistics,
    pub status: AutomationStatus,
}

/// Input to `create_automation`; everything but `name` has a spec default.
#[derive(Debug, Clone, Default)]
pub struct AutomationSpec {
    pub name: String,
    pub enabled: Option<bool>,
    pub priority: Option<u8>,
    pub triggers: Option<Vec<Trigger>>,
    pub conditions: Option<Vec<Condition>>,
    pub condition_logic: Option<ConditionLogic>,
    pub custom_logic_expr: Option<String>,
    pub actions: Option<Vec<Action>>,
    pub constraints: Option<Constraints>,
}

/// Sparse patch applied by `update_automation`; `None` fields are untouched.
#[derive(Debug, Clone, Default)]
pub struct AutomationPatch {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub priority: Option<u8>,
    pub triggers: Option<Vec<Trigger>>,
    pub conditions: Option<Vec<Condition>>,
    pub condition_logic: Option<ConditionLogic>,
    pub custom_logic_expr: Option<String>,
    pub actions: Option<Vec<Action>>,
    pub constraints: Option<Constraints>,
}

/// Outcome of running one matching trigger through the engine.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub fired: bool,
    pub actions_run: usize,
    pub actions_failed: usize,
}

fn generate_id() -> String {
    format!("auto_{}", uuid::Uuid::new_v4().simple())
}

/// Compare a context value against a literal using one of the supported
/// operator names. Unknown operator names return `false`.
pub fn compare_values(left: &Value, operator: &str, right: &Value) -> bool {
    match operator {
        "equals" | "==" => left == right,
        "not_equals" | "!=" => left != right,
        "greater_than" | ">" => as_f64(left).zip(as_f64(right)).is_some_and(|(l, r)| l > r),
        "less_than" | "<" => as_f64(left).zip(as_f64(right)).is_some_and(|(l, r)| l < r),
        "gte" | ">=" => as_f64(left).zip(as_f64(right)).is_some_and(|(l, r)| l >= r),
        "lte" | "<=" => as_f64(left).zip(as_f64(right)).is_some_and(|(l, r)| l <= r),
        "between" => {
            let Some(obj) = right.as_object() else { return false };
            let (Some(min), Some(max)) = (obj.get("min").and_then(as_f64), obj.get("max").and_then(as_f64)) else {
                return false;
            };
            as_f64(left).is_some_and(|l| l >= min && l <= max)
        }
        "contains" => match (left.as_str(), right.as_str()) {
            (Some(l), Some(r)) => l.contains(r),
            _ => false,
        },
        "in" => match right.as_array() {
            Some(items) => items.contains(left),
            None => false,
        },
        "regex" => match (left.as_str(), right.as_str()) {
            (Some(l), Some(pattern)) => regex::Regex::new(pattern).is_ok_and(|re| re.is_match(l)),
            _ => false,
        },
        _ => false,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    v.as_f64()
}

/// In-process automation rule engine.
pub struct AutomationEngine {
    automations: DashMap<String, Automation>,
    devices: Option<Arc<DeviceCache>>,
    notifications: Arc<NotificationCenter>,
    errors: Arc<ErrorMiddleware>,
}

impl AutomationEngine {
    /// Construct an engine. `devices` is optional so the engine can run
    /// headless in tests that only exercise condition/constraint logic.
    pub fn new(
        devices: Option<Arc<DeviceCache>>,
        notifications: Arc<NotificationCenter>,
        errors: Arc<ErrorMiddleware>,
    ) -> Self {
        Self {
            automations: DashMap::new(),
            devices,
            notifications,
            errors,
        }
    }

    /// Create a new automation from `spec`, applying defaults and
    /// validating any custom logic expression against the closed grammar.
    pub fn create_automation(&self, spec: AutomationSpec, now_millis: u64) -> Result<Automation, HearthError> {
        let condition_logic = spec.condition_logic.unwrap_or(ConditionLogic::And);
        if condition_logic == ConditionLogic::Custom {
            let expr = spec
                .custom_logic_expr
                .as_deref()
                .ok_or_else(|| HearthError::Validation("CUSTOM condition logic requires custom_logic_expr".into()))?;
            eval::interpret_boolean_expression(expr)
                .map_err(|e| HearthError::Validation(format!("invalid custom_logic_expr: {e}")))?;
        }

        let automation = Automation {
            id: generate_id(),
            name: spec.name,
            enabled: spec.enabled.unwrap_or(true),
            priority: spec.priority.unwrap_or(5),
            triggers: spec.triggers.unwrap_or_default(),
            conditions: spec.conditions.unwrap_or_default(),
            condition_logic,
            custom_logic_expr: spec.custom_logic_expr,
            actions: spec.actions.unwrap_or_default(),
            constraints: spec.constraints.unwrap_or_default(),
            statistics: Statistics::new(now_millis),
            status: AutomationStatus::Active,
        };
        self.automations.insert(automation.id.clone(), automation.clone());
        Ok(automation)
    }

    /// Apply a sparse patch, re-validating any new custom expression.
    pub fn update_automation(&self, id: &str, patch: AutomationPatch) -> Result<Automation, HearthError> {
        let mut entry = self
            .automations
            .get_mut(id)
            .ok_or_else(|| HearthError::NotFound(format!("automation {id}")))?;

        if let Some(name) = patch.name {
            entry.name = name;
        }
        if let Some(enabled) = patch.enabled {
            entry.enabled = enabled;
        }
        if let Some(priority) = patch.priority {
            entry.priority = priority;
        }
        if let Some(triggers) = patch.triggers {
            entry.triggers = triggers;
        }
        if let Some(conditions) = patch.conditions {
            entry.conditions = conditions;
        }
        if let Some(logic) = patch.condition_logic {
            entry.condition_logic = logic;
        }
        if let Some(expr) = patch.custom_logic_expr {
            entry.custom_logic_expr = Some(expr);
        }
        if let Some(actions) = patch.actions {
            entry.actions = actions;
        }
        if let Some(constraints) = patch.constraints {
            entry.constraints = constraints;
        }

        if entry.condition_logic == ConditionLogic::Custom {
            let expr = entry
                .custom_logic_expr
                .as_deref()
                .ok_or_else(|| HearthError::Validation("CUSTOM condition logic requires custom_logic_expr".into()))?;
            eval::interpret_boolean_expression(expr)
                .map_err(|e| HearthError::Validation(format!("invalid custom_logic_expr: {e}")))?;
        }

        Ok(entry.clone())
    }

    /// Remove an automation permanently. Fails if unknown.
    pub fn delete_automation(&self, id: &str) -> Result<(), HearthError> {
        self.automations
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| HearthError::NotFound(format!("automation {id}")))
    }

    /// Fetch one automation.
    pub fn get_automation(&self, id: &str) -> Result<Automation, HearthError> {
        self.automations
            .get(id)
            .map(|e| e.clone())
            .ok_or_else(|| HearthError::NotFound(format!("automation {id}")))
    }

    /// List every automation.
    pub fn list_automations(&self) -> Vec<Automation> {
        self.automations.iter().map(|e| e.clone()).collect()
    }

    /// `true` when `conditions` is empty, or the combination under
    /// `condition_logic` holds.
    pub fn evaluate_conditions(automation: &Automation, ctx: &std::collections::HashMap<String, Value>) -> bool {
        if automation.conditions.is_empty() {
            return true;
        }
        let results: Vec<bool> = automation
            .conditions
            .iter()
            .map(|c| {
                let left = ctx.get(&c.left_ref).cloned().unwrap_or(Value::Null);
                compare_values(&left, &c.operator, &c.right_value)
            })
            .collect();

        match automation.condition_logic {
            ConditionLogic::And => results.iter().all(|r| *r),
            ConditionLogic::Or => results.iter().any(|r| *r),
            ConditionLogic::Custom => {
                let expr = automation.custom_logic_expr.as_deref().unwrap_or("");
                let rendered = eval::substitute_positional(expr, &results);
                eval::interpret_boolean_expression(&rendered).unwrap_or(false)
            }
        }
    }

    /// Enforce `constraints.cooldown_minutes` against `statistics.last_executed`.
    pub fn check_constraints(automation: &Automation, now_millis: u64) -> bool {
        match automation.statistics.last_executed {
            None => true,
            Some(last) => {
                let cooldown_millis = automation.constraints.cooldown_minutes as u64 * 60_000;
                now_millis.saturating_sub(last) >= cooldown_millis
            }
        }
    }

    /// Run one matching trigger event through the full pipeline: cooldown
    /// gate, condition evaluation, then sequential action execution with
    /// per-action failure isolation.
    pub async fn fire(
        &self,
        id: &str,
        ctx: &std::collections::HashMap<String, Value>,
        now_millis: u64,
    ) -> Result<ExecutionResult, HearthError> {
        let automation = self.get_automation(id)?;
        if !automation.enabled || automation.status != AutomationStatus::Active {
            return Ok(ExecutionResult {
                fired: false,
                actions_run: 0,
                actions_failed: 0,
            });
        }
        if !Self::check_constraints(&automation, now_millis) {
            return Ok(ExecutionResult {
                fired: false,
                actions_run: 0,
                actions_failed: 0,
            });
        }
        if !Self::evaluate_conditions(&automation, ctx) {
            return Ok(ExecutionResult {
                fired: false,
                actions_run: 0,
                actions_failed: 0,
            });
        }

        let mut actions_run = 0;
        let mut actions_failed = 0;
        for action in &automation.actions {
            match self.run_action(action).await {
                Ok(()) => actions_run += 1,
                Err(e) => {
                    actions_failed += 1;
                    self.errors.record(
                        "rule-engine",
                        &format!("action failed for automation {id}: {e}"),
                        Some(crate::error::middleware::ErrorSeverity::Medium),
                        serde_json::json!({ "automation_id": id }),
                    );
                }
            }
        }

        if let Some(mut entry) = self.automations.get_mut(id) {
            entry.statistics.execution_count += 1;
            entry.statistics.last_executed = Some(now_millis);
        }

        Ok(ExecutionResult {
            fired: true,
            actions_run,
            actions_failed,
        })
    }

    async fn run_action(&self, action: &Action) -> Result<(), HearthError> {
        match action {
            Action::SetCapability {
                device_id,
                capability,
                value,
            } => {
                let devices = self
                    .devices
                    .as_ref()
                    .ok_or_else(|| HearthError::ResourceUnavailable("device manager not configured".into()))?;
                devices.set_capability(device_id, capability, value.clone()).await
            }
            Action::RunScene { scene_id } => {
                let devices = self
                    .devices
                    .as_ref()
                    .ok_or_else(|| HearthError::ResourceUnavailable("device manager not configured".into()))?;
                devices.trigger_flow(scene_id).await
            }
            Action::Notify { title, message } => {
                self.notifications.push(Notification::new(
                    Priority::Normal,
                    "automation".to_string(),
                    title.clone(),
                    message.clone(),
                ));
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::NotificationCenter;
    use std::collections::HashMap;

    fn engine() -> AutomationEngine {
        AutomationEngine::new(
            None,
            Arc::new(NotificationCenter::new()),
            Arc::new(ErrorMiddleware::new()),
        )
    }

    #[test]
    fn empty_conditions_with_and_logic_is_true() {
        let automation = Automation {
            id: "a1".into(),
            name: "test".into(),
            enabled: true,
            priority: 5,
            triggers: vec![],
            conditions: vec![],
            condition_logic: ConditionLogic::And,
            custom_logic_expr: None,
            actions: vec![],
            constraints: Constraints::default(),
            statistics: Statistics::new(0),
            status: AutomationStatus::Active,
        };
        assert!(AutomationEngine::evaluate_conditions(&automation, &HashMap::new()));
    }

    #[test]
    fn compare_values_covers_every_operator() {
        assert!(compare_values(&serde_json::json!(5), "equals", &serde_json::json!(5)));
        assert!(compare_values(&serde_json::json!(5), "not_equals", &serde_json::json!(6)));
        assert!(compare_values(&serde_json::json!(5), "greater_than", &serde_json::json!(3)));
        assert!(compare_values(&serde_json::json!(5), "less_than", &serde_json::json!(9)));
        assert!(compare_values(&serde_json::json!(5), "gte", &serde_json::json!(5)));
        assert!(compare_values(&serde_json::json!(5), "lte", &serde_json::json!(5)));
        assert!(compare_values(
            &serde_json::json!(5),
            "between",
            &serde_json::json!({"min": 1, "max": 10})
        ));
        assert!(compare_values(&serde_json::json!("hello world"), "contains", &serde_json::json!("world")));
        assert!(compare_values(&serde_json::json!("b"), "in", &serde_json::json!(["a", "b", "c"])));
        assert!(compare_values(&serde_json::json!("abc123"), "regex", &serde_json::json!("^[a-z]+[0-9]+$")));
        assert!(!compare_values(&serde_json::json!(1), "no_such_operator", &serde_json::json!(1)));
    }

    #[test]
    fn cooldown_scenario_from_spec() {
        let mut automation = Automation {
            id: "a1".into(),
            name: "test".into(),
            enabled: true,
            priority: 5,
            triggers: vec![],
            conditions: vec![],
            condition_logic: ConditionLogic::And,
            custom_logic_expr: None,
            actions: vec![],
            constraints: Constraints {
                cooldown_minutes: 60,
                daily_limit: None,
            },
            statistics: Statistics::new(0),
            status: AutomationStatus::Active,
        };
        let now = 3_600_000u64;
        automation.statistics.last_executed = Some(now - 30_000);
        assert!(!AutomationEngine::check_constraints(&automation, now));

        automation.statistics.last_executed = Some(now - 60 * 60_000);
        assert!(AutomationEngine::check_constraints(&automation, now));
    }

    #[test]
    fn create_automation_applies_defaults() {
        let e = engine();
        let automation = e
            .create_automation(
                AutomationSpec {
                    name: "test".into(),
                    ..Default::default()
                },
                0,
            )
            .unwrap();
        assert!(automation.enabled);
        assert_eq!(automation.priority, 5);
        assert_eq!(automation.condition_logic, ConditionLogic::And);
        assert!(automation.id.starts_with("auto_"));
    }

    #[test]
    fn create_automation_rejects_unparseable_custom_logic() {
        let e = engine();
        let result = e.create_automation(
            AutomationSpec {
                name: "test".into(),
                condition_logic: Some(ConditionLogic::Custom),
                custom_logic_expr: Some("1==1".into()),
                ..Default::default()
            },
            0,
        );
        assert!(result.is_err());
    }

    #[test]
    fn custom_logic_substitutes_and_evaluates() {
        let automation = Automation {
            id: "a1".into(),
            name: "test".into(),
            enabled: true,
            priority: 5,
            triggers: vec![],
            conditions: vec![
                Condition {
                    left_ref: "temp".into(),
                    operator: "greater_than".into(),
                    right_value: serde_json::json!(20),
                },
                Condition {
                    left_ref: "occupied".into(),
                    operator: "equals".into(),
                    right_value: serde_json::json!(true),
                },
            ],
            condition_logic: ConditionLogic::Custom,
            custom_logic_expr: Some("{0} AND NOT {1}".into()),
            actions: vec![],
            constraints: Constraints::default(),
            statistics: Statistics::new(0),
            status: AutomationStatus::Active,
        };
        let mut ctx = HashMap::new();
        ctx.insert("temp".to_string(), serde_json::json!(25));
        ctx.insert("occupied".to_string(), serde_json::json!(false));
        assert!(AutomationEngine::evaluate_conditions(&automation, &ctx));
    }

    #[tokio::test]
    async fn fire_records_statistics_and_isolates_action_failures() {
        let e = engine();
        let automation = e
            .create_automation(
                AutomationSpec {
                    name: "test".into(),
                    actions: Some(vec![
                        Action::SetCapability {
                            device_id: "ghost".into(),
                            capability: "onoff".into(),
                            value: serde_json::json!(true),
                        },
                        Action::Notify {
                            title: "hi".into(),
                            message: "there".into(),
                        },
                    ]),
                    ..Default::default()
                },
                0,
            )
            .unwrap();

        let result = e.fire(&automation.id, &HashMap::new(), 1_000).await.unwrap();
        assert!(result.fired);
        assert_eq!(result.actions_run, 1);
        assert_eq!(result.actions_failed, 1);
        assert_eq!(e.get_automation(&automation.id).unwrap().statistics.execution_count, 1);
    }

    #[test]
    fn delete_unknown_automation_fails() {
        let e = engine();
        assert!(e.delete_automation("ghost").is_err());
    }
}
