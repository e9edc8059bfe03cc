use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use super::condition::CompensationCondition;
use crate::constants::compensation::{DEFAULT_PRIORITY, MANUAL_PRIORITY};

/// When and whether a completed step is undone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompensationStrategy {
    /// Dispatch the compensation as soon as the sweep reaches the step
    #[default]
    Immediate,
    /// Dispatch after `delay_ms`
    Delayed,
    /// Dispatch only when the condition holds against the business context
    Conditional,
    /// Never auto-invoked; flagged for human follow-up
    Manual,
    /// Never compensate
    Ignore,
}

impl std::fmt::Display for CompensationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Immediate => write!(f, "immediate"),
            Self::Delayed => write!(f, "delayed"),
            Self::Conditional => write!(f, "conditional"),
            Self::Manual => write!(f, "manual"),
            Self::Ignore => write!(f, "ignore"),
        }
    }
}

/// Compensation policy attached to a saga step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationAction {
    pub action_name: String,
    pub target_service: Option<String>,
    pub compensation_method: Option<String>,
    pub strategy: CompensationStrategy,
    pub condition: CompensationCondition,
    /// Lower runs first; `None` falls back to the strategy default
    pub priority: Option<i32>,
    pub max_retries: u32,
    pub retry_interval_ms: u64,
    pub async_execution: bool,
    pub timeout_ms: Option<u64>,
    pub delay_ms: u64,
    pub input_parameters: HashMap<String, Value>,
}

impl CompensationAction {
    /// Start building a policy for the named compensation action
    pub fn builder(action_name: impl Into<String>) -> CompensationActionBuilder {
        CompensationActionBuilder::new(action_name)
    }

    /// Immediate compensation calling `service.method`
    pub fn immediate(
        action_name: impl Into<String>,
        target_service: impl Into<String>,
        compensation_method: impl Into<String>,
    ) -> Self {
        Self::builder(action_name)
            .target(target_service, compensation_method)
            .build()
    }

    /// Manual follow-up; needs nothing but a name
    pub fn manual(action_name: impl Into<String>) -> Self {
        Self::builder(action_name)
            .strategy(CompensationStrategy::Manual)
            .build()
    }

    /// An action is valid when it is named and either manual or fully targeted
    pub fn is_valid(&self) -> bool {
        if self.action_name.trim().is_empty() {
            return false;
        }
        if self.strategy == CompensationStrategy::Manual {
            return true;
        }
        let present = |s: &Option<String>| s.as_deref().is_some_and(|v| !v.trim().is_empty());
        present(&self.target_service) && present(&self.compensation_method)
    }

    /// Whether the engine should invoke this compensation automatically
    pub fn should_compensate(&self, context: &HashMap<String, Value>) -> bool {
        match self.strategy {
            CompensationStrategy::Immediate | CompensationStrategy::Delayed => true,
            CompensationStrategy::Conditional => self.condition.evaluate(context),
            CompensationStrategy::Manual | CompensationStrategy::Ignore => false,
        }
    }

    pub fn effective_priority(&self) -> i32 {
        self.priority.unwrap_or(match self.strategy {
            CompensationStrategy::Manual => MANUAL_PRIORITY,
            _ => DEFAULT_PRIORITY,
        })
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Builder for [`CompensationAction`]
#[derive(Debug, Clone)]
pub struct CompensationActionBuilder {
    action: CompensationAction,
}

impl CompensationActionBuilder {
    pub fn new(action_name: impl Into<String>) -> Self {
        Self {
            action: CompensationAction {
                action_name: action_name.into(),
                target_service: None,
                compensation_method: None,
                strategy: CompensationStrategy::Immediate,
                condition: CompensationCondition::Always,
                priority: None,
                max_retries: 0,
                retry_interval_ms: 1000,
                async_execution: true,
                timeout_ms: None,
                delay_ms: 0,
                input_parameters: HashMap::new(),
            },
        }
    }

    pub fn target(
        mut self,
        service: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        self.action.target_service = Some(service.into());
        self.action.compensation_method = Some(method.into());
        self
    }

    pub fn strategy(mut self, strategy: CompensationStrategy) -> Self {
        self.action.strategy = strategy;
        self
    }

    /// Conditional strategy with a typed predicate
    pub fn condition(mut self, condition: CompensationCondition) -> Self {
        self.action.strategy = CompensationStrategy::Conditional;
        self.action.condition = condition;
        self
    }

    /// Conditional strategy from a `field == 'value'` expression
    pub fn condition_expr(self, expression: &str) -> Self {
        self.condition(CompensationCondition::parse(expression))
    }

    /// Delayed strategy firing after `delay_ms`
    pub fn delayed(mut self, delay_ms: u64) -> Self {
        self.action.strategy = CompensationStrategy::Delayed;
        self.action.delay_ms = delay_ms;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.action.priority = Some(priority);
        self
    }

    pub fn retry(mut self, max_retries: u32, retry_interval_ms: u64) -> Self {
        self.action.max_retries = max_retries;
        self.action.retry_interval_ms = retry_interval_ms;
        self
    }

    pub fn async_execution(mut self, async_execution: bool) -> Self {
        self.action.async_execution = async_execution;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.action.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn input_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.action.input_parameters.insert(key.into(), value);
        self
    }

    pub fn input_parameters(mut self, parameters: HashMap<String, Value>) -> Self {
        self.action.input_parameters.extend(parameters);
        self
    }

    pub fn build(self) -> CompensationAction {
        self.action
    }
}

/// A compensation that needs a human
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualCompensation {
    pub saga_id: Uuid,
    pub saga_type: String,
    pub correlation_id: String,
    pub step_name: String,
    pub action_name: String,
    pub priority: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(status: &str) -> HashMap<String, Value> {
        HashMap::from([("status".to_string(), json!(status))])
    }

    #[test]
    fn test_conditional_strategy_follows_condition() {
        let action = CompensationAction::builder("refund_payment")
            .target("payment-service", "refundPayment")
            .condition_expr("status == 'failed'")
            .build();

        assert_eq!(action.strategy, CompensationStrategy::Conditional);
        assert!(!action.should_compensate(&ctx("success")));
        assert!(action.should_compensate(&ctx("failed")));
    }

    #[test]
    fn test_conditional_with_unparseable_expression_compensates() {
        let action = CompensationAction::builder("refund_payment")
            .target("payment-service", "refundPayment")
            .condition_expr("status is kind of failed")
            .build();

        assert!(action.should_compensate(&ctx("success")));
        assert!(action.should_compensate(&HashMap::new()));
    }

    #[test]
    fn test_strategy_table() {
        let base = || CompensationAction::builder("undo").target("svc", "undo");

        assert!(base().build().should_compensate(&HashMap::new()));
        assert!(base().delayed(50).build().should_compensate(&HashMap::new()));
        assert!(!base()
            .strategy(CompensationStrategy::Manual)
            .build()
            .should_compensate(&HashMap::new()));
        assert!(!base()
            .strategy(CompensationStrategy::Ignore)
            .build()
            .should_compensate(&HashMap::new()));
    }

    #[test]
    fn test_validity_rules() {
        assert!(CompensationAction::immediate("undo", "svc", "undo").is_valid());
        assert!(CompensationAction::manual("call the customer").is_valid());

        let untargeted = CompensationAction::builder("undo").build();
        assert!(!untargeted.is_valid());

        let half_targeted = CompensationAction {
            compensation_method: None,
            ..CompensationAction::immediate("undo", "svc", "undo")
        };
        assert!(!half_targeted.is_valid());

        assert!(!CompensationAction::manual("  ").is_valid());
    }

    #[test]
    fn test_priority_defaults() {
        assert_eq!(
            CompensationAction::manual("follow up").effective_priority(),
            MANUAL_PRIORITY
        );
        assert_eq!(
            CompensationAction::immediate("undo", "svc", "undo").effective_priority(),
            DEFAULT_PRIORITY
        );
        assert_eq!(
            CompensationAction::builder("follow up")
                .strategy(CompensationStrategy::Manual)
                .priority(1)
                .build()
                .effective_priority(),
            1
        );
    }

    #[test]
    fn test_builder_configuration() {
        let action = CompensationAction::builder("release_inventory")
            .target("inventory-service", "releaseReservation")
            .retry(2, 250)
            .timeout_ms(5_000)
            .async_execution(false)
            .input_parameter("reason", json!("saga rollback"))
            .build();

        assert_eq!(action.max_retries, 2);
        assert_eq!(action.retry_interval(), Duration::from_millis(250));
        assert_eq!(action.timeout_ms, Some(5_000));
        assert!(!action.async_execution);
        assert_eq!(action.input_parameters["reason"], json!("saga rollback"));
    }
}
