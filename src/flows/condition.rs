//! Condition evaluation
//!
//! Conditions read the session's collected variables only. Evaluation never
//! fails the session: errors surface as a non-match plus a log line.

use super::model::{CompareOp, Condition};
use crate::values::{VariableValue, Variables};
use thiserror::Error;
use tracing::{debug, warn};

/// Why a condition could not be evaluated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConditionError {
    #[error("variable '{0}' has not been collected")]
    MissingVariable(String),

    #[error("'{value}' is not numeric (variable '{variable}' {operator})")]
    NonNumericOperand {
        variable: String,
        operator: CompareOp,
        value: String,
    },
}

/// Evaluate a condition, reporting evaluation errors.
pub fn evaluate(condition: &Condition, vars: &Variables) -> Result<bool, ConditionError> {
    let (variable, actual) = match condition.variable() {
        None => return Ok(true),
        Some(variable) => match vars.get(variable) {
            Some(value) => (variable, value),
            None if matches!(condition, Condition::Exists { .. }) => return Ok(false),
            None => return Err(ConditionError::MissingVariable(variable.to_string())),
        },
    };

    match condition {
        Condition::Always => Ok(true),
        Condition::Equals { value, .. } => Ok(loosely_equal(actual, value)),
        Condition::NotEquals { value, .. } => Ok(!loosely_equal(actual, value)),
        Condition::Contains { value, .. } => Ok(actual.as_text().contains(value.as_str())),
        Condition::OneOf { values, .. } => Ok(values.iter().any(|v| loosely_equal(actual, v))),
        Condition::NumericCompare {
            operator, value, ..
        } => {
            let non_numeric = |offending: &VariableValue| ConditionError::NonNumericOperand {
                variable: variable.to_string(),
                operator: *operator,
                value: offending.as_text(),
            };
            let left = actual.as_number().ok_or_else(|| non_numeric(actual))?;
            let right = value.as_number().ok_or_else(|| non_numeric(value))?;
            Ok(operator.apply(left, right))
        }
        Condition::Exists { .. } => Ok(!actual.is_empty()),
    }
}

/// Evaluate a condition, treating any evaluation error as a non-match.
pub fn matches(condition: &Condition, vars: &Variables) -> bool {
    match evaluate(condition, vars) {
        Ok(result) => result,
        Err(e @ ConditionError::MissingVariable(_)) => {
            debug!(error = %e, "condition not met");
            false
        }
        Err(e) => {
            warn!(error = %e, "condition evaluation error, treating as non-match");
            false
        }
    }
}

/// Numeric equality when both sides parse as numbers, text equality
/// otherwise.
fn loosely_equal(left: &VariableValue, right: &VariableValue) -> bool {
    match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => a == b,
        _ => left.as_text() == right.as_text(),
    }
}
