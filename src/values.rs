//! Typed variable bags carried by a session.
//!
//! Collected variables and the free-form context share the same shape: an
//! ordered map from string keys to a small closed set of value kinds. Keeping
//! the value kinds closed is what lets the condition evaluator apply its
//! numeric/string coercion rules deterministically.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single variable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl VariableValue {
    /// Numeric view of the value.
    ///
    /// Numbers return themselves, text is parsed after trimming, booleans
    /// never coerce.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            Self::Bool(_) => None,
        }
    }

    /// Text view of the value, as it would be substituted into a template.
    pub fn as_text(&self) -> String {
        self.to_string()
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Text(s) if s.is_empty())
    }
}

impl fmt::Display for VariableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            // 18.0 renders as "18", 2.5 as "2.5"
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for VariableValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for VariableValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for VariableValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for VariableValue {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<bool> for VariableValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Ordered key/value bag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variables(BTreeMap<String, VariableValue>);

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&VariableValue> {
        self.0.get(key)
    }

    /// Insert a value, returning the previous one.
    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: impl Into<VariableValue>,
    ) -> Option<VariableValue> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<VariableValue> {
        self.0.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &VariableValue)> {
        self.0.iter()
    }

    /// Copy entries from `other` that are not already present.
    pub fn merge_missing(&mut self, other: &Variables) {
        for (key, value) in other.iter() {
            self.0.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Variables
where
    K: Into<String>,
    V: Into<VariableValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(VariableValue::from("20").as_number(), Some(20.0));
        assert_eq!(VariableValue::from(" 2.5 ").as_number(), Some(2.5));
        assert_eq!(VariableValue::from("diez").as_number(), None);
        assert_eq!(VariableValue::from(true).as_number(), None);
        assert_eq!(VariableValue::from("NaN").as_number(), None);
    }

    #[test]
    fn test_display_trims_integral_numbers() {
        assert_eq!(VariableValue::from(18i64).to_string(), "18");
        assert_eq!(VariableValue::from(2.5).to_string(), "2.5");
        assert_eq!(VariableValue::from(false).to_string(), "false");
    }

    #[test]
    fn test_deserialize_untagged() {
        let vars: Variables =
            serde_json::from_str(r#"{"age": 18, "name": "Ana", "vip": true}"#).unwrap();
        assert_eq!(vars.get("age"), Some(&VariableValue::Number(18.0)));
        assert_eq!(vars.get("name"), Some(&VariableValue::Text("Ana".into())));
        assert_eq!(vars.get("vip"), Some(&VariableValue::Bool(true)));
    }

    #[test]
    fn test_merge_missing_keeps_existing() {
        let mut vars: Variables = [("name", "Ana")].into_iter().collect();
        let defaults: Variables = [("name", "guest"), ("lang", "es")].into_iter().collect();
        vars.merge_missing(&defaults);
        assert_eq!(vars.get("name").unwrap().as_text(), "Ana");
        assert_eq!(vars.get("lang").unwrap().as_text(), "es");
    }
}
