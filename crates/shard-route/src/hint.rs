use shard_core::Value;
use std::collections::HashMap;

/// Forced sharding values for one statement or session.
///
/// Callers create it at session/statement start and pass it to every
/// `route` call; the routing engine only reads it. Values set here take
/// precedence over values extracted from WHERE predicates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HintContext {
    database_values: HashMap<String, Vec<Value>>,
    table_values: HashMap<String, Vec<Value>>,
    /// Route every table by this database value only, ignoring table sharding.
    database_only: Option<Vec<Value>>,
}

impl HintContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.database_values.is_empty()
            && self.table_values.is_empty()
            && self.database_only.is_none()
    }

    pub fn add_database_value(&mut self, logic_table: &str, value: impl Into<Value>) -> &mut Self {
        self.database_values
            .entry(logic_table.to_ascii_lowercase())
            .or_default()
            .push(value.into());
        self
    }

    pub fn add_table_value(&mut self, logic_table: &str, value: impl Into<Value>) -> &mut Self {
        self.table_values
            .entry(logic_table.to_ascii_lowercase())
            .or_default()
            .push(value.into());
        self
    }

    pub fn set_database_only(&mut self, value: impl Into<Value>) -> &mut Self {
        self.database_only = Some(vec![value.into()]);
        self
    }

    pub fn database_values(&self, logic_table: &str) -> Option<&[Value]> {
        if let Some(values) = &self.database_only {
            return Some(values);
        }
        self.database_values
            .get(&logic_table.to_ascii_lowercase())
            .map(Vec::as_slice)
    }

    pub fn table_values(&self, logic_table: &str) -> Option<&[Value]> {
        self.table_values
            .get(&logic_table.to_ascii_lowercase())
            .map(Vec::as_slice)
    }

    pub fn is_database_only(&self) -> bool {
        self.database_only.is_some()
    }

    pub fn clear(&mut self) {
        self.database_values.clear();
        self.table_values.clear();
        self.database_only = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_lookup_is_case_insensitive() {
        let mut hint = HintContext::new();
        hint.add_database_value("T_ORDER", 1).add_table_value("t_order", 3);
        assert_eq!(hint.database_values("t_order"), Some(&[Value::Int64(1)][..]));
        assert_eq!(hint.table_values("T_Order"), Some(&[Value::Int64(3)][..]));
        assert!(hint.table_values("t_user").is_none());
    }

    #[test]
    fn test_database_only_overrides() {
        let mut hint = HintContext::new();
        hint.add_database_value("t_order", 1);
        hint.set_database_only(0);
        assert!(hint.is_database_only());
        assert_eq!(hint.database_values("t_user"), Some(&[Value::Int64(0)][..]));
        hint.clear();
        assert!(hint.is_empty());
    }
}
