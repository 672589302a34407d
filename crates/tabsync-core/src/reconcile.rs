//! Protection of unsaved local edits from background refreshes.
//!
//! A scope names a group of top-level fields the user can edit (for example
//! the meal toggles of a registration form). While a scope is dirty, merged
//! output keeps the local values of its editable fields and takes every other
//! field, such as server-computed status, from the remote payload.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditFlag {
    pub scope: String,
    pub dirty: bool,
}

#[derive(Debug, Default)]
pub struct ReconciliationGuard {
    editable: HashMap<String, HashSet<String>>,
    dirty: HashSet<String>,
}

impl ReconciliationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare which top-level fields belong to `scope`. Fields not listed are
    /// treated as derived.
    pub fn designate<I, S>(&mut self, scope: &str, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.editable
            .entry(scope.to_string())
            .or_default()
            .extend(fields.into_iter().map(Into::into));
    }

    /// Scope owning `field`, if any.
    pub fn scope_of(&self, field: &str) -> Option<&str> {
        self.editable
            .iter()
            .find(|(_, fields)| fields.contains(field))
            .map(|(scope, _)| scope.as_str())
    }

    pub fn mark_dirty(&mut self, scope: &str) {
        if self.dirty.insert(scope.to_string()) {
            debug!(scope = scope, "Scope marked dirty");
        }
    }

    pub fn clear_dirty(&mut self, scope: &str) {
        if self.dirty.remove(scope) {
            debug!(scope = scope, "Scope cleared");
        }
    }

    pub fn is_dirty(&self, scope: &str) -> bool {
        self.dirty.contains(scope)
    }

    pub fn flag(&self, scope: &str) -> EditFlag {
        EditFlag {
            scope: scope.to_string(),
            dirty: self.is_dirty(scope),
        }
    }

    /// Merge `remote` over `local` for `scope`.
    ///
    /// Clean scopes return `remote` verbatim. Dirty scopes keep the local value
    /// of each editable field present locally. If either side is not an
    /// object the whole value counts as under edit and `local` is returned.
    pub fn reconcile(&self, scope: &str, local: &Value, remote: &Value) -> Value {
        if !self.is_dirty(scope) {
            return remote.clone();
        }

        let (Value::Object(local_fields), Value::Object(remote_fields)) = (local, remote) else {
            return local.clone();
        };

        let mut merged = remote_fields.clone();
        if let Some(editable) = self.editable.get(scope) {
            for field in editable {
                if let Some(value) = local_fields.get(field) {
                    merged.insert(field.clone(), value.clone());
                }
            }
        }
        Value::Object(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meal_guard() -> ReconciliationGuard {
        let mut guard = ReconciliationGuard::new();
        guard.designate("mealRegistration", ["breakfast", "lunch", "dinner"]);
        guard
    }

    #[test]
    fn test_clean_scope_returns_remote() {
        let guard = meal_guard();
        let local = json!({"breakfast": true});
        let remote = json!({"breakfast": false, "availed": {"breakfast": true}});
        assert_eq!(guard.reconcile("mealRegistration", &local, &remote), remote);
    }

    #[test]
    fn test_dirty_scope_keeps_editable_takes_derived() {
        let mut guard = meal_guard();
        guard.mark_dirty("mealRegistration");
        let local = json!({"breakfast": true});
        let remote = json!({"breakfast": false, "availed": {"breakfast": true}});
        assert_eq!(
            guard.reconcile("mealRegistration", &local, &remote),
            json!({"breakfast": true, "availed": {"breakfast": true}})
        );
    }

    #[test]
    fn test_dirty_scope_ignores_local_derived_fields() {
        let mut guard = meal_guard();
        guard.mark_dirty("mealRegistration");
        let local = json!({"lunch": false, "availed": {"lunch": false}});
        let remote = json!({"lunch": true, "availed": {"lunch": true}});
        assert_eq!(
            guard.reconcile("mealRegistration", &local, &remote),
            json!({"lunch": false, "availed": {"lunch": true}})
        );
    }

    #[test]
    fn test_clear_dirty_restores_remote() {
        let mut guard = meal_guard();
        guard.mark_dirty("mealRegistration");
        guard.clear_dirty("mealRegistration");
        assert!(!guard.flag("mealRegistration").dirty);
        let remote = json!({"breakfast": false});
        assert_eq!(guard.reconcile("mealRegistration", &json!({"breakfast": true}), &remote), remote);
    }

    #[test]
    fn test_non_object_dirty_keeps_local() {
        let mut guard = ReconciliationGuard::new();
        guard.mark_dirty("note");
        assert_eq!(guard.reconcile("note", &json!("draft"), &json!("server")), json!("draft"));
    }

    #[test]
    fn test_scope_of() {
        let guard = meal_guard();
        assert_eq!(guard.scope_of("dinner"), Some("mealRegistration"));
        assert_eq!(guard.scope_of("availed"), None);
    }
}
