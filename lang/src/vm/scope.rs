use std::collections::BTreeMap;

use derive_more::{From, Into};
use typed_index_collections::TiVec;

use super::{EvalError, Value};

/// Names that are seeded into the global scope and can never be stored to.
pub const CONSTANTS: &[&str] = &["true", "false", "null"];

#[derive(From, Into, Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeIndex(usize);

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Scope {
    pub names: BTreeMap<String, Value>,
}

/// Innermost scope last. Lookups and stores act on the innermost scope
/// that has the name; declarations always go to the innermost scope.
#[derive(Debug, Clone)]
pub struct ScopeStack {
    scopes: TiVec<ScopeIndex, Scope>,
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStack {
    pub fn new() -> Self {
        let mut global = Scope::default();
        global.names.insert("true".to_owned(), Value::Number(1.0));
        global.names.insert("false".to_owned(), Value::Number(0.0));
        global.names.insert("null".to_owned(), Value::Null);

        let mut scopes = TiVec::new();
        scopes.push(global);
        ScopeStack { scopes }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn push(&mut self) -> ScopeIndex {
        self.scopes.push_and_get_key(Scope::default())
    }

    pub fn pop(&mut self) -> Result<(), EvalError> {
        if self.scopes.len() <= 1 {
            return Err(EvalError::PopGlobalScope);
        }
        self.scopes.pop();
        Ok(())
    }

    /// Drops every scope above `depth`. The global scope always survives.
    pub fn truncate(&mut self, depth: usize) {
        self.scopes.truncate(depth.max(1));
    }

    fn find(&self, name: &str) -> Option<ScopeIndex> {
        self.scopes
            .iter_enumerated()
            .rev()
            .find(|(_, scope)| scope.names.contains_key(name))
            .map(|(idx, _)| idx)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.find(name).and_then(|idx| self.scopes[idx].names.get(name))
    }

    pub fn lookup(&self, name: &str) -> Result<&Value, EvalError> {
        self.get(name).ok_or_else(|| EvalError::UndefinedVariable {
            name: name.to_owned(),
        })
    }

    pub fn declare(&mut self, name: &str, value: Value) -> Result<(), EvalError> {
        let Some(top) = self.scopes.last_mut() else {
            return Err(EvalError::PopGlobalScope);
        };
        if top.names.contains_key(name) {
            return Err(EvalError::Redeclaration {
                name: name.to_owned(),
            });
        }
        top.names.insert(name.to_owned(), value);
        Ok(())
    }

    pub fn assign(&mut self, name: &str, value: Value) -> Result<(), EvalError> {
        if CONSTANTS.contains(&name) {
            return Err(EvalError::ConstantAssignment {
                name: name.to_owned(),
            });
        }
        let idx = self.find(name).ok_or_else(|| EvalError::UndefinedVariable {
            name: name.to_owned(),
        })?;
        self.scopes[idx].names.insert(name.to_owned(), value);
        Ok(())
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Scope> {
        self.scopes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_scope_is_seeded() {
        let scopes = ScopeStack::new();
        assert_eq!(scopes.depth(), 1);
        assert_eq!(scopes.lookup("true").unwrap(), &Value::Number(1.0));
        assert_eq!(scopes.lookup("null").unwrap(), &Value::Null);
    }

    #[test]
    fn inner_declarations_shadow() {
        let mut scopes = ScopeStack::new();
        scopes.declare("x", Value::Number(1.0)).unwrap();
        let idx = scopes.push();
        assert_eq!(usize::from(idx), 1);
        scopes.declare("x", Value::Number(2.0)).unwrap();
        assert_eq!(scopes.lookup("x").unwrap(), &Value::Number(2.0));
        scopes.pop().unwrap();
        assert_eq!(scopes.lookup("x").unwrap(), &Value::Number(1.0));
    }

    #[test]
    fn redeclaration_in_one_scope_fails() {
        let mut scopes = ScopeStack::new();
        scopes.declare("x", Value::Null).unwrap();
        let err = scopes.declare("x", Value::Null).unwrap_err();
        assert_eq!(err.to_string(), "Identifier \"x\" already declared in this scope");
    }

    #[test]
    fn assignment_updates_the_nearest_binding() {
        let mut scopes = ScopeStack::new();
        scopes.declare("x", Value::Number(1.0)).unwrap();
        scopes.push();
        scopes.assign("x", Value::Number(5.0)).unwrap();
        scopes.pop().unwrap();
        assert_eq!(scopes.lookup("x").unwrap(), &Value::Number(5.0));
        assert!(matches!(
            scopes.assign("y", Value::Null),
            Err(EvalError::UndefinedVariable { .. })
        ));
        assert!(matches!(
            scopes.assign("true", Value::Null),
            Err(EvalError::ConstantAssignment { .. })
        ));
    }

    #[test]
    fn global_scope_survives() {
        let mut scopes = ScopeStack::new();
        assert!(matches!(scopes.pop(), Err(EvalError::PopGlobalScope)));
        scopes.push();
        scopes.push();
        scopes.truncate(0);
        assert_eq!(scopes.depth(), 1);
    }
}
