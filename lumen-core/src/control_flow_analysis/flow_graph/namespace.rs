//! Lexical scoping for the graph builder: which variables and local
//! functions are visible at the statement currently being connected.

use super::{GraphId, ValueId};
use lumen_types::Ident;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone)]
pub(crate) struct FunctionNamespaceEntry {
    pub graph: GraphId,
    /// False when every path through the body returns non-locally.
    pub completes_normally: bool,
}

#[derive(Debug, Default)]
struct Scope {
    /// Declared variables, mapped to the value last written to them.
    variables: FxHashMap<String, ValueId>,
    functions: FxHashMap<String, FunctionNamespaceEntry>,
}

/// A stack of scopes. Lookups walk outward; insertions land in the
/// innermost scope. Lambdas and local function bodies capture their
/// enclosing scopes, so the stack is shared across graph boundaries
/// during construction.
#[derive(Debug, Default)]
pub(crate) struct ControlFlowNamespace {
    scopes: Vec<Scope>,
}

impl ControlFlowNamespace {
    pub(crate) fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub(crate) fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    pub(crate) fn insert_variable(&mut self, name: &Ident, value: ValueId) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.variables.insert(name.as_str().to_string(), value);
        }
    }

    /// Rebinds an existing variable in whichever scope declared it.
    /// Returns false when the name is unknown.
    pub(crate) fn update_variable(&mut self, name: &Ident, value: ValueId) -> bool {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(entry) = scope.variables.get_mut(name.as_str()) {
                *entry = value;
                return true;
            }
        }
        false
    }

    pub(crate) fn insert_function(&mut self, name: &Ident, entry: FunctionNamespaceEntry) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.functions.insert(name.as_str().to_string(), entry);
        }
    }

    pub(crate) fn get_function(&self, name: &Ident) -> Option<&FunctionNamespaceEntry> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.functions.get(name.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebinding_walks_enclosing_scopes() {
        let x = Ident::new_no_span("x");
        let mut ns = ControlFlowNamespace::default();
        ns.push_scope();
        ns.insert_variable(&x, ValueId(0));
        ns.push_scope();
        assert!(ns.update_variable(&x, ValueId(1)));
        ns.pop_scope();
        assert!(ns.update_variable(&x, ValueId(2)));
    }

    #[test]
    fn unknown_names_do_not_rebind() {
        let mut ns = ControlFlowNamespace::default();
        ns.push_scope();
        ns.insert_variable(&Ident::new_no_span("x"), ValueId(0));
        assert!(!ns.update_variable(&Ident::new_no_span("y"), ValueId(1)));
    }

    #[test]
    fn popping_a_scope_drops_its_bindings() {
        let y = Ident::new_no_span("y");
        let mut ns = ControlFlowNamespace::default();
        ns.push_scope();
        ns.push_scope();
        ns.insert_variable(&y, ValueId(0));
        ns.pop_scope();
        assert!(!ns.update_variable(&y, ValueId(1)));
    }
}
