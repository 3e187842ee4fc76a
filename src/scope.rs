//! Hierarchical cancellation scopes.
//!
//! Scopes form a tree; each invocation registers with exactly one scope at
//! creation. Cancelling a node marks every descendant and yields the
//! registered invocations in a fixed traversal order (parent before
//! children, registration order among siblings) so replay reproduces an
//! identical propagation ordering and an identical set of cancel commands.

use std::collections::HashMap;

use tracing::debug;

/// Identity of a cancellation scope within one workflow execution.
pub type ScopeId = u64;

/// Every execution has an implicit root scope.
pub const ROOT_SCOPE: ScopeId = 0;

#[derive(Debug)]
struct ScopeNode {
    parent: Option<ScopeId>,
    /// Child scopes in creation order.
    children: Vec<ScopeId>,
    /// Directly registered invocations in registration order.
    invocations: Vec<u64>,
    cancel_requested: bool,
}

/// Arena-backed tree of cancellation scopes.
#[derive(Debug)]
pub struct ScopeTree {
    nodes: HashMap<ScopeId, ScopeNode>,
    next_id: ScopeId,
}

impl Default for ScopeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeTree {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_SCOPE,
            ScopeNode {
                parent: None,
                children: Vec::new(),
                invocations: Vec::new(),
                cancel_requested: false,
            },
        );
        Self { nodes, next_id: 1 }
    }

    /// Open a child scope under `parent`. An unknown parent falls back to the
    /// root scope.
    pub fn open(&mut self, parent: ScopeId) -> ScopeId {
        let parent = if self.nodes.contains_key(&parent) {
            parent
        } else {
            ROOT_SCOPE
        };
        let id = self.next_id;
        self.next_id += 1;
        // A scope opened under an already-cancelled parent starts cancelled.
        let inherited = self.is_cancel_requested(parent);
        self.nodes.insert(
            id,
            ScopeNode {
                parent: Some(parent),
                children: Vec::new(),
                invocations: Vec::new(),
                cancel_requested: inherited,
            },
        );
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.push(id);
        }
        debug!(scope = id, parent, "opened cancellation scope");
        id
    }

    /// Register an invocation with `scope`. Unknown scopes register at root.
    pub fn register(&mut self, scope: ScopeId, seq: u64) {
        let target = if self.nodes.contains_key(&scope) {
            scope
        } else {
            ROOT_SCOPE
        };
        if let Some(node) = self.nodes.get_mut(&target) {
            node.invocations.push(seq);
        }
    }

    pub fn parent(&self, scope: ScopeId) -> Option<ScopeId> {
        self.nodes.get(&scope).and_then(|n| n.parent)
    }

    pub fn is_cancel_requested(&self, scope: ScopeId) -> bool {
        self.nodes.get(&scope).map(|n| n.cancel_requested).unwrap_or(false)
    }

    /// Mark the subtree rooted at `scope` cancelled and return every
    /// registered invocation in deterministic propagation order: the node's
    /// own invocations first (registration order), then each child subtree in
    /// creation order.
    pub fn cancel(&mut self, scope: ScopeId) -> Vec<u64> {
        if !self.nodes.contains_key(&scope) {
            return Vec::new();
        }
        let mut order = Vec::new();
        self.cancel_subtree(scope, &mut order);
        debug!(scope, invocations = order.len(), "cancellation scope marked");
        order
    }

    fn cancel_subtree(&mut self, scope: ScopeId, order: &mut Vec<u64>) {
        let children = match self.nodes.get_mut(&scope) {
            Some(node) => {
                node.cancel_requested = true;
                order.extend(node.invocations.iter().copied());
                node.children.clone()
            }
            None => return,
        };
        for child in children {
            self.cancel_subtree(child, order);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_marks_subtree_parent_before_children() {
        let mut tree = ScopeTree::new();
        let a = tree.open(ROOT_SCOPE);
        let b = tree.open(a);
        let c = tree.open(a);

        tree.register(a, 10);
        tree.register(b, 20);
        tree.register(a, 11);
        tree.register(c, 30);

        let order = tree.cancel(a);
        // Node's own invocations first in registration order, then children
        // in creation order.
        assert_eq!(order, vec![10, 11, 20, 30]);
        assert!(tree.is_cancel_requested(a));
        assert!(tree.is_cancel_requested(b));
        assert!(tree.is_cancel_requested(c));
        assert!(!tree.is_cancel_requested(ROOT_SCOPE));
    }

    #[test]
    fn test_cancel_sibling_scope_is_unaffected() {
        let mut tree = ScopeTree::new();
        let a = tree.open(ROOT_SCOPE);
        let b = tree.open(ROOT_SCOPE);
        tree.register(a, 1);
        tree.register(b, 2);

        let order = tree.cancel(a);
        assert_eq!(order, vec![1]);
        assert!(!tree.is_cancel_requested(b));
        assert_eq!(tree.parent(a), Some(ROOT_SCOPE));
        assert_eq!(tree.parent(ROOT_SCOPE), None);
    }

    #[test]
    fn test_root_cancel_reaches_everything_in_creation_order() {
        let mut tree = ScopeTree::new();
        tree.register(ROOT_SCOPE, 1);
        let a = tree.open(ROOT_SCOPE);
        let a_child = tree.open(a);
        let b = tree.open(ROOT_SCOPE);
        tree.register(a, 2);
        tree.register(a_child, 3);
        tree.register(b, 4);

        assert_eq!(tree.cancel(ROOT_SCOPE), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_scope_opened_under_cancelled_parent_starts_cancelled() {
        let mut tree = ScopeTree::new();
        let a = tree.open(ROOT_SCOPE);
        tree.cancel(a);
        let late = tree.open(a);
        assert!(tree.is_cancel_requested(late));
    }

    #[test]
    fn test_unknown_scope_falls_back_to_root() {
        let mut tree = ScopeTree::new();
        tree.register(999, 5);
        assert_eq!(tree.cancel(ROOT_SCOPE), vec![5]);
        assert!(tree.cancel(12345).is_empty());
    }
}
