//! Namespace and context overlays
//!
//! The same rule as the statement overlay, applied to metadata:
//! effective = (underlying - removed) ∪ added.
//!
//! Namespace bindings are staged here and flushed before statements.
//! Graph existence is implicit in the store (a graph exists while it holds
//! a statement), so the context overlay only records which graphs staged
//! writes touched; enumeration re-checks those against the overlay view.

use std::collections::{BTreeMap, BTreeSet};

use trellis_core::{Namespace, Result, StoreConnection, Term};

/// Staged namespace bindings
#[derive(Debug, Clone, Default)]
pub struct NamespaceOverlay {
    cleared: bool,
    added: BTreeMap<String, String>,
    removed: BTreeSet<String>,
}

impl NamespaceOverlay {
    /// Stage a prefix binding
    pub fn set(&mut self, prefix: &str, name: &str) {
        self.removed.remove(prefix);
        self.added.insert(prefix.to_string(), name.to_string());
    }

    /// Stage a prefix removal
    pub fn remove(&mut self, prefix: &str) {
        self.added.remove(prefix);
        self.removed.insert(prefix.to_string());
    }

    /// Stage removal of every binding
    pub fn clear(&mut self) {
        self.added.clear();
        self.removed.clear();
        self.cleared = true;
    }

    /// Check if nothing is staged
    pub fn is_empty(&self) -> bool {
        !self.cleared && self.added.is_empty() && self.removed.is_empty()
    }

    /// Binding of one prefix, consulting `underlying` when not staged
    pub fn get<F>(&self, prefix: &str, underlying: F) -> Result<Option<String>>
    where
        F: FnOnce(&str) -> Result<Option<String>>,
    {
        if let Some(name) = self.added.get(prefix) {
            return Ok(Some(name.clone()));
        }
        if self.cleared || self.removed.contains(prefix) {
            return Ok(None);
        }
        underlying(prefix)
    }

    /// Effective bindings, ordered by prefix
    pub fn view(&self, underlying: Vec<Namespace>) -> Vec<Namespace> {
        let mut effective: BTreeMap<String, String> = if self.cleared {
            BTreeMap::new()
        } else {
            underlying
                .into_iter()
                .filter(|ns| !self.removed.contains(&ns.prefix))
                .map(|ns| (ns.prefix, ns.name))
                .collect()
        };
        effective.extend(self.added.iter().map(|(p, n)| (p.clone(), n.clone())));
        effective
            .into_iter()
            .map(|(prefix, name)| Namespace::new(prefix, name))
            .collect()
    }

    /// Apply the staged bindings: clear, then removals, then additions
    pub fn flush<C: StoreConnection + ?Sized>(&self, store: &mut C) -> Result<()> {
        if self.cleared {
            store.clear_namespaces()?;
        }
        for prefix in &self.removed {
            store.remove_namespace(prefix)?;
        }
        for (prefix, name) in &self.added {
            store.set_namespace(prefix, name)?;
        }
        Ok(())
    }
}

/// Named graphs touched by staged writes
#[derive(Debug, Clone, Default)]
pub struct ContextOverlay {
    added: BTreeSet<Term>,
    removed: BTreeSet<Term>,
}

impl ContextOverlay {
    /// A statement was staged for addition into `context`
    pub fn note_add(&mut self, context: &Option<Term>) {
        if let Some(ctx) = context {
            self.added.insert(ctx.clone());
        }
    }

    /// A statement was staged for removal from `context`
    pub fn note_remove(&mut self, context: &Option<Term>) {
        if let Some(ctx) = context {
            self.removed.insert(ctx.clone());
        }
    }

    /// Effective graph list
    ///
    /// Untouched store graphs are kept as-is; every touched graph is kept
    /// only if `populated` reports it still holds a statement.
    pub fn resolve<F>(&self, underlying: Vec<Term>, populated: F) -> Result<Vec<Term>>
    where
        F: Fn(&Term) -> Result<bool>,
    {
        let mut effective = BTreeSet::new();
        for ctx in underlying.into_iter().chain(self.added.iter().cloned()) {
            let touched = self.added.contains(&ctx) || self.removed.contains(&ctx);
            if !touched || populated(&ctx)? {
                effective.insert(ctx);
            }
        }
        Ok(effective.into_iter().collect())
    }

    /// Forget touched graphs
    pub fn clear(&mut self) {
        self.added.clear();
        self.removed.clear();
    }
}
