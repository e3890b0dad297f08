use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

/// Dependency graph over derived values.
///
/// Each node lists the nodes it is computed from. Invalidating a node marks it
/// and everything downstream dirty; [`drain_dirty`](Self::drain_dirty) hands the
/// dirty set back in an order where dependencies come before dependents, with
/// ties broken by key so recomputation is deterministic.
#[derive(Debug, Clone)]
pub struct DependencyGraph<K> {
    deps: BTreeMap<K, BTreeSet<K>>,
    dependents: BTreeMap<K, BTreeSet<K>>,
    dirty: BTreeSet<K>,
}

impl<K: Ord + Copy + std::fmt::Debug> Default for DependencyGraph<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Copy + std::fmt::Debug> DependencyGraph<K> {
    pub fn new() -> Self {
        Self {
            deps: BTreeMap::new(),
            dependents: BTreeMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    /// Adds `node` (dirty) if it is not present yet.
    pub fn add_node(&mut self, node: K) {
        if !self.deps.contains_key(&node) {
            self.deps.insert(node, BTreeSet::new());
            self.dirty.insert(node);
        }
    }

    pub fn contains(&self, node: K) -> bool {
        self.deps.contains_key(&node)
    }

    /// Replaces the dependency list of `node` and invalidates it.
    ///
    /// Unknown dependencies are added as nodes.
    pub fn set_dependencies<I>(&mut self, node: K, deps: I)
    where
        I: IntoIterator<Item = K>,
    {
        self.add_node(node);
        let new_deps: BTreeSet<K> = deps.into_iter().filter(|d| *d != node).collect();
        for d in &new_deps {
            self.add_node(*d);
        }
        let old = self.deps.insert(node, new_deps.clone()).unwrap_or_default();
        for d in old.difference(&new_deps) {
            if let Some(set) = self.dependents.get_mut(d) {
                set.remove(&node);
            }
        }
        for d in &new_deps {
            self.dependents.entry(*d).or_default().insert(node);
        }
        self.invalidate(node);
    }

    pub fn dependencies(&self, node: K) -> impl Iterator<Item = K> + '_ {
        self.deps.get(&node).into_iter().flatten().copied()
    }

    /// Drops `node` and its edges. Former dependents are invalidated.
    pub fn remove_node(&mut self, node: K) {
        let Some(deps) = self.deps.remove(&node) else {
            return;
        };
        for d in deps {
            if let Some(set) = self.dependents.get_mut(&d) {
                set.remove(&node);
            }
        }
        let downstream = self.dependents.remove(&node).unwrap_or_default();
        for n in downstream {
            if let Some(set) = self.deps.get_mut(&n) {
                set.remove(&node);
            }
            self.invalidate(n);
        }
        self.dirty.remove(&node);
    }

    /// Marks `node` and its transitive dependents dirty.
    pub fn invalidate(&mut self, node: K) {
        if !self.deps.contains_key(&node) {
            return;
        }
        let mut seen = BTreeSet::new();
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            if !seen.insert(n) {
                continue;
            }
            self.dirty.insert(n);
            if let Some(children) = self.dependents.get(&n) {
                stack.extend(children.iter().copied());
            }
        }
    }

    pub fn is_dirty(&self, node: K) -> bool {
        self.dirty.contains(&node)
    }

    pub fn has_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Returns and clears the dirty set in dependency order.
    pub fn drain_dirty(&mut self) -> Vec<K> {
        let dirty = std::mem::take(&mut self.dirty);

        let mut indegree: BTreeMap<K, usize> = dirty
            .iter()
            .map(|n| {
                let count = self
                    .dependencies(*n)
                    .filter(|d| dirty.contains(d))
                    .count();
                (*n, count)
            })
            .collect();

        let mut ready: BTreeSet<K> = indegree
            .iter()
            .filter(|(_, c)| **c == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut out = Vec::with_capacity(dirty.len());

        while let Some(n) = ready.pop_first() {
            out.push(n);
            indegree.remove(&n);
            if let Some(children) = self.dependents.get(&n) {
                for c in children {
                    if let Some(count) = indegree.get_mut(c) {
                        *count -= 1;
                        if *count == 0 {
                            ready.insert(*c);
                        }
                    }
                }
            }
        }

        if !indegree.is_empty() {
            warn!(nodes = ?indegree.keys().collect::<Vec<_>>(), "dependency cycle; evaluating in key order");
            out.extend(indegree.keys().copied());
        }
        out
    }
}

/// Memoized derived values keyed by graph node.
///
/// Values are recomputed only for dirty nodes; a recompute that produces an
/// equal value is reported as unchanged.
#[derive(Debug, Clone)]
pub struct Derived<K, V> {
    graph: DependencyGraph<K>,
    values: BTreeMap<K, V>,
}

impl<K: Ord + Copy + std::fmt::Debug, V: PartialEq> Default for Derived<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Copy + std::fmt::Debug, V: PartialEq> Derived<K, V> {
    pub fn new() -> Self {
        Self {
            graph: DependencyGraph::new(),
            values: BTreeMap::new(),
        }
    }

    pub fn graph_mut(&mut self) -> &mut DependencyGraph<K> {
        &mut self.graph
    }

    pub fn graph(&self) -> &DependencyGraph<K> {
        &self.graph
    }

    pub fn get(&self, node: K) -> Option<&V> {
        self.values.get(&node)
    }

    pub fn remove(&mut self, node: K) -> Option<V> {
        self.graph.remove_node(node);
        self.values.remove(&node)
    }

    /// Recomputes dirty nodes in dependency order and returns the keys whose
    /// value changed. `compute` sees values already refreshed this pass.
    pub fn refresh<F>(&mut self, mut compute: F) -> Vec<K>
    where
        F: FnMut(K, &BTreeMap<K, V>) -> V,
    {
        let mut changed = Vec::new();
        for node in self.graph.drain_dirty() {
            let v = compute(node, &self.values);
            if self.values.get(&node) != Some(&v) {
                self.values.insert(node, v);
                changed.push(node);
            }
        }
        changed
    }
}
