//! Context trie
//!
//! Calling contexts form a trie under a synthetic root. A child is keyed by
//! the call site in its parent plus the callee, so `main:3 @ foo:2 @ bar` is
//! the path root -> (0, main) -> (3, foo) -> (2, bar).
//!
//! Nodes live in an arena and refer to each other by `NodeId`. A parent owns
//! its children exclusively through its child map; the back-reference to the
//! parent is a plain index. Removed slots are never reused, so a stale id
//! resolves to `None` instead of to an unrelated node.

use indexmap::IndexMap;
use parser::{ContextFrame, FunctionId, FunctionSamples, LineLocation, SampleContext};
use std::collections::VecDeque;
use std::fmt;

use crate::profile_store::{ProfileId, ProfileStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    /// The synthetic root is always the first slot
    pub const ROOT: NodeId = NodeId(0);

    fn from_index(index: usize) -> Self {
        NodeId(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Key of a child in its parent's child map
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChildKey {
    pub call_site: LineLocation,
    pub callee: FunctionId,
}

impl ChildKey {
    pub fn new(call_site: LineLocation, callee: FunctionId) -> Self {
        Self { call_site, callee }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextState {
    #[default]
    Active,
    /// Samples were folded into the caller; kept for dumps only
    Inlined,
}

#[derive(Debug, Clone)]
pub struct ContextTrieNode {
    parent: Option<NodeId>,
    func_name: FunctionId,
    call_site_loc: LineLocation,
    profile: Option<ProfileId>,
    func_size: Option<u32>,
    state: ContextState,
    children: IndexMap<ChildKey, NodeId>,
}

impl ContextTrieNode {
    fn new(parent: Option<NodeId>, func_name: FunctionId, call_site_loc: LineLocation) -> Self {
        Self {
            parent,
            func_name,
            call_site_loc,
            profile: None,
            func_size: None,
            state: ContextState::Active,
            children: IndexMap::new(),
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn func_name(&self) -> &FunctionId {
        &self.func_name
    }

    /// Call site in the parent that leads here; zero for top-level contexts
    pub fn call_site_loc(&self) -> LineLocation {
        self.call_site_loc
    }

    pub fn profile(&self) -> Option<ProfileId> {
        self.profile
    }

    pub fn func_size(&self) -> Option<u32> {
        self.func_size
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn is_inlined(&self) -> bool {
        self.state == ContextState::Inlined
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Children in insertion order
    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.values().copied()
    }

    pub fn child_entries(&self) -> impl Iterator<Item = (&ChildKey, NodeId)> + '_ {
        self.children.iter().map(|(key, &child)| (key, child))
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    fn key(&self) -> ChildKey {
        ChildKey::new(self.call_site_loc, self.func_name.clone())
    }
}

#[derive(Debug, Clone)]
pub struct ContextTrie {
    nodes: Vec<Option<ContextTrieNode>>,
    store: ProfileStore,
}

impl Default for ContextTrie {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextTrie {
    pub fn new() -> Self {
        let root = ContextTrieNode::new(None, FunctionId::default(), LineLocation::zero());
        Self {
            nodes: vec![Some(root)],
            store: ProfileStore::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    pub fn node(&self, id: NodeId) -> Option<&ContextTrieNode> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut ContextTrieNode> {
        self.nodes.get_mut(id.index()).and_then(Option::as_mut)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Live nodes, root included
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn store(&self) -> &ProfileStore {
        &self.store
    }

    pub fn samples(&self, id: NodeId) -> Option<&FunctionSamples> {
        self.store.get(self.node(id)?.profile?)
    }

    pub(crate) fn samples_mut(&mut self, id: NodeId) -> Option<&mut FunctionSamples> {
        let profile = self.node(id)?.profile?;
        self.store.get_mut(profile)
    }

    /// Sample weight of a node: its payload's total, zero without one
    pub fn weight(&self, id: NodeId) -> u64 {
        self.samples(id).map_or(0, |samples| samples.total_samples)
    }

    /// Child for `callee` at `call_site`. An empty callee stands for an
    /// unknown (indirect) target and resolves to the hottest child there.
    pub fn get_child_context(
        &self,
        parent: NodeId,
        call_site: LineLocation,
        callee: &FunctionId,
    ) -> Option<NodeId> {
        if callee.is_empty() {
            return self.get_hottest_child_context(parent, call_site);
        }
        self.node(parent)?
            .children
            .get(&ChildKey::new(call_site, callee.clone()))
            .copied()
    }

    /// Like `get_child_context`, but creates the child when it is missing
    /// and `allow_create` is set. An empty callee never creates anything.
    pub fn get_or_create_child_context(
        &mut self,
        parent: NodeId,
        call_site: LineLocation,
        callee: FunctionId,
        allow_create: bool,
    ) -> Option<NodeId> {
        if callee.is_empty() {
            return self.get_hottest_child_context(parent, call_site);
        }
        let key = ChildKey::new(call_site, callee);
        if let Some(&child) = self.node(parent)?.children.get(&key) {
            return Some(child);
        }
        if !allow_create {
            return None;
        }

        let id = NodeId::from_index(self.nodes.len());
        self.nodes.push(Some(ContextTrieNode::new(
            Some(parent),
            key.callee.clone(),
            call_site,
        )));
        self.node_mut(parent)?.children.insert(key, id);
        log::trace!("created context node {} under {}", id, parent);
        Some(id)
    }

    /// Hottest child at a call site, by payload total samples.
    ///
    /// Children are scanned in insertion order and only a strictly larger
    /// weight replaces the current pick, so the first-inserted child wins a
    /// tie. Children with no samples (or zero samples) are never returned.
    pub fn get_hottest_child_context(&self, parent: NodeId, call_site: LineLocation) -> Option<NodeId> {
        let mut hottest = None;
        let mut max_samples = 0;
        for (key, &child) in &self.node(parent)?.children {
            if key.call_site != call_site {
                continue;
            }
            let Some(samples) = self.samples(child) else {
                continue;
            };
            if samples.total_samples > max_samples {
                max_samples = samples.total_samples;
                hottest = Some(child);
            }
        }
        hottest
    }

    /// Detach and discard a child subtree, payloads included. Returns false
    /// when there was no such child.
    pub fn remove_child_context(
        &mut self,
        parent: NodeId,
        call_site: LineLocation,
        callee: &FunctionId,
    ) -> bool {
        let key = ChildKey::new(call_site, callee.clone());
        let removed = match self.node_mut(parent) {
            Some(node) => node.children.shift_remove(&key),
            None => None,
        };
        match removed {
            Some(child) => {
                self.free_subtree(child);
                true
            }
            None => false,
        }
    }

    fn free_subtree(&mut self, id: NodeId) {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let Some(node) = self.nodes.get_mut(id.index()).and_then(Option::take) else {
                continue;
            };
            if let Some(profile) = node.profile {
                self.store.remove(profile);
            }
            pending.extend(node.children.values().copied());
        }
    }

    /// Give a node samples. A node that already has a payload absorbs them.
    /// The root never holds samples.
    pub fn attach_samples(&mut self, id: NodeId, samples: FunctionSamples) -> Option<ProfileId> {
        let node = self.node(id)?;
        if node.is_root() {
            return None;
        }
        let existing = node.profile;
        match existing {
            Some(profile) => {
                self.store.get_mut(profile)?.merge(&samples);
                Some(profile)
            }
            None => {
                let profile = self.store.insert(samples, id);
                self.node_mut(id)?.profile = Some(profile);
                Some(profile)
            }
        }
    }

    /// Detach a node's payload, dropping it from the store
    pub(crate) fn take_samples(&mut self, id: NodeId) -> Option<FunctionSamples> {
        let profile = self.node_mut(id)?.profile.take()?;
        self.store.remove(profile)
    }

    pub(crate) fn set_state(&mut self, id: NodeId, state: ContextState) {
        if let Some(node) = self.node_mut(id) {
            node.state = state;
        }
    }

    pub fn add_function_size(&mut self, id: NodeId, size: u32) {
        if let Some(node) = self.node_mut(id) {
            node.func_size = Some(node.func_size.unwrap_or(0).saturating_add(size));
        }
    }

    pub fn function_size(&self, id: NodeId) -> Option<u32> {
        self.node(id)?.func_size
    }

    /// Whether `ancestor` lies strictly above `id`
    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = self.node(id).and_then(ContextTrieNode::parent);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.node(parent).and_then(ContextTrieNode::parent);
        }
        false
    }

    /// (call site, callee) steps leading from `ancestor` down to `id`
    pub fn path_between(&self, ancestor: NodeId, id: NodeId) -> Option<Vec<(LineLocation, FunctionId)>> {
        let mut path = Vec::new();
        let mut current = id;
        while current != ancestor {
            let node = self.node(current)?;
            path.push((node.call_site_loc, node.func_name.clone()));
            current = node.parent?;
        }
        path.reverse();
        Some(path)
    }

    /// Calling context a node stands for; `None` for the root
    pub fn context_of(&self, id: NodeId) -> Option<SampleContext> {
        let path = self.path_between(NodeId::ROOT, id)?;
        if path.is_empty() {
            return None;
        }
        let mut frames = Vec::with_capacity(path.len());
        for (i, (_, func)) in path.iter().enumerate() {
            let location = path
                .get(i + 1)
                .map_or(LineLocation::zero(), |(call_site, _)| *call_site);
            frames.push(ContextFrame::new(func.clone(), location));
        }
        Some(SampleContext::new(frames))
    }

    fn detach(&mut self, id: NodeId) {
        let Some(node) = self.node(id) else {
            return;
        };
        let (Some(parent), key) = (node.parent, node.key()) else {
            return;
        };
        if let Some(parent) = self.node_mut(parent) {
            parent.children.shift_remove(&key);
        }
    }

    /// Move `from` and its subtree under `to_parent` at `call_site`. When
    /// `to_parent` already has a child with that key the two subtrees merge
    /// and their counts are summed. Returns the node now holding the context.
    pub(crate) fn merge_subtree(
        &mut self,
        from: NodeId,
        to_parent: NodeId,
        call_site: LineLocation,
    ) -> Option<NodeId> {
        assert!(from != NodeId::ROOT, "cannot move the root context");
        assert!(
            from != to_parent && !self.is_ancestor(from, to_parent),
            "cannot move context {} under its own subtree",
            from
        );
        let func_name = self.node(from)?.func_name.clone();
        self.node(to_parent)?;

        self.detach(from);
        let key = ChildKey::new(call_site, func_name);
        let existing = self.node(to_parent)?.children.get(&key).copied();
        match existing {
            None => {
                let node = self.node_mut(from)?;
                node.parent = Some(to_parent);
                node.call_site_loc = call_site;
                self.node_mut(to_parent)?.children.insert(key, from);
                log::trace!("moved context {} under {} at {}", from, to_parent, call_site);
                Some(from)
            }
            Some(to) => {
                self.merge_node_into(from, to);
                Some(to)
            }
        }
    }

    /// Merge `from` into a sibling `into`; `from` disappears
    pub(crate) fn merge_sibling(&mut self, from: NodeId, into: NodeId) {
        assert!(
            from != into && !self.is_ancestor(from, into),
            "cannot merge context {} into its own subtree",
            from
        );
        self.detach(from);
        self.merge_node_into(from, into);
    }

    /// Fold detached node `from` into `to`. Payloads are
    /// summed, or transferred when only `from` has one; children merge
    /// recursively; `from` is freed.
    fn merge_node_into(&mut self, from: NodeId, to: NodeId) {
        let Some(source) = self.node(from) else {
            return;
        };
        let source_profile = source.profile;
        let source_state = source.state;
        let source_size = source.func_size;
        let children: Vec<(LineLocation, NodeId)> = source
            .children
            .iter()
            .map(|(key, &child)| (key.call_site, child))
            .collect();
        let target_profile = self.node(to).and_then(ContextTrieNode::profile);

        match (source_profile, target_profile) {
            (Some(source_profile), Some(target_profile)) => {
                if let Some(samples) = self.store.remove(source_profile) {
                    if let Some(target) = self.store.get_mut(target_profile) {
                        target.merge(&samples);
                    }
                }
            }
            (Some(source_profile), None) => {
                self.store.set_owner(source_profile, to);
                if let Some(target) = self.node_mut(to) {
                    target.profile = Some(source_profile);
                }
            }
            _ => {}
        }
        if let Some(target) = self.node_mut(to) {
            if source_state == ContextState::Active {
                target.state = ContextState::Active;
            }
            if target.func_size.is_none() {
                target.func_size = source_size;
            }
        }
        if let Some(source) = self.node_mut(from) {
            source.profile = None;
        }

        for (call_site, child) in children {
            self.merge_subtree(child, to, call_site);
        }
        self.nodes[from.index()] = None;
        log::trace!("merged context {} into {}", from, to);
    }

    /// Breadth-first walk from the root
    pub fn iter(&self) -> ContextTrieIter<'_> {
        self.iter_from(NodeId::ROOT)
    }

    /// Breadth-first walk of the subtree under `start`
    pub fn iter_from(&self, start: NodeId) -> ContextTrieIter<'_> {
        ContextTrieIter {
            trie: self,
            queue: VecDeque::from([start]),
        }
    }
}

/// Breadth-first iterator over the trie. Children are visited in insertion
/// order; the iterator owns its queue of pending ids.
#[derive(Clone)]
pub struct ContextTrieIter<'a> {
    trie: &'a ContextTrie,
    queue: VecDeque<NodeId>,
}

impl<'a> Iterator for ContextTrieIter<'a> {
    type Item = (NodeId, &'a ContextTrieNode);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.queue.pop_front() {
            if let Some(node) = self.trie.node(id) {
                self.queue.extend(node.children.values().copied());
                return Some((id, node));
            }
        }
        None
    }
}

impl<'a> IntoIterator for &'a ContextTrie {
    type Item = (NodeId, &'a ContextTrieNode);
    type IntoIter = ContextTrieIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(line: u32) -> LineLocation {
        LineLocation::new(line, 0)
    }

    fn samples(name: &str, total: u64) -> FunctionSamples {
        let mut samples = FunctionSamples::new(name);
        samples.add_total_samples(total);
        samples
    }

    #[test]
    fn test_get_or_create_child() {
        let mut trie = ContextTrie::new();
        let root = trie.root();
        assert!(trie
            .get_or_create_child_context(root, loc(0), "main".into(), false)
            .is_none());
        assert_eq!(trie.node_count(), 1);

        let main = trie
            .get_or_create_child_context(root, loc(0), "main".into(), true)
            .unwrap();
        let again = trie
            .get_or_create_child_context(root, loc(0), "main".into(), false)
            .unwrap();
        assert_eq!(main, again);
        assert_eq!(trie.get_child_context(root, loc(0), &"main".into()), Some(main));
        assert_eq!(trie.node(main).unwrap().parent(), Some(root));
        assert_eq!(trie.node_count(), 2);
    }

    #[test]
    fn test_hottest_child_picks_largest() {
        let mut trie = ContextTrie::new();
        let main = trie
            .get_or_create_child_context(trie.root(), loc(0), "main".into(), true)
            .unwrap();
        for (name, total) in [("a", 10), ("b", 50), ("c", 20)] {
            let child = trie
                .get_or_create_child_context(main, loc(4), name.into(), true)
                .unwrap();
            trie.attach_samples(child, samples(name, total));
        }
        // A hotter child at another call site does not count
        let other = trie
            .get_or_create_child_context(main, loc(5), "d".into(), true)
            .unwrap();
        trie.attach_samples(other, samples("d", 500));

        let hottest = trie.get_hottest_child_context(main, loc(4)).unwrap();
        assert_eq!(trie.node(hottest).unwrap().func_name(), &FunctionId::from("b"));
        // The empty callee delegates to the hottest child
        assert_eq!(trie.get_child_context(main, loc(4), &FunctionId::default()), Some(hottest));
    }

    #[test]
    fn test_hottest_child_tie_goes_to_first_inserted() {
        let mut trie = ContextTrie::new();
        let main = trie
            .get_or_create_child_context(trie.root(), loc(0), "main".into(), true)
            .unwrap();
        let no_samples = trie
            .get_or_create_child_context(main, loc(1), "cold".into(), true)
            .unwrap();
        let first = trie
            .get_or_create_child_context(main, loc(1), "first".into(), true)
            .unwrap();
        let second = trie
            .get_or_create_child_context(main, loc(1), "second".into(), true)
            .unwrap();
        trie.attach_samples(first, samples("first", 30));
        trie.attach_samples(second, samples("second", 30));

        assert_eq!(trie.get_hottest_child_context(main, loc(1)), Some(first));
        assert_ne!(trie.get_hottest_child_context(main, loc(1)), Some(no_samples));
        assert!(trie.get_hottest_child_context(main, loc(9)).is_none());
    }

    #[test]
    fn test_remove_child_frees_payloads() {
        let mut trie = ContextTrie::new();
        let main = trie
            .get_or_create_child_context(trie.root(), loc(0), "main".into(), true)
            .unwrap();
        let foo = trie
            .get_or_create_child_context(main, loc(3), "foo".into(), true)
            .unwrap();
        let bar = trie
            .get_or_create_child_context(foo, loc(2), "bar".into(), true)
            .unwrap();
        let profile = trie.attach_samples(bar, samples("bar", 5)).unwrap();

        assert!(trie.remove_child_context(main, loc(3), &"foo".into()));
        assert!(trie.node(foo).is_none());
        assert!(trie.node(bar).is_none());
        assert!(trie.store().get(profile).is_none());
        assert!(trie.store().owner(profile).is_none());
        assert_eq!(trie.node(main).unwrap().child_count(), 0);

        // Absent child: silent no-op
        assert!(!trie.remove_child_context(main, loc(3), &"foo".into()));
    }

    #[test]
    fn test_bfs_order() {
        let mut trie = ContextTrie::new();
        let root = trie.root();
        let a = trie.get_or_create_child_context(root, loc(0), "a".into(), true).unwrap();
        let b = trie.get_or_create_child_context(root, loc(0), "b".into(), true).unwrap();
        let a1 = trie.get_or_create_child_context(a, loc(1), "a1".into(), true).unwrap();
        let b1 = trie.get_or_create_child_context(b, loc(1), "b1".into(), true).unwrap();

        let order: Vec<NodeId> = trie.iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec![root, a, b, a1, b1]);

        // Restartable
        assert_eq!(trie.iter().count(), 5);
        assert_eq!((&trie).into_iter().count(), 5);
    }

    #[test]
    fn test_context_of_node() {
        let mut trie = ContextTrie::new();
        let main = trie
            .get_or_create_child_context(trie.root(), loc(0), "main".into(), true)
            .unwrap();
        let foo = trie
            .get_or_create_child_context(main, LineLocation::new(3, 1), "foo".into(), true)
            .unwrap();
        assert_eq!(trie.context_of(foo).unwrap().to_string(), "main:3.1 @ foo");
        assert!(trie.context_of(trie.root()).is_none());
        assert!(trie.is_ancestor(main, foo));
        assert!(!trie.is_ancestor(foo, main));
    }

    #[test]
    fn test_merge_subtree_sums_on_conflict() {
        let mut trie = ContextTrie::new();
        let root = trie.root();
        let main = trie.get_or_create_child_context(root, loc(0), "main".into(), true).unwrap();
        let foo = trie.get_or_create_child_context(main, loc(3), "foo".into(), true).unwrap();
        let foo_bar = trie.get_or_create_child_context(foo, loc(2), "bar".into(), true).unwrap();
        trie.attach_samples(foo, samples("foo", 10));
        trie.attach_samples(foo_bar, samples("bar", 4));

        let top_foo = trie.get_or_create_child_context(root, loc(0), "foo".into(), true).unwrap();
        let top_profile = trie.attach_samples(top_foo, samples("foo", 1)).unwrap();

        let merged = trie.merge_subtree(foo, root, LineLocation::zero()).unwrap();
        assert_eq!(merged, top_foo);
        assert!(trie.node(foo).is_none());
        assert_eq!(trie.weight(top_foo), 11);
        assert_eq!(trie.node(main).unwrap().child_count(), 0);

        // The childless target adopted bar, keeping its payload id
        let bar = trie.get_child_context(top_foo, loc(2), &"bar".into()).unwrap();
        assert_eq!(bar, foo_bar);
        assert_eq!(trie.node(bar).unwrap().parent(), Some(top_foo));
        assert_eq!(trie.store().owner(top_profile), Some(top_foo));
    }
}
