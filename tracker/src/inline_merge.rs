//! Inline-merge engine
//!
//! Keeps the trie in step with the optimizer's inlining decisions:
//!
//! - Inlining a callee context folds its samples into the caller's profile
//!   (nested under the call site), marks the callee node `Inlined` and moves
//!   its children up under the caller. Base profiles no longer see it.
//! - A call that was *not* inlined gets its callee context promoted to top
//!   level, merging into an existing top-level context of the same function.
//!
//! A context that is already `Inlined` is left alone, so repeating a
//! decision changes nothing.

use parser::{FunctionId, FunctionSamples, LineLocation};

use crate::context_trie::{ContextState, NodeId};
use crate::debug_loc::CallInstruction;
use crate::profile_store::ProfileId;
use crate::tracker::SampleContextTracker;

/// Fold `samples` into `target` as an inlinee reached through `path`. Every
/// profile along the way grows by the inlinee's total.
fn fold_nested(target: &mut FunctionSamples, path: &[(LineLocation, FunctionId)], samples: &FunctionSamples) {
    let Some(((call_site, _), outer)) = path.split_last() else {
        target.merge(samples);
        return;
    };
    let mut parent = target;
    for (site, func) in outer {
        parent.add_total_samples(samples.total_samples);
        parent = parent.callsite_profile_mut(*site, func.clone());
    }
    parent.inline_callee(*call_site, samples);
}

impl SampleContextTracker {
    /// Payload of a node, created empty when missing
    fn ensure_payload(&mut self, node: NodeId) -> Option<ProfileId> {
        let existing = self.trie.node(node)?;
        if let Some(profile) = existing.profile() {
            return Some(profile);
        }
        let name = existing.func_name().clone();
        let profile = self.trie.attach_samples(node, FunctionSamples::new(name))?;
        self.register_profile(node, profile);
        Some(profile)
    }

    /// Inline the callee context at `call_site` of `caller` into it. An
    /// empty callee picks the hottest target. Returns the (now inlined)
    /// callee node, or `None` when there is no such context.
    ///
    /// Panics when `caller` is the root.
    pub fn inline_context_into_caller(
        &mut self,
        caller: NodeId,
        call_site: LineLocation,
        callee: &FunctionId,
    ) -> Option<NodeId> {
        assert!(
            caller != self.trie.root(),
            "cannot inline into the synthetic root context"
        );
        let node = self.trie.get_child_context(caller, call_site, callee)?;
        if self.trie.node(node)?.is_inlined() {
            tracing::debug!(node = %node, "context already inlined");
            return Some(node);
        }
        self.merge_context_into(node, caller)?;
        Some(node)
    }

    /// Merge context `from` into `into`.
    ///
    /// - `into` an ancestor: `from` is inlined into it. Its samples fold into
    ///   `into`'s profile, it is marked `Inlined` and its children move under
    ///   `into`.
    /// - `into` a sibling: payloads are summed, children merged, and `from`
    ///   disappears.
    /// - `into` the root: `from` is promoted to top level.
    ///
    /// A stale or already inlined `from` is a no-op. Merging a context into
    /// itself, or into anything other than an ancestor or sibling, panics.
    pub fn merge_context_into(&mut self, from: NodeId, into: NodeId) -> Option<NodeId> {
        let source = self.trie.node(from)?;
        assert!(from != into, "cannot merge context {} into itself", from);
        assert!(!source.is_root(), "cannot merge the root context");
        let source_parent = source.parent();
        let source_inlined = source.is_inlined();

        if into == self.trie.root() {
            return self.promote_merge_context_samples_tree(from);
        }
        let target_parent = self
            .trie
            .node(into)
            .unwrap_or_else(|| panic!("merge target {} does not exist", into))
            .parent();
        let ancestor = self.trie.is_ancestor(into, from);
        let sibling = source_parent == target_parent;
        assert!(
            ancestor || sibling,
            "merge target {} is neither an ancestor nor a sibling of {}",
            into,
            from
        );
        if source_inlined {
            return Some(into);
        }

        if ancestor {
            self.fold_into_ancestor(from, into)?;
            self.prune_func_to_ctxt_map();
        } else {
            self.trie.merge_sibling(from, into);
            // Payloads may have changed function
            self.populate_func_to_ctxt_map();
            tracing::debug!(from = %from, into = %into, "merged sibling contexts");
        }
        Some(into)
    }

    /// Inline `from` into its ancestor `into`. Children of `from` now sit in
    /// `into`'s code at the call site `from` was reached through, so they
    /// move there. A child whose new slot already holds inlined code (`from`
    /// itself for a recursive call) is inlined too.
    fn fold_into_ancestor(&mut self, from: NodeId, into: NodeId) -> Option<()> {
        let path = self.trie.path_between(into, from)?;
        let inlined_at = path.first()?.0;
        let callee_name = self.trie.node(from)?.func_name().clone();

        if let Some(mut samples) = self.trie.take_samples(from) {
            samples.name = callee_name.clone();
            self.ensure_payload(into)?;
            let target = self.trie.samples_mut(into)?;
            fold_nested(target, &path, &samples);
            tracing::debug!(
                callee = %callee_name,
                into = %into,
                samples = samples.total_samples,
                "inlined context into caller"
            );
        }
        self.trie.set_state(from, ContextState::Inlined);

        let children: Vec<NodeId> = self.trie.node(from)?.children().collect();
        for child in children {
            let func = self.trie.node(child)?.func_name().clone();
            let occupied_by_inlined = self
                .trie
                .get_child_context(into, inlined_at, &func)
                .and_then(|slot| self.trie.node(slot))
                .map_or(false, |slot| slot.is_inlined());
            if occupied_by_inlined {
                self.fold_into_ancestor(child, into)?;
            } else {
                self.trie.merge_subtree(child, into, inlined_at);
            }
        }
        Some(())
    }

    /// Mark the context owning a payload as inlined without moving samples.
    /// Base profiles skip it from now on.
    pub fn mark_context_samples_inlined(&mut self, profile: ProfileId) -> bool {
        let Some(node) = self.trie.store().owner(profile) else {
            return false;
        };
        self.trie.set_state(node, ContextState::Inlined);
        true
    }

    /// Move a context (with its subtree) to top level, merging into an
    /// existing top-level context of the same function. Returns the node
    /// that now holds the context.
    pub fn promote_merge_context_samples_tree(&mut self, node: NodeId) -> Option<NodeId> {
        let root = self.trie.root();
        let current = self.trie.node(node)?;
        if current.is_root() {
            return None;
        }
        if current.parent() == Some(root) {
            return Some(node);
        }
        let merged = self.trie.merge_subtree(node, root, LineLocation::zero())?;
        self.prune_func_to_ctxt_map();
        tracing::debug!(from = %node, to = %merged, "promoted context to top level");
        Some(merged)
    }

    /// Promote the callee context(s) of a call the optimizer decided not to
    /// inline. With no callee (indirect call) every non-inlined target at
    /// the call site is promoted.
    pub fn promote_merge_context_samples_tree_for(
        &mut self,
        call: &CallInstruction,
        callee: Option<&FunctionId>,
    ) -> Vec<NodeId> {
        let Some(loc) = call.debug_loc.as_ref() else {
            return Vec::new();
        };
        let Some(caller) = self.get_context_for(loc) else {
            return Vec::new();
        };
        let (owner, call_site) = self.call_site_owner(caller, loc.location);

        let targets: Vec<NodeId> = match callee {
            Some(callee) if !callee.is_empty() => self
                .trie
                .get_child_context(owner, call_site, callee)
                .into_iter()
                .collect(),
            _ => match self.trie.node(owner) {
                Some(node) => node
                    .child_entries()
                    .filter(|(key, _)| key.call_site == call_site)
                    .map(|(_, child)| child)
                    .collect(),
                None => Vec::new(),
            },
        };

        let mut promoted = Vec::new();
        for target in targets {
            if self.trie.node(target).map_or(true, |node| node.is_inlined()) {
                continue;
            }
            if let Some(node) = self.promote_merge_context_samples_tree(target) {
                promoted.push(node);
            }
        }
        promoted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerOptions;
    use crate::debug_loc::DebugLoc;
    use parser::{parse_sample_context, SampleContext, SampleProfileMap};

    fn ctx(text: &str) -> SampleContext {
        parse_sample_context(text).unwrap()
    }

    fn build(entries: &[(&str, u64)]) -> SampleContextTracker {
        let mut profiles = SampleProfileMap::new();
        for (context, total) in entries {
            let mut samples = FunctionSamples::default();
            samples.add_total_samples(*total);
            samples.add_body_samples(LineLocation::new(1, 0), *total);
            profiles.insert(ctx(context), samples);
        }
        SampleContextTracker::new(profiles, None, TrackerOptions::default())
    }

    fn node(tracker: &SampleContextTracker, context: &str) -> NodeId {
        tracker.find_context(&ctx(context)).unwrap()
    }

    fn weight(tracker: &SampleContextTracker, context: &str) -> u64 {
        tracker.trie().weight(node(tracker, context))
    }

    fn inline_fixture() -> SampleContextTracker {
        build(&[
            ("main", 100),
            ("main:3 @ foo", 40),
            ("main:3 @ foo:2 @ bar", 15),
            ("main:2 @ bar", 5),
            ("foo", 7),
        ])
    }

    #[test]
    fn test_inline_moves_samples_into_caller() {
        let mut tracker = inline_fixture();
        let main = node(&tracker, "main");
        let foo = tracker
            .inline_context_into_caller(main, LineLocation::new(3, 0), &"foo".into())
            .unwrap();

        assert!(tracker.trie().node(foo).unwrap().is_inlined());
        assert!(tracker.trie().samples(foo).is_none());

        let main_samples = tracker.trie().samples(main).unwrap();
        assert_eq!(main_samples.total_samples, 140);
        let nested = main_samples
            .callsite_profile(LineLocation::new(3, 0), &"foo".into())
            .unwrap();
        assert_eq!(nested.total_samples, 40);

        // foo's child moved to main at the call site foo was inlined at
        assert_eq!(weight(&tracker, "main:3 @ bar"), 15);
        assert_eq!(weight(&tracker, "main:2 @ bar"), 5);
        assert_eq!(tracker.trie().node(foo).unwrap().child_count(), 0);

        // Only the top-level foo payload is left on record
        let foo_profiles = &tracker.func_to_ctxt_profiles[&FunctionId::from("foo")];
        assert_eq!(foo_profiles.len(), 1);
        assert!(foo_profiles.iter().all(|&profile| tracker.trie().store().is_live(profile)));

        // Base profile of foo no longer counts the inlined context
        let base = tracker.get_base_samples_for(&"foo".into(), true).unwrap();
        assert_eq!(base.total_samples, 7);
        let base = tracker.get_base_samples_for(&"main".into(), true).unwrap();
        assert_eq!(base.total_samples, 140);
    }

    #[test]
    fn test_inline_twice_is_a_no_op() {
        let mut once = inline_fixture();
        let main = node(&once, "main");
        once.inline_context_into_caller(main, LineLocation::new(3, 0), &"foo".into());

        let mut twice = inline_fixture();
        let main = node(&twice, "main");
        twice.inline_context_into_caller(main, LineLocation::new(3, 0), &"foo".into());
        twice.inline_context_into_caller(main, LineLocation::new(3, 0), &"foo".into());

        assert_eq!(once.statistics(), twice.statistics());
        assert_eq!(
            once.create_context_less_profile_map(),
            twice.create_context_less_profile_map()
        );
        assert_eq!(weight(&twice, "main"), 140);
    }

    #[test]
    fn test_inline_recursive_callee() {
        let mut tracker = build(&[("main", 100), ("main:3 @ foo", 40), ("main:3 @ foo:3 @ foo", 10)]);
        let main = node(&tracker, "main");
        let foo = tracker
            .inline_context_into_caller(main, LineLocation::new(3, 0), &"foo".into())
            .unwrap();

        // The recursive call lands on the inlined slot and is inlined with it
        assert!(tracker.trie().node(foo).unwrap().is_inlined());
        assert_eq!(tracker.find_context(&ctx("main:3 @ foo")), Some(foo));
        let recursive = node(&tracker, "main:3 @ foo:3 @ foo");
        assert!(tracker.trie().node(recursive).unwrap().is_inlined());

        let main_samples = tracker.trie().samples(main).unwrap();
        assert_eq!(main_samples.total_samples, 150);
        let outer = main_samples
            .callsite_profile(LineLocation::new(3, 0), &"foo".into())
            .unwrap();
        assert_eq!(outer.total_samples, 50);
        let inner = outer
            .callsite_profile(LineLocation::new(3, 0), &"foo".into())
            .unwrap();
        assert_eq!(inner.total_samples, 10);

        let before = tracker.statistics();
        assert_eq!(
            tracker.inline_context_into_caller(main, LineLocation::new(3, 0), &"foo".into()),
            Some(foo)
        );
        assert_eq!(weight(&tracker, "main"), 150);
        assert_eq!(tracker.statistics(), before);
        assert!(tracker.get_base_samples_for(&"foo".into(), true).is_none());
    }

    #[test]
    fn test_queries_resolve_through_inlined_context() {
        let mut tracker = inline_fixture();
        let main = node(&tracker, "main");
        tracker.inline_context_into_caller(main, LineLocation::new(3, 0), &"foo".into());
        let moved_bar = node(&tracker, "main:3 @ bar");

        // A location in bar, inlined into foo, inlined into main
        let in_bar = DebugLoc::new("bar", LineLocation::new(1, 0)).inlined_at(
            DebugLoc::new("foo", LineLocation::new(2, 0))
                .inlined_at(DebugLoc::new("main", LineLocation::new(3, 0))),
        );
        let samples = tracker.get_context_samples_for(&in_bar).unwrap();
        assert_eq!(samples.node, moved_bar);
        assert_eq!(samples.total_samples, 15);

        // The call to bar inside the inlined foo body
        let call_loc =
            DebugLoc::new("foo", LineLocation::new(2, 0)).inlined_at(DebugLoc::new("main", LineLocation::new(3, 0)));
        assert_eq!(tracker.get_callee_context_for(&call_loc, &"bar".into()), Some(moved_bar));
        let targets: Vec<NodeId> = tracker
            .get_indirect_callee_context_samples_for(&call_loc)
            .iter()
            .map(|samples| samples.node)
            .collect();
        assert_eq!(targets, vec![moved_bar]);

        let call = CallInstruction::new(call_loc.clone());
        let callee = tracker
            .get_callee_context_samples_for(&call, Some(&"bar".into()))
            .unwrap();
        assert_eq!(callee.node, moved_bar);
        assert_eq!(callee.total_samples, 15);

        // foo's own samples now live in main
        let in_foo =
            DebugLoc::new("foo", LineLocation::new(1, 0)).inlined_at(DebugLoc::new("main", LineLocation::new(3, 0)));
        assert!(tracker.get_context_samples_for(&in_foo).is_none());
    }

    #[test]
    fn test_inline_missing_callee() {
        let mut tracker = inline_fixture();
        let main = node(&tracker, "main");
        assert!(tracker
            .inline_context_into_caller(main, LineLocation::new(9, 0), &"foo".into())
            .is_none());
        assert_eq!(weight(&tracker, "main"), 100);
    }

    #[test]
    fn test_inline_into_caller_without_samples() {
        let mut tracker = build(&[("main:3 @ foo:1 @ bar", 6)]);
        let foo = node(&tracker, "main:3 @ foo");
        assert!(tracker.trie().samples(foo).is_none());

        tracker.inline_context_into_caller(foo, LineLocation::new(1, 0), &"bar".into());
        assert_eq!(weight(&tracker, "main:3 @ foo"), 6);
        let base = tracker.get_base_samples_for(&"foo".into(), true).unwrap();
        assert_eq!(base.total_samples, 6);
        assert!(tracker.get_base_samples_for(&"bar".into(), true).is_none());
    }

    #[test]
    #[should_panic(expected = "synthetic root")]
    fn test_inline_into_root_panics() {
        let mut tracker = inline_fixture();
        let root = tracker.trie().root();
        tracker.inline_context_into_caller(root, LineLocation::zero(), &"main".into());
    }

    #[test]
    fn test_merge_into_sibling() {
        let mut tracker = build(&[("main", 1), ("main:3 @ foo", 10), ("main:3 @ bar", 4)]);
        let foo = node(&tracker, "main:3 @ foo");
        let bar = node(&tracker, "main:3 @ bar");

        assert_eq!(tracker.merge_context_into(bar, foo), Some(foo));
        assert_eq!(weight(&tracker, "main:3 @ foo"), 14);
        assert!(tracker.find_context(&ctx("main:3 @ bar")).is_none());

        // The second request finds nothing to merge
        assert!(tracker.merge_context_into(bar, foo).is_none());
        assert_eq!(weight(&tracker, "main:3 @ foo"), 14);
        assert!(tracker.get_all_context_samples_for(&"bar".into()).is_empty());
    }

    #[test]
    fn test_merge_into_grand_ancestor() {
        let mut tracker = build(&[("main", 10), ("main:3 @ foo:2 @ bar", 4)]);
        let main = node(&tracker, "main");
        let bar = node(&tracker, "main:3 @ foo:2 @ bar");

        tracker.merge_context_into(bar, main);
        let main_samples = tracker.trie().samples(main).unwrap();
        assert_eq!(main_samples.total_samples, 14);
        let foo = main_samples
            .callsite_profile(LineLocation::new(3, 0), &"foo".into())
            .unwrap();
        assert_eq!(foo.total_samples, 4);
        let bar_samples = foo
            .callsite_profile(LineLocation::new(2, 0), &"bar".into())
            .unwrap();
        assert_eq!(bar_samples.total_samples, 4);
        assert!(tracker.trie().node(bar).unwrap().is_inlined());
    }

    #[test]
    #[should_panic(expected = "into itself")]
    fn test_self_merge_panics() {
        let mut tracker = inline_fixture();
        let foo = node(&tracker, "main:3 @ foo");
        tracker.merge_context_into(foo, foo);
    }

    #[test]
    #[should_panic(expected = "neither an ancestor nor a sibling")]
    fn test_unrelated_merge_panics() {
        let mut tracker = inline_fixture();
        let bar = node(&tracker, "main:3 @ foo:2 @ bar");
        let top_foo = node(&tracker, "foo");
        tracker.merge_context_into(bar, top_foo);
    }

    #[test]
    fn test_promote_direct_call() {
        let mut tracker = build(&[
            ("main", 100),
            ("main:3 @ foo", 10),
            ("main:3 @ foo:2 @ bar", 3),
            ("foo", 5),
            ("foo:2 @ bar", 1),
        ]);
        let call = CallInstruction::new(DebugLoc::new("main", LineLocation::new(3, 0)));

        let promoted = tracker.promote_merge_context_samples_tree_for(&call, Some(&"foo".into()));
        assert_eq!(promoted, vec![node(&tracker, "foo")]);
        assert_eq!(weight(&tracker, "foo"), 15);
        assert_eq!(weight(&tracker, "foo:2 @ bar"), 4);
        assert!(tracker.find_context(&ctx("main:3 @ foo")).is_none());
        assert_eq!(tracker.func_to_ctxt_profiles[&FunctionId::from("foo")].len(), 1);
        assert_eq!(tracker.func_to_ctxt_profiles[&FunctionId::from("bar")].len(), 1);

        let base = tracker.get_base_samples_for(&"foo".into(), false).unwrap();
        assert_eq!(base.total_samples, 15);

        // Nothing left to promote
        assert!(tracker
            .promote_merge_context_samples_tree_for(&call, Some(&"foo".into()))
            .is_empty());
        assert_eq!(weight(&tracker, "foo"), 15);
    }

    #[test]
    fn test_promote_indirect_call() {
        let mut tracker = build(&[
            ("main", 100),
            ("main:3 @ a", 10),
            ("main:3 @ b", 20),
            ("main:4 @ c", 1),
        ]);
        let b_profile = tracker
            .get_context_samples_for_context(&ctx("main:3 @ b"))
            .unwrap()
            .profile;
        assert!(tracker.mark_context_samples_inlined(b_profile));

        let call = CallInstruction::new(DebugLoc::new("main", LineLocation::new(3, 0)));
        let promoted = tracker.promote_merge_context_samples_tree_for(&call, None);
        assert_eq!(promoted.len(), 1);
        assert_eq!(weight(&tracker, "a"), 10);
        assert!(tracker.find_context(&ctx("main:3 @ b")).is_some());
        assert!(tracker.find_context(&ctx("main:4 @ c")).is_some());
    }

    #[test]
    fn test_marked_context_leaves_base_profile() {
        let mut tracker = build(&[("foo", 5), ("main:3 @ foo", 10)]);
        let inner = tracker
            .get_context_samples_for_context(&ctx("main:3 @ foo"))
            .unwrap()
            .profile;
        tracker.mark_context_samples_inlined(inner);

        let base = tracker.get_base_samples_for(&"foo".into(), true).unwrap();
        assert_eq!(base.total_samples, 5);
        // Still reachable by context
        assert_eq!(weight(&tracker, "main:3 @ foo"), 10);
    }
}
