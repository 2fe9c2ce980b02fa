//! Sample context tracker
//!
//! Owns the context trie built from a profile and answers the optimizer's
//! queries: the samples of an (inlined) location, of a callee at a call
//! site, of every possible target of an indirect call, and base profiles
//! with context folded away. The mutating side (inlining, promotion) lives
//! in `inline_merge`.

use fxhash::FxHashMap;
use parser::{
    ContextLessProfileMap, FunctionId, FunctionSamples, LineLocation, SampleContext,
    SampleProfileMap,
};
use std::borrow::Cow;
use std::ops::Deref;

use crate::config::TrackerOptions;
use crate::context_trie::{ContextTrie, ContextTrieNode, NodeId};
use crate::debug_loc::{CallInstruction, DebugLoc};
use crate::profile_store::ProfileId;
use crate::stats::TrackerStatistics;

/// Samples of one context, with the handles to find it again
#[derive(Debug, Clone, Copy)]
pub struct ContextSamples<'a> {
    pub node: NodeId,
    pub profile: ProfileId,
    pub samples: &'a FunctionSamples,
}

impl Deref for ContextSamples<'_> {
    type Target = FunctionSamples;

    fn deref(&self) -> &FunctionSamples {
        self.samples
    }
}

#[derive(Debug, Clone)]
pub struct SampleContextTracker {
    pub(crate) trie: ContextTrie,
    /// Live payloads of each function. Structural changes that drop
    /// payloads prune it.
    pub(crate) func_to_ctxt_profiles: FxHashMap<FunctionId, Vec<ProfileId>>,
    guid_to_func_name: Option<FxHashMap<u64, String>>,
    options: TrackerOptions,
}

impl Default for SampleContextTracker {
    fn default() -> Self {
        Self::new(SampleProfileMap::new(), None, TrackerOptions::default())
    }
}

impl SampleContextTracker {
    /// Build the trie from context profiles. Every context becomes a path;
    /// the leaf node takes the profile.
    pub fn new(
        profiles: SampleProfileMap,
        guid_to_func_name: Option<FxHashMap<u64, String>>,
        options: TrackerOptions,
    ) -> Self {
        let mut tracker = Self {
            trie: ContextTrie::new(),
            func_to_ctxt_profiles: FxHashMap::default(),
            guid_to_func_name,
            options,
        };

        for (context, mut samples) in profiles {
            let Some(node) = tracker.get_or_create_context_path(&context, true) else {
                continue;
            };
            if samples.name.is_empty() {
                if let Some(leaf) = context.leaf() {
                    samples.name = leaf.clone();
                }
            }
            let had_payload = tracker.trie.node(node).and_then(ContextTrieNode::profile).is_some();
            if let Some(profile) = tracker.trie.attach_samples(node, samples) {
                if !had_payload {
                    tracker.register_profile(node, profile);
                }
            }
            log::debug!("added context [{}] as {}", context, node);
        }

        log::debug!(
            "built context trie: {} nodes, {} profiles",
            tracker.trie.node_count(),
            tracker.trie.store().len()
        );
        tracker
    }

    pub fn trie(&self) -> &ContextTrie {
        &self.trie
    }

    pub fn options(&self) -> &TrackerOptions {
        &self.options
    }

    pub(crate) fn register_profile(&mut self, node: NodeId, profile: ProfileId) {
        if let Some(name) = self.trie.node(node).map(|n| n.func_name().clone()) {
            self.func_to_ctxt_profiles.entry(name).or_default().push(profile);
        }
    }

    fn context_samples(&self, node: NodeId) -> Option<ContextSamples<'_>> {
        let profile = self.trie.node(node)?.profile()?;
        let samples = self.trie.store().get(profile)?;
        Some(ContextSamples {
            node,
            profile,
            samples,
        })
    }

    /// Walk (or build, with `allow_create`) the path for a context.
    pub fn get_or_create_context_path(
        &mut self,
        context: &SampleContext,
        allow_create: bool,
    ) -> Option<NodeId> {
        if context.is_empty() {
            return None;
        }
        let mut node = self.trie.root();
        let mut call_site = LineLocation::zero();
        for frame in context.frames() {
            node = self
                .trie
                .get_or_create_child_context(node, call_site, frame.func.clone(), allow_create)?;
            call_site = frame.location;
        }
        Some(node)
    }

    /// Node for a context, without creating anything
    pub fn find_context(&self, context: &SampleContext) -> Option<NodeId> {
        if context.is_empty() {
            return None;
        }
        let mut node = self.trie.root();
        let mut call_site = LineLocation::zero();
        for frame in context.frames() {
            node = self.trie.get_child_context(node, call_site, &frame.func)?;
            call_site = frame.location;
        }
        Some(node)
    }

    /// Child of `node` for `callee` at `call_site`. Children of an inlined
    /// context move to its caller at the call site it was inlined at, so a
    /// miss under an inlined node retries there.
    fn resolve_child(&self, node: NodeId, call_site: LineLocation, callee: &FunctionId) -> Option<NodeId> {
        if let Some(child) = self.trie.get_child_context(node, call_site, callee) {
            return Some(child);
        }
        let current = self.trie.node(node)?;
        let parent = current
            .parent()
            .filter(|&parent| current.is_inlined() && parent != self.trie.root())?;
        self.resolve_child(parent, current.call_site_loc(), callee)
    }

    /// Node and call site that hold the callees of calls made at
    /// `call_site` in `node`, following inlined contexts whose children
    /// have moved up.
    pub(crate) fn call_site_owner(&self, node: NodeId, call_site: LineLocation) -> (NodeId, LineLocation) {
        let (mut node, mut call_site) = (node, call_site);
        while let Some(current) = self.trie.node(node) {
            let kept = current.child_entries().any(|(key, _)| key.call_site == call_site);
            match current.parent() {
                Some(parent) if current.is_inlined() && !kept && parent != self.trie.root() => {
                    call_site = current.call_site_loc();
                    node = parent;
                }
                _ => break,
            }
        }
        (node, call_site)
    }

    /// Node of the function a debug location sits in, following its
    /// inline chain from the outermost function inward.
    pub fn get_context_for(&self, loc: &DebugLoc) -> Option<NodeId> {
        let mut node = self.trie.root();
        for (call_site, func) in loc.context_stack() {
            node = self.resolve_child(node, call_site, &func)?;
        }
        Some(node)
    }

    /// Node of the callee at the call `loc` points to. An empty callee
    /// picks the hottest target there.
    pub fn get_callee_context_for(&self, loc: &DebugLoc, callee: &FunctionId) -> Option<NodeId> {
        let caller = self.get_context_for(loc)?;
        self.resolve_child(caller, loc.location, callee)
    }

    /// Samples of the context a debug location resolves to
    pub fn get_context_samples_for(&self, loc: &DebugLoc) -> Option<ContextSamples<'_>> {
        let node = self.get_context_for(loc)?;
        let samples = self.context_samples(node);
        if samples.is_some() {
            log::debug!("resolved {} at {} to {}", loc.scope, loc.location, node);
        }
        samples
    }

    /// Samples of the callee context for a call. `None` for the callee
    /// means an indirect call; the hottest target's context is used. A
    /// missing direct-callee context is created when the options allow it.
    pub fn get_callee_context_samples_for(
        &mut self,
        call: &CallInstruction,
        callee: Option<&FunctionId>,
    ) -> Option<ContextSamples<'_>> {
        let loc = call.debug_loc.as_ref()?;
        let caller = self.get_context_for(loc)?;
        let node = match callee {
            Some(callee) if !callee.is_empty() => match self.resolve_child(caller, loc.location, callee) {
                Some(node) => node,
                None => {
                    let (owner, call_site) = self.call_site_owner(caller, loc.location);
                    self.trie.get_or_create_child_context(
                        owner,
                        call_site,
                        callee.clone(),
                        self.options.create_callee_contexts,
                    )?
                }
            },
            _ => {
                let (owner, call_site) = self.call_site_owner(caller, loc.location);
                self.trie.get_hottest_child_context(owner, call_site)?
            }
        };
        self.context_samples(node)
    }

    /// Every callee context with samples at an indirect call site, in
    /// insertion order
    pub fn get_indirect_callee_context_samples_for(&self, loc: &DebugLoc) -> Vec<ContextSamples<'_>> {
        let Some(caller) = self.get_context_for(loc) else {
            return Vec::new();
        };
        let (owner, call_site) = self.call_site_owner(caller, loc.location);
        let Some(node) = self.trie.node(owner) else {
            return Vec::new();
        };
        node.child_entries()
            .filter(|(key, _)| key.call_site == call_site)
            .filter_map(|(_, child)| self.context_samples(child))
            .collect()
    }

    /// Samples stored for an exact context
    pub fn get_context_samples_for_context(&self, context: &SampleContext) -> Option<ContextSamples<'_>> {
        self.context_samples(self.find_context(context)?)
    }

    /// Every live context profile of a function, inlined ones included
    pub fn get_all_context_samples_for(&self, name: &FunctionId) -> Vec<ContextSamples<'_>> {
        let Some(profiles) = self.func_to_ctxt_profiles.get(name) else {
            return Vec::new();
        };
        profiles
            .iter()
            .filter_map(|&profile| {
                let node = self.trie.store().owner(profile)?;
                self.context_samples(node)
            })
            .collect()
    }

    /// Base profile of a function.
    ///
    /// With `merge_context` the result sums every context of the function
    /// that is not marked inlined. Without it, only the top-level context's
    /// own samples are returned.
    pub fn get_base_samples_for(
        &self,
        name: &FunctionId,
        merge_context: bool,
    ) -> Option<Cow<'_, FunctionSamples>> {
        if !merge_context {
            let node = self
                .trie
                .get_child_context(self.trie.root(), LineLocation::zero(), name)?;
            return self.trie.samples(node).map(Cow::Borrowed);
        }

        let mut active = self
            .get_all_context_samples_for(name)
            .into_iter()
            .filter(|samples| {
                self.trie
                    .node(samples.node)
                    .map_or(false, |node| !node.is_inlined())
            });
        let first = active.next()?;
        let mut rest = active.peekable();
        if rest.peek().is_none() {
            return Some(Cow::Borrowed(first.samples));
        }

        let mut merged = first.samples.clone();
        for samples in rest {
            merged.merge(samples.samples);
        }
        Some(Cow::Owned(merged))
    }

    /// Base profile using the configured `merge-context` default
    pub fn get_base_samples(&self, name: &FunctionId) -> Option<Cow<'_, FunctionSamples>> {
        self.get_base_samples_for(name, self.options.merge_context)
    }

    /// Rebuild the function to profiles map from the trie
    pub fn populate_func_to_ctxt_map(&mut self) {
        let mut map: FxHashMap<FunctionId, Vec<ProfileId>> = FxHashMap::default();
        for (_, node) in &self.trie {
            if let Some(profile) = node.profile() {
                map.entry(node.func_name().clone()).or_default().push(profile);
            }
        }
        self.func_to_ctxt_profiles = map;
    }

    /// Drop ids whose payload was merged away or folded into a caller
    pub(crate) fn prune_func_to_ctxt_map(&mut self) {
        let store = self.trie.store();
        self.func_to_ctxt_profiles.retain(|_, profiles| {
            profiles.retain(|&profile| store.is_live(profile));
            !profiles.is_empty()
        });
    }

    /// Owner of a payload, through the reverse index
    pub fn get_context_node_for_profile(&self, profile: ProfileId) -> Option<NodeId> {
        self.trie.store().owner(profile)
    }

    /// One profile per function, summing its non-inlined contexts. Function
    /// order follows breadth-first discovery.
    pub fn create_context_less_profile_map(&self) -> ContextLessProfileMap {
        let mut profiles = ContextLessProfileMap::new();
        for (id, node) in &self.trie {
            if node.is_inlined() {
                continue;
            }
            if let Some(samples) = self.trie.samples(id) {
                profiles
                    .entry(node.func_name().clone())
                    .or_insert_with(|| FunctionSamples::new(node.func_name().clone()))
                    .merge(samples);
            }
        }
        profiles
    }

    /// Readable name for a function identity, through the name table for
    /// hashed identities
    pub fn display_name(&self, func: &FunctionId) -> String {
        match func {
            FunctionId::Name(name) => name.clone(),
            FunctionId::Hash(hash) => self
                .guid_to_func_name
                .as_ref()
                .and_then(|names| names.get(hash))
                .cloned()
                .unwrap_or_else(|| hash.to_string()),
        }
    }

    pub fn get_func_name_for(&self, node: NodeId) -> Option<String> {
        Some(self.display_name(self.trie.node(node)?.func_name()))
    }

    /// Readable context of a node, e.g. `main:3 @ foo`
    pub fn get_context_string(&self, node: NodeId) -> Option<String> {
        let context = self.trie.context_of(node)?;
        let last = context.frames().len() - 1;
        let frames: Vec<String> = context
            .frames()
            .iter()
            .enumerate()
            .map(|(i, frame)| {
                let name = self.display_name(&frame.func);
                if i == last {
                    name
                } else {
                    format!("{}:{}", name, frame.location)
                }
            })
            .collect();
        Some(frames.join(" @ "))
    }

    pub fn add_function_size(&mut self, node: NodeId, size: u32) {
        self.trie.add_function_size(node, size);
    }

    pub fn function_size(&self, node: NodeId) -> Option<u32> {
        self.trie.function_size(node)
    }

    pub fn statistics(&self) -> TrackerStatistics {
        TrackerStatistics::collect(&self.trie)
    }
}
