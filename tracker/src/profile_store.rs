//! Profile payload store
//!
//! Payloads live here, addressed by `ProfileId`, rather than inside trie
//! nodes. The store also keeps the reverse index from each live payload to
//! the node that owns it. Only `ContextTrie` mutates the store, so every
//! move of a payload updates both sides together.

use fxhash::FxHashMap;
use parser::FunctionSamples;
use std::fmt;

use crate::context_trie::NodeId;

/// Handle to a profile payload. Ids are never reused once the payload is
/// removed, so a stale id resolves to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProfileId(u32);

impl ProfileId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProfileStore {
    profiles: Vec<Option<FunctionSamples>>,
    owners: FxHashMap<ProfileId, NodeId>,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, samples: FunctionSamples, owner: NodeId) -> ProfileId {
        let id = ProfileId(self.profiles.len() as u32);
        self.profiles.push(Some(samples));
        self.owners.insert(id, owner);
        id
    }

    pub fn get(&self, id: ProfileId) -> Option<&FunctionSamples> {
        self.profiles.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, id: ProfileId) -> Option<&mut FunctionSamples> {
        self.profiles.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Node owning a live payload
    pub fn owner(&self, id: ProfileId) -> Option<NodeId> {
        self.owners.get(&id).copied()
    }

    pub(crate) fn set_owner(&mut self, id: ProfileId, owner: NodeId) {
        if self.get(id).is_some() {
            self.owners.insert(id, owner);
        }
    }

    /// Drop a payload and its reverse-index entry, handing the samples back
    pub(crate) fn remove(&mut self, id: ProfileId) -> Option<FunctionSamples> {
        self.owners.remove(&id);
        self.profiles.get_mut(id.index()).and_then(Option::take)
    }

    pub fn is_live(&self, id: ProfileId) -> bool {
        self.get(id).is_some()
    }

    /// Number of live payloads
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// Live payloads in allocation order
    pub fn iter(&self) -> impl Iterator<Item = (ProfileId, &FunctionSamples)> {
        self.profiles
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|samples| (ProfileId(i as u32), samples)))
    }
}
