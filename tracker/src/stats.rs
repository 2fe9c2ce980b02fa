use crate::context_trie::ContextTrie;

/// Tracker statistics summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerStatistics {
    /// Live nodes, root excluded
    pub nodes: usize,
    pub profiles: usize,
    pub inlined_contexts: usize,
    pub top_level_contexts: usize,
    /// Sum of payload totals over non-inlined contexts
    pub total_samples: u64,
}

impl TrackerStatistics {
    pub fn collect(trie: &ContextTrie) -> Self {
        let mut stats = TrackerStatistics::default();
        for (id, node) in trie {
            if node.is_root() {
                continue;
            }
            stats.nodes += 1;
            if node.parent() == Some(trie.root()) {
                stats.top_level_contexts += 1;
            }
            if node.is_inlined() {
                stats.inlined_contexts += 1;
            } else {
                stats.total_samples = stats.total_samples.saturating_add(trie.weight(id));
            }
        }
        stats.profiles = trie.store().len();
        stats
    }

    /// Format as a human-readable string
    pub fn format(&self) -> String {
        format!(
            "Contexts: {} nodes ({} top-level, {} inlined), {} profiles, {} samples",
            self.nodes,
            self.top_level_contexts,
            self.inlined_contexts,
            self.profiles,
            self.total_samples
        )
    }
}
