//! Context tree dump
//!
//! Renders the trie one node per line, indented by depth:
//!
//! ```text
//! <root>
//!   main  total=1500 head=100
//!     @3 foo  total=1000 head=1000
//!       @2 bar  total=600 head=600 size=48
//!     @3 baz  [inlined]
//! ```

use std::fmt::Write;

use crate::config::DumpOptions;
use crate::context_trie::NodeId;
use crate::tracker::SampleContextTracker;

/// Dump a single node (no children) to a string.
pub fn dump_node(tracker: &SampleContextTracker, id: NodeId, options: &DumpOptions) -> String {
    let trie = tracker.trie();
    let Some(node) = trie.node(id) else {
        return String::new();
    };
    if node.is_root() {
        return "<root>".to_string();
    }

    let mut out = String::new();
    if node.parent() != Some(trie.root()) {
        write!(out, "@{} ", node.call_site_loc()).unwrap();
    }
    write!(out, "{}", tracker.display_name(node.func_name())).unwrap();
    if let Some(samples) = trie.samples(id) {
        write!(out, "  total={} head={}", samples.total_samples, samples.head_samples).unwrap();
    }
    if options.show_sizes {
        if let Some(size) = node.func_size() {
            write!(out, " size={}", size).unwrap();
        }
    }
    if node.is_inlined() {
        out.push_str("  [inlined]");
    }
    out
}

/// Dump the whole tree to a string.
pub fn dump_tree(tracker: &SampleContextTracker, options: &DumpOptions) -> String {
    let mut out = String::new();
    let mut pending = vec![(tracker.trie().root(), 0usize)];
    while let Some((id, depth)) = pending.pop() {
        writeln!(out, "{}{}", "  ".repeat(depth), dump_node(tracker, id, options)).unwrap();
        if let Some(node) = tracker.trie().node(id) {
            let children: Vec<NodeId> = node.children().collect();
            pending.extend(children.into_iter().rev().map(|child| (child, depth + 1)));
        }
    }
    out
}

/// One line per context with samples: `[context] total`
pub fn dump_contexts(tracker: &SampleContextTracker) -> String {
    let mut out = String::new();
    for (id, node) in tracker.trie() {
        let Some(samples) = tracker.trie().samples(id) else {
            continue;
        };
        let context = tracker.get_context_string(id).unwrap_or_default();
        write!(out, "[{}] {}", context, samples.total_samples).unwrap();
        if node.is_inlined() {
            out.push_str(" [inlined]");
        }
        out.push('\n');
    }
    out
}

impl SampleContextTracker {
    /// Log the tree at debug level. Only debug builds produce output.
    pub fn dump(&self) {
        if cfg!(debug_assertions) {
            log::debug!("context tree:\n{}", dump_tree(self, &DumpOptions::default()));
        }
    }
}
