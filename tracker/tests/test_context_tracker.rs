//! Context tracker tests over the profiles in tests/data
//!
//! Every fixture is loaded through the same path the CLI uses. The generic
//! checks run over all of them; the named tests pin down behaviour of
//! particular fixtures.

use std::path::{Path, PathBuf};

use parser::{parse_sample_context, FunctionId, LineLocation, SampleContext};
use tracker::dump::{dump_contexts, dump_tree};
use tracker::{
    load_profile, logging, CallInstruction, DebugLoc, DumpOptions, LoadedProfile,
    SampleContextTracker, TrackerConfig, TrackerOptions,
};
use walkdir::WalkDir;

fn data_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("data")
}

fn fixtures() -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(data_dir())
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

fn load(name: &str) -> LoadedProfile {
    logging::init_test();
    load_profile(&data_dir().join(name), &TrackerConfig::default())
        .unwrap_or_else(|e| panic!("failed to load {}: {}", name, e))
}

fn tracker_for(name: &str) -> SampleContextTracker {
    load(name).into_tracker(TrackerOptions::default())
}

fn ctx(text: &str) -> SampleContext {
    parse_sample_context(text).unwrap()
}

fn call_at(func: &str, line: u32) -> CallInstruction {
    CallInstruction::new(DebugLoc::new(func, LineLocation::new(line, 0)))
}

#[test]
fn test_every_fixture_loads_and_resolves() {
    let files = fixtures();
    assert!(files.len() >= 4, "fixtures missing from {}", data_dir().display());

    for path in files {
        logging::init_test();
        let loaded = load_profile(&path, &TrackerConfig::default())
            .unwrap_or_else(|e| panic!("failed to load {}: {}", path.display(), e));
        let contexts: Vec<SampleContext> = loaded.profiles.keys().cloned().collect();
        let tracker = loaded.into_tracker(TrackerOptions::default());

        for context in &contexts {
            let samples = tracker
                .get_context_samples_for_context(context)
                .unwrap_or_else(|| panic!("{}: context [{}] not in trie", path.display(), context));
            assert_eq!(tracker.trie().context_of(samples.node).as_ref(), Some(context));
        }

        let stats = tracker.statistics();
        assert_eq!(stats.profiles, contexts.len(), "{}", path.display());
        assert!(stats.nodes >= contexts.len());
        assert_eq!(tracker.trie().iter().count(), stats.nodes + 1);
    }
}

#[test]
fn test_inline_chain_resolution() {
    let tracker = tracker_for("inline_chain.prof");

    // bar's code inlined into foo at 2, foo inlined into main at 3
    let loc = DebugLoc::new("bar", LineLocation::new(1, 0)).inlined_at(
        DebugLoc::new("foo", LineLocation::new(2, 0))
            .inlined_at(DebugLoc::new("main", LineLocation::new(3, 0))),
    );
    let bar = tracker.get_context_samples_for(&loc).unwrap();
    assert_eq!(bar.total_samples, 600);
    assert_eq!(bar.name, FunctionId::from("bar"));

    // One level missing: nothing, and nothing created
    let loc = DebugLoc::new("bar", LineLocation::new(1, 0))
        .inlined_at(DebugLoc::new("main", LineLocation::new(9, 0)));
    assert!(tracker.get_context_samples_for(&loc).is_none());
}

#[test]
fn test_inline_then_base_profiles() {
    let mut tracker = tracker_for("inline_chain.prof");
    let before = tracker.get_base_samples_for(&"foo".into(), true).unwrap().total_samples;
    assert_eq!(before, 1050);

    let main = tracker.find_context(&ctx("main")).unwrap();
    let inlined = tracker
        .inline_context_into_caller(main, LineLocation::new(3, 0), &"foo".into())
        .unwrap();

    // foo's standalone weight is gone from its base profile
    let after = tracker.get_base_samples_for(&"foo".into(), true).unwrap();
    assert_eq!(after.total_samples, 50);
    // main's profile carries it now
    let main_base = tracker.get_base_samples_for(&"main".into(), true).unwrap();
    assert_eq!(main_base.total_samples, 2500);
    // bar moved up under main at foo's call site
    let bar = tracker.get_context_samples_for_context(&ctx("main:3 @ bar")).unwrap();
    assert_eq!(bar.total_samples, 600);
    assert!(tracker.find_context(&ctx("main:2 @ bar")).is_none());
    // The optimizer's view of bar's code is unchanged
    let loc = DebugLoc::new("bar", LineLocation::new(1, 0)).inlined_at(
        DebugLoc::new("foo", LineLocation::new(2, 0))
            .inlined_at(DebugLoc::new("main", LineLocation::new(3, 0))),
    );
    assert_eq!(tracker.get_context_samples_for(&loc).map(|samples| samples.node), Some(bar.node));

    let stats = tracker.statistics();
    assert_eq!(stats.inlined_contexts, 1);

    // Repeating the decision changes nothing
    let again = tracker.inline_context_into_caller(main, LineLocation::new(3, 0), &"foo".into());
    assert_eq!(again, Some(inlined));
    assert_eq!(tracker.statistics(), stats);

    let dump = dump_tree(&tracker, &DumpOptions::default());
    assert!(dump.contains("@3 foo  [inlined]"));
}

#[test]
fn test_promote_not_inlined_call() {
    let mut tracker = tracker_for("inline_chain.prof");
    let promoted =
        tracker.promote_merge_context_samples_tree_for(&call_at("main", 3), Some(&"foo".into()));
    assert_eq!(promoted.len(), 1);

    let foo = tracker.get_context_samples_for_context(&ctx("foo")).unwrap();
    assert_eq!(foo.total_samples, 1050);
    assert_eq!(foo.node, promoted[0]);
    let bar = tracker.get_context_samples_for_context(&ctx("foo:2 @ bar")).unwrap();
    assert_eq!(bar.total_samples, 600);
    assert!(tracker.find_context(&ctx("main:3 @ foo")).is_none());
}

#[test]
fn test_indirect_call_targets() {
    let mut tracker = tracker_for("indirect_calls.prof");
    let loc = DebugLoc::new("main", LineLocation::new(7, 0));

    let targets: Vec<String> = tracker
        .get_indirect_callee_context_samples_for(&loc)
        .iter()
        .map(|samples| samples.name.to_string())
        .collect();
    assert_eq!(targets, vec!["handler_a", "handler_b", "handler_c"]);

    let hottest = tracker
        .get_callee_context_samples_for(&call_at("main", 7), None)
        .unwrap();
    assert_eq!(hottest.name, FunctionId::from("handler_a"));

    // Promote every target of the indirect call
    let promoted = tracker.promote_merge_context_samples_tree_for(&call_at("main", 7), None);
    assert_eq!(promoted.len(), 3);
    assert!(tracker.get_indirect_callee_context_samples_for(&loc).is_empty());
    let handler_b = tracker.get_base_samples_for(&"handler_b".into(), false).unwrap();
    assert_eq!(handler_b.total_samples, 120);
}

#[test]
fn test_partially_broken_profile() {
    let loaded = load("partially_broken.prof");
    let diagnostics = &loaded.report.diagnostics;
    assert_eq!(loaded.report.loaded, 2);
    assert_eq!(loaded.report.skipped, 3);
    assert_eq!(diagnostics.with_code("P0001").count(), 2);
    assert_eq!(diagnostics.with_code("P0002").count(), 1);
    assert_eq!(diagnostics.with_code("P0003").count(), 1);
    assert_eq!(diagnostics.with_code("P0004").count(), 1);
    assert!(!diagnostics.has_errors());

    let tracker = loaded.into_tracker(TrackerOptions::default());
    let foo = tracker.get_context_samples_for_context(&ctx("main:3 @ foo")).unwrap();
    assert_eq!(foo.total_samples, 25);
}

#[test]
fn test_skip_ceiling_from_config() {
    logging::init_test();
    let config = tracker::parse_config("[loader]\nmax-skipped = 1\n").unwrap();
    let err = load_profile(&data_dir().join("partially_broken.prof"), &config).unwrap_err();
    assert!(err.contains("P0100"));
}

#[test]
fn test_hashed_json_profile() {
    let tracker = tracker_for("hashed.json");
    let bar = tracker
        .find_context(&ctx("1001:3 @ 2002:2.1 @ 3003"))
        .unwrap();
    assert_eq!(tracker.get_context_string(bar).unwrap(), "main:3 @ foo:2.1 @ bar");
    assert_eq!(tracker.get_func_name_for(bar).unwrap(), "bar");

    let contexts = dump_contexts(&tracker);
    assert!(contexts.contains("[main:3 @ foo] 100\n"));

    let foo = tracker.get_base_samples_for(&FunctionId::Hash(2002), true).unwrap();
    assert_eq!(foo.total_samples, 100);
    assert_eq!(
        foo.callsite_profile(LineLocation::new(5, 0), &FunctionId::Hash(3003))
            .unwrap()
            .total_samples,
        40
    );
}

#[test]
fn test_empty_profile() {
    let tracker = SampleContextTracker::default();
    assert_eq!(tracker.trie().iter().count(), 1);
    assert!(tracker.get_context_samples_for_context(&ctx("main")).is_none());
    assert!(tracker.get_base_samples_for(&"main".into(), true).is_none());
    assert!(tracker.create_context_less_profile_map().is_empty());
    assert_eq!(dump_tree(&tracker, &DumpOptions::default()), "<root>\n");
}
