//! End-to-end builds through the engine: assembly with the shipped
//! descriptions, cold and warm cache behavior, generated sources, and
//! failure classification across the whole stack.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use kiln::artifact::ArtifactFilesystem;
use kiln::cache::MemoryCache;
use kiln::config::Config;
use kiln::description::TargetGraph;
use kiln::descriptions::default_registry;
use kiln::engine::BuildEngine;
use kiln::resolver::{RuleGraph, RuleResolver};
use kiln::testing::{CollectingReporter, FakeDexToolchain};
use kiln::types::{
    AttrValue, BuildOutcome, BuildTarget, FailureClass, RuleState, SourcePath,
};
use tempfile::TempDir;

fn write_file(path: &Path, contents: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("mkdir");
    }
    fs::write(path, contents).expect("write");
}

fn prebuilt_jar_args(path: &str) -> BTreeMap<String, AttrValue> {
    let mut args = BTreeMap::new();
    args.insert(
        "binary_jar".into(),
        AttrValue::Source(SourcePath::path(path)),
    );
    args
}

/// A workspace with two prebuilt jars, an android binary dexing them, and a
/// python test over one source file.
struct Workspace {
    td: TempDir,
    graph: RuleGraph,
    app: BuildTarget,
    test: BuildTarget,
}

impl Workspace {
    fn new(compression: &str) -> Self {
        let td = TempDir::new().expect("tempdir");
        write_file(&td.path().join("third-party/core.jar"), b"core-bytes");
        write_file(&td.path().join("third-party/extra.jar"), b"extra-bytes");
        write_file(&td.path().join("app/test_io.py"), b"def test_io(): pass\n");

        let core = BuildTarget::new("third-party", "core");
        let extra = BuildTarget::new("third-party", "extra");
        let app = BuildTarget::new("app", "droid");
        let test = BuildTarget::new("app", "io_test");

        let mut targets = TargetGraph::new();
        targets.add(core.clone(), "prebuilt_jar", prebuilt_jar_args("third-party/core.jar"));
        targets.add(
            extra.clone(),
            "prebuilt_jar",
            prebuilt_jar_args("third-party/extra.jar"),
        );

        let mut app_args = BTreeMap::new();
        app_args.insert(
            "deps".into(),
            AttrValue::TargetList(vec![core.clone(), extra.clone()]),
        );
        app_args.insert(
            "secondary_dex_compression".into(),
            AttrValue::Str(compression.into()),
        );
        targets.add(app.clone(), "android_binary", app_args);

        let mut srcs = BTreeMap::new();
        srcs.insert("test_io.py".to_string(), SourcePath::path("app/test_io.py"));
        let mut test_args = BTreeMap::new();
        test_args.insert("srcs".into(), AttrValue::SourceMap(srcs));
        test_args.insert("base_module".into(), AttrValue::Str("app".into()));
        targets.add(test.clone(), "python_test", test_args);

        let registry = default_registry().expect("registry");
        let mut resolver = RuleResolver::new(&registry, &targets);
        resolver.require_rule(&app).expect("assemble app");
        resolver.require_rule(&test).expect("assemble test");
        let graph = resolver.freeze();

        Self { td, graph, app, test }
    }

    fn engine(&self, toolchain: Arc<FakeDexToolchain>, cache: Arc<MemoryCache>) -> BuildEngine {
        BuildEngine::new(
            Arc::new(ArtifactFilesystem::new(self.td.path())),
            Arc::new(Config::default()),
        )
        .with_tools(toolchain)
        .with_cache(cache)
    }

    fn out(&self, rel: &str) -> std::path::PathBuf {
        self.td.path().join("kiln-out").join(rel)
    }
}

#[test]
fn cold_build_produces_every_declared_output() {
    let ws = Workspace::new("xzs");
    let toolchain = Arc::new(FakeDexToolchain::new());
    let engine = ws.engine(toolchain.clone(), Arc::new(MemoryCache::new()));
    let reporter = Arc::new(Mutex::new(CollectingReporter::default()));

    let session = engine
        .build(&ws.graph, &[ws.app.clone(), ws.test.clone()], reporter)
        .expect("build");

    assert_eq!(session.receipt.outcome, BuildOutcome::Success);
    for rule in &session.receipt.rules {
        assert!(
            matches!(rule.state, RuleState::Built),
            "{} was {:?}",
            rule.target,
            rule.state
        );
        assert!(rule.rule_key.is_some());
    }

    // Dex outputs: primary plus one secondary per extra jar.
    assert!(ws.out("app/droid/classes.dex").exists());
    assert!(
        ws.out("app/droid/secondary_dexes/secondary-1.dex.jar.xzs")
            .exists()
    );
    // The solid blob over the single secondary group.
    assert!(
        ws.out("app/droid/secondary_dexes/secondary.dex.jar.xzs")
            .exists()
    );

    // The synthesized PEX sibling was built.
    assert!(ws.out("app/io_test#binary/io_test.pex").exists());

    // The generated test-modules list is byte-exact.
    let modules = ws.out("app/io_test#test_modules/__test_modules__.py");
    assert_eq!(
        fs::read_to_string(&modules).expect("read"),
        "TEST_MODULES = [\n    \"app.test_io\",\n]"
    );

    assert!(!session.events.is_empty());
}

#[test]
fn warm_build_is_served_from_the_cache() {
    let ws = Workspace::new("raw");
    let toolchain = Arc::new(FakeDexToolchain::new());
    let cache = Arc::new(MemoryCache::new());
    let engine = ws.engine(toolchain.clone(), cache.clone());

    let reporter = Arc::new(Mutex::new(CollectingReporter::default()));
    let first = engine
        .build(&ws.graph, &[ws.app.clone(), ws.test.clone()], reporter.clone())
        .expect("first build");
    assert_eq!(first.receipt.outcome, BuildOutcome::Success);
    let launches_after_first = toolchain.invocations().len();
    assert!(launches_after_first > 0);
    assert!(!cache.is_empty());

    let second = engine
        .build(&ws.graph, &[ws.app.clone(), ws.test.clone()], reporter)
        .expect("second build");
    assert_eq!(second.receipt.outcome, BuildOutcome::Success);

    // Every rule with outputs is restored from the cache; no tool runs
    // again.
    assert_eq!(toolchain.invocations().len(), launches_after_first);
    for rule in &second.receipt.rules {
        match &rule.state {
            RuleState::Cached => {}
            // Graph-only rules have nothing to cache and rebuild trivially.
            RuleState::Built => assert_eq!(rule.steps_run, 0, "{}", rule.target),
            other => panic!("{} was {:?}", rule.target, other),
        }
    }
}

#[test]
fn rule_keys_in_receipts_are_stable_across_sessions() {
    let ws = Workspace::new("raw");
    let toolchain = Arc::new(FakeDexToolchain::new());
    let engine = ws.engine(toolchain.clone(), Arc::new(MemoryCache::new()));
    let reporter = Arc::new(Mutex::new(CollectingReporter::default()));

    let first = engine
        .build(&ws.graph, &[ws.app.clone()], reporter.clone())
        .expect("first");
    let second = engine
        .build(&ws.graph, &[ws.app.clone()], reporter)
        .expect("second");

    let keys = |session: &kiln::engine::BuildSession| -> Vec<(String, Option<String>)> {
        session
            .receipt
            .rules
            .iter()
            .map(|r| (r.target.clone(), r.rule_key.clone()))
            .collect()
    };
    assert_eq!(keys(&first), keys(&second));
}

#[test]
fn dexer_overflow_fails_the_build_with_classification() {
    let ws = Workspace::new("raw");
    let toolchain = Arc::new(FakeDexToolchain::with_failing_dexer(
        "Cannot fit requested classes in a single dex file (# methods: 70000 > 65536)",
    ));
    let engine = ws.engine(toolchain, Arc::new(MemoryCache::new()));
    let reporter = Arc::new(Mutex::new(CollectingReporter::default()));

    let session = engine
        .build(&ws.graph, &[ws.app.clone()], reporter.clone())
        .expect("build completes with a failed receipt");

    assert_eq!(session.receipt.outcome, BuildOutcome::Failed);
    let app_receipt = session
        .receipt
        .rules
        .iter()
        .find(|r| r.target == ws.app.canonical())
        .expect("app receipt");
    match &app_receipt.state {
        RuleState::Failed { class, message } => {
            assert_eq!(*class, FailureClass::Overflow);
            assert!(message.contains("secondary dex files"), "{message}");
        }
        other => panic!("expected failure, got {other:?}"),
    }

    // The failure reached the reporter.
    let reporter = reporter.lock().unwrap();
    assert!(reporter.lines.iter().any(|l| l.starts_with("error:")));
}

#[test]
fn later_rules_are_skipped_after_a_failure() {
    let ws = Workspace::new("raw");
    let toolchain = Arc::new(FakeDexToolchain::with_failing_dexer("invalid input"));
    let engine = ws.engine(toolchain, Arc::new(MemoryCache::new()));
    let reporter = Arc::new(Mutex::new(CollectingReporter::default()));

    // app fails; test and its siblings come later in the walk.
    let session = engine
        .build(&ws.graph, &[ws.app.clone(), ws.test.clone()], reporter)
        .expect("build");

    assert_eq!(session.receipt.outcome, BuildOutcome::Failed);
    let skipped = session
        .receipt
        .rules
        .iter()
        .filter(|r| matches!(r.state, RuleState::Skipped { .. }))
        .count();
    assert!(skipped > 0);
}
