//! Load cycle tests: caching, compilation, discovery and configuration.

mod common;

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{Workspace, FAIL_MARKER};
use modhost_core::cache::{checksum_source_tree, ArtifactCache};
use modhost_core::sdk::{construct, EntryExport, ExportTable, Mod, ModContext, ModError};
use modhost_core::{
    ArtifactOrigin, ConfigError, HostError, HostState, LoadError, StaticCodeLoader,
};

#[derive(Default)]
struct Quiet;

impl Mod for Quiet {
    fn init(&mut self, _ctx: &mut dyn ModContext) -> Result<(), ModError> {
        Ok(())
    }
}

static LATE_INITS: AtomicUsize = AtomicUsize::new(0);

#[derive(Default)]
struct Late;

impl Mod for Late {
    fn init(&mut self, _ctx: &mut dyn ModContext) -> Result<(), ModError> {
        LATE_INITS.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

const QUIET_ENTRIES: &[EntryExport] = &[
    EntryExport::Mod {
        name: "M1Entry",
        create: construct::<Quiet>,
    },
    EntryExport::Other { name: "Helper" },
];
static QUIET_TABLE: ExportTable = ExportTable::new(QUIET_ENTRIES);

const LATE_ENTRIES: &[EntryExport] = &[EntryExport::Mod {
    name: "Late",
    create: construct::<Late>,
}];
static LATE_TABLE: ExportTable = ExportTable::new(LATE_ENTRIES);

fn quiet_loader(ids: &[&str]) -> StaticCodeLoader {
    let mut loader = StaticCodeLoader::new();
    for id in ids {
        loader.register(*id, &QUIET_TABLE);
    }
    loader
}

#[test]
fn test_unchanged_source_is_a_cache_hit_on_the_second_cycle() {
    let ws = Workspace::new();
    ws.add_mod("m1", "m1", "Source", "m1.src", "M1Entry");
    let (mut host, compiles) = ws.host(quiet_loader(&["m1"]));

    let first = host.load_all().unwrap();
    assert_eq!(first.loaded, vec!["m1".to_string()]);
    assert_eq!(first.compiled, 1);
    assert_eq!(first.cache_hits, 0);
    assert_eq!(first.warnings, 1);
    assert_eq!(host.state(), HostState::Loaded);

    let m1 = host.extension("m1").unwrap();
    assert_eq!(m1.origin(), ArtifactOrigin::Compiled);
    assert_eq!(m1.descriptor().name, "Mod m1");
    assert_eq!(
        m1.module_info().exports,
        vec!["M1Entry".to_string(), "Helper".to_string()]
    );
    let cache = ArtifactCache::new(ws.cache_dir());
    assert_eq!(m1.artifact_path(), cache.artifact_path("m1"));
    assert_eq!(fs::read(cache.artifact_path("m1")).unwrap(), b"lib:m1");

    host.stop().unwrap();
    assert!(host.extensions().is_empty());

    let second = host.load_all().unwrap();
    assert_eq!(second.loaded, first.loaded);
    assert_eq!(second.compiled, 0);
    assert_eq!(second.cache_hits, 1);
    assert_eq!(second.warnings, 0);
    assert_eq!(host.extension("m1").unwrap().origin(), ArtifactOrigin::Cached);
    assert_eq!(compiles.load(Ordering::SeqCst), 1);
}

#[test]
fn test_changed_source_misses_even_when_compilation_fails() {
    let ws = Workspace::new();
    let mod_dir = ws.add_source_mod("m1", "M1Entry");
    let (mut host, compiles) = ws.host(quiet_loader(&["m1"]));
    let cache = ArtifactCache::new(ws.cache_dir());

    host.load_all().unwrap();
    host.stop().unwrap();
    let before = cache.stored_checksum("m1").unwrap();

    fs::write(mod_dir.join("src/lib.rs"), "// broken edit").unwrap();
    fs::write(mod_dir.join(FAIL_MARKER), "").unwrap();

    let err = host.load_all().unwrap_err();
    match &err {
        HostError::Compilation { id, failure } => {
            assert_eq!(id, "m1");
            assert_eq!(failure.error_count(), 1);
            assert_eq!(failure.warning_count(), 1);
        }
        other => panic!("expected compilation error, got {:?}", other),
    }
    assert_eq!(err.phase(), "compilation");
    assert!(!host.is_loaded());
    assert!(host.extensions().is_empty());
    assert_eq!(compiles.load(Ordering::SeqCst), 2);

    let after = cache.stored_checksum("m1").unwrap();
    assert_ne!(after, before);
    assert_eq!(after, Some(checksum_source_tree(&mod_dir, false).unwrap()));

    // Fixed: the failed cycle left no artifact, so it compiles again.
    fs::remove_file(mod_dir.join(FAIL_MARKER)).unwrap();
    let summary = host.load_all().unwrap();
    assert_eq!(summary.compiled, 1);
    assert_eq!(compiles.load(Ordering::SeqCst), 3);
}

#[test]
fn test_missing_entry_type_aborts_before_later_mods() {
    let ws = Workspace::new();
    ws.add_source_mod("a", "Missing");
    ws.add_source_mod("b", "Late");
    let loader = StaticCodeLoader::new()
        .with("a", &QUIET_TABLE)
        .with("b", &LATE_TABLE);
    let (mut host, compiles) = ws.host(loader);

    let err = host.load_all().unwrap_err();
    assert!(matches!(
        err,
        HostError::Load {
            ref id,
            source: LoadError::EntryNotFound(ref entry),
        } if id == "a" && entry == "Missing"
    ));
    assert_eq!(err.phase(), "load");
    assert_eq!(LATE_INITS.load(Ordering::SeqCst), 0);
    assert_eq!(compiles.load(Ordering::SeqCst), 1);
    assert!(host.extensions().is_empty());
    assert_eq!(host.state(), HostState::Unloaded);
}

#[test]
fn test_export_that_is_not_a_mod() {
    let ws = Workspace::new();
    ws.add_source_mod("m1", "Helper");
    let (mut host, _) = ws.host(quiet_loader(&["m1"]));

    let err = host.load_all().unwrap_err();
    assert!(matches!(
        err,
        HostError::Load {
            source: LoadError::NotAnEntry(_),
            ..
        }
    ));
}

#[test]
fn test_unregistered_module_is_a_load_error() {
    let ws = Workspace::new();
    ws.add_source_mod("m1", "M1Entry");
    let (mut host, _) = ws.host(StaticCodeLoader::new());

    let err = host.load_all().unwrap_err();
    assert!(matches!(
        err,
        HostError::Load {
            source: LoadError::NotRegistered(_),
            ..
        }
    ));
}

#[test]
fn test_missing_local_library_fails_before_discovery() {
    let ws = Workspace::with_config(
        r#"{"compilerSelector":"mock","referencedLibraries":[{"system":"dl"},{"local":"libs/libmissing.rlib"}]}"#,
    );
    // Would be a discovery error if discovery ran.
    fs::create_dir_all(ws.mod_dir("bad")).unwrap();
    fs::write(ws.mod_dir("bad").join("mod.json"), "{").unwrap();
    let (mut host, compiles) = ws.host(StaticCodeLoader::new());

    let err = host.load_all().unwrap_err();
    assert!(matches!(
        err,
        HostError::Configuration(ConfigError::MissingLibrary { ref path })
            if path.ends_with("libs/libmissing.rlib")
    ));
    assert_eq!(err.phase(), "configuration");
    assert_eq!(compiles.load(Ordering::SeqCst), 0);
    assert!(!ws.cache_dir().exists());
}

#[test]
fn test_missing_config_is_written_and_reported() {
    let ws = Workspace::empty();
    let (mut host, _) = ws.host(StaticCodeLoader::new());

    let err = host.load_all().unwrap_err();
    assert!(matches!(
        err,
        HostError::Configuration(ConfigError::CreatedDefault { .. })
    ));
    assert!(ws.root().join("modloader.json").is_file());
    assert!(!ws.root().join("Mods").exists());

    // The default selects cargo, which this host does not have.
    let err = host.load_all().unwrap_err();
    assert!(matches!(
        err,
        HostError::Configuration(ConfigError::UnknownCompiler(ref name)) if name == "cargo"
    ));
}

#[test]
fn test_invalid_config_is_a_parse_error() {
    let ws = Workspace::with_config(r#"{"useCache": "yes"}"#);
    let (mut host, _) = ws.host(StaticCodeLoader::new());

    let err = host.load_all().unwrap_err();
    assert!(matches!(
        err,
        HostError::Configuration(ConfigError::Parse { .. })
    ));
}

#[test]
fn test_empty_mods_directory_is_created() {
    let ws = Workspace::new();
    let (mut host, _) = ws.host(StaticCodeLoader::new());

    let summary = host.load_all().unwrap();
    assert!(summary.loaded.is_empty());
    assert!(ws.root().join("Mods").is_dir());
    assert!(ws.cache_dir().is_dir());
    assert!(host.is_loaded());
    assert_eq!(host.config().unwrap().compiler_selector, "mock");
}

#[test]
fn test_load_while_loaded_is_rejected() {
    let ws = Workspace::new();
    ws.add_source_mod("m1", "M1Entry");
    let (mut host, _) = ws.host(quiet_loader(&["m1"]));

    host.load_all().unwrap();
    let err = host.load_all().unwrap_err();
    assert!(matches!(err, HostError::InvalidState(_)));
    assert_eq!(host.loaded_ids(), vec!["m1".to_string()]);
    assert!(host.is_loaded());
}

#[test]
fn test_prebuilt_mod_skips_the_compiler() {
    let ws = Workspace::new();
    let mod_dir = ws.add_mod("native", "native", "PrebuiltBinary", "libnative.so", "M1Entry");
    let (mut host, compiles) = ws.host(quiet_loader(&["native"]));

    let summary = host.load_all().unwrap();
    assert_eq!(summary.compiled, 0);
    assert_eq!(summary.cache_hits, 0);
    assert_eq!(compiles.load(Ordering::SeqCst), 0);

    let native = host.extension("native").unwrap();
    assert_eq!(native.origin(), ArtifactOrigin::Prebuilt);
    assert_eq!(native.artifact_path(), mod_dir.join("libnative.so"));
    assert!(!ArtifactCache::new(ws.cache_dir()).entry_dir("native").exists());
}

#[test]
fn test_stale_cache_entries_are_purged() {
    let ws = Workspace::new();
    ws.add_source_mod("m1", "M1Entry");
    let old = ws.cache_dir().join("old");
    fs::create_dir_all(&old).unwrap();
    fs::write(old.join("checksum.hash"), "deadbeef").unwrap();
    let (mut host, _) = ws.host(quiet_loader(&["m1"]));

    let summary = host.load_all().unwrap();
    assert_eq!(summary.purged, vec!["old".to_string()]);
    assert!(!old.exists());
    assert!(ws.cache_dir().join("m1").is_dir());
}

#[test]
fn test_disabled_cache_recompiles_every_cycle() {
    let ws = Workspace::with_config(r#"{"compilerSelector":"mock","useCache":false}"#);
    ws.add_source_mod("m1", "M1Entry");
    let (mut host, compiles) = ws.host(quiet_loader(&["m1"]));

    host.load_all().unwrap();
    let summary = host.reload().unwrap();
    assert_eq!(summary.compiled, 1);
    assert_eq!(summary.cache_hits, 0);
    assert_eq!(compiles.load(Ordering::SeqCst), 2);
}

#[test]
fn test_duplicate_mod_ids_abort_discovery() {
    let ws = Workspace::new();
    ws.add_mod("one", "same", "Source", "src/lib.rs", "M1Entry");
    ws.add_mod("two", "same", "Source", "src/lib.rs", "M1Entry");
    let (mut host, _) = ws.host(quiet_loader(&["same"]));

    let err = host.load_all().unwrap_err();
    assert_eq!(err.phase(), "discovery");
    assert!(err.to_string().contains("duplicate mod id 'same'"));
    // The first one was fully loaded before the duplicate was found.
    assert_eq!(host.loaded_ids(), vec!["same".to_string()]);
    host.stop().unwrap();
}

#[test]
fn test_mods_load_in_manifest_path_order() {
    let ws = Workspace::new();
    ws.add_source_mod("charlie", "M1Entry");
    ws.add_source_mod("alpha", "M1Entry");
    ws.add_mod("alpha/nested", "bravo", "Source", "src/lib.rs", "M1Entry");
    let (mut host, _) = ws.host(quiet_loader(&["alpha", "bravo", "charlie"]));

    let summary = host.load_all().unwrap();
    assert_eq!(summary.loaded, vec!["alpha", "bravo", "charlie"]);
}
