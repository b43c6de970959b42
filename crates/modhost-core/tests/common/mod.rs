//! Shared fixtures for host integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use modhost_core::compiler::{CompilerInitError, Diagnostic};
use modhost_core::sdk::LoaderConfig;
use modhost_core::{
    CompileFailure, CompileOutput, CompileRequest, Compiler, HookTable, ModHost, ResolvedLibrary,
    StaticCodeLoader,
};
use tempfile::TempDir;

/// Marker file that makes [`MockCompiler`] fail.
pub const FAIL_MARKER: &str = "FAIL";

/// Compiler that counts invocations and emits a fixed artifact.
pub struct MockCompiler {
    compiles: Arc<AtomicUsize>,
}

impl MockCompiler {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let compiles = Arc::new(AtomicUsize::new(0));
        (
            Self {
                compiles: compiles.clone(),
            },
            compiles,
        )
    }
}

impl Compiler for MockCompiler {
    fn name(&self) -> &str {
        "mock"
    }

    fn init(
        &mut self,
        _config: &LoaderConfig,
        _libraries: &[ResolvedLibrary],
    ) -> Result<(), CompilerInitError> {
        Ok(())
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompileOutput, CompileFailure> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        if request.source_dir.join(FAIL_MARKER).exists() {
            return Err(CompileFailure::new(vec![
                Diagnostic::warning("unused variable: `x`"),
                Diagnostic::error("expected `;`, found `}`"),
            ]));
        }
        Ok(CompileOutput {
            artifact: format!("lib:{}", request.crate_name()).into_bytes(),
            symbols: None,
            warnings: vec![Diagnostic::warning("unused variable: `x`")],
        })
    }
}

/// Scratch working directory with a `modloader.json` and a `Mods` tree.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Workspace using the mock compiler.
    pub fn new() -> Self {
        Self::with_config(r#"{"compilerSelector":"mock"}"#)
    }

    pub fn with_config(config: &str) -> Self {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("modloader.json"), config).unwrap();
        Self { dir }
    }

    /// Workspace without any configuration file.
    pub fn empty() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn mod_dir(&self, dir: &str) -> PathBuf {
        self.root().join("Mods").join(dir)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root().join("ModsCache")
    }

    /// Write a manifest and its artifact file under `Mods/<dir>`.
    pub fn add_mod(&self, dir: &str, id: &str, kind: &str, artifact: &str, entry: &str) -> PathBuf {
        let mod_dir = self.mod_dir(dir);
        fs::create_dir_all(&mod_dir).unwrap();
        fs::write(
            mod_dir.join("mod.json"),
            format!(
                r#"{{"id":"{id}","name":"Mod {id}","type":"{kind}","artifactFilename":"{artifact}","entryTypeName":"{entry}"}}"#
            ),
        )
        .unwrap();
        let artifact_path = mod_dir.join(artifact);
        if let Some(parent) = artifact_path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&artifact_path, format!("// source of {}", id)).unwrap();
        mod_dir
    }

    pub fn add_source_mod(&self, id: &str, entry: &str) -> PathBuf {
        self.add_mod(id, id, "Source", "src/lib.rs", entry)
    }

    /// Host with the mock compiler and the given static loader.
    pub fn host(&self, loader: StaticCodeLoader) -> (ModHost, Arc<AtomicUsize>) {
        let (compiler, compiles) = MockCompiler::new();
        let host = ModHost::builder()
            .working_dir(self.root())
            .without_builtin_compilers()
            .compiler(compiler)
            .code_loader(loader)
            .build()
            .unwrap();
        (host, compiles)
    }

    /// Like [`host`](Self::host) but sharing `table` as the patch engine.
    pub fn host_with_table(&self, loader: StaticCodeLoader, table: Arc<HookTable>) -> ModHost {
        let (compiler, _) = MockCompiler::new();
        ModHost::builder()
            .working_dir(self.root())
            .without_builtin_compilers()
            .compiler(compiler)
            .code_loader(loader)
            .patch_engine(table)
            .build()
            .unwrap()
    }
}
