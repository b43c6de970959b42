//! Compiler capability: turns a `Source` mod into a dynamic library.
//!
//! Backends are registered by name in a [`CompilerRegistry`]; the
//! `compilerSelector` of the loader configuration picks one per cycle.

mod cargo;
mod diagnostic;
mod rustc;

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use modhost_sdk::{ExtensionDescriptor, LoaderConfig};
use thiserror::Error;

use crate::config::ResolvedLibrary;

pub use cargo::CargoCompiler;
pub use diagnostic::{Diagnostic, Severity};
pub use rustc::RustcCompiler;

/// Input of one compilation.
#[derive(Debug, Clone)]
pub struct CompileRequest<'a> {
    pub descriptor: &'a ExtensionDescriptor,
    /// The mod's directory (the one holding `mod.json`).
    pub source_dir: &'a Path,
    /// Crate root: `source_dir` joined with the declared artifact filename.
    pub entry: PathBuf,
    /// Scratch directory for intermediate build output.
    pub build_dir: PathBuf,
    /// Emit a debug-symbol companion next to the library.
    pub debug_symbols: bool,
}

impl CompileRequest<'_> {
    /// Crate name derived from the mod id.
    pub fn crate_name(&self) -> String {
        self.descriptor
            .id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }
}

/// A successfully compiled library.
#[derive(Debug, Clone, Default)]
pub struct CompileOutput {
    pub artifact: Vec<u8>,
    pub symbols: Option<Vec<u8>>,
    /// Non-fatal diagnostics.
    pub warnings: Vec<Diagnostic>,
}

impl CompileOutput {
    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

/// A failed compilation. Holds every diagnostic, warnings included.
#[derive(Debug, Clone)]
pub struct CompileFailure {
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileFailure {
    pub fn new(diagnostics: Vec<Diagnostic>) -> Self {
        Self { diagnostics }
    }

    /// Failure with a single error diagnostic.
    pub fn message(message: impl Into<String>) -> Self {
        Self::new(vec![Diagnostic::error(message)])
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }

    pub fn warning_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }
}

impl fmt::Display for CompileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} error(s), {} warning(s)",
            self.error_count(),
            self.warning_count()
        )?;
        if let Some(first) = self.errors().next() {
            write!(f, "; first: {}", first)?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileFailure {}

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct CompilerInitError(pub String);

/// A source-to-library compiler backend.
pub trait Compiler: Send {
    /// Registry key, matched against `compilerSelector`.
    fn name(&self) -> &str;

    /// Prepare for a load cycle. Called once per cycle before any compile.
    fn init(
        &mut self,
        config: &LoaderConfig,
        libraries: &[ResolvedLibrary],
    ) -> Result<(), CompilerInitError>;

    /// Compile one mod. Any error diagnostic fails the compile.
    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompileOutput, CompileFailure>;
}

/// Compilers keyed by name.
#[derive(Default)]
pub struct CompilerRegistry {
    compilers: BTreeMap<String, Box<dyn Compiler>>,
}

impl CompilerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in `cargo` and `rustc` backends.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(CargoCompiler::new()));
        registry.register(Box::new(RustcCompiler::new()));
        registry
    }

    /// Add a compiler. Returns `false` and keeps the existing one if the name
    /// is already taken.
    pub fn register(&mut self, compiler: Box<dyn Compiler>) -> bool {
        let name = compiler.name().to_string();
        if self.compilers.contains_key(&name) {
            return false;
        }
        self.compilers.insert(name, compiler);
        true
    }

    pub fn get(&self, name: &str) -> Option<&dyn Compiler> {
        self.compilers.get(name).map(|c| c.as_ref())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut (dyn Compiler + 'static)> {
        self.compilers.get_mut(name).map(|c| c.as_mut())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.compilers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.compilers.keys().cloned().collect()
    }
}

impl fmt::Debug for CompilerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilerRegistry")
            .field("compilers", &self.names())
            .finish()
    }
}

/// rustc flags linking the referenced libraries: `--extern` for `.rlib`
/// files, `-L native=` plus `-l` for native ones, `-l` for system names.
pub(crate) fn linker_args(libraries: &[ResolvedLibrary]) -> Vec<String> {
    let mut args = Vec::new();
    for library in libraries {
        match library {
            ResolvedLibrary::System(name) => {
                args.push("-l".to_string());
                args.push(name.clone());
            }
            ResolvedLibrary::Local(path) if library.is_rust_library() => {
                args.push("--extern".to_string());
                args.push(format!("{}={}", library.link_name(), path.display()));
                if let Some(dir) = path.parent() {
                    args.push("-L".to_string());
                    args.push(format!("dependency={}", dir.display()));
                }
            }
            ResolvedLibrary::Local(path) => {
                if let Some(dir) = path.parent() {
                    args.push("-L".to_string());
                    args.push(format!("native={}", dir.display()));
                }
                args.push("-l".to_string());
                args.push(library.link_name());
            }
        }
    }
    args
}

/// Read a built library and its debug companion, if one was produced.
pub(crate) fn read_output(
    library: &Path,
    debug_symbols: bool,
    warnings: Vec<Diagnostic>,
) -> Result<CompileOutput, CompileFailure> {
    let artifact = fs::read(library).map_err(|e| {
        CompileFailure::message(format!("cannot read {}: {}", library.display(), e))
    })?;

    let symbols = if debug_symbols {
        symbols_companion(library)
            .map(|path| {
                fs::read(&path).map_err(|e| {
                    CompileFailure::message(format!("cannot read {}: {}", path.display(), e))
                })
            })
            .transpose()?
    } else {
        None
    };

    Ok(CompileOutput {
        artifact,
        symbols,
        warnings,
    })
}

/// Debug companion written next to `library`: `greeter.pdb` for
/// `greeter.dll`, `libgreeter.so.dwp` from packed split debuginfo elsewhere.
/// Cargo may leave the `.dwp` under `deps/` only.
fn symbols_companion(library: &Path) -> Option<PathBuf> {
    let file_name = library.file_name()?;
    let mut dwp = file_name.to_os_string();
    dwp.push(".dwp");

    let mut candidates = vec![library.with_extension("pdb"), library.with_file_name(&dwp)];
    if let Some(dir) = library.parent() {
        candidates.push(dir.join("deps").join(&dwp));
    }
    candidates.into_iter().find(|path| path.is_file())
}

/// Split diagnostics into a compile result.
pub(crate) fn finish(
    diagnostics: Vec<Diagnostic>,
    library: Option<PathBuf>,
    debug_symbols: bool,
    tool: &str,
) -> Result<CompileOutput, CompileFailure> {
    if diagnostics.iter().any(|d| d.is_error()) {
        return Err(CompileFailure::new(diagnostics));
    }
    let warnings: Vec<Diagnostic> = diagnostics
        .into_iter()
        .filter(|d| d.severity == Severity::Warning)
        .collect();
    match library {
        Some(library) => read_output(&library, debug_symbols, warnings),
        None => {
            let mut diagnostics = warnings;
            diagnostics.push(Diagnostic::error(format!(
                "{} finished without producing a dynamic library",
                tool
            )));
            Err(CompileFailure::new(diagnostics))
        }
    }
}
