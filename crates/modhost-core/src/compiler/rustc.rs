//! `rustc` backend: compiles a single crate root directly.

use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::Command;

use modhost_sdk::LoaderConfig;
use tracing::debug;

use super::{
    finish, linker_args, CompileFailure, CompileOutput, CompileRequest, Compiler,
    CompilerInitError, Diagnostic,
};
use crate::config::ResolvedLibrary;

/// Compiles `<entry>.rs` with `--crate-type cdylib`.
///
/// Mods built this way have no dependency resolution of their own; the SDK
/// and anything else they use must be listed as referenced libraries.
#[derive(Debug, Clone)]
pub struct RustcCompiler {
    program: PathBuf,
    edition: String,
    link_args: Vec<String>,
}

impl RustcCompiler {
    pub fn new() -> Self {
        let program = env::var_os("RUSTC")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("rustc"));
        Self {
            program,
            edition: "2021".to_string(),
            link_args: Vec::new(),
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_edition(mut self, edition: impl Into<String>) -> Self {
        self.edition = edition.into();
        self
    }

    fn command(&self, request: &CompileRequest<'_>) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg(&request.entry)
            .arg("--crate-type")
            .arg("cdylib")
            .arg("--crate-name")
            .arg(request.crate_name())
            .arg("--edition")
            .arg(&self.edition)
            .arg("--error-format=json")
            .arg("-C")
            .arg("opt-level=2")
            .arg("--out-dir")
            .arg(&request.build_dir)
            .args(&self.link_args);
        if request.debug_symbols {
            command.arg("-g").arg("-C").arg("split-debuginfo=packed");
        }
        command
    }
}

impl Default for RustcCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler for RustcCompiler {
    fn name(&self) -> &str {
        "rustc"
    }

    fn init(
        &mut self,
        _config: &LoaderConfig,
        libraries: &[ResolvedLibrary],
    ) -> Result<(), CompilerInitError> {
        self.link_args = linker_args(libraries);
        let output = Command::new(&self.program)
            .arg("--version")
            .output()
            .map_err(|e| {
                CompilerInitError(format!("cannot run {}: {}", self.program.display(), e))
            })?;
        if !output.status.success() {
            return Err(CompilerInitError(format!(
                "{} --version exited with {}",
                self.program.display(),
                output.status
            )));
        }
        Ok(())
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompileOutput, CompileFailure> {
        if !request.entry.is_file() {
            return Err(CompileFailure::message(format!(
                "crate root {} does not exist",
                request.entry.display()
            )));
        }
        fs::create_dir_all(&request.build_dir).map_err(|e| {
            CompileFailure::message(format!(
                "cannot create {}: {}",
                request.build_dir.display(),
                e
            ))
        })?;

        debug!(extension_id = %request.descriptor.id, entry = %request.entry.display(), "Running rustc");
        let output = self
            .command(request)
            .output()
            .map_err(|e| CompileFailure::message(format!("cannot run rustc: {}", e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut diagnostics: Vec<Diagnostic> =
            stderr.lines().filter_map(Diagnostic::from_rustc_json).collect();
        if !output.status.success() && !diagnostics.iter().any(|d| d.is_error()) {
            diagnostics.push(Diagnostic::error(format!(
                "rustc exited with {}",
                output.status
            )));
        }

        let library = request.build_dir.join(format!(
            "{}{}{}",
            env::consts::DLL_PREFIX,
            request.crate_name(),
            env::consts::DLL_SUFFIX
        ));
        let library = library.is_file().then_some(library);
        finish(diagnostics, library, request.debug_symbols, "rustc")
    }
}
