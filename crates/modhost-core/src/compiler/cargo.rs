//! `cargo` backend: builds the mod's crate as a `cdylib`.

use std::env;
use std::path::PathBuf;
use std::process::Command;

use modhost_sdk::LoaderConfig;
use serde::Deserialize;
use tracing::debug;

use super::{
    finish, linker_args, CompileFailure, CompileOutput, CompileRequest, Compiler,
    CompilerInitError, Diagnostic,
};
use crate::config::ResolvedLibrary;

/// Separator of `CARGO_ENCODED_RUSTFLAGS`.
const ENCODED_FLAG_SEPARATOR: char = '\u{1f}';

/// Runs `cargo build --release --lib` against the mod's `Cargo.toml`.
///
/// The declared artifact filename may point at the manifest itself or at the
/// directory holding it. Referenced libraries are passed through
/// `CARGO_ENCODED_RUSTFLAGS` so paths with spaces survive.
#[derive(Debug, Clone)]
pub struct CargoCompiler {
    program: PathBuf,
    rustflags: Vec<String>,
}

impl CargoCompiler {
    pub fn new() -> Self {
        let program = env::var_os("CARGO")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("cargo"));
        Self {
            program,
            rustflags: Vec::new(),
        }
    }

    /// Use a specific cargo binary.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    fn manifest_path(request: &CompileRequest<'_>) -> PathBuf {
        if request.entry.is_dir() {
            request.entry.join("Cargo.toml")
        } else {
            request.entry.clone()
        }
    }
}

impl Default for CargoCompiler {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct ArtifactMessage {
    reason: String,
    #[serde(default)]
    target: Option<ArtifactTarget>,
    #[serde(default)]
    filenames: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct ArtifactTarget {
    #[serde(default)]
    kind: Vec<String>,
}

/// Dynamic library reported by a `compiler-artifact` message.
fn cdylib_from_message(line: &str) -> Option<PathBuf> {
    let message: ArtifactMessage = serde_json::from_str(line).ok()?;
    if message.reason != "compiler-artifact" {
        return None;
    }
    let is_cdylib = message
        .target
        .as_ref()
        .is_some_and(|t| t.kind.iter().any(|k| k == "cdylib"));
    if !is_cdylib {
        return None;
    }
    let suffix = env::consts::DLL_SUFFIX;
    message
        .filenames
        .into_iter()
        .find(|f| f.to_string_lossy().ends_with(suffix))
}

impl Compiler for CargoCompiler {
    fn name(&self) -> &str {
        "cargo"
    }

    fn init(
        &mut self,
        _config: &LoaderConfig,
        libraries: &[ResolvedLibrary],
    ) -> Result<(), CompilerInitError> {
        self.rustflags = linker_args(libraries);
        let status = Command::new(&self.program)
            .arg("--version")
            .output()
            .map_err(|e| {
                CompilerInitError(format!("cannot run {}: {}", self.program.display(), e))
            })?;
        if !status.status.success() {
            return Err(CompilerInitError(format!(
                "{} --version exited with {}",
                self.program.display(),
                status.status
            )));
        }
        Ok(())
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompileOutput, CompileFailure> {
        let manifest = Self::manifest_path(request);
        if !manifest.is_file() {
            return Err(CompileFailure::message(format!(
                "{} is not a Cargo manifest",
                manifest.display()
            )));
        }

        let mut command = Command::new(&self.program);
        command
            .arg("build")
            .arg("--release")
            .arg("--lib")
            .arg("--message-format=json")
            .arg("--manifest-path")
            .arg(&manifest)
            .arg("--target-dir")
            .arg(&request.build_dir);
        if !self.rustflags.is_empty() {
            let separator = ENCODED_FLAG_SEPARATOR.to_string();
            command.env("CARGO_ENCODED_RUSTFLAGS", self.rustflags.join(&separator));
        }
        if request.debug_symbols {
            command
                .env("CARGO_PROFILE_RELEASE_DEBUG", "true")
                .env("CARGO_PROFILE_RELEASE_SPLIT_DEBUGINFO", "packed");
        }

        debug!(extension_id = %request.descriptor.id, manifest = %manifest.display(), "Running cargo build");
        let output = command
            .output()
            .map_err(|e| CompileFailure::message(format!("cannot run cargo: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut diagnostics = Vec::new();
        let mut library = None;
        for line in stdout.lines() {
            if let Some(diagnostic) = Diagnostic::from_cargo_json(line) {
                diagnostics.push(diagnostic);
            } else if let Some(path) = cdylib_from_message(line) {
                library = Some(path);
            }
        }

        if !output.status.success() && !diagnostics.iter().any(|d| d.is_error()) {
            let stderr = String::from_utf8_lossy(&output.stderr);
            diagnostics.push(Diagnostic::error(format!(
                "cargo exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        finish(diagnostics, library, request.debug_symbols, "cargo")
    }
}
