//! Mod loading orchestrator and stop/reload pipeline.
//!
//! A load cycle is fail-fast: the first failing phase aborts it. Mods that
//! were initialized earlier in the same cycle stay registered, but the host
//! is not marked loaded and `stop()` (or `reload()`) has to run before the
//! next `load_all()`.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use modhost_sdk::config::CONFIG_FILE_NAME;
use modhost_sdk::{ArtifactKind, DebugTopic, ExtensionDescriptor, LoaderConfig, Mod, ModuleInfo};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::cache::{ArtifactCache, CacheResolution};
use crate::compiler::{CompileRequest, Compiler, CompilerRegistry};
use crate::config::{self, resolve_path};
use crate::context::HostContext;
use crate::discovery::{self, DiscoveredMod};
use crate::error::{CacheError, ConfigError, HostError, Result};
use crate::loader::{self, CodeLoader, LoadedModule, NativeCodeLoader};
use crate::patch::{HookTable, PatchEngine, PatchScope};
use crate::timer::{ExtensionTimers, HostState, KeepAlive, Lifecycle, TimerScheduler};

/// Where a loaded extension's library came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactOrigin {
    /// Valid cache entry, no compile.
    Cached,
    Compiled,
    /// `PrebuiltBinary` mod, loaded from the mod directory.
    Prebuilt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionState {
    Running,
    /// `stop` succeeded and its patches and timers are released.
    Stopped,
}

/// A running mod and everything it owns.
pub struct LoadedExtension {
    // Drop order matters: the instance and its context hold code from the
    // module's library and must go first.
    instance: Box<dyn Mod>,
    context: HostContext,
    module: Arc<dyn LoadedModule>,
    descriptor: ExtensionDescriptor,
    artifact_path: PathBuf,
    origin: ArtifactOrigin,
    state: ExtensionState,
    loaded_at: DateTime<Utc>,
}

impl LoadedExtension {
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &ExtensionDescriptor {
        &self.descriptor
    }

    pub fn module_info(&self) -> &ModuleInfo {
        self.module.info()
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    pub fn origin(&self) -> ArtifactOrigin {
        self.origin
    }

    pub fn state(&self) -> ExtensionState {
        self.state
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn context(&self) -> &HostContext {
        &self.context
    }
}

impl fmt::Debug for LoadedExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedExtension")
            .field("id", &self.descriptor.id)
            .field("artifact_path", &self.artifact_path)
            .field("origin", &self.origin)
            .field("state", &self.state)
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}

/// Outcome of a successful load cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Ids in load order.
    pub loaded: Vec<String>,
    pub compiled: usize,
    pub cache_hits: usize,
    /// Cache entries removed because no mod uses them any more.
    pub purged: Vec<String>,
    /// Compiler warnings across the cycle.
    pub warnings: usize,
    pub elapsed: Duration,
}

impl fmt::Display for LoadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "loaded {} mods, with {}ms and {} warnings",
            self.loaded.len(),
            self.elapsed.as_millis(),
            self.warnings
        )
    }
}

/// Builder for [`ModHost`].
pub struct ModHostBuilder {
    working_dir: Option<PathBuf>,
    config_path: Option<PathBuf>,
    runtime: Option<Handle>,
    loader: Option<Box<dyn CodeLoader>>,
    engine: Option<Arc<dyn PatchEngine>>,
    compilers: Vec<Box<dyn Compiler>>,
    builtin_compilers: bool,
    timers_allowed: bool,
}

impl ModHostBuilder {
    pub fn new() -> Self {
        Self {
            working_dir: None,
            config_path: None,
            runtime: None,
            loader: None,
            engine: None,
            compilers: Vec::new(),
            builtin_compilers: true,
            timers_allowed: true,
        }
    }

    /// Base for every relative path. Defaults to the process working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Loader configuration file. Defaults to `modloader.json` in the
    /// working directory.
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Runtime timer tasks are spawned on. Defaults to the current runtime,
    /// if `build` is called inside one.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn code_loader(mut self, loader: impl CodeLoader + 'static) -> Self {
        self.loader = Some(Box::new(loader));
        self
    }

    pub fn patch_engine(mut self, engine: Arc<dyn PatchEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Register an extra compiler backend.
    pub fn compiler(mut self, compiler: impl Compiler + 'static) -> Self {
        self.compilers.push(Box::new(compiler));
        self
    }

    /// Do not register the built-in `cargo` and `rustc` backends.
    pub fn without_builtin_compilers(mut self) -> Self {
        self.builtin_compilers = false;
        self
    }

    pub fn timers_allowed(mut self, allowed: bool) -> Self {
        self.timers_allowed = allowed;
        self
    }

    pub fn build(self) -> Result<ModHost> {
        let working_dir = match self.working_dir {
            Some(dir) => dir,
            None => std::env::current_dir().map_err(|e| HostError::io(".", e))?,
        };
        let config_path = resolve_path(
            &working_dir,
            self.config_path
                .as_deref()
                .unwrap_or_else(|| Path::new(CONFIG_FILE_NAME)),
        );

        let mut compilers = if self.builtin_compilers {
            CompilerRegistry::with_builtin()
        } else {
            CompilerRegistry::new()
        };
        for compiler in self.compilers {
            let name = compiler.name().to_string();
            if !compilers.register(compiler) {
                warn!(compiler = %name, "Compiler name already registered, ignoring");
            }
        }

        let lifecycle = Arc::new(Lifecycle::new());
        lifecycle.set_timers_allowed(self.timers_allowed);

        let loader = match self.loader {
            Some(loader) => loader,
            None => Box::new(NativeCodeLoader::new()) as Box<dyn CodeLoader>,
        };
        let engine = match self.engine {
            Some(engine) => engine,
            None => Arc::new(HookTable::new()) as Arc<dyn PatchEngine>,
        };

        Ok(ModHost {
            working_dir,
            config_path,
            compilers,
            loader,
            engine,
            lifecycle,
            runtime: self.runtime.or_else(|| Handle::try_current().ok()),
            config: None,
            extensions: Vec::new(),
        })
    }
}

impl Default for ModHostBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The mod host.
pub struct ModHost {
    extensions: Vec<LoadedExtension>,
    working_dir: PathBuf,
    config_path: PathBuf,
    compilers: CompilerRegistry,
    loader: Box<dyn CodeLoader>,
    engine: Arc<dyn PatchEngine>,
    lifecycle: Arc<Lifecycle>,
    runtime: Option<Handle>,
    config: Option<Arc<LoaderConfig>>,
}

impl ModHost {
    pub fn builder() -> ModHostBuilder {
        ModHostBuilder::new()
    }

    /// Host rooted at `working_dir` with the native loader and built-in
    /// compilers.
    pub fn new(working_dir: impl Into<PathBuf>) -> Result<Self> {
        ModHostBuilder::new().working_dir(working_dir).build()
    }

    /// Run a full load cycle: configuration, compiler, directories, then every
    /// mod in manifest path order, then cache purge.
    pub fn load_all(&mut self) -> Result<LoadSummary> {
        if !self.extensions.is_empty() {
            return Err(HostError::InvalidState(format!(
                "{} mods are still registered; stop or reload first",
                self.extensions.len()
            )));
        }

        let started = Instant::now();
        self.lifecycle.set_state(HostState::Loading);
        match self.run_cycle(started) {
            Ok(summary) => {
                self.lifecycle.set_state(HostState::Loaded);
                info!(
                    loaded = summary.loaded.len(),
                    compiled = summary.compiled,
                    cache_hits = summary.cache_hits,
                    elapsed_ms = summary.elapsed.as_millis() as u64,
                    warnings = summary.warnings,
                    "Loaded {} mods, with {}ms and {} warnings",
                    summary.loaded.len(),
                    summary.elapsed.as_millis(),
                    summary.warnings
                );
                Ok(summary)
            }
            Err(err) => {
                self.lifecycle.set_state(HostState::Unloaded);
                error!(
                    phase = err.phase(),
                    registered = self.extensions.len(),
                    error = %err,
                    "Load cycle aborted"
                );
                Err(err)
            }
        }
    }

    fn run_cycle(&mut self, started: Instant) -> Result<LoadSummary> {
        let config = log_phase(
            "Loading configuration",
            config::load_or_create(&self.config_path).map_err(HostError::from),
        )?;
        let verbose = config.debug(DebugTopic::Init);
        let config = Arc::new(config);
        self.config = Some(config.clone());

        let libraries = log_phase(
            "Resolving referenced libraries",
            config::resolve_libraries(&config, &self.working_dir).map_err(HostError::from),
        )?;

        let selector = config.compiler_selector.clone();
        let compiler = log_phase(
            "Setting compiler",
            self.compilers
                .get_mut(&selector)
                .ok_or_else(|| HostError::from(ConfigError::UnknownCompiler(selector.clone()))),
        )?;
        log_phase(
            "Initializing compiler",
            compiler.init(&config, &libraries).map_err(|e| {
                HostError::from(ConfigError::CompilerInit {
                    name: selector.clone(),
                    message: e.to_string(),
                })
            }),
        )?;

        let mods_root = resolve_path(&self.working_dir, &config.mods_directory);
        fs::create_dir_all(&mods_root).map_err(|e| HostError::io(&mods_root, e))?;
        let cache = ArtifactCache::new(resolve_path(&self.working_dir, &config.cache_directory))
            .with_sorted_inputs(config.sort_checksum_inputs);
        let prepared = if config.use_cache {
            cache.ensure()
        } else {
            cache.reset()
        };
        log_phase(
            "Preparing directories",
            prepared.map_err(|source| HostError::Cache {
                context: cache.root().display().to_string(),
                source,
            }),
        )?;

        let manifests = discovery::find_manifests(&mods_root)?;
        if verbose {
            info!(count = manifests.len(), root = %mods_root.display(), "Manifests found");
        }

        let scheduler = TimerScheduler::new(self.runtime.clone(), self.lifecycle.clone());
        let mut summary = LoadSummary::default();
        for manifest in &manifests {
            self.load_one(manifest, &config, &cache, &scheduler, &mut summary)?;
        }

        let keep: HashSet<String> = self.extensions.iter().map(|e| e.id().to_string()).collect();
        summary.purged = cache
            .purge_stale(&keep)
            .map_err(|source| HostError::Cache {
                context: cache.root().display().to_string(),
                source,
            })?;
        if !summary.purged.is_empty() && config.debug(DebugTopic::Cache) {
            info!(purged = ?summary.purged, "Purged stale cache entries");
        }

        summary.loaded = self.extensions.iter().map(|e| e.id().to_string()).collect();
        summary.elapsed = started.elapsed();
        Ok(summary)
    }

    fn load_one(
        &mut self,
        manifest: &Path,
        config: &Arc<LoaderConfig>,
        cache: &ArtifactCache,
        scheduler: &TimerScheduler,
        summary: &mut LoadSummary,
    ) -> Result<()> {
        let discovered = discovery::read_manifest(manifest)?;
        let descriptor = discovered.descriptor.clone();
        let id = descriptor.id.clone();
        if self.extensions.iter().any(|e| e.id() == id) {
            return Err(HostError::discovery(
                manifest,
                format!("duplicate mod id '{}'", id),
            ));
        }
        if config.debug(DebugTopic::Mod) {
            info!(extension_id = %id, "Loading {}", descriptor);
        }

        let (artifact_path, origin) = match descriptor.kind {
            ArtifactKind::Source => self.resolve_source(&discovered, config, cache, summary)?,
            ArtifactKind::PrebuiltBinary => {
                (discovered.artifact_path.clone(), ArtifactOrigin::Prebuilt)
            }
        };

        let module: Arc<dyn LoadedModule> = Arc::from(
            self.loader
                .load(&descriptor, &artifact_path)
                .map_err(|source| HostError::Load {
                    id: id.clone(),
                    source,
                })?,
        );
        let mut instance = loader::instantiate(module.as_ref(), &descriptor.entry_type_name)
            .map_err(|source| HostError::Load {
                id: id.clone(),
                source,
            })?;

        let keep_alive: KeepAlive = Arc::new(module.clone());
        let patches = PatchScope::new(
            id.clone(),
            self.engine.clone(),
            config.debug(DebugTopic::Inject),
        );
        let timers = ExtensionTimers::new(
            id.clone(),
            scheduler.clone(),
            config.debug(DebugTopic::Timer),
        )
        .with_keep_alive(keep_alive);
        let mut context = HostContext::new(
            descriptor.clone(),
            config.clone(),
            module.info().clone(),
            patches,
            timers,
        );

        if let Err(source) = instance.init(&mut context) {
            let (patches, timers) = context.release();
            warn!(extension_id = %id, patches, timers, "Init failed, released its patches and timers");
            drop(instance);
            drop(context);
            return Err(HostError::Initialization { id, source });
        }

        if config.debug(DebugTopic::Mod) {
            info!(extension_id = %id, origin = ?origin, "Mod initialized");
        }
        self.extensions.push(LoadedExtension {
            instance,
            context,
            module,
            descriptor,
            artifact_path,
            origin,
            state: ExtensionState::Running,
            loaded_at: Utc::now(),
        });
        Ok(())
    }

    /// Cache lookup, compiling on a miss.
    fn resolve_source(
        &self,
        discovered: &DiscoveredMod,
        config: &LoaderConfig,
        cache: &ArtifactCache,
        summary: &mut LoadSummary,
    ) -> Result<(PathBuf, ArtifactOrigin)> {
        let id = discovered.descriptor.id.as_str();
        let log_cache = config.debug(DebugTopic::Cache);
        let log_compilation = config.debug(DebugTopic::Compilation);
        let cache_error = |source: CacheError| HostError::Cache {
            context: id.to_string(),
            source,
        };

        let (checksum, previous) = match cache
            .resolve(id, &discovered.mod_dir, log_compilation)
            .map_err(cache_error)?
        {
            CacheResolution::Hit(cached) => {
                summary.cache_hits += 1;
                if log_cache {
                    info!(extension_id = %id, checksum = %cached.checksum, "Cache hit");
                }
                return Ok((cached.artifact_path, ArtifactOrigin::Cached));
            }
            CacheResolution::Miss { checksum, previous } => (checksum, previous),
        };
        if log_cache {
            info!(
                extension_id = %id,
                %checksum,
                previous = previous.as_deref().unwrap_or("none"),
                "Cache miss, compiling"
            );
        }

        let compiler = self
            .compilers
            .get(&config.compiler_selector)
            .ok_or_else(|| ConfigError::UnknownCompiler(config.compiler_selector.clone()))?;
        let request = CompileRequest {
            descriptor: &discovered.descriptor,
            source_dir: &discovered.mod_dir,
            entry: discovered.artifact_path.clone(),
            build_dir: cache.build_dir(id),
            debug_symbols: log_compilation,
        };

        let started = Instant::now();
        let output = match compiler.compile(&request) {
            Ok(output) => output,
            Err(failure) => {
                for diagnostic in &failure.diagnostics {
                    if diagnostic.is_error() {
                        error!(extension_id = %id, "{}", diagnostic);
                    } else if log_compilation {
                        warn!(extension_id = %id, "{}", diagnostic);
                    }
                }
                return Err(HostError::Compilation {
                    id: id.to_string(),
                    failure,
                });
            }
        };
        if log_compilation {
            for warning in &output.warnings {
                warn!(extension_id = %id, "{}", warning);
            }
            if output.symbols.is_none() {
                warn!(extension_id = %id, "Compiler produced no debug symbols; entry will be rebuilt next cycle");
            }
        }
        debug!(
            extension_id = %id,
            compiler = compiler.name(),
            warnings = output.warning_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Compiled"
        );
        summary.compiled += 1;
        summary.warnings += output.warning_count();

        let cached = cache
            .store(id, &output.artifact, output.symbols.as_deref())
            .map_err(cache_error)?;
        Ok((cached.artifact_path, ArtifactOrigin::Compiled))
    }

    /// Stop every running mod in load order, releasing its patches and
    /// timers. The first failing `stop` aborts: later mods keep running and
    /// the registry is left as is.
    pub fn stop(&mut self) -> Result<()> {
        let previous = self.lifecycle.state();
        self.lifecycle.set_state(HostState::Unloading);
        let verbose = self
            .config
            .as_ref()
            .is_some_and(|c| c.debug(DebugTopic::Mod));

        for extension in self.extensions.iter_mut() {
            if extension.state == ExtensionState::Stopped {
                continue;
            }
            if let Err(source) = extension.instance.stop(&mut extension.context) {
                self.lifecycle.set_state(previous);
                let id = extension.id().to_string();
                error!(extension_id = %id, error = %source, "Stop failed, aborting");
                return Err(HostError::Stop { id, source });
            }
            let (patches, timers) = extension.context.release();
            extension.state = ExtensionState::Stopped;
            if verbose {
                info!(extension_id = %extension.id(), patches, timers, "Mod stopped");
            }
        }

        let stopped = self.extensions.len();
        self.extensions.clear();
        self.lifecycle.set_state(HostState::Unloaded);
        info!(stopped, "All mods stopped");
        Ok(())
    }

    /// `stop()` followed by `load_all()`. If stopping fails, the remaining
    /// mods are released without their stop hook, the registry is cleared
    /// and no load is attempted.
    pub fn reload(&mut self) -> Result<LoadSummary> {
        if let Err(err) = self.stop() {
            self.abandon_all();
            return Err(err);
        }
        self.load_all()
    }

    fn abandon_all(&mut self) {
        for extension in self.extensions.iter_mut() {
            extension.context.release();
        }
        let abandoned = self.extensions.len();
        self.extensions.clear();
        self.lifecycle.set_state(HostState::Unloaded);
        warn!(abandoned, "Reload aborted, remaining mods released without stop");
    }

    /// Add a compiler backend. Returns `false` if the name is taken.
    pub fn register_compiler(&mut self, compiler: Box<dyn Compiler>) -> bool {
        self.compilers.register(compiler)
    }

    pub fn compilers(&self) -> &CompilerRegistry {
        &self.compilers
    }

    pub fn set_timers_allowed(&self, allowed: bool) {
        self.lifecycle.set_timers_allowed(allowed);
    }

    pub fn timers_allowed(&self) -> bool {
        self.lifecycle.timers_allowed()
    }

    pub fn is_loaded(&self) -> bool {
        self.lifecycle.is_loaded()
    }

    pub fn state(&self) -> HostState {
        self.lifecycle.state()
    }

    pub fn lifecycle(&self) -> Arc<Lifecycle> {
        self.lifecycle.clone()
    }

    pub fn engine(&self) -> Arc<dyn PatchEngine> {
        self.engine.clone()
    }

    pub fn extensions(&self) -> &[LoadedExtension] {
        &self.extensions
    }

    pub fn extension(&self, id: &str) -> Option<&LoadedExtension> {
        self.extensions.iter().find(|e| e.id() == id)
    }

    pub fn loaded_ids(&self) -> Vec<String> {
        self.extensions.iter().map(|e| e.id().to_string()).collect()
    }

    /// Configuration of the last load cycle.
    pub fn config(&self) -> Option<&LoaderConfig> {
        self.config.as_deref()
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

/// Log an initialization phase as ok/failed and pass the result through.
fn log_phase<T>(phase: &str, result: Result<T>) -> Result<T> {
    match &result {
        Ok(_) => info!("{}: ok", phase),
        Err(err) => warn!(error = %err, "{}: failed", phase),
    }
    result
}
