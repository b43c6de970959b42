//! Loader configuration (`modloader.json`).

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default file name of the loader configuration.
pub const CONFIG_FILE_NAME: &str = "modloader.json";

/// Verbose-log topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DebugTopic {
    /// Enables every other topic.
    All,
    Cache,
    Inject,
    Timer,
    Compilation,
    Init,
    Mod,
}

impl fmt::Display for DebugTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DebugTopic::All => "All",
            DebugTopic::Cache => "Cache",
            DebugTopic::Inject => "Inject",
            DebugTopic::Timer => "Timer",
            DebugTopic::Compilation => "Compilation",
            DebugTopic::Init => "Init",
            DebugTopic::Mod => "Mod",
        };
        f.write_str(name)
    }
}

/// Set of enabled debug topics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DebugTopics(BTreeSet<DebugTopic>);

impl DebugTopics {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        [DebugTopic::All].into_iter().collect()
    }

    pub fn insert(&mut self, topic: DebugTopic) {
        self.0.insert(topic);
    }

    /// Whether `topic` is on, either directly or through `All`.
    pub fn enabled(&self, topic: DebugTopic) -> bool {
        self.0.contains(&DebugTopic::All) || self.0.contains(&topic)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DebugTopic> {
        self.0.iter()
    }
}

impl FromIterator<DebugTopic> for DebugTopics {
    fn from_iter<I: IntoIterator<Item = DebugTopic>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A library the compiler links mods against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryReference {
    /// Resolved by the toolchain's own search paths (e.g. `"dl"`).
    System(String),
    /// File path, relative to the working directory. Must exist.
    Local(PathBuf),
}

impl fmt::Display for LibraryReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LibraryReference::System(name) => write!(f, "system:{}", name),
            LibraryReference::Local(path) => write!(f, "local:{}", path.display()),
        }
    }
}

/// Process-wide loader settings, replaced wholesale on every load cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoaderConfig {
    #[serde(default)]
    pub debug_topics: DebugTopics,

    #[serde(default = "default_use_cache")]
    pub use_cache: bool,

    /// Name of the registered compiler to use for `Source` mods.
    #[serde(default = "default_compiler_selector")]
    pub compiler_selector: String,

    #[serde(default = "default_mods_directory")]
    pub mods_directory: PathBuf,

    #[serde(default)]
    pub referenced_libraries: Vec<LibraryReference>,

    #[serde(default = "default_cache_directory")]
    pub cache_directory: PathBuf,

    /// Hash source files in sorted path order instead of enumeration order.
    #[serde(default)]
    pub sort_checksum_inputs: bool,
}

fn default_use_cache() -> bool {
    true
}

fn default_compiler_selector() -> String {
    "cargo".to_string()
}

fn default_mods_directory() -> PathBuf {
    PathBuf::from("Mods")
}

fn default_cache_directory() -> PathBuf {
    PathBuf::from("ModsCache")
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            debug_topics: DebugTopics::default(),
            use_cache: default_use_cache(),
            compiler_selector: default_compiler_selector(),
            mods_directory: default_mods_directory(),
            referenced_libraries: Vec::new(),
            cache_directory: default_cache_directory(),
            sort_checksum_inputs: false,
        }
    }
}

impl LoaderConfig {
    /// Whether verbose logging for `topic` is on.
    pub fn debug(&self, topic: DebugTopic) -> bool {
        self.debug_topics.enabled(topic)
    }
}
