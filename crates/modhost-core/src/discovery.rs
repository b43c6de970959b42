//! Finding and parsing `mod.json` manifests.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use modhost_sdk::ExtensionDescriptor;
use walkdir::WalkDir;

use crate::error::{HostError, Result};

pub const MANIFEST_FILE_NAME: &str = "mod.json";

/// A parsed manifest whose declared artifact exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredMod {
    pub descriptor: ExtensionDescriptor,
    pub manifest_path: PathBuf,
    /// Directory holding the manifest; the source tree of `Source` mods.
    pub mod_dir: PathBuf,
    /// `mod_dir` joined with the declared artifact filename.
    pub artifact_path: PathBuf,
}

/// Every manifest below `root` (any depth), in sorted path order.
pub fn find_manifests(root: &Path) -> Result<Vec<PathBuf>> {
    let mut manifests = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| HostError::discovery(root, e.to_string()))?;
        if entry.file_type().is_file() && entry.file_name() == MANIFEST_FILE_NAME {
            manifests.push(entry.into_path());
        }
    }
    manifests.sort();
    Ok(manifests)
}

/// Parse one manifest and check that its artifact file exists.
pub fn read_manifest(path: &Path) -> Result<DiscoveredMod> {
    let text = fs::read_to_string(path).map_err(|e| HostError::io(path, e))?;
    let descriptor = ExtensionDescriptor::from_json(&text)
        .map_err(|e| HostError::discovery(path, format!("invalid manifest: {}", e)))?;
    if descriptor.id.trim().is_empty() {
        return Err(HostError::discovery(path, "manifest has an empty id"));
    }

    let mod_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let artifact_path = mod_dir.join(&descriptor.artifact_filename);
    if !artifact_path.exists() {
        return Err(HostError::discovery(
            path,
            format!(
                "artifact {} of '{}' does not exist",
                artifact_path.display(),
                descriptor.id
            ),
        ));
    }

    Ok(DiscoveredMod {
        descriptor,
        manifest_path: path.to_path_buf(),
        mod_dir,
        artifact_path,
    })
}

/// Parse every manifest below `root`, rejecting duplicate ids.
pub fn discover(root: &Path) -> Result<Vec<DiscoveredMod>> {
    let mut seen = HashSet::new();
    let mut mods = Vec::new();
    for manifest in find_manifests(root)? {
        let discovered = read_manifest(&manifest)?;
        if !seen.insert(discovered.descriptor.id.clone()) {
            return Err(HostError::discovery(
                &manifest,
                format!("duplicate mod id '{}'", discovered.descriptor.id),
            ));
        }
        mods.push(discovered);
    }
    Ok(mods)
}

#[cfg(test)]
mod tests {
    use super::*;
    use modhost_sdk::ArtifactKind;
    use tempfile::TempDir;

    fn write_mod(root: &Path, dir: &str, id: &str, artifact: Option<&str>) {
        let dir = root.join(dir);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(MANIFEST_FILE_NAME),
            format!(
                r#"{{"id":"{}","type":"Source","artifactFilename":"lib.rs","entryTypeName":"Entry"}}"#,
                id
            ),
        )
        .unwrap();
        if let Some(name) = artifact {
            fs::write(dir.join(name), "// mod").unwrap();
        }
    }

    #[test]
    fn test_finds_nested_manifests_in_order() {
        let tmp = TempDir::new().unwrap();
        write_mod(tmp.path(), "b", "b", Some("lib.rs"));
        write_mod(tmp.path(), "a/nested", "nested", Some("lib.rs"));
        write_mod(tmp.path(), "a", "a", Some("lib.rs"));

        let mods = discover(tmp.path()).unwrap();
        let ids: Vec<_> = mods.iter().map(|m| m.descriptor.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "nested", "b"]);
        assert_eq!(mods[0].descriptor.kind, ArtifactKind::Source);
        assert_eq!(mods[0].artifact_path, tmp.path().join("a/lib.rs"));
        assert_eq!(mods[0].descriptor.name, "a");
    }

    #[test]
    fn test_missing_artifact_is_discovery_error() {
        let tmp = TempDir::new().unwrap();
        write_mod(tmp.path(), "m1", "m1", None);

        let err = discover(tmp.path()).unwrap_err();
        assert_eq!(err.phase(), "discovery");
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_duplicate_id() {
        let tmp = TempDir::new().unwrap();
        write_mod(tmp.path(), "one", "same", Some("lib.rs"));
        write_mod(tmp.path(), "two", "same", Some("lib.rs"));

        let err = discover(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("duplicate mod id 'same'"));
    }

    #[test]
    fn test_bad_manifest() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("bad")).unwrap();
        fs::write(tmp.path().join("bad").join(MANIFEST_FILE_NAME), "{").unwrap();
        assert!(matches!(
            discover(tmp.path()),
            Err(HostError::Discovery { .. })
        ));
    }

    #[test]
    fn test_empty_root() {
        let tmp = TempDir::new().unwrap();
        assert!(discover(tmp.path()).unwrap().is_empty());
    }
}
