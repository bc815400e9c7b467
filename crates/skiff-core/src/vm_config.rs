//! Persisted VM configuration.
//!
//! [`VmConfig`] is the durable description of a VM, stored as
//! `config.json` inside the VM bundle. It holds user intent only; no
//! runtime state ever lands in this document. The wire format uses
//! camelCase keys and serializes with sorted keys so saved documents
//! diff cleanly.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SharedFolderError;

// =============================================================================
// Enumerations
// =============================================================================

/// How the guest boots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootLoaderKind {
    /// Direct kernel boot from a kernel image on the host.
    Linux,
    /// UEFI firmware boot from the primary disk.
    #[default]
    Uefi,
}

impl BootLoaderKind {
    /// Returns the wire name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Uefi => "uefi",
        }
    }
}

impl std::fmt::Display for BootLoaderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the guest reaches the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkingMode {
    /// Address translation through the host. Always available.
    #[default]
    Nat,
    /// Direct attachment to a host interface. Requires an elevated
    /// entitlement the app does not carry, so builds reject it.
    Bridged,
}

impl NetworkingMode {
    /// Returns the wire name of this mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Nat => "nat",
            Self::Bridged => "bridged",
        }
    }
}

impl std::fmt::Display for NetworkingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much of the host the guest may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    /// Guest gets no host integration beyond its configured devices.
    #[default]
    Isolated,
    /// Guest may use host integration surfaces where available.
    Unrestricted,
}

impl IsolationMode {
    /// Returns the wire name of this mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Isolated => "isolated",
            Self::Unrestricted => "unrestricted",
        }
    }
}

impl std::fmt::Display for IsolationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Shared folders
// =============================================================================

/// A host directory exposed to the guest under a mount tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedFolder {
    /// Stable identity, independent of the name.
    pub id: Uuid,
    /// Mount tag visible in the guest. Letters, digits, `-`, `_` only.
    pub name: String,
    /// Host directory to expose. Must exist when the folder is defined.
    pub host_path: PathBuf,
    /// Whether the guest sees the directory read-only.
    pub read_only: bool,
}

impl SharedFolder {
    /// Creates a folder definition with a fresh id.
    pub fn new(name: impl Into<String>, host_path: impl Into<PathBuf>, read_only: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            host_path: host_path.into(),
            read_only,
        }
    }

    /// Checks the name charset and that the host directory exists.
    ///
    /// # Errors
    ///
    /// Returns [`SharedFolderError::InvalidName`] or
    /// [`SharedFolderError::DirectoryNotFound`].
    pub fn validate(&self) -> std::result::Result<(), SharedFolderError> {
        if !is_valid_folder_name(&self.name) {
            return Err(SharedFolderError::InvalidName(self.name.clone()));
        }
        if !self.host_path.is_dir() {
            return Err(SharedFolderError::DirectoryNotFound(self.host_path.clone()));
        }
        Ok(())
    }
}

/// Guest mount tags allow letters, digits, hyphen, and underscore.
fn is_valid_folder_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// The shared folders of one VM, with unique names enforced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SharedFolderSet(Vec<SharedFolder>);

impl SharedFolderSet {
    /// Validates a batch of definitions and replaces nothing on failure.
    ///
    /// # Errors
    ///
    /// Returns the first per-folder validation error, or
    /// [`SharedFolderError::DuplicateName`] when two entries share a name.
    pub fn create(folders: Vec<SharedFolder>) -> std::result::Result<Self, SharedFolderError> {
        let mut names = std::collections::HashSet::new();
        for folder in &folders {
            folder.validate()?;
            if !names.insert(folder.name.clone()) {
                return Err(SharedFolderError::DuplicateName(folder.name.clone()));
            }
        }
        Ok(Self(folders))
    }

    /// Validates and appends one definition.
    ///
    /// # Errors
    ///
    /// Returns a validation error, or [`SharedFolderError::DuplicateName`]
    /// when the name is already taken.
    pub fn add(&mut self, folder: SharedFolder) -> std::result::Result<(), SharedFolderError> {
        folder.validate()?;
        if self.0.iter().any(|f| f.name == folder.name) {
            return Err(SharedFolderError::DuplicateName(folder.name));
        }
        self.0.push(folder);
        Ok(())
    }

    /// Validates and replaces the entry with the same id.
    ///
    /// The uniqueness check skips the entry being replaced, so an update
    /// that keeps its own name always passes.
    ///
    /// # Errors
    ///
    /// Returns a validation error, [`SharedFolderError::DuplicateName`],
    /// or [`SharedFolderError::NotFound`] when no entry has this id.
    pub fn update(&mut self, folder: SharedFolder) -> std::result::Result<(), SharedFolderError> {
        folder.validate()?;
        if self
            .0
            .iter()
            .any(|f| f.id != folder.id && f.name == folder.name)
        {
            return Err(SharedFolderError::DuplicateName(folder.name));
        }
        let slot = self
            .0
            .iter_mut()
            .find(|f| f.id == folder.id)
            .ok_or(SharedFolderError::NotFound(folder.id))?;
        *slot = folder;
        Ok(())
    }

    /// Removes the entry with this id.
    ///
    /// # Errors
    ///
    /// Returns [`SharedFolderError::NotFound`] when no entry has this id.
    pub fn remove(&mut self, id: Uuid) -> std::result::Result<SharedFolder, SharedFolderError> {
        let index = self
            .0
            .iter()
            .position(|f| f.id == id)
            .ok_or(SharedFolderError::NotFound(id))?;
        Ok(self.0.remove(index))
    }

    /// Looks up an entry by id.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<&SharedFolder> {
        self.0.iter().find(|f| f.id == id)
    }

    /// Iterates the entries in definition order.
    pub fn iter(&self) -> std::slice::Iter<'_, SharedFolder> {
        self.0.iter()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a SharedFolderSet {
    type Item = &'a SharedFolder;
    type IntoIter = std::slice::Iter<'a, SharedFolder>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// =============================================================================
// VM configuration
// =============================================================================

/// Durable description of one VM.
///
/// Unknown keys are rejected on load so a document written by a newer
/// version fails loudly instead of silently dropping settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VmConfig {
    /// Stable VM identity.
    pub id: Uuid,
    /// Display name. Names are not unique; the id is the identity.
    pub name: String,
    /// Virtual CPU count.
    pub cpu_count: u32,
    /// Guest memory in bytes.
    pub memory_size: u64,
    /// Primary (boot) disk image.
    pub disk_image_path: PathBuf,
    /// Optional installer or live CD image, attached read-only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdrom_image_path: Option<PathBuf>,
    /// Boot method.
    #[serde(default)]
    pub boot_loader_type: BootLoaderKind,
    /// Kernel image for [`BootLoaderKind::Linux`]. Required for that kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_image_path: Option<PathBuf>,
    /// Optional initial ramdisk for direct kernel boot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initrd_path: Option<PathBuf>,
    /// Optional kernel command line for direct kernel boot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_cmdline: Option<String>,
    /// UEFI variable store. Filled in by the bundle loader when the
    /// bundle carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nvram_path: Option<PathBuf>,
    /// Network attachment mode.
    #[serde(default)]
    pub networking_mode: NetworkingMode,
    /// Host integration policy.
    #[serde(default)]
    pub isolation_mode: IsolationMode,
    /// Creation timestamp.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Host directories exposed to the guest.
    #[serde(default, skip_serializing_if = "SharedFolderSet::is_empty")]
    pub shared_folders: SharedFolderSet,
}

impl VmConfig {
    /// Creates a configuration with a fresh id and default modes
    /// (UEFI boot, NAT networking, isolated).
    pub fn new(
        name: impl Into<String>,
        cpu_count: u32,
        memory_size: u64,
        disk_image_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            cpu_count,
            memory_size,
            disk_image_path: disk_image_path.into(),
            cdrom_image_path: None,
            boot_loader_type: BootLoaderKind::default(),
            kernel_image_path: None,
            initrd_path: None,
            kernel_cmdline: None,
            nvram_path: None,
            networking_mode: NetworkingMode::default(),
            isolation_mode: IsolationMode::default(),
            created_at: Utc::now(),
            shared_folders: SharedFolderSet::default(),
        }
    }

    /// Serializes to pretty-printed JSON with sorted keys.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        // Round-trip through Value: its map is BTreeMap-backed, which
        // sorts keys and keeps saved documents byte-stable.
        let value = serde_json::to_value(self)?;
        serde_json::to_string_pretty(&value)
    }

    /// Parses a configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed JSON, missing required keys, or
    /// unknown keys.
    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }

    /// Whether this configuration boots a kernel directly.
    #[must_use]
    pub fn is_kernel_boot(&self) -> bool {
        self.boot_loader_type == BootLoaderKind::Linux
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_config() -> VmConfig {
        VmConfig::new("dev-box", 4, 8 * 1024 * 1024 * 1024, "/images/dev.img")
    }

    #[test]
    fn test_new_applies_defaults() {
        let config = sample_config();
        assert_eq!(config.boot_loader_type, BootLoaderKind::Uefi);
        assert_eq!(config.networking_mode, NetworkingMode::Nat);
        assert_eq!(config.isolation_mode, IsolationMode::Isolated);
        assert!(config.cdrom_image_path.is_none());
        assert!(config.nvram_path.is_none());
        assert!(config.shared_folders.is_empty());
    }

    #[test]
    fn test_json_round_trip_preserves_every_field() {
        let dir = TempDir::new().unwrap();
        let mut config = sample_config();
        config.cdrom_image_path = Some(PathBuf::from("/images/installer.iso"));
        config.boot_loader_type = BootLoaderKind::Linux;
        config.kernel_image_path = Some(PathBuf::from("/boot/vmlinux"));
        config.initrd_path = Some(PathBuf::from("/boot/initrd.img"));
        config.kernel_cmdline = Some("console=hvc0 root=/dev/vda".to_string());
        config.nvram_path = Some(PathBuf::from("/bundles/dev/nvram.bin"));
        config.networking_mode = NetworkingMode::Bridged;
        config.isolation_mode = IsolationMode::Unrestricted;
        config
            .shared_folders
            .add(SharedFolder::new("projects", dir.path(), true))
            .unwrap();

        let json = config.to_json().unwrap();
        let loaded = VmConfig::from_json(&json).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_json_uses_camel_case_keys() {
        let json = sample_config().to_json().unwrap();
        for key in [
            "\"id\"",
            "\"name\"",
            "\"cpuCount\"",
            "\"memorySize\"",
            "\"diskImagePath\"",
            "\"bootLoaderType\"",
            "\"networkingMode\"",
            "\"isolationMode\"",
            "\"createdAt\"",
        ] {
            assert!(json.contains(key), "missing {key} in:\n{json}");
        }
    }

    #[test]
    fn test_json_keys_are_sorted() {
        let json = sample_config().to_json().unwrap();
        let cpu = json.find("\"cpuCount\"").unwrap();
        let created = json.find("\"createdAt\"").unwrap();
        let disk = json.find("\"diskImagePath\"").unwrap();
        let memory = json.find("\"memorySize\"").unwrap();
        assert!(cpu < created);
        assert!(created < disk);
        assert!(disk < memory);
    }

    #[test]
    fn test_unset_optionals_are_omitted() {
        let json = sample_config().to_json().unwrap();
        assert!(!json.contains("cdromImagePath"));
        assert!(!json.contains("kernelImagePath"));
        assert!(!json.contains("nvramPath"));
        assert!(!json.contains("sharedFolders"));
    }

    #[test]
    fn test_enum_wire_values() {
        let mut config = sample_config();
        config.boot_loader_type = BootLoaderKind::Linux;
        config.networking_mode = NetworkingMode::Bridged;
        config.isolation_mode = IsolationMode::Unrestricted;
        let json = config.to_json().unwrap();
        assert!(json.contains("\"bootLoaderType\": \"linux\""));
        assert!(json.contains("\"networkingMode\": \"bridged\""));
        assert!(json.contains("\"isolationMode\": \"unrestricted\""));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let mut value: serde_json::Value =
            serde_json::from_str(&sample_config().to_json().unwrap()).unwrap();
        value["hostOnlyNetwork"] = serde_json::Value::Bool(true);
        let result = VmConfig::from_json(&value.to_string());
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_optionals_default_on_load() {
        let json = r#"{
            "id": "6f2a7a3e-97ab-4f1a-9d24-8e2e6f64b1a0",
            "name": "minimal",
            "cpuCount": 2,
            "memorySize": 1073741824,
            "diskImagePath": "/images/minimal.img",
            "bootLoaderType": "uefi",
            "networkingMode": "nat",
            "isolationMode": "isolated"
        }"#;
        let config = VmConfig::from_json(json).unwrap();
        assert_eq!(config.name, "minimal");
        assert!(config.shared_folders.is_empty());
        assert!(config.kernel_image_path.is_none());
    }

    #[test]
    fn test_folder_name_charset() {
        assert!(is_valid_folder_name("projects"));
        assert!(is_valid_folder_name("shared_folder-1"));
        assert!(is_valid_folder_name("A2"));
        assert!(!is_valid_folder_name(""));
        assert!(!is_valid_folder_name("has space"));
        assert!(!is_valid_folder_name("dot.name"));
        assert!(!is_valid_folder_name("slash/name"));
    }

    #[test]
    fn test_folder_requires_existing_directory() {
        let folder = SharedFolder::new("data", "/definitely/not/here", false);
        assert!(matches!(
            folder.validate(),
            Err(SharedFolderError::DirectoryNotFound(_))
        ));
    }

    #[test]
    fn test_folder_set_rejects_duplicate_names() {
        let dir = TempDir::new().unwrap();
        let mut set = SharedFolderSet::default();
        set.add(SharedFolder::new("data", dir.path(), false)).unwrap();
        let result = set.add(SharedFolder::new("data", dir.path(), true));
        assert!(matches!(result, Err(SharedFolderError::DuplicateName(_))));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_folder_batch_create_rejects_duplicates() {
        let dir = TempDir::new().unwrap();
        let result = SharedFolderSet::create(vec![
            SharedFolder::new("data", dir.path(), false),
            SharedFolder::new("data", dir.path(), true),
        ]);
        assert!(matches!(result, Err(SharedFolderError::DuplicateName(_))));
    }

    #[test]
    fn test_folder_update_may_keep_its_own_name() {
        let dir = TempDir::new().unwrap();
        let mut set = SharedFolderSet::default();
        let folder = SharedFolder::new("data", dir.path(), false);
        let id = folder.id;
        set.add(folder).unwrap();

        let mut updated = set.get(id).unwrap().clone();
        updated.read_only = true;
        set.update(updated).unwrap();
        assert!(set.get(id).unwrap().read_only);
    }

    #[test]
    fn test_folder_update_unknown_id() {
        let dir = TempDir::new().unwrap();
        let mut set = SharedFolderSet::default();
        let result = set.update(SharedFolder::new("data", dir.path(), false));
        assert!(matches!(result, Err(SharedFolderError::NotFound(_))));
    }

    #[test]
    fn test_folder_remove() {
        let dir = TempDir::new().unwrap();
        let mut set = SharedFolderSet::default();
        let folder = SharedFolder::new("data", dir.path(), false);
        let id = folder.id;
        set.add(folder).unwrap();

        let removed = set.remove(id).unwrap();
        assert_eq!(removed.name, "data");
        assert!(set.is_empty());
        assert!(matches!(
            set.remove(id),
            Err(SharedFolderError::NotFound(_))
        ));
    }
}
