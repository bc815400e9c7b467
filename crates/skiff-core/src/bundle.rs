//! VM bundle directories.
//!
//! A bundle is the on-disk home of one VM: a directory holding the
//! configuration document, the primary disk image, optional UEFI
//! variables, and space for auxiliary images, snapshots, and logs.
//!
//! ```text
//! <name>/
//!   config.json      persisted VmConfig
//!   disk.img         primary disk image
//!   nvram.bin        UEFI variable store (optional)
//!   aux_storage/     secondary disk images
//!   snapshots/       saved machine states
//!   logs/console.log guest console output
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::BundleError;
use crate::vm_config::VmConfig;

const CONFIG_FILE: &str = "config.json";
const DISK_IMAGE: &str = "disk.img";
const NVRAM_FILE: &str = "nvram.bin";
const AUX_STORAGE_DIR: &str = "aux_storage";
const SNAPSHOTS_DIR: &str = "snapshots";
const LOGS_DIR: &str = "logs";
const CONSOLE_LOG: &str = "console.log";

// =============================================================================
// Bundle
// =============================================================================

/// One VM's directory on disk.
#[derive(Debug, Clone)]
pub struct VmBundle {
    root: PathBuf,
}

impl VmBundle {
    /// Creates a bundle named `name` under `parent` and installs the
    /// configuration into it.
    ///
    /// The primary disk is allocated sparsely at `disk_size` bytes and
    /// the returned configuration points at it. A failure partway
    /// through removes the partial bundle.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::AlreadyExists`] when the target path is
    /// taken, [`BundleError::DiskAllocation`] when the image cannot be
    /// allocated, or an I/O error from directory or file creation.
    pub fn create(
        name: &str,
        parent: impl AsRef<Path>,
        config: VmConfig,
        disk_size: u64,
    ) -> Result<(Self, VmConfig), BundleError> {
        let root = parent.as_ref().join(name);
        if root.exists() {
            return Err(BundleError::AlreadyExists(root));
        }

        let bundle = Self { root };
        match bundle.populate(config, disk_size) {
            Ok(config) => {
                debug!(vm_id = %config.id, path = %bundle.root.display(), "bundle created");
                Ok((bundle, config))
            }
            Err(err) => {
                let _ = fs::remove_dir_all(&bundle.root);
                Err(err)
            }
        }
    }

    fn populate(&self, mut config: VmConfig, disk_size: u64) -> Result<VmConfig, BundleError> {
        fs::create_dir_all(self.aux_storage_dir())?;
        fs::create_dir(self.snapshots_dir())?;
        fs::create_dir(self.logs_dir())?;
        allocate_disk_image(&self.disk_image_path(), disk_size)?;

        config.disk_image_path = self.disk_image_path();
        self.save_config(&config)?;
        Ok(config)
    }

    /// Opens an existing bundle and loads its configuration.
    ///
    /// When the bundle carries a `nvram.bin` and the document does not
    /// name a variable store yet, the loaded configuration points at the
    /// bundle's copy.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::InvalidBundle`] when the path is not a
    /// directory, [`BundleError::ConfigNotFound`] when it has no
    /// `config.json`, or [`BundleError::CorruptedConfig`] when the
    /// document does not parse.
    pub fn load(path: impl Into<PathBuf>) -> Result<(Self, VmConfig), BundleError> {
        let root = path.into();
        if !root.is_dir() {
            return Err(BundleError::InvalidBundle(root));
        }

        let bundle = Self { root };
        let config_path = bundle.config_path();
        if !config_path.is_file() {
            return Err(BundleError::ConfigNotFound(config_path));
        }

        let data = fs::read_to_string(&config_path)?;
        let mut config = VmConfig::from_json(&data).map_err(|source| {
            BundleError::CorruptedConfig {
                path: config_path,
                source,
            }
        })?;

        if config.nvram_path.is_none() && bundle.nvram_path().is_file() {
            config.nvram_path = Some(bundle.nvram_path());
        }

        Ok((bundle, config))
    }

    /// Writes the configuration document into the bundle.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save_config(&self, config: &VmConfig) -> Result<(), BundleError> {
        let json = config.to_json()?;
        fs::write(self.config_path(), json)?;
        Ok(())
    }

    /// Deletes the bundle directory and everything in it.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be removed.
    pub fn delete(self) -> Result<(), BundleError> {
        fs::remove_dir_all(&self.root)?;
        debug!(path = %self.root.display(), "bundle deleted");
        Ok(())
    }

    /// Bundle root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the configuration document.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Path of the primary disk image.
    #[must_use]
    pub fn disk_image_path(&self) -> PathBuf {
        self.root.join(DISK_IMAGE)
    }

    /// Path of the UEFI variable store.
    #[must_use]
    pub fn nvram_path(&self) -> PathBuf {
        self.root.join(NVRAM_FILE)
    }

    /// Directory for secondary disk images.
    #[must_use]
    pub fn aux_storage_dir(&self) -> PathBuf {
        self.root.join(AUX_STORAGE_DIR)
    }

    /// Directory for saved machine states.
    #[must_use]
    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join(SNAPSHOTS_DIR)
    }

    /// Directory for log files.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    /// Path of the guest console log.
    #[must_use]
    pub fn console_log_path(&self) -> PathBuf {
        self.logs_dir().join(CONSOLE_LOG)
    }

    /// Console log writer for this bundle.
    #[must_use]
    pub fn console_log(&self) -> ConsoleLog {
        ConsoleLog::new(self.console_log_path())
    }
}

/// Allocates the disk image sparsely. A partial file left by a failed
/// allocation is removed.
fn allocate_disk_image(path: &Path, size: u64) -> Result<(), BundleError> {
    let map_err = |source: std::io::Error| BundleError::DiskAllocation {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(map_err)?;
    if let Err(source) = file.set_len(size) {
        drop(file);
        let _ = fs::remove_file(path);
        return Err(map_err(source));
    }
    Ok(())
}

// =============================================================================
// Console log
// =============================================================================

/// Append-only writer for guest console output.
#[derive(Debug, Clone)]
pub struct ConsoleLog {
    path: PathBuf,
}

impl ConsoleLog {
    /// Creates a writer for the given path. The file is created on
    /// first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Appends one line, normalizing the trailing newline.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or written.
    pub fn append(&self, line: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line.trim_end_matches(['\r', '\n']))
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
