//! Persisted per-output display configuration
//!
//! Options are keyed by output identity. Having no storage at all is a valid
//! setup: [`NullStorage`] never finds anything and drops every save.

use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::logging::SCREENS;
use crate::screens::{DisplayMode, FormFactor, OutputId, OutputOrientation};

/// Key of a stored output configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DisplayId {
    pub output_id: OutputId,
}

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "output-{}", self.output_id)
    }
}

/// Stored options for one output. Unset fields keep the compositor's choice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfigurationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_output_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<DisplayMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<OutputOrientation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_factor: Option<FormFactor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f32>,
}

pub trait DisplayConfigurationStorage: Send + Sync {
    fn save(&self, id: DisplayId, options: &DisplayConfigurationOptions) -> Result<()>;
    /// Returns `None` when nothing is stored for `id`
    fn load(&self, id: DisplayId) -> Option<DisplayConfigurationOptions>;
}

/// Storage backend used when none is configured
#[derive(Debug, Default)]
pub struct NullStorage;

impl DisplayConfigurationStorage for NullStorage {
    fn save(&self, _id: DisplayId, _options: &DisplayConfigurationOptions) -> Result<()> {
        Ok(())
    }

    fn load(&self, _id: DisplayId) -> Option<DisplayConfigurationOptions> {
        None
    }
}

/// Stores every output's options in one JSON file
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, DisplayConfigurationOptions>>,
}

impl JsonFileStorage {
    /// Opens the store. A missing file is an empty store.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            debug!(target: SCREENS, "No display configuration at {:?}", path);
            BTreeMap::new()
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl DisplayConfigurationStorage for JsonFileStorage {
    fn save(&self, id: DisplayId, options: &DisplayConfigurationOptions) -> Result<()> {
        let mut entries = self.entries.lock();
        entries.insert(id.to_string(), options.clone());

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let json = serde_json::to_string_pretty(&*entries)?;
        fs::write(&self.path, json)?;
        debug!(target: SCREENS, "Saved display configuration for {}", id);
        Ok(())
    }

    fn load(&self, id: DisplayId) -> Option<DisplayConfigurationOptions> {
        self.entries.lock().get(&id.to_string()).cloned()
    }
}

/// Opens the configured JSON store, falling back to [`NullStorage`]
pub fn open_storage(path: Option<&Path>) -> Box<dyn DisplayConfigurationStorage> {
    match path {
        Some(path) => match JsonFileStorage::open(path) {
            Ok(storage) => Box::new(storage),
            Err(e) => {
                warn!(target: SCREENS, "Cannot read display configuration {:?}: {}", path, e);
                Box::new(NullStorage)
            }
        },
        None => Box::new(NullStorage),
    }
}
