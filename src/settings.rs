// Settings store: validated, versioned, copy-on-write sampler configuration.

use crate::models::{
    Configuration, ConfigurationUpdate, INTERVAL_CEILING_MS, INTERVAL_FLOOR_MS, SamplerSettings,
    SourceKind,
};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("intervalMs must be between {min} and {max}, got {value}")]
    IntervalOutOfRange { value: u64, min: u64, max: u64 },
    #[error("unknown source {0:?}, expected one of cpu, memory, disk, gpu")]
    UnknownSource(String),
    #[error("selectedDisks must not contain empty paths")]
    EmptyDiskPath,
}

impl ValidationError {
    /// Name of the offending update field, as sent on the wire.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::IntervalOutOfRange { .. } => "intervalMs",
            ValidationError::UnknownSource(_) => "enabledSources",
            ValidationError::EmptyDiskPath => "selectedDisks",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("configuration version {version} applied but not saved to {path}: {source}")]
    Persist {
        version: u64,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Applies `update` on top of `current`. Pure: nothing is published here.
pub fn validate(
    current: &SamplerSettings,
    update: &ConfigurationUpdate,
) -> Result<SamplerSettings, ValidationError> {
    let mut next = current.clone();

    if let Some(interval_ms) = update.interval_ms {
        if !(INTERVAL_FLOOR_MS..=INTERVAL_CEILING_MS).contains(&interval_ms) {
            return Err(ValidationError::IntervalOutOfRange {
                value: interval_ms,
                min: INTERVAL_FLOOR_MS,
                max: INTERVAL_CEILING_MS,
            });
        }
        next.interval_ms = interval_ms;
    }

    if let Some(names) = &update.enabled_sources {
        next.enabled_sources = names
            .iter()
            .map(|n| n.parse::<SourceKind>().map_err(ValidationError::UnknownSource))
            .collect::<Result<BTreeSet<_>, _>>()?;
    }

    if let Some(disks) = &update.selected_disks {
        if disks.iter().any(|d| d.trim().is_empty()) {
            return Err(ValidationError::EmptyDiskPath);
        }
        next.selected_disks = dedup(disks.iter().cloned());
    }

    if let Some(indices) = &update.selected_gpu_indices {
        next.selected_gpu_indices = dedup(indices.iter().copied());
    }

    Ok(next)
}

fn dedup<T: PartialEq>(items: impl Iterator<Item = T>) -> Vec<T> {
    let mut out = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

/// Single-writer holder of the current configuration.
///
/// Readers get an `Arc<Configuration>` that never changes under them. Updates are validated
/// and version-bumped while holding the channel's write lock, so concurrent callers are
/// serialized and versions are strictly ordered.
pub struct SettingsStore {
    tx: watch::Sender<Arc<Configuration>>,
    path: Option<PathBuf>,
    /// Held while the settings file is written.
    persist_lock: Mutex<()>,
}

impl SettingsStore {
    pub fn new(initial: SamplerSettings) -> Self {
        let (tx, _) = watch::channel(Arc::new(Configuration {
            version: 1,
            settings: initial.clamped(),
        }));
        Self {
            tx,
            path: None,
            persist_lock: Mutex::new(()),
        }
    }

    /// Seeds from the settings file at `path` when it exists and parses, otherwise from
    /// `fallback`. Accepted updates with `persist` set are written back to `path`.
    pub fn load(path: Option<PathBuf>, fallback: SamplerSettings) -> Self {
        let initial = match path.as_deref() {
            Some(p) if p.exists() => match read_settings(p) {
                Ok(s) => {
                    tracing::info!(path = %p.display(), "settings loaded");
                    s
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        path = %p.display(),
                        "failed to read settings file, using defaults"
                    );
                    fallback
                }
            },
            _ => fallback,
        };
        let mut store = Self::new(initial);
        store.path = path;
        store
    }

    pub fn current(&self) -> Arc<Configuration> {
        self.tx.borrow().clone()
    }

    pub fn version(&self) -> u64 {
        self.tx.borrow().version
    }

    /// Receiver the sampler watches for new generations.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Configuration>> {
        self.tx.subscribe()
    }

    /// Validates and publishes `update`, returning the new version. On a validation error the
    /// current configuration is left exactly as it was.
    ///
    /// With `persist` set this also writes the settings file, which blocks; async callers
    /// should run it on the blocking pool.
    pub fn update(&self, update: &ConfigurationUpdate) -> Result<u64, SettingsError> {
        // Overwritten by the closure, which always runs.
        let mut outcome = Ok(self.current());
        self.tx.send_if_modified(|current| match validate(&current.settings, update) {
            Ok(settings) => {
                let next = Arc::new(Configuration {
                    version: current.version + 1,
                    settings,
                });
                *current = next.clone();
                outcome = Ok(next);
                true
            }
            Err(e) => {
                outcome = Err(e);
                false
            }
        });

        let next = match outcome {
            Ok(next) => next,
            Err(e) => {
                tracing::info!(error = %e, field = e.field(), "configuration update rejected");
                return Err(e.into());
            }
        };
        tracing::info!(
            version = next.version,
            interval_ms = next.settings.interval_ms,
            enabled_sources = ?next.settings.enabled_sources,
            "configuration updated"
        );

        if update.persist {
            self.persist(next.version)?;
        }
        Ok(next.version)
    }

    /// Writes the current generation, which may be newer than `applied` when updates race.
    fn persist(&self, applied: u64) -> Result<(), SettingsError> {
        let Some(path) = &self.path else {
            tracing::warn!("persist requested but no settings path is configured");
            return Ok(());
        };
        let _writer = self.persist_lock.lock().unwrap_or_else(|e| e.into_inner());
        let config = self.current();
        write_settings(path, &config.settings).map_err(|source| SettingsError::Persist {
            version: applied,
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), version = config.version, "settings saved");
        Ok(())
    }
}

fn read_settings(path: &Path) -> std::io::Result<SamplerSettings> {
    let s = std::fs::read_to_string(path)?;
    let settings: SamplerSettings = serde_json::from_str(&s)?;
    Ok(settings.clamped())
}

/// Writes to a temporary file next to `path` and renames it into place, so readers only ever
/// see a complete file.
fn write_settings(path: &Path, settings: &SamplerSettings) -> std::io::Result<()> {
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            std::fs::create_dir_all(parent)?;
            parent
        }
        None => Path::new("."),
    };
    let json = serde_json::to_string_pretty(settings)?;
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(json.as_bytes())?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}
