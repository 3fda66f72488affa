//! Dataset discovery
//!
//! Datasets are found by walking `{root}/{mode}/{timeframe}/{symbol}.{ext}`.
//! [`SharedRegistry`] keeps a snapshot and swaps in a freshly discovered one
//! when the storage tree changes.

use crate::codec::StorageFormat;
use crate::layout::INDEX_EXTENSION;
use crate::metrics::record_registry_size;
use crate::shutdown::SharedShutdown;
use crate::{Result, Timeframe};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One resampled dataset on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    /// Symbol (file stem)
    pub symbol: String,
    /// Timeframe ident (directory name)
    pub timeframe: String,
    /// Dataset file
    pub path: PathBuf,
    /// Encoding
    pub format: StorageFormat,
}

impl Dataset {
    /// Checkpoint index next to the dataset
    pub fn index_path(&self) -> PathBuf {
        self.path.with_extension(INDEX_EXTENSION)
    }
}

/// Index of datasets as `symbol -> timeframe -> dataset`
#[derive(Debug, Clone, Default)]
pub struct DatasetRegistry {
    root: PathBuf,
    datasets: BTreeMap<String, BTreeMap<String, Dataset>>,
}

impl DatasetRegistry {
    /// Walk `root`; a missing root yields an empty registry.
    ///
    /// When a dataset exists in both modes the binary one is kept.
    pub fn discover<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        let mut registry = Self {
            root: root.to_path_buf(),
            datasets: BTreeMap::new(),
        };

        for format in StorageFormat::all() {
            let mode_dir = root.join(format.mode_dir());
            for tf_dir in read_dir_or_empty(&mode_dir)? {
                if !tf_dir.is_dir() {
                    continue;
                }
                let Some(timeframe) = file_name(&tf_dir) else {
                    continue;
                };
                if timeframe.parse::<Timeframe>().is_err() {
                    debug!(dir = %tf_dir.display(), "Skipping non-timeframe directory");
                    continue;
                }
                for path in read_dir_or_empty(&tf_dir)? {
                    if path.extension().and_then(|e| e.to_str()) != Some(format.extension()) {
                        continue;
                    }
                    let Some(symbol) = path.file_stem().and_then(|s| s.to_str()) else {
                        continue;
                    };
                    registry.insert(Dataset {
                        symbol: symbol.to_string(),
                        timeframe: timeframe.clone(),
                        path: path.clone(),
                        format,
                    });
                }
            }
        }

        record_registry_size(registry.len());
        debug!(root = %root.display(), datasets = registry.len(), "Discovered datasets");
        Ok(registry)
    }

    fn insert(&mut self, dataset: Dataset) {
        let slot = self
            .datasets
            .entry(dataset.symbol.clone())
            .or_default()
            .entry(dataset.timeframe.clone());
        match slot {
            std::collections::btree_map::Entry::Vacant(v) => {
                v.insert(dataset);
            }
            std::collections::btree_map::Entry::Occupied(mut o) => {
                if dataset.format == StorageFormat::Binary {
                    o.insert(dataset);
                }
            }
        }
    }

    /// Storage root this registry was discovered from
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Dataset of `symbol` at `timeframe`
    pub fn find(&self, symbol: &str, timeframe: &str) -> Option<&Dataset> {
        self.datasets.get(symbol)?.get(timeframe)
    }

    /// Timeframes available for `symbol`, shortest first
    pub fn get_available_timeframes(&self, symbol: &str) -> Vec<String> {
        let mut timeframes: Vec<String> = self
            .datasets
            .get(symbol)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        timeframes.sort_by_key(|tf| {
            tf.parse::<Timeframe>()
                .map(|t| t.duration_ms())
                .unwrap_or(u64::MAX)
        });
        timeframes
    }

    /// Every dataset, ordered by symbol then timeframe ident
    pub fn get_available_datasets(&self) -> Vec<&Dataset> {
        self.datasets.values().flat_map(|m| m.values()).collect()
    }

    /// Known symbols
    pub fn symbols(&self) -> Vec<&str> {
        self.datasets.keys().map(String::as_str).collect()
    }

    /// Number of datasets
    pub fn len(&self) -> usize {
        self.datasets.values().map(BTreeMap::len).sum()
    }

    /// Whether no dataset was found
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
}

fn read_dir_or_empty(dir: &Path) -> Result<Vec<PathBuf>> {
    match std::fs::read_dir(dir) {
        Ok(entries) => {
            let mut paths = Vec::new();
            for entry in entries {
                paths.push(entry?.path());
            }
            paths.sort();
            Ok(paths)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// Cheap summary of the storage tree used to detect changes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fingerprint {
    /// Files under the mode directories
    pub files: u64,
    /// Their total size
    pub total_size: u64,
    /// Newest modification time
    pub newest_mtime: Option<SystemTime>,
}

impl Fingerprint {
    /// Fingerprint of the dataset tree under `root`
    pub fn of<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        let mut fp = Fingerprint::default();
        for format in StorageFormat::all() {
            for tf_dir in read_dir_or_empty(&root.join(format.mode_dir()))? {
                if !tf_dir.is_dir() {
                    continue;
                }
                for path in read_dir_or_empty(&tf_dir)? {
                    let meta = match std::fs::metadata(&path) {
                        Ok(meta) => meta,
                        // removed between listing and stat
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                        Err(e) => return Err(e.into()),
                    };
                    fp.files += 1;
                    fp.total_size += meta.len();
                    if let Ok(mtime) = meta.modified() {
                        fp.newest_mtime = fp.newest_mtime.max(Some(mtime));
                    }
                }
            }
        }
        Ok(fp)
    }
}

struct Snapshot {
    registry: Arc<DatasetRegistry>,
    fingerprint: Fingerprint,
}

/// Registry shared between readers, refreshed when the tree changes
pub struct SharedRegistry {
    root: PathBuf,
    current: RwLock<Snapshot>,
}

impl SharedRegistry {
    /// Discover `root` and remember its fingerprint
    pub fn open<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let root = root.into();
        let fingerprint = Fingerprint::of(&root)?;
        let registry = Arc::new(DatasetRegistry::discover(&root)?);
        Ok(Self {
            root,
            current: RwLock::new(Snapshot {
                registry,
                fingerprint,
            }),
        })
    }

    /// Current registry; stays valid across refreshes
    pub fn snapshot(&self) -> Arc<DatasetRegistry> {
        let current = self
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&current.registry)
    }

    /// Rediscover if the fingerprint changed; returns whether a swap happened
    pub fn refresh_if_changed(&self) -> Result<bool> {
        let fingerprint = Fingerprint::of(&self.root)?;
        {
            let current = self
                .current
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if current.fingerprint == fingerprint {
                return Ok(false);
            }
        }

        let registry = Arc::new(DatasetRegistry::discover(&self.root)?);
        info!(
            root = %self.root.display(),
            datasets = registry.len(),
            "Dataset registry refreshed"
        );
        let mut current = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = Snapshot {
            registry,
            fingerprint,
        };
        Ok(true)
    }
}

/// Check the registry every `interval` until shutdown
pub fn spawn_refresh_task(
    shared: Arc<SharedRegistry>,
    interval: Duration,
    shutdown: SharedShutdown,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let registry = Arc::clone(&shared);
                    match tokio::task::spawn_blocking(move || registry.refresh_if_changed()).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => warn!(error = %e, "Dataset registry refresh failed"),
                        Err(e) => warn!(error = %e, "Dataset registry refresh task panicked"),
                    }
                }
                _ = shutdown.wait_for_shutdown() => {
                    debug!("Registry refresh stopped");
                    break;
                }
            }
        }
    })
}
