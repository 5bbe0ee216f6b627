// Per-volume disk usage via sysinfo

use super::{
    InFlight, Reading, SourceAdapter, SourceError, run_blocking, run_exclusive, usage_percent,
};
use crate::models::{Configuration, DiskReading, SourceKind, VolumeInfo};
use futures_util::future::BoxFuture;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use sysinfo::{Disk, Disks};
use tracing::instrument;

const VIRTUAL_FILESYSTEMS: &[&str] = &[
    "proc", "sysfs", "tmpfs", "devtmpfs", "devpts", "cgroup", "cgroup2", "overlay", "squashfs",
];
const VIRTUAL_MOUNT_ROOTS: &[&str] = &["/proc", "/sys", "/dev"];
/// Refreshes a mount may stay unseen before it loses its position.
const ORDER_RETENTION_REFRESHES: u64 = 3600;
/// Upper bound on remembered mounts; the longest-absent ones go first.
const MAX_TRACKED_MOUNTS: usize = 256;

/// True for pseudo filesystems that never hold user data.
pub fn is_virtual_mount(filesystem: &str, mount: &str) -> bool {
    if VIRTUAL_FILESYSTEMS.contains(&filesystem) {
        return true;
    }
    VIRTUAL_MOUNT_ROOTS.iter().any(|root| {
        mount == *root
            || mount
                .strip_prefix(root)
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

struct TrackedMount {
    mount: String,
    last_seen: u64,
}

/// Mount points in first-detection order. A volume that disappears keeps its position while
/// it is away for less than `ORDER_RETENTION_REFRESHES` refreshes.
#[derive(Default)]
struct MountOrder {
    mounts: Vec<TrackedMount>,
    generation: u64,
}

impl MountOrder {
    fn observe<'a>(&mut self, visible: impl IntoIterator<Item = &'a str>) {
        self.generation += 1;
        let generation = self.generation;
        for mount in visible {
            match self.mounts.iter_mut().find(|t| t.mount == mount) {
                Some(tracked) => tracked.last_seen = generation,
                None => self.mounts.push(TrackedMount {
                    mount: mount.to_string(),
                    last_seen: generation,
                }),
            }
        }
        self.mounts
            .retain(|t| generation - t.last_seen < ORDER_RETENTION_REFRESHES);
        if self.mounts.len() > MAX_TRACKED_MOUNTS {
            let excess = self.mounts.len() - MAX_TRACKED_MOUNTS;
            let mut stalest: Vec<usize> = (0..self.mounts.len()).collect();
            stalest.sort_by_key(|&i| self.mounts[i].last_seen);
            let evicted: HashSet<usize> = stalest.into_iter().take(excess).collect();
            let mut index = 0;
            self.mounts.retain(|_| {
                let keep = !evicted.contains(&index);
                index += 1;
                keep
            });
        }
    }

    fn position(&self, mount: &str) -> usize {
        self.mounts
            .iter()
            .position(|t| t.mount == mount)
            .unwrap_or(usize::MAX)
    }
}

struct DiskState {
    disks: Disks,
    order: MountOrder,
}

impl DiskState {
    fn refresh(&mut self) -> Vec<&Disk> {
        self.disks.refresh(true);
        let visible: Vec<&Disk> = self
            .disks
            .list()
            .iter()
            .filter(|d| {
                !is_virtual_mount(
                    &d.file_system().to_string_lossy(),
                    &d.mount_point().to_string_lossy(),
                )
            })
            .collect();
        let mounts: Vec<String> = visible
            .iter()
            .map(|d| d.mount_point().to_string_lossy().into_owned())
            .collect();
        self.order.observe(mounts.iter().map(String::as_str));
        visible
    }
}

pub struct DiskAdapter {
    state: Arc<Mutex<DiskState>>,
    in_flight: InFlight,
}

impl Default for DiskAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskAdapter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DiskState {
                disks: Disks::new_with_refreshed_list(),
                order: MountOrder::default(),
            })),
            in_flight: InFlight::default(),
        }
    }

    /// Reads every selected volume. A volume whose size cannot be read is left out of this
    /// tick without affecting the others.
    #[instrument(skip(self, config), fields(source = "disk", operation = "sample_disks"))]
    pub async fn read(&self, config: &Configuration) -> Result<Vec<DiskReading>, SourceError> {
        let state = self.state.clone();
        let config = config.clone();
        run_exclusive(SourceKind::Disk, &self.in_flight, move || {
            let mut guard = state.lock().map_err(|e| {
                SourceError::Failed(SourceKind::Disk, format!("lock poisoned: {e}"))
            })?;
            let mut readings: Vec<DiskReading> = guard
                .refresh()
                .into_iter()
                .filter_map(|d| {
                    let mount = d.mount_point().to_string_lossy().into_owned();
                    if !config.disk_selected(&mount) {
                        return None;
                    }
                    let total = d.total_space();
                    if total == 0 {
                        tracing::debug!(mount = %mount, "volume size unreadable, skipped this tick");
                        return None;
                    }
                    let available = d.available_space();
                    let used = total.saturating_sub(available);
                    Some(DiskReading {
                        mount,
                        name: d.name().to_string_lossy().into_owned(),
                        filesystem: d.file_system().to_string_lossy().into_owned(),
                        total_space: total,
                        used_space: used,
                        available_space: available,
                        usage_percent: usage_percent(used, total),
                    })
                })
                .collect();
            readings.sort_by_key(|r| guard.order.position(&r.mount));
            Ok(readings)
        })
        .await
    }

    /// Volumes currently visible, in detection order.
    pub async fn detect(&self) -> Result<Vec<VolumeInfo>, SourceError> {
        let state = self.state.clone();
        run_blocking(SourceKind::Disk, move || {
            let mut guard = state.lock().map_err(|e| {
                SourceError::Failed(SourceKind::Disk, format!("lock poisoned: {e}"))
            })?;
            let mut volumes: Vec<VolumeInfo> = guard
                .refresh()
                .into_iter()
                .map(|d| VolumeInfo {
                    mount: d.mount_point().to_string_lossy().into_owned(),
                    name: d.name().to_string_lossy().into_owned(),
                    filesystem: d.file_system().to_string_lossy().into_owned(),
                })
                .collect();
            volumes.sort_by_key(|v| guard.order.position(&v.mount));
            Ok(volumes)
        })
        .await
    }
}

impl SourceAdapter for DiskAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Disk
    }

    fn sample<'a>(
        &'a self,
        config: &'a Configuration,
    ) -> BoxFuture<'a, Result<Reading, SourceError>> {
        Box::pin(async move { self.read(config).await.map(Reading::Disks) })
    }
}
