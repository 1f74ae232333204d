//! Process hierarchy resolution.
//!
//! Turns one window snapshot plus one process-table snapshot into
//! cross-referenced [`WindowDescriptor`]s. Asking the OS for each window's
//! parent would be quadratic in the window count, so the whole table is
//! indexed once and every relationship is answered from maps.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::window::{ProcessEntry, WindowDescriptor, WindowRecord};

/// Source of OS snapshots for the resolver.
///
/// Implementations query the OS synchronously; the scheduler calls them
/// from the blocking pool.
pub trait WindowSource: Send + Sync {
    /// Currently on-screen windows.
    fn list_windows(&self) -> Result<Vec<WindowRecord>>;

    /// Every running process with its parent.
    fn list_processes(&self) -> Result<Vec<ProcessEntry>>;

    fn is_process_alive(&self, pid: u32) -> bool;

    fn is_window_present(&self, window_id: u64) -> bool {
        match self.list_windows() {
            Ok(windows) => windows.iter().any(|w| w.window_id == window_id),
            Err(e) => {
                debug!("window snapshot failed, treating {} as gone: {}", window_id, e);
                false
            }
        }
    }
}

/// Build descriptors for `windows` using a single pass over each input.
///
/// Output order matches input order. When a pid is a windowed child of
/// more than one windowed parent the smallest parent pid wins.
pub fn resolve_hierarchy(
    windows: &[WindowRecord],
    processes: &[ProcessEntry],
) -> Vec<WindowDescriptor> {
    let windowed: HashSet<u32> = windows.iter().map(|w| w.pid).collect();

    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    let mut parent_of: HashMap<u32, u32> = HashMap::with_capacity(processes.len());
    for process in processes {
        children.entry(process.ppid).or_default().push(process.pid);
        parent_of.insert(process.pid, process.ppid);
    }

    let mut windowed_children: HashMap<u32, Vec<u32>> = HashMap::with_capacity(windowed.len());
    for &pid in &windowed {
        let kids: Vec<u32> = children
            .get(&pid)
            .map(|kids| {
                kids.iter()
                    .copied()
                    .filter(|kid| *kid != pid && windowed.contains(kid))
                    .collect()
            })
            .unwrap_or_default();
        windowed_children.insert(pid, kids);
    }

    let mut windowed_parent: HashMap<u32, u32> = HashMap::new();
    for (&parent, kids) in &windowed_children {
        for &kid in kids {
            windowed_parent
                .entry(kid)
                .and_modify(|current| *current = (*current).min(parent))
                .or_insert(parent);
        }
    }

    let mut window_counts: HashMap<u32, usize> = HashMap::with_capacity(windowed.len());
    for window in windows {
        *window_counts.entry(window.pid).or_default() += 1;
    }

    windows
        .iter()
        .map(|w| {
            let parent_windowed_pid = windowed_parent.get(&w.pid).copied();
            WindowDescriptor {
                window_id: w.window_id,
                owner_name: w.owner_name.clone(),
                window_name: w.window_name.clone(),
                pid: w.pid,
                parent_pid: parent_of.get(&w.pid).copied().unwrap_or(0),
                is_child_process: parent_windowed_pid.is_some(),
                parent_windowed_pid: parent_windowed_pid.unwrap_or(0),
                child_process_count: windowed_children.get(&w.pid).map_or(0, Vec::len),
                sub_window_count: window_counts.get(&w.pid).copied().unwrap_or(1),
                is_on_screen: w.on_screen,
            }
        })
        .collect()
}

/// Resolver entry points backed by a [`WindowSource`].
#[derive(Clone)]
pub struct ProcessHierarchyResolver {
    source: Arc<dyn WindowSource>,
}

impl ProcessHierarchyResolver {
    pub fn new(source: Arc<dyn WindowSource>) -> Self {
        Self { source }
    }

    /// Snapshot the OS and resolve every normal window.
    ///
    /// Snapshot failures yield an empty list rather than an error.
    pub fn resolve_windows(&self) -> Vec<WindowDescriptor> {
        let windows = match self.source.list_windows() {
            Ok(windows) => windows,
            Err(e) => {
                warn!("failed to list windows: {}", e);
                return Vec::new();
            }
        };
        let windows: Vec<WindowRecord> = windows.into_iter().filter(WindowRecord::is_normal).collect();

        let processes = self.source.list_processes().unwrap_or_else(|e| {
            warn!("failed to list processes: {}", e);
            Vec::new()
        });

        let resolved = resolve_hierarchy(&windows, &processes);
        debug!(
            "resolved {} windows against {} processes",
            resolved.len(),
            processes.len()
        );
        resolved
    }

    /// True if the window is still listed, or failing that, if `pid` is
    /// still alive.
    ///
    /// Minimized windows and windows on other desktops drop out of
    /// on-screen snapshots while their process keeps accepting events.
    pub fn check_target_valid(&self, window_id: u64, pid: Option<u32>) -> bool {
        if self.source.is_window_present(window_id) {
            return true;
        }
        match pid {
            Some(pid) => self.source.is_process_alive(pid),
            None => false,
        }
    }
}
