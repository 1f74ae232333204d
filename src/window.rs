//! Window descriptors and the raw snapshot records they are built from.

use serde::{Deserialize, Serialize};

/// One on-screen window as reported by the OS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowRecord {
    pub window_id: u64,
    pub owner_name: String,
    pub window_name: String,
    pub pid: u32,
    /// Stacking layer; 0 is a normal application window.
    pub layer: i32,
    pub on_screen: bool,
}

impl WindowRecord {
    /// Normal application windows not owned by this process.
    pub fn is_normal(&self) -> bool {
        self.layer == 0 && self.pid != std::process::id()
    }
}

/// One row of the OS process table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub pid: u32,
    pub ppid: u32,
}

/// A candidate target window with its computed process hierarchy.
///
/// Descriptors are produced fresh by every resolver scan and never
/// mutated afterwards. Two descriptors are equal iff their `window_id`
/// matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowDescriptor {
    pub window_id: u64,
    pub owner_name: String,
    pub window_name: String,
    pub pid: u32,
    /// OS parent process id, independent of window ownership.
    pub parent_pid: u32,
    /// True if the OS parent also owns a window.
    pub is_child_process: bool,
    /// Pid of the windowed parent, 0 when `is_child_process` is false.
    pub parent_windowed_pid: u32,
    /// OS children of this process that own a window.
    pub child_process_count: usize,
    /// On-screen windows owned by this same pid.
    pub sub_window_count: usize,
    pub is_on_screen: bool,
}

impl WindowDescriptor {
    /// Descriptor for a process whose windows cannot be enumerated.
    ///
    /// `window_id` is 0, which never appears in a window snapshot, so
    /// liveness checks fall straight through to the process check.
    pub fn for_process(pid: u32, parent_pid: u32, owner_name: impl Into<String>) -> Self {
        Self {
            window_id: 0,
            owner_name: owner_name.into(),
            window_name: String::new(),
            pid,
            parent_pid,
            is_child_process: false,
            parent_windowed_pid: 0,
            child_process_count: 0,
            sub_window_count: 1,
            is_on_screen: false,
        }
    }

    pub fn display_name(&self) -> String {
        if self.window_name.is_empty() {
            format!("{} (pid {})", self.owner_name, self.pid)
        } else {
            format!("{} - {} (pid {})", self.owner_name, self.window_name, self.pid)
        }
    }
}

impl PartialEq for WindowDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.window_id == other.window_id
    }
}

impl Eq for WindowDescriptor {}

impl std::hash::Hash for WindowDescriptor {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.window_id.hash(state);
    }
}
