//! OS-backed window and process snapshots.
//!
//! The process table comes from `sysinfo` on every platform. Windows are
//! enumerated through Win32 on Windows; elsewhere window listing reports
//! [`PksError::UnsupportedPlatform`](crate::PksError::UnsupportedPlatform) and callers fall back to process-only
//! targets.

use std::sync::{Mutex, MutexGuard, PoisonError};

use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::debug;

use crate::error::Result;
use crate::hierarchy::WindowSource;
use crate::window::{ProcessEntry, WindowDescriptor, WindowRecord};

/// Snapshot provider backed by the running system.
pub struct SystemWindowSource {
    system: Mutex<System>,
}

impl Default for SystemWindowSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemWindowSource {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn system(&self) -> MutexGuard<'_, System> {
        self.system.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// First process whose name contains `process_name`, case-insensitively,
    /// as a process-only descriptor.
    pub fn find_process(&self, process_name: &str) -> Option<WindowDescriptor> {
        let mut system = self.system();
        system.refresh_processes(ProcessesToUpdate::All, true);

        let process_name_lower = process_name.to_lowercase();
        let own_pid = std::process::id();

        system
            .processes()
            .iter()
            .filter(|(pid, _)| pid.as_u32() != own_pid)
            .find(|(_, process)| {
                process
                    .name()
                    .to_string_lossy()
                    .to_lowercase()
                    .contains(&process_name_lower)
            })
            .map(|(pid, process)| {
                WindowDescriptor::for_process(
                    pid.as_u32(),
                    process.parent().map_or(0, Pid::as_u32),
                    process.name().to_string_lossy(),
                )
            })
    }

    fn process_name(system: &System, pid: u32) -> String {
        system
            .process(Pid::from_u32(pid))
            .map(|p| p.name().to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl WindowSource for SystemWindowSource {
    fn list_windows(&self) -> Result<Vec<WindowRecord>> {
        let raw = platform::enumerate_windows()?;

        // Owner names only; the full table scan belongs to `list_processes`.
        let owners = owner_pids(&raw);
        let mut system = self.system();
        system.refresh_processes(ProcessesToUpdate::Some(&owners), true);

        Ok(raw
            .into_iter()
            .map(|w| WindowRecord {
                window_id: w.window_id,
                owner_name: Self::process_name(&system, w.pid),
                window_name: w.title,
                pid: w.pid,
                layer: 0,
                on_screen: w.visible,
            })
            .collect())
    }

    fn list_processes(&self) -> Result<Vec<ProcessEntry>> {
        let mut system = self.system();
        system.refresh_processes(ProcessesToUpdate::All, true);

        Ok(system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessEntry {
                pid: pid.as_u32(),
                ppid: process.parent().map_or(0, Pid::as_u32),
            })
            .collect())
    }

    fn is_window_present(&self, window_id: u64) -> bool {
        match platform::enumerate_windows() {
            Ok(windows) => windows.iter().any(|w| w.window_id == window_id),
            Err(e) => {
                debug!("window enumeration failed: {}", e);
                false
            }
        }
    }

    fn is_process_alive(&self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        let mut system = self.system();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let alive = system.process(pid).is_some();
        debug!("process {} alive: {}", pid, alive);
        alive
    }
}

#[cfg_attr(not(windows), allow(dead_code))]
struct RawWindow {
    window_id: u64,
    pid: u32,
    title: String,
    visible: bool,
}

fn owner_pids(windows: &[RawWindow]) -> Vec<Pid> {
    let mut pids: Vec<u32> = windows.iter().map(|w| w.pid).collect();
    pids.sort_unstable();
    pids.dedup();
    pids.into_iter().map(Pid::from_u32).collect()
}

#[cfg(windows)]
mod platform {
    use super::RawWindow;
    use crate::error::Result;
    use winapi::shared::minwindef::{BOOL, DWORD, LPARAM, TRUE};
    use winapi::shared::windef::HWND;
    use winapi::um::winuser::{
        EnumWindows, GetWindow, GetWindowTextLengthW, GetWindowTextW, GetWindowThreadProcessId,
        IsWindowVisible, GW_OWNER,
    };

    unsafe extern "system" fn collect(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let windows = &mut *(lparam as *mut Vec<RawWindow>);

        // Owned popups and tool windows are not application windows.
        if IsWindowVisible(hwnd) == 0 || !GetWindow(hwnd, GW_OWNER).is_null() {
            return TRUE;
        }

        let mut pid: DWORD = 0;
        GetWindowThreadProcessId(hwnd, &mut pid);

        let len = GetWindowTextLengthW(hwnd);
        let title = if len > 0 {
            let mut buffer = vec![0u16; len as usize + 1];
            let copied = GetWindowTextW(hwnd, buffer.as_mut_ptr(), buffer.len() as i32);
            String::from_utf16_lossy(&buffer[..copied.max(0) as usize])
        } else {
            String::new()
        };

        windows.push(RawWindow {
            window_id: hwnd as usize as u64,
            pid,
            title,
            visible: true,
        });
        TRUE
    }

    pub(super) fn enumerate_windows() -> Result<Vec<RawWindow>> {
        let mut windows: Vec<RawWindow> = Vec::new();
        let ok = unsafe { EnumWindows(Some(collect), &mut windows as *mut Vec<RawWindow> as LPARAM) };
        if ok == 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(windows)
    }

    /// Handle of the first visible top-level window owned by `pid`.
    pub(crate) fn main_window_of(pid: u32) -> Option<HWND> {
        enumerate_windows()
            .ok()?
            .into_iter()
            .find(|w| w.pid == pid)
            .map(|w| w.window_id as usize as HWND)
    }
}

#[cfg(not(windows))]
mod platform {
    use super::RawWindow;
    use crate::error::{PksError, Result};

    pub(super) fn enumerate_windows() -> Result<Vec<RawWindow>> {
        Err(PksError::unsupported_platform(
            "window enumeration is only available on Windows",
        ))
    }
}

#[cfg(windows)]
pub(crate) use platform::main_window_of;
