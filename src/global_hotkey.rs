//! Global pause/resume hotkey.
//!
//! The manager registers one system-wide hotkey and forwards each press to
//! an async channel. The `pks` binary maps presses onto
//! [`Scheduler::pause`](crate::Scheduler::pause) /
//! [`Scheduler::resume`](crate::Scheduler::resume).

use global_hotkey::hotkey::{HotKey, Modifiers};
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{PksError, Result};
use crate::keymap::lookup_key;

pub struct HotkeyManager {
    manager: GlobalHotKeyManager,
    hotkey: Option<HotKey>,
}

impl HotkeyManager {
    pub fn new() -> Result<Self> {
        let manager = GlobalHotKeyManager::new()
            .map_err(|e| PksError::hotkey(format!("failed to create GlobalHotKeyManager: {e}")))?;

        Ok(Self {
            manager,
            hotkey: None,
        })
    }

    pub fn register_toggle_hotkey(&mut self, hotkey_str: &str) -> Result<()> {
        let hotkey = parse_hotkey(hotkey_str)?;

        self.manager
            .register(hotkey)
            .map_err(|e| PksError::hotkey(format!("failed to register '{hotkey_str}': {e}")))?;

        info!("global pause hotkey '{}' registered", hotkey_str);
        self.hotkey = Some(hotkey);
        Ok(())
    }

    /// Forward presses of the registered hotkey to the returned receiver.
    ///
    /// The manager must stay alive for the hotkey to remain registered.
    pub fn listen(&self) -> Result<mpsc::UnboundedReceiver<()>> {
        let hotkey_id = self
            .hotkey
            .as_ref()
            .map(HotKey::id)
            .ok_or_else(|| PksError::hotkey("no hotkey registered"))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let events = GlobalHotKeyEvent::receiver().clone();

        std::thread::Builder::new()
            .name("pks-hotkey".to_string())
            .spawn(move || {
                while let Ok(event) = events.recv() {
                    if event.id != hotkey_id || event.state != HotKeyState::Pressed {
                        continue;
                    }
                    if tx.send(()).is_err() {
                        debug!("hotkey receiver dropped, listener exiting");
                        break;
                    }
                }
            })?;

        Ok(rx)
    }
}

/// Parse `"ctrl+alt+r"` style strings: any modifiers plus exactly one key.
pub fn parse_hotkey(hotkey_str: &str) -> Result<HotKey> {
    let binding = hotkey_str.to_lowercase();
    let parts: Vec<&str> = binding
        .split('+')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();

    if parts.is_empty() {
        return Err(PksError::hotkey("empty hotkey string"));
    }

    let mut modifiers = Modifiers::empty();
    let mut key_code = None;

    for part in &parts {
        match *part {
            "ctrl" | "control" => modifiers |= Modifiers::CONTROL,
            "alt" | "option" | "opt" => modifiers |= Modifiers::ALT,
            "shift" => modifiers |= Modifiers::SHIFT,
            "meta" | "cmd" | "command" | "super" => modifiers |= Modifiers::SUPER,
            key => {
                if key_code.is_some() {
                    return Err(PksError::hotkey(format!(
                        "multiple keys specified in hotkey: {hotkey_str}"
                    )));
                }
                key_code = Some(lookup_key(key).ok_or_else(|| PksError::unknown_key(key))?);
            }
        }
    }

    let code = key_code
        .ok_or_else(|| PksError::hotkey(format!("no key specified in hotkey: {hotkey_str}")))?;

    Ok(HotKey::new(Some(modifiers), code))
}
