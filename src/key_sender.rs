//! OS-backed event poster.
//!
//! On Windows keys and text are posted as window messages to the target
//! process's main window, so the target does not need focus. Other
//! platforms report every post as [`PksError::UnsupportedPlatform`], which
//! the scheduler surfaces as a per-tick poster failure.

use async_trait::async_trait;
use tracing::debug;

use crate::error::{PksError, Result};
use crate::keymap::{lookup_key, KeyCode, Modifiers};
use crate::poster::EventPoster;

/// Posts synthetic keyboard input to a process.
#[derive(Debug, Clone, Default)]
pub struct KeySender {
    _private: (),
}

impl KeySender {
    pub fn new() -> Result<Self> {
        Ok(Self { _private: () })
    }

    /// Resolve a key name the same way step dispatch does.
    pub fn validate_key(&self, key: &str) -> Result<KeyCode> {
        lookup_key(key).ok_or_else(|| PksError::unknown_key(key))
    }
}

#[async_trait]
impl EventPoster for KeySender {
    async fn post_key(&self, pid: u32, key: KeyCode, modifiers: Modifiers) -> Result<bool> {
        debug!("posting {:?} ({:?}) to pid {}", key, modifiers, pid);
        platform::post_key(pid, key, modifiers)
    }

    async fn post_text(&self, pid: u32, text: &str, append_enter: bool) -> Result<bool> {
        debug!("posting {} chars to pid {}", text.chars().count(), pid);
        platform::post_text(pid, text, None, append_enter.then_some(KeyCode::Enter))
    }

    async fn post_combo(
        &self,
        pid: u32,
        text: &str,
        prefix: Option<KeyCode>,
        suffix: Option<KeyCode>,
    ) -> Result<bool> {
        debug!("posting combo {:?} / {:?} to pid {}", prefix, suffix, pid);
        platform::post_text(pid, text, prefix, suffix)
    }
}

#[cfg(windows)]
mod platform {
    use super::{KeyCode, Modifiers};
    use crate::error::{PksError, Result};
    use crate::system::main_window_of;
    use winapi::shared::minwindef::{LPARAM, UINT, WPARAM};
    use winapi::shared::windef::HWND;
    use winapi::um::winuser::{
        PostMessageW, VK_BACK, VK_CONTROL, VK_DELETE, VK_DOWN, VK_END, VK_ESCAPE, VK_F1,
        VK_HOME, VK_INSERT, VK_LEFT, VK_LWIN, VK_MENU, VK_NEXT, VK_OEM_1, VK_OEM_2, VK_OEM_3,
        VK_OEM_4, VK_OEM_5, VK_OEM_6, VK_OEM_7, VK_OEM_COMMA, VK_OEM_MINUS, VK_OEM_PERIOD,
        VK_OEM_PLUS, VK_PRIOR, VK_RETURN, VK_RIGHT, VK_SHIFT, VK_SPACE, VK_TAB, VK_UP,
        WM_CHAR, WM_KEYDOWN, WM_KEYUP,
    };

    const KEY_DOWN_LPARAM: LPARAM = 0x0000_0001;
    const KEY_UP_LPARAM: LPARAM = 0xC000_0001u32 as LPARAM;

    fn virtual_key(code: KeyCode) -> Option<i32> {
        let letter = |c: u8| Some(c as i32);
        match code {
            KeyCode::KeyA => letter(b'A'),
            KeyCode::KeyB => letter(b'B'),
            KeyCode::KeyC => letter(b'C'),
            KeyCode::KeyD => letter(b'D'),
            KeyCode::KeyE => letter(b'E'),
            KeyCode::KeyF => letter(b'F'),
            KeyCode::KeyG => letter(b'G'),
            KeyCode::KeyH => letter(b'H'),
            KeyCode::KeyI => letter(b'I'),
            KeyCode::KeyJ => letter(b'J'),
            KeyCode::KeyK => letter(b'K'),
            KeyCode::KeyL => letter(b'L'),
            KeyCode::KeyM => letter(b'M'),
            KeyCode::KeyN => letter(b'N'),
            KeyCode::KeyO => letter(b'O'),
            KeyCode::KeyP => letter(b'P'),
            KeyCode::KeyQ => letter(b'Q'),
            KeyCode::KeyR => letter(b'R'),
            KeyCode::KeyS => letter(b'S'),
            KeyCode::KeyT => letter(b'T'),
            KeyCode::KeyU => letter(b'U'),
            KeyCode::KeyV => letter(b'V'),
            KeyCode::KeyW => letter(b'W'),
            KeyCode::KeyX => letter(b'X'),
            KeyCode::KeyY => letter(b'Y'),
            KeyCode::KeyZ => letter(b'Z'),
            KeyCode::Digit0 => letter(b'0'),
            KeyCode::Digit1 => letter(b'1'),
            KeyCode::Digit2 => letter(b'2'),
            KeyCode::Digit3 => letter(b'3'),
            KeyCode::Digit4 => letter(b'4'),
            KeyCode::Digit5 => letter(b'5'),
            KeyCode::Digit6 => letter(b'6'),
            KeyCode::Digit7 => letter(b'7'),
            KeyCode::Digit8 => letter(b'8'),
            KeyCode::Digit9 => letter(b'9'),
            KeyCode::F1 => Some(VK_F1),
            KeyCode::F2 => Some(VK_F1 + 1),
            KeyCode::F3 => Some(VK_F1 + 2),
            KeyCode::F4 => Some(VK_F1 + 3),
            KeyCode::F5 => Some(VK_F1 + 4),
            KeyCode::F6 => Some(VK_F1 + 5),
            KeyCode::F7 => Some(VK_F1 + 6),
            KeyCode::F8 => Some(VK_F1 + 7),
            KeyCode::F9 => Some(VK_F1 + 8),
            KeyCode::F10 => Some(VK_F1 + 9),
            KeyCode::F11 => Some(VK_F1 + 10),
            KeyCode::F12 => Some(VK_F1 + 11),
            KeyCode::Space => Some(VK_SPACE),
            KeyCode::Enter => Some(VK_RETURN),
            KeyCode::Tab => Some(VK_TAB),
            KeyCode::Escape => Some(VK_ESCAPE),
            KeyCode::Backspace => Some(VK_BACK),
            KeyCode::Delete => Some(VK_DELETE),
            KeyCode::Insert => Some(VK_INSERT),
            KeyCode::Home => Some(VK_HOME),
            KeyCode::End => Some(VK_END),
            KeyCode::PageUp => Some(VK_PRIOR),
            KeyCode::PageDown => Some(VK_NEXT),
            KeyCode::ArrowUp => Some(VK_UP),
            KeyCode::ArrowDown => Some(VK_DOWN),
            KeyCode::ArrowLeft => Some(VK_LEFT),
            KeyCode::ArrowRight => Some(VK_RIGHT),
            KeyCode::Minus => Some(VK_OEM_MINUS),
            KeyCode::Equal => Some(VK_OEM_PLUS),
            KeyCode::Comma => Some(VK_OEM_COMMA),
            KeyCode::Period => Some(VK_OEM_PERIOD),
            KeyCode::Slash => Some(VK_OEM_2),
            KeyCode::Semicolon => Some(VK_OEM_1),
            KeyCode::Quote => Some(VK_OEM_7),
            KeyCode::BracketLeft => Some(VK_OEM_4),
            KeyCode::BracketRight => Some(VK_OEM_6),
            KeyCode::Backslash => Some(VK_OEM_5),
            KeyCode::Backquote => Some(VK_OEM_3),
            _ => None,
        }
    }

    fn modifier_keys(modifiers: Modifiers) -> Vec<i32> {
        [
            (Modifiers::CONTROL, VK_CONTROL),
            (Modifiers::ALT, VK_MENU),
            (Modifiers::SHIFT, VK_SHIFT),
            (Modifiers::SUPER, VK_LWIN),
        ]
        .into_iter()
        .filter(|(flag, _)| modifiers.contains(*flag))
        .map(|(_, vk)| vk)
        .collect()
    }

    fn post(hwnd: HWND, message: UINT, wparam: WPARAM, lparam: LPARAM) -> bool {
        unsafe { PostMessageW(hwnd, message, wparam, lparam) != 0 }
    }

    fn tap(hwnd: HWND, vk: i32) -> bool {
        post(hwnd, WM_KEYDOWN, vk as WPARAM, KEY_DOWN_LPARAM)
            && post(hwnd, WM_KEYUP, vk as WPARAM, KEY_UP_LPARAM)
    }

    fn window_for(pid: u32) -> Result<HWND> {
        main_window_of(pid)
            .ok_or_else(|| PksError::window(format!("pid {pid} has no visible window")))
    }

    fn resolve(code: KeyCode) -> Result<i32> {
        virtual_key(code).ok_or_else(|| PksError::unknown_key(format!("{code:?}")))
    }

    pub(super) fn post_key(pid: u32, key: KeyCode, modifiers: Modifiers) -> Result<bool> {
        let hwnd = window_for(pid)?;
        let vk = resolve(key)?;
        let held = modifier_keys(modifiers);

        let mut ok = true;
        for &m in &held {
            ok &= post(hwnd, WM_KEYDOWN, m as WPARAM, KEY_DOWN_LPARAM);
        }
        ok &= tap(hwnd, vk);
        for &m in held.iter().rev() {
            ok &= post(hwnd, WM_KEYUP, m as WPARAM, KEY_UP_LPARAM);
        }
        Ok(ok)
    }

    pub(super) fn post_text(
        pid: u32,
        text: &str,
        prefix: Option<KeyCode>,
        suffix: Option<KeyCode>,
    ) -> Result<bool> {
        let hwnd = window_for(pid)?;

        let mut ok = true;
        if let Some(prefix) = prefix {
            ok &= tap(hwnd, resolve(prefix)?);
        }
        for unit in text.encode_utf16() {
            ok &= post(hwnd, WM_CHAR, unit as WPARAM, KEY_DOWN_LPARAM);
        }
        if let Some(suffix) = suffix {
            ok &= tap(hwnd, resolve(suffix)?);
        }
        Ok(ok)
    }
}

#[cfg(not(windows))]
mod platform {
    use super::{KeyCode, Modifiers};
    use crate::error::{PksError, Result};

    pub(super) fn post_key(_pid: u32, _key: KeyCode, _modifiers: Modifiers) -> Result<bool> {
        Err(PksError::unsupported_platform(
            "key posting is only available on Windows",
        ))
    }

    pub(super) fn post_text(
        _pid: u32,
        _text: &str,
        _prefix: Option<KeyCode>,
        _suffix: Option<KeyCode>,
    ) -> Result<bool> {
        Err(PksError::unsupported_platform(
            "text posting is only available on Windows",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        let sender = KeySender::new().unwrap();
        assert_eq!(sender.validate_key("Return").unwrap(), KeyCode::Enter);
        assert!(matches!(
            sender.validate_key("hyper"),
            Err(PksError::UnknownKey { .. })
        ));
    }

    #[tokio::test]
    #[cfg(not(windows))]
    async fn test_posting_is_unsupported_off_windows() {
        let sender = KeySender::new().unwrap();
        let result = sender
            .post_key(std::process::id(), KeyCode::Enter, Modifiers::empty())
            .await;
        assert!(matches!(result, Err(PksError::UnsupportedPlatform(_))));
    }
}
