//! Key-name lookup.
//!
//! Step definitions and hotkey strings both name keys as plain text
//! (`"Return"`, `"f5"`, `"a"`). This module resolves those names to the
//! platform-independent [`KeyCode`] that event posters translate into
//! native virtual keys. Lookup is case-insensitive and ignores surrounding
//! whitespace.

pub use global_hotkey::hotkey::{Code as KeyCode, Modifiers};

/// Resolve a key name to its key code, or `None` if the name is unknown.
pub fn lookup_key(name: &str) -> Option<KeyCode> {
    let name = name.trim().to_lowercase();

    let code = match name.as_str() {
        // Letters
        "a" => KeyCode::KeyA,
        "b" => KeyCode::KeyB,
        "c" => KeyCode::KeyC,
        "d" => KeyCode::KeyD,
        "e" => KeyCode::KeyE,
        "f" => KeyCode::KeyF,
        "g" => KeyCode::KeyG,
        "h" => KeyCode::KeyH,
        "i" => KeyCode::KeyI,
        "j" => KeyCode::KeyJ,
        "k" => KeyCode::KeyK,
        "l" => KeyCode::KeyL,
        "m" => KeyCode::KeyM,
        "n" => KeyCode::KeyN,
        "o" => KeyCode::KeyO,
        "p" => KeyCode::KeyP,
        "q" => KeyCode::KeyQ,
        "r" => KeyCode::KeyR,
        "s" => KeyCode::KeyS,
        "t" => KeyCode::KeyT,
        "u" => KeyCode::KeyU,
        "v" => KeyCode::KeyV,
        "w" => KeyCode::KeyW,
        "x" => KeyCode::KeyX,
        "y" => KeyCode::KeyY,
        "z" => KeyCode::KeyZ,

        // Numbers
        "0" => KeyCode::Digit0,
        "1" => KeyCode::Digit1,
        "2" => KeyCode::Digit2,
        "3" => KeyCode::Digit3,
        "4" => KeyCode::Digit4,
        "5" => KeyCode::Digit5,
        "6" => KeyCode::Digit6,
        "7" => KeyCode::Digit7,
        "8" => KeyCode::Digit8,
        "9" => KeyCode::Digit9,

        // Function keys
        "f1" => KeyCode::F1,
        "f2" => KeyCode::F2,
        "f3" => KeyCode::F3,
        "f4" => KeyCode::F4,
        "f5" => KeyCode::F5,
        "f6" => KeyCode::F6,
        "f7" => KeyCode::F7,
        "f8" => KeyCode::F8,
        "f9" => KeyCode::F9,
        "f10" => KeyCode::F10,
        "f11" => KeyCode::F11,
        "f12" => KeyCode::F12,

        // Special keys
        "space" => KeyCode::Space,
        "enter" | "return" => KeyCode::Enter,
        "tab" => KeyCode::Tab,
        "escape" | "esc" => KeyCode::Escape,
        "backspace" => KeyCode::Backspace,
        "delete" | "forwarddelete" => KeyCode::Delete,
        "insert" => KeyCode::Insert,
        "home" => KeyCode::Home,
        "end" => KeyCode::End,
        "pageup" => KeyCode::PageUp,
        "pagedown" => KeyCode::PageDown,

        // Arrow keys
        "up" | "arrowup" => KeyCode::ArrowUp,
        "down" | "arrowdown" => KeyCode::ArrowDown,
        "left" | "arrowleft" => KeyCode::ArrowLeft,
        "right" | "arrowright" => KeyCode::ArrowRight,

        // Punctuation
        "-" | "minus" => KeyCode::Minus,
        "=" | "equal" => KeyCode::Equal,
        "," | "comma" => KeyCode::Comma,
        "." | "period" => KeyCode::Period,
        "/" | "slash" => KeyCode::Slash,
        ";" | "semicolon" => KeyCode::Semicolon,
        "'" | "quote" => KeyCode::Quote,
        "[" | "leftbracket" => KeyCode::BracketLeft,
        "]" | "rightbracket" => KeyCode::BracketRight,
        "\\" | "backslash" => KeyCode::Backslash,
        "`" | "grave" => KeyCode::Backquote,

        _ => return None,
    };

    Some(code)
}

/// Build a modifier set from the four independent step flags.
pub fn modifiers_from_flags(command: bool, shift: bool, option: bool, control: bool) -> Modifiers {
    let mut modifiers = Modifiers::empty();
    if command {
        modifiers |= Modifiers::SUPER;
    }
    if shift {
        modifiers |= Modifiers::SHIFT;
    }
    if option {
        modifiers |= Modifiers::ALT;
    }
    if control {
        modifiers |= Modifiers::CONTROL;
    }
    modifiers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(lookup_key("Return"), Some(KeyCode::Enter));
        assert_eq!(lookup_key("ENTER"), Some(KeyCode::Enter));
        assert_eq!(lookup_key(" a "), Some(KeyCode::KeyA));
        assert_eq!(lookup_key("F12"), Some(KeyCode::F12));
        assert_eq!(lookup_key("["), Some(KeyCode::BracketLeft));
    }

    #[test]
    fn test_lookup_unknown() {
        assert_eq!(lookup_key(""), None);
        assert_eq!(lookup_key("Retrun"), None);
        assert_eq!(lookup_key("ctrl"), None);
    }

    #[test]
    fn test_modifier_flags() {
        let m = modifiers_from_flags(true, false, true, false);
        assert!(m.contains(Modifiers::SUPER));
        assert!(m.contains(Modifiers::ALT));
        assert!(!m.contains(Modifiers::SHIFT));
        assert!(modifiers_from_flags(false, false, false, false).is_empty());
    }
}
