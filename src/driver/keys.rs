//! Keyboard input model
//!
//! Translates characters and named keys into the payload sequences the
//! Input domain expects. ASCII characters carry real key codes so a
//! keyDown/keyUp pair looks like physical typing; characters without a
//! US-layout key fall back to a single char event that inserts text
//! directly.

use crate::cdp::types::DispatchKeyEventParams;

/// Modifier bitmask values for key and mouse events
pub mod modifiers {
    pub const NONE: i64 = 0;
    pub const ALT: i64 = 1;
    pub const CTRL: i64 = 2;
    pub const META: i64 = 4;
    pub const SHIFT: i64 = 8;
}

/// Named non-printing keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialKey {
    Enter,
    Tab,
    Space,
    Backspace,
    Escape,
    Delete,
    ArrowLeft,
    ArrowUp,
    ArrowRight,
    ArrowDown,
    Home,
    End,
    PageUp,
    PageDown,
}

impl SpecialKey {
    /// DOM `key` value and Windows virtual key code
    fn definition(self) -> (&'static str, i64) {
        match self {
            SpecialKey::Backspace => ("Backspace", 8),
            SpecialKey::Tab => ("Tab", 9),
            SpecialKey::Enter => ("Enter", 13),
            SpecialKey::Escape => ("Escape", 27),
            SpecialKey::Space => (" ", 32),
            SpecialKey::PageUp => ("PageUp", 33),
            SpecialKey::PageDown => ("PageDown", 34),
            SpecialKey::End => ("End", 35),
            SpecialKey::Home => ("Home", 36),
            SpecialKey::ArrowLeft => ("ArrowLeft", 37),
            SpecialKey::ArrowUp => ("ArrowUp", 38),
            SpecialKey::ArrowRight => ("ArrowRight", 39),
            SpecialKey::ArrowDown => ("ArrowDown", 40),
            SpecialKey::Delete => ("Delete", 46),
        }
    }

    /// Text the key inserts, when it inserts any
    fn text(self) -> Option<&'static str> {
        match self {
            SpecialKey::Enter => Some("\r"),
            SpecialKey::Tab => Some("\t"),
            SpecialKey::Space => Some(" "),
            _ => None,
        }
    }

    /// keyDown + keyUp payloads for this key
    pub fn to_events(self, modifiers: i64) -> Vec<DispatchKeyEventParams> {
        let (key, key_code) = self.definition();
        let text = self.text();
        vec![
            key_event("keyDown", key, key, key_code, text, modifiers),
            key_event("keyUp", key, key, key_code, text, modifiers),
        ]
    }
}

/// Modifier keys in press order, as (flag, key, code, key code)
fn modifier_definitions(modifiers: i64) -> Vec<(i64, &'static str, &'static str, i64)> {
    let mut keys = Vec::new();
    if modifiers & modifiers::ALT != 0 {
        keys.push((modifiers::ALT, "Alt", "AltLeft", 18));
    }
    if modifiers & modifiers::CTRL != 0 {
        keys.push((modifiers::CTRL, "Control", "ControlLeft", 17));
    }
    if modifiers & modifiers::META != 0 {
        keys.push((modifiers::META, "Meta", "MetaLeft", 91));
    }
    if modifiers & modifiers::SHIFT != 0 {
        keys.push((modifiers::SHIFT, "Shift", "ShiftLeft", 16));
    }
    keys
}

/// Physical key behind a printable ASCII character
///
/// Returns (code, key code, needs shift), or None when the character
/// has no key on a US layout.
fn char_definition(ch: char) -> Option<(String, i64, bool)> {
    const NUM_SHIFT: &[char] = &[')', '!', '@', '#', '$', '%', '^', '&', '*', '('];

    if ch.is_ascii_alphabetic() {
        let upper = ch.to_ascii_uppercase();
        return Some((
            format!("Key{}", upper),
            upper as i64,
            ch.is_ascii_uppercase(),
        ));
    }

    if ch.is_ascii_digit() {
        return Some((format!("Digit{}", ch), ch as i64, false));
    }

    if let Some(digit) = NUM_SHIFT.iter().position(|&c| c == ch) {
        return Some((format!("Digit{}", digit), '0' as i64 + digit as i64, true));
    }

    let (code, key_code, shifted) = match ch {
        ';' => ("Semicolon", 186, false),
        ':' => ("Semicolon", 186, true),
        '=' => ("Equal", 187, false),
        '+' => ("Equal", 187, true),
        ',' => ("Comma", 188, false),
        '<' => ("Comma", 188, true),
        '-' => ("Minus", 189, false),
        '_' => ("Minus", 189, true),
        '.' => ("Period", 190, false),
        '>' => ("Period", 190, true),
        '/' => ("Slash", 191, false),
        '?' => ("Slash", 191, true),
        '`' => ("Backquote", 192, false),
        '~' => ("Backquote", 192, true),
        '[' => ("BracketLeft", 219, false),
        '{' => ("BracketLeft", 219, true),
        '\\' => ("Backslash", 220, false),
        '|' => ("Backslash", 220, true),
        ']' => ("BracketRight", 221, false),
        '}' => ("BracketRight", 221, true),
        '\'' => ("Quote", 222, false),
        '"' => ("Quote", 222, true),
        _ => return None,
    };

    Some((code.to_string(), key_code, shifted))
}

/// Payload sequence for typing one character
///
/// Newline and tab turn into their named keys. Shifted characters are
/// wrapped in a Shift press. Unmapped characters become a char event.
pub fn char_events(ch: char) -> Vec<DispatchKeyEventParams> {
    match ch {
        '\n' | '\r' => return SpecialKey::Enter.to_events(modifiers::NONE),
        '\t' => return SpecialKey::Tab.to_events(modifiers::NONE),
        _ => {}
    }

    let (code, key_code, needs_shift) = match char_definition(ch) {
        Some(definition) => definition,
        None => return vec![char_event(ch)],
    };

    let mods = if needs_shift {
        modifiers::SHIFT
    } else {
        modifiers::NONE
    };
    let text = ch.to_string();

    let mut events = Vec::new();
    if needs_shift {
        events.push(key_event("keyDown", "Shift", "ShiftLeft", 16, None, mods));
    }
    events.push(key_event("keyDown", &text, &code, key_code, Some(&text), mods));
    events.push(key_event("keyUp", &text, &code, key_code, Some(&text), mods));
    if needs_shift {
        events.push(key_event(
            "keyUp",
            "Shift",
            "ShiftLeft",
            16,
            None,
            modifiers::NONE,
        ));
    }
    events
}

/// Payload sequence for typing a whole string
pub fn text_events(text: &str) -> Vec<DispatchKeyEventParams> {
    text.chars().flat_map(char_events).collect()
}

/// Payload sequence for a key chord such as Ctrl+A
///
/// Modifier downs come first, then the main key press, then modifier
/// ups in reverse order.
pub fn combo_events(ch: char, modifiers_mask: i64) -> Vec<DispatchKeyEventParams> {
    let definitions = modifier_definitions(modifiers_mask);
    let mut events = Vec::new();
    let mut held = 0;

    for (flag, key, code, key_code) in &definitions {
        held |= flag;
        events.push(key_event("keyDown", key, code, *key_code, None, held));
    }

    let (code, key_code) = match char_definition(ch) {
        Some((code, key_code, _)) => (code, key_code),
        None => (String::new(), 0),
    };
    // Chords with Ctrl/Alt/Meta do not insert text.
    let inserts_text = modifiers_mask & (modifiers::CTRL | modifiers::ALT | modifiers::META) == 0;
    let text = ch.to_string();
    let key_text = if inserts_text { Some(text.as_str()) } else { None };

    events.push(key_event("keyDown", &text, &code, key_code, key_text, held));
    events.push(key_event("keyUp", &text, &code, key_code, key_text, held));

    for (flag, key, code, key_code) in definitions.iter().rev() {
        held &= !flag;
        events.push(key_event("keyUp", key, code, *key_code, None, held));
    }

    events
}

fn key_event(
    event_type: &str,
    key: &str,
    code: &str,
    key_code: i64,
    text: Option<&str>,
    modifiers: i64,
) -> DispatchKeyEventParams {
    DispatchKeyEventParams {
        event_type: event_type.to_string(),
        modifiers: Some(modifiers),
        text: text.map(String::from),
        key: Some(key.to_string()),
        code: Some(code.to_string()),
        windows_virtual_key_code: Some(key_code),
        native_virtual_key_code: Some(key_code),
    }
}

fn char_event(ch: char) -> DispatchKeyEventParams {
    DispatchKeyEventParams {
        event_type: "char".to_string(),
        text: Some(ch.to_string()),
        ..Default::default()
    }
}
