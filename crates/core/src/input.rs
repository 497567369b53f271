//! Keyboard sampling, edge detection and bind capture
//!
//! All key state comes in through [`KeySource`], so the dispatch and capture
//! logic is testable with a fake keyboard. The real source on Windows is
//! `GetAsyncKeyState`, polled once per frame on the render thread.

/// Virtual-key codes the overlay refers to by name.
pub mod vk {
    pub const LBUTTON: u32 = 0x01;
    pub const RBUTTON: u32 = 0x02;
    pub const ESCAPE: u32 = 0x1B;
    pub const SPACE: u32 = 0x20;
    pub const DELETE: u32 = 0x2E;
    pub const KEY_A: u32 = 0x41;
    pub const KEY_D: u32 = 0x44;
    pub const KEY_S: u32 = 0x53;
    pub const KEY_W: u32 = 0x57;
    pub const F1: u32 = 0x70;
    pub const F7: u32 = 0x76;
    pub const LSHIFT: u32 = 0xA0;
    pub const LCONTROL: u32 = 0xA2;
}

/// Source of instantaneous key state.
pub trait KeySource {
    fn is_down(&self, vk: u32) -> bool;
}

/// `GetAsyncKeyState`-backed key source.
pub struct AsyncKeys;

#[cfg(windows)]
impl KeySource for AsyncKeys {
    fn is_down(&self, vk: u32) -> bool {
        use windows::Win32::UI::Input::KeyboardAndMouse::GetAsyncKeyState;
        (unsafe { GetAsyncKeyState(vk as i32) } as u16 & 0x8000) != 0
    }
}

#[cfg(not(windows))]
impl KeySource for AsyncKeys {
    fn is_down(&self, _vk: u32) -> bool {
        false
    }
}

/// Per-key previous-state table for edge-triggered actions.
///
/// A held key fires exactly once; it must be released and pressed again to
/// fire a second time.
pub struct EdgeTracker {
    prev: [bool; 256],
}

impl Default for EdgeTracker {
    fn default() -> Self {
        EdgeTracker { prev: [false; 256] }
    }
}

impl EdgeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True on the frame a key transitions from up to down.
    pub fn pressed(&mut self, keys: &dyn KeySource, vk: u32) -> bool {
        let idx = (vk as usize) & 0xFF;
        let down = keys.is_down(vk);
        let fired = down && !self.prev[idx];
        self.prev[idx] = down;
        fired
    }
}

/// Outcome of one bind-capture poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// Still waiting for a key.
    Pending,
    /// User pressed Escape; keep the previous bind.
    Cancelled,
    /// User pressed Delete; remove the bind.
    Cleared,
    /// A key was chosen.
    Bound(u32),
}

/// Keys that never terminate a capture: mouse buttons would swallow the
/// click that armed the capture, and bare modifiers are reserved for
/// movement combos.
fn is_reserved(vk: u32) -> bool {
    matches!(vk, 0x01..=0x06 | 0x10..=0x12 | 0xA0..=0xA5)
}

/// Scan the keyboard for a bind choice.
///
/// Escape cancels, Delete clears, anything else non-reserved binds. Call
/// once per frame while a capture is armed.
pub fn poll_capture(keys: &dyn KeySource) -> Capture {
    if keys.is_down(vk::ESCAPE) {
        return Capture::Cancelled;
    }
    if keys.is_down(vk::DELETE) {
        return Capture::Cleared;
    }
    for vk in 0x07..=0xFE {
        if is_reserved(vk) {
            continue;
        }
        if keys.is_down(vk) {
            return Capture::Bound(vk);
        }
    }
    Capture::Pending
}

/// Human-readable name for a virtual-key code, for menu display.
pub fn key_name(vk: u32) -> String {
    match vk {
        0 => "None".into(),
        0x08 => "Backspace".into(),
        0x09 => "Tab".into(),
        0x0D => "Enter".into(),
        0x14 => "Caps".into(),
        0x1B => "Esc".into(),
        0x20 => "Space".into(),
        0x21 => "PgUp".into(),
        0x22 => "PgDn".into(),
        0x23 => "End".into(),
        0x24 => "Home".into(),
        0x25 => "Left".into(),
        0x26 => "Up".into(),
        0x27 => "Right".into(),
        0x28 => "Down".into(),
        0x2D => "Insert".into(),
        0x2E => "Delete".into(),
        0x30..=0x39 | 0x41..=0x5A => char::from_u32(vk).map_or_else(|| format!("0x{vk:02X}"), String::from),
        0x60..=0x69 => format!("Num{}", vk - 0x60),
        0x70..=0x87 => format!("F{}", vk - 0x6F),
        _ => format!("0x{vk:02X}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct FakeKeys(HashSet<u32>);

    impl FakeKeys {
        fn none() -> Self {
            FakeKeys(HashSet::new())
        }
        fn holding(vks: &[u32]) -> Self {
            FakeKeys(vks.iter().copied().collect())
        }
    }

    impl KeySource for FakeKeys {
        fn is_down(&self, vk: u32) -> bool {
            self.0.contains(&vk)
        }
    }

    #[test]
    fn test_edge_fires_once_per_press() {
        let mut edges = EdgeTracker::new();
        let down = FakeKeys::holding(&[vk::DELETE]);
        let up = FakeKeys::none();

        assert!(edges.pressed(&down, vk::DELETE));
        assert!(!edges.pressed(&down, vk::DELETE));
        assert!(!edges.pressed(&down, vk::DELETE));
        assert!(!edges.pressed(&up, vk::DELETE));
        assert!(edges.pressed(&down, vk::DELETE));
    }

    #[test]
    fn test_edge_tracks_keys_independently() {
        let mut edges = EdgeTracker::new();
        let both = FakeKeys::holding(&[vk::F1, vk::F7]);
        assert!(edges.pressed(&both, vk::F1));
        assert!(edges.pressed(&both, vk::F7));
        assert!(!edges.pressed(&both, vk::F1));
    }

    #[test]
    fn test_capture_escape_cancels() {
        assert_eq!(poll_capture(&FakeKeys::holding(&[vk::ESCAPE])), Capture::Cancelled);
    }

    #[test]
    fn test_capture_delete_clears() {
        assert_eq!(poll_capture(&FakeKeys::holding(&[vk::DELETE])), Capture::Cleared);
    }

    #[test]
    fn test_capture_binds_plain_key() {
        assert_eq!(
            poll_capture(&FakeKeys::holding(&[vk::KEY_W])),
            Capture::Bound(vk::KEY_W)
        );
    }

    #[test]
    fn test_capture_skips_mouse_and_modifiers() {
        assert_eq!(
            poll_capture(&FakeKeys::holding(&[vk::LBUTTON, vk::LSHIFT])),
            Capture::Pending
        );
        assert_eq!(poll_capture(&FakeKeys::none()), Capture::Pending);
    }

    #[test]
    fn test_key_names() {
        assert_eq!(key_name(0), "None");
        assert_eq!(key_name(vk::KEY_W), "W");
        assert_eq!(key_name(0x70), "F1");
        assert_eq!(key_name(0x62), "Num2");
        assert_eq!(key_name(0xE9), "0xE9");
    }
}
