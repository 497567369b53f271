//! D3D11 overlay rendering (Windows only)
//!
//! [`pump`] owns the per-frame sequencing inside the hooked `Present`;
//! [`surface`] tracks the device objects tied to the game's swap chain;
//! [`backend`] turns imgui draw data into D3D11 draw calls; [`wndproc`]
//! splices the game window's message procedure for menu input.

#[cfg(windows)]
pub mod backend;
#[cfg(windows)]
pub mod pump;
#[cfg(windows)]
pub mod surface;
#[cfg(windows)]
pub mod wndproc;

#[cfg(windows)]
pub use pump::{install_pump, FramePump};

/// Whether the `ResizeBuffers` detour should rebuild the backbuffer view:
/// only when the overlay already holds one and the original call succeeded.
pub fn rebuild_after_resize(initialized: bool, resize_ok: bool) -> bool {
    initialized && resize_ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_before_init_skips_rebuild() {
        assert!(!rebuild_after_resize(false, true));
        assert!(!rebuild_after_resize(false, false));
    }

    #[test]
    fn test_failed_resize_skips_rebuild() {
        assert!(!rebuild_after_resize(true, false));
        assert!(rebuild_after_resize(true, true));
    }
}
