//! Game window procedure splice
//!
//! While the menu is open the game must not see mouse or keyboard input,
//! otherwise every click fires the player's weapon. The splice swallows
//! input messages in that state and forwards everything else to the game's
//! original procedure. imgui reads input by polling, not from messages, so
//! nothing needs to be forwarded to it here.

use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};

use windows::Win32::Foundation::{HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::UI::WindowsAndMessaging::{
    CallWindowProcW, SetWindowLongPtrW, GWLP_WNDPROC, WM_KEYFIRST, WM_KEYLAST, WM_MOUSEFIRST,
    WM_MOUSELAST, WNDPROC,
};

static ORIGINAL: AtomicIsize = AtomicIsize::new(0);
static MENU_ACTIVE: AtomicBool = AtomicBool::new(false);

pub fn set_menu_active(active: bool) {
    MENU_ACTIVE.store(active, Ordering::Release);
}

fn is_input_message(msg: u32) -> bool {
    (WM_MOUSEFIRST..=WM_MOUSELAST).contains(&msg) || (WM_KEYFIRST..=WM_KEYLAST).contains(&msg)
}

unsafe extern "system" fn spliced_wndproc(
    window: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    let original = ORIGINAL.load(Ordering::Acquire);
    if MENU_ACTIVE.load(Ordering::Acquire) && is_input_message(msg) {
        return LRESULT(1);
    }
    if original == 0 {
        return LRESULT(0);
    }
    let original: WNDPROC = std::mem::transmute(original);
    CallWindowProcW(original, window, msg, wparam, lparam)
}

/// Replace the window's procedure with ours. Idempotent; keeps the first
/// original.
pub unsafe fn install(window: HWND) -> bool {
    if ORIGINAL.load(Ordering::Acquire) != 0 {
        return true;
    }
    let previous = SetWindowLongPtrW(window, GWLP_WNDPROC, spliced_wndproc as isize);
    if previous == 0 {
        tracing::error!("window procedure splice failed");
        return false;
    }
    ORIGINAL.store(previous, Ordering::Release);
    tracing::debug!(window = ?window, "window procedure spliced");
    true
}

/// Put the game's original procedure back.
pub unsafe fn uninstall(window: HWND) {
    let original = ORIGINAL.swap(0, Ordering::AcqRel);
    if original != 0 {
        SetWindowLongPtrW(window, GWLP_WNDPROC, original);
    }
    MENU_ACTIVE.store(false, Ordering::Release);
}
