//! Function interception
//!
//! A small inline-hook engine for x86_64: [`trampoline`] hands out
//! executable slots within rel32 range of a target, [`detour`] builds the
//! patch and the relocated prologue with iced-x86, and [`engine`] sequences
//! install/enable/disable/remove with fail-closed rollback.
//!
//! On Windows, [`dxgi`] resolves the swap-chain vtable entries the render
//! hooks attach to.

pub mod detour;
#[cfg(windows)]
pub mod dxgi;
pub mod engine;
pub mod trampoline;

pub use detour::{Detour, HookError};
pub use engine::{EngineState, HookKey, InterceptionEngine};
