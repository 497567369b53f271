//! grimoire core - interception, dispatch and overlay logic
//!
//! Everything between the injected entry point and the game lives here:
//! the inline hook engine and swap-chain vtable resolution ([`hooks`]),
//! the validated foreign-memory accessor ([`memory`], [`foreign`]), the
//! gameplay modules and their registry ([`modules`]), the imgui menu
//! ([`hud`]), settings persistence ([`config`]) and the D3D11 overlay
//! itself ([`render`], Windows only).
//!
//! The split from [`grimoire_sdk`] is deliberate: the SDK resolves
//! pointers, this crate is the only place that dereferences them.

pub use grimoire_sdk as sdk;

pub mod audio;
pub mod config;
pub mod foreign;
pub mod hooks;
pub mod hud;
pub mod input;
pub mod locator;
pub mod logging;
pub mod memory;
pub mod modules;
pub mod render;

pub use config::{Config, ConfigStore};
pub use foreign::Foreign;
pub use hooks::{EngineState, HookError, HookKey, InterceptionEngine};
pub use locator::Locator;
pub use memory::{MemoryError, MemoryResult};
pub use modules::{Module, ModuleCx, Registry};
