//! grimoire SDK - IL2CPP Runtime Binding
//!
//! This crate is the foreign-runtime boundary of the overlay: raw IL2CPP
//! object layouts, the exported IL2CPP API surface resolved from
//! `GameAssembly.dll`, and the per-game field offset table.
//!
//! Nothing here dereferences game memory on its own; resolved pointers are
//! handed to the core's safe accessor, which owns the fault barrier. This
//! crate only *finds* things.
//!
//! # Host compatibility
//!
//! Field offsets and icall names match a single game build. They are
//! expected to break on host updates; see [`offsets`] for the one place
//! they live.

pub mod offsets;
pub mod runtime;
pub mod types;

pub use runtime::{Runtime, RuntimeError};
pub use types::{
    Camera, Component, ForeignFn, GameObject, Il2CppClass, Il2CppDomain, Il2CppImage,
    Il2CppString, MethodInfo, Transform, Vector3,
};
