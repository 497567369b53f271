//! One-shot escape sequence triggers
//!
//! The game exposes scripted escape endings as zero-argument methods on a
//! logic object whose name varies across builds. Menu rows and keybinds
//! push an [`EscapeKind`] onto a shared queue; this always-on service
//! module drains the queue on the next frame, resolving the logic object
//! and its method pointers on first use.

use std::sync::Arc;

use parking_lot::Mutex;

use grimoire_sdk::{Component, ForeignFn, GameObject};

use crate::foreign::Foreign;
use crate::locator::Locator;
use crate::memory;
use crate::modules::{Module, ModuleCx};

/// Container object names tried in order; varies across game builds.
/// Seconds the cached logic handle may serve requests before it must
/// re-resolve from the scene.
const REVERIFY_INTERVAL: f64 = 3.0;

const CONTAINER_NAMES: &[&str] = &[
    "Escapes",
    "GameLogic",
    "GameManager",
    "Logic",
    "Manager",
    "EscapeManager",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeKind {
    Door,
    Car,
    Cellar,
    Robot,
}

impl EscapeKind {
    pub const ALL: [EscapeKind; 4] = [
        EscapeKind::Door,
        EscapeKind::Car,
        EscapeKind::Cellar,
        EscapeKind::Robot,
    ];

    pub fn label(self) -> &'static str {
        match self {
            EscapeKind::Door => "Door",
            EscapeKind::Car => "Car",
            EscapeKind::Cellar => "Cellar",
            EscapeKind::Robot => "Robot",
        }
    }

    fn method_name(self) -> &'static str {
        match self {
            EscapeKind::Door => "EscapeDoor",
            EscapeKind::Car => "EscapeCar",
            EscapeKind::Cellar => "EscapeCellar",
            EscapeKind::Robot => "EscapeRobo",
        }
    }
}

/// Queue the menu pushes escape requests onto.
#[derive(Clone, Default)]
pub struct EscapeRequests(Arc<Mutex<Vec<EscapeKind>>>);

impl EscapeRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, kind: EscapeKind) {
        self.0.lock().push(kind);
    }

    fn drain(&self) -> Vec<EscapeKind> {
        std::mem::take(&mut *self.0.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

pub struct Escapes {
    requests: EscapeRequests,
    container: Locator<*mut GameObject>,
    logic: Option<*mut Component>,
    methods: [Option<ForeignFn>; 4],
    /// Time the logic handle last came off a live container object.
    verified_at: f64,
}

// SAFETY: the cached handles are only touched from the render thread,
// under the pump mutex.
unsafe impl Send for Escapes {}

impl Escapes {
    pub fn new(requests: EscapeRequests) -> Self {
        Escapes {
            requests,
            container: Locator::new("Escapes", &CONTAINER_NAMES[1..]),
            logic: None,
            methods: [None; 4],
            verified_at: f64::MIN,
        }
    }

    fn drop_handles(&mut self) {
        self.container.invalidate();
        self.logic = None;
        self.methods = [None; 4];
    }

    fn resolve(&mut self, api: &Foreign<'_>) -> Option<*mut Component> {
        if let Some(logic) = self.logic {
            return Some(logic);
        }
        let root = self
            .container
            .get(|name| api.find_game_object(name).ok().flatten())?;
        let logic = api.get_component(root, "Escapes").ok().flatten()?;

        let class = api.runtime().find_class("", "Escapes").ok()?;
        for (slot, kind) in self.methods.iter_mut().zip(EscapeKind::ALL) {
            match api.runtime().method_pointer(class, kind.method_name(), 0) {
                Ok(f) => *slot = Some(f),
                Err(e) => tracing::warn!(escape = kind.label(), error = %e, "method missing"),
            }
        }
        self.logic = Some(logic);
        Some(logic)
    }

    fn trigger(&self, kind: EscapeKind, logic: *mut Component) {
        let index = EscapeKind::ALL.iter().position(|&k| k == kind).unwrap_or(0);
        let Some(method) = self.methods[index] else {
            tracing::warn!(escape = kind.label(), "no method bound, request dropped");
            return;
        };
        // Instance method with no managed arguments.
        match unsafe { memory::call1::<_, ()>(method, logic) } {
            Ok(()) => tracing::info!(escape = kind.label(), "escape triggered"),
            Err(e) => tracing::warn!(escape = kind.label(), error = %e, "escape call rejected"),
        }
    }
}

impl Module for Escapes {
    fn name(&self) -> &'static str {
        "Escapes"
    }

    fn on_disable(&mut self, _cx: &mut ModuleCx<'_>) {
        self.drop_handles();
    }

    fn on_update(&mut self, cx: &mut ModuleCx<'_>) {
        if cx.time - self.verified_at >= REVERIFY_INTERVAL {
            // The method pointers are code addresses and stay valid; only
            // the object instance can go stale.
            self.logic = None;
            self.verified_at = cx.time;
        }
        if self.requests.is_empty() {
            return;
        }
        let Some(runtime) = cx.runtime else {
            // No runtime yet; drop rather than replay stale clicks later.
            self.requests.drain();
            return;
        };
        let api = Foreign::new(runtime);
        let pending = self.requests.drain();
        let Some(logic) = self.resolve(&api) else {
            tracing::warn!("escape logic object not found, requests dropped");
            return;
        };
        for kind in pending {
            self.trigger(kind, logic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::test_support::{cx, NoKeys};

    #[test]
    fn test_requests_queue_and_drain() {
        let requests = EscapeRequests::new();
        assert!(requests.is_empty());
        requests.push(EscapeKind::Door);
        requests.push(EscapeKind::Robot);
        assert_eq!(
            requests.drain(),
            vec![EscapeKind::Door, EscapeKind::Robot]
        );
        assert!(requests.is_empty());
    }

    #[test]
    fn test_requests_dropped_without_runtime() {
        let keys = NoKeys;
        let mut cx = cx(&keys);
        let requests = EscapeRequests::new();
        let mut escapes = Escapes::new(requests.clone());
        requests.push(EscapeKind::Car);
        escapes.on_update(&mut cx);
        assert!(requests.is_empty());
        assert!(escapes.logic.is_none());
    }

    #[test]
    fn test_logic_handle_expires_after_reverify_interval() {
        let keys = NoKeys;
        let mut mcx = cx(&keys);
        let mut escapes = Escapes::new(EscapeRequests::new());
        escapes.logic = Some(0x10 as *mut Component);
        escapes.verified_at = 0.0;

        mcx.time = 1.0;
        escapes.on_update(&mut mcx);
        assert!(escapes.logic.is_some(), "fresh handle is kept");

        mcx.time = REVERIFY_INTERVAL + 1.0;
        escapes.on_update(&mut mcx);
        assert!(escapes.logic.is_none());
    }

    #[test]
    fn test_method_names() {
        assert_eq!(EscapeKind::Robot.method_name(), "EscapeRobo");
        assert_eq!(EscapeKind::Door.method_name(), "EscapeDoor");
    }
}
