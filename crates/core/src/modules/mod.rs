//! Feature modules and their dispatcher
//!
//! Every gameplay feature implements [`Module`] and is registered with the
//! [`Registry`] during startup. The frame pump drives the registry once per
//! frame; each callback runs behind a panic barrier so one faulting feature
//! degrades to a log line instead of taking the frame down.

pub mod escapes;
pub mod esp;
pub mod invisible;
pub mod items;
pub mod noclip;

use std::panic::{catch_unwind, AssertUnwindSafe};

use grimoire_sdk::Runtime;

use crate::input::KeySource;

pub use escapes::{EscapeKind, EscapeRequests, Escapes};
pub use esp::EnemyEsp;
pub use invisible::Invisible;
pub use items::{ItemGroup, ItemSpawner, SpawnRequests, ITEM_CATALOG};
pub use noclip::NoClip;

/// Per-frame context handed to every module callback.
pub struct ModuleCx<'a> {
    /// Bound host runtime; `None` until the init thread finishes binding.
    pub runtime: Option<&'a Runtime>,
    /// Instantaneous keyboard state.
    pub keys: &'a dyn KeySource,
    /// Seconds since the previous frame.
    pub dt: f32,
    /// Seconds since the overlay initialized.
    pub time: f64,
    /// Backbuffer size in pixels, for screen-space projection.
    pub screen: [f32; 2],
}

/// A single gameplay feature.
///
/// Transitions are exactly-once: the dispatcher only invokes `on_enable` /
/// `on_disable` on a real state change. `on_disable` must drop any cached
/// host handles.
pub trait Module: Send {
    fn name(&self) -> &'static str;

    fn on_enable(&mut self, _cx: &mut ModuleCx<'_>) {}

    fn on_disable(&mut self, _cx: &mut ModuleCx<'_>) {}

    /// Runs every frame while enabled, before the overlay draws.
    fn on_update(&mut self, _cx: &mut ModuleCx<'_>) {}

    /// Runs every frame while enabled, after camera state settles.
    fn on_late_update(&mut self, _cx: &mut ModuleCx<'_>) {}

    /// Draw world-space visuals. Runs while enabled, inside the frame.
    fn draw(&mut self, _ui: &imgui::Ui, _cx: &mut ModuleCx<'_>) {}

    /// Positional boolean setting pushed from the menu / saved config.
    fn set_setting(&mut self, _index: usize, _value: bool) {}
}

struct Slot {
    module: Box<dyn Module>,
    enabled: bool,
}

/// Ordered module dispatcher.
#[derive(Default)]
pub struct Registry {
    slots: Vec<Slot>,
}

fn barrier(module: &'static str, stage: &'static str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::error!(module, stage, "module panicked; feature degraded this frame");
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Register a module, disabled. Re-registering a name is a no-op.
    pub fn register(&mut self, module: Box<dyn Module>) -> bool {
        self.register_with(module, false)
    }

    /// Register an always-on service module without firing `on_enable`.
    pub fn register_service(&mut self, module: Box<dyn Module>) -> bool {
        self.register_with(module, true)
    }

    fn register_with(&mut self, module: Box<dyn Module>, enabled: bool) -> bool {
        if self.slots.iter().any(|s| s.module.name() == module.name()) {
            tracing::warn!(module = module.name(), "duplicate registration ignored");
            return false;
        }
        tracing::debug!(module = module.name(), enabled, "module registered");
        self.slots.push(Slot { module, enabled });
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.iter().any(|s| s.module.name() == name)
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.slots
            .iter()
            .any(|s| s.module.name() == name && s.enabled)
    }

    /// Flip a module to `enabled`, firing the transition callback exactly
    /// once. Returns false when the module is unknown or already there.
    pub fn set_enabled(&mut self, name: &str, enabled: bool, cx: &mut ModuleCx<'_>) -> bool {
        let Some(slot) = self.slots.iter_mut().find(|s| s.module.name() == name) else {
            return false;
        };
        if slot.enabled == enabled {
            return false;
        }
        slot.enabled = enabled;
        let module_name = slot.module.name();
        if enabled {
            tracing::info!(module = module_name, "enabled");
            barrier(module_name, "on_enable", || slot.module.on_enable(cx));
        } else {
            tracing::info!(module = module_name, "disabled");
            barrier(module_name, "on_disable", || slot.module.on_disable(cx));
        }
        true
    }

    /// Toggle and return the new state, or `None` for unknown modules.
    pub fn toggle(&mut self, name: &str, cx: &mut ModuleCx<'_>) -> Option<bool> {
        let target = !self.is_enabled(name);
        if self.contains(name) {
            self.set_enabled(name, target, cx);
            Some(target)
        } else {
            None
        }
    }

    pub fn push_setting(&mut self, name: &str, index: usize, value: bool) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.module.name() == name) {
            slot.module.set_setting(index, value);
        }
    }

    pub fn update_all(&mut self, cx: &mut ModuleCx<'_>) {
        for slot in self.slots.iter_mut().filter(|s| s.enabled) {
            barrier(slot.module.name(), "on_update", || slot.module.on_update(cx));
        }
    }

    pub fn late_update_all(&mut self, cx: &mut ModuleCx<'_>) {
        for slot in self.slots.iter_mut().filter(|s| s.enabled) {
            barrier(slot.module.name(), "on_late_update", || {
                slot.module.on_late_update(cx)
            });
        }
    }

    pub fn draw_all(&mut self, ui: &imgui::Ui, cx: &mut ModuleCx<'_>) {
        for slot in self.slots.iter_mut().filter(|s| s.enabled) {
            barrier(slot.module.name(), "draw", || slot.module.draw(ui, cx));
        }
    }

    /// Disable everything that is enabled, firing transitions.
    pub fn disable_all(&mut self, cx: &mut ModuleCx<'_>) {
        let names: Vec<&'static str> = self
            .slots
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.module.name())
            .collect();
        for name in names {
            self.set_enabled(name, false, cx);
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub struct NoKeys;

    impl KeySource for NoKeys {
        fn is_down(&self, _vk: u32) -> bool {
            false
        }
    }

    pub fn cx(keys: &NoKeys) -> ModuleCx<'_> {
        ModuleCx {
            runtime: None,
            keys,
            dt: 1.0 / 60.0,
            time: 0.0,
            screen: [1920.0, 1080.0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{cx, NoKeys};
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Probe {
        name: &'static str,
        enables: Arc<AtomicUsize>,
        disables: Arc<AtomicUsize>,
        updates: Arc<AtomicUsize>,
        panic_in_update: bool,
    }

    impl Probe {
        fn new(name: &'static str) -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
            let (e, d, u) = (
                Arc::new(AtomicUsize::new(0)),
                Arc::new(AtomicUsize::new(0)),
                Arc::new(AtomicUsize::new(0)),
            );
            (
                Probe {
                    name,
                    enables: e.clone(),
                    disables: d.clone(),
                    updates: u.clone(),
                    panic_in_update: false,
                },
                e,
                d,
                u,
            )
        }
    }

    impl Module for Probe {
        fn name(&self) -> &'static str {
            self.name
        }
        fn on_enable(&mut self, _cx: &mut ModuleCx<'_>) {
            self.enables.fetch_add(1, Ordering::SeqCst);
        }
        fn on_disable(&mut self, _cx: &mut ModuleCx<'_>) {
            self.disables.fetch_add(1, Ordering::SeqCst);
        }
        fn on_update(&mut self, _cx: &mut ModuleCx<'_>) {
            self.updates.fetch_add(1, Ordering::SeqCst);
            if self.panic_in_update {
                panic!("boom");
            }
        }
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = Registry::new();
        let (a, ..) = Probe::new("Thing");
        let (b, ..) = Probe::new("Thing");
        assert!(registry.register(Box::new(a)));
        assert!(!registry.register(Box::new(b)));
    }

    #[test]
    fn test_transitions_fire_exactly_once() {
        let keys = NoKeys;
        let mut cx = cx(&keys);
        let mut registry = Registry::new();
        let (probe, enables, disables, _) = Probe::new("Thing");
        registry.register(Box::new(probe));

        assert!(registry.set_enabled("Thing", true, &mut cx));
        assert!(!registry.set_enabled("Thing", true, &mut cx));
        assert_eq!(enables.load(Ordering::SeqCst), 1);

        assert!(registry.set_enabled("Thing", false, &mut cx));
        assert!(!registry.set_enabled("Thing", false, &mut cx));
        assert_eq!(disables.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_update_skips_disabled() {
        let keys = NoKeys;
        let mut cx = cx(&keys);
        let mut registry = Registry::new();
        let (probe, _, _, updates) = Probe::new("Thing");
        registry.register(Box::new(probe));

        registry.update_all(&mut cx);
        assert_eq!(updates.load(Ordering::SeqCst), 0);

        registry.set_enabled("Thing", true, &mut cx);
        registry.update_all(&mut cx);
        assert_eq!(updates.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_module_does_not_block_others() {
        let keys = NoKeys;
        let mut cx = cx(&keys);
        let mut registry = Registry::new();
        let (mut bad, ..) = Probe::new("Bad");
        bad.panic_in_update = true;
        let (good, _, _, good_updates) = Probe::new("Good");
        registry.register(Box::new(bad));
        registry.register(Box::new(good));
        registry.set_enabled("Bad", true, &mut cx);
        registry.set_enabled("Good", true, &mut cx);

        registry.update_all(&mut cx);
        assert_eq!(good_updates.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concrete_modules_satisfy_send() {
        // The registry lives inside the pump mutex, so every module must
        // cross the thread boundary at install time.
        fn assert_send<T: Send>() {}
        assert_send::<NoClip>();
        assert_send::<EnemyEsp>();
        assert_send::<Invisible>();
        assert_send::<Escapes>();
        assert_send::<ItemSpawner>();
        assert_send::<Registry>();
    }

    #[test]
    fn test_toggle_unknown_module() {
        let keys = NoKeys;
        let mut cx = cx(&keys);
        let mut registry = Registry::new();
        assert_eq!(registry.toggle("Missing", &mut cx), None);
    }
}
