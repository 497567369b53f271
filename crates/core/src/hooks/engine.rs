//! Hook lifecycle sequencing
//!
//! The engine owns every detour and drives them through one state machine:
//!
//! ```text
//! Uninitialized -> Installing -> Disabled <-> Enabled -> Removed
//! ```
//!
//! Installation is all-or-nothing: any failure rolls back everything
//! prepared so far and returns the engine to `Uninitialized`, leaving the
//! host untouched. Removal restores targets in reverse installation order.

use slotmap::{new_key_type, SlotMap};

use super::detour::{Detour, HookError};

new_key_type! {
    /// Handle for an installed hook.
    pub struct HookKey;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Installing,
    Enabled,
    Disabled,
    Removed,
}

impl EngineState {
    fn name(self) -> &'static str {
        match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Installing => "installing",
            EngineState::Enabled => "enabled",
            EngineState::Disabled => "disabled",
            EngineState::Removed => "removed",
        }
    }
}

pub struct InterceptionEngine {
    state: EngineState,
    hooks: SlotMap<HookKey, Detour>,
    /// Installation order; removal walks this backwards.
    order: Vec<HookKey>,
}

impl Default for InterceptionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InterceptionEngine {
    pub fn new() -> Self {
        InterceptionEngine {
            state: EngineState::Uninitialized,
            hooks: SlotMap::with_key(),
            order: Vec::new(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Prepare a hook on `target`. The target is not modified until
    /// [`enable_all`](Self::enable_all).
    ///
    /// On any failure every previously prepared hook is discarded and the
    /// engine returns to `Uninitialized`.
    ///
    /// # Safety
    ///
    /// See [`Detour::prepare`].
    pub unsafe fn install(
        &mut self,
        name: &'static str,
        target: *const (),
        replacement: *const (),
    ) -> Result<HookKey, HookError> {
        if !matches!(
            self.state,
            EngineState::Uninitialized | EngineState::Installing
        ) {
            return Err(HookError::BadState(self.state.name(), "installing"));
        }
        self.state = EngineState::Installing;

        if self
            .hooks
            .values()
            .any(|d| d.target_addr() == target as usize)
        {
            self.fail_closed();
            return Err(HookError::AlreadyHooked(target as usize));
        }

        match Detour::prepare(name, target, replacement) {
            Ok(detour) => {
                let key = self.hooks.insert(detour);
                self.order.push(key);
                Ok(key)
            }
            Err(e) => {
                tracing::error!(name, error = %e, "hook installation failed, rolling back");
                self.fail_closed();
                Err(e)
            }
        }
    }

    /// Patch every installed hook live. If one fails, the ones already
    /// enabled are disabled again and the engine stays `Disabled`.
    pub fn enable_all(&mut self) -> Result<(), HookError> {
        if !matches!(self.state, EngineState::Installing | EngineState::Disabled) {
            return Err(HookError::BadState(self.state.name(), "installed"));
        }

        for i in 0..self.order.len() {
            let key = self.order[i];
            if let Err(e) = self.hooks[key].enable() {
                for &done in self.order[..i].iter().rev() {
                    let _ = self.hooks[done].disable();
                }
                self.state = EngineState::Disabled;
                return Err(e);
            }
        }
        self.state = EngineState::Enabled;
        tracing::info!(count = self.order.len(), "all hooks enabled");
        Ok(())
    }

    /// Restore original bytes on every hook, keeping them installed.
    pub fn disable_all(&mut self) -> Result<(), HookError> {
        if self.state != EngineState::Enabled {
            return Err(HookError::BadState(self.state.name(), "enabled"));
        }
        let mut first_err = None;
        for &key in self.order.iter().rev() {
            if let Err(e) = self.hooks[key].disable() {
                tracing::error!(name = self.hooks[key].name(), error = %e, "disable failed");
                first_err.get_or_insert(e);
            }
        }
        self.state = EngineState::Disabled;
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Unpatch one hook and forget it.
    pub fn remove(&mut self, key: HookKey) -> Result<(), HookError> {
        let mut detour = self.hooks.remove(key).ok_or(HookError::NotFound)?;
        self.order.retain(|&k| k != key);
        detour.disable()?;
        Ok(())
    }

    /// Tear everything down in reverse installation order. Terminal.
    pub fn remove_all(&mut self) {
        for key in self.order.drain(..).rev() {
            if let Some(mut detour) = self.hooks.remove(key) {
                if let Err(e) = detour.disable() {
                    tracing::error!(name = detour.name(), error = %e, "restore failed during removal");
                }
            }
        }
        self.state = EngineState::Removed;
        tracing::info!("all hooks removed");
    }

    /// Entry point that runs the original function behind a hook.
    pub fn trampoline(&self, key: HookKey) -> Option<*const ()> {
        self.hooks.get(key).map(|d| d.trampoline())
    }

    fn fail_closed(&mut self) {
        self.order.clear();
        self.hooks.clear();
        self.state = EngineState::Uninitialized;
    }
}

#[cfg(all(test, target_arch = "x86_64"))]
mod tests {
    use super::*;
    use crate::hooks::trampoline::alloc_slot;

    fn emit_const_fn(value: u32) -> *const () {
        let slot = alloc_slot(emit_const_fn as usize).unwrap();
        let mut code = vec![0xB8u8];
        code.extend_from_slice(&value.to_le_bytes());
        code.push(0xC3);
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), slot.as_ptr(), code.len());
        }
        slot.as_ptr() as *const ()
    }

    fn call(p: *const ()) -> u32 {
        let f: extern "C" fn() -> u32 = unsafe { std::mem::transmute(p) };
        f()
    }

    #[test]
    fn test_install_enable_disable_remove_cycle() {
        let target = emit_const_fn(1);
        let replacement = emit_const_fn(2);

        let mut engine = InterceptionEngine::new();
        let key = unsafe { engine.install("one", target, replacement) }.unwrap();
        assert_eq!(engine.state(), EngineState::Installing);
        assert_eq!(call(target), 1);

        engine.enable_all().unwrap();
        assert_eq!(engine.state(), EngineState::Enabled);
        assert_eq!(call(target), 2);
        assert_eq!(call(engine.trampoline(key).unwrap()), 1);

        engine.disable_all().unwrap();
        assert_eq!(engine.state(), EngineState::Disabled);
        assert_eq!(call(target), 1);

        engine.remove_all();
        assert_eq!(engine.state(), EngineState::Removed);
        assert_eq!(call(target), 1);
        assert!(engine.trampoline(key).is_none());
    }

    #[test]
    fn test_duplicate_target_fails_closed() {
        let target = emit_const_fn(3);
        let replacement = emit_const_fn(4);

        let mut engine = InterceptionEngine::new();
        unsafe { engine.install("first", target, replacement) }.unwrap();
        let err = unsafe { engine.install("second", target, replacement) }.unwrap_err();
        assert!(matches!(err, HookError::AlreadyHooked(_)));
        assert_eq!(engine.state(), EngineState::Uninitialized);
        assert!(engine.order.is_empty());
        assert_eq!(call(target), 3);
    }

    #[test]
    fn test_enable_requires_installed_state() {
        let mut engine = InterceptionEngine::new();
        assert!(matches!(
            engine.enable_all(),
            Err(HookError::BadState("uninitialized", _))
        ));
    }

    #[test]
    fn test_single_remove_restores_target() {
        let target = emit_const_fn(5);
        let replacement = emit_const_fn(6);

        let mut engine = InterceptionEngine::new();
        let key = unsafe { engine.install("single", target, replacement) }.unwrap();
        engine.enable_all().unwrap();
        assert_eq!(call(target), 6);

        engine.remove(key).unwrap();
        assert_eq!(call(target), 5);
        assert!(matches!(engine.remove(key), Err(HookError::NotFound)));
    }
}
