//! NoClip: free flight through level geometry
//!
//! Disables the player's `CharacterController` so collision stops, then
//! drives the transform directly from WASD/Space/Ctrl relative to where the
//! player faces. The controller is re-enabled on disable so the player
//! falls back under normal physics.

use grimoire_sdk::{Component, GameObject, Vector3};

use crate::foreign::Foreign;
use crate::input::vk;
use crate::locator::Locator;
use crate::modules::{Module, ModuleCx};

const DEFAULT_SPEED: f32 = 8.0;
const SPRINT_FACTOR: f32 = 2.5;

pub struct NoClip {
    player: Locator<*mut GameObject>,
    /// Controller we switched off; restored on disable.
    suppressed: Option<*mut Component>,
    speed: f32,
    sprint: bool,
}

// SAFETY: the cached handles are only touched from the render thread,
// under the pump mutex.
unsafe impl Send for NoClip {}

impl Default for NoClip {
    fn default() -> Self {
        Self::new()
    }
}

impl NoClip {
    pub fn new() -> Self {
        NoClip {
            player: Locator::new("Player", &["FPSController", "FirstPersonCharacter"]),
            suppressed: None,
            speed: DEFAULT_SPEED,
            sprint: false,
        }
    }

    fn drop_handles(&mut self) {
        self.player.invalidate();
        self.suppressed = None;
    }

    fn movement_input(cx: &ModuleCx<'_>) -> (Vector3, f32) {
        let mut local = Vector3::ZERO;
        if cx.keys.is_down(vk::KEY_W) {
            local = local + Vector3::FORWARD;
        }
        if cx.keys.is_down(vk::KEY_S) {
            local = local - Vector3::FORWARD;
        }
        if cx.keys.is_down(vk::KEY_D) {
            local = local + Vector3::RIGHT;
        }
        if cx.keys.is_down(vk::KEY_A) {
            local = local - Vector3::RIGHT;
        }
        let mut vertical = 0.0;
        if cx.keys.is_down(vk::SPACE) {
            vertical += 1.0;
        }
        if cx.keys.is_down(vk::LCONTROL) {
            vertical -= 1.0;
        }
        (local.normalized(), vertical)
    }

    fn fly(&mut self, api: &Foreign<'_>, cx: &ModuleCx<'_>) -> crate::memory::MemoryResult<()> {
        let Some(player) = self.player.get(|name| {
            api.find_game_object(name).ok().flatten()
        }) else {
            return Ok(());
        };

        if self.suppressed.is_none() {
            if let Some(controller) = api.get_component(player, "CharacterController")? {
                api.set_behaviour_enabled(controller, false)?;
                self.suppressed = Some(controller);
            }
        }

        let Some(transform) = api.object_transform(player)? else {
            return Ok(());
        };
        let (local, vertical) = Self::movement_input(cx);
        if local == Vector3::ZERO && vertical == 0.0 {
            return Ok(());
        }

        let mut step = api.transform_direction(transform, local)?;
        step.y = 0.0;
        step = step.normalized() + Vector3::UP * vertical;

        let mut speed = self.speed;
        if self.sprint && cx.keys.is_down(vk::LSHIFT) {
            speed *= SPRINT_FACTOR;
        }

        let position = api.position(transform)?;
        api.set_position(transform, position + step * (speed * cx.dt))?;
        Ok(())
    }
}

impl Module for NoClip {
    fn name(&self) -> &'static str {
        "NoClip"
    }

    fn on_disable(&mut self, cx: &mut ModuleCx<'_>) {
        if let (Some(runtime), Some(controller)) = (cx.runtime, self.suppressed) {
            let api = Foreign::new(runtime);
            if let Err(e) = api.set_behaviour_enabled(controller, true) {
                tracing::warn!(error = %e, "could not restore character controller");
            }
        }
        self.drop_handles();
    }

    fn on_update(&mut self, cx: &mut ModuleCx<'_>) {
        let Some(runtime) = cx.runtime else { return };
        let api = Foreign::new(runtime);
        if let Err(e) = self.fly(&api, cx) {
            tracing::debug!(error = %e, "noclip handles went stale");
            self.drop_handles();
        }
    }

    fn set_setting(&mut self, index: usize, value: bool) {
        // 0: sprint on shift, 1: slow precision mode.
        match index {
            0 => self.sprint = value,
            1 => self.speed = if value { DEFAULT_SPEED * 0.25 } else { DEFAULT_SPEED },
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::test_support::{cx, NoKeys};

    #[test]
    fn test_update_without_runtime_is_inert() {
        let keys = NoKeys;
        let mut cx = cx(&keys);
        let mut noclip = NoClip::new();
        noclip.on_update(&mut cx);
        assert!(noclip.suppressed.is_none());
    }

    #[test]
    fn test_disable_clears_handles() {
        let keys = NoKeys;
        let mut cx = cx(&keys);
        let mut noclip = NoClip::new();
        noclip.on_disable(&mut cx);
        assert!(!noclip.player.is_cached());
        assert!(noclip.suppressed.is_none());
    }

    #[test]
    fn test_settings_adjust_behavior() {
        let mut noclip = NoClip::new();
        noclip.set_setting(0, true);
        assert!(noclip.sprint);
        noclip.set_setting(1, true);
        assert!(noclip.speed < DEFAULT_SPEED);
        noclip.set_setting(7, true);
    }
}
