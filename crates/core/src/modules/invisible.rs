//! Invisible: blind the AI to the player
//!
//! Holds the `unseenPlayer` flag high and every pursuit flag low on both AI
//! components, every frame, so the enemies idle through their patrol no
//! matter what the player does. On disable the flags are released and the
//! AI notices the player normally again.

use grimoire_sdk::offsets;
use grimoire_sdk::{Component, GameObject};

use crate::foreign::Foreign;
use crate::locator::Locator;
use crate::memory::MemoryResult;
use crate::modules::{Module, ModuleCx};

/// Seconds an AI handle may be used before it must re-resolve from the
/// scene. A destroyed component can keep readable pages, so the fault path
/// alone is not enough of a liveness check.
const REVERIFY_INTERVAL: f64 = 3.0;

pub struct Invisible {
    controller: Locator<*mut GameObject>,
    granny: Option<*mut Component>,
    grandpa: Option<*mut Component>,
    /// Time the AI handles last came off a live `EnemyController`.
    verified_at: f64,
}

// SAFETY: the cached handles are only touched from the render thread,
// under the pump mutex.
unsafe impl Send for Invisible {}

impl Default for Invisible {
    fn default() -> Self {
        Self::new()
    }
}

impl Invisible {
    pub fn new() -> Self {
        Invisible {
            controller: Locator::new("EnemyController", &["Enemy Controller"]),
            granny: None,
            grandpa: None,
            verified_at: f64::MIN,
        }
    }

    fn drop_handles(&mut self) {
        self.controller.invalidate();
        self.granny = None;
        self.grandpa = None;
    }

    fn resolve(&mut self, api: &Foreign<'_>) -> MemoryResult<()> {
        if self.granny.is_some() && self.grandpa.is_some() {
            return Ok(());
        }
        let Some(root) = self
            .controller
            .get(|name| api.find_game_object(name).ok().flatten())
        else {
            return Ok(());
        };
        let Some(controller) = api.get_component(root, "EnemyController")? else {
            return Ok(());
        };

        if self.granny.is_none() {
            if let Some(object) =
                api.object_field(controller, offsets::ENEMY_CONTROLLER_GRANNY)?
            {
                self.granny = api.get_component(object, "AI_Granny")?;
            }
        }
        if self.grandpa.is_none() {
            if let Some(object) =
                api.object_field(controller, offsets::ENEMY_CONTROLLER_GRANDPA)?
            {
                self.grandpa = api.get_component(object, "AI_Grandpa")?;
            }
        }
        Ok(())
    }

    fn suppress(&self, api: &Foreign<'_>) -> MemoryResult<()> {
        if let Some(granny) = self.granny {
            api.write_flag(granny, offsets::granny::UNSEEN_PLAYER, true)?;
            for &offset in &[
                offsets::granny::CAUGHT_PLAYER,
                offsets::granny::IS_ANGRY,
                offsets::granny::IS_FOLLOWING_SOUND,
                offsets::granny::IS_CHASING,
                offsets::granny::PLAYER_CLOSE,
                offsets::granny::PLAYER_TOUCHED_RAY,
            ] {
                api.write_flag(granny, offset, false)?;
            }
        }
        if let Some(grandpa) = self.grandpa {
            api.write_flag(grandpa, offsets::grandpa::UNSEEN_PLAYER, true)?;
            for &offset in &[
                offsets::grandpa::IS_SHOOTING,
                offsets::grandpa::CAUGHT_PLAYER,
                offsets::grandpa::IS_ANGRY,
                offsets::grandpa::IS_FOLLOWING_SOUND,
                offsets::grandpa::IS_CHASING,
                offsets::grandpa::PLAYER_CLOSE,
                offsets::grandpa::PLAYER_TOUCHED_RAY,
            ] {
                api.write_flag(grandpa, offset, false)?;
            }
        }
        Ok(())
    }

    fn release(&self, api: &Foreign<'_>) {
        if let Some(granny) = self.granny {
            let _ = api.write_flag(granny, offsets::granny::UNSEEN_PLAYER, false);
        }
        if let Some(grandpa) = self.grandpa {
            let _ = api.write_flag(grandpa, offsets::grandpa::UNSEEN_PLAYER, false);
        }
    }
}

impl Module for Invisible {
    fn name(&self) -> &'static str {
        "Invisible"
    }

    fn on_disable(&mut self, cx: &mut ModuleCx<'_>) {
        if let Some(runtime) = cx.runtime {
            self.release(&Foreign::new(runtime));
        }
        self.drop_handles();
    }

    fn on_update(&mut self, cx: &mut ModuleCx<'_>) {
        if cx.time - self.verified_at >= REVERIFY_INTERVAL {
            self.granny = None;
            self.grandpa = None;
            self.verified_at = cx.time;
        }
        let Some(runtime) = cx.runtime else { return };
        let api = Foreign::new(runtime);
        let result = self.resolve(&api).and_then(|_| self.suppress(&api));
        if let Err(e) = result {
            tracing::debug!(error = %e, "AI handles went stale");
            self.drop_handles();
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
        let mut invisible = Invisible::new();
        invisible.on_update(&mut cx);
        assert!(invisible.granny.is_none());
        assert!(invisible.grandpa.is_none());
    }

    #[test]
    fn test_disable_clears_handles() {
        let keys = NoKeys;
        let mut cx = cx(&keys);
        let mut invisible = Invisible::new();
        invisible.on_disable(&mut cx);
        assert!(!invisible.controller.is_cached());
    }

    #[test]
    fn test_ai_handles_expire_after_reverify_interval() {
        let keys = NoKeys;
        let mut mcx = cx(&keys);
        let mut invisible = Invisible::new();
        invisible.granny = Some(0x10 as *mut Component);
        invisible.grandpa = Some(0x20 as *mut Component);
        invisible.verified_at = 0.0;

        mcx.time = 1.0;
        invisible.on_update(&mut mcx);
        assert!(invisible.granny.is_some(), "fresh handles are kept");

        mcx.time = REVERIFY_INTERVAL + 1.0;
        invisible.on_update(&mut mcx);
        assert!(invisible.granny.is_none());
        assert!(invisible.grandpa.is_none());
    }
}
