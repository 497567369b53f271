//! Enemy ESP: through-wall markers for both AI actors
//!
//! Enemy handles are rescanned on a slow cadence; projection runs every
//! frame in the late-update stage once the game camera has settled, and the
//! draw stage paints the markers on the background draw list so the menu
//! always sits above them.

use grimoire_sdk::offsets;
use grimoire_sdk::{GameObject, Transform, Vector3};

use crate::foreign::Foreign;
use crate::locator::Locator;
use crate::memory::MemoryResult;
use crate::modules::{Module, ModuleCx};

/// Seconds between enemy handle rescans.
const SCAN_INTERVAL: f64 = 1.0;

const MAX_DRAW_DISTANCE: f32 = 200.0;

/// Positional settings, index-stable for the saved config.
const SET_SHOW_GRANNY: usize = 0;
const SET_SHOW_GRANDPA: usize = 1;
const SET_SHOW_NAME: usize = 2;
const SET_SHOW_DISTANCE: usize = 3;
const SET_SHOW_BOX: usize = 4;

pub const SETTING_LABELS: [&str; 5] = [
    "Show Granny",
    "Show Grandpa",
    "Show Name",
    "Show Distance",
    "Show Box",
];

struct EnemyMark {
    label: &'static str,
    screen: [f32; 2],
    distance: f32,
    on_screen: bool,
}

pub struct EnemyEsp {
    settings: [bool; 5],
    controller: Locator<*mut GameObject>,
    player: Locator<*mut GameObject>,
    granny: Option<*mut Transform>,
    grandpa: Option<*mut Transform>,
    marks: Vec<EnemyMark>,
    last_scan: f64,
}

// SAFETY: the cached handles are only touched from the render thread,
// under the pump mutex.
unsafe impl Send for EnemyEsp {}

impl Default for EnemyEsp {
    fn default() -> Self {
        Self::new()
    }
}

impl EnemyEsp {
    pub fn new() -> Self {
        EnemyEsp {
            settings: [true, true, true, true, false],
            controller: Locator::new("EnemyController", &["Enemy Controller"]),
            player: Locator::new("Player", &["FPSController"]),
            granny: None,
            grandpa: None,
            marks: Vec::new(),
            last_scan: f64::MIN,
        }
    }

    fn drop_handles(&mut self) {
        self.controller.invalidate();
        self.player.invalidate();
        self.granny = None;
        self.grandpa = None;
        self.marks.clear();
    }

    fn rescan(&mut self, api: &Foreign<'_>) -> MemoryResult<()> {
        let Some(root) = self
            .controller
            .get(|name| api.find_game_object(name).ok().flatten())
        else {
            return Ok(());
        };
        let Some(controller) = api.get_component(root, "EnemyController")? else {
            return Ok(());
        };

        self.granny = None;
        self.grandpa = None;
        if let Some(object) = api.object_field(controller, offsets::ENEMY_CONTROLLER_GRANNY)? {
            if api.is_active(object)? {
                self.granny = api.object_transform(object)?;
            }
        }
        if let Some(object) = api.object_field(controller, offsets::ENEMY_CONTROLLER_GRANDPA)? {
            if api.is_active(object)? {
                self.grandpa = api.object_transform(object)?;
            }
        }
        Ok(())
    }

    fn project(&mut self, api: &Foreign<'_>, cx: &ModuleCx<'_>) -> MemoryResult<()> {
        self.marks.clear();
        let Some(camera) = api.main_camera()? else {
            return Ok(());
        };
        let eye = match self
            .player
            .get(|name| api.find_game_object(name).ok().flatten())
        {
            Some(player) => match api.object_transform(player)? {
                Some(t) => Some(api.position(t)?),
                None => None,
            },
            None => None,
        };

        let wanted: [(bool, Option<*mut Transform>, &'static str); 2] = [
            (self.settings[SET_SHOW_GRANNY], self.granny, "Granny"),
            (self.settings[SET_SHOW_GRANDPA], self.grandpa, "Grandpa"),
        ];
        for (show, transform, label) in wanted {
            let (true, Some(transform)) = (show, transform) else {
                continue;
            };
            let world = self.mark_world(api, transform)?;
            let distance = eye.map_or(0.0, |e| e.distance(&world));
            if distance > MAX_DRAW_DISTANCE {
                continue;
            }
            let projected = api.world_to_screen(camera, world)?;
            // Unity's screen origin is bottom-left; ours is top-left.
            self.marks.push(EnemyMark {
                label,
                screen: [projected.x, cx.screen[1] - projected.y],
                distance,
                on_screen: projected.z > 0.0,
            });
        }
        Ok(())
    }

    fn mark_world(&self, api: &Foreign<'_>, transform: *mut Transform) -> MemoryResult<Vector3> {
        // Anchor the marker at chest height.
        Ok(api.position(transform)? + Vector3::UP * 1.2)
    }
}

impl Module for EnemyEsp {
    fn name(&self) -> &'static str {
        "ESP"
    }

    fn on_disable(&mut self, _cx: &mut ModuleCx<'_>) {
        self.drop_handles();
    }

    fn on_update(&mut self, cx: &mut ModuleCx<'_>) {
        let Some(runtime) = cx.runtime else { return };
        if cx.time - self.last_scan < SCAN_INTERVAL {
            return;
        }
        self.last_scan = cx.time;
        let api = Foreign::new(runtime);
        if let Err(e) = self.rescan(&api) {
            tracing::debug!(error = %e, "enemy handles went stale");
            self.drop_handles();
        }
    }

    fn on_late_update(&mut self, cx: &mut ModuleCx<'_>) {
        let Some(runtime) = cx.runtime else { return };
        let api = Foreign::new(runtime);
        if let Err(e) = self.project(&api, cx) {
            tracing::debug!(error = %e, "projection failed, dropping handles");
            self.drop_handles();
        }
    }

    fn draw(&mut self, ui: &imgui::Ui, _cx: &mut ModuleCx<'_>) {
        let draw_list = ui.get_background_draw_list();
        for mark in self.marks.iter().filter(|m| m.on_screen) {
            let [x, y] = mark.screen;
            let color = [1.0, 0.2, 0.2, 1.0];

            if self.settings[SET_SHOW_BOX] {
                // Crude depth cue: closer enemies get a taller box.
                let half_h = (60.0 / mark.distance.max(1.0) * 30.0).clamp(12.0, 90.0);
                let half_w = half_h * 0.4;
                draw_list
                    .add_rect([x - half_w, y - half_h], [x + half_w, y + half_h], color)
                    .build();
            }
            let mut line = y - 14.0;
            if self.settings[SET_SHOW_NAME] {
                draw_list.add_text([x + 4.0, line], color, mark.label);
                line -= 14.0;
            }
            if self.settings[SET_SHOW_DISTANCE] && mark.distance > 0.0 {
                draw_list.add_text(
                    [x + 4.0, line],
                    [1.0, 1.0, 1.0, 0.9],
                    format!("{:.0}m", mark.distance),
                );
            }
        }
    }

    fn set_setting(&mut self, index: usize, value: bool) {
        if let Some(slot) = self.settings.get_mut(index) {
            *slot = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::test_support::{cx, NoKeys};

    #[test]
    fn test_scan_cadence_without_runtime() {
        let keys = NoKeys;
        let mut cx = cx(&keys);
        let mut esp = EnemyEsp::new();
        esp.on_update(&mut cx);
        esp.on_late_update(&mut cx);
        assert!(esp.marks.is_empty());
    }

    #[test]
    fn test_settings_are_positional() {
        let mut esp = EnemyEsp::new();
        esp.set_setting(SET_SHOW_BOX, true);
        assert!(esp.settings[SET_SHOW_BOX]);
        esp.set_setting(99, true);
    }

    #[test]
    fn test_disable_clears_marks() {
        let keys = NoKeys;
        let mut cx = cx(&keys);
        let mut esp = EnemyEsp::new();
        esp.marks.push(EnemyMark {
            label: "Granny",
            screen: [0.0, 0.0],
            distance: 1.0,
            on_screen: true,
        });
        esp.on_disable(&mut cx);
        assert!(esp.marks.is_empty());
    }
}
