//! Menu, watermark, console and item browser
//!
//! The HUD owns presentation state only: category windows, row flags,
//! keybinds and the watermark. Feature behavior lives in the module
//! registry; rows that have a backing module forward their state there,
//! rows that do not are persisted toggles with no effect yet. Widget
//! interactions are collected during the draw pass and applied afterwards,
//! keeping the imgui closures free of long-lived borrows.

use imgui::Condition;

use crate::audio::{self, Cue};
use crate::config::{CategoryState, Config, ModuleState, WatermarkConfig};
use crate::input::{self, key_name, vk, Capture, EdgeTracker, KeySource};
use crate::logging;
use crate::modules::{
    EscapeKind, EscapeRequests, ItemGroup, ModuleCx, Registry, SpawnRequests, ITEM_CATALOG,
};

const CATEGORY_WINDOW_SIZE: [f32; 2] = [190.0, 260.0];

/// What clicking a row does beyond flipping its flag.
#[derive(Clone, Copy, PartialEq)]
enum RowKind {
    /// Backed by a registry module of the same name.
    Module,
    /// Persisted toggle with no implementation behind it.
    Stub,
    /// One-shot trigger; never stays enabled.
    Escape(EscapeKind),
}

struct SettingRow {
    label: &'static str,
    value: bool,
}

struct ModuleRow {
    name: &'static str,
    kind: RowKind,
    enabled: bool,
    expanded: bool,
    keybind: u32,
    settings: Vec<SettingRow>,
}

impl ModuleRow {
    fn new(name: &'static str, kind: RowKind) -> Self {
        ModuleRow {
            name,
            kind,
            enabled: false,
            expanded: false,
            keybind: 0,
            settings: Vec::new(),
        }
    }

    fn with_settings(mut self, labels: &[&'static str]) -> Self {
        self.settings = labels
            .iter()
            .map(|&label| SettingRow { label, value: false })
            .collect();
        self
    }
}

struct Category {
    name: &'static str,
    pos: [f32; 2],
    scroll: f32,
    rows: Vec<ModuleRow>,
}

/// Deferred widget interactions, applied after the draw pass.
enum UiAction {
    Toggle(usize, usize),
    Expand(usize, usize),
    ArmCapture(usize, usize),
    SetSetting(usize, usize, usize, bool),
    Spawn(&'static str),
    ClearConsole,
}

pub struct Hud {
    pub menu_visible: bool,
    console_visible: bool,
    browser_visible: bool,
    watermark: WatermarkConfig,
    categories: Vec<Category>,
    /// `(category, row)` armed for keybind capture.
    capture: Option<(usize, usize)>,
    escapes: EscapeRequests,
    spawns: SpawnRequests,
    browser_group: usize,
    edges: EdgeTracker,
    actions: Vec<UiAction>,
}

fn default_layout() -> Vec<Category> {
    use RowKind::{Escape, Module, Stub};

    let category = |name, rows| Category {
        name,
        pos: [0.0, 0.0],
        scroll: 0.0,
        rows,
    };
    vec![
        category(
            "Combat",
            vec![
                ModuleRow::new("Aim", Stub),
                ModuleRow::new("Silent", Stub),
                ModuleRow::new("No Recoil", Stub),
                ModuleRow::new("No Spread", Stub),
            ],
        ),
        category(
            "Movement",
            vec![
                ModuleRow::new("Speedhack", Stub),
                ModuleRow::new("Fly", Stub),
                ModuleRow::new("No Fall", Stub),
                ModuleRow::new("NoClip", Module).with_settings(&["Sprint", "Slow Mode"]),
            ],
        ),
        category(
            "Render",
            vec![
                ModuleRow::new("ESP", Module).with_settings(&crate::modules::esp::SETTING_LABELS),
                ModuleRow::new("Chams", Stub),
                ModuleRow::new("Wallhack", Stub),
                ModuleRow::new("Tracers", Stub),
            ],
        ),
        category(
            "Player",
            vec![
                ModuleRow::new("Godmode", Stub),
                ModuleRow::new("Invisible", Module),
                ModuleRow::new("No Hunger", Stub),
            ],
        ),
        category(
            "Misc",
            vec![
                ModuleRow::new("Auto Clicker", Stub),
                ModuleRow::new("Reach", Stub),
            ],
        ),
        category(
            "Visual",
            vec![ModuleRow::new("Watermark", Stub).with_settings(&["Show FPS"])],
        ),
        category(
            "Escapes",
            vec![
                ModuleRow::new("Door", Escape(EscapeKind::Door)),
                ModuleRow::new("Car", Escape(EscapeKind::Car)),
                ModuleRow::new("Cellar", Escape(EscapeKind::Cellar)),
                ModuleRow::new("Robot", Escape(EscapeKind::Robot)),
            ],
        ),
    ]
}

impl Hud {
    pub fn new(escapes: EscapeRequests, spawns: SpawnRequests) -> Self {
        let mut categories = default_layout();
        // Spread the windows out on first use.
        for (i, category) in categories.iter_mut().enumerate() {
            category.pos = [20.0 + i as f32 * 200.0, 40.0];
        }
        let mut hud = Hud {
            menu_visible: false,
            console_visible: false,
            browser_visible: false,
            watermark: WatermarkConfig::default(),
            categories,
            capture: None,
            escapes,
            spawns,
            browser_group: 0,
            edges: EdgeTracker::new(),
            actions: Vec::new(),
        };
        hud.set_row_enabled("Visual", "Watermark", true);
        hud.set_row_setting("Visual", "Watermark", 0, true);
        hud
    }

    fn row_mut(&mut self, category: &str, row: &str) -> Option<&mut ModuleRow> {
        self.categories
            .iter_mut()
            .find(|c| c.name == category)?
            .rows
            .iter_mut()
            .find(|r| r.name == row)
    }

    fn set_row_enabled(&mut self, category: &str, row: &str, enabled: bool) {
        if let Some(row) = self.row_mut(category, row) {
            row.enabled = enabled;
        }
    }

    fn set_row_setting(&mut self, category: &str, row: &str, index: usize, value: bool) {
        if let Some(row) = self.row_mut(category, row) {
            if let Some(setting) = row.settings.get_mut(index) {
                setting.value = value;
            }
        }
    }

    /// Merge a loaded config into the default layout. Unknown categories
    /// and rows in the file are ignored; escape rows never load as enabled.
    pub fn apply_config(&mut self, config: &Config) {
        self.watermark = config.watermark.clone();
        for category in &mut self.categories {
            let Some(saved) = config.category(category.name) else {
                continue;
            };
            if saved.pos_x != 0.0 || saved.pos_y != 0.0 {
                category.pos = [saved.pos_x, saved.pos_y];
            }
            category.scroll = saved.scroll_offset;
            for row in &mut category.rows {
                let Some(state) = saved.modules.iter().find(|m| m.name == row.name) else {
                    continue;
                };
                if !matches!(row.kind, RowKind::Escape(_)) {
                    row.enabled = state.enabled;
                }
                row.expanded = state.expanded;
                row.keybind = state.keybind;
                for (i, setting) in row.settings.iter_mut().enumerate() {
                    if let Some(&value) = state.settings.get(i) {
                        setting.value = value;
                    }
                }
            }
        }
        // The watermark row mirrors the watermark section.
        let enabled = self.watermark.enabled;
        let show_fps = self.watermark.show_fps;
        self.set_row_enabled("Visual", "Watermark", enabled);
        self.set_row_setting("Visual", "Watermark", 0, show_fps);
    }

    pub fn to_config(&self) -> Config {
        let mut config = Config {
            watermark: self.watermark.clone(),
            categories: Vec::new(),
        };
        for category in &self.categories {
            config.categories.push(CategoryState {
                name: category.name.to_owned(),
                pos_x: category.pos[0],
                pos_y: category.pos[1],
                scroll_offset: category.scroll,
                modules: category
                    .rows
                    .iter()
                    .map(|row| ModuleState {
                        name: row.name.to_owned(),
                        // One-shot rows never persist as enabled.
                        enabled: row.enabled && !matches!(row.kind, RowKind::Escape(_)),
                        expanded: row.expanded,
                        keybind: row.keybind,
                        settings: row.settings.iter().map(|s| s.value).collect(),
                    })
                    .collect(),
            });
        }
        config
    }

    /// Push row state into the registry: enabled transitions and settings.
    /// Called once after config load and again whenever rows change.
    pub fn sync_modules(&self, registry: &mut Registry, cx: &mut ModuleCx<'_>) {
        for category in &self.categories {
            for row in &category.rows {
                if row.kind != RowKind::Module {
                    continue;
                }
                registry.set_enabled(row.name, row.enabled, cx);
                for (i, setting) in row.settings.iter().enumerate() {
                    registry.push_setting(row.name, i, setting.value);
                }
            }
        }
    }

    fn fire_row(&mut self, ci: usize, ri: usize, registry: &mut Registry, cx: &mut ModuleCx<'_>) {
        let row = &mut self.categories[ci].rows[ri];
        match row.kind {
            RowKind::Escape(kind) => {
                self.escapes.push(kind);
                audio::play_cue(Cue::On);
            }
            RowKind::Module => {
                row.enabled = !row.enabled;
                audio::play_cue(Cue::for_state(row.enabled));
                registry.set_enabled(row.name, row.enabled, cx);
            }
            RowKind::Stub => {
                row.enabled = !row.enabled;
                audio::play_cue(Cue::for_state(row.enabled));
                if row.name == "Watermark" {
                    self.watermark.enabled = row.enabled;
                }
            }
        }
    }

    /// Per-frame input: keybind capture, bound toggles, window hotkeys.
    pub fn poll_input(
        &mut self,
        keys: &dyn KeySource,
        registry: &mut Registry,
        cx: &mut ModuleCx<'_>,
    ) {
        if let Some((ci, ri)) = self.capture {
            match input::poll_capture(keys) {
                Capture::Pending => return,
                Capture::Cancelled => {}
                Capture::Cleared => self.categories[ci].rows[ri].keybind = 0,
                Capture::Bound(vk) => {
                    self.categories[ci].rows[ri].keybind = vk;
                    tracing::debug!(
                        module = self.categories[ci].rows[ri].name,
                        key = %key_name(vk),
                        "keybind set"
                    );
                }
            }
            self.capture = None;
            return;
        }

        if self.edges.pressed(keys, vk::F1) {
            self.console_visible = !self.console_visible;
        }
        if self.edges.pressed(keys, vk::F7) {
            self.browser_visible = !self.browser_visible;
        }

        let mut fired = Vec::new();
        for (ci, category) in self.categories.iter().enumerate() {
            for (ri, row) in category.rows.iter().enumerate() {
                if row.keybind != 0 && self.edges.pressed(keys, row.keybind) {
                    fired.push((ci, ri));
                }
            }
        }
        for (ci, ri) in fired {
            self.fire_row(ci, ri, registry, cx);
        }
    }

    /// Watermark stage. Each draw stage is called behind its own panic
    /// barrier by the frame pump; a faulting window costs only itself.
    pub fn draw_watermark(&mut self, ui: &imgui::Ui, fps: f32) {
        if !self.watermark.enabled {
            return;
        }
        let show_fps = self.watermark.show_fps;
        let pos = [self.watermark.pos_x, self.watermark.pos_y];
        let mut moved = None;
        ui.window("##watermark")
            .position(pos, Condition::FirstUseEver)
            .title_bar(false)
            .resizable(false)
            .always_auto_resize(true)
            .bg_alpha(0.4)
            .build(|| {
                ui.text_colored([0.7, 0.4, 1.0, 1.0], "grimoire");
                if show_fps {
                    ui.same_line();
                    ui.text(format!("{fps:.0} fps"));
                }
                moved = Some(ui.window_pos());
            });
        if let Some([x, y]) = moved {
            self.watermark.pos_x = x;
            self.watermark.pos_y = y;
        }
    }

    /// Category windows stage.
    pub fn draw_menu(&mut self, ui: &imgui::Ui) {
        if !self.menu_visible {
            return;
        }
        let capture = self.capture;
        for (ci, category) in self.categories.iter_mut().enumerate() {
            let actions = &mut self.actions;
            let mut window_state = None;
            ui.window(category.name)
                .position(category.pos, Condition::FirstUseEver)
                .size(CATEGORY_WINDOW_SIZE, Condition::FirstUseEver)
                .resizable(false)
                .collapsible(false)
                .build(|| {
                    for (ri, row) in category.rows.iter().enumerate() {
                        let armed = capture == Some((ci, ri));
                        let mut checked = row.enabled;
                        if ui.checkbox(format!("{}##{ci}_{ri}", row.name), &mut checked) {
                            actions.push(UiAction::Toggle(ci, ri));
                        }
                        ui.same_line();
                        let bind_label = if armed {
                            "...".to_owned()
                        } else {
                            key_name(row.keybind)
                        };
                        if ui.small_button(format!("{bind_label}##bind_{ci}_{ri}")) {
                            actions.push(UiAction::ArmCapture(ci, ri));
                        }
                        if !row.settings.is_empty() {
                            ui.same_line();
                            let arrow = if row.expanded { "-" } else { "+" };
                            if ui.small_button(format!("{arrow}##exp_{ci}_{ri}")) {
                                actions.push(UiAction::Expand(ci, ri));
                            }
                        }
                        if row.expanded {
                            ui.indent();
                            for (si, setting) in row.settings.iter().enumerate() {
                                let mut value = setting.value;
                                if ui.checkbox(
                                    format!("{}##{ci}_{ri}_{si}", setting.label),
                                    &mut value,
                                ) {
                                    actions.push(UiAction::SetSetting(ci, ri, si, value));
                                }
                            }
                            ui.unindent();
                        }
                    }
                    window_state = Some((ui.window_pos(), ui.scroll_y()));
                });
            if let Some((pos, scroll)) = window_state {
                category.pos = pos;
                category.scroll = scroll;
            }
        }
    }

    /// Item browser stage.
    pub fn draw_browser(&mut self, ui: &imgui::Ui) {
        if !self.browser_visible {
            return;
        }
        let actions = &mut self.actions;
        let mut group = self.browser_group;
        let mut open = true;
        ui.window("Item Browser")
            .size([280.0, 360.0], Condition::FirstUseEver)
            .opened(&mut open)
            .build(|| {
                // Slot 0 is the unfiltered view, groups follow.
                if ui.radio_button_bool("All", group == 0) {
                    group = 0;
                }
                for (gi, g) in ItemGroup::ALL.iter().enumerate() {
                    ui.same_line();
                    if ui.radio_button_bool(g.label(), group == gi + 1) {
                        group = gi + 1;
                    }
                }
                ui.separator();
                let selected = group.checked_sub(1).map(|gi| ItemGroup::ALL[gi]);
                for item in ITEM_CATALOG
                    .iter()
                    .filter(|i| selected.map_or(true, |g| i.group == g))
                {
                    if ui.button(item.label) {
                        actions.push(UiAction::Spawn(item.id));
                    }
                }
            });
        self.browser_group = group;
        if !open {
            self.browser_visible = false;
        }
    }

    /// Debug console stage.
    pub fn draw_console(&mut self, ui: &imgui::Ui) {
        if !self.console_visible {
            return;
        }
        let actions = &mut self.actions;
        let mut open = true;
        ui.window("Console")
            .size([460.0, 240.0], Condition::FirstUseEver)
            .opened(&mut open)
            .build(|| {
                if ui.small_button("Clear") {
                    actions.push(UiAction::ClearConsole);
                }
                ui.separator();
                ui.child_window("##console_lines").build(|| {
                    for line in logging::console_lines() {
                        ui.text_wrapped(&line);
                    }
                    if ui.scroll_y() >= ui.scroll_max_y() {
                        ui.set_scroll_here_y();
                    }
                });
            });
        if !open {
            self.console_visible = false;
        }
    }

    /// Apply the interactions collected by the draw stages.
    pub fn apply_actions(&mut self, registry: &mut Registry, cx: &mut ModuleCx<'_>) {
        let actions = std::mem::take(&mut self.actions);
        for action in actions {
            match action {
                UiAction::Toggle(ci, ri) => self.fire_row(ci, ri, registry, cx),
                UiAction::Expand(ci, ri) => {
                    let row = &mut self.categories[ci].rows[ri];
                    row.expanded = !row.expanded;
                }
                UiAction::ArmCapture(ci, ri) => self.capture = Some((ci, ri)),
                UiAction::SetSetting(ci, ri, si, value) => {
                    let row = &mut self.categories[ci].rows[ri];
                    if let Some(setting) = row.settings.get_mut(si) {
                        setting.value = value;
                    }
                    if row.name == "Watermark" && si == 0 {
                        self.watermark.show_fps = value;
                    }
                    if row.kind == RowKind::Module {
                        registry.push_setting(row.name, si, value);
                    }
                }
                UiAction::Spawn(id) => self.spawns.push(id),
                UiAction::ClearConsole => logging::clear_console(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::test_support::{cx, NoKeys};
    use crate::modules::{EnemyEsp, Invisible, NoClip};
    use std::collections::HashSet;

    fn hud() -> Hud {
        Hud::new(EscapeRequests::new(), SpawnRequests::new())
    }

    struct FakeKeys(HashSet<u32>);

    impl KeySource for FakeKeys {
        fn is_down(&self, vk: u32) -> bool {
            self.0.contains(&vk)
        }
    }

    #[test]
    fn test_default_layout_matches_persisted_names() {
        let hud = hud();
        let config = hud.to_config();
        for name in ["Combat", "Movement", "Render", "Player", "Misc", "Visual", "Escapes"] {
            assert!(config.category(name).is_some(), "missing category {name}");
        }
        let visual = config.category("Visual").unwrap();
        assert!(visual.modules[0].enabled, "watermark defaults on");
        assert_eq!(visual.modules[0].settings, vec![true]);
    }

    #[test]
    fn test_config_round_trip_via_hud() {
        let mut hud = hud();
        hud.set_row_enabled("Movement", "NoClip", true);
        hud.set_row_setting("Movement", "NoClip", 1, true);
        hud.watermark.show_fps = false;

        let saved = crate::config::render(&hud.to_config());
        let mut restored = Hud::new(EscapeRequests::new(), SpawnRequests::new());
        restored.apply_config(&crate::config::parse(&saved));

        let config = restored.to_config();
        let movement = config.category("Movement").unwrap();
        let noclip = movement.modules.iter().find(|m| m.name == "NoClip").unwrap();
        assert!(noclip.enabled);
        assert_eq!(noclip.settings, vec![false, true]);
        assert!(!config.watermark.show_fps);
    }

    #[test]
    fn test_escape_rows_never_persist_enabled() {
        let mut hud = hud();
        hud.set_row_enabled("Escapes", "Door", true);
        let config = hud.to_config();
        let escapes = config.category("Escapes").unwrap();
        assert!(escapes.modules.iter().all(|m| !m.enabled));
    }

    #[test]
    fn test_keybind_fires_module_and_escape_rows() {
        let keys = NoKeys;
        let mut mcx = cx(&keys);
        let mut registry = Registry::new();
        registry.register(Box::new(NoClip::new()));

        let escapes = EscapeRequests::new();
        let mut hud = Hud::new(escapes.clone(), SpawnRequests::new());
        if let Some(row) = hud.row_mut("Movement", "NoClip") {
            row.keybind = vk::KEY_W;
        }
        if let Some(row) = hud.row_mut("Escapes", "Door") {
            row.keybind = vk::KEY_S;
        }

        let pressed = FakeKeys([vk::KEY_W, vk::KEY_S].into_iter().collect());
        hud.poll_input(&pressed, &mut registry, &mut mcx);

        assert!(registry.is_enabled("NoClip"));
        assert!(!escapes.is_empty());
        assert!(!hud.row_mut("Escapes", "Door").unwrap().enabled);

        // Held key must not retrigger.
        hud.poll_input(&pressed, &mut registry, &mut mcx);
        assert!(registry.is_enabled("NoClip"));
    }

    #[test]
    fn test_capture_binds_and_blocks_toggles() {
        let keys = NoKeys;
        let mut mcx = cx(&keys);
        let mut registry = Registry::new();
        let mut hud = hud();
        hud.capture = Some((1, 3)); // Movement / NoClip

        let pressed = FakeKeys([vk::KEY_D].into_iter().collect());
        hud.poll_input(&pressed, &mut registry, &mut mcx);
        assert_eq!(hud.capture, None);
        assert_eq!(hud.row_mut("Movement", "NoClip").unwrap().keybind, vk::KEY_D);

        hud.capture = Some((1, 3));
        let escape = FakeKeys([vk::ESCAPE].into_iter().collect());
        hud.poll_input(&escape, &mut registry, &mut mcx);
        assert_eq!(hud.capture, None);
        assert_eq!(hud.row_mut("Movement", "NoClip").unwrap().keybind, vk::KEY_D);
    }

    #[test]
    fn test_sync_modules_applies_enabled_and_settings() {
        let keys = NoKeys;
        let mut mcx = cx(&keys);
        let mut registry = Registry::new();
        registry.register(Box::new(NoClip::new()));
        registry.register(Box::new(EnemyEsp::new()));
        registry.register(Box::new(Invisible::new()));

        let mut hud = hud();
        hud.set_row_enabled("Player", "Invisible", true);
        hud.sync_modules(&mut registry, &mut mcx);

        assert!(registry.is_enabled("Invisible"));
        assert!(!registry.is_enabled("NoClip"));
    }
}
