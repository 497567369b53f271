//! INI settings persistence
//!
//! The on-disk format is a flat INI: one `[Watermark]` section plus one
//! `[Category_<name>]` section per menu category, with per-module keys of
//! the form `Module_<name>_<field>`. Booleans serialize as `1`/`0` and parse
//! leniently (`1` or `true`). Unknown sections and keys are skipped, so a
//! file written by a newer build loads cleanly in an older one.
//!
//! Settings are positional (`setting_<N>`): reordering a module's settings
//! between builds silently misassigns saved values. Keep setting order
//! stable.

use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),

    #[error("no writable config directory")]
    NoConfigDir,
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// `[Watermark]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkConfig {
    pub enabled: bool,
    pub show_fps: bool,
    pub pos_x: f32,
    pub pos_y: f32,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        WatermarkConfig {
            enabled: true,
            show_fps: true,
            pos_x: 10.0,
            pos_y: 10.0,
        }
    }
}

/// Persisted state of one module row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModuleState {
    pub name: String,
    pub enabled: bool,
    pub expanded: bool,
    /// Virtual-key code; 0 means unbound.
    pub keybind: u32,
    /// Positional boolean settings, index-matched to the module's setting
    /// list at runtime.
    pub settings: Vec<bool>,
}

impl ModuleState {
    pub fn named(name: &str) -> Self {
        ModuleState {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    fn setting_mut(&mut self, index: usize) -> &mut bool {
        if index >= self.settings.len() {
            self.settings.resize(index + 1, false);
        }
        &mut self.settings[index]
    }
}

/// Persisted state of one menu category.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CategoryState {
    pub name: String,
    pub pos_x: f32,
    pub pos_y: f32,
    pub scroll_offset: f32,
    pub modules: Vec<ModuleState>,
}

impl CategoryState {
    fn module_mut(&mut self, name: &str) -> &mut ModuleState {
        if let Some(i) = self.modules.iter().position(|m| m.name == name) {
            return &mut self.modules[i];
        }
        self.modules.push(ModuleState::named(name));
        self.modules.last_mut().unwrap()
    }
}

/// Everything the overlay persists.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Config {
    pub watermark: WatermarkConfig,
    pub categories: Vec<CategoryState>,
}

impl Config {
    pub fn category(&self, name: &str) -> Option<&CategoryState> {
        self.categories.iter().find(|c| c.name == name)
    }

    fn category_mut(&mut self, name: &str) -> &mut CategoryState {
        if let Some(i) = self.categories.iter().position(|c| c.name == name) {
            return &mut self.categories[i];
        }
        self.categories.push(CategoryState {
            name: name.to_owned(),
            ..Default::default()
        });
        self.categories.last_mut().unwrap()
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ModuleKey {
    Enabled,
    Expanded,
    Keybind,
    Setting(usize),
}

/// Split a `Module_<name>_<field>` key. Module names may contain spaces but
/// never underscores, so the field suffix is unambiguous from the right.
fn parse_module_key(key: &str) -> Option<(&str, ModuleKey)> {
    let rest = key.strip_prefix("Module_")?;
    if let Some(name) = rest.strip_suffix("_enabled") {
        return Some((name, ModuleKey::Enabled));
    }
    if let Some(name) = rest.strip_suffix("_expanded") {
        return Some((name, ModuleKey::Expanded));
    }
    if let Some(name) = rest.strip_suffix("_keybind") {
        return Some((name, ModuleKey::Keybind));
    }
    if let Some(at) = rest.rfind("_setting_") {
        let (name, idx) = rest.split_at(at);
        let idx = idx.strip_prefix("_setting_")?.parse().ok()?;
        return Some((name, ModuleKey::Setting(idx)));
    }
    None
}

fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

/// Parse INI text into a [`Config`]. Malformed lines and unknown keys are
/// skipped; an empty string yields the defaults.
pub fn parse(text: &str) -> Config {
    enum Section {
        None,
        Watermark,
        Category(String),
    }

    let mut config = Config::default();
    let mut section = Section::None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            section = if header == "Watermark" {
                Section::Watermark
            } else if let Some(name) = header.strip_prefix("Category_") {
                Section::Category(name.to_owned())
            } else {
                Section::None
            };
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());

        match &section {
            Section::None => {}
            Section::Watermark => match key {
                "enabled" => config.watermark.enabled = parse_bool(value),
                "showFPS" => config.watermark.show_fps = parse_bool(value),
                "posX" => config.watermark.pos_x = value.parse().unwrap_or(0.0),
                "posY" => config.watermark.pos_y = value.parse().unwrap_or(0.0),
                _ => {}
            },
            Section::Category(name) => {
                let category = config.category_mut(name);
                match key {
                    "posX" => category.pos_x = value.parse().unwrap_or(0.0),
                    "posY" => category.pos_y = value.parse().unwrap_or(0.0),
                    "scrollOffset" => category.scroll_offset = value.parse().unwrap_or(0.0),
                    _ => {
                        if let Some((module, field)) = parse_module_key(key) {
                            let state = category.module_mut(module);
                            match field {
                                ModuleKey::Enabled => state.enabled = parse_bool(value),
                                ModuleKey::Expanded => state.expanded = parse_bool(value),
                                ModuleKey::Keybind => state.keybind = value.parse().unwrap_or(0),
                                ModuleKey::Setting(i) => *state.setting_mut(i) = parse_bool(value),
                            }
                        }
                    }
                }
            }
        }
    }
    config
}

/// Render a [`Config`] to INI text in stable order.
pub fn render(config: &Config) -> String {
    use std::fmt::Write;

    let mut out = String::from("; grimoire settings\n");
    let _ = writeln!(out, "[Watermark]");
    let _ = writeln!(out, "enabled={}", bool_str(config.watermark.enabled));
    let _ = writeln!(out, "showFPS={}", bool_str(config.watermark.show_fps));
    let _ = writeln!(out, "posX={}", config.watermark.pos_x);
    let _ = writeln!(out, "posY={}", config.watermark.pos_y);

    for category in &config.categories {
        let _ = writeln!(out, "\n[Category_{}]", category.name);
        let _ = writeln!(out, "posX={}", category.pos_x);
        let _ = writeln!(out, "posY={}", category.pos_y);
        let _ = writeln!(out, "scrollOffset={}", category.scroll_offset);
        for module in &category.modules {
            let _ = writeln!(out, "Module_{}_enabled={}", module.name, bool_str(module.enabled));
            let _ = writeln!(
                out,
                "Module_{}_expanded={}",
                module.name,
                bool_str(module.expanded)
            );
            if module.keybind != 0 {
                let _ = writeln!(out, "Module_{}_keybind={}", module.name, module.keybind);
            }
            for (i, value) in module.settings.iter().enumerate() {
                let _ = writeln!(out, "Module_{}_setting_{}={}", module.name, i, bool_str(*value));
            }
        }
    }
    out
}

/// Filesystem location of the settings file.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        ConfigStore { path: path.into() }
    }

    /// `%APPDATA%\grimoire\config.ini`, falling back to the home config
    /// directory off Windows.
    pub fn default_location() -> ConfigResult<Self> {
        let base = std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config"))
            })
            .ok_or(ConfigError::NoConfigDir)?;
        Ok(ConfigStore {
            path: base.join("grimoire").join("config.ini"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the settings file; `Ok(None)` when it does not exist yet.
    pub fn load(&self) -> ConfigResult<Option<Config>> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(Some(parse(&text))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, config: &Config) -> ConfigResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, render(config))?;
        tracing::debug!(path = %self.path.display(), "settings saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_yields_defaults() {
        let config = parse("");
        assert_eq!(config, Config::default());
        assert!(config.watermark.enabled);
        assert!(config.watermark.show_fps);
    }

    #[test]
    fn test_parse_module_keys() {
        assert_eq!(
            parse_module_key("Module_NoClip_enabled"),
            Some(("NoClip", ModuleKey::Enabled))
        );
        assert_eq!(
            parse_module_key("Module_No Recoil_expanded"),
            Some(("No Recoil", ModuleKey::Expanded))
        );
        assert_eq!(
            parse_module_key("Module_ESP_setting_3"),
            Some(("ESP", ModuleKey::Setting(3)))
        );
        assert_eq!(
            parse_module_key("Module_NoClip_keybind"),
            Some(("NoClip", ModuleKey::Keybind))
        );
        assert_eq!(parse_module_key("posX"), None);
        assert_eq!(parse_module_key("Module_Broken"), None);
    }

    #[test]
    fn test_parse_category_scenario() {
        let text = "\
[Category_Movement]
posX=50
posY=120
scrollOffset=0
Module_NoClip_enabled=1
Module_NoClip_setting_0=0
";
        let config = parse(text);
        let movement = config.category("Movement").unwrap();
        assert_eq!(movement.pos_x, 50.0);
        assert_eq!(movement.pos_y, 120.0);
        let noclip = &movement.modules[0];
        assert_eq!(noclip.name, "NoClip");
        assert!(noclip.enabled);
        assert_eq!(noclip.settings, vec![false]);
    }

    #[test]
    fn test_bool_leniency_and_unknown_keys() {
        let text = "\
[Watermark]
enabled=true
showFPS=0
mystery=7

[Section_Future]
whatever=1
";
        let config = parse(text);
        assert!(config.watermark.enabled);
        assert!(!config.watermark.show_fps);
        assert!(config.categories.is_empty());
    }

    #[test]
    fn test_render_parse_round_trip() {
        let mut config = Config::default();
        config.watermark.show_fps = false;
        config.watermark.pos_x = 24.0;
        let movement = config.category_mut("Movement");
        movement.pos_x = 50.0;
        let noclip = movement.module_mut("NoClip");
        noclip.enabled = true;
        noclip.keybind = 0x56;
        noclip.settings = vec![true, false];
        config.category_mut("Render").module_mut("ESP").expanded = true;

        let reparsed = parse(&render(&config));
        assert_eq!(reparsed, config);
    }

    #[test]
    fn test_store_round_trip_and_double_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::at(dir.path().join("settings.ini"));
        assert!(store.load().unwrap().is_none());

        let mut config = Config::default();
        config.category_mut("Combat").module_mut("Aim").enabled = true;
        store.save(&config).unwrap();

        let first = store.load().unwrap().unwrap();
        let second = store.load().unwrap().unwrap();
        assert_eq!(first, config);
        assert_eq!(first, second);
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::at(dir.path().join("nested").join("deep").join("settings.ini"));
        store.save(&Config::default()).unwrap();
        assert!(store.path().exists());
    }
}
