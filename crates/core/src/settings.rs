//! The user settings record
//!
//! Loaded once at startup (absence is fatal), written back in full on every
//! update and re-read afterwards to confirm the write landed.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::SettingsError;

pub const SETTINGS_FILE: &str = "settings.json";

/// Longest username the rest of the system will render.
pub const MAX_USERNAME_LEN: usize = 16;

const COLOR_COUNT: usize = 11;

/// The ordered set of named interface colors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorScheme {
    pub color1: String,
    pub color2: String,
    pub color3: String,
    pub color4: String,
    pub color5: String,
    pub color6: String,
    pub color7: String,
    pub color8: String,
    pub color9: String,
    pub color10: String,
    pub color11: String,
}

impl ColorScheme {
    /// Build a scheme from exactly eleven color values, in order.
    pub fn from_slice(colors: &[String]) -> Result<Self, SettingsError> {
        if colors.len() != COLOR_COUNT {
            return Err(SettingsError::ColorCount {
                expected: COLOR_COUNT,
                got: colors.len(),
            });
        }
        Ok(Self {
            color1: colors[0].clone(),
            color2: colors[1].clone(),
            color3: colors[2].clone(),
            color4: colors[3].clone(),
            color5: colors[4].clone(),
            color6: colors[5].clone(),
            color7: colors[6].clone(),
            color8: colors[7].clone(),
            color9: colors[8].clone(),
            color10: colors[9].clone(),
            color11: colors[10].clone(),
        })
    }

    /// The colors in order, as passed around the settings form.
    pub fn to_vec(&self) -> Vec<String> {
        vec![
            self.color1.clone(),
            self.color2.clone(),
            self.color3.clone(),
            self.color4.clone(),
            self.color5.clone(),
            self.color6.clone(),
            self.color7.clone(),
            self.color8.clone(),
            self.color9.clone(),
            self.color10.clone(),
            self.color11.clone(),
        ]
    }
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self {
            color1: "#1e1e2e".to_string(),
            color2: "#181825".to_string(),
            color3: "#313244".to_string(),
            color4: "#cdd6f4".to_string(),
            color5: "#a6adc8".to_string(),
            color6: "#89b4fa".to_string(),
            color7: "#45475a".to_string(),
            color8: "#585b70".to_string(),
            color9: "#94e2d5".to_string(),
            color10: "#11111b".to_string(),
            color11: "#f38ba8".to_string(),
        }
    }
}

/// Settings fields updated together from the settings form, next to the
/// color scheme.
#[derive(Debug, Clone)]
pub struct MiscSettings {
    pub username: String,
    pub status: String,
    pub internal_server_port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub username: String,
    pub status: String,
    pub avatar: String,
    #[serde(rename = "internalServerPort")]
    pub internal_server_port: u16,
    #[serde(rename = "colorScheme")]
    pub color_scheme: ColorScheme,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            username: "anonymous".to_string(),
            status: String::new(),
            avatar: "None".to_string(),
            internal_server_port: 42715,
            color_scheme: ColorScheme::default(),
        }
    }
}

impl Settings {
    /// Load the settings record. A missing file is an error the caller must
    /// treat as fatal; there is no implicit default at startup.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Err(SettingsError::Missing(path.to_path_buf()));
        }
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write the full record, then read it back and compare to confirm the
    /// write is consistent on disk.
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;

        let reread = Self::load(path)?;
        if reread != *self {
            return Err(SettingsError::WritebackMismatch);
        }
        Ok(())
    }

    /// Replace the form-editable fields and persist the whole record.
    pub fn update(
        &mut self,
        misc: MiscSettings,
        colors: &[String],
        path: &Path,
    ) -> Result<(), SettingsError> {
        if misc.username.chars().count() > MAX_USERNAME_LEN {
            return Err(SettingsError::UsernameTooLong(MAX_USERNAME_LEN));
        }
        let scheme = ColorScheme::from_slice(colors)?;

        self.username = misc.username;
        self.status = misc.status;
        self.internal_server_port = misc.internal_server_port;
        self.color_scheme = scheme;

        self.save(path)
    }
}
