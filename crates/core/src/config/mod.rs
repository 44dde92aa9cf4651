use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{MascotArError, Result};

/// Top-level configuration structure for a placement session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub throttle: ThrottleConfig,
    pub placement: PlacementConfig,
    pub scene: SceneConfig,
    pub status: StatusConfig,
    pub session: SessionConfig,
}

impl EngineConfig {
    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.throttle.min_interval_ms == 0 {
            return Err(MascotArError::Config(
                "throttle.min_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.placement.marker_text.is_empty() {
            return Err(MascotArError::Config(
                "placement.marker_text must not be empty".to_string(),
            ));
        }
        let distance = self.placement.floating_distance_m;
        if !distance.is_finite() || distance <= 0.0 {
            return Err(MascotArError::Config(
                "placement.floating_distance_m must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Controls how often recognition may be attempted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Minimum spacing between the starts of two recognition attempts.
    pub min_interval_ms: u64,
    /// How long a single recognition may stay in flight before the session
    /// is reported as stalled.
    pub stuck_after_ms: u64,
}

impl ThrottleConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn stuck_after(&self) -> Duration {
        Duration::from_millis(self.stuck_after_ms)
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 500,
            stuck_after_ms: 5_000,
        }
    }
}

/// Parameters for deciding where the object goes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Text that must appear in the recognized spans (case-sensitive).
    pub marker_text: String,
    /// Offset of the floating fallback from the camera, in meters.
    pub floating_distance_m: f32,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            marker_text: "대전".to_string(),
            floating_distance_m: 0.5,
        }
    }
}

/// Describes the object attached to the scene once placement succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Identifier reported to collection bookkeeping when the object is tapped.
    pub object_id: u32,
    pub model_asset: String,
    pub scale_to_units: f32,
    /// Extra yaw applied after look-at; the asset's forward axis is reversed.
    pub yaw_correction_deg: f32,
    pub light: LightConfig,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            object_id: 1001,
            model_asset: "mascot.glb".to_string(),
            scale_to_units: 0.3,
            yaw_correction_deg: 180.0,
            light: LightConfig::default(),
        }
    }
}

/// Directional light added to the scene for the lifetime of the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LightConfig {
    pub color: [f32; 3],
    pub intensity: f32,
    pub direction: [f32; 3],
    pub cast_shadows: bool,
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            color: [1.0, 1.0, 1.0],
            intensity: 100_000.0,
            direction: [0.0, -1.0, -1.0],
            cast_shadows: true,
        }
    }
}

/// User-facing status strings. `{marker}` is replaced with the marker text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub searching: String,
    pub surface_placed: String,
    pub floating_placed: String,
    pub collected: String,
    pub stalled: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            searching: "Point the camera at the '{marker}' text".to_string(),
            surface_placed: "Surface found! Placed on the floor/wall".to_string(),
            floating_placed: "No surface found; placed in the air near the camera".to_string(),
            collected: "Mascot collected!".to_string(),
            stalled: "Text recognition is not responding".to_string(),
        }
    }
}

/// Tracking-session features requested from the host platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub focus_mode: FocusMode,
    pub plane_finding: PlaneFindingMode,
    pub light_estimation: LightEstimationMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusMode {
    #[default]
    Auto,
    Fixed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaneFindingMode {
    Disabled,
    Horizontal,
    Vertical,
    #[default]
    HorizontalAndVertical,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightEstimationMode {
    Disabled,
    AmbientIntensity,
    #[default]
    EnvironmentalHdr,
}

/// Load configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: EngineConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to a TOML file.
pub fn save_config(config: &EngineConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
