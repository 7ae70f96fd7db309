// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::Path;

use crate::backend::{DeviceSettings, GraphicsPipelineOptions, RendererSettings};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub shaders: ShaderConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Renderer".to_string(),
            width: 1280,
            height: 720,
            resizable: true,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub clear_color: [f32; 4],
    /// At least double buffering; clamped to what the surface supports
    pub swapchain_images: u32,
    pub frames_in_flight: u32,
    /// "none", "front", "back" or "front_and_back"
    pub cull_mode: String,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.1, 0.1, 0.15, 1.0],
            swapchain_images: 2,
            frames_in_flight: 1,
            cull_mode: "none".to_string(),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "vulkan_debug.log".to_string(),
            show_fps: true,
        }
    }
}

/// Where compiled SPIR-V lives
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub directory: String,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            directory: "shaders".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Get cull mode as Vulkan flags
    pub fn cull_mode(&self) -> vk::CullModeFlags {
        match self.graphics.cull_mode.to_lowercase().as_str() {
            "none" => vk::CullModeFlags::NONE,
            "front" => vk::CullModeFlags::FRONT,
            "back" => vk::CullModeFlags::BACK,
            "front_and_back" => vk::CullModeFlags::FRONT_AND_BACK,
            _ => {
                log::warn!(
                    "Unknown cull mode '{}', defaulting to none",
                    self.graphics.cull_mode
                );
                vk::CullModeFlags::NONE
            }
        }
    }

    pub fn device_settings(&self) -> DeviceSettings {
        DeviceSettings {
            app_name: self.window.title.clone(),
            enable_validation: self.debug.validation_layers,
            ..Default::default()
        }
    }

    pub fn renderer_settings(&self) -> RendererSettings {
        RendererSettings {
            swapchain_images: self.graphics.swapchain_images.max(2),
            frames_in_flight: self.graphics.frames_in_flight.max(1),
        }
    }

    pub fn pipeline_options(&self) -> GraphicsPipelineOptions {
        GraphicsPipelineOptions {
            cull_mode: self.cull_mode(),
            ..Default::default()
        }
    }
}
