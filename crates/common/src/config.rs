//! Compute layer configuration: enable gate, device class, platform filters,
//! program source location and build options.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ComputeError;

/// Environment variable names read by [`ComputeConfig::from_env`].
pub mod env {
    /// Presence enables the compute layer.
    pub const ENABLE: &str = "TESSERA_OCL_ENABLE";
    /// Requested device class (see [`DeviceClass::parse`](super::DeviceClass::parse)).
    pub const DEVICE_TYPE: &str = "TESSERA_OCL_DEVICE_TYPE";
    pub const PLATFORM_VENDOR: &str = "TESSERA_OCL_PLATFORM_VENDOR";
    pub const PLATFORM_NAME: &str = "TESSERA_OCL_PLATFORM_NAME";
    /// Directory prepended to the program resource name.
    pub const PROGRAM_SRC_PREFIX: &str = "TESSERA_OCL_PROGRAM_SRC_PREFIX";
    pub const PROGRAM_OPTS: &str = "TESSERA_OCL_PROGRAM_OPTS_COMPOSITE";
    /// Presence enables queue profiling.
    pub const PROFILE: &str = "TESSERA_OCL_PROFILE";
}

/// Default name of the program resource compiled at context creation.
pub const DEFAULT_PROGRAM_NAME: &str = "composite.cl";

/// Coarse device class used when picking a device on the selected platform.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Cpu,
    Gpu,
    Accelerator,
    /// Any device class.
    #[default]
    Any,
}

impl DeviceClass {
    /// Parse a device class name.
    ///
    /// Accepts the short names (`cpu`, `gpu`, `accelerator`, `any`, `all`) in
    /// any case, and the `CL_DEVICE_TYPE_*` spellings. Anything unrecognized,
    /// including `CL_DEVICE_TYPE_DEFAULT`, resolves to [`DeviceClass::Any`].
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        let short = trimmed
            .strip_prefix("CL_DEVICE_TYPE_")
            .unwrap_or(trimmed)
            .to_ascii_lowercase();
        match short.as_str() {
            "cpu" => Self::Cpu,
            "gpu" => Self::Gpu,
            "accelerator" => Self::Accelerator,
            _ => Self::Any,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
            Self::Accelerator => "accelerator",
            Self::Any => "any",
        }
    }
}

/// Compute layer configuration.
///
/// Every field has a default, so partial JSON documents deserialize.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    /// Gates initialization; when false no driver call is made.
    pub enabled: bool,
    pub device_class: DeviceClass,
    /// Substring the platform vendor string must contain.
    pub platform_vendor: Option<String>,
    /// Substring the platform name string must contain.
    pub platform_name: Option<String>,
    /// Root directory for program sources; also added as include paths.
    pub program_src_root: Option<PathBuf>,
    /// Extra compile options passed verbatim to the program build.
    pub build_options: Option<String>,
    /// Enable timestamp capture on the command queue.
    pub profiling: bool,
    /// Program resource name, relative to `program_src_root`.
    pub program_name: String,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            device_class: DeviceClass::Any,
            platform_vendor: None,
            platform_name: None,
            program_src_root: None,
            build_options: None,
            profiling: false,
            program_name: DEFAULT_PROGRAM_NAME.to_string(),
        }
    }
}

impl ComputeConfig {
    /// A configuration with the compute layer switched on and all other
    /// fields at their defaults.
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Build the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// The enable and profile flags are switched on by the mere presence of
    /// their key. Empty filter and path values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        Self {
            enabled: lookup(env::ENABLE).is_some(),
            device_class: lookup(env::DEVICE_TYPE)
                .map(|v| DeviceClass::parse(&v))
                .unwrap_or_default(),
            platform_vendor: non_empty(env::PLATFORM_VENDOR),
            platform_name: non_empty(env::PLATFORM_NAME),
            program_src_root: non_empty(env::PROGRAM_SRC_PREFIX).map(PathBuf::from),
            build_options: lookup(env::PROGRAM_OPTS),
            profiling: lookup(env::PROFILE).is_some(),
            program_name: DEFAULT_PROGRAM_NAME.to_string(),
        }
    }

    /// Parse a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, ComputeError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file.
    pub fn from_json_file(path: &Path) -> Result<Self, ComputeError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Reject configurations that can never load a program.
    pub fn validate(&self) -> Result<(), ComputeError> {
        if self.program_name.trim().is_empty() {
            return Err(ComputeError::Config(
                "program_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Full path of the program resource: the source root joined with the
    /// program name, or the bare program name when no root is configured.
    pub fn program_path(&self) -> PathBuf {
        match &self.program_src_root {
            Some(root) => root.join(&self.program_name),
            None => PathBuf::from(&self.program_name),
        }
    }

    /// Compile options: the configured options string followed by
    /// `-I<root>` and `-I<root>/include` when a source root is set.
    pub fn assembled_build_options(&self) -> String {
        let mut options = self.build_options.clone().unwrap_or_default();
        if let Some(root) = &self.program_src_root {
            let root = root.display();
            options.push_str(&format!(" -I{root} -I{root}/include"));
        }
        options
    }
}
