//! Configuration types for the Lagrangian pipeline.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while validating or loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("mass fraction list is empty")]
    EmptyMassFraction,

    #[error("mass fraction {value} at position {index} is outside (0, 1)")]
    FractionOutOfRange { index: usize, value: f64 },

    #[error("mass fractions must be strictly increasing: {previous} is followed by {value}")]
    FractionNotIncreasing { previous: f64, value: f64 },

    #[error("neighbor count must be at least 1")]
    ZeroNeighborCount,

    #[error("unknown average mode '{0}' (expected 'sphere' or 'shell')")]
    UnknownAverageMode(String),

    #[error("unknown center method '{0}' (expected 'density' or 'potential')")]
    UnknownCenterMethod(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Ordered mass fractions used to define Lagrangian radii.
///
/// Always non-empty, strictly increasing and inside the open interval (0, 1).
/// The bin count of every table built from it is `len() + 1`; the extra bin
/// holds the core radius.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct MassFractions(Vec<f64>);

impl MassFractions {
    /// Validate and wrap a list of fractions.
    pub fn new(values: Vec<f64>) -> Result<Self, ConfigError> {
        if values.is_empty() {
            return Err(ConfigError::EmptyMassFraction);
        }
        for (index, &value) in values.iter().enumerate() {
            if !(value > 0.0 && value < 1.0) {
                return Err(ConfigError::FractionOutOfRange { index, value });
            }
        }
        for pair in values.windows(2) {
            if pair[1] <= pair[0] {
                return Err(ConfigError::FractionNotIncreasing {
                    previous: pair[0],
                    value: pair[1],
                });
            }
        }
        Ok(Self(values))
    }

    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Number of mass fractions.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Width of one Lagrangian row group: one entry per fraction plus the core radius.
    #[inline]
    pub fn n_bins(&self) -> usize {
        self.0.len() + 1
    }

    /// Column labels for one row group, fractions first then `rc`.
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.0.iter().map(|f| f.to_string()).collect();
        labels.push("rc".to_string());
        labels
    }
}

impl Default for MassFractions {
    fn default() -> Self {
        Self(vec![0.1, 0.3, 0.5, 0.7, 0.9])
    }
}

impl TryFrom<Vec<f64>> for MassFractions {
    type Error = ConfigError;

    fn try_from(values: Vec<f64>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<MassFractions> for Vec<f64> {
    fn from(fractions: MassFractions) -> Self {
        fractions.0
    }
}

/// How per-bin statistics are aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AverageMode {
    /// From the centre out to each Lagrangian radius.
    #[default]
    Sphere,
    /// Between two neighbouring Lagrangian radii.
    Shell,
}

impl FromStr for AverageMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sphere" => Ok(Self::Sphere),
            "shell" => Ok(Self::Shell),
            other => Err(ConfigError::UnknownAverageMode(other.to_string())),
        }
    }
}

impl fmt::Display for AverageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sphere => write!(f, "sphere"),
            Self::Shell => write!(f, "shell"),
        }
    }
}

/// Weighting used to locate the cluster centre.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CenterMethod {
    /// Nearest-neighbour density weighting (Casertano & Hut 1985).
    #[default]
    Density,
    /// Potential weighting over bound singles and all binaries.
    Potential,
}

impl FromStr for CenterMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "density" => Ok(Self::Density),
            "potential" => Ok(Self::Potential),
            other => Err(ConfigError::UnknownCenterMethod(other.to_string())),
        }
    }
}

impl fmt::Display for CenterMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Density => write!(f, "density"),
            Self::Potential => write!(f, "potential"),
        }
    }
}

/// Configuration for Lagrangian radii computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LagrangianConfig {
    /// Mass fractions defining the Lagrangian radii
    #[serde(default)]
    pub mass_fraction: MassFractions,

    /// Sphere or shell averaging
    #[serde(default)]
    pub average_mode: AverageMode,

    /// Neighbours queried per particle for the local density estimate
    #[serde(default = "default_neighbor_count")]
    pub neighbor_count: usize,
}

fn default_neighbor_count() -> usize {
    6
}

impl Default for LagrangianConfig {
    fn default() -> Self {
        Self {
            mass_fraction: MassFractions::default(),
            average_mode: AverageMode::default(),
            neighbor_count: default_neighbor_count(),
        }
    }
}

impl LagrangianConfig {
    /// Check the fields serde cannot validate on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.neighbor_count == 0 {
            return Err(ConfigError::ZeroNeighborCount);
        }
        Ok(())
    }
}

/// Configuration for centre determination.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CenterConfig {
    #[serde(default)]
    pub method: CenterMethod,
}

/// Configuration for batch processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Worker threads, 0 uses the rayon default
    #[serde(default)]
    pub threads: usize,

    /// Prefix of output files: `<prefix>.lagr.csv`, `<prefix>.core.csv`
    #[serde(default = "default_filename_prefix")]
    pub filename_prefix: String,
}

fn default_filename_prefix() -> String {
    "data".to_string()
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            filename_prefix: default_filename_prefix(),
        }
    }
}

/// Main pipeline configuration combining all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub lagrangian: LagrangianConfig,

    #[serde(default)]
    pub center: CenterConfig,

    #[serde(default)]
    pub processing: ProcessingConfig,
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        config.lagrangian.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
