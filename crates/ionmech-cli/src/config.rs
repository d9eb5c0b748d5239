//! Configuration management for the ionmech CLI
//!
//! Two files are involved: the user-level [`CliConfig`] (log level, default
//! output format) and the per-run [`SimulationConfig`] that describes one
//! compartment, its mechanisms and the external events it receives.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use ionmech_core::{
    ClampWaveform, Compartment, DriverParams, Geometry, InstanceId, IonPools, IonSpecies,
    KernelConfig, MechanismKind, MechanismRegistry, ParameterSet, TableDomain, TableSettings, Q10,
};

use crate::error::{CliError, CliResult};

/// Global CLI configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Default logging level
    pub log_level: Option<String>,

    /// User preferences
    pub preferences: UserPreferences,
}

/// Output preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPreferences {
    /// Default trace format (`json` or `csv`)
    pub output_format: String,

    /// Threshold used when counting action potentials in summaries (mV)
    pub spike_threshold: f64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            preferences: UserPreferences::default(),
        }
    }
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            output_format: "json".to_string(),
            spike_threshold: 0.0,
        }
    }
}

impl CliConfig {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> CliResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content).map_err(|e| CliError::config(format!("Invalid config file: {}", e)))
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &Path) -> CliResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CliError::config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> CliResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CliError::config("Could not determine config directory"))?;
        Ok(config_dir.join("ionmech").join("config.toml"))
    }

    /// Load from `path`, or from the default location when none is given
    pub fn resolve(path: Option<&Path>) -> CliResult<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => match Self::default_config_path() {
                Ok(path) => Self::load_from_file(&path),
                Err(_) => Ok(Self::default()),
            },
        }
    }
}

/// Kernel settings of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelSection {
    /// Seed for stochastic generators
    pub seed: u64,
    /// Use rate tables for voltage-gated channels
    pub tables: bool,
    /// Rate table grid
    pub domain: TableDomain,
    /// Temperature scaling applied to every voltage-gated rate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q10: Option<Q10>,
}

impl Default for KernelSection {
    fn default() -> Self {
        Self {
            seed: 42,
            tables: true,
            domain: TableDomain::default(),
            q10: None,
        }
    }
}

/// Reversal potentials of the compartment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IonSection {
    /// Sodium reversal (mV)
    pub ena: f64,
    /// Potassium reversal (mV)
    pub ek: f64,
}

impl Default for IonSection {
    fn default() -> Self {
        Self {
            ena: IonSpecies::Na.default_reversal(),
            ek: IonSpecies::K.default_reversal(),
        }
    }
}

/// One mechanism placed on the compartment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MechanismEntry {
    /// Mechanism name or alias (`leak`, `na`, `k`, `nmda`, `iclamp`, `netstim`)
    pub kind: String,
    /// Parameter overrides
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, f64>,
    /// Clamp waveform, only read for current clamps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waveform: Option<ClampWaveform>,
}

impl MechanismEntry {
    /// Entry with default parameters
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            parameters: BTreeMap::new(),
            waveform: None,
        }
    }

    /// Add a parameter override
    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.parameters.insert(name.to_string(), value);
        self
    }

    /// Resolved kind
    pub fn resolve_kind(&self) -> CliResult<MechanismKind> {
        MechanismKind::from_name(&self.kind)
            .ok_or_else(|| CliError::config(format!("Unknown mechanism '{}'", self.kind)))
    }

    /// Parameter set with overrides applied
    pub fn parameter_set(&self) -> CliResult<ParameterSet> {
        let mut params = ParameterSet::defaults(self.resolve_kind()?);
        for (name, value) in &self.parameters {
            params.set(name, *value)?;
        }
        Ok(params)
    }
}

/// External event delivered to a mechanism
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EventEntry {
    /// Index into `mechanisms`
    pub target: usize,
    /// Delivery time (ms)
    pub time: f64,
    /// Connection weight
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// Complete description of one driver run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SimulationConfig {
    /// Membrane geometry
    pub compartment: Geometry,
    /// Run control
    pub run: DriverParams,
    /// Kernel settings
    pub kernel: KernelSection,
    /// Reversal potentials
    pub ions: IonSection,
    /// Mechanisms in placement order
    pub mechanisms: Vec<MechanismEntry>,
    /// External events
    pub events: Vec<EventEntry>,
}

impl SimulationConfig {
    /// Hodgkin-Huxley patch driven by a constant current step
    pub fn template() -> Self {
        Self {
            run: DriverParams {
                tstop: 50.0,
                ..DriverParams::default()
            },
            mechanisms: vec![
                MechanismEntry::new("leak"),
                MechanismEntry::new("na"),
                MechanismEntry::new("k"),
                MechanismEntry {
                    waveform: Some(ClampWaveform::Constant),
                    ..MechanismEntry::new("iclamp")
                        .with("del", 5.0)
                        .with("dur", 40.0)
                        .with("amp", 0.1)
                },
            ],
            ..Self::default()
        }
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> CliResult<Self> {
        if !path.exists() {
            return Err(CliError::missing_resource(format!(
                "Simulation config not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> CliResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| CliError::config(format!("Failed to serialize config: {}", e)))
    }

    /// Kernel configuration for the registry
    pub fn kernel_config(&self) -> KernelConfig {
        let settings = TableSettings {
            enabled: self.kernel.tables,
            domain: self.kernel.domain,
        };
        KernelConfig::new()
            .with_table(MechanismKind::KConductance, settings)
            .with_table(MechanismKind::NaConductance, settings)
            .with_seed(self.kernel.seed)
    }

    /// Check everything that can be checked before building
    pub fn validate(&self) -> CliResult<()> {
        self.compartment.validate()?;
        self.run.validate()?;
        if self.mechanisms.is_empty() {
            return Err(CliError::config("No mechanisms configured"));
        }
        for entry in &self.mechanisms {
            entry.parameter_set()?;
        }
        for event in &self.events {
            if event.target >= self.mechanisms.len() {
                return Err(CliError::config(format!(
                    "Event at t={} targets mechanism {} but only {} are configured",
                    event.time,
                    event.target,
                    self.mechanisms.len()
                )));
            }
        }
        Ok(())
    }

    /// Build the compartment described by this configuration
    pub fn build(&self) -> CliResult<Compartment> {
        self.validate()?;
        let mut registry = MechanismRegistry::new(self.kernel_config())?;
        if let Some(q10) = self.kernel.q10 {
            for kind in [MechanismKind::KConductance, MechanismKind::NaConductance] {
                let scaled = match registry.kinetics(kind) {
                    Some(kinetics) => kinetics.with_q10(q10.factor, q10.reference_celsius)?,
                    None => continue,
                };
                registry.set_kinetics(scaled)?;
            }
        }
        let ions = IonPools::new()
            .with_reversal(IonSpecies::Na, self.ions.ena)
            .with_reversal(IonSpecies::K, self.ions.ek);
        let mut cell = Compartment::new(self.compartment, self.run.clone())?.with_ions(ions);

        for entry in &self.mechanisms {
            let params = entry.parameter_set()?;
            let waveform = entry.waveform.unwrap_or_default();
            cell.add(registry.instantiate_with_waveform(&params, waveform)?);
        }
        for event in &self.events {
            cell.schedule(InstanceId(event.target), event.time, event.weight)?;
        }
        Ok(cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ionmech_core::MechanismInstance;

    #[test]
    fn test_template_roundtrip() {
        let config = SimulationConfig::template();
        let text = config.to_toml().unwrap();
        let parsed: SimulationConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
        assert!(parsed.build().is_ok());
    }

    #[test]
    fn test_minimal_file_uses_defaults() {
        let text = r#"
            [[mechanisms]]
            kind = "leak"
            parameters = { gmax = 0.001 }
        "#;
        let config: SimulationConfig = toml::from_str(text).unwrap();
        assert_eq!(config.run, DriverParams::default());
        assert_eq!(config.kernel.seed, 42);
        assert_eq!(config.mechanisms[0].parameters["gmax"], 0.001);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_mechanism_rejected() {
        let config = SimulationConfig {
            mechanisms: vec![MechanismEntry::new("hcn")],
            ..SimulationConfig::default()
        };
        assert!(matches!(config.validate(), Err(CliError::Config(_))));
    }

    #[test]
    fn test_unknown_parameter_rejected() {
        let config = SimulationConfig {
            mechanisms: vec![MechanismEntry::new("leak").with("tau", 1.0)],
            ..SimulationConfig::default()
        };
        assert!(matches!(config.validate(), Err(CliError::Mechanism(_))));
    }

    #[test]
    fn test_event_target_checked() {
        let config = SimulationConfig {
            mechanisms: vec![MechanismEntry::new("nmda")],
            events: vec![EventEntry { target: 1, time: 2.0, weight: 1.0 }],
            ..SimulationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_config_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = CliConfig::load_from_file(&path).unwrap();
        assert_eq!(config, CliConfig::default());

        config.save_to_file(&path).unwrap();
        assert_eq!(CliConfig::load_from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_q10_reaches_channel_kinetics() {
        let text = r#"
            [kernel.q10]
            factor = 3.0
            reference_celsius = 6.3

            [[mechanisms]]
            kind = "na"

            [[mechanisms]]
            kind = "leak"
        "#;
        let config: SimulationConfig = toml::from_str(text).unwrap();
        let cell = config.build().unwrap();
        match cell.instance(InstanceId(0)).unwrap() {
            MechanismInstance::VoltageGated(na) => {
                for gate in na.kinetics().gates() {
                    assert_eq!(gate.q10, Some(Q10 { factor: 3.0, reference_celsius: 6.3 }));
                }
            }
            other => panic!("unexpected instance {:?}", other),
        }

        let bad = SimulationConfig {
            kernel: KernelSection {
                q10: Some(Q10 { factor: -1.0, reference_celsius: 6.3 }),
                ..KernelSection::default()
            },
            mechanisms: vec![MechanismEntry::new("k")],
            ..SimulationConfig::default()
        };
        assert!(matches!(bad.build(), Err(CliError::Mechanism(_))));
    }
}
