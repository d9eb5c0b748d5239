//! Explicit kernel configuration
//!
//! Settings that generated mechanism code keeps in process-wide globals
//! (`usetable_<mech>`, the table grid) are passed to the registry here,
//! one entry per mechanism kind.

use std::collections::BTreeMap;

use crate::{error::*, mechanism::MechanismKind, table::TableDomain};

/// Rate-table settings for one mechanism kind
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TableSettings {
    /// Use the interpolation table instead of direct evaluation
    pub enabled: bool,
    /// Grid the table is sampled on
    pub domain: TableDomain,
}

impl Default for TableSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            domain: TableDomain::default(),
        }
    }
}

impl TableSettings {
    /// Direct evaluation on every call
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Validate the grid
    pub fn validate(&self) -> Result<()> {
        self.domain.validate()
    }
}

/// Configuration shared by every instance the registry creates
#[derive(Debug, Clone, PartialEq, Default)]
pub struct KernelConfig {
    /// Per-kind table overrides; kinds without an entry use the default
    pub tables: BTreeMap<MechanismKind, TableSettings>,
    /// Seed for generators that draw random intervals
    pub seed: u64,
}

impl KernelConfig {
    /// Configuration with default tables
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the table settings of `kind`
    pub fn with_table(mut self, kind: MechanismKind, settings: TableSettings) -> Self {
        self.tables.insert(kind, settings);
        self
    }

    /// Enable or disable tables for every tabulated kind
    pub fn with_tables_enabled(mut self, enabled: bool) -> Self {
        for kind in [MechanismKind::KConductance, MechanismKind::NaConductance] {
            let mut settings = self.table(kind);
            settings.enabled = enabled;
            self.tables.insert(kind, settings);
        }
        self
    }

    /// Set the random seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Table settings of `kind`
    pub fn table(&self, kind: MechanismKind) -> TableSettings {
        self.tables.get(&kind).copied().unwrap_or_default()
    }

    /// Validate every override
    pub fn validate(&self) -> Result<()> {
        for (kind, settings) in &self.tables {
            settings.validate().map_err(|e| {
                MechanismError::invalid_config(format!("{} table: {}", kind, e))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tables() {
        let config = KernelConfig::new();
        let table = config.table(MechanismKind::KConductance);
        assert!(table.enabled);
        assert_eq!(table.domain.n_knots, 401);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_table_overrides() {
        let config = KernelConfig::new()
            .with_tables_enabled(false)
            .with_table(MechanismKind::NaConductance, TableSettings::default());
        assert!(!config.table(MechanismKind::KConductance).enabled);
        assert!(config.table(MechanismKind::NaConductance).enabled);

        let bad = KernelConfig::new().with_table(
            MechanismKind::KConductance,
            TableSettings {
                enabled: true,
                domain: TableDomain { v_min: 0.0, v_max: 0.0, n_knots: 10 },
            },
        );
        assert!(bad.validate().is_err());
    }
}
