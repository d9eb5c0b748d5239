//! Mechanism schema inspection

use clap::Args;

use ionmech_core::{MechanismKind, MechanismSchema};

use crate::error::{CliError, CliResult};

/// Show mechanism schemas
#[derive(Args, Debug)]
pub struct DescribeCommand {
    /// Mechanism name or alias (all mechanisms when omitted)
    pub mechanism: Option<String>,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

impl DescribeCommand {
    pub fn execute(self) -> CliResult<()> {
        let kinds: Vec<MechanismKind> = match &self.mechanism {
            Some(name) => vec![MechanismKind::from_name(name)
                .ok_or_else(|| CliError::invalid_args(format!("Unknown mechanism '{}'", name)))?],
            None => MechanismKind::ALL.to_vec(),
        };

        if self.json {
            let schemas: Vec<_> = kinds.iter().map(|k| schema_json(k.schema())).collect();
            println!("{}", serde_json::to_string_pretty(&schemas)?);
            return Ok(());
        }

        let detailed = self.mechanism.is_some();
        for kind in kinds {
            print_schema(kind.schema(), detailed);
        }
        Ok(())
    }
}

fn print_schema(schema: &MechanismSchema, detailed: bool) {
    let ion = schema.ion.map(|i| format!(", ion {}", i.name())).unwrap_or_default();
    println!("{} ({:?}{})", schema.name, schema.category, ion);
    if !detailed {
        let params: Vec<_> = schema.parameters.iter().map(|p| p.name).collect();
        let states: Vec<_> = schema.states.iter().map(|s| s.name).collect();
        println!("  parameters: {}", params.join(", "));
        println!("  states: {}", states.join(", "));
        return;
    }

    println!("  parameters:");
    for p in schema.parameters {
        match p.limits {
            Some((lo, hi)) => println!("    {} = {} {} in [{}, {}]", p.name, p.default, p.unit, lo, hi),
            None => println!("    {} = {} {}", p.name, p.default, p.unit),
        }
    }
    println!("  states:");
    for s in schema.states {
        println!("    {} ({})", s.name, s.unit);
    }
    if !schema.derived.is_empty() {
        println!("  derived: {}", schema.derived.join(", "));
    }
    println!("  storage: {} slots", schema.storage_size());
}

fn schema_json(schema: &MechanismSchema) -> serde_json::Value {
    let parameters: Vec<_> = schema
        .parameters
        .iter()
        .map(|p| {
            serde_json::json!({
                "name": p.name,
                "unit": p.unit,
                "default": p.default,
                "limits": p.limits.map(|(lo, hi)| [lo, hi]),
            })
        })
        .collect();
    let states: Vec<_> = schema
        .states
        .iter()
        .map(|s| serde_json::json!({ "name": s.name, "unit": s.unit, "abs_tol": s.abs_tol }))
        .collect();

    serde_json::json!({
        "name": schema.name,
        "kind": schema.kind,
        "category": schema.category,
        "ion": schema.ion,
        "parameters": parameters,
        "states": states,
        "derived": schema.derived,
        "storage_size": schema.storage_size(),
    })
}
