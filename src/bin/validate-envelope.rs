use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use std::{fs, path::PathBuf};
use telemetry_intake::codec;
use telemetry_intake::schema::SchemaValidator;

/// Validate a telemetry envelope against the v1 schema and show what would be stored.
#[derive(Parser, Debug)]
#[command(name = "validate-envelope", version, about = "Validate telemetry envelope JSON against schema")]
struct Cli {
    /// Path to the envelope file (JSON, or a codec token with --key)
    path: PathBuf,

    /// Optional path to a schema file (defaults to the bundled telemetry.v1 schema)
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Treat the file as a token obfuscated under this key
    #[arg(long)]
    key: Option<String>,
}

fn load_instance(args: &Cli) -> Result<Value> {
    let data = fs::read_to_string(&args.path)
        .with_context(|| format!("Failed to read {}", args.path.display()))?;
    let text = match &args.key {
        Some(key) => codec::decode(&data, Some(key)).context("Failed to decode token")?,
        None => data,
    };
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse JSON in {}", args.path.display()))
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let validator = match &args.schema {
        Some(path) => {
            let source = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            SchemaValidator::from_source(&source)
        }
        None => SchemaValidator::telemetry_v1(),
    }
    .context("Failed to compile JSON Schema")?;

    let instance = load_instance(&args)?;

    match validator.check(instance) {
        Ok(envelope) => {
            println!("valid");
            println!("{}", serde_json::to_string_pretty(&envelope)?);
            Ok(())
        }
        Err(violations) => {
            eprintln!("invalid:");
            for v in violations {
                eprintln!("- {} [{}] at {}", v.message, v.rule, v.path);
            }
            std::process::exit(1)
        }
    }
}
