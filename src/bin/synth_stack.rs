//! Render the deployment stack as a CloudFormation template.
//!
//! ```text
//! synth-stack --context stack.toml --output cdk.out/template.json --pretty
//! ```
//!
//! `CDK_DEFAULT_ACCOUNT` / `CDK_DEFAULT_REGION` are picked up from the
//! environment (or `.env`) when set.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use virtual_banking_assistant::infra::{self, StackProps};

#[derive(Parser, Debug)]
#[command(name = "synth-stack", about = "Synthesize the Virtual Banking Assistant stack")]
struct Args {
    /// Context file with the VPC configuration
    #[arg(short, long, default_value = "stack.toml")]
    context: PathBuf,

    /// Write the template here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Indent the JSON output
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let props = StackProps::load(&args.context)
        .with_context(|| format!("loading stack context from {}", args.context.display()))?;
    info!(
        stack = %props.stack_name,
        vpc = %props.vpc.vpc_id,
        tls = props.uses_tls(),
        "Synthesizing stack"
    );

    let template = infra::synthesize(&props);
    let rendered = if args.pretty {
        serde_json::to_string_pretty(&template)?
    } else {
        serde_json::to_string(&template)?
    };

    match args.output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            std::fs::write(&path, rendered)
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Template written to {}", path.display());
        }
        None => println!("{}", rendered),
    }

    Ok(())
}
