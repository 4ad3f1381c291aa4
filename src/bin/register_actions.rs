//! One-shot CLI: publish the controller's task names into the external
//! orchestrator's action catalog for a given provisioner. Grounded on
//! `original_source/.../register_tc_actions.py` (invoked by hand or from
//! a deploy hook, takes the provisioner id as its only argument) and the
//! teacher's `src/bin/*.rs` convention of small, self-contained CLI
//! entry points built with `clap`.

use clap::Parser;

use hardware_recovery_controller::config::Config;
use hardware_recovery_controller::registrar::Registrar;

#[derive(Parser, Debug)]
#[command(name = "register-actions", about = "Publish hardware-recovery actions to the orchestrator's catalog")]
struct Args {
    /// The worker-pool provisioner id to declare actions for, e.g. "releng-hardware".
    provisioner_id: String,

    /// This controller's own externally-reachable base URL, e.g.
    /// "https://hwrecovery.example.net/". Embedded in each catalog
    /// entry's `url` field so the orchestrator knows where to POST jobs.
    base_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(
            |_| tracing_subscriber::EnvFilter::new("info"),
        ))
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;

    let declare_provisioner_url = format!(
        "{}/queue/v1/provisioners/{}/declare",
        config.orchestrator_base_url.trim_end_matches('/'),
        args.provisioner_id,
    );
    let registrar = Registrar::new(declare_provisioner_url);

    registrar
        .register(&args.base_url, &args.provisioner_id, &config.task_names)
        .await?;

    tracing::info!(provisioner_id = %args.provisioner_id, task_names = ?config.task_names, "registered hardware-recovery actions");

    Ok(())
}
