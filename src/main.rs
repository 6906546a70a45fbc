use std::path::PathBuf;

use anyhow::{Context, Result};
use listener_monitor::monitor::{MonitorOptions, MonitorOverrides};
use listener_monitor::replay::{self, Trace};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let subscriber_result = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
    if subscriber_result.is_err() {
        // tracing was already initialised; continue silently
    }

    let trace_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: listener-monitor <trace.yaml>")?;

    let config_path = std::env::var("LISTENER_MONITOR_CONFIG")
        .ok()
        .map(PathBuf::from);
    let overrides =
        MonitorOverrides::load(config_path).context("failed to load monitor configuration")?;
    let options = MonitorOptions::default().with_overrides(overrides);

    let trace = Trace::load(&trace_path)
        .with_context(|| format!("failed to load trace {}", trace_path.display()))?;
    let report = replay::run(&trace, options).context("replay failed")?;

    for line in &report.lines {
        println!("{line}");
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("failed to serialise report")?
    );
    Ok(())
}
