use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use kestrel_api::{ApiConfig, InProcApi, KestrelApi, OrphanPlan, RequestScope};
use kestrel_core::{ControllerKind, DataSelect, DeletionResult, DetailView, KestrelError};

#[derive(Parser, Debug)]
#[command(name = "kestrelctl", version, about = "Inspect and delete workload controllers")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubernetes namespace
    #[arg(long = "ns", global = true, default_value = "default")]
    namespace: String,

    /// Request deadline in seconds (0 disables; default from KESTREL_REQUEST_TIMEOUT_SECS)
    #[arg(long = "timeout-secs", global = true)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json, Yaml }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show a controller with its pods, events, services and usage
    Detail {
        /// job | daemonset (ds) | replicaset (rs)
        kind: String,
        name: String,
        /// Cap on listed pods and events
        #[arg(long = "limit")]
        limit: Option<u32>,
    },
    /// Delete a controller together with the services only it selected
    Delete {
        kind: String,
        name: String,
        /// Print what would be deleted without deleting
        #[arg(long = "dry-run", action = ArgAction::SetTrue)]
        dry_run: bool,
    },
    /// List services that deleting a controller would orphan
    Orphans { kind: String, name: String },
}

fn init_tracing() {
    let env = std::env::var("KESTREL_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KESTREL_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KESTREL_METRICS_ADDR; expected host:port");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let mut config = ApiConfig::from_env();
    if let Some(secs) = cli.timeout_secs {
        config.request_timeout = if secs == 0 { None } else { Some(Duration::from_secs(secs)) };
    }
    let api = InProcApi::connect(config).await?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; cancelling request");
                cancel.cancel();
            }
        }
    });
    let scope = api.scope().with_cancel(cancel);
    let ns = cli.namespace.as_str();

    let code = match cli.command {
        Commands::Detail { kind, name, limit } => {
            let kind = ControllerKind::from_str(&kind)?;
            info!(kind = %kind, name = %name, ns = %ns, "detail invoked");
            let select = limit.map(DataSelect::with_limit).unwrap_or_default();
            match api.get_detail(&scope, kind, ns, &name, select).await {
                Ok(view) => {
                    emit(cli.output, &view, print_detail)?;
                    0
                }
                Err(e) => fail("detail", e),
            }
        }
        Commands::Orphans { kind, name } => {
            let kind = ControllerKind::from_str(&kind)?;
            info!(kind = %kind, name = %name, ns = %ns, "orphans invoked");
            match api.plan_orphans(&scope, kind, ns, &name).await {
                Ok(plan) => {
                    emit(cli.output, &plan, print_plan)?;
                    0
                }
                Err(e) => fail("orphans", e),
            }
        }
        Commands::Delete { kind, name, dry_run } => {
            let kind = ControllerKind::from_str(&kind)?;
            info!(kind = %kind, name = %name, ns = %ns, dry_run, "delete invoked");
            if dry_run {
                match api.plan_orphans(&scope, kind, ns, &name).await {
                    Ok(plan) => {
                        emit(cli.output, &plan, print_plan)?;
                        0
                    }
                    Err(e) => fail("delete", e),
                }
            } else {
                match api.delete_with_reconciliation(&scope, kind, ns, &name).await {
                    Ok(res) => {
                        emit(cli.output, &res, print_deletion)?;
                        if res.is_fully_cleaned() { 0 } else { 2 }
                    }
                    Err(e) => fail("delete", e),
                }
            }
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn fail(op: &str, e: KestrelError) -> i32 {
    error!(error = %e, "{} failed", op);
    eprintln!("{} error: {}", op, e);
    match e {
        KestrelError::PartialDeleteFailure { .. } => 2,
        KestrelError::Cancelled => 130,
        _ => 1,
    }
}

fn emit<T: Serialize>(output: Output, value: &T, human: fn(&T)) -> Result<()> {
    match output {
        Output::Human => human(value),
        Output::Json => println!("{}", serde_json::to_string_pretty(value)?),
        Output::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

fn print_detail(v: &DetailView) {
    println!("{} {}  age {}", v.meta.kind, v.meta.identity, render_age(v.meta.creation_timestamp));
    if !v.meta.labels.is_empty() {
        let labels: Vec<String> = v.meta.labels.iter().map(|(k, val)| format!("{}={}", k, val)).collect();
        println!("labels: {}", labels.join(","));
    }
    println!("images: {}", if v.container_images.is_empty() { "-".to_string() } else { v.container_images.join(", ") });
    if !v.init_container_images.is_empty() {
        println!("init images: {}", v.init_container_images.join(", "));
    }
    if v.parallelism.is_some() || v.completions.is_some() {
        println!("parallelism: {}  completions: {}", opt(v.parallelism), opt(v.completions));
    }
    let p = &v.pod_info;
    println!(
        "pods: {}/{} desired  ({} running, {} pending, {} succeeded, {} failed)",
        p.current, p.desired, p.running, p.pending, p.succeeded, p.failed
    );

    if !v.pods.is_empty() {
        println!();
        println!("{:<40} {:<10} {:>8} {:<24} {:>6}", "POD", "PHASE", "RESTARTS", "NODE", "AGE");
        for pod in &v.pods {
            println!(
                "{:<40} {:<10} {:>8} {:<24} {:>6}",
                pod.identity.name,
                format!("{:?}", pod.phase),
                pod.restart_count,
                pod.node_name.as_deref().unwrap_or("-"),
                render_age(pod.creation_timestamp)
            );
        }
    }

    match &v.metrics {
        Some(usage) => {
            println!();
            println!("{:<40} {:>10} {:>12}", "POD", "CPU(m)", "MEMORY(Mi)");
            for u in usage {
                println!("{:<40} {:>10} {:>12}", u.pod.name, u.sample.cpu_millicores, u.sample.memory_bytes / (1024 * 1024));
            }
        }
        None => println!("metrics: unavailable"),
    }

    if !v.services.is_empty() {
        println!();
        println!("{:<40} {}", "SERVICE", "SELECTOR");
        for s in &v.services {
            println!("{:<40} {}", s.identity.name, s.selector);
        }
    }

    if !v.events.is_empty() {
        println!();
        println!("{:<8} {:<24} {:>5} {:>6}  {}", "TYPE", "REASON", "COUNT", "LAST", "MESSAGE");
        for e in &v.events {
            println!(
                "{:<8} {:<24} {:>5} {:>6}  {}",
                format!("{:?}", e.event_type),
                e.reason,
                e.count,
                render_age(e.last_seen),
                e.message
            );
        }
    }
}

fn print_plan(plan: &OrphanPlan) {
    if let Some(sibling) = &plan.retained_by {
        println!("{} {}: services still selected by {}; nothing would be deleted", plan.kind, plan.target, sibling);
        return;
    }
    if plan.orphans.is_empty() {
        println!("{} {}: no orphaned services", plan.kind, plan.target);
        return;
    }
    println!("{} {}: {} orphaned service(s)", plan.kind, plan.target, plan.orphans.len());
    for s in &plan.orphans {
        println!("  {} ({})", s.identity, s.selector);
    }
}

fn print_deletion(res: &DeletionResult) {
    let d = &res.dependents;
    match &res.controller_error {
        None => println!("{} {} deleted", d.kind, d.target),
        Some(cause) => println!("{} {} NOT deleted: {}", d.kind, d.target, cause),
    }
    for id in &d.deleted {
        println!("  service {} deleted", id);
    }
    for f in &d.failures {
        println!("  service {} NOT deleted: {}", f.identity, f.cause);
    }
    if let Some(sibling) = &d.retained_by {
        println!("  services retained by {}", sibling);
    }
}

fn opt(v: Option<i32>) -> String { v.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string()) }

fn render_age(ts: Option<DateTime<Utc>>) -> String {
    let Some(ts) = ts else { return "-".to_string() };
    let mut secs = (Utc::now() - ts).num_seconds().max(0) as u64;
    let days = secs / 86_400; secs %= 86_400;
    let hours = secs / 3600; secs %= 3600;
    let mins = secs / 60; secs %= 60;
    if days > 0 { format!("{}d{}h", days, hours) }
    else if hours > 0 { format!("{}h{}m", hours, mins) }
    else if mins > 0 { format!("{}m", mins) }
    else { format!("{}s", secs) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["kestrelctl", "delete", "ds", "agent", "--dry-run", "--ns", "kube-system", "-o", "yaml"]).unwrap();
        assert_eq!(cli.namespace, "kube-system");
        assert_eq!(cli.output, Output::Yaml);
        match cli.command {
            Commands::Delete { kind, name, dry_run } => {
                assert_eq!(ControllerKind::from_str(&kind).unwrap(), ControllerKind::DaemonSet);
                assert_eq!(name, "agent");
                assert!(dry_run);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn namespace_defaults() {
        let cli = Cli::try_parse_from(["kestrelctl", "detail", "job", "pi"]).unwrap();
        assert_eq!(cli.namespace, "default");
        assert_eq!(cli.timeout_secs, None);
    }

    #[test]
    fn age_rendering() {
        assert_eq!(render_age(None), "-");
        assert_eq!(render_age(Some(Utc::now() - chrono::Duration::seconds(90))), "1m");
        assert_eq!(render_age(Some(Utc::now() - chrono::Duration::hours(50))), "2d2h");
    }
}
