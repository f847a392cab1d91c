//! procbeat_agent: samples CPU and per-process memory every fast tick and
//! pushes a JSON report every `flush_every` ticks.

use std::env;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use procbeat_agent::config::{parse_args, AgentConfig, USAGE};
use procbeat_agent::procfs::{ProcFs, RealFs};
use procbeat_agent::report::ReportBuilder;
use procbeat_agent::sample::SampleCollector;
use procbeat_agent::scheduler::Scheduler;
use procbeat_agent::sink::{HttpSink, ReportSink, StdoutSink};

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("procbeat_agent=info"));
    // stdout carries reports in --dry-run mode; keep logs off it
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("interrupt received"),
        _ = terminate => info!("terminate received"),
    }
}

async fn run_with<F: ProcFs + Clone, S: ReportSink>(
    cfg: &AgentConfig,
    fs: F,
    sink: S,
) -> anyhow::Result<()> {
    let collector = SampleCollector::new(fs, &cfg.proc_root);
    let builder = ReportBuilder::new(cfg.agent_name(), cfg.top_n);
    info!(name = builder.agent_name(), "agent identifier");
    let scheduler = Scheduler::start(
        collector,
        builder,
        sink,
        cfg.fast_interval(),
        cfg.flush_every,
    )
    .context("reading system baseline")?;
    scheduler.run(shutdown_signal()).await;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = match parse_args(env::args()) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };
    if cli.help {
        println!("{USAGE}");
        return Ok(());
    }

    init_logging();
    let cfg = AgentConfig::load(&cli, |k| env::var(k).ok()).context("invalid configuration")?;
    info!(
        "procbeat_agent {} starting (interval={}ms, flush_every={}, top_n={}, proc={})",
        env!("CARGO_PKG_VERSION"),
        cfg.fast_interval_ms,
        cfg.flush_every,
        cfg.top_n,
        cfg.proc_root.display()
    );

    if cli.dry_run {
        run_with(&cfg, RealFs, StdoutSink).await
    } else {
        // validate() guarantees an endpoint outside dry-run
        let url = cfg.endpoint.clone().unwrap_or_default();
        info!(endpoint = %url, gzip = cfg.gzip, "reporting over HTTP");
        let sink = HttpSink::new(url, cfg.request_timeout(), cfg.gzip)?;
        run_with(&cfg, RealFs, sink).await
    }
}
