use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use argh::FromArgs;
use ledgerbench_store::Service;
use ledgerbench_store::protocol::{self, TableCounts, TotalBalances};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use yansi::Paint;

use crate::backend::{self, HttpBackend, LocalBackend, SharedBackend};
use crate::config::Config;
use crate::observability;
use crate::seeder::Seeder;
use crate::teardown::Teardown;

/// Transactional load benchmark for ledger backends.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    /// run against an in-process reference store instead of `convex_url`
    #[argh(switch)]
    pub local: bool,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Seed(SeedCommand),
    Clear(ClearCommand),
    Counts(CountsCommand),
    Balances(BalancesCommand),
    Plan(PlanCommand),
    Serve(ServeCommand),
}

/// seed the tables, run the load and clean up afterwards
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {}

/// only seed the tables for the configured scale factor
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "seed")]
struct SeedCommand {}

/// delete all benchmark data
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "clear")]
struct ClearCommand {}

/// print the number of documents per table
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "counts")]
struct CountsCommand {}

/// print the balance totals of branches, tellers and accounts
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "balances")]
struct BalancesCommand {}

/// print the load stages without running them
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "plan")]
struct PlanCommand {}

/// serve the reference store over HTTP
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "serve")]
struct ServeCommand {
    /// address to listen on
    #[argh(option, default = "SocketAddr::from(([127, 0, 0, 1], 3210))")]
    addr: SocketAddr,
}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();
    let config = Config::load(args.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("ledgerbench")
        .enable_all()
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::initialize_tracing();
    tracing::debug!(?config);

    runtime.block_on(async move {
        match args.command {
            Command::Run(RunCommand {}) => run(connect(&config, args.local)?, &config).await,
            Command::Seed(SeedCommand {}) => {
                let report = Seeder::new(connect(&config, args.local)?, config.seeding)
                    .seed(&config.scale())
                    .await?;
                println!(
                    "seeded {} branches, {} tellers, {} accounts",
                    report.branches.seeded, report.tellers.seeded, report.accounts
                );
                Ok(())
            }
            Command::Clear(ClearCommand {}) => {
                let summary = Teardown::new(connect(&config, args.local)?, config.teardown)
                    .run()
                    .await?;
                for (table, deleted) in &summary.deleted {
                    println!("{table}: {} deleted", deleted.bold());
                }
                Ok(())
            }
            Command::Counts(CountsCommand {}) => {
                let backend = connect(&config, args.local)?;
                let counts: TableCounts =
                    backend::query(&*backend, protocol::GET_TABLE_COUNTS, json!({})).await?;
                println!("branches: {}", counts.branches.bold());
                println!("tellers:  {}", counts.tellers.bold());
                println!("accounts: {}", counts.accounts.bold());
                println!("history:  {}", counts.history.bold());
                println!("counters: {}", counts.counters.bold());
                Ok(())
            }
            Command::Balances(BalancesCommand {}) => {
                let backend = connect(&config, args.local)?;
                let totals: TotalBalances =
                    backend::query(&*backend, protocol::GET_TOTAL_BALANCES, json!({})).await?;
                println!("branches: {}", totals.branch_total.bold());
                println!("tellers:  {}", totals.teller_total.bold());
                println!("accounts: {}", totals.account_total.bold());
                if !totals.is_consistent() {
                    anyhow::bail!("balance totals diverge");
                }
                Ok(())
            }
            Command::Plan(PlanCommand {}) => {
                print_plan(&config);
                Ok(())
            }
            Command::Serve(ServeCommand { addr }) => serve(addr).await,
        }
    })
}

fn connect(config: &Config, local: bool) -> Result<SharedBackend> {
    if local {
        tracing::info!("using the in-process reference store");
        return Ok(Arc::new(LocalBackend::default()));
    }

    let url = config
        .convex_url
        .as_deref()
        .context("`CONVEX_URL` is not set; pass `--local` to use the in-process store")?;
    tracing::info!(url, "using remote deployment");
    Ok(Arc::new(HttpBackend::new(url, config.request_timeout)?))
}

async fn run(backend: SharedBackend, config: &Config) -> Result<()> {
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, stopping load");
                cancel.cancel();
            }
        }
    });

    let report = crate::run(backend, config, cancel).await?;
    report.print();

    if !report.passed() {
        anyhow::bail!("thresholds crossed in run `{}`", report.test_run);
    }
    Ok(())
}

async fn serve(addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("serving reference store on {}", listener.local_addr()?);

    let router = ledgerbench_store::api::router(Service::default());
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    tracing::info!("shutting down");
    Ok(())
}

fn print_plan(config: &Config) {
    let scenario = config.scenario();
    let scale = config.scale();
    let limits = config.thresholds.limits();

    println!(
        "{} {} (scale {}: {} branches, {} tellers, {} accounts)",
        "## Plan".bold(),
        config.test_run.bold().blue(),
        scale.scale(),
        scale.branches(),
        scale.tellers(),
        scale.accounts()
    );
    for (index, stage) in scenario.stages.iter().enumerate() {
        println!(
            "  stage {}: {} workers over {:?}",
            index + 1,
            stage.target.bold(),
            stage.duration
        );
    }
    println!(
        "  graceful ramp-down: {:?}; total: {:?}",
        scenario.graceful_ramp_down,
        scenario.duration()
    );
    println!(
        "  thresholds: failed_requests rate<{}; tx_trend p(95)<{:?}",
        limits.max_failure_rate, limits.max_p95
    );
}
