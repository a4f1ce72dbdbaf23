// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@mitander.dev>

use alloy::primitives::{Address, U256};
use clap::{Args, Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use treasury_twap::app::config::GlobalSettings;
use treasury_twap::app::logging::setup_logging;
use treasury_twap::common::parsing::{format_token_amount, parse_address_hex, parse_token_amount};
use treasury_twap::common::time_utils::{current_unix, format_unix};
use treasury_twap::domain::constants::native_symbol;
use treasury_twap::domain::error::AppError;
use treasury_twap::domain::tranche::{PlanStatus, TrancheStatus};
use treasury_twap::infrastructure::data::db::Database;
use treasury_twap::infrastructure::data::token_manager::TokenManager;
use treasury_twap::infrastructure::network::balances::BalanceReader;
use treasury_twap::infrastructure::network::gas::GasOracle;
use treasury_twap::infrastructure::network::oneinch::OneInchClient;
use treasury_twap::infrastructure::network::provider::ConnectionFactory;
use treasury_twap::infrastructure::network::submitter::TxSubmitter;
use treasury_twap::services::metrics::spawn_metrics_server;
use treasury_twap::services::twap::report::{TokenLabel, build_report, render_table, write_json};
use treasury_twap::services::twap::{
    ExecutorConfig, PlanRequest, SafetyGuard, SchedulerConfig, TrancheExecutor, TwapPlanner,
    TwapScheduler, TwapStats,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Time-sliced treasury transfers through the 1inch swap API")]
struct Cli {
    /// Path to config file (default: config.{toml,yaml,...})
    #[arg(long, global = true)]
    config: Option<String>,

    /// Chain id (overrides config/env)
    #[arg(long, global = true)]
    chain: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Split an amount into time-gated tranches and store the plan
    Plan(PlanArgs),
    /// Execute due tranches of active plans
    Run(RunArgs),
    /// Show plan progress
    Status(StatusArgs),
    /// Cancel every tranche of a plan that has not been broadcast
    Cancel { plan: String },
    /// Wallet balances for the configured token list
    Balances {
        /// Symbols or addresses; defaults to every listed token
        tokens: Vec<String>,
    },
    /// Price a single swap without planning it
    Quote {
        #[arg(long)]
        src: String,
        #[arg(long)]
        dst: String,
        /// Human amount of the source token, e.g. 250.5
        #[arg(long)]
        amount: String,
    },
}

#[derive(Args, Debug)]
struct PlanArgs {
    /// Source token symbol or address
    #[arg(long)]
    src: String,
    /// Target token symbol or address
    #[arg(long)]
    dst: String,
    /// Human amount of the source token to move in total
    #[arg(long)]
    amount: String,
    #[arg(long)]
    slices: u32,
    /// Seconds between tranche eligibility times
    #[arg(long)]
    interval: u64,
    /// UNIX start time (default: now)
    #[arg(long)]
    start: Option<u64>,
    #[arg(long)]
    slippage_bps: Option<u64>,
    #[arg(long)]
    max_drift_bps: Option<u64>,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Only drive this plan
    #[arg(long)]
    plan: Option<String>,
    /// Quote and build swaps but never sign, send or change stored state
    #[arg(long, default_value_t = false)]
    dry_run: bool,
    /// Run a single tick and exit
    #[arg(long, default_value_t = false)]
    once: bool,
    /// Exit once no active plan remains
    #[arg(long, default_value_t = false)]
    until_done: bool,
    /// Metrics port (overrides config/env)
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[derive(Args, Debug)]
struct StatusArgs {
    plan: Option<String>,
    /// Write the report as JSON next to the other reports
    #[arg(long, default_value_t = false)]
    json: bool,
    /// Include the transition log
    #[arg(long, default_value_t = false)]
    events: bool,
}

struct Context {
    settings: GlobalSettings,
    chain_id: u64,
    tokens: TokenManager,
}

impl Context {
    fn load(cli: &Cli) -> Result<Self, AppError> {
        let settings = GlobalSettings::load_with_path(cli.config.as_deref())?;
        setup_logging(if settings.debug { "debug" } else { "info" }, settings.log_json);
        let chain_id = cli.chain.unwrap_or(settings.chain_id);
        let tokens = match settings.tokenlist_path() {
            Ok(path) => TokenManager::load_from_file(&path)?,
            Err(e) => {
                tracing::warn!(target: "config", error = %e, "Token list unavailable; only raw addresses resolve");
                TokenManager::default()
            }
        };
        Ok(Self {
            settings,
            chain_id,
            tokens,
        })
    }

    async fn db(&self) -> Result<Database, AppError> {
        Database::new(&self.settings.database_url()).await
    }

    fn venue(&self) -> Result<OneInchClient, AppError> {
        OneInchClient::new(
            &self.settings.oneinch_api_url,
            self.chain_id,
            self.settings.oneinch_api_key_value(),
            self.settings.oneinch_min_interval(),
        )
    }

    /// Symbol or address to token metadata. Unlisted addresses are read from chain when a
    /// reader is available.
    async fn token(&self, query: &str, reader: Option<&BalanceReader>) -> Result<(Address, TokenLabel), AppError> {
        if let Some(info) = self.tokens.resolve(self.chain_id, query) {
            return Ok((
                info.address,
                TokenLabel {
                    symbol: info.symbol.clone(),
                    decimals: info.decimals,
                },
            ));
        }
        let address = parse_address_hex(query).ok_or_else(|| AppError::InvalidAddress(query.to_string()))?;
        let Some(reader) = reader else {
            return Ok((address, self.label(address)));
        };
        let decimals = reader.decimals(address).await?;
        let symbol = reader
            .symbol(address)
            .await
            .unwrap_or_else(|_| format!("{address:#x}"));
        Ok((address, TokenLabel { symbol, decimals }))
    }

    /// Offline label; unknown tokens are shown by address with 18 decimals.
    fn label(&self, address: Address) -> TokenLabel {
        match self.tokens.info(self.chain_id, address) {
            Some(info) => TokenLabel {
                symbol: info.symbol.clone(),
                decimals: info.decimals,
            },
            None => TokenLabel {
                symbol: format!("{address:#x}"),
                decimals: 18,
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();
    let ctx = Context::load(&cli)?;

    match &cli.command {
        Command::Plan(args) => plan(&ctx, args).await,
        Command::Run(args) => run(&ctx, args).await,
        Command::Status(args) => status(&ctx, args).await,
        Command::Cancel { plan } => cancel(&ctx, plan).await,
        Command::Balances { tokens } => balances(&ctx, tokens).await,
        Command::Quote { src, dst, amount } => quote(&ctx, src, dst, amount).await,
    }
}

fn reader_for(ctx: &Context) -> Option<BalanceReader> {
    ctx.settings
        .get_http_provider(ctx.chain_id)
        .and_then(|url| ConnectionFactory::http(&url))
        .map(BalanceReader::new)
        .ok()
}

async fn plan(ctx: &Context, args: &PlanArgs) -> Result<(), AppError> {
    let db = ctx.db().await?;
    let reader = reader_for(ctx);
    let (src, src_label) = ctx.token(&args.src, reader.as_ref()).await?;
    let (dst, dst_label) = ctx.token(&args.dst, reader.as_ref()).await?;
    let total_amount = parse_token_amount(&args.amount, src_label.decimals)?;

    let planner = TwapPlanner::new(db.clone(), Arc::new(ctx.venue()?));
    let created = planner
        .create(
            &PlanRequest {
                chain_id: ctx.chain_id,
                src_token: src,
                dst_token: dst,
                total_amount,
                slices: args.slices,
                interval_secs: args.interval,
                start_at: args.start,
                slippage_bps: args.slippage_bps.unwrap_or(ctx.settings.slippage_bps),
                max_drift_bps: args.max_drift_bps.unwrap_or(ctx.settings.max_drift_bps),
            },
            current_unix(),
        )
        .await?;

    if !created.created {
        println!("Plan {} already exists; showing stored state.", created.plan.id);
    }
    let report = build_report(created.plan, created.tranches, Vec::new(), src_label, dst_label);
    print!("{}", render_table(&report));
    Ok(())
}

async fn run(ctx: &Context, args: &RunArgs) -> Result<(), AppError> {
    let db = ctx.db().await?;
    let rpc = ctx.settings.get_http_provider(ctx.chain_id)?;
    let provider = ConnectionFactory::http_for_chain(&rpc, ctx.chain_id).await?;
    let signer = ctx.settings.wallet_signer()?;
    let flagged = ctx.tokens.validate_chain_addresses(&provider, ctx.chain_id).await;
    if flagged > 0 {
        tracing::warn!(target: "config", flagged, "Token list entries without bytecode were disabled");
    }

    let chain = Arc::new(TxSubmitter::new(provider, signer, ctx.chain_id));
    let venue = Arc::new(ctx.venue()?);
    let stats = Arc::new(TwapStats::default());
    let shutdown = CancellationToken::new();

    if ctx.settings.metrics_enabled || args.metrics_port.is_some() {
        spawn_metrics_server(
            args.metrics_port.unwrap_or(ctx.settings.metrics_port),
            stats.clone(),
            shutdown.clone(),
        )
        .await;
    }

    let executor = TrancheExecutor::new(
        db.clone(),
        venue,
        chain.clone(),
        ExecutorConfig::from_settings(&ctx.settings, args.dry_run),
        stats,
    );
    let safety = SafetyGuard::new(ctx.settings.safety_max_failures, ctx.settings.safety_reset_secs);
    let mut cfg = SchedulerConfig::from_settings(&ctx.settings);
    cfg.plan_filter = args.plan.clone();
    cfg.until_done = args.until_done;
    let scheduler = TwapScheduler::new(db.clone(), executor, safety, cfg);

    tracing::info!(
        target: "twap",
        chain_id = ctx.chain_id,
        wallet = %chain.address(),
        dry_run = args.dry_run,
        "Treasury TWAP runner starting"
    );

    if args.once {
        scheduler.startup().await?;
        let summary = scheduler.tick(current_unix()).await?;
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).map_err(|e| AppError::Unknown(e.into()))?
        );
    } else {
        let signal = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!(target: "twap", "Ctrl-C received");
                signal.cancel();
            }
        });
        scheduler.run(shutdown.clone()).await?;
    }
    shutdown.cancel();

    if let Some(plan_id) = &args.plan {
        export_report(ctx, &db, plan_id, false).await?;
    }
    Ok(())
}

async fn export_report(ctx: &Context, db: &Database, plan_id: &str, events: bool) -> Result<(), AppError> {
    let plan = db
        .load_plan(plan_id)
        .await?
        .ok_or_else(|| AppError::validation("plan", format!("unknown plan {plan_id}")))?;
    let tranches = db.load_tranches(plan_id).await?;
    let log = if events { db.fill_events(plan_id).await? } else { Vec::new() };
    let src = ctx.label(plan.src_token);
    let dst = ctx.label(plan.dst_token);
    let report = build_report(plan, tranches, log, src, dst);
    write_json(&report, Path::new(&ctx.settings.report_path(plan_id)))
}

async fn status(ctx: &Context, args: &StatusArgs) -> Result<(), AppError> {
    let db = ctx.db().await?;
    let Some(plan_id) = &args.plan else {
        let plans = db.list_plans(None).await?;
        if plans.is_empty() {
            println!("No plans.");
        }
        for plan in plans {
            let tranches = db.load_tranches(&plan.id).await?;
            let filled = tranches.iter().filter(|t| t.filled()).count();
            let src = ctx.label(plan.src_token);
            let dst = ctx.label(plan.dst_token);
            println!(
                "{}  {:<9}  {} {} -> {}  {}/{} filled  next {}",
                plan.id,
                plan.status.as_str(),
                format_token_amount(plan.total_amount, src.decimals),
                src.symbol,
                dst.symbol,
                filled,
                tranches.len(),
                tranches
                    .iter()
                    .find(|t| t.is_due(u64::MAX))
                    .filter(|_| plan.status == PlanStatus::Active)
                    .map(|t| format_unix(t.eligible_at))
                    .unwrap_or_else(|| "-".to_string())
            );
        }
        return Ok(());
    };

    let plan = db
        .load_plan(plan_id)
        .await?
        .ok_or_else(|| AppError::validation("plan", format!("unknown plan {plan_id}")))?;
    let tranches = db.load_tranches(plan_id).await?;
    let events = if args.events { db.fill_events(plan_id).await? } else { Vec::new() };
    let src = ctx.label(plan.src_token);
    let dst = ctx.label(plan.dst_token);
    let report = build_report(plan, tranches, events, src, dst);
    print!("{}", render_table(&report));
    if args.events {
        for ev in &report.events {
            println!(
                "{}  #{:<3} {:<14} {} {}",
                ev.timestamp,
                ev.idx,
                ev.event,
                ev.detail.as_deref().unwrap_or(""),
                ev.tx_hash.as_deref().unwrap_or("")
            );
        }
    }
    if args.json {
        let path = ctx.settings.report_path(plan_id);
        write_json(&report, Path::new(&path))?;
        println!("Report written to {path}");
    }
    Ok(())
}

async fn cancel(ctx: &Context, plan_id: &str) -> Result<(), AppError> {
    let db = ctx.db().await?;
    if db.load_plan(plan_id).await?.is_none() {
        return Err(AppError::validation("plan", format!("unknown plan {plan_id}")));
    }
    let cancelled = db.cancel_plan(plan_id).await?;
    let inflight = db
        .load_tranches(plan_id)
        .await?
        .iter()
        .filter(|t| t.status == TrancheStatus::Submitted)
        .count();
    println!("Cancelled {cancelled} tranche(s) of {plan_id}; {inflight} already broadcast will still settle.");
    Ok(())
}

async fn balances(ctx: &Context, wanted: &[String]) -> Result<(), AppError> {
    let rpc = ctx.settings.get_http_provider(ctx.chain_id)?;
    let provider = ConnectionFactory::http_for_chain(&rpc, ctx.chain_id).await?;
    let wallet = ctx.settings.wallet_address_value()?;
    let reader = BalanceReader::new(provider.clone());

    let mut targets = Vec::new();
    if wanted.is_empty() {
        for info in ctx.tokens.tokens(ctx.chain_id) {
            targets.push((
                info.address,
                TokenLabel {
                    symbol: info.symbol.clone(),
                    decimals: info.decimals,
                },
            ));
        }
    } else {
        for q in wanted {
            targets.push(ctx.token(q, Some(&reader)).await?);
        }
    }

    println!("Wallet {wallet:#x} on chain {} ({})", ctx.chain_id, native_symbol(ctx.chain_id));
    for (address, label) in targets {
        match reader.balance(address, wallet).await {
            Ok(bal) => println!("{:>10}  {:>28}", label.symbol, format_token_amount(bal, label.decimals)),
            Err(e) => println!("{:>10}  error: {e}", label.symbol),
        }
    }
    if let Ok(fees) = GasOracle::new(provider).estimate_eip1559_fees().await {
        println!(
            "base fee {} gwei, tip {} gwei",
            format_token_amount(U256::from(fees.next_base_fee_per_gas), 9),
            format_token_amount(U256::from(fees.max_priority_fee_per_gas), 9)
        );
    }
    Ok(())
}

async fn quote(ctx: &Context, src: &str, dst: &str, amount: &str) -> Result<(), AppError> {
    let reader = reader_for(ctx);
    let (src, src_label) = ctx.token(src, reader.as_ref()).await?;
    let (dst, dst_label) = ctx.token(dst, reader.as_ref()).await?;
    let amount_in = parse_token_amount(amount, src_label.decimals)?;
    let q = ctx.venue()?.quote(src, dst, amount_in).await?;
    let out = format_token_amount(q.amount_out, dst_label.decimals);
    println!(
        "{} {} -> {} {}",
        format_token_amount(amount_in, src_label.decimals),
        src_label.symbol,
        out,
        dst_label.symbol
    );
    if let (Ok(a), Ok(b)) = (
        format_token_amount(amount_in, src_label.decimals).parse::<f64>(),
        out.parse::<f64>(),
    ) && a > 0.0
    {
        println!("price {:.8} {}/{}", b / a, dst_label.symbol, src_label.symbol);
    }
    Ok(())
}
