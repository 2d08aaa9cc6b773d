use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use modq_api::{BearerToken, HttpItemSource, ItemSource, ReviewAction, SessionHooks};
use modq_core::{Filter, Item, ItemId, QueueStats, Status, SyncConfig};
use modq_link::{push_url, Dialer, WsDialer};
use modq_ops::SharedSelection;
use modq_session::SyncContext;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "modqctl", version, about = "Moderation queue sync CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Dashboard server base URL
    #[arg(long = "server", env = "MODQ_SERVER", global = true, default_value = "http://localhost:3000")]
    server: String,

    /// Bearer token for the dashboard API and push channel
    #[arg(long = "token", env = "MODQ_TOKEN", global = true, hide_env_values = true, default_value = "")]
    token: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(clap::Args, Debug, Clone)]
struct FilterArgs {
    /// Only items with this status (pending, approved, rejected, forwarded)
    #[arg(long = "status")]
    status: Option<Status>,
    /// Case-insensitive content search
    #[arg(long = "search")]
    search: Option<String>,
    /// Only flagged items
    #[arg(long = "flagged", action = ArgAction::SetTrue)]
    flagged: bool,
}

impl FilterArgs {
    fn filter(&self) -> Filter {
        Filter { status: self.status, search: self.search.clone(), flagged: self.flagged.then_some(true) }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load the first page, then print every store flush until Ctrl-C
    Tail {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Load N pages and print the materialised queue
    Pages {
        #[command(flatten)]
        filter: FilterArgs,
        /// Number of pages to load
        #[arg(long = "count", default_value_t = 1)]
        count: usize,
    },
    /// Print per-status totals
    Stats,
    /// Apply a review action to items, in chunks
    Review {
        /// approve, reject, forward or delete
        action: ReviewAction,
        /// Item ids
        #[arg(required = true)]
        ids: Vec<ItemId>,
        /// Reason, sent with single-item reviews
        #[arg(long = "reason")]
        reason: Option<String>,
    },
}

fn init_tracing() {
    let env = std::env::var("MODQ_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("MODQ_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid MODQ_METRICS_ADDR; expected host:port");
        }
    }
}

struct Wiring {
    cfg: SyncConfig,
    source: Arc<dyn ItemSource>,
    dialer: Arc<dyn Dialer>,
}

fn wire(cli: &Cli) -> Result<Wiring> {
    let cfg = SyncConfig::from_env();
    let hooks: Arc<dyn SessionHooks> = Arc::new(BearerToken(cli.token.clone()));
    let source = HttpItemSource::new(&cli.server, cfg.request_timeout, Arc::clone(&hooks)).context("item source")?;
    let ws = push_url(&cli.server).context("push url")?;
    let dialer = WsDialer::new(ws).with_auth_header(move || hooks.auth_header());
    Ok(Wiring { cfg, source: Arc::new(source), dialer: Arc::new(dialer) })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let w = wire(&cli)?;

    match &cli.command {
        Commands::Tail { filter } => {
            let ctx = SyncContext::start(w.cfg, w.source, w.dialer);
            let mut sub = ctx.subscribe();
            let mut notices = ctx.notices();
            let filter = filter.filter();
            info!(server = %cli.server, filter = ?filter, "tail invoked");
            if let Err(e) = ctx.set_filter(filter.clone()).await {
                warn!(error = %e, "first page failed; waiting for live updates");
            }
            loop {
                tokio::select! {
                    _ = signal::ctrl_c() => break,
                    batch = sub.next() => match batch {
                        Some(b) => match cli.output {
                            Output::Human => {
                                for it in b.added.iter().filter(|i| filter.matches(i)) { println!("+ {}", row(it)); }
                                for it in &b.updated { println!("~ {}", row(it)); }
                                for id in &b.removed { println!("- {}", id); }
                            }
                            Output::Json => println!("{}", serde_json::to_string(&FlushJson {
                                epoch: b.epoch,
                                added: &b.added,
                                updated: &b.updated,
                                removed: &b.removed,
                            })?),
                        },
                        None => break,
                    },
                    n = notices.recv() => if let Ok(n) = n { eprintln!("notice: {}", n); },
                }
            }
            ctx.shutdown().await;
        }
        Commands::Pages { filter, count } => {
            let ctx = SyncContext::start(w.cfg, w.source, w.dialer);
            let filter = filter.filter();
            info!(count, filter = ?filter, "pages invoked");
            let mut outcome = ctx.set_filter(filter).await;
            for _ in 1..*count {
                if outcome.is_err() || !ctx.pager().has_more() { break; }
                outcome = ctx.load_page().await;
            }
            if let Err(e) = &outcome {
                error!(error = %e, "page load failed");
                eprintln!("pages error: {}", e);
            }
            ctx.scheduler().flush_now().await;
            let view = ctx.view();
            match cli.output {
                Output::Human => {
                    println!("ID       STATUS     AGE    FLAG  CONTENT");
                    for it in view.rows() { println!("{}", row(it)); }
                    eprintln!("{} items, has_more={}", view.len(), ctx.pager().has_more());
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(view.rows())?),
            }
            ctx.shutdown().await;
        }
        Commands::Stats => match w.source.stats().await {
            Ok(s) => match cli.output {
                Output::Human => print_stats(&s),
                Output::Json => println!("{}", serde_json::to_string_pretty(&s)?),
            },
            Err(e) => {
                error!(error = %e, "stats failed");
                eprintln!("stats error: {}", e);
            }
        },
        Commands::Review { action, ids, reason } => {
            let ctx = SyncContext::start(w.cfg, w.source, w.dialer);
            info!(action = %action, count = ids.len(), "review invoked");
            if let ([id], Some(reason)) = (ids.as_slice(), reason.as_deref()) {
                match ctx.review_one(*id, *action, Some(reason)).await {
                    Ok(true) => println!("{} {}: ok", action, id),
                    Ok(false) => println!("{} {}: declined by server", action, id),
                    Err(e) => eprintln!("review error: {}", e),
                }
            } else {
                let sel = SharedSelection::new();
                sel.lock().select_all(ids.iter().copied());
                let mut h = ctx.batch().spawn(*action, sel);
                while let Some(p) = h.progress.recv().await {
                    if cli.output == Output::Human { eprintln!("progress: {}/{}", p.processed, p.total); }
                }
                let out = h.done.await.context("batch task")?;
                match cli.output {
                    Output::Human => {
                        if out.is_partial() {
                            println!("{}: only {} of {} items processed ({} chunk(s) failed)", action, out.processed, out.total, out.failed_chunks);
                        } else {
                            println!("{}: {} items processed", action, out.processed);
                        }
                    }
                    Output::Json => println!("{}", serde_json::to_string_pretty(&OutcomeJson {
                        action: *action,
                        processed: out.processed,
                        total: out.total,
                        failed_chunks: out.failed_chunks,
                        aborted: out.aborted,
                    })?),
                }
            }
            ctx.shutdown().await;
        }
    }

    Ok(())
}

#[derive(serde::Serialize)]
struct FlushJson<'a> {
    epoch: u64,
    added: &'a [Item],
    updated: &'a [Item],
    removed: &'a [ItemId],
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct OutcomeJson {
    action: ReviewAction,
    processed: usize,
    total: usize,
    failed_chunks: usize,
    aborted: bool,
}

fn print_stats(s: &QueueStats) {
    for st in Status::ALL {
        println!("{:<10} {}", st.as_str(), s.count(st));
    }
    println!("{:<10} {}", "total", s.total());
}

fn row(it: &Item) -> String {
    let content: String = it.content.as_deref().unwrap_or("").chars().take(60).collect();
    let media = if it.media.is_empty() { String::new() } else { format!(" [+{} media]", it.media.len()) };
    format!("{:<8} {:<10} {:<6} {:<5} {}{}", it.id, it.status.as_str(), render_age(it.created_at), if it.is_flagged { "!" } else { "" }, content, media)
}

fn render_age(created_at: DateTime<Utc>) -> String {
    let age = (Utc::now() - created_at).max(chrono::Duration::zero());
    match (age.num_days(), age.num_hours() % 24, age.num_minutes() % 60) {
        (d, h, _) if d > 0 => format!("{}d{}h", d, h),
        (_, h, m) if h > 0 => format!("{}h{}m", h, m),
        (_, _, m) if m > 0 => format!("{}m", m),
        _ => format!("{}s", age.num_seconds()),
    }
}
