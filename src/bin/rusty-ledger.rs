//! rusty-ledger CLI - Command-line interface for the trading journal
//!
//! ## Example Usage
//!
//! ```bash
//! # Record a deposit and check the balance
//! rusty-ledger cash deposit 10000
//! rusty-ledger cash balance
//!
//! # Place and fill an order
//! rusty-ledger order create AAPL buy 10 --client-id my-1
//! rusty-ledger order fill 1 185.20
//!
//! # Value holdings at given prices
//! rusty-ledger portfolio --price AAPL=190.5
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use rusty_ledger::finance::ledger::CashAction;
use rusty_ledger::prelude::*;
use rusty_ledger::types::{parse_timestamp, Action, Instrument, OptionType, Timestamp};
use std::path::{Path, PathBuf};
use std::process;

/// rusty-ledger: personal trading journal
#[derive(Parser)]
#[command(name = "rusty-ledger")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "Robert Fall")]
#[command(about = "Personal trading journal with holdings and a cash ledger", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// User the command acts for
    #[arg(short, long, global = true, default_value_t = 1)]
    user: i64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Order lifecycle
    Order {
        #[command(subcommand)]
        command: OrderCommands,
    },

    /// Trade entry, close, edit and delete
    Trade {
        #[command(subcommand)]
        command: TradeCommands,
    },

    /// Deposits, withdrawals and balance
    Cash {
        #[command(subcommand)]
        command: CashCommands,
    },

    /// Show current holdings
    Holdings {
        /// Replay holdings updates that previously failed
        #[arg(long)]
        retry: bool,
    },

    /// Show realized P&L
    Pnl,

    /// Value holdings and cash
    Portfolio {
        /// Last price as SYMBOL=PRICE (repeatable)
        #[arg(short, long = "price", value_name = "SYMBOL=PRICE")]
        prices: Vec<String>,
    },
}

#[derive(Subcommand)]
enum OrderCommands {
    /// Create a pending order
    Create {
        symbol: String,
        /// buy or sell
        action: String,
        quantity: i64,
        #[arg(short, long)]
        limit: Option<f64>,
        #[arg(long)]
        client_id: Option<String>,
        #[arg(short, long)]
        strategy: Option<String>,
        /// stock or option
        #[arg(short, long, default_value = "stock")]
        instrument: String,
    },
    /// Cancel a pending order
    Cancel { order_id: i64 },
    /// Fill a pending order
    Fill {
        order_id: i64,
        price: f64,
        /// Fill time (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        at: Option<String>,
        /// Fill at the configured broker first
        #[arg(long)]
        broker: bool,
    },
    /// Refresh one order's venue status
    Sync { order_id: i64 },
    /// Refresh every pending broker-linked order
    SyncAll,
    /// List recent orders
    List {
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: usize,
    },
    /// Show an order's event trail
    Events {
        order_id: i64,
        #[arg(short = 'n', long, default_value_t = 100)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum TradeCommands {
    /// Record a trade directly
    Add {
        symbol: String,
        action: String,
        quantity: i64,
        price: f64,
        /// Entry date (defaults to now)
        #[arg(short, long)]
        date: Option<String>,
        #[arg(short, long)]
        strategy: Option<String>,
        #[arg(long)]
        client_id: Option<String>,
        /// Option right (call/put); makes this an option trade
        #[arg(long, requires_all = ["strike", "expiry"])]
        option_type: Option<String>,
        #[arg(long)]
        strike: Option<f64>,
        #[arg(long)]
        expiry: Option<String>,
    },
    /// Close an open trade
    Close {
        trade_id: i64,
        price: f64,
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Edit a trade's entry
    Edit {
        trade_id: i64,
        symbol: String,
        action: String,
        quantity: i64,
        price: f64,
        #[arg(short, long)]
        date: Option<String>,
        #[arg(short, long, default_value = "")]
        strategy: String,
    },
    /// Delete a trade
    Delete { trade_id: i64 },
    /// List trades
    List,
}

#[derive(Subcommand)]
enum CashCommands {
    Deposit {
        amount: f64,
        #[arg(short, long)]
        date: Option<String>,
        #[arg(short, long)]
        notes: Option<String>,
    },
    Withdraw {
        amount: f64,
        #[arg(short, long)]
        date: Option<String>,
        #[arg(short, long)]
        notes: Option<String>,
    },
    Balance {
        #[arg(long)]
        currency: Option<String>,
    },
    /// List ledger entries with their lines
    Entries {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
}

fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".rusty-ledger").join("config.toml"))
}

fn load_config(path: Option<&Path>) -> Result<JournalConfig> {
    let mut config = match path.map(Path::to_path_buf).or_else(default_config_path) {
        Some(path) => JournalConfig::load(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => JournalConfig::default(),
    };
    config.apply_env(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

fn parse_date(value: Option<&str>) -> Result<Option<Timestamp>> {
    Ok(value.map(parse_timestamp).transpose()?)
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    if cli.verbose {
        println!(
            "{} v{}",
            "rusty-ledger".cyan().bold(),
            env!("CARGO_PKG_VERSION")
        );
        println!(
            "Database: {}",
            config.database_path.display().to_string().dimmed()
        );
    }

    let mut journal = Journal::open(&config)?;
    let user = cli.user;

    match cli.command {
        Commands::Order { command } => order_command(&mut journal, user, command),
        Commands::Trade { command } => trade_command(&mut journal, user, command),
        Commands::Cash { command } => cash_command(&mut journal, user, command),
        Commands::Holdings { retry } => show_holdings(&mut journal, user, retry),
        Commands::Pnl => show_pnl(&journal, user),
        Commands::Portfolio { prices } => {
            let prices = StaticPrices::parse_pairs(prices.iter().map(String::as_str))?;
            show_portfolio(&journal, user, &prices)
        }
    }
}

fn order_command(journal: &mut Journal, user: i64, command: OrderCommands) -> Result<()> {
    match command {
        OrderCommands::Create {
            symbol,
            action,
            quantity,
            limit,
            client_id,
            strategy,
            instrument,
        } => {
            let mut order = NewOrder::market(symbol, action.parse::<Action>()?, quantity)
                .with_instrument(instrument.parse::<Instrument>()?);
            order.limit_price = limit;
            order.client_order_id = client_id;
            order.strategy = strategy;
            let id = journal.create_order(user, &order)?;
            println!("{} order {}", "Created".green().bold(), id);
        }
        OrderCommands::Cancel { order_id } => {
            if journal.cancel_order(user, order_id)? {
                println!("{} order {}", "Cancelled".green().bold(), order_id);
            } else {
                println!("{} order {} is not cancellable", "Skipped:".yellow(), order_id);
            }
        }
        OrderCommands::Fill {
            order_id,
            price,
            at,
            broker,
        } => {
            let at = parse_date(at.as_deref())?;
            let trade_id = if broker {
                journal.fill_order_via_broker(user, order_id, price, at)?
            } else {
                journal.fill_order(user, order_id, price, at)?
            };
            println!(
                "{} order {} at {:.2} -> trade {}",
                "Filled".green().bold(),
                order_id,
                price,
                trade_id
            );
        }
        OrderCommands::Sync { order_id } => {
            if !journal.broker_enabled() {
                bail!("broker execution is disabled");
            }
            let synced = journal.sync_order_status(user, order_id)?;
            println!("{} {}", "Synced:".bold(), synced);
        }
        OrderCommands::SyncAll => {
            let count = journal.sync_pending_orders(user)?;
            println!("{} {} orders", "Synced".bold(), count);
        }
        OrderCommands::List { limit } => {
            let orders = journal.list_orders(user, limit)?;
            println!(
                "{:>6}  {:<8} {:<5} {:>6} {:<10} {:>10} {:<10} {}",
                "ID", "SYMBOL", "SIDE", "QTY", "STATUS", "FILL", "EXTERNAL", "CLIENT ID"
            );
            for o in orders {
                println!(
                    "{:>6}  {:<8} {:<5} {:>6} {:<10} {:>10} {:<10} {}",
                    o.id,
                    o.symbol,
                    o.action.to_string(),
                    o.quantity,
                    o.status.to_string(),
                    o.filled_price.map(|p| format!("{:.2}", p)).unwrap_or_default(),
                    o.external_status.unwrap_or_default(),
                    o.client_order_id.unwrap_or_default()
                );
            }
        }
        OrderCommands::Events { order_id, limit } => {
            for e in journal.list_order_events(user, order_id, limit)? {
                println!(
                    "{}  {:<10} {:<10} {} {}",
                    e.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
                    e.event_type.to_string(),
                    e.order_status.to_string(),
                    e.external_status.unwrap_or_default(),
                    e.note.unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}

fn trade_command(journal: &mut Journal, user: i64, command: TradeCommands) -> Result<()> {
    match command {
        TradeCommands::Add {
            symbol,
            action,
            quantity,
            price,
            date,
            strategy,
            client_id,
            option_type,
            strike,
            expiry,
        } => {
            let date = parse_date(date.as_deref())?.unwrap_or_else(chrono::Utc::now);
            let mut trade = NewTrade::stock(symbol, action.parse::<Action>()?, quantity, price, date);
            if let Some(strategy) = strategy {
                trade = trade.with_strategy(strategy);
            }
            if let Some(coid) = client_id {
                trade = trade.with_client_id(coid);
            }
            if let (Some(right), Some(strike), Some(expiry)) = (option_type, strike, expiry) {
                trade = trade.with_option(right.parse::<OptionType>()?, strike, parse_timestamp(&expiry)?);
            }
            let id = journal.save_trade(user, &trade)?;
            println!("{} trade {}", "Saved".green().bold(), id);
        }
        TradeCommands::Close {
            trade_id,
            price,
            date,
        } => {
            if journal.close_trade(user, trade_id, price, parse_date(date.as_deref())?)? {
                let pnl = journal
                    .get_trade(user, trade_id)?
                    .and_then(|t| t.realized_pnl)
                    .unwrap_or_default();
                println!("{} trade {}: realized {}", "Closed".green().bold(), trade_id, format_pnl(pnl));
            } else {
                println!("{} trade {} is missing or already closed", "Skipped:".yellow(), trade_id);
            }
        }
        TradeCommands::Edit {
            trade_id,
            symbol,
            action,
            quantity,
            price,
            date,
            strategy,
        } => {
            let entry_date = match parse_date(date.as_deref())? {
                Some(d) => d,
                None => match journal.get_trade(user, trade_id)? {
                    Some(t) => t.entry_date,
                    None => bail!("trade {} not found", trade_id),
                },
            };
            let update = TradeUpdate {
                symbol,
                strategy,
                action: action.parse::<Action>()?,
                quantity,
                entry_price: price,
                entry_date,
            };
            if journal.update_trade(user, trade_id, &update)? {
                println!("{} trade {}", "Updated".green().bold(), trade_id);
            } else {
                println!("{} trade {} not found", "Skipped:".yellow(), trade_id);
            }
        }
        TradeCommands::Delete { trade_id } => {
            if journal.delete_trade(user, trade_id)? {
                println!("{} trade {}", "Deleted".green().bold(), trade_id);
            } else {
                println!("{} trade {} not found", "Skipped:".yellow(), trade_id);
            }
        }
        TradeCommands::List => {
            println!(
                "{:>6}  {:<10} {:<8} {:<6} {:<5} {:>6} {:>10} {:>10} {:>12}",
                "ID", "DATE", "SYMBOL", "TYPE", "SIDE", "QTY", "ENTRY", "EXIT", "P&L"
            );
            for t in journal.list_trades(user)? {
                println!(
                    "{:>6}  {:<10} {:<8} {:<6} {:<5} {:>6} {:>10.2} {:>10} {:>12}",
                    t.id,
                    t.entry_date.format("%Y-%m-%d").to_string(),
                    t.symbol,
                    t.instrument.to_string(),
                    t.action.to_string(),
                    t.quantity,
                    t.entry_price,
                    t.exit_price.map(|p| format!("{:.2}", p)).unwrap_or_else(|| "open".to_string()),
                    t.realized_pnl.map(format_pnl).unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}

fn cash_command(journal: &mut Journal, user: i64, command: CashCommands) -> Result<()> {
    match command {
        CashCommands::Deposit {
            amount,
            date,
            notes,
        } => {
            let flow = journal.record_cash_flow(
                user,
                CashAction::Deposit,
                amount,
                parse_date(date.as_deref())?,
                notes.as_deref(),
            )?;
            println!("{} {:.2} {}", "Deposited".green().bold(), flow.amount, flow.currency);
        }
        CashCommands::Withdraw {
            amount,
            date,
            notes,
        } => {
            let flow = journal.record_cash_flow(
                user,
                CashAction::Withdraw,
                amount,
                parse_date(date.as_deref())?,
                notes.as_deref(),
            )?;
            println!("{} {:.2} {}", "Withdrew".green().bold(), flow.amount, flow.currency);
        }
        CashCommands::Balance { currency } => {
            let currency = currency.unwrap_or_else(|| journal.currency().to_string());
            let balance = journal.get_cash_balance(user, &currency)?;
            println!("{} {:.2} {}", "Cash:".bold(), balance, currency.to_uppercase());
        }
        CashCommands::Entries { limit } => {
            for entry in journal.list_ledger_entries(user, limit)? {
                println!(
                    "{} {} {}",
                    format!("#{}", entry.id).bold(),
                    entry.entry_type,
                    entry.description.unwrap_or_default().dimmed()
                );
                for line in entry.lines {
                    println!("    account {:>4} {:>12.2}", line.account_id, line.amount);
                }
            }
        }
    }
    Ok(())
}

fn show_holdings(journal: &mut Journal, user: i64, retry: bool) -> Result<()> {
    if retry {
        let applied = journal.retry_holding_syncs(user)?;
        println!("{} {} pending updates", "Replayed".green().bold(), applied);
    }
    let pending = journal.list_pending_holding_syncs(user)?;
    if !pending.is_empty() {
        println!(
            "{} {} holdings updates pending (run with --retry)",
            "Warning:".yellow(),
            pending.len()
        );
    }

    println!("{:<8} {:>12} {:>12}", "SYMBOL", "QTY", "AVG COST");
    for h in journal.list_holdings(user, None)? {
        println!(
            "{:<8} {:>12} {:>12}",
            h.symbol,
            h.quantity,
            h.avg_cost.map(|c| format!("{:.4}", c)).unwrap_or_default()
        );
    }
    Ok(())
}

fn show_pnl(journal: &Journal, user: i64) -> Result<()> {
    let summary = journal.pnl_summary(user)?;
    println!("{}", "Realized P&L".bold());
    println!("{}", "============".dimmed());
    println!("  {} {}", "Total:".bold(), format_pnl(summary.realized_pnl));
    println!("  {} {}", "Closed trades:".bold(), summary.total_trades);
    println!(
        "  {} {} / {}",
        "Winners / losers:".bold(),
        summary.winning_trades,
        summary.losing_trades
    );
    println!("  {} {:.1}%", "Win rate:".bold(), summary.win_rate * 100.0);
    Ok(())
}

fn show_portfolio(journal: &Journal, user: i64, prices: &StaticPrices) -> Result<()> {
    let summary = journal.portfolio(user, prices)?;

    println!(
        "{:<8} {:>10} {:>10} {:>10} {:>12} {:>12}",
        "SYMBOL", "QTY", "AVG", "LAST", "VALUE", "UNREALIZED"
    );
    for p in &summary.positions {
        println!(
            "{:<8} {:>10} {:>10} {:>10} {:>12} {:>12}",
            p.symbol,
            p.quantity,
            p.avg_cost.map(|c| format!("{:.2}", c)).unwrap_or_default(),
            p.last_price.map(|c| format!("{:.2}", c)).unwrap_or_else(|| "-".to_string()),
            p.market_value().map(|v| format!("{:.2}", v)).unwrap_or_default(),
            p.unrealized_pnl().map(format_pnl).unwrap_or_default()
        );
    }
    println!();
    println!("  {} {:.2} {}", "Cash:".bold(), summary.cash, summary.currency);
    println!("  {} {:.2}", "Positions:".bold(), summary.positions_value);
    println!("  {} {:.2}", "Total value:".bold(), summary.portfolio_value());
    println!("  {} {}", "Realized:".bold(), format_pnl(summary.pnl.realized_pnl));
    println!("  {} {}", "Unrealized:".bold(), format_pnl(summary.pnl.unrealized_pnl));

    let unpriced = summary.unpriced();
    if !unpriced.is_empty() {
        println!("{} no price for {}", "Note:".yellow(), unpriced.join(", "));
    }
    Ok(())
}

fn format_pnl(value: f64) -> String {
    let text = format!("{:+.2}", value);
    if value > 0.0 {
        text.green().to_string()
    } else if value < 0.0 {
        text.red().to_string()
    } else {
        text
    }
}
