// Bean Ledger - command line
//
//   bean-ledger sync
//   bean-ledger accounts
//   bean-ledger balance
//   bean-ledger transactions [limit]
//   bean-ledger stats
//   bean-ledger open NICKNAME ACCOUNT TYPE
//   bean-ledger close NICKNAME
//   bean-ledger set-balance ACCOUNT DATE AMOUNT PAD_ACCOUNT
//
// Results are printed as JSON on stdout; logs go to stderr.

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::env;
use tracing_subscriber::EnvFilter;

use bean_ledger::{AccountType, Ledger, LedgerConfig};

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn arg<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing argument: {}", name))
}

fn usage() -> &'static str {
    "usage: bean-ledger <sync|accounts|balance|transactions [limit]|stats|open NICK ACCOUNT TYPE|close NICK|set-balance ACCOUNT DATE AMOUNT PAD>"
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bean_ledger=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first() else {
        bail!(usage());
    };

    let config = LedgerConfig::from_env();
    let ledger = Ledger::open(config.clone())
        .with_context(|| format!("opening ledger in {}", config.data_dir.display()))?;

    match command.as_str() {
        "sync" => {
            let report = ledger.sync_transactions().await?;
            eprintln!("{}", report.summary());
            print_json(&report)?;
        }
        "accounts" => print_json(&ledger.get_accounts().await?)?,
        "balance" => print_json(&ledger.get_balance().await?)?,
        "stats" => print_json(&ledger.get_monthly_stats().await?)?,
        "transactions" => {
            let limit = match args.get(1) {
                Some(raw) => Some(raw.parse::<usize>().context("limit must be a number")?),
                None => None,
            };
            print_json(&ledger.get_transactions(None, None, limit).await?)?;
        }
        "open" => {
            let nickname = arg(&args, 1, "NICKNAME")?;
            let account = arg(&args, 2, "ACCOUNT")?;
            let raw_type = arg(&args, 3, "TYPE")?;
            let kind = AccountType::parse(raw_type)
                .ok_or_else(|| anyhow!("unknown account type {} (asset, liability, income, expense)", raw_type))?;
            print_json(&ledger.add_account(nickname, account, kind).await?)?;
        }
        "close" => {
            let nickname = arg(&args, 1, "NICKNAME")?;
            ledger.delete_account(nickname).await?;
            eprintln!("✓ Closed {}", nickname);
        }
        "set-balance" => {
            let account = arg(&args, 1, "ACCOUNT")?;
            let date = arg(&args, 2, "DATE")?;
            let amount: f64 = arg(&args, 3, "AMOUNT")?
                .parse()
                .context("amount must be a number")?;
            let pad = arg(&args, 4, "PAD_ACCOUNT")?;
            let set = ledger.set_account_balance(account, date, amount, pad).await?;
            print_json(&set)?;
        }
        other => bail!("unknown command {}\n{}", other, usage()),
    }

    Ok(())
}
