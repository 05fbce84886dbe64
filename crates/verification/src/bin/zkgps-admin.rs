//! ZK GPS admin tool
//!
//! Operator commands against a SQLite verification store: run the expiry
//! sweep, inspect requests and proofs, and print on-chain calldata.

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use zkgps_core::{logging, Config, LogFormat, ProofId, SystemClock};
use zkgps_crypto::{onchain_request_id_hex, to_on_chain_calldata};
use zkgps_verification::{
    PartyRole, ProofRecord, ProofStore, RequestLifecycle, SqliteStore, Store, VerificationRequest,
};

/// JSON output for sweep command
#[derive(Debug, Serialize)]
struct SweepOutput {
    expired: usize,
    success: bool,
}

/// One line of the requests listing
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestRow<'a> {
    id: &'a str,
    kind: String,
    status: String,
    proof_status: String,
    provider_id: &'a str,
    user_id: &'a str,
    timer_end: Option<u64>,
}

impl<'a> From<&'a VerificationRequest> for RequestRow<'a> {
    fn from(r: &'a VerificationRequest) -> Self {
        Self {
            id: r.id.as_str(),
            kind: r.kind.to_string(),
            status: r.status.to_string(),
            proof_status: r.proof_status.to_string(),
            provider_id: &r.provider_id,
            user_id: &r.user_id,
            timer_end: r.timer_end,
        }
    }
}

/// One line of the proofs listing
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProofRow<'a> {
    id: &'a str,
    proof_type: String,
    request_id: Option<&'a str>,
    verified_locally: bool,
    verified_on_chain: bool,
    tx_hash: Option<&'a str>,
    created_at: u64,
}

impl<'a> From<&'a ProofRecord> for ProofRow<'a> {
    fn from(p: &'a ProofRecord) -> Self {
        Self {
            id: p.id.as_str(),
            proof_type: p.proof_type.to_string(),
            request_id: p.request_id.as_ref().map(|r| r.as_str()),
            verified_locally: p.verified_locally,
            verified_on_chain: p
                .on_chain
                .as_ref()
                .map(|c| c.verified_on_chain)
                .unwrap_or(false),
            tx_hash: p.on_chain.as_ref().map(|c| c.tx_hash.as_str()),
            created_at: p.created_at,
        }
    }
}

struct Options {
    config: Config,
    json: bool,
    positional: Vec<String>,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn lifecycle(store: Arc<dyn Store>, config: &Config) -> RequestLifecycle {
    RequestLifecycle::new(store, Arc::new(SystemClock), config.requests.clone())
}

fn cmd_sweep(store: Arc<dyn Store>, opts: &Options) -> Result<()> {
    let expired = lifecycle(store, &opts.config).reconcile_expired()?;
    if opts.json {
        print_json(&SweepOutput {
            expired,
            success: true,
        })
    } else {
        println!("Expired {} request(s)", expired);
        Ok(())
    }
}

fn cmd_requests(store: Arc<dyn Store>, opts: &Options) -> Result<()> {
    let party = opts
        .positional
        .first()
        .ok_or_else(|| anyhow!("Missing <party> argument"))?;
    let role: PartyRole = match opts.positional.get(1) {
        Some(role) => role.parse()?,
        None => PartyRole::Any,
    };

    let requests = lifecycle(store, &opts.config).list(party, role)?;
    if opts.json {
        let rows: Vec<RequestRow<'_>> = requests.iter().map(RequestRow::from).collect();
        return print_json(&rows);
    }

    if requests.is_empty() {
        println!("No requests for {}", party);
    }
    for r in &requests {
        println!(
            "{}  {:<16} {:<9} proof={:<9} provider={} user={}",
            r.id, r.kind, r.status, r.proof_status, r.provider_id, r.user_id
        );
    }
    Ok(())
}

fn cmd_proofs(store: Arc<dyn Store>, opts: &Options) -> Result<()> {
    let user = opts
        .positional
        .first()
        .ok_or_else(|| anyhow!("Missing <user> argument"))?;
    let proofs = store.list_proofs(user, opts.config.requests.list_limit)?;

    if opts.json {
        let rows: Vec<ProofRow<'_>> = proofs.iter().map(ProofRow::from).collect();
        return print_json(&rows);
    }

    if proofs.is_empty() {
        println!("No proofs for {}", user);
    }
    for p in &proofs {
        let row = ProofRow::from(p);
        println!(
            "{}  {:<8} request={} local={} on_chain={}",
            row.id,
            row.proof_type,
            row.request_id.unwrap_or("-"),
            row.verified_locally,
            row.verified_on_chain
        );
    }
    Ok(())
}

fn cmd_calldata(store: Arc<dyn Store>, opts: &Options) -> Result<()> {
    let proof_id = ProofId::from(
        opts.positional
            .first()
            .ok_or_else(|| anyhow!("Missing <proof-id> argument"))?
            .as_str(),
    );
    let record = store
        .get_proof(&proof_id)?
        .ok_or_else(|| anyhow!("Proof {} not found", proof_id))?;
    let calldata = to_on_chain_calldata(&record.proof, &record.public_signals)?;
    let source_id = record
        .request_id
        .as_ref()
        .map(|r| r.as_str())
        .unwrap_or(record.id.as_str());
    let onchain_id = onchain_request_id_hex(source_id)?;

    if opts.json {
        let mut value = calldata.to_json();
        value["requestId"] = serde_json::Value::String(onchain_id);
        return print_json(&value);
    }

    let args = calldata.to_json();
    println!("requestId:  {}", onchain_id);
    println!("pA:         {}", args["pA"]);
    println!("pB:         {}", args["pB"]);
    println!("pC:         {}", args["pC"]);
    println!("pubSignals: {}", args["pubSignals"]);
    Ok(())
}

fn parse_args() -> Result<(String, Options)> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut command = None;
    let mut config_path: Option<PathBuf> = None;
    let mut db_path: Option<PathBuf> = None;
    let mut json = false;
    let mut log_format = None;
    let mut positional = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                config_path = Some(PathBuf::from(
                    args.get(i).context("--config needs a path")?,
                ));
            }
            "--db" => {
                i += 1;
                db_path = Some(PathBuf::from(args.get(i).context("--db needs a path")?));
            }
            "--json" => json = true,
            "--log-json" => log_format = Some(LogFormat::Json),
            "--help" | "-h" => command = Some("help".to_string()),
            other if other.starts_with('-') => bail!("Unknown option: {}", other),
            other if command.is_none() => command = Some(other.to_string()),
            other => positional.push(other.to_string()),
        }
        i += 1;
    }

    let mut config = match config_path {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default_config(),
    };
    if let Some(path) = db_path {
        config.storage.path = path;
    }
    if let Some(format) = log_format {
        config.logging.format = format;
    }

    let command = command.ok_or_else(|| anyhow!("Usage: zkgps-admin <command> [options]"))?;
    Ok((
        command,
        Options {
            config,
            json,
            positional,
        },
    ))
}

fn print_usage() {
    println!("zkgps-admin - Inspect and maintain a ZK GPS verification store");
    println!();
    println!("USAGE:");
    println!("    zkgps-admin sweep [--db <file>] [--json]");
    println!("    zkgps-admin requests <party> [user|provider|any] [--db <file>] [--json]");
    println!("    zkgps-admin proofs <user> [--db <file>] [--json]");
    println!("    zkgps-admin calldata <proof-id> [--db <file>] [--json]");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <file>   TOML configuration (defaults apply otherwise)");
    println!("    --db <file>           SQLite store, overrides storage.path");
    println!("    --json                Machine-readable output");
    println!("    --log-json            JSON logs on stderr");
}

fn run(command: &str, opts: &Options) -> Result<()> {
    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::open(&opts.config.storage.path).with_context(|| {
            format!(
                "Failed to open store {}",
                opts.config.storage.path.display()
            )
        })?,
    );

    match command {
        "sweep" => cmd_sweep(store, opts),
        "requests" => cmd_requests(store, opts),
        "proofs" => cmd_proofs(store, opts),
        "calldata" => cmd_calldata(store, opts),
        other => bail!("Unknown command: {}", other),
    }
}

fn main() {
    let (command, opts) = match parse_args() {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            println!();
            print_usage();
            process::exit(1);
        }
    };

    if command == "help" {
        print_usage();
        return;
    }

    logging::init(opts.config.logging.format);

    if let Err(e) = run(&command, &opts) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}
