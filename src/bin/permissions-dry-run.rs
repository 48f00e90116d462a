//! CLI tool for dry-running permission rules against a transaction
//!
//! Useful when authoring DDLX rules: feed it the schema, the compiled
//! rules, the user's materialized roles, a data snapshot and a candidate
//! transaction, and it reports what the decision engine would do without
//! touching a live replication stream.
//!
//! Usage:
//!   permissions-dry-run --schema <file> --rules <file> --tx <file> [options]
//!
//! Options:
//!   --schema <file>   Schema snapshot (YAML)
//!   --rules <file>    Grants and assigns (YAML)
//!   --roles <file>    Materialized role rows (YAML)
//!   --data <file>     Graph rows, a map of table name to row list (YAML)
//!   --tx <file>       The transaction to evaluate (YAML)
//!   --user <id>       Authenticated user id (omit for anonymous)
//!   --config <file>   Permissions config (default: search path)
//!   --read            Filter the transaction as outbound reads instead
//!   --verbose         Enable verbose output

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use fluxsync_permissions::models::{Record, RoleRecord, RulesSpec, SchemaInfo};
use fluxsync_permissions::{
    Auth, InMemoryGraph, Permissions, PermissionsConfig, PermissionsUpdate, Relation, Transaction,
};

struct Args {
    schema: PathBuf,
    rules: PathBuf,
    roles: Option<PathBuf>,
    data: Option<PathBuf>,
    tx: PathBuf,
    user: Option<String>,
    config: Option<PathBuf>,
    read: bool,
    verbose: bool,
}

fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(Some(args)) => args,
        Ok(None) => return ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            print_help();
            return ExitCode::FAILURE;
        }
    };

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    match run(args) {
        Ok(allowed) => {
            if allowed {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<bool> {
    let schema: SchemaInfo = load_yaml(&args.schema).context("loading schema")?;
    let rules: RulesSpec = load_yaml(&args.rules).context("loading rules")?;
    let roles: Vec<RoleRecord> = match &args.roles {
        Some(path) => load_yaml(path).context("loading roles")?,
        None => vec![],
    };
    let tx: Transaction = load_yaml(&args.tx).context("loading transaction")?;

    let config = match &args.config {
        Some(path) => PermissionsConfig::load_from(path)?,
        None => PermissionsConfig::load()?,
    };

    let mut graph = InMemoryGraph::new(schema.clone()).with_depth_limit(config.scope.max_depth);
    if let Some(path) = &args.data {
        let rows: BTreeMap<String, Vec<Record>> = load_yaml(path).context("loading data")?;
        for (table, records) in rows {
            let relation = parse_relation(&table);
            for record in records {
                graph.insert(relation.clone(), record);
            }
        }
    }

    let auth = match args.user {
        Some(user) => Auth::user(user),
        None => Auth::anonymous(),
    };
    let perms = Permissions::with_config(auth, Arc::new(config))
        .update(PermissionsUpdate {
            schema: Some(schema),
            rules: Some(rules),
            roles: Some(roles),
        })
        .context("compiling permissions")?;

    info!(
        roles = perms.assigned_roles().len(),
        changes = tx.changes.len(),
        "permissions compiled"
    );

    if args.read {
        let (filtered, move_outs) = perms.filter_read(&graph, &tx);
        println!(
            "kept {} of {} changes, {} move-out(s)",
            filtered.changes.len(),
            tx.changes.len(),
            move_outs.len()
        );
        for move_out in &move_outs {
            println!("move-out: {} {}", move_out.relation, move_out.id);
        }
        println!("{}", serde_norway::to_string(&filtered)?);
        Ok(filtered.changes.len() == tx.changes.len())
    } else {
        match perms.validate_write(&graph, &tx) {
            Ok(_) => {
                println!("transaction allowed ({} changes)", tx.changes.len());
                Ok(true)
            }
            Err(err) => {
                println!("transaction rejected: {err}");
                Ok(false)
            }
        }
    }
}

fn load_yaml<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<T> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {path:?}"))?;
    serde_norway::from_str(&contents).with_context(|| format!("Failed to parse file: {path:?}"))
}

/// Accepts "schema.table" or a bare table name in "public"
fn parse_relation(name: &str) -> Relation {
    match name.split_once('.') {
        Some((schema, table)) => Relation::new(schema, table),
        None => Relation::public(name),
    }
}

fn parse_args() -> Result<Option<Args>> {
    let argv: Vec<String> = env::args().collect();

    let mut schema: Option<PathBuf> = None;
    let mut rules: Option<PathBuf> = None;
    let mut roles: Option<PathBuf> = None;
    let mut data: Option<PathBuf> = None;
    let mut tx: Option<PathBuf> = None;
    let mut user: Option<String> = None;
    let mut config: Option<PathBuf> = None;
    let mut read = false;
    let mut verbose = false;

    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "--schema" => schema = Some(take_value(&argv, &mut i)?.into()),
            "--rules" => rules = Some(take_value(&argv, &mut i)?.into()),
            "--roles" => roles = Some(take_value(&argv, &mut i)?.into()),
            "--data" => data = Some(take_value(&argv, &mut i)?.into()),
            "--tx" => tx = Some(take_value(&argv, &mut i)?.into()),
            "--user" => user = Some(take_value(&argv, &mut i)?),
            "--config" => config = Some(take_value(&argv, &mut i)?.into()),
            "--read" => read = true,
            "--verbose" | "-v" => verbose = true,
            "--help" | "-h" => {
                print_help();
                return Ok(None);
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
        i += 1;
    }

    Ok(Some(Args {
        schema: schema.context("--schema is required")?,
        rules: rules.context("--rules is required")?,
        roles,
        data,
        tx: tx.context("--tx is required")?,
        user,
        config,
        read,
        verbose,
    }))
}

fn take_value(argv: &[String], i: &mut usize) -> Result<String> {
    *i += 1;
    argv.get(*i)
        .cloned()
        .with_context(|| format!("{} requires a value", argv[*i - 1]))
}

fn print_help() {
    println!(
        "permissions-dry-run - evaluate permission rules against a transaction

USAGE:
    permissions-dry-run --schema <file> --rules <file> --tx <file> [options]

OPTIONS:
    --schema <file>   Schema snapshot (YAML)
    --rules <file>    Grants and assigns (YAML)
    --roles <file>    Materialized role rows (YAML)
    --data <file>     Graph rows, table name -> row list (YAML)
    --tx <file>       Transaction to evaluate (YAML)
    --user <id>       Authenticated user id (omit for anonymous)
    --config <file>   Permissions config file
    --read            Filter as outbound reads instead of validating
    --verbose, -v     Enable verbose output
    --help, -h        Show this help"
    );
}
