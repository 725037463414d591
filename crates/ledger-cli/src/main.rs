//! ledger-cli: inspección operativa de checkpoints.
//!
//! `ledger-cli flows list [--dir <path> | --pg] [--status <STATUS>]`
//! `ledger-cli flows show <flow_id> [--dir <path> | --pg]`
//! `ledger-cli flows delete <flow_id> [--dir <path> | --pg]`
//!
//! Sin `--dir` ni `--pg` se usa `LEDGER_CHECKPOINT_DIR`.
use std::process::exit;
use std::sync::Arc;

use ledger_core::{Checkpoint, CheckpointError, CheckpointStore, FileCheckpointStore, FlowStatus};
use ledger_persistence::{build_dev_pool_from_env, PgCheckpointStore, PoolProvider};
use uuid::Uuid;

const USAGE: &str = "Uso: ledger-cli flows <list|show <id>|delete <id>> [--dir <path> | --pg] [--status <STATUS>]";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Backend {
    Dir(String),
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    List { status: Option<FlowStatus> },
    Show(Uuid),
    Delete(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Invocation {
    command: Command,
    backend: Backend,
}

fn parse(args: &[String], default_dir: Option<String>) -> Result<Invocation, String> {
    if args.first().map(String::as_str) != Some("flows") {
        return Err(USAGE.into());
    }
    let mut positional = Vec::new();
    let mut backend = None;
    let mut status = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--dir" => {
                i += 1;
                let dir = args.get(i).ok_or("--dir requiere una ruta")?;
                backend = Some(Backend::Dir(dir.clone()));
            }
            "--pg" => backend = Some(Backend::Postgres),
            "--status" => {
                i += 1;
                let raw = args.get(i).ok_or("--status requiere un valor")?;
                status = Some(FlowStatus::parse(&raw.to_uppercase()).ok_or_else(|| format!("estado desconocido: {raw}"))?);
            }
            other => positional.push(other.to_string()),
        }
        i += 1;
    }
    let backend = match backend.or_else(|| default_dir.map(Backend::Dir)) {
        Some(b) => b,
        None => return Err("indicar --dir <path>, --pg o LEDGER_CHECKPOINT_DIR".into()),
    };
    let flow_id = |p: Option<&String>| -> Result<Uuid, String> {
        let raw = p.ok_or_else(|| USAGE.to_string())?;
        Uuid::parse_str(raw).map_err(|e| format!("flow_id inválido {raw}: {e}"))
    };
    let command = match positional.first().map(String::as_str) {
        Some("list") => Command::List { status },
        Some("show") => Command::Show(flow_id(positional.get(1))?),
        Some("delete") => Command::Delete(flow_id(positional.get(1))?),
        _ => return Err(USAGE.into()),
    };
    Ok(Invocation { command, backend })
}

fn open_store(backend: &Backend) -> Result<Arc<dyn CheckpointStore>, String> {
    match backend {
        Backend::Dir(dir) => {
            let store = FileCheckpointStore::open(dir).map_err(|e| format!("no se pudo abrir {dir}: {e}"))?;
            Ok(Arc::new(store))
        }
        Backend::Postgres => {
            let pool = build_dev_pool_from_env().map_err(|e| format!("pool error: {e}"))?;
            Ok(Arc::new(PgCheckpointStore::new(PoolProvider { pool })))
        }
    }
}

fn summary_line(cp: &Checkpoint) -> String {
    format!("{}  {:<9}  {:<16}  {:<12}  {}",
            cp.flow_id,
            cp.status.as_str(),
            cp.logic_type,
            cp.progress_step.as_deref().unwrap_or("-"),
            cp.updated_at.to_rfc3339())
}

fn list(store: &dyn CheckpointStore, status: Option<FlowStatus>) -> Result<Vec<String>, CheckpointError> {
    let mut lines = Vec::new();
    for (id, entry) in store.scan()? {
        match entry {
            Ok(cp) if status.map_or(true, |s| s == cp.status) => lines.push(summary_line(&cp)),
            Ok(_) => {}
            Err(e) if status.is_none() => lines.push(format!("{id}  CORRUPTED  {e}")),
            Err(_) => {}
        }
    }
    Ok(lines)
}

/// Checkpoint en JSON legible, con la continuación expandida.
fn render(cp: &Checkpoint) -> Result<String, serde_json::Error> {
    let mut value = serde_json::to_value(cp)?;
    if let Ok(continuation) = serde_json::from_str::<serde_json::Value>(&cp.continuation) {
        value["continuation"] = continuation;
    }
    serde_json::to_string_pretty(&value)
}

fn run(invocation: Invocation) -> Result<(), (i32, String)> {
    let store = open_store(&invocation.backend).map_err(|e| (5, e))?;
    match invocation.command {
        Command::List { status } => {
            let lines = list(store.as_ref(), status).map_err(|e| (5, e.to_string()))?;
            if lines.is_empty() {
                println!("(sin checkpoints)");
            }
            for line in lines {
                println!("{line}");
            }
        }
        Command::Show(id) => match store.get(id) {
            Ok(Some(cp)) => println!("{}", render(&cp).map_err(|e| (5, e.to_string()))?),
            Ok(None) => return Err((4, format!("flow no encontrado: {id}"))),
            Err(e) => return Err((5, e.to_string())),
        },
        Command::Delete(id) => {
            store.delete(id).map_err(|e| (5, e.to_string()))?;
            log::info!("cli.delete:done flow_id={id}");
            println!("borrado: {id}");
        }
    }
    Ok(())
}

fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                             .with_writer(std::io::stderr)
                             .init();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let invocation = match parse(&args, std::env::var("LEDGER_CHECKPOINT_DIR").ok()) {
        Ok(inv) => inv,
        Err(msg) => {
            eprintln!("[ledger-cli] {msg}");
            exit(2);
        }
    };
    if let Err((code, msg)) = run(invocation) {
        eprintln!("[ledger-cli] {msg}");
        exit(code);
    }
}
