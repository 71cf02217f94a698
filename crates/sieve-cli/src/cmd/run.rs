use crate::output::print_json;
use anyhow::Context;
use clap::Args;
use serde::Serialize;
use sieve_cli::plan::Plan;
use sieve_cli::setup;
use sieve_core::maildir::Maildir;
use sieve_core::smtp::OutboxDir;
use sieve_core::{ExecOutcome, ExecStatus, MessageData, RuntimeEnv, SieveResult};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// RunExit: non-zero exit for a run that did not end in `ok`
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct RunExit {
    pub outcome: ExecOutcome,
}

impl std::fmt::Display for RunExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.outcome {
            ExecOutcome::KeepFailed => write!(f, "implicit keep failed; message was not delivered"),
            outcome => write!(f, "run finished with outcome '{outcome}'"),
        }
    }
}

impl std::error::Error for RunExit {}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Action plan (YAML list of actions)
    pub plan: PathBuf,

    /// Message to filter
    #[arg(long)]
    pub message: PathBuf,

    /// Envelope sender
    #[arg(long)]
    pub sender: Option<String>,

    /// Envelope recipient
    #[arg(long)]
    pub recipient: Option<String>,

    /// Maildir tree to store into (without one, store actions are skipped)
    #[arg(long)]
    pub mail_root: Option<PathBuf>,

    /// Directory outgoing notifications are queued in
    #[arg(long)]
    pub outbox: Option<PathBuf>,

    /// Log file for run diagnostics (default: config log_file, then stderr)
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// Print what would be done instead of doing it
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Serialize)]
struct DryRun<'a> {
    actions: Vec<&'a str>,
    printed: String,
}

pub fn run(args: RunArgs, config_path: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let config = setup::load_config(config_path)?;
    let raw = std::fs::read(&args.message)
        .with_context(|| format!("failed to read message {}", args.message.display()))?;
    let message = MessageData::parse(raw, args.sender.as_deref(), args.recipient.as_deref())
        .context("failed to parse message")?;
    let plan = Plan::load(&args.plan)?;

    let ehandler = setup::error_handler(&config, args.log.as_deref());
    let mut result = SieveResult::new(config.clone(), ehandler);
    let applied = plan.apply(&mut result, &message);

    if args.dry_run {
        if json {
            print_json(&DryRun {
                actions: result.iter().map(|e| e.action_type().name).collect(),
                printed: result.print(),
            })?;
        } else {
            print!("{}", result.print());
        }
        return applied;
    }

    let mut maildir = args
        .mail_root
        .map(|root| Maildir::new(root).with_hostname(&config.hostname));
    let mut outbox = args.outbox.map(OutboxDir::new);

    let status = match &applied {
        Ok(()) => result.execute(runtime(&message, maildir.as_mut(), outbox.as_mut())),
        Err(e) => {
            tracing::debug!(error = %e, "plan aborted before execution");
            result.abort()
        }
    };
    let status = if status.keep {
        result.implicit_keep(runtime(&message, maildir.as_mut(), outbox.as_mut()))
    } else {
        status
    };

    print_status(&status, json)?;
    if status.is_ok() {
        Ok(())
    } else {
        Err(RunExit {
            outcome: status.outcome,
        }
        .into())
    }
}

fn runtime<'a>(
    message: &'a MessageData,
    store: Option<&'a mut Maildir>,
    smtp: Option<&'a mut OutboxDir>,
) -> RuntimeEnv<'a> {
    let mut env = RuntimeEnv::new(message);
    if let Some(store) = store {
        env = env.with_store(store);
    }
    if let Some(smtp) = smtp {
        env = env.with_smtp(smtp);
    }
    env
}

fn print_status(status: &ExecStatus, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(status);
    }
    let yes_no = |b: bool| if b { "yes" } else { "no" };
    println!("outcome        : {}", status.outcome);
    println!("keep           : {}", yes_no(status.keep));
    println!("message saved  : {}", yes_no(status.message_saved));
    if let Some(storage) = &status.last_storage {
        println!("storage        : {storage}");
    }
    if let Some(err) = &status.last_storage_error {
        println!("storage error  : {} ({})", err, err.kind);
    }
    Ok(())
}
