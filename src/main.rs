use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand};
use crossbeam::sync::WaitGroup;
use log::{info, warn};

use txscope::transaction::{ReplayMode, RetryPolicy, TransactionManager};
use txscope::{DataValue, MemoryStore, Statement, TableSchema, TxnError};

#[derive(Parser)]
#[command(author, version, about = "txscope - transaction scopes with transparent retry of aborted attempts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run concurrent read-before-write transactions on one counter row
    Contend {
        /// Number of concurrent transactions
        #[arg(short, long, default_value_t = 8)]
        threads: usize,

        /// Surface every abort instead of retrying
        #[arg(long)]
        no_retry: bool,

        /// Attempts per transaction, including the first
        #[arg(short, long, default_value_t = 10)]
        max_attempts: u32,

        /// Re-run the transaction body on abort instead of replaying its writes
        #[arg(long)]
        reexecute: bool,

        /// Re-check logged reads when replaying
        #[arg(long)]
        verified: bool,
    },
}

#[derive(Debug, Default)]
struct Tally {
    committed: AtomicU32,
    aborted: AtomicU32,
    failed: AtomicU32,
}

fn counter_value(manager: &TransactionManager) -> Result<i64, TxnError> {
    manager.run(|scope| {
        let rows = scope.query(Statement::read("SELECT FROM counter").bind("id", 1))?;
        Ok(rows
            .first()
            .and_then(|row| row.get("value"))
            .and_then(DataValue::as_integer)
            .unwrap_or(0))
    })
}

fn contend(threads: usize, policy: RetryPolicy) -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    store.create_table(TableSchema::new("counter"));
    store.create_table(TableSchema::new("visits").with_reference("counter_id", "counter"));

    let manager = TransactionManager::new(store.clone(), policy);
    manager.run(|scope| {
        scope.stage(Statement::write("INSERT INTO counter").bind("id", 1).bind("value", 0))
    })?;

    info!("Starting {} contending transactions", threads);
    let tally = Tally::default();
    let started = Instant::now();
    let ready = WaitGroup::new();

    crossbeam::scope(|s| {
        for worker in 0..threads {
            let manager = &manager;
            let tally = &tally;
            let mut gate = Some(ready.clone());

            s.spawn(move |_| {
                let result = manager.run(|scope| {
                    let rows = scope.query(Statement::read("SELECT FROM counter").bind("id", 1))?;
                    let value = rows
                        .first()
                        .and_then(|row| row.get("value"))
                        .and_then(DataValue::as_integer)
                        .unwrap_or(0);

                    // Every worker reads before anyone writes
                    if let Some(gate) = gate.take() {
                        gate.wait();
                    }

                    scope.stage(Statement::write("UPDATE counter").bind("id", 1).bind("value", value + 1))?;
                    scope.stage(
                        Statement::write("INSERT INTO visits")
                            .bind("id", worker as i64)
                            .bind("counter_id", 1)
                            .bind("seen", value),
                    )?;
                    Ok(())
                });

                match result {
                    Ok(()) => {
                        tally.committed.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(err) if err.is_aborted() => {
                        warn!("Worker {} gave up: {}", worker, err);
                        tally.aborted.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(err) => {
                        warn!("Worker {} failed: {}", worker, err);
                        tally.failed.fetch_add(1, Ordering::SeqCst);
                    }
                }
            });
        }
        drop(ready);
    })
    .map_err(|_| anyhow::anyhow!("a worker thread panicked"))?;

    let stats = store.stats();
    println!("transactions:      {}", threads);
    println!("committed:         {}", tally.committed.load(Ordering::SeqCst));
    println!("aborts surfaced:   {}", tally.aborted.load(Ordering::SeqCst));
    println!("other failures:    {}", tally.failed.load(Ordering::SeqCst));
    println!("server aborts:     {}", stats.aborts);
    println!("final counter:     {}", counter_value(&manager)?);
    println!("elapsed:           {:?}", started.elapsed());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Contend { threads, no_retry, max_attempts, reexecute, verified } => {
            let mut policy = if no_retry {
                RetryPolicy::disabled()
            } else {
                RetryPolicy::new().with_max_attempts(max_attempts)
            };
            if reexecute {
                policy = policy.with_body_reexecution();
            }
            if verified {
                policy = policy.with_replay_mode(ReplayMode::Verified);
            }
            contend(threads, policy)
        }
    }
}
