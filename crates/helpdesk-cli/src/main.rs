use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use helpdesk_core::HelpdeskConfig;
use helpdesk_core::app::jobs::ManagerAssignedToProblemJob;
use helpdesk_core::app::{FreeHands, ManagerLoad, ManagerScheduler, Outbox};
use helpdesk_core::config::{LogConfig, LogFormat};
use helpdesk_core::domain::UserId;
use helpdesk_core::impls::{InMemoryEventStream, InMemoryManagerPool, MemoryDatabase};
use helpdesk_core::ports::ManagerPool;

type BoxError = Box<dyn Error + Send + Sync>;

/// Run the outbox and the manager scheduler against a seeded in-memory
/// database.
#[derive(Debug, Parser)]
#[command(name = "helpdesk", version)]
struct Args {
    /// TOML config file; a missing file means defaults.
    #[arg(long, default_value = "helpdesk.toml")]
    config: PathBuf,

    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long, value_name = "SECONDS")]
    run_for: Option<u64>,

    /// Problems waiting for a manager at startup.
    #[arg(long, default_value_t = 10)]
    problems: usize,

    /// Managers reporting free hands at startup.
    #[arg(long, default_value_t = 3)]
    managers: usize,
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let _ = match log.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
}

struct Wiring {
    db: Arc<MemoryDatabase>,
    pool: Arc<InMemoryManagerPool>,
    events: Arc<InMemoryEventStream>,
    load: Arc<ManagerLoad>,
}

async fn seed(w: &Wiring, problems: usize, managers: usize) -> Result<(), BoxError> {
    for i in 0..problems {
        let chat = w.db.create_chat(UserId::generate()).await;
        let problem = w.db.create_problem(chat).await?;
        w.db
            .create_client_message(problem, &format!("question #{i}"), true)
            .await?;
    }

    let free_hands = FreeHands::new(Arc::clone(&w.load), w.pool.clone());
    let cancel = CancellationToken::new();
    for _ in 0..managers {
        let manager_id = UserId::generate();
        let mut rx = w.events.subscribe(manager_id);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                tracing::info!(%manager_id, event_id = %event.event_id(), ?event, "event delivered");
            }
        });
        free_hands.handle(&cancel, manager_id).await?;
    }

    tracing::info!(problems, managers, "seeded in-memory database");
    Ok(())
}

async fn run(args: Args, cfg: HelpdeskConfig) -> Result<(), BoxError> {
    let db = Arc::new(MemoryDatabase::new());
    let w = Wiring {
        db: db.clone(),
        pool: Arc::new(InMemoryManagerPool::new()),
        events: Arc::new(InMemoryEventStream::new()),
        load: Arc::new(ManagerLoad::new(
            cfg.manager_load.max_problems_at_same_time,
            db.clone(),
        )?),
    };

    let mut outbox = Outbox::new(cfg.outbox.options(), db.clone(), db.clone())?;
    outbox.must_register_job(Arc::new(ManagerAssignedToProblemJob::new(
        db.clone(),
        db.clone(),
        Arc::clone(&w.load),
        w.events.clone(),
    )));
    let outbox = Arc::new(outbox);

    let scheduler = ManagerScheduler::new(
        cfg.manager_scheduler.period(),
        w.pool.clone(),
        db.clone(),
        db.clone(),
        outbox.clone(),
        db.clone(),
    )?;

    seed(&w, args.problems, args.managers).await?;

    // Whichever component stops first takes the others down with it.
    let cancel = CancellationToken::new();
    let outbox_task = tokio::spawn({
        let cancel = cancel.clone();
        let outbox = Arc::clone(&outbox);
        async move {
            let result = outbox.run(cancel.clone()).await;
            cancel.cancel();
            result
        }
    });
    let scheduler_task = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let result = scheduler.run(cancel.clone()).await;
            cancel.cancel();
            result
        }
    });

    let deadline = async {
        match args.run_for {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupt received, shutting down"),
        _ = deadline => tracing::info!("run time elapsed, shutting down"),
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();

    let outbox_result = outbox_task.await?;
    let scheduler_result = scheduler_task.await?;

    let counts = db.counts();
    tracing::info!(
        pending = counts.pending,
        reserved = counts.reserved,
        failed = counts.failed,
        pooled_managers = w.pool.size(),
        "final job counts"
    );

    outbox_result?;
    scheduler_result?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let cfg = match HelpdeskConfig::load(&args.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("helpdesk: {err}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&cfg.log);

    match run(args, cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "helpdesk stopped with an error");
            ExitCode::FAILURE
        }
    }
}
