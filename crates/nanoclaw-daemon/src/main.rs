//! Daemon entry point: wire the stores and collaborators, then run the
//! three cooperative loops on their own threads until interrupted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nanoclaw_daemon::{
    ApprovalGateway, ChatTransport, HttpPlanner, HttpTransport, IpcWatcher, MessageLoop,
    NoopMemory, NullTransport, Planner, Scheduler, TurnDeps,
};
use nanoclaw_dispatch::Dispatcher;
use nanoclaw_store::{GroupRegistry, ProposalStore, SessionMap, TaskStore};
use nanoclaw_types::CoreConfig;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = CoreConfig::from_env().context("loading daemon configuration")?;
    std::fs::create_dir_all(&config.data_dir).context("creating the data directory")?;

    let proposals = Arc::new(Mutex::new(
        ProposalStore::open(ProposalStore::default_path(&config.data_dir))
            .context("opening the proposal journal")?,
    ));
    let sessions = Arc::new(Mutex::new(
        SessionMap::load(&config.data_dir).context("loading the session map")?,
    ));
    let groups = Arc::new(Mutex::new(
        GroupRegistry::load(&config.data_dir).context("loading registered groups")?,
    ));
    let tasks = Arc::new(Mutex::new(
        TaskStore::load(&config.data_dir).context("loading scheduled tasks")?,
    ));

    let planner: Arc<dyn Planner> =
        Arc::new(HttpPlanner::new(config.planner.clone()).context("building the planner client")?);
    let transport: Arc<dyn ChatTransport> = match std::env::var("NANOCLAW_CHAT_BASE_URL") {
        Ok(url) if !url.is_empty() => {
            Arc::new(HttpTransport::new(url).context("building the chat transport")?)
        }
        _ => {
            warn!("NANOCLAW_CHAT_BASE_URL not set, using the null transport");
            Arc::new(NullTransport)
        }
    };
    let dispatcher =
        Dispatcher::new(config.webhook.clone()).context("building the dispatcher")?;

    let turn_deps = TurnDeps {
        planner: planner.clone(),
        memory: Arc::new(NoopMemory),
        transport: transport.clone(),
        proposals: proposals.clone(),
        sessions,
        data_dir: config.data_dir.clone(),
        chat_max_len: config.chat_max_len,
    };

    let gateway = Arc::new(ApprovalGateway::new(
        proposals,
        dispatcher,
        transport.clone(),
        planner.clone(),
        config.chat_max_len,
    ));

    let sched_deps = TurnDeps {
        planner,
        memory: Arc::new(NoopMemory),
        transport: transport.clone(),
        proposals: turn_deps.proposals.clone(),
        sessions: turn_deps.sessions.clone(),
        data_dir: config.data_dir.clone(),
        chat_max_len: config.chat_max_len,
    };

    let mut message_loop = MessageLoop::new(
        turn_deps,
        gateway,
        groups.clone(),
        config.assistant_name.clone(),
    )
    .context("starting the message loop")?;

    let ipc_watcher = IpcWatcher::new(
        config.ipc_dir(),
        config.data_dir.clone(),
        groups,
        tasks.clone(),
        transport,
        config.scheduler_timezone.clone(),
    );

    let scheduler = Scheduler::new(sched_deps, tasks, config.scheduler_timezone.clone());

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc_handler(move || shutdown.store(true, Ordering::Relaxed));
    }

    info!(data_dir = %config.data_dir.display(), "daemon starting");

    std::thread::scope(|scope| {
        let poll = Duration::from_secs(config.poll_secs.max(1));
        let ipc_poll = Duration::from_secs(config.ipc_poll_secs.max(1));
        let sched_poll = Duration::from_secs(config.scheduler_secs.max(1));

        let message_shutdown = shutdown.clone();
        scope.spawn(move || {
            while !message_shutdown.load(Ordering::Relaxed) {
                if let Err(e) = message_loop.tick() {
                    warn!(error = %e, "message loop tick failed");
                }
                std::thread::sleep(poll);
            }
        });

        let ipc_shutdown = shutdown.clone();
        scope.spawn(move || {
            while !ipc_shutdown.load(Ordering::Relaxed) {
                if let Err(e) = ipc_watcher.tick() {
                    warn!(error = %e, "IPC watcher tick failed");
                }
                std::thread::sleep(ipc_poll);
            }
        });

        let sched_shutdown = shutdown.clone();
        scope.spawn(move || {
            while !sched_shutdown.load(Ordering::Relaxed) {
                if let Err(e) = scheduler.tick() {
                    warn!(error = %e, "scheduler tick failed");
                }
                std::thread::sleep(sched_poll);
            }
        });
    });

    info!("daemon stopped");
    Ok(())
}

/// Install a SIGINT/SIGTERM handler without pulling in a signal crate: a
/// plain thread parked on the standard ctrl-c future is enough for the
/// daemon's cooperative loops.
fn ctrlc_handler(on_signal: impl Fn() + Send + 'static) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                warn!(error = %e, "signal handler unavailable");
                return;
            }
        };
        runtime.block_on(async {
            let _ = tokio::signal::ctrl_c().await;
        });
        on_signal();
    });
}
