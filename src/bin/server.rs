//! The reactor/listener binary (§2, §4.8): loads configuration, builds the tunables registry,
//! starts the executor and reactor shards, and runs until killed.

use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use meta_session::audit::WriterAuditSink;
use meta_session::config::ServerConfig;
use meta_session::error::ServerError;
use meta_session::executor::{AckHandler, Executor, ThreadPoolExecutor};
use meta_session::reactor::{PreparedServer, ShardContext};
use meta_session::roster::Roster;
use meta_session::rpc::{LineFramer, LineParser};
use meta_session::tunables::Tunables;

fn run() -> Result<(), ServerError> {
    env_logger::init();

    let config_path = env::args().nth(1).unwrap_or_else(|| "meta-session.toml".into());
    let config = ServerConfig::load(&config_path)?;

    let tunables = Arc::new(Tunables::from_config(&config, config.worker_threads > 1));
    let roster = Arc::new(Roster::new());
    let audit: Arc<dyn meta_session::audit::AuditSink> =
        Arc::new(WriterAuditSink::new(std::io::stdout()));

    let context = ShardContext {
        tunables: Arc::clone(&tunables),
        roster: Arc::clone(&roster),
        audit,
        framer: Arc::new(LineFramer),
        parser: Arc::new(LineParser),
    };

    // `PreparedServer::bind` builds the reactor shards (and their completion channels) before
    // the executor exists, because the executor needs each shard's `ShardHandle` to deliver
    // completions, while the shards in turn need a live executor reference to run (§5
    // "Executor hand-off"). Binding first and handing the resulting handles to the executor
    // breaks that cycle.
    let (prepared, shard_handles) =
        PreparedServer::bind(config.bind_addr, config.worker_threads, context)?;

    // The executor's worker count and the reactor's shard count are independent knobs; a single
    // config value drives both here, since the spec leaves executor sizing unspecified beyond
    // "fixed-size thread pool" (§5).
    let handler = Arc::new(AckHandler);
    let executor: Arc<dyn Executor + Send + Sync> = Arc::new(ThreadPoolExecutor::start(
        config.worker_threads,
        shard_handles,
        handler,
    ));

    let server = prepared.run(Arc::clone(&executor));
    server.join();
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("meta-session-server: {err}");
            ExitCode::FAILURE
        }
    }
}
