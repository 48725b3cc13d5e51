//! The per-host session supervisor.
//!
//! Owns exactly one `server_id`: consumes that server's command queue,
//! drives the container engine, recovers orphans after a restart, and
//! heartbeats host health. Command handling is idempotent; permanent
//! failures are recorded on the session and surfaced to the bus so the
//! broker stops redelivering.

mod session;

pub use session::SessionHandle;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use manman_core::bus::messages::{Command, DownloadAddonCommand, StartSessionCommand};
use manman_core::bus::{self, topics, Broker};
use manman_core::model::{
    CapabilitySample, Session, SessionStats, SessionStatus, ServerStatus,
};
use manman_core::{Error, Result};

use crate::api_client::ApiClient;
use crate::datadir::DataDirs;
use crate::engine::{
    ContainerSpec, ContainerState, Engine, LABEL_ENV, LABEL_SERVER, LABEL_SESSION, LABEL_SGC,
    LABEL_TYPE, TYPE_GAME,
};
use crate::workshop::AddonOrchestrator;

pub struct Supervisor {
    pub server_id: i64,
    environment: Option<String>,
    engine: Engine,
    broker: Arc<Broker>,
    dirs: DataDirs,
    api: ApiClient,
    orchestrator: AddonOrchestrator,
    sessions: Arc<DashMap<i64, Arc<SessionHandle>>>,
    dropped_log_lines: Arc<AtomicU64>,
    stop_grace_secs: i64,
    cancel: CancellationToken,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        server_id: i64,
        environment: Option<String>,
        engine: Engine,
        broker: Arc<Broker>,
        dirs: DataDirs,
        api: ApiClient,
        orchestrator: AddonOrchestrator,
        stop_grace_secs: i64,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            server_id,
            environment,
            engine,
            broker,
            dirs,
            api,
            orchestrator,
            sessions: Arc::new(DashMap::new()),
            dropped_log_lines: Arc::new(AtomicU64::new(0)),
            stop_grace_secs,
            cancel,
        })
    }

    fn container_name(&self, sgc_id: i64, session_id: i64) -> String {
        Session::container_name(sgc_id, session_id, self.environment.as_deref())
    }

    /// Consume this host's command queue until cancelled. Prefetch 1
    /// keeps command handling FIFO per server.
    pub async fn run_command_loop(self: &Arc<Self>) -> Result<()> {
        let queue = topics::server_commands(self.server_id);
        self.broker.declare_queue(&queue, &[queue.as_str()]).await?;
        let channel = self.broker.create_channel().await?;
        let supervisor = self.clone();
        bus::consume(
            channel,
            &queue,
            "supervisor",
            1,
            self.cancel.clone(),
            move |payload| {
                let supervisor = supervisor.clone();
                async move {
                    let command: Command = serde_json::from_slice(&payload)?;
                    supervisor.dispatch(command).await
                }
            },
        )
        .await
    }

    async fn dispatch(self: &Arc<Self>, command: Command) -> Result<()> {
        match command {
            Command::StartSession(cmd) => self.handle_start(cmd).await,
            Command::StopSession { session_id, force } => {
                self.handle_stop(session_id, force).await
            }
            Command::KillSession { session_id } => self.handle_stop(session_id, true).await,
            Command::SendInput { session_id, input } => {
                self.handle_input(session_id, input).await
            }
            Command::DownloadAddon(cmd) => self.orchestrator.download(&cmd).await,
        }
    }

    /// The session start protocol. Failures anywhere before `running`
    /// tear the partial container down, record `crashed` on the session
    /// and surface a permanent bus failure.
    async fn handle_start(self: &Arc<Self>, cmd: StartSessionCommand) -> Result<()> {
        if self.sessions.contains_key(&cmd.session_id) {
            tracing::debug!(
                target: "manman::supervisor",
                session_id = cmd.session_id,
                "redelivered start for a supervised session, ignoring"
            );
            return Ok(());
        }

        // A redelivered start for a session that already reached a
        // terminal state must not resurrect it.
        let live = self.api.live_sessions(self.server_id).await?;
        if !live.iter().any(|row| row.session_id == cmd.session_id) {
            tracing::debug!(
                target: "manman::supervisor",
                session_id = cmd.session_id,
                "start for a session no longer live in the catalog, ignoring"
            );
            return Ok(());
        }

        // A forced start stops the deployment's previous live sessions.
        if cmd.force {
            let previous: Vec<Arc<SessionHandle>> = self
                .sessions
                .iter()
                .filter(|entry| entry.sgc_id == cmd.sgc_id)
                .map(|entry| entry.value().clone())
                .collect();
            for handle in previous {
                tracing::info!(
                    target: "manman::supervisor",
                    old_session = handle.session_id,
                    new_session = cmd.session_id,
                    "forced start, stopping previous session"
                );
                self.stop_handle(&handle, false).await?;
            }
        }

        session::publish_status(
            &self.broker,
            cmd.session_id,
            SessionStatus::Starting,
            None,
            None,
        )
        .await;

        match self.bring_up(&cmd).await {
            Ok(()) => {
                session::publish_status(
                    &self.broker,
                    cmd.session_id,
                    SessionStatus::Running,
                    None,
                    None,
                )
                .await;
                Ok(())
            }
            Err(e) => {
                let name = self.container_name(cmd.sgc_id, cmd.session_id);
                let _ = self.engine.remove(&name).await;
                self.sessions.remove(&cmd.session_id);
                session::publish_status(
                    &self.broker,
                    cmd.session_id,
                    SessionStatus::Crashed,
                    None,
                    Some(e.to_string()),
                )
                .await;
                Err(Error::permanent(format!(
                    "session {} failed to start: {e}",
                    cmd.session_id
                )))
            }
        }
    }

    async fn bring_up(self: &Arc<Self>, cmd: &StartSessionCommand) -> Result<()> {
        // Data directory tree with the exact volume subpaths.
        self.dirs.ensure_deployment(cmd.sgc_id, &cmd.volumes)?;

        // Preinstall every addon not already installed. The periodic
        // heartbeat task keeps reporting while downloads run.
        for spec in &cmd.addons {
            if spec.status == manman_core::model::InstallationStatus::Installed {
                continue;
            }
            self.orchestrator
                .download(&DownloadAddonCommand {
                    installation_id: spec.installation_id,
                    sgc_id: cmd.sgc_id,
                    addon_id: spec.addon_id,
                    workshop_id: spec.workshop_id,
                    steam_app_id: spec.steam_app_id,
                    install_path: spec.install_path.clone(),
                })
                .await?;
        }

        // Rendered configuration files.
        self.dirs.write_rendered_files(cmd.sgc_id, &cmd.files)?;

        // Create and start the container.
        let name = self.container_name(cmd.sgc_id, cmd.session_id);
        // A leftover container under this name is stale by definition.
        self.engine.remove(&name).await?;
        self.engine.ensure_image(&cmd.image).await?;

        let mut labels = HashMap::new();
        labels.insert(LABEL_SESSION.to_string(), cmd.session_id.to_string());
        labels.insert(LABEL_SGC.to_string(), cmd.sgc_id.to_string());
        labels.insert(LABEL_SERVER.to_string(), self.server_id.to_string());
        labels.insert(LABEL_TYPE.to_string(), TYPE_GAME.to_string());
        if let Some(ref env) = self.environment {
            labels.insert(LABEL_ENV.to_string(), env.clone());
        }

        let binds = cmd
            .volumes
            .iter()
            .map(|volume| {
                format!(
                    "{}:{}",
                    self.dirs.volume_path(cmd.sgc_id, volume).display(),
                    volume.container_path
                )
            })
            .collect();

        self.engine
            .create(&ContainerSpec {
                name: name.clone(),
                image: cmd.image.clone(),
                env: cmd.env.iter().map(|(k, v)| format!("{k}={v}")).collect(),
                cmd: cmd.args.clone(),
                labels,
                binds,
                ports: cmd.port_bindings.clone(),
                open_stdin: true,
            })
            .await?;
        self.engine.start(&name).await?;

        // Attach pipes and register the session.
        self.adopt_session(cmd.session_id, cmd.sgc_id, SessionStatus::Running);
        Ok(())
    }

    /// Register a (just started or recovered) running session and spawn
    /// its tasks.
    fn adopt_session(self: &Arc<Self>, session_id: i64, sgc_id: i64, status: SessionStatus) {
        let (stdin_tx, stdin_rx) = mpsc::channel::<Vec<u8>>(64);
        let handle = Arc::new(SessionHandle {
            session_id,
            sgc_id,
            container_name: self.container_name(sgc_id, session_id),
            status: std::sync::Mutex::new(status),
            stop_requested: std::sync::atomic::AtomicBool::new(false),
            stdin_tx,
            cancel: self.cancel.child_token(),
        });
        self.sessions.insert(session_id, handle.clone());

        let log_pump = session::spawn_log_pump(
            self.engine.clone(),
            self.broker.clone(),
            handle.clone(),
            self.dropped_log_lines.clone(),
        );
        session::spawn_stdin_writer(self.engine.clone(), handle.clone(), stdin_rx);
        session::spawn_exit_monitor(
            self.engine.clone(),
            self.broker.clone(),
            handle,
            self.sessions.clone(),
            log_pump,
        );
    }

    /// Stop/kill. Unknown or already-stopping sessions are ignored
    /// (repeated stop requests are no-ops).
    async fn handle_stop(self: &Arc<Self>, session_id: i64, force: bool) -> Result<()> {
        let Some(handle) = self.sessions.get(&session_id).map(|e| e.value().clone()) else {
            tracing::debug!(
                target: "manman::supervisor",
                session_id,
                "stop for unsupervised session, ignoring"
            );
            return Ok(());
        };
        self.stop_handle(&handle, force).await
    }

    async fn stop_handle(&self, handle: &SessionHandle, force: bool) -> Result<()> {
        if handle.stop_requested.swap(true, Ordering::SeqCst) && !force {
            return Ok(());
        }
        handle.set_status(SessionStatus::Stopping);
        session::publish_status(
            &self.broker,
            handle.session_id,
            SessionStatus::Stopping,
            None,
            None,
        )
        .await;
        if force {
            self.engine.kill(&handle.container_name).await
        } else {
            self.engine
                .stop(&handle.container_name, self.stop_grace_secs)
                .await
        }
        // The exit monitor observes the container exit and settles the
        // final status, flushes logs and removes the container.
    }

    /// Stdin for a live session; anything else is a permanent failure.
    async fn handle_input(self: &Arc<Self>, session_id: i64, input: Vec<u8>) -> Result<()> {
        let Some(handle) = self.sessions.get(&session_id).map(|e| e.value().clone()) else {
            return Err(Error::permanent(format!(
                "input for session {session_id} which is not live on this host"
            )));
        };
        if handle.status() != SessionStatus::Running {
            return Err(Error::permanent(format!(
                "input for session {session_id} in state {}",
                handle.status().as_str()
            )));
        }
        handle
            .stdin_tx
            .send(input)
            .await
            .map_err(|_| Error::permanent(format!("session {session_id} stdin pipe closed")))
    }

    // ------------------------------------------------------------------
    // Orphan recovery
    // ------------------------------------------------------------------

    /// Reconcile catalog state with the container engine. Runs at
    /// boot and from the periodic sweep; idempotent.
    pub async fn recover_orphans(self: &Arc<Self>) -> Result<()> {
        let live = self.api.live_sessions(self.server_id).await?;
        for row in live {
            if self.sessions.contains_key(&row.session_id) {
                continue;
            }
            let name = self.container_name(row.sgc_id, row.session_id);
            match self.engine.state(&name).await? {
                Some(ContainerState::Running) => {
                    tracing::info!(
                        target: "manman::supervisor",
                        session_id = row.session_id,
                        "orphan container running, re-attaching"
                    );
                    self.adopt_session(row.session_id, row.sgc_id, SessionStatus::Running);
                    // Already `running` in the catalog: nothing to report.
                    if row.status != SessionStatus::Running {
                        session::publish_status(
                            &self.broker,
                            row.session_id,
                            SessionStatus::Running,
                            None,
                            None,
                        )
                        .await;
                    }
                }
                Some(ContainerState::Exited { exit_code }) => {
                    let (status, error) = if exit_code == 0 {
                        (SessionStatus::Stopped, None)
                    } else {
                        (
                            SessionStatus::Crashed,
                            Some(format!("container exited with code {exit_code}")),
                        )
                    };
                    tracing::info!(
                        target: "manman::supervisor",
                        session_id = row.session_id,
                        exit_code,
                        "orphan container exited, settling"
                    );
                    session::publish_status(
                        &self.broker,
                        row.session_id,
                        status,
                        Some(exit_code as i32),
                        error,
                    )
                    .await;
                    self.engine.remove(&name).await?;
                }
                None => {
                    tracing::warn!(
                        target: "manman::supervisor",
                        session_id = row.session_id,
                        "orphan session has no container"
                    );
                    session::publish_status(
                        &self.broker,
                        row.session_id,
                        SessionStatus::Crashed,
                        None,
                        Some("container_missing".to_string()),
                    )
                    .await;
                }
            }
        }
        Ok(())
    }

    /// Periodic orphan sweep.
    pub async fn run_orphan_sweep(self: &Arc<Self>, interval_secs: u64) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // immediate first tick consumed by boot recovery
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.recover_orphans().await {
                tracing::warn!(target: "manman::supervisor", error = %e, "orphan sweep failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Heartbeat
    // ------------------------------------------------------------------

    pub fn session_stats(&self) -> SessionStats {
        let mut stats = SessionStats::default();
        for entry in self.sessions.iter() {
            stats.record(entry.status());
        }
        stats
    }

    /// Publish host health every `interval_secs` until cancelled.
    pub async fn run_heartbeat(self: &Arc<Self>, interval_secs: u64) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let capabilities = match self.engine.capabilities().await {
                Ok(capabilities) => capabilities,
                Err(e) => {
                    tracing::warn!(target: "manman::supervisor", error = %e, "capability probe failed");
                    CapabilitySample::default()
                }
            };
            let update = manman_core::bus::messages::HostHealthUpdate {
                server_id: self.server_id,
                status: ServerStatus::Online,
                timestamp: chrono::Utc::now(),
                sessions: self.session_stats(),
                capabilities,
            };
            if let Err(e) = self
                .broker
                .publish_json(&topics::host_health(self.server_id), &update)
                .await
            {
                tracing::warn!(target: "manman::supervisor", error = %e, "heartbeat publish failed");
            }
        }
    }

    /// Announce a host status transition (startup / graceful shutdown).
    pub async fn publish_host_status(&self, status: ServerStatus) {
        let update = manman_core::bus::messages::HostStatusUpdate {
            server_id: self.server_id,
            status,
            timestamp: chrono::Utc::now(),
        };
        if let Err(e) = self
            .broker
            .publish_json(&topics::host_status(self.server_id), &update)
            .await
        {
            tracing::warn!(target: "manman::supervisor", error = %e, "host status publish failed");
        }
    }

    /// Total log lines dropped under back-pressure since boot.
    pub fn dropped_log_lines(&self) -> u64 {
        self.dropped_log_lines.load(Ordering::Relaxed)
    }
}
