//! Session lifecycle orchestration and the render-pipeline assembly.
//!
//! `StartSession` validates preconditions synchronously, renders the full
//! configuration, snapshots the reachable addon set, inserts the session
//! row and publishes the command. Everything after publication is
//! asynchronous: the supervisor reports status over the bus and the
//! consumers fold it back into the catalog.

use std::collections::BTreeMap;

use chrono::Utc;
use manman_core::bus::messages::{
    AddonInstallSpec, Command, SessionStatusUpdate, StartSessionCommand,
};
use manman_core::bus::topics;
use manman_core::model::{
    Deployment, GameConfig, PatchLevel, Session, SessionStatus, StrategyType,
};
use manman_core::render::{self, ParamScopes, RenderedStrategy, Unresolved};
use manman_core::{Error, Result};

use crate::state::AppState;

/// Everything the renderer produced for one (deployment, session) pair.
pub struct RenderBundle {
    pub effective: BTreeMap<String, String>,
    pub strategies: Vec<RenderedStrategy>,
    /// Container environment: config env template merged with env_vars
    /// strategy outputs.
    pub env: BTreeMap<String, String>,
    /// Container argv: config args template followed by cli_args strategy
    /// outputs.
    pub args: Vec<String>,
}

/// Run the full render pipeline for a deployment.
///
/// `session_id` selects session-level patches and parameter values; pass
/// `None` when the session does not exist yet (start path) — a brand-new
/// session cannot have stored values, the overrides stand in for them.
pub async fn render_for(
    state: &AppState,
    deployment: &Deployment,
    config: &GameConfig,
    session_id: Option<i64>,
    overrides: &BTreeMap<String, String>,
) -> Result<RenderBundle> {
    let definitions = state
        .catalog
        .parameter_definitions_for_game(config.game_id)
        .await?;

    let mut session_values = match session_id {
        Some(id) => {
            state
                .catalog
                .parameter_values_at(PatchLevel::Session, id)
                .await?
        }
        None => BTreeMap::new(),
    };
    session_values.extend(overrides.clone());

    let mut deployment_values = state
        .catalog
        .parameter_values_at(PatchLevel::ServerGameConfig, deployment.sgc_id)
        .await?;
    // The deployment's inline parameter bag counts at the same scope;
    // explicit rows win over the bag.
    for (key, value) in &deployment.parameters {
        deployment_values.entry(key.clone()).or_insert(value.clone());
    }

    let scopes = ParamScopes {
        game_config: state
            .catalog
            .parameter_values_at(PatchLevel::GameConfig, config.config_id)
            .await?,
        deployment: deployment_values,
        session: session_values,
    };
    let effective = render::resolve_effective(&definitions, &scopes)?;

    let strategies = state.catalog.strategies_for_game(config.game_id).await?;
    let strategy_ids: Vec<i64> = strategies.iter().map(|s| s.strategy_id).collect();
    let bindings = state.catalog.bindings_for_strategies(&strategy_ids).await?;
    let patches = state
        .catalog
        .patches_for_render(&strategy_ids, config.config_id, deployment.sgc_id, session_id)
        .await?;

    let rendered = render::render_all(
        strategies,
        &definitions,
        |strategy_id| {
            bindings
                .iter()
                .filter(|b| b.strategy_id == strategy_id)
                .collect()
        },
        |strategy_id| {
            patches
                .iter()
                .filter(|p| p.strategy_id == strategy_id)
                .collect()
        },
        &effective,
    )?;

    let (env, args) = assemble_env_args(config, &rendered, &effective)?;
    Ok(RenderBundle {
        effective,
        strategies: rendered,
        env,
        args,
    })
}

/// Merge the config's templates with strategy outputs into the final
/// container env and argv.
fn assemble_env_args(
    config: &GameConfig,
    rendered: &[RenderedStrategy],
    effective: &BTreeMap<String, String>,
) -> Result<(BTreeMap<String, String>, Vec<String>)> {
    let mut env = BTreeMap::new();
    for (key, template) in &config.env_template {
        env.insert(
            key.clone(),
            render::substitute(template, effective, Unresolved::Fail)?,
        );
    }
    let mut args = Vec::new();
    for fragment in &config.args_template {
        args.push(render::substitute(fragment, effective, Unresolved::Fail)?);
    }
    for strategy in rendered {
        match strategy.strategy_type {
            StrategyType::EnvVars => env.extend(strategy.env.clone()),
            StrategyType::CliArgs => args.extend(strategy.argv.clone()),
            _ => {}
        }
    }
    Ok((env, args))
}

/// Start a session on a deployment's host.
pub async fn start_session(
    state: &AppState,
    sgc_id: i64,
    overrides: BTreeMap<String, String>,
    force: bool,
) -> Result<Session> {
    let deployment = state.catalog.get_deployment(sgc_id).await?;
    let server = state.catalog.get_server(deployment.server_id).await?;
    if !server.status.accepts_work() {
        return Err(Error::precondition(format!(
            "server {} is {}",
            server.server_id,
            server.status.as_str()
        )));
    }
    let live = state.catalog.live_sessions_for_sgc(sgc_id).await?;
    if !live.is_empty() && !force {
        return Err(Error::precondition(format!(
            "deployment {sgc_id} already has live session {}",
            live[0].session_id
        )));
    }

    let config = state
        .catalog
        .get_game_config(deployment.game_config_id)
        .await?;
    // Render before any row mutation so a validation failure (missing
    // required parameter, bad template) surfaces as a synchronous error.
    let bundle = render_for(state, &deployment, &config, None, &overrides).await?;

    let addons = snapshot_addons(state, &deployment).await?;

    let session = state.catalog.create_session(sgc_id).await?;

    let files = bundle
        .strategies
        .iter()
        .filter(|s| s.strategy_type.writes_file())
        .filter_map(|s| {
            s.target_path.as_ref().map(|path| {
                manman_core::bus::messages::RenderedFile {
                    path: path.clone(),
                    content: s.rendered_content.clone(),
                }
            })
        })
        .collect();

    let command = Command::StartSession(StartSessionCommand {
        session_id: session.session_id,
        sgc_id,
        force,
        image: config.image.clone(),
        env: bundle.env,
        args: bundle.args,
        volumes: config.volumes.clone(),
        port_bindings: deployment.port_bindings.clone(),
        files,
        addons,
    });
    state
        .broker
        .publish_json(&topics::server_commands(server.server_id), &command)
        .await?;

    tracing::info!(
        target: "manman::lifecycle",
        session_id = session.session_id,
        sgc_id,
        server_id = server.server_id,
        force,
        "session start dispatched"
    );
    Ok(session)
}

/// Snapshot the reachable addon set with installation rows created for
/// anything new, so the host's preinstall gate needs no catalog access.
async fn snapshot_addons(
    state: &AppState,
    deployment: &Deployment,
) -> Result<Vec<AddonInstallSpec>> {
    let addons = state.catalog.reachable_addons(deployment.sgc_id).await?;
    let mut specs = Vec::with_capacity(addons.len());
    for addon in addons {
        let game = state.catalog.get_game(addon.game_id).await?;
        let steam_app_id = game.steam_app_id.ok_or_else(|| {
            Error::precondition(format!(
                "game {} has no steam app id; addon {} cannot be downloaded",
                game.game_id, addon.addon_id
            ))
        })?;
        let install_path = state.catalog.resolve_install_path(&addon).await?;
        let installation = state
            .catalog
            .find_or_create_installation(deployment.sgc_id, addon.addon_id, &install_path)
            .await?;
        specs.push(AddonInstallSpec {
            installation_id: installation.installation_id,
            addon_id: addon.addon_id,
            workshop_id: addon.workshop_id,
            steam_app_id,
            install_path,
            status: installation.status,
        });
    }
    Ok(specs)
}

/// `StopSession` / `KillSession`. Idempotent: a terminal session is
/// returned unchanged.
pub async fn stop_session(state: &AppState, session_id: i64, force: bool) -> Result<Session> {
    let session = state.catalog.get_session(session_id).await?;
    if session.status.is_terminal() {
        return Ok(session);
    }
    let deployment = state.catalog.get_deployment(session.sgc_id).await?;

    let updated = state
        .catalog
        .apply_session_status(&SessionStatusUpdate {
            session_id,
            status: SessionStatus::Stopping,
            timestamp: Utc::now(),
            exit_code: None,
            error_message: None,
        })
        .await?
        .unwrap_or(session);

    let command = if force {
        Command::KillSession { session_id }
    } else {
        Command::StopSession {
            session_id,
            force: false,
        }
    };
    state
        .broker
        .publish_json(&topics::server_commands(deployment.server_id), &command)
        .await?;
    Ok(updated)
}

/// `SendSessionInput`: stdin bytes to a live session.
pub async fn send_input(state: &AppState, session_id: i64, input: Vec<u8>) -> Result<()> {
    let session = state.catalog.get_session(session_id).await?;
    if !session.status.is_live() {
        return Err(Error::precondition(format!(
            "session {session_id} is {}",
            session.status.as_str()
        )));
    }
    let deployment = state.catalog.get_deployment(session.sgc_id).await?;
    state
        .broker
        .publish_json(
            &topics::server_commands(deployment.server_id),
            &Command::SendInput { session_id, input },
        )
        .await
}

/// `ExecuteAction`: resolve, validate inputs, render, record, send.
pub async fn execute_action(
    state: &AppState,
    action_id: i64,
    session_id: i64,
    inputs: BTreeMap<String, String>,
) -> Result<manman_core::model::ActionExecution> {
    let action = state.catalog.get_action(action_id).await?;
    let session = state.catalog.get_session(session_id).await?;
    if !session.status.is_live() {
        return Err(Error::precondition(format!(
            "session {session_id} is {}",
            session.status.as_str()
        )));
    }

    let mut values = BTreeMap::new();
    for field in &action.fields {
        match inputs.get(&field.key).or(field.default_value.as_ref()) {
            Some(value) => {
                field.validate(value)?;
                values.insert(field.key.clone(), value.clone());
            }
            None if field.required => {
                return Err(Error::validation(format!(
                    "action input {:?} is required",
                    field.key
                )));
            }
            None => {}
        }
    }

    let rendered = render::substitute(&action.command_template, &values, Unresolved::Fail)?;
    let execution = state
        .catalog
        .record_action_execution(action_id, session_id, &rendered)
        .await?;

    let mut payload = rendered.into_bytes();
    payload.push(b'\n');
    send_input(state, session_id, payload).await?;
    Ok(execution)
}

/// Walk the action inheritance chain for a level/entity and resolve with
/// child-wins semantics.
pub async fn resolve_action_chain(
    state: &AppState,
    level: manman_core::model::ActionLevel,
    entity_id: i64,
) -> Result<Vec<manman_core::model::ActionDefinition>> {
    use manman_core::model::ActionLevel;

    let mut levels = Vec::new();
    match level {
        ActionLevel::Game => {
            levels.push(state.catalog.actions_at(ActionLevel::Game, entity_id).await?);
        }
        ActionLevel::GameConfig => {
            let config = state.catalog.get_game_config(entity_id).await?;
            levels.push(
                state
                    .catalog
                    .actions_at(ActionLevel::Game, config.game_id)
                    .await?,
            );
            levels.push(
                state
                    .catalog
                    .actions_at(ActionLevel::GameConfig, entity_id)
                    .await?,
            );
        }
        ActionLevel::Deployment => {
            let deployment = state.catalog.get_deployment(entity_id).await?;
            let config = state
                .catalog
                .get_game_config(deployment.game_config_id)
                .await?;
            levels.push(
                state
                    .catalog
                    .actions_at(ActionLevel::Game, config.game_id)
                    .await?,
            );
            levels.push(
                state
                    .catalog
                    .actions_at(ActionLevel::GameConfig, config.config_id)
                    .await?,
            );
            levels.push(
                state
                    .catalog
                    .actions_at(ActionLevel::Deployment, entity_id)
                    .await?,
            );
        }
    }
    Ok(manman_core::model::resolve_actions(levels))
}

/// Publish a fresh `DownloadAddon` for an installation (explicit install
/// or retry request).
pub async fn dispatch_download(
    state: &AppState,
    installation: &manman_core::model::WorkshopInstallation,
) -> Result<()> {
    let addon = state.catalog.get_addon(installation.addon_id).await?;
    let game = state.catalog.get_game(addon.game_id).await?;
    let steam_app_id = game.steam_app_id.ok_or_else(|| {
        Error::precondition(format!("game {} has no steam app id", game.game_id))
    })?;
    let deployment = state.catalog.get_deployment(installation.sgc_id).await?;

    state
        .broker
        .publish_json(
            &topics::server_commands(deployment.server_id),
            &Command::DownloadAddon(manman_core::bus::messages::DownloadAddonCommand {
                installation_id: installation.installation_id,
                sgc_id: installation.sgc_id,
                addon_id: addon.addon_id,
                workshop_id: addon.workshop_id,
                steam_app_id,
                install_path: installation.installation_path.clone(),
            }),
        )
        .await
}

/// Snapshot of one addon's state for `GetDeploymentAddons`.
pub struct DeploymentAddonView {
    pub addon: manman_core::model::WorkshopAddon,
    pub installation: Option<manman_core::model::WorkshopInstallation>,
    pub resolved_install_path: String,
}

pub async fn deployment_addons(
    state: &AppState,
    sgc_id: i64,
) -> Result<Vec<DeploymentAddonView>> {
    // Existence check so an unknown deployment is NOT_FOUND, not empty.
    state.catalog.get_deployment(sgc_id).await?;
    let addons = state.catalog.reachable_addons(sgc_id).await?;
    let mut views = Vec::with_capacity(addons.len());
    for addon in addons {
        let resolved_install_path = state.catalog.resolve_install_path(&addon).await?;
        let installation = state.catalog.installation_for(sgc_id, addon.addon_id).await?;
        views.push(DeploymentAddonView {
            addon,
            installation,
            resolved_install_path,
        });
    }
    Ok(views)
}

/// Validation issues and a coarse estimate for `ValidateDeployment`.
pub async fn validate_deployment(
    state: &AppState,
    server_id: i64,
    game_config_id: i64,
    port_bindings: &[manman_core::model::PortBinding],
) -> Result<(bool, Vec<ValidationIssue>, ResourceEstimate)> {
    let mut issues = Vec::new();

    let server = match state.catalog.get_server(server_id).await {
        Ok(server) => Some(server),
        Err(e) if e.kind == manman_core::ErrorKind::NotFound => {
            issues.push(ValidationIssue::error(
                "server_id",
                format!("server {server_id} does not exist"),
                "register the host manager first",
            ));
            None
        }
        Err(e) => return Err(e),
    };
    if let Some(ref server) = server {
        if !server.status.accepts_work() {
            issues.push(ValidationIssue::warning(
                "server_id",
                format!("server {} is {}", server_id, server.status.as_str()),
                "sessions cannot start until the host is online",
            ));
        }
    }

    match state.catalog.get_game_config(game_config_id).await {
        Ok(_) => {}
        Err(e) if e.kind == manman_core::ErrorKind::NotFound => {
            issues.push(ValidationIssue::error(
                "game_config_id",
                format!("game config {game_config_id} does not exist"),
                "create the game config first",
            ));
        }
        Err(e) => return Err(e),
    }

    if server.is_some() {
        for conflict in state
            .catalog
            .port_conflicts(server_id, port_bindings, None)
            .await?
        {
            issues.push(ValidationIssue::error(
                "port_bindings",
                format!(
                    "{}/{} is already bound by deployment {}",
                    conflict.host_port,
                    conflict.protocol.as_str(),
                    conflict.sgc_id
                ),
                "pick a free host port",
            ));
        }
    }

    let capability = match server {
        Some(ref server) => state.catalog.latest_capability(server.server_id).await?,
        None => None,
    };
    let estimate = ResourceEstimate {
        // Coarse single-session estimate; refined figures would need
        // per-game profiling data the catalog does not carry.
        estimated_memory_mb: 2048,
        estimated_cpu_millicores: 1000,
        available_memory_mb: capability.as_ref().map_or(0, |c| c.available_memory_mb),
        available_cpu_millicores: capability
            .as_ref()
            .map_or(0, |c| c.available_cpu_millicores),
    };

    let valid = !issues.iter().any(|i| i.is_error);
    Ok((valid, issues, estimate))
}

pub struct ValidationIssue {
    pub is_error: bool,
    pub field: String,
    pub message: String,
    pub suggestion: String,
}

impl ValidationIssue {
    fn error(field: &str, message: String, suggestion: &str) -> Self {
        Self {
            is_error: true,
            field: field.into(),
            message,
            suggestion: suggestion.into(),
        }
    }

    fn warning(field: &str, message: String, suggestion: &str) -> Self {
        Self {
            is_error: false,
            field: field.into(),
            message,
            suggestion: suggestion.into(),
        }
    }
}

pub struct ResourceEstimate {
    pub estimated_memory_mb: i64,
    pub estimated_cpu_millicores: i64,
    pub available_memory_mb: i64,
    pub available_cpu_millicores: i64,
}
