//! Conversions between the domain model and the generated protobuf types.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use manman_core::{model, render, Error, Result};
use manman_proto::v1 as pb;

// ============================================================================
// Timestamps
// ============================================================================

pub fn ts(dt: DateTime<Utc>) -> prost_types::Timestamp {
    prost_types::Timestamp {
        seconds: dt.timestamp(),
        nanos: dt.timestamp_subsec_nanos() as i32,
    }
}

pub fn opt_ts(dt: Option<DateTime<Utc>>) -> Option<prost_types::Timestamp> {
    dt.map(ts)
}

pub fn from_ts(ts: &prost_types::Timestamp) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(ts.seconds, ts.nanos.max(0) as u32)
        .single()
        .ok_or_else(|| Error::validation("timestamp out of range"))
}

pub fn require_ts(
    ts: Option<&prost_types::Timestamp>,
    field: &str,
) -> Result<DateTime<Utc>> {
    from_ts(ts.ok_or_else(|| Error::validation(format!("{field} is required")))?)
}

// ============================================================================
// Enums
// ============================================================================

pub fn session_status_to_proto(status: model::SessionStatus) -> i32 {
    match status {
        model::SessionStatus::Pending => pb::SessionStatus::Pending as i32,
        model::SessionStatus::Starting => pb::SessionStatus::Starting as i32,
        model::SessionStatus::Running => pb::SessionStatus::Running as i32,
        model::SessionStatus::Stopping => pb::SessionStatus::Stopping as i32,
        model::SessionStatus::Stopped => pb::SessionStatus::Stopped as i32,
        model::SessionStatus::Crashed => pb::SessionStatus::Crashed as i32,
    }
}

pub fn session_status_from_proto(value: i32) -> Result<model::SessionStatus> {
    match pb::SessionStatus::try_from(value) {
        Ok(pb::SessionStatus::Pending) => Ok(model::SessionStatus::Pending),
        Ok(pb::SessionStatus::Starting) => Ok(model::SessionStatus::Starting),
        Ok(pb::SessionStatus::Running) => Ok(model::SessionStatus::Running),
        Ok(pb::SessionStatus::Stopping) => Ok(model::SessionStatus::Stopping),
        Ok(pb::SessionStatus::Stopped) => Ok(model::SessionStatus::Stopped),
        Ok(pb::SessionStatus::Crashed) => Ok(model::SessionStatus::Crashed),
        _ => Err(Error::validation(format!("unknown session status {value}"))),
    }
}

pub fn server_status_to_proto(status: model::ServerStatus) -> i32 {
    match status {
        model::ServerStatus::Online => pb::ServerStatus::Online as i32,
        model::ServerStatus::Offline => pb::ServerStatus::Offline as i32,
        model::ServerStatus::Starting => pb::ServerStatus::Starting as i32,
        model::ServerStatus::Draining => pb::ServerStatus::Draining as i32,
    }
}

pub fn protocol_to_proto(protocol: model::PortProtocol) -> i32 {
    match protocol {
        model::PortProtocol::Tcp => pb::Protocol::Tcp as i32,
        model::PortProtocol::Udp => pb::Protocol::Udp as i32,
    }
}

pub fn protocol_from_proto(value: i32) -> Result<model::PortProtocol> {
    match pb::Protocol::try_from(value) {
        Ok(pb::Protocol::Tcp) => Ok(model::PortProtocol::Tcp),
        Ok(pb::Protocol::Udp) => Ok(model::PortProtocol::Udp),
        _ => Err(Error::validation(format!("unknown protocol {value}"))),
    }
}

pub fn parameter_type_to_proto(pt: model::ParameterType) -> i32 {
    match pt {
        model::ParameterType::String => pb::ParameterType::String as i32,
        model::ParameterType::Int => pb::ParameterType::Int as i32,
        model::ParameterType::Bool => pb::ParameterType::Bool as i32,
        model::ParameterType::Secret => pb::ParameterType::Secret as i32,
    }
}

pub fn parameter_type_from_proto(value: i32) -> Result<model::ParameterType> {
    match pb::ParameterType::try_from(value) {
        Ok(pb::ParameterType::String) => Ok(model::ParameterType::String),
        Ok(pb::ParameterType::Int) => Ok(model::ParameterType::Int),
        Ok(pb::ParameterType::Bool) => Ok(model::ParameterType::Bool),
        Ok(pb::ParameterType::Secret) => Ok(model::ParameterType::Secret),
        _ => Err(Error::validation(format!("unknown parameter type {value}"))),
    }
}

pub fn strategy_type_to_proto(st: model::StrategyType) -> i32 {
    use model::StrategyType as M;
    use pb::StrategyType as P;
    (match st {
        M::CliArgs => P::CliArgs,
        M::EnvVars => P::EnvVars,
        M::FileProperties => P::FileProperties,
        M::FileJson => P::FileJson,
        M::FileYaml => P::FileYaml,
        M::FileIni => P::FileIni,
        M::FileXml => P::FileXml,
        M::FileLua => P::FileLua,
        M::FileCustom => P::FileCustom,
    }) as i32
}

pub fn strategy_type_from_proto(value: i32) -> Result<model::StrategyType> {
    use model::StrategyType as M;
    use pb::StrategyType as P;
    match P::try_from(value) {
        Ok(P::CliArgs) => Ok(M::CliArgs),
        Ok(P::EnvVars) => Ok(M::EnvVars),
        Ok(P::FileProperties) => Ok(M::FileProperties),
        Ok(P::FileJson) => Ok(M::FileJson),
        Ok(P::FileYaml) => Ok(M::FileYaml),
        Ok(P::FileIni) => Ok(M::FileIni),
        Ok(P::FileXml) => Ok(M::FileXml),
        Ok(P::FileLua) => Ok(M::FileLua),
        Ok(P::FileCustom) => Ok(M::FileCustom),
        _ => Err(Error::validation(format!("unknown strategy type {value}"))),
    }
}

pub fn binding_type_to_proto(bt: model::BindingType) -> i32 {
    match bt {
        model::BindingType::Direct => pb::BindingType::Direct as i32,
        model::BindingType::Template => pb::BindingType::Template as i32,
        model::BindingType::JsonPath => pb::BindingType::JsonPath as i32,
        model::BindingType::Xpath => pb::BindingType::Xpath as i32,
        model::BindingType::IniSection => pb::BindingType::IniSection as i32,
    }
}

pub fn binding_type_from_proto(value: i32) -> Result<model::BindingType> {
    match pb::BindingType::try_from(value) {
        Ok(pb::BindingType::Direct) => Ok(model::BindingType::Direct),
        Ok(pb::BindingType::Template) => Ok(model::BindingType::Template),
        Ok(pb::BindingType::JsonPath) => Ok(model::BindingType::JsonPath),
        Ok(pb::BindingType::Xpath) => Ok(model::BindingType::Xpath),
        Ok(pb::BindingType::IniSection) => Ok(model::BindingType::IniSection),
        _ => Err(Error::validation(format!("unknown binding type {value}"))),
    }
}

pub fn patch_level_to_proto(level: model::PatchLevel) -> i32 {
    match level {
        model::PatchLevel::GameConfig => pb::PatchLevel::GameConfig as i32,
        model::PatchLevel::ServerGameConfig => pb::PatchLevel::ServerGameConfig as i32,
        model::PatchLevel::Session => pb::PatchLevel::Session as i32,
    }
}

pub fn patch_level_from_proto(value: i32) -> Result<model::PatchLevel> {
    match pb::PatchLevel::try_from(value) {
        Ok(pb::PatchLevel::GameConfig) => Ok(model::PatchLevel::GameConfig),
        Ok(pb::PatchLevel::ServerGameConfig) => Ok(model::PatchLevel::ServerGameConfig),
        Ok(pb::PatchLevel::Session) => Ok(model::PatchLevel::Session),
        _ => Err(Error::validation(format!("unknown patch level {value}"))),
    }
}

pub fn patch_format_to_proto(format: model::PatchFormat) -> i32 {
    match format {
        model::PatchFormat::Template => pb::PatchFormat::Template as i32,
        model::PatchFormat::JsonMergePatch => pb::PatchFormat::JsonMergePatch as i32,
        model::PatchFormat::JsonPatch => pb::PatchFormat::JsonPatch as i32,
        model::PatchFormat::YamlMerge => pb::PatchFormat::YamlMerge as i32,
    }
}

pub fn patch_format_from_proto(value: i32) -> Result<model::PatchFormat> {
    match pb::PatchFormat::try_from(value) {
        Ok(pb::PatchFormat::Template) => Ok(model::PatchFormat::Template),
        Ok(pb::PatchFormat::JsonMergePatch) => Ok(model::PatchFormat::JsonMergePatch),
        Ok(pb::PatchFormat::JsonPatch) => Ok(model::PatchFormat::JsonPatch),
        Ok(pb::PatchFormat::YamlMerge) => Ok(model::PatchFormat::YamlMerge),
        _ => Err(Error::validation(format!("unknown patch format {value}"))),
    }
}

pub fn action_level_to_proto(level: model::ActionLevel) -> i32 {
    match level {
        model::ActionLevel::Game => pb::ActionLevel::Game as i32,
        model::ActionLevel::GameConfig => pb::ActionLevel::GameConfig as i32,
        model::ActionLevel::Deployment => pb::ActionLevel::Deployment as i32,
    }
}

pub fn action_level_from_proto(value: i32) -> Result<model::ActionLevel> {
    match pb::ActionLevel::try_from(value) {
        Ok(pb::ActionLevel::Game) => Ok(model::ActionLevel::Game),
        Ok(pb::ActionLevel::GameConfig) => Ok(model::ActionLevel::GameConfig),
        Ok(pb::ActionLevel::Deployment) => Ok(model::ActionLevel::Deployment),
        _ => Err(Error::validation(format!("unknown action level {value}"))),
    }
}

pub fn field_type_to_proto(ft: model::FieldType) -> i32 {
    match ft {
        model::FieldType::String => pb::FieldType::String as i32,
        model::FieldType::Int => pb::FieldType::Int as i32,
        model::FieldType::Bool => pb::FieldType::Bool as i32,
        model::FieldType::Select => pb::FieldType::Select as i32,
    }
}

pub fn field_type_from_proto(value: i32) -> Result<model::FieldType> {
    match pb::FieldType::try_from(value) {
        Ok(pb::FieldType::String) => Ok(model::FieldType::String),
        Ok(pb::FieldType::Int) => Ok(model::FieldType::Int),
        Ok(pb::FieldType::Bool) => Ok(model::FieldType::Bool),
        Ok(pb::FieldType::Select) => Ok(model::FieldType::Select),
        _ => Err(Error::validation(format!("unknown field type {value}"))),
    }
}

pub fn log_source_to_proto(source: model::LogSource) -> i32 {
    match source {
        model::LogSource::Stdout => pb::LogSource::Stdout as i32,
        model::LogSource::Stderr => pb::LogSource::Stderr as i32,
        model::LogSource::Mixed => pb::LogSource::Mixed as i32,
    }
}

pub fn log_source_from_proto(value: i32) -> Result<model::LogSource> {
    match pb::LogSource::try_from(value) {
        Ok(pb::LogSource::Stdout) => Ok(model::LogSource::Stdout),
        Ok(pb::LogSource::Stderr) => Ok(model::LogSource::Stderr),
        Ok(pb::LogSource::Mixed) => Ok(model::LogSource::Mixed),
        _ => Err(Error::validation(format!("unknown log source {value}"))),
    }
}

pub fn platform_type_to_proto(pt: model::PlatformType) -> i32 {
    match pt {
        model::PlatformType::Steam => pb::PlatformType::Steam as i32,
        model::PlatformType::Custom => pb::PlatformType::Custom as i32,
    }
}

pub fn platform_type_from_proto(value: i32) -> Result<model::PlatformType> {
    match pb::PlatformType::try_from(value) {
        Ok(pb::PlatformType::Steam) => Ok(model::PlatformType::Steam),
        Ok(pb::PlatformType::Custom) => Ok(model::PlatformType::Custom),
        _ => Err(Error::validation(format!("unknown platform type {value}"))),
    }
}

pub fn installation_status_to_proto(status: model::InstallationStatus) -> i32 {
    match status {
        model::InstallationStatus::Pending => pb::InstallationStatus::Pending as i32,
        model::InstallationStatus::Downloading => pb::InstallationStatus::Downloading as i32,
        model::InstallationStatus::Installed => pb::InstallationStatus::Installed as i32,
        model::InstallationStatus::Failed => pb::InstallationStatus::Failed as i32,
        model::InstallationStatus::Removed => pb::InstallationStatus::Removed as i32,
    }
}

pub fn installation_status_from_proto(value: i32) -> Result<model::InstallationStatus> {
    match pb::InstallationStatus::try_from(value) {
        Ok(pb::InstallationStatus::Pending) => Ok(model::InstallationStatus::Pending),
        Ok(pb::InstallationStatus::Downloading) => Ok(model::InstallationStatus::Downloading),
        Ok(pb::InstallationStatus::Installed) => Ok(model::InstallationStatus::Installed),
        Ok(pb::InstallationStatus::Failed) => Ok(model::InstallationStatus::Failed),
        Ok(pb::InstallationStatus::Removed) => Ok(model::InstallationStatus::Removed),
        _ => Err(Error::validation(format!(
            "unknown installation status {value}"
        ))),
    }
}

// ============================================================================
// Messages: model -> proto
// ============================================================================

pub fn game_to_proto(game: model::Game) -> pb::Game {
    pb::Game {
        game_id: game.game_id,
        name: game.name,
        steam_app_id: game.steam_app_id,
        metadata: Some(pb::GameMetadata {
            genre: game.metadata.genre,
            publisher: game.metadata.publisher,
            tags: game.metadata.tags,
        }),
    }
}

pub fn metadata_from_proto(metadata: Option<pb::GameMetadata>) -> model::GameMetadata {
    let metadata = metadata.unwrap_or_default();
    model::GameMetadata {
        genre: metadata.genre,
        publisher: metadata.publisher,
        tags: metadata.tags,
    }
}

pub fn volume_to_proto(volume: model::Volume) -> pb::Volume {
    pb::Volume {
        name: volume.name,
        container_path: volume.container_path,
        host_subpath: volume.host_subpath,
        options: volume.options.into_iter().collect(),
    }
}

pub fn volume_from_proto(volume: pb::Volume) -> Result<model::Volume> {
    if volume.container_path.is_empty() || volume.host_subpath.is_empty() {
        return Err(Error::validation("volume paths must not be empty"));
    }
    Ok(model::Volume {
        name: volume.name,
        container_path: volume.container_path,
        host_subpath: volume.host_subpath,
        options: volume.options.into_iter().collect(),
    })
}

pub fn game_config_to_proto(config: model::GameConfig) -> pb::GameConfig {
    pb::GameConfig {
        config_id: config.config_id,
        game_id: config.game_id,
        name: config.name,
        image: config.image,
        args_template: config.args_template,
        env_template: config.env_template.into_iter().collect(),
        volumes: config.volumes.into_iter().map(volume_to_proto).collect(),
        created_at: Some(ts(config.created_at)),
    }
}

pub fn port_binding_to_proto(binding: model::PortBinding) -> pb::PortBinding {
    pb::PortBinding {
        container_port: u32::from(binding.container_port),
        host_port: u32::from(binding.host_port),
        protocol: protocol_to_proto(binding.protocol),
    }
}

pub fn port_binding_from_proto(binding: &pb::PortBinding) -> Result<model::PortBinding> {
    let container_port = u16::try_from(binding.container_port)
        .map_err(|_| Error::validation("container_port out of range"))?;
    let host_port = u16::try_from(binding.host_port)
        .map_err(|_| Error::validation("host_port out of range"))?;
    if container_port == 0 || host_port == 0 {
        return Err(Error::validation("ports must be non-zero"));
    }
    Ok(model::PortBinding {
        container_port,
        host_port,
        protocol: protocol_from_proto(binding.protocol)?,
    })
}

pub fn port_bindings_from_proto(bindings: &[pb::PortBinding]) -> Result<Vec<model::PortBinding>> {
    bindings.iter().map(port_binding_from_proto).collect()
}

pub fn deployment_to_proto(deployment: model::Deployment) -> pb::Deployment {
    pb::Deployment {
        sgc_id: deployment.sgc_id,
        server_id: deployment.server_id,
        game_config_id: deployment.game_config_id,
        port_bindings: deployment
            .port_bindings
            .into_iter()
            .map(port_binding_to_proto)
            .collect(),
        parameters: deployment.parameters.into_iter().collect(),
        created_at: Some(ts(deployment.created_at)),
    }
}

pub fn server_to_proto(server: model::Server) -> pb::Server {
    pb::Server {
        server_id: server.server_id,
        name: server.name,
        environment: server.environment.unwrap_or_default(),
        status: server_status_to_proto(server.status),
        last_seen: opt_ts(server.last_seen),
        is_default: server.is_default,
    }
}

pub fn session_to_proto(session: model::Session) -> pb::Session {
    pb::Session {
        session_id: session.session_id,
        sgc_id: session.sgc_id,
        status: session_status_to_proto(session.status),
        started_at: opt_ts(session.started_at),
        stopped_at: opt_ts(session.stopped_at),
        exit_code: session.exit_code,
        error_message: session.error_message.unwrap_or_default(),
    }
}

pub fn parameter_definition_to_proto(def: model::ParameterDefinition) -> pb::ParameterDefinition {
    pb::ParameterDefinition {
        param_id: def.param_id,
        game_id: def.game_id,
        key: def.key,
        r#type: parameter_type_to_proto(def.param_type),
        required: def.required,
        default_value: def.default_value,
        min_value: def.min_value,
        max_value: def.max_value,
        allowed_values: def.allowed_values,
    }
}

pub fn strategy_options_to_proto(options: model::StrategyOptions) -> pb::StrategyOptions {
    use pb::strategy_options::Variant;
    let variant = match options {
        model::StrategyOptions::CliArgs { skip_unresolved } => {
            Variant::CliArgs(pb::CliArgsOptions { skip_unresolved })
        }
        model::StrategyOptions::EnvVars { uppercase_keys } => {
            Variant::EnvVars(pb::EnvVarsOptions { uppercase_keys })
        }
        model::StrategyOptions::KeyValue {
            separator,
            keep_comments,
        } => Variant::KeyValue(pb::KeyValueFileOptions {
            separator,
            keep_comments,
        }),
        model::StrategyOptions::Json { pretty } => Variant::Json(pb::JsonFileOptions { pretty }),
        model::StrategyOptions::Yaml { replace_sequences } => {
            Variant::Yaml(pb::YamlFileOptions { replace_sequences })
        }
        model::StrategyOptions::Text { strict } => {
            Variant::Text(pb::TextTemplateOptions { strict })
        }
    };
    pb::StrategyOptions {
        variant: Some(variant),
    }
}

pub fn strategy_options_from_proto(
    options: Option<pb::StrategyOptions>,
    strategy_type: model::StrategyType,
) -> model::StrategyOptions {
    use pb::strategy_options::Variant;
    match options.and_then(|o| o.variant) {
        Some(Variant::CliArgs(o)) => model::StrategyOptions::CliArgs {
            skip_unresolved: o.skip_unresolved,
        },
        Some(Variant::EnvVars(o)) => model::StrategyOptions::EnvVars {
            uppercase_keys: o.uppercase_keys,
        },
        Some(Variant::KeyValue(o)) => model::StrategyOptions::KeyValue {
            separator: if o.separator.is_empty() {
                "=".to_string()
            } else {
                o.separator
            },
            keep_comments: o.keep_comments,
        },
        Some(Variant::Json(o)) => model::StrategyOptions::Json { pretty: o.pretty },
        Some(Variant::Yaml(o)) => model::StrategyOptions::Yaml {
            replace_sequences: o.replace_sequences,
        },
        Some(Variant::Text(o)) => model::StrategyOptions::Text { strict: o.strict },
        None => model::StrategyOptions::default_for(strategy_type),
    }
}

pub fn strategy_to_proto(strategy: model::ConfigurationStrategy) -> pb::ConfigurationStrategy {
    pb::ConfigurationStrategy {
        strategy_id: strategy.strategy_id,
        game_id: strategy.game_id,
        name: strategy.name,
        strategy_type: strategy_type_to_proto(strategy.strategy_type),
        target_path: strategy.target_path,
        base_template: strategy.base_template,
        render_options: Some(strategy_options_to_proto(strategy.render_options)),
        apply_order: strategy.apply_order,
    }
}

pub fn binding_to_proto(binding: model::StrategyParameterBinding) -> pb::StrategyParameterBinding {
    pb::StrategyParameterBinding {
        binding_id: binding.binding_id,
        strategy_id: binding.strategy_id,
        param_id: binding.param_id,
        binding_type: binding_type_to_proto(binding.binding_type),
        target_key: binding.target_key,
        value_template: binding.value_template,
        condition_expr: binding.condition_expr,
    }
}

pub fn patch_to_proto(patch: model::ConfigurationPatch) -> pb::ConfigurationPatch {
    pb::ConfigurationPatch {
        patch_id: patch.patch_id,
        strategy_id: patch.strategy_id,
        patch_level: patch_level_to_proto(patch.patch_level),
        entity_id: patch.entity_id,
        patch_content: patch.patch_content,
        patch_format: patch_format_to_proto(patch.patch_format),
    }
}

pub fn input_field_to_proto(field: model::InputField) -> pb::InputField {
    pb::InputField {
        field_id: field.field_id,
        key: field.key,
        label: field.label,
        field_type: field_type_to_proto(field.field_type),
        required: field.required,
        default_value: field.default_value,
        constraints: Some(pb::FieldConstraints {
            min: field.constraints.min,
            max: field.constraints.max,
            pattern: field.constraints.pattern,
        }),
        options: field
            .options
            .into_iter()
            .map(|o| pb::InputOption {
                value: o.value,
                label: o.label,
            })
            .collect(),
    }
}

pub fn input_field_from_proto(field: pb::InputField) -> Result<model::InputField> {
    if field.key.trim().is_empty() {
        return Err(Error::validation("input field key must not be empty"));
    }
    let constraints = field.constraints.unwrap_or_default();
    Ok(model::InputField {
        field_id: field.field_id,
        key: field.key,
        label: field.label,
        field_type: field_type_from_proto(field.field_type)?,
        required: field.required,
        default_value: field.default_value,
        constraints: model::FieldConstraints {
            min: constraints.min,
            max: constraints.max,
            pattern: constraints.pattern,
        },
        options: field
            .options
            .into_iter()
            .map(|o| model::InputOption {
                value: o.value,
                label: o.label,
            })
            .collect(),
    })
}

pub fn action_to_proto(action: model::ActionDefinition) -> pb::ActionDefinition {
    pb::ActionDefinition {
        action_id: action.action_id,
        level: action_level_to_proto(action.level),
        entity_id: action.entity_id,
        name: action.name,
        description: action.description,
        command_template: action.command_template,
        fields: action.fields.into_iter().map(input_field_to_proto).collect(),
    }
}

pub fn execution_to_proto(execution: model::ActionExecution) -> pb::ActionExecution {
    pb::ActionExecution {
        execution_id: execution.execution_id,
        action_id: execution.action_id,
        session_id: execution.session_id,
        rendered_command: execution.rendered_command,
        executed_at: Some(ts(execution.executed_at)),
    }
}

pub fn log_reference_to_proto(reference: model::LogReference) -> pb::LogReference {
    pb::LogReference {
        log_ref_id: reference.log_ref_id,
        session_id: reference.session_id,
        file_path: reference.file_path,
        start_time: Some(ts(reference.start_time)),
        end_time: Some(ts(reference.end_time)),
        line_count: reference.line_count,
        source: log_source_to_proto(reference.source),
    }
}

pub fn backup_to_proto(backup: model::Backup) -> pb::Backup {
    pb::Backup {
        backup_id: backup.backup_id,
        session_id: backup.session_id,
        sgc_id: backup.sgc_id,
        object_url: backup.object_url,
        size_bytes: backup.size_bytes,
        description: backup.description,
        created_at: Some(ts(backup.created_at)),
    }
}

pub fn addon_to_proto(addon: model::WorkshopAddon) -> pb::WorkshopAddon {
    pb::WorkshopAddon {
        addon_id: addon.addon_id,
        game_id: addon.game_id,
        workshop_id: addon.workshop_id,
        platform_type: platform_type_to_proto(addon.platform_type),
        name: addon.name,
        is_collection: addon.is_collection,
        preset_id: addon.preset_id,
        installation_path: addon.installation_path,
    }
}

pub fn preset_to_proto(preset: model::PathPreset) -> pb::PathPreset {
    pb::PathPreset {
        preset_id: preset.preset_id,
        game_id: preset.game_id,
        name: preset.name,
        path_template: preset.path_template,
    }
}

pub fn library_to_proto(library: model::WorkshopLibrary) -> pb::WorkshopLibrary {
    pb::WorkshopLibrary {
        library_id: library.library_id,
        game_id: library.game_id,
        name: library.name,
    }
}

pub fn installation_to_proto(inst: model::WorkshopInstallation) -> pb::WorkshopInstallation {
    pb::WorkshopInstallation {
        installation_id: inst.installation_id,
        sgc_id: inst.sgc_id,
        addon_id: inst.addon_id,
        status: installation_status_to_proto(inst.status),
        installation_path: inst.installation_path,
        progress_percent: inst.progress_percent,
        error_message: inst.error_message,
        download_started_at: opt_ts(inst.download_started_at),
        download_completed_at: opt_ts(inst.download_completed_at),
    }
}

pub fn rendered_strategy_to_proto(rendered: render::RenderedStrategy) -> pb::RenderedStrategy {
    pb::RenderedStrategy {
        strategy_id: rendered.strategy_id,
        strategy_name: rendered.strategy_name,
        strategy_type: strategy_type_to_proto(rendered.strategy_type),
        target_path: rendered.target_path,
        rendered_content: rendered.rendered_content,
        base_content: rendered.base_content,
        patches: rendered
            .layers
            .into_iter()
            .map(|layer| pb::PatchLayer {
                level: patch_level_to_proto(layer.level),
                content: layer.content,
            })
            .collect(),
    }
}

/// Proto map fields arrive as `HashMap`; the model keeps sorted maps.
pub fn btree(map: std::collections::HashMap<String, String>) -> BTreeMap<String, String> {
    map.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_round_trip() {
        let now = Utc.timestamp_opt(1_700_000_000, 500).unwrap();
        let proto = ts(now);
        assert_eq!(from_ts(&proto).unwrap(), now);
    }

    #[test]
    fn session_status_round_trip() {
        for status in [
            model::SessionStatus::Pending,
            model::SessionStatus::Starting,
            model::SessionStatus::Running,
            model::SessionStatus::Stopping,
            model::SessionStatus::Stopped,
            model::SessionStatus::Crashed,
        ] {
            assert_eq!(
                session_status_from_proto(session_status_to_proto(status)).unwrap(),
                status
            );
        }
        assert!(session_status_from_proto(0).is_err());
    }

    #[test]
    fn zero_port_is_rejected() {
        let binding = pb::PortBinding {
            container_port: 0,
            host_port: 8080,
            protocol: pb::Protocol::Tcp as i32,
        };
        assert!(port_binding_from_proto(&binding).is_err());
    }
}
