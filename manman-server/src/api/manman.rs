//! The `ManManApi` gRPC service.
//!
//! Handlers translate between proto and the domain model, delegate to the
//! catalog and the lifecycle module, and map core errors onto gRPC codes.
//! No handler blocks on a host: session mutations publish a command and
//! return the current row.

use manman_core::catalog::{Page, SessionFilter};
use manman_core::model;
use manman_proto::v1 as pb;
use manman_proto::v1::man_man_api_server::ManManApi;
use tonic::{Request, Response, Status};

use super::convert::*;
use super::{to_status, ApiService};
use crate::{lifecycle, logs};

type RpcResult<T> = Result<Response<T>, Status>;

fn page(page_size: i32, page_token: &str) -> Result<Page, Status> {
    Page::from_request(page_size, page_token).map_err(to_status)
}

#[tonic::async_trait]
impl ManManApi for ApiService {
    // ------------------------------------------------------------------
    // Games
    // ------------------------------------------------------------------

    async fn create_game(&self, request: Request<pb::CreateGameRequest>) -> RpcResult<pb::Game> {
        let req = request.into_inner();
        let game = self
            .state
            .catalog
            .create_game(&req.name, req.steam_app_id, &metadata_from_proto(req.metadata))
            .await
            .map_err(to_status)?;
        Ok(Response::new(game_to_proto(game)))
    }

    async fn get_game(&self, request: Request<pb::GetGameRequest>) -> RpcResult<pb::Game> {
        let game = self
            .state
            .catalog
            .get_game(request.into_inner().game_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(game_to_proto(game)))
    }

    async fn list_games(
        &self,
        request: Request<pb::ListGamesRequest>,
    ) -> RpcResult<pb::ListGamesResponse> {
        let req = request.into_inner();
        let page = page(req.page_size, &req.page_token)?;
        let games = self.state.catalog.list_games(page).await.map_err(to_status)?;
        let next_page_token = page.next_token(games.len());
        Ok(Response::new(pb::ListGamesResponse {
            games: games.into_iter().map(game_to_proto).collect(),
            next_page_token,
        }))
    }

    async fn update_game(&self, request: Request<pb::UpdateGameRequest>) -> RpcResult<pb::Game> {
        let game = request
            .into_inner()
            .game
            .ok_or_else(|| Status::invalid_argument("game is required"))?;
        let updated = self
            .state
            .catalog
            .update_game(&model::Game {
                game_id: game.game_id,
                name: game.name,
                steam_app_id: game.steam_app_id,
                metadata: metadata_from_proto(game.metadata),
            })
            .await
            .map_err(to_status)?;
        Ok(Response::new(game_to_proto(updated)))
    }

    async fn delete_game(
        &self,
        request: Request<pb::DeleteGameRequest>,
    ) -> RpcResult<pb::DeleteResponse> {
        let deleted = self
            .state
            .catalog
            .delete_game(request.into_inner().game_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::DeleteResponse { deleted }))
    }

    // ------------------------------------------------------------------
    // Game configs
    // ------------------------------------------------------------------

    async fn create_game_config(
        &self,
        request: Request<pb::CreateGameConfigRequest>,
    ) -> RpcResult<pb::GameConfig> {
        let req = request.into_inner();
        let volumes: Vec<model::Volume> = req
            .volumes
            .into_iter()
            .map(volume_from_proto)
            .collect::<manman_core::Result<_>>()
            .map_err(to_status)?;
        let config = self
            .state
            .catalog
            .create_game_config(
                req.game_id,
                &req.name,
                &req.image,
                &req.args_template,
                &btree(req.env_template),
                &volumes,
            )
            .await
            .map_err(to_status)?;
        Ok(Response::new(game_config_to_proto(config)))
    }

    async fn get_game_config(
        &self,
        request: Request<pb::GetGameConfigRequest>,
    ) -> RpcResult<pb::GameConfig> {
        let config = self
            .state
            .catalog
            .get_game_config(request.into_inner().config_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(game_config_to_proto(config)))
    }

    async fn list_game_configs(
        &self,
        request: Request<pb::ListGameConfigsRequest>,
    ) -> RpcResult<pb::ListGameConfigsResponse> {
        let req = request.into_inner();
        let page = page(req.page_size, &req.page_token)?;
        let configs = self
            .state
            .catalog
            .list_game_configs(req.game_id, page)
            .await
            .map_err(to_status)?;
        let next_page_token = page.next_token(configs.len());
        Ok(Response::new(pb::ListGameConfigsResponse {
            configs: configs.into_iter().map(game_config_to_proto).collect(),
            next_page_token,
        }))
    }

    async fn update_game_config(
        &self,
        request: Request<pb::UpdateGameConfigRequest>,
    ) -> RpcResult<pb::GameConfig> {
        let config = request
            .into_inner()
            .config
            .ok_or_else(|| Status::invalid_argument("config is required"))?;
        let volumes: Vec<model::Volume> = config
            .volumes
            .into_iter()
            .map(volume_from_proto)
            .collect::<manman_core::Result<_>>()
            .map_err(to_status)?;
        let updated = self
            .state
            .catalog
            .update_game_config(&model::GameConfig {
                config_id: config.config_id,
                game_id: config.game_id,
                name: config.name,
                image: config.image,
                args_template: config.args_template,
                env_template: btree(config.env_template),
                volumes,
                created_at: chrono::Utc::now(), // ignored by the update
            })
            .await
            .map_err(to_status)?;
        Ok(Response::new(game_config_to_proto(updated)))
    }

    async fn delete_game_config(
        &self,
        request: Request<pb::DeleteGameConfigRequest>,
    ) -> RpcResult<pb::DeleteResponse> {
        let deleted = self
            .state
            .catalog
            .delete_game_config(request.into_inner().config_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::DeleteResponse { deleted }))
    }

    // ------------------------------------------------------------------
    // Parameters
    // ------------------------------------------------------------------

    async fn create_parameter_definition(
        &self,
        request: Request<pb::CreateParameterDefinitionRequest>,
    ) -> RpcResult<pb::ParameterDefinition> {
        let req = request.into_inner();
        let definition = self
            .state
            .catalog
            .create_parameter_definition(
                req.game_id,
                &req.key,
                parameter_type_from_proto(req.r#type).map_err(to_status)?,
                req.required,
                req.default_value.as_deref(),
                req.min_value,
                req.max_value,
                &req.allowed_values,
            )
            .await
            .map_err(to_status)?;
        Ok(Response::new(parameter_definition_to_proto(definition)))
    }

    async fn list_parameter_definitions(
        &self,
        request: Request<pb::ListParameterDefinitionsRequest>,
    ) -> RpcResult<pb::ListParameterDefinitionsResponse> {
        let req = request.into_inner();
        let page = page(req.page_size, &req.page_token)?;
        let definitions = self
            .state
            .catalog
            .list_parameter_definitions(req.game_id, page)
            .await
            .map_err(to_status)?;
        let next_page_token = page.next_token(definitions.len());
        Ok(Response::new(pb::ListParameterDefinitionsResponse {
            definitions: definitions
                .into_iter()
                .map(parameter_definition_to_proto)
                .collect(),
            next_page_token,
        }))
    }

    async fn delete_parameter_definition(
        &self,
        request: Request<pb::DeleteParameterDefinitionRequest>,
    ) -> RpcResult<pb::DeleteResponse> {
        let deleted = self
            .state
            .catalog
            .delete_parameter_definition(request.into_inner().param_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::DeleteResponse { deleted }))
    }

    async fn set_parameter_value(
        &self,
        request: Request<pb::SetParameterValueRequest>,
    ) -> RpcResult<pb::SetParameterValueResponse> {
        let req = request.into_inner();
        let updated = self
            .state
            .catalog
            .set_parameter_value(
                req.param_id,
                patch_level_from_proto(req.scope).map_err(to_status)?,
                req.entity_id,
                req.value.as_deref(),
            )
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::SetParameterValueResponse { updated }))
    }

    // ------------------------------------------------------------------
    // Strategies, bindings, patches
    // ------------------------------------------------------------------

    async fn create_strategy(
        &self,
        request: Request<pb::CreateStrategyRequest>,
    ) -> RpcResult<pb::ConfigurationStrategy> {
        let req = request.into_inner();
        let strategy_type = strategy_type_from_proto(req.strategy_type).map_err(to_status)?;
        let options = strategy_options_from_proto(req.render_options, strategy_type);
        let strategy = self
            .state
            .catalog
            .create_strategy(
                req.game_id,
                &req.name,
                strategy_type,
                req.target_path.as_deref(),
                req.base_template.as_deref(),
                &options,
                req.apply_order,
            )
            .await
            .map_err(to_status)?;
        Ok(Response::new(strategy_to_proto(strategy)))
    }

    async fn list_strategies(
        &self,
        request: Request<pb::ListStrategiesRequest>,
    ) -> RpcResult<pb::ListStrategiesResponse> {
        let req = request.into_inner();
        let page = page(req.page_size, &req.page_token)?;
        let strategies = self
            .state
            .catalog
            .list_strategies(req.game_id, page)
            .await
            .map_err(to_status)?;
        let next_page_token = page.next_token(strategies.len());
        Ok(Response::new(pb::ListStrategiesResponse {
            strategies: strategies.into_iter().map(strategy_to_proto).collect(),
            next_page_token,
        }))
    }

    async fn update_strategy(
        &self,
        request: Request<pb::UpdateStrategyRequest>,
    ) -> RpcResult<pb::ConfigurationStrategy> {
        let strategy = request
            .into_inner()
            .strategy
            .ok_or_else(|| Status::invalid_argument("strategy is required"))?;
        let strategy_type = strategy_type_from_proto(strategy.strategy_type).map_err(to_status)?;
        let updated = self
            .state
            .catalog
            .update_strategy(&model::ConfigurationStrategy {
                strategy_id: strategy.strategy_id,
                game_id: strategy.game_id,
                name: strategy.name,
                strategy_type,
                target_path: strategy.target_path,
                base_template: strategy.base_template,
                render_options: strategy_options_from_proto(strategy.render_options, strategy_type),
                apply_order: strategy.apply_order,
            })
            .await
            .map_err(to_status)?;
        Ok(Response::new(strategy_to_proto(updated)))
    }

    async fn delete_strategy(
        &self,
        request: Request<pb::DeleteStrategyRequest>,
    ) -> RpcResult<pb::DeleteResponse> {
        let deleted = self
            .state
            .catalog
            .delete_strategy(request.into_inner().strategy_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::DeleteResponse { deleted }))
    }

    async fn create_strategy_binding(
        &self,
        request: Request<pb::CreateStrategyBindingRequest>,
    ) -> RpcResult<pb::StrategyParameterBinding> {
        let req = request.into_inner();
        let binding = self
            .state
            .catalog
            .create_strategy_binding(
                req.strategy_id,
                req.param_id,
                binding_type_from_proto(req.binding_type).map_err(to_status)?,
                &req.target_key,
                req.value_template.as_deref(),
                req.condition_expr.as_deref(),
            )
            .await
            .map_err(to_status)?;
        Ok(Response::new(binding_to_proto(binding)))
    }

    async fn list_strategy_bindings(
        &self,
        request: Request<pb::ListStrategyBindingsRequest>,
    ) -> RpcResult<pb::ListStrategyBindingsResponse> {
        let bindings = self
            .state
            .catalog
            .list_strategy_bindings(request.into_inner().strategy_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::ListStrategyBindingsResponse {
            bindings: bindings.into_iter().map(binding_to_proto).collect(),
        }))
    }

    async fn delete_strategy_binding(
        &self,
        request: Request<pb::DeleteStrategyBindingRequest>,
    ) -> RpcResult<pb::DeleteResponse> {
        let deleted = self
            .state
            .catalog
            .delete_strategy_binding(request.into_inner().binding_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::DeleteResponse { deleted }))
    }

    async fn upsert_configuration_patch(
        &self,
        request: Request<pb::UpsertConfigurationPatchRequest>,
    ) -> RpcResult<pb::ConfigurationPatch> {
        let req = request.into_inner();
        let patch = self
            .state
            .catalog
            .upsert_configuration_patch(
                req.strategy_id,
                patch_level_from_proto(req.patch_level).map_err(to_status)?,
                req.entity_id,
                &req.patch_content,
                patch_format_from_proto(req.patch_format).map_err(to_status)?,
            )
            .await
            .map_err(to_status)?;
        Ok(Response::new(patch_to_proto(patch)))
    }

    async fn list_configuration_patches(
        &self,
        request: Request<pb::ListConfigurationPatchesRequest>,
    ) -> RpcResult<pb::ListConfigurationPatchesResponse> {
        let patches = self
            .state
            .catalog
            .list_configuration_patches(request.into_inner().strategy_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::ListConfigurationPatchesResponse {
            patches: patches.into_iter().map(patch_to_proto).collect(),
        }))
    }

    async fn delete_configuration_patch(
        &self,
        request: Request<pb::DeleteConfigurationPatchRequest>,
    ) -> RpcResult<pb::DeleteResponse> {
        let deleted = self
            .state
            .catalog
            .delete_configuration_patch(request.into_inner().patch_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::DeleteResponse { deleted }))
    }

    // ------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------

    async fn create_action(
        &self,
        request: Request<pb::CreateActionRequest>,
    ) -> RpcResult<pb::ActionDefinition> {
        let req = request.into_inner();
        let fields: Vec<model::InputField> = req
            .fields
            .into_iter()
            .map(input_field_from_proto)
            .collect::<manman_core::Result<_>>()
            .map_err(to_status)?;
        let action = self
            .state
            .catalog
            .create_action(
                action_level_from_proto(req.level).map_err(to_status)?,
                req.entity_id,
                &req.name,
                &req.description,
                &req.command_template,
                &fields,
            )
            .await
            .map_err(to_status)?;
        Ok(Response::new(action_to_proto(action)))
    }

    async fn list_actions(
        &self,
        request: Request<pb::ListActionsRequest>,
    ) -> RpcResult<pb::ListActionsResponse> {
        let req = request.into_inner();
        let actions = lifecycle::resolve_action_chain(
            &self.state,
            action_level_from_proto(req.level).map_err(to_status)?,
            req.entity_id,
        )
        .await
        .map_err(to_status)?;
        Ok(Response::new(pb::ListActionsResponse {
            actions: actions.into_iter().map(action_to_proto).collect(),
        }))
    }

    async fn delete_action(
        &self,
        request: Request<pb::DeleteActionRequest>,
    ) -> RpcResult<pb::DeleteResponse> {
        let deleted = self
            .state
            .catalog
            .delete_action(request.into_inner().action_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::DeleteResponse { deleted }))
    }

    async fn execute_action(
        &self,
        request: Request<pb::ExecuteActionRequest>,
    ) -> RpcResult<pb::ExecuteActionResponse> {
        let req = request.into_inner();
        let execution = lifecycle::execute_action(
            &self.state,
            req.action_id,
            req.session_id,
            btree(req.inputs),
        )
        .await
        .map_err(to_status)?;
        Ok(Response::new(pb::ExecuteActionResponse {
            execution: Some(execution_to_proto(execution)),
        }))
    }

    // ------------------------------------------------------------------
    // Deployments
    // ------------------------------------------------------------------

    async fn create_deployment(
        &self,
        request: Request<pb::CreateDeploymentRequest>,
    ) -> RpcResult<pb::Deployment> {
        let req = request.into_inner();
        let bindings = port_bindings_from_proto(&req.port_bindings).map_err(to_status)?;
        let deployment = self
            .state
            .catalog
            .create_deployment(req.server_id, req.game_config_id, &bindings, &btree(req.parameters))
            .await
            .map_err(to_status)?;
        Ok(Response::new(deployment_to_proto(deployment)))
    }

    async fn get_deployment(
        &self,
        request: Request<pb::GetDeploymentRequest>,
    ) -> RpcResult<pb::Deployment> {
        let deployment = self
            .state
            .catalog
            .get_deployment(request.into_inner().sgc_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(deployment_to_proto(deployment)))
    }

    async fn list_deployments(
        &self,
        request: Request<pb::ListDeploymentsRequest>,
    ) -> RpcResult<pb::ListDeploymentsResponse> {
        let req = request.into_inner();
        let page = page(req.page_size, &req.page_token)?;
        let deployments = self
            .state
            .catalog
            .list_deployments(req.server_id, page)
            .await
            .map_err(to_status)?;
        let next_page_token = page.next_token(deployments.len());
        Ok(Response::new(pb::ListDeploymentsResponse {
            deployments: deployments.into_iter().map(deployment_to_proto).collect(),
            next_page_token,
        }))
    }

    async fn update_deployment(
        &self,
        request: Request<pb::UpdateDeploymentRequest>,
    ) -> RpcResult<pb::Deployment> {
        let deployment = request
            .into_inner()
            .deployment
            .ok_or_else(|| Status::invalid_argument("deployment is required"))?;
        let bindings = port_bindings_from_proto(&deployment.port_bindings).map_err(to_status)?;
        let updated = self
            .state
            .catalog
            .update_deployment(&model::Deployment {
                sgc_id: deployment.sgc_id,
                server_id: deployment.server_id,
                game_config_id: deployment.game_config_id,
                port_bindings: bindings,
                parameters: btree(deployment.parameters),
                created_at: chrono::Utc::now(), // ignored by the update
            })
            .await
            .map_err(to_status)?;
        Ok(Response::new(deployment_to_proto(updated)))
    }

    async fn delete_deployment(
        &self,
        request: Request<pb::DeleteDeploymentRequest>,
    ) -> RpcResult<pb::DeleteResponse> {
        let deleted = self
            .state
            .catalog
            .delete_deployment(request.into_inner().sgc_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::DeleteResponse { deleted }))
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    async fn start_session(
        &self,
        request: Request<pb::StartSessionRequest>,
    ) -> RpcResult<pb::Session> {
        let req = request.into_inner();
        let session = lifecycle::start_session(
            &self.state,
            req.sgc_id,
            btree(req.parameter_overrides),
            req.force,
        )
        .await
        .map_err(to_status)?;
        Ok(Response::new(session_to_proto(session)))
    }

    async fn stop_session(
        &self,
        request: Request<pb::StopSessionRequest>,
    ) -> RpcResult<pb::Session> {
        let req = request.into_inner();
        let session = lifecycle::stop_session(&self.state, req.session_id, req.force)
            .await
            .map_err(to_status)?;
        Ok(Response::new(session_to_proto(session)))
    }

    async fn kill_session(
        &self,
        request: Request<pb::KillSessionRequest>,
    ) -> RpcResult<pb::Session> {
        let req = request.into_inner();
        let session = lifecycle::stop_session(&self.state, req.session_id, true)
            .await
            .map_err(to_status)?;
        Ok(Response::new(session_to_proto(session)))
    }

    async fn get_session(&self, request: Request<pb::GetSessionRequest>) -> RpcResult<pb::Session> {
        let session = self
            .state
            .catalog
            .get_session(request.into_inner().session_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(session_to_proto(session)))
    }

    async fn list_sessions(
        &self,
        request: Request<pb::ListSessionsRequest>,
    ) -> RpcResult<pb::ListSessionsResponse> {
        let req = request.into_inner();
        let page = page(req.page_size, &req.page_token)?;
        let status_in = req
            .status_in
            .iter()
            .map(|s| session_status_from_proto(*s))
            .collect::<manman_core::Result<Vec<_>>>()
            .map_err(to_status)?;
        let filter = SessionFilter {
            live_only: req.live_only,
            server_id: req.server_id,
            status_in,
            sgc_id: req.server_game_config_id,
        };
        let sessions = self
            .state
            .catalog
            .list_sessions(&filter, page)
            .await
            .map_err(to_status)?;
        let next_page_token = page.next_token(sessions.len());
        Ok(Response::new(pb::ListSessionsResponse {
            sessions: sessions.into_iter().map(session_to_proto).collect(),
            next_page_token,
        }))
    }

    async fn send_session_input(
        &self,
        request: Request<pb::SendSessionInputRequest>,
    ) -> RpcResult<pb::SendSessionInputResponse> {
        let req = request.into_inner();
        lifecycle::send_input(&self.state, req.session_id, req.input.to_vec())
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::SendSessionInputResponse { accepted: true }))
    }

    // ------------------------------------------------------------------
    // Hosts
    // ------------------------------------------------------------------

    async fn register_server(
        &self,
        request: Request<pb::RegisterServerRequest>,
    ) -> RpcResult<pb::Server> {
        let req = request.into_inner();
        let capabilities = req.capabilities.unwrap_or_default();
        let server = self
            .state
            .catalog
            .register_server(
                &req.name,
                req.environment.as_deref(),
                &model::CapabilitySample {
                    total_memory_mb: capabilities.total_memory_mb,
                    available_memory_mb: capabilities.available_memory_mb,
                    cpu_cores: capabilities.cpu_cores,
                    available_cpu_millicores: capabilities.available_cpu_millicores,
                    docker_version: capabilities.docker_version,
                },
            )
            .await
            .map_err(to_status)?;
        Ok(Response::new(server_to_proto(server)))
    }

    async fn get_server(&self, request: Request<pb::GetServerRequest>) -> RpcResult<pb::Server> {
        let server = self
            .state
            .catalog
            .get_server(request.into_inner().server_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(server_to_proto(server)))
    }

    async fn list_servers(
        &self,
        request: Request<pb::ListServersRequest>,
    ) -> RpcResult<pb::ListServersResponse> {
        let req = request.into_inner();
        let page = page(req.page_size, &req.page_token)?;
        let servers = self
            .state
            .catalog
            .list_servers(page)
            .await
            .map_err(to_status)?;
        let next_page_token = page.next_token(servers.len());
        Ok(Response::new(pb::ListServersResponse {
            servers: servers.into_iter().map(server_to_proto).collect(),
            next_page_token,
        }))
    }

    // ------------------------------------------------------------------
    // Validation and preview
    // ------------------------------------------------------------------

    async fn validate_deployment(
        &self,
        request: Request<pb::ValidateDeploymentRequest>,
    ) -> RpcResult<pb::ValidateDeploymentResponse> {
        let req = request.into_inner();
        let bindings = port_bindings_from_proto(&req.port_bindings).map_err(to_status)?;
        let (valid, issues, estimate) =
            lifecycle::validate_deployment(&self.state, req.server_id, req.game_config_id, &bindings)
                .await
                .map_err(to_status)?;
        Ok(Response::new(pb::ValidateDeploymentResponse {
            valid,
            issues: issues
                .into_iter()
                .map(|issue| pb::ValidationIssue {
                    severity: if issue.is_error {
                        pb::IssueSeverity::Error as i32
                    } else {
                        pb::IssueSeverity::Warning as i32
                    },
                    field: issue.field,
                    message: issue.message,
                    suggestion: issue.suggestion,
                })
                .collect(),
            estimate: Some(pb::ResourceEstimate {
                estimated_memory_mb: estimate.estimated_memory_mb,
                estimated_cpu_millicores: estimate.estimated_cpu_millicores,
                available_memory_mb: estimate.available_memory_mb,
                available_cpu_millicores: estimate.available_cpu_millicores,
            }),
        }))
    }

    async fn preview_configuration(
        &self,
        request: Request<pb::PreviewConfigurationRequest>,
    ) -> RpcResult<pb::PreviewConfigurationResponse> {
        let req = request.into_inner();
        let deployment = self
            .state
            .catalog
            .get_deployment(req.sgc_id)
            .await
            .map_err(to_status)?;
        let config = self
            .state
            .catalog
            .get_game_config(deployment.game_config_id)
            .await
            .map_err(to_status)?;
        let bundle = lifecycle::render_for(
            &self.state,
            &deployment,
            &config,
            req.session_id,
            &btree(req.parameter_overrides),
        )
        .await
        .map_err(to_status)?;
        Ok(Response::new(pb::PreviewConfigurationResponse {
            strategies: bundle
                .strategies
                .into_iter()
                .map(rendered_strategy_to_proto)
                .collect(),
        }))
    }

    // ------------------------------------------------------------------
    // Logs and backups
    // ------------------------------------------------------------------

    async fn get_historical_logs(
        &self,
        request: Request<pb::GetHistoricalLogsRequest>,
    ) -> RpcResult<pb::GetHistoricalLogsResponse> {
        let req = request.into_inner();
        let start = require_ts(req.start_time.as_ref(), "start_time").map_err(to_status)?;
        let end = require_ts(req.end_time.as_ref(), "end_time").map_err(to_status)?;
        let (buckets, bounds) = logs::historical_logs(&self.state, req.session_id, start, end)
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::GetHistoricalLogsResponse {
            batches: buckets
                .into_iter()
                .map(|bucket| pb::HistoricalLogBatch {
                    bucket: Some(ts(bucket.bucket)),
                    content: bucket.content,
                    line_count: bucket.line_count,
                })
                .collect(),
            earliest_known: bounds.map(|(earliest, _)| ts(earliest)),
            latest_known: bounds.map(|(_, latest)| ts(latest)),
        }))
    }

    async fn send_batched_logs(
        &self,
        request: Request<pb::SendBatchedLogsRequest>,
    ) -> RpcResult<pb::SendBatchedLogsResponse> {
        let req = request.into_inner();
        let mut batches = Vec::with_capacity(req.batches.len());
        for batch in req.batches {
            batches.push(log_batch_from_proto(batch).map_err(to_status)?);
        }
        let (accepted, failed, errors) = logs::ingest_batches(&self.state, batches).await;
        Ok(Response::new(pb::SendBatchedLogsResponse {
            accepted: accepted as i32,
            failed: failed as i32,
            errors,
        }))
    }

    async fn record_backup(
        &self,
        request: Request<pb::RecordBackupRequest>,
    ) -> RpcResult<pb::Backup> {
        let req = request.into_inner();
        if !req.object_url.starts_with("s3://") {
            return Err(Status::invalid_argument("object_url must be an s3:// URL"));
        }
        let backup = self
            .state
            .catalog
            .record_backup(
                req.session_id,
                req.sgc_id,
                &req.object_url,
                req.size_bytes,
                req.description.as_deref(),
            )
            .await
            .map_err(to_status)?;
        Ok(Response::new(backup_to_proto(backup)))
    }

    async fn list_backups(
        &self,
        request: Request<pb::ListBackupsRequest>,
    ) -> RpcResult<pb::ListBackupsResponse> {
        let req = request.into_inner();
        let page = page(req.page_size, &req.page_token)?;
        let backups = self
            .state
            .catalog
            .list_backups(req.sgc_id, req.session_id, page)
            .await
            .map_err(to_status)?;
        let next_page_token = page.next_token(backups.len());
        Ok(Response::new(pb::ListBackupsResponse {
            backups: backups.into_iter().map(backup_to_proto).collect(),
            next_page_token,
        }))
    }
}

/// Decode a proto log batch into the bus message the archival path uses.
fn log_batch_from_proto(
    batch: pb::LogBatch,
) -> manman_core::Result<manman_core::bus::messages::LogBatchMessage> {
    use manman_core::Error;
    let batch_id = batch
        .batch_id
        .parse::<uuid::Uuid>()
        .map_err(|_| Error::validation(format!("bad batch id {:?}", batch.batch_id)))?;
    Ok(manman_core::bus::messages::LogBatchMessage {
        session_id: batch.session_id,
        batch_id,
        start_ts: require_ts(batch.start_time.as_ref(), "start_time")?,
        end_ts: require_ts(batch.end_time.as_ref(), "end_time")?,
        line_count: batch.line_count,
        source: log_source_from_proto(batch.source)?,
        compressed_logs: batch.compressed_logs.to_vec(),
    })
}
