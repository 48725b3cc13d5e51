//! gRPC client to the control plane.
//!
//! The host manager only needs two RPCs: idempotent registration at boot
//! and the non-terminal session listing that drives orphan recovery.
//! Everything else flows over the broker.

use manman_core::model::{CapabilitySample, SessionStatus};
use manman_core::retry::{with_backoff, RetryPolicy};
use manman_core::{Error, Result};
use manman_proto::v1 as pb;
use manman_proto::v1::man_man_api_client::ManManApiClient;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};

use crate::config::HostConfig;

/// A non-terminal session row as recovery needs it.
#[derive(Debug, Clone)]
pub struct LiveSession {
    pub session_id: i64,
    pub sgc_id: i64,
    pub status: SessionStatus,
}

#[derive(Clone)]
pub struct ApiClient {
    client: ManManApiClient<Channel>,
}

impl ApiClient {
    pub async fn connect(config: &HostConfig) -> Result<Self> {
        let mut endpoint = Endpoint::from_shared(config.api_address.clone())
            .map_err(|e| Error::validation(format!("bad API_ADDRESS: {e}")))?;

        if config.wants_tls() {
            let mut tls = ClientTlsConfig::new().with_native_roots();
            if let Some(ref path) = config.api_ca_cert_path {
                let pem = std::fs::read(path)
                    .map_err(|e| Error::validation(format!("reading CA cert: {e}")))?;
                tls = tls.ca_certificate(Certificate::from_pem(pem));
            }
            if config.api_tls_skip_verify {
                // The rustls backend refuses to run without verification;
                // the flag is accepted for compatibility but has no effect.
                tracing::warn!(
                    target: "manman::api_client",
                    "API_TLS_SKIP_VERIFY is set but certificate verification stays enabled"
                );
            }
            endpoint = endpoint
                .tls_config(tls)
                .map_err(|e| Error::validation(format!("TLS config: {e}")))?;
        }

        let channel = with_backoff(
            "control plane connect",
            RetryPolicy::new(5, std::time::Duration::from_secs(2)),
            || {
                let endpoint = endpoint.clone();
                async move {
                    endpoint
                        .connect()
                        .await
                        .map_err(|e| Error::transient(format!("control plane connect: {e}")))
                }
            },
        )
        .await?;

        Ok(Self {
            client: ManManApiClient::new(channel),
        })
    }

    /// Find-or-create registration; returns `(server_id, environment)` as
    /// the catalog knows them.
    pub async fn register(
        &self,
        name: &str,
        environment: Option<&str>,
        capabilities: &CapabilitySample,
    ) -> Result<(i64, Option<String>)> {
        let mut client = self.client.clone();
        let response = client
            .register_server(pb::RegisterServerRequest {
                name: name.to_string(),
                environment: environment.map(str::to_string),
                capabilities: Some(pb::CapabilitySample {
                    total_memory_mb: capabilities.total_memory_mb,
                    available_memory_mb: capabilities.available_memory_mb,
                    cpu_cores: capabilities.cpu_cores,
                    available_cpu_millicores: capabilities.available_cpu_millicores,
                    docker_version: capabilities.docker_version.clone(),
                }),
            })
            .await
            .map_err(status_err)?
            .into_inner();
        let environment = (!response.environment.is_empty()).then_some(response.environment);
        Ok((response.server_id, environment))
    }

    /// All non-terminal sessions assigned to this host, across pages.
    pub async fn live_sessions(&self, server_id: i64) -> Result<Vec<LiveSession>> {
        let mut client = self.client.clone();
        let mut sessions = Vec::new();
        let mut page_token = String::new();
        loop {
            let response = client
                .list_sessions(pb::ListSessionsRequest {
                    page_size: 100,
                    page_token: page_token.clone(),
                    live_only: true,
                    server_id: Some(server_id),
                    status_in: vec![],
                    server_game_config_id: None,
                })
                .await
                .map_err(status_err)?
                .into_inner();
            for session in response.sessions {
                sessions.push(LiveSession {
                    session_id: session.session_id,
                    sgc_id: session.sgc_id,
                    status: status_from_proto(session.status)?,
                });
            }
            if response.next_page_token.is_empty() {
                break;
            }
            page_token = response.next_page_token;
        }
        Ok(sessions)
    }
}

fn status_from_proto(value: i32) -> Result<SessionStatus> {
    match pb::SessionStatus::try_from(value) {
        Ok(pb::SessionStatus::Pending) => Ok(SessionStatus::Pending),
        Ok(pb::SessionStatus::Starting) => Ok(SessionStatus::Starting),
        Ok(pb::SessionStatus::Running) => Ok(SessionStatus::Running),
        Ok(pb::SessionStatus::Stopping) => Ok(SessionStatus::Stopping),
        Ok(pb::SessionStatus::Stopped) => Ok(SessionStatus::Stopped),
        Ok(pb::SessionStatus::Crashed) => Ok(SessionStatus::Crashed),
        _ => Err(Error::validation(format!("unknown session status {value}"))),
    }
}

fn status_err(status: tonic::Status) -> Error {
    match status.code() {
        tonic::Code::NotFound => Error::not_found(status.message().to_string()),
        tonic::Code::InvalidArgument => Error::validation(status.message().to_string()),
        tonic::Code::FailedPrecondition => Error::precondition(status.message().to_string()),
        tonic::Code::Unavailable | tonic::Code::DeadlineExceeded => {
            Error::transient(status.message().to_string())
        }
        _ => Error::internal(format!("control plane: {status}")),
    }
}
