//! Docker engine wrapper.
//!
//! Single-writer socket client for the host manager: container lifecycle,
//! demuxed log streams, stdin attach and capability discovery. All
//! containers this process creates carry the `manman.*` labels so they
//! stay attributable to their session from outside this process.

use std::collections::HashMap;

use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    KillContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortMap};
use bollard::Docker;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};

use manman_core::model::{CapabilitySample, PortBinding};
use manman_core::{Error, Result};

pub const LABEL_SESSION: &str = "manman.session_id";
pub const LABEL_SGC: &str = "manman.sgc_id";
pub const LABEL_SERVER: &str = "manman.server_id";
pub const LABEL_ENV: &str = "manman.environment";
pub const LABEL_TYPE: &str = "manman.type";
pub const TYPE_GAME: &str = "game";
pub const TYPE_DOWNLOAD: &str = "download";

/// Everything needed to create one container.
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// `KEY=value` entries.
    pub env: Vec<String>,
    pub cmd: Vec<String>,
    pub labels: HashMap<String, String>,
    /// `host_path:container_path` bind mounts.
    pub binds: Vec<String>,
    pub ports: Vec<PortBinding>,
    pub open_stdin: bool,
}

/// Observed state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Exited { exit_code: i64 },
}

#[derive(Clone)]
pub struct Engine {
    docker: Docker,
}

impl Engine {
    pub fn connect(socket: &str) -> Result<Self> {
        let docker = Docker::connect_with_socket(socket, 120, bollard::API_DEFAULT_VERSION)
            .map_err(|e| Error::transient(format!("docker connect {socket}: {e}")))?;
        Ok(Self { docker })
    }

    /// Capability sample from `docker info`. Available figures are
    /// approximated as totals; the engine does not expose reservations.
    pub async fn capabilities(&self) -> Result<CapabilitySample> {
        let info = self.docker.info().await.map_err(map_err)?;
        let total_memory_mb = info.mem_total.unwrap_or(0) / (1024 * 1024);
        let cpu_cores = info.ncpu.unwrap_or(0) as i32;
        Ok(CapabilitySample {
            total_memory_mb,
            available_memory_mb: total_memory_mb,
            cpu_cores,
            available_cpu_millicores: i64::from(cpu_cores) * 1000,
            docker_version: info.server_version.unwrap_or_default(),
        })
    }

    /// Pull the image unless it is already present.
    pub async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }
        tracing::info!(target: "manman::engine", %image, "pulling image");
        let mut pull = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image.to_string(),
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(progress) = pull.next().await {
            progress.map_err(|e| Error::permanent(format!("image pull {image}: {e}")))?;
        }
        Ok(())
    }

    pub async fn create(&self, spec: &ContainerSpec) -> Result<()> {
        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
        let mut port_bindings: PortMap = HashMap::new();
        for port in &spec.ports {
            let key = format!("{}/{}", port.container_port, port.protocol.as_str());
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![bollard::models::PortBinding {
                    host_ip: None,
                    host_port: Some(port.host_port.to_string()),
                }]),
            );
        }

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: (!spec.cmd.is_empty()).then(|| spec.cmd.clone()),
            env: (!spec.env.is_empty()).then(|| spec.env.clone()),
            labels: Some(spec.labels.clone()),
            attach_stdin: Some(spec.open_stdin),
            open_stdin: Some(spec.open_stdin),
            exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
            host_config: Some(HostConfig {
                binds: (!spec.binds.is_empty()).then(|| spec.binds.clone()),
                port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
                ..Default::default()
            }),
            ..Default::default()
        };

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(map_err)?;
        Ok(())
    }

    pub async fn start(&self, name: &str) -> Result<()> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(map_err)
    }

    /// SIGTERM with a grace window, then SIGKILL (engine-enforced).
    pub async fn stop(&self, name: &str, grace_secs: i64) -> Result<()> {
        match self
            .docker
            .stop_container(name, Some(StopContainerOptions { t: grace_secs }))
            .await
        {
            Ok(()) => Ok(()),
            // 304: already stopped.
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(map_err(e)),
        }
    }

    pub async fn kill(&self, name: &str) -> Result<()> {
        self.docker
            .kill_container(name, Some(KillContainerOptions { signal: "SIGKILL" }))
            .await
            .map_err(map_err)
    }

    pub async fn remove(&self, name: &str) -> Result<()> {
        match self
            .docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(map_err(e)),
        }
    }

    /// `None` when the container does not exist.
    pub async fn state(&self, name: &str) -> Result<Option<ContainerState>> {
        match self.docker.inspect_container(name, None).await {
            Ok(inspect) => {
                let state = inspect.state.unwrap_or_default();
                if state.running.unwrap_or(false) {
                    Ok(Some(ContainerState::Running))
                } else {
                    Ok(Some(ContainerState::Exited {
                        exit_code: state.exit_code.unwrap_or(0),
                    }))
                }
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(e) => Err(map_err(e)),
        }
    }

    /// Poll until the container is no longer running; returns the exit
    /// code, or an error when the container vanished mid-wait.
    pub async fn wait_exit(&self, name: &str) -> Result<i64> {
        loop {
            match self.state(name).await? {
                Some(ContainerState::Running) => {
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
                Some(ContainerState::Exited { exit_code }) => return Ok(exit_code),
                None => {
                    return Err(Error::permanent(format!("container {name} disappeared")))
                }
            }
        }
    }

    /// Demuxed stdout/stderr stream. `follow` keeps the stream open.
    pub fn logs(&self, name: &str, follow: bool) -> BoxStream<'_, Result<LogOutput>> {
        Box::pin(
            self.docker
                .logs(
                    name,
                    Some(LogsOptions::<String> {
                        follow,
                        stdout: true,
                        stderr: true,
                        tail: "all".to_string(),
                        ..Default::default()
                    }),
                )
                .map_err(map_err),
        )
    }

    /// Attach to the container for stdin.
    pub async fn attach_stdin(&self, name: &str) -> Result<AttachContainerResults> {
        self.docker
            .attach_container(
                name,
                Some(AttachContainerOptions::<String> {
                    stdin: Some(true),
                    stdout: Some(false),
                    stderr: Some(false),
                    stream: Some(true),
                    logs: Some(false),
                    ..Default::default()
                }),
            )
            .await
            .map_err(map_err)
    }

}

fn map_err(err: bollard::errors::Error) -> Error {
    use bollard::errors::Error as E;
    match &err {
        E::DockerResponseServerError { status_code, message } => match status_code {
            404 => Error::not_found(message.clone()),
            409 => Error::already_exists(message.clone()),
            _ => Error::internal(format!("docker: {err}")),
        },
        E::IOError { .. } | E::RequestTimeoutError => Error::transient(format!("docker: {err}")),
        _ => Error::internal(format!("docker: {err}")),
    }
}
