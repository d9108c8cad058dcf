//! Docker Engine implementation of [`ContainerRuntime`].

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    InspectContainerOptions, KillContainerOptions, ListContainersOptions, LogOutput,
    RestartContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::system::EventsOptions;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;

use super::{
    ContainerEvent, ContainerEventAction, ContainerFilter, ContainerInfo, ContainerRuntime,
    EventStream, ExecOutput, ExecStatus, OutputChunk, OutputStream, RuntimeError,
};
use crate::config::DockerConfig;
use crate::core::types::ContainerId;

/// Request timeout used when the configuration does not set one.
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Container runtime backed by the Docker Engine API.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect according to the `docker` section of the configuration.
    pub fn connect(config: &DockerConfig) -> Result<Self, RuntimeError> {
        let timeout = config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        let docker = match config.host.as_deref() {
            None => Docker::connect_with_local_defaults()
                .map(|docker| docker.with_timeout(Duration::from_secs(timeout))),
            Some(host) if host.starts_with("unix://") => {
                Docker::connect_with_socket(host, timeout, bollard::API_DEFAULT_VERSION)
            }
            Some(host) => Docker::connect_with_http(host, timeout, bollard::API_DEFAULT_VERSION),
        }
        .map_err(connection_error)?;

        tracing::debug!(host = ?config.host, timeout_secs = timeout, "Docker client configured");
        Ok(Self { docker })
    }

    /// Check that the daemon answers.
    pub async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker.ping().await.map_err(api_error)?;
        Ok(())
    }
}

fn connection_error(err: DockerError) -> RuntimeError {
    RuntimeError::Connection(err.to_string())
}

fn api_error(err: DockerError) -> RuntimeError {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::NotFound(message),
        other => RuntimeError::Api(other.to_string()),
    }
}

fn label_filters(filter: &ContainerFilter) -> HashMap<String, Vec<String>> {
    HashMap::from([("label".to_string(), vec![filter.label.clone()])])
}

/// Docker takes stop timeouts in whole seconds; round sub-second values up.
fn grace_secs(grace: Duration) -> u64 {
    let secs = grace.as_secs();
    if grace.subsec_nanos() > 0 { secs + 1 } else { secs }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(
        &self,
        filter: &ContainerFilter,
    ) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let options = ListContainersOptions::<String> {
            all: true,
            filters: label_filters(filter),
            ..Default::default()
        };

        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(api_error)?;

        Ok(summaries
            .into_iter()
            .filter_map(|summary| {
                let id = summary.id?;
                Some(ContainerInfo::new(id, summary.labels.unwrap_or_default()))
            })
            .collect())
    }

    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerInfo, RuntimeError> {
        let response = self
            .docker
            .inspect_container(id.as_str(), None::<InspectContainerOptions>)
            .await
            .map_err(api_error)?;

        let labels = response
            .config
            .and_then(|config| config.labels)
            .unwrap_or_default();
        let id = response.id.map(ContainerId::from).unwrap_or_else(|| id.clone());
        Ok(ContainerInfo { id, labels })
    }

    fn watch_events(&self, filter: &ContainerFilter) -> EventStream {
        let mut filters = label_filters(filter);
        filters.insert("type".to_string(), vec!["container".to_string()]);
        filters.insert(
            "event".to_string(),
            vec![
                "create".to_string(),
                "update".to_string(),
                "destroy".to_string(),
            ],
        );

        let options = EventsOptions::<String> {
            filters,
            ..Default::default()
        };

        self.docker
            .events(Some(options))
            .filter_map(|message| async move {
                match message {
                    Ok(message) => {
                        let container = message.actor.and_then(|actor| actor.id)?;
                        let action = message.action.unwrap_or_default();
                        Some(Ok(ContainerEvent {
                            action: ContainerEventAction::parse(&action),
                            container: ContainerId::from(container),
                        }))
                    }
                    Err(e) => Some(Err(RuntimeError::Stream(e.to_string()))),
                }
            })
            .boxed()
    }

    async fn start_container(&self, id: &ContainerId) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id.as_str(), None::<StartContainerOptions<String>>)
            .await
            .map_err(api_error)
    }

    async fn stop_container(
        &self,
        id: &ContainerId,
        grace: Option<Duration>,
    ) -> Result<(), RuntimeError> {
        let options = grace.map(|grace| StopContainerOptions {
            t: i64::try_from(grace_secs(grace)).unwrap_or(i64::MAX),
        });
        self.docker
            .stop_container(id.as_str(), options)
            .await
            .map_err(api_error)
    }

    async fn restart_container(
        &self,
        id: &ContainerId,
        grace: Option<Duration>,
    ) -> Result<(), RuntimeError> {
        let options = grace.map(|grace| RestartContainerOptions {
            t: isize::try_from(grace_secs(grace)).unwrap_or(isize::MAX),
        });
        self.docker
            .restart_container(id.as_str(), options)
            .await
            .map_err(api_error)
    }

    async fn kill_container(&self, id: &ContainerId, signal: &str) -> Result<(), RuntimeError> {
        self.docker
            .kill_container(id.as_str(), Some(KillContainerOptions { signal }))
            .await
            .map_err(api_error)
    }

    async fn create_exec(
        &self,
        id: &ContainerId,
        command: &[String],
    ) -> Result<String, RuntimeError> {
        let options = CreateExecOptions {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(command.to_vec()),
            ..Default::default()
        };

        let created = self
            .docker
            .create_exec(id.as_str(), options)
            .await
            .map_err(api_error)?;
        Ok(created.id)
    }

    async fn start_exec(&self, exec_id: &str) -> Result<ExecOutput, RuntimeError> {
        let results = self
            .docker
            .start_exec(exec_id, None)
            .await
            .map_err(api_error)?;

        match results {
            StartExecResults::Attached { output, .. } => Ok(output
                .filter_map(|item| async move {
                    match item {
                        Ok(LogOutput::StdOut { message }) => Some(Ok(OutputChunk {
                            stream: OutputStream::Stdout,
                            data: message.to_vec(),
                        })),
                        Ok(LogOutput::StdErr { message }) => Some(Ok(OutputChunk {
                            stream: OutputStream::Stderr,
                            data: message.to_vec(),
                        })),
                        Ok(LogOutput::Console { message }) => Some(Ok(OutputChunk {
                            stream: OutputStream::Console,
                            data: message.to_vec(),
                        })),
                        Ok(LogOutput::StdIn { .. }) => None,
                        Err(e) => Some(Err(RuntimeError::Stream(e.to_string()))),
                    }
                })
                .boxed()),
            StartExecResults::Detached => Ok(futures::stream::empty().boxed()),
        }
    }

    async fn inspect_exec(&self, exec_id: &str) -> Result<ExecStatus, RuntimeError> {
        let response = self
            .docker
            .inspect_exec(exec_id)
            .await
            .map_err(api_error)?;
        Ok(ExecStatus {
            running: response.running.unwrap_or(false),
            exit_code: response.exit_code,
        })
    }
}
