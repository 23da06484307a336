//! Supervision of the query engine process
//!
//! The engine is launched once at startup and killed only when the gateway
//! asks for it, after the listener has drained. If the engine exits on its
//! own the gateway has nothing left to serve and shuts down as well.

pub mod reclaim;

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};

/// Executable and arguments used to launch the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl EngineCommand {
    /// Assemble the engine invocation from configuration
    #[must_use]
    pub fn from_config(config: &GatewayConfig) -> Self {
        let engine = &config.engine;
        let mut args = vec![
            "--datamodel-path".to_string(),
            engine.schema_path.clone(),
            "--host".to_string(),
            engine.host_bind.clone(),
        ];

        if !config.server.production {
            args.push("--enable-playground".to_string());
            args.push("--port".to_string());
            args.push(engine.port.to_string());
        }
        if engine.raw_queries {
            args.push("--enable-raw-queries".to_string());
        }
        if engine.log_queries {
            args.push("--log-queries".to_string());
        }
        if engine.metrics {
            args.push("--enable-metrics".to_string());
            args.push("--dataproxy-metric-override".to_string());
        }
        if engine.open_telemetry {
            args.push("--enable-open-telemetry".to_string());
            if let Some(endpoint) = engine
                .open_telemetry_endpoint
                .as_ref()
                .filter(|endpoint| !endpoint.is_empty())
            {
                args.push("--open-telemetry-endpoint".to_string());
                args.push(endpoint.clone());
            }
        }
        if engine.telemetry_in_response {
            args.push("--enable-telemetry-in-response".to_string());
        }

        Self {
            program: PathBuf::from(&engine.executable_path),
            args,
        }
    }
}

impl fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Owns the engine process for the gateway's lifetime
#[derive(Debug)]
pub struct EngineSupervisor {
    command: EngineCommand,
    reclaim_port: Option<u16>,
    shutdown: CancellationToken,
}

impl EngineSupervisor {
    #[must_use]
    pub fn new(command: EngineCommand, shutdown: CancellationToken) -> Self {
        Self {
            command,
            reclaim_port: None,
            shutdown,
        }
    }

    /// Supervisor for the configured engine; reclaims the engine port
    /// outside production.
    #[must_use]
    pub fn from_config(config: &GatewayConfig, shutdown: CancellationToken) -> Self {
        let supervisor = Self::new(EngineCommand::from_config(config), shutdown);
        if config.server.production {
            supervisor
        } else {
            supervisor.with_port_reclaim(config.engine.port)
        }
    }

    /// Kill whatever listens on `port` before launching
    #[must_use]
    pub fn with_port_reclaim(mut self, port: u16) -> Self {
        self.reclaim_port = Some(port);
        self
    }

    /// Launch the engine and start supervising it.
    ///
    /// A launch failure is returned to the caller; the gateway cannot run
    /// without its engine.
    pub async fn start(self) -> GatewayResult<SupervisorHandle> {
        if let Some(port) = self.reclaim_port {
            // Shells out to lsof/netstat and may sleep between signals.
            let reclaim = tokio::task::spawn_blocking(move || reclaim::reclaim_port(port));
            if let Err(e) = reclaim.await {
                warn!(port, "Port reclaim task failed: {}", e);
            }
        }

        info!(command = %self.command, "Starting query engine");
        let child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(GatewayError::EngineLaunch)?;

        let pid = child.id();
        info!(pid, "Query engine started");

        let stop = CancellationToken::new();
        let task = tokio::spawn(supervise(child, self.shutdown, stop.clone()));
        Ok(SupervisorHandle { task, pid, stop })
    }
}

async fn supervise(mut child: Child, shutdown: CancellationToken, stop: CancellationToken) {
    tokio::select! {
        () = stop.cancelled() => {
            match child.kill().await {
                Ok(()) => info!("Query engine stopped"),
                Err(e) => warn!("Failed to kill query engine: {}", e),
            }
        }
        status = child.wait() => {
            match status {
                Ok(status) => error!(%status, "Query engine exited unexpectedly"),
                Err(e) => error!("Failed to wait for query engine: {}", e),
            }
            shutdown.cancel();
        }
    }
}

/// Handle to the supervising task.
///
/// The shared shutdown token only stops the listener; the engine keeps
/// serving in-flight requests until [`SupervisorHandle::stop`] is called.
#[derive(Debug)]
pub struct SupervisorHandle {
    task: JoinHandle<()>,
    pid: Option<u32>,
    stop: CancellationToken,
}

impl SupervisorHandle {
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the engine process is still being supervised
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Kill the engine if it is still running and wait until it is gone
    pub async fn stop(self) {
        self.stop.cancel();
        if let Err(e) = self.task.await {
            error!("Query engine supervisor task failed: {}", e);
        }
    }
}
