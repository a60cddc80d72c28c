//! The kanrisha daemon: owns the supervisor and serves the command channel.

use crate::channel::{ChannelServer, Decoded, Request, Response};
use crate::error::{Error, Result};
use crate::reaper::{self, ExitStatus, Reaper};
use crate::signals;
use crate::supervisor::{BatchReport, Supervisor};
use ichirou_config::DaemonConfig;
use nix::sys::signal::Signal;
use std::fmt::Write as _;
use tokio::net::UnixStream;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Running daemon state.
///
/// The channel socket lives exactly as long as this value.
pub struct Daemon {
    supervisor: Supervisor,
    server: ChannelServer,
}

impl Daemon {
    pub fn new(config: DaemonConfig) -> Self {
        let server = ChannelServer::new(&config.channel_path, config.channel_mode);
        Self {
            supervisor: Supervisor::new(config),
            server,
        }
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Bring the daemon up and serve until SIGTERM or SIGINT.
    ///
    /// Returns early only on a fatal error.
    pub async fn run(self) -> Result<()> {
        let Self {
            mut supervisor,
            mut server,
        } = self;

        signals::block_all_except(&[Signal::SIGCHLD, Signal::SIGTERM, Signal::SIGINT])?;
        supervisor.layout().ensure_dirs()?;
        server.start()?;

        let (tx, mut exits) = mpsc::unbounded_channel();
        let reaper_task = reaper::spawn_reaper_task(Reaper::new(), tx)?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        let report = supervisor.start_all()?;
        info!(
            started = report.succeeded.len(),
            failed = report.failures(),
            "Started enabled services"
        );

        let max_len = supervisor.config().max_name_len;
        let result = loop {
            tokio::select! {
                Some(status) = exits.recv() => {
                    if let Err(e) = on_exit(&mut supervisor, status) {
                        break Err(e);
                    }
                }
                conn = server.accept() => {
                    let served = match conn {
                        Ok(stream) => serve(&mut supervisor, stream, max_len).await,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept channel connection");
                            Ok(())
                        }
                    };
                    if let Err(e) = served {
                        break Err(e);
                    }

                    let mut drained = Ok(());
                    while let Ok(status) = exits.try_recv() {
                        drained = on_exit(&mut supervisor, status);
                        if drained.is_err() {
                            break;
                        }
                    }
                    if let Err(e) = drained {
                        break Err(e);
                    }
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down");
                    break Ok(());
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down");
                    break Ok(());
                }
            }
        };

        reaper_task.abort();
        if let Err(e) = &result {
            error!(error = %e, "Service manager terminating");
        }
        result
    }
}

/// Apply the restart policy to one exit event.
fn on_exit(supervisor: &mut Supervisor, status: ExitStatus) -> Result<()> {
    match supervisor.handle_exit(status) {
        Ok(_) => Ok(()),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            error!(pid = status.pid, error = %e, "Failed to restart service");
            Ok(())
        }
    }
}

/// Serve a single connection. Only fatal errors are returned.
async fn serve(supervisor: &mut Supervisor, mut stream: UnixStream, max_len: usize) -> Result<()> {
    let response = match ChannelServer::read_request(&mut stream, max_len).await {
        Ok(Decoded::Request(request)) => dispatch(supervisor, request).await?,
        Ok(Decoded::Unrecognized(byte)) => {
            warn!(command = byte, "Unrecognized command");
            Response::unrecognized(byte)
        }
        Err(e @ Error::Protocol(_)) => Response::failure(format!("error: {}\n", e)),
        Err(e) => {
            warn!(error = %e, "Failed to read channel request");
            return Ok(());
        }
    };

    if let Err(e) = ChannelServer::write_response(&mut stream, &response).await {
        warn!(error = %e, "Failed to write channel response");
    }
    Ok(())
}

/// Execute `request` against the supervisor.
///
/// Operational failures become a failing response; fatal errors are
/// returned to the caller.
pub async fn dispatch(supervisor: &mut Supervisor, request: Request) -> Result<Response> {
    let mut body = String::new();

    let code = match &request {
        Request::StartOne(name) => {
            let _ = writeln!(body, "starting service {}...", name);
            let result = supervisor.start(name);
            single(result, &mut body, || format!("service {} has been started", name))?
        }
        Request::StopOne(name) => {
            let _ = writeln!(body, "stopping service {}...", name);
            let result = supervisor.stop(name).await;
            single(result, &mut body, || format!("service {} has been stopped", name))?
        }
        Request::RestartOne(name) => {
            let _ = writeln!(body, "restarting service {}...", name);
            let result = supervisor.restart(name).await;
            single(result, &mut body, || {
                format!("service {} has been restarted", name)
            })?
        }
        Request::StartAll => {
            let report = supervisor.start_all()?;
            batch(&report, &mut body, "started")
        }
        Request::StopAll => {
            let report = supervisor.stop_all().await?;
            batch(&report, &mut body, "stopped")
        }
        Request::Status(name) => match supervisor.status(name) {
            Ok(status) => {
                body = serde_json::to_string(&status)?;
                Response::OK
            }
            Err(e) => failed(e, &mut body)?,
        },
        Request::ShowLog(name) => match supervisor.layout().read_log(name) {
            Ok(log) => {
                body = log;
                Response::OK
            }
            Err(e) => failed(e, &mut body)?,
        },
        Request::ListAvailable => list(supervisor.layout().list_available(), &mut body)?,
        Request::ListEnabled => list(supervisor.layout().list_enabled(), &mut body)?,
        Request::ListRunning => list(Ok(supervisor.registry().names()), &mut body)?,
        Request::Enable(name) => {
            let result = supervisor.layout().enable(name);
            single(result, &mut body, || format!("service {} has been enabled", name))?
        }
        Request::Disable(name) => {
            let result = supervisor.layout().disable(name);
            single(result, &mut body, || {
                format!("service {} has been disabled", name)
            })?
        }
    };

    Ok(Response::new(code, body))
}

fn single<T>(result: Result<T>, body: &mut String, done: impl FnOnce() -> String) -> Result<i32> {
    match result {
        Ok(_) => {
            let _ = writeln!(body, "{}", done());
            Ok(Response::OK)
        }
        Err(e) => failed(e, body),
    }
}

fn failed(e: Error, body: &mut String) -> Result<i32> {
    if e.is_fatal() {
        return Err(e);
    }
    let _ = writeln!(body, "error: {}", e);
    Ok(Response::FAILURE)
}

fn batch(report: &BatchReport, body: &mut String, verb: &str) -> i32 {
    for name in &report.succeeded {
        let _ = writeln!(body, "service {} has been {}", name, verb);
    }
    for (name, e) in &report.failed {
        let _ = writeln!(body, "error: {}: {}", name, e);
    }
    report.failures() as i32
}

fn list(names: Result<Vec<String>>, body: &mut String) -> Result<i32> {
    match names {
        Ok(names) => {
            for name in names {
                let _ = writeln!(body, "{}", name);
            }
            Ok(Response::OK)
        }
        Err(e) => failed(e, body),
    }
}
