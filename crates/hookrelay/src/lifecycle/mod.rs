//! Agent session lifecycle.
//!
//! A [`Session`] walks through
//! `Configuring → CleaningStale → Registering → Connecting → Listening →
//! Terminating → Done`. Every resource it acquires registers its release on a
//! [`TeardownStack`], which runs in reverse acquisition order however the
//! session ends.

mod signal;
mod teardown;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::agent::{
    AgentError, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PING_INTERVAL, DeliverySocket, Dispatcher,
    ReadOutcome,
};
use crate::github::{GithubError, WebhookRegistrar};
use crate::key::{KEY_BYTES, KeyError, RelayKey, generate_key};

pub use signal::shutdown_signal;
pub use teardown::TeardownStack;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Configuring,
    CleaningStale,
    Registering,
    Connecting,
    Listening,
    Terminating,
    Done,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configuring => "configuring",
            Self::CleaningStale => "cleaning-stale",
            Self::Registering => "registering",
            Self::Connecting => "connecting",
            Self::Listening => "listening",
            Self::Terminating => "terminating",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Fatal session failures. Each one ends the session before `Listening`.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Shutdown was requested before any webhook was created.
    #[error("interrupted while {0}")]
    Interrupted(SessionState),

    #[error("failed to list existing webhooks")]
    ListHooks(#[source] GithubError),

    #[error("failed to remove stale webhook {id}")]
    RemoveStale {
        id: u64,
        #[source]
        source: GithubError,
    },

    #[error("failed to generate relay key")]
    Key(#[from] KeyError),

    #[error("failed to create webhook")]
    Register(#[source] GithubError),

    #[error("failed to connect to hub at {url}")]
    Connect {
        url: String,
        #[source]
        source: AgentError,
    },
}

/// Knobs for one session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Hub base address; hook URLs are `{endpoint}/{key}`.
    pub endpoint: String,
    pub ping_interval: Duration,
    pub connect_timeout: Duration,
    pub key_bytes: usize,
}

impl SessionSettings {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            ping_interval: DEFAULT_PING_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            key_bytes: KEY_BYTES,
        }
    }
}

/// What moved the session into `Terminating`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    Signal,
    Transport(ReadOutcome),
}

/// Summary of a session that reached `Listening`.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub key: RelayKey,
    pub hook_id: u64,
    pub hook_url: String,
    pub stale_removed: usize,
    pub ended_by: EndReason,
    /// Names of teardown steps that failed.
    pub teardown_failures: Vec<&'static str>,
}

/// One agent session against one repository and one hub.
pub struct Session<R> {
    registrar: Arc<R>,
    settings: SessionSettings,
    dispatcher: Dispatcher,
    state: SessionState,
}

impl<R> Session<R>
where
    R: WebhookRegistrar + 'static,
{
    /// Credentials and repository are already resolved by the time a session
    /// exists, so it starts in `Configuring` and moves on immediately.
    pub fn new(registrar: Arc<R>, settings: SessionSettings, dispatcher: Dispatcher) -> Self {
        Self {
            registrar,
            settings,
            dispatcher,
            state: SessionState::Configuring,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        info!(from = %self.state, to = %next, "session state");
        self.state = next;
    }

    /// Run until `shutdown` resolves or the hub connection drops.
    ///
    /// `shutdown` is watched from the first step. A signal during stale
    /// cleanup or hook creation lets that call finish, so nothing is left
    /// half-registered. Once the hook exists every exit goes through the
    /// teardown stack.
    pub async fn run<F>(mut self, shutdown: F) -> Result<SessionReport, SessionError>
    where
        F: Future<Output = ()> + Send,
    {
        let mut shutdown = Shutdown::new(shutdown);

        self.transition(SessionState::CleaningStale);
        let stale_removed = shutdown
            .shielded(remove_stale(self.registrar.as_ref(), &self.settings.endpoint))
            .await?;
        if shutdown.fired {
            return Err(self.interrupted());
        }

        self.transition(SessionState::Registering);
        info!("Generating a new key");
        let key = generate_key(self.settings.key_bytes)?;
        let hook_url = format!("{}/{}", self.settings.endpoint, key);

        info!("Creating a new webhook");
        let hook = shutdown
            .shielded(self.registrar.create_hook(&hook_url))
            .await
            .map_err(SessionError::Register)?;
        info!(hook_id = hook.id, "webhook created");

        let mut teardown = TeardownStack::new();
        let registrar = Arc::clone(&self.registrar);
        let hook_id = hook.id;
        teardown.push("delete webhook", async move {
            info!(hook_id, "Removing the webhook");
            registrar.delete_hook(hook_id).await?;
            Ok::<(), anyhow::Error>(())
        });

        self.transition(SessionState::Connecting);
        let dial = DeliverySocket::connect(
            &hook_url,
            self.settings.ping_interval,
            self.settings.connect_timeout,
        );
        let ended_by = match shutdown.race(dial).await {
            None => EndReason::Signal,
            Some(Err(source)) => {
                self.transition(SessionState::Terminating);
                teardown.run().await;
                self.transition(SessionState::Done);
                return Err(SessionError::Connect {
                    url: hook_url,
                    source,
                });
            }
            Some(Ok(socket)) => {
                let (keepalive, closer, reader) = socket.into_parts();
                teardown.push("close socket", async move {
                    closer.close().await?;
                    Ok::<(), anyhow::Error>(())
                });
                teardown.push("stop keepalive", async move {
                    keepalive.stop().await;
                    Ok::<(), anyhow::Error>(())
                });

                self.transition(SessionState::Listening);
                info!("Listening to events");
                match shutdown.race(reader.run(&mut self.dispatcher)).await {
                    None => EndReason::Signal,
                    Some(outcome) => {
                        warn!(?outcome, "hub connection ended");
                        EndReason::Transport(outcome)
                    }
                }
            }
        };
        if ended_by == EndReason::Signal {
            info!(state = %self.state, "shutdown requested");
        }

        self.transition(SessionState::Terminating);
        let teardown_failures = teardown.run().await;
        self.transition(SessionState::Done);

        Ok(SessionReport {
            key,
            hook_id,
            hook_url,
            stale_removed,
            ended_by,
            teardown_failures,
        })
    }

    fn interrupted(&mut self) -> SessionError {
        let during = self.state;
        info!(state = %during, "shutdown requested before a webhook was created");
        self.transition(SessionState::Done);
        SessionError::Interrupted(during)
    }
}

/// The session's shutdown future, polled alongside whichever step is running.
struct Shutdown<F> {
    signal: Pin<Box<F>>,
    fired: bool,
}

impl<F> Shutdown<F>
where
    F: Future<Output = ()>,
{
    fn new(signal: F) -> Self {
        Self {
            signal: Box::pin(signal),
            fired: false,
        }
    }

    /// Drive `work` to completion, recording a signal that arrives meanwhile.
    async fn shielded<T>(&mut self, work: impl Future<Output = T>) -> T {
        tokio::pin!(work);
        loop {
            tokio::select! {
                biased;
                _ = self.signal.as_mut(), if !self.fired => {
                    self.fired = true;
                }
                out = &mut work => return out,
            }
        }
    }

    /// Drive `work` unless the signal has fired or fires first.
    async fn race<T>(&mut self, work: impl Future<Output = T>) -> Option<T> {
        if self.fired {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.signal.as_mut() => {
                self.fired = true;
                None
            }
            out = work => Some(out),
        }
    }
}

/// Delete every hook left behind by an earlier session against this hub.
async fn remove_stale<R>(registrar: &R, endpoint: &str) -> Result<usize, SessionError>
where
    R: WebhookRegistrar + ?Sized,
{
    info!("Fetching existing webhooks");
    let stale = registrar
        .list_stale(endpoint)
        .await
        .map_err(SessionError::ListHooks)?;

    for hook in &stale {
        info!(hook_id = hook.id, "Removing the existing webhook");
        registrar
            .delete_hook(hook.id)
            .await
            .map_err(|source| SessionError::RemoveStale {
                id: hook.id,
                source,
            })?;
    }

    Ok(stale.len())
}
