//! Connection lifecycle: accept the proxy, wire the per-session components
//! together, serve commands, and tear everything down in a safe order.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sda_config::AgentConfig;
use sda_jdwp::accept_handshake;
use sda_jdwp::packet::SDWP_HANDSHAKE;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::classes::ClassTable;
use crate::error::AgentError;
use crate::event::{EventCatalog, EventDispatcher, SuspendPolicy};
use crate::gateway::ProtocolGateway;
use crate::identity::IdentityRegistry;
use crate::proxy::{IncomingCommand, ProxyLink};
use crate::runtime::{IsolateState, Runtime};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    NotConnected,
    AwaitingProxy,
    Connected,
    /// Terminal: no further sessions will be accepted.
    Disconnected,
}

/// Runs debug sessions against one debuggee until it exits.
pub struct SessionController {
    runtime: Arc<dyn Runtime>,
    config: AgentConfig,
    state: Mutex<SessionState>,
    shutdown: CancellationToken,
}

impl SessionController {
    pub fn new(runtime: Arc<dyn Runtime>, config: AgentConfig) -> Self {
        Self {
            runtime,
            config,
            state: Mutex::new(SessionState::NotConnected),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    fn set_state(&self, state: SessionState) {
        let mut current = self.state.lock();
        if *current != state {
            tracing::debug!(target: "sda.session", from = ?*current, to = ?state, "session state change");
            *current = state;
        }
    }

    /// Cancelling the token ends the current session and stops the loop.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Binds the configured listen address. Failure is fatal.
    pub async fn bind(&self) -> Result<TcpListener, AgentError> {
        let address = self.config.listen.address.clone();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| AgentError::Bind {
                address: address.clone(),
                source,
            })?;
        tracing::info!(
            target: "sda.session",
            address = %listener.local_addr().map_or(address, |addr| addr.to_string()),
            "listening for debug proxy"
        );
        Ok(listener)
    }

    /// Binds and serves sessions. Returns the debuggee's exit code.
    pub async fn run(&self) -> Result<i32, AgentError> {
        let listener = self.bind().await?;
        self.run_with_listener(listener).await
    }

    /// Serves sessions on an already bound listener for as long as the
    /// debuggee is alive.
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<i32, AgentError> {
        let result = loop {
            match self.run_session(&listener).await {
                Ok(true) => continue,
                Ok(false) => break Ok(self.runtime.exit_code()),
                Err(err) => break Err(err),
            }
        };
        self.set_state(SessionState::Disconnected);
        tracing::info!(target: "sda.session", "debug agent stopped");
        result
    }

    /// Runs one session. Returns whether another session should follow.
    async fn run_session(&self, listener: &TcpListener) -> Result<bool, AgentError> {
        let runtime = &self.runtime;
        if matches!(
            runtime.isolate_state(),
            IsolateState::Hibernated | IsolateState::Exited
        ) {
            return Ok(false);
        }

        let identity = Arc::new(IdentityRegistry::new(runtime.clone()));
        let classes = Arc::new(ClassTable::new(runtime.clone()));
        let catalog = Arc::new(EventCatalog::new(
            runtime.clone(),
            identity.clone(),
            classes.clone(),
        ));
        let start_policy = if self.config.debuggee.suspend_on_start {
            SuspendPolicy::All
        } else {
            SuspendPolicy::None
        };
        catalog.register_implicit_requests(start_policy);
        let dispatcher = Arc::new(EventDispatcher::new(catalog.clone()));

        if !self.config.debuggee.suspend_on_start && runtime.isolate_state() == IsolateState::New {
            tracing::info!(target: "sda.session", "starting debuggee without waiting for a debugger");
            runtime.start();
        }

        self.set_state(SessionState::AwaitingProxy);
        let Some(mut stream) = self.accept(listener).await? else {
            return Ok(false);
        };
        if let Err(err) = accept_handshake(&mut stream, SDWP_HANDSHAKE).await {
            tracing::warn!(target: "sda.session", error = %err, "proxy handshake failed");
            return Ok(runtime.debuggee_alive());
        }

        let (link, commands) = ProxyLink::spawn(stream);
        catalog.attach_proxy(link.clone());
        classes.initialize();
        let gateway = Arc::new(ProtocolGateway::new(
            runtime.clone(),
            identity,
            classes,
            catalog.clone(),
            link.clone(),
        ));

        let dispatch_thread = {
            let dispatcher = dispatcher.clone();
            std::thread::Builder::new()
                .name("sda-events".into())
                .spawn(move || dispatcher.run())?
        };
        runtime.set_debug_hook(Some(dispatcher.clone()));
        self.set_state(SessionState::Connected);
        tracing::info!(target: "sda.session", "debug proxy connected");

        let worker = tokio::task::spawn_blocking({
            let gateway = gateway.clone();
            let link = link.clone();
            move || serve_commands(commands, &gateway, &link)
        });

        // A fresh debuggee starts now; a running one gets a synthetic VM
        // start so the proxy can rebuild its view of classes and threads.
        // Both can block inside the hook.
        let kickoff = tokio::task::spawn_blocking({
            let runtime = runtime.clone();
            let catalog = catalog.clone();
            move || {
                if runtime.isolate_state() == IsolateState::New {
                    runtime.start();
                    Ok(())
                } else {
                    catalog.announce_attach()
                }
            }
        });
        match kickoff.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(target: "sda.session", error = %err, "failed to announce attach");
            }
            Err(err) => {
                tracing::error!(target: "sda.session", error = %err, "debuggee start panicked");
            }
        }

        self.wait_for_session_end(&link, &dispatcher).await;
        link.close();
        if let Err(err) = worker.await {
            tracing::error!(target: "sda.session", error = %err, "command worker panicked");
        }

        // Teardown order matters: resume first, detach the hook second, and
        // stop dispatch last. Dispatch stopped earlier could leave it parked
        // on a lock held by a debuggee thread that never runs again.
        catalog.clear_everything();
        gateway.threads().resume_for_detach();
        runtime.set_debug_hook(None);
        catalog.detach_proxy();
        dispatcher.quit();
        match tokio::task::spawn_blocking(move || dispatch_thread.join()).await {
            Ok(Ok(())) => {}
            _ => tracing::error!(target: "sda.session", "event dispatch thread panicked"),
        }

        let alive = runtime.debuggee_alive();
        tracing::info!(target: "sda.session", debuggee_alive = alive, "debug session ended");
        if alive {
            self.set_state(SessionState::AwaitingProxy);
        }
        Ok(alive && !self.shutdown.is_cancelled())
    }

    /// Waits for a proxy connection. Timeouts are retried while the
    /// debuggee lives; returns `None` once it has gone or on shutdown.
    async fn accept(&self, listener: &TcpListener) -> Result<Option<TcpStream>, AgentError> {
        let timeout = self.config.listen.accept_timeout();
        loop {
            if !self.runtime.debuggee_alive() {
                return Ok(None);
            }
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(None),
                res = tokio::time::timeout(timeout, listener.accept()) => res,
            };
            match accepted {
                Err(_elapsed) => {
                    tracing::trace!(target: "sda.session", "accept timed out; retrying");
                }
                Ok(Ok((stream, peer))) => {
                    tracing::info!(target: "sda.session", %peer, "accepted proxy connection");
                    if let Err(err) = stream.set_nodelay(true) {
                        tracing::debug!(target: "sda.session", error = %err, "failed to set TCP_NODELAY");
                    }
                    return Ok(Some(stream));
                }
                Ok(Err(err)) if is_fatal_accept_error(&err) => {
                    return Err(AgentError::Accept(err));
                }
                Ok(Err(err)) => {
                    tracing::warn!(target: "sda.session", error = %err, "accept failed; retrying");
                }
            }
        }
    }

    async fn wait_for_session_end(&self, link: &ProxyLink, dispatcher: &EventDispatcher) {
        let poll = self.config.listen.accept_timeout().min(Duration::from_millis(500));
        let mut ticks = tokio::time::interval(poll);
        loop {
            tokio::select! {
                _ = link.closed() => return,
                _ = self.shutdown.cancelled() => return,
                _ = ticks.tick() => {
                    if !self.runtime.debuggee_alive() || dispatcher.is_done() {
                        tracing::info!(target: "sda.session", "debuggee finished; closing session");
                        return;
                    }
                }
            }
        }
    }
}

fn is_fatal_accept_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::AddrInUse
    )
}

/// Serves proxy commands in arrival order until the link closes or the
/// debugger disposes the session. Runs on a blocking thread because a step
/// request waits synchronously for the proxy.
fn serve_commands(
    mut commands: tokio::sync::mpsc::UnboundedReceiver<IncomingCommand>,
    gateway: &ProtocolGateway,
    link: &ProxyLink,
) {
    while let Some(command) = commands.blocking_recv() {
        let _span = tracing::debug_span!(
            target: "sda.gateway",
            "command",
            id = command.id,
            command_set = command.command_set,
            command = command.command
        )
        .entered();
        match gateway.handle(command.command_set, command.command, &command.payload) {
            Ok(payload) => link.send_reply(command.id, 0, &payload),
            Err(err) => {
                tracing::debug!(target: "sda.gateway", error = %err, code = err.error_code(), "command failed");
                link.send_reply(command.id, err.error_code(), &[]);
            }
        }
        if gateway.dispose_requested() {
            link.close();
            break;
        }
    }
}
