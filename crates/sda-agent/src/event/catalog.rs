use std::sync::Arc;

use parking_lot::Mutex;
use sda_jdwp::consts::{command, command_set};
use sda_jdwp::{JdwpReader, JdwpWriter};

use super::modifier::MatchContext;
use super::{DebugEvent, EventKind, EventRequest, Modifier, SuspendPolicy};
use crate::classes::ClassTable;
use crate::error::{AgentError, ProtocolError, ProtocolResult};
use crate::identity::IdentityRegistry;
use crate::proxy::ProxyChannel;
use crate::runtime::{Breakpoint, ObjectRef, PendingStep, Runtime};
use crate::threads::ThreadControl;

/// Requests matched by one runtime event.
#[derive(Debug, Default)]
pub struct MatchedRequests {
    pub requests: Vec<Arc<EventRequest>>,
    pub suspend_policy: SuspendPolicy,
    /// A VM death request matched; event dispatch stops after this event.
    pub vm_death: bool,
}

struct CatalogState {
    requests: Vec<Arc<EventRequest>>,
    next_id: i32,
}

/// The debugger's event requests for one session.
///
/// Registration and clearing are serialized; matching works on a snapshot of
/// the request list so no catalog lock is held while the runtime, the identity
/// registry or the proxy is consulted.
pub struct EventCatalog {
    runtime: Arc<dyn Runtime>,
    identity: Arc<IdentityRegistry>,
    classes: Arc<ClassTable>,
    threads: ThreadControl,
    state: Mutex<CatalogState>,
    registration: Mutex<()>,
    proxy: Mutex<Option<Arc<dyn ProxyChannel>>>,
}

impl EventCatalog {
    pub fn new(
        runtime: Arc<dyn Runtime>,
        identity: Arc<IdentityRegistry>,
        classes: Arc<ClassTable>,
    ) -> Self {
        Self {
            threads: ThreadControl::new(runtime.clone(), identity.clone()),
            runtime,
            identity,
            classes,
            state: Mutex::new(CatalogState {
                requests: Vec::new(),
                next_id: 0,
            }),
            registration: Mutex::new(()),
            proxy: Mutex::new(None),
        }
    }

    pub fn attach_proxy(&self, proxy: Arc<dyn ProxyChannel>) {
        *self.proxy.lock() = Some(proxy);
    }

    pub fn detach_proxy(&self) {
        self.proxy.lock().take();
    }

    fn proxy(&self) -> Option<Arc<dyn ProxyChannel>> {
        self.proxy.lock().clone()
    }

    fn context(&self) -> MatchContext<'_> {
        MatchContext {
            runtime: self.runtime.as_ref(),
            identity: &self.identity,
            classes: &self.classes,
        }
    }

    /// Installs the agent's own requests. The VM start request carries the
    /// configured start-up suspend policy; the rest never suspend.
    pub fn register_implicit_requests(&self, vm_start_policy: SuspendPolicy) {
        let implicit = [
            EventRequest::implicit(EventKind::VmStart, vm_start_policy),
            EventRequest::implicit(EventKind::ThreadStart, SuspendPolicy::None),
            EventRequest::implicit(EventKind::ThreadEnd, SuspendPolicy::None),
            EventRequest::implicit(EventKind::VmDeath, SuspendPolicy::None),
            EventRequest::implicit(EventKind::ClassPrepare, SuspendPolicy::None),
        ];
        let mut state = self.state.lock();
        state.requests.extend(implicit.into_iter().map(Arc::new));
    }

    /// Snapshot of the registered requests.
    pub fn requests(&self) -> Vec<Arc<EventRequest>> {
        self.state.lock().requests.clone()
    }

    /// Decodes an `EventRequest.Set` body and registers it.
    pub fn register_from_wire(&self, r: &mut JdwpReader<'_>) -> ProtocolResult<i32> {
        let kind_code = r.read_u8()?;
        let policy_code = r.read_u8()?;
        let count = r.read_i32()?;

        let kind = EventKind::from_code(kind_code)
            .ok_or(ProtocolError::InvalidEventType(kind_code))?;
        let policy = SuspendPolicy::from_code(policy_code).ok_or_else(|| {
            ProtocolError::Internal(format!("invalid suspend policy {policy_code}"))
        })?;
        let modifiers = (0..count.max(0))
            .map(|_| Modifier::decode(r))
            .collect::<ProtocolResult<Vec<_>>>()?;
        self.register(kind, policy, modifiers)
    }

    pub fn register(
        &self,
        kind: EventKind,
        suspend_policy: SuspendPolicy,
        modifiers: Vec<Modifier>,
    ) -> ProtocolResult<i32> {
        let _registration = self.registration.lock();

        let mut request = EventRequest::new(0, kind, suspend_policy, modifiers);
        if kind == EventKind::SingleStep {
            request.step_thread = Some(self.prepare_step(&request)?);
        }

        let request = {
            let mut state = self.state.lock();
            // Agent-originated ids are even.
            state.next_id += 2;
            request.id = state.next_id;
            let request = Arc::new(request);
            state.requests.push(request.clone());
            request
        };
        tracing::info!(
            target: "sda.events",
            request_id = request.id,
            kind = ?request.kind,
            suspend_policy = ?request.suspend_policy,
            modifiers = request.modifiers.len(),
            "registered event request"
        );

        if kind == EventKind::Breakpoint {
            self.rebuild_breakpoints();
        }
        Ok(request.id)
    }

    /// Asks the proxy where a step starting at the thread's current position
    /// should stop, and installs the answer on the thread.
    fn prepare_step(&self, request: &EventRequest) -> ProtocolResult<ObjectRef> {
        let (thread_id, size, depth) = request.step_modifier().ok_or_else(|| {
            ProtocolError::AbsentInformation("single step request without a step modifier".into())
        })?;
        let thread = self.identity.thread_for(thread_id)?;

        // A debugger must wait for one step to complete before issuing another.
        if self.runtime.pending_step(thread).is_some() {
            return Err(ProtocolError::InvalidThread(
                "thread already has a pending step".into(),
            ));
        }
        if self.runtime.suspend_count(thread) == 0 {
            return Err(ProtocolError::InvalidThread(
                "cannot step a thread that is not suspended".into(),
            ));
        }
        let start = self.runtime.execution_point(thread).ok_or_else(|| {
            ProtocolError::AbsentInformation("thread has no current execution point".into())
        })?;
        let proxy = self
            .proxy()
            .ok_or_else(|| ProtocolError::Internal("no proxy attached".into()))?;

        let location = self.classes.location_for(start);
        let mut w = JdwpWriter::new();
        w.write_reference_type_id(location.class_id);
        w.write_method_id(location.method_id);
        w.write_i64(start.offset as i64);
        let reply = proxy.request(
            command_set::SQUAWK_VM,
            command::squawk_vm::STEPPING_INFO,
            w.into_vec(),
        )?;

        let mut r = JdwpReader::new(&reply);
        let step = PendingStep {
            start,
            target_offset: r.read_i64()?,
            duplicate_offset: r.read_i64()?,
            after_duplicate_offset: r.read_i64()?,
            size,
            depth,
        };
        tracing::debug!(target: "sda.events", thread_id, ?step, "installed pending step");
        self.runtime.set_step(thread, step);
        Ok(thread)
    }

    /// Clears the request with the given id.
    ///
    /// Implicit requests (id `0`) are never cleared; the attempt is logged and
    /// reported as "nothing removed".
    pub fn clear(&self, kind: EventKind, id: i32) -> bool {
        if id == 0 {
            tracing::warn!(target: "sda.events", ?kind, "refusing to clear implicit event request");
            return false;
        }
        self.clear_where(|request| request.id == id) > 0
    }

    /// Clears every debugger-registered request of `kind`.
    pub fn clear_all(&self, kind: EventKind) -> usize {
        self.clear_where(|request| request.kind == kind && !request.is_implicit())
    }

    /// Drops every request, implicit ones included. Used at session teardown.
    pub fn clear_everything(&self) -> usize {
        self.clear_where(|_| true)
    }

    fn clear_where(&self, mut predicate: impl FnMut(&EventRequest) -> bool) -> usize {
        let _registration = self.registration.lock();

        let cleared: Vec<Arc<EventRequest>> = {
            let mut state = self.state.lock();
            let (cleared, kept) = std::mem::take(&mut state.requests)
                .into_iter()
                .partition(|request| predicate(&**request));
            state.requests = kept;
            cleared
        };

        let mut breakpoints_changed = false;
        for request in &cleared {
            tracing::info!(target: "sda.events", request_id = request.id, kind = ?request.kind, "cleared event request");
            match request.kind {
                EventKind::Breakpoint => breakpoints_changed = true,
                EventKind::SingleStep => {
                    if let Some(thread) = request.step_thread {
                        self.runtime.clear_step(thread);
                    }
                }
                _ => {}
            }
        }
        if breakpoints_changed {
            self.rebuild_breakpoints();
        }
        cleared.len()
    }

    /// Recomputes the runtime's breakpoint set from the live breakpoint
    /// requests. The whole set is replaced every time.
    fn rebuild_breakpoints(&self) {
        let locations: Vec<_> = {
            let state = self.state.lock();
            state
                .requests
                .iter()
                .filter(|request| request.kind == EventKind::Breakpoint)
                .flat_map(|request| request.locations().copied())
                .collect()
        };

        let mut breakpoints: Vec<Breakpoint> = Vec::with_capacity(locations.len());
        for location in locations {
            let class = match self.classes.class_for_id(location.class_id) {
                Ok(class) => class,
                Err(err) => {
                    tracing::warn!(target: "sda.events", error = %err, "skipping breakpoint with unknown class");
                    continue;
                }
            };
            let Some(method) = self.runtime.method_body(class, location.method_id) else {
                tracing::warn!(
                    target: "sda.events",
                    class_id = location.class_id,
                    method_id = location.method_id,
                    "skipping breakpoint with unknown method"
                );
                continue;
            };
            let breakpoint = Breakpoint {
                method,
                offset: location.index,
            };
            if !breakpoints.contains(&breakpoint) {
                breakpoints.push(breakpoint);
            }
        }

        tracing::debug!(target: "sda.events", breakpoints = breakpoints.len(), "updating breakpoint table");
        self.runtime.update_breakpoints(&breakpoints);
    }

    pub fn match_event(&self, event: &DebugEvent) -> MatchedRequests {
        let requests = self.requests();
        let cx = self.context();

        let mut matched = MatchedRequests::default();
        for request in requests {
            if !request.matches(event, &cx) {
                continue;
            }
            tracing::trace!(target: "sda.events", request_id = request.id, kind = ?request.kind, "matched event request");
            matched.suspend_policy = matched.suspend_policy.max(request.suspend_policy);
            matched.vm_death |= request.kind == EventKind::VmDeath;
            matched.requests.push(request);
        }
        matched
    }

    /// Matches an event and notifies the proxy. Returns `true` when a VM
    /// death request matched.
    pub fn dispatch(&self, event: &DebugEvent) -> bool {
        tracing::debug!(target: "sda.events", kind = ?event.kind, "got event");
        let matched = self.match_event(event);
        if matched.requests.is_empty() {
            tracing::trace!(target: "sda.events", kind = ?event.kind, "no matching event request");
            return matched.vm_death;
        }

        match self.proxy() {
            Some(proxy) => {
                if let Err(err) = self.send(proxy.as_ref(), event, &matched) {
                    tracing::warn!(target: "sda.events", error = %err, kind = ?event.kind, "failed to notify proxy");
                }
            }
            None => {
                tracing::debug!(target: "sda.events", kind = ?event.kind, "no proxy attached; event dropped");
            }
        }
        matched.vm_death
    }

    /// Sends a synthetic VM start so a proxy attaching to a running debuggee
    /// can rebuild its view of loaded classes and threads. Suspends everything.
    pub fn announce_attach(&self) -> Result<(), AgentError> {
        let proxy = self.proxy().ok_or(AgentError::ProxyClosed)?;
        let requests: Vec<_> = self
            .requests()
            .into_iter()
            .filter(|request| request.kind == EventKind::VmStart && request.is_implicit())
            .collect();
        let matched = MatchedRequests {
            requests,
            suspend_policy: SuspendPolicy::All,
            vm_death: false,
        };
        self.send(proxy.as_ref(), &DebugEvent::vm_start(None), &matched)
    }

    fn send(
        &self,
        proxy: &dyn ProxyChannel,
        event: &DebugEvent,
        matched: &MatchedRequests,
    ) -> Result<(), AgentError> {
        // Threads are stopped before the packet exists, so a debugger reacting
        // to it always finds them suspended.
        match matched.suspend_policy {
            SuspendPolicy::All => {
                for thread in self.runtime.threads() {
                    self.runtime.suspend_thread(thread);
                }
            }
            SuspendPolicy::EventThread => {
                if let Some(thread) = event.thread {
                    self.runtime.suspend_thread(thread);
                }
            }
            SuspendPolicy::None => {}
        }
        if matched.suspend_policy != SuspendPolicy::None {
            // The proxy mirrors suspend counts and must see the new ones
            // before the event itself.
            self.threads.notify_state_changed(proxy)?;
        }

        let cx = self.context();
        let mut w = JdwpWriter::new();
        w.write_u8(matched.suspend_policy.code());
        w.write_i32(matched.requests.len() as i32);
        for request in &matched.requests {
            request.write_event(&mut w, event, &cx);
        }

        // Pending steps die with the suspension. Done before the packet goes
        // out so a step the debugger issues in response is not cleared.
        match matched.suspend_policy {
            SuspendPolicy::All => {
                self.clear_all(EventKind::SingleStep);
            }
            SuspendPolicy::EventThread => {
                if let Some(thread) = event.thread {
                    self.clear_where(|request| {
                        request.kind == EventKind::SingleStep && request.step_thread == Some(thread)
                    });
                }
            }
            SuspendPolicy::None => {}
        }

        tracing::info!(
            target: "sda.events",
            kind = ?event.kind,
            events = matched.requests.len(),
            suspend_policy = ?matched.suspend_policy,
            "sending composite event"
        );
        proxy.send_command(command_set::EVENT, command::event::COMPOSITE, w.into_vec())
    }
}
