use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sda_jdwp::consts::{command, command_set, suspend_status};
use sda_jdwp::{JdwpReader, JdwpWriter};

use crate::classes::ClassTable;
use crate::error::{ProtocolError, ProtocolResult};
use crate::event::{EventCatalog, EventKind};
use crate::identity::IdentityRegistry;
use crate::proxy::ProxyChannel;
use crate::runtime::Runtime;
use crate::threads::ThreadControl;

/// Decodes the commands that drive identity, event and suspend state, and
/// encodes their replies. Everything else is answered with
/// `NOT_IMPLEMENTED`.
pub struct ProtocolGateway {
    runtime: Arc<dyn Runtime>,
    identity: Arc<IdentityRegistry>,
    classes: Arc<ClassTable>,
    catalog: Arc<EventCatalog>,
    threads: ThreadControl,
    proxy: Arc<dyn ProxyChannel>,
    dispose: AtomicBool,
}

impl ProtocolGateway {
    pub fn new(
        runtime: Arc<dyn Runtime>,
        identity: Arc<IdentityRegistry>,
        classes: Arc<ClassTable>,
        catalog: Arc<EventCatalog>,
        proxy: Arc<dyn ProxyChannel>,
    ) -> Self {
        let threads = ThreadControl::new(runtime.clone(), identity.clone());
        Self {
            runtime,
            identity,
            classes,
            catalog,
            threads,
            proxy,
            dispose: AtomicBool::new(false),
        }
    }

    pub fn threads(&self) -> &ThreadControl {
        &self.threads
    }

    /// Set once the debugger has sent `VirtualMachine.Dispose`.
    pub fn dispose_requested(&self) -> bool {
        self.dispose.load(Ordering::Acquire)
    }

    /// Serves one command and returns the reply payload.
    pub fn handle(&self, set: u8, cmd: u8, payload: &[u8]) -> ProtocolResult<Vec<u8>> {
        let mut r = JdwpReader::new(payload);
        let mut w = JdwpWriter::new();

        match (set, cmd) {
            // VirtualMachine.Dispose
            (command_set::VIRTUAL_MACHINE, command::vm::DISPOSE) => {
                tracing::info!(target: "sda.gateway", "debugger disposed the session");
                self.dispose.store(true, Ordering::Release);
            }
            // VirtualMachine.Suspend
            (command_set::VIRTUAL_MACHINE, command::vm::SUSPEND) => {
                self.threads.suspend_all();
                self.state_changed();
            }
            // VirtualMachine.Resume
            (command_set::VIRTUAL_MACHINE, command::vm::RESUME) => {
                self.threads.resume_all();
                self.state_changed();
            }
            // VirtualMachine.Exit
            (command_set::VIRTUAL_MACHINE, command::vm::EXIT) => {
                let code = r.read_i32()?;
                tracing::info!(target: "sda.gateway", code, "debugger requested exit");
                self.runtime.exit(code);
            }
            // ThreadReference.Name
            (command_set::THREAD_REFERENCE, command::thread_reference::NAME) => {
                let thread = self.identity.thread_for(r.read_object_id()?)?;
                w.write_string(&self.runtime.thread_name(thread));
            }
            // ThreadReference.Suspend
            (command_set::THREAD_REFERENCE, command::thread_reference::SUSPEND) => {
                let thread = self.identity.thread_for(r.read_object_id()?)?;
                self.threads.suspend(thread);
                self.state_changed();
            }
            // ThreadReference.Resume
            (command_set::THREAD_REFERENCE, command::thread_reference::RESUME) => {
                let thread = self.identity.thread_for(r.read_object_id()?)?;
                self.threads.resume(thread);
                self.state_changed();
            }
            // ThreadReference.Status
            (command_set::THREAD_REFERENCE, command::thread_reference::STATUS) => {
                let thread = self.identity.thread_for(r.read_object_id()?)?;
                w.write_i32(self.runtime.thread_status(thread));
                let suspended = self.runtime.suspend_count(thread) > 0;
                w.write_i32(if suspended { suspend_status::SUSPENDED } else { 0 });
            }
            // ThreadReference.SuspendCount
            (command_set::THREAD_REFERENCE, command::thread_reference::SUSPEND_COUNT) => {
                let thread = self.identity.thread_for(r.read_object_id()?)?;
                w.write_i32(self.runtime.suspend_count(thread) as i32);
            }
            // ObjectReference.ReferenceType
            (command_set::OBJECT_REFERENCE, command::object_reference::REFERENCE_TYPE) => {
                let id = r.read_object_id()?;
                let object = self
                    .identity
                    .object_for(id)?
                    .ok_or(ProtocolError::InvalidObject(id))?;
                let class = self.runtime.class_of(object);
                w.write_u8(self.runtime.class_type_tag(class));
                w.write_reference_type_id(self.classes.id_for_class(class));
            }
            // ObjectReference.IsCollected
            (command_set::OBJECT_REFERENCE, command::object_reference::IS_COLLECTED) => {
                let id = r.read_object_id()?;
                let collected = match self.identity.object_for(id) {
                    Ok(Some(_)) => false,
                    Ok(None) => return Err(ProtocolError::InvalidObject(id)),
                    Err(ProtocolError::InvalidObject(_)) => true,
                    Err(err) => return Err(err),
                };
                w.write_bool(collected);
            }
            // StringReference.Value
            (command_set::STRING_REFERENCE, command::string_reference::VALUE) => {
                let id = r.read_object_id()?;
                let string = self.identity.string_for(id)?;
                let value = self
                    .runtime
                    .string_value(string)
                    .ok_or(ProtocolError::InvalidString(id))?;
                w.write_string(&value);
            }
            // EventRequest.Set
            (command_set::EVENT_REQUEST, command::event_request::SET) => {
                let id = self.catalog.register_from_wire(&mut r)?;
                w.write_i32(id);
            }
            // EventRequest.Clear
            (command_set::EVENT_REQUEST, command::event_request::CLEAR) => {
                let code = r.read_u8()?;
                let id = r.read_i32()?;
                let kind = EventKind::from_code(code).ok_or(ProtocolError::InvalidEventType(code))?;
                self.catalog.clear(kind, id);
            }
            // EventRequest.ClearAllBreakpoints
            (command_set::EVENT_REQUEST, command::event_request::CLEAR_ALL_BREAKPOINTS) => {
                self.catalog.clear_all(EventKind::Breakpoint);
            }
            (set, cmd) if is_known_command_set(set) => {
                return Err(ProtocolError::NotImplemented(format!(
                    "command {set}/{cmd}"
                )));
            }
            (set, cmd) => {
                return Err(ProtocolError::Internal(format!(
                    "unknown command set {set} (command {cmd})"
                )));
            }
        }
        Ok(w.into_vec())
    }

    fn state_changed(&self) {
        if let Err(err) = self.threads.notify_state_changed(self.proxy.as_ref()) {
            tracing::warn!(target: "sda.gateway", error = %err, "failed to send thread state notice");
        }
    }
}

fn is_known_command_set(set: u8) -> bool {
    matches!(
        set,
        command_set::VIRTUAL_MACHINE
            | command_set::REFERENCE_TYPE
            | command_set::CLASS_TYPE
            | command_set::METHOD
            | command_set::OBJECT_REFERENCE
            | command_set::STRING_REFERENCE
            | command_set::THREAD_REFERENCE
            | command_set::THREAD_GROUP_REFERENCE
            | command_set::ARRAY_REFERENCE
            | command_set::EVENT_REQUEST
            | command_set::STACK_FRAME
            | command_set::SQUAWK_VM
    )
}
