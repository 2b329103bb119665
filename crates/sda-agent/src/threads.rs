use std::sync::Arc;

use sda_jdwp::consts::{command, command_set};
use sda_jdwp::JdwpWriter;

use crate::error::AgentError;
use crate::identity::IdentityRegistry;
use crate::proxy::ProxyChannel;
use crate::runtime::{ObjectRef, Runtime};

/// Debugger-driven suspend/resume accounting.
///
/// Suspension is a per-thread counter kept by the runtime; a thread only runs
/// when its count is zero. Resuming a thread that is not suspended is a no-op.
pub struct ThreadControl {
    runtime: Arc<dyn Runtime>,
    identity: Arc<IdentityRegistry>,
}

impl ThreadControl {
    pub fn new(runtime: Arc<dyn Runtime>, identity: Arc<IdentityRegistry>) -> Self {
        Self { runtime, identity }
    }

    pub fn suspend(&self, thread: ObjectRef) {
        self.runtime.suspend_thread(thread);
        tracing::debug!(
            target: "sda.threads",
            thread = self.identity.id_for(Some(thread)),
            count = self.runtime.suspend_count(thread),
            "suspended thread"
        );
    }

    pub fn resume(&self, thread: ObjectRef) {
        if self.runtime.suspend_count(thread) == 0 {
            return;
        }
        self.runtime.resume_thread(thread);
        tracing::debug!(
            target: "sda.threads",
            thread = self.identity.id_for(Some(thread)),
            count = self.runtime.suspend_count(thread),
            "resumed thread"
        );
    }

    pub fn suspend_all(&self) {
        for thread in self.runtime.threads() {
            self.runtime.suspend_thread(thread);
        }
        tracing::debug!(target: "sda.threads", "suspended all threads");
    }

    pub fn resume_all(&self) {
        for thread in self.runtime.threads() {
            if self.runtime.suspend_count(thread) > 0 {
                self.runtime.resume_thread(thread);
            }
        }
        tracing::debug!(target: "sda.threads", "resumed all threads");
    }

    /// Lets the debuggee run freely once the debugger goes away: every
    /// suspend count is driven to zero and the breakpoint table is emptied.
    pub fn resume_for_detach(&self) {
        for thread in self.runtime.threads() {
            while self.runtime.suspend_count(thread) > 0 {
                self.runtime.resume_thread(thread);
            }
        }
        self.runtime.update_breakpoints(&[]);
        tracing::info!(target: "sda.threads", "debuggee fully resumed");
    }

    /// Writes `count, (thread id, status, suspend count, name)*`.
    pub fn write_thread_states(&self, w: &mut JdwpWriter) {
        let threads = self.runtime.threads();
        w.write_i32(threads.len() as i32);
        for thread in threads {
            w.write_object_id(self.identity.id_for(Some(thread)));
            w.write_i32(self.runtime.thread_status(thread));
            w.write_i32(self.runtime.suspend_count(thread) as i32);
            w.write_string(&self.runtime.thread_name(thread));
        }
    }

    /// Tells the proxy that debugger-visible thread state changed.
    pub fn notify_state_changed(&self, proxy: &dyn ProxyChannel) -> Result<(), AgentError> {
        let mut w = JdwpWriter::new();
        self.write_thread_states(&mut w);
        proxy.send_command(
            command_set::SQUAWK_VM,
            command::squawk_vm::THREAD_STATE_CHANGED,
            w.into_vec(),
        )
    }
}
