//! In-memory [`Runtime`] and [`ProxyChannel`] doubles for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use sda_jdwp::consts::{class_status, thread_status, type_tag};
use sda_jdwp::codec::class_name_to_signature;
use sda_jdwp::{JdwpWriter, MethodId};

use crate::error::AgentError;
use crate::event::DebugEvent;
use crate::proxy::ProxyChannel;
use crate::runtime::{
    Breakpoint, DebugHook, ExecutionPoint, IsolateState, MethodRef, ObjectKind, ObjectRef,
    PendingStep, Runtime,
};

/// Class reported for objects created without one.
pub const NO_CLASS: ObjectRef = ObjectRef(0);

/// Lifecycle calls recorded by [`FakeRuntime`], in call order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuntimeCall {
    Start,
    Resume(ObjectRef),
    UpdateBreakpoints(usize),
    InstallHook,
    /// Carries whether the removed hook was still processing events.
    RemoveHook { hook_active: bool },
}

struct FakeObject {
    kind: ObjectKind,
    class: ObjectRef,
    alive: bool,
    string: Option<String>,
}

#[derive(Default)]
struct FakeClass {
    name: String,
    superclass: Option<ObjectRef>,
    methods: Vec<(MethodId, MethodRef)>,
}

struct FakeThread {
    name: String,
    status: i32,
    suspend_count: u32,
    point: Option<ExecutionPoint>,
    step: Option<PendingStep>,
}

struct State {
    next_ref: u64,
    objects: HashMap<ObjectRef, FakeObject>,
    rom: HashMap<u32, ObjectRef>,
    classes: Vec<ObjectRef>,
    class_info: HashMap<ObjectRef, FakeClass>,
    methods: HashMap<MethodRef, (ObjectRef, MethodId)>,
    threads: Vec<ObjectRef>,
    thread_info: HashMap<ObjectRef, FakeThread>,
    breakpoints: Vec<Breakpoint>,
    isolate: IsolateState,
    exit_code: i32,
    start_calls: usize,
    hook: Option<Arc<dyn DebugHook>>,
    detached: Option<Arc<dyn DebugHook>>,
    calls: Vec<RuntimeCall>,
}

/// A scriptable runtime. Handles are allocated from one counter, so objects,
/// classes and methods never share a raw value.
pub struct FakeRuntime {
    state: Mutex<State>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_ref: 1,
                objects: HashMap::new(),
                rom: HashMap::new(),
                classes: Vec::new(),
                class_info: HashMap::new(),
                methods: HashMap::new(),
                threads: Vec::new(),
                thread_info: HashMap::new(),
                breakpoints: Vec::new(),
                isolate: IsolateState::New,
                exit_code: 0,
                start_calls: 0,
                hook: None,
                detached: None,
                calls: Vec::new(),
            }),
        }
    }

    fn alloc(state: &mut State, kind: ObjectKind, class: ObjectRef) -> ObjectRef {
        let object = ObjectRef(state.next_ref);
        state.next_ref += 1;
        state.objects.insert(
            object,
            FakeObject {
                kind,
                class,
                alive: true,
                string: None,
            },
        );
        object
    }

    pub fn add_object(&self, kind: ObjectKind) -> ObjectRef {
        let mut state = self.state.lock();
        Self::alloc(&mut state, kind, NO_CLASS)
    }

    pub fn add_rom_object(&self, kind: ObjectKind, index: u32) -> ObjectRef {
        let mut state = self.state.lock();
        let object = Self::alloc(&mut state, kind, NO_CLASS);
        state.rom.insert(index, object);
        object
    }

    pub fn add_string(&self, value: &str) -> ObjectRef {
        let mut state = self.state.lock();
        let object = Self::alloc(&mut state, ObjectKind::String, NO_CLASS);
        if let Some(entry) = state.objects.get_mut(&object) {
            entry.string = Some(value.to_string());
        }
        object
    }

    /// Adds a live, running thread. Threads are not loaded classes.
    pub fn add_thread(&self, name: &str) -> ObjectRef {
        let mut state = self.state.lock();
        let thread = Self::alloc(&mut state, ObjectKind::Thread, NO_CLASS);
        state.threads.push(thread);
        state.thread_info.insert(
            thread,
            FakeThread {
                name: name.to_string(),
                status: thread_status::RUNNING,
                suspend_count: 0,
                point: None,
                step: None,
            },
        );
        thread
    }

    /// Removes a thread from the live set, as if it had finished.
    pub fn remove_thread(&self, thread: ObjectRef) {
        self.state.lock().threads.retain(|t| *t != thread);
    }

    pub fn add_class(&self, name: &str) -> ObjectRef {
        let mut state = self.state.lock();
        let class = Self::alloc(&mut state, ObjectKind::Class, NO_CLASS);
        state.classes.push(class);
        state.class_info.insert(
            class,
            FakeClass {
                name: name.to_string(),
                ..FakeClass::default()
            },
        );
        class
    }

    pub fn set_superclass(&self, class: ObjectRef, superclass: ObjectRef) {
        if let Some(info) = self.state.lock().class_info.get_mut(&class) {
            info.superclass = Some(superclass);
        }
    }

    pub fn add_instance(&self, class: ObjectRef) -> ObjectRef {
        let mut state = self.state.lock();
        Self::alloc(&mut state, ObjectKind::Object, class)
    }

    pub fn add_method(&self, class: ObjectRef, method_id: MethodId) -> MethodRef {
        let mut state = self.state.lock();
        let method = MethodRef(state.next_ref);
        state.next_ref += 1;
        state.methods.insert(method, (class, method_id));
        state
            .class_info
            .entry(class)
            .or_default()
            .methods
            .push((method_id, method));
        method
    }

    /// Marks an object unreachable.
    pub fn collect(&self, object: ObjectRef) {
        if let Some(entry) = self.state.lock().objects.get_mut(&object) {
            entry.alive = false;
        }
    }

    pub fn set_execution_point(&self, thread: ObjectRef, point: ExecutionPoint) {
        if let Some(info) = self.state.lock().thread_info.get_mut(&thread) {
            info.point = Some(point);
        }
    }

    pub fn set_thread_status(&self, thread: ObjectRef, status: i32) {
        if let Some(info) = self.state.lock().thread_info.get_mut(&thread) {
            info.status = status;
        }
    }

    pub fn set_isolate_state(&self, isolate: IsolateState) {
        self.state.lock().isolate = isolate;
    }

    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        self.state.lock().breakpoints.clone()
    }

    pub fn start_calls(&self) -> usize {
        self.state.lock().start_calls
    }

    pub fn has_hook(&self) -> bool {
        self.state.lock().hook.is_some()
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state.lock().calls.clone()
    }

    /// State of the most recently removed hook, if any was removed.
    pub fn detached_hook_active(&self) -> Option<bool> {
        let detached = self.state.lock().detached.clone();
        detached.map(|hook| hook.is_active())
    }

    /// Delivers an event through the installed hook, as an application thread
    /// would. Returns `false` if no hook is installed.
    pub fn raise(&self, event: DebugEvent) -> bool {
        let hook = self.state.lock().hook.clone();
        match hook {
            Some(hook) => {
                hook.notify(event);
                true
            }
            None => false,
        }
    }

    fn is_subclass(state: &State, base: ObjectRef, mut class: ObjectRef) -> bool {
        loop {
            if class == base {
                return true;
            }
            match state.class_info.get(&class).and_then(|info| info.superclass) {
                Some(superclass) => class = superclass,
                None => return false,
            }
        }
    }
}

impl Runtime for FakeRuntime {
    fn rom_index(&self, object: ObjectRef) -> Option<u32> {
        let state = self.state.lock();
        state
            .rom
            .iter()
            .find(|(_, rom)| **rom == object)
            .map(|(index, _)| *index)
    }

    fn rom_object(&self, index: u32) -> Option<ObjectRef> {
        self.state.lock().rom.get(&index).copied()
    }

    fn is_alive(&self, object: ObjectRef) -> bool {
        self.state
            .lock()
            .objects
            .get(&object)
            .is_some_and(|entry| entry.alive)
    }

    fn object_kind(&self, object: ObjectRef) -> ObjectKind {
        self.state
            .lock()
            .objects
            .get(&object)
            .map_or(ObjectKind::Object, |entry| entry.kind)
    }

    fn class_of(&self, object: ObjectRef) -> ObjectRef {
        self.state
            .lock()
            .objects
            .get(&object)
            .map_or(NO_CLASS, |entry| entry.class)
    }

    fn string_value(&self, object: ObjectRef) -> Option<String> {
        self.state
            .lock()
            .objects
            .get(&object)
            .and_then(|entry| entry.string.clone())
    }

    fn loaded_classes(&self) -> Vec<ObjectRef> {
        self.state.lock().classes.clone()
    }

    fn class_name(&self, class: ObjectRef) -> String {
        self.state
            .lock()
            .class_info
            .get(&class)
            .map(|info| info.name.clone())
            .unwrap_or_default()
    }

    fn class_signature(&self, class: ObjectRef) -> String {
        class_name_to_signature(&self.class_name(class))
    }

    fn class_type_tag(&self, _class: ObjectRef) -> u8 {
        type_tag::CLASS
    }

    fn class_status(&self, _class: ObjectRef) -> i32 {
        class_status::VERIFIED | class_status::PREPARED | class_status::INITIALIZED
    }

    fn is_assignable(&self, base: ObjectRef, class: ObjectRef) -> bool {
        Self::is_subclass(&self.state.lock(), base, class)
    }

    fn is_instance(&self, class: ObjectRef, object: ObjectRef) -> bool {
        let of = self.class_of(object);
        self.is_assignable(class, of)
    }

    fn defining_class(&self, method: MethodRef) -> ObjectRef {
        self.state
            .lock()
            .methods
            .get(&method)
            .map_or(NO_CLASS, |(class, _)| *class)
    }

    fn method_id(&self, _class: ObjectRef, method: MethodRef) -> MethodId {
        self.state
            .lock()
            .methods
            .get(&method)
            .map_or(0, |(_, id)| *id)
    }

    fn method_body(&self, class: ObjectRef, method: MethodId) -> Option<MethodRef> {
        self.state.lock().class_info.get(&class).and_then(|info| {
            info.methods
                .iter()
                .find(|(id, _)| *id == method)
                .map(|(_, body)| *body)
        })
    }

    fn threads(&self) -> Vec<ObjectRef> {
        self.state.lock().threads.clone()
    }

    fn thread_name(&self, thread: ObjectRef) -> String {
        self.state
            .lock()
            .thread_info
            .get(&thread)
            .map(|info| info.name.clone())
            .unwrap_or_default()
    }

    fn thread_status(&self, thread: ObjectRef) -> i32 {
        self.state
            .lock()
            .thread_info
            .get(&thread)
            .map_or(thread_status::ZOMBIE, |info| info.status)
    }

    fn suspend_thread(&self, thread: ObjectRef) {
        if let Some(info) = self.state.lock().thread_info.get_mut(&thread) {
            info.suspend_count += 1;
        }
    }

    fn resume_thread(&self, thread: ObjectRef) {
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall::Resume(thread));
        if let Some(info) = state.thread_info.get_mut(&thread) {
            info.suspend_count = info.suspend_count.saturating_sub(1);
        }
    }

    fn suspend_count(&self, thread: ObjectRef) -> u32 {
        self.state
            .lock()
            .thread_info
            .get(&thread)
            .map_or(0, |info| info.suspend_count)
    }

    fn execution_point(&self, thread: ObjectRef) -> Option<ExecutionPoint> {
        self.state
            .lock()
            .thread_info
            .get(&thread)
            .and_then(|info| info.point)
    }

    fn pending_step(&self, thread: ObjectRef) -> Option<PendingStep> {
        self.state
            .lock()
            .thread_info
            .get(&thread)
            .and_then(|info| info.step)
    }

    fn set_step(&self, thread: ObjectRef, step: PendingStep) {
        if let Some(info) = self.state.lock().thread_info.get_mut(&thread) {
            info.step = Some(step);
        }
    }

    fn clear_step(&self, thread: ObjectRef) {
        if let Some(info) = self.state.lock().thread_info.get_mut(&thread) {
            info.step = None;
        }
    }

    fn isolate_state(&self) -> IsolateState {
        self.state.lock().isolate
    }

    fn start(&self) {
        let mut state = self.state.lock();
        state.start_calls += 1;
        state.calls.push(RuntimeCall::Start);
        state.isolate = IsolateState::Running;
    }

    fn exit(&self, code: i32) {
        let mut state = self.state.lock();
        state.exit_code = code;
        state.isolate = IsolateState::Exited;
    }

    fn exit_code(&self) -> i32 {
        self.state.lock().exit_code
    }

    fn update_breakpoints(&self, breakpoints: &[Breakpoint]) {
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall::UpdateBreakpoints(breakpoints.len()));
        state.breakpoints = breakpoints.to_vec();
    }

    fn set_debug_hook(&self, hook: Option<Arc<dyn DebugHook>>) {
        let installing = hook.is_some();
        let previous = std::mem::replace(&mut self.state.lock().hook, hook);
        if installing {
            self.state.lock().calls.push(RuntimeCall::InstallHook);
            return;
        }
        // Queried outside the state lock; the hook may call back into the runtime.
        let hook_active = previous.as_ref().is_some_and(|hook| hook.is_active());
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall::RemoveHook { hook_active });
        if previous.is_some() {
            state.detached = previous;
        }
    }
}

/// A command captured by [`RecordingProxy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCommand {
    pub command_set: u8,
    pub command: u8,
    pub payload: Vec<u8>,
}

type SendCallback = Arc<dyn Fn(&SentCommand) + Send + Sync>;

/// Proxy channel that records outgoing commands and answers requests from a
/// scripted queue. An empty queue behaves like a closed connection.
#[derive(Default)]
pub struct RecordingProxy {
    sent: Mutex<Vec<SentCommand>>,
    requests: Mutex<Vec<SentCommand>>,
    replies: Mutex<VecDeque<Result<Vec<u8>, u16>>>,
    on_send: Mutex<Option<SendCallback>>,
}

impl RecordingProxy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentCommand> {
        self.sent.lock().clone()
    }

    pub fn requests(&self) -> Vec<SentCommand> {
        self.requests.lock().clone()
    }

    /// Runs `callback` for each command after it is recorded.
    pub fn on_send(&self, callback: impl Fn(&SentCommand) + Send + Sync + 'static) {
        *self.on_send.lock() = Some(Arc::new(callback));
    }

    pub fn push_reply(&self, payload: Vec<u8>) {
        self.replies.lock().push_back(Ok(payload));
    }

    pub fn push_error(&self, error_code: u16) {
        self.replies.lock().push_back(Err(error_code));
    }

    /// Queues a stepping-info answer.
    pub fn push_stepping_info(&self, target: i64, duplicate: i64, after_duplicate: i64) {
        let mut w = JdwpWriter::new();
        w.write_i64(target);
        w.write_i64(duplicate);
        w.write_i64(after_duplicate);
        self.push_reply(w.into_vec());
    }
}

impl ProxyChannel for RecordingProxy {
    fn send_command(&self, command_set: u8, command: u8, payload: Vec<u8>) -> Result<(), AgentError> {
        let sent = SentCommand {
            command_set,
            command,
            payload,
        };
        self.sent.lock().push(sent.clone());
        let callback = self.on_send.lock().clone();
        if let Some(callback) = callback {
            callback(&sent);
        }
        Ok(())
    }

    fn request(&self, command_set: u8, command: u8, payload: Vec<u8>) -> Result<Vec<u8>, AgentError> {
        self.requests.lock().push(SentCommand {
            command_set,
            command,
            payload,
        });
        match self.replies.lock().pop_front() {
            Some(Ok(payload)) => Ok(payload),
            Some(Err(code)) => Err(AgentError::ProxyReply(code)),
            None => Err(AgentError::ProxyClosed),
        }
    }
}
