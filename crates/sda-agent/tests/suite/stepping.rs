use std::sync::Arc;

use sda_agent::classes::ClassTable;
use sda_agent::event::{DebugEvent, EventCatalog, EventKind, Modifier, SuspendPolicy};
use sda_agent::identity::IdentityRegistry;
use sda_agent::runtime::{ExecutionPoint, ObjectRef, Runtime};
use sda_agent::testing::{FakeRuntime, RecordingProxy};
use sda_agent::ProtocolError;
use sda_jdwp::consts::{command, command_set, step_depth, step_size};
use sda_jdwp::JdwpReader;

struct Fixture {
    rt: Arc<FakeRuntime>,
    identity: Arc<IdentityRegistry>,
    classes: Arc<ClassTable>,
    catalog: EventCatalog,
    proxy: Arc<RecordingProxy>,
}

fn fixture() -> Fixture {
    let rt = Arc::new(FakeRuntime::new());
    let identity = Arc::new(IdentityRegistry::new(rt.clone()));
    let classes = Arc::new(ClassTable::new(rt.clone()));
    let catalog = EventCatalog::new(rt.clone(), identity.clone(), classes.clone());
    let proxy = Arc::new(RecordingProxy::new());
    catalog.attach_proxy(proxy.clone());
    Fixture {
        rt,
        identity,
        classes,
        catalog,
        proxy,
    }
}

impl Fixture {
    /// A suspended thread stopped at `offset` in a fresh method.
    fn stopped_thread(&self, name: &str, offset: u64) -> (ObjectRef, ExecutionPoint) {
        let class = self.rt.add_class(&format!("com.example.{name}"));
        let method = self.rt.add_method(class, 4);
        let thread = self.rt.add_thread(name);
        let point = ExecutionPoint { method, offset };
        self.rt.set_execution_point(thread, point);
        self.rt.suspend_thread(thread);
        (thread, point)
    }

    fn step(&self, thread: ObjectRef) -> Result<i32, ProtocolError> {
        self.catalog.register(
            EventKind::SingleStep,
            SuspendPolicy::EventThread,
            vec![Modifier::Step {
                thread: self.identity.id_for(Some(thread)),
                size: step_size::LINE,
                depth: step_depth::OVER,
            }],
        )
    }
}

#[test]
fn step_request_installs_the_proxy_answer() {
    let f = fixture();
    let (thread, point) = f.stopped_thread("Main", 12);
    f.proxy.push_stepping_info(17, -1, -1);

    let id = f.step(thread).unwrap();
    assert_eq!(id, 2);

    let requests = f.proxy.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].command_set, command_set::SQUAWK_VM);
    assert_eq!(requests[0].command, command::squawk_vm::STEPPING_INFO);
    let mut r = JdwpReader::new(&requests[0].payload);
    let class = f.rt.defining_class(point.method);
    assert_eq!(r.read_reference_type_id().unwrap(), f.classes.id_for_class(class));
    assert_eq!(r.read_method_id().unwrap(), 4);
    assert_eq!(r.read_i64().unwrap(), 12);

    let step = f.rt.pending_step(thread).unwrap();
    assert_eq!(step.start, point);
    assert_eq!(
        (step.target_offset, step.duplicate_offset, step.after_duplicate_offset),
        (17, -1, -1)
    );
    assert_eq!((step.size, step.depth), (step_size::LINE, step_depth::OVER));
}

#[test]
fn second_step_before_completion_is_rejected() {
    let f = fixture();
    let (thread, _) = f.stopped_thread("Main", 0);
    f.proxy.push_stepping_info(3, -1, -1);
    f.proxy.push_stepping_info(5, -1, -1);

    f.step(thread).unwrap();
    let err = f.step(thread).unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidThread(_)));
    // The proxy was only consulted for the first step.
    assert_eq!(f.proxy.requests().len(), 1);
    assert_eq!(f.catalog.requests().len(), 1);
}

#[test]
fn running_threads_cannot_step() {
    let f = fixture();
    let (thread, _) = f.stopped_thread("Main", 0);
    f.rt.resume_thread(thread);
    let err = f.step(thread).unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidThread(_)));
    assert!(f.proxy.requests().is_empty());
}

#[test]
fn proxy_failure_leaves_no_request_behind() {
    let f = fixture();
    let (thread, _) = f.stopped_thread("Main", 0);
    f.proxy.push_error(113);
    let err = f.step(thread).unwrap_err();
    assert!(matches!(err, ProtocolError::Internal(_)));
    assert!(f.catalog.requests().is_empty());
    assert!(f.rt.pending_step(thread).is_none());
}

#[test]
fn event_thread_suspension_clears_only_that_threads_step() {
    let f = fixture();
    let (t, point) = f.stopped_thread("T", 0);
    let (u, _) = f.stopped_thread("U", 0);
    f.proxy.push_stepping_info(1, -1, -1);
    f.proxy.push_stepping_info(2, -1, -1);
    f.step(t).unwrap();
    f.step(u).unwrap();

    f.catalog.dispatch(&DebugEvent::single_step(t, point));

    assert!(f.rt.pending_step(t).is_none());
    assert_eq!(f.rt.pending_step(u).map(|s| s.target_offset), Some(2));
    let remaining: Vec<_> = f.catalog.requests().iter().map(|r| r.kind).collect();
    assert_eq!(remaining, vec![EventKind::SingleStep]);
    let sent: Vec<_> = f.proxy.sent().iter().map(|c| c.command).collect();
    assert_eq!(sent, vec![command::squawk_vm::THREAD_STATE_CHANGED, command::event::COMPOSITE]);
}

#[test]
fn suspend_all_events_clear_every_step() {
    let f = fixture();
    let (t, point) = f.stopped_thread("T", 0);
    let (u, _) = f.stopped_thread("U", 0);
    f.proxy.push_stepping_info(1, -1, -1);
    f.proxy.push_stepping_info(2, -1, -1);
    f.step(t).unwrap();
    f.step(u).unwrap();
    f.catalog
        .register(EventKind::Breakpoint, SuspendPolicy::All, vec![])
        .unwrap();

    f.catalog.dispatch(&DebugEvent::breakpoint(t, point));
    assert!(f.rt.pending_step(t).is_none());
    assert!(f.rt.pending_step(u).is_none());

    // A step issued after the event is left alone.
    f.proxy.push_stepping_info(9, -1, -1);
    f.step(u).unwrap();
    assert_eq!(f.rt.pending_step(u).map(|s| s.target_offset), Some(9));
}
