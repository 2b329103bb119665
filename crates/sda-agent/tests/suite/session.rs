use std::sync::Arc;
use std::time::Duration;

use sda_agent::event::{DebugEvent, SuspendPolicy};
use sda_agent::runtime::{ExecutionPoint, IsolateState, Runtime};
use sda_agent::testing::{FakeRuntime, RuntimeCall};
use sda_agent::{AgentError, SessionController, SessionState};
use sda_config::AgentConfig;
use sda_jdwp::consts::{command, command_set, event_kind, modifier_kind, type_tag};
use sda_jdwp::packet::SDWP_HANDSHAKE;
use sda_jdwp::{encode_command, read_packet, JdwpReader, JdwpWriter, Packet};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

fn test_config() -> AgentConfig {
    let mut config = AgentConfig::default();
    config.listen.address = "127.0.0.1:0".to_owned();
    config.listen.accept_timeout_ms = 50;
    config
}

async fn start_agent(
    rt: Arc<FakeRuntime>,
) -> (Arc<SessionController>, std::net::SocketAddr, JoinHandle<i32>) {
    let controller = Arc::new(SessionController::new(rt, test_config()));
    let listener = controller.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run_with_listener(listener).await.unwrap() })
    };
    (controller, addr, task)
}

async fn connect(addr: std::net::SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(SDWP_HANDSHAKE).await.unwrap();
    let mut echo = vec![0u8; SDWP_HANDSHAKE.len()];
    stream.read_exact(&mut echo).await.unwrap();
    assert_eq!(echo, SDWP_HANDSHAKE);
    stream
}

async fn next_packet(stream: &mut TcpStream) -> Packet {
    tokio::time::timeout(Duration::from_secs(5), read_packet(stream))
        .await
        .expect("timed out waiting for a packet")
        .unwrap()
        .expect("connection closed")
}

/// Reads until the next composite event, returning its payload along with the
/// thread-state notices sent ahead of it.
async fn next_event(stream: &mut TcpStream) -> (Vec<u8>, Vec<Vec<u8>>) {
    let mut notices = Vec::new();
    loop {
        match next_packet(stream).await {
            Packet::Command {
                command_set: command_set::EVENT,
                command: command::event::COMPOSITE,
                payload,
                ..
            } => return (payload, notices),
            Packet::Command {
                command_set: command_set::SQUAWK_VM,
                command: command::squawk_vm::THREAD_STATE_CHANGED,
                payload,
                ..
            } => notices.push(payload),
            other => panic!("unexpected packet {other:?}"),
        }
    }
}

/// Reads until the reply to `id`, returning it along with any commands the
/// agent sent in between.
async fn reply_to(stream: &mut TcpStream, id: u32) -> (u16, Vec<u8>, Vec<Packet>) {
    let mut commands = Vec::new();
    loop {
        match next_packet(stream).await {
            Packet::Reply {
                id: reply_id,
                error_code,
                payload,
            } if reply_id == id => return (error_code, payload, commands),
            other => commands.push(other),
        }
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fresh_debuggee_starts_on_connect_and_resumes_on_dispose() {
    let rt = Arc::new(FakeRuntime::new());
    let main = rt.add_thread("main");
    let (controller, addr, task) = start_agent(rt.clone()).await;

    let mut proxy = connect(addr).await;
    eventually(|| rt.start_calls() == 1).await;
    assert!(rt.has_hook());
    assert_eq!(controller.state(), SessionState::Connected);

    proxy
        .write_all(&encode_command(1, command_set::VIRTUAL_MACHINE, command::vm::SUSPEND, &[]))
        .await
        .unwrap();
    let (code, _, commands) = reply_to(&mut proxy, 1).await;
    assert_eq!(code, 0);
    assert_eq!(rt.suspend_count(main), 1);

    // The thread-state notice precedes the reply.
    let Some(Packet::Command {
        command_set: set,
        command: cmd,
        payload,
        ..
    }) = commands.into_iter().next()
    else {
        panic!("expected a thread state notice");
    };
    assert_eq!((set, cmd), (command_set::SQUAWK_VM, command::squawk_vm::THREAD_STATE_CHANGED));
    let mut r = JdwpReader::new(&payload);
    assert_eq!(r.read_i32().unwrap(), 1);
    let main_id = r.read_object_id().unwrap();

    let mut w = JdwpWriter::new();
    w.write_object_id(main_id);
    proxy
        .write_all(&encode_command(
            3,
            command_set::THREAD_REFERENCE,
            command::thread_reference::NAME,
            &w.into_vec(),
        ))
        .await
        .unwrap();
    let (code, payload, _) = reply_to(&mut proxy, 3).await;
    assert_eq!(code, 0);
    assert_eq!(JdwpReader::new(&payload).read_string().unwrap(), "main");

    proxy
        .write_all(&encode_command(5, command_set::VIRTUAL_MACHINE, command::vm::DISPOSE, &[]))
        .await
        .unwrap();
    let (code, _, _) = reply_to(&mut proxy, 5).await;
    assert_eq!(code, 0);

    // Detach leaves the debuggee running and unhooked, and the agent waits
    // for the next proxy.
    eventually(|| !rt.has_hook() && rt.suspend_count(main) == 0).await;
    eventually(|| controller.state() == SessionState::AwaitingProxy).await;

    rt.exit(7);
    let code = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(code, 7);
    assert_eq!(controller.state(), SessionState::Disconnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reattach_announces_loaded_classes_and_suspends() {
    let rt = Arc::new(FakeRuntime::new());
    let main = rt.add_thread("main");
    rt.add_class("com.example.Main");
    rt.set_isolate_state(IsolateState::Running);
    let (_controller, addr, task) = start_agent(rt.clone()).await;

    let mut proxy = connect(addr).await;
    let (payload, notices) = next_event(&mut proxy).await;
    assert_eq!(notices.len(), 1);
    let mut r = JdwpReader::new(&notices[0]);
    assert_eq!(r.read_i32().unwrap(), 1);
    r.read_object_id().unwrap();
    r.read_i32().unwrap(); // status
    assert_eq!(r.read_i32().unwrap(), 1);

    let mut r = JdwpReader::new(&payload);
    assert_eq!(r.read_u8().unwrap(), SuspendPolicy::All.code());
    assert_eq!(r.read_i32().unwrap(), 1);
    assert_eq!(r.read_u8().unwrap(), event_kind::VM_START);
    assert_eq!(r.read_i32().unwrap(), 0);
    assert_eq!(r.read_object_id().unwrap(), 0);
    assert_eq!(r.read_i32().unwrap(), 1);
    assert_eq!(r.read_u8().unwrap(), type_tag::CLASS);
    assert_eq!(r.read_reference_type_id().unwrap(), 1);
    assert_eq!(r.read_string().unwrap(), "Lcom/example/Main;");
    assert_eq!(rt.start_calls(), 0);
    assert_eq!(rt.suspend_count(main), 1);

    // Dropping the connection ends the session and lets the debuggee run.
    drop(proxy);
    eventually(|| !rt.has_hook() && rt.suspend_count(main) == 0).await;

    rt.exit(0);
    let code = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(code, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn breakpoint_hit_suspends_before_the_event_arrives() {
    let rt = Arc::new(FakeRuntime::new());
    let main = rt.add_thread("main");
    let class = rt.add_class("com.example.Main");
    let method = rt.add_method(class, 1);
    let (_controller, addr, task) = start_agent(rt.clone()).await;

    let mut proxy = connect(addr).await;
    eventually(|| rt.start_calls() == 1).await;

    let mut w = JdwpWriter::new();
    w.write_u8(event_kind::BREAKPOINT);
    w.write_u8(SuspendPolicy::EventThread.code());
    w.write_i32(1);
    w.write_u8(modifier_kind::LOCATION_ONLY);
    w.write_u8(type_tag::CLASS);
    w.write_reference_type_id(1);
    w.write_method_id(1);
    w.write_u64(5);
    proxy
        .write_all(&encode_command(
            1,
            command_set::EVENT_REQUEST,
            command::event_request::SET,
            &w.into_vec(),
        ))
        .await
        .unwrap();
    let (code, payload, _) = reply_to(&mut proxy, 1).await;
    assert_eq!(code, 0);
    let request_id = JdwpReader::new(&payload).read_i32().unwrap();
    assert_eq!(request_id, 2);
    assert_eq!(rt.breakpoints().len(), 1);

    // An application thread hits the breakpoint and blocks until the event
    // has been handled.
    let hit = {
        let rt = rt.clone();
        tokio::task::spawn_blocking(move || {
            rt.raise(DebugEvent::breakpoint(main, ExecutionPoint { method, offset: 5 }))
        })
    };
    let (payload, notices) = next_event(&mut proxy).await;
    assert_eq!(notices.len(), 1);
    assert!(hit.await.unwrap());
    assert_eq!(rt.suspend_count(main), 1);

    let mut r = JdwpReader::new(&payload);
    assert_eq!(r.read_u8().unwrap(), SuspendPolicy::EventThread.code());
    assert_eq!(r.read_i32().unwrap(), 1);
    assert_eq!(r.read_u8().unwrap(), event_kind::BREAKPOINT);
    assert_eq!(r.read_i32().unwrap(), request_id);
    assert!(r.read_object_id().unwrap() > 0);
    let location = r.read_location().unwrap();
    assert_eq!((location.class_id, location.method_id, location.index), (1, 1, 5));

    // Unknown commands in known sets are answered, not fatal.
    proxy
        .write_all(&encode_command(3, command_set::STACK_FRAME, 1, &[]))
        .await
        .unwrap();
    let (code, _, _) = reply_to(&mut proxy, 3).await;
    assert_eq!(code, sda_jdwp::consts::error_code::NOT_IMPLEMENTED);

    drop(proxy);
    eventually(|| rt.breakpoints().is_empty() && rt.suspend_count(main) == 0).await;
    rt.exit(0);
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn detach_resumes_then_unhooks_then_stops_dispatch() {
    let rt = Arc::new(FakeRuntime::new());
    let main = rt.add_thread("main");
    let (_controller, addr, task) = start_agent(rt.clone()).await;

    let mut proxy = connect(addr).await;
    eventually(|| rt.start_calls() == 1).await;
    proxy
        .write_all(&encode_command(1, command_set::VIRTUAL_MACHINE, command::vm::SUSPEND, &[]))
        .await
        .unwrap();
    let (code, _, _) = reply_to(&mut proxy, 1).await;
    assert_eq!(code, 0);
    assert_eq!(rt.suspend_count(main), 1);

    drop(proxy);
    eventually(|| rt.detached_hook_active() == Some(false)).await;

    let calls = rt.calls();
    let unhook = calls
        .iter()
        .position(|call| matches!(call, RuntimeCall::RemoveHook { .. }))
        .unwrap();
    // Dispatch was still running when the hook went away.
    assert_eq!(calls[unhook], RuntimeCall::RemoveHook { hook_active: true });
    let resumed = calls
        .iter()
        .position(|call| *call == RuntimeCall::Resume(main))
        .unwrap();
    assert!(resumed < unhook, "{calls:?}");
    assert!(
        calls[resumed..unhook].contains(&RuntimeCall::UpdateBreakpoints(0)),
        "{calls:?}"
    );
    assert!(
        !calls[unhook..]
            .iter()
            .any(|call| matches!(call, RuntimeCall::Resume(_))),
        "{calls:?}"
    );
    assert_eq!(rt.suspend_count(main), 0);

    rt.exit(0);
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn occupied_port_is_a_fatal_bind_error() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = test_config();
    config.listen.address = taken.local_addr().unwrap().to_string();

    let controller = SessionController::new(Arc::new(FakeRuntime::new()), config);
    let err = controller.run().await.unwrap_err();
    assert!(matches!(err, AgentError::Bind { .. }), "{err}");
    assert_eq!(controller.state(), SessionState::NotConnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn accept_timeouts_are_retried_while_the_debuggee_lives() {
    let rt = Arc::new(FakeRuntime::new());
    rt.add_thread("main");
    let (controller, addr, task) = start_agent(rt.clone()).await;

    // Six accept periods go by without a proxy.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(controller.state(), SessionState::AwaitingProxy);
    assert!(!task.is_finished());
    assert_eq!(rt.start_calls(), 0);

    let _proxy = connect(addr).await;
    eventually(|| rt.start_calls() == 1).await;
    assert_eq!(controller.state(), SessionState::Connected);

    rt.exit(3);
    let code = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(code, 3);
}
