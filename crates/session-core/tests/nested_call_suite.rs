//! Nested engine call coverage: counter save/restore, early exits and
//! interaction with controllers.

#![allow(clippy::pedantic, clippy::nursery)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use proptest::prelude::*;
use rstest as _;
use serde as _;
use serde_json as _;
use session_core::testing::{sample_configuration, wait_until, Fixture, ScriptedEngine};
use session_core::{
    Button, ControlAction, DialogItemId, DialogRequest, ResetType, Session, SessionError,
    SessionOptions, SessionState, StopMethod, SubroutineExit, SuspendReason, ThreadMode,
};
use session_file as _;
use tempfile as _;
use thiserror as _;
use tracing as _;

const PATIENCE: Duration = Duration::from_secs(10);

type Exits = Arc<Mutex<Vec<Option<SubroutineExit>>>>;

fn record(exits: &Exits, session: &Session) {
    let exit = session.execute_subroutine().ok();
    exits.lock().unwrap().push(exit);
}

#[derive(Debug, Clone, Copy)]
struct PreState {
    ui: u8,
    debugger: u8,
    external: u8,
    timeout: bool,
    sys_call: bool,
    subroutine_return: bool,
}

fn pre_state() -> impl Strategy<Value = PreState> {
    (
        0..3u8,
        0..2u8,
        0..3u8,
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(
            |(ui, debugger, external, timeout, sys_call, subroutine_return)| PreState {
                ui,
                debugger,
                external,
                timeout,
                sys_call,
                subroutine_return,
            },
        )
}

fn apply(session: &Session, pre: PreState) {
    for _ in 0..pre.ui {
        assert!(session.suspend_thread(StopMethod::Now));
    }
    for _ in 0..pre.debugger {
        session.schedule_suspend_exception();
    }
    for _ in 0..pre.external {
        session.schedule_suspend_external();
    }
    if pre.timeout {
        session.schedule_suspend_timeout();
    }
    if pre.sys_call {
        session.schedule_suspend_sys_call();
    }
    if pre.subroutine_return {
        session.schedule_suspend_subroutine_return();
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn nested_calls_restore_the_callers_counters(pre in pre_state(), depth in 1usize..4) {
        let fixture = Fixture::new(SessionOptions::default()).unwrap();
        let session = &fixture.session;
        apply(session, pre);
        let before = session.get_suspend_state();

        let deepest = Arc::new(AtomicUsize::new(1));
        let exits: Exits = Arc::default();
        {
            let deepest = Arc::clone(&deepest);
            let exits = Arc::clone(&exits);
            fixture.engine.on_step(move |session: &Session, _step| {
                let level = session.nest_level();
                if level < depth
                    && deepest
                        .compare_exchange(level, level + 1, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                {
                    record(&exits, session);
                }
            });
        }

        let exit = session.execute_subroutine().unwrap();
        prop_assert_eq!(exit, SubroutineExit::Returned);
        prop_assert_eq!(deepest.load(Ordering::SeqCst), depth);
        let inner = exits.lock().unwrap().clone();
        prop_assert_eq!(inner.len(), depth - 1);
        prop_assert!(inner.iter().all(|exit| *exit == Some(SubroutineExit::Returned)));

        prop_assert_eq!(session.get_suspend_state(), before);
        prop_assert_eq!(session.nest_level(), 0);
        prop_assert_eq!(session.get_session_state(), SessionState::Stopped);
    }
}

#[test]
fn host_control_released_inside_a_call_is_clamped_on_exit() {
    let fixture = Fixture::new(SessionOptions::default()).unwrap();
    let session = &fixture.session;
    let fired = AtomicBool::new(false);
    fixture.engine.on_step(move |session: &Session, _step| {
        if !fired.swap(true, Ordering::SeqCst) {
            session.schedule_resume_external();
            assert_eq!(session.get_suspend_state().external(), -1);
        }
    });

    assert_eq!(
        session.execute_subroutine().unwrap(),
        SubroutineExit::Returned
    );
    assert_eq!(session.get_suspend_state().external(), 0);
    assert!(!session.get_suspend_state().is_active());
}

#[test]
fn host_control_requested_inside_a_call_reaches_the_caller() {
    let fixture = Fixture::new(SessionOptions::default()).unwrap();
    let session = &fixture.session;
    let fired = AtomicBool::new(false);
    fixture.engine.on_step(move |session: &Session, _step| {
        if !fired.swap(true, Ordering::SeqCst) {
            session.schedule_suspend_external();
        }
    });

    assert_eq!(
        session.execute_subroutine().unwrap(),
        SubroutineExit::Returned
    );
    let suspend = session.get_suspend_state();
    assert_eq!(suspend.external(), 1);
    // The boundary flag only mattered inside the call.
    assert!(!suspend.sys_call());
}

#[test]
fn debugger_request_ends_the_call_and_stays_raised() {
    let fixture = Fixture::new(SessionOptions::default()).unwrap();
    let session = &fixture.session;
    fixture.engine.on_step(|session: &Session, step| {
        if step == 3 {
            session.schedule_suspend_exception();
        }
    });

    assert_eq!(
        session.execute_subroutine().unwrap(),
        SubroutineExit::Debugger
    );
    assert_eq!(fixture.engine.steps(), 3);
    let suspend = session.get_suspend_state();
    assert_eq!(suspend.debugger(), 1);
    assert!(!suspend.subroutine_return());
}

#[test]
fn pending_control_action_unwinds_the_call() {
    let fixture = Fixture::new(SessionOptions::default()).unwrap();
    let session = &fixture.session;
    fixture.engine.on_step(|session: &Session, step| {
        if step == 5 {
            session.request_control(ControlAction::top_level("abandon app", |_| {}));
        }
    });

    assert_eq!(
        session.execute_subroutine().unwrap(),
        SubroutineExit::ControlPending
    );
    assert!(session.has_pending_control());
    assert_eq!(fixture.engine.steps(), 5);
}

#[test]
fn reset_inside_a_call_is_refused() {
    let fixture = Fixture::new(SessionOptions::default()).unwrap();
    let refused = Arc::new(AtomicBool::new(false));
    let seen = Arc::clone(&refused);
    let fired = AtomicBool::new(false);
    fixture.engine.on_step(move |session: &Session, _step| {
        if !fired.swap(true, Ordering::SeqCst) {
            let result = session.reset(ResetType::SOFT);
            seen.store(
                matches!(result, Err(SessionError::Nested { operation: "reset" })),
                Ordering::SeqCst,
            );
        }
    });

    fixture.session.execute_subroutine().unwrap();
    assert!(refused.load(Ordering::SeqCst));
    assert_eq!(fixture.engine.resets(), vec![true]);
}

#[test]
fn scheduled_reset_inside_a_call_runs_at_the_top_level() {
    let options = SessionOptions {
        thread_mode: ThreadMode::Cooperative,
        ..SessionOptions::default()
    };
    let fixture = Fixture::build(options, ScriptedEngine::new(), |collaborators| {
        Session::create_new(sample_configuration(), collaborators)
    })
    .unwrap();
    let session = &fixture.session;
    session.create_thread(false).unwrap();

    let exits: Exits = Arc::default();
    {
        let exits = Arc::clone(&exits);
        let entered = AtomicBool::new(false);
        let scheduled = AtomicBool::new(false);
        fixture.engine.on_step(move |session: &Session, _step| {
            match session.nest_level() {
                0 if !entered.swap(true, Ordering::SeqCst) => record(&exits, session),
                1 if !scheduled.swap(true, Ordering::SeqCst) => {
                    session.schedule_reset(ResetType::HARD);
                }
                _ => {}
            }
        });
    }

    session.execute_incremental();

    assert_eq!(
        *exits.lock().unwrap(),
        vec![Some(SubroutineExit::ControlPending)]
    );
    assert!(!session.has_pending_control());
    assert_eq!(fixture.engine.resets(), vec![true, true]);
    assert_eq!(session.boot_keys(), vec![Button::Power]);
    assert_eq!(fixture.engine.steps(), 0);
}

#[test]
fn controller_suspend_waits_for_the_call_to_return() {
    let fixture = Fixture::new(SessionOptions::default()).unwrap();
    let session = &fixture.session;
    let entered = Arc::new(AtomicBool::new(false));
    let gate = Arc::new(AtomicBool::new(false));
    let exits: Exits = Arc::default();
    {
        let entered = Arc::clone(&entered);
        let gate = Arc::clone(&gate);
        let exits = Arc::clone(&exits);
        let started = AtomicBool::new(false);
        fixture.engine.on_step(move |session: &Session, _step| {
            match session.nest_level() {
                0 if !started.swap(true, Ordering::SeqCst) => record(&exits, session),
                1 if !entered.swap(true, Ordering::SeqCst) => {
                    wait_until(PATIENCE, || gate.load(Ordering::SeqCst));
                }
                _ => {}
            }
        });
    }
    session.create_thread(false).unwrap();
    assert!(wait_until(PATIENCE, || entered.load(Ordering::SeqCst)));
    assert!(session.is_nested());

    thread::scope(|scope| {
        let controller = scope.spawn(|| session.suspend_thread(StopMethod::Now));
        thread::sleep(Duration::from_millis(20));
        assert!(!controller.is_finished());
        gate.store(true, Ordering::SeqCst);
        assert!(controller.join().unwrap());
    });

    assert!(!session.is_nested());
    assert_eq!(session.get_session_state(), SessionState::Suspended);
    assert_eq!(session.get_suspend_state().count(SuspendReason::UiThread), 1);
    assert_eq!(
        *exits.lock().unwrap(),
        vec![Some(SubroutineExit::Returned)]
    );

    session.resume_thread();
    assert_eq!(session.get_session_state(), SessionState::Running);
}

#[test]
fn dialog_inside_a_call_counts_as_stopped() {
    let fixture = Fixture::new(SessionOptions::default()).unwrap();
    let session = &fixture.session;
    let answers = Arc::new(Mutex::new(Vec::new()));
    let exits: Exits = Arc::default();
    {
        let answers = Arc::clone(&answers);
        let exits = Arc::clone(&exits);
        let started = AtomicBool::new(false);
        let asked = AtomicBool::new(false);
        fixture.engine.on_step(move |session: &Session, _step| {
            match session.nest_level() {
                0 if !started.swap(true, Ordering::SeqCst) => record(&exits, session),
                1 if !asked.swap(true, Ordering::SeqCst) => {
                    let request =
                        DialogRequest::new("Fatal Alert", "Bus error", &["Debug", "Reset"]);
                    answers.lock().unwrap().push(session.block_on_dialog(request));
                }
                _ => {}
            }
        });
    }
    session.create_thread(false).unwrap();

    let observer = Arc::clone(session);
    assert!(wait_until(PATIENCE, || observer.pending_dialog().is_some()));
    assert!(session.is_nested());
    assert_eq!(session.get_session_state(), SessionState::BlockedOnUi);
    assert!(session.suspend_thread(StopMethod::Now));

    assert!(session.unblock_dialog(DialogItemId(1)));
    assert!(wait_until(PATIENCE, || {
        !observer.is_nested() && observer.get_session_state() == SessionState::Suspended
    }));
    assert_eq!(*answers.lock().unwrap(), vec![Some(DialogItemId(1))]);
    assert_eq!(
        *exits.lock().unwrap(),
        vec![Some(SubroutineExit::Returned)]
    );
    assert_eq!(session.pending_dialog(), None);

    session.resume_thread();
    assert_eq!(session.get_session_state(), SessionState::Running);
}
