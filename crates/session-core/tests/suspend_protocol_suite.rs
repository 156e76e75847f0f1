//! Suspend/resume protocol coverage against a live execution thread.

#![allow(clippy::pedantic, clippy::nursery)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use proptest::prelude::*;
use rstest::rstest;
use serde as _;
use serde_json as _;
use session_core::testing::{wait_until, Fixture, ScriptedEngine};
use session_core::{
    EngineError, KeyEvent, Session, SessionError, SessionOptions, SessionState, SessionStopper,
    StopMethod, SubroutineExit, SuspendReason, SuspendState, ThreadMode,
};
use session_file as _;
use tempfile as _;
use thiserror as _;
use tracing as _;

const PATIENCE: Duration = Duration::from_secs(10);

fn running_fixture() -> Fixture {
    let fixture = Fixture::new(SessionOptions::default()).unwrap();
    fixture.session.create_thread(false).unwrap();
    let engine = Arc::clone(&fixture.engine);
    assert!(wait_until(PATIENCE, || engine.steps() > 8));
    fixture
}

fn cooperative_options() -> SessionOptions {
    SessionOptions {
        thread_mode: ThreadMode::Cooperative,
        ..SessionOptions::default()
    }
}

#[test]
fn suspend_now_parks_and_resume_runs_again() {
    let fixture = running_fixture();
    let session = &fixture.session;

    assert!(session.suspend_thread(StopMethod::Now));
    assert_eq!(session.get_session_state(), SessionState::Suspended);
    assert_eq!(session.get_suspend_state().ui_thread(), 1);

    let parked_at = fixture.engine.steps();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(fixture.engine.steps(), parked_at);

    session.resume_thread();
    assert_eq!(session.get_session_state(), SessionState::Running);
    let engine = Arc::clone(&fixture.engine);
    assert!(wait_until(PATIENCE, || engine.steps() > parked_at));
}

#[test]
fn suspend_none_is_a_no_op() {
    let fixture = running_fixture();
    assert!(!fixture.session.suspend_thread(StopMethod::None));
    assert_eq!(fixture.session.get_suspend_state(), SuspendState::CLEAR);
}

#[test]
fn suspend_on_sys_call_stops_at_a_boundary() {
    let fixture = running_fixture();
    let session = &fixture.session;

    assert!(session.suspend_thread(StopMethod::OnSysCall));
    let suspend = session.get_suspend_state();
    assert_eq!(session.get_session_state(), SessionState::Suspended);
    assert!(suspend.sys_call());
    assert_eq!(suspend.ui_thread(), 1);
    assert!(!session.break_on_sys_call());
    assert_eq!(fixture.engine.steps() % 4, 0);

    session.resume_thread();
    let suspend = session.get_suspend_state();
    assert!(!suspend.sys_call());
    assert!(!suspend.is_active());
    assert_eq!(session.get_session_state(), SessionState::Running);
}

#[test]
fn stopper_can_call_only_after_a_sys_call_stop() {
    let fixture = running_fixture();
    {
        let stopper = SessionStopper::new(Some(&*fixture.session), StopMethod::OnSysCall);
        assert!(stopper.stopped());
        assert!(stopper.can_call());
    }
    {
        let stopper = SessionStopper::new(Some(&*fixture.session), StopMethod::Now);
        assert!(stopper.stopped());
        assert!(!stopper.can_call());
    }
    let no_session = SessionStopper::new(None, StopMethod::Now);
    assert!(!no_session.stopped());
    assert_eq!(fixture.session.get_session_state(), SessionState::Running);
}

#[test]
fn destroying_the_thread_under_a_controller_call_stays_stopped() {
    let engine = ScriptedEngine::new().with_subroutine_length(u64::MAX);
    let fixture = Fixture::build(SessionOptions::default(), engine, |collaborators| {
        Session::create_new(session_core::testing::sample_configuration(), collaborators)
    })
    .unwrap();
    let session = &fixture.session;
    let entered = Arc::new(AtomicBool::new(false));
    let gate = Arc::new(AtomicBool::new(false));
    {
        let entered = Arc::clone(&entered);
        let gate = Arc::clone(&gate);
        fixture.engine.on_step(move |session: &Session, _step| {
            if session.is_nested() && !entered.swap(true, Ordering::SeqCst) {
                wait_until(PATIENCE, || gate.load(Ordering::SeqCst));
            }
        });
    }
    session.create_thread(false).unwrap();
    let engine = Arc::clone(&fixture.engine);
    assert!(wait_until(PATIENCE, || engine.steps() > 8));

    thread::scope(|scope| {
        let caller = scope.spawn(|| {
            let stopper = SessionStopper::new(Some(&**session), StopMethod::OnSysCall);
            assert!(stopper.can_call());
            session.execute_subroutine()
        });
        assert!(wait_until(PATIENCE, || entered.load(Ordering::SeqCst)));

        session.destroy_thread();
        assert_eq!(session.get_session_state(), SessionState::Stopped);
        assert!(!session.has_thread());

        gate.store(true, Ordering::SeqCst);
        assert_eq!(caller.join().unwrap().unwrap(), SubroutineExit::Stopped);
    });

    assert!(!session.is_nested());
    assert_eq!(session.get_session_state(), SessionState::Stopped);
    assert!(!session.suspend_thread(StopMethod::OnSysCall));
}

#[test]
fn unmatched_resume_leaves_a_system_call_stop_in_place() {
    let fixture = running_fixture();
    let session = &fixture.session;
    session.schedule_suspend_exception();
    let observer = Arc::clone(session);
    assert!(wait_until(PATIENCE, || {
        observer.get_session_state() == SessionState::Suspended
    }));
    session.schedule_suspend_sys_call();

    session.resume_thread();

    let suspend = session.get_suspend_state();
    assert_eq!(suspend.ui_thread(), 0);
    assert!(suspend.sys_call());
    assert_eq!(suspend.debugger(), 1);
    assert_eq!(session.get_session_state(), SessionState::Suspended);
}

#[rstest]
#[case::now(StopMethod::Now, true)]
#[case::on_cycle(StopMethod::OnCycle, true)]
#[case::on_sys_call(StopMethod::OnSysCall, false)]
fn requests_against_an_already_suspended_thread(#[case] how: StopMethod, #[case] expected: bool) {
    let fixture = Fixture::new(SessionOptions::default()).unwrap();
    let session = &fixture.session;
    session.create_thread(true).unwrap();
    assert_eq!(session.get_session_state(), SessionState::Suspended);

    assert_eq!(session.suspend_thread(how), expected);
    let expected_ui = if expected { 2 } else { 1 };
    assert_eq!(session.get_suspend_state().ui_thread(), expected_ui);
    if expected {
        session.resume_thread();
    }

    session.resume_thread();
    assert_eq!(session.get_session_state(), SessionState::Running);
}

#[rstest]
#[case::now(StopMethod::Now, true)]
#[case::on_cycle(StopMethod::OnCycle, true)]
#[case::on_sys_call(StopMethod::OnSysCall, false)]
fn requests_against_a_stopped_session(#[case] how: StopMethod, #[case] expected: bool) {
    let fixture = Fixture::new(SessionOptions::default()).unwrap();
    let session = &fixture.session;
    assert_eq!(session.get_session_state(), SessionState::Stopped);

    assert_eq!(session.suspend_thread(how), expected);
    if expected {
        assert_eq!(session.get_suspend_state().ui_thread(), 1);
        session.resume_thread();
    }
    assert_eq!(session.get_suspend_state(), SuspendState::CLEAR);
    assert_eq!(session.get_session_state(), SessionState::Stopped);
}

#[test]
fn two_controllers_suspend_and_resume_concurrently() {
    let fixture = running_fixture();
    let session = &fixture.session;

    thread::scope(|scope| {
        let first = scope.spawn(|| session.suspend_thread(StopMethod::Now));
        let second = scope.spawn(|| session.suspend_thread(StopMethod::Now));
        assert!(first.join().unwrap());
        assert!(second.join().unwrap());
    });
    assert_eq!(session.get_suspend_state().ui_thread(), 2);

    thread::scope(|scope| {
        scope.spawn(|| session.resume_thread());
        scope.spawn(|| session.resume_thread());
    });
    assert_eq!(session.get_suspend_state().ui_thread(), 0);
    assert_eq!(session.get_session_state(), SessionState::Running);
}

#[test]
fn suspend_from_the_execution_thread_is_refused() {
    let fixture = Fixture::new(SessionOptions::default()).unwrap();
    let answer = Arc::new(Mutex::new(None));
    let seen = Arc::clone(&answer);
    let fired = AtomicBool::new(false);
    fixture.engine.on_step(move |session: &Session, _step| {
        if !fired.swap(true, Ordering::SeqCst) {
            *seen.lock().unwrap() = Some(session.suspend_thread(StopMethod::Now));
        }
    });
    fixture.session.create_thread(false).unwrap();

    assert!(wait_until(PATIENCE, || answer.lock().unwrap().is_some()));
    assert_eq!(*answer.lock().unwrap(), Some(false));
    assert_eq!(fixture.session.get_suspend_state().ui_thread(), 0);
}

#[test]
fn engine_failure_parks_on_the_debugger_and_is_reported() {
    let fixture = Fixture::new(SessionOptions::default()).unwrap();
    fixture.engine.fail_next_execute(EngineError::Fault {
        address: 0x1000_0040,
        message: "illegal instruction".to_owned(),
    });
    fixture.session.create_thread(false).unwrap();

    let session = Arc::clone(&fixture.session);
    assert!(wait_until(PATIENCE, || {
        session.get_session_state() == SessionState::Suspended
    }));
    assert_eq!(session.get_suspend_state().debugger(), 1);
    let reports = fixture.reporter.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].operation, "execute");
    assert!(reports[0].message.contains("illegal instruction"));

    session.resume_debugger();
    let engine = Arc::clone(&fixture.engine);
    assert!(wait_until(PATIENCE, || engine.steps() > 0));
}

#[test]
fn engine_panic_is_contained() {
    let fixture = Fixture::new(SessionOptions::default()).unwrap();
    let fired = AtomicBool::new(false);
    fixture.engine.on_step(move |_session: &Session, _step| {
        if !fired.swap(true, Ordering::SeqCst) {
            panic!("decoder exploded");
        }
    });
    fixture.session.create_thread(false).unwrap();

    let session = Arc::clone(&fixture.session);
    assert!(wait_until(PATIENCE, || {
        session.get_suspend_state().debugger() == 1
    }));
    let reports = fixture.reporter.reports();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].message.contains("decoder exploded"));
    assert!(fixture.session.has_thread());
}

#[test]
fn scheduled_reset_runs_at_the_next_checkpoint() {
    let fixture = running_fixture();
    let session = Arc::clone(&fixture.session);
    let resets_before = fixture.engine.resets().len();

    session.schedule_reset(session_core::ResetType::HARD);
    let engine = Arc::clone(&fixture.engine);
    let observer = Arc::clone(&session);
    assert!(wait_until(PATIENCE, || {
        let state = observer.get_session_state();
        assert!(matches!(
            state,
            SessionState::Running | SessionState::Suspended
        ));
        engine.resets().len() > resets_before
    }));
    assert_eq!(fixture.engine.resets().last(), Some(&true));
    assert_eq!(session.boot_keys(), vec![session_core::Button::Power]);

    // The flag was taken: nothing else resets afterwards.
    let resets_after = fixture.engine.resets().len();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(fixture.engine.resets().len(), resets_after);
}

#[test]
fn deferred_error_failure_is_reported_and_parks() {
    let fixture = running_fixture();
    let session = &fixture.session;
    let ran = Arc::new(AtomicBool::new(false));
    let never = Arc::clone(&ran);

    // Queue both while parked so they drain in one pass.
    assert!(session.suspend_thread(StopMethod::Now));

    session.schedule_deferred_error("bus error at 0x1000", |_session: &Session| {
        Err(SessionError::subsystem("memory", "unmapped access"))
    });
    session.schedule_deferred_error("never runs", move |_session: &Session| {
        never.store(true, Ordering::SeqCst);
        Ok(())
    });
    assert_eq!(session.pending_deferred(), 2);
    session.resume_thread();

    let observer = Arc::clone(session);
    assert!(wait_until(PATIENCE, || {
        observer.get_suspend_state().debugger() == 1
    }));
    let reports = fixture.reporter.reports();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.recovery, "the remaining deferred actions were discarded");
    assert!(report.message.contains("bus error at 0x1000"));
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(session.pending_deferred(), 0);
}

#[test]
fn sleep_ends_early_on_input() {
    let fixture = Fixture::new(SessionOptions::default()).unwrap();
    let session = Arc::clone(&fixture.session);
    let started = Instant::now();
    thread::scope(|scope| {
        scope.spawn(|| session.sleep(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        assert!(session.post_key_event(KeyEvent::new(u16::from(b'a'))));
    });
    assert!(started.elapsed() < Duration::from_secs(20));
    assert!(session.has_key_event());
}

#[test]
fn cooperative_mode_runs_one_slice_per_increment() {
    let engine = ScriptedEngine::new().with_slice_steps(32);
    let fixture = Fixture::build(cooperative_options(), engine, |collaborators| {
        Session::create_new(session_core::testing::sample_configuration(), collaborators)
    })
    .unwrap();
    let session = &fixture.session;

    session.create_thread(false).unwrap();
    assert!(!session.has_thread());
    assert_eq!(session.get_session_state(), SessionState::Suspended);

    session.execute_incremental();
    assert_eq!(fixture.engine.steps(), 32);
    session.execute_incremental();
    assert_eq!(fixture.engine.steps(), 64);
    assert_eq!(session.get_session_state(), SessionState::Suspended);

    assert!(session.suspend_thread(StopMethod::OnSysCall));
    assert!(session.get_suspend_state().sys_call());
    session.execute_incremental();
    let parked = fixture.engine.steps();
    session.execute_incremental();
    assert_eq!(fixture.engine.steps(), parked);

    session.resume_thread();
    session.execute_incremental();
    assert!(fixture.engine.steps() > parked);

    session.destroy_thread();
    assert_eq!(session.get_session_state(), SessionState::Stopped);
    session.execute_incremental();
}

#[test]
fn create_thread_twice_is_refused() {
    let fixture = running_fixture();
    assert!(matches!(
        fixture.session.create_thread(false),
        Err(SessionError::ThreadRunning)
    ));
}

#[test]
fn suspend_reasons_other_than_ui_hold_the_thread() {
    let fixture = running_fixture();
    let session = Arc::clone(&fixture.session);
    session.schedule_suspend_external();
    assert!(wait_until(PATIENCE, || {
        session.get_session_state() == SessionState::Suspended
    }));
    let suspend = session.get_suspend_state();
    assert_eq!(suspend.count(SuspendReason::External), 1);
    assert!(suspend.sys_call());

    session.schedule_resume_external();
    // The system-call flag from the external stop still holds the thread.
    assert_eq!(session.get_session_state(), SessionState::Suspended);
    assert!(session.suspend_thread(StopMethod::Now));
    session.resume_thread();
    assert_eq!(session.get_session_state(), SessionState::Running);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn matched_suspend_resume_sequences_return_to_running(
        requests in prop::collection::vec(
            prop_oneof![
                Just(StopMethod::Now),
                Just(StopMethod::OnCycle),
                Just(StopMethod::OnSysCall),
            ],
            1..6,
        )
    ) {
        let fixture = running_fixture();
        let session = &fixture.session;

        let mut held = 0;
        for how in requests {
            if session.suspend_thread(how) {
                held += 1;
            }
        }
        prop_assert!(held > 0);
        prop_assert_ne!(session.get_session_state(), SessionState::Running);

        for _ in 0..held {
            session.resume_thread();
        }
        prop_assert_eq!(session.get_suspend_state(), SuspendState::CLEAR);
        prop_assert_eq!(session.get_session_state(), SessionState::Running);
    }
}
