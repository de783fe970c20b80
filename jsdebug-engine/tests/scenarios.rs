// End-to-end debugging scenarios driven through the public engine API

use jsdebug_engine::*;
use serde_json::json;
use std::time::{Duration, Instant};

const FILE: &str = "main.js";
const SIMPLE: &str = "let x=1;\nlet y=2;\nconsole.log(x+y);";

fn engine() -> ExecutionEngine {
    let config = EngineConfig {
        step_delay_ms: 10,
        ..EngineConfig::default()
    };
    let engine = ExecutionEngine::new(config);
    engine.initialize().unwrap();
    engine
}

fn paused_at(outcome: &DebugOutcome) -> (PauseReason, u32) {
    match outcome {
        DebugOutcome::Paused { reason, location } => (*reason, location.line_number),
        other => panic!("expected a pause, got {:?}", other),
    }
}

#[tokio::test]
async fn test_simple_breakpoint_hit() -> anyhow::Result<()> {
    let engine = engine();
    let mut paused = engine.subscribe_to(&[EventChannel::DebugPaused, EventChannel::BreakpointHit]);
    engine.add_breakpoint(FILE, 2, None)?;

    engine.start_debug_session(FILE).await?;
    let outcome = engine.execute_with_debugging(SIMPLE, FILE).await?;

    assert_eq!(paused_at(&outcome), (PauseReason::Breakpoint, 2));
    assert!(engine.console_output().is_empty());

    match paused.recv().await {
        Some(EngineEvent::BreakpointHit { breakpoint, variables, .. }) => {
            assert_eq!(breakpoint.id, "main.js:2");
            assert_eq!(breakpoint.hit_count, 1);
            assert_eq!(variables["x"], json!(1));
        }
        other => panic!("unexpected {:?}", other),
    }
    match paused.recv().await {
        Some(EngineEvent::DebugPaused { reason, location, call_stack, .. }) => {
            assert_eq!(reason, PauseReason::Breakpoint);
            assert_eq!(location.line_number, 2);
            assert_eq!(call_stack[0].line_number, 2);
        }
        other => panic!("unexpected {:?}", other),
    }

    let snapshot = engine.snapshot().await;
    assert!(snapshot.is_paused && snapshot.is_debugging);
    assert_eq!(snapshot.current_line, Some(2));
    Ok(())
}

#[tokio::test]
async fn test_continue_runs_to_completion() -> anyhow::Result<()> {
    let engine = engine();
    engine.add_breakpoint(FILE, 2, None)?;
    engine.start_debug_session(FILE).await?;
    engine.execute_with_debugging(SIMPLE, FILE).await?;

    let mut states = engine.subscribe_to(&[EventChannel::ExecutionStateChanged]);
    let outcome = engine.continue_execution().await?;
    assert!(matches!(outcome, DebugOutcome::Completed { .. }));

    let seen: Vec<ExecutionState> = states
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::ExecutionStateChanged { snapshot } => Some(snapshot.state),
            _ => None,
        })
        .collect();
    assert_eq!(seen.first(), Some(&ExecutionState::Running));
    assert_eq!(seen.last(), Some(&ExecutionState::Stopped));

    let output = engine.console_output();
    assert_eq!(output.len(), 1);
    assert_eq!(output[0].message, "3");

    let snapshot = engine.snapshot().await;
    assert_eq!(snapshot.state, ExecutionState::Stopped);
    assert_eq!(snapshot.session.map(|s| s.status), Some(SessionStatus::Stopped));
    // breakpoints outlive the session
    assert_eq!(engine.breakpoints().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_step_over_twice_from_line_one() -> anyhow::Result<()> {
    let engine = engine();
    let options = LaunchOptions {
        stop_on_entry: true,
        timeout_ms: None,
    };
    let outcome = engine.execute_with_debugging_opts(SIMPLE, FILE, options).await?;
    assert_eq!(paused_at(&outcome), (PauseReason::Entry, 1));

    let mut states = engine.subscribe_to(&[
        EventChannel::ExecutionStateChanged,
        EventChannel::DebugPaused,
    ]);

    let first = engine.step_over().await?.wait().await?.expect("step landed");
    assert_eq!(paused_at(&first), (PauseReason::Step, 2));

    let second = engine.step_over().await?.wait().await?.expect("step landed");
    assert_eq!(paused_at(&second), (PauseReason::Step, 3));

    // stepping is observed before each pause
    let order: Vec<&str> = states
        .drain()
        .iter()
        .filter_map(|e| match e {
            EngineEvent::ExecutionStateChanged { snapshot } if snapshot.state == ExecutionState::Stepping => {
                Some("stepping")
            }
            EngineEvent::DebugPaused { .. } => Some("paused"),
            _ => None,
        })
        .collect();
    assert_eq!(order, vec!["stepping", "paused", "stepping", "paused"]);
    Ok(())
}

#[tokio::test]
async fn test_step_past_last_line_completes() -> anyhow::Result<()> {
    let engine = engine();
    engine.add_breakpoint(FILE, 3, None)?;
    engine.execute_with_debugging(SIMPLE, FILE).await?;

    let outcome = engine.step_over().await?.wait().await?.expect("step landed");
    assert!(matches!(outcome, DebugOutcome::Completed { .. }));
    assert_eq!(engine.console_output()[0].message, "3");
    assert_eq!(engine.snapshot().await.state, ExecutionState::Stopped);
    Ok(())
}

#[tokio::test]
async fn test_timeout() -> anyhow::Result<()> {
    let engine = engine();
    let started = Instant::now();
    let result = engine
        .execute_code(
            "while(true){}",
            RunOptions {
                timeout_ms: Some(50),
                ..RunOptions::default()
            },
        )
        .await?;

    assert!(!result.success);
    assert!(result.is_timeout());
    assert!(started.elapsed() < Duration::from_millis(1_000));
    assert!(matches!(result.into_result(), Err(EngineError::Timeout(50))));
    Ok(())
}

#[tokio::test]
async fn test_failing_condition_still_pauses() -> anyhow::Result<()> {
    let engine = engine();
    engine.add_breakpoint(FILE, 2, Some("undefinedVar.prop".to_string()))?;

    let outcome = engine.execute_with_debugging(SIMPLE, FILE).await?;
    assert_eq!(paused_at(&outcome), (PauseReason::Breakpoint, 2));
    Ok(())
}

#[tokio::test]
async fn test_condition_sees_earlier_lines() -> anyhow::Result<()> {
    let engine = engine();
    engine.add_breakpoint(FILE, 2, Some("x > 5".to_string()))?;
    engine.add_breakpoint(FILE, 3, Some("y === 2".to_string()))?;

    let outcome = engine.execute_with_debugging(SIMPLE, FILE).await?;
    assert_eq!(paused_at(&outcome), (PauseReason::Breakpoint, 3));
    Ok(())
}

#[tokio::test]
async fn test_disabled_breakpoint_never_pauses() -> anyhow::Result<()> {
    let engine = engine();
    let breakpoint = engine.add_breakpoint(FILE, 2, None)?;
    engine.toggle_breakpoint(&breakpoint.id)?;

    let outcome = engine.execute_with_debugging(SIMPLE, FILE).await?;
    assert!(matches!(outcome, DebugOutcome::Completed { .. }));
    assert_eq!(engine.breakpoints()[0].hit_count, 0);
    Ok(())
}

#[tokio::test]
async fn test_step_while_stopped_is_rejected() -> anyhow::Result<()> {
    let engine = engine();
    let before = engine.snapshot().await;

    match engine.step_over().await {
        Err(EngineError::InvalidSessionState { state, .. }) => {
            assert_eq!(state, ExecutionState::Stopped)
        }
        other => panic!("unexpected {:?}", other.map(|_| ())),
    }
    assert_eq!(engine.snapshot().await, before);
    Ok(())
}

#[tokio::test]
async fn test_watches_refresh_at_pause() -> anyhow::Result<()> {
    let engine = engine();
    engine.add_breakpoint(FILE, 3, None)?;
    let sum = engine.add_watch("x + y").await?;
    let broken = engine.add_watch("nothing.here").await?;
    let doubled = engine.add_watch("y * 2").await?;

    engine.execute_with_debugging(SIMPLE, FILE).await?;
    let items = engine.refresh_watches().await?;

    assert_eq!(items[0].id, sum.id);
    assert_eq!(items[0].value, Some(json!(3)));
    assert_eq!(items[1].id, broken.id);
    assert!(items[1].error.is_some());
    assert_eq!(items[1].value, None);
    assert_eq!(items[2].id, doubled.id);
    assert_eq!(items[2].value, Some(json!(4)));
    Ok(())
}

#[tokio::test]
async fn test_breakpoint_identity_is_file_and_line() -> anyhow::Result<()> {
    let engine = engine();
    engine.add_breakpoint(FILE, 7, Some("a".to_string()))?;
    engine.add_breakpoint(FILE, 7, Some("b".to_string()))?;

    let list = engine.breakpoints();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].condition.as_deref(), Some("b"));

    assert!(matches!(
        engine.toggle_breakpoint_at(FILE, 7)?,
        BreakpointChange::Removed(_)
    ));
    assert!(engine.breakpoints_for_file(FILE).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_debug_run_through_code_runner() -> anyhow::Result<()> {
    let engine = engine();
    engine.add_breakpoint("app.js", 2, None)?;

    let result = engine
        .execute_code(
            SIMPLE,
            RunOptions {
                debug: true,
                file_name: Some("app.js".to_string()),
                ..RunOptions::default()
            },
        )
        .await?;
    assert!(result.success);
    assert_eq!(result.paused_at.map(|l| l.line_number), Some(2));
    assert!(!engine.is_running());

    assert!(engine.stop_execution().await?);
    assert!(!engine.snapshot().await.is_debugging);
    Ok(())
}

/// Line 3 keeps the program busy long enough to interleave calls with it
const SLOW: &str = "let x = 1;\nlet y = 2;\nconst end = Date.now() + 600; while (Date.now() < end) {}\nconsole.log('done');";

/// Pause at line 2 of `SLOW`, continue in the background and wait until the
/// program itself is executing
async fn continue_into_slow_program(
    engine: &ExecutionEngine,
) -> anyhow::Result<tokio::task::JoinHandle<EngineResult<DebugOutcome>>> {
    engine.add_breakpoint(FILE, 2, None)?;
    let outcome = engine.execute_with_debugging(SLOW, FILE).await?;
    assert_eq!(paused_at(&outcome), (PauseReason::Breakpoint, 2));

    let background = engine.clone();
    let resumed = tokio::spawn(async move { background.continue_execution().await });

    let started = Instant::now();
    while !engine.is_running() {
        assert!(started.elapsed() < Duration::from_secs(2), "program never started");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Ok(resumed)
}

fn console_messages(engine: &ExecutionEngine) -> Vec<String> {
    engine.console_output().into_iter().map(|e| e.message).collect()
}

#[tokio::test]
async fn test_run_during_debug_execution_fails_fast() -> anyhow::Result<()> {
    let engine = engine();
    let resumed = continue_into_slow_program(&engine).await?;

    assert!(engine.snapshot().await.is_running);
    let second = engine
        .execute_code("console.log('other'); 1", RunOptions::default())
        .await;
    assert!(matches!(second, Err(EngineError::AlreadyRunning)));

    assert!(matches!(resumed.await??, DebugOutcome::Completed { .. }));
    assert_eq!(console_messages(&engine), vec!["done"]);
    assert!(!engine.is_running());
    Ok(())
}

#[tokio::test]
async fn test_debug_execution_cannot_be_paused_or_resumed_twice() -> anyhow::Result<()> {
    let engine = engine();
    let resumed = continue_into_slow_program(&engine).await?;

    assert!(engine.pause().await.unwrap_err().is_invalid_state());
    assert!(engine.continue_execution().await.unwrap_err().is_invalid_state());
    assert!(engine.step_over().await.unwrap_err().is_invalid_state());

    assert!(matches!(resumed.await??, DebugOutcome::Completed { .. }));
    assert_eq!(console_messages(&engine), vec!["done"]);
    assert_eq!(engine.snapshot().await.state, ExecutionState::Stopped);
    Ok(())
}

#[tokio::test]
async fn test_stop_cancels_debug_execution() -> anyhow::Result<()> {
    let engine = engine();
    let resumed = continue_into_slow_program(&engine).await?;

    assert!(engine.stop_execution().await?);
    assert_eq!(resumed.await??, DebugOutcome::Detached);
    assert!(console_messages(&engine).is_empty());
    assert!(!engine.is_running());
    Ok(())
}
