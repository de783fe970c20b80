// Stop on entry and step through a small program line by line

use jsdebug_engine::{DebugOutcome, EngineConfig, ExecutionEngine, LaunchOptions};

const FILE: &str = "math.js";
const CODE: &str = "function square(n) { return n * n; }
let a = square(3);
let b = a + 1;
console.log(b);";

fn describe(outcome: &DebugOutcome) -> String {
    match outcome {
        DebugOutcome::Paused { reason, location } => {
            format!("paused ({}) at line {}", reason, location.line_number)
        }
        DebugOutcome::Completed { result } => format!("completed with {:?}", result),
        DebugOutcome::Failed { error } => format!("failed: {}", error),
        other => format!("{:?}", other),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("jsdebug_engine=debug")
        .init();

    let engine = ExecutionEngine::new(EngineConfig::default());
    engine.initialize()?;

    let options = LaunchOptions {
        stop_on_entry: true,
        timeout_ms: None,
    };
    let outcome = engine.execute_with_debugging_opts(CODE, FILE, options).await?;
    println!("🚦 {}", describe(&outcome));

    // line 1 -> 2
    let step = engine.step_over().await?;
    if let Some(outcome) = step.wait().await? {
        println!("⤵️  step over: {}", describe(&outcome));
    }

    // line 2 calls square(), so this pushes a frame
    let step = engine.step_into().await?;
    if let Some(outcome) = step.wait().await? {
        println!("⬇️  step into: {}", describe(&outcome));
    }
    for (i, frame) in engine.call_stack().await.iter().enumerate() {
        println!("   #{} {} ({}:{})", i, frame.function_name, frame.file_name, frame.line_number);
    }

    let step = engine.step_out().await?;
    if let Some(outcome) = step.wait().await? {
        println!("⬆️  step out: {}", describe(&outcome));
    }

    let outcome = engine.continue_execution().await?;
    println!("🏁 {}", describe(&outcome));

    for entry in engine.console_output() {
        println!("   console: {}", entry.message);
    }

    Ok(())
}
