// Run a snippet without debugging and print its value and console output

use jsdebug_engine::{EngineConfig, ExecutionEngine, RunOptions};

const SNIPPET: &str = r#"
const items = [3, 1, 2].sort();
console.log('sorted', items);
console.warn('about to sum');
items.reduce((a, b) => a + b, 0)
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("jsdebug_engine=info")
        .init();

    println!("▶️  Running snippet...\n");

    let engine = ExecutionEngine::new(EngineConfig::default());
    engine.initialize()?;

    let result = engine.execute_code(SNIPPET, RunOptions::default()).await?;

    println!("📤 Console:");
    for entry in &result.output {
        println!("   [{:?}] {}", entry.level, entry.message);
    }

    match (&result.value, &result.error) {
        (Some(value), None) => println!("\n✅ Result: {} ({}ms)", value, result.duration_ms),
        (_, Some(error)) => println!("\n❌ Failed: {}", error),
        _ => println!("\n✅ Done"),
    }

    println!("\n⏱  Now a runaway loop with a 100ms budget...");
    let options = RunOptions {
        timeout_ms: Some(100),
        ..RunOptions::default()
    };
    let result = engine.execute_code("while (true) {}", options).await?;
    if result.is_timeout() {
        println!("✓ Stopped after {}ms", result.duration_ms);
    }

    engine.dispose().await;
    Ok(())
}
