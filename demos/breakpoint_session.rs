// Pause on a conditional breakpoint, inspect variables and watches, then continue

use jsdebug_engine::{DebugOutcome, EngineConfig, EngineEvent, ExecutionEngine};

const FILE: &str = "orders.js";
const CODE: &str = "const orders = [12, 40, 7];
let total = 0;
for (const o of orders) total += o;
const big = total > 50;
console.log('total', total, 'big', big);";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("jsdebug_engine=info")
        .init();

    let engine = ExecutionEngine::new(EngineConfig::default());
    engine.initialize()?;
    let mut events = engine.subscribe();

    println!("🎯 Setting breakpoint at {}:4 (when total > 50)...", FILE);
    engine.add_breakpoint(FILE, 4, Some("total > 50".to_string()))?;
    engine.add_watch("orders.length").await?;
    engine.add_watch("total / orders.length").await?;

    let outcome = engine.execute_with_debugging(CODE, FILE).await?;
    let DebugOutcome::Paused { reason, location } = outcome else {
        println!("⚠️  Did not pause: {:?}", outcome);
        return Ok(());
    };
    println!("\n🎊 Paused ({}) at line {}", reason, location.line_number);

    println!("\n📦 Variables:");
    for (name, value) in engine.variables().await {
        println!("   {} = {}", name, value);
    }

    println!("\n👀 Watches:");
    for watch in engine.refresh_watches().await? {
        match (watch.value, watch.error) {
            (Some(value), _) => println!("   {} = {}", watch.expression, value),
            (_, Some(error)) => println!("   {} ❌ {}", watch.expression, error),
            _ => println!("   {} (not evaluated)", watch.expression),
        }
    }

    println!("\n▶️  Continuing...");
    let outcome = engine.continue_execution().await?;
    println!("✓ {:?}", outcome);

    println!("\n📜 Events seen:");
    for event in events.drain() {
        match event {
            EngineEvent::ConsoleOutput { entry } => println!("   console: {}", entry.message),
            other => println!("   {}", other.name()),
        }
    }

    Ok(())
}
