// MCP request handlers
//
// Handles initialize, list tools, and routes tool calls to the execution engine

use crate::event_log::EventLog;
use crate::protocol::*;
use crate::tools;
use jsdebug_engine::{
    BreakpointChange, CallFrame, ConsoleEntry, DebugOutcome, ExecutionEngine, ExecutionResult,
    LaunchOptions, PendingStep, RunOptions, VariableContext,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

const DEFAULT_POLL_LIMIT: usize = 100;

pub struct RequestHandler {
    engine: ExecutionEngine,
    events: EventLog,
}

fn to_json<T: Serialize>(value: T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value)
        .map_err(|e| JsonRpcError::new(INTERNAL_ERROR, format!("Failed to encode result: {}", e)))
}

fn pretty<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("Failed to encode: {}", e))
}

fn str_arg<'a>(args: &'a Value, name: &str) -> Result<&'a str, String> {
    args.get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("Missing '{}' parameter", name))
}

fn opt_str_arg<'a>(args: &'a Value, name: &str) -> Option<&'a str> {
    args.get(name).and_then(|v| v.as_str())
}

fn bool_arg(args: &Value, name: &str) -> bool {
    args.get(name).and_then(|v| v.as_bool()).unwrap_or(false)
}

fn line_arg(args: &Value) -> Result<u32, String> {
    let line = args
        .get("line")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| "Missing 'line' parameter".to_string())?;
    match u32::try_from(line) {
        Ok(line) if line > 0 => Ok(line),
        _ => Err(format!("Invalid line number: {}", line)),
    }
}

fn format_console(entries: &[ConsoleEntry]) -> String {
    let mut output = String::new();
    for entry in entries {
        output.push_str(&format!("  [{}] {}\n", entry.level.method_name(), entry.message));
    }
    output
}

fn format_value(value: &Option<Value>) -> String {
    match value {
        Some(value) => value.to_string(),
        None => "undefined".to_string(),
    }
}

fn format_frame(index: usize, frame: &CallFrame, selected: bool) -> String {
    format!(
        "{} #{} {} at {}:{}:{}\n",
        if selected { "→" } else { " " },
        index,
        frame.function_name,
        frame.file_name,
        frame.line_number,
        frame.column_number
    )
}

fn describe_outcome(outcome: &DebugOutcome) -> Result<String, String> {
    match outcome {
        DebugOutcome::Paused { reason, location } => Ok(format!(
            "⏸️  Paused at {}:{} ({})",
            location.file_name, location.line_number, reason
        )),
        DebugOutcome::Completed { result } => Ok(format!(
            "✅ Execution completed\n   Result: {}",
            format_value(result)
        )),
        DebugOutcome::Failed { error } => Err(format!("❌ Execution failed: {}", error)),
        DebugOutcome::Running => {
            Ok("▶️  Debug session running (no program loaded)".to_string())
        }
        DebugOutcome::Detached => Ok("⏹️  Debug session stopped during execution".to_string()),
    }
}

fn describe_run(result: &ExecutionResult) -> Result<String, String> {
    let mut output = if let Some(location) = &result.paused_at {
        format!(
            "⏸️  Paused at {}:{} ({}ms)\n",
            location.file_name, location.line_number, result.duration_ms
        )
    } else if result.success {
        format!(
            "✅ Completed in {}ms\n   Value: {}\n",
            result.duration_ms,
            format_value(&result.value)
        )
    } else {
        let message = result
            .error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        format!("❌ {}\n", message)
    };

    if !result.output.is_empty() {
        output.push_str(&format!("\n📝 Console ({} line(s)):\n", result.output.len()));
        output.push_str(&format_console(&result.output));
    }

    if result.success {
        Ok(output)
    } else {
        Err(output)
    }
}

impl RequestHandler {
    pub fn new(engine: ExecutionEngine) -> Self {
        Self {
            events: EventLog::new(&engine),
            engine,
        }
    }

    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params),
            "tools/list" => self.handle_list_tools(),
            "tools/call" => self.handle_call_tool(request.params).await,
            _ => Err(JsonRpcError::new(
                METHOD_NOT_FOUND,
                format!("Method not found: {}", request.method),
            )),
        };

        match result {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(error) => JsonRpcResponse::failure(request.id, error),
        }
    }

    pub async fn handle_notification(&self, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            "notifications/initialized" => {
                info!("Client initialized");
            }
            "notifications/cancelled" => {
                debug!("Request cancelled");
            }
            _ => {
                warn!("Unknown notification: {}", notification.method);
            }
        }
    }

    fn handle_initialize(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: InitializeParams = serde_json::from_value(params.unwrap_or(json!({})))
            .map_err(|e| {
                JsonRpcError::new(INVALID_PARAMS, format!("Invalid initialize params: {}", e))
            })?;

        if let Some(client) = &params.client_info {
            info!("Client: {} {}", client.name, client.version.as_deref().unwrap_or(""));
        }

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: ToolsCapability {},
            },
            server_info: ServerInfo {
                name: "jsdebug-mcp".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            instructions: Some(
                "JavaScript sandbox and debugger. \
                Use run.execute for one-off snippets. To debug, set breakpoints with \
                debug.set_breakpoint, then debug.launch the code and use debug.step_over, \
                debug.continue, debug.evaluate and watch.add while paused. \
                events.poll returns engine events since the last poll."
                    .to_string(),
            ),
        };

        to_json(result)
    }

    fn handle_list_tools(&self) -> Result<Value, JsonRpcError> {
        to_json(ListToolsResult {
            tools: tools::get_tools(),
        })
    }

    async fn handle_call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let call_params: CallToolParams = serde_json::from_value(params.unwrap_or(json!({})))
            .map_err(|e| {
                JsonRpcError::new(INVALID_PARAMS, format!("Invalid tool call params: {}", e))
            })?;

        debug!("Tool call: {}", call_params.name);
        let args = call_params.arguments;

        let result = match call_params.name.as_str() {
            "run.execute" => self.handle_execute(args).await,
            "run.stop" => self.handle_stop_execution().await,
            "console.get" => self.handle_console_get().await,
            "console.clear" => self.handle_console_clear().await,
            "debug.start" => self.handle_start(args).await,
            "debug.launch" => self.handle_launch(args).await,
            "debug.stop" => self.handle_stop().await,
            "debug.set_breakpoint" => self.handle_set_breakpoint(args).await,
            "debug.toggle_breakpoint" => self.handle_toggle_breakpoint(args).await,
            "debug.remove_breakpoint" => self.handle_remove_breakpoint(args).await,
            "debug.enable_breakpoint" => self.handle_enable_breakpoint(args).await,
            "debug.list_breakpoints" => self.handle_list_breakpoints(args).await,
            "debug.clear_breakpoints" => self.handle_clear_breakpoints().await,
            "debug.continue" => self.handle_continue().await,
            "debug.step_over" => self.handle_step(self.engine.step_over().await).await,
            "debug.step_into" => self.handle_step(self.engine.step_into().await).await,
            "debug.step_out" => self.handle_step(self.engine.step_out().await).await,
            "debug.pause" => self.handle_pause().await,
            "debug.get_stack" => self.handle_get_stack().await,
            "debug.select_frame" => self.handle_select_frame(args).await,
            "debug.evaluate" => self.handle_evaluate(args).await,
            "debug.set_variables" => self.handle_set_variables(args).await,
            "debug.state" => self.handle_state().await,
            "watch.add" => self.handle_watch_add(args).await,
            "watch.update" => self.handle_watch_update(args).await,
            "watch.remove" => self.handle_watch_remove(args).await,
            "watch.list" => self.handle_watch_list().await,
            "watch.refresh" => self.handle_watch_refresh().await,
            "events.poll" => self.handle_events_poll(args).await,
            _ => Err(format!("Unknown tool: {}", call_params.name)),
        };

        let call_result = match result {
            Ok(text) => CallToolResult {
                content: vec![ContentBlock::Text { text }],
                is_error: None,
            },
            Err(text) => CallToolResult {
                content: vec![ContentBlock::Text { text }],
                is_error: Some(true),
            },
        };
        to_json(call_result)
    }

    // Runs

    async fn handle_execute(&self, args: Value) -> Result<String, String> {
        let code = str_arg(&args, "code")?;
        let options = RunOptions {
            debug: bool_arg(&args, "debug"),
            timeout_ms: args.get("timeout_ms").and_then(|v| v.as_u64()),
            file_name: opt_str_arg(&args, "file_name").map(str::to_string),
            stop_on_entry: bool_arg(&args, "stop_on_entry"),
        };

        let result = self
            .engine
            .execute_code(code, options)
            .await
            .map_err(|e| format!("Failed to run: {}", e))?;
        describe_run(&result)
    }

    async fn handle_stop_execution(&self) -> Result<String, String> {
        let stopped = self
            .engine
            .stop_execution()
            .await
            .map_err(|e| format!("Failed to stop: {}", e))?;
        if stopped {
            Ok("⏹️  Execution stopped".to_string())
        } else {
            Ok("Nothing is running".to_string())
        }
    }

    async fn handle_console_get(&self) -> Result<String, String> {
        let entries = self.engine.console_output();
        if entries.is_empty() {
            return Ok("Console is empty".to_string());
        }
        Ok(format!(
            "📝 {} console line(s):\n\n{}",
            entries.len(),
            format_console(&entries)
        ))
    }

    async fn handle_console_clear(&self) -> Result<String, String> {
        self.engine
            .clear_console_output()
            .map_err(|e| format!("Failed to clear console: {}", e))?;
        Ok("🧹 Console cleared".to_string())
    }

    // Debug session

    async fn handle_start(&self, args: Value) -> Result<String, String> {
        let file_name = str_arg(&args, "file_name")?;
        let session = self
            .engine
            .start_debug_session(file_name)
            .await
            .map_err(|e| format!("Failed to start session: {}", e))?;
        Ok(format!(
            "🐞 Debug session {} started for {}",
            session.id, session.file_name
        ))
    }

    async fn handle_launch(&self, args: Value) -> Result<String, String> {
        let code = str_arg(&args, "code")?;
        let file_name = opt_str_arg(&args, "file_name")
            .unwrap_or(self.engine.config().default_file_name.as_str())
            .to_string();
        let options = LaunchOptions {
            stop_on_entry: bool_arg(&args, "stop_on_entry"),
            timeout_ms: args.get("timeout_ms").and_then(|v| v.as_u64()),
        };

        let outcome = self
            .engine
            .execute_with_debugging_opts(code, &file_name, options)
            .await
            .map_err(|e| format!("Failed to launch: {}", e))?;
        describe_outcome(&outcome)
    }

    async fn handle_stop(&self) -> Result<String, String> {
        let session = self
            .engine
            .stop_debug_session()
            .await
            .map_err(|e| format!("Failed to stop session: {}", e))?;
        match session {
            Some(session) => Ok(format!("✅ Debug session {} stopped", session.id)),
            None => Ok("No active debug session".to_string()),
        }
    }

    async fn handle_set_breakpoint(&self, args: Value) -> Result<String, String> {
        let file_name = str_arg(&args, "file_name")?;
        let line = line_arg(&args)?;
        let condition = opt_str_arg(&args, "condition").map(str::to_string);

        let bp = self
            .engine
            .add_breakpoint(file_name, line, condition)
            .map_err(|e| format!("Failed to set breakpoint: {}", e))?;

        let mut output = format!("✅ Breakpoint {} set at {}:{}", bp.id, bp.file_name, bp.line_number);
        if let Some(condition) = &bp.condition {
            output.push_str(&format!("\n   Condition: {}", condition));
        }
        Ok(output)
    }

    async fn handle_toggle_breakpoint(&self, args: Value) -> Result<String, String> {
        let file_name = str_arg(&args, "file_name")?;
        let line = line_arg(&args)?;

        match self
            .engine
            .toggle_breakpoint_at(file_name, line)
            .map_err(|e| format!("Failed to toggle breakpoint: {}", e))?
        {
            BreakpointChange::Added(bp) => Ok(format!("✅ Breakpoint {} added", bp.id)),
            BreakpointChange::Removed(bp) => Ok(format!("🗑️  Breakpoint {} removed", bp.id)),
        }
    }

    async fn handle_remove_breakpoint(&self, args: Value) -> Result<String, String> {
        let id = str_arg(&args, "breakpoint_id")?;
        let removed = self
            .engine
            .remove_breakpoint(id)
            .map_err(|e| format!("Failed to remove breakpoint: {}", e))?;
        if removed {
            Ok(format!("🗑️  Breakpoint {} removed", id))
        } else {
            Err(format!("Breakpoint not found: {}", id))
        }
    }

    async fn handle_enable_breakpoint(&self, args: Value) -> Result<String, String> {
        let id = str_arg(&args, "breakpoint_id")?;
        let bp = self
            .engine
            .toggle_breakpoint(id)
            .map_err(|e| format!("Failed to toggle breakpoint: {}", e))?
            .ok_or_else(|| format!("Breakpoint not found: {}", id))?;
        Ok(format!(
            "Breakpoint {} {}",
            bp.id,
            if bp.enabled { "enabled" } else { "disabled" }
        ))
    }

    async fn handle_list_breakpoints(&self, args: Value) -> Result<String, String> {
        let breakpoints = match opt_str_arg(&args, "file_name") {
            Some(file_name) => self.engine.breakpoints_for_file(file_name),
            None => self.engine.breakpoints(),
        };

        if breakpoints.is_empty() {
            return Ok("No breakpoints set".to_string());
        }

        let mut output = format!("📍 {} breakpoint(s):\n\n", breakpoints.len());
        for bp in &breakpoints {
            output.push_str(&format!(
                "  {} {}{}\n",
                if bp.enabled { "●" } else { "○" },
                bp.id,
                if bp.enabled { "" } else { " (disabled)" }
            ));
            if let Some(condition) = &bp.condition {
                output.push_str(&format!("     Condition: {}\n", condition));
            }
            if bp.hit_count > 0 {
                output.push_str(&format!("     Hits: {}\n", bp.hit_count));
            }
        }
        Ok(output)
    }

    async fn handle_clear_breakpoints(&self) -> Result<String, String> {
        let count = self
            .engine
            .clear_breakpoints()
            .map_err(|e| format!("Failed to clear breakpoints: {}", e))?;
        Ok(format!("🗑️  Cleared {} breakpoint(s)", count))
    }

    async fn handle_continue(&self) -> Result<String, String> {
        let outcome = self
            .engine
            .continue_execution()
            .await
            .map_err(|e| format!("Failed to resume: {}", e))?;
        describe_outcome(&outcome)
    }

    async fn handle_step(
        &self,
        pending: jsdebug_engine::EngineResult<PendingStep>,
    ) -> Result<String, String> {
        let pending = pending.map_err(|e| format!("Failed to step: {}", e))?;
        match pending.wait().await.map_err(|e| format!("Step failed: {}", e))? {
            Some(outcome) => describe_outcome(&outcome),
            None => Ok("Step superseded by a later command".to_string()),
        }
    }

    async fn handle_pause(&self) -> Result<String, String> {
        let location = self
            .engine
            .pause()
            .await
            .map_err(|e| format!("Failed to pause: {}", e))?;
        Ok(format!(
            "⏸️  Paused at {}:{}",
            location.file_name, location.line_number
        ))
    }

    async fn handle_get_stack(&self) -> Result<String, String> {
        let snapshot = self.engine.snapshot().await;
        if snapshot.call_stack.is_empty() {
            return Ok("No call stack (not debugging)".to_string());
        }

        let mut output = format!("🔍 Call stack ({} frame(s)):\n\n", snapshot.call_stack.len());
        for (idx, frame) in snapshot.call_stack.iter().enumerate() {
            output.push_str(&format_frame(idx, frame, idx == snapshot.selected_frame));
        }

        if !snapshot.variables.is_empty() {
            output.push_str(&format!("\n  Variables ({}):\n", snapshot.variables.len()));
            for (name, value) in &snapshot.variables {
                output.push_str(&format!("    {} = {}\n", name, value));
            }
        }
        Ok(output)
    }

    async fn handle_select_frame(&self, args: Value) -> Result<String, String> {
        let index = args
            .get("index")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| "Missing 'index' parameter".to_string())?;
        let index = usize::try_from(index).map_err(|_| format!("Invalid frame index: {}", index))?;

        let frame = self
            .engine
            .select_frame(index)
            .await
            .map_err(|e| format!("Failed to select frame: {}", e))?;
        Ok(format!("Selected {}", format_frame(index, &frame, true).trim_end()))
    }

    async fn handle_evaluate(&self, args: Value) -> Result<String, String> {
        let expression = str_arg(&args, "expression")?;
        let value = self
            .engine
            .evaluate(expression)
            .await
            .map_err(|e| format!("{}", e))?;
        Ok(value.to_string())
    }

    async fn handle_set_variables(&self, args: Value) -> Result<String, String> {
        let variables = args
            .get("variables")
            .cloned()
            .ok_or_else(|| "Missing 'variables' parameter".to_string())?;
        let context: VariableContext = serde_json::from_value(variables)
            .map_err(|e| format!("'variables' must be an object: {}", e))?;
        let count = context.len();

        self.engine
            .set_variable_context(context)
            .await
            .map_err(|e| format!("Failed to set variables: {}", e))?;
        Ok(format!("✅ Variable context set ({} variable(s))", count))
    }

    async fn handle_state(&self) -> Result<String, String> {
        pretty(&self.engine.snapshot().await)
    }

    // Watches

    async fn handle_watch_add(&self, args: Value) -> Result<String, String> {
        let expression = str_arg(&args, "expression")?;
        let watch = self
            .engine
            .add_watch(expression)
            .await
            .map_err(|e| format!("Failed to add watch: {}", e))?;
        pretty(&watch)
    }

    async fn handle_watch_update(&self, args: Value) -> Result<String, String> {
        let id = str_arg(&args, "watch_id")?;
        let expression = str_arg(&args, "expression")?;
        let watch = self
            .engine
            .update_watch(id, expression)
            .await
            .map_err(|e| format!("Failed to update watch: {}", e))?
            .ok_or_else(|| format!("Watch not found: {}", id))?;
        pretty(&watch)
    }

    async fn handle_watch_remove(&self, args: Value) -> Result<String, String> {
        let id = str_arg(&args, "watch_id")?;
        let removed = self
            .engine
            .remove_watch(id)
            .await
            .map_err(|e| format!("Failed to remove watch: {}", e))?;
        if removed {
            Ok(format!("🗑️  Watch {} removed", id))
        } else {
            Err(format!("Watch not found: {}", id))
        }
    }

    async fn handle_watch_list(&self) -> Result<String, String> {
        let watches = self.engine.watches().await;
        if watches.is_empty() {
            return Ok("No watch expressions".to_string());
        }
        pretty(&watches)
    }

    async fn handle_watch_refresh(&self) -> Result<String, String> {
        let watches = self
            .engine
            .refresh_watches()
            .await
            .map_err(|e| format!("Failed to refresh watches: {}", e))?;
        pretty(&watches)
    }

    // Events

    async fn handle_events_poll(&self, args: Value) -> Result<String, String> {
        let limit = args
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_POLL_LIMIT);
        let events = self.events.poll(limit).await;
        pretty(&events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsdebug_engine::EngineConfig;

    fn handler() -> RequestHandler {
        let config = EngineConfig {
            step_delay_ms: 5,
            ..EngineConfig::default()
        };
        RequestHandler::new(ExecutionEngine::new(config))
    }

    async fn call(handler: &RequestHandler, name: &str, arguments: Value) -> (String, bool) {
        let value = handler
            .handle_call_tool(Some(json!({"name": name, "arguments": arguments})))
            .await
            .unwrap();
        let text = value["content"][0]["text"].as_str().unwrap().to_string();
        let is_error = value["isError"].as_bool().unwrap_or(false);
        (text, is_error)
    }

    #[tokio::test]
    async fn test_initialize() {
        let handler = handler();
        let response = handler
            .handle_request(JsonRpcRequest {
                jsonrpc: "2.0".to_string(),
                id: json!(1),
                method: "initialize".to_string(),
                params: Some(json!({"protocolVersion": PROTOCOL_VERSION})),
            })
            .await;

        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "jsdebug-mcp");
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let handler = handler();
        let response = handler
            .handle_request(JsonRpcRequest {
                jsonrpc: "2.0".to_string(),
                id: json!(2),
                method: "resources/list".to_string(),
                params: None,
            })
            .await;
        assert_eq!(response.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_every_listed_tool_routes() {
        let handler = handler();
        for tool in tools::get_tools() {
            let (text, _) = call(&handler, &tool.name, json!({})).await;
            assert!(!text.starts_with("Unknown tool"), "{} is not routed", tool.name);
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error() {
        let handler = handler();
        let (text, is_error) = call(&handler, "debug.attach", json!({})).await;
        assert!(is_error);
        assert!(text.contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_execute_reports_value_and_console() {
        let handler = handler();
        let (text, is_error) = call(
            &handler,
            "run.execute",
            json!({"code": "console.log('hi'); 6 * 7"}),
        )
        .await;
        assert!(!is_error, "{}", text);
        assert!(text.contains("42"));
        assert!(text.contains("[log] hi"));
    }

    #[tokio::test]
    async fn test_breakpoint_then_launch_pauses() {
        let handler = handler();
        let (_, is_error) = call(
            &handler,
            "debug.set_breakpoint",
            json!({"file_name": "main.js", "line": 2}),
        )
        .await;
        assert!(!is_error);

        let (text, is_error) = call(
            &handler,
            "debug.launch",
            json!({"code": "let a = 1;\nlet b = a + 1;\nlet c = b * 2;", "file_name": "main.js"}),
        )
        .await;
        assert!(!is_error, "{}", text);
        assert!(text.contains("Paused at main.js:2"));

        let (text, _) = call(&handler, "debug.evaluate", json!({"expression": "a"})).await;
        assert_eq!(text, "1");

        let (text, is_error) = call(&handler, "debug.stop", json!({})).await;
        assert!(!is_error);
        assert!(text.contains("stopped"));
    }

    #[tokio::test]
    async fn test_step_while_stopped_is_error() {
        let handler = handler();
        let (_, is_error) = call(&handler, "debug.step_over", json!({})).await;
        assert!(is_error);
    }

    #[tokio::test]
    async fn test_missing_argument_is_error() {
        let handler = handler();
        let (text, is_error) = call(&handler, "debug.set_breakpoint", json!({"line": 3})).await;
        assert!(is_error);
        assert!(text.contains("file_name"));
    }
}
