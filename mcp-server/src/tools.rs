// Debug tools schema definitions
//
// MCP tools for running and debugging JavaScript snippets

use crate::protocol::Tool;
use serde_json::{json, Value};

fn tool(name: &str, description: &str, input_schema: Value) -> Tool {
    Tool {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

fn no_args() -> Value {
    json!({
        "type": "object",
        "properties": {}
    })
}

pub fn get_tools() -> Vec<Tool> {
    vec![
        tool(
            "run.execute",
            "Run a JavaScript snippet in a fresh sandbox and return its value and console output",
            json!({
                "type": "object",
                "properties": {
                    "code": {
                        "type": "string",
                        "description": "JavaScript source"
                    },
                    "debug": {
                        "type": "boolean",
                        "description": "Run under the debugger (honours breakpoints)",
                        "default": false
                    },
                    "timeout_ms": {
                        "type": "integer",
                        "description": "Execution budget in milliseconds",
                        "default": 10000
                    },
                    "file_name": {
                        "type": "string",
                        "description": "File name breakpoints are matched against (debug runs)"
                    },
                    "stop_on_entry": {
                        "type": "boolean",
                        "description": "Pause on line 1 (debug runs)",
                        "default": false
                    }
                },
                "required": ["code"]
            }),
        ),
        tool("run.stop", "Cancel the running snippet and end the debug session", no_args()),
        tool("console.get", "Console output captured so far", no_args()),
        tool("console.clear", "Clear captured console output", no_args()),
        tool(
            "debug.start",
            "Start a debug session for a file (ends any active session)",
            json!({
                "type": "object",
                "properties": {
                    "file_name": {
                        "type": "string",
                        "description": "File being debugged (e.g., 'main.js')"
                    }
                },
                "required": ["file_name"]
            }),
        ),
        tool(
            "debug.launch",
            "Load code into the debug session and run until a breakpoint, the entry line, or completion",
            json!({
                "type": "object",
                "properties": {
                    "code": {
                        "type": "string",
                        "description": "JavaScript source"
                    },
                    "file_name": {
                        "type": "string",
                        "description": "File name (defaults to 'untitled.js')"
                    },
                    "stop_on_entry": {
                        "type": "boolean",
                        "description": "Pause on line 1",
                        "default": false
                    },
                    "timeout_ms": {
                        "type": "integer",
                        "description": "Budget for executing the program once the scan completes"
                    }
                },
                "required": ["code"]
            }),
        ),
        tool("debug.stop", "End the debug session (breakpoints and watches are kept)", no_args()),
        tool(
            "debug.set_breakpoint",
            "Set a breakpoint at a file and line, optionally with a condition",
            json!({
                "type": "object",
                "properties": {
                    "file_name": {
                        "type": "string",
                        "description": "File name (e.g., 'main.js')"
                    },
                    "line": {
                        "type": "integer",
                        "description": "1-based line number"
                    },
                    "condition": {
                        "type": "string",
                        "description": "Only pause when this expression is truthy"
                    }
                },
                "required": ["file_name", "line"]
            }),
        ),
        tool(
            "debug.toggle_breakpoint",
            "Remove the breakpoint at a file and line, or add one if there is none",
            json!({
                "type": "object",
                "properties": {
                    "file_name": { "type": "string" },
                    "line": { "type": "integer" }
                },
                "required": ["file_name", "line"]
            }),
        ),
        tool(
            "debug.remove_breakpoint",
            "Remove a breakpoint",
            json!({
                "type": "object",
                "properties": {
                    "breakpoint_id": {
                        "type": "string",
                        "description": "Breakpoint ID from list_breakpoints (e.g., 'main.js:4')"
                    }
                },
                "required": ["breakpoint_id"]
            }),
        ),
        tool(
            "debug.enable_breakpoint",
            "Flip a breakpoint between enabled and disabled",
            json!({
                "type": "object",
                "properties": {
                    "breakpoint_id": {
                        "type": "string",
                        "description": "Breakpoint ID from list_breakpoints"
                    }
                },
                "required": ["breakpoint_id"]
            }),
        ),
        tool(
            "debug.list_breakpoints",
            "List breakpoints",
            json!({
                "type": "object",
                "properties": {
                    "file_name": {
                        "type": "string",
                        "description": "Only breakpoints in this file"
                    }
                }
            }),
        ),
        tool("debug.clear_breakpoints", "Remove every breakpoint", no_args()),
        tool("debug.continue", "Resume a paused session", no_args()),
        tool("debug.step_over", "Run one line and pause again", no_args()),
        tool(
            "debug.step_into",
            "Step into the call on the current line (step over if there is none)",
            no_args(),
        ),
        tool("debug.step_out", "Leave the current frame and pause in the caller", no_args()),
        tool("debug.pause", "Pause the session at the current line", no_args()),
        tool("debug.get_stack", "Call stack of the paused session", no_args()),
        tool(
            "debug.select_frame",
            "Select a call stack frame",
            json!({
                "type": "object",
                "properties": {
                    "index": {
                        "type": "integer",
                        "description": "Frame index, 0 is innermost"
                    }
                },
                "required": ["index"]
            }),
        ),
        tool(
            "debug.evaluate",
            "Evaluate an expression against the captured variables",
            json!({
                "type": "object",
                "properties": {
                    "expression": {
                        "type": "string",
                        "description": "JavaScript expression"
                    }
                },
                "required": ["expression"]
            }),
        ),
        tool(
            "debug.set_variables",
            "Replace the base variables every capture and evaluation starts from",
            json!({
                "type": "object",
                "properties": {
                    "variables": {
                        "type": "object",
                        "description": "Name to JSON value"
                    }
                },
                "required": ["variables"]
            }),
        ),
        tool("debug.state", "Full execution snapshot", no_args()),
        tool(
            "watch.add",
            "Add a watch expression (evaluated immediately)",
            json!({
                "type": "object",
                "properties": {
                    "expression": { "type": "string" }
                },
                "required": ["expression"]
            }),
        ),
        tool(
            "watch.update",
            "Change a watch expression and re-evaluate it",
            json!({
                "type": "object",
                "properties": {
                    "watch_id": { "type": "string" },
                    "expression": { "type": "string" }
                },
                "required": ["watch_id", "expression"]
            }),
        ),
        tool(
            "watch.remove",
            "Remove a watch expression",
            json!({
                "type": "object",
                "properties": {
                    "watch_id": { "type": "string" }
                },
                "required": ["watch_id"]
            }),
        ),
        tool("watch.list", "List watch expressions with their last values", no_args()),
        tool("watch.refresh", "Re-evaluate every watch expression", no_args()),
        tool(
            "events.poll",
            "Engine events published since the last poll",
            json!({
                "type": "object",
                "properties": {
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of events",
                        "default": 100
                    }
                }
            }),
        ),
    ]
}
