//! Command dispatcher: method → handler routing.
//!
//! Routing order is deterministic: local `wait`, GUI-capability methods
//! (proxied to the helper), filesystem/shell/system/machine/terminal maps,
//! `tools/call` recursion, `tools/list`, health, unknown. Handlers accept
//! both `snake_case` and `camelCase` parameter names on ingress.
//!
//! Every failure becomes a JSON error object — no panic and no stack trace
//! ever crosses the wire.

pub mod catalog;
pub mod gui;

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::ShellConfig;
use crate::creds::CredentialStore;
use crate::shell::process::ExecError;
use crate::shell::SessionManager;
use crate::tools::filter::CommandFilter;
use crate::tools::system::{self, UnlockState};
use crate::tools::{filter, fs};
use gui::GuiProxy;

/// Routes server-issued method calls to tool handlers.
pub struct Dispatcher {
    sessions: SessionManager,
    filter: Arc<CommandFilter>,
    creds: Arc<CredentialStore>,
    unlock: Arc<UnlockState>,
    gui: Arc<dyn GuiProxy>,
    shell_defaults: ShellConfig,
    agent_version: String,
}

/// Parameter lookup that accepts `snake_case` and the matching `camelCase`.
fn param<'a>(params: &'a Value, snake: &str) -> Option<&'a Value> {
    if let Some(v) = params.get(snake) {
        return Some(v);
    }
    let camel = snake_to_camel(snake);
    if camel != snake {
        return params.get(&camel);
    }
    None
}

fn snake_to_camel(snake: &str) -> String {
    let mut out = String::with_capacity(snake.len());
    let mut upper_next = false;
    for c in snake.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn str_param<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    param(params, key).and_then(Value::as_str)
}

fn u64_param(params: &Value, key: &str) -> Option<u64> {
    param(params, key).and_then(Value::as_u64)
}

fn i64_param(params: &Value, key: &str) -> Option<i64> {
    param(params, key).and_then(Value::as_i64)
}

fn bool_param(params: &Value, key: &str) -> Option<bool> {
    param(params, key).and_then(Value::as_bool)
}

fn error_response(message: impl Into<String>) -> Value {
    json!({"error": message.into()})
}

/// Canonical name for the aliases the original protocol accumulated.
fn canonical_method(method: &str) -> &str {
    match method {
        "listDirectory" => "fs_list",
        "readFile" => "fs_read",
        "writeFile" => "fs_write",
        "deleteFile" => "fs_delete",
        "moveFile" => "fs_move",
        "executeCommand" => "shell_exec",
        "unlockMachine" => "machine_unlock",
        "lockMachine" => "machine_lock",
        "getMachineInfo" => "machine_info",
        other => other,
    }
}

impl Dispatcher {
    pub fn new(
        sessions: SessionManager,
        filter: Arc<CommandFilter>,
        creds: Arc<CredentialStore>,
        unlock: Arc<UnlockState>,
        gui: Arc<dyn GuiProxy>,
        shell_defaults: ShellConfig,
        agent_version: String,
    ) -> Self {
        Self {
            sessions,
            filter,
            creds,
            unlock,
            gui,
            shell_defaults,
            agent_version,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn gui(&self) -> Arc<dyn GuiProxy> {
        Arc::clone(&self.gui)
    }

    pub fn command_filter(&self) -> &CommandFilter {
        &self.filter
    }

    /// Dispatch one method call. Always returns a JSON value; failures are
    /// `{"error": …}` or `{"success": false, …}` objects.
    pub async fn dispatch(&self, method: &str, params: &Value) -> Value {
        info!("Dispatching command: {method}");
        let method = canonical_method(method);

        // Local even though the GUI list advertises it, so headless hosts
        // can still pace their scripts.
        if method == "wait" {
            return system::wait(u64_param(params, "milliseconds").unwrap_or(0)).await;
        }

        if catalog::is_gui_method(method) {
            return match self.gui.call(method, params.clone()).await {
                Ok(result) => result,
                Err(message) => {
                    warn!("GUI proxy not available for: {method}");
                    error_response(message)
                }
            };
        }

        match method {
            // Filesystem
            "fs_list" => self.fs_list(params),
            "fs_read" => fs::read(
                str_param(params, "path").unwrap_or(""),
                u64_param(params, "max_bytes"),
            ),
            "fs_read_range" => fs::read_range(
                str_param(params, "path").unwrap_or(""),
                i64_param(params, "start_line").unwrap_or(1),
                i64_param(params, "end_line").unwrap_or(-1),
            ),
            "fs_write" => fs::write(
                str_param(params, "path").unwrap_or(""),
                str_param(params, "content").unwrap_or(""),
                str_param(params, "mode").unwrap_or("overwrite"),
                bool_param(params, "create_directories").unwrap_or(false),
            ),
            "fs_delete" => fs::delete(
                str_param(params, "path").unwrap_or(""),
                bool_param(params, "recursive").unwrap_or(false),
            ),
            "fs_move" => fs::move_path(
                str_param(params, "source").unwrap_or(""),
                str_param(params, "destination").unwrap_or(""),
            ),
            "fs_search" => fs::search(
                str_param(params, "path").unwrap_or(""),
                str_param(params, "pattern").unwrap_or("*"),
                u64_param(params, "max_results").unwrap_or(100) as usize,
            ),
            "fs_grep" => fs::grep(
                str_param(params, "path").unwrap_or(""),
                str_param(params, "pattern").unwrap_or(""),
                str_param(params, "glob"),
                u64_param(params, "max_matches").unwrap_or(100) as usize,
            ),
            "fs_patch" => {
                let empty = Vec::new();
                let ops = param(params, "operations")
                    .and_then(Value::as_array)
                    .unwrap_or(&empty);
                fs::patch(
                    str_param(params, "path").unwrap_or(""),
                    ops,
                    bool_param(params, "dry_run").unwrap_or(false),
                )
            }

            // Shell
            "shell_exec" => self.shell_exec(params).await,
            "shell_start_session" => self.shell_start_session(params).await,
            "shell_send_input" => self.shell_send_input(params).await,
            "shell_read_output" => self.shell_read_output(params).await,
            "shell_stop_session" => self.shell_stop_session(params).await,
            "shell_list_sessions" => self.shell_list_sessions().await,

            // Terminal shim over the shell session manager
            "terminal_start" => self.terminal_start(params).await,
            "terminal_input" => self.terminal_input(params).await,
            "terminal_output" => self.terminal_output(params).await,
            "terminal_stop" => self.terminal_stop(params).await,
            "terminal_resize" => self.terminal_resize(params).await,

            // System
            "system_info" => system::system_info(),
            "clipboard_read" => system::clipboard_read().await,
            "clipboard_write" => {
                system::clipboard_write(str_param(params, "text").unwrap_or("")).await
            }

            // Machine control
            "machine_lock" => system::machine_lock().await,
            "machine_unlock" => {
                system::machine_unlock(
                    str_param(params, "username"),
                    str_param(params, "password"),
                    &self.creds,
                    &self.unlock,
                )
                .await
            }
            "machine_info" => system::machine_info(&self.agent_version),

            // Tools discovery and MCP-style invocation
            "tools/list" => {
                let browser_available = self.gui.probe_browser_bridge().await;
                catalog::tools_list(browser_available)
            }
            "tools/call" => {
                let name = str_param(params, "name").unwrap_or("");
                if name.is_empty() {
                    return error_response("Missing 'name' in tools/call params");
                }
                let arguments = param(params, "arguments")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                info!("tools/call dispatching to: {name}");
                Box::pin(self.dispatch(name, &arguments)).await
            }

            "health" | "ping" => json!({"status": "ok", "service": true}),

            other => {
                warn!("Unknown method: {other}");
                error_response(format!("Unknown method: {other}"))
            }
        }
    }

    fn fs_list(&self, params: &Value) -> Value {
        fs::list(
            str_param(params, "path").unwrap_or(""),
            bool_param(params, "recursive").unwrap_or(false),
            u64_param(params, "max_depth").unwrap_or(1) as u32,
        )
    }

    fn check_command(&self, command: &str) -> Option<Value> {
        let filter::FilterDecision { allowed, reason } = self.filter.check(command);
        if allowed {
            None
        } else {
            Some(json!({
                "success": false,
                "error": reason.unwrap_or_else(|| "Command blocked by security policy".to_string()),
            }))
        }
    }

    async fn shell_exec(&self, params: &Value) -> Value {
        let command = str_param(params, "command").unwrap_or("");
        if command.is_empty() {
            return json!({"success": false, "error": "Command is required"});
        }
        if let Some(blocked) = self.check_command(command) {
            return blocked;
        }

        let cwd = str_param(params, "cwd")
            .filter(|c| !c.is_empty())
            .map(ToString::to_string)
            .or_else(|| {
                let d = &self.shell_defaults.default_working_dir;
                (!d.is_empty()).then(|| d.clone())
            });
        let timeout = u64_param(params, "timeout_seconds")
            .unwrap_or(self.shell_defaults.exec_timeout_seconds);

        match crate::shell::process::exec_command(command, cwd.as_deref(), timeout, None).await {
            Ok(result) => json!({
                "success": true,
                "stdout": result.stdout,
                "stderr": result.stderr,
                "exit_code": result.exit_code,
                "command": command,
            }),
            Err(ExecError::Timeout { stdout, stderr }) => json!({
                "success": false,
                "error": "Command timed out",
                "timeout": timeout,
                "stdout": stdout,
                "stderr": stderr,
            }),
            Err(e) => json!({"success": false, "error": e.to_string()}),
        }
    }

    async fn shell_start_session(&self, params: &Value) -> Value {
        let command = str_param(params, "command").unwrap_or("");
        if !command.is_empty() {
            if let Some(blocked) = self.check_command(command) {
                return blocked;
            }
        }
        let cwd = str_param(params, "cwd").filter(|c| !c.is_empty());
        match self.sessions.start_session(command, cwd).await {
            Ok((session_id, pid)) => {
                json!({"success": true, "session_id": session_id, "pid": pid})
            }
            Err(e) => json!({"success": false, "error": e}),
        }
    }

    async fn shell_send_input(&self, params: &Value) -> Value {
        let session_id = str_param(params, "session_id").unwrap_or("");
        let input = str_param(params, "input").unwrap_or("");
        match self.sessions.send_input(session_id, input).await {
            Ok(bytes) => json!({
                "success": true,
                "session_id": session_id,
                "bytes_written": bytes,
            }),
            Err(e) => json!({"success": false, "error": e}),
        }
    }

    async fn shell_read_output(&self, params: &Value) -> Value {
        let session_id = str_param(params, "session_id").unwrap_or("");
        match self.sessions.read_output(session_id).await {
            Ok((stdout, stderr)) => json!({
                "success": true,
                "session_id": session_id,
                "stdout": stdout,
                "stderr": stderr,
            }),
            Err(e) => json!({"success": false, "error": e}),
        }
    }

    async fn shell_stop_session(&self, params: &Value) -> Value {
        let session_id = str_param(params, "session_id").unwrap_or("");
        let signal = str_param(params, "signal").unwrap_or("TERM");
        match self.sessions.stop_session(session_id, signal).await {
            Ok(()) => json!({
                "success": true,
                "session_id": session_id,
                "signal": signal,
            }),
            Err(e) => json!({"success": false, "error": e}),
        }
    }

    async fn shell_list_sessions(&self) -> Value {
        let sessions = self.sessions.list_sessions().await;
        json!({"success": true, "count": sessions.len(), "sessions": sessions})
    }

    async fn terminal_start(&self, params: &Value) -> Value {
        let shell = str_param(params, "shell").unwrap_or("/bin/bash");
        let shim = json!({
            "command": shell,
            "cwd": str_param(params, "cwd").unwrap_or(""),
        });
        let result = self.shell_start_session(&shim).await;
        if result["success"].as_bool().unwrap_or(false) {
            json!({
                "success": true,
                "sessionId": result["session_id"],
                "pid": result["pid"],
            })
        } else {
            result
        }
    }

    async fn terminal_input(&self, params: &Value) -> Value {
        let shim = json!({
            "session_id": str_param(params, "session_id").unwrap_or(""),
            "input": str_param(params, "data").unwrap_or(""),
        });
        self.shell_send_input(&shim).await
    }

    async fn terminal_output(&self, params: &Value) -> Value {
        let session_id = str_param(params, "session_id").unwrap_or("").to_string();
        let shim = json!({"session_id": session_id});
        let result = self.shell_read_output(&shim).await;
        if result["success"].as_bool().unwrap_or(false) {
            let stdout = result["stdout"].as_str().unwrap_or("");
            let stderr = result["stderr"].as_str().unwrap_or("");
            json!({
                "success": true,
                "sessionId": session_id,
                "data": format!("{stdout}{stderr}"),
            })
        } else {
            result
        }
    }

    async fn terminal_stop(&self, params: &Value) -> Value {
        let shim = json!({"session_id": str_param(params, "session_id").unwrap_or("")});
        self.shell_stop_session(&shim).await
    }

    /// Best-effort resize for PTY sessions; the shim reports success either
    /// way so web terminals don't error on pipe-backed sessions.
    async fn terminal_resize(&self, params: &Value) -> Value {
        let session_id = str_param(params, "session_id").unwrap_or("");
        let rows = u64_param(params, "rows").unwrap_or(0) as u16;
        let cols = u64_param(params, "cols").unwrap_or(0) as u16;
        if !session_id.is_empty() && rows > 0 && cols > 0 {
            let _ = self.sessions.resize_session(session_id, rows, cols).await;
        }
        json!({"success": true})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::gui::GUI_UNAVAILABLE;

    struct NoGui;

    #[async_trait::async_trait]
    impl GuiProxy for NoGui {
        async fn call(&self, _method: &str, _params: Value) -> Result<Value, String> {
            Err(GUI_UNAVAILABLE.to_string())
        }
        async fn probe_browser_bridge(&self) -> bool {
            false
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            SessionManager::new(),
            Arc::new(CommandFilter::default()),
            Arc::new(CredentialStore::with_service("screencontrol-test")),
            Arc::new(UnlockState::default()),
            Arc::new(NoGui),
            ShellConfig::default(),
            "0.0.0-test".to_string(),
        )
    }

    #[test]
    fn snake_to_camel_conversion() {
        assert_eq!(snake_to_camel("session_id"), "sessionId");
        assert_eq!(snake_to_camel("max_depth"), "maxDepth");
        assert_eq!(snake_to_camel("path"), "path");
    }

    #[test]
    fn params_accept_both_casings() {
        let snake = json!({"session_id": "s1"});
        let camel = json!({"sessionId": "s1"});
        assert_eq!(str_param(&snake, "session_id"), Some("s1"));
        assert_eq!(str_param(&camel, "session_id"), Some("s1"));
    }

    #[tokio::test]
    async fn unknown_method_is_an_error() {
        let d = dispatcher();
        let v = d.dispatch("no_such_method", &json!({})).await;
        assert_eq!(v["error"], "Unknown method: no_such_method");
    }

    #[tokio::test]
    async fn gui_methods_fail_cleanly_without_helper() {
        let d = dispatcher();
        let v = d.dispatch("screenshot", &json!({})).await;
        assert_eq!(v["error"], GUI_UNAVAILABLE);
        let v = d.dispatch("browser_getTabs", &json!({})).await;
        assert_eq!(v["error"], GUI_UNAVAILABLE);
    }

    #[tokio::test]
    async fn wait_is_handled_locally() {
        let d = dispatcher();
        let v = d.dispatch("wait", &json!({"milliseconds": 5})).await;
        assert_eq!(v["success"], true);
        assert_eq!(v["waited_ms"], 5);
    }

    #[tokio::test]
    async fn aliases_route_to_canonical_handlers() {
        let d = dispatcher();
        let v = d.dispatch("executeCommand", &json!({"command": "echo aliased"})).await;
        assert_eq!(v["success"], true);
        assert_eq!(v["stdout"], "aliased\n");
    }

    #[tokio::test]
    async fn shell_exec_round_trip() {
        let d = dispatcher();
        let v = d
            .dispatch("shell_exec", &json!({"command": "echo out; echo err >&2"}))
            .await;
        assert_eq!(v["success"], true);
        assert_eq!(v["stdout"], "out\n");
        assert_eq!(v["stderr"], "err\n");
        assert_eq!(v["exit_code"], 0);
        assert_eq!(v["command"], "echo out; echo err >&2");
    }

    #[tokio::test]
    async fn blocked_commands_never_run() {
        let d = dispatcher();
        let v = d.dispatch("shell_exec", &json!({"command": "rm -rf /"})).await;
        assert_eq!(v["success"], false);
        assert_eq!(v["error"], "Command blocked by security policy");
    }

    #[tokio::test]
    async fn tools_call_recurses() {
        let d = dispatcher();
        let v = d
            .dispatch(
                "tools/call",
                &json!({"name": "shell_exec", "arguments": {"command": "echo nested"}}),
            )
            .await;
        assert_eq!(v["stdout"], "nested\n");

        let missing = d.dispatch("tools/call", &json!({})).await;
        assert_eq!(missing["error"], "Missing 'name' in tools/call params");
    }

    #[tokio::test]
    async fn tools_list_without_bridge_omits_browser_tools() {
        let d = dispatcher();
        let v = d.dispatch("tools/list", &json!({})).await;
        let tools = v["tools"].as_array().unwrap();
        assert!(!tools.is_empty());
        assert!(tools
            .iter()
            .all(|t| !t["name"].as_str().unwrap().starts_with("browser_")));
    }

    #[tokio::test]
    async fn terminal_shim_maps_fields() {
        let d = dispatcher();
        let started = d.dispatch("terminal_start", &json!({"shell": "sh"})).await;
        assert_eq!(started["success"], true);
        let sid = started["sessionId"].as_str().unwrap().to_string();
        assert!(sid.starts_with("session_"));

        let sent = d
            .dispatch("terminal_input", &json!({"sessionId": sid, "data": "echo shim\n"}))
            .await;
        assert_eq!(sent["success"], true);

        // data concatenates stdout + stderr
        let mut data = String::new();
        for _ in 0..40 {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            let out = d
                .dispatch("terminal_output", &json!({"sessionId": sid}))
                .await;
            assert_eq!(out["success"], true);
            data.push_str(out["data"].as_str().unwrap());
            if data.contains("shim") {
                break;
            }
        }
        assert!(data.contains("shim"));

        let resized = d
            .dispatch(
                "terminal_resize",
                &json!({"sessionId": sid, "rows": 50, "cols": 120}),
            )
            .await;
        assert_eq!(resized, json!({"success": true}));

        let stopped = d.dispatch("terminal_stop", &json!({"sessionId": sid})).await;
        assert_eq!(stopped["success"], true);

        let gone = d
            .dispatch("terminal_output", &json!({"sessionId": sid}))
            .await;
        assert_eq!(gone["success"], false);
    }

    #[tokio::test]
    async fn health_and_ping_answer() {
        let d = dispatcher();
        for m in ["health", "ping"] {
            let v = d.dispatch(m, &json!({})).await;
            assert_eq!(v["status"], "ok");
            assert_eq!(v["service"], true);
        }
    }

    #[tokio::test]
    async fn system_info_via_dispatch_has_platform() {
        let d = dispatcher();
        let v = d.dispatch("system_info", &json!({})).await;
        assert_eq!(v["platform"], crate::identity::platform_tag());
    }
}
