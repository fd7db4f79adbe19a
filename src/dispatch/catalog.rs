//! Tool advertisement for `tools/list`.
//!
//! The catalogue is fixed per category; browser tools appear only when the
//! browser bridge answers a liveness probe, checked fresh on every call.

use serde_json::{json, Map, Value};

/// The GUI-capability methods the dispatcher forwards to the helper. The
/// browser_* family is matched by prefix, not listed here.
pub const GUI_METHODS: &[&str] = &[
    "screenshot",
    "screenshot_app",
    "screenshot_grid",
    "desktop_screenshot",
    "click",
    "click_absolute",
    "click_relative",
    "click_grid",
    "mouse_click",
    "doubleClick",
    "clickElement",
    "moveMouse",
    "mouse_move",
    "scroll",
    "scrollMouse",
    "mouse_scroll",
    "drag",
    "mouse_drag",
    "typeText",
    "keyboard_type",
    "pressKey",
    "keyboard_press",
    "keyboard_shortcut",
    "getClickableElements",
    "getUIElements",
    "getMousePosition",
    "analyzeWithOCR",
    "listApplications",
    "focusApplication",
    "launchApplication",
    "app_launch",
    "closeApp",
    "app_quit",
    "window_list",
    "window_focus",
    "window_move",
    "window_resize",
    "checkPermissions",
];

/// Is `method` handled by the GUI helper?
pub fn is_gui_method(method: &str) -> bool {
    GUI_METHODS.contains(&method) || method.starts_with("browser_")
}

fn tool(name: &str, description: &str, properties: Value, required: &[&str]) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": {
            "type": "object",
            "properties": properties,
            "required": required,
        }
    })
}

fn string_prop(description: &str) -> Value {
    json!({"type": "string", "description": description})
}

fn number_prop(description: &str) -> Value {
    json!({"type": "number", "description": description})
}

fn bool_prop(description: &str) -> Value {
    json!({"type": "boolean", "description": description})
}

fn with_agent_id(mut props: Map<String, Value>) -> Value {
    props.insert(
        "agentId".to_string(),
        string_prop("Target agent ID (optional)"),
    );
    Value::Object(props)
}

fn props(entries: &[(&str, Value)]) -> Value {
    let mut map = Map::new();
    for (k, v) in entries {
        map.insert((*k).to_string(), v.clone());
    }
    with_agent_id(map)
}

/// Browser tools that take only the common `browser` parameter.
const SIMPLE_BROWSER_TOOLS: &[(&str, &str)] = &[
    ("browser_listConnected", "List connected browsers"),
    ("browser_setDefaultBrowser", "Set the default browser for browser operations"),
    ("browser_getTabs", "Get list of open tabs"),
    ("browser_getActiveTab", "Get the active tab"),
    ("browser_getPageInfo", "Get page information"),
    ("browser_inspectCurrentPage", "Inspect the current page"),
    ("browser_getPageContext", "Get page context"),
    ("browser_fillFormField", "Fill a form field"),
    ("browser_fillWithFallback", "Fill with fallback"),
    ("browser_fillFormNative", "Fill form using native input"),
    ("browser_scrollTo", "Scroll to position"),
    ("browser_getFormData", "Get form data"),
    ("browser_setWatchMode", "Set watch mode"),
    ("browser_waitForSelector", "Wait for a selector to appear"),
    ("browser_waitForPageLoad", "Wait for page to load"),
    ("browser_selectOption", "Select an option from dropdown"),
    ("browser_isElementVisible", "Check if element is visible"),
    ("browser_getConsoleLogs", "Get console logs"),
    ("browser_getNetworkRequests", "Get network requests"),
    ("browser_getLocalStorage", "Get local storage"),
    ("browser_getCookies", "Get cookies"),
    ("browser_clickByText", "Click element by text"),
    ("browser_clickMultiple", "Click multiple elements"),
    ("browser_getFormStructure", "Get form structure"),
    ("browser_answerQuestions", "Answer questions on forms"),
    ("browser_getDropdownOptions", "Get dropdown options"),
    ("browser_openDropdownNative", "Open dropdown using native controls"),
    ("browser_clickElementWithDebug", "Click element with debug info"),
    ("browser_findElementWithDebug", "Find element with debug info"),
    ("browser_findTabByUrl", "Find tab by URL"),
    ("browser_go_back", "Navigate back"),
    ("browser_go_forward", "Navigate forward"),
    ("browser_get_visible_html", "Get page HTML"),
    ("browser_hover", "Hover over element"),
    ("browser_drag", "Drag element"),
    ("browser_press_key", "Press key in browser"),
    ("browser_upload_file", "Upload file"),
    ("browser_save_as_pdf", "Save page as PDF"),
];

/// Build the advertised catalogue. `browser_available` comes from the
/// per-call bridge probe.
pub fn tools_list(browser_available: bool) -> Value {
    let mut tools = Vec::new();

    // Application management
    tools.push(tool("listApplications", "List running applications", props(&[]), &[]));
    tools.push(tool(
        "focusApplication",
        "Focus an application",
        props(&[("identifier", string_prop("App bundle ID or name"))]),
        &["identifier"],
    ));
    tools.push(tool(
        "launchApplication",
        "Launch an application",
        props(&[("identifier", string_prop("App bundle ID or name"))]),
        &["identifier"],
    ));
    tools.push(tool(
        "closeApp",
        "Close an application",
        props(&[
            ("identifier", string_prop("App bundle ID or name")),
            ("force", bool_prop("Force quit the app")),
        ]),
        &["identifier"],
    ));

    // Mouse
    let click_props = props(&[
        ("x", number_prop("X coordinate")),
        ("y", number_prop("Y coordinate")),
        ("button", json!({"type": "string", "enum": ["left", "right"], "description": "Mouse button"})),
    ]);
    tools.push(tool("click", "Click at coordinates relative to current app", click_props.clone(), &["x", "y"]));
    tools.push(tool("click_absolute", "Click at absolute screen coordinates", click_props.clone(), &["x", "y"]));
    tools.push(tool("click_relative", "Click at coordinates relative to active window", click_props, &["x", "y"]));
    tools.push(tool(
        "click_grid",
        "Click at a grid cell position (e.g., cell='E7')",
        props(&[
            ("cell", string_prop("Grid cell reference (e.g., 'E7', 'A1', 'T15')")),
            ("column", number_prop("Column number (1-20), alternative to cell")),
            ("row", number_prop("Row number (1-15), alternative to cell")),
            ("element_text", string_prop("Text to search for in detected elements")),
            ("offset_x", number_prop("Horizontal offset in pixels")),
            ("offset_y", number_prop("Vertical offset in pixels")),
        ]),
        &[],
    ));
    tools.push(tool(
        "doubleClick",
        "Double-click at coordinates",
        props(&[("x", number_prop("X coordinate")), ("y", number_prop("Y coordinate"))]),
        &["x", "y"],
    ));
    tools.push(tool(
        "clickElement",
        "Click a UI element by index",
        props(&[("elementIndex", number_prop("Index of element to click"))]),
        &["elementIndex"],
    ));
    tools.push(tool(
        "moveMouse",
        "Move mouse to coordinates",
        props(&[("x", number_prop("X coordinate")), ("y", number_prop("Y coordinate"))]),
        &["x", "y"],
    ));
    tools.push(tool(
        "scroll",
        "Scroll with delta values",
        props(&[
            ("deltaX", number_prop("Horizontal scroll amount")),
            ("deltaY", number_prop("Vertical scroll amount")),
            ("x", number_prop("X coordinate (optional)")),
            ("y", number_prop("Y coordinate (optional)")),
        ]),
        &[],
    ));
    tools.push(tool(
        "scrollMouse",
        "Scroll up or down",
        props(&[
            ("direction", json!({"type": "string", "enum": ["up", "down"], "description": "Scroll direction"})),
            ("amount", number_prop("Scroll amount (default: 3)")),
        ]),
        &["direction"],
    ));
    tools.push(tool(
        "drag",
        "Drag from one point to another",
        props(&[
            ("startX", number_prop("Start X")),
            ("startY", number_prop("Start Y")),
            ("endX", number_prop("End X")),
            ("endY", number_prop("End Y")),
        ]),
        &["startX", "startY", "endX", "endY"],
    ));

    // UI inspection
    tools.push(tool("getClickableElements", "Get list of clickable UI elements", props(&[]), &[]));
    tools.push(tool("getUIElements", "Get all UI elements", props(&[]), &[]));
    tools.push(tool("getMousePosition", "Get current mouse position", props(&[]), &[]));

    // Keyboard
    tools.push(tool(
        "typeText",
        "Type text using keyboard",
        props(&[("text", string_prop("Text to type"))]),
        &["text"],
    ));
    tools.push(tool(
        "pressKey",
        "Press a specific key",
        props(&[("key", string_prop("Key to press (e.g., 'enter', 'tab', 'escape')"))]),
        &["key"],
    ));

    // System
    tools.push(tool("checkPermissions", "Check accessibility permissions", props(&[]), &[]));
    tools.push(tool(
        "wait",
        "Wait for specified milliseconds",
        props(&[("milliseconds", number_prop("Time to wait in milliseconds"))]),
        &[],
    ));
    tools.push(tool(
        "system_info",
        "Get system information (OS, CPU, memory, hostname)",
        props(&[]),
        &[],
    ));
    tools.push(tool("window_list", "List all open windows on the desktop", props(&[]), &[]));
    tools.push(tool("clipboard_read", "Read content from clipboard", props(&[]), &[]));
    tools.push(tool(
        "clipboard_write",
        "Write content to clipboard",
        props(&[("text", string_prop("Text to copy to clipboard"))]),
        &["text"],
    ));

    // Machine control — only advertised where an unlock path exists.
    #[cfg(target_os = "windows")]
    {
        tools.push(tool("machine_lock", "Lock the workstation screen", props(&[]), &[]));
        tools.push(tool(
            "machine_unlock",
            "Unlock the workstation using stored credentials. Requires credentials to be \
             stored first via the credential provider.",
            props(&[]),
            &[],
        ));
    }

    // Filesystem
    tools.push(tool(
        "fs_list",
        "List directory contents",
        props(&[
            ("path", string_prop("Directory path")),
            ("recursive", bool_prop("List recursively")),
            ("max_depth", number_prop("Max recursion depth")),
        ]),
        &["path"],
    ));
    tools.push(tool(
        "fs_read",
        "Read file contents",
        props(&[
            ("path", string_prop("File path")),
            ("max_bytes", number_prop("Maximum bytes to read")),
        ]),
        &["path"],
    ));
    tools.push(tool(
        "fs_read_range",
        "Read specific line range from file",
        props(&[
            ("path", string_prop("File path")),
            ("start_line", number_prop("Start line (1-indexed)")),
            ("end_line", number_prop("End line (-1 for EOF)")),
        ]),
        &["path"],
    ));
    tools.push(tool(
        "fs_write",
        "Write content to file",
        props(&[
            ("path", string_prop("File path")),
            ("content", string_prop("Content to write")),
            ("mode", json!({"type": "string", "enum": ["overwrite", "append"]})),
            ("create_directories", bool_prop("Create parent directories")),
        ]),
        &["path", "content"],
    ));
    tools.push(tool(
        "fs_delete",
        "Delete file or directory",
        props(&[
            ("path", string_prop("Path to delete")),
            ("recursive", bool_prop("Delete recursively")),
        ]),
        &["path"],
    ));
    tools.push(tool(
        "fs_move",
        "Move or rename files",
        props(&[
            ("source", string_prop("Source path")),
            ("destination", string_prop("Destination path")),
        ]),
        &["source", "destination"],
    ));
    tools.push(tool(
        "fs_search",
        "Search files by glob pattern",
        props(&[
            ("path", string_prop("Base path")),
            ("pattern", string_prop("Glob pattern (e.g., *.txt)")),
            ("max_results", number_prop("Maximum results")),
        ]),
        &["path", "pattern"],
    ));
    tools.push(tool(
        "fs_grep",
        "Search file contents with regex",
        props(&[
            ("path", string_prop("Base path")),
            ("pattern", string_prop("Regex pattern")),
            ("glob", string_prop("File glob filter")),
            ("max_matches", number_prop("Maximum matches")),
        ]),
        &["path", "pattern"],
    ));
    tools.push(tool(
        "fs_patch",
        "Apply patches to files",
        props(&[
            ("path", string_prop("File path")),
            ("operations", json!({"type": "array", "description": "Patch operations"})),
            ("dry_run", bool_prop("Preview without applying")),
        ]),
        &["path", "operations"],
    ));

    // Shell
    tools.push(tool(
        "shell_exec",
        "Execute a shell command",
        props(&[
            ("command", string_prop("Command to execute")),
            ("cwd", string_prop("Working directory")),
            ("timeout_seconds", number_prop("Timeout in seconds")),
        ]),
        &["command"],
    ));
    tools.push(tool(
        "shell_start_session",
        "Start an interactive shell session",
        props(&[
            ("command", string_prop("Initial command (optional)")),
            ("cwd", string_prop("Working directory")),
        ]),
        &[],
    ));
    tools.push(tool(
        "shell_send_input",
        "Send input to a shell session",
        props(&[
            ("session_id", string_prop("Session ID")),
            ("input", string_prop("Input to send")),
        ]),
        &["session_id", "input"],
    ));
    tools.push(tool(
        "shell_read_output",
        "Read output from a shell session",
        props(&[("session_id", string_prop("Session ID"))]),
        &["session_id"],
    ));
    tools.push(tool(
        "shell_stop_session",
        "Stop a shell session",
        props(&[
            ("session_id", string_prop("Session ID")),
            ("signal", string_prop("Signal to send (TERM, KILL)")),
        ]),
        &["session_id"],
    ));

    // Browser tools ride on the bridge probe.
    if browser_available {
        let browser = string_prop("Target browser (chrome, firefox, safari, edge)");
        let tab_id = number_prop("Tab ID");
        let url = string_prop("URL of tab to target");
        let selector = string_prop("CSS selector");

        for (name, description) in SIMPLE_BROWSER_TOOLS {
            tools.push(tool(name, description, props(&[("browser", browser.clone())]), &[]));
        }
        tools.push(tool(
            "browser_focusTab",
            "Focus a specific tab",
            props(&[("browser", browser.clone()), ("tabId", tab_id.clone())]),
            &[],
        ));
        tools.push(tool(
            "browser_createTab",
            "Create a new tab",
            props(&[("browser", browser.clone()), ("url", url.clone())]),
            &[],
        ));
        tools.push(tool(
            "browser_closeTab",
            "Close a tab",
            props(&[("browser", browser.clone()), ("tabId", tab_id.clone())]),
            &[],
        ));
        tools.push(tool(
            "browser_getInteractiveElements",
            "Get interactive elements on the page",
            props(&[
                ("browser", browser.clone()),
                ("url", url.clone()),
                ("tabId", tab_id.clone()),
                ("verbose", bool_prop("Return full element details")),
            ]),
            &[],
        ));
        tools.push(tool(
            "browser_listInteractiveElements",
            "List interactive elements",
            props(&[
                ("browser", browser.clone()),
                ("url", url.clone()),
                ("tabId", tab_id.clone()),
                ("verbose", bool_prop("Return full element details")),
            ]),
            &[],
        ));
        tools.push(tool(
            "browser_getUIElements",
            "Get UI elements",
            props(&[
                ("browser", browser.clone()),
                ("url", url.clone()),
                ("tabId", tab_id.clone()),
                ("verbose", bool_prop("Return full element details")),
            ]),
            &[],
        ));
        tools.push(tool(
            "browser_clickElement",
            "Click an element in the browser",
            props(&[
                ("browser", browser.clone()),
                ("selector", selector.clone()),
                ("url", url.clone()),
                ("tabId", tab_id.clone()),
                ("text", string_prop("Text content to find")),
            ]),
            &[],
        ));
        tools.push(tool(
            "browser_fillElement",
            "Fill a form field",
            props(&[
                ("browser", browser.clone()),
                ("selector", selector),
                ("url", url.clone()),
                ("tabId", tab_id.clone()),
                ("value", string_prop("Value to fill")),
            ]),
            &["selector", "value"],
        ));
        tools.push(tool(
            "browser_getVisibleText",
            "Get visible text from a tab",
            props(&[("browser", browser.clone()), ("url", url.clone()), ("tabId", tab_id.clone())]),
            &[],
        ));
        tools.push(tool(
            "browser_searchVisibleText",
            "Search for text in a tab",
            props(&[
                ("browser", browser.clone()),
                ("query", string_prop("Text to search for")),
                ("url", url),
                ("tabId", tab_id),
            ]),
            &[],
        ));
        tools.push(tool(
            "browser_executeScript",
            "Execute JavaScript in the browser",
            props(&[
                ("browser", browser.clone()),
                ("script", string_prop("JavaScript to execute")),
            ]),
            &[],
        ));
        tools.push(tool(
            "browser_navigate",
            "Navigate browser to a URL",
            props(&[
                ("browser", browser.clone()),
                ("url", string_prop("URL to navigate to")),
            ]),
            &["url"],
        ));
        tools.push(tool(
            "browser_screenshot",
            "Take a browser screenshot",
            props(&[
                ("browser", browser),
                ("format", json!({"type": "string", "enum": ["png", "jpeg"]})),
                ("return_base64", bool_prop("Return base64 instead of file path")),
            ]),
            &[],
        ));
    }

    json!({"tools": tools})
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(listing: &Value) -> Vec<String> {
        listing["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn gui_method_detection() {
        assert!(is_gui_method("screenshot"));
        assert!(is_gui_method("checkPermissions"));
        assert!(is_gui_method("browser_getTabs"));
        assert!(is_gui_method("browser_anything_new"));
        assert!(!is_gui_method("fs_read"));
        assert!(!is_gui_method("shell_exec"));
        assert!(!is_gui_method("wait"));
    }

    #[test]
    fn catalogue_has_core_tools_and_schemas() {
        let listing = tools_list(false);
        let names = names(&listing);
        for expected in [
            "fs_list",
            "fs_patch",
            "shell_exec",
            "shell_start_session",
            "clipboard_write",
            "wait",
            "click",
            "typeText",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
        // Every tool carries an object schema.
        for t in listing["tools"].as_array().unwrap() {
            assert_eq!(t["inputSchema"]["type"], "object", "{}", t["name"]);
            assert!(t["inputSchema"]["properties"].is_object());
            assert!(t["inputSchema"]["required"].is_array());
        }
    }

    #[test]
    fn browser_tools_ride_the_probe() {
        let without = names(&tools_list(false));
        assert!(!without.iter().any(|n| n.starts_with("browser_")));

        let with = names(&tools_list(true));
        assert!(with.contains(&"browser_getTabs".to_string()));
        assert!(with.contains(&"browser_navigate".to_string()));
        assert!(with.contains(&"browser_screenshot".to_string()));
        assert!(with.len() > without.len());
    }
}
