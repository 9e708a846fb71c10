//! The tool catalog. Adding a tool is one table entry plus a handler
//! function; schemas, validation, listing and dispatch all walk this table.

use std::sync::OnceLock;

use serde_json::json;

use crate::schema::{ArgKind, ArgSpec};
use crate::tools::{self, Handler};

pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub args: Vec<ArgSpec>,
    pub timeout_ms: u64,
    /// When set, the dispatcher runs `ensure_connected` first. The small
    /// allow-list of lifecycle tools leaves this false.
    pub requires_browser: bool,
    pub advanced: bool,
    pub handler: Handler,
}

pub fn catalog() -> &'static [ToolSpec] {
    static CATALOG: OnceLock<Vec<ToolSpec>> = OnceLock::new();
    CATALOG.get_or_init(build).as_slice()
}

pub fn find(name: &str) -> Option<&'static ToolSpec> {
    catalog().iter().find(|spec| spec.name == name)
}

pub fn visible(advanced_enabled: bool) -> impl Iterator<Item = &'static ToolSpec> {
    catalog()
        .iter()
        .filter(move |spec| advanced_enabled || !spec.advanced)
}

fn target_arg() -> ArgSpec {
    ArgSpec::optional(
        "target_id",
        ArgKind::Str,
        "Page target id; defaults to the active tab.",
    )
}

fn build() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "status",
            description: "Connection state, counters and visibility flags of the control server.",
            args: vec![],
            timeout_ms: 5_000,
            requires_browser: false,
            advanced: false,
            handler: tools::browser::status,
        },
        ToolSpec {
            name: "launch_with_profile",
            description: "Launch Chromium against a shadow copy of a user profile (or attach to a \
                          real browser already on the port) and apply the stealth script.",
            args: vec![
                ArgSpec::with_default(
                    "profile",
                    ArgKind::Str,
                    json!("Default"),
                    "Profile directory name inside the user data dir.",
                ),
                ArgSpec::optional("chrome_path", ArgKind::Str, "Chromium executable override."),
                ArgSpec::optional(
                    "user_data_dir",
                    ArgKind::Str,
                    "Use this data dir verbatim instead of shadow-copying the default one.",
                ),
                ArgSpec::with_default(
                    "force",
                    ArgKind::Bool,
                    json!(false),
                    "Disconnect an existing instance first instead of foregrounding it.",
                ),
            ],
            timeout_ms: 60_000,
            requires_browser: false,
            advanced: false,
            handler: tools::browser::launch_with_profile,
        },
        ToolSpec {
            name: "close_browser",
            description: "Tear down the instance and terminate the managed browser process.",
            args: vec![],
            timeout_ms: 15_000,
            requires_browser: false,
            advanced: false,
            handler: tools::browser::close_browser,
        },
        ToolSpec {
            name: "enable_advanced_tools",
            description: "Toggle visibility of the advanced (interception/mock/capture) tools.",
            args: vec![ArgSpec::required(
                "enabled",
                ArgKind::Bool,
                "Whether advanced tools are listed.",
            )],
            timeout_ms: 5_000,
            requires_browser: false,
            advanced: false,
            handler: tools::browser::enable_advanced_tools,
        },
        ToolSpec {
            name: "browser_action",
            description: "Navigate and interact with the page: navigate, go_back, go_forward, \
                          reload, click, type_text, press_key, scroll, screenshot, evaluate, \
                          wait_for_selector.",
            args: vec![
                ArgSpec::required(
                    "action",
                    ArgKind::Enum(tools::navigation::ACTIONS),
                    "What to do.",
                ),
                ArgSpec::optional("url", ArgKind::Str, "URL for navigate."),
                ArgSpec::optional("selector", ArgKind::Str, "CSS selector for element actions."),
                ArgSpec::optional("text", ArgKind::Str, "Text for type_text."),
                ArgSpec::optional("key", ArgKind::Str, "Key name for press_key (e.g. Enter)."),
                ArgSpec::optional("script", ArgKind::Str, "Expression for evaluate."),
                ArgSpec::optional(
                    "direction",
                    ArgKind::Enum(&["up", "down"]),
                    "Scroll direction.",
                ),
                ArgSpec::optional(
                    "amount",
                    ArgKind::Int {
                        min: Some(1),
                        max: Some(100_000),
                    },
                    "Scroll distance in pixels.",
                ),
                ArgSpec::optional(
                    "wait_ms",
                    ArgKind::Int {
                        min: Some(1),
                        max: Some(120_000),
                    },
                    "Deadline for wait_for_selector.",
                ),
                target_arg(),
            ],
            timeout_ms: 30_000,
            requires_browser: true,
            advanced: false,
            handler: tools::navigation::browser_action,
        },
        ToolSpec {
            name: "manage_tabs",
            description: "List, open, close and activate tabs; read the active tab's url/title.",
            args: vec![
                ArgSpec::required(
                    "action",
                    ArgKind::Enum(tools::tabs::ACTIONS),
                    "Tab operation.",
                ),
                ArgSpec::optional("url", ArgKind::Str, "URL for the new tab."),
                target_arg(),
            ],
            timeout_ms: 15_000,
            requires_browser: true,
            advanced: false,
            handler: tools::tabs::manage_tabs,
        },
        ToolSpec {
            name: "apply_stealth_script",
            description: "Install the fingerprint-masking document script on every open page.",
            args: vec![ArgSpec::with_default(
                "force",
                ArgKind::Bool,
                json!(false),
                "Reinstall even on pages already covered.",
            )],
            timeout_ms: 15_000,
            requires_browser: true,
            advanced: false,
            handler: tools::browser::apply_stealth_script,
        },
        ToolSpec {
            name: "export_session",
            description: "Export cookies and the active page's localStorage, optionally to a file.",
            args: vec![
                ArgSpec::optional("path", ArgKind::Str, "File to write the session bundle to."),
                target_arg(),
            ],
            timeout_ms: 30_000,
            requires_browser: true,
            advanced: false,
            handler: tools::session_io::export_session,
        },
        ToolSpec {
            name: "import_session",
            description: "Restore cookies (and localStorage for a matching origin) from a bundle.",
            args: vec![
                ArgSpec::optional("session", ArgKind::Object, "Session bundle object."),
                ArgSpec::optional("path", ArgKind::Str, "Session bundle file."),
                target_arg(),
            ],
            timeout_ms: 30_000,
            requires_browser: true,
            advanced: false,
            handler: tools::session_io::import_session,
        },
        // --- advanced catalog ---
        ToolSpec {
            name: "enable_request_interception",
            description: "Pause matching requests before they leave the browser.",
            args: interception_enable_args(),
            timeout_ms: 15_000,
            requires_browser: true,
            advanced: true,
            handler: tools::network::enable_request_interception,
        },
        ToolSpec {
            name: "enable_response_interception",
            description: "Pause matching exchanges when response headers arrive.",
            args: interception_enable_args(),
            timeout_ms: 15_000,
            requires_browser: true,
            advanced: true,
            handler: tools::network::enable_response_interception,
        },
        ToolSpec {
            name: "disable_request_interception",
            description: "Drain and disable request-stage interception on a target.",
            args: vec![target_arg()],
            timeout_ms: 15_000,
            requires_browser: true,
            advanced: true,
            handler: tools::network::disable_request_interception,
        },
        ToolSpec {
            name: "disable_response_interception",
            description: "Drain and disable response-stage interception on a target.",
            args: vec![target_arg()],
            timeout_ms: 15_000,
            requires_browser: true,
            advanced: true,
            handler: tools::network::disable_response_interception,
        },
        ToolSpec {
            name: "list_intercepted_requests",
            description: "Snapshot the queue of paused request-stage exchanges.",
            args: vec![target_arg()],
            timeout_ms: 10_000,
            requires_browser: true,
            advanced: true,
            handler: tools::network::list_intercepted_requests,
        },
        ToolSpec {
            name: "list_intercepted_responses",
            description: "Snapshot the queue of paused response-stage exchanges.",
            args: vec![target_arg()],
            timeout_ms: 10_000,
            requires_browser: true,
            advanced: true,
            handler: tools::network::list_intercepted_responses,
        },
        ToolSpec {
            name: "modify_intercepted_request",
            description: "Forward a paused request with patched headers, method or body.",
            args: vec![
                ArgSpec::required("request_id", ArgKind::Str, "Paused request id."),
                ArgSpec::optional("add_headers", ArgKind::StrMap, "Headers to add or override."),
                ArgSpec::optional("remove_headers", ArgKind::StrList, "Headers to drop."),
                ArgSpec::optional("method", ArgKind::Str, "Replacement HTTP method."),
                ArgSpec::optional("post_data", ArgKind::Str, "Replacement request body."),
                target_arg(),
            ],
            timeout_ms: 15_000,
            requires_browser: true,
            advanced: true,
            handler: tools::network::modify_intercepted_request,
        },
        ToolSpec {
            name: "modify_intercepted_response",
            description: "Fulfill a paused response with patched status, headers or body.",
            args: vec![
                ArgSpec::required("request_id", ArgKind::Str, "Paused request id."),
                ArgSpec::optional(
                    "status",
                    ArgKind::Int {
                        min: Some(100),
                        max: Some(599),
                    },
                    "Replacement status code.",
                ),
                ArgSpec::optional("add_headers", ArgKind::StrMap, "Headers to add or override."),
                ArgSpec::optional("remove_headers", ArgKind::StrList, "Headers to drop."),
                ArgSpec::optional("body", ArgKind::Str, "Replacement body."),
                ArgSpec::optional(
                    "body_replacements",
                    ArgKind::StrMap,
                    "Literal substring replacements applied to the original body.",
                ),
                target_arg(),
            ],
            timeout_ms: 15_000,
            requires_browser: true,
            advanced: true,
            handler: tools::network::modify_intercepted_response,
        },
        ToolSpec {
            name: "resume_intercepted_request",
            description: "Resume a paused exchange unmodified, or fail it with a reason.",
            args: vec![
                ArgSpec::required("request_id", ArgKind::Str, "Paused request id."),
                ArgSpec::optional(
                    "fail_reason",
                    ArgKind::Str,
                    "CDP error reason (e.g. BlockedByClient) to fail instead of resume.",
                ),
                target_arg(),
            ],
            timeout_ms: 10_000,
            requires_browser: true,
            advanced: true,
            handler: tools::network::resume_intercepted_request,
        },
        ToolSpec {
            name: "intercept_and_modify_traffic",
            description: "Enable request modification for a pattern, optionally trigger traffic \
                          with a click, and report how many requests were patched.",
            args: vec![
                ArgSpec::required("pattern", ArgKind::Str, "URL glob to intercept."),
                ArgSpec::optional("add_headers", ArgKind::StrMap, "Headers to add or override."),
                ArgSpec::optional("remove_headers", ArgKind::StrList, "Headers to drop."),
                ArgSpec::optional("method_filter", ArgKind::Str, "Only patch this HTTP method."),
                ArgSpec::with_default(
                    "action",
                    ArgKind::Enum(&["none", "click"]),
                    json!("none"),
                    "Optional trigger action.",
                ),
                ArgSpec::optional("selector", ArgKind::Str, "Selector for the click trigger."),
                ArgSpec::with_default(
                    "settle_ms",
                    ArgKind::Int {
                        min: Some(0),
                        max: Some(60_000),
                    },
                    json!(2_000),
                    "How long to let traffic settle before counting.",
                ),
                target_arg(),
            ],
            timeout_ms: 45_000,
            requires_browser: true,
            advanced: true,
            handler: tools::network::intercept_and_modify_traffic,
        },
        ToolSpec {
            name: "create_mock_endpoint",
            description: "Serve matching requests locally; nothing goes upstream.",
            args: vec![
                ArgSpec::required("url_pattern", ArgKind::Str, "URL glob to mock."),
                ArgSpec::optional("method", ArgKind::Str, "HTTP method filter (default any)."),
                ArgSpec::with_default(
                    "status_code",
                    ArgKind::Int {
                        min: Some(100),
                        max: Some(599),
                    },
                    json!(200),
                    "Status code served.",
                ),
                ArgSpec::with_default(
                    "response_body",
                    ArgKind::Str,
                    json!(""),
                    "Body served.",
                ),
                ArgSpec::optional("headers", ArgKind::StrMap, "Headers served."),
                ArgSpec::optional(
                    "latency_ms",
                    ArgKind::Int {
                        min: Some(0),
                        max: Some(60_000),
                    },
                    "Artificial latency before the mock answers.",
                ),
                target_arg(),
            ],
            timeout_ms: 15_000,
            requires_browser: true,
            advanced: true,
            handler: tools::mocks::create_mock_endpoint,
        },
        ToolSpec {
            name: "delete_mock_endpoint",
            description: "Remove one mock endpoint.",
            args: vec![
                ArgSpec::required("mock_id", ArgKind::Str, "Mock id to remove."),
                target_arg(),
            ],
            timeout_ms: 10_000,
            requires_browser: true,
            advanced: true,
            handler: tools::mocks::delete_mock_endpoint,
        },
        ToolSpec {
            name: "clear_all_mocks",
            description: "Remove every mock endpoint on a target.",
            args: vec![target_arg()],
            timeout_ms: 10_000,
            requires_browser: true,
            advanced: true,
            handler: tools::mocks::clear_all_mocks,
        },
        ToolSpec {
            name: "list_mock_endpoints",
            description: "List mock endpoints and their call counts.",
            args: vec![target_arg()],
            timeout_ms: 10_000,
            requires_browser: true,
            advanced: true,
            handler: tools::mocks::list_mock_endpoints,
        },
        ToolSpec {
            name: "start_har_recording",
            description: "Record network exchanges on a target into a HAR buffer.",
            args: vec![target_arg()],
            timeout_ms: 15_000,
            requires_browser: true,
            advanced: true,
            handler: tools::har::start_har_recording,
        },
        ToolSpec {
            name: "stop_har_recording",
            description: "Stop recording and return the drained HAR log.",
            args: vec![target_arg()],
            timeout_ms: 15_000,
            requires_browser: true,
            advanced: true,
            handler: tools::har::stop_har_recording,
        },
        ToolSpec {
            name: "export_har_file",
            description: "Write the current HAR buffer to a file (HAR 1.2).",
            args: vec![
                ArgSpec::required("path", ArgKind::Str, "Destination file path."),
                target_arg(),
            ],
            timeout_ms: 15_000,
            requires_browser: true,
            advanced: true,
            handler: tools::har::export_har_file,
        },
        ToolSpec {
            name: "start_websocket_capture",
            description: "Capture WebSocket frames on a target.",
            args: vec![target_arg()],
            timeout_ms: 15_000,
            requires_browser: true,
            advanced: true,
            handler: tools::websocket::start_websocket_capture,
        },
        ToolSpec {
            name: "stop_websocket_capture",
            description: "Stop WebSocket capture and release its session.",
            args: vec![target_arg()],
            timeout_ms: 10_000,
            requires_browser: true,
            advanced: true,
            handler: tools::websocket::stop_websocket_capture,
        },
        ToolSpec {
            name: "list_websocket_frames",
            description: "List captured WebSocket frames (payloads truncated at 4 KiB).",
            args: vec![target_arg()],
            timeout_ms: 10_000,
            requires_browser: true,
            advanced: true,
            handler: tools::websocket::list_websocket_frames,
        },
        ToolSpec {
            name: "inject_script",
            description: "Evaluate a script once, or register it to run at document start.",
            args: vec![
                ArgSpec::required("script", ArgKind::Str, "JavaScript to run."),
                ArgSpec::with_default(
                    "persistent",
                    ArgKind::Bool,
                    json!(false),
                    "Register for every new document instead of evaluating once.",
                ),
                target_arg(),
            ],
            timeout_ms: 15_000,
            requires_browser: true,
            advanced: true,
            handler: tools::inject::inject_script,
        },
    ]
}

fn interception_enable_args() -> Vec<ArgSpec> {
    vec![
        ArgSpec::with_default(
            "patterns",
            ArgKind::StrList,
            json!(["*"]),
            "URL globs to pause on.",
        ),
        ArgSpec::with_default(
            "auto_continue",
            ArgKind::Bool,
            json!(true),
            "Resume unmatched/observed requests immediately instead of parking them.",
        ),
        ArgSpec::optional(
            "pause_timeout_ms",
            ArgKind::Int {
                min: Some(100),
                max: Some(600_000),
            },
            "Deadline after which parked requests are resumed as-is.",
        ),
        target_arg(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique() {
        let mut names: Vec<&str> = catalog().iter().map(|t| t.name).collect();
        let before = names.len();
        names.sort();
        names.dedup();
        assert_eq!(before, names.len());
    }

    #[test]
    fn lifecycle_tools_skip_ensure_connected() {
        for name in [
            "status",
            "launch_with_profile",
            "close_browser",
            "enable_advanced_tools",
        ] {
            assert!(
                !find(name).unwrap().requires_browser,
                "{name} must not force a connection"
            );
        }
        assert!(find("browser_action").unwrap().requires_browser);
    }

    #[test]
    fn visibility_filter_hides_the_advanced_catalog() {
        let core: Vec<&str> = visible(false).map(|t| t.name).collect();
        let all: Vec<&str> = visible(true).map(|t| t.name).collect();
        assert!(core.contains(&"browser_action"));
        assert!(!core.contains(&"create_mock_endpoint"));
        assert!(all.contains(&"create_mock_endpoint"));
        assert!(all.len() > core.len());
    }

    #[test]
    fn every_tool_has_a_schema() {
        for spec in catalog() {
            let schema = crate::schema::json_schema(&spec.args);
            assert_eq!(schema["type"], "object");
            assert!(!spec.description.is_empty());
        }
    }
}
