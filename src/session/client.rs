//! Client identity resolution
//!
//! A transport that knows who is on the other end (for example through the
//! `clientInfo` of an MCP `initialize` request) always wins. Otherwise the
//! client is guessed from environment variables the common AI coding tools
//! export into the processes they spawn.

/// Name used when no client can be identified.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Environment markers checked in order; the first present variable wins.
const ENV_MARKERS: &[(&str, &str)] = &[
    ("CLAUDECODE", "claude-code"),
    ("CLAUDE_CODE_ENTRYPOINT", "claude-code"),
    ("CURSOR_TRACE_ID", "cursor"),
    ("WINDSURF_EXTENSION_ID", "windsurf"),
    ("CODEX_SANDBOX", "codex"),
    ("GEMINI_CLI", "gemini-cli"),
    ("ZED_TERM", "zed"),
    ("VSCODE_PID", "vscode"),
];

/// Lowercase a client name and replace whitespace and underscores with `-`.
pub fn normalize_client_name(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Resolve the client name, preferring transport-provided info.
pub fn resolve_client(transport_client: Option<&str>) -> String {
    match transport_client.map(normalize_client_name) {
        Some(name) if !name.is_empty() => name,
        _ => detect_client_from_env(),
    }
}

/// Guess the client from the process environment.
pub fn detect_client_from_env() -> String {
    detect_client_with(|key| std::env::var(key).ok())
}

fn detect_client_with<F>(lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    for (var, client) in ENV_MARKERS {
        if lookup(var).is_some_and(|v| !v.is_empty()) {
            return (*client).to_string();
        }
    }
    if lookup("TERM_PROGRAM").as_deref() == Some("vscode") {
        return "vscode".to_string();
    }
    UNKNOWN_CLIENT.to_string()
}
