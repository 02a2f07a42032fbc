//! Preset configurations for common MCP runtimes.
//!
//! Each preset is a function rather than a constant: every call mints a
//! fresh config with its own unique job name.

use super::ServerConfig;

/// `uvx mcp-server-fetch` - HTTP fetch tooling.
pub fn fetch() -> ServerConfig {
    ServerConfig::from_runtime("uvx", "mcp-server-fetch")
}

/// `uvx mcp-server-git` - local git repository tooling.
pub fn git() -> ServerConfig {
    ServerConfig::from_runtime("uvx", "mcp-server-git")
}

/// `uvx mcp-server-time` - timezone conversions.
pub fn time() -> ServerConfig {
    ServerConfig::from_runtime("uvx", "mcp-server-time")
}

/// `npx @modelcontextprotocol/server-github` - GitHub API tooling.
pub fn github() -> ServerConfig {
    ServerConfig::from_runtime("npx", "@modelcontextprotocol/server-github")
}

/// `npx @modelcontextprotocol/server-gitlab` - GitLab API tooling.
pub fn gitlab() -> ServerConfig {
    ServerConfig::from_runtime("npx", "@modelcontextprotocol/server-gitlab")
}

/// `npx @modelcontextprotocol/server-everything` - protocol test server.
pub fn everything() -> ServerConfig {
    ServerConfig::from_runtime("npx", "@modelcontextprotocol/server-everything")
}

/// Look up a preset by name, as accepted by the HTTP surface.
pub fn preset(name: &str) -> Option<ServerConfig> {
    match name {
        "fetch" => Some(fetch()),
        "git" => Some(git()),
        "time" => Some(time()),
        "github" => Some(github()),
        "gitlab" => Some(gitlab()),
        "everything" => Some(everything()),
        _ => None,
    }
}
