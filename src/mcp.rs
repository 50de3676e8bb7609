use serde_json::Value;

/// Remote tool-call registry (MCP). Receives `mcp` payloads verbatim; tool
/// semantics live entirely behind this trait.
pub trait McpServer: Send {
    fn parse_message(&mut self, payload: &Value);
}
