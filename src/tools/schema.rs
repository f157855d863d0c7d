//! Tool names, descriptions, and JSON input schemas.

use serde::Serialize;
use serde_json::{json, Value};

/// What a model sees for one tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

pub const SANDBOX_OPEN: &str = "sandbox_open";
pub const SANDBOX_EXEC: &str = "sandbox_exec";
pub const SANDBOX_EXEC_START: &str = "sandbox_exec_start";
pub const SANDBOX_EXEC_WAIT: &str = "sandbox_exec_wait";
pub const SANDBOX_EXEC_READ: &str = "sandbox_exec_read";
pub const SANDBOX_FS_WRITE: &str = "sandbox_fs_write";
pub const SANDBOX_FS_READ: &str = "sandbox_fs_read";
pub const SANDBOX_FS_LIST: &str = "sandbox_fs_list";
pub const SANDBOX_FS_DELETE: &str = "sandbox_fs_delete";
pub const SANDBOX_CLOSE: &str = "sandbox_close";

fn sandbox_id() -> Value {
    json!({
        "type": "string",
        "description": "Sandbox session ID from sandbox_open"
    })
}

fn workspace_path(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

fn exec_command_properties(default_timeout: u64) -> Value {
    json!({
        "sandbox_id": sandbox_id(),
        "cmd": {
            "type": "array",
            "items": { "type": "string" },
            "description": "Command and arguments, e.g. [\"python\", \"main.py\"]"
        },
        "command": {
            "type": "string",
            "description": "Command line split shell-style; used when cmd is absent"
        },
        "cwd": {
            "type": "string",
            "description": "Working directory, relative to the workspace or absolute inside it"
        },
        "env": {
            "type": "object",
            "additionalProperties": { "type": "string" },
            "description": "Additional environment variables"
        },
        "timeout_seconds": {
            "type": "integer",
            "minimum": 1,
            "maximum": 3600,
            "default": default_timeout,
            "description": "Execution timeout in seconds"
        }
    })
}

/// Every tool, in the order they are usually called.
pub fn descriptors(default_timeout: u64) -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: SANDBOX_OPEN,
            description: "Open or resume a persistent sandbox session. Call this first to get \
                a sandbox_id for other sandbox operations. Files persist across calls within \
                the same workflow.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "session_key": {
                        "type": "string",
                        "description": "Optional session name. Usually resolved from the run context."
                    },
                    "runtime": {
                        "type": "string",
                        "description": "python, node, bash, or an image name"
                    }
                }
            }),
        },
        ToolDescriptor {
            name: SANDBOX_EXEC,
            description: "Execute a command in the sandbox and wait for it. Returns exit code, \
                stdout, and stderr.",
            input_schema: json!({
                "type": "object",
                "properties": exec_command_properties(default_timeout),
                "required": ["sandbox_id"]
            }),
        },
        ToolDescriptor {
            name: SANDBOX_EXEC_START,
            description: "Start a long-running command in the background. Poll it with \
                sandbox_exec_read and collect the result with sandbox_exec_wait.",
            input_schema: json!({
                "type": "object",
                "properties": exec_command_properties(default_timeout),
                "required": ["sandbox_id"]
            }),
        },
        ToolDescriptor {
            name: SANDBOX_EXEC_WAIT,
            description: "Wait for a background command to finish and return its result.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "sandbox_id": sandbox_id(),
                    "exec_id": { "type": "string", "description": "ID from sandbox_exec_start" },
                    "timeout_seconds": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": 3600,
                        "default": 60,
                        "description": "How long to wait before giving up"
                    }
                },
                "required": ["sandbox_id", "exec_id"]
            }),
        },
        ToolDescriptor {
            name: SANDBOX_EXEC_READ,
            description: "Read output produced so far by a background command without waiting.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "sandbox_id": sandbox_id(),
                    "exec_id": { "type": "string", "description": "ID from sandbox_exec_start" },
                    "since_seq": {
                        "type": "integer",
                        "default": -1,
                        "description": "Return chunks after this sequence number; pass next_seq - 1 from the previous read"
                    },
                    "max_chunks": {
                        "type": "integer",
                        "minimum": 0,
                        "default": 0,
                        "description": "Maximum chunks to return, 0 for all"
                    }
                },
                "required": ["sandbox_id", "exec_id"]
            }),
        },
        ToolDescriptor {
            name: SANDBOX_FS_WRITE,
            description: "Write a file to the sandbox workspace. Use contents for text files, \
                contents_b64 for binary.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "sandbox_id": sandbox_id(),
                    "path": workspace_path("File path relative to the workspace"),
                    "contents": { "type": "string", "description": "File contents as plain text" },
                    "contents_b64": {
                        "type": "string",
                        "description": "File contents as base64 (for binary files)"
                    },
                    "mode": {
                        "type": "string",
                        "default": "0644",
                        "description": "Unix permission mode in octal"
                    }
                },
                "required": ["sandbox_id", "path"]
            }),
        },
        ToolDescriptor {
            name: SANDBOX_FS_READ,
            description: "Read a file from the sandbox workspace. Binary content is returned \
                as contents_b64.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "sandbox_id": sandbox_id(),
                    "path": workspace_path("File path relative to the workspace"),
                    "max_bytes": {
                        "type": "integer",
                        "minimum": 0,
                        "description": "Maximum bytes to read, 0 for the configured default"
                    }
                },
                "required": ["sandbox_id", "path"]
            }),
        },
        ToolDescriptor {
            name: SANDBOX_FS_LIST,
            description: "List files in the sandbox workspace.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "sandbox_id": sandbox_id(),
                    "path": workspace_path("Directory path relative to the workspace (default: root)"),
                    "recursive": { "type": "boolean", "default": false, "description": "List recursively" }
                },
                "required": ["sandbox_id"]
            }),
        },
        ToolDescriptor {
            name: SANDBOX_FS_DELETE,
            description: "Delete a file or directory in the sandbox workspace.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "sandbox_id": sandbox_id(),
                    "path": workspace_path("File or directory path relative to the workspace"),
                    "recursive": {
                        "type": "boolean",
                        "default": false,
                        "description": "Required to delete a non-empty directory"
                    }
                },
                "required": ["sandbox_id", "path"]
            }),
        },
        ToolDescriptor {
            name: SANDBOX_CLOSE,
            description: "Close a sandbox session and delete its workspace. Usually not needed: \
                sessions are cleaned up when the workflow completes.",
            input_schema: json!({
                "type": "object",
                "properties": { "sandbox_id": sandbox_id() },
                "required": ["sandbox_id"]
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_tool_has_object_schema() {
        let tools = descriptors(120);
        assert_eq!(tools.len(), 10);
        for tool in &tools {
            assert!(tool.name.starts_with("sandbox_"));
            assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
        }
    }

    #[test]
    fn test_exec_schema_carries_default_timeout() {
        let tools = descriptors(45);
        let exec = tools.iter().find(|t| t.name == SANDBOX_EXEC).unwrap();
        assert_eq!(
            exec.input_schema["properties"]["timeout_seconds"]["default"],
            45
        );
    }
}
