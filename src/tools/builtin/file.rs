//! Builtin tool: file operations confined to the sandbox workspace.
//!
//! Every path is resolved lexically against `/workspace` before anything
//! runs in the sandbox; paths that escape the root are rejected. Commands
//! are passed as argv (no shell interpolation of paths or content).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::sandbox_failure;
use crate::sandbox::workspace::{self, WORKSPACE_ROOT};
use crate::sandbox::{ExecOptions, ExecOutput, SandboxManager};
use crate::tools::{flag, optional_str, required_str, Capability, ToolContext, ToolError};

const OPERATIONS: [&str; 6] = ["read", "write", "list", "delete", "mkdir", "exists"];

/// Environment variable carrying the content of a `write`.
const CONTENT_VAR: &str = "SANDBOX_FILE_CONTENT";

/// Writes `$SANDBOX_FILE_CONTENT` to `$1`, creating parent directories.
const WRITE_SCRIPT: &str =
    r#"mkdir -p "$(dirname "$1")" && printf '%s' "$SANDBOX_FILE_CONTENT" > "$1""#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    File,
    Directory,
    Other,
}

impl EntryKind {
    fn as_str(self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Directory => "directory",
            EntryKind::Other => "unknown",
        }
    }
}

pub struct FileTool {
    sandboxes: Arc<SandboxManager>,
}

impl FileTool {
    pub fn new(sandboxes: Arc<SandboxManager>) -> Self {
        Self { sandboxes }
    }

    async fn run(
        &self,
        context: &ToolContext,
        argv: &[&str],
        options: &ExecOptions,
    ) -> Result<ExecOutput, ToolError> {
        let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        self.sandboxes
            .execute_in_sandbox(&context.session_id, &argv, options)
            .await
            .map_err(|e| sandbox_failure(self.name(), e))
    }

    /// Runs `argv` and turns a non-zero exit into an execution error.
    async fn run_checked(&self, context: &ToolContext, argv: &[&str]) -> Result<String, ToolError> {
        self.run_checked_with(context, argv, &ExecOptions::default()).await
    }

    async fn run_checked_with(
        &self,
        context: &ToolContext,
        argv: &[&str],
        options: &ExecOptions,
    ) -> Result<String, ToolError> {
        let output = self.run(context, argv, options).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            let detail = output.stderr.trim();
            Err(ToolError::execution(
                self.name(),
                if detail.is_empty() {
                    format!("{} exited with code {}", argv[0], output.exit_code)
                } else {
                    detail.to_string()
                },
            ))
        }
    }

    /// `None` when the path does not exist.
    async fn kind(&self, context: &ToolContext, path: &str) -> Result<Option<EntryKind>, ToolError> {
        let output = self
            .run(context, &["stat", "-c", "%F", "--", path], &ExecOptions::default())
            .await?;
        if !output.success() {
            return Ok(None);
        }
        let kind = match output.stdout.trim() {
            "regular file" | "regular empty file" => EntryKind::File,
            "directory" => EntryKind::Directory,
            _ => EntryKind::Other,
        };
        Ok(Some(kind))
    }

    async fn read(&self, context: &ToolContext, path: &str) -> Result<Value, ToolError> {
        match self.kind(context, path).await? {
            None => return Err(ToolError::execution(self.name(), format!("File not found: {path}"))),
            Some(EntryKind::File) => {}
            Some(_) => {
                return Err(ToolError::execution(self.name(), format!("Path is not a file: {path}")))
            }
        }
        let content = self.run_checked(context, &["cat", "--", path]).await?;
        Ok(json!({
            "path": path,
            "size": content.len(),
            "content": content,
        }))
    }

    async fn write(&self, context: &ToolContext, path: &str, content: &str) -> Result<Value, ToolError> {
        if content.is_empty() {
            return Err(ToolError::invalid(self.name(), "content is required for write"));
        }
        let options = ExecOptions {
            env: HashMap::from([(CONTENT_VAR.to_string(), content.to_string())]),
            ..Default::default()
        };
        self.run_checked_with(context, &["sh", "-c", WRITE_SCRIPT, "sh", path], &options)
            .await?;
        Ok(json!({
            "path": path,
            "size": content.len(),
        }))
    }

    async fn list(&self, context: &ToolContext, path: &str, recursive: bool) -> Result<Value, ToolError> {
        match self.kind(context, path).await? {
            Some(EntryKind::Directory) => {}
            None => return Err(ToolError::execution(self.name(), format!("Path not found: {path}"))),
            Some(_) => {
                return Err(ToolError::execution(
                    self.name(),
                    format!("Path is not a directory: {path}"),
                ))
            }
        }

        let mut argv = vec!["find", path, "-mindepth", "1"];
        if !recursive {
            argv.extend(["-maxdepth", "1"]);
        }
        argv.extend(["-printf", "%y %P\\n"]);
        let stdout = self.run_checked(context, &argv).await?;

        let (files, directories) = parse_listing(&stdout);
        Ok(json!({
            "path": path,
            "total_files": files.len(),
            "total_directories": directories.len(),
            "files": files,
            "directories": directories,
        }))
    }

    async fn delete(&self, context: &ToolContext, path: &str, recursive: bool) -> Result<Value, ToolError> {
        if path == WORKSPACE_ROOT {
            return Err(ToolError::invalid(self.name(), "refusing to delete the workspace root"));
        }
        let kind = self.kind(context, path).await?.ok_or_else(|| {
            ToolError::execution(self.name(), format!("File or directory not found: {path}"))
        })?;

        match kind {
            EntryKind::Directory if recursive => {
                self.run_checked(context, &["rm", "-rf", "--", path]).await?;
            }
            EntryKind::Directory => {
                self.run_checked(context, &["rmdir", "--", path]).await?;
            }
            _ => {
                self.run_checked(context, &["rm", "-f", "--", path]).await?;
            }
        }
        Ok(json!({
            "path": path,
            "type": kind.as_str(),
            "recursive": recursive,
        }))
    }

    async fn mkdir(&self, context: &ToolContext, path: &str) -> Result<Value, ToolError> {
        self.run_checked(context, &["mkdir", "-p", "-m", "755", "--", path])
            .await?;
        Ok(json!({ "path": path }))
    }

    async fn exists(&self, context: &ToolContext, path: &str) -> Result<Value, ToolError> {
        let kind = self.kind(context, path).await?;
        Ok(json!({
            "path": path,
            "exists": kind.is_some(),
            "type": kind.unwrap_or(EntryKind::Other).as_str(),
        }))
    }
}

/// Splits `find -printf '%y %P\n'` output into sorted file and directory lists.
fn parse_listing(stdout: &str) -> (Vec<String>, Vec<String>) {
    let mut files = Vec::new();
    let mut directories = Vec::new();
    for line in stdout.lines() {
        let Some((kind, name)) = line.split_once(' ') else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        match kind {
            "d" => directories.push(name.to_string()),
            "f" => files.push(name.to_string()),
            _ => {}
        }
    }
    files.sort();
    directories.sort();
    (files, directories)
}

#[async_trait]
impl Capability for FileTool {
    fn name(&self) -> &str {
        "file"
    }

    fn description(&self) -> &str {
        "Read, write, list, delete and create files and directories in the sandbox \
         workspace (/workspace). Relative paths are resolved against /workspace; paths \
         outside it are rejected."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": OPERATIONS,
                    "description": "The file operation to perform"
                },
                "path": {
                    "type": "string",
                    "description": "File or directory path inside /workspace"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write (required for write)"
                },
                "recursive": {
                    "type": "boolean",
                    "description": "Recurse into subdirectories (list, delete)"
                }
            },
            "required": ["operation", "path"]
        })
    }

    async fn execute(&self, context: &ToolContext, arguments: Value) -> Result<Value, ToolError> {
        let operation = required_str(self.name(), &arguments, "operation")?;
        let raw_path = optional_str(&arguments, "path").unwrap_or(".");
        let path = workspace::resolve(raw_path).ok_or_else(|| {
            ToolError::invalid(self.name(), format!("path is outside {WORKSPACE_ROOT}: {raw_path}"))
        })?;
        let recursive = flag(&arguments, "recursive");

        debug!("file [{}] {operation} {path}", context.session_id);

        match operation {
            "read" => self.read(context, &path).await,
            "write" => {
                let content = required_str(self.name(), &arguments, "content")?;
                self.write(context, &path, content).await
            }
            "list" => self.list(context, &path, recursive).await,
            "delete" => self.delete(context, &path, recursive).await,
            "mkdir" => self.mkdir(context, &path).await,
            "exists" => self.exists(context, &path).await,
            other => Err(ToolError::invalid(
                self.name(),
                format!("unknown operation '{other}', expected one of {}", OPERATIONS.join(", ")),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_settings, MockRuntime};

    fn ok(stdout: &str) -> ExecOutput {
        ExecOutput {
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    fn fail(stderr: &str) -> ExecOutput {
        ExecOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    /// A fake workspace: `/workspace` with `src/` and `notes.txt`.
    fn workspace_exec(argv: &[String]) -> ExecOutput {
        let args: Vec<&str> = argv.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["stat", "-c", "%F", "--", "/workspace"] => ok("directory\n"),
            ["stat", "-c", "%F", "--", "/workspace/src"] => ok("directory\n"),
            ["stat", "-c", "%F", "--", "/workspace/notes.txt"] => ok("regular file\n"),
            ["stat", ..] => fail("stat: cannot statx: No such file or directory"),
            ["cat", "--", "/workspace/notes.txt"] => ok("remember the milk"),
            ["find", "/workspace", "-mindepth", "1", "-maxdepth", "1", ..] => {
                ok("f notes.txt\nd src\n")
            }
            ["find", "/workspace", "-mindepth", "1", "-printf", _] => {
                ok("f notes.txt\nd src\nf src/main.rs\nf src/lib.rs\n")
            }
            _ => ok(""),
        }
    }

    async fn tool() -> (FileTool, Arc<MockRuntime>) {
        let runtime = Arc::new(MockRuntime::new().with_exec(workspace_exec));
        let manager = Arc::new(SandboxManager::new(runtime.clone(), test_settings()));
        manager.create_sandbox("s1").await.unwrap();
        (FileTool::new(manager), runtime)
    }

    fn ctx() -> ToolContext {
        ToolContext::new("s1")
    }

    #[tokio::test]
    async fn test_list_workspace() {
        let (tool, _) = tool().await;
        let out = tool
            .execute(&ctx(), json!({"operation": "list", "path": "/workspace"}))
            .await
            .unwrap();
        assert_eq!(out["files"], json!(["notes.txt"]));
        assert_eq!(out["directories"], json!(["src"]));
        assert_eq!(out["total_files"], 1);
        assert_eq!(out["total_directories"], 1);
    }

    #[tokio::test]
    async fn test_list_recursive_is_sorted() {
        let (tool, _) = tool().await;
        let out = tool
            .execute(&ctx(), json!({"operation": "list", "path": ".", "recursive": true}))
            .await
            .unwrap();
        assert_eq!(out["files"], json!(["notes.txt", "src/lib.rs", "src/main.rs"]));
        assert_eq!(out["total_files"], 3);
    }

    #[tokio::test]
    async fn test_list_on_file_is_rejected() {
        let (tool, _) = tool().await;
        let err = tool
            .execute(&ctx(), json!({"operation": "list", "path": "notes.txt"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }

    #[tokio::test]
    async fn test_read_file() {
        let (tool, _) = tool().await;
        let out = tool
            .execute(&ctx(), json!({"operation": "read", "path": "notes.txt"}))
            .await
            .unwrap();
        assert_eq!(out["content"], "remember the milk");
        assert_eq!(out["path"], "/workspace/notes.txt");
        assert_eq!(out["size"], 17);
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let (tool, _) = tool().await;
        let err = tool
            .execute(&ctx(), json!({"operation": "read", "path": "ghost.txt"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("File not found"));
    }

    #[tokio::test]
    async fn test_write_passes_content_via_env() {
        let (tool, runtime) = tool().await;
        let out = tool
            .execute(
                &ctx(),
                json!({"operation": "write", "path": "out/a.txt", "content": "x'; rm -rf /"}),
            )
            .await
            .unwrap();
        assert_eq!(out["path"], "/workspace/out/a.txt");

        let (argv, opts) = runtime.last_exec().unwrap();
        assert_eq!(argv.last().map(String::as_str), Some("/workspace/out/a.txt"));
        assert_eq!(opts.env[CONTENT_VAR], "x'; rm -rf /");
        assert!(!argv.iter().any(|a| a.contains("rm -rf")));
    }

    #[tokio::test]
    async fn test_write_requires_content() {
        let (tool, _) = tool().await;
        let err = tool
            .execute(&ctx(), json!({"operation": "write", "path": "a.txt", "content": ""}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn test_traversal_rejected_before_exec() {
        let (tool, runtime) = tool().await;
        let before = runtime.exec_count();
        for path in ["../etc/passwd", "/etc/shadow", "/workspace/../root"] {
            let err = tool
                .execute(&ctx(), json!({"operation": "read", "path": path}))
                .await
                .unwrap_err();
            assert!(matches!(err, ToolError::InvalidArguments { .. }), "{path}");
        }
        assert_eq!(runtime.exec_count(), before);
    }

    #[tokio::test]
    async fn test_delete_directory_recursive() {
        let (tool, runtime) = tool().await;
        let out = tool
            .execute(&ctx(), json!({"operation": "delete", "path": "src", "recursive": true}))
            .await
            .unwrap();
        assert_eq!(out["type"], "directory");
        let (argv, _) = runtime.last_exec().unwrap();
        assert_eq!(argv, vec!["rm", "-rf", "--", "/workspace/src"]);
    }

    #[tokio::test]
    async fn test_delete_root_refused() {
        let (tool, _) = tool().await;
        let err = tool
            .execute(&ctx(), json!({"operation": "delete", "path": "/workspace", "recursive": true}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn test_exists() {
        let (tool, _) = tool().await;
        let out = tool
            .execute(&ctx(), json!({"operation": "exists", "path": "src"}))
            .await
            .unwrap();
        assert_eq!(out, json!({"path": "/workspace/src", "exists": true, "type": "directory"}));

        let out = tool
            .execute(&ctx(), json!({"operation": "exists", "path": "nope"}))
            .await
            .unwrap();
        assert_eq!(out["exists"], false);
        assert_eq!(out["type"], "unknown");
    }

    #[tokio::test]
    async fn test_mkdir() {
        let (tool, runtime) = tool().await;
        tool.execute(&ctx(), json!({"operation": "mkdir", "path": "a/b"}))
            .await
            .unwrap();
        let (argv, _) = runtime.last_exec().unwrap();
        assert_eq!(argv.last().map(String::as_str), Some("/workspace/a/b"));
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let (tool, _) = tool().await;
        let err = tool
            .execute(&ctx(), json!({"operation": "chmod", "path": "a"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown operation"));
    }

    #[test]
    fn test_parse_listing_skips_other_kinds() {
        let (files, dirs) = parse_listing("l link\nf b\nf a\nd z\n\n");
        assert_eq!(files, vec!["a", "b"]);
        assert_eq!(dirs, vec!["z"]);
    }
}
