//! Filesystem tool handlers.
//!
//! Stateless executors behind `fs_*` methods and the `/fs/*` loopback
//! routes. Every handler returns a JSON object with `success` — logical
//! failures ride in `{success:false, error}` rather than transport errors.
//!
//! ## Path rules
//!
//! Paths must be absolute, free of `..` components and null bytes. The
//! credential artifacts are hard-blocked by file name no matter which
//! directory the path points into.

use std::path::{Component, Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};

/// Default read cap (1 MiB).
const DEFAULT_MAX_READ: u64 = 1024 * 1024;

/// File names the filesystem surface refuses to touch, in any directory.
const BLOCKED_FILENAMES: &[&str] = &["credentials.enc", "credential.key", "unlock.json"];

fn err(message: impl Into<String>) -> Value {
    json!({"success": false, "error": message.into()})
}

/// Validate a user-supplied path: absolute, no traversal, no null bytes, not
/// a blocked credential file.
fn validate_path(path: &str) -> Result<PathBuf, Value> {
    if path.is_empty() {
        return Err(err("Path is required"));
    }
    if path.contains('\0') {
        return Err(err("Path contains null byte"));
    }
    let p = Path::new(path);
    if !p.is_absolute() {
        return Err(err("Path must be absolute"));
    }
    if p.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(err("Path must not contain '..'"));
    }
    if let Some(name) = p.file_name().and_then(|n| n.to_str()) {
        if BLOCKED_FILENAMES
            .iter()
            .any(|blocked| name.eq_ignore_ascii_case(blocked))
        {
            return Err(err("Access to credential files is not permitted"));
        }
    }
    Ok(p.to_path_buf())
}

fn entry_json(path: &Path) -> Value {
    let meta = std::fs::symlink_metadata(path).ok();
    let entry_type = match &meta {
        Some(m) if m.is_dir() => "dir",
        Some(m) if m.file_type().is_symlink() => "symlink",
        Some(m) if m.is_file() => "file",
        Some(_) => "other",
        None => "unknown",
    };
    let size = meta.as_ref().map_or(0, std::fs::Metadata::len);
    let modified = meta
        .as_ref()
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs());
    json!({
        "name": path.file_name().map_or_else(String::new, |n| n.to_string_lossy().into_owned()),
        "path": path.to_string_lossy(),
        "type": entry_type,
        "size": size,
        "modified": modified,
    })
}

/// `fs_list` — list a directory, optionally recursive to `max_depth`.
pub fn list(path: &str, recursive: bool, max_depth: u32) -> Value {
    let root = match validate_path(path) {
        Ok(p) => p,
        Err(e) => return e,
    };
    if !root.is_dir() {
        return err(format!("Not a directory: {path}"));
    }

    let depth_limit = if recursive { max_depth.max(1) } else { 1 };
    let mut entries = Vec::new();
    let mut stack = vec![(root.clone(), 1u32)];
    while let Some((dir, depth)) = stack.pop() {
        let read = match std::fs::read_dir(&dir) {
            Ok(r) => r,
            Err(e) => {
                if dir == root {
                    return err(format!("Failed to list {path}: {e}"));
                }
                continue;
            }
        };
        for item in read.flatten() {
            let item_path = item.path();
            entries.push(entry_json(&item_path));
            if item_path.is_dir() && depth < depth_limit {
                stack.push((item_path, depth + 1));
            }
        }
    }
    entries.sort_by(|a, b| a["path"].as_str().cmp(&b["path"].as_str()));
    json!({"success": true, "path": path, "entries": entries, "count": entries.len()})
}

/// `fs_read` — read a file, capped at `max_bytes`. Binary content comes back
/// base64-encoded with `encoding: "base64"`.
pub fn read(path: &str, max_bytes: Option<u64>) -> Value {
    let p = match validate_path(path) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let cap = max_bytes.unwrap_or(DEFAULT_MAX_READ);

    let data = match std::fs::read(&p) {
        Ok(d) => d,
        Err(e) => return err(format!("Failed to read {path}: {e}")),
    };
    let total = data.len() as u64;
    let truncated = total > cap;
    let slice = &data[..data.len().min(cap as usize)];

    match std::str::from_utf8(slice) {
        Ok(text) => json!({
            "success": true,
            "path": path,
            "content": text,
            "size": total,
            "truncated": truncated,
        }),
        Err(_) => json!({
            "success": true,
            "path": path,
            "content": BASE64.encode(slice),
            "encoding": "base64",
            "size": total,
            "truncated": truncated,
        }),
    }
}

/// `fs_read_range` — read lines `start_line..=end_line` (1-based,
/// `end_line = -1` means EOF). `end < start` yields empty content;
/// `start < 1` is an error.
pub fn read_range(path: &str, start_line: i64, end_line: i64) -> Value {
    let p = match validate_path(path) {
        Ok(p) => p,
        Err(e) => return e,
    };
    if start_line < 1 {
        return err("start_line must be >= 1");
    }

    let contents = match std::fs::read_to_string(&p) {
        Ok(c) => c,
        Err(e) => return err(format!("Failed to read {path}: {e}")),
    };
    let lines: Vec<&str> = contents.lines().collect();
    let total = lines.len() as i64;

    let end = if end_line < 0 { total } else { end_line.min(total) };
    let content = if end < start_line || start_line > total {
        String::new()
    } else {
        lines[(start_line - 1) as usize..end as usize].join("\n")
    };

    json!({
        "success": true,
        "path": path,
        "content": content,
        "start_line": start_line,
        "end_line": end,
        "total_lines": total,
    })
}

/// `fs_write` — overwrite (atomically) or append. `create_directories`
/// makes the parent tree first.
pub fn write(path: &str, content: &str, mode: &str, create_directories: bool) -> Value {
    let p = match validate_path(path) {
        Ok(p) => p,
        Err(e) => return e,
    };
    if create_directories {
        if let Some(parent) = p.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return err(format!("Failed to create directories: {e}"));
            }
        }
    }

    let result = match mode {
        "append" => {
            use std::io::Write;
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&p)
                .and_then(|mut f| f.write_all(content.as_bytes()))
        }
        "overwrite" | "" => crate::util::atomic_write(&p, content.as_bytes()),
        other => return err(format!("Unknown write mode: {other}")),
    };

    match result {
        Ok(()) => json!({
            "success": true,
            "path": path,
            "bytes_written": content.len(),
            "mode": if mode.is_empty() { "overwrite" } else { mode },
        }),
        Err(e) => err(format!("Failed to write {path}: {e}")),
    }
}

/// `fs_delete` — remove a file, or a directory when `recursive`.
pub fn delete(path: &str, recursive: bool) -> Value {
    let p = match validate_path(path) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let result = if p.is_dir() {
        if recursive {
            std::fs::remove_dir_all(&p)
        } else {
            std::fs::remove_dir(&p)
        }
    } else {
        std::fs::remove_file(&p)
    };
    match result {
        Ok(()) => json!({"success": true, "path": path}),
        Err(e) => err(format!("Failed to delete {path}: {e}")),
    }
}

/// `fs_move` — rename a file or directory.
pub fn move_path(source: &str, destination: &str) -> Value {
    let src = match validate_path(source) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let dst = match validate_path(destination) {
        Ok(p) => p,
        Err(e) => return e,
    };
    match std::fs::rename(&src, &dst) {
        Ok(()) => json!({"success": true, "source": source, "destination": destination}),
        Err(e) => err(format!("Failed to move {source}: {e}")),
    }
}

/// `fs_search` — glob for files under `path`.
pub fn search(path: &str, pattern: &str, max_results: usize) -> Value {
    if let Err(e) = validate_path(path) {
        return e;
    }
    let full_pattern = format!("{}/{}", path.trim_end_matches('/'), pattern);
    let walker = match glob::glob(&full_pattern) {
        Ok(w) => w,
        Err(e) => return err(format!("Invalid glob pattern: {e}")),
    };

    let mut matches = Vec::new();
    let mut truncated = false;
    for entry in walker.flatten() {
        if matches.len() >= max_results {
            truncated = true;
            break;
        }
        matches.push(entry.to_string_lossy().into_owned());
    }
    json!({
        "success": true,
        "path": path,
        "pattern": pattern,
        "matches": matches,
        "count": matches.len(),
        "truncated": truncated,
    })
}

/// Per-file size guard for grep (10 MiB) — bigger files are skipped.
const GREP_MAX_FILE: u64 = 10 * 1024 * 1024;

/// `fs_grep` — regex search through file contents under `path`, filtered by
/// a file-name glob.
pub fn grep(path: &str, pattern: &str, file_glob: Option<&str>, max_matches: usize) -> Value {
    let root = match validate_path(path) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let re = match regex::Regex::new(pattern) {
        Ok(r) => r,
        Err(e) => return err(format!("Invalid regex: {e}")),
    };
    let name_filter = match file_glob.filter(|g| !g.is_empty() && *g != "*") {
        Some(g) => match glob::Pattern::new(g) {
            Ok(p) => Some(p),
            Err(e) => return err(format!("Invalid glob filter: {e}")),
        },
        None => None,
    };

    let mut matches = Vec::new();
    let mut truncated = false;
    let mut stack = vec![root];
    'outer: while let Some(dir) = stack.pop() {
        let Ok(read) = std::fs::read_dir(&dir) else {
            continue;
        };
        for item in read.flatten() {
            let item_path = item.path();
            if item_path.is_dir() {
                stack.push(item_path);
                continue;
            }
            if let Some(ref filter) = name_filter {
                let name = item_path
                    .file_name()
                    .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
                if !filter.matches(&name) {
                    continue;
                }
            }
            if std::fs::metadata(&item_path).map_or(true, |m| m.len() > GREP_MAX_FILE) {
                continue;
            }
            let Ok(contents) = std::fs::read_to_string(&item_path) else {
                continue; // binary or unreadable
            };
            for (idx, line) in contents.lines().enumerate() {
                if re.is_match(line) {
                    matches.push(json!({
                        "file": item_path.to_string_lossy(),
                        "line_number": idx + 1,
                        "line": line,
                    }));
                    if matches.len() >= max_matches {
                        truncated = true;
                        break 'outer;
                    }
                }
            }
        }
    }

    json!({
        "success": true,
        "path": path,
        "pattern": pattern,
        "matches": matches,
        "count": matches.len(),
        "truncated": truncated,
    })
}

/// `fs_patch` — apply edit operations to a text file.
///
/// Operations, applied in order:
/// - `{"op":"replace", "find":…, "replace":…, "all":bool}` — `find` must occur
/// - `{"op":"insert", "line":N, "content":…}` — insert before 1-based line N
/// - `{"op":"delete", "start_line":N, "end_line":M}` — inclusive range
///
/// `dry_run` returns the would-be content without writing.
pub fn patch(path: &str, operations: &[Value], dry_run: bool) -> Value {
    let p = match validate_path(path) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let original = match std::fs::read_to_string(&p) {
        Ok(c) => c,
        Err(e) => return err(format!("Failed to read {path}: {e}")),
    };

    let mut content = original;
    for (idx, op) in operations.iter().enumerate() {
        let kind = op.get("op").and_then(Value::as_str).unwrap_or("");
        let result = match kind {
            "replace" => apply_replace(&content, op),
            "insert" => apply_insert(&content, op),
            "delete" => apply_delete(&content, op),
            other => Err(format!("Unknown patch op: {other:?}")),
        };
        match result {
            Ok(updated) => content = updated,
            Err(e) => return err(format!("Operation {idx}: {e}")),
        }
    }

    if dry_run {
        return json!({
            "success": true,
            "path": path,
            "dry_run": true,
            "operations_applied": operations.len(),
            "content": content,
        });
    }
    match crate::util::atomic_write(&p, content.as_bytes()) {
        Ok(()) => json!({
            "success": true,
            "path": path,
            "dry_run": false,
            "operations_applied": operations.len(),
        }),
        Err(e) => err(format!("Failed to write {path}: {e}")),
    }
}

fn apply_replace(content: &str, op: &Value) -> Result<String, String> {
    let find = op
        .get("find")
        .and_then(Value::as_str)
        .ok_or("replace needs 'find'")?;
    let replace = op.get("replace").and_then(Value::as_str).unwrap_or("");
    let all = op.get("all").and_then(Value::as_bool).unwrap_or(false);
    if find.is_empty() {
        return Err("'find' must not be empty".to_string());
    }
    if !content.contains(find) {
        return Err(format!("pattern not found: {find:?}"));
    }
    Ok(if all {
        content.replace(find, replace)
    } else {
        content.replacen(find, replace, 1)
    })
}

fn apply_insert(content: &str, op: &Value) -> Result<String, String> {
    let line = op
        .get("line")
        .and_then(Value::as_u64)
        .ok_or("insert needs 'line'")?;
    let inserted = op
        .get("content")
        .and_then(Value::as_str)
        .ok_or("insert needs 'content'")?;
    if line < 1 {
        return Err("'line' must be >= 1".to_string());
    }
    let mut lines: Vec<&str> = content.lines().collect();
    let at = (line - 1) as usize;
    if at > lines.len() {
        return Err(format!(
            "'line' {line} is past the end of the file ({} lines)",
            lines.len()
        ));
    }
    lines.insert(at, inserted);
    Ok(join_lines(&lines, content.ends_with('\n')))
}

fn apply_delete(content: &str, op: &Value) -> Result<String, String> {
    let start = op
        .get("start_line")
        .and_then(Value::as_u64)
        .ok_or("delete needs 'start_line'")?;
    let end = op
        .get("end_line")
        .and_then(Value::as_u64)
        .unwrap_or(start);
    if start < 1 || end < start {
        return Err("invalid line range".to_string());
    }
    let mut lines: Vec<&str> = content.lines().collect();
    let total = lines.len() as u64;
    if start > total {
        return Err(format!("'start_line' {start} is past the end ({total} lines)"));
    }
    lines.drain((start - 1) as usize..end.min(total) as usize);
    Ok(join_lines(&lines, content.ends_with('\n')))
}

fn join_lines(lines: &[&str], trailing_newline: bool) -> String {
    let mut joined = lines.join("\n");
    if trailing_newline && !joined.is_empty() {
        joined.push('\n');
    }
    joined
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn relative_and_traversal_paths_are_rejected() {
        assert_eq!(list("relative/path", false, 1)["success"], false);
        assert_eq!(read("/tmp/../etc/passwd", None)["success"], false);
        assert_eq!(read("", None)["success"], false);
    }

    #[test]
    fn credential_files_are_blocked_everywhere() {
        for path in [
            "/etc/screencontrol/credentials.enc",
            "/tmp/anywhere/credentials.enc",
            "/home/user/Credential.Key",
        ] {
            let v = read(path, None);
            assert_eq!(v["success"], false, "{path}");
            assert!(v["error"].as_str().unwrap().contains("credential"));
            assert_eq!(delete(path, false)["success"], false);
            assert_eq!(write(path, "x", "overwrite", false)["success"], false);
        }
    }

    #[test]
    fn read_and_write_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt").to_string_lossy().into_owned();

        let w = write(&path, "hello\n", "overwrite", false);
        assert_eq!(w["success"], true);
        assert_eq!(w["bytes_written"], 6);

        let r = read(&path, None);
        assert_eq!(r["content"], "hello\n");
        assert!(r.get("encoding").is_none());

        let a = write(&path, "more\n", "append", false);
        assert_eq!(a["success"], true);
        assert_eq!(read(&path, None)["content"], "hello\nmore\n");
    }

    #[test]
    fn read_caps_and_flags_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = tmp_file(&dir, "big.txt", &"x".repeat(100));
        let r = read(&path, Some(10));
        assert_eq!(r["truncated"], true);
        assert_eq!(r["content"].as_str().unwrap().len(), 10);
        assert_eq!(r["size"], 100);
    }

    #[test]
    fn binary_reads_come_back_base64() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, [0u8, 159, 146, 150]).unwrap();
        let r = read(&path.to_string_lossy(), None);
        assert_eq!(r["encoding"], "base64");
        let decoded = BASE64.decode(r["content"].as_str().unwrap()).unwrap();
        assert_eq!(decoded, vec![0u8, 159, 146, 150]);
    }

    #[test]
    fn read_range_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let path = tmp_file(&dir, "lines.txt", "one\ntwo\nthree\nfour\n");

        // end = -1 → through EOF
        let r = read_range(&path, 2, -1);
        assert_eq!(r["content"], "two\nthree\nfour");
        assert_eq!(r["total_lines"], 4);

        // end < start → empty
        assert_eq!(read_range(&path, 3, 2)["content"], "");

        // start < 1 → error
        assert_eq!(read_range(&path, 0, 2)["success"], false);

        // plain range
        assert_eq!(read_range(&path, 1, 2)["content"], "one\ntwo");

        // start past EOF → empty, not an error
        assert_eq!(read_range(&path, 10, -1)["content"], "");
    }

    #[test]
    fn write_creates_directories_on_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join("a/b/c.txt")
            .to_string_lossy()
            .into_owned();
        assert_eq!(write(&path, "x", "overwrite", false)["success"], false);
        assert_eq!(write(&path, "x", "overwrite", true)["success"], true);
        assert_eq!(read(&path, None)["content"], "x");
    }

    #[test]
    fn delete_respects_recursive_flag() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("f.txt"), "x").unwrap();
        let sub_str = sub.to_string_lossy().into_owned();

        assert_eq!(delete(&sub_str, false)["success"], false);
        assert_eq!(delete(&sub_str, true)["success"], true);
        assert!(!sub.exists());
    }

    #[test]
    fn move_renames() {
        let dir = tempfile::tempdir().unwrap();
        let src = tmp_file(&dir, "old.txt", "data");
        let dst = dir.path().join("new.txt").to_string_lossy().into_owned();
        assert_eq!(move_path(&src, &dst)["success"], true);
        assert_eq!(read(&dst, None)["content"], "data");
        assert_eq!(read(&src, None)["success"], false);
    }

    #[test]
    fn search_globs_and_caps() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            tmp_file(&dir, &format!("f{i}.log"), "");
        }
        tmp_file(&dir, "other.txt", "");
        let base = dir.path().to_string_lossy().into_owned();

        let all = search(&base, "*.log", 100);
        assert_eq!(all["count"], 5);
        assert_eq!(all["truncated"], false);

        let capped = search(&base, "*.log", 2);
        assert_eq!(capped["count"], 2);
        assert_eq!(capped["truncated"], true);
    }

    #[test]
    fn grep_matches_lines_with_filter() {
        let dir = tempfile::tempdir().unwrap();
        tmp_file(&dir, "a.rs", "fn main() {}\nlet x = 1;\n");
        tmp_file(&dir, "b.txt", "fn not_rust() {}\n");
        let base = dir.path().to_string_lossy().into_owned();

        let hits = grep(&base, r"^fn\s", Some("*.rs"), 100);
        assert_eq!(hits["count"], 1);
        assert_eq!(hits["matches"][0]["line_number"], 1);

        let any = grep(&base, "fn", None, 100);
        assert_eq!(any["count"], 2);

        assert_eq!(grep(&base, "(bad", None, 100)["success"], false);
    }

    #[test]
    fn patch_ops_and_dry_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = tmp_file(&dir, "cfg.txt", "alpha\nbeta\ngamma\n");

        let dry = patch(
            &path,
            &[
                json!({"op": "replace", "find": "beta", "replace": "BETA"}),
                json!({"op": "insert", "line": 1, "content": "zero"}),
            ],
            true,
        );
        assert_eq!(dry["dry_run"], true);
        assert_eq!(dry["content"], "zero\nalpha\nBETA\ngamma\n");
        // dry run leaves the file alone
        assert_eq!(read(&path, None)["content"], "alpha\nbeta\ngamma\n");

        let applied = patch(
            &path,
            &[json!({"op": "delete", "start_line": 2, "end_line": 3})],
            false,
        );
        assert_eq!(applied["success"], true);
        assert_eq!(read(&path, None)["content"], "alpha\n");

        // replace with missing pattern fails the whole patch
        let bad = patch(
            &path,
            &[json!({"op": "replace", "find": "nope", "replace": "x"})],
            false,
        );
        assert_eq!(bad["success"], false);
    }
}
