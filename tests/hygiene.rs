//! Hygiene: enforces coding standards at test time.
//!
//! Scans the production source tree for patterns that panic or drop errors
//! on the floor. Each pattern has a budget. Adding a hit means removing one
//! elsewhere first; budgets only go down.
#![allow(clippy::absurd_extreme_comparisons)]

use std::fs;
use std::path::Path;

// Panics.
const MAX_UNWRAP: usize = 0;
const MAX_EXPECT: usize = 0;
const MAX_PANIC: usize = 0;
const MAX_UNREACHABLE: usize = 0;
const MAX_TODO: usize = 0;
const MAX_UNIMPLEMENTED: usize = 0;

// Silent loss. Remaining `.ok()` calls are optional env lookups and lenient parsing.
const MAX_SILENT_DISCARD: usize = 0;
const MAX_DOT_OK: usize = 5;

const MAX_ALLOW_DEAD_CODE: usize = 0;

struct SourceFile {
    path: String,
    content: String,
}

/// Production `.rs` files under `src/`. Sibling `*_test.rs` modules are skipped.
fn source_files() -> Vec<SourceFile> {
    let mut files = Vec::new();
    collect_rs_files(Path::new("src"), &mut files);
    files
}

fn collect_rs_files(dir: &Path, out: &mut Vec<SourceFile>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rs_files(&path, out);
            continue;
        }
        let path_str = path.to_string_lossy().to_string();
        if !path_str.ends_with(".rs") || path_str.ends_with("_test.rs") {
            continue;
        }
        if let Ok(content) = fs::read_to_string(&path) {
            out.push(SourceFile { path: path_str, content });
        }
    }
}

fn assert_budget(pattern: &str, max: usize) {
    let files = source_files();
    assert!(!files.is_empty(), "no sources found; run from the crate root");

    let hits: Vec<(String, usize)> = files
        .iter()
        .filter_map(|file| {
            let count = file.content.lines().filter(|line| line.contains(pattern)).count();
            (count > 0).then(|| (file.path.clone(), count))
        })
        .collect();
    let count: usize = hits.iter().map(|(_, c)| c).sum();
    let listing = hits
        .iter()
        .map(|(path, count)| format!("  {path}: {count}"))
        .collect::<Vec<_>>()
        .join("\n");
    assert!(count <= max, "`{pattern}` budget exceeded: found {count}, max {max}.\n{listing}");
}

#[test]
fn unwrap_budget() {
    assert_budget(".unwrap()", MAX_UNWRAP);
}

#[test]
fn expect_budget() {
    assert_budget(".expect(", MAX_EXPECT);
}

#[test]
fn panic_budget() {
    assert_budget("panic!(", MAX_PANIC);
}

#[test]
fn unreachable_budget() {
    assert_budget("unreachable!(", MAX_UNREACHABLE);
}

#[test]
fn todo_budget() {
    assert_budget("todo!(", MAX_TODO);
}

#[test]
fn unimplemented_budget() {
    assert_budget("unimplemented!(", MAX_UNIMPLEMENTED);
}

#[test]
fn silent_discard_budget() {
    assert_budget("let _ =", MAX_SILENT_DISCARD);
}

#[test]
fn dot_ok_budget() {
    assert_budget(".ok()", MAX_DOT_OK);
}

#[test]
fn allow_dead_code_budget() {
    assert_budget("#[allow(dead_code)]", MAX_ALLOW_DEAD_CODE);
}
