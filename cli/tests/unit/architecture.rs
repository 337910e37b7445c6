//! Structural tests for architectural boundary enforcement.
//!
//! These scan source files so the layering holds as the code grows: the
//! domain stays pure, infra never reaches up into presentation, and commands
//! leave output formatting to the renderers.

use std::path::{Path, PathBuf};

fn src_dir(sub: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("src").join(sub)
}

/// Collect all `.rs` files under a directory recursively.
fn collect_rs_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                files.extend(collect_rs_files(&path));
            } else if path.extension().and_then(|e| e.to_str()) == Some("rs") {
                files.push(path);
            }
        }
    }
    files
}

/// Track brace depth and report whether a line sits inside a `#[cfg(test)]` block.
struct CfgTestTracker {
    in_test_block: bool,
    brace_depth: i32,
    test_block_start_depth: i32,
}

impl CfgTestTracker {
    fn new() -> Self {
        Self {
            in_test_block: false,
            brace_depth: 0,
            test_block_start_depth: 0,
        }
    }

    fn process_line(&mut self, line: &str) -> bool {
        if line.trim().starts_with("#[cfg(") && line.contains("test") {
            self.in_test_block = true;
            self.test_block_start_depth = self.brace_depth;
        }
        for ch in line.chars() {
            match ch {
                '{' => self.brace_depth += 1,
                '}' => {
                    self.brace_depth -= 1;
                    if self.in_test_block && self.brace_depth <= self.test_block_start_depth {
                        self.in_test_block = false;
                    }
                }
                _ => {}
            }
        }
        self.in_test_block
    }
}

/// Non-comment lines outside test modules, with their 1-based line numbers.
fn production_lines(path: &Path) -> Vec<(usize, String)> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let mut tracker = CfgTestTracker::new();
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !tracker.process_line(line))
        .filter(|(_, line)| {
            let trimmed = line.trim();
            !trimmed.starts_with("//") && !trimmed.starts_with("/*") && !trimmed.starts_with('*')
        })
        .map(|(i, line)| (i + 1, line.to_string()))
        .collect()
}

fn scan(dir: &str, forbidden: &[&str]) -> Vec<String> {
    let root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let mut violations = Vec::new();
    for file in collect_rs_files(&src_dir(dir)) {
        let rel = file.strip_prefix(root).unwrap_or(&file).display().to_string();
        for (lineno, line) in production_lines(&file) {
            if let Some(pattern) = forbidden.iter().find(|p| line.contains(**p)) {
                violations.push(format!("{rel}:{lineno}: `{pattern}` in: {}", line.trim()));
            }
        }
    }
    violations
}

#[test]
fn domain_is_pure() {
    let violations = scan(
        "domain",
        &[
            "tokio::",
            "std::fs",
            "std::process",
            "std::net::TcpStream",
            "crate::infra",
            "crate::application",
            "crate::commands",
            "crate::output",
        ],
    );
    assert!(
        violations.is_empty(),
        "domain must not perform I/O or depend on outer layers:\n{}",
        violations.join("\n")
    );
}

#[test]
fn application_depends_on_ports_not_infra() {
    let violations = scan(
        "application",
        &["crate::infra", "crate::commands", "crate::output", "println!", "eprintln!"],
    );
    assert!(
        violations.is_empty(),
        "application services must only use ports:\n{}",
        violations.join("\n")
    );
}

#[test]
fn infra_has_no_imports_from_commands_or_output() {
    let violations = scan("infra", &["crate::commands", "crate::output"]);
    assert!(
        violations.is_empty(),
        "infra must not depend on presentation:\n{}",
        violations.join("\n")
    );
}

#[test]
fn infra_has_no_print_macros_outside_tests() {
    let violations = scan("infra", &["println!", "eprintln!", "print!(", "eprint!("]);
    assert!(
        violations.is_empty(),
        "infra must report through tracing or return values:\n{}",
        violations.join("\n")
    );
}

#[test]
fn no_inline_json_branching_in_commands() {
    let violations = scan(
        "commands",
        &["json: bool", "if json", "if !json", "is_json()", "serde_json::"],
    );
    assert!(
        violations.is_empty(),
        "commands must render through the Renderer:\n{}",
        violations.join("\n")
    );
}

#[test]
fn command_handlers_accept_app_context() {
    for file in collect_rs_files(&src_dir("commands")) {
        if file.file_name().and_then(|n| n.to_str()) == Some("mod.rs") {
            continue;
        }
        let content = std::fs::read_to_string(&file).unwrap_or_default();
        assert!(
            content.contains("fn run(app: &AppContext"),
            "{} has no `run(app: &AppContext, ..)` handler",
            file.display()
        );
    }
}
