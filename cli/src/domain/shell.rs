//! POSIX shell quoting for commands sent to remote hosts.

/// Quote `s` for a POSIX shell using single quotes.
///
/// Embedded single quotes become `'\''`.
#[must_use]
pub fn shell_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// Command that replaces `path` with exactly `content`.
#[must_use]
pub fn write_file_command(path: &str, content: &str) -> String {
    format!("printf '%s' {} > {path}", shell_quote(content))
}

/// Command that prints `path`, or nothing when the file does not exist.
#[must_use]
pub fn read_file_command(path: &str) -> String {
    format!("cat {path} 2>/dev/null || true")
}
