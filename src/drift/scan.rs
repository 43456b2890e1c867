use std::collections::BTreeSet;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use anyhow::Context;
use regex::Regex;
use serde::Serialize;
use walkdir::{DirEntry, WalkDir};

const PERMISSION_SHAPE: &str = r"[a-z][a-z0-9_-]*:[a-z][a-z0-9_-]*:(?:own|organization|provider|all)";

/// A permission string passed to a guard, with where it was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionReference {
    pub permission: String,
    pub file: PathBuf,
    pub line: usize,
}

impl PermissionReference {
    pub fn location(&self) -> String {
        format!("{}:{}", self.file.display(), self.line)
    }
}

/// Text extractors for guard calls, seed SQL and documentation.
pub struct Scanner {
    test_item: Regex,
    guard_call: Regex,
    string_literal: Regex,
    seeded: Regex,
    documented: Regex,
}

impl Scanner {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            test_item: Regex::new(r"#\[cfg\(\s*test\s*\)\]|\bmod\s+tests\b")?,
            guard_call: Regex::new(
                r#"require_(?:any_)?permission\s*\(\s*(?:&\s*)?(?:\[(?P<list>[^\]]*)\]|"(?P<single>[^"]*)")"#,
            )?,
            string_literal: Regex::new(r#""([^"]*)""#)?,
            seeded: Regex::new(&format!(r"'({PERMISSION_SHAPE})'"))?,
            documented: Regex::new(&format!(r"\b({PERMISSION_SHAPE})\b"))?,
        })
    }

    /// Every literal permission passed to `require_permission` or
    /// `require_any_permission` outside test-only code, malformed ones
    /// included.
    pub fn guard_references(&self, file: &Path, source: &str) -> Vec<PermissionReference> {
        let source = self.mask_test_code(source);
        let source = source.as_str();
        let mut references = Vec::new();
        for captures in self.guard_call.captures_iter(source) {
            if let Some(single) = captures.name("single") {
                references.push(PermissionReference {
                    permission: single.as_str().to_string(),
                    file: file.to_path_buf(),
                    line: line_of(source, single.start()),
                });
            }
            if let Some(list) = captures.name("list") {
                for literal in self.string_literal.captures_iter(list.as_str()) {
                    if let Some(value) = literal.get(1) {
                        references.push(PermissionReference {
                            permission: value.as_str().to_string(),
                            file: file.to_path_buf(),
                            line: line_of(source, list.start() + value.start()),
                        });
                    }
                }
            }
        }
        references
    }

    /// Blanks out items gated on the test cfg and `tests` modules. Newlines
    /// are kept so reported line numbers stay valid.
    fn mask_test_code(&self, source: &str) -> String {
        let bytes = source.as_bytes();
        let non_code = non_code_spans(bytes);
        let mut masked = bytes.to_vec();
        let mut resume = 0;
        for marker in self.test_item.find_iter(source) {
            if marker.start() < resume || non_code.iter().any(|span| span.contains(&marker.start())) {
                continue;
            }
            let end = item_end(bytes, marker.end());
            for byte in &mut masked[marker.start()..end] {
                if *byte != b'\n' {
                    *byte = b' ';
                }
            }
            resume = end;
        }
        // Only whole characters were replaced with ASCII, so this is lossless.
        String::from_utf8_lossy(&masked).into_owned()
    }

    /// Quoted permission names in seed SQL.
    pub fn seeded_permissions(&self, sql: &str) -> BTreeSet<String> {
        self.seeded
            .captures_iter(sql)
            .filter_map(|captures| captures.get(1))
            .map(|m| m.as_str().to_string())
            .collect()
    }

    /// Permission-shaped words anywhere in prose.
    pub fn documented_permissions(&self, text: &str) -> BTreeSet<String> {
        self.documented
            .captures_iter(text)
            .filter_map(|captures| captures.get(1))
            .map(|m| m.as_str().to_string())
            .collect()
    }
}

/// If a comment, string or char literal starts at `i`, returns where it ends.
fn skip_non_code(bytes: &[u8], i: usize) -> Option<usize> {
    match bytes[i] {
        b'/' if bytes.get(i + 1) == Some(&b'/') => Some(
            bytes[i..]
                .iter()
                .position(|b| *b == b'\n')
                .map_or(bytes.len(), |p| i + p),
        ),
        b'/' if bytes.get(i + 1) == Some(&b'*') => Some(
            bytes[i + 2..]
                .windows(2)
                .position(|w| w == b"*/")
                .map_or(bytes.len(), |p| i + 2 + p + 2),
        ),
        b'"' => Some(string_end(bytes, i + 1)),
        b'r' => raw_string_end(bytes, i),
        b'\'' => char_literal_end(bytes, i),
        _ => None,
    }
}

fn string_end(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn raw_string_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    let mut hashes = 0;
    while bytes.get(i) == Some(&b'#') {
        hashes += 1;
        i += 1;
    }
    if bytes.get(i) != Some(&b'"') {
        return None;
    }
    i += 1;
    while i < bytes.len() {
        let closes = bytes[i] == b'"'
            && bytes
                .get(i + 1..i + 1 + hashes)
                .is_some_and(|tail| tail.iter().all(|b| *b == b'#'));
        if closes {
            return Some(i + 1 + hashes);
        }
        i += 1;
    }
    Some(bytes.len())
}

/// `'x'`, `'\n'` or a multi-byte char; `None` for lifetimes.
fn char_literal_end(bytes: &[u8], start: usize) -> Option<usize> {
    let first = *bytes.get(start + 1)?;
    if first == b'\\' {
        let close = bytes[start + 2..].iter().position(|b| *b == b'\'')?;
        return Some(start + 2 + close + 1);
    }
    let width = match first {
        0x00..=0x7f => 1,
        0xf0..=0xff => 4,
        0xe0..=0xef => 3,
        _ => 2,
    };
    (bytes.get(start + 1 + width) == Some(&b'\'')).then_some(start + 2 + width)
}

fn non_code_spans(bytes: &[u8]) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match skip_non_code(bytes, i) {
            Some(end) => {
                spans.push(i..end);
                i = end.max(i + 1);
            }
            None => i += 1,
        }
    }
    spans
}

/// End of the item that starts at `from`: through its closing brace, or its
/// semicolon for brace-less items.
fn item_end(bytes: &[u8], from: usize) -> usize {
    let mut depth = 0usize;
    let mut i = from;
    while i < bytes.len() {
        if let Some(end) = skip_non_code(bytes, i) {
            i = end.max(i + 1);
            continue;
        }
        match bytes[i] {
            b'{' => depth += 1,
            b'}' if depth == 0 => return i,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return i + 1;
                }
            }
            b';' if depth == 0 => return i + 1,
            _ => {}
        }
        i += 1;
    }
    bytes.len()
}

fn line_of(source: &str, offset: usize) -> usize {
    source[..offset].matches('\n').count() + 1
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name == "target" || name.starts_with('.'))
}

/// Files under `roots` with one of `extensions`, in a stable order.
/// A root may also be a single file.
pub fn collect_files(roots: &[PathBuf], extensions: &[&str]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for root in roots {
        if !root.exists() {
            anyhow::bail!("path does not exist: {}", root.display());
        }
        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_skipped_dir(entry));
        for entry in walker {
            let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
            let matches_extension = entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| extensions.contains(&ext));
            if entry.file_type().is_file() && matches_extension {
                files.push(entry.into_path());
            }
        }
    }
    Ok(files)
}

pub fn read(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanner() -> Scanner {
        Scanner::new().unwrap()
    }

    #[test]
    fn finds_single_and_any_of_guards_with_lines() {
        let (single, any) = ("require_permission", "require_any_permission");
        let source = format!(
            "fn routes() {{\n    guard.{single}(\"contract:read:all\")?;\n    guard.{any}(&[\n        \"rbac:manage:all\",\n        \"user:manage:all\",\n    ])?;\n}}\n"
        );
        let refs = scanner().guard_references(Path::new("src/routes.rs"), &source);
        let found: Vec<(String, usize)> = refs.iter().map(|r| (r.permission.clone(), r.line)).collect();
        assert_eq!(
            found,
            vec![
                ("contract:read:all".to_string(), 2),
                ("rbac:manage:all".to_string(), 4),
                ("user:manage:all".to_string(), 5),
            ]
        );
        assert_eq!(refs[0].location(), "src/routes.rs:2");
    }

    #[test]
    fn keeps_malformed_guard_strings() {
        let source = "guard.require_permission(\"contract.read\")";
        let refs = scanner().guard_references(Path::new("a.rs"), source);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].permission, "contract.read");
    }

    #[test]
    fn ignores_guards_called_with_variables() {
        let source = "guard.require_permission(name)";
        assert!(scanner().guard_references(Path::new("a.rs"), source).is_empty());
    }

    #[test]
    fn skips_guards_inside_test_modules() {
        let source = "fn routes() {\n    guard.require_permission(\"rbac:read:all\")?;\n}\n\n#[cfg(test)]\nmod tests {\n    fn fixture() {\n        let s = \"}\";\n        guard.require_permission(\"booking:read:own\");\n    }\n}\n\nfn later() {\n    guard.require_permission(\"user:manage:all\");\n}\n";
        let refs = scanner().guard_references(Path::new("src/routes.rs"), source);
        let found: Vec<(String, usize)> = refs.iter().map(|r| (r.permission.clone(), r.line)).collect();
        assert_eq!(
            found,
            vec![("rbac:read:all".to_string(), 2), ("user:manage:all".to_string(), 14)]
        );
    }

    #[test]
    fn skips_test_gated_items_but_not_mentions_in_comments() {
        let source = "// a #[cfg(test)] note\nfn a() { guard.require_permission(\"rbac:read:all\"); }\n#[cfg(test)]\nfn b() { guard.require_permission(\"booking:read:own\"); }\n";
        let refs = scanner().guard_references(Path::new("a.rs"), source);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].permission, "rbac:read:all");
        assert_eq!(refs[0].line, 2);
    }

    #[test]
    fn extracts_seeded_names_only_from_quotes() {
        let sql = "INSERT INTO permissions (name) VALUES ('booking:read:own'), ('rbac:read:all');\n-- see user:read:own";
        let seeded = scanner().seeded_permissions(sql);
        assert_eq!(seeded.len(), 2);
        assert!(seeded.contains("booking:read:own"));
        assert!(!seeded.contains("user:read:own"));
    }

    #[test]
    fn extracts_documented_names_from_prose() {
        let text = "Managers hold `contract:update:organization`; see also payroll:export:organization.";
        let documented = scanner().documented_permissions(text);
        assert!(documented.contains("contract:update:organization"));
        assert!(documented.contains("payroll:export:organization"));
        assert!(!scanner().documented_permissions("ratio 1:2:3").contains("1:2:3"));
    }
}
