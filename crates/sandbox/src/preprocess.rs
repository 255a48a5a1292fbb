//! Textual shader preprocessing: `#include` expansion and pass-section discovery.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

/// Source text with its includes inlined.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedSource {
    pub text: String,
    /// Every file inlined, in discovery order.
    pub includes: Vec<PathBuf>,
    /// Includes that could not be found, at the path next to the including file.
    pub missing: Vec<PathBuf>,
}

fn include_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\s*#\s*include\s+["<]([^">]+)[">]"#).expect("valid include pattern")
    })
}

/// Inlines `#include "file"` / `#include <file>` directives.
///
/// Paths are looked up next to the including file first, then in each of
/// `folders`. Each file is inlined once; repeated or circular includes are
/// replaced by a comment.
pub fn resolve_includes(source: &str, origin: &Path, folders: &[PathBuf]) -> ResolvedSource {
    let mut resolved = ResolvedSource::default();
    let mut visited = HashSet::new();
    if let Ok(canonical) = fs::canonicalize(origin) {
        visited.insert(canonical);
    }
    expand(source, origin, folders, &mut visited, &mut resolved);
    resolved
}

fn expand(
    source: &str,
    origin: &Path,
    folders: &[PathBuf],
    visited: &mut HashSet<PathBuf>,
    out: &mut ResolvedSource,
) {
    let base = origin.parent().unwrap_or_else(|| Path::new(""));
    for line in source.lines() {
        let Some(captures) = include_regex().captures(line) else {
            out.text.push_str(line);
            out.text.push('\n');
            continue;
        };
        let name = &captures[1];
        let Some(path) = locate(name, base, folders) else {
            tracing::warn!(include = name, from = %origin.display(), "include not found");
            out.text.push_str(&format!("// include not found: {name}\n"));
            out.missing.push(base.join(name));
            continue;
        };
        let key = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if !visited.insert(key) {
            out.text.push_str(&format!("// already included: {name}\n"));
            continue;
        }
        match fs::read_to_string(&path) {
            Ok(text) => {
                out.includes.push(path.clone());
                expand(&text, &path, folders, visited, out);
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to read include");
                out.text.push_str(&format!("// include unreadable: {name}\n"));
            }
        }
    }
}

fn locate(name: &str, base: &Path, folders: &[PathBuf]) -> Option<PathBuf> {
    std::iter::once(base.to_path_buf())
        .chain(folders.iter().cloned())
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

/// Whether `word` occurs in `text` as a whole identifier.
pub fn contains_word(text: &str, word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    let mut start = 0;
    while let Some(found) = text[start..].find(word) {
        let begin = start + found;
        let end = begin + word.len();
        let before = text[..begin].chars().next_back();
        let after = text[end..].chars().next();
        if !before.is_some_and(is_ident_char) && !after.is_some_and(is_ident_char) {
            return true;
        }
        start = begin + word.len().max(1);
    }
    false
}

/// Number of `BUFFER_<n>` sections, counted sequentially from zero.
pub fn count_buffers(source: &str) -> usize {
    (0..)
        .take_while(|index| contains_word(source, &format!("BUFFER_{index}")))
        .count()
}

/// Lines guarded by a conditional that tests `define`, up to the matching branch end.
pub fn section_text(source: &str, define: &str) -> Option<String> {
    let mut depth = 0usize;
    let mut capture_depth: Option<usize> = None;
    let mut captured = String::new();
    let mut found = false;

    for line in source.lines() {
        let trimmed = line.trim_start();
        let directive = trimmed
            .strip_prefix('#')
            .map(|rest| rest.trim_start())
            .unwrap_or("");
        let opens = directive.starts_with("if");
        let is_branch = directive.starts_with("elif") || directive.starts_with("else");
        let closes = directive.starts_with("endif");

        if let Some(level) = capture_depth {
            if (closes || is_branch) && depth == level {
                capture_depth = None;
            } else {
                captured.push_str(line);
                captured.push('\n');
            }
        }

        if opens {
            depth += 1;
            if capture_depth.is_none() && contains_word(directive, define) {
                capture_depth = Some(depth);
                found = true;
            }
        } else if is_branch {
            if capture_depth.is_none()
                && directive.starts_with("elif")
                && contains_word(directive, define)
            {
                capture_depth = Some(depth);
                found = true;
            }
        } else if closes {
            depth = depth.saturating_sub(1);
        }
    }

    found.then_some(captured)
}

/// For each buffer, the other buffers its section samples through `u_buffer<j>`.
pub fn buffer_dependencies(source: &str, count: usize) -> Vec<Vec<usize>> {
    (0..count)
        .map(|index| {
            let Some(section) = section_text(source, &format!("BUFFER_{index}")) else {
                return Vec::new();
            };
            let deps: BTreeSet<usize> = (0..count)
                .filter(|other| contains_word(&section, &format!("u_buffer{other}")))
                .collect();
            deps.into_iter().collect()
        })
        .collect()
}

/// Removes `//` and `/* */` comments, keeping line breaks so line numbers survive.
pub fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(ch) = chars.next() {
        match (ch, chars.peek()) {
            ('/', Some('/')) => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                    }
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn inlines_includes_from_origin_and_folders() {
        let dir = TempDir::new().unwrap();
        let lib = dir.path().join("lib");
        fs::create_dir_all(&lib).unwrap();
        fs::write(dir.path().join("local.glsl"), "float local() { return 1.0; }\n").unwrap();
        fs::write(lib.join("shared.glsl"), "#include \"local.glsl\"\nfloat shared_fn();\n")
            .unwrap();
        let frag = dir.path().join("main.frag");
        let source = "#include \"local.glsl\"\n#include <shared.glsl>\nvoid main() {}\n";
        fs::write(&frag, source).unwrap();

        let resolved = resolve_includes(source, &frag, &[lib.clone(), dir.path().to_path_buf()]);
        assert_eq!(resolved.includes.len(), 2);
        assert!(resolved.text.contains("float local()"));
        assert!(resolved.text.contains("float shared_fn();"));
        assert!(resolved.text.contains("// already included: local.glsl"));
        assert!(resolved.text.contains("void main()"));
    }

    #[test]
    fn missing_include_becomes_comment() {
        let dir = TempDir::new().unwrap();
        let frag = dir.path().join("main.frag");
        let resolved = resolve_includes("#include \"nope.glsl\"\n", &frag, &[]);
        assert!(resolved.includes.is_empty());
        assert_eq!(resolved.missing, vec![dir.path().join("nope.glsl")]);
        assert!(resolved.text.contains("include not found: nope.glsl"));
    }

    #[test]
    fn circular_include_is_cut() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.glsl"), "#include \"b.glsl\"\nA\n").unwrap();
        fs::write(dir.path().join("b.glsl"), "#include \"a.glsl\"\nB\n").unwrap();
        let frag = dir.path().join("main.frag");
        let resolved = resolve_includes("#include \"a.glsl\"\n", &frag, &[]);
        assert_eq!(resolved.includes.len(), 2);
        assert_eq!(resolved.text.matches('A').count(), 1);
    }

    #[test]
    fn word_matching_respects_identifier_boundaries() {
        assert!(contains_word("uniform float u_time;", "u_time"));
        assert!(!contains_word("uniform float u_timeScale;", "u_time"));
        assert!(!contains_word("my_u_time", "u_time"));
        assert!(contains_word("#ifdef BUFFER_1", "BUFFER_1"));
        assert!(!contains_word("#ifdef BUFFER_10", "BUFFER_1"));
    }

    const BUFFERS: &str = r"
uniform sampler2D u_buffer0;
uniform sampler2D u_buffer1;
#if defined(BUFFER_0)
    gl_FragColor = texture2D(u_buffer1, st);
#elif defined(BUFFER_1)
    #ifdef EXTRA
    gl_FragColor = vec4(1.0);
    #endif
    gl_FragColor = texture2D(u_buffer1, st);
#else
    gl_FragColor = texture2D(u_buffer0, st);
#endif
";

    #[test]
    fn counts_buffers_sequentially() {
        assert_eq!(count_buffers(BUFFERS), 2);
        assert_eq!(count_buffers("#ifdef BUFFER_1\n#endif\n"), 0);
    }

    #[test]
    fn extracts_sections_and_dependencies() {
        let zero = section_text(BUFFERS, "BUFFER_0").unwrap();
        assert!(zero.contains("u_buffer1"));
        assert!(!zero.contains("u_buffer0"));
        let one = section_text(BUFFERS, "BUFFER_1").unwrap();
        assert!(one.contains("#ifdef EXTRA"));
        assert!(!one.contains("u_buffer0"));
        assert_eq!(buffer_dependencies(BUFFERS, 2), vec![vec![1], vec![1]]);
        assert!(section_text(BUFFERS, "POSTPROCESSING").is_none());
    }

    #[test]
    fn strips_comments_but_keeps_lines() {
        let text = "a // one\n/* two\nthree */b\n";
        let stripped = strip_comments(text);
        assert_eq!(stripped, "a \n\nb\n");
    }
}
