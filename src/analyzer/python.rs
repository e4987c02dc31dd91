//! Line-oriented scanner for generated Python sources.
//!
//! This is deliberately not a full parser: it extracts exactly what the
//! policy checks need — import references, class/decorator/method
//! structure, suspicious call sites, and gross syntax damage — without
//! ever executing or importing anything. Output order follows source
//! order, so downstream sorting is the only ordering authority.

/// A referenced import: `import x.y`, `import x as z`, `from x import y`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyImport {
    /// The module name being imported (for `from x import y`, `x`).
    pub name: String,
    pub line: u32,
    pub column: u32,
}

/// A method found inside a class body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyMethod {
    pub name: String,
    pub line: u32,
    /// Positional parameter count, including `self`.
    pub arity: usize,
}

/// A class definition with its decorators and methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyClass {
    pub name: String,
    pub line: u32,
    pub decorators: Vec<String>,
    pub methods: Vec<PyMethod>,
}

/// A call site matching one of the forbidden patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyCall {
    pub pattern: &'static str,
    pub description: &'static str,
    pub line: u32,
    pub column: u32,
}

/// Gross syntax damage the scanner can detect without parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PySyntaxError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

/// Everything the scanner extracted from one source file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PySource {
    pub imports: Vec<PyImport>,
    pub classes: Vec<PyClass>,
    pub calls: Vec<PyCall>,
    pub syntax_errors: Vec<PySyntaxError>,
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn strip_comment(line: &str) -> &str {
    // Naive: a '#' inside a string literal truncates too. That only
    // narrows call detection, never widens it.
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Count top-level parameters in a `def` parameter list.
fn count_params(params: &str) -> usize {
    let trimmed = params.trim();
    if trimmed.is_empty() {
        return 0;
    }
    let mut depth = 0usize;
    let mut count = 1usize;
    for c in trimmed.chars() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => count += 1,
            _ => {}
        }
    }
    count
}

fn parse_import_names(stmt: &str, line: u32, column: u32, out: &mut Vec<PyImport>) {
    if let Some(rest) = stmt.strip_prefix("import ") {
        for clause in rest.split(',') {
            let name = clause.trim().split_whitespace().next().unwrap_or("");
            if !name.is_empty() {
                out.push(PyImport {
                    name: name.to_string(),
                    line,
                    column,
                });
            }
        }
    } else if let Some(rest) = stmt.strip_prefix("from ") {
        let name = rest.split_whitespace().next().unwrap_or("");
        if !name.is_empty() && name != "." {
            out.push(PyImport {
                name: name.trim_start_matches('.').to_string(),
                line,
                column,
            });
        }
    }
}

fn scan_calls(
    source_line: &str,
    patterns: &'static [(&'static str, &'static str)],
    line: u32,
    out: &mut Vec<PyCall>,
) {
    let code = strip_comment(source_line);
    for (pattern, description) in patterns {
        let mut start = 0usize;
        while let Some(rel) = code[start..].find(pattern) {
            let idx = start + rel;
            // Reject matches glued to a longer identifier or attribute:
            // `reopen(` is not `open(`, `io.open(` is not `open(`.
            let boundary_ok = if pattern.contains('.') {
                idx == 0 || !is_ident_char(code[..idx].chars().next_back().unwrap_or(' '))
            } else {
                let prev = code[..idx].chars().next_back();
                !matches!(prev, Some(c) if is_ident_char(c) || c == '.')
            };
            if boundary_ok {
                out.push(PyCall {
                    pattern,
                    description,
                    line,
                    column: idx as u32 + 1,
                });
            }
            start = idx + pattern.len();
        }
    }
}

/// Scan one Python source file.
#[must_use]
pub fn scan(
    text: &str,
    call_patterns: &'static [(&'static str, &'static str)],
) -> PySource {
    let mut source = PySource::default();
    let mut pending_decorators: Vec<String> = Vec::new();
    // (class index in source.classes, class indent)
    let mut open_class: Option<(usize, usize)> = None;
    let mut paren_depth: i64 = 0;
    // Continuation buffer for multi-line `def` signatures.
    let mut def_buffer: Option<(String, u32, usize)> = None;

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx as u32 + 1;
        let code = strip_comment(raw_line);
        let trimmed = code.trim();

        for c in code.chars() {
            match c {
                '(' | '[' | '{' => paren_depth += 1,
                ')' | ']' | '}' => paren_depth -= 1,
                _ => {}
            }
        }

        if let Some((mut buffer, start_line, indent)) = def_buffer.take() {
            buffer.push(' ');
            buffer.push_str(trimmed);
            if buffer.matches('(').count() == buffer.matches(')').count() {
                finish_def(&buffer, start_line, indent, &mut source, &mut open_class);
            } else {
                def_buffer = Some((buffer, start_line, indent));
            }
            scan_calls(raw_line, call_patterns, line_no, &mut source.calls);
            continue;
        }

        if trimmed.is_empty() {
            continue;
        }

        let indent = indent_of(code);

        // A dedent back to (or past) the class indent closes its body.
        if let Some((_, class_indent)) = open_class {
            if indent <= class_indent && !trimmed.starts_with('@') {
                if !(trimmed.starts_with("class ") && indent == class_indent) {
                    open_class = None;
                }
            }
        }

        if let Some(decorator) = trimmed.strip_prefix('@') {
            let name = decorator
                .split('(')
                .next()
                .unwrap_or("")
                .trim()
                .to_string();
            pending_decorators.push(name);
            continue;
        }

        if trimmed.starts_with("import ") || trimmed.starts_with("from ") {
            parse_import_names(trimmed, line_no, indent as u32 + 1, &mut source.imports);
            pending_decorators.clear();
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("class ") {
            if !trimmed.ends_with(':') {
                source.syntax_errors.push(PySyntaxError {
                    message: "class statement missing trailing ':'".to_string(),
                    line: line_no,
                    column: indent as u32 + 1,
                });
            }
            let name = rest
                .split(|c: char| c == '(' || c == ':')
                .next()
                .unwrap_or("")
                .trim()
                .to_string();
            source.classes.push(PyClass {
                name,
                line: line_no,
                decorators: std::mem::take(&mut pending_decorators),
                methods: Vec::new(),
            });
            open_class = Some((source.classes.len() - 1, indent));
            continue;
        }

        if trimmed.starts_with("def ") || trimmed.starts_with("async def ") {
            pending_decorators.clear();
            if trimmed.matches('(').count() == trimmed.matches(')').count()
                && trimmed.contains('(')
            {
                finish_def(trimmed, line_no, indent, &mut source, &mut open_class);
            } else if trimmed.contains('(') {
                def_buffer = Some((trimmed.to_string(), line_no, indent));
            } else {
                source.syntax_errors.push(PySyntaxError {
                    message: "def statement missing parameter list".to_string(),
                    line: line_no,
                    column: indent as u32 + 1,
                });
            }
            scan_calls(raw_line, call_patterns, line_no, &mut source.calls);
            continue;
        }

        pending_decorators.clear();
        scan_calls(raw_line, call_patterns, line_no, &mut source.calls);
    }

    if paren_depth != 0 {
        let last_line = text.lines().count().max(1) as u32;
        source.syntax_errors.push(PySyntaxError {
            message: "unbalanced brackets at end of file".to_string(),
            line: last_line,
            column: 1,
        });
    }
    if def_buffer.is_some() {
        let last_line = text.lines().count().max(1) as u32;
        source.syntax_errors.push(PySyntaxError {
            message: "unterminated def signature".to_string(),
            line: last_line,
            column: 1,
        });
    }

    source
}

fn finish_def(
    signature: &str,
    line: u32,
    indent: usize,
    source: &mut PySource,
    open_class: &mut Option<(usize, usize)>,
) {
    let after_def = signature
        .trim_start()
        .trim_start_matches("async ")
        .trim_start_matches("def ");
    let name = after_def.split('(').next().unwrap_or("").trim().to_string();
    let params = after_def
        .split_once('(')
        .map(|(_, rest)| rest.rsplit_once(')').map(|(p, _)| p).unwrap_or(rest))
        .unwrap_or("");
    let arity = count_params(params);

    if let Some((class_idx, class_indent)) = *open_class {
        if indent > class_indent {
            source.classes[class_idx].methods.push(PyMethod {
                name,
                line,
                arity,
            });
            return;
        }
        // Module-level def after the class body closed it.
        *open_class = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::FORBIDDEN_CALL_PATTERNS;

    const SAMPLE: &str = r#"
import json
import requests, time
from urllib.parse import urlencode

@register_adapter("weather/openweather")
class OpenWeatherAdapter:
    def fetch_raw(self):
        return requests.get(self.url).json()

    def transform(self, raw):
        return {"temp": raw["main"]["temp"]}

    def get_schema(self):
        return {"temp": "float"}

def helper():
    return 1
"#;

    #[test]
    fn finds_imports() {
        let src = scan(SAMPLE, FORBIDDEN_CALL_PATTERNS);
        let names: Vec<&str> = src.imports.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["json", "requests", "time", "urllib.parse"]);
    }

    #[test]
    fn finds_class_contract_shape() {
        let src = scan(SAMPLE, FORBIDDEN_CALL_PATTERNS);
        assert_eq!(src.classes.len(), 1);
        let class = &src.classes[0];
        assert_eq!(class.name, "OpenWeatherAdapter");
        assert_eq!(class.decorators, vec!["register_adapter"]);
        let methods: Vec<(&str, usize)> = class
            .methods
            .iter()
            .map(|m| (m.name.as_str(), m.arity))
            .collect();
        assert_eq!(
            methods,
            vec![("fetch_raw", 1), ("transform", 2), ("get_schema", 1)]
        );
    }

    #[test]
    fn module_level_def_not_a_method() {
        let src = scan(SAMPLE, FORBIDDEN_CALL_PATTERNS);
        assert!(src.classes[0].methods.iter().all(|m| m.name != "helper"));
    }

    #[test]
    fn detects_forbidden_calls_with_boundaries() {
        let src = scan(
            "x = eval(payload)\ny = reopen(f)\nz = io.open(f)\n",
            FORBIDDEN_CALL_PATTERNS,
        );
        let patterns: Vec<&str> = src.calls.iter().map(|c| c.pattern).collect();
        assert_eq!(patterns, vec!["eval("]);
    }

    #[test]
    fn comments_do_not_trigger_calls() {
        let src = scan("# eval(x) is bad\nsafe = 1\n", FORBIDDEN_CALL_PATTERNS);
        assert!(src.calls.is_empty());
    }

    #[test]
    fn unbalanced_brackets_flagged() {
        let src = scan("def f(:\n    return (1\n", FORBIDDEN_CALL_PATTERNS);
        assert!(!src.syntax_errors.is_empty());
    }

    #[test]
    fn multiline_def_signature() {
        let text = "class A:\n    def transform(self,\n                  raw):\n        return raw\n";
        let src = scan(text, FORBIDDEN_CALL_PATTERNS);
        assert_eq!(src.classes[0].methods[0].arity, 2);
    }
}
