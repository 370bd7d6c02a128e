//! Typed insertion points for generated harness source.
//!
//! Untrusted input only reaches a harness through [`SourceBuilder`]: fixed
//! harness text must be `'static`, request values become literals, request
//! strings become quoted string literals and variable names are checked
//! before they are emitted as assignment targets.

use serde_json::Value;

const PYTHON_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

/// Quoted string literal valid in both Python and JavaScript source.
///
/// JSON string escaping is a subset of both languages' escape syntax, so the
/// literal always denotes exactly `s`.
pub fn string_literal(s: &str) -> String {
    let quoted = serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string());
    // U+2028 and U+2029 terminate lines in older JS engines
    quoted
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

/// Python literal for a JSON value.
pub fn python_literal(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => string_literal(s),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(python_literal).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Object(map) => {
            let entries: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", string_literal(k), python_literal(v)))
                .collect();
            format!("{{{}}}", entries.join(", "))
        }
    }
}

/// Whether `name` can appear as a plain Python assignment target.
pub fn is_python_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let head_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    head_ok
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !PYTHON_KEYWORDS.contains(&name)
}

/// Python statement binding `key` to `value` at module scope.
pub fn python_assignment(key: &str, value: &Value) -> String {
    if is_python_identifier(key) {
        format!("{} = {}", key, python_literal(value))
    } else {
        format!("globals()[{}] = {}", string_literal(key), python_literal(value))
    }
}

/// Line-oriented builder for harness source.
#[derive(Debug, Default)]
pub struct SourceBuilder {
    out: String,
}

impl SourceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Harness text known at compile time.
    pub fn fixed(&mut self, text: &'static str) -> &mut Self {
        self.out.push_str(text);
        if !text.ends_with('\n') {
            self.out.push('\n');
        }
        self
    }

    /// `key = <literal>` (or a `globals()` store for non-identifier keys).
    pub fn python_variable(&mut self, key: &str, value: &Value) -> &mut Self {
        self.out.push_str(&python_assignment(key, value));
        self.out.push('\n');
        self
    }

    /// `name = "<text>"` in Python, `const name = "<text>";` in JavaScript.
    pub fn string_binding(&mut self, name: &'static str, text: &str, js: bool) -> &mut Self {
        if js {
            self.out
                .push_str(&format!("const {} = {};\n", name, string_literal(text)));
        } else {
            self.out
                .push_str(&format!("{} = {}\n", name, string_literal(text)));
        }
        self
    }

    /// Integer constant binding.
    pub fn number_binding(&mut self, name: &'static str, value: u64, js: bool) -> &mut Self {
        if js {
            self.out.push_str(&format!("const {} = {};\n", name, value));
        } else {
            self.out.push_str(&format!("{} = {}\n", name, value));
        }
        self
    }

    pub fn finish(self) -> String {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_python_literals() {
        assert_eq!(python_literal(&json!(null)), "None");
        assert_eq!(python_literal(&json!(true)), "True");
        assert_eq!(python_literal(&json!(false)), "False");
        assert_eq!(python_literal(&json!(42)), "42");
        assert_eq!(python_literal(&json!(-1.5)), "-1.5");
        assert_eq!(
            python_literal(&json!({"a": [1, null, "x"]})),
            r#"{"a": [1, None, "x"]}"#
        );
    }

    #[test]
    fn test_string_literal_escapes_quotes_and_newlines() {
        assert_eq!(string_literal("a\"b"), r#""a\"b""#);
        assert_eq!(string_literal("line\n\"\"\"end"), r#""line\n\"\"\"end""#);
        assert_eq!(string_literal("back\\slash"), r#""back\\slash""#);
        assert_eq!(string_literal("sep\u{2028}"), r#""sep\u2028""#);
    }

    #[test]
    fn test_python_identifiers() {
        assert!(is_python_identifier("x"));
        assert!(is_python_identifier("_private1"));
        assert!(!is_python_identifier("1abc"));
        assert!(!is_python_identifier("my-key"));
        assert!(!is_python_identifier("class"));
        assert!(!is_python_identifier(""));
    }

    #[test]
    fn test_python_assignment() {
        assert_eq!(python_assignment("x", &json!(5)), "x = 5");
        assert_eq!(
            python_assignment("my key", &json!("v")),
            r#"globals()["my key"] = "v""#
        );
        assert_eq!(
            python_assignment("import", &json!(1)),
            r#"globals()["import"] = 1"#
        );
    }

    #[test]
    fn test_builder_bindings() {
        let mut builder = SourceBuilder::new();
        builder
            .fixed("import json")
            .python_variable("y", &json!("a\"b"))
            .string_binding("src", "print('hi')\n", false)
            .number_binding("limit", 5, true);
        assert_eq!(
            builder.finish(),
            "import json\ny = \"a\\\"b\"\nsrc = \"print('hi')\\n\"\nconst limit = 5;\n"
        );
    }
}
