use regex::Regex;

use devdocs_common::types::{Language, ValidationReport};

/// Structural syntax validation for generated code.
///
/// Python goes through a real parser (tree-sitter). The curly-brace family
/// (JavaScript, TypeScript, Java, C#) gets a three-stage structural check:
/// strip string literals and comments, verify delimiter balance with line
/// tracking, then run a small per-language regex checklist. Unknown
/// languages get the delimiter check only. Validation is pure: the same
/// input always produces the same report.
pub struct SyntaxValidator {
    line_comment: Regex,
    hash_comment: Regex,
    block_comment: Regex,
    triple_double: Regex,
    triple_single: Regex,
    double_string: Regex,
    single_string: Regex,
    backtick_string: Regex,
    js_function_no_body: Regex,
    js_arrow_no_body: Regex,
    ts_interface_no_body: Regex,
    ts_type_no_body: Regex,
    class_decl: Regex,
    method_no_body: Regex,
}

impl SyntaxValidator {
    pub fn new() -> Self {
        Self {
            line_comment: Regex::new(r"(?m)//.*?$").unwrap(),
            hash_comment: Regex::new(r"(?m)#.*?$").unwrap(),
            block_comment: Regex::new(r"(?s)/\*.*?\*/").unwrap(),
            triple_double: Regex::new(r#"(?s)""".*?""""#).unwrap(),
            triple_single: Regex::new(r"(?s)'''.*?'''").unwrap(),
            double_string: Regex::new(r#""(?:[^"\\]|\\.)*""#).unwrap(),
            single_string: Regex::new(r"'(?:[^'\\]|\\.)*'").unwrap(),
            backtick_string: Regex::new(r"`(?:[^`\\]|\\.)*`").unwrap(),
            js_function_no_body: Regex::new(r"function\s+\w+\s*\([^)]*\)\s*;").unwrap(),
            js_arrow_no_body: Regex::new(r"=>\s*;").unwrap(),
            ts_interface_no_body: Regex::new(r"interface\s+\w+\s*;").unwrap(),
            ts_type_no_body: Regex::new(r"type\s+\w+\s*;").unwrap(),
            class_decl: Regex::new(r"class\s+\w+").unwrap(),
            method_no_body: Regex::new(r"(public|private|protected)\s+\w+\s+\w+\s*\([^)]*\)\s*;")
                .unwrap(),
        }
    }

    /// Validate `code` for the given language.
    pub fn validate(&self, code: &str, language: &Language) -> ValidationReport {
        if code.trim().is_empty() {
            return ValidationReport {
                valid: false,
                errors: vec!["Code is empty".to_string()],
                language: language.clone(),
            };
        }

        tracing::debug!(language = %language, code_length = code.len(), "Validating code");

        let errors = match language {
            Language::Python => self.check_python(code),
            Language::JavaScript => {
                let mut errors = self.check_balanced_delimiters(code);
                errors.extend(self.check_javascript(code));
                errors
            }
            Language::TypeScript => {
                let mut errors = self.check_balanced_delimiters(code);
                errors.extend(self.check_javascript(code));
                errors.extend(self.check_typescript(code));
                errors
            }
            Language::Java => {
                let mut errors = self.check_balanced_delimiters(code);
                errors.extend(self.check_java(code));
                errors
            }
            Language::CSharp => {
                let mut errors = self.check_balanced_delimiters(code);
                errors.extend(self.check_csharp(code));
                errors
            }
            Language::Other(name) => {
                tracing::debug!(language = name.as_str(), "Unknown language, delimiter check only");
                self.check_balanced_delimiters(code)
            }
        };

        if !errors.is_empty() {
            metrics::counter!("syntax_validator.failures", "language" => language.as_str().to_string())
                .increment(1);
        }

        ValidationReport {
            valid: errors.is_empty(),
            errors,
            language: language.clone(),
        }
    }

    /// Parse Python with tree-sitter; the first error or missing node is
    /// reported as a single error with its line number.
    fn check_python(&self, code: &str) -> Vec<String> {
        let mut parser = tree_sitter::Parser::new();
        if parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .is_err()
        {
            return vec!["Validation error: Python grammar failed to load".to_string()];
        }

        let Some(tree) = parser.parse(code, None) else {
            return vec!["Validation error: Python parse did not complete".to_string()];
        };

        let root = tree.root_node();
        if !root.has_error() {
            return Vec::new();
        }

        match find_first_error(root) {
            Some(node) => {
                let line = node.start_position().row + 1;
                let detail = if node.is_missing() {
                    format!("missing {}", node.kind())
                } else {
                    "invalid syntax".to_string()
                };
                vec![format!("SyntaxError at line {}: {}", line, detail)]
            }
            None => vec!["SyntaxError: invalid syntax".to_string()],
        }
    }

    /// Scan for balanced (), {}, [] with line tracking, over code with
    /// strings and comments stripped.
    fn check_balanced_delimiters(&self, code: &str) -> Vec<String> {
        let cleaned = self.strip_strings_and_comments(code);
        let mut errors = Vec::new();
        let mut stack: Vec<(char, usize)> = Vec::new();
        let mut line = 1usize;

        for ch in cleaned.chars() {
            match ch {
                '\n' => line += 1,
                '(' | '{' | '[' => stack.push((ch, line)),
                ')' | '}' | ']' => {
                    let expected = match ch {
                        ')' => '(',
                        '}' => '{',
                        _ => '[',
                    };
                    match stack.pop() {
                        None => errors.push(format!("Unmatched closing '{}' at line {}", ch, line)),
                        Some((opening, _)) if opening != expected => errors.push(format!(
                            "Mismatched delimiter: expected '{}' but found '{}' at line {}",
                            opening, ch, line
                        )),
                        Some(_) => {}
                    }
                }
                _ => {}
            }
        }

        for (opening, opened_at) in stack {
            errors.push(format!("Unclosed '{}' from line {}", opening, opened_at));
        }

        errors
    }

    /// Remove string literals and comments so delimiters inside them don't
    /// skew the balance check. Newlines inside removed spans are kept so
    /// line numbers stay accurate.
    fn strip_strings_and_comments(&self, code: &str) -> String {
        let keep_lines = |text: &str| -> String { text.chars().filter(|c| *c == '\n').collect() };

        let mut cleaned = code.to_string();
        for re in [
            &self.triple_double,
            &self.triple_single,
            &self.block_comment,
        ] {
            cleaned = re
                .replace_all(&cleaned, |caps: &regex::Captures| keep_lines(&caps[0]))
                .into_owned();
        }
        for re in [&self.line_comment, &self.hash_comment] {
            cleaned = re.replace_all(&cleaned, "").into_owned();
        }
        for re in [
            &self.double_string,
            &self.single_string,
            &self.backtick_string,
        ] {
            cleaned = re.replace_all(&cleaned, "").into_owned();
        }

        cleaned
    }

    fn check_javascript(&self, code: &str) -> Vec<String> {
        let mut errors = Vec::new();

        if self.js_function_no_body.is_match(code) {
            errors.push("Function declaration without body".to_string());
        }
        if self.js_arrow_no_body.is_match(code) {
            errors.push("Arrow function without body or expression".to_string());
        }

        errors
    }

    fn check_typescript(&self, code: &str) -> Vec<String> {
        let mut errors = Vec::new();

        if self.ts_interface_no_body.is_match(code) {
            errors.push("Interface declaration without body".to_string());
        }
        if self.ts_type_no_body.is_match(code) {
            errors.push("Type declaration without definition".to_string());
        }

        errors
    }

    fn check_java(&self, code: &str) -> Vec<String> {
        let mut errors = Vec::new();

        if code.contains("class ") && !self.class_decl.is_match(code) {
            errors.push("Invalid class declaration".to_string());
        }
        if self.method_no_body.is_match(code) && !code.contains("abstract") {
            errors.push("Method declaration without body (not abstract)".to_string());
        }

        errors
    }

    fn check_csharp(&self, code: &str) -> Vec<String> {
        let mut errors = Vec::new();

        if code.contains("class ") && !self.class_decl.is_match(code) {
            errors.push("Invalid class declaration".to_string());
        }
        if self.method_no_body.is_match(code)
            && !code.contains("abstract")
            && !code.contains("interface")
        {
            errors.push("Method declaration without body (not abstract or interface)".to_string());
        }

        errors
    }
}

impl Default for SyntaxValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn find_first_error(node: tree_sitter::Node<'_>) -> Option<tree_sitter::Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(found) = find_first_error(child) {
            return Some(found);
        }
    }
    None
}
