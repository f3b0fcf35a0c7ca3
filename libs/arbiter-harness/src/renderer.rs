use handlebars::Handlebars;
use serde::Serialize;
use serde_json::json;

use arbiter_common::error::JudgeError;
use arbiter_common::types::{FunctionCall, Language, Selector, TestCase};

use crate::adapters::LanguageAdapter;

/// A self-contained program ready to hand to a sandbox.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedUnit {
    pub language: Language,
    /// File name the sandbox writes `source` to.
    pub file_name: &'static str,
    pub source: String,
    /// Display names in suite order; the harness reports tests in the same order.
    pub test_names: Vec<String>,
    /// Expected outputs in suite order, kept host-side for grading.
    pub expected: Vec<String>,
}

impl RenderedUnit {
    pub fn test_count(&self) -> usize {
        self.test_names.len()
    }
}

/// What the in-runtime harness sees for one test case.
#[derive(Serialize)]
struct SuiteEntry<'a> {
    name: String,
    input: &'a str,
    expected: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<&'a FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
}

/// Fills a language skeleton with the submission and its suite.
pub struct TemplateRenderer {
    handlebars: Handlebars<'static>,
}

impl TemplateRenderer {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_escape_fn(handlebars::no_escape);
        Self { handlebars }
    }

    /// Render `source_code` and `tests` into one unit for `adapter`.
    ///
    /// Suite data reaches the output only through the adapter's escaping, so
    /// nothing in it can alter the harness structure. Callable names are checked
    /// against the adapter's identifier rules before they are emitted. The
    /// submission is inlined only when some test calls into it; a program judged
    /// purely on stdin and stdout runs from its string literal alone.
    pub fn render(
        &self,
        adapter: &dyn LanguageAdapter,
        source_code: &str,
        tests: &[TestCase],
    ) -> Result<RenderedUnit, JudgeError> {
        let mut entries = Vec::with_capacity(tests.len());
        let mut callable_names: Vec<&str> = Vec::new();
        let mut inline_submission = false;

        for (index, test) in tests.iter().enumerate() {
            let selector = test.selector(index)?;
            if !matches!(selector, Selector::Stdio) {
                inline_submission = true;
            }
            if let Selector::Call(call) = selector {
                if !call.kwargs.is_empty() && !adapter.supports_keyword_arguments() {
                    return Err(JudgeError::InvalidTestCase {
                        index,
                        reason: format!("{} functions take no keyword arguments", adapter.language()),
                    });
                }
                if !adapter.is_valid_callable_name(&call.name) {
                    return Err(JudgeError::InvalidTestCase {
                        index,
                        reason: format!(
                            "'{}' is not a valid {} function name",
                            call.name,
                            adapter.language()
                        ),
                    });
                }
                if !callable_names.contains(&call.name.as_str()) {
                    callable_names.push(&call.name);
                }
            }

            entries.push(SuiteEntry {
                name: test.display_name(index),
                input: &test.input,
                expected: &test.expected,
                function_call: test.function_call.as_ref(),
                code: test.code.as_deref(),
            });
        }

        let tests_json = serde_json::to_string(&entries)
            .map_err(|e| JudgeError::Render(format!("failed to encode suite: {}", e)))?;

        let callables = callable_names
            .iter()
            .map(|name| adapter.callable_entry(name))
            .collect::<Vec<_>>()
            .join("\n");

        let data = json!({
            "user_code": if inline_submission { source_code } else { adapter.blank_submission() },
            "tests_json": adapter.string_literal(&tests_json),
            "callables": callables,
            "user_source": adapter.string_literal(source_code),
        });

        let source = self
            .handlebars
            .render_template(adapter.skeleton(), &data)
            .map_err(|e| JudgeError::Render(e.to_string()))?;

        let expected = entries.iter().map(|entry| entry.expected.to_string()).collect();
        Ok(RenderedUnit {
            language: adapter.language(),
            file_name: adapter.source_file(),
            source,
            test_names: entries.into_iter().map(|entry| entry.name).collect(),
            expected,
        })
    }

    /// Render a unit that only parses `source_code` and reports whether it is valid.
    pub fn render_syntax_check(
        &self,
        adapter: &dyn LanguageAdapter,
        source_code: &str,
    ) -> Result<RenderedUnit, JudgeError> {
        let data = json!({ "user_source": adapter.string_literal(source_code) });
        let source = self
            .handlebars
            .render_template(adapter.syntax_check_skeleton(), &data)
            .map_err(|e| JudgeError::Render(e.to_string()))?;

        Ok(RenderedUnit {
            language: adapter.language(),
            file_name: adapter.source_file(),
            source,
            test_names: Vec::new(),
            expected: Vec::new(),
        })
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{AdapterRegistry, JavaScriptAdapter, PhpAdapter, PythonAdapter, RubyAdapter};
    use serde_json::json;

    fn suite(value: serde_json::Value) -> Vec<TestCase> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_render_python_add() {
        let tests = suite(json!([
            {"name": "add", "expected": "5", "function_call": {"name": "add", "args": [2, 3]}},
            {"expected": "7", "code": "add(3, 4)"}
        ]));
        let unit = TemplateRenderer::new()
            .render(&PythonAdapter, "def add(a, b):\n    return a + b\n", &tests)
            .unwrap();

        assert_eq!(unit.language, Language::Python);
        assert_eq!(unit.file_name, "main.py");
        assert_eq!(unit.test_names, vec!["add".to_string(), "Test 2".to_string()]);
        assert!(unit.source.contains("def add(a, b):\n    return a + b\n"));
        assert!(unit.source.contains(r#""add": lambda: add,"#));
        assert!(!unit.source.contains("{{{"));
    }

    #[test]
    fn test_callables_are_deduplicated() {
        let tests = suite(json!([
            {"expected": "1", "function_call": {"name": "f", "args": [1]}},
            {"expected": "2", "function_call": {"name": "f", "args": [2]}},
            {"expected": "3", "function_call": {"name": "g"}}
        ]));
        let unit = TemplateRenderer::new().render(&PythonAdapter, "", &tests).unwrap();
        assert_eq!(unit.source.matches("lambda: f,").count(), 1);
        assert_eq!(unit.source.matches("lambda: g,").count(), 1);
    }

    #[test]
    fn test_rejects_non_identifier_callable() {
        let tests = suite(json!([
            {"expected": "1", "function_call": {"name": "add"}},
            {"expected": "1", "function_call": {"name": "__import__('os').system"}}
        ]));
        let err = TemplateRenderer::new()
            .render(&PythonAdapter, "", &tests)
            .unwrap_err();
        assert!(matches!(err, JudgeError::InvalidTestCase { index: 1, .. }));
    }

    #[test]
    fn test_rejects_both_selectors() {
        let tests = suite(json!([
            {"expected": "1", "function_call": {"name": "f"}, "code": "f()"}
        ]));
        let err = TemplateRenderer::new()
            .render(&RubyAdapter, "", &tests)
            .unwrap_err();
        assert!(matches!(err, JudgeError::InvalidTestCase { index: 0, .. }));
    }

    #[test]
    fn test_template_markers_in_data_stay_literal() {
        let code = "def f():\n    return '{{{user_code}}} {{#each x}}'\n";
        let tests = suite(json!([
            {"name": "{{callables}}", "expected": "'''\"\"\"\\", "code": "f()"}
        ]));
        let unit = TemplateRenderer::new().render(&PythonAdapter, code, &tests).unwrap();
        assert!(unit.source.contains(code));
        assert_eq!(unit.test_names, vec!["{{callables}}".to_string()]);
    }

    #[test]
    fn test_suite_round_trips_through_embedded_literal() {
        // The embedded literal for Python is JSON string syntax; decoding it twice
        // must give back the suite exactly.
        let tests = suite(json!([
            {"name": "quotes", "input": "a\"b'c\\d\n", "expected": "é ✓", "code": "print(1)"}
        ]));
        let unit = TemplateRenderer::new().render(&PythonAdapter, "", &tests).unwrap();

        let marker = "__arbiter_json.loads(";
        let start = unit.source.find(marker).unwrap() + marker.len();
        let end = start + unit.source[start..].find(")\n").unwrap();
        let json_text: String = serde_json::from_str(&unit.source[start..end]).unwrap();
        let decoded: serde_json::Value = serde_json::from_str(&json_text).unwrap();

        assert_eq!(decoded[0]["name"], "quotes");
        assert_eq!(decoded[0]["input"], "a\"b'c\\d\n");
        assert_eq!(decoded[0]["expected"], "é ✓");
        assert_eq!(decoded[0]["code"], "print(1)");
        assert!(decoded[0].get("function_call").is_none());
    }

    #[test]
    fn test_php_keeps_submission_first() {
        let tests = suite(json!([{"expected": "5", "function_call": {"name": "add", "args": [2, 3]}}]));
        let code = "<?php\nfunction add($a, $b) { return $a + $b; }\n";
        let unit = TemplateRenderer::new().render(&PhpAdapter, code, &tests).unwrap();
        assert!(unit.source.starts_with(code));
        assert!(unit.source.contains("'add' => static fn () => __arbiter_resolve('add'),"));
    }

    #[test]
    fn test_every_builtin_adapter_renders() {
        let registry = AdapterRegistry::builtin();
        let tests = suite(json!([
            {"expected": "5", "function_call": {"name": "add", "args": [2, 3]}},
            {"expected": "hi", "code": "greet()"},
            {"input": "1 2", "expected": "3"}
        ]));
        for language in registry.languages() {
            let adapter = registry.resolve(language.as_str()).unwrap();
            let unit = TemplateRenderer::new().render(adapter, "", &tests).unwrap();
            assert_eq!(unit.test_count(), 3);
            assert_eq!(unit.expected, vec!["5", "hi", "3"]);
            assert_eq!(unit.file_name, adapter.source_file());
        }
    }

    #[test]
    fn test_future_import_stays_at_the_top() {
        let code = "from __future__ import annotations\n\ndef add(a: int, b: int) -> int:\n    return a + b\n";
        let tests = suite(json!([{"expected": "5", "function_call": {"name": "add", "args": [2, 3]}}]));
        let unit = TemplateRenderer::new().render(&PythonAdapter, code, &tests).unwrap();
        assert!(unit.source.starts_with(code));
    }

    #[test]
    fn test_stdio_only_suite_does_not_inline_the_program() {
        let code = "import sys\nprint(sum(map(int, sys.stdin.read().split())))\nsys.exit(0)\n";
        let tests = suite(json!([
            {"input": "1 2", "expected": "3"},
            {"input": "4 5", "expected": "9"}
        ]));
        let unit = TemplateRenderer::new().render(&PythonAdapter, code, &tests).unwrap();
        assert!(!unit.source.contains(code));
        assert!(unit.source.contains(&serde_json::to_string(code).unwrap()));
        assert!(unit.source.contains("compile(source"));

        let php = "<?php\necho array_sum(explode(' ', trim(fgets(STDIN))));\nexit(0);\n";
        let unit = TemplateRenderer::new().render(&PhpAdapter, php, &tests).unwrap();
        assert!(unit.source.starts_with("<?php"));
        assert!(!unit.source.contains("echo array_sum(explode(' '"));
    }

    #[test]
    fn test_keyword_arguments_need_language_support() {
        let tests = suite(json!([
            {"expected": "Hi, Ada!", "function_call": {"name": "greet", "args": ["Ada"], "kwargs": {"punctuation": "!"}}}
        ]));
        let unit = TemplateRenderer::new().render(&PythonAdapter, "", &tests).unwrap();
        assert!(unit.source.contains(r#"\"kwargs\":{\"punctuation\":\"!\"}"#));
        assert!(TemplateRenderer::new().render(&RubyAdapter, "", &tests).is_ok());
        assert!(TemplateRenderer::new().render(&PhpAdapter, "", &tests).is_ok());

        let err = TemplateRenderer::new()
            .render(&JavaScriptAdapter, "", &tests)
            .unwrap_err();
        assert!(matches!(err, JudgeError::InvalidTestCase { index: 0, .. }));
    }

    #[test]
    fn test_syntax_check_unit() {
        let registry = AdapterRegistry::builtin();
        for language in registry.languages() {
            let adapter = registry.resolve(language.as_str()).unwrap();
            let unit = TemplateRenderer::new()
                .render_syntax_check(adapter, "{{{user_code}}} ' \" \\")
                .unwrap();
            assert_eq!(unit.test_count(), 0);
            assert!(unit.source.contains(&adapter.string_literal("{{{user_code}}} ' \" \\")));
        }
    }
}
