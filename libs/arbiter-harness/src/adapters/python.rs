use arbiter_common::stderr::last_meaningful_line;
use arbiter_common::types::Language;

use super::{is_plain_identifier, json_string_literal, LanguageAdapter};

/// CPython 3 harness.
///
/// The submission comes first so `from __future__` imports stay legal. The
/// launcher runs the file under a non-`__main__` name so that an
/// `if __name__ == "__main__":` block does not fire while definitions load.
const SKELETON: &str = r#"{{{user_code}}}


import io as __arbiter_io
import json as __arbiter_json
import sys as __arbiter_sys
import time as __arbiter_time

__ARBITER_CLIP = 16384


def __arbiter_callables():
    return {
{{{callables}}}
    }


def __arbiter_clip(text, keep):
    if len(text) <= keep:
        return text
    return text[:keep] + "... (truncated)"


def __arbiter_evaluate(fragment):
    try:
        compiled = compile(fragment, "<test>", "eval")
    except SyntaxError:
        exec(compile(fragment, "<test>", "exec"), globals())
        return None, True
    return eval(compiled, globals()), False


def __arbiter_run_program(program, stdin_text):
    scope = {"__name__": "__main__", "__builtins__": __builtins__}
    stdin = __arbiter_io.TextIOWrapper(__arbiter_io.BytesIO(stdin_text.encode("utf-8")), encoding="utf-8")
    stdout = __arbiter_io.TextIOWrapper(__arbiter_io.BytesIO(), encoding="utf-8", write_through=True)
    saved = __arbiter_sys.stdout
    __arbiter_sys.stdin = stdin
    __arbiter_sys.stdout = stdout
    try:
        exec(program, scope)
    except SystemExit as exit_signal:
        if exit_signal.code not in (None, 0):
            raise
    finally:
        __arbiter_sys.stdin = __arbiter_sys.__stdin__
        __arbiter_sys.stdout = saved
    stdout.flush()
    return stdout.buffer.getvalue().decode("utf-8", "replace")


def __arbiter_run_tests():
    tests = __arbiter_json.loads({{{tests_json}}})
    source = {{{user_source}}}
    program = None
    if any(test.get("function_call") is None and test.get("code") is None for test in tests):
        # A syntax error here ends the unit before any report, as a parse failure.
        program = compile(source, "<program>", "exec")
    callables = __arbiter_callables()
    results = []
    for test in tests:
        expected = str(test.get("expected", "")).strip()
        captured = __arbiter_io.StringIO()
        __arbiter_sys.stdout = captured
        started = __arbiter_time.perf_counter()
        try:
            call = test.get("function_call")
            if call is not None:
                target = callables[call["name"]]()
                value = target(*call.get("args", []), **call.get("kwargs", {}))
                elapsed = __arbiter_time.perf_counter() - started
                actual = str(value)
            elif test.get("code") is not None:
                value, from_output = __arbiter_evaluate(test["code"])
                elapsed = __arbiter_time.perf_counter() - started
                printed = captured.getvalue()
                actual = printed if from_output or (value is None and printed) else str(value)
            else:
                actual = __arbiter_run_program(program, test.get("input", ""))
                elapsed = __arbiter_time.perf_counter() - started
            actual = actual.strip()
            results.append({
                "name": test["name"],
                "passed": actual == expected,
                "time": elapsed,
                "actual": __arbiter_clip(actual, max(__ARBITER_CLIP, len(expected))),
            })
        except (Exception, SystemExit) as exc:
            elapsed = __arbiter_time.perf_counter() - started
            results.append({
                "name": test["name"],
                "passed": False,
                "time": elapsed,
                "error": __arbiter_clip(str(exc), __ARBITER_CLIP),
                "error_type": type(exc).__name__,
            })
        finally:
            __arbiter_sys.stdout = __arbiter_sys.__stdout__
    report = {
        "tests": results,
        "total_time": sum(r["time"] for r in results),
        "passed": sum(1 for r in results if r["passed"]),
        "total": len(results),
    }
    __arbiter_sys.__stdout__.write("\n" + __arbiter_json.dumps(report) + "\n")
    __arbiter_sys.__stdout__.flush()


__arbiter_run_tests()
"#;

const SYNTAX_CHECK: &str = r#"import json
import sys

source = {{{user_source}}}
try:
    compile(source, "<submission>", "exec")
except (SyntaxError, ValueError) as exc:
    report = {"valid": False, "error": "{}: {}".format(type(exc).__name__, exc)}
else:
    report = {"valid": True}
sys.stdout.write("\n" + json.dumps(report) + "\n")
"#;

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class", "continue",
    "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if", "import", "in",
    "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try", "while", "with",
    "yield",
];

pub struct PythonAdapter;

impl LanguageAdapter for PythonAdapter {
    fn language(&self) -> Language {
        Language::Python
    }

    fn skeleton(&self) -> &'static str {
        SKELETON
    }

    fn syntax_check_skeleton(&self) -> &'static str {
        SYNTAX_CHECK
    }

    fn supports_keyword_arguments(&self) -> bool {
        true
    }

    fn source_file(&self) -> &'static str {
        "main.py"
    }

    fn string_literal(&self, text: &str) -> String {
        json_string_literal(text)
    }

    fn callable_entry(&self, name: &str) -> String {
        format!("        {}: lambda: {},", json_string_literal(name), name)
    }

    fn is_valid_callable_name(&self, name: &str) -> bool {
        is_plain_identifier(name) && !KEYWORDS.contains(&name)
    }

    fn is_parse_error(&self, stderr: &str) -> bool {
        last_meaningful_line(stderr)
            .map(|line| {
                ["SyntaxError", "IndentationError", "TabError"]
                    .iter()
                    .any(|prefix| line.starts_with(prefix))
            })
            .unwrap_or(false)
    }
}
