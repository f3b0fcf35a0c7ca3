use arbiter_common::types::Language;

use super::{is_plain_identifier, json_string_literal, LanguageAdapter};

/// Node.js harness. Console output produced while a test runs is captured by
/// swapping `process.stdout.write`; the report goes through the original writer.
///
/// `__arbiterEval` sits at module level so fragments see the submission's
/// bindings and none of the runner's locals.
const SKELETON: &str = r#"{{{user_code}}}

function __arbiterEval(__arbiterFragment) {
  return eval(__arbiterFragment);
}

const __arbiterClipLimit = 16384;

const __arbiterCallables = {
{{{callables}}}
};

function __arbiterRunProgram(source, input) {
  const run = require('child_process').spawnSync(process.execPath, ['-e', source], {
    input: input,
    encoding: 'utf8',
  });
  if (run.error) {
    throw run.error;
  }
  if (run.status !== 0) {
    const lines = String(run.stderr || '')
      .split('\n')
      .map((line) => line.trim())
      .filter((line) => line.length > 0);
    const failure = new Error(lines.length > 0 ? lines[lines.length - 1] : 'exited with status ' + run.status);
    failure.name = 'ProcessExit';
    throw failure;
  }
  return String(run.stdout);
}

function __arbiterCompile(source) {
  const vm = require('vm');
  const wrapped = require('module').wrap(source.replace(/^#!.*/, ''));
  return new vm.Script(wrapped, { filename: 'program.js' });
}

function __arbiterClip(text, keep) {
  return text.length <= keep ? text : text.slice(0, keep) + '... (truncated)';
}

function __arbiterElapsed(started) {
  return Number(process.hrtime.bigint() - started) / 1e9;
}

function __arbiterRunTests() {
  const tests = JSON.parse({{{tests_json}}});
  const source = {{{user_source}}};
  if (tests.some((test) => test.function_call == null && test.code == null)) {
    // A syntax error here ends the unit before any report, as a parse failure.
    __arbiterCompile(source);
  }
  const originalWrite = process.stdout.write;
  const results = [];
  for (const test of tests) {
    const expected = String(test.expected === undefined ? '' : test.expected).trim();
    let captured = '';
    process.stdout.write = function (chunk) {
      captured += String(chunk);
      return true;
    };
    const started = process.hrtime.bigint();
    try {
      let actual;
      let elapsed;
      if (test.function_call !== undefined && test.function_call !== null) {
        const target = __arbiterCallables[test.function_call.name]();
        const value = target(...(test.function_call.args || []));
        elapsed = __arbiterElapsed(started);
        actual = String(value);
      } else if (test.code !== undefined && test.code !== null) {
        const value = __arbiterEval(test.code);
        elapsed = __arbiterElapsed(started);
        actual = value === undefined ? captured : String(value);
      } else {
        const output = __arbiterRunProgram(source, test.input || '');
        elapsed = __arbiterElapsed(started);
        actual = output;
      }
      actual = actual.trim();
      results.push({
        name: test.name,
        passed: actual === expected,
        time: elapsed,
        actual: __arbiterClip(actual, Math.max(__arbiterClipLimit, expected.length)),
      });
    } catch (error) {
      const elapsed = __arbiterElapsed(started);
      const isError = error instanceof Error;
      results.push({
        name: test.name,
        passed: false,
        time: elapsed,
        error: __arbiterClip(isError ? String(error.message) : String(error), __arbiterClipLimit),
        error_type: isError ? String(error.name || 'Error') : typeof error,
      });
    } finally {
      process.stdout.write = originalWrite;
    }
  }
  const report = {
    tests: results,
    total_time: results.reduce((sum, r) => sum + r.time, 0),
    passed: results.filter((r) => r.passed).length,
    total: results.length,
  };
  process.stdout.write('\n' + JSON.stringify(report) + '\n', () => process.exit(0));
}

__arbiterRunTests();
"#;

const SYNTAX_CHECK: &str = r#"const source = {{{user_source}}};
let report;
try {
  const wrapped = require('module').wrap(source.replace(/^#!.*/, ''));
  new (require('vm').Script)(wrapped, { filename: 'submission.js' });
  report = { valid: true };
} catch (error) {
  const isError = error instanceof Error;
  report = {
    valid: false,
    error: isError ? String(error.name) + ': ' + String(error.message) : String(error),
  };
}
process.stdout.write('\n' + JSON.stringify(report) + '\n');
"#;

const RESERVED: &[&str] = &[
    "await", "break", "case", "catch", "class", "const", "continue", "debugger", "default", "delete",
    "do", "else", "enum", "export", "extends", "false", "finally", "for", "function", "if", "import",
    "in", "instanceof", "let", "new", "null", "return", "super", "switch", "this", "throw", "true",
    "try", "typeof", "var", "void", "while", "with", "yield",
];

pub struct JavaScriptAdapter;

impl LanguageAdapter for JavaScriptAdapter {
    fn language(&self) -> Language {
        Language::JavaScript
    }

    fn skeleton(&self) -> &'static str {
        SKELETON
    }

    fn syntax_check_skeleton(&self) -> &'static str {
        SYNTAX_CHECK
    }

    fn source_file(&self) -> &'static str {
        "main.js"
    }

    fn string_literal(&self, text: &str) -> String {
        // U+2028/U+2029 are valid in JSON strings but ended string literals before ES2019.
        json_string_literal(text)
            .replace('\u{2028}', "\\u2028")
            .replace('\u{2029}', "\\u2029")
    }

    fn callable_entry(&self, name: &str) -> String {
        format!("  {}: () => {},", json_string_literal(name), name)
    }

    fn is_valid_callable_name(&self, name: &str) -> bool {
        is_plain_identifier(name) && !RESERVED.contains(&name)
    }

    fn is_parse_error(&self, stderr: &str) -> bool {
        stderr
            .lines()
            .any(|line| line.trim_start().starts_with("SyntaxError"))
    }
}
