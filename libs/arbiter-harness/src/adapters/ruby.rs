use arbiter_common::types::Language;

use super::{single_quoted_literal, LanguageAdapter};

/// Ruby harness. `$arbiter_binding` captures the top-level binding after the
/// submission loads so that code fragments and lambdas see its locals. The
/// submission opens the file so its magic comments still apply.
const SKELETON: &str = r#"{{{user_code}}}

$arbiter_binding = binding

require 'json'
require 'open3'
require 'rbconfig'
require 'stringio'

ARBITER_CLIP = 16384

module ArbiterHarness
  class ProcessExit < StandardError
  end
end

def __arbiter_resolve(name)
  if name.match?(/\A[a-z_][A-Za-z0-9_]*\z/) && $arbiter_binding.local_variable_defined?(name.to_sym)
    $arbiter_binding.local_variable_get(name.to_sym)
  else
    method(name.to_sym)
  end
end

$arbiter_callables = {
{{{callables}}}
}

def __arbiter_now
  Process.clock_gettime(Process::CLOCK_MONOTONIC)
end

def __arbiter_run_program(source, input)
  out, err, status = Open3.capture3(RbConfig.ruby, '-e', source, stdin_data: input)
  unless status.success?
    lines = err.lines.map(&:strip).reject(&:empty?)
    raise ArbiterHarness::ProcessExit, (lines.last || "exited with status #{status.exitstatus}")
  end
  out
end

def __arbiter_clip(text, keep)
  text.length <= keep ? text : text[0, keep] + '... (truncated)'
end

def __arbiter_error_type(error)
  error.is_a?(ArbiterHarness::ProcessExit) ? 'ProcessExit' : error.class.name.to_s
end

def __arbiter_run_tests
  tests = JSON.parse({{{tests_json}}})
  source = {{{user_source}}}
  if tests.any? { |test| test['function_call'].nil? && test['code'].nil? }
    # A syntax error here ends the unit before any report, as a parse failure.
    RubyVM::InstructionSequence.compile(source, 'program.rb')
  end
  results = []
  tests.each do |test|
    expected = test.fetch('expected', '').to_s.strip
    captured = StringIO.new
    $stdout = captured
    started = __arbiter_now
    begin
      call = test['function_call']
      if call
        target = $arbiter_callables.fetch(call['name']).call
        value = target.call(*(call['args'] || []), **(call['kwargs'] || {}).transform_keys(&:to_sym))
        elapsed = __arbiter_now - started
        actual = value.to_s
      elsif test['code']
        value = $arbiter_binding.eval(test['code'])
        elapsed = __arbiter_now - started
        actual = value.nil? && !captured.string.empty? ? captured.string : value.to_s
      else
        actual = __arbiter_run_program(source, test.fetch('input', '').to_s)
        elapsed = __arbiter_now - started
      end
      actual = actual.to_s.scrub.strip
      results << {
        'name' => test['name'],
        'passed' => actual == expected,
        'time' => elapsed,
        'actual' => __arbiter_clip(actual, [ARBITER_CLIP, expected.length].max)
      }
    rescue Exception => e
      elapsed = __arbiter_now - started
      results << {
        'name' => test['name'],
        'passed' => false,
        'time' => elapsed,
        'error' => __arbiter_clip(e.message.to_s.scrub, ARBITER_CLIP),
        'error_type' => __arbiter_error_type(e)
      }
    ensure
      $stdout = STDOUT
    end
  end
  report = {
    'tests' => results,
    'total_time' => results.sum { |r| r['time'] },
    'passed' => results.count { |r| r['passed'] },
    'total' => results.length
  }
  STDOUT.write("\n" + JSON.generate(report) + "\n")
  STDOUT.flush
end

__arbiter_run_tests
"#;

const SYNTAX_CHECK: &str = r#"require 'json'

source = {{{user_source}}}
report =
  begin
    RubyVM::InstructionSequence.compile(source, 'submission.rb')
    { 'valid' => true }
  rescue SyntaxError => e
    { 'valid' => false, 'error' => e.message.to_s.scrub }
  end
STDOUT.write("\n" + JSON.generate(report) + "\n")
"#;

pub struct RubyAdapter;

impl LanguageAdapter for RubyAdapter {
    fn language(&self) -> Language {
        Language::Ruby
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
        "main.rb"
    }

    fn string_literal(&self, text: &str) -> String {
        single_quoted_literal(text)
    }

    fn callable_entry(&self, name: &str) -> String {
        let key = single_quoted_literal(name);
        format!("  {} => -> {{ __arbiter_resolve({}) }},", key, key)
    }

    /// Method names may end in `?` or `!`.
    fn is_valid_callable_name(&self, name: &str) -> bool {
        let base = name.strip_suffix(&['?', '!'][..]).unwrap_or(name);
        super::is_plain_identifier(base)
    }

    fn is_parse_error(&self, stderr: &str) -> bool {
        stderr.contains("syntax error") || stderr.contains("(SyntaxError)")
    }
}
