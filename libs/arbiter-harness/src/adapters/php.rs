use arbiter_common::types::Language;

use super::{is_plain_identifier, single_quoted_literal, LanguageAdapter};

/// PHP 8 CLI harness. The submission carries its own `<?php` open tag; the
/// harness section re-enters PHP mode after it.
///
/// `exit()` inside submission code ends the whole script, so such a run is judged
/// by exit status and output alone.
const SKELETON: &str = r#"{{{user_code}}}
?><?php

const ARBITER_CLIP = 16384;

final class ArbiterProcessExit extends \RuntimeException
{
}

function __arbiter_resolve(string $name)
{
    if (function_exists($name)) {
        return $name;
    }
    if (isset($GLOBALS[$name]) && is_callable($GLOBALS[$name])) {
        return $GLOBALS[$name];
    }
    return $name;
}

$__arbiter_callables = [
{{{callables}}}
];

function __arbiter_stringify($value): string
{
    if (is_bool($value)) {
        return $value ? 'true' : 'false';
    }
    if ($value === null) {
        return '';
    }
    if (is_array($value) || (is_object($value) && !method_exists($value, '__toString'))) {
        return (string) json_encode($value, JSON_INVALID_UTF8_SUBSTITUTE);
    }
    return (string) $value;
}

function __arbiter_evaluate(string $fragment, bool &$fromOutput)
{
    $scope = $GLOBALS;
    extract($scope, EXTR_SKIP);
    $fromOutput = false;
    try {
        return eval('return ' . rtrim(trim($fragment), ';') . ';');
    } catch (\ParseError $notAnExpression) {
        $fromOutput = true;
        eval($fragment);
        return null;
    }
}

// Returns [exit status, stdout, stderr].
function __arbiter_spawn(array $command, string $input): array
{
    $dir = sys_get_temp_dir();
    $files = [tempnam($dir, 'arbiter'), tempnam($dir, 'arbiter'), tempnam($dir, 'arbiter')];
    file_put_contents($files[0], $input);
    // Files on every stream: a child that floods one stream cannot block on a full pipe.
    $descriptors = [0 => ['file', $files[0], 'r'], 1 => ['file', $files[1], 'w'], 2 => ['file', $files[2], 'w']];
    $process = proc_open($command, $descriptors, $pipes);
    $status = is_resource($process) ? proc_close($process) : null;
    $stdout = (string) @file_get_contents($files[1]);
    $stderr = (string) @file_get_contents($files[2]);
    foreach ($files as $file) {
        @unlink($file);
    }
    if ($status === null) {
        throw new ArbiterProcessExit('program could not be started');
    }
    return [$status, $stdout, $stderr];
}

function __arbiter_lint(string $path): ?string
{
    [$status, $stdout] = __arbiter_spawn([PHP_BINARY, '-n', '-d', 'display_errors=1', '-d', 'log_errors=0', '-l', $path], '');
    if ($status === 0) {
        return null;
    }
    foreach (explode("\n", $stdout) as $line) {
        $line = trim($line);
        if ($line !== '' && strpos($line, 'Errors parsing') !== 0) {
            return str_replace($path, 'program.php', $line);
        }
    }
    return 'Parse error: program could not be parsed';
}

function __arbiter_run_program(string $path, string $input): string
{
    [$status, $stdout, $stderr] = __arbiter_spawn([PHP_BINARY, '-d', 'display_errors=stderr', $path], $input);
    if ($status !== 0) {
        $lines = array_values(array_filter(array_map('trim', explode("\n", $stderr)), 'strlen'));
        throw new ArbiterProcessExit($lines ? $lines[count($lines) - 1] : 'exited with status ' . $status);
    }
    return $stdout;
}

function __arbiter_clip(string $text, int $keep): string
{
    return strlen($text) <= $keep ? $text : substr($text, 0, $keep) . '... (truncated)';
}

function __arbiter_elapsed(int $started): float
{
    return (hrtime(true) - $started) / 1e9;
}

function __arbiter_run_tests(array $callables): void
{
    $tests = json_decode({{{tests_json}}}, true, 512, JSON_THROW_ON_ERROR);
    $source = {{{user_source}}};
    $program = null;
    foreach ($tests as $test) {
        if (!isset($test['function_call']) && !isset($test['code'])) {
            $program = tempnam(sys_get_temp_dir(), 'arbiter');
            file_put_contents($program, $source);
            $parseError = __arbiter_lint($program);
            if ($parseError !== null) {
                // Reported like a parse failure of the unit itself.
                @unlink($program);
                fwrite(STDERR, $parseError . "\n");
                exit(255);
            }
            break;
        }
    }
    $results = [];
    foreach ($tests as $test) {
        $expected = trim((string) ($test['expected'] ?? ''));
        ob_start();
        $started = hrtime(true);
        try {
            if (isset($test['function_call'])) {
                $call = $test['function_call'];
                $target = $callables[$call['name']]();
                $value = $target(...array_values($call['args'] ?? []), ...($call['kwargs'] ?? []));
                $elapsed = __arbiter_elapsed($started);
                $actual = __arbiter_stringify($value);
            } elseif (isset($test['code'])) {
                $fromOutput = false;
                $value = __arbiter_evaluate($test['code'], $fromOutput);
                $elapsed = __arbiter_elapsed($started);
                $actual = $fromOutput ? (string) ob_get_contents() : __arbiter_stringify($value);
            } else {
                $actual = __arbiter_run_program($program, (string) ($test['input'] ?? ''));
                $elapsed = __arbiter_elapsed($started);
            }
            $actual = trim($actual);
            $results[] = [
                'name' => $test['name'],
                'passed' => $actual === $expected,
                'time' => $elapsed,
                'actual' => __arbiter_clip($actual, max(ARBITER_CLIP, strlen($expected))),
            ];
        } catch (\Throwable $e) {
            $elapsed = __arbiter_elapsed($started);
            $results[] = [
                'name' => $test['name'],
                'passed' => false,
                'time' => $elapsed,
                'error' => __arbiter_clip($e->getMessage(), ARBITER_CLIP),
                'error_type' => $e instanceof ArbiterProcessExit ? 'ProcessExit' : get_class($e),
            ];
        } finally {
            ob_end_clean();
        }
    }
    if ($program !== null) {
        @unlink($program);
    }
    $report = [
        'tests' => $results,
        'total_time' => (float) array_sum(array_column($results, 'time')),
        'passed' => count(array_filter($results, static fn ($r) => $r['passed'])),
        'total' => count($results),
    ];
    fwrite(STDOUT, "\n" . json_encode($report, JSON_INVALID_UTF8_SUBSTITUTE | JSON_PRESERVE_ZERO_FRACTION) . "\n");
}

__arbiter_run_tests($__arbiter_callables);
"#;

const SYNTAX_CHECK: &str = r#"<?php

$source = {{{user_source}}};
$dir = sys_get_temp_dir();
$path = tempnam($dir, 'arbiter');
$output = tempnam($dir, 'arbiter');
file_put_contents($path, $source);
$command = [PHP_BINARY, '-n', '-d', 'display_errors=1', '-d', 'log_errors=0', '-l', $path];
$process = proc_open($command, [0 => ['file', '/dev/null', 'r'], 1 => ['file', $output, 'w'], 2 => ['file', '/dev/null', 'w']], $pipes);
if (!is_resource($process)) {
    fwrite(STDERR, "linter could not be started\n");
    exit(1);
}
$status = proc_close($process);
$report = ['valid' => $status === 0];
if ($status !== 0) {
    $report['error'] = 'Parse error: submission could not be parsed';
    foreach (explode("\n", (string) file_get_contents($output)) as $line) {
        $line = trim($line);
        if ($line !== '' && strpos($line, 'Errors parsing') !== 0) {
            $report['error'] = str_replace($path, 'submission.php', $line);
            break;
        }
    }
}
@unlink($path);
@unlink($output);
fwrite(STDOUT, "\n" . json_encode($report, JSON_INVALID_UTF8_SUBSTITUTE) . "\n");
"#;

pub struct PhpAdapter;

impl LanguageAdapter for PhpAdapter {
    fn language(&self) -> Language {
        Language::Php
    }

    fn skeleton(&self) -> &'static str {
        SKELETON
    }

    fn syntax_check_skeleton(&self) -> &'static str {
        SYNTAX_CHECK
    }

    fn blank_submission(&self) -> &'static str {
        "<?php"
    }

    fn supports_keyword_arguments(&self) -> bool {
        true
    }

    fn source_file(&self) -> &'static str {
        "main.php"
    }

    fn string_literal(&self, text: &str) -> String {
        single_quoted_literal(text)
    }

    fn callable_entry(&self, name: &str) -> String {
        let key = single_quoted_literal(name);
        format!("    {} => static fn () => __arbiter_resolve({}),", key, key)
    }

    fn is_valid_callable_name(&self, name: &str) -> bool {
        is_plain_identifier(name)
    }

    fn is_parse_error(&self, stderr: &str) -> bool {
        stderr.contains("Parse error")
    }
}
