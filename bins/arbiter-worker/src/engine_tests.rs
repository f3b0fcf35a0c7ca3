/// Docker-backed integration tests for the full judge pipeline.
///
/// These need a Docker daemon and pull the language images on first use:
///
///     cargo test -p arbiter-worker -- --ignored --test-threads=1
///
/// Single-threaded so the orphan-container check sees only its own containers.

#[cfg(test)]
mod docker_tests {
    use crate::config::LanguageConfigManager;
    use crate::engine::DockerEngine;
    use arbiter_common::types::{
        ErrorKind, ExecutionReport, JobMode, ResourceLimits, SubmissionJob, TestCase, TestOutcome,
        Verdict,
    };
    use arbiter_harness::{Orchestrator, SANDBOX_LABEL};
    use bollard::container::ListContainersOptions;
    use serde_json::json;
    use std::collections::HashMap;
    use std::path::Path;
    use uuid::Uuid;

    fn orchestrator() -> Orchestrator<DockerEngine> {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/languages.json");
        let configs = LanguageConfigManager::load(&path).expect("Failed to load language config");
        let engine = DockerEngine::new_with_config(&configs).expect("Failed to create Docker engine");
        Orchestrator::new(engine)
    }

    fn job(language: &str, source: &str, tests: serde_json::Value) -> SubmissionJob {
        SubmissionJob {
            id: Uuid::new_v4(),
            language: language.to_string(),
            source_code: source.to_string(),
            test_cases: serde_json::from_value::<Vec<TestCase>>(tests).unwrap(),
            limits: ResourceLimits::default(),
            mode: JobMode::Judge,
        }
    }

    async fn judge(language: &str, source: &str, tests: serde_json::Value) -> ExecutionReport {
        orchestrator()
            .judge(&job(language, source, tests))
            .await
            .expect("judge failed")
    }

    fn add_suite() -> serde_json::Value {
        json!([
            {"name": "add", "expected": "5", "function_call": {"name": "add", "args": [2, 3]}},
            {"name": "negative", "expected": "-1", "function_call": {"name": "add", "args": [2, -3]}}
        ])
    }

    fn error_type(report: &ExecutionReport, index: usize) -> &str {
        match &report.tests[index].outcome {
            TestOutcome::Raised { error_type, .. } => error_type,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    fn actual(report: &ExecutionReport, index: usize) -> &str {
        match &report.tests[index].outcome {
            TestOutcome::Compared { actual, .. } => actual,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    fn assert_all_passed(report: &ExecutionReport) {
        assert!(report.failure.is_none(), "unexpected failure: {:?}", report.failure);
        assert_eq!(report.passed, report.total, "report: {:?}", report.tests);
        let max = report.tests.iter().map(|t| t.time).fold(0.0, f64::max);
        assert!(report.total_time >= max);
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_add_python() {
        let report = judge("python", "def add(a, b):\n    return a + b\n", add_suite()).await;
        assert_eq!(report.total, 2);
        assert_all_passed(&report);
        assert_eq!(report.verdict(), Verdict::Accepted);
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_add_javascript() {
        let report = judge("javascript", "function add(a, b) { return a + b; }\n", add_suite()).await;
        assert_all_passed(&report);
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_add_ruby() {
        let report = judge("ruby", "def add(a, b)\n  a + b\nend\n", add_suite()).await;
        assert_all_passed(&report);
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_add_php() {
        let report = judge("php", "<?php\nfunction add($a, $b) { return $a + $b; }\n", add_suite()).await;
        assert_all_passed(&report);
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_exception_is_isolated() {
        let source = "def div(a, b):\n    return a // b\n";
        let report = judge(
            "python",
            source,
            json!([
                {"name": "zero", "expected": "0", "function_call": {"name": "div", "args": [1, 0]}},
                {"name": "ok", "expected": "2", "function_call": {"name": "div", "args": [4, 2]}}
            ]),
        )
        .await;

        assert_eq!(report.total, 2);
        assert_eq!(report.passed, 1);
        match &report.tests[0].outcome {
            TestOutcome::Raised { error_type, .. } => assert_eq!(error_type, "ZeroDivisionError"),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(report.tests[1].passed);
        assert_eq!(report.verdict(), Verdict::RuntimeError);
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_eval_and_stdio_strategies() {
        let source = "def greet(name):\n    return 'hi ' + name\n\nif __name__ == '__main__':\n    a, b = map(int, input().split())\n    print(a + b)\n";
        let report = judge(
            "python",
            source,
            json!([
                {"name": "eval", "expected": "hi bob", "code": "greet('bob')"},
                {"name": "statements", "expected": "hi amy", "code": "print(greet('amy'))"},
                {"name": "stdio", "input": "2 3\n", "expected": "5"}
            ]),
        )
        .await;
        assert_all_passed(&report);
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_comparison_is_exact_after_trim() {
        let python = judge(
            "python",
            "def f():\n    return 42.0\n",
            json!([{"expected": "42", "function_call": {"name": "f"}}]),
        )
        .await;
        assert_eq!(python.passed, 0);

        let javascript = judge(
            "javascript",
            "function f() { return 42.0; }",
            json!([{"expected": " 42 \n", "function_call": {"name": "f"}}]),
        )
        .await;
        assert_eq!(javascript.passed, 1);
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_parse_error_marks_every_test() {
        let report = judge("python", "def add(a, b)\n    return a + b\n", add_suite()).await;
        assert_eq!(report.total, 2);
        assert_eq!(report.passed, 0);
        assert_eq!(report.failure.unwrap().kind, ErrorKind::CompileOrParseError);
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_timeout_leaves_no_container() {
        let started = chrono::Utc::now().timestamp() - 1;
        let mut job = job(
            "python",
            "def spin():\n    while True:\n        pass\n",
            json!([{"expected": "never", "function_call": {"name": "spin"}}]),
        );
        job.limits.time_limit_ms = Some(500);

        let report = orchestrator().judge(&job).await.expect("judge failed");
        assert_eq!(report.failure.unwrap().kind, ErrorKind::Timeout);
        assert_eq!(report.total, 1);

        let docker = bollard::Docker::connect_with_local_defaults().unwrap();
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![SANDBOX_LABEL.to_string()]);
        let leftovers: Vec<_> = docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .unwrap()
            .into_iter()
            .filter(|c| c.created.unwrap_or(0) >= started)
            .collect();
        assert!(leftovers.is_empty(), "orphaned containers: {:?}", leftovers);
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_no_network() {
        let source = "import socket\n\ndef reach_out():\n    socket.create_connection(('1.1.1.1', 53), timeout=1)\n    return 'connected'\n";
        let report = judge(
            "python",
            source,
            json!([{"expected": "connected", "function_call": {"name": "reach_out"}}]),
        )
        .await;
        assert_eq!(report.passed, 0);
        assert!(matches!(report.tests[0].outcome, TestOutcome::Raised { .. }));
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_future_import_python() {
        let source = "from __future__ import annotations\n\ndef add(a: int, b: int) -> int:\n    return a + b\n";
        let report = judge("python", source, add_suite()).await;
        assert_all_passed(&report);
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_stdio_program_may_exit_at_top_level() {
        let source = "import sys\nprint(sum(map(int, sys.stdin.read().split())))\nsys.exit(0)\n";
        let report = judge(
            "python",
            source,
            json!([
                {"input": "1 2", "expected": "3"},
                {"input": "4 5", "expected": "9"}
            ]),
        )
        .await;
        assert_all_passed(&report);

        let php = judge(
            "php",
            "<?php\necho array_sum(explode(' ', trim(fgets(STDIN))));\nexit(0);\n",
            json!([{"input": "1 2", "expected": "3"}, {"input": "4 5", "expected": "9"}]),
        )
        .await;
        assert_all_passed(&php);
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_stdio_parse_error_is_compile_error() {
        for (language, source) in [
            ("python", "print(1 +\n"),
            ("javascript", "console.log(1 +;\n"),
            ("ruby", "puts(1 +\n"),
            ("php", "<?php\necho 1 +;\n"),
        ] {
            let report = judge(language, source, json!([{"input": "", "expected": "1"}])).await;
            assert_eq!(
                report.failure.as_ref().map(|f| f.kind),
                Some(ErrorKind::CompileOrParseError),
                "{}: {:?}",
                language,
                report
            );
        }
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_exception_is_isolated_in_every_language() {
        let cases = [
            ("javascript", "function f(x) { if (x === 0) { throw new TypeError('zero'); } return x; }\n", "TypeError"),
            ("ruby", "def f(x)\n  x.zero? ? f(x) : x\nend\n", "SystemStackError"),
            ("php", "<?php\nfunction f($x) { return intdiv(1, $x) + $x - 1; }\n", "DivisionByZeroError"),
        ];
        for (language, source, raised) in cases {
            let report = judge(
                language,
                source,
                json!([
                    {"name": "zero", "expected": "0", "function_call": {"name": "f", "args": [0]}},
                    {"name": "one", "expected": "1", "function_call": {"name": "f", "args": [1]}}
                ]),
            )
            .await;
            assert!(report.failure.is_none(), "{}: {:?}", language, report.failure);
            assert_eq!(error_type(&report, 0), raised, "{}", language);
            assert!(report.tests[1].passed, "{}: {:?}", language, report.tests[1]);
        }
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_eval_strategy_in_every_language() {
        let cases = [
            (
                "javascript",
                "function greet(name) { return 'hi ' + name; }\n",
                // Fragments must not reach the runner's own locals.
                "var results = null; console.log(greet('amy'))",
            ),
            ("ruby", "def greet(name)\n  'hi ' + name\nend\n", "puts greet('amy')"),
            ("php", "<?php\nfunction greet($name) { return 'hi ' . $name; }\n", "echo greet('amy');"),
        ];
        for (language, source, statements) in cases {
            let report = judge(
                language,
                source,
                json!([
                    {"name": "eval", "expected": "hi bob", "code": "greet('bob')"},
                    {"name": "statements", "expected": "hi amy", "code": statements},
                    {"name": "after", "expected": "hi cy", "code": "greet('cy')"}
                ]),
            )
            .await;
            assert!(report.failure.is_none(), "{}: {:?}", language, report.failure);
            assert_eq!(report.passed, 3, "{}: {:?}", language, report.tests);
        }
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_stdio_strategy_in_every_language() {
        let cases = [
            (
                "javascript",
                "const [a, b] = require('fs').readFileSync(0, 'utf8').trim().split(' ').map(Number);\nconsole.log(a + b);\n",
            ),
            ("ruby", "a, b = STDIN.read.split.map(&:to_i)\nputs a + b\n"),
            (
                "php",
                "<?php\n[$a, $b] = array_map('intval', explode(' ', trim(stream_get_contents(STDIN))));\necho $a + $b;\n",
            ),
        ];
        for (language, source) in cases {
            let report = judge(
                language,
                source,
                json!([
                    {"name": "small", "input": "2 3\n", "expected": "5"},
                    {"name": "large", "input": "40 2", "expected": "42"}
                ]),
            )
            .await;
            assert!(report.failure.is_none(), "{}: {:?}", language, report.failure);
            assert_eq!(report.passed, 2, "{}: {:?}", language, report.tests);
        }
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_return_values_are_stringified_per_language() {
        let ruby = judge(
            "ruby",
            "def nothing\n  nil\nend\n",
            json!([{"expected": "", "function_call": {"name": "nothing"}}]),
        )
        .await;
        assert_all_passed(&ruby);
        assert_eq!(actual(&ruby, 0), "");

        let php = judge(
            "php",
            "<?php\nfunction yes() { return true; }\nfunction five() { return 5.0; }\n",
            json!([
                {"expected": "true", "function_call": {"name": "yes"}},
                {"expected": "5", "function_call": {"name": "five"}}
            ]),
        )
        .await;
        assert_all_passed(&php);
        assert_eq!(actual(&php, 0), "true");
        assert_eq!(actual(&php, 1), "5");
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_keyword_arguments() {
        let suite = json!([
            {"expected": "Hi, Ada!", "function_call": {"name": "greet", "args": ["Ada"], "kwargs": {"punctuation": "!"}}},
            {"expected": "Hi, Bo.", "function_call": {"name": "greet", "args": ["Bo"]}}
        ]);
        let python = judge(
            "python",
            "def greet(name, punctuation='.'):\n    return 'Hi, ' + name + punctuation\n",
            suite.clone(),
        )
        .await;
        assert_all_passed(&python);

        let ruby = judge(
            "ruby",
            "def greet(name, punctuation: '.')\n  'Hi, ' + name + punctuation\nend\n",
            suite.clone(),
        )
        .await;
        assert_all_passed(&ruby);

        let php = judge(
            "php",
            "<?php\nfunction greet($name, $punctuation = '.') { return 'Hi, ' . $name . $punctuation; }\n",
            suite,
        )
        .await;
        assert_all_passed(&php);
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_huge_return_value_is_a_wrong_answer() {
        let report = judge(
            "python",
            "def flood():\n    return 'x' * 5_000_000\n",
            json!([
                {"name": "flood", "expected": "x", "function_call": {"name": "flood"}},
                {"name": "small", "expected": "x", "code": "'x'"}
            ]),
        )
        .await;
        assert!(report.failure.is_none(), "unexpected failure: {:?}", report.failure);
        assert!(!report.tests[0].passed);
        assert!(actual(&report, 0).ends_with("(truncated)"));
        assert!(report.tests[1].passed);
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_syntax_check_in_every_language() {
        let orchestrator = orchestrator();
        for (language, valid, broken) in [
            ("python", "def f():\n    return 1\n", "def f(:\n"),
            ("javascript", "function f() { return 1; }\n", "function f( { }\n"),
            ("ruby", "def f\n  1\nend\n", "def f(\n"),
            ("php", "<?php\nfunction f() { return 1; }\n", "<?php\nfunction f( { }\n"),
        ] {
            let mut job = job(language, valid, json!([]));
            job.mode = JobMode::SyntaxCheck;
            let check = orchestrator.check_syntax(&job).await.expect("syntax check failed");
            assert!(check.valid, "{}: {:?}", language, check);

            job.source_code = broken.to_string();
            let check = orchestrator.check_syntax(&job).await.expect("syntax check failed");
            assert!(!check.valid, "{} accepted broken source", language);
            assert!(check.error.is_some());
        }
    }
}
