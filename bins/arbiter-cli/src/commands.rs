// CLI commands for operating Arbiter
use anyhow::{Context, Result, bail};
use arbiter_common::redis as queue;
use arbiter_common::types::{
    JobMode, Language, ResourceLimits, SubmissionJob, SubmissionResult, TestCase, TestOutcome,
};
use arbiter_harness::{AdapterRegistry, TemplateRenderer, SANDBOX_LABEL};
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Added to the longest configured wall-clock limit before a container counts as stale.
const CLEANUP_GRACE_SECS: u64 = 60;

/// A submission as written by hand: everything but the id.
#[derive(Debug, Deserialize)]
pub struct JobFile {
    pub language: String,
    pub source_code: String,
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub limits: ResourceLimits,
}

impl JobFile {
    fn into_job(self) -> SubmissionJob {
        SubmissionJob {
            id: Uuid::new_v4(),
            language: self.language,
            source_code: self.source_code,
            test_cases: self.test_cases,
            limits: self.limits,
            mode: JobMode::Judge,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LanguageEntry {
    name: String,
    version: String,
    image: String,
    queue_name: String,
    memory_limit_mb: u32,
    time_limit_ms: u64,
    max_wall_time_ms: u64,
}

#[derive(Debug, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageEntry>,
}

fn load_job_file(path: &str) -> Result<JobFile> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read job file {}", path))?;
    parse_job_file(&content).with_context(|| format!("Failed to parse job file {}", path))
}

fn parse_job_file(content: &str) -> Result<JobFile> {
    Ok(serde_json::from_str(content)?)
}

/// Load languages configuration
fn load_languages_config(path: &str) -> Result<LanguagesJson> {
    let config_path = Path::new(path);
    if !config_path.exists() {
        bail!("Config file not found: {}", path);
    }

    let content = fs::read_to_string(config_path)
        .context("Failed to read languages.json")?;
    serde_json::from_str(&content)
        .context("Failed to parse languages.json")
}

async fn connect(redis_url: &str) -> Result<ConnectionManager> {
    let client = redis::Client::open(redis_url).context("Invalid Redis URL")?;
    ConnectionManager::new(client)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", redis_url))
}

/// Render a job file and print the generated harness source
pub fn render_job(path: &str) -> Result<()> {
    let job = load_job_file(path)?.into_job();
    let adapters = AdapterRegistry::builtin();
    let adapter = adapters.resolve(&job.language)?;
    let unit = TemplateRenderer::new().render(adapter, &job.source_code, &job.test_cases)?;

    eprintln!("📄 {} ({} tests, {} bytes)", unit.file_name, unit.test_count(), unit.source.len());
    println!("{}", unit.source);
    Ok(())
}

/// Queue a job file, optionally polling for its result until `timeout` passes
pub async fn submit_job(path: &str, redis_url: &str, wait: bool, timeout: Duration) -> Result<()> {
    let job = load_job_file(path)?.into_job();
    let language = Language::from_str(&job.language)
        .with_context(|| format!("Unsupported language: {}", job.language))?;

    // Fail here rather than on the worker
    let adapters = AdapterRegistry::builtin();
    TemplateRenderer::new().render(adapters.resolve(&job.language)?, &job.source_code, &job.test_cases)?;

    let mut conn = connect(redis_url).await?;
    queue::push_job(&mut conn, &language, &job)
        .await
        .context("Failed to queue job")?;

    println!("✅ Queued job {} on {}", job.id, queue::queue_name(&language));

    if wait {
        println!("⏳ Waiting for result...");
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(result) = queue::get_result(&mut conn, &job.id).await? {
                print_result(&result);
                break;
            }
            if Instant::now() >= deadline {
                bail!(
                    "No result for job {} after {}s; is a worker consuming {}?",
                    job.id,
                    timeout.as_secs(),
                    queue::queue_name(&language)
                );
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    Ok(())
}

/// Print the stored result of a job
pub async fn show_result(id: &str, redis_url: &str) -> Result<()> {
    let job_id = Uuid::parse_str(id).context("Invalid job ID format")?;
    let mut conn = connect(redis_url).await?;

    match queue::get_result(&mut conn, &job_id).await? {
        Some(result) => print_result(&result),
        None => println!("⏳ Job {} is queued or still executing", job_id),
    }
    Ok(())
}

fn print_result(result: &SubmissionResult) {
    println!("\n📋 Job {} ({})", result.job_id, result.language);
    println!("   Verdict: {}  Score: {}", result.verdict, result.score);

    if let Some(error) = &result.error {
        println!("   Error: {}", error);
    }

    let Some(report) = &result.report else {
        return;
    };

    println!("   Passed: {}/{} in {:.3}s\n", report.passed, report.total, report.total_time);
    for test in &report.tests {
        let mark = if test.passed { "✅" } else { "❌" };
        match &test.outcome {
            TestOutcome::Compared { expected, actual } if !test.passed => {
                println!("  {} {} ({:.3}s): expected {:?}, got {:?}", mark, test.name, test.time, expected, actual);
            }
            TestOutcome::Raised { error, error_type } => {
                println!("  {} {} ({:.3}s): {}: {}", mark, test.name, test.time, error_type, error);
            }
            _ => println!("  {} {} ({:.3}s)", mark, test.name, test.time),
        }
    }

    if let Some(failure) = &report.failure {
        println!("\n⚠️  {}: {}", failure.kind, failure.message);
        if !failure.stderr.is_empty() {
            println!("{}", failure.stderr);
        }
    }
}

/// List configured languages
pub fn list_languages(config_path: &str) -> Result<()> {
    let config = load_languages_config(config_path)?;

    println!("📚 Configured languages:\n");
    for lang in &config.languages {
        let marker = if Language::from_str(&lang.name).is_some() { "✓" } else { "?" };
        println!(
            "  {} {:<12} {:<8} {:<20} {:<24} {}MB {}ms/test",
            marker, lang.name, lang.version, lang.image, lang.queue_name, lang.memory_limit_mb, lang.time_limit_ms
        );
    }
    Ok(())
}

/// Pull runtime images
pub fn pull_images(config_path: &str, only: Option<&str>) -> Result<()> {
    let config = load_languages_config(config_path)?;

    let selected: Vec<&LanguageEntry> = config
        .languages
        .iter()
        .filter(|lang| only.map_or(true, |name| lang.name == name))
        .collect();

    if selected.is_empty() {
        bail!("No configured language matches '{}'", only.unwrap_or_default());
    }

    for lang in selected {
        println!("\n🐳 Pulling {} for {}", lang.image, lang.name);
        let status = Command::new("docker")
            .args(["pull", &lang.image])
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .context("Failed to execute docker pull. Is Docker installed and running?")?;

        if !status.success() {
            bail!("Pulling {} failed with exit code: {:?}", lang.image, status.code());
        }
    }

    println!("\n✅ Images ready");
    Ok(())
}

/// Remove sandbox containers left behind by crashed workers.
///
/// Only containers older than `older_than_secs` are touched; by default that is
/// the longest configured wall-clock limit plus a grace period, so runs still in
/// progress on a live worker are left alone.
pub fn cleanup_containers(config_path: &str, older_than_secs: Option<u64>) -> Result<()> {
    let older_than_secs = match older_than_secs {
        Some(secs) => secs,
        None => default_cleanup_age_secs(&load_languages_config(config_path)?),
    };

    let output = Command::new("docker")
        .args([
            "ps",
            "-a",
            "--filter",
            &format!("label={}", SANDBOX_LABEL),
            "--format",
            "{{.ID}}\t{{.CreatedAt}}",
        ])
        .output()
        .context("Failed to execute docker ps. Is Docker installed and running?")?;

    if !output.status.success() {
        bail!("docker ps failed: {}", String::from_utf8_lossy(&output.stderr).trim());
    }

    let cutoff = Utc::now() - chrono::Duration::seconds(older_than_secs as i64);
    let ids = stale_container_ids(&String::from_utf8_lossy(&output.stdout), cutoff);
    if ids.is_empty() {
        println!("✨ No sandbox containers older than {}s", older_than_secs);
        return Ok(());
    }

    println!("🧹 Removing {} sandbox container(s) older than {}s", ids.len(), older_than_secs);
    let status = Command::new("docker")
        .arg("rm")
        .arg("-f")
        .args(&ids)
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .status()
        .context("Failed to execute docker rm")?;

    if !status.success() {
        bail!("docker rm failed with exit code: {:?}", status.code());
    }

    println!("✅ Cleanup complete");
    Ok(())
}

fn default_cleanup_age_secs(config: &LanguagesJson) -> u64 {
    let longest_ms = config
        .languages
        .iter()
        .map(|lang| lang.max_wall_time_ms)
        .max()
        .unwrap_or(0);
    longest_ms.div_ceil(1000) + CLEANUP_GRACE_SECS
}

/// Ids from `docker ps --format "{{.ID}}\t{{.CreatedAt}}"` created before `cutoff`.
/// Lines whose timestamp cannot be read are kept out.
fn stale_container_ids(listing: &str, cutoff: DateTime<Utc>) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| {
            let (id, created) = line.trim().split_once('\t')?;
            let created = parse_docker_timestamp(created)?;
            (created < cutoff).then(|| id.trim().to_string())
        })
        .filter(|id| !id.is_empty())
        .collect()
}

/// Docker prints e.g. `2024-01-15 10:30:00 +0000 UTC`; the zone name is dropped.
fn parse_docker_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let stamp = text.split_whitespace().take(3).collect::<Vec<_>>().join(" ");
    DateTime::parse_from_str(&stamp, "%Y-%m-%d %H:%M:%S %z")
        .ok()
        .map(|created| created.with_timezone(&Utc))
}

/// Check that the Docker daemon answers
pub fn check_docker() -> Result<()> {
    let output = Command::new("docker")
        .args(["version", "--format", "{{.Server.Version}}"])
        .output()
        .context("Failed to execute docker. Is Docker installed?")?;

    if !output.status.success() {
        bail!(
            "Docker daemon is not reachable: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    println!("✅ Docker daemon {} is reachable", String::from_utf8_lossy(&output.stdout).trim());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_job_file() {
        let job = parse_job_file(
            r#"{
                "language": "python",
                "source_code": "def add(a, b):\n    return a + b\n",
                "test_cases": [{"expected": "5", "function_call": {"name": "add", "args": [2, 3]}}]
            }"#,
        )
        .unwrap()
        .into_job();

        assert_eq!(job.language, "python");
        assert_eq!(job.test_cases.len(), 1);
        assert_eq!(job.limits, ResourceLimits::default());
    }

    #[test]
    fn test_parse_job_file_requires_tests() {
        assert!(parse_job_file(r#"{"language": "python", "source_code": ""}"#).is_err());
    }

    #[test]
    fn test_only_old_containers_are_stale() {
        let cutoff = DateTime::parse_from_rfc3339("2024-01-15T10:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let listing = "old1\t2024-01-15 10:00:00 +0000 UTC\n\
                       live\t2024-01-15 10:29:30 +0000 UTC\n\
                       \n\
                       old2\t2024-01-15 11:00:00 +0200 CEST\n\
                       odd\tyesterday\n";
        assert_eq!(stale_container_ids(listing, cutoff), vec!["old1", "old2"]);
        assert!(stale_container_ids("", cutoff).is_empty());
    }

    #[test]
    fn test_default_cleanup_age_outlasts_every_run() {
        let config = load_languages_config("../../config/languages.json").unwrap();
        let longest = config.languages.iter().map(|l| l.max_wall_time_ms).max().unwrap();
        assert_eq!(default_cleanup_age_secs(&config), longest.div_ceil(1000) + CLEANUP_GRACE_SECS);
        assert!(default_cleanup_age_secs(&config) * 1000 > longest);
    }

    #[test]
    fn test_repository_config_lists() {
        let config = load_languages_config("../../config/languages.json").unwrap();
        assert!(config.languages.iter().all(|lang| Language::from_str(&lang.name).is_some()));
    }
}
