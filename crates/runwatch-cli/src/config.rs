use crate::connector::{BackoffPolicy, ConnectorConfig};
use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use runwatch_core::contracts::StartRunRequest;
use runwatch_core::StreamCursor;
use runwatch_state::StoreConfig;
use std::time::Duration;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5001";

#[derive(Parser, Debug)]
#[command(name = "runwatch")]
#[command(about = "Follow a multi-agent workflow run and reconcile its event stream", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
    #[arg(long, global = true, env = "RUNWATCH_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,
    #[arg(long, global = true, env = "RUNWATCH_BUFFER_CAPACITY", default_value_t = 500)]
    pub buffer_capacity: usize,
    #[arg(long, global = true, env = "RUNWATCH_STALE_SECS", default_value_t = 20)]
    pub stale_secs: u64,
    #[arg(long, global = true, env = "RUNWATCH_POLL_MS", default_value_t = 1000)]
    pub poll_ms: u64,
    #[arg(long, global = true, env = "RUNWATCH_BACKOFF_BASE_MS", default_value_t = 1000)]
    pub backoff_base_ms: u64,
    #[arg(long, global = true, env = "RUNWATCH_BACKOFF_CAP_MS", default_value_t = 10_000)]
    pub backoff_cap_ms: u64,
    #[arg(long, global = true, env = "RUNWATCH_MAX_ATTEMPTS", default_value_t = 5)]
    pub max_attempts: u32,
    #[arg(long, global = true, env = "RUNWATCH_IDLE_TIMEOUT_SECS", default_value_t = 45)]
    pub idle_timeout_secs: u64,
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
    #[arg(long, global = true, default_value_t = false)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
pub enum Command {
    /// Attach to a run that is already executing.
    Watch {
        #[arg(long, env = "RUNWATCH_RUN_ID")]
        run_id: String,
        #[arg(long)]
        resume_from: Option<String>,
    },
    /// Start a new run, then attach to it.
    Start {
        #[arg(long)]
        problem: String,
        #[arg(long)]
        workflow_type: Option<String>,
        #[arg(long)]
        orchestration_mode: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub enum Target {
    Attach {
        run_id: String,
        resume_from: Option<StreamCursor>,
    },
    Start(StartRunRequest),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: Url,
    pub target: Target,
    pub store: StoreConfig,
    pub connector: ConnectorConfig,
    pub poll_interval: Duration,
    pub output: OutputFormat,
    pub quiet: bool,
    pub log_stdout: bool,
}

pub fn load_config(args: Args) -> anyhow::Result<Config> {
    let base_url = resolve_base_url(&args.base_url)?;
    let target = resolve_target(args.command)?;
    let backoff = BackoffPolicy {
        base: Duration::from_millis(args.backoff_base_ms.max(1)),
        cap: Duration::from_millis(args.backoff_cap_ms.max(args.backoff_base_ms).max(1)),
        max_attempts: args.max_attempts,
    };
    let mut connector = ConnectorConfig::new(base_url.clone());
    connector.backoff = backoff;
    connector.idle_timeout = Duration::from_secs(args.idle_timeout_secs.max(1));
    Ok(Config {
        base_url,
        target,
        store: StoreConfig {
            buffer_capacity: args.buffer_capacity.max(1),
            stale_threshold: chrono::Duration::seconds(args.stale_secs as i64),
        },
        connector,
        poll_interval: Duration::from_millis(args.poll_ms.max(50)),
        output: args.output,
        quiet: args.quiet,
        log_stdout: resolve_log_stdout(),
    })
}

fn resolve_base_url(raw: &str) -> anyhow::Result<Url> {
    let trimmed = raw.trim();
    let candidate = if trimmed.is_empty() {
        DEFAULT_BASE_URL
    } else {
        trimmed
    };
    let url = Url::parse(candidate).with_context(|| format!("invalid base url: {candidate}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        anyhow::bail!("unsupported base url scheme: {}", url.scheme());
    }
    Ok(url)
}

fn resolve_target(command: Command) -> anyhow::Result<Target> {
    match command {
        Command::Watch {
            run_id,
            resume_from,
        } => {
            let run_id = run_id.trim().to_string();
            if run_id.is_empty() {
                anyhow::bail!("--run-id must not be empty");
            }
            Ok(Target::Attach {
                run_id,
                resume_from: resume_from.and_then(StreamCursor::new),
            })
        }
        Command::Start {
            problem,
            workflow_type,
            orchestration_mode,
        } => {
            if problem.trim().is_empty() {
                anyhow::bail!("--problem must not be empty");
            }
            Ok(Target::Start(StartRunRequest {
                problem,
                workflow_type,
                orchestration_mode,
                config: None,
            }))
        }
    }
}

pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn resolve_log_stdout() -> bool {
    std::env::var("RUNWATCH_LOG_STDOUT")
        .ok()
        .and_then(|value| parse_bool_flag(&value))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_args_resolve_into_attach_target() {
        let args = Args::try_parse_from([
            "runwatch",
            "watch",
            "--run-id",
            "run-7",
            "--resume-from",
            "1770000000000-3",
            "--base-url",
            "http://localhost:9000",
            "--stale-secs",
            "30",
            "--output",
            "json",
        ])
        .expect("parse args");
        let config = load_config(args).expect("config");
        match &config.target {
            Target::Attach {
                run_id,
                resume_from,
            } => {
                assert_eq!(run_id, "run-7");
                assert_eq!(
                    resume_from.as_ref().map(|cursor| cursor.as_str()),
                    Some("1770000000000-3")
                );
            }
            other => panic!("unexpected target: {other:?}"),
        }
        assert_eq!(config.base_url.as_str(), "http://localhost:9000/");
        assert_eq!(config.store.stale_threshold, chrono::Duration::seconds(30));
        assert_eq!(config.output, OutputFormat::Json);
    }

    #[test]
    fn start_args_build_request() {
        let args = Args::try_parse_from([
            "runwatch",
            "start",
            "--problem",
            "Ground stop at ORD",
            "--workflow-type",
            "handoff",
            "--max-attempts",
            "2",
            "--base-url",
            "http://127.0.0.1:5001",
        ])
        .expect("parse args");
        let config = load_config(args).expect("config");
        assert_eq!(config.connector.backoff.max_attempts, 2);
        match config.target {
            Target::Start(request) => {
                assert_eq!(request.problem, "Ground stop at ORD");
                assert_eq!(request.workflow_type.as_deref(), Some("handoff"));
            }
            other => panic!("unexpected target: {other:?}"),
        }
    }

    #[test]
    fn rejects_non_http_base_url() {
        assert!(resolve_base_url("ftp://example.com").is_err());
        assert!(resolve_base_url("not a url").is_err());
        assert_eq!(
            resolve_base_url("").expect("default").as_str(),
            "http://127.0.0.1:5001/"
        );
    }

    #[test]
    fn parse_bool_flag_accepts_common_spellings() {
        assert_eq!(parse_bool_flag(" YES "), Some(true));
        assert_eq!(parse_bool_flag("off"), Some(false));
        assert_eq!(parse_bool_flag("maybe"), None);
    }
}
