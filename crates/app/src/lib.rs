use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{ArgAction, Parser};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use riffusion_core::assembler::{FfmpegAssembler, FFMPEG_BINARY};
use riffusion_core::client::HttpInterpolationClient;
use riffusion_core::config::{config_path, AppConfig};
use riffusion_core::logging::{self, FileSinkPlan, LoggingInitOptions, DEFAULT_LOG_FILTER};
use riffusion_core::params::{random_seed, resolve_params, ParamInputs, PLACEHOLDER};
use riffusion_core::pipeline::run_pipeline;
use riffusion_core::retry::RetryPolicy;

#[derive(Debug, Parser)]
#[command(
    name = "riffusion",
    version,
    about = "Generate a Riffusion interpolation between two prompts and stitch it into one file",
    after_help = "Prompts: <start prompt...> -- <end prompt...>. Without `--` both ends share one prompt.\n\
                  Ranges: A, A-B, +N (default to default+N) or ? (default); either side of A-B may be ?.\n\
                  Exit status: 0 once the combined file is written; 1 on any error, including ffmpeg failing to start or exiting non-zero."
)]
struct Cli {
    #[arg(short = 'o', long, default_value = "./samples", help = "Run output root")]
    outdir: PathBuf,

    #[arg(short = 's', long, default_value = PLACEHOLDER, help = "Seed range (default: random)")]
    seed: String,

    #[arg(
        short = 'S',
        long = "seed-img",
        default_value = "og-beat",
        help = "Seed image: og-beat, agile, marim, motorway or vibes"
    )]
    seed_img: String,

    #[arg(short = 'g', long, default_value = PLACEHOLDER, help = "Guidance range (default: 7)")]
    guidance: String,

    #[arg(
        short = 'd',
        long,
        default_value = PLACEHOLDER,
        help = "Denoising range within [0, 1] (default: 0.75)"
    )]
    denoise: String,

    #[arg(
        short = 'i',
        long = "inference-steps",
        default_value_t = 50.0,
        help = "Inference steps per sample"
    )]
    inference_steps: f64,

    #[arg(
        short = 'n',
        long,
        default_value_t = 10.0,
        help = "Number of interpolation samples"
    )]
    steps: f64,

    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        help = "Increase log verbosity (-v: debug, -vv: trace)"
    )]
    verbose: u8,

    #[arg(
        long = "log-filter",
        value_name = "FILTER",
        help = "Explicit tracing filter (overrides RUST_LOG and -v)"
    )]
    log_filter: Option<String>,

    #[arg(long = "log-dir", value_name = "DIR", help = "Also write daily rolling log files here")]
    log_dir: Option<PathBuf>,

    #[arg(long, value_name = "PATH", help = "Config file (default: $RIFFUSION_CONFIG or ./riffusion.toml)")]
    config: Option<PathBuf>,

    #[arg(
        value_name = "PROMPT",
        trailing_var_arg = true,
        allow_hyphen_values = true,
        help = "<start prompt...> -- <end prompt...>"
    )]
    prompt: Vec<String>,
}

impl Cli {
    fn param_inputs(&self) -> ParamInputs {
        ParamInputs {
            seed: self.seed.clone(),
            seed_image: self.seed_img.clone(),
            guidance: self.guidance.clone(),
            denoise: self.denoise.clone(),
            inference_steps: self.inference_steps,
            steps: self.steps,
            prompt_words: self.prompt.clone(),
        }
    }
}

pub fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    init_logging(
        cli.log_dir.as_deref(),
        cli.verbose,
        cli.log_filter.as_deref(),
    );
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let cfg_path = config_path(cli.config.as_deref());
    let config = AppConfig::load_from_path(&cfg_path)?;
    info!(
        pid = std::process::id(),
        config_path = %cfg_path.display(),
        endpoint = %config.remote.endpoint,
        "Runtime startup metadata"
    );

    let params = resolve_params(&cli.param_inputs(), random_seed)?;
    riffusion_core::runtime::log_tool_status(FFMPEG_BINARY, config.assembler.program.as_deref());

    let mut client = HttpInterpolationClient::new(&config.remote)?;
    let policy = RetryPolicy::from_config(&config.retry);
    let mut assembler = FfmpegAssembler::new(&config.assembler);

    let summary = match run_pipeline(&params, &cli.outdir, &mut client, &policy, &mut assembler) {
        Ok(summary) => summary,
        Err(error) if error.is_fatal_generation() => {
            return Err(anyhow::Error::new(error).context(
                "model rejected the request; clips generated so far are kept in the run directory",
            ));
        }
        Err(error) => return Err(anyhow::Error::new(error).context("interpolation run failed")),
    };

    info!(
        samples = summary.samples.len(),
        output = %summary.layout.combined_path.display(),
        "Interpolation complete"
    );
    Ok(())
}

fn init_logging(log_dir: Option<&Path>, verbose: u8, cli_log_filter: Option<&str>) {
    let init_options = LoggingInitOptions {
        log_dir: log_dir.map(Path::to_path_buf),
        verbose,
        cli_log_filter: cli_log_filter.map(ToString::to_string),
        rust_log_env: std::env::var("RUST_LOG").ok(),
        ..Default::default()
    };
    let init_plan = logging::compose_logging_init_plan(&init_options);
    let user_filter = init_plan.filters.user_filter;
    let console_filter = init_plan.filters.console_filter;
    let file_filter = init_plan.filters.file_filter;
    let file_sink_ready = init_plan.file_sink.is_ready();
    let file_log_dir = init_plan.file_sink.log_dir().cloned();

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(parse_env_filter_with_fallback(&console_filter, "console"));

    match init_plan.file_sink {
        FileSinkPlan::Ready(ready) => {
            let retention_files = ready.retention_files;
            let subscriber = tracing_subscriber::registry().with(console_layer).with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(ready.appender)
                    .with_filter(parse_env_filter_with_fallback(&file_filter, "file")),
            );

            if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!(
                    "Failed to initialize tracing subscriber: {error}. Continuing without structured tracing."
                );
                return;
            }

            info!(retention_files, "Persistent file logging enabled");
        }
        FileSinkPlan::Disabled => {
            let subscriber = tracing_subscriber::registry().with(console_layer);
            if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!(
                    "Failed to initialize tracing subscriber: {error}. Continuing without structured tracing."
                );
                return;
            }
        }
        FileSinkPlan::Fallback(fallback) => {
            let subscriber = tracing_subscriber::registry().with(console_layer);
            if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!(
                    "Failed to initialize tracing subscriber: {error}. Continuing without structured tracing."
                );
                return;
            }

            warn!(
                attempted_log_dir = %fallback.attempted_log_dir.display(),
                reason = %fallback.reason,
                "Persistent file logging unavailable; continuing with console-only logging"
            );
        }
    }

    info!(
        filter = %user_filter,
        file_sink = file_sink_ready,
        log_dir = ?file_log_dir,
        "Logging initialized"
    );
}

fn parse_env_filter_with_fallback(filter: &str, sink_name: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_new(filter).unwrap_or_else(|error| {
        eprintln!(
            "Invalid {sink_name} log filter '{filter}': {error}. Falling back to '{DEFAULT_LOG_FILTER}'."
        );
        tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("riffusion").chain(args.iter().copied()))
            .expect("arguments should parse")
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn help_documents_exit_status_for_assembly_failure() {
        let help = Cli::command().render_long_help().to_string();
        assert!(help.contains("Exit status: 0 once the combined file is written"), "{help}");
        assert!(help.contains("ffmpeg failing to start or exiting non-zero"), "{help}");
    }

    #[test]
    fn defaults_match_documented_values() {
        let cli = parse(&["lofi"]);

        assert_eq!(cli.outdir, PathBuf::from("./samples"));
        assert_eq!(cli.seed, "?");
        assert_eq!(cli.seed_img, "og-beat");
        assert_eq!(cli.guidance, "?");
        assert_eq!(cli.denoise, "?");
        assert_eq!(cli.inference_steps, 50.0);
        assert_eq!(cli.steps, 10.0);
        assert_eq!(cli.prompt, vec!["lofi"]);
        assert_eq!(cli.verbose, 0);
        assert!(cli.config.is_none());
    }

    #[test]
    fn short_flags_and_prompt_separator_are_captured() {
        let cli = parse(&[
            "-o", "/tmp/out", "-s", "+5", "-S", "vibes", "-g", "6-8", "-d", "0.5-?", "-i", "25.7",
            "-n", "3", "jazz", "piano", "--", "heavy", "metal",
        ]);

        assert_eq!(cli.outdir, PathBuf::from("/tmp/out"));
        assert_eq!(cli.seed, "+5");
        assert_eq!(cli.seed_img, "vibes");
        assert_eq!(cli.guidance, "6-8");
        assert_eq!(cli.denoise, "0.5-?");
        assert_eq!(cli.inference_steps, 25.7);
        assert_eq!(cli.steps, 3.0);
        assert_eq!(cli.prompt, vec!["jazz", "piano", "--", "heavy", "metal"]);
    }

    #[test]
    fn flags_after_the_prompt_belong_to_the_prompt() {
        let cli = parse(&["drums", "-n", "3"]);
        assert_eq!(cli.steps, 10.0);
        assert_eq!(cli.prompt, vec!["drums", "-n", "3"]);
    }

    #[test]
    fn param_inputs_resolve_through_core() {
        let cli = parse(&["-s", "4-9", "-n", "2.9", "calm", "--", "storm"]);
        let params = resolve_params(&cli.param_inputs(), || 0).expect("valid inputs");

        assert_eq!(params.seed.start, 4);
        assert_eq!(params.seed.end, 9);
        assert_eq!(params.steps, 2);
        assert_eq!(params.prompts.start, "calm");
        assert_eq!(params.prompts.end, "storm");
    }

    #[test]
    fn missing_prompt_surfaces_as_resolve_error() {
        let cli = parse(&["-n", "4"]);
        let err = resolve_params(&cli.param_inputs(), || 0).expect_err("no prompt given");
        assert_eq!(err.to_string(), "missing prompt");
    }

    #[test]
    fn run_fails_before_any_request_on_invalid_denoise() {
        let temp = tempfile::tempdir().expect("tempdir");
        let outdir = temp.path().join("out");
        let cli = parse(&[
            "--config",
            temp.path().join("absent.toml").to_str().expect("utf-8 path"),
            "-o",
            outdir.to_str().expect("utf-8 path"),
            "-d",
            "1.5",
            "lofi",
        ]);

        let err = run(cli).expect_err("denoise out of range");
        assert!(
            format!("{err:#}").contains("invalid (start) denoise range"),
            "error: {err:#}"
        );
        assert!(!outdir.exists());
    }

    fn spawn_failing_model_server() -> (String, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
        let addr = listener.local_addr().expect("local addr");

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept test client");
            stream
                .set_read_timeout(Some(Duration::from_secs(2)))
                .expect("set read timeout");

            let mut received = Vec::new();
            let mut buffer = [0u8; 4096];
            while let Ok(read_count) = stream.read(&mut buffer) {
                if read_count == 0 {
                    break;
                }
                received.extend_from_slice(&buffer[..read_count]);
                let text = String::from_utf8_lossy(&received);
                if let Some((head, body)) = text.split_once("\r\n\r\n") {
                    let content_length = head
                        .lines()
                        .filter_map(|line| line.split_once(':'))
                        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if body.len() >= content_length {
                        break;
                    }
                }
            }

            let body = r#"{"data":{"success":false,"latency_ms":"n/a"}}"#;
            let raw = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(raw.as_bytes()).expect("write response");
            let _ = stream.flush();
        });

        (format!("http://{addr}/api/baseten"), handle)
    }

    #[test]
    fn fatal_model_failure_is_reported_with_partial_run_hint() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (endpoint, server) = spawn_failing_model_server();
        let config = temp.path().join("riffusion.toml");
        std::fs::write(
            &config,
            format!("[remote]\nendpoint = \"{endpoint}\"\nrequest_timeout_secs = 5\n"),
        )
        .expect("write config");
        let outdir = temp.path().join("out");

        let cli = parse(&[
            "--config",
            config.to_str().expect("utf-8 path"),
            "-o",
            outdir.to_str().expect("utf-8 path"),
            "-n",
            "3",
            "lofi",
        ]);

        let err = run(cli).expect_err("model reports failure");
        server.join().expect("server thread join");

        let message = format!("{err:#}");
        assert!(
            message.contains("model rejected the request; clips generated so far are kept"),
            "error: {message}"
        );
        assert!(outdir.is_dir());
    }
}
