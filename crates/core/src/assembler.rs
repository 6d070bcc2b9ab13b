use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info};

use crate::config::AssemblerConfig;
use crate::error::AssembleError;

pub const FFMPEG_BINARY: &str = "ffmpeg";
pub const COMBINED_EXTENSION: &str = "wav";
const STDERR_TAIL_LINES: usize = 8;

/// Joins the clips listed in a concat manifest into one output file.
pub trait Assembler {
    fn assemble(&mut self, manifest: &Path, output: &Path) -> Result<(), AssembleError>;
}

/// Stream-copies the manifest entries with ffmpeg's concat demuxer. All clips must
/// share one codec, which holds for clips from the same endpoint.
#[derive(Debug, Clone, Default)]
pub struct FfmpegAssembler {
    program: Option<PathBuf>,
}

impl FfmpegAssembler {
    pub fn new(config: &AssemblerConfig) -> Self {
        Self {
            program: config.program.clone(),
        }
    }

    fn command(&self) -> Command {
        match &self.program {
            Some(program) => Command::new(program),
            None => crate::runtime::command_for(FFMPEG_BINARY),
        }
    }

    fn program_name(&self) -> String {
        self.program
            .as_ref()
            .map(|program| program.display().to_string())
            .unwrap_or_else(|| FFMPEG_BINARY.to_string())
    }
}

pub fn concat_args(manifest: &Path, output: &Path) -> Vec<OsString> {
    vec![
        "-nostdin".into(),
        "-f".into(),
        "concat".into(),
        "-safe".into(),
        "0".into(),
        "-i".into(),
        manifest.as_os_str().to_owned(),
        "-c".into(),
        "copy".into(),
        output.as_os_str().to_owned(),
    ]
}

/// `<run_dir>.wav`, a sibling of the run directory.
pub fn combined_output_path(run_dir: &Path) -> PathBuf {
    let mut path = run_dir.as_os_str().to_owned();
    path.push(".");
    path.push(COMBINED_EXTENSION);
    PathBuf::from(path)
}

impl Assembler for FfmpegAssembler {
    fn assemble(&mut self, manifest: &Path, output: &Path) -> Result<(), AssembleError> {
        let args = concat_args(manifest, output);
        let program = self.program_name();

        debug!(
            cmd = %format!(
                "{program} {}",
                args.iter()
                    .map(|arg| arg.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" ")
            ),
            "Launching ffmpeg concat"
        );

        let result = self
            .command()
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| AssembleError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stderr = String::from_utf8_lossy(&result.stderr);
        for line in stderr.lines().filter(|line| !line.is_empty()) {
            debug!(target: "ffmpeg_concat_stderr", "{}", line);
        }

        if !result.status.success() {
            return Err(AssembleError::Exit {
                program,
                status: result.status,
                stderr_tail: stderr_tail(&stderr),
            });
        }

        info!(output = %output.display(), "Combined audio written");
        Ok(())
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|line| !line.is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join(" | ")
}
