use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::sampler::SampleResult;

pub const MANIFEST_FILE_NAME: &str = "samples.txt";

/// Renders an ffmpeg concat-demuxer manifest: one `file '<absolute path>'` per line.
pub fn render_manifest(paths: &[PathBuf]) -> io::Result<String> {
    let mut manifest = String::new();
    for path in paths {
        let absolute = std::path::absolute(path)?;
        manifest.push_str("file ");
        manifest.push_str(&quote_concat_path(&absolute));
        manifest.push('\n');
    }
    Ok(manifest)
}

/// Writes `samples.txt` into `run_dir` and returns its path.
pub fn write_manifest(run_dir: &Path, samples: &[SampleResult]) -> io::Result<PathBuf> {
    let paths: Vec<PathBuf> = samples.iter().map(|sample| sample.path.clone()).collect();
    let manifest_path = run_dir.join(MANIFEST_FILE_NAME);
    fs::write(&manifest_path, render_manifest(&paths)?)?;
    Ok(manifest_path)
}

// Concat-demuxer quoting: wrap in single quotes, a literal quote becomes '\''.
fn quote_concat_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    format!("'{}'", raw.replace('\'', r"'\''"))
}
