use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::assembler::{combined_output_path, Assembler};
use crate::client::InterpolationClient;
use crate::error::PipelineError;
use crate::manifest::{write_manifest, MANIFEST_FILE_NAME};
use crate::params::ResolvedParams;
use crate::retry::RetryPolicy;
use crate::sampler::{run_sample_loop, SampleResult};

/// Where one run writes its artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    pub root: PathBuf,
    pub run_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub combined_path: PathBuf,
}

impl RunLayout {
    pub fn new(root: &Path, params: &ResolvedParams) -> Self {
        let run_dir = root.join(params.run_dir_name());
        Self {
            root: root.to_path_buf(),
            manifest_path: run_dir.join(MANIFEST_FILE_NAME),
            combined_path: combined_output_path(&run_dir),
            run_dir,
        }
    }

    /// Creates the output root (tolerating an existing one) and a fresh run directory.
    pub fn create(&self) -> Result<(), PipelineError> {
        match fs::create_dir(&self.root) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {}
            Err(source) => {
                return Err(PipelineError::CreateDir {
                    path: self.root.clone(),
                    source,
                })
            }
        }

        fs::create_dir(&self.run_dir).map_err(|source| PipelineError::CreateDir {
            path: self.run_dir.clone(),
            source,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub layout: RunLayout,
    pub samples: Vec<SampleResult>,
}

/// Runs one full interpolation: samples, manifest, then a single assembly step.
///
/// A fatal model failure returns before the manifest is written, so neither the
/// manifest nor the combined file exist afterwards.
pub fn run_pipeline<C, A>(
    params: &ResolvedParams,
    outdir: &Path,
    client: &mut C,
    policy: &RetryPolicy,
    assembler: &mut A,
) -> Result<RunSummary, PipelineError>
where
    C: InterpolationClient,
    A: Assembler,
{
    let layout = RunLayout::new(outdir, params);
    layout.create()?;
    info!(run_dir = %layout.run_dir.display(), "Outputting to run directory");

    let samples = run_sample_loop(params, &layout.run_dir, client, policy)?;

    info!(samples = samples.len(), "Writing sample manifest");
    let manifest_path =
        write_manifest(&layout.run_dir, &samples).map_err(|source| PipelineError::Manifest {
            path: layout.manifest_path.clone(),
            source,
        })?;

    info!(output = %layout.combined_path.display(), "Combining audio");
    assembler
        .assemble(&manifest_path, &layout.combined_path)
        .map_err(|source| PipelineError::Assemble {
            path: layout.combined_path.clone(),
            source,
        })?;

    Ok(RunSummary { layout, samples })
}
