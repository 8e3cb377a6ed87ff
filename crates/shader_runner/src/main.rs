//! Shader runner
//!
//! `shader_runner [config] [jobs]`
//!
//! Loads the engine configuration and a job file, runs every job through one
//! shared backend and writes each job's output. A job that fails is reported
//! and skipped; a device failure ends the process.

use shader_engine::config::{Config, EngineConfig};
use shader_engine::foundation::logging;
use shader_engine::jobs::{self, Animation, JobError, JobGate, UniformRandom};
use shader_engine::ShaderBackend;
use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;

mod image_io;
mod job_file;
mod obj_loader;
mod paths;

use job_file::{JobFile, JobSpec};
use paths::ConfigLocation;

const DEFAULT_JOB_FILE: &str = "jobs.toml";

/// Why a job did not produce output
#[derive(Error, Debug)]
enum RunError {
    /// Inputs or outputs on disk
    #[error("{0}")]
    Io(String),
    /// The engine rejected or failed the job
    #[error(transparent)]
    Job(#[from] JobError),
}

impl RunError {
    fn is_fatal(&self) -> bool {
        matches!(self, Self::Job(e) if e.is_fatal())
    }
}

fn main() -> ExitCode {
    logging::init();
    log::info!("Starting shader runner");

    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut config = match load_config(args.first().map(String::as_str)) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let exe_dir = std::env::current_exe().ok().and_then(|exe| exe.parent().map(PathBuf::from));
    let shaders = paths::resolve_shaders_dir(
        std::env::var(paths::SHADER_DIRECTORY_ENV).ok(),
        config.paths.shaders.as_deref(),
        exe_dir.as_deref(),
        |p| p.is_dir(),
    );
    if config.paths.shader_include.is_none() {
        config.paths.shader_include = Some(shaders.clone());
    }
    log::info!("Shader directory: {:?}", shaders);
    config.paths.shaders = Some(shaders);

    let job_path = args.get(1).map_or_else(|| PathBuf::from(DEFAULT_JOB_FILE), PathBuf::from);
    let job_file = match JobFile::load(&job_path) {
        Ok(file) => file,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    log::info!("{} jobs in {:?}", job_file.jobs.len(), job_path);

    let backend = match ShaderBackend::new(&config) {
        Ok(backend) => backend,
        Err(e) => {
            log::error!("Failed to initialise the GPU backend: {}", e);
            return ExitCode::FAILURE;
        }
    };
    log::info!("Running on {}", backend.context().device_name());
    let gate = JobGate::new(backend);

    let mut failed = 0;
    for spec in job_file.jobs {
        let name = spec.name().to_string();
        match run_job(&gate, &config, spec) {
            Ok(()) => log::info!("Job '{}' done", name),
            Err(e) if e.is_fatal() => {
                log::error!("Job '{}' hit a device error, stopping: {}", name, e);
                return ExitCode::FAILURE;
            }
            Err(e) => {
                log::error!("Job '{}' failed: {}", name, e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        log::warn!("{} job(s) failed", failed);
    }
    ExitCode::SUCCESS
}

fn load_config(cli: Option<&str>) -> Result<EngineConfig, String> {
    match paths::resolve_config(cli, std::env::var(paths::CONFIG_ENV).ok(), |p| p.is_file()) {
        ConfigLocation::Explicit(path) | ConfigLocation::Discovered(path) => {
            log::info!("Loading configuration from {:?}", path);
            EngineConfig::load_from_file(&path).map_err(|e| format!("Failed to load {:?}: {}", path, e))
        }
        ConfigLocation::Defaults => {
            log::warn!("No configuration file found, using defaults");
            Ok(EngineConfig::default())
        }
    }
}

fn run_job(gate: &JobGate, config: &EngineConfig, spec: JobSpec) -> Result<(), RunError> {
    let mut random = UniformRandom::new();

    match spec {
        JobSpec::Render(spec) => {
            let job = spec.to_job().map_err(RunError::Io)?;
            let frame = gate.run(|backend| jobs::render_still(backend, &job, &mut random))?;
            image_io::save_png(&spec.output, config.image.width, config.image.height, &frame.pixels)
                .map_err(RunError::Io)
        }
        JobSpec::Animation(spec) => {
            let job = spec.graphics.to_job().map_err(RunError::Io)?;
            let animation: Animation = spec.animation.resolve(&config.video.defaults(), &config.video.limits());
            let mut sink = image_io::YuvFileSink::create(&spec.graphics.output).map_err(RunError::Io)?;

            let summary = gate.run(|backend| {
                jobs::render_animation(
                    backend,
                    &job,
                    &animation,
                    config.video.progress.interval(),
                    &mut random,
                    &mut sink,
                )
            })?;
            sink.finish().map_err(RunError::Io)?;
            log::info!(
                "{} frames {}x{} at {} fps ({:.2}s), {} bit/s target",
                summary.frames,
                config.image.width,
                config.image.height,
                animation.fps,
                animation.duration_secs(),
                animation.bitrate
            );
            Ok(())
        }
        JobSpec::Compute(spec) => {
            let job = spec.to_job().map_err(RunError::Io)?;
            let result = gate.run(|backend| jobs::compute(backend, &job, &mut random))?;
            log::info!("Output text: '{}'", result.output.trimmed_text());
            image_io::save_report(&spec.output, &result.output, spec.output_kind).map_err(RunError::Io)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shader_engine::gpu::VulkanError;

    #[test]
    fn test_only_device_errors_stop_the_runner() {
        assert!(RunError::Job(JobError::Device(VulkanError::NoPhysicalDevice)).is_fatal());
        assert!(!RunError::Job(JobError::Compile("fragment: x".to_string())).is_fatal());
        assert!(!RunError::Io("missing".to_string()).is_fatal());
    }

    #[test]
    fn test_explicit_config_must_load() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(load_config(missing.to_str()).is_err());

        let present = dir.path().join("config.toml");
        std::fs::write(&present, "[image]\nwidth = 128\n").unwrap();
        assert_eq!(load_config(present.to_str()).unwrap().image.width, 128);
    }
}
