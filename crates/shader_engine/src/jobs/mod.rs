//! Job layer
//!
//! A job is one unit of work against the backend: a shader set, optional
//! inputs, and for animations a frame range. The flows here run the whole
//! upload → build → submit → read sequence and are meant to be called inside
//! [`JobGate::run`].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use thiserror::Error;

use crate::backend::{check_texture_size, ComputedOutput, DrawMesh, OutputFormat, RenderedFrame, ShaderBackend};
use crate::foundation::time::{ProgressThrottle, Stopwatch};
use crate::gpu::{FrameStats, MeshData, MeshUploadError, RasterOptions, VulkanError};
use crate::shader::{ShaderError, ShaderRef, ShaderStage, DEFAULT_VERTEX_SOURCE};
use crate::uniforms::UniformBlock;

mod animation;
mod gate;

pub use animation::{Animation, AnimationDefaults, AnimationLimits, AnimationRequest};
pub use gate::JobGate;

/// Job failure
#[derive(Error, Debug)]
pub enum JobError {
    /// Bad shader reference or engine configuration; nothing reached the GPU
    #[error("{0}")]
    Config(String),

    /// GLSL did not compile; message is stage-tagged
    #[error("{0}")]
    Compile(String),

    /// The device failed; the process should not keep using it
    #[error("device error: {0}")]
    Device(#[from] VulkanError),

    /// Inputs the engine cannot use
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The frame sink refused a frame
    #[error("output failed: {0}")]
    Sink(String),
}

impl JobError {
    /// True when the device can no longer be trusted
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Device(_))
    }

    /// Tag a shader error with its stage
    pub(crate) fn from_shader(stage: ShaderStage, error: ShaderError) -> Self {
        let message = format!("{}: {}", stage, error);
        if error.is_configuration() {
            Self::Config(message)
        } else {
            Self::Compile(message)
        }
    }
}

impl From<MeshUploadError> for JobError {
    fn from(error: MeshUploadError) -> Self {
        match error {
            MeshUploadError::Invalid(e) => Self::InvalidInput(format!("mesh: {}", e)),
            MeshUploadError::Device(e) => Self::Device(e),
        }
    }
}

/// Decoded RGBA8 texture bound at set 0, binding 0
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureInput {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// `width * height * 4` bytes, rows top to bottom
    pub rgba: Vec<u8>,
}

impl TextureInput {
    /// Check that `rgba` holds exactly `width * height * 4` bytes
    pub fn validate(&self) -> Result<(), JobError> {
        check_texture_size(self.width, self.height, self.rgba.len())
    }
}

/// A graphics job
#[derive(Debug, Clone)]
pub struct RenderJob {
    /// Vertex stage
    pub vertex: ShaderRef,
    /// Fragment stage
    pub fragment: ShaderRef,
    /// Culling and depth test
    pub raster: RasterOptions,
    /// Optional input texture (white placeholder otherwise)
    pub texture: Option<TextureInput>,
    /// Optional mesh (default grid otherwise)
    pub mesh: Option<MeshData>,
}

impl RenderJob {
    /// Job with default raster options, no texture and the default grid
    pub fn new(vertex: ShaderRef, fragment: ShaderRef) -> Self {
        Self {
            vertex,
            fragment,
            raster: RasterOptions::default(),
            texture: None,
            mesh: None,
        }
    }

    /// Job using the built-in pass-through vertex stage
    pub fn with_default_vertex(fragment: ShaderRef) -> Self {
        Self::new(ShaderRef::inline(ShaderStage::Vertex, DEFAULT_VERTEX_SOURCE), fragment)
    }

    /// Set the raster options
    pub fn raster(mut self, raster: RasterOptions) -> Self {
        self.raster = raster;
        self
    }

    /// Attach a texture
    pub fn texture(mut self, texture: TextureInput) -> Self {
        self.texture = Some(texture);
        self
    }

    /// Attach a mesh
    pub fn mesh(mut self, mesh: MeshData) -> Self {
        self.mesh = Some(mesh);
        self
    }
}

/// A compute job
#[derive(Debug, Clone)]
pub struct ComputeJob {
    /// Compute stage
    pub shader: ShaderRef,
    /// Optional input texture
    pub texture: Option<TextureInput>,
    /// Workgroup counts
    pub dispatch: [u32; 3],
}

impl ComputeJob {
    /// A single-workgroup dispatch
    pub fn new(shader: ShaderRef) -> Self {
        Self {
            shader,
            texture: None,
            dispatch: [1, 1, 1],
        }
    }
}

/// Source of the `random` uniform: uniform in [0, 1)
pub struct UniformRandom {
    rng: StdRng,
}

impl UniformRandom {
    /// Entropy-seeded generator
    pub fn new() -> Self {
        Self { rng: StdRng::from_entropy() }
    }

    /// Reproducible generator
    pub fn seeded(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }

    /// Next value
    pub fn next_value(&mut self) -> f32 {
        self.rng.gen::<f32>()
    }
}

impl Default for UniformRandom {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress of a running animation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Frames finished so far
    pub frame: u32,
    /// Total frames
    pub frames: u32,
}

impl Progress {
    /// Completion in percent
    pub fn percent(&self) -> f64 {
        f64::from(self.frame) * 100.0 / f64::from(self.frames.max(1))
    }
}

/// Receives the planar frames of an animation, in order
pub trait FrameSink {
    /// Take frame `index`; the slice is only valid during the call
    fn frame(&mut self, index: u32, planes: &[u8], stats: FrameStats) -> Result<(), JobError>;

    /// Rate-limited progress report
    fn progress(&mut self, _progress: Progress) {}
}

/// Totals for a finished animation
#[derive(Debug, Clone, Copy)]
pub struct AnimationSummary {
    /// Frames rendered
    pub frames: u32,
    /// Sum of all fence waits
    pub gpu_wait: Duration,
    /// Wall time of the whole job
    pub elapsed: Duration,
}

fn prepare_graphics(backend: &mut ShaderBackend, job: &RenderJob) -> Result<DrawMesh, JobError> {
    // Inputs are checked before the pipeline is replaced, so a rejected job
    // leaves the previous job's state intact
    if let Some(texture) = &job.texture {
        texture.validate()?;
    }
    if let Some(mesh) = &job.mesh {
        mesh.validate().map_err(MeshUploadError::from)?;
    }

    backend.upload_shader_mix(&job.vertex, &job.fragment, job.raster)?;

    match &job.texture {
        Some(texture) => backend.upload_image(texture.width, texture.height, &texture.rgba)?,
        None => backend.reset_image(),
    }

    match &job.mesh {
        Some(mesh) => {
            backend.upload_mesh(mesh)?;
            Ok(DrawMesh::Uploaded)
        }
        None => {
            backend.clear_mesh();
            Ok(DrawMesh::Grid)
        }
    }
}

/// Render one RGBA frame with `time = 0`
pub fn render_still(
    backend: &mut ShaderBackend,
    job: &RenderJob,
    random: &mut UniformRandom,
) -> Result<RenderedFrame, JobError> {
    log::info!("Render job started");
    let mesh = prepare_graphics(backend, job)?;
    backend.build_command_buffer(mesh, OutputFormat::Rgba)?;
    backend.update_uniforms(UniformBlock::new(0.0, random.next_value()))?;

    let frame = backend.render_frame_to_vec()?;
    log::info!("Render job finished, GPU wait {:?}", frame.stats.gpu_wait);
    Ok(frame)
}

/// Render every frame of `animation` in planar 4:2:0 and pass it to `sink`
///
/// With `progress_interval` set, `sink.progress` is called at most once per
/// interval.
pub fn render_animation(
    backend: &mut ShaderBackend,
    job: &RenderJob,
    animation: &Animation,
    progress_interval: Option<Duration>,
    random: &mut UniformRandom,
    sink: &mut dyn FrameSink,
) -> Result<AnimationSummary, JobError> {
    let stopwatch = Stopwatch::start();
    log::info!(
        "Animation job started: {} frames at {} fps, t = {}..{}",
        animation.frames, animation.fps, animation.start, animation.end
    );

    if !backend.supports_planar() {
        return Err(JobError::InvalidInput("planar output needs an even width and height".to_string()));
    }
    let mesh = prepare_graphics(backend, job)?;
    backend.build_command_buffer(mesh, OutputFormat::Yuv420p)?;

    let mut throttle = progress_interval.map(ProgressThrottle::new);
    let mut gpu_wait = Duration::ZERO;

    for index in 0..animation.frames {
        if let Some(throttle) = throttle.as_mut() {
            if throttle.ready() {
                sink.progress(Progress { frame: index + 1, frames: animation.frames });
            }
        }

        backend.update_uniforms(UniformBlock::new(animation.frame_time(index), random.next_value()))?;
        let frame = backend.render_frame()?;
        gpu_wait += frame.stats().gpu_wait;
        sink.frame(index, frame.bytes(), frame.stats())?;
    }

    let summary = AnimationSummary {
        frames: animation.frames,
        gpu_wait,
        elapsed: stopwatch.elapsed(),
    };
    log::info!("Animation job finished in {:?} (GPU wait {:?})", summary.elapsed, summary.gpu_wait);
    Ok(summary)
}

/// Run a compute job with `time = 0` and read back the output block
pub fn compute(
    backend: &mut ShaderBackend,
    job: &ComputeJob,
    random: &mut UniformRandom,
) -> Result<ComputedOutput, JobError> {
    log::info!("Compute job started");
    backend.upload_compute_shader(&job.shader)?;

    match &job.texture {
        Some(texture) => backend.upload_image(texture.width, texture.height, &texture.rgba)?,
        None => backend.reset_image(),
    }

    let [x, y, z] = job.dispatch;
    backend.build_compute_command_buffer(x, y, z)?;
    backend.update_uniforms(UniformBlock::new(0.0, random.next_value()))?;

    let result = backend.do_computation()?;
    log::info!("Compute job finished, GPU wait {:?}", result.stats.gpu_wait);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_device_errors_are_fatal() {
        assert!(JobError::Device(VulkanError::NoPhysicalDevice).is_fatal());
        assert!(!JobError::Compile("fragment: oops".to_string()).is_fatal());
        assert!(!JobError::Config("x".to_string()).is_fatal());
        assert!(!JobError::InvalidInput("x".to_string()).is_fatal());
    }

    #[test]
    fn test_shader_errors_are_stage_tagged() {
        let err = JobError::from_shader(ShaderStage::Vertex, ShaderError::Compile("bad token".to_string()));
        assert!(matches!(&err, JobError::Compile(_)));
        assert_eq!(err.to_string(), "vertex: bad token");

        let err = JobError::from_shader(ShaderStage::Fragment, ShaderError::PathSeparator { name: "a/b".to_string() });
        assert!(matches!(&err, JobError::Config(_)));
        assert!(err.to_string().starts_with("fragment: "));
        assert!(err.to_string().contains('/'));
    }

    #[test]
    fn test_mesh_errors_map_to_invalid_input() {
        let err = JobError::from(MeshUploadError::Invalid(crate::gpu::MeshError::Empty));
        assert!(matches!(err, JobError::InvalidInput(_)));
    }

    #[test]
    fn test_texture_length_checked() {
        let texture = TextureInput { width: 2, height: 2, rgba: vec![0; 16] };
        assert!(texture.validate().is_ok());

        let short = TextureInput { rgba: vec![0; 15], ..texture.clone() };
        assert!(matches!(short.validate(), Err(JobError::InvalidInput(_))));

        let empty = TextureInput { width: 0, height: 0, rgba: Vec::new() };
        assert!(matches!(empty.validate(), Err(JobError::InvalidInput(_))));
    }

    #[test]
    fn test_random_in_unit_range() {
        let mut random = UniformRandom::seeded(7);
        for _ in 0..1000 {
            let value = random.next_value();
            assert!((0.0..1.0).contains(&value));
        }
    }

    #[test]
    fn test_seeded_random_is_reproducible() {
        let mut a = UniformRandom::seeded(42);
        let mut b = UniformRandom::seeded(42);
        assert_eq!(a.next_value(), b.next_value());
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(Progress { frame: 1, frames: 4 }.percent(), 25.0);
        assert_eq!(Progress { frame: 4, frames: 4 }.percent(), 100.0);
    }

    #[test]
    fn test_render_job_defaults() {
        let job = RenderJob::with_default_vertex(ShaderRef::file(ShaderStage::Fragment, "plasma"));
        assert_eq!(job.vertex.stage, ShaderStage::Vertex);
        assert_eq!(job.raster, RasterOptions::default());
        assert!(job.texture.is_none() && job.mesh.is_none());
        assert_eq!(ComputeJob::new(job.fragment.clone()).dispatch, [1, 1, 1]);
    }
}
