//! Job descriptions
//!
//! A job file is TOML with one `[[job]]` table per job:
//!
//! ```toml
//! [[job]]
//! kind = "render"
//! name = "plasma"
//! output = "out/plasma.png"
//! fragment = { file = "plasma" }
//! texture = "assets/noise.png"
//!
//! [[job]]
//! kind = "compute"
//! name = "hello"
//! output = "out/hello.txt"
//! shader = { inline = "#version 450 ..." }
//! dispatch = [1, 1, 1]
//! ```

use serde::Deserialize;
use shader_engine::gpu::RasterOptions;
use shader_engine::jobs::{AnimationRequest, ComputeJob, RenderJob};
use shader_engine::output::OutputKind;
use shader_engine::shader::{ShaderRef, ShaderSource, ShaderStage, DEFAULT_VERTEX_SOURCE};
use std::path::{Path, PathBuf};

use crate::image_io;
use crate::obj_loader::ObjLoader;

/// A parsed job file
#[derive(Debug, Clone, Deserialize)]
pub struct JobFile {
    /// Jobs in file order
    #[serde(rename = "job", default)]
    pub jobs: Vec<JobSpec>,
}

/// One job
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobSpec {
    /// Single RGBA frame written as PNG
    Render(GraphicsSpec),
    /// Planar frames written as raw `.yuv`
    Animation(AnimationSpec),
    /// Output block written as a text report
    Compute(ComputeSpec),
}

/// Fields shared by render and animation jobs
#[derive(Debug, Clone, Deserialize)]
pub struct GraphicsSpec {
    /// Label used in logs
    pub name: String,
    /// Output file
    pub output: PathBuf,
    /// Vertex stage; the built-in pass-through when absent
    pub vertex: Option<ShaderSource>,
    /// Fragment stage
    pub fragment: ShaderSource,
    /// Culling and depth test
    #[serde(default)]
    pub raster: RasterOptions,
    /// Optional texture image
    pub texture: Option<PathBuf>,
    /// Optional OBJ mesh
    pub mesh: Option<PathBuf>,
}

/// An animation job
#[derive(Debug, Clone, Deserialize)]
pub struct AnimationSpec {
    /// Shaders and inputs
    #[serde(flatten)]
    pub graphics: GraphicsSpec,
    /// Frame range; empty fields take the configured defaults
    #[serde(default)]
    pub animation: AnimationRequest,
}

/// A compute job
#[derive(Debug, Clone, Deserialize)]
pub struct ComputeSpec {
    /// Label used in logs
    pub name: String,
    /// Output report
    pub output: PathBuf,
    /// Compute stage
    pub shader: ShaderSource,
    /// Optional texture image
    pub texture: Option<PathBuf>,
    /// Workgroup counts
    #[serde(default = "default_dispatch")]
    pub dispatch: [u32; 3],
    /// Interpretation printed first in the report
    #[serde(default)]
    pub output_kind: OutputKind,
}

fn default_dispatch() -> [u32; 3] {
    [1, 1, 1]
}

impl JobFile {
    /// Read and parse a job file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| format!("Failed to read {:?}: {}", path, e))?;
        toml::from_str(&contents).map_err(|e| format!("Failed to parse {:?}: {}", path, e))
    }
}

impl JobSpec {
    /// Label used in logs
    pub fn name(&self) -> &str {
        match self {
            Self::Render(spec) => &spec.name,
            Self::Animation(spec) => &spec.graphics.name,
            Self::Compute(spec) => &spec.name,
        }
    }
}

impl GraphicsSpec {
    /// Load the inputs and build the engine job
    pub fn to_job(&self) -> Result<RenderJob, String> {
        let vertex = match &self.vertex {
            Some(source) => ShaderRef { stage: ShaderStage::Vertex, source: source.clone() },
            None => ShaderRef::inline(ShaderStage::Vertex, DEFAULT_VERTEX_SOURCE),
        };
        let fragment = ShaderRef { stage: ShaderStage::Fragment, source: self.fragment.clone() };

        let mut job = RenderJob::new(vertex, fragment).raster(self.raster);
        if let Some(path) = &self.texture {
            job = job.texture(image_io::load_texture(path)?);
        }
        if let Some(path) = &self.mesh {
            job = job.mesh(ObjLoader::load_obj(path).map_err(|e| format!("{:?}: {}", path, e))?);
        }
        Ok(job)
    }
}

impl ComputeSpec {
    /// Load the inputs and build the engine job
    pub fn to_job(&self) -> Result<ComputeJob, String> {
        let mut job = ComputeJob::new(ShaderRef { stage: ShaderStage::Compute, source: self.shader.clone() });
        job.dispatch = self.dispatch;
        if let Some(path) = &self.texture {
            job.texture = Some(image_io::load_texture(path)?);
        }
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shader_engine::gpu::CullMode;

    const JOBS: &str = r#"
[[job]]
kind = "render"
name = "red"
output = "out/red.png"
fragment = { inline = "void main() {}" }
raster = { cull = "none" }

[[job]]
kind = "animation"
name = "waves"
output = "out/waves.yuv"
vertex = { file = "wave" }
fragment = { file = "wave" }
animation = { frames = 12, fps = 24 }

[[job]]
kind = "compute"
name = "hello"
output = "out/hello.txt"
shader = { file = "hello" }
output_kind = "ivec4"
"#;

    #[test]
    fn test_parse_all_kinds() {
        let file: JobFile = toml::from_str(JOBS).unwrap();
        assert_eq!(file.jobs.len(), 3);
        let names: Vec<&str> = file.jobs.iter().map(JobSpec::name).collect();
        assert_eq!(names, ["red", "waves", "hello"]);

        let JobSpec::Render(render) = &file.jobs[0] else { panic!("expected render") };
        assert_eq!(render.raster.cull, CullMode::None);
        assert!(render.raster.depth_test);
        assert!(render.vertex.is_none());

        let JobSpec::Animation(animation) = &file.jobs[1] else { panic!("expected animation") };
        assert_eq!(animation.animation.frames, Some(12));
        assert_eq!(animation.animation.end, None);
        assert_eq!(animation.graphics.vertex, Some(ShaderSource::File("wave".to_string())));

        let JobSpec::Compute(compute) = &file.jobs[2] else { panic!("expected compute") };
        assert_eq!(compute.dispatch, [1, 1, 1]);
        assert_eq!(compute.output_kind, OutputKind::Ivec4);
    }

    #[test]
    fn test_render_job_uses_default_vertex() {
        let file: JobFile = toml::from_str(JOBS).unwrap();
        let JobSpec::Render(render) = &file.jobs[0] else { panic!("expected render") };

        let job = render.to_job().unwrap();
        assert_eq!(job.vertex, ShaderRef::inline(ShaderStage::Vertex, DEFAULT_VERTEX_SOURCE));
        assert_eq!(job.fragment.stage, ShaderStage::Fragment);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result: Result<JobFile, _> = toml::from_str("[[job]]\nkind = \"stream\"\nname = \"x\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_texture_fails_to_build() {
        let file: JobFile = toml::from_str(
            r#"
[[job]]
kind = "compute"
name = "c"
output = "c.txt"
shader = { inline = "x" }
texture = "/nonexistent/texture.png"
"#,
        )
        .unwrap();
        let JobSpec::Compute(compute) = &file.jobs[0] else { panic!("expected compute") };
        assert!(compute.to_job().is_err());
    }
}
