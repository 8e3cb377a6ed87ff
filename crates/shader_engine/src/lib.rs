//! # Shader Engine
//!
//! A headless Vulkan engine that accepts untrusted GLSL (or the names of
//! precompiled SPIR-V files), builds graphics or compute pipelines from it,
//! runs them against device memory and hands back raw pixel or buffer data.
//!
//! ## Features
//!
//! - **Shader Compiler**: GLSL to SPIR-V with an include resolver that cannot
//!   escape its include root
//! - **Graphics Jobs**: render a mesh (or the default grid) into an RGBA8 target
//! - **Planar Output**: GPU-side conversion into YUV 4:2:0 planes for video encoders
//! - **Compute Jobs**: dispatch a compute shader and read back a 64-byte output block
//! - **Job Gate**: serializes every job against the single device
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shader_engine::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::default();
//!     let gate = JobGate::new(ShaderBackend::new(&config)?);
//!
//!     let job = RenderJob::with_default_vertex(
//!         ShaderRef::inline(ShaderStage::Fragment, "#version 450\n\
//!             layout(location = 0) out vec4 color;\n\
//!             void main() { color = vec4(1.0, 0.0, 0.0, 1.0); }"),
//!     );
//!     let frame = gate.run(|backend| jobs::render_still(backend, &job, &mut UniformRandom::new()))?;
//!     println!("{} bytes in {:?}", frame.pixels.len(), frame.stats.gpu_wait);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod foundation;
pub mod config;
pub mod gpu;
pub mod shader;
pub mod uniforms;
pub mod output;
pub mod jobs;

mod backend;

pub use backend::{ComputedOutput, DrawMesh, OutputFormat, RenderedFrame, ShaderBackend};

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        ComputedOutput, DrawMesh, OutputFormat, RenderedFrame, ShaderBackend,
        config::{Config, ConfigError, EngineConfig},
        gpu::{CullMode, FenceWait, FrameStats, MeshData, RasterOptions, VulkanError},
        jobs::{
            self, Animation, AnimationDefaults, AnimationLimits, AnimationRequest, ComputeJob,
            AnimationSummary, FrameSink, JobError, JobGate, Progress, RenderJob, TextureInput, UniformRandom,
        },
        output::{OutputKind, OutputStorage, OutputValue},
        shader::{ShaderCompiler, ShaderError, ShaderRef, ShaderSource, ShaderStage},
        uniforms::UniformBlock,
    };
}
