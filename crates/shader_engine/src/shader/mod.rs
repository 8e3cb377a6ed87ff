//! Shader compiler
//!
//! Turns GLSL text into SPIR-V words with shaderc, or loads precompiled
//! `<name>.<stage>.spv` files from the trusted shader directory.
//!
//! Inline GLSL targets Vulkan 1.1 / SPIR-V 1.3 with entry point `main`, and
//! `#include` directives resolve only under the configured include root.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

mod include;

pub use include::{resolve_include, ResolvedHeader};

/// Pass-through vertex stage used when a job brings no vertex shader
pub const DEFAULT_VERTEX_SOURCE: &str = include_str!("../../shaders/default.vert");

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Errors produced while obtaining shader bytecode
#[derive(Error, Debug)]
pub enum ShaderError {
    /// A precompiled shader name contained a path separator
    #[error("shader name '{name}' must not contain '/'")]
    PathSeparator {
        /// The rejected name
        name: String,
    },

    /// A precompiled shader file could not be read
    #[error("failed to read {}: {source}", path.display())]
    ReadFile {
        /// File that was requested
        path: PathBuf,
        /// Underlying filesystem error
        #[source]
        source: std::io::Error,
    },

    /// A precompiled shader file is not a whole number of 32-bit words
    #[error("{} is not valid SPIR-V (size is not a multiple of 4)", path.display())]
    Misaligned {
        /// File that was read
        path: PathBuf,
    },

    /// GLSL parse or link failure; carries the compiler log verbatim
    #[error("{0}")]
    Compile(String),

    /// shaderc could not be initialised
    #[error("shader compiler is unavailable")]
    CompilerUnavailable,
}

impl ShaderError {
    /// True for errors caused by a bad shader reference rather than bad GLSL
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::PathSeparator { .. } | Self::ReadFile { .. } | Self::Misaligned { .. })
    }
}

/// Pipeline stage a shader is compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderStage {
    /// Vertex stage
    Vertex,
    /// Fragment stage
    Fragment,
    /// Compute stage
    Compute,
}

impl ShaderStage {
    /// File extension used for precompiled files (`<name>.<ext>.spv`)
    pub fn extension(self) -> &'static str {
        match self {
            Self::Vertex => "vert",
            Self::Fragment => "frag",
            Self::Compute => "comp",
        }
    }

    fn kind(self) -> shaderc::ShaderKind {
        match self {
            Self::Vertex => shaderc::ShaderKind::Vertex,
            Self::Fragment => shaderc::ShaderKind::Fragment,
            Self::Compute => shaderc::ShaderKind::Compute,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Vertex => "vertex",
            Self::Fragment => "fragment",
            Self::Compute => "compute",
        })
    }
}

/// Where the shader code comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderSource {
    /// GLSL text, compiled on upload
    Inline(String),
    /// Bare name of a precompiled file in the shader directory
    File(String),
}

/// A shader for one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderRef {
    /// Target stage
    pub stage: ShaderStage,
    /// Code or file name
    pub source: ShaderSource,
}

impl ShaderRef {
    /// Inline GLSL for `stage`
    pub fn inline(stage: ShaderStage, glsl: impl Into<String>) -> Self {
        Self { stage, source: ShaderSource::Inline(glsl.into()) }
    }

    /// Precompiled `<name>.<stage>.spv` for `stage`
    pub fn file(stage: ShaderStage, name: impl Into<String>) -> Self {
        Self { stage, source: ShaderSource::File(name.into()) }
    }
}

/// GLSL compiler and precompiled-shader loader
#[derive(Debug, Clone)]
pub struct ShaderCompiler {
    shaders_dir: PathBuf,
    include_dir: PathBuf,
}

impl ShaderCompiler {
    /// Create a compiler reading precompiled files from `shaders_dir` and
    /// headers from `include_dir`
    pub fn new(shaders_dir: impl Into<PathBuf>, include_dir: impl Into<PathBuf>) -> Self {
        Self {
            shaders_dir: shaders_dir.into(),
            include_dir: include_dir.into(),
        }
    }

    /// Precompiled shader directory
    pub fn shaders_dir(&self) -> &Path {
        &self.shaders_dir
    }

    /// Include root
    pub fn include_dir(&self) -> &Path {
        &self.include_dir
    }

    /// Produce SPIR-V words for a shader reference
    pub fn compile(&self, shader: &ShaderRef) -> Result<Vec<u32>, ShaderError> {
        match &shader.source {
            ShaderSource::Inline(glsl) => self.compile_glsl(shader.stage, glsl),
            ShaderSource::File(name) => self.load_precompiled(shader.stage, name),
        }
    }

    /// Load `<shaders_dir>/<name>.<ext>.spv`
    ///
    /// Names with a path separator are refused before the filesystem is touched.
    pub fn load_precompiled(&self, stage: ShaderStage, name: &str) -> Result<Vec<u32>, ShaderError> {
        if name.contains(['/', '\\']) {
            return Err(ShaderError::PathSeparator { name: name.to_string() });
        }

        let path = self.shaders_dir.join(format!("{}.{}.spv", name, stage.extension()));
        let bytes = fs::read(&path).map_err(|source| ShaderError::ReadFile { path: path.clone(), source })?;
        if bytes.len() % 4 != 0 || bytes.is_empty() {
            return Err(ShaderError::Misaligned { path });
        }

        let words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        if words[0] != SPIRV_MAGIC {
            log::warn!("{} does not start with the SPIR-V magic number", path.display());
        }
        Ok(words)
    }

    /// Compile GLSL text for `stage`
    pub fn compile_glsl(&self, stage: ShaderStage, glsl: &str) -> Result<Vec<u32>, ShaderError> {
        let compiler = shaderc::Compiler::new().ok_or(ShaderError::CompilerUnavailable)?;
        let mut options = shaderc::CompileOptions::new().ok_or(ShaderError::CompilerUnavailable)?;

        options.set_source_language(shaderc::SourceLanguage::GLSL);
        options.set_target_env(shaderc::TargetEnv::Vulkan, shaderc::EnvVersion::Vulkan1_1 as u32);
        options.set_target_spirv(shaderc::SpirvVersion::V1_3);
        // Sources without a directive parse as GLSL 100; an explicit #version wins
        if !declares_version(glsl) {
            options.set_forced_version_profile(DEFAULT_GLSL_VERSION, shaderc::GlslProfile::None);
        }

        let include_root = self.include_dir.clone();
        options.set_include_callback(move |requested, _include_type, _requesting, _depth| {
            resolve_include(&include_root, requested).map(|header| shaderc::ResolvedInclude {
                resolved_name: header.path.to_string_lossy().into_owned(),
                content: header.content,
            })
        });

        let file_name = format!("inline.{}", stage.extension());
        match compiler.compile_into_spirv(glsl, stage.kind(), &file_name, "main", Some(&options)) {
            Ok(artifact) => {
                if artifact.get_num_warnings() > 0 {
                    log::debug!("{} shader warnings: {}", stage, artifact.get_warning_messages());
                }
                Ok(artifact.as_binary().to_vec())
            }
            Err(shaderc::Error::CompilationError(_, message)) => {
                log::debug!("{} shader failed to compile: {}", stage, message);
                Err(ShaderError::Compile(message))
            }
            Err(e) => {
                log::debug!("{} shader failed to compile: {}", stage, e);
                Err(ShaderError::Compile(e.to_string()))
            }
        }
    }
}

/// Version assumed for GLSL that has no `#version` line
pub const DEFAULT_GLSL_VERSION: u32 = 100;

/// True when `glsl` carries a `#version` preprocessor line
fn declares_version(glsl: &str) -> bool {
    glsl.lines().any(|line| {
        line.trim_start()
            .strip_prefix('#')
            .is_some_and(|directive| directive.trim_start().starts_with("version"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const OK_COMPUTE: &str = "#version 450
layout(local_size_x = 1) in;
layout(set = 1, binding = 0) buffer Output { uint chars[16]; } result;
void main() {
    result.chars[0] = 79u;
    result.chars[1] = 75u;
}
";

    fn compiler_with(root: &Path) -> ShaderCompiler {
        ShaderCompiler::new(root.join("shaders"), root.join("include"))
    }

    #[test]
    fn test_compute_shader_compiles() {
        let dir = tempfile::tempdir().unwrap();
        let words = compiler_with(dir.path()).compile_glsl(ShaderStage::Compute, OK_COMPUTE).unwrap();
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn test_default_vertex_shader_compiles() {
        let dir = tempfile::tempdir().unwrap();
        let shader = ShaderRef::inline(ShaderStage::Vertex, DEFAULT_VERTEX_SOURCE);
        assert!(compiler_with(dir.path()).compile(&shader).is_ok());
    }

    #[test]
    fn test_version_directive_detection() {
        assert!(declares_version("#version 450\nvoid main() {}"));
        assert!(declares_version("// header\n  #  version 310 es\nvoid main() {}"));
        assert!(!declares_version("void main() { gl_FragColor = vec4(1.0); }"));
        assert!(!declares_version("#define version 2\nvoid main() {}"));
    }

    #[test]
    fn test_unversioned_source_parses_as_glsl_100() {
        let dir = tempfile::tempdir().unwrap();
        // GLSL 100 is an ES profile, which Vulkan SPIR-V only accepts from 310
        let err = compiler_with(dir.path())
            .compile_glsl(ShaderStage::Fragment, "void main() { gl_FragColor = vec4(1.0); }")
            .unwrap_err();
        match err {
            ShaderError::Compile(message) => assert!(message.contains("310"), "{message}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = compiler_with(dir.path())
            .compile_glsl(ShaderStage::Fragment, "#version 450\nvoid main() { this is not glsl }")
            .unwrap_err();
        match err {
            ShaderError::Compile(log) => assert!(!log.is_empty()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_include_from_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("include")).unwrap();
        fs::write(dir.path().join("include/red.glsl"), "vec4 red() { return vec4(1.0, 0.0, 0.0, 1.0); }\n").unwrap();

        let glsl = "#version 450
#extension GL_GOOGLE_include_directive : require
#include \"red.glsl\"
layout(location = 0) out vec4 color;
void main() { color = red(); }
";
        assert!(compiler_with(dir.path()).compile_glsl(ShaderStage::Fragment, glsl).is_ok());
    }

    #[test]
    fn test_include_cannot_escape_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("include")).unwrap();
        // Would make the shader compile if traversal succeeded
        fs::write(dir.path().join("sentinel.glsl"), "vec4 red() { return vec4(1.0, 0.0, 0.0, 1.0); }\n").unwrap();

        let glsl = "#version 450
#extension GL_GOOGLE_include_directive : require
#include \"../sentinel.glsl\"
layout(location = 0) out vec4 color;
void main() { color = red(); }
";
        let err = compiler_with(dir.path()).compile_glsl(ShaderStage::Fragment, glsl).unwrap_err();
        assert!(matches!(err, ShaderError::Compile(_)));
    }

    #[test]
    fn test_file_name_with_separator_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = compiler_with(dir.path())
            .compile(&ShaderRef::file(ShaderStage::Fragment, "../etc/passwd"))
            .unwrap_err();
        assert!(matches!(err, ShaderError::PathSeparator { .. }));
        assert!(err.to_string().contains('/'));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_missing_precompiled_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = compiler_with(dir.path())
            .load_precompiled(ShaderStage::Vertex, "nope")
            .unwrap_err();
        match err {
            ShaderError::ReadFile { path, .. } => assert!(path.ends_with("nope.vert.spv")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_precompiled_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = compiler_with(dir.path());
        let words = compiler.compile_glsl(ShaderStage::Compute, OK_COMPUTE).unwrap();

        fs::create_dir(dir.path().join("shaders")).unwrap();
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        fs::write(dir.path().join("shaders/ok.comp.spv"), bytes).unwrap();

        assert_eq!(compiler.load_precompiled(ShaderStage::Compute, "ok").unwrap(), words);
    }

    #[test]
    fn test_misaligned_precompiled_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("shaders")).unwrap();
        fs::write(dir.path().join("shaders/bad.frag.spv"), [1u8, 2, 3]).unwrap();

        let err = compiler_with(dir.path()).load_precompiled(ShaderStage::Fragment, "bad").unwrap_err();
        assert!(matches!(err, ShaderError::Misaligned { .. }));
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(ShaderStage::Vertex.extension(), "vert");
        assert_eq!(ShaderStage::Compute.to_string(), "compute");
    }
}
