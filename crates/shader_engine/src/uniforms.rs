//! Per-frame uniform input
//!
//! Shaders see the block at set 0, binding 1:
//!
//! ```glsl
//! layout(set = 0, binding = 1) uniform Uniforms {
//!     float time;
//!     float random;
//! };
//! ```

use bytemuck::{Pod, Zeroable};

/// Uniform block written host-side before every submission
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct UniformBlock {
    /// Animation time in seconds (0 for stills)
    pub time: f32,
    /// Uniform random value in [0, 1)
    pub random: f32,
}

impl UniformBlock {
    /// Create a block
    pub fn new(time: f32, random: f32) -> Self {
        Self { time, random }
    }

    /// std140 bytes of the block
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_std140_layout() {
        let block = UniformBlock::new(1.5, 0.25);
        let bytes = block.as_bytes();
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[0..4], &1.5f32.to_ne_bytes());
        assert_eq!(&bytes[4..8], &0.25f32.to_ne_bytes());
    }
}
