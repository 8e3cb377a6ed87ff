//! Mesh data and device-local mesh buffers
//!
//! [`MeshData`] is the host-side description (parallel attribute arrays plus
//! 16-bit triangle indices). [`MeshResource`] holds the uploaded copy.

use ash::vk;
use std::sync::Arc;
use thiserror::Error;

use super::buffer::HOST_MEMORY;
use super::{Buffer, GpuContext, OneShotCommands, VulkanResult};

/// Largest vertex count addressable with 16-bit indices
pub const MAX_VERTICES: usize = u16::MAX as usize + 1;

/// Largest grid subdivision whose vertex count fits 16-bit indices
pub const MAX_GRID_SUBDIVISIONS: u32 = 255;

/// Reasons a mesh is rejected before upload
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MeshError {
    /// Attribute arrays differ in length
    #[error("mesh has {positions} positions but {texcoords} texcoords and {normals} normals")]
    AttributeCountMismatch {
        /// Number of positions
        positions: usize,
        /// Number of texture coordinates
        texcoords: usize,
        /// Number of normals
        normals: usize,
    },

    /// No vertices or no indices
    #[error("mesh is empty")]
    Empty,

    /// Index count is not a multiple of three
    #[error("index count {0} is not a multiple of 3")]
    PartialTriangle(usize),

    /// An index points past the vertex arrays
    #[error("index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange {
        /// Offending index value
        index: u16,
        /// Number of vertices in the mesh
        vertex_count: usize,
    },

    /// More vertices than 16-bit indices can address
    #[error("mesh has {0} vertices, at most 65536 are supported")]
    TooManyVertices(usize),

    /// Grid subdivision outside 1..=255
    #[error("grid subdivision {0} must be between 1 and 255")]
    GridSubdivisions(u32),
}

/// Host-side mesh: parallel attribute arrays and a triangle list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    /// Vertex positions (location 0)
    pub positions: Vec<[f32; 3]>,
    /// Texture coordinates (location 1)
    pub texcoords: Vec<[f32; 2]>,
    /// Vertex normals (location 2)
    pub normals: Vec<[f32; 3]>,
    /// Triangle list indices
    pub indices: Vec<u16>,
}

impl MeshData {
    /// Planar grid of `subdivisions`×`subdivisions` quads spanning [-1,1]² at z = 0
    ///
    /// Texture coordinates run from 0 to 1 across the grid, normals face +Z.
    /// Triangles wind counter-clockwise in clip-space (Y up) coordinates, so they
    /// survive the default front-face culling.
    pub fn grid(subdivisions: u32) -> Result<Self, MeshError> {
        if subdivisions == 0 || subdivisions > MAX_GRID_SUBDIVISIONS {
            return Err(MeshError::GridSubdivisions(subdivisions));
        }

        let n = subdivisions as usize;
        let side = n + 1;
        let mut mesh = Self {
            positions: Vec::with_capacity(side * side),
            texcoords: Vec::with_capacity(side * side),
            normals: vec![[0.0, 0.0, 1.0]; side * side],
            indices: Vec::with_capacity(n * n * 6),
        };

        for row in 0..side {
            let v = row as f32 / n as f32;
            for col in 0..side {
                let u = col as f32 / n as f32;
                mesh.positions.push([u * 2.0 - 1.0, v * 2.0 - 1.0, 0.0]);
                mesh.texcoords.push([u, v]);
            }
        }

        for row in 0..n {
            for col in 0..n {
                // Fits: side * side <= 256 * 256
                let a = (row * side + col) as u16;
                let b = a + 1;
                let c = b + side as u16;
                let d = a + side as u16;
                mesh.indices.extend_from_slice(&[a, b, c, a, c, d]);
            }
        }

        Ok(mesh)
    }

    /// Number of vertices
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Check the invariants required for upload
    pub fn validate(&self) -> Result<(), MeshError> {
        let vertex_count = self.positions.len();
        if self.texcoords.len() != vertex_count || self.normals.len() != vertex_count {
            return Err(MeshError::AttributeCountMismatch {
                positions: vertex_count,
                texcoords: self.texcoords.len(),
                normals: self.normals.len(),
            });
        }
        if vertex_count == 0 || self.indices.is_empty() {
            return Err(MeshError::Empty);
        }
        if vertex_count > MAX_VERTICES {
            return Err(MeshError::TooManyVertices(vertex_count));
        }
        if self.indices.len() % 3 != 0 {
            return Err(MeshError::PartialTriangle(self.indices.len()));
        }
        if let Some(&index) = self.indices.iter().find(|&&i| usize::from(i) >= vertex_count) {
            return Err(MeshError::IndexOutOfRange { index, vertex_count });
        }
        Ok(())
    }

    fn attribute_bytes(&self) -> [&[u8]; 4] {
        [
            bytemuck::cast_slice(&self.positions),
            bytemuck::cast_slice(&self.texcoords),
            bytemuck::cast_slice(&self.normals),
            bytemuck::cast_slice(&self.indices),
        ]
    }
}

/// Device-local vertex attribute and index buffers
pub struct MeshResource {
    positions: Buffer,
    texcoords: Buffer,
    normals: Buffer,
    indices: Buffer,
    vertex_count: u32,
    index_count: u32,
}

impl MeshResource {
    /// Validate and upload a mesh
    ///
    /// All four arrays go through one staging buffer and one transfer
    /// submission; the call returns once the transfer fence has signalled.
    pub fn upload(context: &Arc<GpuContext>, mesh: &MeshData) -> Result<Self, MeshUploadError> {
        mesh.validate()?;

        let parts = mesh.attribute_bytes();
        let total: usize = parts.iter().map(|part| part.len()).sum();

        let staging = Buffer::new(context, total as vk::DeviceSize, vk::BufferUsageFlags::TRANSFER_SRC, HOST_MEMORY)?;
        let mut offsets = [0usize; 4];
        {
            let mut mapped = staging.map()?;
            let bytes = mapped.as_mut_slice();
            let mut offset = 0;
            for (slot, part) in offsets.iter_mut().zip(parts) {
                *slot = offset;
                bytes[offset..offset + part.len()].copy_from_slice(part);
                offset += part.len();
            }
        }

        let device_buffer = |len: usize, usage: vk::BufferUsageFlags| {
            Buffer::new(
                context,
                len as vk::DeviceSize,
                usage | vk::BufferUsageFlags::TRANSFER_DST,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )
        };
        let positions = device_buffer(parts[0].len(), vk::BufferUsageFlags::VERTEX_BUFFER)?;
        let texcoords = device_buffer(parts[1].len(), vk::BufferUsageFlags::VERTEX_BUFFER)?;
        let normals = device_buffer(parts[2].len(), vk::BufferUsageFlags::VERTEX_BUFFER)?;
        let indices = device_buffer(parts[3].len(), vk::BufferUsageFlags::INDEX_BUFFER)?;

        let mut commands = OneShotCommands::begin(context)?;
        {
            let recorder = commands.recorder()?;
            for ((dst, offset), part) in [&positions, &texcoords, &normals, &indices].into_iter().zip(offsets).zip(parts) {
                recorder.copy_buffer(staging.handle(), dst.handle(), vk::BufferCopy {
                    src_offset: offset as vk::DeviceSize,
                    dst_offset: 0,
                    size: part.len() as vk::DeviceSize,
                });
            }
        }
        commands.submit()?;

        log::debug!(
            "Uploaded mesh: {} vertices, {} indices ({} bytes staged)",
            mesh.vertex_count(), mesh.indices.len(), total
        );

        Ok(Self {
            positions,
            texcoords,
            normals,
            indices,
            vertex_count: mesh.vertex_count() as u32,
            index_count: mesh.indices.len() as u32,
        })
    }

    /// Attribute buffers in binding order (position, texcoord, normal)
    pub fn vertex_buffers(&self) -> [vk::Buffer; 3] {
        [self.positions.handle(), self.texcoords.handle(), self.normals.handle()]
    }

    /// 16-bit index buffer
    pub fn index_buffer(&self) -> vk::Buffer {
        self.indices.handle()
    }

    /// Number of vertices
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Number of indices to draw
    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

/// Mesh upload failure: bad input or a device error
#[derive(Error, Debug)]
pub enum MeshUploadError {
    /// The mesh failed validation
    #[error(transparent)]
    Invalid(#[from] MeshError),

    /// The device rejected an allocation or the transfer
    #[error(transparent)]
    Device(#[from] super::VulkanError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> MeshData {
        MeshData {
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            texcoords: vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
            normals: vec![[0.0, 0.0, 1.0]; 3],
            indices: vec![0, 1, 2],
        }
    }

    #[test]
    fn test_valid_triangle() {
        assert_eq!(triangle().validate(), Ok(()));
    }

    #[test]
    fn test_attribute_mismatch() {
        let mut mesh = triangle();
        mesh.normals.pop();
        assert!(matches!(mesh.validate(), Err(MeshError::AttributeCountMismatch { normals: 2, .. })));
    }

    #[test]
    fn test_partial_triangle() {
        let mut mesh = triangle();
        mesh.indices.push(0);
        assert_eq!(mesh.validate(), Err(MeshError::PartialTriangle(4)));
    }

    #[test]
    fn test_index_out_of_range() {
        let mut mesh = triangle();
        mesh.indices[2] = 3;
        assert_eq!(mesh.validate(), Err(MeshError::IndexOutOfRange { index: 3, vertex_count: 3 }));
    }

    #[test]
    fn test_empty_mesh() {
        assert_eq!(MeshData::default().validate(), Err(MeshError::Empty));
    }

    #[test]
    fn test_too_many_vertices() {
        let count = MAX_VERTICES + 1;
        let mesh = MeshData {
            positions: vec![[0.0; 3]; count],
            texcoords: vec![[0.0; 2]; count],
            normals: vec![[0.0; 3]; count],
            indices: vec![0, 1, 2],
        };
        assert_eq!(mesh.validate(), Err(MeshError::TooManyVertices(count)));
    }

    #[test]
    fn test_grid_counts() {
        let grid = MeshData::grid(4).unwrap();
        assert_eq!(grid.vertex_count(), 25);
        assert_eq!(grid.indices.len(), 4 * 4 * 6);
        assert_eq!(grid.validate(), Ok(()));
    }

    #[test]
    fn test_grid_spans_clip_square() {
        let grid = MeshData::grid(2).unwrap();
        assert_eq!(grid.positions.first(), Some(&[-1.0, -1.0, 0.0]));
        assert_eq!(grid.positions.last(), Some(&[1.0, 1.0, 0.0]));
        assert_eq!(grid.texcoords.first(), Some(&[0.0, 0.0]));
        assert_eq!(grid.texcoords.last(), Some(&[1.0, 1.0]));
    }

    #[test]
    fn test_grid_winding_is_counter_clockwise() {
        let grid = MeshData::grid(3).unwrap();
        for tri in grid.indices.chunks(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| grid.positions[usize::from(i)]);
            let area = (b[0] - a[0]) * (c[1] - a[1]) - (c[0] - a[0]) * (b[1] - a[1]);
            assert!(area > 0.0);
        }
    }

    #[test]
    fn test_largest_grid_fits_u16() {
        let grid = MeshData::grid(MAX_GRID_SUBDIVISIONS).unwrap();
        assert_eq!(grid.vertex_count(), MAX_VERTICES);
        assert_eq!(grid.validate(), Ok(()));
        assert!(matches!(MeshData::grid(256), Err(MeshError::GridSubdivisions(256))));
        assert!(matches!(MeshData::grid(0), Err(MeshError::GridSubdivisions(0))));
    }
}
