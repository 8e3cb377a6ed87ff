//! OBJ file loader for job meshes

use shader_engine::gpu::MeshData;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

/// Errors from reading or parsing an OBJ file
#[derive(Error, Debug)]
pub enum ObjError {
    /// The file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// A line could not be parsed
    #[error("Parse error on line {line}: {message}")]
    ParseError {
        /// 1-based line number
        line: usize,
        /// What was wrong with it
        message: String,
    },
    /// The file parsed but cannot become a mesh
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Wavefront OBJ reader producing [`MeshData`]
pub struct ObjLoader;

impl ObjLoader {
    /// Load an OBJ file into a mesh
    pub fn load_obj<P: AsRef<Path>>(path: P) -> Result<MeshData, ObjError> {
        let path = path.as_ref();
        let mesh = Self::parse(BufReader::new(File::open(path)?))?;
        log::info!(
            "Loaded mesh {:?}: {} vertices, {} triangles",
            path,
            mesh.vertex_count(),
            mesh.indices.len() / 3
        );
        Ok(mesh)
    }

    /// Parse OBJ text
    ///
    /// Every face corner becomes its own vertex; polygons are fan-triangulated.
    /// Missing texcoords default to (0, 0) and missing normals to +Y.
    pub fn parse<R: BufRead>(reader: R) -> Result<MeshData, ObjError> {
        let mut positions = Vec::new();
        let mut normals = Vec::new();
        let mut tex_coords = Vec::new();
        let mut mesh = MeshData::default();

        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            let number = number + 1;

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let parts: Vec<&str> = line.split_whitespace().collect();
            match parts[0] {
                "v" => positions.push(parse_floats::<3>(&parts[1..], number, "vertex")?),
                "vn" => normals.push(parse_floats::<3>(&parts[1..], number, "normal")?),
                "vt" => tex_coords.push(parse_floats::<2>(&parts[1..], number, "tex coord")?),
                "f" => {
                    if parts.len() < 4 {
                        return Err(ObjError::ParseError {
                            line: number,
                            message: "face needs at least three corners".to_string(),
                        });
                    }

                    let mut face_indices = Vec::with_capacity(parts.len() - 1);
                    for corner in &parts[1..] {
                        let mut fields = corner.split('/');

                        let pos_idx = fields
                            .next()
                            .and_then(|f| resolve_index(f, positions.len()))
                            .ok_or_else(|| ObjError::ParseError {
                                line: number,
                                message: format!("invalid position index '{}'", corner),
                            })?;
                        let tex_idx = fields.next().and_then(|f| resolve_index(f, tex_coords.len()));
                        let normal_idx = fields.next().and_then(|f| resolve_index(f, normals.len()));

                        let index = u16::try_from(mesh.positions.len()).map_err(|_| {
                            ObjError::InvalidFormat("more than 65536 face corners".to_string())
                        })?;

                        mesh.positions.push(positions[pos_idx]);
                        mesh.texcoords.push(tex_idx.map_or([0.0, 0.0], |i| tex_coords[i]));
                        mesh.normals.push(normal_idx.map_or([0.0, 1.0, 0.0], |i| normals[i]));
                        face_indices.push(index);
                    }

                    for i in 1..(face_indices.len() - 1) {
                        mesh.indices.extend_from_slice(&[face_indices[0], face_indices[i], face_indices[i + 1]]);
                    }
                }
                _ => {
                    // Groups, materials and smoothing are ignored
                }
            }
        }

        if mesh.positions.is_empty() {
            return Err(ObjError::InvalidFormat("No faces found in OBJ file".to_string()));
        }

        Ok(mesh)
    }
}

fn parse_floats<const N: usize>(fields: &[&str], line: usize, what: &str) -> Result<[f32; N], ObjError> {
    let mut out = [0.0; N];
    if fields.len() < N {
        return Err(ObjError::ParseError { line, message: format!("{} needs {} components", what, N) });
    }
    for (slot, field) in out.iter_mut().zip(fields) {
        *slot = field.parse().map_err(|_| ObjError::ParseError {
            line,
            message: format!("invalid {} component '{}'", what, field),
        })?;
    }
    Ok(out)
}

/// 1-based (or negative, relative) OBJ index to a 0-based index below `len`
fn resolve_index(field: &str, len: usize) -> Option<usize> {
    let value: i64 = field.parse().ok()?;
    let index = if value < 0 {
        i64::try_from(len).ok()? + value
    } else {
        value - 1
    };
    usize::try_from(index).ok().filter(|&i| i < len)
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUAD: &str = "\
# unit quad
v -1 -1 0
v 1 -1 0
v 1 1 0
v -1 1 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
vn 0 0 1
f 1/1/1 2/2/1 3/3/1 4/4/1
";

    #[test]
    fn test_quad_is_fan_triangulated() {
        let mesh = ObjLoader::parse(QUAD.as_bytes()).unwrap();
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.indices, vec![0, 1, 2, 0, 2, 3]);
        assert_eq!(mesh.texcoords[2], [1.0, 1.0]);
        assert_eq!(mesh.normals[0], [0.0, 0.0, 1.0]);
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_missing_attributes_get_defaults() {
        let mesh = ObjLoader::parse("v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n".as_bytes()).unwrap();
        assert_eq!(mesh.texcoords, vec![[0.0, 0.0]; 3]);
        assert_eq!(mesh.normals, vec![[0.0, 1.0, 0.0]; 3]);
    }

    #[test]
    fn test_negative_indices_are_relative() {
        let mesh = ObjLoader::parse("v 0 0 0\nv 1 0 0\nv 0 1 0\nf -3 -2 -1\n".as_bytes()).unwrap();
        assert_eq!(mesh.positions[2], [0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_out_of_range_index_rejected() {
        let err = ObjLoader::parse("v 0 0 0\nf 1 2 3\n".as_bytes()).unwrap_err();
        assert!(matches!(err, ObjError::ParseError { line: 2, .. }));
    }

    #[test]
    fn test_bad_number_reports_line() {
        let err = ObjLoader::parse("v 0 0 0\nv 1 x 0\n".as_bytes()).unwrap_err();
        assert!(matches!(err, ObjError::ParseError { line: 2, .. }));
    }

    #[test]
    fn test_empty_file_rejected() {
        assert!(matches!(ObjLoader::parse("# nothing\n".as_bytes()), Err(ObjError::InvalidFormat(_))));
    }
}
