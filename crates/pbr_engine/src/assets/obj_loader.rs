//! OBJ file loader for 3D models
//!
//! Produces a flat triangle-corner list: every face corner becomes one
//! [`Vertex`], polygons are fan-triangulated and V is flipped to Vulkan's
//! top-left texture origin. Deduplication and tangents happen later in
//! [`crate::render::mesh::Geometry`].

use crate::assets::AssetError;
use crate::render::vertex_layout::Vertex;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Triangulated OBJ contents, three corners per triangle
#[derive(Debug, Clone, Default)]
pub struct ObjModel {
    /// Triangle corners in file order
    pub corners: Vec<Vertex>,
}

impl ObjModel {
    /// Number of triangles
    pub fn triangle_count(&self) -> usize {
        self.corners.len() / 3
    }
}

/// OBJ parser
pub struct ObjLoader;

impl ObjLoader {
    /// Load an OBJ file
    pub fn load_obj<P: AsRef<Path>>(path: P) -> Result<ObjModel, AssetError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| AssetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let model = Self::parse(BufReader::new(file), path)?;
        log::debug!("[MESH] Parsed {} triangles from {:?}", model.triangle_count(), path);
        Ok(model)
    }

    /// Parse OBJ text; `path` is only used in error messages
    pub fn parse<R: BufRead>(reader: R, path: &Path) -> Result<ObjModel, AssetError> {
        let mut positions: Vec<[f32; 3]> = Vec::new();
        let mut normals: Vec<[f32; 3]> = Vec::new();
        let mut tex_coords: Vec<[f32; 2]> = Vec::new();
        let mut corners = Vec::new();

        for (line_index, line) in reader.lines().enumerate() {
            let line_number = line_index + 1;
            let line = line.map_err(|source| AssetError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let parse_error = |reason: String| AssetError::Parse {
                path: path.to_path_buf(),
                line: line_number,
                reason,
            };

            let mut parts = line.split_whitespace();
            let Some(keyword) = parts.next() else {
                continue;
            };
            let args: Vec<&str> = parts.collect();

            match keyword {
                "v" => positions.push(parse_floats::<3>(&args).map_err(parse_error)?),
                "vn" => normals.push(parse_floats::<3>(&args).map_err(parse_error)?),
                "vt" => {
                    let [u, v] = parse_floats::<2>(&args).map_err(parse_error)?;
                    tex_coords.push([u, 1.0 - v]);
                }
                "f" => {
                    if args.len() < 3 {
                        return Err(parse_error(format!("face needs 3 corners, got {}", args.len())));
                    }
                    let mut face = Vec::with_capacity(args.len());
                    for corner in &args {
                        face.push(
                            resolve_corner(corner, &positions, &normals, &tex_coords).map_err(parse_error)?,
                        );
                    }

                    // Fan triangulation
                    for i in 1..face.len() - 1 {
                        corners.push(face[0]);
                        corners.push(face[i]);
                        corners.push(face[i + 1]);
                    }
                }
                _ => {}
            }
        }

        if corners.is_empty() {
            return Err(AssetError::Decode {
                path: path.to_path_buf(),
                reason: "no faces found".to_string(),
            });
        }

        Ok(ObjModel { corners })
    }
}

fn parse_floats<const N: usize>(args: &[&str]) -> Result<[f32; N], String> {
    if args.len() < N {
        return Err(format!("expected {} components, got {}", N, args.len()));
    }
    let mut values = [0.0; N];
    for (value, text) in values.iter_mut().zip(args) {
        *value = text.parse().map_err(|_| format!("invalid number '{text}'"))?;
    }
    Ok(values)
}

/// Resolve a `v`, `v/vt`, `v//vn` or `v/vt/vn` corner; negative indices count from the end
fn resolve_corner(
    corner: &str,
    positions: &[[f32; 3]],
    normals: &[[f32; 3]],
    tex_coords: &[[f32; 2]],
) -> Result<Vertex, String> {
    let mut fields = corner.split('/');
    let position = lookup(fields.next(), positions, "position")?
        .ok_or_else(|| format!("corner '{corner}' has no position index"))?;
    let tex_coord = lookup(fields.next(), tex_coords, "texture coordinate")?.unwrap_or([0.0, 0.0]);
    let normal = lookup(fields.next(), normals, "normal")?.unwrap_or([0.0, 1.0, 0.0]);

    Ok(Vertex {
        position,
        normal,
        tangent: [0.0; 3],
        tex_coord,
    })
}

fn lookup<T: Copy>(field: Option<&str>, items: &[T], what: &str) -> Result<Option<T>, String> {
    let Some(field) = field.filter(|f| !f.is_empty()) else {
        return Ok(None);
    };
    let index: i64 = field.parse().map_err(|_| format!("invalid {what} index '{field}'"))?;
    let resolved = if index > 0 {
        usize::try_from(index - 1).ok()
    } else {
        usize::try_from(items.len() as i64 + index).ok()
    };
    resolved
        .and_then(|i| items.get(i).copied())
        .map(Some)
        .ok_or_else(|| format!("{what} index {index} out of bounds"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const QUAD: &str = "\
# unit quad
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
vn 0 0 1
f 1/1/1 2/2/1 3/3/1 4/4/1
";

    #[test]
    fn test_quad_is_fan_triangulated() {
        let model = ObjLoader::parse(Cursor::new(QUAD), Path::new("quad.obj")).unwrap();
        assert_eq!(model.triangle_count(), 2);
        assert_eq!(model.corners[0].position, [0.0, 0.0, 0.0]);
        assert_eq!(model.corners[3].position, [0.0, 0.0, 0.0]);
        assert_eq!(model.corners[5].position, [0.0, 1.0, 0.0]);
        assert_eq!(model.corners[1].normal, [0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_v_coordinate_is_flipped() {
        let model = ObjLoader::parse(Cursor::new(QUAD), Path::new("quad.obj")).unwrap();
        assert_eq!(model.corners[0].tex_coord, [0.0, 1.0]);
        assert_eq!(model.corners[2].tex_coord, [1.0, 0.0]);
    }

    #[test]
    fn test_negative_indices() {
        let text = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf -3 -2 -1\n";
        let model = ObjLoader::parse(Cursor::new(text), Path::new("neg.obj")).unwrap();
        assert_eq!(model.corners[1].position, [1.0, 0.0, 0.0]);
        assert_eq!(model.corners[1].normal, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_out_of_bounds_index_reports_line() {
        let text = "v 0 0 0\nv 1 0 0\nf 1 2 7\n";
        let err = ObjLoader::parse(Cursor::new(text), Path::new("bad.obj")).unwrap_err();
        match err {
            AssetError::Parse { line, path, .. } => {
                assert_eq!(line, 3);
                assert_eq!(path, Path::new("bad.obj"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_model_is_rejected() {
        let err = ObjLoader::parse(Cursor::new("v 0 0 0\n"), Path::new("empty.obj")).unwrap_err();
        assert!(matches!(err, AssetError::Decode { .. }));
    }
}
