// SPDX-License-Identifier: CEPL-1.0
//! The single draw batch and the loader that fills it.
//!
//! Every sub-mesh of an imported scene is baked into world space and appended
//! to one set of parallel vertex streams plus one `u32` index stream. Indices
//! of each sub-mesh are shifted by the number of vertices already in the
//! batch, so the whole scene is drawn with a single indexed draw.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use glam::{Mat3, Mat4, Vec3};
use lumen_core::{read_blob, BlobError};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_VERTEX_COLOR: [f32; 4] = [0.36, 0.36, 0.5, 1.0];

#[derive(Debug, Error)]
pub enum MeshError {
    #[error(transparent)]
    Read(#[from] BlobError),
    #[error("failed to parse mesh {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: tobj::LoadError,
    },
    #[error("mesh {} contains no triangles", .0.display())]
    Empty(PathBuf),
    #[error("index {index} out of range for a mesh of {vertices} vertices")]
    IndexOutOfRange { index: u32, vertices: usize },
    #[error("sub-mesh has {positions} positions but {other} {stream}")]
    StreamMismatch {
        positions: usize,
        other: usize,
        stream: &'static str,
    },
}

/// Vertex streams and indices uploaded once and drawn every frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Batch {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub colors: Vec<[f32; 4]>,
    pub indices: Vec<u32>,
}

impl Batch {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Bakes `mesh` by `transform` and appends it, offsetting its indices.
    pub fn append(&mut self, mesh: &SubMesh, transform: Mat4) -> Result<(), MeshError> {
        mesh.validate()?;

        let base = self.positions.len() as u32;
        let normal_matrix = Mat3::from_mat4(transform).inverse().transpose();
        let generated;
        let normals = match &mesh.normals {
            Some(n) => n.as_slice(),
            None => {
                generated = smooth_normals(&mesh.positions, &mesh.indices);
                generated.as_slice()
            }
        };

        self.positions.extend(
            mesh.positions
                .iter()
                .map(|&p| transform.transform_point3(Vec3::from(p)).to_array()),
        );
        self.normals.extend(
            normals
                .iter()
                .map(|&n| (normal_matrix * Vec3::from(n)).normalize_or_zero().to_array()),
        );
        match &mesh.colors {
            Some(c) => self.colors.extend_from_slice(c),
            None => self
                .colors
                .extend(std::iter::repeat(DEFAULT_VERTEX_COLOR).take(mesh.positions.len())),
        }
        self.indices.extend(mesh.indices.iter().map(|&i| base + i));
        Ok(())
    }
}

/// Triangulated geometry in the local space of its node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubMesh {
    pub positions: Vec<[f32; 3]>,
    /// Generated from the triangles when absent.
    pub normals: Option<Vec<[f32; 3]>>,
    /// Filled with [`DEFAULT_VERTEX_COLOR`] when absent.
    pub colors: Option<Vec<[f32; 4]>>,
    pub indices: Vec<u32>,
}

impl SubMesh {
    fn validate(&self) -> Result<(), MeshError> {
        let positions = self.positions.len();
        if let Some(n) = &self.normals {
            if n.len() != positions {
                return Err(MeshError::StreamMismatch {
                    positions,
                    other: n.len(),
                    stream: "normals",
                });
            }
        }
        if let Some(c) = &self.colors {
            if c.len() != positions {
                return Err(MeshError::StreamMismatch {
                    positions,
                    other: c.len(),
                    stream: "colors",
                });
            }
        }
        if let Some(&index) = self.indices.iter().find(|&&i| i as usize >= positions) {
            return Err(MeshError::IndexOutOfRange { index, vertices: positions });
        }
        Ok(())
    }
}

/// One node of an imported scene hierarchy.
#[derive(Clone, Debug)]
pub struct MeshNode {
    /// Relative to the parent node.
    pub transform: Mat4,
    pub meshes: Vec<SubMesh>,
    pub children: Vec<MeshNode>,
}

impl Default for MeshNode {
    fn default() -> Self {
        Self {
            transform: Mat4::IDENTITY,
            meshes: Vec::new(),
            children: Vec::new(),
        }
    }
}

/// Source files are Z-up; the renderer is Y-up.
pub fn import_rotation() -> Mat4 {
    Mat4::from_rotation_x(-std::f32::consts::FRAC_PI_2)
}

/// Flattens `root` depth-first into one batch. `base` is applied on top of
/// every node's world transform.
pub fn flatten(root: &MeshNode, base: Mat4) -> Result<Batch, MeshError> {
    let mut batch = Batch::default();
    flatten_into(&mut batch, root, base)?;
    Ok(batch)
}

fn flatten_into(batch: &mut Batch, node: &MeshNode, parent: Mat4) -> Result<(), MeshError> {
    let world = parent * node.transform;
    for mesh in &node.meshes {
        batch.append(mesh, world)?;
    }
    for child in &node.children {
        flatten_into(batch, child, world)?;
    }
    Ok(())
}

/// Area-weighted vertex normals from the triangle list.
fn smooth_normals(positions: &[[f32; 3]], indices: &[u32]) -> Vec<[f32; 3]> {
    let mut acc = vec![Vec3::ZERO; positions.len()];
    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        let (pa, pb, pc) = (
            Vec3::from(positions[a]),
            Vec3::from(positions[b]),
            Vec3::from(positions[c]),
        );
        let face = (pb - pa).cross(pc - pa);
        acc[a] += face;
        acc[b] += face;
        acc[c] += face;
    }
    acc.into_iter()
        .map(|n| n.normalize_or_zero().to_array())
        .collect()
}

/// Loads a Wavefront OBJ file into a single draw batch.
///
/// Faces are triangulated and positions, normals and texture coordinates are
/// merged into one index stream. Each OBJ object becomes a node under an
/// identity root, and the whole scene is rotated from Z-up into Y-up.
pub fn load_obj(path: impl AsRef<Path>) -> Result<Batch, MeshError> {
    let path = path.as_ref();
    let bytes = read_blob(path)?;
    let root = parse_obj(&bytes, path)?;
    let batch = flatten(&root, import_rotation())?;
    if batch.is_empty() {
        return Err(MeshError::Empty(path.to_path_buf()));
    }
    info!(
        "mesh {}: {} vertices, {} triangles",
        path.display(),
        batch.vertex_count(),
        batch.indices.len() / 3
    );
    Ok(batch)
}

fn parse_obj(bytes: &[u8], path: &Path) -> Result<MeshNode, MeshError> {
    let opts = tobj::LoadOptions {
        single_index: true,
        triangulate: true,
        ..Default::default()
    };
    // Materials are not used; a missing .mtl is not an error.
    let (models, materials) = tobj::load_obj_buf(&mut Cursor::new(bytes), &opts, |_| {
        Err(tobj::LoadError::OpenFileFailed)
    })
    .map_err(|source| MeshError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    if let Err(e) = materials {
        debug!("{}: materials skipped ({e})", path.display());
    }

    let mut root = MeshNode::default();
    for model in models {
        let m = model.mesh;
        let positions: Vec<[f32; 3]> = m
            .positions
            .chunks_exact(3)
            .map(|p| [p[0], p[1], p[2]])
            .collect();
        let normals = (m.normals.len() == m.positions.len())
            .then(|| m.normals.chunks_exact(3).map(|n| [n[0], n[1], n[2]]).collect());
        let colors = (m.vertex_color.len() == m.positions.len()).then(|| {
            m.vertex_color
                .chunks_exact(3)
                .map(|c| [c[0], c[1], c[2], 1.0])
                .collect()
        });
        if normals.is_none() {
            debug!("{}: object '{}' has no normals, generating", path.display(), model.name);
        }
        if m.indices.is_empty() {
            warn!("{}: object '{}' has no faces", path.display(), model.name);
            continue;
        }
        root.children.push(MeshNode {
            meshes: vec![SubMesh {
                positions,
                normals,
                colors,
                indices: m.indices,
            }],
            ..Default::default()
        });
    }
    Ok(root)
}
