use base::capture::{ChunkBuffers, ChunkRecord};
use base::defs::{Error, ErrorKind::*, Result};

pub type Point3 = nalgebra::Point3<f32>;
pub type Vector2 = nalgebra::Vector2<f32>;
pub type Vector3 = nalgebra::Vector3<f32>;
pub type Vector4 = nalgebra::Vector4<f32>;
pub type Matrix4 = nalgebra::Matrix4<f32>;

// Texture coordinate of a corner no camera could see.
pub fn unresolved() -> Vector2 {
    Vector2::new(0.0, 0.0)
}

pub fn is_unresolved(texcoord: &Vector2) -> bool {
    texcoord.x == 0.0 && texcoord.y == 0.0
}

#[derive(Clone, Debug)]
pub struct MeshChunk {
    pub vertices: Vec<Point3>,
    pub normals: Vec<Vector3>,
    pub faces: Vec<[u32; 3]>,
    pub transform: Matrix4,
    pub cameras: Option<Vec<usize>>, // Cameras known to see this chunk.
}

impl MeshChunk {
    pub fn from_record(record: ChunkRecord, cameras: Option<Vec<usize>>) -> Self {
        Self {
            vertices: record.vertices.into_iter().map(Point3::from).collect(),
            normals: record.normals.into_iter().map(Vector3::from).collect(),
            faces: record.faces,
            transform: Matrix4::from(record.transform),
            cameras,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.normals.len() != self.vertices.len() {
            return Err(Error::new(
                MalformedData,
                format!(
                    "{} normals for {} vertices",
                    self.normals.len(),
                    self.vertices.len()
                ),
            ));
        }

        for (i, face) in self.faces.iter().enumerate() {
            if let Some(&v) =
                face.iter().find(|&&v| v as usize >= self.vertices.len())
            {
                return Err(Error::new(
                    MalformedData,
                    format!("face {} refers to missing vertex {}", i, v),
                ));
            }
        }

        Ok(())
    }
}

// Every corner of every face owns its vertex, normal and texture coordinate.
#[derive(Clone, Debug)]
pub struct ExpandedMesh {
    pub vertices: Vec<Point3>,
    pub normals: Vec<Vector3>,
    pub faces: Vec<u32>,
    pub texcoords: Vec<Vector2>,
    pub transform: Matrix4,
}

impl ExpandedMesh {
    pub fn face_count(&self) -> usize {
        self.faces.len() / 3
    }

    pub fn unresolved_corners(&self) -> usize {
        self.texcoords.iter().filter(|t| is_unresolved(t)).count()
    }

    pub fn to_buffers(&self) -> ChunkBuffers {
        ChunkBuffers {
            vertices: self.vertices.iter().map(|v| [v.x, v.y, v.z]).collect(),
            normals: self.normals.iter().map(|n| [n.x, n.y, n.z]).collect(),
            faces: self.faces.clone(),
            texcoords: self.texcoords.iter().map(|t| [t.x, t.y]).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_chunk() -> MeshChunk {
        MeshChunk {
            vertices: vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            normals: vec![Vector3::z(); 3],
            faces: vec![[0, 1, 2]],
            transform: Matrix4::identity(),
            cameras: None,
        }
    }

    #[test]
    fn test_validate_chunk() {
        assert!(new_chunk().validate().is_ok());

        let mut chunk = new_chunk();
        chunk.faces.push([0, 2, 3]);
        let err = chunk.validate().unwrap_err();
        assert_eq!(err.kind, MalformedData);
        assert_eq!(&err.description, "face 1 refers to missing vertex 3");

        let mut chunk = new_chunk();
        chunk.normals.pop();
        let err = chunk.validate().unwrap_err();
        assert_eq!(&err.description, "2 normals for 3 vertices");
    }

    #[test]
    fn test_from_record_keeps_column_order() {
        let record = ChunkRecord {
            vertices: vec![[1.0, 2.0, 3.0]],
            normals: vec![[0.0, 1.0, 0.0]],
            faces: vec![],
            transform: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [5.0, 6.0, 7.0, 1.0],
            ],
        };
        let chunk = MeshChunk::from_record(record, Some(vec![2]));
        let moved = chunk.transform.transform_point(&chunk.vertices[0]);
        assert_eq!(moved, Point3::new(6.0, 8.0, 10.0));
        assert_eq!(chunk.cameras, Some(vec![2]));
    }

    #[test]
    fn test_unresolved_corners() {
        let mesh = ExpandedMesh {
            vertices: vec![Point3::origin(); 3],
            normals: vec![Vector3::z(); 3],
            faces: vec![0, 1, 2],
            texcoords: vec![
                unresolved(),
                Vector2::new(0.5, 0.0),
                Vector2::new(-0.0, 0.0),
            ],
            transform: Matrix4::identity(),
        };
        assert_eq!(mesh.face_count(), 1);
        assert_eq!(mesh.unresolved_corners(), 2);
        assert_eq!(mesh.to_buffers().texcoords[1], [0.5, 0.0]);
    }
}
