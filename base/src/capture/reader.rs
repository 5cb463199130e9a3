use crate::capture::{
    decode_camera, decode_chunk, decode_depth, parse_camera_list,
    CameraRecord, ChunkRecord, SessionLayout,
};
use crate::defs::Result;
use crate::util::fs;

pub struct CaptureReader {
    layout: SessionLayout,
}

impl CaptureReader {
    pub fn new(layout: SessionLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &SessionLayout {
        &self.layout
    }

    pub fn count_cameras(&self) -> usize {
        (0..).take_while(|&i| self.layout.camera_path(i).is_file()).count()
    }

    pub fn count_chunks(&self) -> usize {
        (0..).take_while(|&i| self.layout.chunk_path(i).is_file()).count()
    }

    pub fn read_camera(&self, index: usize) -> Result<CameraRecord> {
        let path = self.layout.camera_path(index);
        decode_camera(&fs::read_file(&path)?)
    }

    pub fn read_depth(&self, index: usize) -> Result<Vec<f32>> {
        let path = self.layout.depth_path(index);
        decode_depth(&fs::read_file(&path)?)
    }

    pub fn read_chunk(&self, index: usize) -> Result<ChunkRecord> {
        let path = self.layout.chunk_path(index);
        decode_chunk(&fs::read_file(&path)?)
    }

    // A chunk without a companion list may be seen by any camera.
    pub fn read_chunk_cameras(
        &self,
        index: usize,
    ) -> Result<Option<Vec<usize>>> {
        let path = self.layout.chunk_cameras_path(index);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(parse_camera_list(&fs::read_file_to_string(&path)?)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::ErrorKind::*;

    #[test]
    fn test_read_session() {
        let root = std::env::temp_dir()
            .join(format!("capture-reader-{}", std::process::id()));
        let layout = SessionLayout::new(&root, "session");
        fs::create_dir(layout.dir().join("chunks")).unwrap();
        fs::create_dir(layout.dir().join("cameras")).unwrap();

        let chunk = r#"{
            "vertices": [[0, 0, 0], [1, 0, 0], [0, 1, 0]],
            "normals": [[0, 0, 1], [0, 0, 1], [0, 0, 1]],
            "faces": [[0, 1, 2]],
            "transform": [[1,0,0,0],[0,1,0,0],[0,0,1,0],[0,0,0,1]]
        }"#;
        fs::write_file(layout.chunk_path(0), chunk.as_bytes()).unwrap();
        fs::write_file(layout.chunk_path(1), chunk.as_bytes()).unwrap();
        fs::write_file(layout.chunk_path(3), chunk.as_bytes()).unwrap();
        fs::write_file(layout.chunk_cameras_path(1), b"4\n2\n").unwrap();

        let reader = CaptureReader::new(layout);
        assert_eq!(reader.count_chunks(), 2);
        assert_eq!(reader.count_cameras(), 0);
        assert_eq!(reader.read_chunk(0).unwrap().faces, vec![[0, 1, 2]]);
        assert_eq!(reader.read_chunk_cameras(0).unwrap(), None);
        assert_eq!(reader.read_chunk_cameras(1).unwrap(), Some(vec![3, 1]));

        let err = reader.read_camera(0).unwrap_err();
        assert_eq!(err.kind, IoError);

        std::fs::remove_dir_all(&root).unwrap();
    }
}
