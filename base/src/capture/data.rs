use serde::{Deserialize, Serialize};

use crate::capture::DEPTH_SAMPLES;
use crate::defs::{Error, ErrorKind::*, IntoResult, Result};

// Matrices are stored as four columns.
pub type Columns4 = [[f32; 4]; 4];

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CameraRecord {
    pub view_matrix: Columns4,
    pub projection_matrix: Columns4,
    pub camera_position: [f32; 3],
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ChunkRecord {
    pub vertices: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub faces: Vec<[u32; 3]>,
    pub transform: Columns4,
}

pub fn decode_camera(data: &[u8]) -> Result<CameraRecord> {
    serde_json::from_slice(data)
        .res_as(MalformedData, || "failed to decode camera record".to_string())
}

pub fn decode_depth(data: &[u8]) -> Result<Vec<f32>> {
    let samples: Vec<f32> = serde_json::from_slice(data)
        .res_as(MalformedData, || "failed to decode depth grid".to_string())?;
    if samples.len() != DEPTH_SAMPLES {
        return Err(Error::new(
            MalformedData,
            format!(
                "depth grid has {} samples instead of {}",
                samples.len(),
                DEPTH_SAMPLES
            ),
        ));
    }
    Ok(samples)
}

pub fn decode_chunk(data: &[u8]) -> Result<ChunkRecord> {
    serde_json::from_slice(data)
        .res_as(MalformedData, || "failed to decode chunk record".to_string())
}

// The companion list is 1-based, one camera per line.
pub fn parse_camera_list(text: &str) -> Result<Vec<usize>> {
    let mut cameras = Vec::new();
    for (num, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let malformed_err = || {
            Error::new(
                MalformedData,
                format!("malformed camera number '{}' at line {}", line, num + 1),
            )
        };
        let index = line.parse::<usize>().map_err(|_| malformed_err())?;
        if index == 0 {
            return Err(malformed_err());
        }
        cameras.push(index - 1);
    }
    Ok(cameras)
}
