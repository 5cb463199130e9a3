use std::io::Write;

use base::capture::{CaptureReader, DEPTH_SAMPLES};
use base::defs::{Error, ErrorKind::*, IntoResult, Result};
use log::debug;

use crate::mesh::{Matrix4, Point3};

#[derive(Clone, Copy, Debug)]
pub struct CameraPose {
    pub view: Matrix4,
    pub projection: Matrix4,
    pub position: Point3,
}

#[derive(Clone, Debug)]
pub struct DepthMap {
    samples: Vec<f32>,
}

impl DepthMap {
    pub fn new(samples: Vec<f32>) -> Result<Self> {
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
        Ok(Self { samples })
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }
}

pub trait CameraSource {
    fn camera_pose(&self, index: usize) -> Result<CameraPose>;
    fn depth_map(&self, index: usize) -> Result<DepthMap>;
}

impl CameraSource for CaptureReader {
    fn camera_pose(&self, index: usize) -> Result<CameraPose> {
        let record = self.read_camera(index)?;
        Ok(CameraPose {
            view: Matrix4::from(record.view_matrix),
            projection: Matrix4::from(record.projection_matrix),
            position: Point3::from(record.camera_position),
        })
    }

    fn depth_map(&self, index: usize) -> Result<DepthMap> {
        DepthMap::new(self.read_depth(index)?)
    }
}

// Per-session camera data, indexed by slot. Slot order follows ascending
// session camera indices with excluded cameras left out.
#[derive(Clone, Debug, Default)]
pub struct ProjectionContext {
    pub camera_count: usize,
    pub camera_ids: Vec<usize>,
    pub view_projections: Vec<Matrix4>,
    pub depth_samples: Vec<f32>,
    pub camera_distances: Vec<f32>,
}

impl ProjectionContext {
    pub fn len(&self) -> usize {
        self.camera_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.camera_ids.is_empty()
    }

    pub fn slot_of(&self, camera: usize) -> Option<usize> {
        self.camera_ids.binary_search(&camera).ok()
    }

    pub fn validate(&self) -> Result<()> {
        let len = self.len();
        if self.view_projections.len() != len {
            return Err(Error::new(
                Configuration,
                format!(
                    "projection context has {} matrices for {} cameras",
                    self.view_projections.len(),
                    len
                ),
            ));
        }
        if self.depth_samples.len() != len * DEPTH_SAMPLES {
            return Err(Error::new(
                Configuration,
                format!(
                    "projection context has {} depth samples for {} cameras",
                    self.depth_samples.len(),
                    len
                ),
            ));
        }
        if self.camera_ids.windows(2).any(|w| w[0] >= w[1])
            || self.camera_ids.iter().any(|&id| id >= self.camera_count)
        {
            return Err(Error::new(
                Configuration,
                "projection context has unordered camera indices".to_string(),
            ));
        }
        Ok(())
    }

    pub fn write_positions(&self, writer: &mut dyn Write) -> Result<()> {
        for (id, dist) in self.camera_ids.iter().zip(&self.camera_distances) {
            writeln!(writer, "{} : {}", id, dist)
                .res(|| "failed to write camera positions".to_string())?;
        }
        Ok(())
    }
}

pub fn build_projection_context(
    source: &dyn CameraSource,
    camera_count: usize,
    excluded: &[usize],
) -> Result<ProjectionContext> {
    let mut context = ProjectionContext {
        camera_count,
        ..Default::default()
    };

    for i in 0..camera_count {
        if excluded.contains(&i) {
            debug!("  skipping excluded camera {}", i);
            continue;
        }

        let with_camera = |e: Error| e.context(&format!("camera {}", i));
        let pose = source.camera_pose(i).map_err(with_camera)?;
        let depth = source.depth_map(i).map_err(with_camera)?;

        let dist = pose.position.coords.norm();
        debug!("  camera {} is {:.3} m from origin", i, dist);

        context.camera_ids.push(i);
        context.view_projections.push(pose.projection * pose.view);
        context.depth_samples.extend_from_slice(depth.samples());
        context.camera_distances.push(dist);
    }

    Ok(context)
}
