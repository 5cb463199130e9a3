use std::sync::atomic::{AtomicU32, Ordering};

use base::capture::{DEPTH_HEIGHT, DEPTH_WIDTH};

use crate::mesh::{
    is_unresolved, unresolved, Matrix4, Point3, Vector2, Vector3, Vector4,
};

// Scalar inputs shared by every face of one dispatch.
#[derive(Clone, Copy, Debug)]
pub struct KernelUniforms {
    pub transform: Matrix4,
    pub face_count: u32,
    pub camera_count: u32,
    pub candidate_count: u32,
    pub depth_width: u32,
    pub depth_height: u32,
    pub grid_cols: u32,
    pub grid_rows: u32,
    pub screen_width: f32,
    pub screen_height: f32,
    pub depth_tolerance: f32,
}

impl KernelUniforms {
    pub fn depth_samples(&self) -> usize {
        (self.depth_width * self.depth_height) as usize
    }

    pub fn grid_cells(&self) -> usize {
        (self.grid_cols * self.grid_rows) as usize
    }

    // Per-candidate match counters followed by the coverage grid.
    pub fn counter_count(&self) -> usize {
        self.candidate_count as usize + self.grid_cells()
    }
}

impl Default for KernelUniforms {
    fn default() -> Self {
        Self {
            transform: Matrix4::identity(),
            face_count: 0,
            camera_count: 0,
            candidate_count: 0,
            depth_width: DEPTH_WIDTH as u32,
            depth_height: DEPTH_HEIGHT as u32,
            grid_cols: 1,
            grid_rows: 1,
            screen_width: 1.0,
            screen_height: 1.0,
            depth_tolerance: 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CornerRecord {
    pub position: Point3,
    pub normal: Vector3,
    pub texcoord: Vector2,
    pub face: u32,
}

pub struct KernelBuffers<'a> {
    pub uniforms: &'a KernelUniforms,
    pub vertices: &'a [Point3],
    pub normals: &'a [Vector3],
    pub faces: &'a [u32],
    pub cameras: &'a [Matrix4],
    pub depths: &'a [f32],
    pub candidates: &'a [u32], // Context slots in priority order.
}

impl<'a> KernelBuffers<'a> {
    // Texture coordinate of a world point as seen by the camera in the
    // given slot, or None if it is clipped, off screen or occluded.
    pub fn project(&self, camera: usize, world: &Vector4) -> Option<Vector2> {
        let u = self.uniforms;
        let clip = self.cameras[camera] * world;

        if clip.w <= 0.0 || clip.z < -clip.w {
            return None;
        }
        if clip.x < -clip.w
            || clip.x > clip.w
            || clip.y < -clip.w
            || clip.y > clip.w
        {
            return None;
        }

        let screen_x = (clip.x / clip.w + 1.0) * 0.5 * u.screen_width;
        let screen_y = (1.0 - clip.y / clip.w) * 0.5 * u.screen_height;
        if screen_x < 0.0
            || screen_x > u.screen_width
            || screen_y < 0.0
            || screen_y > u.screen_height
        {
            return None;
        }

        let col = ((screen_x / u.screen_width * u.depth_width as f32) as u32)
            .min(u.depth_width - 1);
        let row = ((screen_y / u.screen_height * u.depth_height as f32) as u32)
            .min(u.depth_height - 1);
        let stored = self.depths[camera * u.depth_samples()
            + (row * u.depth_width + col) as usize];

        // Written negated so that a NaN sample never passes.
        if !(clip.w <= stored + u.depth_tolerance) {
            return None;
        }

        Some(Vector2::new(
            screen_x / u.screen_width,
            screen_y / u.screen_height,
        ))
    }

    // First candidate that sees the point wins.
    pub fn resolve(&self, world: &Vector4) -> Option<(usize, Vector2)> {
        self.candidates.iter().enumerate().find_map(|(i, &camera)| {
            self.project(camera as usize, world).map(|t| (i, t))
        })
    }

    pub fn assign_face(
        &self,
        face: usize,
        counters: &[AtomicU32],
    ) -> [CornerRecord; 3] {
        let u = self.uniforms;
        [0, 1, 2].map(|k| {
            let slot = face * 3 + k;
            let vertex = self.faces[slot] as usize;
            let position = self.vertices[vertex];
            let world = u.transform * position.to_homogeneous();

            // A match landing on the sentinel reads back as unresolved, so
            // it is not counted either.
            let texcoord = match self.resolve(&world) {
                Some((candidate, texcoord)) if !is_unresolved(&texcoord) => {
                    counters[candidate].fetch_add(1, Ordering::Relaxed);
                    let cell = coverage_cell(u, &texcoord);
                    counters[u.candidate_count as usize + cell]
                        .fetch_add(1, Ordering::Relaxed);
                    texcoord
                }
                _ => unresolved(),
            };

            CornerRecord {
                position,
                normal: self.normals[vertex],
                texcoord,
                face: slot as u32,
            }
        })
    }
}

pub fn coverage_cell(uniforms: &KernelUniforms, texcoord: &Vector2) -> usize {
    let col = ((texcoord.x * uniforms.grid_cols as f32) as u32)
        .min(uniforms.grid_cols - 1);
    let row = ((texcoord.y * uniforms.grid_rows as f32) as u32)
        .min(uniforms.grid_rows - 1);
    (row * uniforms.grid_cols + col) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use base::assert_eq_f32;
    use base::capture::DEPTH_SAMPLES;

    fn new_uniforms(candidate_count: u32) -> KernelUniforms {
        KernelUniforms {
            face_count: 1,
            camera_count: 1,
            candidate_count,
            grid_cols: 4,
            grid_rows: 2,
            screen_width: 200.0,
            screen_height: 100.0,
            depth_tolerance: 0.1,
            ..Default::default()
        }
    }

    fn single_camera_buffers<'a>(
        uniforms: &'a KernelUniforms,
        cameras: &'a [Matrix4],
        depths: &'a [f32],
    ) -> KernelBuffers<'a> {
        KernelBuffers {
            uniforms,
            vertices: &[],
            normals: &[],
            faces: &[],
            cameras,
            depths,
            candidates: &[0],
        }
    }

    #[test]
    fn test_project_identity_camera() {
        let uniforms = new_uniforms(1);
        let cameras = [Matrix4::identity()];
        let depths = vec![1.0; DEPTH_SAMPLES];
        let buffers = single_camera_buffers(&uniforms, &cameras, &depths);

        let point = Vector4::new(0.5, 0.5, 0.0, 1.0);
        let texcoord = buffers.project(0, &point).unwrap();
        assert_eq_f32!(texcoord.x, 0.75);
        assert_eq_f32!(texcoord.y, 0.25);

        // Outside the clip volume.
        assert!(buffers.project(0, &Vector4::new(1.5, 0.0, 0.0, 1.0)).is_none());
        assert!(buffers.project(0, &Vector4::new(0.0, 0.0, -2.0, 1.0)).is_none());
        assert!(buffers.project(0, &Vector4::new(0.0, 0.0, 0.0, -1.0)).is_none());

        // Behind the stored surface, but within the tolerance.
        assert!(buffers.project(0, &Vector4::new(0.0, 0.0, 0.0, 1.05)).is_some());
        assert!(buffers.project(0, &Vector4::new(0.0, 0.0, 0.0, 1.2)).is_none());
    }

    #[test]
    fn test_project_reads_matching_depth_cell() {
        let uniforms = new_uniforms(1);
        let cameras = [Matrix4::identity()];
        let mut depths = vec![0.0; DEPTH_SAMPLES];
        // Top-right corner of the screen.
        depths[DEPTH_WIDTH - 1] = 5.0;

        let top_right = Vector4::new(1.0, 1.0, 0.0, 1.0);
        let top_left = Vector4::new(-1.0, 1.0, 0.0, 1.0);
        {
            let buffers = single_camera_buffers(&uniforms, &cameras, &depths);
            let texcoord = buffers.project(0, &top_right).unwrap();
            assert_eq_f32!(texcoord.x, 1.0);
            assert_eq_f32!(texcoord.y, 0.0);
            assert!(buffers.project(0, &top_left).is_none());
        }

        depths[DEPTH_WIDTH - 1] = f32::NAN;
        let buffers = single_camera_buffers(&uniforms, &cameras, &depths);
        assert!(buffers.project(0, &top_right).is_none());
    }

    #[test]
    fn test_assign_face_counts_matches() {
        let uniforms = new_uniforms(2);
        let mut far = Matrix4::identity();
        far[(3, 3)] = 3.0;
        let cameras = [far, Matrix4::identity()];
        let depths = vec![1.0; 2 * DEPTH_SAMPLES];
        let vertices = [
            Point3::new(-0.5, 0.5, 0.0),
            Point3::new(0.5, 0.5, 0.0),
            Point3::new(0.5, -0.5, 0.0),
        ];
        let normals = [Vector3::z(); 3];
        let counters: Vec<_> =
            (0..uniforms.counter_count()).map(|_| AtomicU32::new(0)).collect();
        let buffers = KernelBuffers {
            uniforms: &uniforms,
            vertices: &vertices,
            normals: &normals,
            faces: &[0, 1, 2, 2, 1, 0],
            cameras: &cameras,
            depths: &depths,
            candidates: &[0, 1],
        };

        let corners = buffers.assign_face(1, &counters);
        assert_eq!(corners[0].face, 3);
        assert_eq!(corners[2].face, 5);
        assert_eq!(corners[0].position, vertices[2]);
        assert_eq!(corners[1].normal, Vector3::z());
        assert_eq_f32!(corners[0].texcoord.x, 0.75);
        assert_eq_f32!(corners[0].texcoord.y, 0.75);

        // The first candidate is occluded everywhere.
        let counts: Vec<_> =
            counters.iter().map(|c| c.load(Ordering::Relaxed)).collect();
        assert_eq!(&counts[..2], &[0, 3]);
        assert_eq!(counts[2..].iter().sum::<u32>(), 3);
        // Cells (3, 1), (3, 0) and (1, 0).
        assert_eq!(counts[2 + 7], 1);
        assert_eq!(counts[2 + 3], 1);
        assert_eq!(counts[2 + 1], 1);
    }

    #[test]
    fn test_match_on_sentinel_is_not_counted() {
        let uniforms = new_uniforms(1);
        let cameras = [Matrix4::identity()];
        let depths = vec![1.0; DEPTH_SAMPLES];
        // The first vertex projects to the top-left corner of the screen.
        let vertices = [
            Point3::new(-1.0, 1.0, 0.0),
            Point3::new(0.5, 0.5, 0.0),
            Point3::new(0.0, 0.0, 0.0),
        ];
        let normals = [Vector3::z(); 3];
        let counters: Vec<_> =
            (0..uniforms.counter_count()).map(|_| AtomicU32::new(0)).collect();
        let buffers = KernelBuffers {
            uniforms: &uniforms,
            vertices: &vertices,
            normals: &normals,
            faces: &[0, 1, 2],
            cameras: &cameras,
            depths: &depths,
            candidates: &[0],
        };

        let corners = buffers.assign_face(0, &counters);
        assert!(is_unresolved(&corners[0].texcoord));
        assert!(!is_unresolved(&corners[1].texcoord));
        assert!(!is_unresolved(&corners[2].texcoord));

        let counts: Vec<_> =
            counters.iter().map(|c| c.load(Ordering::Relaxed)).collect();
        assert_eq!(counts[0], 2);
        assert_eq!(counts[1..].iter().sum::<u32>(), 2);
    }

    #[test]
    fn test_coverage_cell_clamps_edges() {
        let uniforms = new_uniforms(0);
        assert_eq!(coverage_cell(&uniforms, &Vector2::new(0.0, 0.0)), 0);
        assert_eq!(coverage_cell(&uniforms, &Vector2::new(1.0, 1.0)), 7);
        assert_eq!(coverage_cell(&uniforms, &Vector2::new(0.3, 0.6)), 5);
    }
}
