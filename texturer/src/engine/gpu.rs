use std::mem;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base::defs::{Error, ErrorKind::*, Result};
use bytemuck::{Pod, Zeroable};
use log::info;
use wgpu::util::DeviceExt;

use crate::engine::kernel::{CornerRecord, KernelUniforms};
use crate::engine::{
    ComputeBackend, DispatchInput, DispatchOutput, PendingDispatch, Permit,
};
use crate::mesh::{Point3, Vector2, Vector3};
use crate::params::KernelVariant;

const WORKGROUP_SIZE: u32 = 64;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct GpuUniforms {
    transform: [[f32; 4]; 4],
    face_count: u32,
    camera_count: u32,
    candidate_count: u32,
    depth_width: u32,
    depth_height: u32,
    grid_cols: u32,
    grid_rows: u32,
    _pad0: u32,
    screen_width: f32,
    screen_height: f32,
    depth_tolerance: f32,
    _pad1: f32,
}

impl From<&KernelUniforms> for GpuUniforms {
    fn from(u: &KernelUniforms) -> Self {
        Self {
            transform: u.transform.into(),
            face_count: u.face_count,
            camera_count: u.camera_count,
            candidate_count: u.candidate_count,
            depth_width: u.depth_width,
            depth_height: u.depth_height,
            grid_cols: u.grid_cols,
            grid_rows: u.grid_rows,
            _pad0: 0,
            screen_width: u.screen_width,
            screen_height: u.screen_height,
            depth_tolerance: u.depth_tolerance,
            _pad1: 0.0,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct GpuCorner {
    position: [f32; 4],
    normal: [f32; 4],
    texcoord: [f32; 2],
    face: u32,
    _pad: u32,
}

impl GpuCorner {
    fn to_record(self) -> CornerRecord {
        CornerRecord {
            position: Point3::new(
                self.position[0],
                self.position[1],
                self.position[2],
            ),
            normal: Vector3::new(self.normal[0], self.normal[1], self.normal[2]),
            texcoord: Vector2::new(self.texcoord[0], self.texcoord[1]),
            face: self.face,
        }
    }
}

// Storage bindings may not be empty.
fn padded<T: Pod + Zeroable>(mut items: Vec<T>) -> Vec<T> {
    if items.is_empty() {
        items.push(T::zeroed());
    }
    items
}

fn dispatch_err(desc: &str) -> Error {
    Error::new(DispatchFailure, desc.to_string())
}

pub struct GpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipeline: wgpu::ComputePipeline,
    max_workgroups: u32,
}

impl GpuBackend {
    pub fn new(variant: KernelVariant) -> Result<Self> {
        pollster::block_on(Self::new_async(variant))
    }

    async fn new_async(variant: KernelVariant) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| {
                Error::new(
                    UnsupportedFeature,
                    "no compatible gpu adapter found".to_string(),
                )
            })?;
        info!("using gpu adapter '{}'", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("texturer"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| {
                dispatch_err(&format!("failed to create gpu device: {}", e))
            })?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("texture_kernel"),
            source: wgpu::ShaderSource::Wgsl(TEXTURE_KERNEL.into()),
        });
        let pipeline =
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(variant.entry_point()),
                layout: None,
                module: &shader,
                entry_point: Some(variant.entry_point()),
                compilation_options: Default::default(),
                cache: None,
            });

        Ok(Self {
            max_workgroups: device.limits().max_compute_workgroups_per_dimension,
            device: Arc::new(device),
            queue: Arc::new(queue),
            pipeline,
        })
    }

    fn storage_buffer<T: Pod>(&self, label: &str, items: &[T]) -> wgpu::Buffer {
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(items),
                usage: wgpu::BufferUsages::STORAGE,
            })
    }

    fn output_buffers(
        &self,
        label: &str,
        size: u64,
        init: Option<&[u8]>,
    ) -> (wgpu::Buffer, wgpu::Buffer) {
        let usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC;
        let output = match init {
            Some(contents) => self.device.create_buffer_init(
                &wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents,
                    usage,
                },
            ),
            None => self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage,
                mapped_at_creation: false,
            }),
        };
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        (output, staging)
    }
}

impl ComputeBackend for GpuBackend {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn submit(
        &self,
        input: DispatchInput,
        permit: Permit,
    ) -> Result<Box<dyn PendingDispatch>> {
        let uniforms = &input.uniforms;
        let corner_count = uniforms.face_count as usize * 3;
        let counter_count = uniforms.counter_count();
        if corner_count == 0 {
            return Ok(Box::new(ReadyDispatch(DispatchOutput {
                corners: vec![],
                counters: vec![0; counter_count],
                elapsed: Duration::ZERO,
            })));
        }

        let workgroups = uniforms.face_count.div_ceil(WORKGROUP_SIZE);
        if workgroups > self.max_workgroups {
            return Err(Error::new(
                UnsupportedFeature,
                format!(
                    "{} faces exceed a single gpu dispatch",
                    uniforms.face_count
                ),
            ));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let vertices: Vec<[f32; 4]> = input
            .vertices
            .iter()
            .map(|v| [v.x, v.y, v.z, 1.0])
            .collect();
        let normals: Vec<[f32; 4]> =
            input.normals.iter().map(|n| [n.x, n.y, n.z, 0.0]).collect();
        let cameras: Vec<[[f32; 4]; 4]> = input
            .context
            .view_projections
            .iter()
            .map(|&m| m.into())
            .collect();

        let uniform_buffer =
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("uniforms"),
                    contents: bytemuck::bytes_of(&GpuUniforms::from(uniforms)),
                    usage: wgpu::BufferUsages::UNIFORM,
                });
        let inputs = [
            self.storage_buffer("vertices", &padded(vertices)),
            self.storage_buffer("normals", &padded(normals)),
            self.storage_buffer("faces", &input.faces),
            self.storage_buffer("cameras", &padded(cameras)),
            self.storage_buffer(
                "depths",
                &padded(input.context.depth_samples.clone()),
            ),
            self.storage_buffer("candidates", &padded(input.candidates.clone())),
        ];

        let corners_size = (corner_count * mem::size_of::<GpuCorner>()) as u64;
        let counters_size = (counter_count.max(1) * mem::size_of::<u32>()) as u64;
        let zeros = vec![0u8; counters_size as usize];
        let (corners, corners_staging) =
            self.output_buffers("corners", corners_size, None);
        let (counters, counters_staging) =
            self.output_buffers("counters", counters_size, Some(&zeros));

        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: uniform_buffer.as_entire_binding(),
        }];
        for (i, buffer) in inputs.iter().chain([&corners, &counters]).enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: i as u32 + 1,
                resource: buffer.as_entire_binding(),
            });
        }
        let bind_group =
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("texture_kernel"),
                layout: &self.pipeline.get_bind_group_layout(0),
                entries: &entries,
            });

        let mut encoder =
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("texture_kernel"),
                });
        {
            let mut pass =
                encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("texture_kernel"),
                    timestamp_writes: None,
                });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(workgroups, 1, 1);
        }
        encoder.copy_buffer_to_buffer(
            &corners,
            0,
            &corners_staging,
            0,
            corners_size,
        );
        encoder.copy_buffer_to_buffer(
            &counters,
            0,
            &counters_staging,
            0,
            counters_size,
        );
        let submitted = Instant::now();
        self.queue.submit(std::iter::once(encoder.finish()));
        let (done_sender, done) = mpsc::channel();
        self.queue.on_submitted_work_done(move || {
            let _ = done_sender.send(submitted.elapsed());
            drop(permit);
        });

        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(dispatch_err(&format!(
                "failed to encode dispatch: {}",
                err
            )));
        }

        let map = |buffer: &wgpu::Buffer| {
            let (sender, receiver) = mpsc::channel();
            buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
                let _ = sender.send(result);
            });
            receiver
        };

        Ok(Box::new(GpuPending {
            device: Arc::clone(&self.device),
            corners_mapped: map(&corners_staging),
            counters_mapped: map(&counters_staging),
            corners: corners_staging,
            counters: counters_staging,
            done,
            corner_count,
            counter_count,
        }))
    }
}

struct ReadyDispatch(DispatchOutput);

impl PendingDispatch for ReadyDispatch {
    fn wait(self: Box<Self>) -> Result<DispatchOutput> {
        Ok(self.0)
    }
}

type MapReceiver = Receiver<std::result::Result<(), wgpu::BufferAsyncError>>;

struct GpuPending {
    device: Arc<wgpu::Device>,
    corners: wgpu::Buffer,
    counters: wgpu::Buffer,
    corners_mapped: MapReceiver,
    counters_mapped: MapReceiver,
    done: Receiver<Duration>,
    corner_count: usize,
    counter_count: usize,
}

// The admission permit is released from a device callback, which only runs
// while the device is polled.
impl Drop for GpuPending {
    fn drop(&mut self) {
        let _ = self.device.poll(wgpu::Maintain::Wait);
    }
}

impl PendingDispatch for GpuPending {
    fn wait(self: Box<Self>) -> Result<DispatchOutput> {
        let _ = self.device.poll(wgpu::Maintain::Wait);
        let elapsed = self
            .done
            .recv()
            .map_err(|_| dispatch_err("dispatch completion was dropped"))?;
        for receiver in [&self.corners_mapped, &self.counters_mapped] {
            receiver
                .recv()
                .map_err(|_| dispatch_err("result mapping was dropped"))?
                .map_err(|e| {
                    dispatch_err(&format!("failed to map results: {}", e))
                })?;
        }

        let corners = {
            let data = self.corners.slice(..).get_mapped_range();
            bytemuck::cast_slice::<u8, GpuCorner>(&data)[..self.corner_count]
                .iter()
                .map(|c| c.to_record())
                .collect()
        };
        self.corners.unmap();

        let counters = {
            let data = self.counters.slice(..).get_mapped_range();
            bytemuck::cast_slice::<u8, u32>(&data)[..self.counter_count]
                .to_vec()
        };
        self.counters.unmap();

        Ok(DispatchOutput {
            corners,
            counters,
            elapsed,
        })
    }
}

// Both entry points share one body and differ in how the host consumes
// the result.
const TEXTURE_KERNEL: &str = r"
struct Uniforms {
    transform: mat4x4<f32>,
    face_count: u32,
    camera_count: u32,
    candidate_count: u32,
    depth_width: u32,
    depth_height: u32,
    grid_cols: u32,
    grid_rows: u32,
    _pad0: u32,
    screen_width: f32,
    screen_height: f32,
    depth_tolerance: f32,
    _pad1: f32,
}

struct Corner {
    position: vec4<f32>,
    normal: vec4<f32>,
    texcoord: vec2<f32>,
    face: u32,
    _pad: u32,
}

struct Projection {
    visible: bool,
    texcoord: vec2<f32>,
}

@group(0) @binding(0) var<uniform> uniforms: Uniforms;
@group(0) @binding(1) var<storage, read> vertices: array<vec4<f32>>;
@group(0) @binding(2) var<storage, read> normals: array<vec4<f32>>;
@group(0) @binding(3) var<storage, read> faces: array<u32>;
@group(0) @binding(4) var<storage, read> cameras: array<mat4x4<f32>>;
@group(0) @binding(5) var<storage, read> depths: array<f32>;
@group(0) @binding(6) var<storage, read> candidates: array<u32>;
@group(0) @binding(7) var<storage, read_write> corners: array<Corner>;
@group(0) @binding(8) var<storage, read_write> counters: array<atomic<u32>>;

fn project(camera: u32, world: vec4<f32>) -> Projection {
    var result = Projection(false, vec2<f32>(0.0, 0.0));
    let clip = cameras[camera] * world;
    if (clip.w <= 0.0 || clip.z < -clip.w) {
        return result;
    }
    if (clip.x < -clip.w || clip.x > clip.w || clip.y < -clip.w || clip.y > clip.w) {
        return result;
    }

    let screen_x = (clip.x / clip.w + 1.0) * 0.5 * uniforms.screen_width;
    let screen_y = (1.0 - clip.y / clip.w) * 0.5 * uniforms.screen_height;
    if (screen_x < 0.0 || screen_x > uniforms.screen_width ||
        screen_y < 0.0 || screen_y > uniforms.screen_height) {
        return result;
    }

    let col = min(u32(screen_x / uniforms.screen_width * f32(uniforms.depth_width)),
                  uniforms.depth_width - 1u);
    let row = min(u32(screen_y / uniforms.screen_height * f32(uniforms.depth_height)),
                  uniforms.depth_height - 1u);
    let grid = uniforms.depth_width * uniforms.depth_height;
    let stored = depths[camera * grid + row * uniforms.depth_width + col];
    if (!(clip.w <= stored + uniforms.depth_tolerance)) {
        return result;
    }

    result.visible = true;
    result.texcoord = vec2<f32>(screen_x / uniforms.screen_width,
                                screen_y / uniforms.screen_height);
    return result;
}

fn coverage_cell(texcoord: vec2<f32>) -> u32 {
    let col = min(u32(texcoord.x * f32(uniforms.grid_cols)), uniforms.grid_cols - 1u);
    let row = min(u32(texcoord.y * f32(uniforms.grid_rows)), uniforms.grid_rows - 1u);
    return row * uniforms.grid_cols + col;
}

fn assign_face(face: u32) {
    if (face >= uniforms.face_count) {
        return;
    }
    for (var k = 0u; k < 3u; k++) {
        let slot = face * 3u + k;
        let vi = faces[slot];
        let local = vertices[vi];
        let world = uniforms.transform * vec4<f32>(local.xyz, 1.0);

        var texcoord = vec2<f32>(0.0, 0.0);
        for (var i = 0u; i < uniforms.candidate_count; i++) {
            let projection = project(candidates[i], world);
            if (projection.visible) {
                texcoord = projection.texcoord;
                if (any(texcoord != vec2<f32>(0.0, 0.0))) {
                    atomicAdd(&counters[i], 1u);
                    atomicAdd(&counters[uniforms.candidate_count + coverage_cell(texcoord)], 1u);
                }
                break;
            }
        }

        corners[slot] = Corner(vec4<f32>(local.xyz, 1.0), normals[vi], texcoord, slot, 0u);
    }
}

@compute @workgroup_size(64)
fn select_texture(@builtin(global_invocation_id) id: vec3<u32>) {
    assign_face(id.x);
}

@compute @workgroup_size(64)
fn preview_texture(@builtin(global_invocation_id) id: vec3<u32>) {
    assign_face(id.x);
}
";

#[cfg(test)]
mod tests {
    use super::*;
    use base::assert_eq_f32;
    use base::capture::DEPTH_SAMPLES;

    use crate::engine::{AdmissionGate, CpuBackend};
    use crate::mesh::Matrix4;
    use crate::projection::ProjectionContext;

    #[test]
    fn test_corner_layout() {
        assert_eq!(mem::size_of::<GpuUniforms>(), 112);
        assert_eq!(mem::size_of::<GpuCorner>(), 48);
    }

    #[test]
    #[ignore = "requires GPU"]
    fn test_gpu_matches_cpu() {
        let backend = GpuBackend::new(KernelVariant::SelectTexture).unwrap();
        let context = Arc::new(ProjectionContext {
            camera_count: 1,
            camera_ids: vec![0],
            view_projections: vec![Matrix4::identity()],
            depth_samples: vec![1.0; DEPTH_SAMPLES],
            camera_distances: vec![0.0],
        });
        let input = || DispatchInput {
            uniforms: KernelUniforms {
                face_count: 2,
                camera_count: 1,
                candidate_count: 1,
                grid_cols: 4,
                grid_rows: 4,
                screen_width: 640.0,
                screen_height: 480.0,
                depth_tolerance: 0.05,
                ..Default::default()
            },
            vertices: vec![
                Point3::new(-0.5, -0.5, 0.0),
                Point3::new(0.5, -0.5, 0.0),
                Point3::new(0.5, 0.5, 0.0),
                Point3::new(-2.0, 0.5, 0.0),
            ],
            normals: vec![Vector3::z(); 4],
            faces: vec![0, 1, 2, 0, 2, 3],
            candidates: vec![0],
            context: Arc::clone(&context),
        };

        let gate = AdmissionGate::new(2);
        let gpu = backend.submit(input(), gate.acquire()).unwrap();
        let gpu = gpu.wait().unwrap();
        let cpu = CpuBackend.submit(input(), gate.acquire()).unwrap();
        let cpu = cpu.wait().unwrap();

        assert_eq!(gpu.counters, cpu.counters);
        assert_eq!(gpu.corners.len(), 6);
        for (g, c) in gpu.corners.iter().zip(&cpu.corners) {
            assert_eq!(g.face, c.face);
            assert_eq!(g.position, c.position);
            assert_eq_f32!(g.texcoord.x, c.texcoord.x);
            assert_eq_f32!(g.texcoord.y, c.texcoord.y);
        }
        assert_eq!(gate.in_flight(), 0);
    }
}
