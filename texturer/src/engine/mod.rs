mod cpu;
mod gate;
#[cfg(feature = "gpu")]
mod gpu;
pub mod kernel;

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base::capture::{BufferWriter, DEPTH_HEIGHT, DEPTH_WIDTH};
use base::defs::{Error, ErrorKind::*, Result};
use log::{debug, info, warn};

pub use cpu::CpuBackend;
pub use gate::{AdmissionGate, Permit};
#[cfg(feature = "gpu")]
pub use gpu::GpuBackend;
use kernel::{CornerRecord, KernelBuffers, KernelUniforms};

use crate::mesh::{ExpandedMesh, MeshChunk, Point3, Vector3};
use crate::params::{AssignmentParameters, KernelVariant};
use crate::preview::PreviewSurface;
use crate::projection::ProjectionContext;
use crate::stats::{ChunkReport, ChunkStatistics, SessionReport};

pub struct DispatchInput {
    pub uniforms: KernelUniforms,
    pub vertices: Vec<Point3>,
    pub normals: Vec<Vector3>,
    pub faces: Vec<u32>,
    pub candidates: Vec<u32>,
    pub context: Arc<ProjectionContext>,
}

impl DispatchInput {
    pub fn kernel_buffers(&self) -> KernelBuffers<'_> {
        KernelBuffers {
            uniforms: &self.uniforms,
            vertices: &self.vertices,
            normals: &self.normals,
            faces: &self.faces,
            cameras: &self.context.view_projections,
            depths: &self.context.depth_samples,
            candidates: &self.candidates,
        }
    }
}

pub struct DispatchOutput {
    pub corners: Vec<CornerRecord>,
    pub counters: Vec<u32>,
    pub elapsed: Duration, // From submission to completion on the device.
}

pub trait PendingDispatch: Send {
    fn wait(self: Box<Self>) -> Result<DispatchOutput>;
}

// The permit must be held until the dispatch completes on the device.
pub trait ComputeBackend {
    fn name(&self) -> &'static str;

    fn submit(
        &self,
        input: DispatchInput,
        permit: Permit,
    ) -> Result<Box<dyn PendingDispatch>>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BackendKind {
    Cpu,
    Gpu,
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cpu" => Ok(BackendKind::Cpu),
            "gpu" => Ok(BackendKind::Gpu),
            _ => Err(Error::new(
                Configuration,
                "unknown compute backend (can be 'cpu' or 'gpu')".to_string(),
            )),
        }
    }
}

pub fn create_backend(
    kind: BackendKind,
    variant: KernelVariant,
) -> Result<Box<dyn ComputeBackend>> {
    match kind {
        BackendKind::Cpu => Ok(Box::new(CpuBackend)),
        #[cfg(feature = "gpu")]
        BackendKind::Gpu => Ok(Box::new(GpuBackend::new(variant)?)),
        #[cfg(not(feature = "gpu"))]
        BackendKind::Gpu => {
            let _ = variant;
            Err(Error::new(
                UnsupportedFeature,
                "built without gpu support".to_string(),
            ))
        }
    }
}

pub trait ChunkSink {
    fn store(&mut self, sequence: usize, mesh: &ExpandedMesh) -> Result<()>;
}

impl ChunkSink for BufferWriter {
    fn store(&mut self, sequence: usize, mesh: &ExpandedMesh) -> Result<()> {
        self.write_chunk(sequence, &mesh.to_buffers())
    }
}

#[derive(Clone, Debug)]
pub struct ChunkJob {
    pub sequence: usize,
    pub chunk: MeshChunk,
    pub candidates: Vec<usize>, // Session camera indices in priority order.
}

impl ChunkJob {
    // Falls back to every camera of the context if the chunk has no hint.
    pub fn new(
        sequence: usize,
        chunk: MeshChunk,
        context: &ProjectionContext,
    ) -> Self {
        let candidates = chunk
            .cameras
            .clone()
            .unwrap_or_else(|| context.camera_ids.clone());
        Self {
            sequence,
            chunk,
            candidates,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChunkResult {
    pub mesh: ExpandedMesh,
    pub report: ChunkReport,
}

struct InFlight {
    sequence: usize,
    face_count: usize,
    camera_ids: Vec<usize>,
    uniforms: KernelUniforms,
    pending: Box<dyn PendingDispatch>,
}

// Unreadable or malformed chunk data only costs that chunk; anything else
// ends the session.
fn is_chunk_failure(err: &Error) -> bool {
    matches!(err.kind, IoError | MalformedData)
}

fn skip_failed_chunk<T>(
    report: &mut SessionReport,
    result: Result<T>,
) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if is_chunk_failure(&err) => {
            warn!("{}, skipping", err);
            report.failed.push(err.description);
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

pub struct Engine {
    backend: Box<dyn ComputeBackend>,
    params: AssignmentParameters,
    gate: AdmissionGate,
}

impl Engine {
    pub fn new(
        backend: Box<dyn ComputeBackend>,
        params: AssignmentParameters,
    ) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            backend,
            params,
            gate: AdmissionGate::new(params.max_in_flight),
        })
    }

    pub fn params(&self) -> &AssignmentParameters {
        &self.params
    }

    pub fn assign(
        &self,
        job: &ChunkJob,
        context: &Arc<ProjectionContext>,
    ) -> Result<ChunkResult> {
        let start = Instant::now();
        let in_flight = self.submit(job, context)?;
        self.finalize(in_flight, start)
    }

    // Chunks are dispatched in order with up to the in-flight limit
    // outstanding. Results reach the sink in the same order. A chunk that
    // cannot be read or assigned is recorded as failed and the session goes
    // on; other errors stop it once the dispatched chunks are stored.
    pub fn run_session<I: IntoIterator<Item = Result<ChunkJob>>>(
        &self,
        jobs: I,
        context: &Arc<ProjectionContext>,
        sink: &mut dyn ChunkSink,
    ) -> Result<SessionReport> {
        self.expect_variant(KernelVariant::SelectTexture)?;
        info!(
            "assigning texture coordinates with {} backend...",
            self.backend.name()
        );

        let start = Instant::now();
        let mut report = SessionReport::default();
        let mut queue = VecDeque::with_capacity(self.gate.limit());
        let mut fatal = None;

        for job in jobs {
            if queue.len() >= self.gate.limit() {
                if let Some(oldest) = queue.pop_front() {
                    let stored = self.persist(oldest, start, sink, &mut report);
                    if let Err(err) = skip_failed_chunk(&mut report, stored) {
                        fatal = Some(err);
                        break;
                    }
                }
            }

            let submitted = job.and_then(|job| self.submit(&job, context));
            match skip_failed_chunk(&mut report, submitted) {
                Ok(Some(in_flight)) => queue.push_back(in_flight),
                Ok(None) => {}
                Err(err) => {
                    fatal = Some(err);
                    break;
                }
            }
        }

        while let Some(oldest) = queue.pop_front() {
            let stored = self.persist(oldest, start, sink, &mut report);
            if let Err(err) = skip_failed_chunk(&mut report, stored) {
                if fatal.is_none() {
                    fatal = Some(err);
                } else {
                    warn!("{}", err);
                }
            }
        }

        match fatal {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    pub fn preview(
        &self,
        job: &ChunkJob,
        context: &Arc<ProjectionContext>,
    ) -> Result<PreviewSurface> {
        self.expect_variant(KernelVariant::Preview)?;
        let result = self.assign(job, context)?;
        Ok(PreviewSurface {
            sequence: job.sequence,
            stats: result.report.stats,
            mesh: result.mesh,
        })
    }

    fn persist(
        &self,
        in_flight: InFlight,
        session_start: Instant,
        sink: &mut dyn ChunkSink,
        report: &mut SessionReport,
    ) -> Result<()> {
        let result = self.finalize(in_flight, session_start)?;
        let sequence = result.report.sequence;
        sink.store(sequence, &result.mesh)
            .map_err(|e| e.context(&format!("chunk {}", sequence)))?;
        report.push(result.report);
        Ok(())
    }

    fn expect_variant(&self, variant: KernelVariant) -> Result<()> {
        if self.params.variant != variant {
            return Err(Error::new(
                Configuration,
                format!(
                    "operation requires '{}' kernel instead of '{}'",
                    variant, self.params.variant
                ),
            ));
        }
        Ok(())
    }

    fn prepare(
        &self,
        job: &ChunkJob,
        context: &Arc<ProjectionContext>,
    ) -> Result<(DispatchInput, Vec<usize>)> {
        context.validate()?;
        job.chunk.validate()?;

        let mut slots = Vec::with_capacity(job.candidates.len());
        let mut camera_ids = Vec::with_capacity(job.candidates.len());
        for &camera in &job.candidates {
            if camera >= context.camera_count {
                return Err(Error::new(
                    MalformedData,
                    format!(
                        "candidate camera {} is out of {} cameras",
                        camera, context.camera_count
                    ),
                ));
            }
            match context.slot_of(camera) {
                Some(slot) => {
                    slots.push(slot as u32);
                    camera_ids.push(camera);
                }
                None => debug!("  skipping excluded candidate camera {}", camera),
            }
        }

        let chunk = &job.chunk;
        let params = &self.params;
        let uniforms = KernelUniforms {
            transform: chunk.transform,
            face_count: chunk.faces.len() as u32,
            camera_count: context.len() as u32,
            candidate_count: slots.len() as u32,
            depth_width: DEPTH_WIDTH as u32,
            depth_height: DEPTH_HEIGHT as u32,
            grid_cols: params.grid_cols,
            grid_rows: params.grid_rows,
            screen_width: params.screen_width,
            screen_height: params.screen_height,
            depth_tolerance: params.depth_tolerance,
        };

        let input = DispatchInput {
            uniforms,
            vertices: chunk.vertices.clone(),
            normals: chunk.normals.clone(),
            faces: chunk.faces.iter().flatten().copied().collect(),
            candidates: slots,
            context: Arc::clone(context),
        };
        Ok((input, camera_ids))
    }

    fn submit(
        &self,
        job: &ChunkJob,
        context: &Arc<ProjectionContext>,
    ) -> Result<InFlight> {
        let with_chunk = |e: Error| e.context(&format!("chunk {}", job.sequence));
        let (input, camera_ids) =
            self.prepare(job, context).map_err(with_chunk)?;

        let face_count = job.chunk.faces.len();
        if face_count == 0 {
            warn!("chunk {} has no faces", job.sequence);
        }
        if camera_ids.is_empty() {
            warn!("chunk {} has no candidate cameras", job.sequence);
        }

        let uniforms = input.uniforms;
        let permit = self.gate.acquire();
        let pending = self.backend.submit(input, permit).map_err(with_chunk)?;

        Ok(InFlight {
            sequence: job.sequence,
            face_count,
            camera_ids,
            uniforms,
            pending,
        })
    }

    fn finalize(
        &self,
        in_flight: InFlight,
        session_start: Instant,
    ) -> Result<ChunkResult> {
        let sequence = in_flight.sequence;
        let with_chunk = |e: Error| e.context(&format!("chunk {}", sequence));
        let output = in_flight.pending.wait().map_err(with_chunk)?;

        let corner_count = in_flight.face_count * 3;
        if output.corners.len() != corner_count
            || output.counters.len() != in_flight.uniforms.counter_count()
        {
            return Err(with_chunk(Error::new(
                InconsistentState,
                format!(
                    "dispatch returned {} corners and {} counters",
                    output.corners.len(),
                    output.counters.len()
                ),
            )));
        }

        let mut mesh = ExpandedMesh {
            vertices: Vec::with_capacity(corner_count),
            normals: Vec::with_capacity(corner_count),
            faces: Vec::with_capacity(corner_count),
            texcoords: Vec::with_capacity(corner_count),
            transform: in_flight.uniforms.transform,
        };
        for corner in output.corners {
            mesh.vertices.push(corner.position);
            mesh.normals.push(corner.normal);
            mesh.faces.push(corner.face);
            mesh.texcoords.push(corner.texcoord);
        }

        let (matches, coverage) =
            output.counters.split_at(in_flight.camera_ids.len());
        let stats = ChunkStatistics::from_mesh(&mesh);
        let report = ChunkReport {
            sequence,
            stats,
            matches: in_flight
                .camera_ids
                .iter()
                .copied()
                .zip(matches.iter().copied())
                .collect(),
            coverage: coverage.to_vec(),
            elapsed: output.elapsed,
            finished_at: session_start.elapsed(),
        };

        info!(
            "  chunk {}: assigned {} of {} faces in {:.3} s",
            sequence,
            stats.assigned_faces(),
            stats.faces,
            report.elapsed.as_secs_f64()
        );
        debug!(
            "  chunk {}: matches per camera {:?}, {:.1}% of the grid covered",
            sequence,
            report.matches,
            report.coverage_ratio() * 100.0
        );

        Ok(ChunkResult { mesh, report })
    }
}
