use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use base::capture::{BufferWriter, CaptureReader, SessionLayout, WriterParams};
use base::defs::{Error, IntoResult, Result};
use base::util::fs;
use log::{info, warn};
use structopt::StructOpt;

use crate::engine::{create_backend, ChunkJob, Engine};
use crate::mesh::MeshChunk;
use crate::params::{AssignmentOpts, KernelVariant};
use crate::projection::{build_projection_context, ProjectionContext};
use crate::stats::SessionReport;

#[derive(StructOpt)]
#[structopt(about = "Assign texture coordinates to scan chunks")]
pub struct AssignTexturesCommand {
    #[structopt(help = "Directory with scan sessions")]
    pub root: PathBuf,

    #[structopt(help = "Scan session name")]
    pub session: String,

    #[structopt(flatten)]
    pub cameras: CameraOpts,

    #[structopt(flatten)]
    pub assignment: AssignmentOpts,

    #[structopt(flatten)]
    pub writer: WriterParams,
}

#[derive(Clone, Debug, Default, StructOpt)]
pub struct CameraOpts {
    #[structopt(
        help = "Number of captured cameras (counted on disk if omitted)",
        long
    )]
    pub camera_count: Option<usize>,

    #[structopt(
        help = "Comma-separated cameras to leave out",
        long,
        use_delimiter = true
    )]
    pub exclude: Vec<usize>,
}

impl CameraOpts {
    pub fn build_context(
        &self,
        reader: &CaptureReader,
    ) -> Result<Arc<ProjectionContext>> {
        let camera_count =
            self.camera_count.unwrap_or_else(|| reader.count_cameras());
        info!("loading {} cameras...", camera_count);
        let context =
            build_projection_context(reader, camera_count, &self.exclude)?;
        info!(
            "  {} cameras included, {} excluded",
            context.len(),
            camera_count - context.len()
        );
        if context.is_empty() {
            warn!("no cameras left, faces will stay unassigned");
        }
        Ok(Arc::new(context))
    }
}

impl AssignTexturesCommand {
    pub fn run(&self) -> Result<()> {
        let reader =
            CaptureReader::new(SessionLayout::new(&self.root, &self.session));
        let params = self.assignment.parameters(KernelVariant::SelectTexture)?;
        let engine = Engine::new(
            create_backend(self.assignment.backend, params.variant)?,
            params,
        )?;

        let report =
            assign_textures(&reader, &self.cameras, &engine, &self.writer)?;
        report.log_summary();
        Ok(())
    }
}

pub fn read_job(
    reader: &CaptureReader,
    sequence: usize,
    context: &ProjectionContext,
) -> Result<ChunkJob> {
    let with_chunk = |e: Error| e.context(&format!("chunk {}", sequence));
    let record = reader.read_chunk(sequence).map_err(with_chunk)?;
    let cameras = reader.read_chunk_cameras(sequence).map_err(with_chunk)?;
    let chunk = MeshChunk::from_record(record, cameras);
    Ok(ChunkJob::new(sequence, chunk, context))
}

pub fn assign_textures(
    reader: &CaptureReader,
    cameras: &CameraOpts,
    engine: &Engine,
    writer_params: &WriterParams,
) -> Result<SessionReport> {
    let layout = reader.layout();
    let context = cameras.build_context(reader)?;

    let mut positions = BufWriter::new(fs::create_file(layout.positions_path())?);
    context.write_positions(&mut positions)?;
    positions
        .flush()
        .res(|| "failed to write camera positions".to_string())?;

    let chunk_count = reader.count_chunks();
    info!("processing {} chunks...", chunk_count);
    let mut writer = BufferWriter::new(layout.output_dir(), writer_params)?;
    let jobs = (0..chunk_count).map(|i| read_job(reader, i, &context));
    let report = engine.run_session(jobs, &context, &mut writer)?;

    let mut summary = BufWriter::new(fs::create_file(layout.report_path())?);
    report.write_summary(&mut summary)?;
    summary
        .flush()
        .res(|| "failed to write session report".to_string())?;

    Ok(report)
}
