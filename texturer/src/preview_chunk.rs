use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use base::capture::{CaptureReader, SessionLayout};
use base::defs::{ErrorKind::*, IntoResult, Result};
use base::util::fs;
use image::DynamicImage;
use log::info;
use structopt::StructOpt;

use crate::assign_textures::{read_job, CameraOpts};
use crate::engine::{create_backend, Engine};
use crate::params::{AssignmentOpts, KernelVariant};
use crate::preview::PreviewSurface;

#[derive(StructOpt)]
#[structopt(about = "Export a chunk textured by a single camera into OBJ")]
pub struct PreviewChunkCommand {
    #[structopt(help = "Directory with scan sessions")]
    pub root: PathBuf,

    #[structopt(help = "Scan session name")]
    pub session: String,

    #[structopt(help = "Chunk number")]
    pub chunk: usize,

    #[structopt(
        help = "Camera to texture with (chunk cameras if omitted)",
        long
    )]
    pub camera: Option<usize>,

    #[structopt(help = "Image captured by the camera", long, short = "i")]
    pub image: Option<PathBuf>,

    #[structopt(help = "Output OBJ-file (stdout if omitted)", long, short = "o")]
    pub output: Option<PathBuf>,

    #[structopt(flatten)]
    pub cameras: CameraOpts,

    #[structopt(flatten)]
    pub assignment: AssignmentOpts,
}

impl PreviewChunkCommand {
    pub fn run(&self) -> Result<()> {
        let reader =
            CaptureReader::new(SessionLayout::new(&self.root, &self.session));
        let params = self.assignment.parameters(KernelVariant::Preview)?;
        let engine = Engine::new(
            create_backend(self.assignment.backend, params.variant)?,
            params,
        )?;

        let texture = match &self.image {
            Some(path) => Some(
                image::open(path)
                    .res_as(MalformedData, || {
                        format!("failed to load image '{}'", path.display())
                    })?,
            ),
            None => None,
        };

        let surface =
            preview_chunk(&reader, &self.cameras, &engine, self.chunk, self.camera)?;
        info!(
            "  {} of {} faces visible",
            surface.stats.assigned_faces(),
            surface.stats.faces
        );

        let name = format!("chunk{}", self.chunk);
        let mtl_dir = self
            .output
            .as_deref()
            .and_then(Path::parent)
            .unwrap_or_else(|| ".".as_ref());
        let mut writer: Box<dyn Write> = match &self.output {
            Some(path) => Box::new(BufWriter::new(fs::create_file(path)?)),
            None => Box::new(io::stdout()),
        };

        write_preview(
            &surface,
            writer.as_mut(),
            mtl_dir,
            &name,
            texture.as_ref(),
        )?;
        writer.flush().res(|| "failed to write OBJ-file".to_string())
    }
}

pub fn preview_chunk(
    reader: &CaptureReader,
    cameras: &CameraOpts,
    engine: &Engine,
    sequence: usize,
    camera: Option<usize>,
) -> Result<PreviewSurface> {
    let context = cameras.build_context(reader)?;
    let mut job = read_job(reader, sequence, &context)?;
    if let Some(camera) = camera {
        job.candidates = vec![camera];
    }
    info!("previewing chunk {} with cameras {:?}...", sequence, job.candidates);
    engine.preview(&job, &context)
}

fn write_preview(
    surface: &PreviewSurface,
    writer: &mut dyn Write,
    mtl_dir: &Path,
    name: &str,
    texture: Option<&DynamicImage>,
) -> Result<()> {
    surface.write_obj(writer, |p, d| fs::write_file(p, d), mtl_dir, name, texture)
}
