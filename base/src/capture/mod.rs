mod data;
mod reader;
mod writer;

use std::path::{Path, PathBuf};
use std::result::Result as StdResult;
use std::str::FromStr;

use structopt::StructOpt;

use crate::defs::{Error, ErrorKind::*, Result};
pub use data::*;
pub use reader::*;
pub use writer::*;

// Every captured frame carries a depth grid of this fixed resolution.
pub const DEPTH_WIDTH: usize = 128;
pub const DEPTH_HEIGHT: usize = 96;
pub const DEPTH_SAMPLES: usize = DEPTH_WIDTH * DEPTH_HEIGHT;

#[derive(Clone, Debug)]
pub struct SessionLayout {
    dir: PathBuf,
}

impl SessionLayout {
    pub fn new<P: AsRef<Path>>(root: P, session: &str) -> Self {
        Self {
            dir: root.as_ref().join(session),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn camera_path(&self, index: usize) -> PathBuf {
        self.dir.join("cameras").join(format!("camera{}.json", index))
    }

    pub fn depth_path(&self, index: usize) -> PathBuf {
        self.dir.join("depths").join(format!("depth{}.json", index))
    }

    pub fn chunk_path(&self, index: usize) -> PathBuf {
        self.dir.join("chunks").join(format!("chunk{}.json", index))
    }

    pub fn chunk_cameras_path(&self, index: usize) -> PathBuf {
        self.dir.join("chunks").join(format!("chunk{}.cameras", index))
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir.join("textured")
    }

    pub fn report_path(&self) -> PathBuf {
        self.dir.join("report.txt")
    }

    pub fn positions_path(&self) -> PathBuf {
        self.dir.join("positions.txt")
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Compression {
    None = 0,
    Gzip = 1,
}

impl FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Compression::None),
            "gzip" => Ok(Compression::Gzip),
            _ => Err(Error::new(
                MalformedData,
                "unknown buffer compression (can be 'none' or 'gzip')"
                    .to_string(),
            )),
        }
    }
}

pub const DEFAULT_COMPRESSION: &str = "none";
pub const DEFAULT_GZIP_LEVEL: &str = "6";

fn validate_gzip_level(value: String) -> StdResult<(), String> {
    let parsed = value
        .parse::<u32>()
        .map_err(|_| "must be a positive integer".to_string())?;
    if parsed > 9 {
        return Err("unsupported gzip level (can be from 0 to 9)".to_string());
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, StructOpt)]
pub struct WriterParams {
    #[structopt(
        name = "buffer-compression",
        help = "Type of compression for output buffers",
        default_value = DEFAULT_COMPRESSION,
        long
    )]
    pub compression: Compression,

    #[structopt(
        name = "buffer-gzip-level",
        help = "Level of gzip-compression for output buffers",
        default_value = DEFAULT_GZIP_LEVEL,
        long,
        validator = validate_gzip_level
    )]
    pub gzip_level: u32,
}

impl Default for WriterParams {
    fn default() -> Self {
        Self {
            compression: Compression::None,
            gzip_level: 6,
        }
    }
}
