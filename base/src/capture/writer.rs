use std::io::{self, Read, Write as _};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::capture::{Compression, WriterParams};
use crate::defs::{Error, ErrorKind::*, IntoResult, Result};
use crate::util::fs;

// Per-corner buffers of one textured chunk, little-endian on disk.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChunkBuffers {
    pub vertices: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub faces: Vec<u32>,
    pub texcoords: Vec<[f32; 2]>,
}

pub enum RawWriter<W: io::Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
}

impl<W: io::Write> RawWriter<W> {
    pub fn new(inner: W, params: &WriterParams) -> Self {
        match params.compression {
            Compression::None => RawWriter::Plain(inner),
            Compression::Gzip => {
                let compression = flate2::Compression::new(params.gzip_level);
                RawWriter::Gzip(GzEncoder::new(inner, compression))
            }
        }
    }

    pub fn finish(self) -> Result<W> {
        match self {
            RawWriter::Plain(inner) => Ok(inner),
            RawWriter::Gzip(encoder) => {
                encoder.finish().res(|| "failed to finish encoding".to_string())
            }
        }
    }
}

impl<W: io::Write> io::Write for RawWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            RawWriter::Plain(inner) => inner.write(buf),
            RawWriter::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            RawWriter::Plain(inner) => inner.flush(),
            RawWriter::Gzip(encoder) => encoder.flush(),
        }
    }
}

pub fn encode_buffer(data: &[u8], params: &WriterParams) -> Result<Vec<u8>> {
    let mut writer = RawWriter::new(Vec::with_capacity(data.len()), params);
    writer
        .write_all(data)
        .res(|| "failed to encode buffer".to_string())?;
    writer.finish()
}

pub fn decode_buffer(data: &[u8], compression: Compression) -> Result<Vec<u8>> {
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Gzip => {
            let mut out = Vec::new();
            GzDecoder::new(data).read_to_end(&mut out).res_as(
                MalformedData,
                || "failed to decompress buffer".to_string(),
            )?;
            Ok(out)
        }
    }
}

fn floats_to_bytes<'a, I: IntoIterator<Item = &'a f32>>(values: I) -> Vec<u8> {
    values.into_iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn bytes_to_floats<const N: usize>(data: &[u8]) -> Result<Vec<[f32; N]>> {
    let stride = 4 * N;
    if data.len() % stride != 0 {
        return Err(Error::new(
            MalformedData,
            format!("buffer size {} is not a multiple of {}", data.len(), stride),
        ));
    }
    Ok(data
        .chunks_exact(stride)
        .map(|item| {
            let mut values = [0.0; N];
            for (value, bytes) in values.iter_mut().zip(item.chunks_exact(4)) {
                *value = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            }
            values
        })
        .collect())
}

fn bytes_to_indices(data: &[u8]) -> Result<Vec<u32>> {
    if data.len() % 4 != 0 {
        return Err(Error::new(
            MalformedData,
            format!("buffer size {} is not a multiple of 4", data.len()),
        ));
    }
    Ok(data
        .chunks_exact(4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

pub struct BufferWriter {
    dir: PathBuf,
    params: WriterParams,
}

const BUFFER_NAMES: [&str; 4] = ["vertices", "normals", "faces", "texcoords"];

fn buffer_path(
    dir: &Path,
    name: &str,
    sequence: usize,
    compression: Compression,
) -> PathBuf {
    let ext = match compression {
        Compression::None => "bin",
        Compression::Gzip => "bin.gz",
    };
    dir.join(name).join(format!("{}{}.{}", name, sequence, ext))
}

impl BufferWriter {
    pub fn new<P: AsRef<Path>>(dir: P, params: &WriterParams) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        for name in BUFFER_NAMES {
            fs::create_dir(dir.join(name))?;
        }
        Ok(Self {
            dir,
            params: *params,
        })
    }

    pub fn write_chunk(
        &mut self,
        sequence: usize,
        buffers: &ChunkBuffers,
    ) -> Result<()> {
        let contents = [
            floats_to_bytes(buffers.vertices.iter().flatten()),
            floats_to_bytes(buffers.normals.iter().flatten()),
            buffers.faces.iter().flat_map(|i| i.to_le_bytes()).collect(),
            floats_to_bytes(buffers.texcoords.iter().flatten()),
        ];
        for (name, data) in BUFFER_NAMES.iter().zip(contents.iter()) {
            let path =
                buffer_path(&self.dir, name, sequence, self.params.compression);
            fs::write_file(&path, &encode_buffer(data, &self.params)?)?;
        }
        Ok(())
    }
}

pub fn read_chunk_buffers<P: AsRef<Path>>(
    dir: P,
    sequence: usize,
    compression: Compression,
) -> Result<ChunkBuffers> {
    let dir = dir.as_ref();
    let read = |name: &str| -> Result<Vec<u8>> {
        let path = buffer_path(dir, name, sequence, compression);
        decode_buffer(&fs::read_file(&path)?, compression)
    };
    Ok(ChunkBuffers {
        vertices: bytes_to_floats::<3>(&read("vertices")?)?,
        normals: bytes_to_floats::<3>(&read("normals")?)?,
        faces: bytes_to_indices(&read("faces")?)?,
        texcoords: bytes_to_floats::<2>(&read("texcoords")?)?,
    })
}
