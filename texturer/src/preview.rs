use std::io::{self, Cursor};
use std::path::Path;

use base::defs::{ErrorKind::*, IntoResult, Result};
use image::{DynamicImage, ImageOutputFormat};

use crate::mesh::{ExpandedMesh, Point3, Vector3};
use crate::stats::ChunkStatistics;

// A chunk with per-corner texture coordinates ready to be shown with
// the image of its camera.
#[derive(Clone, Debug)]
pub struct PreviewSurface {
    pub sequence: usize,
    pub mesh: ExpandedMesh,
    pub stats: ChunkStatistics,
}

impl PreviewSurface {
    pub fn world_vertices(&self) -> Vec<Point3> {
        let transform = &self.mesh.transform;
        self.mesh
            .vertices
            .iter()
            .map(|v| transform.transform_point(v))
            .collect()
    }

    pub fn world_normals(&self) -> Vec<Vector3> {
        let rotation = self.mesh.transform.fixed_slice::<3, 3>(0, 0);
        self.mesh
            .normals
            .iter()
            .map(|n| {
                let n = rotation * n;
                n.try_normalize(f32::EPSILON).unwrap_or(n)
            })
            .collect()
    }

    pub fn write_obj<F: Fn(&Path, &[u8]) -> Result<()>>(
        &self,
        writer: &mut dyn io::Write,
        write_file: F,
        mtl_dir: &Path,
        name: &str,
        texture: Option<&DynamicImage>,
    ) -> Result<()> {
        let write_err = || "failed to write OBJ-file".to_string();

        if let Some(texture) = texture {
            let mut png = Cursor::new(Vec::new());
            texture
                .write_to(&mut png, ImageOutputFormat::Png)
                .res_as(MalformedData, || "failed to encode texture".to_string())?;
            write_file(&mtl_dir.join(name).with_extension("png"), png.get_ref())?;

            let mut mtl_content = format!("newmtl {}\n", name);
            mtl_content += format!("map_Ka {}.png\n", name).as_str();
            mtl_content += format!("map_Kd {}.png\n", name).as_str();
            write_file(
                &mtl_dir.join(name).with_extension("mtl"),
                mtl_content.as_bytes(),
            )?;

            writeln!(writer, "mtllib {}.mtl", name).res(write_err)?;
            writeln!(writer, "usemtl {}", name).res(write_err)?;
        }

        for v in self.world_vertices() {
            writeln!(writer, "v {} {} {}", v.x, v.y, v.z).res(write_err)?;
        }

        for n in self.world_normals() {
            writeln!(writer, "vn {} {} {}", n.x, n.y, n.z).res(write_err)?;
        }

        for t in &self.mesh.texcoords {
            writeln!(writer, "vt {} {}", t.x, 1.0 - t.y).res(write_err)?;
        }

        for f in self.mesh.faces.chunks_exact(3) {
            let (a, b, c) = (f[0] + 1, f[1] + 1, f[2] + 1);
            #[rustfmt::skip]
            writeln!(writer, "f {}/{}/{} {}/{}/{} {}/{}/{}",
                a, a, a,
                b, b, b,
                c, c, c,
            ).res(write_err)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::cell::RefCell;
    use std::path::PathBuf;
    use std::str;

    use crate::mesh::{unresolved, Matrix4, Vector2};

    fn new_surface() -> PreviewSurface {
        PreviewSurface {
            sequence: 3,
            mesh: ExpandedMesh {
                vertices: vec![
                    Point3::new(0.0, 0.0, 0.0),
                    Point3::new(1.0, 0.0, 0.0),
                    Point3::new(0.0, 2.0, 0.0),
                ],
                normals: vec![Vector3::new(0.0, 0.0, 2.0); 3],
                faces: vec![0, 1, 2],
                texcoords: vec![
                    Vector2::new(0.25, 0.75),
                    Vector2::new(0.5, 0.5),
                    unresolved(),
                ],
                transform: Matrix4::new_translation(&Vector3::new(1.0, 0.0, 0.0)),
            },
            stats: ChunkStatistics {
                faces: 1,
                unresolved_corners: 1,
            },
        }
    }

    #[test]
    fn test_export_untextured_surface() {
        let write_file = |_p: &Path, _d: &[u8]| {
            panic!("unexpected write_file call");
        };

        let mut writer = Vec::new();
        new_surface()
            .write_obj(
                &mut writer,
                write_file,
                &PathBuf::from("/some/path"),
                "chunk3",
                None,
            )
            .unwrap();

        let expected = r#"v 1 0 0
v 2 0 0
v 1 2 0
vn 0 0 1
vn 0 0 1
vn 0 0 1
vt 0.25 0.25
vt 0.5 0.5
vt 0 1
f 1/1/1 2/2/2 3/3/3
"#;
        assert_eq!(str::from_utf8(&writer).unwrap(), expected);
    }

    #[test]
    fn test_export_textured_surface() {
        let written = RefCell::new(Vec::new());
        let write_file = |p: &Path, d: &[u8]| {
            if p == PathBuf::from("/some/path/chunk3.mtl") {
                assert_eq!(
                    str::from_utf8(d).unwrap(),
                    "newmtl chunk3\nmap_Ka chunk3.png\nmap_Kd chunk3.png\n"
                );
            } else if p == PathBuf::from("/some/path/chunk3.png") {
                let decoded = image::load_from_memory(d).unwrap();
                assert_eq!(decoded.width(), 4);
                assert_eq!(decoded.height(), 2);
            } else {
                panic!("unexpected write_file path");
            }
            written.borrow_mut().push(p.to_path_buf());
            Ok(())
        };

        let texture = DynamicImage::ImageRgb8(RgbImage::new(4, 2));
        let mut writer = Vec::new();
        new_surface()
            .write_obj(
                &mut writer,
                write_file,
                &PathBuf::from("/some/path"),
                "chunk3",
                Some(&texture),
            )
            .unwrap();

        assert_eq!(written.borrow().len(), 2);
        let obj = str::from_utf8(&writer).unwrap();
        assert!(obj.starts_with("mtllib chunk3.mtl\nusemtl chunk3\nv 1 0 0\n"));
    }
}
