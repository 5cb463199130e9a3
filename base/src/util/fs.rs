use std::fs::{create_dir_all, read, read_to_string, write, File};
use std::path::Path;

use crate::defs::{IntoResult, Result};

fn describe(action: &str, path: &Path) -> String {
    if let Some(path) = path.to_str() {
        format!("failed to {} '{}'", action, path)
    } else {
        format!("failed to {}", action)
    }
}

pub fn create_file<P: AsRef<Path>>(path: P) -> Result<File> {
    let path = path.as_ref();
    File::create(path).res(|| describe("create file", path))
}

pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let path = path.as_ref();
    read(path).res(|| describe("read file", path))
}

pub fn read_file_to_string<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    read_to_string(path).res(|| describe("read file", path))
}

pub fn write_file<P: AsRef<Path>>(path: P, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    write(path, data).res(|| describe("write file", path))
}

pub fn create_dir<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    create_dir_all(path).res(|| describe("create directory", path))
}
