use std::io::Write;
use std::time::Duration;

use base::defs::{IntoResult, Result};
use derive_more::{Add, AddAssign};
use log::{info, warn};

use crate::mesh::ExpandedMesh;

#[derive(Add, AddAssign, Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ChunkStatistics {
    pub faces: usize,
    pub unresolved_corners: usize,
}

impl ChunkStatistics {
    pub fn from_mesh(mesh: &ExpandedMesh) -> Self {
        Self {
            faces: mesh.face_count(),
            unresolved_corners: mesh.unresolved_corners(),
        }
    }

    pub fn corners(&self) -> usize {
        self.faces * 3
    }

    pub fn resolved_corners(&self) -> usize {
        self.corners().saturating_sub(self.unresolved_corners)
    }

    // Faces are counted in thirds of unresolved corners.
    pub fn unassigned_faces(&self) -> usize {
        self.unresolved_corners / 3
    }

    pub fn assigned_faces(&self) -> usize {
        self.faces.saturating_sub(self.unassigned_faces())
    }

    pub fn assignment_ratio(&self) -> f64 {
        if self.faces == 0 {
            0.0
        } else {
            self.assigned_faces() as f64 / self.faces as f64
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChunkReport {
    pub sequence: usize,
    pub stats: ChunkStatistics,
    pub matches: Vec<(usize, u32)>, // Session camera index, matched corners.
    pub coverage: Vec<u32>,
    pub elapsed: Duration,
    pub finished_at: Duration, // Since the session start.
}

impl ChunkReport {
    pub fn coverage_ratio(&self) -> f64 {
        if self.coverage.is_empty() {
            return 0.0;
        }
        let covered = self.coverage.iter().filter(|&&c| c > 0).count();
        covered as f64 / self.coverage.len() as f64
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionReport {
    pub chunks: Vec<ChunkReport>,
    pub totals: ChunkStatistics,
    pub failed: Vec<String>, // Errors of skipped chunks.
}

impl SessionReport {
    pub fn push(&mut self, report: ChunkReport) {
        self.totals += report.stats;
        self.chunks.push(report);
    }

    pub fn elapsed(&self) -> Duration {
        self.chunks.last().map(|c| c.finished_at).unwrap_or_default()
    }

    pub fn log_summary(&self) {
        let totals = &self.totals;
        info!(
            "assigned {} of {} faces ({:.2}%) in {:.3} s",
            totals.assigned_faces(),
            totals.faces,
            totals.assignment_ratio() * 100.0,
            self.elapsed().as_secs_f64()
        );
        if totals.unassigned_faces() > 0 {
            info!("  {} faces left unassigned", totals.unassigned_faces());
        }
        if !self.failed.is_empty() {
            warn!("  {} chunks failed", self.failed.len());
        }
    }

    pub fn write_summary(&self, writer: &mut dyn Write) -> Result<()> {
        let mut write = || -> std::io::Result<()> {
            let totals = &self.totals;
            writeln!(writer, "total faces: {}", totals.faces)?;
            writeln!(writer, "assigned faces: {}", totals.assigned_faces())?;
            writeln!(
                writer,
                "assignment ratio: {:.4}",
                totals.assignment_ratio()
            )?;
            writeln!(
                writer,
                "unassigned faces: {}",
                totals.unassigned_faces()
            )?;

            writeln!(writer, "\ncumulative faces:")?;
            let mut faces = 0;
            for chunk in &self.chunks {
                faces += chunk.stats.faces;
                writeln!(writer, "{}", faces)?;
            }

            writeln!(writer, "\ncumulative seconds:")?;
            for chunk in &self.chunks {
                writeln!(writer, "{:.3}", chunk.finished_at.as_secs_f64())?;
            }

            if !self.failed.is_empty() {
                writeln!(writer, "\nfailed chunks:")?;
                for failure in &self.failed {
                    writeln!(writer, "{}", failure)?;
                }
            }
            Ok(())
        };
        write().res(|| "failed to write session report".to_string())
    }
}
