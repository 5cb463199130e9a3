pub mod assign_textures;
pub mod engine;
pub mod mesh;
pub mod params;
pub mod preview;
pub mod preview_chunk;
pub mod projection;
pub mod stats;

pub use base;
