pub mod capture;
pub mod defs;
pub mod util;
