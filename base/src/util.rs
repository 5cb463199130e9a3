pub mod cli;
pub mod fs;
pub mod test;
