//! Shared test support. Not a test target itself.

pub mod faulty_directory;

pub use faulty_directory::FaultyDirectory;
