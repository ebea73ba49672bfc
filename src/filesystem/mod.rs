// src/filesystem/mod.rs

//! Filesystem helpers shared by the pipeline stages

pub mod path;

pub use path::{copy_tree, move_file_atomic, safe_join, sanitize_filename, sanitize_path};
