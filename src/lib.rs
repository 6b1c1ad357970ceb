//! Extract structured crash reports from coredumps.
//!
//! gdb backtraces, register dumps and `eu-unstrip -n` module listings are
//! parsed into frames, threads and images and assembled into a native crash
//! event, see [`report::extract_report`]. The [`tools`] and [`uploader`]
//! modules run the external tools and deliver the result.
pub mod error;
pub mod frame;
pub mod image;
pub mod patterns;
pub mod report;
pub mod signal;
pub mod stacktrace;
pub mod thread;
pub mod tools;
pub mod uploader;
