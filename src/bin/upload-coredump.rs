extern crate anyhow;
extern crate clap;
extern crate coredump_uploader;

use coredump_uploader::tools::{JsonSink, ReportSink};
use coredump_uploader::uploader::{UploadConfig, Uploader};

use anyhow::{Context, Result};
use clap::{Arg, ArgGroup, Command};
use simplelog::*;

use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    let matches = Command::new("upload-coredump")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Create native crash events from coredumps using gdb and eu-unstrip")
        .term_width(90)
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .short('l')
                .takes_value(true)
                .default_value("info")
                .possible_values(["info", "debug"])
                .help("Logging level"),
        )
        .arg(
            Arg::new("CORE")
                .required(true)
                .takes_value(true)
                .help("Path to coredump"),
        )
        .arg(
            Arg::new("EXECUTABLE")
                .required(true)
                .takes_value(true)
                .help("Path to crashed executable"),
        )
        .arg(
            Arg::new("gdb-path")
                .long("gdb-path")
                .takes_value(true)
                .value_name("PATH")
                .help("Path to gdb"),
        )
        .arg(
            Arg::new("elfutils-path")
                .long("elfutils-path")
                .takes_value(true)
                .value_name("PATH")
                .help("Path to eu-unstrip or to elfutils bin directory"),
        )
        .arg(
            Arg::new("all-threads")
                .long("all-threads")
                .help("Report backtraces of all threads"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .takes_value(true)
                .value_name("FILE")
                .help("Path to save crash event"),
        )
        .arg(
            Arg::new("stdout")
                .long("stdout")
                .help("Print crash event to stdout"),
        )
        .group(
            ArgGroup::new("out")
                .args(&["stdout", "output"])
                .required(true),
        )
        .get_matches();

    // Init log.
    let log_level = if matches.value_of("log-level") == Some("debug") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let _ = TermLogger::init(
        log_level,
        ConfigBuilder::new().set_time_to_local(true).build(),
        TerminalMode::Stderr,
    );

    let core = Path::new(matches.value_of("CORE").unwrap());
    let executable = Path::new(matches.value_of("EXECUTABLE").unwrap());
    let config = UploadConfig {
        gdb_path: matches.value_of("gdb-path").map(PathBuf::from),
        elfutils_path: matches.value_of("elfutils-path").map(PathBuf::from),
        all_threads: matches.is_present("all-threads"),
    };

    let mut sink: Box<dyn ReportSink> = if let Some(output) = matches.value_of("output") {
        Box::new(JsonSink::file(output))
    } else {
        Box::new(JsonSink::stdout())
    };

    Uploader::new(config)
        .upload(core, executable, sink.as_mut())
        .with_context(|| format!("Couldn't process coredump {}", core.display()))?;

    Ok(())
}
