//! Upload configuration and one upload operation.
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use goblin::elf::header::{self, Header};
use goblin::elf::Elf;
use log::{debug, info};

use crate::error::*;
use crate::report::{extract_report, CrashReport};
use crate::tools::{
    core_timestamp, DebuggerCommand, DebuggerSource, EuUnstrip, Gdb, ReportSink, SymbolSource,
};

/// Size of a 64-bit ELF header, enough for both classes.
const ELF_HEADER_SIZE: u64 = 64;

/// Upload settings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UploadConfig {
    /// gdb binary, `gdb` from `PATH` if unset.
    pub gdb_path: Option<PathBuf>,
    /// eu-unstrip binary or elfutils bin directory, `eu-unstrip` from `PATH`
    /// if unset.
    pub elfutils_path: Option<PathBuf>,
    /// Capture backtraces of all threads.
    pub all_threads: bool,
}

/// Read ELF header of a file.
fn read_elf_header(path: &Path) -> Result<Header> {
    let mut buffer = Vec::new();
    File::open(path)?
        .take(ELF_HEADER_SIZE)
        .read_to_end(&mut buffer)?;
    Ok(Elf::parse_header(&buffer)?)
}

impl UploadConfig {
    /// Check upload inputs.
    ///
    /// # Arguments
    ///
    /// * `core` - path to coredump, must be an ELF core file
    ///
    /// * `executable` - path to crashed binary, must be an ELF executable or
    /// shared object
    pub fn validate(&self, core: &Path, executable: &Path) -> Result<()> {
        if !core.is_file() {
            return Err(Error::Config(format!(
                "Wrong path to coredump: {}",
                core.display()
            )));
        }
        if !executable.is_file() {
            return Err(Error::Config(format!(
                "Wrong path to executable: {}",
                executable.display()
            )));
        }
        if let Some(path) = self.gdb_path.as_ref().filter(|path| !path.exists()) {
            return Err(Error::Config(format!(
                "Wrong path for gdb: {}",
                path.display()
            )));
        }
        if let Some(path) = self.elfutils_path.as_ref().filter(|path| !path.exists()) {
            return Err(Error::Config(format!(
                "Wrong path for elfutils: {}",
                path.display()
            )));
        }

        // Type should be CORE.
        if read_elf_header(core)?.e_type != header::ET_CORE {
            return Err(Error::Config(format!(
                "Not an ELF core file: {}",
                core.display()
            )));
        }
        // Type should be executable or shared object.
        let e_type = read_elf_header(executable)?.e_type;
        if e_type != header::ET_EXEC && e_type != header::ET_DYN {
            return Err(Error::Config(format!(
                "Executable type should be executable or shared object: {}",
                executable.display()
            )));
        }
        Ok(())
    }
}

/// Runs the tools for one coredump and hands the report to a sink.
pub struct Uploader<D, S> {
    config: UploadConfig,
    debugger: D,
    symbols: S,
}

impl Uploader<Gdb, EuUnstrip> {
    /// Create uploader backed by gdb and eu-unstrip.
    pub fn new(config: UploadConfig) -> Self {
        let debugger = Gdb::new(config.gdb_path.as_deref());
        let symbols = EuUnstrip::new(config.elfutils_path.as_deref());
        Uploader::with_sources(config, debugger, symbols)
    }
}

impl<D: DebuggerSource, S: SymbolSource> Uploader<D, S> {
    pub fn with_sources(config: UploadConfig, debugger: D, symbols: S) -> Self {
        Uploader {
            config,
            debugger,
            symbols,
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Capture tool output for a coredump and build its report.
    pub fn report(&self, core: &Path, executable: &Path) -> Result<CrashReport> {
        let all_threads = self.config.all_threads;
        let command = if all_threads {
            DebuggerCommand::BacktraceAllThreads
        } else {
            DebuggerCommand::Backtrace
        };
        let backtrace = self.debugger.run(core, executable, command)?;
        let registers = self
            .debugger
            .run(core, executable, DebuggerCommand::Registers)?;
        let symbols = self.symbols.modules(core, executable)?;
        let timestamp = core_timestamp(core)?;
        extract_report(&backtrace, &registers, &symbols, timestamp, all_threads)
    }

    /// Validate inputs, build the report and send it.
    ///
    /// # Return value
    ///
    /// Event id assigned by the sink.
    pub fn upload<K: ReportSink + ?Sized>(
        &self,
        core: &Path,
        executable: &Path,
        sink: &mut K,
    ) -> Result<String> {
        self.config.validate(core, executable)?;
        let report = self.report(core, executable)?;
        debug!("Report:\n{}", report);
        let event_id = sink.send(&report)?;
        info!("Core dump sent: {}", event_id);
        Ok(event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    struct Transcript {
        backtrace: &'static str,
        registers: &'static str,
    }

    impl DebuggerSource for Transcript {
        fn run(&self, _: &Path, _: &Path, command: DebuggerCommand) -> Result<String> {
            match command {
                DebuggerCommand::Registers => Ok(self.registers.to_string()),
                _ => Ok(self.backtrace.to_string()),
            }
        }
    }

    struct Listing(&'static str);

    impl SymbolSource for Listing {
        fn modules(&self, _: &Path, _: &Path) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[derive(Default)]
    struct Collect(Vec<CrashReport>);

    impl ReportSink for Collect {
        fn send(&mut self, report: &CrashReport) -> Result<String> {
            self.0.push(report.clone());
            Ok(format!("event-{}", self.0.len()))
        }
    }

    fn elf_file(e_type: u16) -> tempfile::NamedTempFile {
        let mut bytes = vec![0u8; ELF_HEADER_SIZE as usize];
        bytes[..4].copy_from_slice(b"\x7fELF");
        bytes[4] = 2; // 64-bit
        bytes[5] = 1; // little endian
        bytes[6] = 1;
        bytes[16..18].copy_from_slice(&e_type.to_le_bytes());
        bytes[18..20].copy_from_slice(&header::EM_X86_64.to_le_bytes());
        bytes[20..24].copy_from_slice(&1u32.to_le_bytes());
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        file
    }

    #[test]
    fn test_validate() {
        let core = elf_file(header::ET_CORE);
        let exe = elf_file(header::ET_DYN);
        let config = UploadConfig::default();
        assert!(config.validate(core.path(), exe.path()).is_ok());

        let result = config.validate(exe.path(), exe.path());
        assert!(matches!(result, Err(Error::Config(_))));
        let result = config.validate(core.path(), core.path());
        assert!(matches!(result, Err(Error::Config(_))));
        let result = config.validate(Path::new("/nonexistent/core"), exe.path());
        assert!(matches!(result, Err(Error::Config(_))));

        let config = UploadConfig {
            gdb_path: Some(PathBuf::from("/nonexistent/gdb")),
            ..Default::default()
        };
        let result = config.validate(core.path(), exe.path());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_not_elf() {
        let mut text = tempfile::NamedTempFile::new().unwrap();
        writeln!(text, "not an elf file at all, just some text padding it out").unwrap();
        let exe = elf_file(header::ET_EXEC);
        let result = UploadConfig::default().validate(text.path(), exe.path());
        assert!(matches!(result, Err(Error::Elf(_))));
    }

    #[test]
    fn test_upload() {
        let core = elf_file(header::ET_CORE);
        let exe = elf_file(header::ET_EXEC);
        let config = UploadConfig {
            all_threads: true,
            ..Default::default()
        };
        let uploader = Uploader::with_sources(
            config,
            Transcript {
                backtrace: "[Current thread is 1 (LWP 11)]\n\
                            Thread 1 (LWP 11):\n\
                            #0  0x2 in crash () at c.c:4\n\
                            #1  0x1 in main () at c.c:9\n",
                registers: "rip 0x2\n",
            },
            Listing(""),
        );
        let mut sink = Collect::default();
        let event_id = uploader.upload(core.path(), exe.path(), &mut sink).unwrap();
        assert_eq!(event_id, "event-1");

        let report = &sink.0[0];
        assert_eq!(report.exception.thread_id.as_deref(), Some("1"));
        assert_eq!(report.threads().len(), 1);
        assert_eq!(report.exception.stacktrace.registers["rip"], "0x2");
        assert!(report.debug_meta.images.is_empty());
    }

    #[test]
    fn test_report_without_frames() {
        let core = elf_file(header::ET_CORE);
        let uploader = Uploader::with_sources(
            UploadConfig::default(),
            Transcript {
                backtrace: "No stack.\n",
                registers: "",
            },
            Listing(""),
        );
        let result = uploader.report(core.path(), Path::new("a.out"));
        assert!(matches!(result, Err(Error::NoFrames)));
    }
}
