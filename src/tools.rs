//! External tools that feed the extraction: gdb, eu-unstrip, the core file
//! timestamp and the report sink.
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use chrono::prelude::*;
use log::{debug, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::error::*;
use crate::report::CrashReport;

/// Default gdb executable name.
pub const GDB: &str = "gdb";
/// Default eu-unstrip executable name.
pub const EU_UNSTRIP: &str = "eu-unstrip";

/// Debugger request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebuggerCommand {
    /// Backtrace of the current thread.
    Backtrace,
    /// Backtraces of all threads.
    BacktraceAllThreads,
    /// Register dump of the current thread.
    Registers,
}

impl DebuggerCommand {
    /// gdb command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            DebuggerCommand::Backtrace => "bt",
            DebuggerCommand::BacktraceAllThreads => "thread apply all bt",
            DebuggerCommand::Registers => "info registers",
        }
    }
}

impl fmt::Display for DebuggerCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Source of debugger output for a coredump.
pub trait DebuggerSource {
    /// Run `command` against the coredump and return its output.
    fn run(&self, core: &Path, executable: &Path, command: DebuggerCommand) -> Result<String>;
}

/// Source of the module listing for a coredump.
pub trait SymbolSource {
    /// Return one module descriptor per line.
    fn modules(&self, core: &Path, executable: &Path) -> Result<String>;
}

/// Consumer of finished reports.
pub trait ReportSink {
    /// Deliver report and return its event id.
    fn send(&mut self, report: &CrashReport) -> Result<String>;
}

/// Resolve a configured tool location. A directory is searched for `name`,
/// a file is taken as is, and without configuration `name` is looked up in
/// `PATH`.
pub fn tool_path(configured: Option<&Path>, name: &str) -> PathBuf {
    match configured {
        Some(path) if path.is_dir() => path.join(name),
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(name),
    }
}

/// Run external tool and collect its standard output.
///
/// # Arguments
///
/// * `command` - configured command
///
/// * `input` - text written to the tool's standard input
///
/// # Return value
///
/// Lossy UTF-8 decoded standard output. Fails if the tool can't be started,
/// exits unsuccessfully, or prints nothing but diagnostics.
fn run_tool(mut command: Command, input: Option<&str>) -> Result<String> {
    let program = command.get_program().to_string_lossy().to_string();
    debug!("Running {:?}", command);

    command
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = command
        .spawn()
        .map_err(|err| Error::Tool(format!("Failed to start {program}: {err}")))?;
    if let (Some(input), Some(stdin)) = (input, child.stdin.as_mut()) {
        // Tool may exit without reading its input, the exit status decides.
        if let Err(err) = stdin.write_all(input.as_bytes()) {
            if err.kind() != io::ErrorKind::BrokenPipe {
                return Err(err.into());
            }
            debug!("{program} closed its input early");
        }
    }
    let output = child.wait_with_output()?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if !output.status.success() {
        return Err(Error::Tool(format!(
            "{program} exited with {}: {stderr}",
            output.status
        )));
    }
    if !stderr.is_empty() {
        if stdout.trim().is_empty() {
            return Err(Error::Tool(format!("{program}: {stderr}")));
        }
        warn!("{program}: {stderr}");
    }
    Ok(stdout)
}

/// gdb in batch mode over a coredump.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Gdb {
    path: PathBuf,
}

impl Gdb {
    /// Create runner for gdb found at `path`, or in `PATH` if `None`.
    pub fn new(path: Option<&Path>) -> Self {
        Gdb {
            path: tool_path(path, GDB),
        }
    }
}

impl Default for Gdb {
    fn default() -> Self {
        Gdb::new(None)
    }
}

impl Gdb {
    /// gdb invocation over a coredump, commands are read from stdin.
    pub fn command(&self, core: &Path, executable: &Path) -> Command {
        let mut gdb = Command::new(&self.path);
        gdb.arg("-c").arg(core).arg(executable);
        gdb
    }
}

impl DebuggerSource for Gdb {
    fn run(&self, core: &Path, executable: &Path, command: DebuggerCommand) -> Result<String> {
        run_tool(
            self.command(core, executable),
            Some(&format!("{command}\n")),
        )
    }
}

/// `eu-unstrip -n` module listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EuUnstrip {
    path: PathBuf,
}

impl EuUnstrip {
    /// Create runner for eu-unstrip found at `path` (the binary or the
    /// elfutils bin directory), or in `PATH` if `None`.
    pub fn new(path: Option<&Path>) -> Self {
        EuUnstrip {
            path: tool_path(path, EU_UNSTRIP),
        }
    }
}

impl Default for EuUnstrip {
    fn default() -> Self {
        EuUnstrip::new(None)
    }
}

impl EuUnstrip {
    /// `eu-unstrip -n --core <core> -e <executable>` invocation.
    pub fn command(&self, core: &Path, executable: &Path) -> Command {
        let mut unstrip = Command::new(&self.path);
        unstrip
            .arg("-n")
            .arg("--core")
            .arg(core)
            .arg("-e")
            .arg(executable);
        unstrip
    }
}

impl SymbolSource for EuUnstrip {
    fn modules(&self, core: &Path, executable: &Path) -> Result<String> {
        run_tool(self.command(core, executable), None)
    }
}

/// Get coredump capture time: modification time, or creation time where
/// modification time is unavailable.
pub fn core_timestamp(path: &Path) -> Result<DateTime<Utc>> {
    let metadata = fs::metadata(path)?;
    let time = metadata.modified().or_else(|_| metadata.created())?;
    Ok(DateTime::<Utc>::from(time))
}

/// Where [`JsonSink`] writes reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkTarget {
    Stdout,
    File(PathBuf),
}

/// Report as delivered: the report fields plus its event id.
#[derive(Serialize)]
struct Event<'a> {
    event_id: String,
    #[serde(flatten)]
    report: &'a CrashReport,
}

/// Sink writing reports as pretty printed json.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JsonSink {
    target: SinkTarget,
}

impl JsonSink {
    pub fn new(target: SinkTarget) -> Self {
        JsonSink { target }
    }

    pub fn stdout() -> Self {
        JsonSink::new(SinkTarget::Stdout)
    }

    pub fn file<P: Into<PathBuf>>(path: P) -> Self {
        JsonSink::new(SinkTarget::File(path.into()))
    }
}

impl ReportSink for JsonSink {
    fn send(&mut self, report: &CrashReport) -> Result<String> {
        let event_id = Uuid::new_v4().simple().to_string();
        let event = Event {
            event_id: event_id.clone(),
            report,
        };
        let json = serde_json::to_string_pretty(&event)?;
        match &self.target {
            SinkTarget::Stdout => {
                let stdout = io::stdout();
                let mut handle = stdout.lock();
                writeln!(handle, "{json}")?;
            }
            SinkTarget::File(path) => {
                let mut file = File::create(path)?;
                writeln!(file, "{json}")?;
            }
        }
        Ok(event_id)
    }
}
