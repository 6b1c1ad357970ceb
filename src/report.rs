//! Crash report schema and assembly.
use std::fmt;

use chrono::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::*;
use crate::image::{images_from_unstrip, Image};
use crate::patterns;
use crate::signal::{exit_signal_name, resolve_signal_number, HostSignals, SignalLookup};
use crate::stacktrace::Stacktrace;
use crate::thread::{Thread, ThreadDump};

/// Platform of every report.
pub const PLATFORM: &str = "native";
/// Exception mechanism type.
pub const MECHANISM_TYPE: &str = "coredump";
/// Name reported in the sdk section.
pub const SDK_NAME: &str = "coredump.uploader.sdk";

/// Structured crash event for one coredump.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CrashReport {
    /// Capture time of the coredump.
    pub timestamp: DateTime<Utc>,
    pub platform: String,
    pub exception: Exception,
    pub debug_meta: DebugMeta,
    /// All threads, only for multi-thread captures.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub threads: Option<ThreadValues>,
    pub sdk: Sdk,
}

/// The crash itself.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Exception {
    /// Signal name, e.g. `SIGSEGV`, or `Core`.
    #[serde(rename = "type")]
    pub exception_type: String,
    /// Faulted thread id, only for multi-thread captures.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub thread_id: Option<String>,
    pub mechanism: Mechanism,
    pub stacktrace: Stacktrace,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Mechanism {
    #[serde(rename = "type")]
    pub mechanism_type: String,
    pub handled: bool,
    pub synthetic: bool,
    pub meta: MechanismMeta,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MechanismMeta {
    pub signal: SignalMeta,
}

/// Signal description. `number` is `null` for unknown names, `code` is always
/// `null` since coredumps don't carry the signal code.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SignalMeta {
    pub number: Option<i32>,
    pub code: Option<i32>,
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct DebugMeta {
    pub images: Vec<Image>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ThreadValues {
    pub values: Vec<Thread>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Sdk {
    pub name: String,
    pub version: String,
}

impl Default for Sdk {
    fn default() -> Self {
        Sdk {
            name: SDK_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Mechanism {
    /// Mechanism of an unhandled crash captured from a coredump.
    pub fn coredump(signal: &str, number: Option<i32>) -> Self {
        Mechanism {
            mechanism_type: MECHANISM_TYPE.to_string(),
            handled: false,
            synthetic: true,
            meta: MechanismMeta {
                signal: SignalMeta {
                    number,
                    code: None,
                    name: signal.to_string(),
                },
            },
        }
    }
}

impl CrashReport {
    /// Combine extracted pieces into a report.
    ///
    /// # Arguments
    ///
    /// * `stacktrace` - primary stack trace
    ///
    /// * `signal` - signal name or `Core`
    ///
    /// * `signal_number` - resolved signal number
    ///
    /// * `thread_id` - faulted thread id, multi-thread captures only
    ///
    /// * `threads` - all threads, multi-thread captures only
    ///
    /// * `images` - loaded modules with resolved debug ids
    ///
    /// * `timestamp` - capture time
    pub fn assemble(
        stacktrace: Stacktrace,
        signal: String,
        signal_number: Option<i32>,
        thread_id: Option<String>,
        threads: Option<Vec<Thread>>,
        images: Vec<Image>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        CrashReport {
            timestamp,
            platform: PLATFORM.to_string(),
            exception: Exception {
                mechanism: Mechanism::coredump(&signal, signal_number),
                exception_type: signal,
                thread_id,
                stacktrace,
            },
            debug_meta: DebugMeta { images },
            threads: threads.map(|values| ThreadValues { values }),
            sdk: Sdk::default(),
        }
    }

    /// Get all threads, empty for single thread captures.
    pub fn threads(&self) -> &[Thread] {
        self.threads
            .as_ref()
            .map(|threads| threads.values.as_slice())
            .unwrap_or_default()
    }

    /// Serialize report as pretty printed json.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Build a crash report from captured tool output, resolving signal numbers
/// through the host signal table.
///
/// # Arguments
///
/// * `backtrace` - output of `bt`, or of `thread apply all bt` if
/// `all_threads` is set
///
/// * `registers` - output of `info registers`
///
/// * `symbols` - output of `eu-unstrip -n`
///
/// * `timestamp` - capture time
///
/// * `all_threads` - whether `backtrace` lists all threads
///
/// # Return value
///
/// Crash report, or `Error::NoFrames` if the backtrace has no frame at all.
pub fn extract_report(
    backtrace: &str,
    registers: &str,
    symbols: &str,
    timestamp: DateTime<Utc>,
    all_threads: bool,
) -> Result<CrashReport> {
    extract_report_with(
        &HostSignals,
        backtrace,
        registers,
        symbols,
        timestamp,
        all_threads,
    )
}

/// Same as [`extract_report`] with a custom signal table.
pub fn extract_report_with<L: SignalLookup + ?Sized>(
    lookup: &L,
    backtrace: &str,
    registers: &str,
    symbols: &str,
    timestamp: DateTime<Utc>,
    all_threads: bool,
) -> Result<CrashReport> {
    if !patterns::has_frame_marker(backtrace) {
        return Err(Error::NoFrames);
    }
    let images = images_from_unstrip(symbols);

    let report = if all_threads {
        let dump = ThreadDump::from_gdb(backtrace).with_registers(registers);
        let signal_number = resolve_signal_number(lookup, &dump.signal);
        CrashReport::assemble(
            dump.stacktrace,
            dump.signal,
            signal_number,
            Some(dump.crashed_thread_id),
            Some(dump.threads),
            images,
            timestamp,
        )
    } else {
        let signal = exit_signal_name(backtrace);
        let signal_number = resolve_signal_number(lookup, &signal);
        let stacktrace = Stacktrace::from_gdb(backtrace).with_registers(registers);
        CrashReport::assemble(
            stacktrace,
            signal,
            signal_number,
            None,
            None,
            images,
            timestamp,
        )
    };
    Ok(report)
}

impl fmt::Display for CrashReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut report = String::new();
        let signal = &self.exception.mechanism.meta.signal;

        // Exception
        report += &format!("Exception: {}", self.exception.exception_type);
        if let Some(number) = signal.number {
            report += &format!(" ({number})");
        }
        report += "\n";

        // Date
        report += &format!("Date: {}\n", self.timestamp.to_rfc3339());

        // Thread
        if let Some(thread_id) = &self.exception.thread_id {
            report += &format!("Thread: {thread_id}\n");
        }

        // CrashLine
        if let Some(frame) = self.exception.stacktrace.crash_frame() {
            report += &format!("CrashLine: {frame}\n");
        }

        // Stacktrace
        report += "\n===Stacktrace===\n";
        report += &self.exception.stacktrace.to_string();

        // Threads
        for thread in self.threads().iter().filter(|thread| !thread.crashed) {
            report += &format!("\n===Thread {}", thread.id);
            if let Some(name) = &thread.name {
                report += &format!(" ({name})");
            }
            report += "===\n";
            report += &thread.stacktrace.to_string();
        }

        // Images
        if !self.debug_meta.images.is_empty() {
            report += "\n===Images===\n";
            for image in &self.debug_meta.images {
                report += &format!("{image}\n");
            }
        }

        write!(f, "{}", report.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BACKTRACE: &str = "Core was generated by `./test'.\n\
Program terminated with signal SIGSEGV, Segmentation fault.\n\
#0  0x000055ee7d69e60a in crashing_function () at ./test.c:3\n\
3\t  *(int *)0 = 0;\n\
(gdb) #1  0x000055ee7d69e61c in main () at ./test.c:7\n";

    const THREADS: &str = "Program terminated with signal SIGABRT, Aborted.\n\
[Current thread is 1 (Thread 0x7f8e4b2c7740 (LWP 4242))]\n\
(gdb) \n\
Thread 3 (Thread 0x7f8e4a2c5700 (LWP 4244)):\n\
#0  0x00007f8e4b0b99d0 in __GI___nanosleep () from /lib/x86_64-linux-gnu/libc.so.6\n\
#1  0x00007f8e4b0f688f in clone () from /lib/x86_64-linux-gnu/libc.so.6\n\
\n\
Thread 2 (Thread 0x7f8e4aac6700 (LWP 4243)):\n\
#0  0x00007f8e4b0b99d0 in __GI___nanosleep () from /lib/x86_64-linux-gnu/libc.so.6\n\
#1  0x00007f8e4b0f688f in clone () from /lib/x86_64-linux-gnu/libc.so.6\n\
\n\
Thread 1 (Thread 0x7f8e4b2c7740 (LWP 4242)):\n\
#0  0x00007f8e4aef4e97 in raise () from /lib/x86_64-linux-gnu/libc.so.6\n\
#1  0x00007f8e4aef6801 in abort () from /lib/x86_64-linux-gnu/libc.so.6\n\
#2  0x000055ee7d69e6f1 in main () at ./threads.c:20\n\
(gdb) quit\n";

    const REGISTERS: &str = "rax            0x0                 0\n\
rip            0x55ee7d69e60a      0x55ee7d69e60a <crashing_function+16>\n\
eflags         0x10246             [ PF ZF IF RF ]\n";

    const SYMBOLS: &str = "0x55ee7d69e000+0x201018 b814d9f87debe4b312c06a03fa8d6b44a7b41199@0x55ee7d69e284 ./a.out . a.out\n\
0x7ffedbaee000+0x1000 09e243c2fb482669406caba88fad799413f2a375@0x7ffedbaee7c0 . - linux-vdso.so.1\n";

    fn timestamp() -> DateTime<Utc> {
        Utc.timestamp_opt(1_580_000_000, 0).unwrap()
    }

    #[test]
    fn test_single_thread_report() {
        let report = extract_report(BACKTRACE, REGISTERS, SYMBOLS, timestamp(), false).unwrap();
        assert_eq!(report.platform, PLATFORM);
        assert_eq!(report.exception.exception_type, "SIGSEGV");
        assert_eq!(report.exception.mechanism.meta.signal.number, Some(11));
        assert_eq!(report.exception.thread_id, None);
        assert!(report.threads.is_none());
        assert_eq!(report.exception.stacktrace.frames.len(), 2);
        assert_eq!(report.exception.stacktrace.registers.len(), 3);
        assert_eq!(report.debug_meta.images.len(), 2);
    }

    #[test]
    fn test_all_threads_report() {
        let report = extract_report(THREADS, REGISTERS, SYMBOLS, timestamp(), true).unwrap();
        assert_eq!(report.exception.exception_type, "SIGABRT");
        assert_eq!(report.exception.mechanism.meta.signal.number, Some(6));
        assert_eq!(report.exception.thread_id.as_deref(), Some("1"));

        let threads = report.threads();
        assert_eq!(threads.len(), 3);
        assert_eq!(threads[0].id, "1");
        assert_eq!(threads[2].id, "3");
        let crashed: Vec<&Thread> = threads.iter().filter(|t| t.crashed).collect();
        assert_eq!(crashed.len(), 1);
        assert_eq!(crashed[0].id, "1");
        assert_eq!(crashed[0].stacktrace, report.exception.stacktrace);

        let frames = &report.exception.stacktrace.frames;
        assert_eq!(frames[0].function_name.as_deref(), Some("main"));
        assert_eq!(frames[2].function_name.as_deref(), Some("raise"));
    }

    #[test]
    fn test_no_frames() {
        let result = extract_report(
            "No symbol table is loaded.\n",
            REGISTERS,
            SYMBOLS,
            timestamp(),
            false,
        );
        assert!(matches!(result, Err(Error::NoFrames)));
        let result = extract_report("", "", "", timestamp(), true);
        assert!(matches!(result, Err(Error::NoFrames)));
    }

    #[test]
    fn test_idempotence() {
        for all_threads in [false, true] {
            let text = if all_threads { THREADS } else { BACKTRACE };
            let first = extract_report(text, REGISTERS, SYMBOLS, timestamp(), all_threads).unwrap();
            let second = extract_report(text, REGISTERS, SYMBOLS, timestamp(), all_threads).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_missing_signal() {
        let text = "#0  0x1 in f ()\n";
        let report = extract_report(text, "", "", timestamp(), false).unwrap();
        assert_eq!(report.exception.exception_type, "Core");
        assert_eq!(report.exception.mechanism.meta.signal.number, None);
        assert_eq!(report.exception.mechanism.meta.signal.name, "Core");
    }

    #[test]
    fn test_custom_signal_lookup() {
        let lookup = |_: &str| Some(42);
        let report =
            extract_report_with(&lookup, BACKTRACE, "", "", timestamp(), false).unwrap();
        assert_eq!(report.exception.mechanism.meta.signal.number, Some(42));
    }

    #[test]
    fn test_json_layout() {
        let report = extract_report(BACKTRACE, REGISTERS, SYMBOLS, timestamp(), false).unwrap();
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["platform"], "native");
        assert_eq!(value["timestamp"], "2020-01-26T00:53:20Z");
        assert_eq!(value["exception"]["type"], "SIGSEGV");
        assert!(value["exception"].get("thread_id").is_none());
        assert!(value.get("threads").is_none());

        let mechanism = &value["exception"]["mechanism"];
        assert_eq!(mechanism["type"], "coredump");
        assert_eq!(mechanism["handled"], false);
        assert_eq!(mechanism["synthetic"], true);
        assert_eq!(mechanism["meta"]["signal"]["number"], 11);
        assert!(mechanism["meta"]["signal"]["code"].is_null());
        assert_eq!(mechanism["meta"]["signal"]["name"], "SIGSEGV");

        let image = &value["debug_meta"]["images"][1];
        assert_eq!(image["type"], "elf");
        assert_eq!(image["image_addr"], "0x7ffedbaee000");
        assert_eq!(image["image_size"], 4096);
        assert_eq!(image["code_file"], "linux-vdso.so.1");

        assert_eq!(value["sdk"]["name"], SDK_NAME);
        assert_eq!(value["sdk"]["version"], env!("CARGO_PKG_VERSION"));

        let parsed: CrashReport = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, report);
    }

    #[test]
    fn test_display() {
        let report = extract_report(THREADS, REGISTERS, SYMBOLS, timestamp(), true).unwrap();
        let text = report.to_string();
        assert!(text.starts_with("Exception: SIGABRT (6)\n"));
        assert!(text.contains("Thread: 1\n"));
        assert!(text.contains("CrashLine: 0x00007f8e4aef4e97 in raise from /lib/x86_64-linux-gnu/libc.so.6"));
        assert!(text.contains("===Thread 2 (LWP 4243)==="));
        assert!(!text.contains("===Thread 1 "));
        assert!(text.contains("===Images==="));
    }
}
