//! Thread model and multi-thread dump (`thread apply all bt`) parsing.
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::patterns;
use crate::signal;
use crate::stacktrace::{collect_registers, Stacktrace};

/// Thread id assumed to have crashed when gdb doesn't report one.
pub const DEFAULT_THREAD_ID: &str = "1";

/// One captured execution context.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Thread {
    /// Debugger assigned thread number.
    pub id: String,
    /// Label like `LWP 4242`.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub name: Option<String>,
    pub crashed: bool,
    pub stacktrace: Stacktrace,
}

/// Everything extracted from a multi-thread dump.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ThreadDump {
    /// Threads in report order: the reverse of gdb's listing order.
    pub threads: Vec<Thread>,
    /// Termination signal name or `Core`.
    pub signal: String,
    /// Stack trace of the crashed thread, or of the first listed thread if no
    /// thread matches the current thread id.
    pub stacktrace: Stacktrace,
    /// Current thread id reported by gdb or `1`.
    pub crashed_thread_id: String,
}

impl ThreadDump {
    /// Parse `thread apply all bt` output.
    ///
    /// # Arguments
    ///
    /// * `text` - gdb output
    ///
    /// # Return value
    ///
    /// Parsed dump. Blocks without a thread id are dropped. At most one thread,
    /// the first one listed with the current thread id, is marked as crashed.
    pub fn from_gdb(text: &str) -> Self {
        let crashed_thread_id = patterns::current_thread_id(text)
            .unwrap_or(DEFAULT_THREAD_ID)
            .to_string();
        let signal = signal::exit_signal_name(text);

        let mut threads = Vec::new();
        let mut first_stacktrace: Option<Stacktrace> = None;
        let mut crashed_stacktrace: Option<Stacktrace> = None;

        for block in patterns::thread_blocks(text) {
            let Some(header) = patterns::match_thread_header(block) else {
                debug!(
                    "Skipping thread block without id: {}",
                    block.lines().next().unwrap_or_default()
                );
                continue;
            };

            let stacktrace = Stacktrace::from_gdb(block);
            let crashed = crashed_stacktrace.is_none() && header.id == crashed_thread_id;
            if crashed {
                crashed_stacktrace = Some(stacktrace.clone());
            }
            if first_stacktrace.is_none() {
                first_stacktrace = Some(stacktrace.clone());
            }

            threads.push(Thread {
                id: header.id.to_string(),
                name: header.name.map(str::to_string),
                crashed,
                stacktrace,
            });
        }

        threads.reverse();
        info!("Threads found: {}", threads.len());

        let stacktrace = match (crashed_stacktrace, first_stacktrace) {
            (Some(stacktrace), _) => stacktrace,
            (None, Some(stacktrace)) => {
                warn!(
                    "Current thread {} not found, using first listed thread",
                    crashed_thread_id
                );
                stacktrace
            }
            (None, None) => {
                warn!("No thread blocks found, reading frames from whole output");
                Stacktrace::from_gdb(text)
            }
        };

        ThreadDump {
            threads,
            signal,
            stacktrace,
            crashed_thread_id,
        }
    }

    /// Merge a register dump into the primary stack trace and into the
    /// crashed thread, which shares that stack trace.
    pub fn with_registers(self, text: &str) -> Self {
        let registers = collect_registers(text);
        let threads = self
            .threads
            .into_iter()
            .map(|thread| {
                if thread.crashed {
                    Thread {
                        stacktrace: thread.stacktrace.merge_registers(registers.clone()),
                        ..thread
                    }
                } else {
                    thread
                }
            })
            .collect();
        ThreadDump {
            threads,
            stacktrace: self.stacktrace.merge_registers(registers),
            ..self
        }
    }

    /// Get the thread marked as crashed.
    pub fn crashed_thread(&self) -> Option<&Thread> {
        self.threads.iter().find(|thread| thread.crashed)
    }
}
