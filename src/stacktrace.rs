//! Stack trace model, frame list construction and register collection.
use std::collections::BTreeMap;
use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::frame::Frame;
use crate::patterns;

/// Register name to hex value.
pub type Registers = BTreeMap<String, String>;

/// Frames of one execution context, oldest call first, and its register state.
#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq, Eq)]
pub struct Stacktrace {
    pub frames: Vec<Frame>,
    #[serde(skip_serializing_if = "Registers::is_empty")]
    #[serde(default)]
    pub registers: Registers,
}

impl Stacktrace {
    /// Create stack trace from frames listed innermost first, as debuggers
    /// print them.
    pub fn from_innermost_first(mut frames: Vec<Frame>) -> Self {
        frames.reverse();
        Stacktrace {
            frames,
            registers: Registers::new(),
        }
    }

    /// Extract stack trace from gdb backtrace output.
    ///
    /// # Arguments
    ///
    /// * `text` - gdb output, frames are taken from every `#N` line
    ///
    /// # Return value
    ///
    /// Stack trace ordered oldest call first. Lines that look like frames but
    /// don't parse are skipped. When frame numbering restarts at `#0` (gdb
    /// prints the innermost frame on loading the core, before the requested
    /// backtrace) the later listing replaces the earlier one.
    pub fn from_gdb(text: &str) -> Self {
        let mut frames = Vec::new();
        for line in text.lines() {
            let Some(captures) = patterns::match_frame(line) else {
                if patterns::has_frame_marker(line) {
                    debug!("Skipping malformed frame line: {}", line.trim());
                }
                continue;
            };
            if captures.index == "0" && !frames.is_empty() {
                debug!("Frame listing restarted, dropping {} frames", frames.len());
                frames.clear();
            }
            frames.push(Frame::from_match(&captures));
        }
        Stacktrace::from_innermost_first(frames)
    }

    /// Merge registers found in a register dump into this stack trace. The
    /// last occurrence of a register name wins.
    ///
    /// # Arguments
    ///
    /// * `text` - `info registers` output
    pub fn with_registers(self, text: &str) -> Self {
        self.merge_registers(collect_registers(text))
    }

    /// Merge already collected registers, overwriting existing names.
    pub fn merge_registers(mut self, registers: Registers) -> Self {
        self.registers.extend(registers);
        self
    }

    /// Innermost frame, the one executing when the process was stopped.
    pub fn crash_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Collect register values from a register dump.
pub fn collect_registers(text: &str) -> Registers {
    let mut registers = Registers::new();
    for (name, value) in patterns::register_pairs(text) {
        registers.insert(name.to_string(), value.to_string());
    }
    registers
}

impl fmt::Display for Stacktrace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (num, frame) in self.frames.iter().rev().enumerate() {
            writeln!(f, "#{num} {frame}")?;
        }
        if !self.registers.is_empty() {
            writeln!(f)?;
            for (name, value) in &self.registers {
                writeln!(f, "{name:<15}{value}")?;
            }
        }
        Ok(())
    }
}
