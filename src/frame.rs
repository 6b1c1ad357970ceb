//! Stack frame model and extraction from gdb frame lines.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::patterns::{self, FrameMatch, FrameSuffix};

/// Function name gdb prints for frames it couldn't symbolize.
pub const UNKNOWN_FUNCTION: &str = "??";

/// One stack entry.
///
/// A frame carries either a source location (`source_file` and `line_number`)
/// or the module it was loaded from (`module_name`), never both.
#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Frame {
    /// Resolved machine address, `0x` followed by hex digits.
    #[serde(rename = "instruction_addr", skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub instruction_address: Option<String>,
    #[serde(rename = "function", skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub function_name: Option<String>,
    #[serde(rename = "filename", skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub source_file: Option<String>,
    #[serde(rename = "lineno", skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub line_number: Option<u32>,
    #[serde(rename = "package", skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub module_name: Option<String>,
}

impl Frame {
    /// Build a frame from one frame line match.
    ///
    /// The `??` function name is dropped. A line number that doesn't fit into
    /// `u32` is dropped as well, the file name is kept.
    pub fn from_match(captures: &FrameMatch) -> Self {
        let function_name = Some(captures.function)
            .filter(|name| !name.is_empty() && *name != UNKNOWN_FUNCTION)
            .map(str::to_string);
        let (source_file, line_number, module_name) = match captures.suffix {
            Some(FrameSuffix::Source { file, line }) => {
                (Some(file.to_string()), line.parse::<u32>().ok(), None)
            }
            Some(FrameSuffix::Package(module)) => (None, None, Some(module.to_string())),
            None => (None, None, None),
        };
        Frame {
            instruction_address: captures.instruction_addr.map(str::to_string),
            function_name,
            source_file,
            line_number,
            module_name,
        }
    }

    /// Parse a single gdb frame line.
    ///
    /// # Arguments
    ///
    /// * `line` - frame line, e.g. `#0  0x000055ee7d69e60a in main () at ./test.c:3`
    ///
    /// # Return value
    ///
    /// `None` if the line is not a frame line.
    pub fn parse(line: &str) -> Option<Self> {
        patterns::match_frame(line).map(|captures| Frame::from_match(&captures))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} in {}",
            self.instruction_address.as_deref().unwrap_or("??"),
            self.function_name.as_deref().unwrap_or(UNKNOWN_FUNCTION)
        )?;
        match (&self.source_file, self.line_number, &self.module_name) {
            (Some(file), Some(line), _) => write!(f, " at {file}:{line}"),
            (Some(file), None, _) => write!(f, " at {file}"),
            (None, _, Some(module)) => write!(f, " from {module}"),
            (None, _, None) => Ok(()),
        }
    }
}
