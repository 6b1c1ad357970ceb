//! Grammars for the line kinds found in gdb and eu-unstrip output.
//!
//! Document level markers (current thread, termination signal, thread block
//! boundaries) are located with regular expressions. Individual lines (stack
//! frames, module descriptors, register pairs, thread headers) are parsed with
//! small `nom` grammars, one per line kind. None of the functions here fail:
//! a line that doesn't fit its grammar yields `None` and is skipped by the
//! caller.
use lazy_static::lazy_static;
use nom::branch::alt;
use nom::bytes::complete::{is_not, tag, tag_no_case, take_while};
use nom::character::complete::{char, digit1, hex_digit1, satisfy, space0, space1};
use nom::combinator::{eof, map, map_opt, opt, peek, recognize, rest};
use nom::error::{Error, ErrorKind};
use nom::sequence::{delimited, pair, preceded, separated_pair, terminated, tuple};
use nom::IResult;
use regex::Regex;

/// Prompt gdb prints when reading commands from a pipe.
pub const GDB_PROMPT: &str = "(gdb)";

lazy_static! {
    static ref FRAME_MARKER_RE: Regex = Regex::new(r"(?m)^(?:\(gdb\))?[ \t]*#[0-9]+").unwrap();
    static ref THREAD_BLOCK_RE: Regex =
        Regex::new(r"(?ims)^Thread .*?(?:\n[ \t]*\n|\(gdb\)\squit|\z)").unwrap();
    static ref CURRENT_THREAD_RE: Regex =
        Regex::new(r"(?i)current thread is (?P<thread_id>\d+)").unwrap();
    static ref EXIT_SIGNAL_RE: Regex =
        Regex::new(r"(?i)terminated with signal (?P<signal>[a-z0-9]+),").unwrap();
}

/// Location suffix of a stack frame line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameSuffix<'a> {
    /// `from <module>`: frame without debug info.
    Package(&'a str),
    /// `at <file>:<line>`: frame resolved to sources.
    Source { file: &'a str, line: &'a str },
}

/// Raw captures of one stack frame line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameMatch<'a> {
    /// Frame number, `0` for the innermost frame.
    pub index: &'a str,
    pub instruction_addr: Option<&'a str>,
    pub function: &'a str,
    pub suffix: Option<FrameSuffix<'a>>,
}

/// Raw captures of one eu-unstrip module descriptor line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageMatch<'a> {
    pub image_addr: &'a str,
    pub image_size: Option<&'a str>,
    pub code_id: Option<&'a str>,
    pub code_file: Option<&'a str>,
}

/// Raw captures of a `Thread N (...)` header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThreadHeader<'a> {
    pub id: &'a str,
    pub name: Option<&'a str>,
}

/// Check whether debugger output contains at least one `#N` frame marker.
pub fn has_frame_marker(text: &str) -> bool {
    FRAME_MARKER_RE.is_match(text)
}

/// Get the id from a "Current thread is N" marker.
pub fn current_thread_id(text: &str) -> Option<&str> {
    CURRENT_THREAD_RE
        .captures(text)
        .and_then(|caps| caps.name("thread_id"))
        .map(|m| m.as_str())
}

/// Get the signal name from a "terminated with signal SIGxxx," line.
pub fn exit_signal(text: &str) -> Option<&str> {
    EXIT_SIGNAL_RE
        .captures(text)
        .and_then(|caps| caps.name("signal"))
        .map(|m| m.as_str())
}

/// Slice a `thread apply all bt` dump into per-thread blocks.
///
/// # Arguments
///
/// * `text` - gdb output
///
/// # Return value
///
/// Blocks in document order. Each block starts with a `Thread` header and ends
/// before the next blank line, at the `(gdb) quit` marker or at the end of text.
pub fn thread_blocks(text: &str) -> impl Iterator<Item = &str> {
    THREAD_BLOCK_RE.find_iter(text).map(|m| m.as_str())
}

/// Parse a `0x`-prefixed hex number.
fn hex_number(input: &str) -> IResult<&str, &str> {
    recognize(pair(tag_no_case("0x"), hex_digit1))(input)
}

/// Parse a run of non-blank characters.
fn token(input: &str) -> IResult<&str, &str> {
    is_not(" \t\r\n")(input)
}

/// Parse `#N`, optionally preceded by the `(gdb)` prompt.
fn frame_index(input: &str) -> IResult<&str, &str> {
    preceded(
        tuple((space0, opt(tag(GDB_PROMPT)), space0, char('#'))),
        digit1,
    )(input)
}

fn frame_address(input: &str) -> IResult<&str, &str> {
    terminated(hex_number, tuple((space1, tag("in"), space1)))(input)
}

fn package_suffix(input: &str) -> IResult<&str, FrameSuffix<'_>> {
    preceded(pair(tag("from"), space1), map(token, FrameSuffix::Package))(input)
}

fn source_location(location: &str) -> Option<FrameSuffix<'_>> {
    let (file, line) = location.rsplit_once(':')?;
    if file.is_empty() || line.is_empty() || !line.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(FrameSuffix::Source { file, line })
}

fn source_suffix(input: &str) -> IResult<&str, FrameSuffix<'_>> {
    preceded(pair(tag("at"), space1), map_opt(token, source_location))(input)
}

/// Parse a parenthesized argument list, allowing nested parentheses.
fn argument_list(input: &str) -> IResult<&str, &str> {
    let mut depth = 0usize;
    for (pos, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&input[pos + 1..], &input[..=pos]));
                }
            }
            _ if depth == 0 => break,
            _ => {}
        }
    }
    Err(nom::Err::Error(Error::new(input, ErrorKind::Char)))
}

/// Parse the tail of a frame line starting at the blank before the argument
/// list: ` (<args>) [from <module> | at <file>:<line>]`.
fn call_tail(input: &str) -> IResult<&str, Option<FrameSuffix<'_>>> {
    let (input, _) = satisfy(char::is_whitespace)(input)?;
    let (input, _) = argument_list(input)?;
    let (input, _) = space0(input)?;
    let (input, suffix) = opt(alt((package_suffix, source_suffix)))(input)?;
    let (input, _) = space0(input)?;
    let (input, _) = eof(input)?;
    Ok((input, suffix))
}

/// Split `<function> (<args>) <suffix>` taking the longest possible function
/// name. Qualified and demangled names may contain blanks and parentheses of
/// their own, so every blank followed by `(` is a split candidate, rightmost
/// first.
fn function_and_tail(input: &str) -> Option<(&str, Option<FrameSuffix<'_>>)> {
    input
        .char_indices()
        .rev()
        .filter(|&(pos, c)| c.is_whitespace() && input[pos + c.len_utf8()..].starts_with('('))
        .find_map(|(pos, _)| {
            call_tail(&input[pos..])
                .ok()
                .map(|(_, suffix)| (&input[..pos], suffix))
        })
}

/// Parse one stack frame line.
///
/// Accepted forms:
///
/// * `#N  0x<addr> in <function> (<args>) at <file>:<line>`
/// * `#N  0x<addr> in <function> (<args>) from <module>`
/// * `#N  0x<addr> in <function> (<args>)`
/// * `#N  <function> (<args>) ...` (innermost frame without address)
///
/// # Arguments
///
/// * `line` - one line of gdb output
pub fn match_frame(line: &str) -> Option<FrameMatch<'_>> {
    let line = line.trim_end();
    let (input, index) = frame_index(line).ok()?;
    let (input, _) = space1::<_, Error<&str>>(input).ok()?;
    let (input, instruction_addr) = opt(frame_address)(input).ok()?;
    let (function, suffix) = function_and_tail(input)?;
    Some(FrameMatch {
        index,
        instruction_addr,
        function: function.trim(),
        suffix,
    })
}

/// Parse a build id, `-` when the module has none.
fn code_id(input: &str) -> IResult<&str, &str> {
    alt((hex_digit1, tag("-")))(input)
}

fn is_placeholder(field: &str) -> bool {
    field == "." || field == "-"
}

/// Parse one `eu-unstrip -n` line:
/// `<base>+<size> <code-id>@<addr> <file> <debug-file> <module-name>`.
///
/// `<file>` and `<debug-file>` are `.` or `-` when not found; the code file is
/// `<file>` when present, otherwise the module name.
pub fn match_image(line: &str) -> Option<ImageMatch<'_>> {
    let (input, (image_addr, image_size)) =
        separated_pair(hex_number, char('+'), opt(hex_number))(line.trim()).ok()?;
    let (input, code_id) = opt(preceded(space1, code_id))(input).ok()?;
    let (input, _) = opt(preceded(char('@'), opt(hex_number)))(input).ok()?;
    let (_, (file, _debug_file, module_name)) = tuple((
        opt(preceded(space1, token)),
        opt(preceded(space1, token)),
        opt(preceded(space1, rest)),
    ))(input)
    .ok()?;

    let code_id = code_id.filter(|id| !is_placeholder(id));
    let module_name = module_name.map(str::trim).filter(|name| !name.is_empty());
    let code_file = match file {
        Some(file) if !is_placeholder(file) => Some(file),
        _ => module_name.filter(|name| !is_placeholder(name)),
    };

    Some(ImageMatch {
        image_addr,
        image_size,
        code_id,
        code_file,
    })
}

/// Parse every module descriptor line of `text`, skipping lines that don't match.
pub fn image_matches(text: &str) -> impl Iterator<Item = ImageMatch<'_>> {
    text.lines().filter_map(match_image)
}

fn register_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_lowercase()),
        take_while(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'),
    ))(input)
}

fn register_value(input: &str) -> IResult<&str, &str> {
    terminated(hex_number, peek(alt((space1, eof))))(input)
}

fn register_pair(input: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(register_name, space1, register_value)(input)
}

/// Find `<name> <hex-value>` pairs in a register dump.
///
/// A pair may start only at the beginning of a blank separated token, and the
/// name has to start with a lowercase letter, so frame markers (`#0`), hex
/// values and symbol annotations like `<main+4>` are never taken for names.
/// Several pairs per line are allowed.
pub fn register_pairs(text: &str) -> Vec<(&str, &str)> {
    // Session preamble before the first prompt echoes the crashed command line.
    let text = text.find(GDB_PROMPT).map_or(text, |pos| &text[pos..]);
    let mut pairs = Vec::new();
    for line in text.lines() {
        let mut input = line.trim_start();
        while !input.is_empty() {
            if let Ok((tail, pair)) = register_pair(input) {
                pairs.push(pair);
                input = tail;
            } else {
                input = input.trim_start_matches(|c: char| !c.is_whitespace());
            }
            input = input.trim_start();
        }
    }
    pairs
}

fn thread_label(input: &str) -> IResult<&str, &str> {
    let lwp = delimited(char('('), is_not(")"), char(')'));
    alt((
        preceded(
            tuple((char('('), tag_no_case("thread"), space1, hex_number, space1)),
            lwp,
        ),
        delimited(char('('), is_not("()"), char(')')),
    ))(input)
}

/// Parse the `Thread N (Thread 0x... (LWP n))` header at the start of a block.
pub fn match_thread_header(block: &str) -> Option<ThreadHeader<'_>> {
    let (_, (id, name)) = preceded(
        pair(tag_no_case("thread"), space1),
        pair(digit1, opt(preceded(space1, thread_label))),
    )(block.trim_start())
    .ok()?;
    Some(ThreadHeader {
        id,
        name: name.map(str::trim).filter(|name| !name.is_empty()),
    })
}
