//! OSC wire codec.
//!
//! Decoding is a pure function over a borrowed datagram. A datagram that is
//! truncated or carries an unsupported type tag yields an error and no
//! messages at all, even when earlier bundle elements were well formed.

mod encoder;

use std::collections::VecDeque;
use std::fmt;

pub use encoder::{Encoder, DEFAULT_CAPACITY};

use crate::{Result, VrackError};

/// Path that marks a datagram (or bundle element) as a bundle.
pub const BUNDLE_TAG: &str = "#bundle";

/// A single decoded OSC argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Float(f32),
    Int(i32),
    Str(String),
    Blob(Vec<u8>),
}

impl Argument {
    /// Type tag character used on the wire.
    pub fn type_tag(&self) -> char {
        match self {
            Argument::Float(_) => 'f',
            Argument::Int(_) => 'i',
            Argument::Str(_) => 's',
            Argument::Blob(_) => 'b',
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Argument::Float(_) => "float",
            Argument::Int(_) => "int",
            Argument::Str(_) => "string",
            Argument::Blob(_) => "blob",
        }
    }

    /// Reads the argument as an integer; floats round to nearest.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Argument::Int(value) => Some(*value),
            Argument::Float(value) if value.is_finite() => Some(value.round() as i32),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Argument::Str(value) => Some(value.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Float(value) => write!(f, "{value}"),
            Argument::Int(value) => write!(f, "{value}"),
            Argument::Str(value) => write!(f, "{value:?}"),
            Argument::Blob(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

/// A decoded OSC message: an address plus its typed arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub path: String,
    pub args: Vec<Argument>,
}

impl Message {
    pub fn new(path: impl Into<String>, args: Vec<Argument>) -> Self {
        Self {
            path: path.into(),
            args,
        }
    }

    pub fn arg(&self, index: usize) -> Option<&Argument> {
        self.args.get(index)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Decodes every message carried by a datagram, flattening bundles in
/// element order.
pub fn decode(bytes: &[u8]) -> Result<Vec<Message>> {
    let mut messages = Vec::new();
    decode_into(bytes, &mut messages)?;
    Ok(messages)
}

fn decode_into(bytes: &[u8], out: &mut Vec<Message>) -> Result<()> {
    let mut reader = Reader::new(bytes);
    let path = reader.read_string()?;

    if path == BUNDLE_TAG {
        // time tag, ignored
        reader.take(8)?;
        while !reader.is_exhausted() {
            let length = reader.read_i32()?;
            let length = usize::try_from(length)
                .map_err(|_| VrackError::malformed("negative bundle element length"))?;
            let element = reader.take(length)?;
            decode_into(element, out)?;
        }
        return Ok(());
    }

    if reader.is_exhausted() {
        out.push(Message::new(path, Vec::new()));
        return Ok(());
    }

    let tags = reader.read_string()?;
    let tags = tags
        .strip_prefix(',')
        .ok_or_else(|| VrackError::malformed(format!("type tags `{tags}` lack a leading comma")))?;

    let mut args = Vec::with_capacity(tags.len());
    for tag in tags.chars() {
        let arg = match tag {
            'f' => Argument::Float(f32::from_bits(reader.read_u32()?)),
            'i' => Argument::Int(reader.read_i32()?),
            's' => Argument::Str(reader.read_string()?),
            'b' => Argument::Blob(reader.read_blob()?),
            other => {
                return Err(VrackError::malformed(format!(
                    "unsupported type tag `{other}` in `{path}`"
                )))
            }
        };
        args.push(arg);
    }

    out.push(Message::new(path, args));
    Ok(())
}

/// Rounds a field length up to the next 4-byte boundary.
pub(crate) fn align4(length: usize) -> usize {
    (length + 3) & !3
}

/// Bounds-checked cursor over a borrowed datagram.
struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    fn is_exhausted(&self) -> bool {
        self.position >= self.bytes.len()
    }

    fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.position)
    }

    fn take(&mut self, length: usize) -> Result<&'a [u8]> {
        if length > self.remaining() {
            return Err(VrackError::malformed(format!(
                "truncated field: wanted {length} bytes, {} left",
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.position..self.position + length];
        self.position += length;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    fn read_string(&mut self) -> Result<String> {
        let rest = &self.bytes[self.position.min(self.bytes.len())..];
        let length = rest
            .iter()
            .position(|byte| *byte == 0)
            .ok_or_else(|| VrackError::malformed("unterminated string"))?;
        let field = self.take(align4(length + 1))?;
        String::from_utf8(field[..length].to_vec())
            .map_err(|_| VrackError::malformed("string is not valid UTF-8"))
    }

    fn read_blob(&mut self) -> Result<Vec<u8>> {
        let length = usize::try_from(self.read_i32()?)
            .map_err(|_| VrackError::malformed("negative blob length"))?;
        let field = self.take(align4(length))?;
        Ok(field[..length].to_vec())
    }
}

/// Queue-based decoder front end fed one datagram at a time.
#[derive(Debug, Default)]
pub struct Parser {
    queue: VecDeque<Message>,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a datagram and queues its messages. Returns how many were
    /// queued; a malformed datagram queues nothing.
    pub fn feed(&mut self, datagram: &[u8]) -> Result<usize> {
        let messages = decode(datagram)?;
        let count = messages.len();
        self.queue.extend(messages);
        Ok(count)
    }

    pub fn pop(&mut self) -> Option<Message> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
