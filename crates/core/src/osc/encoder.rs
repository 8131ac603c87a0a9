use super::{align4, Argument, Message};
use crate::{Result, VrackError};

/// Default size of the reusable send buffer.
pub const DEFAULT_CAPACITY: usize = 4096;

/// Reusable, fixed-capacity OSC writer.
///
/// The encoder keeps nothing between messages except its write cursor, which
/// only [`Encoder::clear`] resets. An append that would not fit fails with
/// [`VrackError::BufferOverflow`] and writes nothing.
#[derive(Debug, Clone)]
pub struct Encoder {
    buffer: Vec<u8>,
    capacity: usize,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends a NUL-terminated, 4-byte aligned string.
    pub fn append_str(&mut self, value: &str) -> Result<()> {
        if value.as_bytes().contains(&0) {
            return Err(VrackError::msg(format!(
                "cannot encode string containing NUL: {value:?}"
            )));
        }
        let padded = align4(value.len() + 1);
        self.reserve(padded)?;
        self.buffer.extend_from_slice(value.as_bytes());
        self.pad_to(padded - value.len());
        Ok(())
    }

    pub fn append_i32(&mut self, value: i32) -> Result<()> {
        self.reserve(4)?;
        self.buffer.extend_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub fn append_f32(&mut self, value: f32) -> Result<()> {
        self.reserve(4)?;
        self.buffer.extend_from_slice(&value.to_bits().to_be_bytes());
        Ok(())
    }

    /// Appends a length-prefixed blob padded to a 4-byte boundary.
    pub fn append_blob(&mut self, bytes: &[u8]) -> Result<()> {
        let length = i32::try_from(bytes.len())
            .map_err(|_| VrackError::msg("blob longer than i32::MAX bytes"))?;
        self.reserve(4 + align4(bytes.len()))?;
        self.buffer.extend_from_slice(&length.to_be_bytes());
        self.buffer.extend_from_slice(bytes);
        self.pad_to(align4(bytes.len()) - bytes.len());
        Ok(())
    }

    /// Appends the `,`-prefixed type tag string for `args`.
    pub fn append_type_tags(&mut self, args: &[Argument]) -> Result<()> {
        let mut tags = String::with_capacity(args.len() + 1);
        tags.push(',');
        tags.extend(args.iter().map(Argument::type_tag));
        self.append_str(&tags)
    }

    pub fn append_argument(&mut self, arg: &Argument) -> Result<()> {
        match arg {
            Argument::Float(value) => self.append_f32(*value),
            Argument::Int(value) => self.append_i32(*value),
            Argument::Str(value) => self.append_str(value),
            Argument::Blob(bytes) => self.append_blob(bytes),
        }
    }

    /// Appends a complete message. On failure the buffer is rolled back to
    /// where it was before the call.
    pub fn encode(&mut self, message: &Message) -> Result<()> {
        let start = self.buffer.len();
        let result = self.encode_fields(message);
        if result.is_err() {
            self.buffer.truncate(start);
        }
        result
    }

    fn encode_fields(&mut self, message: &Message) -> Result<()> {
        self.append_str(&message.path)?;
        self.append_type_tags(&message.args)?;
        for arg in &message.args {
            self.append_argument(arg)?;
        }
        Ok(())
    }

    fn reserve(&self, needed: usize) -> Result<()> {
        let available = self.capacity - self.buffer.len();
        if needed > available {
            return Err(VrackError::BufferOverflow { needed, available });
        }
        Ok(())
    }

    fn pad_to(&mut self, zeros: usize) {
        self.buffer.resize(self.buffer.len() + zeros, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_big_endian_numbers() {
        let mut encoder = Encoder::new();
        encoder.append_i32(0x0102_0304).unwrap();
        encoder.append_f32(1.0).unwrap();
        assert_eq!(encoder.as_bytes(), &[1, 2, 3, 4, 0x3f, 0x80, 0, 0]);
    }

    #[test]
    fn overflow_is_reported_and_writes_nothing() {
        let mut encoder = Encoder::with_capacity(8);
        encoder.append_str("/abc").unwrap();
        assert_eq!(encoder.len(), 8);

        let err = encoder.append_i32(1).unwrap_err();
        assert!(matches!(
            err,
            VrackError::BufferOverflow {
                needed: 4,
                available: 0
            }
        ));
        assert_eq!(encoder.len(), 8);
    }

    #[test]
    fn failed_message_rolls_back() {
        let mut encoder = Encoder::with_capacity(16);
        encoder.append_i32(7).unwrap();

        let long = Message::new("/a/fairly/long/path", vec![Argument::Int(1)]);
        assert!(encoder.encode(&long).is_err());
        assert_eq!(encoder.as_bytes(), &7_i32.to_be_bytes());
    }

    #[test]
    fn clear_resets_cursor() {
        let mut encoder = Encoder::new();
        encoder.append_str("/Initialise").unwrap();
        encoder.clear();
        assert!(encoder.is_empty());
        assert_eq!(encoder.capacity(), DEFAULT_CAPACITY);
    }

    #[test]
    fn rejects_interior_nul() {
        let mut encoder = Encoder::new();
        assert!(encoder.append_str("a\0b").is_err());
        assert!(encoder.is_empty());
    }
}
