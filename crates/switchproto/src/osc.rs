//! OSC 1.0 codec
//!
//! The remote application speaks Open Sound Control over UDP. One datagram
//! carries one packet, which is either a message or a bundle.
//!
//! ## Wire Format
//!
//! ```text
//! Message:
//!   address      OSC-string ("/live/song/get/tempo\0" padded to 4 bytes)
//!   type tags    OSC-string (",if\0")
//!   arguments    big-endian, each padded to 4 bytes
//!
//! Bundle:
//!   "#bundle\0"  8 bytes
//!   time tag     8 bytes (NTP format, big-endian u64)
//!   elements     repeated: i32 size + packet bytes
//! ```
//!
//! Supported type tags: `i f s S b h d t c T F N I`. Bundles are only ever
//! decoded (the bridge never sends them), and are flattened into their
//! messages by [`OscPacket::into_messages`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::{self, Deserializer, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker that opens every bundle.
pub const BUNDLE_TAG: &[u8] = b"#bundle\0";

/// Nested bundles deeper than this are rejected rather than recursed into.
pub const MAX_BUNDLE_DEPTH: usize = 8;

/// Errors while encoding or decoding OSC packets.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OscError {
    #[error("Empty packet")]
    Empty,
    #[error("Truncated {what}: need {needed} bytes, {remaining} left")]
    Truncated {
        what: &'static str,
        needed: usize,
        remaining: usize,
    },
    #[error("Unterminated string in {0}")]
    Unterminated(&'static str),
    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
    #[error("Invalid address pattern: {0:?}")]
    InvalidAddress(String),
    #[error("Type tag string must start with ','")]
    MalformedTypeTags,
    #[error("Unsupported type tag: {0:?}")]
    UnsupportedTypeTag(char),
    #[error("Invalid char argument: {0:#x}")]
    InvalidChar(u32),
    #[error("Invalid bundle element size: {0}")]
    InvalidElementSize(i32),
    #[error("Bundles nested deeper than {MAX_BUNDLE_DEPTH}")]
    BundleTooDeep,
    #[error("Argument too large to encode: {0} bytes")]
    TooLarge(usize),
}

/// A single OSC argument.
///
/// On the JSON side integers, floats, strings and booleans are accepted;
/// booleans are sent as `i` 0/1, matching what the remote application expects.
#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    Int(i32),
    Float(f32),
    String(String),
    Blob(Bytes),
    Long(i64),
    Double(f64),
    TimeTag(u64),
    Char(char),
    Bool(bool),
    Nil,
    Impulse,
}

impl OscArg {
    /// The type tag character this argument encodes as.
    pub fn type_tag(&self) -> char {
        match self {
            OscArg::Int(_) => 'i',
            OscArg::Float(_) => 'f',
            OscArg::String(_) => 's',
            OscArg::Blob(_) => 'b',
            OscArg::Long(_) => 'h',
            OscArg::Double(_) => 'd',
            OscArg::TimeTag(_) => 't',
            OscArg::Char(_) => 'c',
            OscArg::Bool(true) => 'T',
            OscArg::Bool(false) => 'F',
            OscArg::Nil => 'N',
            OscArg::Impulse => 'I',
        }
    }

    /// Smallest integer type that holds `value`.
    pub fn from_integer(value: i64) -> Self {
        match i32::try_from(value) {
            Ok(v) => OscArg::Int(v),
            Err(_) => OscArg::Long(value),
        }
    }

    /// Booleans travel as integers.
    pub fn from_bool(value: bool) -> Self {
        OscArg::Int(i32::from(value))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            OscArg::Int(v) => Some(f64::from(v)),
            OscArg::Float(v) => Some(f64::from(v)),
            OscArg::Long(v) => Some(v as f64),
            OscArg::Double(v) => Some(v),
            _ => None,
        }
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<(), OscError> {
        match self {
            OscArg::Int(v) => buf.put_i32(*v),
            OscArg::Float(v) => buf.put_f32(*v),
            OscArg::String(s) => put_padded_str(buf, s),
            OscArg::Blob(b) => {
                let len = i32::try_from(b.len()).map_err(|_| OscError::TooLarge(b.len()))?;
                buf.put_i32(len);
                buf.put_slice(b);
                put_padding(buf, b.len());
            }
            OscArg::Long(v) => buf.put_i64(*v),
            OscArg::Double(v) => buf.put_f64(*v),
            OscArg::TimeTag(v) => buf.put_u64(*v),
            OscArg::Char(c) => buf.put_u32(u32::from(*c)),
            OscArg::Bool(_) | OscArg::Nil | OscArg::Impulse => {}
        }
        Ok(())
    }

    fn decode(tag: char, buf: &mut &[u8]) -> Result<Self, OscError> {
        let arg = match tag {
            'i' => OscArg::Int(take(buf, 4, "int32")?.get_i32()),
            'f' => OscArg::Float(take(buf, 4, "float32")?.get_f32()),
            's' | 'S' => OscArg::String(read_padded_str(buf, "string argument")?),
            'b' => {
                let len = take(buf, 4, "blob size")?.get_i32();
                let len = usize::try_from(len).map_err(|_| OscError::InvalidElementSize(len))?;
                let data = Bytes::copy_from_slice(take(buf, len, "blob")?);
                let pad = padded_len(len) - len;
                take(buf, pad, "blob padding")?;
                OscArg::Blob(data)
            }
            'h' => OscArg::Long(take(buf, 8, "int64")?.get_i64()),
            'd' => OscArg::Double(take(buf, 8, "float64")?.get_f64()),
            't' => OscArg::TimeTag(take(buf, 8, "time tag")?.get_u64()),
            'c' => {
                let raw = take(buf, 4, "char")?.get_u32();
                OscArg::Char(char::from_u32(raw).ok_or(OscError::InvalidChar(raw))?)
            }
            'T' => OscArg::Bool(true),
            'F' => OscArg::Bool(false),
            'N' => OscArg::Nil,
            'I' => OscArg::Impulse,
            other => return Err(OscError::UnsupportedTypeTag(other)),
        };
        Ok(arg)
    }
}

impl fmt::Display for OscArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OscArg::Int(v) => write!(f, "{}", v),
            OscArg::Float(v) => write!(f, "{}", v),
            OscArg::String(s) => write!(f, "{:?}", s),
            OscArg::Blob(b) => write!(f, "<blob {} bytes>", b.len()),
            OscArg::Long(v) => write!(f, "{}", v),
            OscArg::Double(v) => write!(f, "{}", v),
            OscArg::TimeTag(v) => write!(f, "t{}", v),
            OscArg::Char(c) => write!(f, "{:?}", c),
            OscArg::Bool(b) => write!(f, "{}", b),
            OscArg::Nil => f.write_str("nil"),
            OscArg::Impulse => f.write_str("impulse"),
        }
    }
}

impl From<i32> for OscArg {
    fn from(v: i32) -> Self {
        OscArg::Int(v)
    }
}

impl From<f32> for OscArg {
    fn from(v: f32) -> Self {
        OscArg::Float(v)
    }
}

impl From<&str> for OscArg {
    fn from(v: &str) -> Self {
        OscArg::String(v.to_string())
    }
}

impl From<String> for OscArg {
    fn from(v: String) -> Self {
        OscArg::String(v)
    }
}

impl From<bool> for OscArg {
    fn from(v: bool) -> Self {
        OscArg::from_bool(v)
    }
}

impl Serialize for OscArg {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            OscArg::Int(v) => serializer.serialize_i32(*v),
            OscArg::Float(v) => serializer.serialize_f32(*v),
            OscArg::String(s) => serializer.serialize_str(s),
            OscArg::Blob(b) => {
                let mut seq = serializer.serialize_seq(Some(b.len()))?;
                for byte in b.iter() {
                    seq.serialize_element(byte)?;
                }
                seq.end()
            }
            OscArg::Long(v) => serializer.serialize_i64(*v),
            OscArg::Double(v) => serializer.serialize_f64(*v),
            OscArg::TimeTag(v) => serializer.serialize_u64(*v),
            OscArg::Char(c) => serializer.serialize_char(*c),
            OscArg::Bool(b) => serializer.serialize_bool(*b),
            OscArg::Nil | OscArg::Impulse => serializer.serialize_unit(),
        }
    }
}

impl<'de> Deserialize<'de> for OscArg {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(OscArgVisitor)
    }
}

struct OscArgVisitor;

impl<'de> Visitor<'de> for OscArgVisitor {
    type Value = OscArg;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an integer, float, string, boolean, null or array of bytes")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<OscArg, E> {
        Ok(OscArg::from_bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<OscArg, E> {
        Ok(OscArg::from_integer(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<OscArg, E> {
        match i64::try_from(v) {
            Ok(v) => Ok(OscArg::from_integer(v)),
            Err(_) => Err(E::custom(format!("integer {} does not fit in 64 bits signed", v))),
        }
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<OscArg, E> {
        Ok(OscArg::Float(v as f32))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<OscArg, E> {
        Ok(OscArg::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<OscArg, E> {
        Ok(OscArg::String(v))
    }

    fn visit_unit<E: de::Error>(self) -> Result<OscArg, E> {
        Ok(OscArg::Nil)
    }

    fn visit_none<E: de::Error>(self) -> Result<OscArg, E> {
        Ok(OscArg::Nil)
    }

    // Blobs render as arrays of byte values
    fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<OscArg, A::Error> {
        let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(byte) = seq.next_element::<u8>()? {
            bytes.push(byte);
        }
        Ok(OscArg::Blob(Bytes::from(bytes)))
    }
}

/// A single OSC message: address plus ordered arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub address: String,
    pub args: Vec<OscArg>,
}

impl OscMessage {
    pub fn new(address: impl Into<String>, args: Vec<OscArg>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    /// Encode into a datagram payload.
    pub fn encode(&self) -> Result<Bytes, OscError> {
        validate_address(&self.address)?;

        let mut buf = BytesMut::with_capacity(64);
        put_padded_str(&mut buf, &self.address);

        let mut tags = String::with_capacity(self.args.len() + 1);
        tags.push(',');
        for arg in &self.args {
            tags.push(arg.type_tag());
        }
        put_padded_str(&mut buf, &tags);

        for arg in &self.args {
            arg.encode(&mut buf)?;
        }

        Ok(buf.freeze())
    }

    /// Decode a datagram that must hold a single message (not a bundle).
    pub fn decode(data: &[u8]) -> Result<Self, OscError> {
        let mut buf = data;
        decode_message(&mut buf)
    }
}

impl fmt::Display for OscMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// A bundle of packets sharing one time tag.
#[derive(Debug, Clone, PartialEq)]
pub struct OscBundle {
    pub timetag: u64,
    pub content: Vec<OscPacket>,
}

/// Anything that can arrive in one datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum OscPacket {
    Message(OscMessage),
    Bundle(OscBundle),
}

impl OscPacket {
    /// Decode a datagram payload.
    pub fn decode(data: &[u8]) -> Result<Self, OscError> {
        decode_packet(data, 0)
    }

    /// Flatten bundles, preserving the order messages appear on the wire.
    pub fn into_messages(self) -> Vec<OscMessage> {
        let mut out = Vec::new();
        self.collect_into(&mut out);
        out
    }

    fn collect_into(self, out: &mut Vec<OscMessage>) {
        match self {
            OscPacket::Message(msg) => out.push(msg),
            OscPacket::Bundle(bundle) => {
                for packet in bundle.content {
                    packet.collect_into(out);
                }
            }
        }
    }
}

fn decode_packet(data: &[u8], depth: usize) -> Result<OscPacket, OscError> {
    if data.is_empty() {
        return Err(OscError::Empty);
    }

    if data.starts_with(BUNDLE_TAG) {
        if depth >= MAX_BUNDLE_DEPTH {
            return Err(OscError::BundleTooDeep);
        }
        let mut buf = &data[BUNDLE_TAG.len()..];
        let timetag = take(&mut buf, 8, "bundle time tag")?.get_u64();

        let mut content = Vec::new();
        while !buf.is_empty() {
            let size = take(&mut buf, 4, "bundle element size")?.get_i32();
            let len = usize::try_from(size)
                .ok()
                .filter(|len| len % 4 == 0)
                .ok_or(OscError::InvalidElementSize(size))?;
            let element = take(&mut buf, len, "bundle element")?;
            content.push(decode_packet(element, depth + 1)?);
        }

        return Ok(OscPacket::Bundle(OscBundle { timetag, content }));
    }

    let mut buf = data;
    decode_message(&mut buf).map(OscPacket::Message)
}

fn decode_message(buf: &mut &[u8]) -> Result<OscMessage, OscError> {
    if buf.is_empty() {
        return Err(OscError::Empty);
    }

    let address = read_padded_str(buf, "address")?;
    validate_address(&address)?;

    // Messages without a type tag string are legal in OSC 1.0 and carry no arguments
    if buf.is_empty() {
        return Ok(OscMessage::new(address, Vec::new()));
    }

    let tags = read_padded_str(buf, "type tags")?;
    let tags = tags.strip_prefix(',').ok_or(OscError::MalformedTypeTags)?;

    let mut args = Vec::with_capacity(tags.len());
    for tag in tags.chars() {
        args.push(OscArg::decode(tag, buf)?);
    }

    Ok(OscMessage::new(address, args))
}

fn validate_address(address: &str) -> Result<(), OscError> {
    if !address.starts_with('/') || address.chars().any(|c| c.is_whitespace() || c == '\0') {
        return Err(OscError::InvalidAddress(address.to_string()));
    }
    Ok(())
}

/// Length of a string or blob once padded to a 4-byte boundary.
/// Strings include their terminating NUL in `len`.
fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

fn put_padding(buf: &mut BytesMut, written: usize) {
    let pad = padded_len(written) - written;
    buf.put_bytes(0, pad);
}

fn put_padded_str(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
    put_padding(buf, s.len() + 1);
}

fn read_padded_str(buf: &mut &[u8], what: &'static str) -> Result<String, OscError> {
    let nul = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or(OscError::Unterminated(what))?;
    let s = std::str::from_utf8(&buf[..nul])
        .map_err(|_| OscError::InvalidUtf8(what))?
        .to_string();
    let consumed = padded_len(nul + 1);
    take(buf, consumed, what)?;
    Ok(s)
}

/// Split `n` bytes off the front of `buf`, or report what was being read.
fn take<'a>(buf: &mut &'a [u8], n: usize, what: &'static str) -> Result<&'a [u8], OscError> {
    if buf.len() < n {
        return Err(OscError::Truncated {
            what,
            needed: n,
            remaining: buf.len(),
        });
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}
