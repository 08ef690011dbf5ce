//! A self-describing binary serialization format, built so that old and new
//! versions of a schema can read each other's streams. A stream is a flat
//! run of chunks, each `<token> <length> <payload>`: the token says which
//! field this is, the length says how far to jump if you don't care. A
//! reader skips tokens it has never heard of, and a field missing from the
//! stream simply keeps whatever value the destination already had. That is
//! the entire compatibility contract, and it means adding a field never
//! breaks an old reader and removing one never breaks a new one.
//!
//! The other half of the story is *trimming*. Payloads carry no redundant
//! bytes (a `u32` of 300 is two bytes, zero is no bytes at all), and with
//! [`trim_defaults`](TokenWriter::trim_defaults) on, a field equal to its
//! default is not written in the first place. Records full of defaults cost
//! nothing on the wire.
//!
//! # Wire format
//!
//! Tokens and lengths share one variable length integer encoding, picked by
//! the first byte:
//!
//! | first byte   | meaning                                            |
//! |--------------|----------------------------------------------------|
//! | `0x00..0x77` | the value itself                                   |
//! | `0x80..0xF7` | 15 bit value: `((first & 0x7f) << 8) \| second`    |
//! | `0xF8`       | list escape: count, shared token, then elements    |
//! | `0xF9..0xFF` | `first - 0xF7` big-endian bytes follow             |
//!
//! Integer payloads are big-endian with leading zero (or, for negatives,
//! `0xFF`) bytes stripped; float payloads are the IEEE bits in little-endian
//! order with trailing zero bytes stripped; strings are plain UTF-8. A
//! nested record is a chunk whose payload is a stream of its own, framed by
//! the chunk length. Homogeneous collections factor their shared token out
//! through the `0xF8` escape, after which each element is just
//! `<length> <payload>`.
//!
//! # Using it
//!
//! Scalars go through [`TokenWriter::put_u32`] and friends; records bind
//! fields to tokens with a [`TokenMap`] (see [`Record`]), and
//! [`GenericRecord`] builds a record at runtime when there is no type to
//! bind. Enums travel as their underlying integer.
//!
//! Neither engine returns results from its per-field calls. Errors latch on
//! the reader or writer, everything after a failure is a cheap no-op, and
//! the caller checks [`error`](TokenReader::error) once at a sensible
//! boundary. See [`StreamError`].

mod dynamic;
mod error;
mod generics;
mod map;
mod num;
mod read;
mod varint;
mod write;

pub use dynamic::GenericRecord;
pub use error::StreamError;
pub use map::{Record, TokenMap};
pub use read::{TokenRead, TokenReader};
pub use write::{MemoryWriter, TokenWrite, TokenWriter};

/// A field identifier. Tokens are usually small ordinals, but any value
/// below [`NO_TOKEN`] is legal and encodes in as few bytes as it needs.
pub type Token = u64;

/// The reserved "no token" value. Never written to the wire; readers hand it
/// back at the end of a stream.
pub const NO_TOKEN: Token = u64::MAX;
