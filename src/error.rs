use crate::Token;
use std::io;
use thiserror::Error;

/// An error while encoding or decoding a token stream.
///
/// Neither engine returns these from its hot-path calls. Instead the first
/// error is latched on the [`TokenReader`](crate::TokenReader) or
/// [`TokenWriter`](crate::TokenWriter): once latched, writes become no-ops
/// and reads hand back zero values with `eos()` reporting true, so a caller
/// can run a whole decode and inspect `error()` once at the end.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StreamError {
  /// The stream (or the enclosing sub-stream) ended while a header or
  /// payload still needed bytes.
  #[error("unexpected end of stream")]
  Truncated,

  /// A reserved encoding showed up somewhere it is not valid, such as the
  /// list escape in the middle of a list's elements.
  #[error("reserved byte {byte:#04x} at offset {offset} is not a valid value")]
  MalformedVarint { byte: u8, offset: usize },

  /// An element written into a container carried a different token than the
  /// container was opened with.
  #[error("element token {got:#x} does not match container token {expected:#x}")]
  ContainerTokenMismatch { expected: Token, got: Token },

  /// The underlying byte sink failed.
  #[error("io failure: {0}")]
  Io(#[from] io::Error),

  /// A chunk declared more payload bytes than its enclosing context has
  /// left.
  #[error("declared length {len} exceeds the {remaining} remaining bytes")]
  PayloadTooLarge { len: usize, remaining: usize },
}
