use crate::{num, varint, Record, StreamError, Token, TokenMap, NO_TOKEN};

use std::{
  io::Write,
  ops::{Deref, DerefMut},
};

/// A trait for anything that can be written as one chunk of a token stream.
///
/// Scalars write their trimmed payload, `String` writes UTF-8 bytes, `Vec<T>`
/// writes a container, and record types (see
/// [`stream_record!`](crate::stream_record)) write a nested sub-stream.
pub trait TokenWrite {
  /// Writes `self` to `w` as a chunk under `token`.
  fn put(&self, w: &mut TokenWriter, token: Token);
}

enum Sink<'a> {
  Io(&'a mut dyn Write),
  Buf(Vec<u8>),
}

/// The active container, between the list prefix and its final element.
struct Container {
  token:    Token,
  expected: u64,
  emitted:  u64,
  /// Degenerate one element containers have no list prefix, so their element
  /// still carries its own token on the wire.
  tokened:  bool,
}

/// The encoder half of the codec. A writer borrows a byte sink for its whole
/// life and appends chunks to it; use [`MemoryWriter`] to build a stream in
/// memory instead.
///
/// Every `put_*` call takes the field's token and writes one complete chunk.
/// With [`trim_defaults`](Self::trim_defaults) on (the initial state) a field
/// equal to its default writes nothing at all, which is what keeps streams
/// small and lets old readers treat the field as unchanged.
///
/// Errors latch: after the first failure every call is a no-op, and the
/// caller checks [`bad_stream`](Self::bad_stream) or [`error`](Self::error)
/// when it is done.
pub struct TokenWriter<'a> {
  sink:          Sink<'a>,
  next_token:    Token,
  trim_defaults: bool,
  container:     Option<Container>,
  err:           Option<StreamError>,
}

macro_rules! put_unsigned {
  ($put:ident, $put_or:ident, $ty:ty) => {
    /// Writes an unsigned integer chunk under `token`. A zero value is
    /// treated as the default.
    pub fn $put(&mut self, token: Token, v: $ty) { self.$put_or(token, v, 0) }

    /// Writes an unsigned integer chunk under `token`, treating `default` as
    /// the value to trim.
    pub fn $put_or(&mut self, token: Token, v: $ty, default: $ty) {
      self.put_token(token);
      let mut buf = [0; 8];
      let payload = num::unsigned_bytes(v as u64, &mut buf);
      self.put_payload(payload, v == default);
    }
  };
}

macro_rules! put_signed {
  ($put:ident, $put_or:ident, $ty:ty) => {
    /// Writes a signed integer chunk under `token`. A zero value is treated
    /// as the default.
    pub fn $put(&mut self, token: Token, v: $ty) { self.$put_or(token, v, 0) }

    /// Writes a signed integer chunk under `token`, treating `default` as
    /// the value to trim.
    pub fn $put_or(&mut self, token: Token, v: $ty, default: $ty) {
      self.put_token(token);
      let mut buf = [0; 8];
      let payload = num::signed_bytes(v as i64, &mut buf);
      self.put_payload(payload, v == default);
    }
  };
}

impl<'a> TokenWriter<'a> {
  /// Creates a writer that appends to the given sink. The sink is borrowed,
  /// not owned; io failures latch as [`StreamError::Io`].
  pub fn new(sink: &'a mut dyn Write) -> TokenWriter<'a> {
    TokenWriter {
      sink:          Sink::Io(sink),
      next_token:    NO_TOKEN,
      trim_defaults: true,
      container:     None,
      err:           None,
    }
  }

  fn memory() -> TokenWriter<'static> {
    TokenWriter {
      sink:          Sink::Buf(vec![]),
      next_token:    NO_TOKEN,
      trim_defaults: true,
      container:     None,
      err:           None,
    }
  }

  /// Returns true once any operation has failed. Everything after the first
  /// failure is a no-op.
  pub fn bad_stream(&self) -> bool { self.err.is_some() }

  /// The latched error, if any.
  pub fn error(&self) -> Option<&StreamError> { self.err.as_ref() }

  /// Whether default-valued fields are currently omitted.
  pub fn trim_defaults(&self) -> bool { self.trim_defaults }

  pub fn set_trim_defaults(&mut self, on: bool) { self.trim_defaults = on; }

  /// Runs `f` with [`trim_defaults`](Self::trim_defaults) set to `on`,
  /// restoring the previous setting afterwards (also when `f` bails early).
  pub fn with_trim_defaults<T>(&mut self, on: bool, f: impl FnOnce(&mut TokenWriter<'a>) -> T) -> T {
    let prev = std::mem::replace(&mut self.trim_defaults, on);
    let out = f(self);
    self.trim_defaults = prev;
    out
  }

  fn fail(&mut self, e: StreamError) {
    if self.err.is_none() {
      log::warn!("token stream write error: {e}");
      self.err = Some(e);
    }
  }

  fn write_raw(&mut self, bytes: &[u8]) {
    if self.err.is_some() {
      return;
    }
    match &mut self.sink {
      Sink::Io(w) => {
        if let Err(e) = w.write_all(bytes) {
          self.fail(e.into());
        }
      }
      Sink::Buf(v) => v.extend_from_slice(bytes),
    }
  }

  fn put_varint(&mut self, v: u64) {
    let mut buf = [0; 9];
    let n = varint::encode(v, &mut buf);
    self.write_raw(&buf[..n]);
  }

  /// Records the token for the next chunk. The scalar and record putters
  /// call this themselves (so putting the same token ahead of time is fine);
  /// it is public for hand-rolled encoders.
  ///
  /// # Panics
  /// - If a different token is already pending, or `token` is [`NO_TOKEN`].
  pub fn put_token(&mut self, token: Token) {
    assert!(token != NO_TOKEN, "cannot write the reserved token");
    assert!(
      self.next_token == NO_TOKEN || self.next_token == token,
      "token {token:#x} put while {:#x} is still pending",
      self.next_token
    );
    self.next_token = token;
  }

  /// Emits the pending chunk, or drops it when it holds a trimmable default.
  /// Inside a container the default check is skipped so every element keeps
  /// its slot.
  fn put_payload(&mut self, payload: &[u8], is_default: bool) {
    if self.err.is_some() {
      self.next_token = NO_TOKEN;
      return;
    }
    if is_default && self.trim_defaults && self.container.is_none() {
      self.next_token = NO_TOKEN;
      return;
    }
    self.emit(payload);
  }

  fn emit(&mut self, payload: &[u8]) {
    let token = std::mem::replace(&mut self.next_token, NO_TOKEN);
    debug_assert!(token != NO_TOKEN, "a chunk was written with no token pending");
    let mut tokened = true;
    if let Some(mut c) = self.container.take() {
      if token != c.token {
        self.fail(StreamError::ContainerTokenMismatch { expected: c.token, got: token });
        return;
      }
      c.emitted += 1;
      tokened = c.tokened;
      if c.emitted < c.expected {
        self.container = Some(c);
      }
    }
    if tokened {
      self.put_varint(token);
    }
    self.put_varint(payload.len() as u64);
    self.write_raw(payload);
  }

  /// Writes some `T` under `token`. This compiles down to the matching
  /// `put_*` call, so use whichever reads better.
  pub fn put<T>(&mut self, token: Token, v: &T)
  where
    T: ?Sized + TokenWrite,
  {
    v.put(self, token)
  }

  put_unsigned!(put_u8, put_u8_or, u8);
  put_unsigned!(put_u16, put_u16_or, u16);
  put_unsigned!(put_u32, put_u32_or, u32);
  put_unsigned!(put_u64, put_u64_or, u64);
  put_signed!(put_i8, put_i8_or, i8);
  put_signed!(put_i16, put_i16_or, i16);
  put_signed!(put_i32, put_i32_or, i32);
  put_signed!(put_i64, put_i64_or, i64);

  /// Writes a boolean chunk: a single `0x01` byte for true, an empty payload
  /// for false (which trims away entirely).
  pub fn put_bool(&mut self, token: Token, v: bool) {
    self.put_token(token);
    self.put_payload(if v { &[1] } else { &[] }, !v);
  }

  /// Writes a float chunk under `token`. `0.0` is treated as the default.
  pub fn put_f32(&mut self, token: Token, v: f32) { self.put_f32_or(token, v, 0.0) }

  /// Writes a float chunk, trimming against `default` by bit pattern.
  pub fn put_f32_or(&mut self, token: Token, v: f32, default: f32) {
    self.put_token(token);
    let mut buf = [0; 4];
    let payload = num::f32_bytes(v, &mut buf);
    self.put_payload(payload, v.to_bits() == default.to_bits());
  }

  /// Writes a double chunk under `token`. `0.0` is treated as the default.
  pub fn put_f64(&mut self, token: Token, v: f64) { self.put_f64_or(token, v, 0.0) }

  /// Writes a double chunk, trimming against `default` by bit pattern.
  pub fn put_f64_or(&mut self, token: Token, v: f64, default: f64) {
    self.put_token(token);
    let mut buf = [0; 8];
    let payload = num::f64_bytes(v, &mut buf);
    self.put_payload(payload, v.to_bits() == default.to_bits());
  }

  /// Writes a string chunk: the UTF-8 bytes with no terminator, the length
  /// carried by the chunk header. The empty string is the default.
  pub fn put_str(&mut self, token: Token, v: &str) { self.put_str_or(token, v, "") }

  /// Writes a string chunk, treating `default` as the value to trim.
  pub fn put_str_or(&mut self, token: Token, v: &str, default: &str) {
    self.put_token(token);
    self.put_payload(v.as_bytes(), v == default);
  }

  /// Writes a wide string as UTF-8, replacing lone surrogates. The reader
  /// side is [`get_wide`](crate::TokenReader::get_wide).
  pub fn put_wide(&mut self, token: Token, v: &[u16]) {
    let utf8: String = char::decode_utf16(v.iter().copied())
      .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
      .collect();
    self.put_str(token, &utf8)
  }

  /// Writes a raw byte chunk. The empty slice is the default.
  pub fn put_bytes(&mut self, token: Token, v: &[u8]) {
    self.put_token(token);
    self.put_payload(v, v.is_empty());
  }

  /// Writes a container of items sharing `token`. An empty slice writes
  /// nothing, one item writes an ordinary chunk, and two or more write the
  /// list prefix followed by token-less elements. Element defaults are never
  /// trimmed, so zero-valued items keep their positions.
  pub fn put_container<T: TokenWrite>(&mut self, token: Token, items: &[T]) {
    self.put_container_iter(token, items.iter())
  }

  /// Iterator form of [`put_container`](Self::put_container), for
  /// collections that are not slices.
  pub fn put_container_iter<T: TokenWrite>(
    &mut self,
    token: Token,
    iter: impl ExactSizeIterator<Item = T>,
  ) {
    let count = iter.len() as u64;
    if count == 0 {
      return;
    }
    self.put_container_element_count(token, count);
    for item in iter {
      item.put(self, token);
    }
  }

  /// Opens a container for exactly `count` elements, which the caller then
  /// writes one by one under the same `token`. Writing an element with a
  /// different token latches
  /// [`ContainerTokenMismatch`](StreamError::ContainerTokenMismatch); the
  /// container closes itself after the final element.
  ///
  /// # Panics
  /// - If a container is already open. The wire gives an element no room for
  ///   a nested bare list; nest through a record or tuple instead.
  pub fn put_container_element_count(&mut self, token: Token, count: u64) {
    assert!(
      self.container.is_none(),
      "cannot open a container inside a container (nest through a record instead)"
    );
    if self.err.is_some() || count == 0 {
      return;
    }
    if count >= 2 {
      self.write_raw(&[varint::LIST_ESCAPE]);
      self.put_varint(count);
      self.put_varint(token);
    }
    self.container = Some(Container { token, expected: count, emitted: 0, tokened: count < 2 });
  }

  /// Writes a nested sub-stream under `token`: `f` runs against a scratch
  /// writer and whatever it produced becomes the chunk payload. An empty
  /// sub-stream is dropped under trim-defaults unless `keep_stub` asks for
  /// the zero-length chunk to stay (it always stays inside a container, so
  /// elements keep their slots).
  pub fn put_stream(&mut self, token: Token, keep_stub: bool, f: impl FnOnce(&mut TokenWriter)) {
    self.put_token(token);
    if self.err.is_some() {
      self.next_token = NO_TOKEN;
      return;
    }
    let mut sub = TokenWriter::memory();
    sub.trim_defaults = self.trim_defaults;
    f(&mut sub);
    if let Some(e) = sub.err.take() {
      self.next_token = NO_TOKEN;
      if self.err.is_none() {
        self.err = Some(e);
      }
      return;
    }
    let bytes = match sub.sink {
      Sink::Buf(v) => v,
      Sink::Io(_) => unreachable!(),
    };
    let keep = keep_stub || self.container.is_some();
    self.put_payload(&bytes, bytes.is_empty() && !keep);
  }

  /// Writes a record as a nested sub-stream under `token`, using the
  /// record's own token map.
  pub fn put_record<R: Record>(&mut self, token: Token, rec: &R) {
    self.put_stream(token, false, |w| rec.write_fields(w))
  }

  /// Like [`put_record`](Self::put_record), but an empty record still emits
  /// its `<token> <length 0>` header under trim-defaults.
  pub fn put_record_stub<R: Record>(&mut self, token: Token, rec: &R) {
    self.put_stream(token, true, |w| rec.write_fields(w))
  }

  /// Writes a record through an explicit token map.
  pub fn put_record_with<R>(
    &mut self,
    token: Token,
    rec: &R,
    map: &TokenMap<R>,
    keep_stub: bool,
  ) {
    self.put_stream(token, keep_stub, |w| map.write_fields(rec, w))
  }
}

/// A [`TokenWriter`] that owns a growable buffer instead of borrowing a
/// sink. This is the writer the engine itself uses for sub-streams.
pub struct MemoryWriter {
  inner: TokenWriter<'static>,
}

impl MemoryWriter {
  pub fn new() -> MemoryWriter { MemoryWriter { inner: TokenWriter::memory() } }

  /// The stream built so far.
  pub fn bytes(&self) -> &[u8] {
    match &self.inner.sink {
      Sink::Buf(v) => v,
      Sink::Io(_) => unreachable!(),
    }
  }

  pub fn into_bytes(self) -> Vec<u8> {
    match self.inner.sink {
      Sink::Buf(v) => v,
      Sink::Io(_) => unreachable!(),
    }
  }
}

impl Default for MemoryWriter {
  fn default() -> Self { MemoryWriter::new() }
}

impl Deref for MemoryWriter {
  type Target = TokenWriter<'static>;

  fn deref(&self) -> &Self::Target { &self.inner }
}

impl DerefMut for MemoryWriter {
  fn deref_mut(&mut self) -> &mut Self::Target { &mut self.inner }
}
