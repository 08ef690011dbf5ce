use crate::{num, varint, varint::VarintError, Record, StreamError, Token, TokenMap, NO_TOKEN};

use std::fmt;

/// A trait for anything that can be read out of one chunk of a token stream.
///
/// `get` consumes the payload of the chunk whose header was just decoded. A
/// zero length payload leaves the value at its type's zero, and an absent
/// chunk (never dispatched) leaves it untouched; that asymmetry is what makes
/// old streams readable by new code.
pub trait TokenRead {
  /// Reads the current chunk's payload into `self`.
  fn get(&mut self, r: &mut TokenReader);
}

/// The active container, between the list prefix and its final element.
#[derive(Clone)]
struct Container {
  token: Token,
  count: u64,
  /// How many element headers have been decoded so far.
  index: u64,
}

#[derive(Clone)]
struct Context {
  end:       usize,
  container: Option<Container>,
}

/// The decoder half of the codec. A reader walks a byte slice chunk by
/// chunk: [`get_token`](Self::get_token) decodes the next header, the caller
/// dispatches on the token and consumes the payload with a `get_*` call (or
/// [`skip`](Self::skip)s it). Tokens the caller does not recognize cost
/// nothing to ignore, which is the whole forward compatibility story.
///
/// Errors latch: after the first failure every `get_*` returns the type's
/// zero value, [`eos`](Self::eos) reports true, and the caller checks
/// [`error`](Self::error) once at the end.
pub struct TokenReader<'a> {
  data:         &'a [u8],
  offset:       usize,
  /// Payload bytes of the current chunk not consumed yet.
  remaining:    usize,
  last_token:   Token,
  token_pushed: bool,
  next_count:   u64,
  ctx:          Context,
  stack:        Vec<Context>,
  err:          Option<StreamError>,
}

macro_rules! get_unsigned {
  ($get:ident, $ty:ty) => {
    /// Consumes the current payload as an unsigned integer, zero-extending
    /// short payloads. Empty decodes to zero.
    pub fn $get(&mut self) -> $ty { num::decode_unsigned(self.take_payload()) as $ty }
  };
}

macro_rules! get_signed {
  ($get:ident, $ty:ty) => {
    /// Consumes the current payload as a signed integer, sign-extending from
    /// the first payload byte. Empty decodes to zero.
    pub fn $get(&mut self) -> $ty { num::decode_signed(self.take_payload()) as $ty }
  };
}

impl<'a> TokenReader<'a> {
  /// Creates a reader over `data`. The slice length is the stream end; a top
  /// level stream has no other framing.
  pub fn new(data: &'a [u8]) -> TokenReader<'a> {
    TokenReader {
      data,
      offset: 0,
      remaining: 0,
      last_token: NO_TOKEN,
      token_pushed: false,
      next_count: 0,
      ctx: Context { end: data.len(), container: None },
      stack: vec![],
      err: None,
    }
  }

  /// Returns true once any operation has failed. Everything after the first
  /// failure reads as zero.
  pub fn bad_stream(&self) -> bool { self.err.is_some() }

  /// The latched error, if any.
  pub fn error(&self) -> Option<&StreamError> { self.err.as_ref() }

  /// The byte offset of the cursor into the source.
  pub fn index(&self) -> usize { self.offset }

  /// The token most recently returned by [`get_token`](Self::get_token).
  pub fn last_token(&self) -> Token { self.last_token }

  /// Element count advertised by the most recent list prefix, for
  /// preallocation. Zero when the current chunk did not open a list.
  pub fn next_container_element_count(&self) -> u64 { self.next_count }

  /// True when the current (sub-)stream has no chunks left, or the reader
  /// has latched an error.
  pub fn eos(&self) -> bool {
    self.bad_stream() || (!self.token_pushed && self.offset >= self.ctx.end)
  }

  /// True when fewer than `n` bytes remain in the current (sub-)stream.
  pub fn past_eos(&self, n: usize) -> bool {
    self.bad_stream() || self.offset + n > self.ctx.end
  }

  /// Makes the next [`get_token`](Self::get_token) return
  /// [`last_token`](Self::last_token) again instead of decoding. One token
  /// of look-ahead, used when iteration reads one header too many.
  pub fn push_last_token(&mut self) { self.token_pushed = true; }

  /// Discards the rest of the current payload.
  pub fn skip(&mut self) {
    if self.bad_stream() {
      return;
    }
    self.offset += self.remaining;
    self.remaining = 0;
  }

  fn fail(&mut self, e: StreamError) {
    if self.err.is_none() {
      log::warn!("token stream read error: {e}");
      self.err = Some(e);
    }
  }

  fn read_varint(&mut self) -> Result<u64, StreamError> {
    match varint::decode(&self.data[self.offset..self.ctx.end]) {
      Ok((v, n)) => {
        self.offset += n;
        Ok(v)
      }
      Err(VarintError::Truncated) => Err(StreamError::Truncated),
      Err(VarintError::Escape) => {
        Err(StreamError::MalformedVarint { byte: varint::LIST_ESCAPE, offset: self.offset })
      }
    }
  }

  fn varint_or_latch(&mut self) -> Option<u64> {
    match self.read_varint() {
      Ok(v) => Some(v),
      Err(e) => {
        self.fail(e);
        None
      }
    }
  }

  /// Installs the payload bounds for the chunk whose header was just read.
  fn begin_payload(&mut self, len: u64) -> bool {
    let left = self.ctx.end - self.offset;
    if len > left as u64 {
      self.fail(StreamError::PayloadTooLarge { len: len as usize, remaining: left });
      return false;
    }
    self.remaining = len as usize;
    true
  }

  /// Decodes the next chunk header and returns its token; the payload is
  /// then pending for a `get_*` call. Whatever is left of the previous
  /// payload is skipped first. Inside a list the shared token is handed back
  /// for every element; at the end of the stream this returns [`NO_TOKEN`].
  pub fn get_token(&mut self) -> Token {
    if self.bad_stream() {
      return NO_TOKEN;
    }
    if self.token_pushed {
      self.token_pushed = false;
      return self.last_token;
    }
    self.offset += self.remaining;
    self.remaining = 0;

    if let Some(c) = self.ctx.container.clone() {
      // The next element of the active list. It carries no token of its own,
      // only a length.
      self.next_count = 0;
      let Some(len) = self.varint_or_latch() else { return NO_TOKEN };
      if !self.begin_payload(len) {
        return NO_TOKEN;
      }
      if c.index + 1 < c.count {
        self.ctx.container = Some(Container { index: c.index + 1, ..c });
      } else {
        self.ctx.container = None;
      }
      self.last_token = c.token;
      return c.token;
    }

    self.next_count = 0;
    if self.offset >= self.ctx.end {
      return NO_TOKEN;
    }
    if self.data[self.offset] == varint::LIST_ESCAPE {
      // A list: count and shared token, then the first element's length.
      let escape_at = self.offset;
      self.offset += 1;
      let Some(count) = self.varint_or_latch() else { return NO_TOKEN };
      let Some(token) = self.varint_or_latch() else { return NO_TOKEN };
      if count == 0 {
        self.fail(StreamError::MalformedVarint { byte: varint::LIST_ESCAPE, offset: escape_at });
        return NO_TOKEN;
      }
      let Some(len) = self.varint_or_latch() else { return NO_TOKEN };
      if !self.begin_payload(len) {
        return NO_TOKEN;
      }
      if count > 1 {
        self.ctx.container = Some(Container { token, count, index: 1 });
      }
      self.next_count = count;
      self.last_token = token;
      return token;
    }

    let Some(token) = self.varint_or_latch() else { return NO_TOKEN };
    let Some(len) = self.varint_or_latch() else { return NO_TOKEN };
    if !self.begin_payload(len) {
      return NO_TOKEN;
    }
    self.last_token = token;
    token
  }

  /// Consumes the rest of the current payload, handing back the raw bytes.
  fn take_payload(&mut self) -> &'a [u8] {
    if self.bad_stream() {
      return &[];
    }
    let payload = &self.data[self.offset..self.offset + self.remaining];
    self.offset += self.remaining;
    self.remaining = 0;
    payload
  }

  /// Reads some `T` out of the current chunk. This compiles down to the
  /// matching `get_*` call, so use whichever reads better.
  pub fn get<T: Default + TokenRead>(&mut self) -> T {
    let mut v = T::default();
    v.get(self);
    v
  }

  /// Reads the current chunk into an existing value, preserving whatever an
  /// absent part of the payload does not overwrite.
  pub fn get_into<T: TokenRead>(&mut self, dest: &mut T) { dest.get(self) }

  get_unsigned!(get_u8, u8);
  get_unsigned!(get_u16, u16);
  get_unsigned!(get_u32, u32);
  get_unsigned!(get_u64, u64);
  get_signed!(get_i8, i8);
  get_signed!(get_i16, i16);
  get_signed!(get_i32, i32);
  get_signed!(get_i64, i64);

  /// Consumes the current payload as a boolean. Empty is false.
  pub fn get_bool(&mut self) -> bool { num::decode_unsigned(self.take_payload()) != 0 }

  /// Consumes the current payload as a float, zero-filling missing trailing
  /// bytes. Empty decodes to `0.0`.
  pub fn get_f32(&mut self) -> f32 { num::decode_f32(self.take_payload()) }

  /// Consumes the current payload as a double, zero-filling missing trailing
  /// bytes. Empty decodes to `0.0`.
  pub fn get_f64(&mut self) -> f64 { num::decode_f64(self.take_payload()) }

  /// Consumes the current payload as raw bytes.
  pub fn get_bytes(&mut self) -> &'a [u8] { self.take_payload() }

  /// Consumes the current payload as a UTF-8 string. Invalid sequences are
  /// replaced rather than failing the stream.
  pub fn get_string(&mut self) -> String {
    String::from_utf8_lossy(self.take_payload()).into_owned()
  }

  /// Consumes the current payload as a wide string, the counterpart of
  /// [`put_wide`](crate::TokenWriter::put_wide).
  pub fn get_wide(&mut self) -> Vec<u16> { self.get_string().encode_utf16().collect() }

  /// Reads container elements into `dest`, starting with the chunk whose
  /// header was just decoded and appending until the token changes (that
  /// header is pushed back) or the stream ends. When a list prefix
  /// advertised a count, `dest` reserves it up front.
  pub fn get_container<T: Default + TokenRead>(&mut self, dest: &mut Vec<T>) {
    if self.bad_stream() {
      return;
    }
    let token = self.last_token;
    dest.reserve(self.next_count as usize);
    loop {
      let mut item = T::default();
      item.get(self);
      dest.push(item);
      if self.eos() {
        break;
      }
      if self.get_token() != token {
        self.push_last_token();
        break;
      }
    }
  }

  /// Reads the current chunk as a nested record through its own token map.
  pub fn get_record<R: Record>(&mut self, rec: &mut R) {
    self.sub_stream(|r| rec.read_fields(r))
  }

  /// Reads the current chunk as a nested record through an explicit map.
  pub fn get_record_with<R>(&mut self, rec: &mut R, map: &TokenMap<R>) {
    self.sub_stream(|r| map.read_all(rec, r))
  }

  /// Runs `f` against the current chunk's payload as a stream of its own.
  /// On exit the cursor lands exactly on the payload's declared end, no
  /// matter how much `f` consumed, and the outer context (including any
  /// container iteration) is restored. Scopes nest.
  pub fn sub_stream<T>(&mut self, f: impl FnOnce(&mut TokenReader<'a>) -> T) -> T {
    let inner_end = self.offset + self.remaining;
    let outer = std::mem::replace(&mut self.ctx, Context { end: inner_end, container: None });
    self.stack.push(outer);
    self.remaining = 0;
    self.token_pushed = false;
    let out = f(self);
    self.offset = self.ctx.end;
    self.remaining = 0;
    self.token_pushed = false;
    self.next_count = 0;
    self.ctx = self.stack.pop().expect("sub-stream scope underflow");
    out
  }
}

impl fmt::Debug for TokenReader<'_> {
  /// Walks the chunks left in the current (sub-)stream without disturbing
  /// the reader, printing one line per chunk. Payloads that look like text
  /// are shown as text. Nested streams are opaque here; point a new reader
  /// at a payload to dig in.
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let end = self.ctx.end.max(self.offset);
    let mut r = TokenReader::new(&self.data[self.offset..end]);
    writeln!(f, "TokenStream ({} bytes left) {{", end - self.offset)?;
    while !r.eos() {
      let token = r.get_token();
      if token == NO_TOKEN {
        break;
      }
      if r.next_container_element_count() > 1 {
        writeln!(f, "  list of {} under {token:#x}:", r.next_container_element_count())?;
      }
      let payload = r.get_bytes();
      match std::str::from_utf8(payload) {
        Ok(s) if !s.is_empty() && s.chars().all(|c| !c.is_control()) => {
          writeln!(f, "  {token:#x}: ({} bytes) {s:?}", payload.len())?;
        }
        _ => writeln!(f, "  {token:#x}: ({} bytes) {payload:02X?}", payload.len())?,
      }
    }
    write!(f, "}}")
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn scalar_chunks() {
    let mut r = TokenReader::new(b"\x00\x09Joe Smith\x02\x02\x01\x2C");
    assert_eq!(r.get_token(), 0x00);
    assert_eq!(r.get_string(), "Joe Smith");
    assert_eq!(r.get_token(), 0x02);
    assert_eq!(r.get_u32(), 300);
    assert!(r.eos());
    assert!(!r.bad_stream());
  }

  #[test]
  fn zero_length_payload_reads_zero() {
    let mut r = TokenReader::new(&[0x05, 0x00, 0x06, 0x00]);
    assert_eq!(r.get_token(), 0x05);
    assert_eq!(r.get_u32(), 0);
    assert_eq!(r.get_token(), 0x06);
    assert_eq!(r.get_string(), "");
    assert!(r.eos());
  }

  #[test]
  fn sign_extension() {
    let mut r = TokenReader::new(&[0x01, 0x01, 0xFF, 0x02, 0x02, 0xFF, 0x7F]);
    assert_eq!(r.get_token(), 0x01);
    assert_eq!(r.get_i32(), -1);
    assert_eq!(r.get_token(), 0x02);
    assert_eq!(r.get_i16(), -129);
  }

  #[test]
  fn unconsumed_payload_is_skipped() {
    let mut r = TokenReader::new(&[0x01, 0x03, 1, 2, 3, 0x02, 0x01, 0x09]);
    assert_eq!(r.get_token(), 0x01);
    // Never read the payload; the next header decode jumps it.
    assert_eq!(r.get_token(), 0x02);
    assert_eq!(r.get_u8(), 9);
    assert!(r.eos());
  }

  #[test]
  fn push_back() {
    let mut r = TokenReader::new(&[0x01, 0x01, 0x07]);
    assert_eq!(r.get_token(), 0x01);
    r.push_last_token();
    assert!(!r.eos());
    assert_eq!(r.get_token(), 0x01);
    assert_eq!(r.get_u8(), 7);
  }

  #[test]
  fn list_iteration() {
    let mut r = TokenReader::new(&[0xF8, 0x03, 0x20, 0x01, 0x01, 0x01, 0x02, 0x01, 0x03]);
    assert_eq!(r.get_token(), 0x20);
    assert_eq!(r.next_container_element_count(), 3);
    assert_eq!(r.get_u8(), 1);
    assert_eq!(r.get_token(), 0x20);
    assert_eq!(r.get_u8(), 2);
    assert_eq!(r.get_token(), 0x20);
    assert_eq!(r.get_u8(), 3);
    assert!(r.eos());
  }

  #[test]
  fn list_into_vec() {
    let mut r = TokenReader::new(&[0xF8, 0x03, 0x20, 0x01, 0x01, 0x01, 0x02, 0x01, 0x03]);
    assert_eq!(r.get_token(), 0x20);
    let mut items: Vec<u8> = vec![];
    r.get_container(&mut items);
    assert_eq!(items, [1, 2, 3]);
    assert!(r.eos());
  }

  #[test]
  fn repeated_chunks_are_a_list() {
    // Two ordinary chunks with one token read back as container elements.
    let mut r = TokenReader::new(&[0x20, 0x01, 0x04, 0x20, 0x01, 0x05, 0x21, 0x01, 0x09]);
    assert_eq!(r.get_token(), 0x20);
    let mut items: Vec<u8> = vec![];
    r.get_container(&mut items);
    assert_eq!(items, [4, 5]);
    // The chunk that ended the container is pushed back, not lost.
    assert_eq!(r.get_token(), 0x21);
    assert_eq!(r.get_u8(), 9);
  }

  #[test]
  fn list_skipped_elementwise() {
    // A caller that ignores a list still walks out of it consistently.
    let mut r = TokenReader::new(&[0xF8, 0x02, 0x20, 0x01, 0x01, 0x01, 0x02, 0x05, 0x01, 0x09]);
    assert_eq!(r.get_token(), 0x20);
    r.skip();
    assert_eq!(r.get_token(), 0x20);
    r.skip();
    assert_eq!(r.get_token(), 0x05);
    assert_eq!(r.get_u8(), 9);
  }

  #[test]
  fn sub_stream_consumes_declared_length() {
    // Chunk 0x03 declares 4 payload bytes; the inner read only takes 3.
    let data = [0x03, 0x04, 0x00, 0x01, 0x1B, 0xEE, 0x05, 0x01, 0x09];
    let mut r = TokenReader::new(&data);
    assert_eq!(r.get_token(), 0x03);
    r.sub_stream(|r| {
      assert_eq!(r.get_token(), 0x00);
      assert_eq!(r.get_u8(), 27);
    });
    assert_eq!(r.index(), 6);
    assert_eq!(r.get_token(), 0x05);
    assert_eq!(r.get_u8(), 9);
    assert!(r.eos());
  }

  #[test]
  fn sub_stream_inside_list_restores_iteration() {
    // Two record elements; reading the first through a scope must not break
    // the container bookkeeping for the second.
    let data = [0xF8, 0x02, 0x10, 0x03, 0x00, 0x01, 0x07, 0x03, 0x00, 0x01, 0x08];
    let mut r = TokenReader::new(&data);
    assert_eq!(r.get_token(), 0x10);
    let first = r.sub_stream(|r| {
      assert_eq!(r.get_token(), 0x00);
      r.get_u8()
    });
    assert_eq!(first, 7);
    assert_eq!(r.get_token(), 0x10);
    let second = r.sub_stream(|r| {
      assert_eq!(r.get_token(), 0x00);
      r.get_u8()
    });
    assert_eq!(second, 8);
    assert!(r.eos());
  }

  #[test]
  fn truncated_header_latches() {
    let mut r = TokenReader::new(&[0x01]);
    assert_eq!(r.get_token(), NO_TOKEN);
    assert!(r.bad_stream());
    assert!(matches!(r.error(), Some(StreamError::Truncated)));
    assert!(r.eos());
    assert_eq!(r.get_u32(), 0);
  }

  #[test]
  fn oversized_payload_latches() {
    let mut r = TokenReader::new(&[0x01, 0x7F, 0xAA]);
    assert_eq!(r.get_token(), NO_TOKEN);
    assert!(matches!(
      r.error(),
      Some(StreamError::PayloadTooLarge { len: 127, remaining: 1 })
    ));
  }

  #[test]
  fn escape_mid_stream_latches() {
    // The escape is not a value, so it cannot be a chunk's length.
    let mut r = TokenReader::new(&[0x01, 0xF8, 0x02, 0x00]);
    assert_eq!(r.get_token(), NO_TOKEN);
    assert!(matches!(r.error(), Some(StreamError::MalformedVarint { byte: 0xF8, offset: 1 })));
  }

  #[test]
  fn empty_list_prefix_latches() {
    let mut r = TokenReader::new(&[0xF8, 0x00, 0x20]);
    assert_eq!(r.get_token(), NO_TOKEN);
    assert!(r.bad_stream());
  }

  #[test]
  fn past_eos_counts_bytes() {
    let mut r = TokenReader::new(&[0x01, 0x01, 0x07]);
    assert!(!r.past_eos(3));
    assert!(r.past_eos(4));
    r.get_token();
    r.get_u8();
    assert!(r.past_eos(1));
    assert!(!r.past_eos(0));
  }

  #[test]
  fn debug_walker() {
    let mut w = crate::MemoryWriter::new();
    w.put_str(0x00, "Joe");
    w.put_u32(0x02, 300);
    let r = TokenReader::new(w.bytes());
    let dump = format!("{r:?}");
    assert!(dump.contains("\"Joe\""), "{dump}");
    assert!(dump.contains("0x2"), "{dump}");
  }
}
