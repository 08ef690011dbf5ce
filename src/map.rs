use crate::{Token, TokenReader, TokenWriter, NO_TOKEN};

type Getter<R> = Box<dyn Fn(&mut R, &mut TokenReader)>;
type Putter<R> = Box<dyn Fn(&R, Token, &mut TokenWriter)>;

struct TokenEntry<R> {
  token: Token,
  get:   Getter<R>,
  put:   Putter<R>,
}

/// The binding between a record type's fields and their tokens: an ordered,
/// token-unique list of accessor pairs. Fields are written in the order they
/// were bound; on read the order on the wire does not matter, and tokens with
/// no binding are skipped.
///
/// ```
/// use tokenstream::{Record, TokenMap};
///
/// #[derive(Debug, Default, PartialEq)]
/// struct Date {
///   day:   u8,
///   month: u8,
///   year:  u16,
/// }
///
/// impl Record for Date {
///   fn token_map() -> TokenMap<Date> {
///     TokenMap::new()
///       .with(0, |d: &mut Date, r| d.day = r.get_u8(), |d, t, w| w.put_u8(t, d.day))
///       .with(1, |d: &mut Date, r| d.month = r.get_u8(), |d, t, w| w.put_u8(t, d.month))
///       .with(2, |d: &mut Date, r| d.year = r.get_u16(), |d, t, w| w.put_u16(t, d.year))
///   }
/// }
/// ```
pub struct TokenMap<R> {
  entries: Vec<TokenEntry<R>>,
}

impl<R> TokenMap<R> {
  pub fn new() -> TokenMap<R> { TokenMap { entries: vec![] } }

  /// Binds `token` to a getter/putter pair. The getter decodes the current
  /// chunk into its field; the putter encodes the field under the token it
  /// is handed (use the `put_*_or` calls to declare a trim default).
  ///
  /// # Panics
  /// - If `token` is already bound, or is [`NO_TOKEN`].
  pub fn with(
    mut self,
    token: Token,
    get: impl Fn(&mut R, &mut TokenReader) + 'static,
    put: impl Fn(&R, Token, &mut TokenWriter) + 'static,
  ) -> TokenMap<R> {
    assert!(token != NO_TOKEN, "cannot bind a field to the reserved token");
    assert!(
      !self.entries.iter().any(|e| e.token == token),
      "token {token:#x} is already bound"
    );
    self.entries.push(TokenEntry { token, get: Box::new(get), put: Box::new(put) });
    self
  }

  /// Binds the base portion of a derived record as one nested chunk under
  /// `token`. The base keeps its own token space, at the cost of a couple of
  /// framing bytes; renumbering either side cannot collide.
  pub fn nested<B: crate::Record + 'static>(
    self,
    token: Token,
    get: impl Fn(&mut R) -> &mut B + 'static,
    put: impl Fn(&R) -> &B + 'static,
  ) -> TokenMap<R> {
    self.with(
      token,
      move |rec, r| r.get_record(get(rec)),
      move |rec, t, w| w.put_record(t, put(rec)),
    )
  }

  /// Merges the base record's map into this one, with no extra framing. The
  /// base and derived token sets must not overlap.
  ///
  /// # Panics
  /// - If any base token is already bound here.
  pub fn flatten<B: 'static>(
    mut self,
    base: TokenMap<B>,
    get: impl Fn(&mut R) -> &mut B + Clone + 'static,
    put: impl Fn(&R) -> &B + Clone + 'static,
  ) -> TokenMap<R> {
    for e in base.entries {
      let (g, p) = (get.clone(), put.clone());
      let (base_get, base_put) = (e.get, e.put);
      self = self.with(
        e.token,
        move |rec, r| base_get(g(rec), r),
        move |rec, t, w| base_put(p(rec), t, w),
      );
    }
    self
  }

  pub fn len(&self) -> usize { self.entries.len() }
  pub fn is_empty(&self) -> bool { self.entries.is_empty() }

  /// The bound tokens, in write order.
  pub fn tokens(&self) -> impl Iterator<Item = Token> + '_ {
    self.entries.iter().map(|e| e.token)
  }

  /// Dispatches one incoming token to its getter. Returns false when the
  /// token has no binding, leaving the payload for the caller to skip.
  pub fn read_field(&self, token: Token, rec: &mut R, r: &mut TokenReader) -> bool {
    match self.entries.iter().find(|e| e.token == token) {
      Some(e) => {
        (e.get)(rec, r);
        true
      }
      None => false,
    }
  }

  /// Reads the rest of the current (sub-)stream into `rec`, skipping any
  /// token that has no binding. Fields absent from the stream keep whatever
  /// value `rec` already held.
  pub fn read_all(&self, rec: &mut R, r: &mut TokenReader) {
    while !r.eos() {
      let token = r.get_token();
      if token == NO_TOKEN {
        break;
      }
      if !self.read_field(token, rec, r) {
        log::trace!("skipping unknown token {token:#x}");
        r.skip();
      }
    }
  }

  /// Writes every bound field of `rec`, in binding order.
  pub fn write_fields(&self, rec: &R, w: &mut TokenWriter) {
    for e in &self.entries {
      (e.put)(rec, e.token, w);
    }
  }
}

impl<R> Default for TokenMap<R> {
  fn default() -> Self { TokenMap::new() }
}

/// A record type that knows its own token bindings.
///
/// The two provided methods drive [`token_map`](Record::token_map); override
/// them for records whose encoding cannot be expressed as a field list.
/// Implementing this trait for a type you do not own works the same way, so
/// foreign types need no wrapper.
pub trait Record: Default {
  /// Builds the map binding this record's fields to their tokens.
  fn token_map() -> TokenMap<Self>
  where
    Self: Sized;

  /// Reads fields out of `r` until the current (sub-)stream ends.
  fn read_fields(&mut self, r: &mut TokenReader)
  where
    Self: Sized,
  {
    Self::token_map().read_all(self, r)
  }

  /// Writes this record's fields to `w`.
  fn write_fields(&self, w: &mut TokenWriter)
  where
    Self: Sized,
  {
    Self::token_map().write_fields(self, w)
  }
}

/// Implements [`TokenRead`](crate::TokenRead) and
/// [`TokenWrite`](crate::TokenWrite) for a [`Record`] type, so the record can
/// be a field of another record or an element of a container.
#[macro_export]
macro_rules! stream_record {
  ( $ty:ty ) => {
    impl $crate::TokenRead for $ty {
      fn get(&mut self, r: &mut $crate::TokenReader) { r.get_record(self) }
    }
    impl $crate::TokenWrite for $ty {
      fn put(&self, w: &mut $crate::TokenWriter, token: $crate::Token) {
        w.put_record(token, self)
      }
    }
  };
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{MemoryWriter, TokenReader};
  use pretty_assertions::assert_eq;

  #[derive(Debug, Default, Clone, PartialEq)]
  struct Date {
    day:   u8,
    month: u8,
    year:  u16,
  }

  impl Record for Date {
    fn token_map() -> TokenMap<Date> {
      TokenMap::new()
        .with(0, |d: &mut Date, r| d.day = r.get_u8(), |d, t, w| w.put_u8(t, d.day))
        .with(1, |d: &mut Date, r| d.month = r.get_u8(), |d, t, w| w.put_u8(t, d.month))
        .with(2, |d: &mut Date, r| d.year = r.get_u16(), |d, t, w| w.put_u16(t, d.year))
    }
  }
  stream_record!(Date);

  #[derive(Debug, Default, PartialEq)]
  struct Person {
    name:     String,
    birthday: Date,
  }

  impl Record for Person {
    fn token_map() -> TokenMap<Person> {
      TokenMap::new()
        .with(
          0,
          |p: &mut Person, r| p.name = r.get_string(),
          |p, t, w| w.put_str(t, &p.name),
        )
        .nested(3, |p: &mut Person| &mut p.birthday, |p| &p.birthday)
    }
  }

  // The flattened layout of the same data: base tokens merged in directly.
  #[derive(Debug, Default, PartialEq)]
  struct FlatPerson {
    name:     String,
    birthday: Date,
  }

  impl Record for FlatPerson {
    fn token_map() -> TokenMap<FlatPerson> {
      TokenMap::new()
        .with(
          10,
          |p: &mut FlatPerson, r| p.name = r.get_string(),
          |p, t, w| w.put_str(t, &p.name),
        )
        .flatten(Date::token_map(), |p: &mut FlatPerson| &mut p.birthday, |p| &p.birthday)
    }
  }

  fn sample_date() -> Date { Date { day: 27, month: 3, year: 1966 } }

  #[test]
  fn nested_record_bytes() {
    let mut w = MemoryWriter::new();
    w.put_record(0x03, &sample_date());
    assert_eq!(
      w.bytes(),
      [0x03, 0x0A, 0x00, 0x01, 0x1B, 0x01, 0x01, 0x03, 0x02, 0x02, 0x07, 0xAE]
    );

    let mut r = TokenReader::new(w.bytes());
    assert_eq!(r.get_token(), 0x03);
    let mut back = Date::default();
    r.get_record(&mut back);
    assert_eq!(back, sample_date());
    assert!(r.eos());
  }

  #[test]
  fn whole_record_round_trip() {
    let person = Person { name: "Joe Smith".into(), birthday: sample_date() };
    let mut w = MemoryWriter::new();
    person.write_fields(&mut w);
    assert_eq!(
      w.bytes(),
      [
        0x00, 0x09, b'J', b'o', b'e', b' ', b'S', b'm', b'i', b't', b'h', // name
        0x03, 0x0A, 0x00, 0x01, 0x1B, 0x01, 0x01, 0x03, 0x02, 0x02, 0x07, 0xAE, // birthday
      ]
    );

    let mut back = Person::default();
    let mut r = TokenReader::new(w.bytes());
    back.read_fields(&mut r);
    assert_eq!(back, person);
  }

  #[test]
  fn flattened_base_round_trip() {
    let person = FlatPerson { name: "Ann".into(), birthday: sample_date() };
    let mut w = MemoryWriter::new();
    person.write_fields(&mut w);
    // No envelope around the date fields, they sit next to the name.
    assert_eq!(
      w.bytes(),
      [
        0x0A, 0x03, b'A', b'n', b'n', // name
        0x00, 0x01, 0x1B, 0x01, 0x01, 0x03, 0x02, 0x02, 0x07, 0xAE, // date fields
      ]
    );

    let mut back = FlatPerson::default();
    let mut r = TokenReader::new(w.bytes());
    back.read_fields(&mut r);
    assert_eq!(back, person);
  }

  #[test]
  fn unknown_tokens_are_skipped() {
    let person = Person { name: "Joe".into(), birthday: sample_date() };
    let mut w = MemoryWriter::new();
    person.write_fields(&mut w);
    // A newer writer appends fields this reader has never heard of: a scalar
    // and a whole nested record.
    w.put_u32(0x51, 123_456);
    w.put_stream(0x52, false, |w| w.put_str(0x00, "ignore me"));
    let mut back = Person::default();
    let mut r = TokenReader::new(w.bytes());
    back.read_fields(&mut r);
    assert_eq!(back, person);
    assert!(r.eos());
    assert!(!r.bad_stream());
  }

  #[test]
  fn absent_fields_keep_their_values() {
    // An older writer that only knew about the name.
    let mut w = MemoryWriter::new();
    w.put_str(0x00, "Joe");
    let mut back = Person { name: String::new(), birthday: sample_date() };
    let mut r = TokenReader::new(w.bytes());
    back.read_fields(&mut r);
    assert_eq!(back.name, "Joe");
    assert_eq!(back.birthday, sample_date());
  }

  #[test]
  fn default_record_trims_to_nothing() {
    let mut w = MemoryWriter::new();
    Person::default().write_fields(&mut w);
    assert_eq!(w.bytes(), [0_u8; 0]);

    let mut w = MemoryWriter::new();
    w.put_record(0x03, &Date::default());
    assert_eq!(w.bytes(), [0_u8; 0]);
    let mut w = MemoryWriter::new();
    w.put_record_stub(0x03, &Date::default());
    assert_eq!(w.bytes(), [0x03, 0x00]);
  }

  #[test]
  fn records_as_container_elements() {
    let dates = vec![sample_date(), Date::default(), Date { day: 1, month: 1, year: 2000 }];
    let mut w = MemoryWriter::new();
    w.put_container(0x08, &dates);
    let mut r = TokenReader::new(w.bytes());
    assert_eq!(r.get_token(), 0x08);
    assert_eq!(r.next_container_element_count(), 3);
    let mut back: Vec<Date> = vec![];
    r.get_container(&mut back);
    // The all-default middle element kept its slot as an empty stub.
    assert_eq!(back, dates);
  }

  #[test]
  #[should_panic(expected = "already bound")]
  fn duplicate_tokens_panic() {
    let _ = TokenMap::new()
      .with(1, |d: &mut Date, r| d.day = r.get_u8(), |d, t, w| w.put_u8(t, d.day))
      .with(1, |d: &mut Date, r| d.month = r.get_u8(), |d, t, w| w.put_u8(t, d.month));
  }

  #[test]
  #[should_panic(expected = "already bound")]
  fn flatten_overlap_panics() {
    // Token 1 collides with the date's month binding.
    let _ = TokenMap::new()
      .with(
        1,
        |p: &mut FlatPerson, r| p.name = r.get_string(),
        |p, t, w| w.put_str(t, &p.name),
      )
      .flatten(Date::token_map(), |p: &mut FlatPerson| &mut p.birthday, |p| &p.birthday);
  }
}
