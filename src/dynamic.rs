use crate::{Token, TokenRead, TokenReader, TokenWrite, TokenWriter, NO_TOKEN};

use std::any::Any;

/// A type-erased field slot: an owned value that knows how to move itself
/// through a stream.
trait GenericField {
  fn get(&mut self, r: &mut TokenReader);
  fn put(&self, token: Token, w: &mut TokenWriter);
  fn value_any(&self) -> &dyn Any;
  fn value_any_mut(&mut self) -> &mut dyn Any;
}

struct PlainSlot<T> {
  value: T,
}

impl<T> GenericField for PlainSlot<T>
where
  T: TokenRead + TokenWrite + 'static,
{
  fn get(&mut self, r: &mut TokenReader) { self.value.get(r) }
  fn put(&self, token: Token, w: &mut TokenWriter) { self.value.put(w, token) }
  fn value_any(&self) -> &dyn Any { &self.value }
  fn value_any_mut(&mut self) -> &mut dyn Any { &mut self.value }
}

/// A slot with a captured default, which replaces the type's zero as the
/// value trimming compares against.
struct DefaultSlot<T> {
  value:   T,
  default: T,
}

impl<T> GenericField for DefaultSlot<T>
where
  T: TokenRead + TokenWrite + PartialEq + 'static,
{
  fn get(&mut self, r: &mut TokenReader) { self.value.get(r) }

  fn put(&self, token: Token, w: &mut TokenWriter) {
    if w.trim_defaults() && self.value == self.default {
      return;
    }
    // An explicit zero still occupies a chunk here, since absence now means
    // the captured default rather than zero.
    w.with_trim_defaults(false, |w| self.value.put(w, token));
  }

  fn value_any(&self) -> &dyn Any { &self.value }
  fn value_any_mut(&mut self) -> &mut dyn Any { &mut self.value }
}

/// A record built at runtime: an ordered mapping from token to an owned,
/// type-erased value. Writing walks the fields in token order; reading walks
/// the stream and fills in whichever registered tokens show up, skipping the
/// rest. A field must be registered before a read for its chunk to land
/// anywhere.
///
/// A generic record is itself a legal field value, so fully dynamic trees
/// compose out of nothing but `add` calls.
///
/// ```
/// use tokenstream::{GenericRecord, MemoryWriter, TokenReader};
///
/// let mut rec = GenericRecord::new();
/// rec.add(0, String::from("Joe Smith"));
/// rec.add(1, 1966_u16);
///
/// let mut w = MemoryWriter::new();
/// rec.write_stream(&mut w);
///
/// let mut back = GenericRecord::new();
/// back.add(0, String::new());
/// back.add(1, 0_u16);
/// back.read_stream(&mut TokenReader::new(w.bytes()));
/// assert_eq!(back.value::<u16>(1), Some(&1966));
/// ```
#[derive(Default)]
pub struct GenericRecord {
  fields: Vec<(Token, Box<dyn GenericField>)>,
}

impl GenericRecord {
  pub fn new() -> GenericRecord { GenericRecord::default() }

  /// Registers a field under `token`. The type's zero value is its trim
  /// default.
  ///
  /// # Panics
  /// - If `token` is already registered, or is [`NO_TOKEN`].
  pub fn add<T>(&mut self, token: Token, value: T)
  where
    T: TokenRead + TokenWrite + 'static,
  {
    self.insert(token, Box::new(PlainSlot { value }))
  }

  /// Registers a field with a declared default, which is what trimming
  /// compares against instead of the type's zero.
  pub fn add_default<T>(&mut self, token: Token, value: T, default: T)
  where
    T: TokenRead + TokenWrite + PartialEq + 'static,
  {
    self.insert(token, Box::new(DefaultSlot { value, default }))
  }

  fn insert(&mut self, token: Token, slot: Box<dyn GenericField>) {
    assert!(token != NO_TOKEN, "cannot register the reserved token");
    match self.fields.binary_search_by_key(&token, |(t, _)| *t) {
      Ok(_) => panic!("token {token:#x} is already registered"),
      Err(i) => self.fields.insert(i, (token, slot)),
    }
  }

  pub fn len(&self) -> usize { self.fields.len() }
  pub fn is_empty(&self) -> bool { self.fields.is_empty() }

  /// The value registered under `token`, if there is one of type `T`.
  pub fn value<T: 'static>(&self, token: Token) -> Option<&T> {
    let i = self.fields.binary_search_by_key(&token, |(t, _)| *t).ok()?;
    self.fields[i].1.value_any().downcast_ref::<T>()
  }

  pub fn value_mut<T: 'static>(&mut self, token: Token) -> Option<&mut T> {
    let i = self.fields.binary_search_by_key(&token, |(t, _)| *t).ok()?;
    self.fields[i].1.value_any_mut().downcast_mut::<T>()
  }

  /// Reads the rest of the current (sub-)stream, filling registered fields
  /// and skipping everything else.
  pub fn read_stream(&mut self, r: &mut TokenReader) {
    while !r.eos() {
      let token = r.get_token();
      if token == NO_TOKEN {
        break;
      }
      match self.fields.binary_search_by_key(&token, |(t, _)| *t) {
        Ok(i) => self.fields[i].1.get(r),
        Err(_) => {
          log::trace!("skipping unregistered token {token:#x}");
          r.skip();
        }
      }
    }
  }

  /// Writes every registered field, in token order.
  pub fn write_stream(&self, w: &mut TokenWriter) {
    for (token, field) in &self.fields {
      field.put(*token, w);
    }
  }
}

impl TokenRead for GenericRecord {
  fn get(&mut self, r: &mut TokenReader) { r.sub_stream(|r| self.read_stream(r)) }
}

impl TokenWrite for GenericRecord {
  fn put(&self, w: &mut TokenWriter, token: Token) {
    w.put_stream(token, false, |w| self.write_stream(w))
  }
}
