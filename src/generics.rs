use crate::{Token, TokenRead, TokenReader, TokenWrite, TokenWriter};

use std::{
  collections::HashMap,
  hash::{BuildHasher, Hash},
};

impl<T> TokenWrite for &T
where
  T: ?Sized + TokenWrite,
{
  fn put(&self, w: &mut TokenWriter, token: Token) { (**self).put(w, token) }
}

macro_rules! num_impl {
  ($ty:ty, $get:ident, $put:ident) => {
    impl TokenRead for $ty {
      fn get(&mut self, r: &mut TokenReader) { *self = r.$get(); }
    }
    impl TokenWrite for $ty {
      fn put(&self, w: &mut TokenWriter, token: Token) { w.$put(token, *self) }
    }
  };
}

num_impl!(bool, get_bool, put_bool);
num_impl!(u8, get_u8, put_u8);
num_impl!(i8, get_i8, put_i8);
num_impl!(u16, get_u16, put_u16);
num_impl!(i16, get_i16, put_i16);
num_impl!(u32, get_u32, put_u32);
num_impl!(i32, get_i32, put_i32);
num_impl!(u64, get_u64, put_u64);
num_impl!(i64, get_i64, put_i64);
num_impl!(f32, get_f32, put_f32);
num_impl!(f64, get_f64, put_f64);

impl TokenRead for String {
  fn get(&mut self, r: &mut TokenReader) { *self = r.get_string(); }
}
impl TokenWrite for String {
  fn put(&self, w: &mut TokenWriter, token: Token) { w.put_str(token, self) }
}
impl TokenWrite for str {
  fn put(&self, w: &mut TokenWriter, token: Token) { w.put_str(token, self) }
}

impl<T> TokenRead for Vec<T>
where
  T: Default + TokenRead,
{
  /// Reads container elements, appending to whatever is already here.
  fn get(&mut self, r: &mut TokenReader) { r.get_container(self) }
}
impl<T> TokenWrite for Vec<T>
where
  T: TokenWrite,
{
  fn put(&self, w: &mut TokenWriter, token: Token) { w.put_container(token, self) }
}

impl<K, V, S> TokenRead for HashMap<K, V, S>
where
  K: Default + TokenRead + Eq + Hash,
  V: Default + TokenRead,
  S: BuildHasher,
{
  fn get(&mut self, r: &mut TokenReader) {
    let mut pairs: Vec<(K, V)> = vec![];
    r.get_container(&mut pairs);
    self.extend(pairs);
  }
}
impl<K, V, S> TokenWrite for HashMap<K, V, S>
where
  K: TokenWrite,
  V: TokenWrite,
  S: BuildHasher,
{
  fn put(&self, w: &mut TokenWriter, token: Token) {
    w.put_container_iter(token, self.iter())
  }
}

// Tuples travel as a sub-stream with the element position as the token, so a
// pair is just a tiny two field record. This is also what a map's entries
// are made of.
macro_rules! tuple_impls {
  ( $( ( $($idx:tt $T:ident),+ ) )+ ) => { $(
    impl<$($T: TokenRead),+> TokenRead for ($($T,)+) {
      fn get(&mut self, r: &mut TokenReader) {
        r.sub_stream(|r| {
          while !r.eos() {
            match r.get_token() {
              $( $idx => self.$idx.get(r), )+
              crate::NO_TOKEN => break,
              _ => r.skip(),
            }
          }
        })
      }
    }
    impl<$($T: TokenWrite),+> TokenWrite for ($($T,)+) {
      fn put(&self, w: &mut TokenWriter, token: Token) {
        w.put_stream(token, false, |w| {
          $( self.$idx.put(w, $idx); )+
        })
      }
    }
  )+ };
}

tuple_impls! {
  (0 A)
  (0 A, 1 B)
  (0 A, 1 B, 2 C)
  (0 A, 1 B, 2 C, 3 D)
}
