//! Serialization counterpart to [`crate::parse`], built on `cookie_factory`
//! the way the teacher's `node_id.rs` does: `fn serialize(&self) -> impl
//! cookie_factory::SerializeFn<W>`.

use cookie_factory as cf;
use std::io::Write;

/// Analogous to the teacher's `Serializable` trait.
pub trait Serializable {
    fn serialize<'a, W: Write + 'a>(&'a self) -> impl cf::SerializeFn<W> + 'a;

    fn as_bytes(&self) -> Vec<u8>
    where
        Self: Sized,
    {
        cf::gen_simple(self.serialize(), Vec::new()).expect("serialization is infallible")
    }
}

impl Serializable for u8 {
    fn serialize<'a, W: Write + 'a>(&'a self) -> impl cf::SerializeFn<W> + 'a {
        cf::bytes::be_u8(*self)
    }
}

impl Serializable for u16 {
    fn serialize<'a, W: Write + 'a>(&'a self) -> impl cf::SerializeFn<W> + 'a {
        cf::bytes::be_u16(*self)
    }
}

impl Serializable for u32 {
    fn serialize<'a, W: Write + 'a>(&'a self) -> impl cf::SerializeFn<W> + 'a {
        cf::bytes::be_u32(*self)
    }
}

impl Serializable for [u8] {
    fn serialize<'a, W: Write + 'a>(&'a self) -> impl cf::SerializeFn<W> + 'a {
        cf::combinator::slice(self)
    }
}
