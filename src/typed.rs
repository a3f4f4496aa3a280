//! Typed views of scalar and string fields.
//!
//! Each wraps a [`FieldRef`] or [`FieldMut`] and dereferences to it, so presence, id and name
//! queries work the same on every view. Get one with
//! [`dynamic_cast_as`][FieldRef::dynamic_cast_as] or
//! [`static_cast_as`][FieldRef::static_cast_as].

use std::ops::{Deref, DerefMut};

use crate::cell::{ByteSpan, Payload};
use crate::descriptor::FieldType;
use crate::error::{Error, Result};
use crate::field_ref::{FieldMut, FieldRef, TypedMut, TypedRef};
use crate::value::Decimal;

macro_rules! view_common {
    ($cref:ident, $mref:ident, $accepts:expr) => {
        impl<'a> Deref for $cref<'a> {
            type Target = FieldRef<'a>;
            fn deref(&self) -> &FieldRef<'a> {
                &self.0
            }
        }

        impl<'a> TypedRef<'a> for $cref<'a> {
            fn accepts(ty: FieldType) -> bool {
                $accepts(ty)
            }
            fn from_field(field: FieldRef<'a>) -> Self {
                Self(field)
            }
            fn field(&self) -> FieldRef<'a> {
                self.0
            }
        }

        impl<'a> Deref for $mref<'a> {
            type Target = FieldMut<'a>;
            fn deref(&self) -> &FieldMut<'a> {
                &self.0
            }
        }

        impl<'a> DerefMut for $mref<'a> {
            fn deref_mut(&mut self) -> &mut FieldMut<'a> {
                &mut self.0
            }
        }

        impl<'a> TypedMut<'a> for $mref<'a> {
            fn accepts(ty: FieldType) -> bool {
                $accepts(ty)
            }
            fn from_field(field: FieldMut<'a>) -> Self {
                Self(field)
            }
            fn into_field(self) -> FieldMut<'a> {
                self.0
            }
        }

        impl<'a> $mref<'a> {
            /// Read-only view of the same field.
            pub fn as_cref(&self) -> $cref<'_> {
                $cref(self.0.as_cref())
            }

            /// Give up write access, keeping the arena borrow for the full lifetime.
            pub fn into_cref(self) -> $cref<'a> {
                $cref(self.0.into_cref())
            }
        }
    };
}
pub(crate) use view_common;

macro_rules! int_view {
    ($name:literal, $cref:ident, $mref:ident, $t:ty, $variant:ident) => {
        #[doc = concat!("Read-only view of a `", $name, "` field.")]
        #[derive(Copy, Clone, Debug, Default)]
        pub struct $cref<'a>(FieldRef<'a>);

        impl<'a> $cref<'a> {
            /// The stored value. Zero if the field was never set.
            pub fn value(&self) -> $t {
                match self.0.cell().payload() {
                    Payload::$variant(v) => *v,
                    _ => 0,
                }
            }
        }

        #[doc = concat!("Writable view of a `", $name, "` field.")]
        #[derive(Debug)]
        pub struct $mref<'a>(FieldMut<'a>);

        impl<'a> $mref<'a> {
            /// The stored value. Zero if the field was never set.
            pub fn value(&self) -> $t {
                self.as_cref().value()
            }

            /// Set the value and mark the field present.
            pub fn set(&mut self, v: $t) {
                if let Some(cell) = self.0.cell_mut() {
                    cell.set(Payload::$variant(v));
                }
            }
        }

        view_common!($cref, $mref, |ty: FieldType| ty == FieldType::$variant);
    };
}

int_view!("int32", Int32Ref, Int32Mut, i32, Int32);
int_view!("uInt32", UInt32Ref, UInt32Mut, u32, UInt32);
int_view!("int64", Int64Ref, Int64Mut, i64, Int64);
int_view!("uInt64", UInt64Ref, UInt64Mut, u64, UInt64);

/// Read-only view of a decimal field.
#[derive(Copy, Clone, Debug, Default)]
pub struct DecimalRef<'a>(FieldRef<'a>);

impl<'a> DecimalRef<'a> {
    /// The stored value. Zero with a zero exponent if the field was never set.
    pub fn value(&self) -> Decimal {
        match self.0.cell().payload() {
            Payload::Decimal(v) => *v,
            _ => Decimal::default(),
        }
    }

    pub fn exponent(&self) -> i32 {
        self.value().exponent
    }

    pub fn mantissa(&self) -> i64 {
        self.value().mantissa
    }
}

/// Writable view of a decimal field.
#[derive(Debug)]
pub struct DecimalMut<'a>(FieldMut<'a>);

impl<'a> DecimalMut<'a> {
    pub fn value(&self) -> Decimal {
        self.as_cref().value()
    }

    /// Set the value and mark the field present.
    pub fn set(&mut self, v: Decimal) {
        if let Some(cell) = self.0.cell_mut() {
            cell.set(Payload::Decimal(v));
        }
    }
}

view_common!(DecimalRef, DecimalMut, |ty: FieldType| ty == FieldType::Decimal);

fn span_of(field: &FieldRef) -> ByteSpan {
    field.cell().payload().byte_span().unwrap_or_default()
}

/// Read-only view of an ASCII string field.
#[derive(Copy, Clone, Debug, Default)]
pub struct AsciiRef<'a>(FieldRef<'a>);

impl<'a> AsciiRef<'a> {
    /// The text, borrowed from the arena. Empty if the field was never set.
    pub fn value(&self) -> &'a str {
        std::str::from_utf8(self.0.arena().bytes(span_of(&self.0))).unwrap_or_default()
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        span_of(&self.0).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Writable view of an ASCII string field.
#[derive(Debug)]
pub struct AsciiMut<'a>(FieldMut<'a>);

impl<'a> AsciiMut<'a> {
    pub fn value(&self) -> &str {
        self.as_cref().value()
    }

    /// Copy `s` into the arena and mark the field present. Fails if `s` isn't 7-bit ASCII.
    pub fn set(&mut self, s: &str) -> Result<()> {
        if !s.is_ascii() {
            return Err(Error::schema("non-ASCII text in ASCII field").at(self.0.name()));
        }
        if self.0.cell_mut().is_some() {
            let span = self.0.arena_mut().alloc_bytes(s.as_bytes());
            if let Some(cell) = self.0.cell_mut() {
                cell.set(Payload::Ascii(span));
            }
        }
        Ok(())
    }
}

view_common!(AsciiRef, AsciiMut, |ty: FieldType| ty == FieldType::Ascii);

/// Read-only view of a unicode string field.
#[derive(Copy, Clone, Debug, Default)]
pub struct UnicodeRef<'a>(FieldRef<'a>);

impl<'a> UnicodeRef<'a> {
    /// The text, borrowed from the arena. Empty if the field was never set.
    pub fn value(&self) -> &'a str {
        std::str::from_utf8(self.0.arena().bytes(span_of(&self.0))).unwrap_or_default()
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        span_of(&self.0).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Writable view of a unicode string field.
#[derive(Debug)]
pub struct UnicodeMut<'a>(FieldMut<'a>);

impl<'a> UnicodeMut<'a> {
    pub fn value(&self) -> &str {
        self.as_cref().value()
    }

    /// Copy `s` into the arena and mark the field present.
    pub fn set(&mut self, s: &str) {
        if self.0.cell_mut().is_some() {
            let span = self.0.arena_mut().alloc_bytes(s.as_bytes());
            if let Some(cell) = self.0.cell_mut() {
                cell.set(Payload::Unicode(span));
            }
        }
    }
}

view_common!(UnicodeRef, UnicodeMut, |ty: FieldType| ty == FieldType::Unicode);

/// Read-only view of a byte vector field.
#[derive(Copy, Clone, Debug, Default)]
pub struct BytesRef<'a>(FieldRef<'a>);

impl<'a> BytesRef<'a> {
    pub fn value(&self) -> &'a [u8] {
        self.0.arena().bytes(span_of(&self.0))
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        span_of(&self.0).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Writable view of a byte vector field.
#[derive(Debug)]
pub struct BytesMut<'a>(FieldMut<'a>);

impl<'a> BytesMut<'a> {
    pub fn value(&self) -> &[u8] {
        self.as_cref().value()
    }

    /// Copy `data` into the arena and mark the field present.
    pub fn set(&mut self, data: &[u8]) {
        if self.0.cell_mut().is_some() {
            let span = self.0.arena_mut().alloc_bytes(data);
            if let Some(cell) = self.0.cell_mut() {
                cell.set(Payload::Bytes(span));
            }
        }
    }
}

view_common!(BytesRef, BytesMut, |ty: FieldType| ty == FieldType::ByteVector);

#[cfg(test)]
mod test {
    use super::*;
    use crate::arena::Arena;
    use crate::descriptor::FieldDescriptor;
    use crate::template::Template;

    #[test]
    fn string_views() {
        let t = Template::new(
            1,
            "T",
            vec![
                FieldDescriptor::new(1, "Sym", FieldType::Ascii),
                FieldDescriptor::new(2, "Text", FieldType::Unicode).into_optional(),
                FieldDescriptor::new(3, "Raw", FieldType::ByteVector),
                FieldDescriptor::decimal(4, "Px"),
            ],
        )
        .unwrap();
        let mut arena = Arena::new();
        let msg = arena.alloc_message(&t);
        let f = |i: usize| (msg.fields().cell(i), Some(&t.fields()[i]));

        let (c, d) = f(0);
        let mut sym: AsciiMut = FieldMut::new(&mut arena, c, d).dynamic_cast_as();
        sym.set("MSFT").unwrap();
        assert!(sym.set("Ⅻ").is_err());
        assert_eq!(sym.value(), "MSFT");

        let (c, d) = f(1);
        let mut text: UnicodeMut = FieldMut::new(&mut arena, c, d).dynamic_cast_as();
        assert!(text.absent());
        text.set("Grüße");
        assert!(text.present());

        let (c, d) = f(2);
        let mut raw: BytesMut = FieldMut::new(&mut arena, c, d).dynamic_cast_as();
        raw.set(&[0, 1, 255]);

        let (c, d) = f(3);
        let mut px: DecimalMut = FieldMut::new(&mut arena, c, d).dynamic_cast_as();
        px.set(Decimal::new(1995, -2));

        let (c, d) = f(1);
        let text: UnicodeRef = FieldRef::new(&arena, c, d).dynamic_cast_as();
        assert_eq!(text.value(), "Grüße");
        assert_eq!(text.len(), "Grüße".len());
        let (c, d) = f(2);
        let raw: BytesRef = FieldRef::new(&arena, c, d).dynamic_cast_as();
        assert_eq!(raw.value(), &[0, 1, 255]);
        let (c, d) = f(3);
        let px: DecimalRef = FieldRef::new(&arena, c, d).dynamic_cast_as();
        assert_eq!(px.mantissa(), 1995);
        assert_eq!(px.exponent(), -2);
        let (c, d) = f(0);
        let not_bytes: BytesRef = FieldRef::new(&arena, c, d).dynamic_cast_as();
        assert!(not_bytes.absent());
    }
}
