//! Generic field references.
//!
//! A [`FieldRef`] is a borrowed view of one field: the arena holding the message, the field's
//! cell, and the field's descriptor. It copies nothing. A [`FieldMut`] is the same view with
//! mutable access to the arena, which it needs to place strings and sequence elements.
//!
//! Both convert to and from the type-specific views in [`typed`][crate::typed] and
//! [`aggregate`][crate::aggregate]:
//!
//! - [`static_cast_as`][FieldRef::static_cast_as] reinterprets the view without checking the
//!     field type. Used when the schema already guarantees the type. Reading through a
//!     mismatched view yields zero or empty values.
//! - [`dynamic_cast_as`][FieldRef::dynamic_cast_as] checks the field type, and on a mismatch
//!     returns a view with no descriptor, which reads as absent.
//!
//! Neither cast touches the cell.

use std::fmt;

use crate::arena::Arena;
use crate::cell::{CellId, Payload, ValueCell};
use crate::descriptor::{FieldDescriptor, FieldType};
use crate::error::{Error, Result};
use crate::value::Value;

static EMPTY_ARENA: Arena = Arena::new();

/// A read-only view type that can be cast to and from [`FieldRef`].
pub trait TypedRef<'a>: Sized {
    /// Whether a field of type `ty` can be viewed as `Self`.
    fn accepts(ty: FieldType) -> bool;

    /// Wrap a generic reference without checking its type.
    fn from_field(field: FieldRef<'a>) -> Self;

    /// The generic reference underneath.
    fn field(&self) -> FieldRef<'a>;
}

/// A mutable view type that can be cast to and from [`FieldMut`].
pub trait TypedMut<'a>: Sized {
    fn accepts(ty: FieldType) -> bool;

    fn from_field(field: FieldMut<'a>) -> Self;

    fn into_field(self) -> FieldMut<'a>;
}

/// Read-only view of one field.
#[derive(Copy, Clone)]
pub struct FieldRef<'a> {
    arena: &'a Arena,
    cell: Option<CellId>,
    desc: Option<&'a FieldDescriptor>,
}

impl<'a> Default for FieldRef<'a> {
    /// A reference to no field at all. Always absent.
    fn default() -> Self {
        Self {
            arena: &EMPTY_ARENA,
            cell: None,
            desc: None,
        }
    }
}

impl<'a> FieldRef<'a> {
    pub(crate) fn new(
        arena: &'a Arena,
        cell: Option<CellId>,
        desc: Option<&'a FieldDescriptor>,
    ) -> Self {
        Self { arena, cell, desc }
    }

    /// An absent reference that still points at `arena`.
    pub(crate) fn none(arena: &'a Arena) -> Self {
        Self {
            arena,
            cell: None,
            desc: None,
        }
    }

    /// True if there is no such field, or the field is optional and currently has no value.
    pub fn absent(&self) -> bool {
        match self.desc {
            None => true,
            Some(d) => d.optional() && !self.cell().is_present(),
        }
    }

    pub fn present(&self) -> bool {
        !self.absent()
    }

    pub fn optional(&self) -> bool {
        self.desc.map_or(false, |d| d.optional())
    }

    pub fn has_initial_value(&self) -> bool {
        self.desc.map_or(false, |d| d.has_initial_value())
    }

    pub fn field_type(&self) -> Option<FieldType> {
        self.desc.map(|d| d.field_type())
    }

    /// The field's id. For a dynamic template reference this is the id of the template currently
    /// bound to it, or 0 if none is bound. A reference to no field also yields 0.
    pub fn id(&self) -> u32 {
        match self.desc {
            None => 0,
            Some(d) if d.field_type() == FieldType::TemplateRef => match self.cell().payload() {
                Payload::TemplateRef {
                    template: Some(id),
                    ..
                } => *id,
                _ => 0,
            },
            Some(d) => d.id(),
        }
    }

    /// The field's name, or `""` for a reference to no field.
    pub fn name(&self) -> &'a str {
        self.desc.map_or("", |d| d.name())
    }

    pub fn descriptor(&self) -> Option<&'a FieldDescriptor> {
        self.desc
    }

    pub fn cell(&self) -> &'a ValueCell {
        match self.cell {
            Some(id) => self.arena.cell(id),
            None => ValueCell::EMPTY_REF,
        }
    }

    pub(crate) fn cell_id(&self) -> Option<CellId> {
        self.cell
    }

    pub(crate) fn arena(&self) -> &'a Arena {
        self.arena
    }

    /// Reinterpret as `T` without checking the field type.
    pub fn static_cast_as<T: TypedRef<'a>>(self) -> T {
        T::from_field(self)
    }

    /// Reinterpret as `T` if the field type allows it, otherwise get an absent `T`.
    pub fn dynamic_cast_as<T: TypedRef<'a>>(self) -> T {
        match self.desc {
            Some(d) if T::accepts(d.field_type()) => T::from_field(self),
            _ => T::from_field(FieldRef { desc: None, ..self }),
        }
    }

    /// Copy a present scalar or string field out as an owned value. Returns `None` for absent
    /// fields and for groups, sequences, and template references.
    pub fn to_value(&self) -> Option<Value> {
        if self.absent() {
            return None;
        }
        self.arena.load_value(self.cell().payload())
    }
}

impl<'a> TypedRef<'a> for FieldRef<'a> {
    fn accepts(_: FieldType) -> bool {
        true
    }

    fn from_field(field: FieldRef<'a>) -> Self {
        field
    }

    fn field(&self) -> FieldRef<'a> {
        *self
    }
}

impl<'a> fmt::Debug for FieldRef<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut s = f.debug_struct("FieldRef");
        s.field("name", &self.name()).field("id", &self.id());
        match self.to_value() {
            Some(v) => s.field("value", &v),
            None if self.absent() => s.field("value", &"<absent>"),
            None => s.field("value", &self.field_type()),
        };
        s.finish()
    }
}

/// Mutable view of one field.
pub struct FieldMut<'a> {
    arena: &'a mut Arena,
    cell: Option<CellId>,
    desc: Option<&'a FieldDescriptor>,
}

impl<'a> FieldMut<'a> {
    pub(crate) fn new(
        arena: &'a mut Arena,
        cell: Option<CellId>,
        desc: Option<&'a FieldDescriptor>,
    ) -> Self {
        Self { arena, cell, desc }
    }

    /// Read-only view of the same field.
    pub fn as_cref(&self) -> FieldRef<'_> {
        FieldRef::new(self.arena, self.cell, self.desc)
    }

    /// Give up mutable access, keeping a read-only view for the full lifetime.
    pub fn into_cref(self) -> FieldRef<'a> {
        FieldRef::new(self.arena, self.cell, self.desc)
    }

    /// A shorter-lived mutable view of the same field.
    pub fn reborrow(&mut self) -> FieldMut<'_> {
        FieldMut::new(self.arena, self.cell, self.desc)
    }

    pub fn absent(&self) -> bool {
        self.as_cref().absent()
    }

    pub fn present(&self) -> bool {
        !self.absent()
    }

    pub fn optional(&self) -> bool {
        self.desc.map_or(false, |d| d.optional())
    }

    pub fn field_type(&self) -> Option<FieldType> {
        self.desc.map(|d| d.field_type())
    }

    pub fn id(&self) -> u32 {
        self.as_cref().id()
    }

    pub fn name(&self) -> &'a str {
        self.desc.map_or("", |d| d.name())
    }

    pub fn descriptor(&self) -> Option<&'a FieldDescriptor> {
        self.desc
    }

    /// Mark an optional field as having no value. Mandatory fields can't be absent, so this does
    /// nothing to them.
    pub fn as_absent(&mut self) {
        if self.optional() {
            if let Some(cell) = self.cell_mut() {
                cell.set_present(false);
            }
        }
    }

    /// Store an owned value, checking that it fits the field type.
    pub fn set_value(&mut self, value: &Value) -> Result<()> {
        match (self.cell, self.desc) {
            (Some(id), Some(desc)) => self.arena.set_value(id, desc, value),
            _ => Err(Error::schema("no such field")),
        }
    }

    /// The cell, but only if this view has a descriptor. Views produced by a failed dynamic cast
    /// never write to the cell they point at.
    pub(crate) fn cell_mut(&mut self) -> Option<&mut ValueCell> {
        match (self.cell, self.desc) {
            (Some(id), Some(_)) => self.arena.cell_mut(id),
            _ => None,
        }
    }

    pub(crate) fn cell_id(&self) -> Option<CellId> {
        self.cell
    }

    pub(crate) fn arena_mut(&mut self) -> &mut Arena {
        self.arena
    }

    pub(crate) fn into_parts(self) -> (&'a mut Arena, Option<CellId>, Option<&'a FieldDescriptor>) {
        (self.arena, self.cell, self.desc)
    }

    pub fn static_cast_as<T: TypedMut<'a>>(self) -> T {
        T::from_field(self)
    }

    pub fn dynamic_cast_as<T: TypedMut<'a>>(self) -> T {
        match self.desc {
            Some(d) if T::accepts(d.field_type()) => T::from_field(self),
            _ => T::from_field(FieldMut { desc: None, ..self }),
        }
    }
}

impl<'a> TypedMut<'a> for FieldMut<'a> {
    fn accepts(_: FieldType) -> bool {
        true
    }

    fn from_field(field: FieldMut<'a>) -> Self {
        field
    }

    fn into_field(self) -> FieldMut<'a> {
        self
    }
}

impl<'a> fmt::Debug for FieldMut<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.as_cref().fmt(f)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::descriptor::Operator;
    use crate::template::Template;
    use crate::typed::*;

    fn template() -> Template {
        Template::new(
            1,
            "T",
            vec![
                FieldDescriptor::new(10, "Qty", FieldType::UInt32),
                FieldDescriptor::new(11, "Px", FieldType::Int64)
                    .into_optional()
                    .with_operator(Operator::Copy),
                FieldDescriptor::template_ref(12, "Inner"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn default_is_absent() {
        let r = FieldRef::default();
        assert!(r.absent());
        assert_eq!(r.id(), 0);
        assert_eq!(r.name(), "");
        assert_eq!(r.field_type(), None);
        assert_eq!(r.to_value(), None);
    }

    #[test]
    fn casts_keep_the_cell() {
        let t = template();
        let mut arena = Arena::new();
        let msg = arena.alloc_message(&t);
        let qty = msg.fields.cell(0);
        {
            let m = FieldMut::new(&mut arena, qty, Some(&t.fields()[0]));
            let mut q = m.dynamic_cast_as::<UInt32Mut>();
            q.set(42);
        }
        let r = FieldRef::new(&arena, qty, Some(&t.fields()[0]));
        let typed: UInt32Ref = r.dynamic_cast_as();
        assert_eq!(typed.value(), 42);
        assert_eq!(typed.field().cell_id(), qty);
        let wrong: Int64Ref = r.dynamic_cast_as();
        assert!(wrong.absent());
        assert_eq!(wrong.field().cell_id(), qty);
        let unchecked: Int64Ref = r.static_cast_as();
        assert!(unchecked.present());
        assert_eq!(unchecked.value(), 0);
    }

    #[test]
    fn failed_cast_does_not_write() {
        let t = template();
        let mut arena = Arena::new();
        let msg = arena.alloc_message(&t);
        let qty = msg.fields.cell(0);
        let m = FieldMut::new(&mut arena, qty, Some(&t.fields()[0]));
        let mut wrong = m.dynamic_cast_as::<Int64Mut>();
        wrong.set(-1);
        let r = FieldRef::new(&arena, qty, Some(&t.fields()[0]));
        assert_eq!(r.to_value(), Some(Value::UInt32(0)));
    }

    #[test]
    fn as_absent_only_on_optional() {
        let t = template();
        let mut arena = Arena::new();
        let msg = arena.alloc_message(&t);
        let mut px = FieldMut::new(&mut arena, msg.fields.cell(1), Some(&t.fields()[1]));
        assert!(px.absent());
        px.as_absent();
        assert!(px.absent());
        px.set_value(&Value::Int64(7)).unwrap();
        assert!(px.present());
        px.as_absent();
        assert!(px.absent());

        let mut qty = FieldMut::new(&mut arena, msg.fields.cell(0), Some(&t.fields()[0]));
        qty.set_value(&Value::UInt32(9)).unwrap();
        qty.as_absent();
        assert!(qty.present());
        assert_eq!(qty.as_cref().to_value(), Some(Value::UInt32(9)));
        assert!(qty.set_value(&Value::Int32(9)).is_err());
    }

    #[test]
    fn template_ref_id_follows_binding() {
        let t = template();
        let mut arena = Arena::new();
        let msg = arena.alloc_message(&t);
        let inner = msg.fields.cell(2);
        assert_eq!(FieldRef::new(&arena, inner, Some(&t.fields()[2])).id(), 0);
        arena.bind_template(inner.unwrap(), &t);
        assert_eq!(FieldRef::new(&arena, inner, Some(&t.fields()[2])).id(), 1);
    }
}
