//! Views of fields that hold other fields: groups, sequences, dynamic template references, and
//! whole messages.
//!
//! All of them hand out children as [`FieldRef`]/[`FieldMut`] through an [`AggregateRef`] or
//! [`AggregateMut`], which pair a run of cells with the [`GroupContent`] describing them. Lookups
//! by id or name that miss, or that go through an absent parent, yield an absent reference.

use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::arena::{Arena, Message};
use crate::cell::{CellSpan, Payload};
use crate::descriptor::{FieldDescriptor, FieldType, GroupContent, EMPTY_CONTENT};
use crate::error::{Error, Result};
use crate::field_ref::{FieldMut, FieldRef, TypedMut, TypedRef};
use crate::template::{Template, TemplateRegistry};
use crate::typed::view_common;

/// Read-only view of an ordered run of fields.
#[derive(Copy, Clone)]
pub struct AggregateRef<'a> {
    arena: &'a Arena,
    cells: CellSpan,
    content: &'a GroupContent,
}

impl<'a> AggregateRef<'a> {
    pub(crate) fn new(arena: &'a Arena, cells: CellSpan, content: &'a GroupContent) -> Self {
        Self {
            arena,
            cells,
            content,
        }
    }

    pub(crate) fn empty(arena: &'a Arena) -> Self {
        Self::new(arena, CellSpan::EMPTY, &EMPTY_CONTENT)
    }

    /// Number of fields. Zero for the fields of an absent group.
    pub fn len(&self) -> usize {
        self.cells.len().min(self.content.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn content(&self) -> &'a GroupContent {
        self.content
    }

    /// The field at `index`. Out of range gives a view with no descriptor, which reads as
    /// absent and casts to absent views.
    pub fn field(&self, index: usize) -> FieldRef<'a> {
        match (self.cells.cell(index), self.content.get(index)) {
            (Some(cell), Some(desc)) => FieldRef::new(self.arena, Some(cell), Some(desc)),
            _ => FieldRef::none(self.arena),
        }
    }

    /// Look a field up by its id. Unknown ids behave like an out-of-range index.
    pub fn field_with_id(&self, id: u32) -> FieldRef<'a> {
        match self.content.find_subinstruction_index_by_id(id) {
            Some(i) => self.field(i),
            None => FieldRef::none(self.arena),
        }
    }

    /// Look a field up by its name.
    pub fn field_with_name(&self, name: &str) -> FieldRef<'a> {
        match self.content.find_subinstruction_index_by_name(name) {
            Some(i) => self.field(i),
            None => FieldRef::none(self.arena),
        }
    }

    /// Iterate over the fields in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = FieldRef<'a>> + 'a {
        let this = *self;
        (0..this.len()).map(move |i| this.field(i))
    }

    pub(crate) fn cells(&self) -> CellSpan {
        self.cells
    }
}

impl<'a> fmt::Debug for AggregateRef<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Mutable view of an ordered run of fields.
pub struct AggregateMut<'a> {
    arena: &'a mut Arena,
    cells: CellSpan,
    content: &'a GroupContent,
}

impl<'a> AggregateMut<'a> {
    pub(crate) fn new(arena: &'a mut Arena, cells: CellSpan, content: &'a GroupContent) -> Self {
        Self {
            arena,
            cells,
            content,
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len().min(self.content.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_cref(&self) -> AggregateRef<'_> {
        AggregateRef::new(self.arena, self.cells, self.content)
    }

    pub fn into_cref(self) -> AggregateRef<'a> {
        AggregateRef::new(self.arena, self.cells, self.content)
    }

    pub fn field(&mut self, index: usize) -> FieldMut<'_> {
        match (self.cells.cell(index), self.content.get(index)) {
            (Some(cell), Some(desc)) => FieldMut::new(self.arena, Some(cell), Some(desc)),
            _ => FieldMut::new(self.arena, None, None),
        }
    }

    /// Look a field up by its id. Writes through an unknown id go nowhere.
    pub fn field_with_id(&mut self, id: u32) -> FieldMut<'_> {
        let index = self
            .content
            .find_subinstruction_index_by_id(id)
            .unwrap_or(usize::MAX);
        self.field(index)
    }

    pub fn field_with_name(&mut self, name: &str) -> FieldMut<'_> {
        let index = self
            .content
            .find_subinstruction_index_by_name(name)
            .unwrap_or(usize::MAX);
        self.field(index)
    }

    /// Like [`field`][Self::field], but consumes the view so the field keeps its full lifetime.
    pub fn into_field(self, index: usize) -> FieldMut<'a> {
        match (self.cells.cell(index), self.content.get(index)) {
            (Some(cell), Some(desc)) => FieldMut::new(self.arena, Some(cell), Some(desc)),
            _ => FieldMut::new(self.arena, None, None),
        }
    }

    pub fn into_field_with_name(self, name: &str) -> FieldMut<'a> {
        let index = self
            .content
            .find_subinstruction_index_by_name(name)
            .unwrap_or(usize::MAX);
        self.into_field(index)
    }
}

impl<'a> fmt::Debug for AggregateMut<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.as_cref().fmt(f)
    }
}

fn content_of(desc: Option<&FieldDescriptor>) -> &GroupContent {
    desc.and_then(|d| d.content()).unwrap_or(&EMPTY_CONTENT)
}

/// Read-only view of a group field.
#[derive(Copy, Clone, Debug, Default)]
pub struct GroupRef<'a>(FieldRef<'a>);

impl<'a> GroupRef<'a> {
    /// The group's fields. Empty if the group is absent.
    pub fn fields(&self) -> AggregateRef<'a> {
        match self.0.cell().payload() {
            Payload::Group(span) if self.0.present() => {
                AggregateRef::new(self.0.arena(), *span, content_of(self.0.descriptor()))
            }
            _ => AggregateRef::empty(self.0.arena()),
        }
    }

    pub fn field_with_id(&self, id: u32) -> FieldRef<'a> {
        self.fields().field_with_id(id)
    }

    pub fn field_with_name(&self, name: &str) -> FieldRef<'a> {
        self.fields().field_with_name(name)
    }
}

/// Writable view of a group field.
#[derive(Debug)]
pub struct GroupMut<'a>(FieldMut<'a>);

impl<'a> GroupMut<'a> {
    /// Mark the group present and get its fields for writing. An optional group stays absent
    /// until this is called.
    pub fn as_present(&mut self) -> AggregateMut<'_> {
        let content = content_of(self.0.descriptor());
        let span = match (self.0.cell_id(), self.0.descriptor()) {
            (Some(id), Some(_)) => self.0.arena_mut().present_group(id, content),
            _ => CellSpan::EMPTY,
        };
        AggregateMut::new(self.0.arena_mut(), span, content)
    }

    /// Like [`as_present`][Self::as_present], but consumes the view.
    pub fn into_present(self) -> AggregateMut<'a> {
        let content = content_of(self.0.descriptor());
        let (arena, cell, desc) = self.0.into_parts();
        let span = match (cell, desc) {
            (Some(id), Some(_)) => arena.present_group(id, content),
            _ => CellSpan::EMPTY,
        };
        AggregateMut::new(arena, span, content)
    }

    pub fn fields(&self) -> AggregateRef<'_> {
        self.as_cref().fields()
    }
}

view_common!(GroupRef, GroupMut, |ty: FieldType| ty == FieldType::Group);

/// Read-only view of a sequence field.
#[derive(Copy, Clone, Debug, Default)]
pub struct SequenceRef<'a>(FieldRef<'a>);

impl<'a> SequenceRef<'a> {
    fn elements(&self) -> (CellSpan, usize) {
        match self.0.cell().payload() {
            Payload::Sequence { elements, len } if self.0.present() => (*elements, *len as usize),
            _ => (CellSpan::EMPTY, 0),
        }
    }

    /// Number of elements. Zero if the sequence is absent.
    pub fn len(&self) -> usize {
        self.elements().1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The fields of element `index`, or an empty aggregate if out of range.
    pub fn element(&self, index: usize) -> AggregateRef<'a> {
        let (elements, len) = self.elements();
        let content = content_of(self.0.descriptor());
        if index >= len {
            return AggregateRef::empty(self.0.arena());
        }
        let width = content.len();
        AggregateRef::new(self.0.arena(), elements.slice(index * width, width), content)
    }

    pub fn iter(&self) -> impl Iterator<Item = AggregateRef<'a>> + 'a {
        let this = *self;
        (0..this.len()).map(move |i| this.element(i))
    }
}

/// Writable view of a sequence field. Call [`resize`][SequenceMut::resize] before writing
/// elements.
#[derive(Debug)]
pub struct SequenceMut<'a>(FieldMut<'a>);

impl<'a> SequenceMut<'a> {
    pub fn len(&self) -> usize {
        self.as_cref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resize to `len` elements and mark the sequence present. Existing elements are kept, new
    /// ones start out like freshly allocated fields.
    pub fn resize(&mut self, len: usize) {
        let content = content_of(self.0.descriptor());
        if let (Some(id), Some(_)) = (self.0.cell_id(), self.0.descriptor()) {
            self.0.arena_mut().resize_sequence(id, content, len);
        }
    }

    /// The fields of element `index` for writing. Out of range gives an empty aggregate.
    pub fn element(&mut self, index: usize) -> AggregateMut<'_> {
        let span = self.element_span(index);
        let content = content_of(self.0.descriptor());
        AggregateMut::new(self.0.arena_mut(), span, content)
    }

    pub fn into_element(self, index: usize) -> AggregateMut<'a> {
        let span = self.element_span(index);
        let content = content_of(self.0.descriptor());
        let (arena, _, _) = self.0.into_parts();
        AggregateMut::new(arena, span, content)
    }

    fn element_span(&self, index: usize) -> CellSpan {
        let cref = self.as_cref();
        let (elements, len) = cref.elements();
        if index >= len {
            return CellSpan::EMPTY;
        }
        let width = content_of(cref.descriptor()).len();
        elements.slice(index * width, width)
    }
}

view_common!(SequenceRef, SequenceMut, |ty: FieldType| ty == FieldType::Sequence);

/// View of a dynamic template reference: a nested message whose template is picked at runtime.
#[derive(Copy, Clone, Debug, Default)]
pub struct DynamicRef<'a>(FieldRef<'a>);

impl<'a> DynamicRef<'a> {
    /// The id of the bound template, if the field is present and bound.
    pub fn template_id(&self) -> Option<u32> {
        match self.0.cell().payload() {
            Payload::TemplateRef { template, .. } if self.0.present() => *template,
            _ => None,
        }
    }

    /// The nested message, looked up through `registry`. `None` if unbound or if the registry
    /// doesn't know the bound template.
    pub fn message<'b>(&self, registry: &'b TemplateRegistry) -> Option<MessageRef<'b>>
    where
        'a: 'b,
    {
        let template = registry.get(self.template_id()?)?;
        match self.0.cell().payload() {
            Payload::TemplateRef { fields, .. } => Some(MessageRef {
                arena: self.0.arena(),
                template,
                fields: *fields,
            }),
            _ => None,
        }
    }
}

/// Writable view of a dynamic template reference.
#[derive(Debug)]
pub struct DynamicMut<'a>(FieldMut<'a>);

impl<'a> DynamicMut<'a> {
    pub fn template_id(&self) -> Option<u32> {
        self.as_cref().template_id()
    }

    /// Bind to `template` and mark the field present. Rebinding to the template already bound
    /// keeps the nested fields; any other template gets fresh storage.
    pub fn bind<'b>(&'b mut self, template: &'b Template) -> MessageMut<'b> {
        let bound = match self.0.as_cref().cell().payload() {
            Payload::TemplateRef {
                template: Some(id),
                fields,
            } if *id == template.id() => Some(*fields),
            _ => None,
        };
        let fields = match (self.0.cell_id(), self.0.descriptor(), bound) {
            (Some(_), Some(_), Some(fields)) => {
                if let Some(cell) = self.0.cell_mut() {
                    cell.set_present(true);
                }
                fields
            }
            (Some(id), Some(_), None) => self.0.arena_mut().bind_template(id, template),
            _ => CellSpan::EMPTY,
        };
        MessageMut {
            arena: self.0.arena_mut(),
            template,
            fields,
        }
    }

    /// The bound nested message for writing, looked up through `registry`.
    pub fn message_mut<'b>(&'b mut self, registry: &'b TemplateRegistry) -> Option<MessageMut<'b>> {
        let template = registry.get(self.template_id()?)?;
        let fields = match self.0.as_cref().cell().payload() {
            Payload::TemplateRef { fields, .. } => *fields,
            _ => return None,
        };
        Some(MessageMut {
            arena: self.0.arena_mut(),
            template,
            fields,
        })
    }
}

view_common!(DynamicRef, DynamicMut, |ty: FieldType| ty == FieldType::TemplateRef);

/// Read-only view of a whole message.
#[derive(Copy, Clone)]
pub struct MessageRef<'a> {
    arena: &'a Arena,
    template: &'a Template,
    fields: CellSpan,
}

impl<'a> MessageRef<'a> {
    /// View `message` as an instance of `template`. Fails if the message was allocated for a
    /// different template.
    pub fn new(arena: &'a Arena, template: &'a Template, message: Message) -> Result<Self> {
        if message.template != template.id() {
            return Err(Error::schema(format!(
                "message of template {} viewed as template {}",
                message.template,
                template.id()
            )));
        }
        Ok(Self {
            arena,
            template,
            fields: message.fields,
        })
    }

    pub fn template(&self) -> &'a Template {
        self.template
    }

    pub fn template_id(&self) -> u32 {
        self.template.id()
    }

    pub fn fields(&self) -> AggregateRef<'a> {
        AggregateRef::new(self.arena, self.fields, self.template.content())
    }

    pub fn field(&self, index: usize) -> FieldRef<'a> {
        self.fields().field(index)
    }

    pub fn field_with_id(&self, id: u32) -> FieldRef<'a> {
        self.fields().field_with_id(id)
    }

    pub fn field_with_name(&self, name: &str) -> FieldRef<'a> {
        self.fields().field_with_name(name)
    }

    pub(crate) fn arena(&self) -> &'a Arena {
        self.arena
    }
}

impl<'a> fmt::Debug for MessageRef<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MessageRef")
            .field("template", &self.template.name())
            .field("fields", &self.fields())
            .finish()
    }
}

/// Mutable view of a whole message.
pub struct MessageMut<'a> {
    arena: &'a mut Arena,
    template: &'a Template,
    fields: CellSpan,
}

impl<'a> MessageMut<'a> {
    /// View `message` as an instance of `template` for writing. Fails like
    /// [`MessageRef::new`].
    pub fn new(arena: &'a mut Arena, template: &'a Template, message: Message) -> Result<Self> {
        let fields = MessageRef::new(arena, template, message)?.fields;
        Ok(Self {
            arena,
            template,
            fields,
        })
    }

    pub fn as_cref(&self) -> MessageRef<'_> {
        MessageRef {
            arena: self.arena,
            template: self.template,
            fields: self.fields,
        }
    }

    pub fn template(&self) -> &'a Template {
        self.template
    }

    pub fn fields(&mut self) -> AggregateMut<'_> {
        AggregateMut::new(self.arena, self.fields, self.template.content())
    }

    pub fn into_fields(self) -> AggregateMut<'a> {
        AggregateMut::new(self.arena, self.fields, self.template.content())
    }

    pub fn field(&mut self, index: usize) -> FieldMut<'_> {
        self.fields().into_field(index)
    }

    pub fn field_with_id(&mut self, id: u32) -> FieldMut<'_> {
        let index = self
            .template
            .content()
            .find_subinstruction_index_by_id(id)
            .unwrap_or(usize::MAX);
        self.field(index)
    }

    pub fn field_with_name(&mut self, name: &str) -> FieldMut<'_> {
        self.fields().into_field_with_name(name)
    }
}

impl<'a> fmt::Debug for MessageMut<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.as_cref().fmt(f)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::descriptor::Operator;
    use crate::typed::*;
    use crate::value::Value;

    fn inner() -> Template {
        Template::new(
            9,
            "Header",
            vec![FieldDescriptor::new(1, "Seq", FieldType::UInt32)],
        )
        .unwrap()
    }

    fn order() -> Template {
        Template::new(
            2,
            "Order",
            vec![
                FieldDescriptor::new(11, "Account", FieldType::Ascii),
                FieldDescriptor::group(
                    20,
                    "Instrument",
                    vec![
                        FieldDescriptor::new(55, "Symbol", FieldType::Ascii),
                        FieldDescriptor::new(48, "SecurityID", FieldType::UInt64)
                            .into_optional()
                            .with_operator(Operator::Copy),
                    ],
                )
                .into_optional(),
                FieldDescriptor::sequence(
                    30,
                    "Legs",
                    vec![
                        FieldDescriptor::new(31, "Qty", FieldType::Int64),
                        FieldDescriptor::new(32, "Side", FieldType::Ascii),
                    ],
                ),
                FieldDescriptor::template_ref(40, "Hdr"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn lookup_misses_are_absent() {
        let t = order();
        let mut arena = Arena::new();
        let msg = arena.alloc_message(&t);
        let view = MessageRef::new(&arena, &t, msg).unwrap();
        assert!(view.field_with_id(999).absent());
        assert!(view.field_with_name("Nope").absent());
        assert_eq!(view.field_with_name("Nope").name(), "");
        let group: GroupRef = view.field_with_name("Instrument").dynamic_cast_as();
        assert!(group.absent());
        assert!(group.field_with_name("Symbol").absent());
        assert!(group.fields().is_empty());
    }

    #[test]
    fn group_and_sequence_writes() {
        let t = order();
        let mut arena = Arena::new();
        let msg = arena.alloc_message(&t);
        {
            let mut m = MessageMut::new(&mut arena, &t, msg).unwrap();
            let mut group: GroupMut = m.field_with_name("Instrument").dynamic_cast_as();
            let mut fields = group.as_present();
            let mut sym: AsciiMut = fields.field_with_name("Symbol").dynamic_cast_as();
            sym.set("IBM").unwrap();

            let mut legs: SequenceMut = m.field_with_id(30).dynamic_cast_as();
            legs.resize(2);
            let mut qty: Int64Mut = legs.element(1).into_field(0).dynamic_cast_as();
            qty.set(-40);
        }
        let view = MessageRef::new(&arena, &t, msg).unwrap();
        let group: GroupRef = view.field_with_name("Instrument").dynamic_cast_as();
        assert!(group.present());
        assert_eq!(
            group.field_with_id(55).to_value(),
            Some(Value::Ascii("IBM".into()))
        );
        assert!(group.field_with_id(48).absent());
        let legs: SequenceRef = view.field(2).dynamic_cast_as();
        assert_eq!(legs.len(), 2);
        let qtys: Vec<i64> = legs
            .iter()
            .map(|e| e.field(0).dynamic_cast_as::<Int64Ref>().value())
            .collect();
        assert_eq!(qtys, vec![0, -40]);
        assert!(legs.element(2).field(0).absent());
    }

    #[test]
    fn dynamic_binding() {
        let t = order();
        let registry = TemplateRegistry::from_templates(vec![t.clone(), inner()]).unwrap();
        let header = registry.get(9).unwrap();
        let mut arena = Arena::new();
        let msg = arena.alloc_message(&t);
        {
            let mut m = MessageMut::new(&mut arena, &t, msg).unwrap();
            let mut hdr: DynamicMut = m.field_with_name("Hdr").dynamic_cast_as();
            assert_eq!(hdr.template_id(), None);
            let mut nested = hdr.bind(header);
            let mut seq: UInt32Mut = nested.field(0).dynamic_cast_as();
            seq.set(77);
        }
        let view = MessageRef::new(&arena, &t, msg).unwrap();
        let hdr = view.field_with_name("Hdr");
        assert_eq!(hdr.id(), 9);
        let hdr: DynamicRef = hdr.dynamic_cast_as();
        let nested = hdr.message(&registry).unwrap();
        assert_eq!(nested.template_id(), 9);
        assert_eq!(nested.field_with_id(1).to_value(), Some(Value::UInt32(77)));
    }

    #[test]
    fn message_template_mismatch() {
        let mut arena = Arena::new();
        let msg = arena.alloc_message(&inner());
        assert!(MessageRef::new(&arena, &order(), msg).is_err());
    }
}
