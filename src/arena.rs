use crate::cell::{ByteSpan, CellId, CellSpan, Payload, ValueCell};
use crate::descriptor::{FieldDescriptor, FieldType, GroupContent, EMPTY_CONTENT};
use crate::error::{Error, Result};
use crate::template::Template;
use crate::value::Value;

/// Bulk storage for message cells and their variable-length payloads.
///
/// Everything allocated from an arena lives until [`reset`][Arena::reset] is called; there is no
/// per-field freeing. Replacing a string or resizing a sequence allocates fresh storage and leaves
/// the old bytes behind until the next reset.
///
/// An arena belongs to one caller at a time. A decoder writes into the arena it is handed, so the
/// usual pattern is one arena per session, reset once the decoded messages have been consumed.
#[derive(Clone, Default)]
pub struct Arena {
    cells: Vec<ValueCell>,
    bytes: Vec<u8>,
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("cells", &self.cells.len())
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// A handle to one message's storage inside an [`Arena`]. View it through
/// [`MessageRef`][crate::MessageRef] or [`MessageMut`][crate::MessageMut].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub(crate) template: u32,
    pub(crate) fields: CellSpan,
}

impl Message {
    pub fn template_id(&self) -> u32 {
        self.template
    }

    pub fn fields(&self) -> CellSpan {
        self.fields
    }
}

impl Arena {
    pub const fn new() -> Self {
        Self {
            cells: Vec::new(),
            bytes: Vec::new(),
        }
    }

    /// Drop every cell and payload. All [`Message`] handles into this arena become invalid.
    pub fn reset(&mut self) {
        self.cells.clear();
        self.bytes.clear();
    }

    pub fn cells_used(&self) -> usize {
        self.cells.len()
    }

    pub fn bytes_used(&self) -> usize {
        self.bytes.len()
    }

    /// Allocate storage for one message of `template`, every field set to its starting state.
    pub fn alloc_message(&mut self, template: &Template) -> Message {
        Message {
            template: template.id(),
            fields: self.alloc_fields(template.content()),
        }
    }

    pub(crate) fn cell(&self, id: CellId) -> &ValueCell {
        self.cells.get(id.0 as usize).unwrap_or(ValueCell::EMPTY_REF)
    }

    pub(crate) fn cell_mut(&mut self, id: CellId) -> Option<&mut ValueCell> {
        self.cells.get_mut(id.0 as usize)
    }

    pub(crate) fn bytes(&self, span: ByteSpan) -> &[u8] {
        let start = span.start as usize;
        self.bytes
            .get(start..start + span.len as usize)
            .unwrap_or(&[])
    }

    pub(crate) fn alloc_bytes(&mut self, data: &[u8]) -> ByteSpan {
        if data.is_empty() {
            return ByteSpan::EMPTY;
        }
        let start = self.bytes.len() as u32;
        self.bytes.extend_from_slice(data);
        ByteSpan {
            start,
            len: data.len() as u32,
        }
    }

    /// Allocate `len` cells, all empty.
    pub(crate) fn alloc_cells(&mut self, len: usize) -> CellSpan {
        let start = self.cells.len() as u32;
        self.cells.resize(self.cells.len() + len, ValueCell::empty());
        CellSpan {
            start,
            len: len as u32,
        }
    }

    /// Allocate and initialize one cell per field of `content`.
    pub(crate) fn alloc_fields(&mut self, content: &GroupContent) -> CellSpan {
        let span = self.alloc_cells(content.len());
        self.init_fields(span, content);
        span
    }

    pub(crate) fn init_fields(&mut self, span: CellSpan, content: &GroupContent) {
        for (i, desc) in content.fields().iter().enumerate() {
            if let Some(id) = span.cell(i) {
                self.init_cell(id, desc);
            }
        }
    }

    /// Put a cell in its starting state: mandatory fields hold their initial value (or zero) and
    /// are present, optional fields are absent. Groups get their child cells right away.
    pub(crate) fn init_cell(&mut self, id: CellId, desc: &FieldDescriptor) {
        let ty = desc.field_type();
        let payload = match (ty, desc.initial_value()) {
            (FieldType::Group, _) => {
                Payload::Group(self.alloc_fields(desc.content().unwrap_or(&EMPTY_CONTENT)))
            }
            (_, Some(initial)) if !desc.optional() => self.store_value(initial, ty),
            _ => Payload::zero(ty),
        };
        if let Some(cell) = self.cell_mut(id) {
            *cell = ValueCell::new(payload, !desc.optional());
        }
    }

    /// Copy an owned value into arena storage as a payload of type `ty`. The caller checks that
    /// the value fits the type.
    pub(crate) fn store_value(&mut self, value: &Value, ty: FieldType) -> Payload {
        match (value, ty) {
            (Value::Int32(v), _) => Payload::Int32(*v),
            (Value::UInt32(v), _) => Payload::UInt32(*v),
            (Value::Int64(v), _) => Payload::Int64(*v),
            (Value::UInt64(v), _) => Payload::UInt64(*v),
            (Value::Decimal(v), _) => Payload::Decimal(*v),
            (Value::Ascii(s), FieldType::Ascii) | (Value::Unicode(s), FieldType::Ascii) => {
                Payload::Ascii(self.alloc_bytes(s.as_bytes()))
            }
            (Value::Ascii(s), _) | (Value::Unicode(s), _) => {
                Payload::Unicode(self.alloc_bytes(s.as_bytes()))
            }
            (Value::Bytes(b), _) => Payload::Bytes(self.alloc_bytes(b)),
        }
    }

    /// Write `value` into a cell described by `desc`, checking the type first.
    pub(crate) fn set_value(
        &mut self,
        id: CellId,
        desc: &FieldDescriptor,
        value: &Value,
    ) -> Result<()> {
        if !value.fits(desc.field_type()) {
            return Err(Error::schema(format!(
                "value {} doesn't fit type {}",
                value,
                desc.field_type().name()
            ))
            .at(desc.name()));
        }
        let payload = self.store_value(value, desc.field_type());
        if let Some(cell) = self.cell_mut(id) {
            cell.set(payload);
        }
        Ok(())
    }

    /// Read a scalar or string cell back out as an owned value.
    pub(crate) fn load_value(&self, payload: &Payload) -> Option<Value> {
        Some(match *payload {
            Payload::Int32(v) => Value::Int32(v),
            Payload::UInt32(v) => Value::UInt32(v),
            Payload::Int64(v) => Value::Int64(v),
            Payload::UInt64(v) => Value::UInt64(v),
            Payload::Decimal(v) => Value::Decimal(v),
            Payload::Ascii(s) => Value::Ascii(String::from_utf8_lossy(self.bytes(s)).into_owned()),
            Payload::Unicode(s) => {
                Value::Unicode(String::from_utf8_lossy(self.bytes(s)).into_owned())
            }
            Payload::Bytes(s) => Value::Bytes(self.bytes(s).to_vec()),
            _ => return None,
        })
    }

    /// Resize a sequence cell to `len` elements, keeping existing elements and initializing new
    /// ones. The sequence becomes present.
    pub(crate) fn resize_sequence(&mut self, id: CellId, content: &GroupContent, len: usize) {
        let width = content.len();
        let (old, old_len) = match *self.cell(id).payload() {
            Payload::Sequence { elements, len } => (elements, len as usize),
            _ => (CellSpan::EMPTY, 0),
        };
        let elements = self.alloc_cells(width * len);
        let keep = old_len.min(len);
        for i in 0..(keep * width) {
            let from = old.start as usize + i;
            let to = elements.start as usize + i;
            self.cells[to] = self.cells[from];
        }
        for e in keep..len {
            self.init_fields(elements.slice(e * width, width), content);
        }
        if let Some(cell) = self.cell_mut(id) {
            cell.set(Payload::Sequence {
                elements,
                len: len as u32,
            });
        }
    }

    /// Bind a dynamic template reference cell to `template`, with fresh field storage.
    pub(crate) fn bind_template(&mut self, id: CellId, template: &Template) -> CellSpan {
        let fields = self.alloc_fields(template.content());
        if let Some(cell) = self.cell_mut(id) {
            cell.set(Payload::TemplateRef {
                template: Some(template.id()),
                fields,
            });
        }
        fields
    }

    /// Make sure a group cell has child storage matching its content, then mark it present.
    pub(crate) fn present_group(&mut self, id: CellId, content: &GroupContent) -> CellSpan {
        let children = match *self.cell(id).payload() {
            Payload::Group(span) if span.len() == content.len() => span,
            _ => self.alloc_fields(content),
        };
        if let Some(cell) = self.cell_mut(id) {
            cell.set(Payload::Group(children));
        }
        children
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::descriptor::Operator;

    fn template() -> Template {
        Template::new(
            5,
            "Order",
            vec![
                FieldDescriptor::new(1, "Ver", FieldType::UInt32)
                    .with_operator(Operator::Constant)
                    .with_initial(3u32),
                FieldDescriptor::new(2, "Note", FieldType::Unicode).into_optional(),
                FieldDescriptor::group(
                    3,
                    "Parties",
                    vec![FieldDescriptor::new(4, "Id", FieldType::Ascii)],
                ),
                FieldDescriptor::sequence(
                    6,
                    "Legs",
                    vec![FieldDescriptor::new(7, "Qty", FieldType::Int64)],
                ),
            ],
        )
        .unwrap()
    }

    #[test]
    fn message_starts_initialized() {
        let mut arena = Arena::new();
        let msg = arena.alloc_message(&template());
        assert_eq!(msg.template_id(), 5);
        // four fields plus one child of the group
        assert_eq!(arena.cells_used(), 5);
        let ver = arena.cell(msg.fields.cell(0).unwrap());
        assert!(ver.is_present());
        assert_eq!(*ver.payload(), Payload::UInt32(3));
        let note = arena.cell(msg.fields.cell(1).unwrap());
        assert!(!note.is_present());
        match *arena.cell(msg.fields.cell(2).unwrap()).payload() {
            Payload::Group(span) => assert_eq!(span.len(), 1),
            ref p => panic!("expected group payload, got {:?}", p),
        }
    }

    #[test]
    fn bytes_roundtrip_and_reset() {
        let mut arena = Arena::new();
        let a = arena.alloc_bytes(b"hello");
        let b = arena.alloc_bytes(b"");
        assert_eq!(arena.bytes(a), b"hello");
        assert_eq!(arena.bytes(b), b"");
        assert_eq!(arena.bytes_used(), 5);
        arena.reset();
        assert_eq!(arena.bytes_used(), 0);
        assert_eq!(arena.cells_used(), 0);
        assert_eq!(arena.bytes(a), b"");
    }

    #[test]
    fn resize_keeps_elements() {
        let t = template();
        let legs = &t.fields()[3];
        let content = legs.content().unwrap();
        let mut arena = Arena::new();
        let msg = arena.alloc_message(&t);
        let id = msg.fields.cell(3).unwrap();
        arena.resize_sequence(id, content, 2);
        let elements = match *arena.cell(id).payload() {
            Payload::Sequence { elements, len } => {
                assert_eq!(len, 2);
                elements
            }
            ref p => panic!("expected sequence payload, got {:?}", p),
        };
        arena.cell_mut(elements.cell(1).unwrap()).unwrap().set(Payload::Int64(-9));
        arena.resize_sequence(id, content, 3);
        match *arena.cell(id).payload() {
            Payload::Sequence { elements, len } => {
                assert_eq!(len, 3);
                assert_eq!(*arena.cell(elements.cell(1).unwrap()).payload(), Payload::Int64(-9));
                assert_eq!(*arena.cell(elements.cell(2).unwrap()).payload(), Payload::Int64(0));
            }
            ref p => panic!("expected sequence payload, got {:?}", p),
        }
    }
}
