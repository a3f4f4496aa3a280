//! Value cells: the fixed-size storage slot behind every field of a message.
//!
//! A cell never owns variable-length data. Strings, byte vectors, and the child cells of groups,
//! sequences, and dynamic template references live in an [`Arena`][crate::Arena]; the cell only
//! holds a span into it. That keeps cells `Copy` and lets a whole message's storage be dropped by
//! resetting the arena.

use crate::descriptor::FieldType;
use crate::value::Decimal;

/// Index of a cell inside an arena.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct CellId(pub(crate) u32);

/// A run of bytes inside an arena.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ByteSpan {
    pub(crate) start: u32,
    pub(crate) len: u32,
}

impl ByteSpan {
    pub const EMPTY: ByteSpan = ByteSpan { start: 0, len: 0 };

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A run of cells inside an arena.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct CellSpan {
    pub(crate) start: u32,
    pub(crate) len: u32,
}

impl CellSpan {
    pub const EMPTY: CellSpan = CellSpan { start: 0, len: 0 };

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The id of the cell at `index` within this span.
    pub fn cell(&self, index: usize) -> Option<CellId> {
        if index < self.len as usize {
            Some(CellId(self.start + index as u32))
        } else {
            None
        }
    }

    /// A sub-span of `len` cells starting `offset` cells in.
    pub(crate) fn slice(&self, offset: usize, len: usize) -> CellSpan {
        debug_assert!(offset + len <= self.len as usize);
        CellSpan {
            start: self.start + offset as u32,
            len: len as u32,
        }
    }
}

/// The active representation of a cell.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Payload {
    #[default]
    Absent,
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Decimal(Decimal),
    Ascii(ByteSpan),
    Unicode(ByteSpan),
    Bytes(ByteSpan),
    /// Child cells, one per field of the group.
    Group(CellSpan),
    /// Element cells, `len` elements laid out back to back, each one cell per element field.
    Sequence { elements: CellSpan, len: u32 },
    /// A dynamic template reference: the bound template id (if any) and its field cells.
    TemplateRef {
        template: Option<u32>,
        fields: CellSpan,
    },
}

impl Payload {
    /// The zero value for a field type.
    pub fn zero(ty: FieldType) -> Self {
        match ty {
            FieldType::Int32 => Payload::Int32(0),
            FieldType::UInt32 => Payload::UInt32(0),
            FieldType::Int64 => Payload::Int64(0),
            FieldType::UInt64 => Payload::UInt64(0),
            FieldType::Decimal => Payload::Decimal(Decimal::default()),
            FieldType::Ascii => Payload::Ascii(ByteSpan::EMPTY),
            FieldType::Unicode => Payload::Unicode(ByteSpan::EMPTY),
            FieldType::ByteVector => Payload::Bytes(ByteSpan::EMPTY),
            FieldType::Group => Payload::Group(CellSpan::EMPTY),
            FieldType::Sequence => Payload::Sequence {
                elements: CellSpan::EMPTY,
                len: 0,
            },
            FieldType::TemplateRef => Payload::TemplateRef {
                template: None,
                fields: CellSpan::EMPTY,
            },
        }
    }

    /// The field type this payload can back, or `None` for [`Payload::Absent`].
    pub fn field_type(&self) -> Option<FieldType> {
        Some(match self {
            Payload::Absent => return None,
            Payload::Int32(_) => FieldType::Int32,
            Payload::UInt32(_) => FieldType::UInt32,
            Payload::Int64(_) => FieldType::Int64,
            Payload::UInt64(_) => FieldType::UInt64,
            Payload::Decimal(_) => FieldType::Decimal,
            Payload::Ascii(_) => FieldType::Ascii,
            Payload::Unicode(_) => FieldType::Unicode,
            Payload::Bytes(_) => FieldType::ByteVector,
            Payload::Group(_) => FieldType::Group,
            Payload::Sequence { .. } => FieldType::Sequence,
            Payload::TemplateRef { .. } => FieldType::TemplateRef,
        })
    }

    pub(crate) fn as_wide(&self) -> Option<i128> {
        match *self {
            Payload::Int32(v) => Some(v as i128),
            Payload::UInt32(v) => Some(v as i128),
            Payload::Int64(v) => Some(v as i128),
            Payload::UInt64(v) => Some(v as i128),
            _ => None,
        }
    }

    pub(crate) fn byte_span(&self) -> Option<ByteSpan> {
        match *self {
            Payload::Ascii(s) | Payload::Unicode(s) | Payload::Bytes(s) => Some(s),
            _ => None,
        }
    }
}

/// One field's storage: a payload and a presence bit.
///
/// The presence bit only matters for optional fields. The payload of an absent field is left as
/// it was and carries no meaning.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ValueCell {
    present: bool,
    payload: Payload,
}

impl ValueCell {
    pub(crate) const EMPTY_REF: &'static ValueCell = &ValueCell::empty();

    pub const fn empty() -> Self {
        Self {
            present: false,
            payload: Payload::Absent,
        }
    }

    pub(crate) fn new(payload: Payload, present: bool) -> Self {
        Self { present, payload }
    }

    pub fn is_present(&self) -> bool {
        self.present
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub(crate) fn set_present(&mut self, present: bool) {
        self.present = present;
    }

    /// Replace the payload and mark the cell present.
    pub(crate) fn set(&mut self, payload: Payload) {
        self.payload = payload;
        self.present = true;
    }
}
