//! Field descriptors: the immutable schema nodes a template is built from.
//!
//! A [`FieldDescriptor`] names one field, its wire type, whether it may be absent, and the
//! operator used to compress it against previously sent values. Groups and sequences carry a
//! [`GroupContent`] holding their child descriptors and the index tables used to find children
//! by id or name.
//!
//! Descriptors are built through builder methods or deserialized with serde, then handed to
//! [`Template::new`][crate::Template::new], which validates them and assigns dictionary slots.
//! After that they are never mutated.

use std::collections::BTreeMap;

use educe::Educe;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::value::{Decimal, Value};

/// The wire type of a field.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Int32,
    UInt32,
    Int64,
    UInt64,
    Decimal,
    Ascii,
    Unicode,
    ByteVector,
    Group,
    Sequence,
    TemplateRef,
}

impl FieldType {
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            FieldType::Int32 | FieldType::UInt32 | FieldType::Int64 | FieldType::UInt64
        )
    }

    /// Strings and byte vectors: everything that delta and tail can trim.
    pub fn is_byte_like(self) -> bool {
        matches!(
            self,
            FieldType::Ascii | FieldType::Unicode | FieldType::ByteVector
        )
    }

    pub fn is_composite(self) -> bool {
        matches!(
            self,
            FieldType::Group | FieldType::Sequence | FieldType::TemplateRef
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            FieldType::Int32 => "int32",
            FieldType::UInt32 => "uInt32",
            FieldType::Int64 => "int64",
            FieldType::UInt64 => "uInt64",
            FieldType::Decimal => "decimal",
            FieldType::Ascii => "string",
            FieldType::Unicode => "unicode",
            FieldType::ByteVector => "byteVector",
            FieldType::Group => "group",
            FieldType::Sequence => "sequence",
            FieldType::TemplateRef => "templateRef",
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Presence {
    #[default]
    Mandatory,
    Optional,
}

/// Field compression operators.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    /// Value always sent.
    #[default]
    None,
    /// Value never sent; always the initial value.
    Constant,
    /// Value sent only when it differs from the initial value.
    Default,
    /// Value sent only when it differs from the previous value.
    Copy,
    /// Value sent only when it isn't the previous value plus one.
    Increment,
    /// Difference from the previous value always sent.
    Delta,
    /// Differing suffix sent when the value changed.
    Tail,
}

impl Operator {
    /// Number of presence map bits a field with this operator consumes.
    pub fn pmap_bits(self, optional: bool) -> usize {
        match self {
            Operator::None | Operator::Delta => 0,
            Operator::Constant => optional as usize,
            Operator::Default | Operator::Copy | Operator::Increment | Operator::Tail => 1,
        }
    }

    /// True if the operator keeps a previous value in the session dictionary.
    pub fn uses_dictionary(self) -> bool {
        matches!(
            self,
            Operator::Copy | Operator::Increment | Operator::Delta | Operator::Tail
        )
    }
}

/// The children of a group, sequence element, or template, plus lookup tables by id and name.
///
/// Ids of `0` mean "no id" and are left out of the id table.
#[derive(Clone, Debug, Default, Educe, Serialize, Deserialize)]
#[educe(PartialEq(bound()))]
#[serde(from = "Vec<FieldDescriptor>", into = "Vec<FieldDescriptor>")]
pub struct GroupContent {
    fields: Vec<FieldDescriptor>,
    #[educe(PartialEq(ignore))]
    by_id: BTreeMap<u32, usize>,
    #[educe(PartialEq(ignore))]
    by_name: BTreeMap<String, usize>,
    #[educe(PartialEq(ignore))]
    pmap_bits: usize,
}

impl GroupContent {
    pub(crate) const EMPTY: GroupContent = GroupContent {
        fields: Vec::new(),
        by_id: BTreeMap::new(),
        by_name: BTreeMap::new(),
        pmap_bits: 0,
    };

    pub fn new(fields: Vec<FieldDescriptor>) -> Self {
        let mut by_id = BTreeMap::new();
        let mut by_name = BTreeMap::new();
        for (i, f) in fields.iter().enumerate() {
            if f.id != 0 {
                by_id.entry(f.id).or_insert(i);
            }
            by_name.entry(f.name.clone()).or_insert(i);
        }
        let pmap_bits = fields.iter().map(|f| f.pmap_bits()).sum();
        Self {
            fields,
            by_id,
            by_name,
            pmap_bits,
        }
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FieldDescriptor> {
        self.fields.get(index)
    }

    pub fn find_subinstruction_index_by_id(&self, id: u32) -> Option<usize> {
        self.by_id.get(&id).copied()
    }

    pub fn find_subinstruction_index_by_name(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Whether an instance of this content is preceded by its own presence map.
    pub fn needs_pmap(&self) -> bool {
        self.pmap_bits > 0
    }

    /// Validate every child, assign dictionary slots, and rebuild the cached presence map size.
    pub(crate) fn prepare(&mut self, slots: &mut usize) -> Result<()> {
        for f in self.fields.iter_mut() {
            let name = f.name.clone();
            f.prepare(slots).map_err(|e| e.at(&name))?;
        }
        let named = self.fields.iter().filter(|f| f.id != 0).count();
        if named != self.by_id.len() {
            return Err(Error::schema("duplicate field id"));
        }
        if self.fields.len() != self.by_name.len() {
            return Err(Error::schema("duplicate field name"));
        }
        self.pmap_bits = self.fields.iter().map(|f| f.pmap_bits()).sum();
        Ok(())
    }
}

/// Content of a group or sequence whose descriptor has none.
pub(crate) static EMPTY_CONTENT: GroupContent = GroupContent::EMPTY;

impl From<Vec<FieldDescriptor>> for GroupContent {
    fn from(fields: Vec<FieldDescriptor>) -> Self {
        Self::new(fields)
    }
}

impl From<GroupContent> for Vec<FieldDescriptor> {
    fn from(content: GroupContent) -> Self {
        content.fields
    }
}

#[inline]
fn is_default<T: Default + PartialEq>(v: &T) -> bool {
    *v == T::default()
}

/// One field of a template.
///
/// # Defaults
///
/// - presence: mandatory
/// - operator: none
/// - initial: none
/// - mantissa_operator: none (decimals only)
///
#[derive(Clone, Debug, Educe, Serialize, Deserialize)]
#[educe(PartialEq(bound()))]
#[serde(deny_unknown_fields)]
pub struct FieldDescriptor {
    #[serde(default)]
    id: u32,
    name: String,
    #[serde(rename = "type")]
    field_type: FieldType,
    #[serde(default, skip_serializing_if = "is_default")]
    presence: Presence,
    #[serde(default, skip_serializing_if = "is_default")]
    operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    initial: Option<Value>,
    #[serde(default, skip_serializing_if = "is_default")]
    mantissa_operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    length: Option<Box<FieldDescriptor>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<GroupContent>,
    #[educe(PartialEq(ignore))]
    #[serde(skip)]
    slot: Option<usize>,
    #[educe(PartialEq(ignore))]
    #[serde(skip)]
    mantissa_slot: Option<usize>,
}

impl FieldDescriptor {
    /// Make a new mandatory field with no operator.
    pub fn new(id: u32, name: impl Into<String>, field_type: FieldType) -> Self {
        let content = match field_type {
            FieldType::Group | FieldType::Sequence => Some(GroupContent::default()),
            _ => None,
        };
        let length = if field_type == FieldType::Sequence {
            Some(Box::new(FieldDescriptor::new(0, "length", FieldType::UInt32)))
        } else {
            None
        };
        Self {
            id,
            name: name.into(),
            field_type,
            presence: Presence::Mandatory,
            operator: Operator::None,
            initial: None,
            mantissa_operator: Operator::None,
            length,
            content,
            slot: None,
            mantissa_slot: None,
        }
    }

    /// Make a decimal field. The operator set with [`with_operator`][Self::with_operator] applies to the
    /// exponent; use [`with_mantissa_operator`][Self::with_mantissa_operator] for the mantissa.
    pub fn decimal(id: u32, name: impl Into<String>) -> Self {
        Self::new(id, name, FieldType::Decimal)
    }

    pub fn group(id: u32, name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        let mut desc = Self::new(id, name, FieldType::Group);
        desc.content = Some(GroupContent::new(fields));
        desc
    }

    /// Make a sequence. Its length field defaults to a mandatory `uInt32` with no operator.
    pub fn sequence(id: u32, name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        let mut desc = Self::new(id, name, FieldType::Sequence);
        desc.content = Some(GroupContent::new(fields));
        desc
    }

    /// Make a dynamic template reference.
    pub fn template_ref(id: u32, name: impl Into<String>) -> Self {
        Self::new(id, name, FieldType::TemplateRef)
    }

    pub fn into_optional(mut self) -> Self {
        self.presence = Presence::Optional;
        self
    }

    pub fn with_presence(mut self, presence: Presence) -> Self {
        self.presence = presence;
        self
    }

    pub fn with_operator(mut self, operator: Operator) -> Self {
        self.operator = operator;
        self
    }

    pub fn with_mantissa_operator(mut self, operator: Operator) -> Self {
        self.mantissa_operator = operator;
        self
    }

    pub fn with_initial(mut self, initial: impl Into<Value>) -> Self {
        self.initial = Some(initial.into());
        self
    }

    /// Replace a sequence's length field. Its presence is overridden by the sequence's presence
    /// when the template is built.
    pub fn with_length(mut self, length: FieldDescriptor) -> Self {
        self.length = Some(Box::new(length));
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn presence(&self) -> Presence {
        self.presence
    }

    pub fn optional(&self) -> bool {
        self.presence == Presence::Optional
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn mantissa_operator(&self) -> Operator {
        self.mantissa_operator
    }

    pub fn has_initial_value(&self) -> bool {
        self.initial.is_some()
    }

    pub fn initial_value(&self) -> Option<&Value> {
        self.initial.as_ref()
    }

    /// The child descriptors of a group or sequence.
    pub fn content(&self) -> Option<&GroupContent> {
        self.content.as_ref()
    }

    /// The length field of a sequence.
    pub fn length_field(&self) -> Option<&FieldDescriptor> {
        self.length.as_deref()
    }

    pub fn find_subinstruction_index_by_id(&self, id: u32) -> Option<usize> {
        self.content
            .as_ref()
            .and_then(|c| c.find_subinstruction_index_by_id(id))
    }

    pub fn find_subinstruction_index_by_name(&self, name: &str) -> Option<usize> {
        self.content
            .as_ref()
            .and_then(|c| c.find_subinstruction_index_by_name(name))
    }

    pub(crate) fn slot(&self) -> Option<usize> {
        self.slot
    }

    pub(crate) fn mantissa_slot(&self) -> Option<usize> {
        self.mantissa_slot
    }

    /// Presence map bits this field consumes in its enclosing map, at most.
    pub(crate) fn pmap_bits(&self) -> usize {
        match self.field_type {
            FieldType::Group => self.optional() as usize,
            FieldType::Sequence => self.length.as_ref().map_or(0, |l| l.pmap_bits()),
            FieldType::TemplateRef => 0,
            FieldType::Decimal => {
                self.operator.pmap_bits(self.optional()) + self.mantissa_operator.pmap_bits(false)
            }
            _ => self.operator.pmap_bits(self.optional()),
        }
    }

    fn prepare(&mut self, slots: &mut usize) -> Result<()> {
        let ty = self.field_type;
        if let Some(initial) = &self.initial {
            if ty.is_composite() {
                return Err(Error::schema(format!("{} can't have an initial value", ty.name())));
            }
            if !initial.fits(ty) {
                return Err(Error::schema(format!(
                    "initial value {} doesn't fit type {}",
                    initial,
                    ty.name()
                )));
            }
            if let Value::Decimal(d) = initial {
                if !(Decimal::MIN_EXPONENT..=Decimal::MAX_EXPONENT).contains(&d.exponent) {
                    return Err(Error::schema("decimal initial exponent out of range"));
                }
            }
        }

        if ty.is_composite() && self.operator != Operator::None {
            return Err(Error::schema(format!("{} can't have an operator", ty.name())));
        }
        if ty == FieldType::TemplateRef && self.optional() {
            return Err(Error::schema("templateRef can't be optional"));
        }
        if ty != FieldType::Decimal && self.mantissa_operator != Operator::None {
            return Err(Error::schema("only decimals have a mantissa operator"));
        }
        let ops: &[Operator] = if ty == FieldType::Decimal {
            &[self.operator, self.mantissa_operator]
        } else {
            std::slice::from_ref(&self.operator)
        };
        for op in ops {
            match op {
                Operator::Increment if !(ty.is_integer() || ty == FieldType::Decimal) => {
                    return Err(Error::schema(format!(
                        "increment operator used on {}",
                        ty.name()
                    )))
                }
                Operator::Tail if !ty.is_byte_like() => {
                    return Err(Error::schema(format!("tail operator used on {}", ty.name())))
                }
                Operator::Constant if self.initial.is_none() => {
                    return Err(Error::schema("constant operator needs an initial value"))
                }
                _ => (),
            }
        }
        if self.operator == Operator::Default && !self.optional() && self.initial.is_none() {
            return Err(Error::schema(
                "mandatory default operator needs an initial value",
            ));
        }
        if ty == FieldType::Decimal
            && self.mantissa_operator == Operator::Default
            && self.initial.is_none()
        {
            return Err(Error::schema("default mantissa needs an initial value"));
        }

        self.slot = None;
        self.mantissa_slot = None;
        if self.operator.uses_dictionary() {
            self.slot = Some(*slots);
            *slots += 1;
        }
        if ty == FieldType::Decimal && self.mantissa_operator.uses_dictionary() {
            self.mantissa_slot = Some(*slots);
            *slots += 1;
        }

        match ty {
            FieldType::Group => {
                self.content
                    .get_or_insert_with(GroupContent::default)
                    .prepare(slots)?;
            }
            FieldType::Sequence => {
                let presence = self.presence;
                let length = self
                    .length
                    .get_or_insert_with(|| Box::new(FieldDescriptor::new(0, "length", FieldType::UInt32)));
                if length.field_type != FieldType::UInt32 {
                    return Err(Error::schema("sequence length must be uInt32"));
                }
                length.presence = presence;
                length.prepare(slots).map_err(|e| e.at("length"))?;
                self.content
                    .get_or_insert_with(GroupContent::default)
                    .prepare(slots)?;
            }
            _ => {
                if self.content.is_some() || self.length.is_some() {
                    return Err(Error::schema(format!(
                        "{} can't have child fields",
                        ty.name()
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn prepare(mut desc: FieldDescriptor) -> Result<FieldDescriptor> {
        let mut slots = 0;
        desc.prepare(&mut slots)?;
        Ok(desc)
    }

    #[test]
    fn lookup_tables() {
        let group = FieldDescriptor::group(
            10,
            "Instrument",
            vec![
                FieldDescriptor::new(55, "Symbol", FieldType::Ascii),
                FieldDescriptor::new(0, "Note", FieldType::Unicode),
                FieldDescriptor::new(48, "SecurityID", FieldType::UInt64),
            ],
        );
        assert_eq!(group.find_subinstruction_index_by_id(48), Some(2));
        assert_eq!(group.find_subinstruction_index_by_name("Note"), Some(1));
        assert_eq!(group.find_subinstruction_index_by_id(0), None);
        assert_eq!(group.find_subinstruction_index_by_name("Missing"), None);
        let leaf = FieldDescriptor::new(1, "Leaf", FieldType::Int32);
        assert_eq!(leaf.find_subinstruction_index_by_id(1), None);
    }

    #[test]
    fn operator_checks() {
        let bad = FieldDescriptor::new(1, "Sym", FieldType::Ascii).with_operator(Operator::Increment);
        assert!(matches!(prepare(bad), Err(Error::SchemaViolation { .. })));
        let bad = FieldDescriptor::new(1, "Qty", FieldType::UInt32).with_operator(Operator::Tail);
        assert!(prepare(bad).is_err());
        let bad = FieldDescriptor::new(1, "Ver", FieldType::UInt32).with_operator(Operator::Constant);
        assert!(prepare(bad).is_err());
        let bad = FieldDescriptor::new(1, "Ver", FieldType::UInt32).with_operator(Operator::Default);
        assert!(prepare(bad).is_err());
        let ok = FieldDescriptor::new(1, "Ver", FieldType::UInt32)
            .into_optional()
            .with_operator(Operator::Default);
        assert!(prepare(ok).is_ok());
        let bad = FieldDescriptor::new(1, "Ver", FieldType::UInt32).with_initial(-1i32);
        assert!(prepare(bad).is_err());
    }

    #[test]
    fn duplicate_children_rejected() {
        let group = FieldDescriptor::group(
            1,
            "G",
            vec![
                FieldDescriptor::new(5, "A", FieldType::Int32),
                FieldDescriptor::new(5, "B", FieldType::Int32),
            ],
        );
        let err = prepare(group).unwrap_err();
        assert!(err.to_string().contains("duplicate field id"));
    }

    #[test]
    fn slots_and_sequence_length() {
        let seq = FieldDescriptor::sequence(
            1,
            "Entries",
            vec![
                FieldDescriptor::new(2, "Px", FieldType::Int64).with_operator(Operator::Delta),
                FieldDescriptor::new(3, "Qty", FieldType::UInt32).with_operator(Operator::Copy),
            ],
        )
        .into_optional();
        let seq = prepare(seq).unwrap();
        let length = seq.length_field().unwrap();
        assert!(length.optional());
        let content = seq.content().unwrap();
        assert_eq!(content.fields()[0].slot(), Some(0));
        assert_eq!(content.fields()[1].slot(), Some(1));
        assert!(content.needs_pmap());
    }

    #[test]
    fn nested_equality_ignores_slots() {
        let book = || {
            FieldDescriptor::sequence(
                1,
                "Levels",
                vec![FieldDescriptor::group(
                    2,
                    "Side",
                    vec![FieldDescriptor::new(3, "Qty", FieldType::UInt32).with_operator(Operator::Copy)],
                )],
            )
        };
        let prepared = prepare(book()).unwrap();
        assert_eq!(prepared, book());
        let changed = FieldDescriptor::sequence(
            1,
            "Levels",
            vec![FieldDescriptor::group(
                2,
                "Side",
                vec![FieldDescriptor::new(3, "Qty", FieldType::UInt32).with_operator(Operator::Delta)],
            )],
        );
        assert_ne!(book(), changed);
        assert_ne!(
            book(),
            book().with_length(FieldDescriptor::new(0, "n", FieldType::UInt32))
        );
    }

    #[test]
    fn serde_builds_index_tables() {
        let json = r#"{
            "id": 7, "name": "Quote", "type": "Group",
            "content": [
                { "id": 1, "name": "Bid", "type": "Decimal", "operator": "Copy", "mantissa_operator": "Delta" },
                { "id": 2, "name": "Sym", "type": "Ascii", "presence": "Optional" }
            ]
        }"#;
        let desc: FieldDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(desc.find_subinstruction_index_by_name("Sym"), Some(1));
        assert_eq!(desc.find_subinstruction_index_by_id(1), Some(0));
        let back = serde_json::to_string(&desc).unwrap();
        let again: FieldDescriptor = serde_json::from_str(&back).unwrap();
        assert_eq!(desc, again);
    }
}
