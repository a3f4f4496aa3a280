//! Per-operator encode and decode rules.
//!
//! Each rule is written twice, once per direction, and the two must agree on every presence bit
//! and every dictionary update: the encoder clears a field's bit exactly when the decoder, seeing
//! a cleared bit, would reproduce the value being sent.
//!
//! Integers (including a decimal's exponent and mantissa and a sequence's length) go through
//! [`IntField`]; strings and byte vectors go through [`BytesField`].

use std::borrow::Cow;

use crate::descriptor::{FieldDescriptor, FieldType, Operator};
use crate::dictionary::{DictEntry, Dictionary};
use crate::error::{Error, Result};
use crate::pmap::{PmapReader, PmapWriter};
use crate::stream::StreamBuffer;
use crate::value::Value;
use crate::varint::{self, IntKind, MAX_BYTES_32};

fn no_slot() -> Error {
    Error::schema("operator has no dictionary slot")
}

fn write_delta(out: &mut StreamBuffer, nullable: bool, delta: Option<i128>) {
    match delta {
        Some(d) if nullable && d >= 0 => varint::write_int(out, d + 1),
        Some(d) => varint::write_int(out, d),
        None => out.push(0x80),
    }
}

fn read_delta(buf: &mut &[u8], max_bytes: usize, nullable: bool) -> Result<Option<i128>> {
    let raw = varint::read_int(buf, max_bytes)?;
    Ok(match raw {
        0 if nullable => None,
        d if nullable && d > 0 => Some(d - 1),
        d => Some(d),
    })
}

/// The encoding rules for one integer on the wire.
#[derive(Copy, Clone, Debug)]
pub(crate) struct IntField {
    kind: IntKind,
    op: Operator,
    optional: bool,
    slot: Option<usize>,
    initial: Option<i128>,
}

impl IntField {
    /// An integer field, or a sequence's length field.
    pub fn for_field(desc: &FieldDescriptor) -> Result<Self> {
        let kind = match desc.field_type() {
            FieldType::Int32 => IntKind::I32,
            FieldType::UInt32 => IntKind::U32,
            FieldType::Int64 => IntKind::I64,
            FieldType::UInt64 => IntKind::U64,
            ty => {
                return Err(Error::schema(format!(
                    "{} isn't an integer type",
                    ty.name()
                )))
            }
        };
        Ok(Self {
            kind,
            op: desc.operator(),
            optional: desc.optional(),
            slot: desc.slot(),
            initial: desc.initial_value().and_then(Value::as_wide),
        })
    }

    pub fn exponent(desc: &FieldDescriptor) -> Self {
        Self {
            kind: IntKind::Exponent,
            op: desc.operator(),
            optional: desc.optional(),
            slot: desc.slot(),
            initial: desc
                .initial_value()
                .and_then(Value::as_decimal)
                .map(|d| d.exponent as i128),
        }
    }

    /// A decimal's mantissa. Never nullable: an absent decimal is signalled by its exponent.
    pub fn mantissa(desc: &FieldDescriptor) -> Self {
        Self {
            kind: IntKind::I64,
            op: desc.mantissa_operator(),
            optional: false,
            slot: desc.mantissa_slot(),
            initial: desc
                .initial_value()
                .and_then(Value::as_decimal)
                .map(|d| d.mantissa as i128),
        }
    }

    fn slot(&self) -> Result<usize> {
        self.slot.ok_or_else(no_slot)
    }

    /// What a cleared bit means for copy and increment, and the dictionary entry that goes
    /// with it.
    fn implied(&self, prev: &DictEntry) -> Result<(Option<i128>, DictEntry)> {
        match *prev {
            DictEntry::Int(p) => {
                let v = if self.op == Operator::Increment { p + 1 } else { p };
                Ok((Some(v), DictEntry::Int(v)))
            }
            DictEntry::Undefined => match self.initial {
                Some(i) => Ok((Some(i), DictEntry::Int(i))),
                None if self.optional => Ok((None, DictEntry::Empty)),
                None => Err(Error::schema("no previous value and no initial value")),
            },
            DictEntry::Empty if self.optional => Ok((None, DictEntry::Empty)),
            DictEntry::Empty => Err(Error::schema("previous value is empty")),
            DictEntry::Bytes(_) => Err(Error::schema("previous value isn't an integer")),
        }
    }

    fn delta_base(&self, prev: &DictEntry) -> Result<i128> {
        match *prev {
            DictEntry::Int(p) => Ok(p),
            DictEntry::Undefined => Ok(self.initial.unwrap_or(0)),
            DictEntry::Empty => Err(Error::schema("delta base is empty")),
            DictEntry::Bytes(_) => Err(Error::schema("previous value isn't an integer")),
        }
    }

    pub fn encode(
        &self,
        value: Option<i128>,
        out: &mut StreamBuffer,
        pmap: &mut PmapWriter,
        dict: &mut Dictionary,
        scope: u32,
    ) -> Result<()> {
        if value.is_none() && !self.optional {
            return Err(Error::schema("mandatory field has no value"));
        }
        if let Some(v) = value {
            self.kind.check(v).map_err(|_| {
                Error::schema(format!("value {} out of range for {:?}", v, self.kind))
            })?;
        }
        match self.op {
            Operator::None => varint::write_value(out, self.kind, self.optional, value),
            Operator::Constant => {
                if value.is_some() && value != self.initial {
                    return Err(Error::schema("value differs from constant"));
                }
                if self.optional {
                    pmap.push(value.is_some());
                }
            }
            Operator::Default => {
                if value == self.initial {
                    pmap.push(false);
                } else {
                    pmap.push(true);
                    varint::write_value(out, self.kind, self.optional, value);
                }
            }
            Operator::Copy | Operator::Increment => {
                let slot = self.slot()?;
                match self.implied(dict.get(scope, slot)) {
                    Ok((implied, entry)) if implied == value => {
                        pmap.push(false);
                        dict.set(scope, slot, entry);
                    }
                    _ => {
                        pmap.push(true);
                        varint::write_value(out, self.kind, self.optional, value);
                        dict.set(scope, slot, value.map_or(DictEntry::Empty, DictEntry::Int));
                    }
                }
            }
            Operator::Delta => {
                let slot = self.slot()?;
                let base = self.delta_base(dict.get(scope, slot))?;
                write_delta(out, self.optional, value.map(|v| v - base));
                if let Some(v) = value {
                    dict.set(scope, slot, DictEntry::Int(v));
                }
            }
            Operator::Tail => return Err(Error::schema("tail operator on an integer")),
        }
        Ok(())
    }

    /// Decode one value. `Ok(None)` means the field is absent.
    pub fn decode(
        &self,
        buf: &mut &[u8],
        pmap: &mut PmapReader,
        dict: &mut Dictionary,
        scope: u32,
    ) -> Result<Option<i128>> {
        match self.op {
            Operator::None => varint::read_value(buf, self.kind, self.optional),
            Operator::Constant => {
                if !self.optional || pmap.next_bit() {
                    Ok(self.initial)
                } else {
                    Ok(None)
                }
            }
            Operator::Default => {
                if pmap.next_bit() {
                    varint::read_value(buf, self.kind, self.optional)
                } else {
                    Ok(self.initial)
                }
            }
            Operator::Copy | Operator::Increment => {
                let slot = self.slot()?;
                if pmap.next_bit() {
                    let v = varint::read_value(buf, self.kind, self.optional)?;
                    dict.set(scope, slot, v.map_or(DictEntry::Empty, DictEntry::Int));
                    Ok(v)
                } else {
                    let (v, entry) = self.implied(dict.get(scope, slot))?;
                    if let Some(v) = v {
                        self.kind.check(v)?;
                    }
                    dict.set(scope, slot, entry);
                    Ok(v)
                }
            }
            Operator::Delta => {
                let slot = self.slot()?;
                let base = self.delta_base(dict.get(scope, slot))?;
                match read_delta(buf, self.kind.max_bytes(), self.optional)? {
                    Some(d) => {
                        let v = self.kind.check(base + d)?;
                        dict.set(scope, slot, DictEntry::Int(v));
                        Ok(Some(v))
                    }
                    None => Ok(None),
                }
            }
            Operator::Tail => Err(Error::schema("tail operator on an integer")),
        }
    }
}

/// The encoding rules for one string or byte vector on the wire.
#[derive(Copy, Clone, Debug)]
pub(crate) struct BytesField<'a> {
    ty: FieldType,
    op: Operator,
    optional: bool,
    slot: Option<usize>,
    initial: Option<&'a [u8]>,
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn common_suffix(a: &[u8], b: &[u8]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

impl<'a> BytesField<'a> {
    pub fn for_field(desc: &'a FieldDescriptor) -> Result<Self> {
        let ty = desc.field_type();
        if !ty.is_byte_like() {
            return Err(Error::schema(format!(
                "{} isn't a string or byte type",
                ty.name()
            )));
        }
        Ok(Self {
            ty,
            op: desc.operator(),
            optional: desc.optional(),
            slot: desc.slot(),
            initial: desc.initial_value().and_then(Value::as_bytes),
        })
    }

    fn slot(&self) -> Result<usize> {
        self.slot.ok_or_else(no_slot)
    }

    /// Check decoded bytes against the field type.
    fn validate(&self, data: &[u8]) -> Result<()> {
        match self.ty {
            FieldType::Ascii if !data.is_ascii() => {
                Err(Error::encoding("non-ASCII byte in ASCII string"))
            }
            FieldType::Unicode => std::str::from_utf8(data)
                .map(|_| ())
                .map_err(|e| Error::encoding(format!("invalid UTF-8: {}", e))),
            _ => Ok(()),
        }
    }

    /// What a cleared bit means for copy and tail. The dictionary only changes when it was
    /// undefined, so the second member is the entry to store in that case.
    fn implied<'p>(&self, prev: &'p DictEntry) -> Result<(Option<&'p [u8]>, Option<DictEntry>)>
    where
        'a: 'p,
    {
        match prev {
            DictEntry::Bytes(p) => Ok((Some(p.as_slice()), None)),
            DictEntry::Undefined => match self.initial {
                Some(i) => Ok((Some(i), Some(DictEntry::Bytes(i.to_vec())))),
                None if self.optional => Ok((None, Some(DictEntry::Empty))),
                None => Err(Error::schema("no previous value and no initial value")),
            },
            DictEntry::Empty if self.optional => Ok((None, None)),
            DictEntry::Empty => Err(Error::schema("previous value is empty")),
            DictEntry::Int(_) => Err(Error::schema("previous value isn't a string")),
        }
    }

    /// The value delta and tail build on. An undefined entry falls back to the initial value,
    /// and so does an empty one when `empty_ok` is set (tail after a NULL).
    fn base<'p>(&self, prev: &'p DictEntry, empty_ok: bool) -> Result<&'p [u8]>
    where
        'a: 'p,
    {
        match prev {
            DictEntry::Bytes(p) => Ok(p.as_slice()),
            DictEntry::Undefined => Ok(self.initial.unwrap_or(&[])),
            DictEntry::Empty if empty_ok => Ok(self.initial.unwrap_or(&[])),
            DictEntry::Empty => Err(Error::schema("delta base is empty")),
            DictEntry::Int(_) => Err(Error::schema("previous value isn't a string")),
        }
    }

    pub fn encode(
        &self,
        value: Option<&[u8]>,
        out: &mut StreamBuffer,
        pmap: &mut PmapWriter,
        dict: &mut Dictionary,
        scope: u32,
    ) -> Result<()> {
        if value.is_none() && !self.optional {
            return Err(Error::schema("mandatory field has no value"));
        }
        match self.op {
            Operator::None => varint::write_bytes(out, self.optional, value),
            Operator::Constant => {
                if value.is_some() && value != self.initial {
                    return Err(Error::schema("value differs from constant"));
                }
                if self.optional {
                    pmap.push(value.is_some());
                }
            }
            Operator::Default => {
                if value == self.initial {
                    pmap.push(false);
                } else {
                    pmap.push(true);
                    varint::write_bytes(out, self.optional, value);
                }
            }
            Operator::Copy | Operator::Tail => {
                let slot = self.slot()?;
                let prev = dict.get(scope, slot);
                let (matched, update) = match self.implied(prev) {
                    Ok((implied, update)) if implied == value => (true, update),
                    _ => (false, None),
                };
                if matched {
                    pmap.push(false);
                    if let Some(entry) = update {
                        dict.set(scope, slot, entry);
                    }
                    return Ok(());
                }
                pmap.push(true);
                let v = match value {
                    Some(v) => v,
                    None => {
                        varint::write_bytes(out, true, None);
                        dict.set(scope, slot, DictEntry::Empty);
                        return Ok(());
                    }
                };
                if self.op == Operator::Tail {
                    let base = self.base(prev, true)?;
                    if v.len() < base.len() {
                        return Err(Error::schema("tail operator can't shorten a value"));
                    }
                    let tail = if v.len() > base.len() {
                        v
                    } else {
                        &v[common_prefix(base, v)..]
                    };
                    varint::write_bytes(out, self.optional, Some(tail));
                } else {
                    varint::write_bytes(out, self.optional, Some(v));
                }
                dict.set(scope, slot, DictEntry::Bytes(v.to_vec()));
            }
            Operator::Delta => {
                let slot = self.slot()?;
                let base = self.base(dict.get(scope, slot), false)?;
                let v = match value {
                    Some(v) => v,
                    None => {
                        write_delta(out, true, None);
                        return Ok(());
                    }
                };
                let prefix = common_prefix(base, v);
                let suffix = common_suffix(base, v);
                let (sub, diff) = if prefix >= suffix {
                    ((base.len() - prefix) as i128, &v[prefix..])
                } else {
                    (-((base.len() - suffix) as i128) - 1, &v[..v.len() - suffix])
                };
                write_delta(out, self.optional, Some(sub));
                varint::write_bytes(out, false, Some(diff));
                dict.set(scope, slot, DictEntry::Bytes(v.to_vec()));
            }
            Operator::Increment => return Err(Error::schema("increment operator on a string")),
        }
        Ok(())
    }

    /// Decode one value. `Ok(None)` means the field is absent.
    pub fn decode<'b, 'c>(
        &self,
        buf: &mut &'b [u8],
        pmap: &mut PmapReader,
        dict: &mut Dictionary,
        scope: u32,
    ) -> Result<Option<Cow<'c, [u8]>>>
    where
        'a: 'c,
        'b: 'c,
    {
        let literal = |buf: &mut &'b [u8]| -> Result<Option<Cow<'c, [u8]>>> {
            let v = varint::read_bytes(buf, self.optional)?;
            if let Some(v) = v {
                self.validate(v)?;
            }
            Ok(v.map(Cow::Borrowed))
        };
        match self.op {
            Operator::None => literal(buf),
            Operator::Constant => {
                if !self.optional || pmap.next_bit() {
                    Ok(self.initial.map(Cow::Borrowed))
                } else {
                    Ok(None)
                }
            }
            Operator::Default => {
                if pmap.next_bit() {
                    literal(buf)
                } else {
                    Ok(self.initial.map(Cow::Borrowed))
                }
            }
            Operator::Copy | Operator::Tail => {
                let slot = self.slot()?;
                if !pmap.next_bit() {
                    let (v, update) = self.implied(dict.get(scope, slot))?;
                    let v = v.map(|v| Cow::Owned(v.to_vec()));
                    if let Some(entry) = update {
                        dict.set(scope, slot, entry);
                    }
                    return Ok(v);
                }
                let read = varint::read_bytes(buf, self.optional)?;
                let data = match read {
                    Some(data) => data,
                    None => {
                        dict.set(scope, slot, DictEntry::Empty);
                        return Ok(None);
                    }
                };
                let v = if self.op == Operator::Tail {
                    let base = self.base(dict.get(scope, slot), true)?;
                    if data.len() >= base.len() {
                        data.to_vec()
                    } else {
                        let mut v = base[..base.len() - data.len()].to_vec();
                        v.extend_from_slice(data);
                        v
                    }
                } else {
                    data.to_vec()
                };
                self.validate(&v)?;
                dict.set(scope, slot, DictEntry::Bytes(v.clone()));
                Ok(Some(Cow::Owned(v)))
            }
            Operator::Delta => {
                let slot = self.slot()?;
                let sub = match read_delta(buf, MAX_BYTES_32, self.optional)? {
                    Some(sub) => sub,
                    None => return Ok(None),
                };
                let diff = varint::read_bytes(buf, false)?.unwrap_or_default();
                let base = self.base(dict.get(scope, slot), false)?;
                let v = if sub >= 0 {
                    let keep = (base.len() as i128)
                        .checked_sub(sub)
                        .filter(|k| *k >= 0)
                        .ok_or_else(|| Error::encoding("subtraction length longer than base"))?;
                    let mut v = base[..keep as usize].to_vec();
                    v.extend_from_slice(diff);
                    v
                } else {
                    let cut = -(sub + 1);
                    if cut > base.len() as i128 {
                        return Err(Error::encoding("subtraction length longer than base"));
                    }
                    let mut v = diff.to_vec();
                    v.extend_from_slice(&base[cut as usize..]);
                    v
                };
                self.validate(&v)?;
                dict.set(scope, slot, DictEntry::Bytes(v.clone()));
                Ok(Some(Cow::Owned(v)))
            }
            Operator::Increment => Err(Error::schema("increment operator on a string")),
        }
    }
}
