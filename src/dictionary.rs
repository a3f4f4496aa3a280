use std::collections::BTreeMap;

use educe::Educe;

use crate::descriptor::{FieldDescriptor, FieldType};
use crate::error::{Error, Result};
use crate::template::Template;
use crate::value::Value;

/// The previous value of one operator-bearing field.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum DictEntry {
    /// Nothing has been sent yet.
    #[default]
    Undefined,
    /// The last value sent was NULL.
    Empty,
    Int(i128),
    Bytes(Vec<u8>),
}

static UNDEFINED: DictEntry = DictEntry::Undefined;

#[derive(Clone, Debug)]
struct Change {
    template: u32,
    slot: usize,
    old: DictEntry,
}

/// Previous-value state for one session.
///
/// Entries are kept per template, indexed by the slots [`Template::new`] assigned. Every change
/// made while a message is in flight is journaled, so a failed message can be undone with
/// [`rollback`][Dictionary::rollback].
///
/// Two dictionaries are equal when they hold the same previous values, last template id, and
/// presets. The rollback journal isn't compared.
#[derive(Clone, Debug, Default, Educe)]
#[educe(PartialEq)]
pub(crate) struct Dictionary {
    entries: BTreeMap<u32, Vec<DictEntry>>,
    last_template: Option<u32>,
    presets: Vec<(u32, usize, DictEntry)>,
    #[educe(PartialEq(ignore))]
    journal: Vec<Change>,
    #[educe(PartialEq(ignore))]
    saved_template: Option<u32>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, template: u32, slot: usize) -> &DictEntry {
        self.entries
            .get(&template)
            .and_then(|e| e.get(slot))
            .unwrap_or(&UNDEFINED)
    }

    pub fn set(&mut self, template: u32, slot: usize, entry: DictEntry) {
        let entries = self.entries.entry(template).or_default();
        if entries.len() <= slot {
            entries.resize(slot + 1, DictEntry::Undefined);
        }
        let old = std::mem::replace(&mut entries[slot], entry);
        self.journal.push(Change {
            template,
            slot,
            old,
        });
    }

    /// The id of the last template sent or received in a segment header.
    pub fn last_template(&self) -> Option<u32> {
        self.last_template
    }

    pub fn set_last_template(&mut self, id: u32) {
        self.last_template = Some(id);
    }

    /// Start a message. Changes from here on can be rolled back.
    pub fn begin(&mut self) {
        self.journal.clear();
        self.saved_template = self.last_template;
    }

    /// Undo every change since [`begin`][Self::begin]. Returns how many entries were restored.
    pub fn rollback(&mut self) -> usize {
        let count = self.journal.len();
        while let Some(change) = self.journal.pop() {
            if let Some(entry) = self
                .entries
                .get_mut(&change.template)
                .and_then(|e| e.get_mut(change.slot))
            {
                *entry = change.old;
            }
        }
        self.last_template = self.saved_template;
        count
    }

    pub fn commit(&mut self) {
        self.journal.clear();
    }

    /// Forget every previous value, then apply the presets.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.journal.clear();
        self.last_template = None;
        self.saved_template = None;
        for (template, slot, entry) in self.presets.clone() {
            self.set(template, slot, entry);
        }
        self.journal.clear();
    }

    /// Record a starting previous value for the field at `path` in `template`, applied now and
    /// after every reset.
    pub fn preset(&mut self, template: &Template, path: &str, value: &Value) -> Result<()> {
        let desc = template.find_field(path).ok_or_else(|| {
            Error::schema(format!("no field {} in template {}", path, template.name()))
        })?;
        for (slot, entry) in preset_entries(desc, value).map_err(|e| e.at(path))? {
            self.presets.push((template.id(), slot, entry.clone()));
            self.set(template.id(), slot, entry);
        }
        self.journal.clear();
        Ok(())
    }
}

fn preset_entries(desc: &FieldDescriptor, value: &Value) -> Result<Vec<(usize, DictEntry)>> {
    if !value.fits(desc.field_type()) {
        return Err(Error::schema(format!(
            "preset {} doesn't fit type {}",
            value,
            desc.field_type().name()
        )));
    }
    let mut out = Vec::new();
    match (desc.field_type(), value) {
        (FieldType::Decimal, Value::Decimal(d)) => {
            if let Some(slot) = desc.slot() {
                out.push((slot, DictEntry::Int(d.exponent as i128)));
            }
            if let Some(slot) = desc.mantissa_slot() {
                out.push((slot, DictEntry::Int(d.mantissa as i128)));
            }
        }
        (ty, v) if ty.is_integer() => {
            if let (Some(slot), Some(wide)) = (desc.slot(), v.as_wide()) {
                out.push((slot, DictEntry::Int(wide)));
            }
        }
        (ty, v) if ty.is_byte_like() => {
            if let (Some(slot), Some(bytes)) = (desc.slot(), v.as_bytes()) {
                out.push((slot, DictEntry::Bytes(bytes.to_vec())));
            }
        }
        _ => (),
    }
    if out.is_empty() {
        return Err(Error::schema("field keeps no previous value"));
    }
    Ok(out)
}
