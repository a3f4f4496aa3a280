//! Encoder sessions.
//!
//! An [`Encoder`] turns messages held in an [`Arena`] into FAST-style bytes. Each message becomes
//! one segment: a presence map, the template id when it changed since the last segment, and then
//! every field in template order. Operator-bearing fields are compressed against the previous
//! values kept in the session's dictionary, so a decoder must see the same messages in the same
//! order to reproduce them.
//!
//! A failed message leaves nothing behind. Its bytes are dropped from the output and its
//! dictionary changes are undone, or the whole dictionary is reset if
//! [`SessionConfig::reset_on_error`] is set.

use std::sync::Arc;

use crate::aggregate::MessageRef;
use crate::arena::Arena;
use crate::cell::{CellSpan, Payload, ValueCell};
use crate::config::{Preset, SessionConfig};
use crate::depth_tracking::DepthTracker;
use crate::descriptor::{FieldDescriptor, FieldType, GroupContent, EMPTY_CONTENT};
use crate::dictionary::Dictionary;
use crate::error::{Error, Result};
use crate::operator::{BytesField, IntField};
use crate::pmap::PmapWriter;
use crate::stream::StreamBuffer;
use crate::template::{Template, TemplateRegistry};
use crate::value::Value;
use crate::varint;

/// A stateful encoder. Previous values carry over from one message to the next until
/// [`reset`][Encoder::reset] is called.
#[derive(Debug)]
pub struct Encoder {
    registry: Arc<TemplateRegistry>,
    config: SessionConfig,
    dict: Dictionary,
    out: StreamBuffer,
    depth: DepthTracker,
}

impl Encoder {
    /// Create an encoder with the default configuration.
    pub fn new(registry: Arc<TemplateRegistry>) -> Self {
        let config = SessionConfig::default();
        log::debug!("new encoder over {} templates", registry.len());
        Self {
            out: StreamBuffer::with_capacity(config.initial_capacity),
            depth: DepthTracker::new(config.max_depth),
            dict: Dictionary::new(),
            registry,
            config,
        }
    }

    /// Create an encoder with the given configuration. Fails if a preset names an unknown template
    /// or field, or holds a value of the wrong type.
    pub fn with_config(registry: Arc<TemplateRegistry>, config: SessionConfig) -> Result<Self> {
        let mut dict = Dictionary::new();
        for preset in config.presets.iter() {
            let template = registry.require(preset.template)?;
            dict.preset(template, &preset.field, &preset.value)?;
        }
        log::debug!(
            "new encoder over {} templates with {} presets",
            registry.len(),
            config.presets.len()
        );
        Ok(Self {
            out: StreamBuffer::with_capacity(config.initial_capacity),
            depth: DepthTracker::new(config.max_depth),
            dict,
            registry,
            config,
        })
    }

    pub fn registry(&self) -> &Arc<TemplateRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Add a starting previous value for one field. It survives [`reset`][Self::reset].
    pub fn preset(&mut self, template: u32, field: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let t = self.registry.require(template)?;
        self.dict.preset(t, field, &value)?;
        self.config.presets.push(Preset {
            template,
            field: field.to_string(),
            value,
        });
        Ok(())
    }

    /// Forget every previous value and the last template id, then reapply presets. The output
    /// buffer is left alone.
    pub fn reset(&mut self) {
        self.dict.reset();
        log::debug!("encoder dictionary reset");
    }

    /// Encode one message onto the end of the output buffer and return its bytes.
    pub fn encode(&mut self, message: &MessageRef) -> Result<&[u8]> {
        let start = self.out.len();
        self.encode_message(message)?;
        Ok(&self.out.as_slice()[start..])
    }

    /// Encode one message and append its bytes to `out` instead of the output buffer. Returns the
    /// number of bytes written.
    pub fn encode_into(&mut self, message: &MessageRef, out: &mut Vec<u8>) -> Result<usize> {
        let start = self.out.len();
        self.encode_message(message)?;
        let written = self.out.len() - start;
        out.extend_from_slice(&self.out.as_slice()[start..]);
        self.out.truncate(start);
        Ok(written)
    }

    /// Everything encoded so far.
    pub fn output(&self) -> &[u8] {
        self.out.as_slice()
    }

    /// Hand over everything encoded so far, leaving an empty output buffer. Previous values are
    /// kept.
    pub fn take_output(&mut self) -> Vec<u8> {
        let fresh = StreamBuffer::with_capacity(self.config.initial_capacity);
        std::mem::replace(&mut self.out, fresh).take()
    }

    fn encode_message(&mut self, message: &MessageRef) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let template = message.template();
        let start = self.out.len();
        self.dict.begin();
        self.depth.clear();
        let cells = message.fields().cells();
        match self.encode_segment(&registry, message.arena(), template, cells) {
            Ok(()) => {
                self.dict.commit();
                log::trace!(
                    "encoded {} ({} bytes)",
                    template.name(),
                    self.out.len() - start
                );
                Ok(())
            }
            Err(e) => {
                self.out.truncate(start);
                self.recover();
                log::warn!("failed to encode {}: {}", template.name(), e);
                Err(e)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn dictionary(&self) -> &Dictionary {
        &self.dict
    }

    fn recover(&mut self) {
        if self.config.reset_on_error {
            self.dict.reset();
            log::debug!("encoder dictionary reset after failed message");
        } else {
            let undone = self.dict.rollback();
            log::debug!("rolled back {} dictionary changes", undone);
        }
    }

    /// Encode a template's segment: presence map, optional template id, then its fields.
    fn encode_segment(
        &mut self,
        registry: &TemplateRegistry,
        arena: &Arena,
        template: &Template,
        cells: CellSpan,
    ) -> Result<()> {
        let start = self.out.len();
        let mut pmap = PmapWriter::new();
        let id = template.id();
        if self.dict.last_template() == Some(id) {
            pmap.push(false);
        } else {
            pmap.push(true);
            varint::write_uint(&mut self.out, id as u128);
            self.dict.set_last_template(id);
        }
        self.encode_fields(registry, arena, id, template.content(), cells, &mut pmap)
            .map_err(|e| e.at(template.name()))?;
        self.out.insert(start, &pmap.to_bytes());
        Ok(())
    }

    fn encode_fields(
        &mut self,
        registry: &TemplateRegistry,
        arena: &Arena,
        scope: u32,
        content: &GroupContent,
        cells: CellSpan,
        pmap: &mut PmapWriter,
    ) -> Result<()> {
        for (i, desc) in content.fields().iter().enumerate() {
            let cell = cells.cell(i).map_or(ValueCell::EMPTY_REF, |id| arena.cell(id));
            self.encode_field(registry, arena, scope, desc, cell, pmap)
                .map_err(|e| e.at(desc.name()))?;
        }
        Ok(())
    }

    /// Encode a group body or one sequence element. It gets its own presence map only if one of
    /// its fields uses a bit.
    fn encode_group(
        &mut self,
        registry: &TemplateRegistry,
        arena: &Arena,
        scope: u32,
        content: &GroupContent,
        cells: CellSpan,
    ) -> Result<()> {
        let start = self.out.len();
        let mut pmap = PmapWriter::new();
        self.encode_fields(registry, arena, scope, content, cells, &mut pmap)?;
        if content.needs_pmap() {
            self.out.insert(start, &pmap.to_bytes());
        }
        Ok(())
    }

    fn encode_field(
        &mut self,
        registry: &TemplateRegistry,
        arena: &Arena,
        scope: u32,
        desc: &FieldDescriptor,
        cell: &ValueCell,
        pmap: &mut PmapWriter,
    ) -> Result<()> {
        // Mandatory fields are always taken as present; a bad payload is caught below.
        let present = cell.is_present() || !desc.optional();
        let payload = cell.payload();
        match desc.field_type() {
            FieldType::Int32 | FieldType::UInt32 | FieldType::Int64 | FieldType::UInt64 => {
                let value = if present { payload.as_wide() } else { None };
                IntField::for_field(desc)?.encode(value, &mut self.out, pmap, &mut self.dict, scope)
            }
            FieldType::Decimal => {
                let value = match *payload {
                    Payload::Decimal(d) if present => Some(d),
                    _ => None,
                };
                IntField::exponent(desc).encode(
                    value.map(|d| d.exponent as i128),
                    &mut self.out,
                    pmap,
                    &mut self.dict,
                    scope,
                )?;
                if let Some(d) = value {
                    IntField::mantissa(desc).encode(
                        Some(d.mantissa as i128),
                        &mut self.out,
                        pmap,
                        &mut self.dict,
                        scope,
                    )?;
                }
                Ok(())
            }
            FieldType::Ascii | FieldType::Unicode | FieldType::ByteVector => {
                let value = match payload.byte_span() {
                    Some(span) if present => Some(arena.bytes(span)),
                    _ => None,
                };
                BytesField::for_field(desc)?.encode(value, &mut self.out, pmap, &mut self.dict, scope)
            }
            FieldType::Group => {
                let children = match *payload {
                    Payload::Group(span) if present => Some(span),
                    _ => None,
                };
                if desc.optional() {
                    pmap.push(children.is_some());
                }
                let children = match children {
                    Some(span) => span,
                    None if desc.optional() => return Ok(()),
                    None => return Err(Error::schema("mandatory group has no value")),
                };
                let content = desc.content().unwrap_or(&EMPTY_CONTENT);
                self.depth.enter()?;
                let result = self.encode_group(registry, arena, scope, content, children);
                self.depth.leave();
                result
            }
            FieldType::Sequence => {
                let length = desc
                    .length_field()
                    .ok_or_else(|| Error::schema("sequence has no length field"))?;
                let elements = match *payload {
                    Payload::Sequence { elements, len } if present => Some((elements, len)),
                    _ => None,
                };
                IntField::for_field(length)?
                    .encode(
                        elements.map(|(_, len)| len as i128),
                        &mut self.out,
                        pmap,
                        &mut self.dict,
                        scope,
                    )
                    .map_err(|e| e.at(length.name()))?;
                let (elements, len) = match elements {
                    Some(e) => e,
                    None => return Ok(()),
                };
                let content = desc.content().unwrap_or(&EMPTY_CONTENT);
                let width = content.len();
                if elements.len() < width * len as usize {
                    return Err(Error::schema("sequence storage is shorter than its length"));
                }
                self.depth.enter()?;
                for e in 0..len as usize {
                    let element = elements.slice(e * width, width);
                    let result = self.encode_group(registry, arena, scope, content, element);
                    if let Err(err) = result {
                        self.depth.leave();
                        return Err(err.at(&e.to_string()));
                    }
                }
                self.depth.leave();
                Ok(())
            }
            FieldType::TemplateRef => match *payload {
                Payload::TemplateRef {
                    template: Some(id),
                    fields,
                } => {
                    let nested = registry.require(id)?;
                    self.depth.enter()?;
                    let result = self.encode_segment(registry, arena, nested, fields);
                    self.depth.leave();
                    result
                }
                _ => Err(Error::schema("template reference isn't bound")),
            },
        }
    }
}
