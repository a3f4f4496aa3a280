//! Decoder sessions.
//!
//! A [`Decoder`] reads segments written by an [`Encoder`][crate::Encoder] and rebuilds each
//! message in an [`Arena`]. It keeps the same previous-value dictionary the encoder does, so it has
//! to be fed every message of a stream, in order, from the same starting state.
//!
//! Decoded strings are validated (ASCII or UTF-8) and copied into the arena, so the input bytes
//! can be dropped as soon as `decode` returns.

use std::sync::Arc;

use crate::arena::{Arena, Message};
use crate::cell::{CellId, CellSpan, Payload};
use crate::config::{Preset, SessionConfig};
use crate::depth_tracking::DepthTracker;
use crate::descriptor::{FieldDescriptor, FieldType, GroupContent, EMPTY_CONTENT};
use crate::dictionary::Dictionary;
use crate::error::{Error, Result};
use crate::operator::{BytesField, IntField};
use crate::pmap::PmapReader;
use crate::template::TemplateRegistry;
use crate::value::{Decimal, Value};
use crate::varint::{self, IntKind};

/// A message pulled off the wire, and how many input bytes it took up.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Decoded {
    pub message: Message,
    pub consumed: usize,
}

/// A stateful decoder, the mirror image of [`Encoder`][crate::Encoder].
#[derive(Debug)]
pub struct Decoder {
    registry: Arc<TemplateRegistry>,
    config: SessionConfig,
    dict: Dictionary,
    depth: DepthTracker,
}

fn int_payload(ty: FieldType, v: i128) -> Payload {
    match ty {
        FieldType::Int32 => Payload::Int32(v as i32),
        FieldType::UInt32 => Payload::UInt32(v as u32),
        FieldType::Int64 => Payload::Int64(v as i64),
        _ => Payload::UInt64(v as u64),
    }
}

/// Store a decoded payload, or mark the cell absent.
fn store(arena: &mut Arena, id: CellId, desc: &FieldDescriptor, payload: Option<Payload>) -> Result<()> {
    match payload {
        Some(payload) => {
            if let Some(cell) = arena.cell_mut(id) {
                cell.set(payload);
            }
            Ok(())
        }
        None if desc.optional() => {
            if let Some(cell) = arena.cell_mut(id) {
                cell.set_present(false);
            }
            Ok(())
        }
        None => Err(Error::encoding("NULL in a mandatory field")),
    }
}

impl Decoder {
    /// Create a decoder with the default configuration.
    pub fn new(registry: Arc<TemplateRegistry>) -> Self {
        let config = SessionConfig::default();
        log::debug!("new decoder over {} templates", registry.len());
        Self {
            depth: DepthTracker::new(config.max_depth),
            dict: Dictionary::new(),
            registry,
            config,
        }
    }

    /// Create a decoder with the given configuration. Presets must match the encoder's for the
    /// stream to decode.
    pub fn with_config(registry: Arc<TemplateRegistry>, config: SessionConfig) -> Result<Self> {
        let mut dict = Dictionary::new();
        for preset in config.presets.iter() {
            let template = registry.require(preset.template)?;
            dict.preset(template, &preset.field, &preset.value)?;
        }
        log::debug!(
            "new decoder over {} templates with {} presets",
            registry.len(),
            config.presets.len()
        );
        Ok(Self {
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

    /// Forget every previous value and the last template id, then reapply presets.
    pub fn reset(&mut self) {
        self.dict.reset();
        log::debug!("decoder dictionary reset");
    }

    /// Decode one message from the front of `bytes` into `arena`.
    ///
    /// On failure the dictionary is left as it was before the call (or reset, with
    /// [`SessionConfig::reset_on_error`]). Cells already written to the arena stay allocated
    /// until the arena is reset.
    pub fn decode(&mut self, bytes: &[u8], arena: &mut Arena) -> Result<Decoded> {
        let registry = Arc::clone(&self.registry);
        let mut buf = bytes;
        self.dict.begin();
        self.depth.clear();
        match self.decode_segment(&registry, &mut buf, arena) {
            Ok((template, fields)) => {
                self.dict.commit();
                let consumed = bytes.len() - buf.len();
                log::trace!("decoded template {} ({} bytes)", template, consumed);
                Ok(Decoded {
                    message: Message { template, fields },
                    consumed,
                })
            }
            Err(e) => {
                self.recover();
                log::warn!("failed to decode message: {}", e);
                Err(e)
            }
        }
    }

    /// Decode messages until `bytes` is used up. Stops at the first failure.
    pub fn decode_all(&mut self, bytes: &[u8], arena: &mut Arena) -> Result<Vec<Message>> {
        let mut rest = bytes;
        let mut messages = Vec::new();
        while !rest.is_empty() {
            let decoded = self.decode(rest, arena)?;
            messages.push(decoded.message);
            rest = &rest[decoded.consumed..];
        }
        Ok(messages)
    }

    #[cfg(test)]
    pub(crate) fn dictionary(&self) -> &Dictionary {
        &self.dict
    }

    fn recover(&mut self) {
        if self.config.reset_on_error {
            self.dict.reset();
            log::debug!("decoder dictionary reset after failed message");
        } else {
            let undone = self.dict.rollback();
            log::debug!("rolled back {} dictionary changes", undone);
        }
    }

    /// Read a segment header, then the fields of the template it names.
    fn decode_segment(
        &mut self,
        registry: &TemplateRegistry,
        buf: &mut &[u8],
        arena: &mut Arena,
    ) -> Result<(u32, CellSpan)> {
        let mut pmap = PmapReader::read(buf)?;
        let id = if pmap.next_bit() {
            let id = varint::read_value(buf, IntKind::U32, false)?.unwrap_or_default() as u32;
            self.dict.set_last_template(id);
            id
        } else {
            self.dict
                .last_template()
                .ok_or_else(|| Error::schema("segment has no template id and none came before"))?
        };
        let template = registry.require(id)?;
        let fields = arena.alloc_fields(template.content());
        self.decode_fields(registry, buf, arena, id, template.content(), fields, &mut pmap)
            .map_err(|e| e.at(template.name()))?;
        pmap.finish().map_err(|e| e.at(template.name()))?;
        Ok((id, fields))
    }

    #[allow(clippy::too_many_arguments)]
    fn decode_fields(
        &mut self,
        registry: &TemplateRegistry,
        buf: &mut &[u8],
        arena: &mut Arena,
        scope: u32,
        content: &GroupContent,
        cells: CellSpan,
        pmap: &mut PmapReader,
    ) -> Result<()> {
        for (i, desc) in content.fields().iter().enumerate() {
            let id = cells
                .cell(i)
                .ok_or_else(|| Error::schema("field storage is too short"))?;
            self.decode_field(registry, buf, arena, scope, desc, id, pmap)
                .map_err(|e| e.at(desc.name()))?;
        }
        Ok(())
    }

    fn decode_group(
        &mut self,
        registry: &TemplateRegistry,
        buf: &mut &[u8],
        arena: &mut Arena,
        scope: u32,
        content: &GroupContent,
        cells: CellSpan,
    ) -> Result<()> {
        let mut pmap = if content.needs_pmap() {
            PmapReader::read(buf)?
        } else {
            PmapReader::empty()
        };
        self.decode_fields(registry, buf, arena, scope, content, cells, &mut pmap)?;
        pmap.finish()
    }

    #[allow(clippy::too_many_arguments)]
    fn decode_field(
        &mut self,
        registry: &TemplateRegistry,
        buf: &mut &[u8],
        arena: &mut Arena,
        scope: u32,
        desc: &FieldDescriptor,
        id: CellId,
        pmap: &mut PmapReader,
    ) -> Result<()> {
        let ty = desc.field_type();
        match ty {
            FieldType::Int32 | FieldType::UInt32 | FieldType::Int64 | FieldType::UInt64 => {
                let v = IntField::for_field(desc)?.decode(buf, pmap, &mut self.dict, scope)?;
                store(arena, id, desc, v.map(|v| int_payload(ty, v)))
            }
            FieldType::Decimal => {
                let exponent = IntField::exponent(desc).decode(buf, pmap, &mut self.dict, scope)?;
                let payload = match exponent {
                    Some(exponent) => {
                        let mantissa = IntField::mantissa(desc)
                            .decode(buf, pmap, &mut self.dict, scope)?
                            .ok_or_else(|| Error::encoding("decimal has no mantissa"))?;
                        Some(Payload::Decimal(Decimal::new(
                            mantissa as i64,
                            exponent as i32,
                        )))
                    }
                    None => None,
                };
                store(arena, id, desc, payload)
            }
            FieldType::Ascii | FieldType::Unicode | FieldType::ByteVector => {
                let v = BytesField::for_field(desc)?.decode(buf, pmap, &mut self.dict, scope)?;
                let payload = v.map(|data| {
                    let span = arena.alloc_bytes(&data);
                    match ty {
                        FieldType::Ascii => Payload::Ascii(span),
                        FieldType::Unicode => Payload::Unicode(span),
                        _ => Payload::Bytes(span),
                    }
                });
                store(arena, id, desc, payload)
            }
            FieldType::Group => {
                if desc.optional() && !pmap.next_bit() {
                    return store(arena, id, desc, None);
                }
                let content = desc.content().unwrap_or(&EMPTY_CONTENT);
                let children = arena.present_group(id, content);
                self.depth.enter()?;
                let result = self.decode_group(registry, buf, arena, scope, content, children);
                self.depth.leave();
                result
            }
            FieldType::Sequence => {
                let length = desc
                    .length_field()
                    .ok_or_else(|| Error::schema("sequence has no length field"))?;
                let len = IntField::for_field(length)?
                    .decode(buf, pmap, &mut self.dict, scope)
                    .map_err(|e| e.at(length.name()))?;
                let len = match len {
                    Some(len) => len,
                    None => return store(arena, id, desc, None),
                };
                if len > self.config.max_sequence_len as i128 {
                    return Err(Error::encoding(format!(
                        "sequence length {} is over the limit of {}",
                        len, self.config.max_sequence_len
                    )));
                }
                let len = len as usize;
                let content = desc.content().unwrap_or(&EMPTY_CONTENT);
                arena.resize_sequence(id, content, len);
                let elements = match *arena.cell(id).payload() {
                    Payload::Sequence { elements, .. } => elements,
                    _ => CellSpan::EMPTY,
                };
                let width = content.len();
                self.depth.enter()?;
                for e in 0..len {
                    let element = elements.slice(e * width, width);
                    let result = self.decode_group(registry, buf, arena, scope, content, element);
                    if let Err(err) = result {
                        self.depth.leave();
                        return Err(err.at(&e.to_string()));
                    }
                }
                self.depth.leave();
                Ok(())
            }
            FieldType::TemplateRef => {
                self.depth.enter()?;
                let result = self.decode_segment(registry, buf, arena);
                self.depth.leave();
                let (template, fields) = result?;
                store(
                    arena,
                    id,
                    desc,
                    Some(Payload::TemplateRef {
                        template: Some(template),
                        fields,
                    }),
                )
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::aggregate::{DynamicMut, DynamicRef, GroupMut, GroupRef, MessageMut, MessageRef};
    use crate::descriptor::Operator;
    use crate::encode::Encoder;
    use crate::template::Template;
    use crate::typed::*;

    fn templates() -> Arc<TemplateRegistry> {
        let order = Template::new(
            10,
            "Order",
            vec![
                FieldDescriptor::new(1, "Seq", FieldType::UInt32).with_operator(Operator::Increment),
                FieldDescriptor::new(2, "Account", FieldType::Ascii)
                    .into_optional()
                    .with_operator(Operator::Copy),
                FieldDescriptor::new(3, "Qty", FieldType::Int64).with_operator(Operator::Delta),
                FieldDescriptor::new(4, "Venue", FieldType::Ascii)
                    .with_operator(Operator::Default)
                    .with_initial("XNYS"),
                FieldDescriptor::new(5, "Text", FieldType::Unicode)
                    .into_optional()
                    .with_operator(Operator::Tail),
                FieldDescriptor::decimal(6, "Px")
                    .into_optional()
                    .with_operator(Operator::Copy)
                    .with_mantissa_operator(Operator::Delta),
                FieldDescriptor::new(7, "Blob", FieldType::ByteVector).into_optional(),
                FieldDescriptor::template_ref(8, "Trailer"),
            ],
        )
        .unwrap();
        let trailer = Template::new(
            11,
            "Trailer",
            vec![FieldDescriptor::new(1, "Check", FieldType::UInt32).with_operator(Operator::Copy)],
        )
        .unwrap();
        let flags = Template::new(
            12,
            "Flags",
            vec![FieldDescriptor::group(
                1,
                "Bits",
                (1..=8)
                    .map(|i| {
                        FieldDescriptor::new(i, format!("F{}", i), FieldType::UInt32)
                            .into_optional()
                            .with_operator(Operator::Copy)
                    })
                    .collect(),
            )
            .into_optional()],
        )
        .unwrap();
        Arc::new(TemplateRegistry::from_templates(vec![order, trailer, flags]).unwrap())
    }

    struct Order<'s> {
        seq: u32,
        account: Option<&'s str>,
        qty: i64,
        venue: &'s str,
        text: Option<&'s str>,
        px: Option<Decimal>,
        check: u32,
    }

    fn build(arena: &mut Arena, registry: &TemplateRegistry, o: &Order) -> Message {
        let t = registry.get(10).unwrap();
        let msg = arena.alloc_message(t);
        let mut m = MessageMut::new(arena, t, msg).unwrap();
        m.field(0).dynamic_cast_as::<UInt32Mut>().set(o.seq);
        match o.account {
            Some(a) => m.field(1).dynamic_cast_as::<AsciiMut>().set(a).unwrap(),
            None => m.field(1).as_absent(),
        }
        m.field(2).dynamic_cast_as::<Int64Mut>().set(o.qty);
        m.field(3).dynamic_cast_as::<AsciiMut>().set(o.venue).unwrap();
        match o.text {
            Some(s) => m.field(4).dynamic_cast_as::<UnicodeMut>().set(s),
            None => m.field(4).as_absent(),
        }
        match o.px {
            Some(px) => m.field(5).dynamic_cast_as::<DecimalMut>().set(px),
            None => m.field(5).as_absent(),
        }
        let mut trailer: DynamicMut = m.field(7).dynamic_cast_as();
        let mut nested = trailer.bind(registry.get(11).unwrap());
        nested.field(0).dynamic_cast_as::<UInt32Mut>().set(o.check);
        msg
    }

    fn orders() -> Vec<Order<'static>> {
        vec![
            Order {
                seq: 1,
                account: Some("ACC1"),
                qty: 100,
                venue: "XNYS",
                text: Some("hello"),
                px: Some(Decimal::new(12345, -2)),
                check: 7,
            },
            Order {
                seq: 2,
                account: Some("ACC1"),
                qty: 90,
                venue: "XNAS",
                text: Some("hello wörld"),
                px: Some(Decimal::new(12350, -2)),
                check: 7,
            },
            Order {
                seq: 3,
                account: None,
                qty: -5,
                venue: "XNYS",
                text: None,
                px: None,
                check: 8,
            },
            Order {
                seq: 9,
                account: None,
                qty: -5,
                venue: "XNYS",
                text: Some("hello wörld"),
                px: Some(Decimal::new(1, 3)),
                check: 8,
            },
        ]
    }

    #[test]
    fn stream_round_trip() {
        let registry = templates();
        let mut src = Arena::new();
        let mut enc = Encoder::new(Arc::clone(&registry));
        let orders = orders();
        for o in orders.iter() {
            let msg = build(&mut src, &registry, o);
            let t = registry.get(10).unwrap();
            enc.encode(&MessageRef::new(&src, t, msg).unwrap()).unwrap();
        }
        let wire = enc.take_output();

        let mut dec = Decoder::new(Arc::clone(&registry));
        let mut dst = Arena::new();
        let messages = dec.decode_all(&wire, &mut dst).unwrap();
        assert_eq!(messages.len(), orders.len());
        let t = registry.get(10).unwrap();
        for (msg, o) in messages.iter().zip(orders.iter()) {
            let m = MessageRef::new(&dst, t, *msg).unwrap();
            assert_eq!(m.field(0).dynamic_cast_as::<UInt32Ref>().value(), o.seq);
            let account: AsciiRef = m.field(1).dynamic_cast_as();
            assert_eq!(account.present().then(|| account.value()), o.account);
            assert_eq!(m.field(2).dynamic_cast_as::<Int64Ref>().value(), o.qty);
            assert_eq!(m.field(3).dynamic_cast_as::<AsciiRef>().value(), o.venue);
            let text: UnicodeRef = m.field(4).dynamic_cast_as();
            assert_eq!(text.present().then(|| text.value()), o.text);
            let px: DecimalRef = m.field(5).dynamic_cast_as();
            assert_eq!(px.present().then(|| px.value()), o.px);
            assert!(m.field(6).absent());
            let trailer: DynamicRef = m.field(7).dynamic_cast_as();
            let nested = trailer.message(&registry).unwrap();
            assert_eq!(nested.template_id(), 11);
            assert_eq!(nested.field(0).dynamic_cast_as::<UInt32Ref>().value(), o.check);
        }
    }

    #[test]
    fn eight_bit_group_map() {
        let registry = templates();
        let t = registry.get(12).unwrap();
        let mut src = Arena::new();
        let msg = src.alloc_message(t);
        {
            let mut m = MessageMut::new(&mut src, t, msg).unwrap();
            let mut bits: GroupMut = m.field(0).dynamic_cast_as();
            let mut fields = bits.as_present();
            fields.field(0).dynamic_cast_as::<UInt32Mut>().set(1);
            fields.field(7).dynamic_cast_as::<UInt32Mut>().set(8);
        }
        let mut enc = Encoder::new(Arc::clone(&registry));
        let bytes = enc
            .encode(&MessageRef::new(&src, t, msg).unwrap())
            .unwrap()
            .to_vec();
        // Segment map: id and group bits. Group map: F1 and F8 were sent, so the eighth bit
        // spills into a second byte.
        assert_eq!(bytes, vec![0xE0, 0x8C, 0x40, 0xC0, 0x82, 0x89]);

        let mut dec = Decoder::new(registry.clone());
        let mut dst = Arena::new();
        let decoded = dec.decode(&bytes, &mut dst).unwrap();
        assert_eq!(decoded.consumed, bytes.len());
        let m = MessageRef::new(&dst, t, decoded.message).unwrap();
        let bits: GroupRef = m.field(0).dynamic_cast_as();
        assert!(bits.present());
        let values: Vec<Option<u32>> = bits
            .fields()
            .iter()
            .map(|f| f.present().then(|| f.dynamic_cast_as::<UInt32Ref>().value()))
            .collect();
        assert_eq!(
            values,
            vec![Some(1), None, None, None, None, None, None, Some(8)]
        );
    }

    #[test]
    fn unknown_template() {
        let mut dec = Decoder::new(templates());
        let mut arena = Arena::new();
        let err = dec.decode(&[0xC0, 0xE3], &mut arena).unwrap_err();
        assert!(matches!(err, Error::SchemaViolation { .. }));
        // No id on the wire and nothing before it.
        assert!(dec.decode(&[0x80], &mut arena).is_err());
    }

    #[test]
    fn truncated_input() {
        let registry = templates();
        let mut src = Arena::new();
        let msg = build(&mut src, &registry, &orders()[0]);
        let t = registry.get(10).unwrap();
        let mut enc = Encoder::new(Arc::clone(&registry));
        let bytes = enc
            .encode(&MessageRef::new(&src, t, msg).unwrap())
            .unwrap()
            .to_vec();

        let mut dec = Decoder::new(Arc::clone(&registry));
        let mut dst = Arena::new();
        for cut in [1, 5, bytes.len() - 1] {
            let err = dec.decode(&bytes[..cut], &mut dst).unwrap_err();
            assert!(
                matches!(err, Error::TruncatedInput { .. }),
                "cut at {}: {:?}",
                cut,
                err
            );
        }
        // Failed attempts left no trace in the dictionary.
        let decoded = dec.decode(&bytes, &mut dst).unwrap();
        assert_eq!(decoded.consumed, bytes.len());
    }

    #[test]
    fn sequence_limit() {
        let t = Template::new(
            20,
            "Book",
            vec![FieldDescriptor::sequence(
                1,
                "Levels",
                vec![FieldDescriptor::new(2, "Qty", FieldType::UInt32)],
            )],
        )
        .unwrap();
        let registry = Arc::new(TemplateRegistry::from_templates(vec![t]).unwrap());
        let config = SessionConfig::new().max_sequence_len(2);
        let mut dec = Decoder::with_config(registry, config).unwrap();
        let mut arena = Arena::new();
        let ok = dec.decode(&[0xC0, 0x94, 0x82, 0x81, 0x82], &mut arena).unwrap();
        assert_eq!(ok.consumed, 5);
        let err = dec
            .decode(&[0xC0, 0x94, 0x83, 0x81, 0x82, 0x83], &mut arena)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidEncoding { .. }));
        assert_eq!(err.field(), Some("Book.Levels"));
    }

    #[test]
    fn stray_pmap_bits_rejected() {
        let registry = templates();
        let mut dec = Decoder::new(registry);
        let mut arena = Arena::new();
        // Trailer has one copy bit; the third bit has no field to claim it.
        let err = dec.decode(&[0xF0, 0x8B, 0x81], &mut arena).unwrap_err();
        assert!(matches!(err, Error::InvalidEncoding { .. }));
    }

    fn stream<T: Into<Value>>(values: Vec<Option<T>>) -> Vec<Option<Value>> {
        values.into_iter().map(|v| v.map(Into::into)).collect()
    }

    /// An initial value for `ty`, a stream that grows, shrinks, and goes NULL, and a stream that
    /// never shrinks below its base for the tail operator.
    fn samples(ty: FieldType) -> (Value, Vec<Option<Value>>, Vec<Option<Value>>) {
        match ty {
            FieldType::Int32 => (
                Value::Int32(-3),
                stream(vec![Some(-3i32), Some(-2), Some(-2), None, Some(40), Some(-70000), None, Some(-69999)]),
                Vec::new(),
            ),
            FieldType::UInt32 => (
                Value::UInt32(10),
                stream(vec![Some(10u32), Some(11), Some(11), None, Some(7), Some(300_000), None, Some(300_001)]),
                Vec::new(),
            ),
            FieldType::Int64 => (
                Value::Int64(-3),
                stream(vec![Some(-3i64), Some(-2), Some(1 << 40), None, Some(-(1 << 40)), Some(5), None, Some(6)]),
                Vec::new(),
            ),
            FieldType::UInt64 => (
                Value::UInt64(10),
                stream(vec![Some(10u64), Some(11), Some(1 << 40), None, Some(3), Some(3), None, Some(4)]),
                Vec::new(),
            ),
            FieldType::Decimal => {
                let d = Decimal::new;
                (
                    Value::Decimal(d(150, -2)),
                    stream(vec![
                        Some(d(150, -2)),
                        Some(d(151, -2)),
                        Some(d(151, -2)),
                        None,
                        Some(d(3, 0)),
                        Some(d(-7, 5)),
                        None,
                        Some(d(-6, 5)),
                    ]),
                    Vec::new(),
                )
            }
            FieldType::Ascii => {
                let a = |s: &str| Some(Value::ascii(s));
                (
                    Value::ascii("ab"),
                    vec![a("ab"), a("abc"), a("abc"), None, a("a"), a("xbc"), None, a("")],
                    vec![a("ab"), a("ac"), None, a("ad"), a("adxy"), a("adxz"), a("adxz")],
                )
            }
            FieldType::Unicode => {
                let u = |s: &str| Some(Value::from(s));
                (
                    Value::from("né"),
                    vec![u("né"), u("néo"), u("néo"), None, u("n"), u("zéo"), None, u("")],
                    vec![u("né"), u("nö"), None, u("nü"), u("nüxy"), u("nüxz"), u("nüxz")],
                )
            }
            _ => {
                let b = |v: &[u8]| Some(Value::Bytes(v.to_vec()));
                (
                    Value::Bytes(vec![1, 2]),
                    vec![b(&[1, 2]), b(&[1, 2, 3]), b(&[1, 2, 3]), None, b(&[9]), b(&[9, 2, 3]), None, b(&[])],
                    vec![b(&[1, 2]), b(&[1, 3]), None, b(&[1, 4]), b(&[1, 4, 7, 8]), b(&[1, 4, 7, 9]), b(&[1, 4, 7, 9])],
                )
            }
        }
    }

    /// Send `values` through a single-field template, checking each decoded value and that both
    /// sessions end every message with the same previous values.
    fn check_stream(
        ty: FieldType,
        op: Operator,
        optional: bool,
        initial: &Value,
        values: &[Option<Value>],
    ) {
        let mut desc = FieldDescriptor::new(1, "F", ty)
            .with_operator(op)
            .with_initial(initial.clone());
        if ty == FieldType::Decimal {
            desc = desc.with_mantissa_operator(op);
        }
        if optional {
            desc = desc.into_optional();
        }
        let case = format!("{} {:?} optional={}", ty.name(), op, optional);
        let template = Template::new(1, "T", vec![desc]).unwrap();
        let registry = Arc::new(TemplateRegistry::from_templates(vec![template]).unwrap());
        let t = registry.get(1).unwrap();
        let mut enc = Encoder::new(Arc::clone(&registry));
        let mut dec = Decoder::new(Arc::clone(&registry));
        let mut src = Arena::new();
        let mut dst = Arena::new();
        for (i, v) in values.iter().enumerate() {
            let msg = src.alloc_message(t);
            {
                let mut m = MessageMut::new(&mut src, t, msg).unwrap();
                match v {
                    Some(v) => m.field(0).set_value(v).unwrap(),
                    None => m.field(0).as_absent(),
                }
            }
            let bytes = enc
                .encode(&MessageRef::new(&src, t, msg).unwrap())
                .unwrap_or_else(|e| panic!("{} #{}: encode failed: {}", case, i, e))
                .to_vec();
            let decoded = dec
                .decode(&bytes, &mut dst)
                .unwrap_or_else(|e| panic!("{} #{}: decode failed: {}", case, i, e));
            assert_eq!(decoded.consumed, bytes.len(), "{} #{}", case, i);
            let m = MessageRef::new(&dst, t, decoded.message).unwrap();
            assert_eq!(m.field(0).to_value(), *v, "{} #{}", case, i);
            assert_eq!(enc.dictionary(), dec.dictionary(), "{} #{}", case, i);
        }
    }

    #[test]
    fn dictionaries_stay_in_step() {
        let kinds = [
            FieldType::Int32,
            FieldType::UInt32,
            FieldType::Int64,
            FieldType::UInt64,
            FieldType::Decimal,
            FieldType::Ascii,
            FieldType::Unicode,
            FieldType::ByteVector,
        ];
        let operators = [
            Operator::None,
            Operator::Constant,
            Operator::Default,
            Operator::Copy,
            Operator::Increment,
            Operator::Delta,
            Operator::Tail,
        ];
        let mut cases = 0;
        for ty in kinds {
            let (initial, mixed, growing) = samples(ty);
            for op in operators {
                let applies = match op {
                    Operator::Increment => ty.is_integer() || ty == FieldType::Decimal,
                    Operator::Tail => ty.is_byte_like(),
                    _ => true,
                };
                if !applies {
                    continue;
                }
                for optional in [false, true] {
                    let values: Vec<Option<Value>> = match op {
                        Operator::Constant => vec![Some(initial.clone()), None, Some(initial.clone())],
                        Operator::Tail => growing.clone(),
                        _ => mixed.clone(),
                    }
                    .into_iter()
                    .filter(|v| optional || v.is_some())
                    .collect();
                    check_stream(ty, op, optional, &initial, &values);
                    cases += 1;
                }
            }
        }
        // Five operators on every type, increment on five, tail on three; each twice.
        assert_eq!(cases, 2 * (5 * 8 + 5 + 3));
    }
}
