//! fast-pack is a template-driven binary codec in the style of FAST (FIX Adapted for STreaming).
//! Messages are described by templates, and every field of a template carries an operator that
//! says how to compress it against the values sent before it. A steady stream of similar messages
//! shrinks to a handful of bytes each.
//!
//! The crate provides:
//!
//! - Templates built from [`FieldDescriptor`]s, with integer, decimal, string, byte vector, group,
//!   sequence, and dynamic template reference fields. Templates can be written by hand or loaded
//!   with serde.
//! - Message storage in an [`Arena`]: fixed-size cells for every field, with strings and nested
//!   aggregates kept in the arena's own buffers. Dropping a whole batch of messages is a single
//!   [`Arena::reset`].
//! - Field references. [`FieldRef`] and [`FieldMut`] can be cast to typed views such as
//!   [`typed::UInt32Ref`] or [`aggregate::SequenceMut`]. A `dynamic_cast_as` that doesn't match
//!   the field type yields an absent view instead of failing, so lookups chain without checks.
//! - Stateful [`Encoder`] and [`Decoder`] sessions implementing the none, constant, default,
//!   copy, increment, delta, and tail operators, with presence maps and stop-bit integers on
//!   the wire.
//!
//! Sessions keep previous values between messages. An encoder and a decoder stay in step as long
//! as the decoder sees every message the encoder produced, in order, starting from the same
//! presets. A message that fails to encode or decode leaves its session as it was before the
//! message started.

pub mod aggregate;
mod arena;
mod cell;
mod config;
mod decode;
mod depth_tracking;
mod descriptor;
mod dictionary;
mod encode;
mod error;
mod field_ref;
mod operator;
mod pmap;
mod stream;
mod template;
pub mod typed;
mod value;
mod varint;

pub use aggregate::{AggregateMut, AggregateRef, MessageMut, MessageRef};
pub use arena::{Arena, Message};
pub use cell::{ByteSpan, CellId, CellSpan, Payload, ValueCell};
pub use config::{Preset, SessionConfig};
pub use decode::{Decoded, Decoder};
pub use descriptor::{FieldDescriptor, FieldType, GroupContent, Operator, Presence};
pub use encode::Encoder;
pub use error::{Error, Result};
pub use field_ref::{FieldMut, FieldRef, TypedMut, TypedRef};
pub use stream::StreamBuffer;
pub use template::{Template, TemplateRegistry};
pub use value::{Decimal, Value};
