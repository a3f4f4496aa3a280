#![no_main]
use std::sync::Arc;

use fast_pack::*;
use libfuzzer_sys::fuzz_target;

fn registry() -> TemplateRegistry {
    let quote = Template::new(
        1,
        "Quote",
        vec![
            FieldDescriptor::new(1, "Seq", FieldType::UInt32).with_operator(Operator::Increment),
            FieldDescriptor::new(2, "Symbol", FieldType::Ascii).with_operator(Operator::Copy),
            FieldDescriptor::decimal(3, "Px")
                .into_optional()
                .with_operator(Operator::Copy)
                .with_mantissa_operator(Operator::Delta),
            FieldDescriptor::new(4, "Text", FieldType::Unicode)
                .into_optional()
                .with_operator(Operator::Tail),
            FieldDescriptor::sequence(
                5,
                "Legs",
                vec![FieldDescriptor::new(6, "Qty", FieldType::Int64).with_operator(Operator::Delta)],
            )
            .into_optional(),
            FieldDescriptor::template_ref(7, "Next"),
        ],
    )
    .unwrap();
    let trailer = Template::new(
        2,
        "Trailer",
        vec![FieldDescriptor::new(1, "Check", FieldType::ByteVector).with_operator(Operator::Copy)],
    )
    .unwrap();
    TemplateRegistry::from_templates(vec![quote, trailer]).unwrap()
}

fuzz_target!(|data: &[u8]| {
    let config = SessionConfig::new().max_sequence_len(64).max_depth(8);
    let mut dec = Decoder::with_config(Arc::new(registry()), config).unwrap();
    let mut arena = Arena::new();
    let _ = dec.decode_all(data, &mut arena);
});
