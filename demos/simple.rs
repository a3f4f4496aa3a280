use std::sync::Arc;

use fast_pack::typed::*;
use fast_pack::*;

fn main() -> Result<()> {
    // A trade report: the sequence number counts up, the symbol rarely changes, and the price
    // moves by a few ticks at a time.
    let trade = Template::new(
        7,
        "Trade",
        vec![
            FieldDescriptor::new(1, "Seq", FieldType::UInt32).with_operator(Operator::Increment),
            FieldDescriptor::new(2, "Symbol", FieldType::Ascii).with_operator(Operator::Copy),
            FieldDescriptor::decimal(3, "Px")
                .with_operator(Operator::Copy)
                .with_mantissa_operator(Operator::Delta),
            FieldDescriptor::new(4, "Qty", FieldType::UInt64)
                .into_optional()
                .with_operator(Operator::Default),
        ],
    )?;
    let registry = Arc::new(TemplateRegistry::from_templates(vec![trade])?);
    let trade = registry.require(7)?;

    let mut arena = Arena::new();
    let mut encoder = Encoder::new(Arc::clone(&registry));
    for (i, (px, qty)) in [(10125, Some(100)), (10126, None), (10124, Some(250))]
        .into_iter()
        .enumerate()
    {
        let msg = arena.alloc_message(trade);
        {
            let mut m = MessageMut::new(&mut arena, trade, msg)?;
            m.field_with_name("Seq")
                .dynamic_cast_as::<UInt32Mut>()
                .set(1000 + i as u32);
            m.field_with_name("Symbol")
                .dynamic_cast_as::<AsciiMut>()
                .set("ACME")?;
            m.field_with_name("Px")
                .dynamic_cast_as::<DecimalMut>()
                .set(Decimal::new(px, -2));
            match qty {
                Some(q) => m.field_with_name("Qty").dynamic_cast_as::<UInt64Mut>().set(q),
                None => m.field_with_name("Qty").as_absent(),
            }
        }
        let bytes = encoder.encode(&MessageRef::new(&arena, trade, msg)?)?;
        println!("trade {} -> {} bytes: {:02X?}", i, bytes.len(), bytes);
    }
    let wire = encoder.take_output();

    let mut decoder = Decoder::new(Arc::clone(&registry));
    let mut out = Arena::new();
    for msg in decoder.decode_all(&wire, &mut out)? {
        let view = MessageRef::new(&out, trade, msg)?;
        println!("{:?}", view);
    }
    Ok(())
}
