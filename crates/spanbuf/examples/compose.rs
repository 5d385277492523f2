//! Composing buffers without copying: wrap, merge, slice, search.

use spanbuf::SpanFactory;

fn main() -> spanbuf::Result<()> {
    let factory = SpanFactory::default();

    // Build a logical document out of three independent pieces.
    let document = factory.merge([
        factory.wrap_text("To be, "),
        factory.wrap_text("or not to be, "),
        factory.wrap_text("that is the question"),
    ]);
    println!("document ({} bytes): {}", document.length(), document.text()?);

    // Slicing relabels, never copies.
    let question = document.slice_at(21)?;
    println!("slice @ {}: {}", question.offset(), question.text()?);

    // Search speaks absolute positions.
    let needle = factory.wrap_text("be");
    let mut from = document.offset();
    while let Some(found) = document.position_of_from(&needle, from)? {
        println!("\"be\" at absolute position {found}");
        if found >= document.end() {
            break;
        }
        from = found + 1;
    }

    // Typed reads through a walker.
    let record = factory.wrap({
        let mut bytes = 7u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(&(b'!' as u16).to_be_bytes());
        bytes
    });
    let mut walker = record.walker();
    println!(
        "walker decoded: {} {}",
        walker.read_u32()?,
        walker.read_char()?
    );
    Ok(())
}
