//! Minimal paginated text-to-PDF writer.

use lopdf::{dictionary, Document, Object, ObjectId, Stream};

use crate::error::RenderError;

/// Characters per line before wrapping (Courier 10pt on a Letter page).
pub const LINE_WIDTH: usize = 90;

pub const LINES_PER_PAGE: usize = 60;

const FONT_SIZE: u32 = 10;
const LEADING: u32 = 12;
const LEFT_MARGIN: u32 = 50;
const TOP_BASELINE: u32 = 742;

/// Renders `text` under a `title` line into PDF bytes.
pub fn render_text_pdf(title: &str, text: &str) -> Result<Vec<u8>, RenderError> {
    let mut lines = wrap_lines(title, LINE_WIDTH);
    lines.push(String::new());
    lines.extend(wrap_lines(text, LINE_WIDTH));

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let page_ids: Vec<ObjectId> = lines
        .chunks(LINES_PER_PAGE)
        .map(|page_lines| {
            let content = format_page(page_lines);
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
            doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Resources" => resources_id,
                "Contents" => content_id,
            })
        })
        .collect();

    let kids: Vec<Object> = page_ids.iter().map(|id| Object::from(*id)).collect();
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| RenderError::Encode(e.to_string()))?;

    Ok(buffer)
}

fn format_page(lines: &[String]) -> String {
    let mut content = String::new();
    content.push_str("BT\n");
    content.push_str(&format!("/F1 {} Tf\n", FONT_SIZE));
    content.push_str(&format!("{} {} Td\n", LEFT_MARGIN, TOP_BASELINE));
    content.push_str(&format!("{} TL\n", LEADING));

    for line in lines {
        content.push_str(&format!("({}) Tj T*\n", escape_pdf_string(line)));
    }

    content.push_str("ET\n");
    content
}

/// Hard-wraps each input line to `width` characters, preferring to break at
/// the last space. Always yields at least one line.
pub fn wrap_lines(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut out = Vec::new();

    for raw in text.lines() {
        let mut rest: Vec<char> = raw.trim_end().chars().collect();
        if rest.is_empty() {
            out.push(String::new());
            continue;
        }
        while rest.len() > width {
            let split = rest[..=width]
                .iter()
                .rposition(|c| *c == ' ')
                .filter(|&pos| pos > 0)
                .unwrap_or(width);
            out.push(rest[..split].iter().collect::<String>().trim_end().to_string());
            let next = if rest.get(split) == Some(&' ') {
                split + 1
            } else {
                split
            };
            rest.drain(..next);
        }
        out.push(rest.into_iter().collect());
    }

    if out.is_empty() {
        out.push(String::new());
    }
    out
}

/// Escapes PDF string delimiters; the built-in font only covers ASCII, so
/// anything else becomes `?`.
fn escape_pdf_string(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '(' => escaped.push_str("\\("),
            ')' => escaped.push_str("\\)"),
            '\\' => escaped.push_str("\\\\"),
            '\t' => escaped.push_str("    "),
            c if c.is_ascii() && !c.is_control() => escaped.push(c),
            _ => escaped.push('?'),
        }
    }
    escaped
}
