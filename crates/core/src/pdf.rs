//! Layout engine and minimal PDF 1.4 writer for [`InvoiceDocument`]s.
//!
//! Layout walks the blocks top to bottom with a running baseline and opens a
//! new A4 page whenever the next unit does not fit; the item table repeats
//! its header row after every break. Output uses the two standard Helvetica
//! fonts with WinAnsi encoding and uncompressed content streams.

use std::fmt::Write as _;

use crate::invoice::{Block, InvoiceDocument, ItemRow, Party, TotalLine};

pub const PAGE_WIDTH: f32 = 595.28;
pub const PAGE_HEIGHT: f32 = 841.89;
const MARGIN: f32 = 50.0;
const PAGE_NUMBER_ZONE: f32 = 24.0;
const CONTENT_WIDTH: f32 = PAGE_WIDTH - 2.0 * MARGIN;

const BODY_SIZE: f32 = 10.0;
const SMALL_SIZE: f32 = 8.0;
const LINE_HEIGHT: f32 = 13.0;

const COL_DESCRIPTION_WIDTH: f32 = 250.0;
const COL_QUANTITY_RIGHT: f32 = MARGIN + 300.0;
const COL_PRICE_RIGHT: f32 = MARGIN + 400.0;
const COL_TOTAL_RIGHT: f32 = MARGIN + CONTENT_WIDTH;
const TABLE_HEADER: [&str; 4] = ["Artikel / Item", "Kol. / Qty", "Cena / Price", "Znesek / Amount"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Font {
    Regular,
    Bold,
}

impl Font {
    fn resource(self) -> &'static str {
        match self {
            Self::Regular => "F1",
            Self::Bold => "F2",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Text {
        x: f32,
        y: f32,
        size: f32,
        font: Font,
        text: String,
    },
    Line {
        from: (f32, f32),
        to: (f32, f32),
        width: f32,
    },
    FillRect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        gray: f32,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub ops: Vec<DrawOp>,
}

impl Page {
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.ops.iter().filter_map(|op| match op {
            DrawOp::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Align {
    Left,
    Right,
}

struct Cursor {
    pages: Vec<Page>,
    y: f32,
}

impl Cursor {
    fn new() -> Self {
        Self {
            pages: vec![Page::default()],
            y: PAGE_HEIGHT - MARGIN,
        }
    }

    fn page(&mut self) -> &mut Page {
        let last = self.pages.len() - 1;
        &mut self.pages[last]
    }

    fn bottom() -> f32 {
        MARGIN + PAGE_NUMBER_ZONE
    }

    /// Starts a new page when `height` does not fit. Returns `true` on a break.
    fn ensure(&mut self, height: f32) -> bool {
        if self.y - height >= Self::bottom() {
            return false;
        }
        self.pages.push(Page::default());
        self.y = PAGE_HEIGHT - MARGIN;
        true
    }

    fn advance(&mut self, height: f32) {
        self.y -= height;
    }

    fn text(&mut self, x: f32, y: f32, font: Font, size: f32, text: &str, align: Align) {
        if text.is_empty() {
            return;
        }
        let x = match align {
            Align::Left => x,
            Align::Right => x - text_width(text, font, size),
        };
        self.page().ops.push(DrawOp::Text {
            x,
            y,
            size,
            font,
            text: text.to_string(),
        });
    }

    fn rule(&mut self, y: f32, width: f32) {
        self.page().ops.push(DrawOp::Line {
            from: (MARGIN, y),
            to: (MARGIN + CONTENT_WIDTH, y),
            width,
        });
    }
}

/// Lays the document out into pages of drawing operations.
pub fn layout(document: &InvoiceDocument) -> Vec<Page> {
    let mut cursor = Cursor::new();
    for block in &document.blocks {
        match block {
            Block::Header {
                title,
                invoice_number: _,
                details,
            } => layout_header(&mut cursor, title, details),
            Block::PartyInfo { seller, buyer } => layout_parties(&mut cursor, seller, buyer),
            Block::ItemTable { rows, .. } => layout_items(&mut cursor, rows),
            Block::Totals { lines } => layout_totals(&mut cursor, lines),
            Block::Footer { lines } => layout_footer(&mut cursor, lines),
        }
    }
    number_pages(&mut cursor.pages);
    cursor.pages
}

/// Lays out and serialises the document.
pub fn render_pdf(document: &InvoiceDocument) -> Vec<u8> {
    let pages = layout(document);
    serialize(&pages, &format!("Invoice {}", document.invoice_number))
}

fn layout_header(cursor: &mut Cursor, title: &str, details: &[String]) {
    cursor.ensure(24.0 + LINE_HEIGHT * details.len() as f32 + 16.0);
    cursor.advance(18.0);
    let y = cursor.y;
    cursor.text(MARGIN, y, Font::Bold, 18.0, title, Align::Left);
    cursor.advance(10.0);
    for detail in details {
        cursor.advance(LINE_HEIGHT);
        let y = cursor.y;
        cursor.text(MARGIN, y, Font::Regular, BODY_SIZE, detail, Align::Left);
    }
    cursor.advance(10.0);
    let y = cursor.y;
    cursor.rule(y, 0.8);
    cursor.advance(16.0);
}

fn layout_parties(cursor: &mut Cursor, seller: &Party, buyer: &Party) {
    let column_width = CONTENT_WIDTH / 2.0 - 10.0;
    let seller_lines = wrap_all(&seller.lines, column_width, Font::Regular, BODY_SIZE);
    let buyer_lines = wrap_all(&buyer.lines, column_width, Font::Regular, BODY_SIZE);
    let rows = seller_lines.len().max(buyer_lines.len()) as f32;
    cursor.ensure(LINE_HEIGHT * (rows + 1.0) + 12.0);

    let top = cursor.y - LINE_HEIGHT;
    for (x, party, lines) in [
        (MARGIN, seller, &seller_lines),
        (MARGIN + CONTENT_WIDTH / 2.0, buyer, &buyer_lines),
    ] {
        cursor.text(x, top, Font::Bold, BODY_SIZE + 1.0, &party.heading, Align::Left);
        for (index, line) in lines.iter().enumerate() {
            let y = top - LINE_HEIGHT * (index as f32 + 1.0);
            cursor.text(x, y, Font::Regular, BODY_SIZE, line, Align::Left);
        }
    }
    cursor.advance(LINE_HEIGHT * (rows + 1.0) + 16.0);
}

fn layout_table_header(cursor: &mut Cursor) {
    let height = LINE_HEIGHT + 6.0;
    let top = cursor.y;
    cursor.page().ops.push(DrawOp::FillRect {
        x: MARGIN,
        y: top - height,
        width: CONTENT_WIDTH,
        height,
        gray: 0.92,
    });
    let y = cursor.y - LINE_HEIGHT;
    cursor.text(MARGIN + 4.0, y, Font::Bold, BODY_SIZE, TABLE_HEADER[0], Align::Left);
    cursor.text(COL_QUANTITY_RIGHT, y, Font::Bold, BODY_SIZE, TABLE_HEADER[1], Align::Right);
    cursor.text(COL_PRICE_RIGHT, y, Font::Bold, BODY_SIZE, TABLE_HEADER[2], Align::Right);
    cursor.text(COL_TOTAL_RIGHT - 4.0, y, Font::Bold, BODY_SIZE, TABLE_HEADER[3], Align::Right);
    cursor.advance(height);
}

fn layout_items(cursor: &mut Cursor, rows: &[ItemRow]) {
    let header_height = LINE_HEIGHT + 6.0;
    cursor.ensure(header_height + LINE_HEIGHT * 2.0);
    layout_table_header(cursor);

    for row in rows {
        let description = wrap(&row.description, COL_DESCRIPTION_WIDTH, Font::Regular, BODY_SIZE);
        let row_height = LINE_HEIGHT * description.len() as f32 + 6.0;
        if cursor.ensure(row_height) {
            layout_table_header(cursor);
        }

        let first = cursor.y - LINE_HEIGHT;
        for (index, line) in description.iter().enumerate() {
            let y = first - LINE_HEIGHT * index as f32;
            cursor.text(MARGIN + 4.0, y, Font::Regular, BODY_SIZE, line, Align::Left);
        }
        cursor.text(COL_QUANTITY_RIGHT, first, Font::Regular, BODY_SIZE, &row.quantity, Align::Right);
        cursor.text(COL_PRICE_RIGHT, first, Font::Regular, BODY_SIZE, &row.unit_price, Align::Right);
        cursor.text(
            COL_TOTAL_RIGHT - 4.0,
            first,
            Font::Regular,
            BODY_SIZE,
            &row.line_total,
            Align::Right,
        );
        cursor.advance(row_height);
        let y = cursor.y;
        cursor.rule(y, 0.3);
    }
    cursor.advance(12.0);
}

fn layout_totals(cursor: &mut Cursor, lines: &[TotalLine]) {
    cursor.ensure(16.0 * lines.len() as f32 + 10.0);
    for line in lines {
        let (font, size) = if line.emphasized {
            (Font::Bold, BODY_SIZE + 2.0)
        } else {
            (Font::Regular, BODY_SIZE)
        };
        if line.emphasized {
            cursor.advance(4.0);
            let y = cursor.y;
            cursor.page().ops.push(DrawOp::Line {
                from: (COL_PRICE_RIGHT - 60.0, y),
                to: (COL_TOTAL_RIGHT, y),
                width: 0.8,
            });
        }
        cursor.advance(16.0);
        let y = cursor.y;
        cursor.text(COL_TOTAL_RIGHT - 4.0, y, font, size, &line.text(), Align::Right);
    }
    cursor.advance(24.0);
}

fn layout_footer(cursor: &mut Cursor, lines: &[String]) {
    let wrapped = wrap_all(lines, CONTENT_WIDTH, Font::Regular, SMALL_SIZE);
    cursor.ensure(11.0 * wrapped.len() as f32 + 8.0);
    let y = cursor.y;
    cursor.rule(y, 0.3);
    cursor.advance(4.0);
    for line in &wrapped {
        cursor.advance(11.0);
        let y = cursor.y;
        cursor.text(MARGIN, y, Font::Regular, SMALL_SIZE, line, Align::Left);
    }
}

fn number_pages(pages: &mut [Page]) {
    let total = pages.len();
    for (index, page) in pages.iter_mut().enumerate() {
        let label = format!("Stran / Page {}/{}", index + 1, total);
        let x = MARGIN + CONTENT_WIDTH - text_width(&label, Font::Regular, SMALL_SIZE);
        page.ops.push(DrawOp::Text {
            x,
            y: MARGIN,
            size: SMALL_SIZE,
            font: Font::Regular,
            text: label,
        });
    }
}

fn wrap_all(lines: &[String], width: f32, font: Font, size: f32) -> Vec<String> {
    lines
        .iter()
        .flat_map(|line| wrap(line, width, font, size))
        .collect()
}

/// Greedy word wrap; words wider than the column are split by character.
fn wrap(text: &str, width: f32, font: Font, size: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{current} {word}")
        };
        if text_width(&candidate, font, size) <= width {
            current = candidate;
            continue;
        }
        if !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        for ch in word.chars() {
            current.push(ch);
            if text_width(&current, font, size) > width && current.chars().count() > 1 {
                current.pop();
                lines.push(std::mem::take(&mut current));
                current.push(ch);
            }
        }
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

/// Helvetica advance widths (1/1000 em) for ASCII 32..=126.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // 0..?
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // @..O
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // P.._
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // `..o
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // p..~
];

/// Approximate rendered width in points. Bold is scaled from the regular metrics.
pub fn text_width(text: &str, font: Font, size: f32) -> f32 {
    let units: u32 = text
        .chars()
        .map(|ch| {
            let code = ch as u32;
            if (32..=126).contains(&code) {
                u32::from(HELVETICA_WIDTHS[(code - 32) as usize])
            } else {
                556
            }
        })
        .sum();
    let scale = match font {
        Font::Regular => 1.0,
        Font::Bold => 1.06,
    };
    units as f32 * size / 1000.0 * scale
}

/// Maps a char to its WinAnsi byte; letters outside the code page lose their accent.
fn win_ansi(ch: char) -> u8 {
    match ch {
        ' '..='~' => ch as u8,
        '€' => 0x80,
        '…' => 0x85,
        'Š' => 0x8A,
        'Ž' => 0x8E,
        '‘' => 0x91,
        '’' => 0x92,
        '“' => 0x93,
        '”' => 0x94,
        '•' => 0x95,
        '–' => 0x96,
        '—' => 0x97,
        'š' => 0x9A,
        'ž' => 0x9E,
        '\u{00A0}'..='\u{00FF}' => ch as u32 as u8,
        'Č' | 'Ć' => b'C',
        'č' | 'ć' => b'c',
        'Đ' => b'D',
        'đ' => b'd',
        _ => b'?',
    }
}

fn push_pdf_string(out: &mut Vec<u8>, text: &str) {
    out.push(b'(');
    for ch in text.chars() {
        let byte = win_ansi(ch);
        if matches!(byte, b'(' | b')' | b'\\') {
            out.push(b'\\');
        }
        out.push(byte);
    }
    out.push(b')');
}

fn content_stream(page: &Page) -> Vec<u8> {
    let mut out = Vec::new();
    for op in &page.ops {
        match op {
            DrawOp::Text {
                x,
                y,
                size,
                font,
                text,
            } => {
                let prefix = format!("BT /{} {size:.2} Tf {x:.2} {y:.2} Td ", font.resource());
                out.extend_from_slice(prefix.as_bytes());
                push_pdf_string(&mut out, text);
                out.extend_from_slice(b" Tj ET\n");
            }
            DrawOp::Line { from, to, width } => {
                let line = format!(
                    "{width:.2} w {:.2} {:.2} m {:.2} {:.2} l S\n",
                    from.0, from.1, to.0, to.1
                );
                out.extend_from_slice(line.as_bytes());
            }
            DrawOp::FillRect {
                x,
                y,
                width,
                height,
                gray,
            } => {
                let rect = format!("{gray:.2} g {x:.2} {y:.2} {width:.2} {height:.2} re f 0 g\n");
                out.extend_from_slice(rect.as_bytes());
            }
        }
    }
    out
}

struct PdfWriter {
    out: Vec<u8>,
    offsets: Vec<usize>,
}

impl PdfWriter {
    fn new() -> Self {
        let mut out = Vec::new();
        out.extend_from_slice(b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n");
        Self {
            out,
            offsets: Vec::new(),
        }
    }

    /// Appends the next object; objects must be written in number order.
    fn object(&mut self, body: &[u8]) {
        self.offsets.push(self.out.len());
        let number = self.offsets.len();
        self.out
            .extend_from_slice(format!("{number} 0 obj\n").as_bytes());
        self.out.extend_from_slice(body);
        self.out.extend_from_slice(b"\nendobj\n");
    }

    fn finish(mut self, root: usize, info: usize) -> Vec<u8> {
        let xref_at = self.out.len();
        let mut xref = String::new();
        let _ = writeln!(xref, "xref\n0 {}", self.offsets.len() + 1);
        xref.push_str("0000000000 65535 f \n");
        for offset in &self.offsets {
            let _ = write!(xref, "{offset:010} 00000 n \n");
        }
        let _ = write!(
            xref,
            "trailer\n<< /Size {} /Root {root} 0 R /Info {info} 0 R >>\nstartxref\n{xref_at}\n%%EOF\n",
            self.offsets.len() + 1
        );
        self.out.extend_from_slice(xref.as_bytes());
        self.out
    }
}

const CATALOG: usize = 1;
const PAGES: usize = 2;
const INFO: usize = 5;
const FIRST_PAGE: usize = 6;

fn serialize(pages: &[Page], title: &str) -> Vec<u8> {
    let mut writer = PdfWriter::new();

    writer.object(format!("<< /Type /Catalog /Pages {PAGES} 0 R >>").as_bytes());

    let kids: Vec<String> = (0..pages.len())
        .map(|index| format!("{} 0 R", FIRST_PAGE + 2 * index))
        .collect();
    writer.object(
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            pages.len()
        )
        .as_bytes(),
    );
    writer.object(
        b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>",
    );
    writer.object(
        b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold /Encoding /WinAnsiEncoding >>",
    );

    let mut info = b"<< /Producer (volja) /Title ".to_vec();
    push_pdf_string(&mut info, title);
    info.extend_from_slice(b" >>");
    writer.object(&info);

    for (index, page) in pages.iter().enumerate() {
        let contents = FIRST_PAGE + 2 * index + 1;
        writer.object(
            format!(
                "<< /Type /Page /Parent {PAGES} 0 R /MediaBox [0 0 {PAGE_WIDTH:.2} {PAGE_HEIGHT:.2}] \
                 /Resources << /Font << /F1 3 0 R /F2 4 0 R >> >> /Contents {contents} 0 R >>"
            )
            .as_bytes(),
        );
        let stream = content_stream(page);
        let mut body = format!("<< /Length {} >>\nstream\n", stream.len()).into_bytes();
        body.extend_from_slice(&stream);
        body.extend_from_slice(b"endstream");
        writer.object(&body);
    }

    writer.finish(CATALOG, INFO)
}
