//! Patient handout synthesis.
//!
//! Rendering is split in two: [`layout`] is a pure function from the handout
//! content to positioned lines on pages, and [`render`] paints a layout with
//! `printpdf`. Sections whose fields are all absent are left out entirely.
//! Long bodies flow onto new pages; nothing is truncated.
//!
//! The same input always yields the same bytes: document dates come from the
//! call timestamp (Unix epoch when absent) and the trailer `/ID` is a hash of
//! the layout.

use std::io::BufWriter;

use chrono::{DateTime, Utc};
use printpdf::{lopdf, BuiltinFont, Mm, OffsetDateTime, PdfDocument};

use clearview_core::{CallInsights, Error, LensInterestLabel, ReadinessLabel, Result};

use crate::display::DisplayFields;

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_LEFT_MM: f32 = 20.0;
const BODY_INDENT_MM: f32 = 25.0;
const TOP_MM: f32 = 277.0;
const BOTTOM_MM: f32 = 20.0;

const TITLE_SIZE: f32 = 16.0;
const SUBTITLE_SIZE: f32 = 11.0;
const HEADING_SIZE: f32 = 12.0;
const BODY_SIZE: f32 = 10.0;

const TITLE_ADVANCE_MM: f32 = 9.0;
const SUBTITLE_ADVANCE_MM: f32 = 6.0;
const HEADING_ADVANCE_MM: f32 = 7.0;
const BODY_ADVANCE_MM: f32 = 5.0;
const SECTION_GAP_MM: f32 = 5.0;

/// Body characters per line at 10pt Helvetica within the content width.
pub const BODY_WRAP_CHARS: usize = 88;

/// Content for one handout.
#[derive(Debug, Clone)]
pub struct HandoutInput {
    pub clinic_name: String,
    pub patient_name: String,
    pub call_timestamp: Option<DateTime<Utc>>,
    pub insights: CallInsights,
    pub summary: Option<String>,
}

impl HandoutInput {
    pub fn from_fields(fields: &DisplayFields, clinic_name: &str) -> Self {
        Self {
            clinic_name: clinic_name.to_string(),
            patient_name: fields.patient_name.clone(),
            call_timestamp: fields.call_timestamp,
            insights: fields.insights.clone(),
            summary: fields.summary.clone(),
        }
    }
}

/// A titled block of paragraphs.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub heading: &'static str,
    pub paragraphs: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Style {
    Title,
    Subtitle,
    Heading,
    Body,
}

impl Style {
    fn size(self) -> f32 {
        match self {
            Self::Title => TITLE_SIZE,
            Self::Subtitle => SUBTITLE_SIZE,
            Self::Heading => HEADING_SIZE,
            Self::Body => BODY_SIZE,
        }
    }

    fn advance(self) -> f32 {
        match self {
            Self::Title => TITLE_ADVANCE_MM,
            Self::Subtitle => SUBTITLE_ADVANCE_MM,
            Self::Heading => HEADING_ADVANCE_MM,
            Self::Body => BODY_ADVANCE_MM,
        }
    }

    fn bold(self) -> bool {
        matches!(self, Self::Title | Self::Heading)
    }

    fn x(self) -> f32 {
        match self {
            Self::Body => BODY_INDENT_MM,
            _ => MARGIN_LEFT_MM,
        }
    }
}

/// One positioned line of text.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedLine {
    pub text: String,
    pub style: Style,
    pub x_mm: f32,
    pub y_mm: f32,
}

/// Positioned lines per page.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub title: String,
    pub issued_at: Option<DateTime<Utc>>,
    pub pages: Vec<Vec<PlacedLine>>,
}

impl Layout {
    /// Stable 32-character identifier derived from everything drawn.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.title.as_bytes());
        if let Some(at) = self.issued_at {
            hasher.update(&at.timestamp().to_le_bytes());
        }
        for (index, page) in self.pages.iter().enumerate() {
            hasher.update(&(index as u64).to_le_bytes());
            for line in page {
                hasher.update(line.text.as_bytes());
                hasher.update(&[line.style as u8]);
                hasher.update(&line.x_mm.to_le_bytes());
                hasher.update(&line.y_mm.to_le_bytes());
            }
        }
        hasher.finalize().to_hex().as_str()[..32].to_string()
    }

    fn document_date(&self) -> OffsetDateTime {
        self.issued_at
            .and_then(|at| OffsetDateTime::from_unix_timestamp(at.timestamp()).ok())
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Sections with at least one backing field, in display order.
pub fn sections(input: &HandoutInput) -> Vec<Section> {
    let i = &input.insights;
    let mut out = Vec::new();

    let mut push = |heading: &'static str, paragraphs: Vec<Option<String>>| {
        let paragraphs: Vec<String> = paragraphs.into_iter().flatten().collect();
        if !paragraphs.is_empty() {
            out.push(Section {
                heading,
                paragraphs,
            });
        }
    };

    push(
        "About Your Consultation",
        vec![present(&input.summary).map(String::from)],
    );

    push(
        "Your Vision Today",
        vec![
            i.vision_scale.map(|s| {
                format!(
                    "You rated the impact of your vision on daily life as {} out of 10.",
                    s
                )
            }),
            present(&i.activities).map(|a| format!("Activities affected: {}", a)),
        ],
    );

    push(
        "What Matters To You",
        vec![
            present(&i.occupation).map(|o| format!("Work: {}", o)),
            present(&i.hobbies).map(|h| format!("Hobbies and interests: {}", h)),
            present(&i.glasses_preference)
                .map(|g| format!("Your thoughts on glasses: {}", g)),
        ],
    );

    let lens_note = match i.premium_lens_label {
        LensInterestLabel::Interested | LensInterestLabel::Considering => Some(
            "Premium lenses can reduce or remove the need for glasses at several distances. \
             Your surgeon will confirm which options suit your eyes."
                .to_string(),
        ),
        _ => None,
    };
    let premium = present(&i.premium_lens_interest)
        .map(|p| format!("Premium lens options: {}", p));
    push(
        "Lens Options We Discussed",
        vec![
            premium.clone(),
            premium.and(lens_note),
            present(&i.laser_interest).map(|l| format!("Laser vision correction: {}", l)),
        ],
    );

    push(
        "Your Health Background",
        vec![present(&i.medical_history).map(String::from)],
    );

    push(
        "Your Questions",
        vec![present(&i.concerns).map(|c| {
            format!(
                "You mentioned: {}. We will go through these with you at your visit.",
                c.trim_end_matches('.')
            )
        })],
    );

    let next_step = match i.readiness_label {
        ReadinessLabel::Ready => Some("Our team will contact you to schedule your procedure."),
        ReadinessLabel::LeaningYes => {
            Some("Take your time; our team is happy to answer any remaining questions.")
        }
        ReadinessLabel::NotReady => {
            Some("There is no rush. We are here whenever you would like to talk again.")
        }
        ReadinessLabel::Unknown => None,
    };
    push(
        "Next Steps",
        vec![
            present(&i.readiness).map(|r| format!("Where you are today: {}", r)),
            present(&i.readiness).and(next_step.map(String::from)),
        ],
    );

    out
}

/// Greedy whitespace wrap. Words longer than `max_chars` get a line of their own.
pub fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace().flat_map(|w| split_long_word(w, max_chars)) {
        let needed = current.chars().count() + word.chars().count() + 1;
        if needed > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Chunks of at most `max_chars` characters, split on char boundaries.
fn split_long_word(word: &str, max_chars: usize) -> Vec<&str> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut rest = word;
    while rest.chars().count() > max_chars {
        let cut = rest
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let (head, tail) = rest.split_at(cut);
        chunks.push(head);
        rest = tail;
    }
    chunks.push(rest);
    chunks
}

struct Cursor {
    pages: Vec<Vec<PlacedLine>>,
    y: f32,
}

impl Cursor {
    fn new() -> Self {
        Self {
            pages: vec![Vec::new()],
            y: TOP_MM,
        }
    }

    fn remaining(&self) -> f32 {
        self.y - BOTTOM_MM
    }

    fn new_page(&mut self) {
        self.pages.push(Vec::new());
        self.y = TOP_MM;
    }

    fn place(&mut self, text: String, style: Style) {
        if self.y - style.advance() < BOTTOM_MM {
            self.new_page();
        }
        if let Some(page) = self.pages.last_mut() {
            page.push(PlacedLine {
                text,
                style,
                x_mm: style.x(),
                y_mm: self.y,
            });
        }
        self.y -= style.advance();
    }

    fn gap(&mut self, mm: f32) {
        self.y -= mm;
    }
}

/// Position every line. Pure and deterministic.
pub fn layout(input: &HandoutInput) -> Layout {
    let title = format!("{}: Your Consultation Summary", input.clinic_name);
    let mut cursor = Cursor::new();

    cursor.place(title.clone(), Style::Title);
    cursor.place(format!("Prepared for {}", input.patient_name), Style::Subtitle);
    if let Some(ts) = input.call_timestamp {
        cursor.place(
            format!("Consultation date: {}", ts.format("%B %-d, %Y")),
            Style::Subtitle,
        );
    }
    cursor.gap(SECTION_GAP_MM);

    for section in sections(input) {
        let body: Vec<String> = section
            .paragraphs
            .iter()
            .flat_map(|p| wrap_text(p, BODY_WRAP_CHARS))
            .collect();
        let height = Style::Heading.advance()
            + body.len() as f32 * Style::Body.advance()
            + SECTION_GAP_MM;

        // Break before a section that fits on a fresh page but not this one;
        // longer sections flow line by line.
        let full_page = TOP_MM - BOTTOM_MM;
        if height > cursor.remaining() && height <= full_page {
            cursor.new_page();
        }

        cursor.place(section.heading.to_string(), Style::Heading);
        for line in body {
            cursor.place(line, Style::Body);
        }
        cursor.gap(SECTION_GAP_MM);
    }

    for line in wrap_text(
        "This summary was prepared from your recent consultation call. It is not a \
         diagnosis. Please bring it to your appointment and ask us about anything \
         that is unclear.",
        BODY_WRAP_CHARS,
    ) {
        cursor.place(line, Style::Body);
    }

    Layout {
        title,
        issued_at: input.call_timestamp,
        pages: cursor.pages,
    }
}

/// Paint a layout to PDF bytes.
pub fn render(layout: &Layout) -> Result<Vec<u8>> {
    let (doc, first_page, first_layer) = PdfDocument::new(
        &layout.title,
        Mm(PAGE_WIDTH_MM),
        Mm(PAGE_HEIGHT_MM),
        "Layer 1",
    );
    let document_id = layout.fingerprint();
    let date = layout.document_date();
    let doc = doc
        .with_document_id(document_id.clone())
        .with_creation_date(date)
        .with_mod_date(date)
        .with_metadata_date(date);
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| Error::Document(format!("PDF font error: {e}")))?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| Error::Document(format!("PDF font error: {e}")))?;

    for (index, lines) in layout.pages.iter().enumerate() {
        let (page, layer) = if index == 0 {
            (first_page, first_layer)
        } else {
            doc.add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Layer 1")
        };
        let layer = doc.get_page(page).get_layer(layer);
        for line in lines {
            let face = if line.style.bold() { &bold } else { &font };
            layer.use_text(
                line.text.as_str(),
                line.style.size(),
                Mm(line.x_mm),
                Mm(line.y_mm),
                face,
            );
        }
    }

    let mut buf = BufWriter::new(Vec::new());
    doc.save(&mut buf)
        .map_err(|e| Error::Document(format!("PDF save error: {e}")))?;
    let bytes = buf
        .into_inner()
        .map_err(|e| Error::Document(format!("PDF buffer error: {e}")))?;
    stamp_trailer_id(&bytes, &document_id)
}

/// printpdf draws a fresh instance id into the trailer on every save;
/// replace both halves of `/ID` with the layout fingerprint.
fn stamp_trailer_id(bytes: &[u8], id: &str) -> Result<Vec<u8>> {
    let mut pdf = lopdf::Document::load_mem(bytes)
        .map_err(|e| Error::Document(format!("PDF reload error: {e}")))?;
    let entry = lopdf::Object::String(id.as_bytes().to_vec(), lopdf::StringFormat::Literal);
    pdf.trailer
        .set("ID", lopdf::Object::Array(vec![entry.clone(), entry]));
    let mut out = Vec::new();
    pdf.save_to(&mut out)
        .map_err(|e| Error::Document(format!("PDF save error: {e}")))?;
    Ok(out)
}

/// Lay out and render a handout.
pub fn synthesize(input: &HandoutInput) -> Result<Vec<u8>> {
    render(&layout(input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn input(insights: CallInsights) -> HandoutInput {
        HandoutInput {
            clinic_name: "Clearview Eye Centre".to_string(),
            patient_name: "Ann Lee".to_string(),
            call_timestamp: Some(Utc.with_ymd_and_hms(2026, 3, 4, 15, 0, 0).unwrap()),
            insights,
            summary: None,
        }
    }

    fn all_text(layout: &Layout) -> Vec<String> {
        layout
            .pages
            .iter()
            .flatten()
            .map(|l| l.text.clone())
            .collect()
    }

    #[test]
    fn test_empty_fields_omit_all_sections() {
        let input = input(CallInsights::default());
        assert!(sections(&input).is_empty());
        let text = all_text(&layout(&input));
        assert!(text.iter().any(|t| t == "Prepared for Ann Lee"));
        assert!(!text.iter().any(|t| t == "Your Vision Today"));
    }

    #[test]
    fn test_section_present_only_with_backing_field() {
        let input = input(CallInsights {
            vision_scale: Some(7),
            concerns: Some("recovery time".to_string()),
            ..Default::default()
        });
        let headings: Vec<&str> = sections(&input).iter().map(|s| s.heading).collect();
        assert_eq!(headings, vec!["Your Vision Today", "Your Questions"]);
    }

    #[test]
    fn test_layout_is_deterministic() {
        let input = input(CallInsights {
            hobbies: Some("golf and reading".to_string()),
            medical_history: Some("mild glaucoma".to_string()),
            ..Default::default()
        });
        assert_eq!(layout(&input), layout(&input));
    }

    #[test]
    fn test_wrap_respects_width_and_keeps_words() {
        let text = "word ".repeat(100);
        let lines = wrap_text(&text, 30);
        assert!(lines.iter().all(|l| l.chars().count() <= 30));
        let rejoined: Vec<&str> = lines.iter().flat_map(|l| l.split(' ')).collect();
        assert_eq!(rejoined.len(), 100);
    }

    #[test]
    fn test_wrap_empty() {
        assert!(wrap_text("   ", 10).is_empty());
    }

    #[test]
    fn test_long_body_paginates_without_truncation() {
        let long = "Cataract in both eyes with previous retinal treatment. ".repeat(200);
        let input = input(CallInsights {
            medical_history: Some(long.clone()),
            ..Default::default()
        });
        let layout = layout(&input);
        assert!(layout.pages.len() > 1);
        assert!(layout
            .pages
            .iter()
            .flatten()
            .all(|l| l.y_mm >= BOTTOM_MM && l.y_mm <= TOP_MM));

        let body_words: usize = layout
            .pages
            .iter()
            .flatten()
            .filter(|l| l.style == Style::Body)
            .map(|l| l.text.split_whitespace().count())
            .sum();
        assert!(body_words >= long.split_whitespace().count());
    }

    #[test]
    fn test_section_moves_to_next_page_when_it_would_overflow() {
        // Fill most of page one, then add a short section.
        let filler = "x ".repeat(BODY_WRAP_CHARS / 2 * 44);
        let input = input(CallInsights {
            medical_history: Some(filler),
            concerns: Some("cost of surgery, recovery time, driving afterwards".to_string()),
            ..Default::default()
        });
        let layout = layout(&input);
        let questions_page = layout
            .pages
            .iter()
            .position(|p| p.iter().any(|l| l.text == "Your Questions"))
            .unwrap();
        let page = &layout.pages[questions_page];
        let heading_idx = page.iter().position(|l| l.text == "Your Questions").unwrap();
        assert!(page.len() > heading_idx + 1, "heading must not be orphaned");
    }

    #[test]
    fn test_synthesize_produces_pdf() {
        let bytes = synthesize(&input(CallInsights {
            vision_scale: Some(8),
            premium_lens_interest: Some("yes".to_string()),
            premium_lens_label: LensInterestLabel::Interested,
            ..Default::default()
        }))
        .unwrap();
        assert_eq!(&bytes[0..4], b"%PDF");
    }

    #[test]
    fn test_synthesize_bytes_identical_across_calls() {
        let input = input(CallInsights {
            vision_scale: Some(6),
            hobbies: Some("golf and reading".to_string()),
            concerns: Some("night driving".to_string()),
            ..Default::default()
        });
        let first = synthesize(&input).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let second = synthesize(&input).unwrap();
        assert_eq!(first, second);

        let text = String::from_utf8_lossy(&first);
        assert!(text.contains("D:20260304150000"));
        assert!(text.contains(&layout(&input).fingerprint()));
    }

    #[test]
    fn test_missing_timestamp_uses_epoch_date() {
        let mut input = input(CallInsights::default());
        input.call_timestamp = None;
        let first = synthesize(&input).unwrap();
        assert_eq!(first, synthesize(&input).unwrap());
        assert!(String::from_utf8_lossy(&first).contains("D:19700101000000"));
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = input(CallInsights {
            hobbies: Some("golf".to_string()),
            ..Default::default()
        });
        let b = input(CallInsights {
            hobbies: Some("tennis".to_string()),
            ..Default::default()
        });
        assert_eq!(layout(&a).fingerprint().len(), 32);
        assert_ne!(layout(&a).fingerprint(), layout(&b).fingerprint());
    }

    #[test]
    fn test_wrap_splits_words_longer_than_width() {
        let url = format!("https://clinic.example/{}", "a".repeat(200));
        let text = format!("Book online at {url} or call us.");
        let lines = wrap_text(&text, BODY_WRAP_CHARS);
        assert!(lines.iter().all(|l| l.chars().count() <= BODY_WRAP_CHARS));
        assert_eq!(lines.concat().replace(' ', ""), text.replace(' ', ""));
    }

    #[test]
    fn test_split_long_word_respects_char_boundaries() {
        let word = "é".repeat(25);
        let chunks = split_long_word(&word, 10);
        assert_eq!(
            chunks.iter().map(|c| c.chars().count()).collect::<Vec<_>>(),
            vec![10, 10, 5]
        );
    }
}
