//! Format-specific text extraction.
//!
//! Each supported [`FileFormat`] maps to one [`Extractor`] in an
//! [`ExtractorRegistry`]. Extractors never panic on bad input; they return
//! an [`ExtractError`] and the ingestion pipeline records and skips the file.
//!
//! Formats that naturally split (PDF pages, slides, sheets) produce one
//! [`RawDocument`] per part, tagged with `page`, `slide`, or `sheet`
//! metadata.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use calamine::Reader as _;
use docchat_core::models::RawDocument;

use crate::error::ExtractError;
use crate::format::{FileFormat, SourceFile};

/// Largest file any extractor will read into memory.
const MAX_FILE_BYTES: u64 = 256 * 1024 * 1024;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum sheets to process in a workbook.
const MAX_SHEETS: usize = 100;
/// Maximum rows to process per sheet.
const MAX_ROWS_PER_SHEET: usize = 100_000;

/// Capability to turn one file into text.
pub trait Extractor: Send + Sync {
    fn extract(&self, file: &SourceFile) -> Result<Vec<RawDocument>, ExtractError>;
}

/// Text recognition backend for images.
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;
    fn recognize(&self, bytes: &[u8]) -> Result<String, ExtractError>;
}

/// Default OCR engine: recognizes nothing.
pub struct NoOcr;

impl OcrEngine for NoOcr {
    fn name(&self) -> &str {
        "none"
    }

    fn recognize(&self, _bytes: &[u8]) -> Result<String, ExtractError> {
        Ok(String::new())
    }
}

/// Maps formats to extractors.
///
/// Archives are not extracted here; the ingestion pipeline expands them
/// and feeds their contents back through the registry.
pub struct ExtractorRegistry {
    extractors: HashMap<FileFormat, Box<dyn Extractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self {
            extractors: HashMap::new(),
        }
    }

    /// Registry with every built-in extractor and no OCR.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(FileFormat::PlainText, Box::new(TextExtractor));
        registry.register(FileFormat::Pdf, Box::new(PdfExtractor));
        registry.register(FileFormat::Word, Box::new(WordExtractor));
        registry.register(FileFormat::PowerPoint, Box::new(PowerPointExtractor));
        registry.register(FileFormat::Spreadsheet, Box::new(SpreadsheetExtractor));
        registry.register(FileFormat::Csv, Box::new(CsvExtractor));
        registry.register(FileFormat::Json, Box::new(JsonExtractor));
        registry.register(FileFormat::Xml, Box::new(XmlExtractor));
        registry.register(FileFormat::Image, Box::new(ImageExtractor::new(Box::new(NoOcr))));
        registry
    }

    /// Add or replace the extractor for `format`.
    pub fn register(&mut self, format: FileFormat, extractor: Box<dyn Extractor>) {
        self.extractors.insert(format, extractor);
    }

    pub fn supports(&self, format: &FileFormat) -> bool {
        self.extractors.contains_key(format)
    }

    pub fn extract(&self, file: &SourceFile) -> Result<Vec<RawDocument>, ExtractError> {
        match self.extractors.get(&file.format) {
            Some(extractor) => extractor.extract(file),
            None => Err(ExtractError::Unsupported(file.format.to_string())),
        }
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn read_bounded(path: &Path) -> Result<Vec<u8>, ExtractError> {
    let len = std::fs::metadata(path)?.len();
    if len > MAX_FILE_BYTES {
        return Err(ExtractError::Unsupported(format!(
            "file is {} bytes, limit is {}",
            len, MAX_FILE_BYTES
        )));
    }
    Ok(std::fs::read(path)?)
}

fn document(file: &SourceFile, text: String) -> RawDocument {
    RawDocument::new(file.origin.clone(), text).with_meta("format", &file.format)
}

// ============ Plain text ============

pub struct TextExtractor;

impl Extractor for TextExtractor {
    fn extract(&self, file: &SourceFile) -> Result<Vec<RawDocument>, ExtractError> {
        let bytes = read_bounded(&file.path)?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        Ok(vec![document(file, text)])
    }
}

// ============ PDF ============

pub struct PdfExtractor;

impl Extractor for PdfExtractor {
    fn extract(&self, file: &SourceFile) -> Result<Vec<RawDocument>, ExtractError> {
        let bytes = read_bounded(&file.path)?;
        let pages = pdf_extract::extract_text_from_mem_by_pages(&bytes)
            .map_err(|e| ExtractError::Pdf(e.to_string()))?;
        Ok(pages
            .into_iter()
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(i, text)| document(file, text).with_meta("page", i + 1))
            .collect())
    }
}

// ============ OOXML helpers ============

fn open_zip(bytes: &[u8]) -> Result<zip::ZipArchive<std::io::Cursor<&[u8]>>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

/// Entries matching `prefix<N>.xml`, sorted by N.
fn numbered_entries(
    archive: &zip::ZipArchive<std::io::Cursor<&[u8]>>,
    prefix: &str,
) -> Vec<(u32, String)> {
    let mut names: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|n| {
            let num = n.strip_prefix(prefix)?.strip_suffix(".xml")?.parse::<u32>().ok()?;
            Some((num, n.to_string()))
        })
        .collect();
    names.sort();
    names
}

/// Collect `<*:t>` text runs, emitting one line per `<*:p>` paragraph.
///
/// Shared by Word (`w:t`, `w:p`) and PowerPoint (`a:t`, `a:p`) markup.
fn extract_paragraph_text(xml: &[u8], paragraph_sep: &str) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_t = true;
                }
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                let text = te.unescape().map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" => {
                    let para = current.trim().to_string();
                    if !para.is_empty() {
                        paragraphs.push(para);
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    let tail = current.trim();
    if !tail.is_empty() {
        paragraphs.push(tail.to_string());
    }
    Ok(paragraphs.join(paragraph_sep))
}

// ============ Word ============

pub struct WordExtractor;

impl Extractor for WordExtractor {
    fn extract(&self, file: &SourceFile) -> Result<Vec<RawDocument>, ExtractError> {
        let bytes = read_bounded(&file.path)?;
        let mut archive = open_zip(&bytes)?;
        let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
        let text = extract_paragraph_text(&xml, "\n\n")?;
        Ok(vec![document(file, text)])
    }
}

// ============ PowerPoint ============

pub struct PowerPointExtractor;

impl Extractor for PowerPointExtractor {
    fn extract(&self, file: &SourceFile) -> Result<Vec<RawDocument>, ExtractError> {
        let bytes = read_bounded(&file.path)?;
        let mut archive = open_zip(&bytes)?;
        let slides = numbered_entries(&archive, "ppt/slides/slide");
        let mut docs = Vec::new();
        for (number, name) in slides {
            let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
            let text = extract_paragraph_text(&xml, "\n")?;
            if !text.is_empty() {
                docs.push(document(file, text).with_meta("slide", number));
            }
        }
        Ok(docs)
    }
}

// ============ Spreadsheet ============

pub struct SpreadsheetExtractor;

fn cell_text(cell: &calamine::Data) -> String {
    match cell {
        calamine::Data::Empty => String::new(),
        calamine::Data::String(s) => s.clone(),
        calamine::Data::Float(f) => f.to_string(),
        calamine::Data::Int(i) => i.to_string(),
        calamine::Data::Bool(b) => b.to_string(),
        calamine::Data::DateTime(dt) => dt.to_string(),
        calamine::Data::DateTimeIso(s) | calamine::Data::DurationIso(s) => s.clone(),
        _ => String::new(),
    }
}

impl Extractor for SpreadsheetExtractor {
    fn extract(&self, file: &SourceFile) -> Result<Vec<RawDocument>, ExtractError> {
        let bytes = read_bounded(&file.path)?;
        let mut workbook = calamine::open_workbook_auto_from_rs(std::io::Cursor::new(bytes))
            .map_err(|e| ExtractError::Spreadsheet(e.to_string()))?;

        let mut docs = Vec::new();
        for name in workbook.sheet_names().into_iter().take(MAX_SHEETS) {
            let range = workbook
                .worksheet_range(&name)
                .map_err(|e| ExtractError::Spreadsheet(format!("sheet {}: {}", name, e)))?;
            let mut text = String::new();
            for row in range.rows().take(MAX_ROWS_PER_SHEET) {
                let cells: Vec<String> = row.iter().map(cell_text).collect();
                if cells.iter().all(|c| c.is_empty()) {
                    continue;
                }
                text.push_str(&cells.join(" | "));
                text.push('\n');
            }
            if !text.is_empty() {
                docs.push(document(file, text).with_meta("sheet", &name));
            }
        }
        Ok(docs)
    }
}

// ============ CSV ============

pub struct CsvExtractor;

impl Extractor for CsvExtractor {
    fn extract(&self, file: &SourceFile) -> Result<Vec<RawDocument>, ExtractError> {
        let bytes = read_bounded(&file.path)?;
        let is_tsv = file
            .path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("tsv"))
            .unwrap_or(false);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(if is_tsv { b'\t' } else { b',' })
            .from_reader(bytes.as_slice());

        let mut text = String::new();
        for record in reader.records() {
            let record = record.map_err(|e| ExtractError::Csv(e.to_string()))?;
            text.push_str(&record.iter().collect::<Vec<_>>().join(" | "));
            text.push('\n');
        }
        Ok(vec![document(file, text)])
    }
}

// ============ JSON ============

pub struct JsonExtractor;

impl Extractor for JsonExtractor {
    fn extract(&self, file: &SourceFile) -> Result<Vec<RawDocument>, ExtractError> {
        let bytes = read_bounded(&file.path)?;
        let value: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| ExtractError::Json(e.to_string()))?;
        let text =
            serde_json::to_string_pretty(&value).map_err(|e| ExtractError::Json(e.to_string()))?;
        Ok(vec![document(file, text)])
    }
}

// ============ XML ============

pub struct XmlExtractor;

impl Extractor for XmlExtractor {
    fn extract(&self, file: &SourceFile) -> Result<Vec<RawDocument>, ExtractError> {
        use quick_xml::events::Event;

        let bytes = read_bounded(&file.path)?;
        let mut reader = quick_xml::Reader::from_reader(bytes.as_slice());
        reader.config_mut().trim_text(true);
        let mut buf = Vec::new();
        let mut lines: Vec<String> = Vec::new();
        let mut depth = 0usize;
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(_)) => depth += 1,
                Ok(Event::End(_)) => depth = depth.saturating_sub(1),
                Ok(Event::Text(te)) => {
                    let text = te.unescape().map_err(|e| ExtractError::Xml(e.to_string()))?;
                    if !text.trim().is_empty() {
                        lines.push(text.trim().to_string());
                    }
                }
                Ok(Event::CData(cd)) => {
                    let text = String::from_utf8_lossy(&cd).trim().to_string();
                    if !text.is_empty() {
                        lines.push(text);
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(ExtractError::Xml(e.to_string())),
                _ => {}
            }
            buf.clear();
        }
        if depth != 0 {
            return Err(ExtractError::Xml("unexpected end of document".to_string()));
        }
        Ok(vec![document(file, lines.join("\n"))])
    }
}

// ============ Image ============

/// Runs an [`OcrEngine`] over image bytes. Images with no recognized text
/// produce no documents.
pub struct ImageExtractor {
    ocr: Box<dyn OcrEngine>,
}

impl ImageExtractor {
    pub fn new(ocr: Box<dyn OcrEngine>) -> Self {
        Self { ocr }
    }
}

impl Extractor for ImageExtractor {
    fn extract(&self, file: &SourceFile) -> Result<Vec<RawDocument>, ExtractError> {
        let bytes = read_bounded(&file.path)?;
        let text = self.ocr.recognize(&bytes)?;
        if text.trim().is_empty() {
            tracing::debug!(
                "no text recognized in {} (ocr engine: {})",
                file.origin,
                self.ocr.name()
            );
            return Ok(Vec::new());
        }
        Ok(vec![document(file, text).with_meta("ocr", self.ocr.name())])
    }
}
