// SPDX-License-Identifier: Apache-2.0
use chardetng::EncodingDetector;
use csv::{ReaderBuilder, StringRecord, Terminator, WriterBuilder};
use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8, WINDOWS_1252};
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{error, info, instrument, warn};

use crate::error::CleanError;

/// Name used when a row has no usable first name
pub const DEFAULT_FIRST_NAME: &str = "Candidate";

/// Used when nothing in the raw bytes identifies their encoding.
/// encoding_rs resolves this label to windows-1252.
pub const DETECTION_FALLBACK_LABEL: &str = "latin1";

/// Retried once when the detected encoding rejects the input
pub const DECODE_FALLBACK_LABEL: &str = "cp1252";

/// How many leading bytes the UTF-16 sniffer looks at
const SNIFF_LEN: usize = 4096;

/// At most one code unit in this many may carry a NUL at the unexpected parity
const UTF16_STRAY_NUL_RATIO: usize = 10;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("email pattern is valid")
});

/// One row of a cleaned recipient list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recipient {
    pub email: String,
    pub first_name: String,
}

/// Outcome of a successful [`clean_csv_file`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanReport {
    pub output_path: PathBuf,
    pub rows_read: usize,
    pub rows_written: usize,
    pub invalid_emails: usize,
    pub duplicates: usize,
}

/// Strips everything but ASCII letters and whitespace, then title-cases each word.
pub fn clean_name(raw: &str) -> String {
    let letters: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphabetic() || c.is_whitespace())
        .collect();

    let cleaned = letters
        .split_whitespace()
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ");

    if cleaned.is_empty() {
        DEFAULT_FIRST_NAME.to_string()
    } else {
        cleaned
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_ascii_uppercase()
            .to_string()
            + &chars.as_str().to_ascii_lowercase(),
        None => String::new(),
    }
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}

/// Guesses the encoding of raw CSV bytes.
///
/// Looks for a byte order mark, then for the NUL pattern of BOM-less UTF-16,
/// then checks for valid UTF-8, and finally asks chardetng for its best guess
/// among the legacy encodings. Returns `None` when that guess cannot decode
/// the input either.
pub fn detect_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return Some(encoding);
    }
    if let Some(encoding) = sniff_utf16(bytes) {
        return Some(encoding);
    }
    if Encoding::utf8_valid_up_to(bytes) == bytes.len() {
        return Some(UTF_8);
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let guess = detector.guess(None, true);
    guess
        .decode_without_bom_handling_and_without_replacement(bytes)
        .is_some()
        .then_some(guess)
}

// Mostly-ASCII UTF-16 has a NUL in most code units at one byte parity and
// almost none at the other. Non-Latin-1 characters like U+0100 put the odd
// NUL at the other parity, so a small share is tolerated there.
fn sniff_utf16(bytes: &[u8]) -> Option<&'static Encoding> {
    let sample = &bytes[..bytes.len().min(SNIFF_LEN)];
    let units = sample.len() / 2;
    if units == 0 {
        return None;
    }

    let even_nuls = sample.iter().step_by(2).filter(|b| **b == 0).count();
    let odd_nuls = sample.iter().skip(1).step_by(2).filter(|b| **b == 0).count();
    let rare = |nuls: usize| nuls * UTF16_STRAY_NUL_RATIO < units;

    if odd_nuls * 2 > units && rare(even_nuls) {
        Some(UTF_16LE)
    } else if even_nuls * 2 > units && rare(odd_nuls) {
        Some(UTF_16BE)
    } else {
        None
    }
}

fn fallback_encoding(label: &str) -> &'static Encoding {
    Encoding::for_label(label.as_bytes()).unwrap_or(WINDOWS_1252)
}

fn decode_with(encoding: &'static Encoding, bytes: &[u8]) -> Option<String> {
    let body = match Encoding::for_bom(bytes) {
        Some((bom_encoding, bom_len)) if bom_encoding == encoding => &bytes[bom_len..],
        _ => bytes,
    };
    encoding
        .decode_without_bom_handling_and_without_replacement(body)
        .map(|text| text.into_owned())
}

/// Decodes raw CSV bytes, falling back to windows-1252 when detection or decoding fails
pub fn decode_csv_bytes(bytes: &[u8]) -> Result<String, CleanError> {
    let encoding = detect_encoding(bytes).unwrap_or_else(|| {
        warn!(
            fallback = DETECTION_FALLBACK_LABEL,
            "Encoding detection failed, falling back to legacy encoding"
        );
        fallback_encoding(DETECTION_FALLBACK_LABEL)
    });

    if let Some(text) = decode_with(encoding, bytes) {
        return Ok(text);
    }

    warn!(
        encoding = encoding.name(),
        fallback = DECODE_FALLBACK_LABEL,
        "Error decoding input, retrying with fallback encoding"
    );
    let fallback = fallback_encoding(DECODE_FALLBACK_LABEL);
    decode_with(fallback, bytes).ok_or(CleanError::Decode {
        encoding: fallback.name(),
    })
}

fn column_index(headers: &StringRecord, column: &str) -> Result<usize, CleanError> {
    headers
        .iter()
        .position(|h| h == column)
        .ok_or_else(|| CleanError::MissingColumn(column.to_string()))
}

/// Cleans the recipient list at `input` and writes it to `output` as UTF-8.
///
/// Names are normalized, emails trimmed and validated, and rows with an
/// already seen email are dropped so the first occurrence wins. All other
/// columns pass through untouched. Errors are logged here and returned to the
/// caller, which decides whether the run can go on.
#[instrument(skip_all, fields(input = %input.display(), output = %output.display()))]
pub fn clean_csv_file(
    input: &Path,
    output: &Path,
    email_column: &str,
    name_column: &str,
) -> Result<CleanReport, CleanError> {
    let result = clean_inner(input, output, email_column, name_column);
    match &result {
        Ok(report) => info!(
            rows_read = report.rows_read,
            rows_written = report.rows_written,
            invalid_emails = report.invalid_emails,
            duplicates = report.duplicates,
            "Cleaned data saved to {}",
            output.display()
        ),
        Err(e) => error!(error = %e, "An error occurred during CSV cleaning"),
    }
    result
}

fn clean_inner(
    input: &Path,
    output: &Path,
    email_column: &str,
    name_column: &str,
) -> Result<CleanReport, CleanError> {
    let bytes = fs::read(input).map_err(|source| CleanError::Read {
        path: input.to_path_buf(),
        source,
    })?;
    let text = decode_csv_bytes(&bytes)?;

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    let email_idx = column_index(&headers, email_column)?;
    let name_idx = column_index(&headers, name_column)?;

    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    let mut report = CleanReport {
        output_path: output.to_path_buf(),
        rows_read: 0,
        rows_written: 0,
        invalid_emails: 0,
        duplicates: 0,
    };

    for record in reader.records() {
        let record = record?;
        report.rows_read += 1;

        let mut fields: Vec<String> = record.iter().map(str::to_string).collect();
        fields.resize(headers.len(), String::new());

        let email = fields[email_idx].trim().to_string();
        if !is_valid_email(&email) {
            report.invalid_emails += 1;
            continue;
        }
        if !seen.insert(email.clone()) {
            report.duplicates += 1;
            continue;
        }

        fields[name_idx] = clean_name(&fields[name_idx]);
        fields[email_idx] = email;
        rows.push(fields);
    }

    write_rows(output, &headers, &rows)?;
    report.rows_written = rows.len();
    Ok(report)
}

fn write_rows(output: &Path, headers: &StringRecord, rows: &[Vec<String>]) -> Result<(), CleanError> {
    let write_err = |source: std::io::Error| CleanError::Write {
        path: output.to_path_buf(),
        source,
    };

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_err)?;
    }

    let file = File::create(output).map_err(write_err)?;
    let mut writer = WriterBuilder::new()
        .terminator(Terminator::Any(b'\n'))
        .from_writer(file);

    writer.write_record(headers)?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush().map_err(write_err)?;
    Ok(())
}

/// Reads a file produced by [`clean_csv_file`] back into recipients, in file order
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_recipients(
    path: &Path,
    email_column: &str,
    name_column: &str,
) -> Result<Vec<Recipient>, CleanError> {
    let file = File::open(path).map_err(|source| CleanError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = ReaderBuilder::new().flexible(true).from_reader(file);

    let headers = reader.headers()?.clone();
    let email_idx = column_index(&headers, email_column)?;
    let name_idx = column_index(&headers, name_column)?;

    let mut recipients = Vec::new();
    for record in reader.records() {
        let record = record?;
        recipients.push(Recipient {
            email: record.get(email_idx).unwrap_or_default().to_string(),
            first_name: record.get(name_idx).unwrap_or_default().to_string(),
        });
    }
    Ok(recipients)
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::WINDOWS_1251;

    #[test]
    fn name_keeps_only_letters_and_title_cases() {
        assert_eq!(clean_name("J!ohn"), "John");
        assert_eq!(clean_name("  mary   ANNE "), "Mary Anne");
        assert_eq!(clean_name("o'brien-smith"), "Obriensmith");
    }

    #[test]
    fn name_defaults_when_nothing_is_left() {
        assert_eq!(clean_name(""), DEFAULT_FIRST_NAME);
        assert_eq!(clean_name("1234 !!"), DEFAULT_FIRST_NAME);
        assert_eq!(clean_name("   "), DEFAULT_FIRST_NAME);
    }

    #[test]
    fn email_pattern() {
        assert!(is_valid_email("john@x.com"));
        assert!(is_valid_email("first.last+tag@mail.example.co"));
        assert!(is_valid_email("JANE@X.COM"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("a@b.c"));
        assert!(!is_valid_email("a b@x.com"));
        assert!(!is_valid_email("@x.com"));
    }

    #[test]
    fn detects_utf8_and_boms() {
        assert_eq!(detect_encoding(b"Email,First Name\n"), Some(UTF_8));
        assert_eq!(detect_encoding(b"\xEF\xBB\xBFEmail\n"), Some(UTF_8));
        assert_eq!(detect_encoding(b"\xFF\xFEE\x00"), Some(UTF_16LE));
    }

    #[test]
    fn sniffs_bomless_utf16() {
        let le: Vec<u8> = "Email,Name\n".encode_utf16().flat_map(u16::to_le_bytes).collect();
        let be: Vec<u8> = "Email,Name\n".encode_utf16().flat_map(u16::to_be_bytes).collect();
        assert_eq!(detect_encoding(&le), Some(UTF_16LE));
        assert_eq!(detect_encoding(&be), Some(UTF_16BE));
    }

    #[test]
    fn sniffs_bomless_utf16_with_non_latin1_characters() {
        let le: Vec<u8> = "Email,First Name,City\nivan@x.com,Ivan,\u{0100}\u{4E00}\n"
            .encode_utf16()
            .flat_map(u16::to_le_bytes)
            .collect();
        assert_eq!(detect_encoding(&le), Some(UTF_16LE));
    }

    #[test]
    fn legacy_latin_bytes_are_detected() {
        let bytes = b"Ren\xE9,rene@x.com\n";
        let encoding = detect_encoding(bytes).unwrap();
        assert_ne!(encoding, UTF_8);
        assert_eq!(decode_with(encoding, bytes).unwrap(), "René,rene@x.com\n");
    }

    #[test]
    fn cyrillic_windows_1251_is_detected() {
        let text = "Email,First Name,City\n\
            ivan@x.com,Иван,Москва\n\
            petr@x.com,Пётр,Санкт-Петербург\n\
            olga@x.com,Ольга,\"Привет, как дела? Это обычная строка на русском языке.\"\n";
        let (bytes, _, _) = WINDOWS_1251.encode(text);
        assert_eq!(detect_encoding(&bytes), Some(WINDOWS_1251));
    }

    #[test]
    fn decode_handles_legacy_latin_text() {
        let text = decode_csv_bytes(b"Ren\xE9,rene@x.com\n").unwrap();
        assert_eq!(text, "René,rene@x.com\n");
    }

    #[test]
    fn malformed_utf16_retries_with_cp1252() {
        // UTF-16LE BOM followed by an odd number of bytes
        let text = decode_csv_bytes(b"\xFF\xFEA\x00B").unwrap();
        assert_eq!(text, "ÿþA\u{0}B");
    }

    #[test]
    fn decode_strips_utf8_bom() {
        let text = decode_csv_bytes(b"\xEF\xBB\xBFEmail\n").unwrap();
        assert_eq!(text, "Email\n");
    }
}
