use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use anyhow::{Result, anyhow};
use encoding_rs::{
    BIG5, EUC_JP, EUC_KR, Encoding, GB18030, GBK, IBM866, ISO_2022_JP, ISO_8859_2, ISO_8859_5,
    ISO_8859_7, ISO_8859_15, KOI8_R, KOI8_U, MACINTOSH, SHIFT_JIS, UTF_8, UTF_16BE, UTF_16LE,
    WINDOWS_874, WINDOWS_1250, WINDOWS_1251, WINDOWS_1252, WINDOWS_1253, WINDOWS_1254,
    WINDOWS_1255, WINDOWS_1256, WINDOWS_1257, WINDOWS_1258, X_MAC_CYRILLIC,
};

const SNIFF_BYTES: usize = 4096;

/// Windows code-page numbers for the encodings this tool can name.
/// Single source for both name→code and code→encoding lookups.
static CODE_PAGES: &[(u16, &Encoding)] = &[
    (65001, UTF_8),
    (1200, UTF_16LE),
    (1201, UTF_16BE),
    (874, WINDOWS_874),
    (1250, WINDOWS_1250),
    (1251, WINDOWS_1251),
    (1252, WINDOWS_1252),
    (1253, WINDOWS_1253),
    (1254, WINDOWS_1254),
    (1255, WINDOWS_1255),
    (1256, WINDOWS_1256),
    (1257, WINDOWS_1257),
    (1258, WINDOWS_1258),
    (20866, KOI8_R),
    (21866, KOI8_U),
    (866, IBM866),
    (10000, MACINTOSH),
    (10007, X_MAC_CYRILLIC),
    (932, SHIFT_JIS),
    (51932, EUC_JP),
    (50220, ISO_2022_JP),
    (936, GBK),
    (54936, GB18030),
    (950, BIG5),
    (949, EUC_KR),
    (28592, ISO_8859_2),
    (28595, ISO_8859_5),
    (28597, ISO_8859_7),
    (28605, ISO_8859_15),
];

/// A text encoding paired with its Windows code-page number.
///
/// Equality is code-page identity, which is exactly the comparison that
/// decides whether a file needs conversion at all.
#[derive(Debug, Clone, Copy)]
pub struct EncodingId {
    encoding: &'static Encoding,
    code_page: u16,
}

impl EncodingId {
    pub fn new(encoding: &'static Encoding) -> Self {
        Self {
            encoding,
            code_page: code_page_of(encoding),
        }
    }

    /// Resolves a label such as `utf-8` or `windows-1251`, or a bare
    /// code-page number such as `1251`.
    pub fn resolve(label: &str) -> Result<Self> {
        let trimmed = label.trim();
        if let Ok(code) = trimmed.parse::<u16>() {
            return from_code_page(code).ok_or_else(|| anyhow!("unknown code page {code}"));
        }
        Encoding::for_label(trimmed.as_bytes())
            .map(Self::new)
            .ok_or_else(|| anyhow!("unknown encoding '{trimmed}'"))
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    pub fn code_page(&self) -> u16 {
        self.code_page
    }

    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }
}

impl PartialEq for EncodingId {
    fn eq(&self, other: &Self) -> bool {
        if self.code_page == 0 || other.code_page == 0 {
            // Encodings outside the table fall back to charset identity.
            self.encoding == other.encoding
        } else {
            self.code_page == other.code_page
        }
    }
}

impl Eq for EncodingId {}

impl fmt::Display for EncodingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn code_page_of(encoding: &'static Encoding) -> u16 {
    CODE_PAGES
        .iter()
        .find(|(_, candidate)| *candidate == encoding)
        .map_or(0, |(code, _)| *code)
}

fn from_code_page(code: u16) -> Option<EncodingId> {
    CODE_PAGES
        .iter()
        .find(|(candidate, _)| *candidate == code)
        .map(|&(code, encoding)| EncodingId {
            encoding,
            code_page: code,
        })
}

/// Reads the leading bytes of `path` and returns its best-guess encoding,
/// or `None` when nothing can be said with certainty. I/O errors are
/// surfaced for the caller to classify; nothing here writes.
pub fn detect_file(path: &Path) -> io::Result<Option<EncodingId>> {
    let mut file = File::open(path)?;
    let mut buf = [0u8; SNIFF_BYTES];
    let mut read = 0;
    while read < buf.len() {
        let n = file.read(&mut buf[read..])?;
        if n == 0 {
            break;
        }
        read += n;
    }
    let hit_eof = read < buf.len();
    Ok(sniff(&buf[..read], hit_eof))
}

/// BOM first, then a strict UTF-8 validity check. No statistical
/// guessing: unresolved means "read with the configured default".
pub fn sniff(bytes: &[u8], hit_eof: bool) -> Option<EncodingId> {
    if let Some(encoding) = sniff_bom(bytes) {
        return Some(EncodingId::new(encoding));
    }
    if !bytes.is_empty() && is_utf8_prefix(bytes, hit_eof) {
        return Some(EncodingId::new(UTF_8));
    }
    None
}

fn sniff_bom(bytes: &[u8]) -> Option<&'static Encoding> {
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return Some(UTF_8);
    }
    if bytes.starts_with(&[0xFF, 0xFE]) {
        return Some(UTF_16LE);
    }
    if bytes.starts_with(&[0xFE, 0xFF]) {
        return Some(UTF_16BE);
    }

    None
}

fn is_utf8_prefix(bytes: &[u8], hit_eof: bool) -> bool {
    match std::str::from_utf8(bytes) {
        Ok(_) => true,
        // A multi-byte sequence cut off at the buffer edge is not
        // evidence against UTF-8.
        Err(err) => !hit_eof && err.error_len().is_none(),
    }
}
