use std::borrow::Cow;

use chardetng::EncodingDetector;
use encoding_rs::{Encoding as RsEncoding, BIG5, GBK, SHIFT_JIS, WINDOWS_1252};
use thiserror::Error;

/// 行尾樣式。 / Line ending style a file was loaded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineEnding {
    #[default]
    Lf,
    CrLf,
    Cr,
}

impl LineEnding {
    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
            LineEnding::Cr => "\r",
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            LineEnding::Lf => "lf",
            LineEnding::CrLf => "crlf",
            LineEnding::Cr => "cr",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "lf" => Some(LineEnding::Lf),
            "crlf" => Some(LineEnding::CrLf),
            "cr" => Some(LineEnding::Cr),
            _ => None,
        }
    }
}

/// 支援的文字編碼。 / Encodings a document can round-trip through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    Utf8,
    Utf16Le,
    Utf16Be,
    Windows1252,
    ShiftJis,
    Gbk,
    Big5,
}

impl TextEncoding {
    pub fn name(self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Utf16Le => "utf-16le",
            TextEncoding::Utf16Be => "utf-16be",
            TextEncoding::Windows1252 => "windows-1252",
            TextEncoding::ShiftJis => "shift-jis",
            TextEncoding::Gbk => "gbk",
            TextEncoding::Big5 => "big5",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [
            TextEncoding::Utf8,
            TextEncoding::Utf16Le,
            TextEncoding::Utf16Be,
            TextEncoding::Windows1252,
            TextEncoding::ShiftJis,
            TextEncoding::Gbk,
            TextEncoding::Big5,
        ]
        .into_iter()
        .find(|candidate| candidate.name().eq_ignore_ascii_case(name))
    }

    fn legacy_codec(self) -> Option<&'static RsEncoding> {
        match self {
            TextEncoding::Windows1252 => Some(WINDOWS_1252),
            TextEncoding::ShiftJis => Some(SHIFT_JIS),
            TextEncoding::Gbk => Some(GBK),
            TextEncoding::Big5 => Some(BIG5),
            _ => None,
        }
    }

    fn from_legacy_codec(codec: &'static RsEncoding) -> Option<Self> {
        [
            TextEncoding::Windows1252,
            TextEncoding::ShiftJis,
            TextEncoding::Gbk,
            TextEncoding::Big5,
        ]
        .into_iter()
        .find(|candidate| candidate.legacy_codec() == Some(codec))
    }
}

/// 文件在磁碟上的格式，儲存時照原樣寫回。 / On-disk format of a document, preserved on save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextFormat {
    pub encoding: TextEncoding,
    pub line_ending: LineEnding,
    pub has_bom: bool,
}

/// 解碼結果：內容已正規化為 `\n`。 / Decoded text, newlines already normalised to `\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    pub text: String,
    pub format: TextFormat,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("data is not valid {0}")]
    Malformed(&'static str),
    #[error("encoding of the data could not be determined")]
    Undetectable,
    #[error("text cannot be represented in {0}")]
    Unrepresentable(&'static str),
}

const BOMS: [(&[u8], TextEncoding); 3] = [
    (b"\xEF\xBB\xBF", TextEncoding::Utf8),
    (b"\xFF\xFE", TextEncoding::Utf16Le),
    (b"\xFE\xFF", TextEncoding::Utf16Be),
];

/// 將原始位元組解碼為文字並推斷其格式。 / Decodes raw bytes, inferring encoding, BOM and line ending.
pub fn decode(bytes: &[u8]) -> Result<DecodedText, CodecError> {
    let (raw, encoding, has_bom) = decode_raw(bytes)?;
    let line_ending = detect_line_ending(&raw);
    Ok(DecodedText {
        text: normalize_newlines(&raw),
        format: TextFormat {
            encoding,
            line_ending,
            has_bom,
        },
    })
}

/// 依照給定格式編碼文字。 / Encodes `\n`-normalised text using the given on-disk format.
pub fn encode(text: &str, format: TextFormat) -> Result<Vec<u8>, CodecError> {
    let text: Cow<'_, str> = match format.line_ending {
        LineEnding::Lf => Cow::Borrowed(text),
        other => Cow::Owned(text.replace('\n', other.as_str())),
    };

    let mut out = Vec::with_capacity(text.len() + 3);
    if format.has_bom {
        if let Some((bom, _)) = BOMS.iter().find(|(_, enc)| *enc == format.encoding) {
            out.extend_from_slice(bom);
        }
    }

    match format.encoding {
        TextEncoding::Utf8 => out.extend_from_slice(text.as_bytes()),
        TextEncoding::Utf16Le => text
            .encode_utf16()
            .for_each(|unit| out.extend_from_slice(&unit.to_le_bytes())),
        TextEncoding::Utf16Be => text
            .encode_utf16()
            .for_each(|unit| out.extend_from_slice(&unit.to_be_bytes())),
        legacy => {
            let codec = legacy
                .legacy_codec()
                .ok_or(CodecError::Unrepresentable(legacy.name()))?;
            let (bytes, _, had_errors) = codec.encode(&text);
            if had_errors {
                return Err(CodecError::Unrepresentable(legacy.name()));
            }
            out.extend_from_slice(&bytes);
        }
    }
    Ok(out)
}

fn decode_raw(bytes: &[u8]) -> Result<(String, TextEncoding, bool), CodecError> {
    for (bom, encoding) in BOMS {
        if let Some(rest) = bytes.strip_prefix(bom) {
            return Ok((decode_unicode(rest, encoding)?, encoding, true));
        }
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        return Ok((text.to_owned(), TextEncoding::Utf8, false));
    }

    for encoding in [TextEncoding::Utf16Le, TextEncoding::Utf16Be] {
        if looks_like_utf16(bytes, encoding == TextEncoding::Utf16Be) {
            return Ok((decode_unicode(bytes, encoding)?, encoding, false));
        }
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let guess = detector.guess(None, true);
    let encoding = TextEncoding::from_legacy_codec(guess).ok_or(CodecError::Undetectable)?;
    let text = guess
        .decode_without_bom_handling_and_without_replacement(bytes)
        .ok_or(CodecError::Malformed(encoding.name()))?;
    Ok((text.into_owned(), encoding, false))
}

fn decode_unicode(bytes: &[u8], encoding: TextEncoding) -> Result<String, CodecError> {
    let malformed = || CodecError::Malformed(encoding.name());
    match encoding {
        TextEncoding::Utf8 => String::from_utf8(bytes.to_vec()).map_err(|_| malformed()),
        TextEncoding::Utf16Le | TextEncoding::Utf16Be => {
            if bytes.len() % 2 != 0 {
                return Err(malformed());
            }
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| {
                    let pair = [pair[0], pair[1]];
                    if encoding == TextEncoding::Utf16Be {
                        u16::from_be_bytes(pair)
                    } else {
                        u16::from_le_bytes(pair)
                    }
                })
                .collect();
            String::from_utf16(&units).map_err(|_| malformed())
        }
        _ => Err(malformed()),
    }
}

// Half or more of the high (or low) bytes being zero in the leading sample.
fn looks_like_utf16(bytes: &[u8], big_endian: bool) -> bool {
    if bytes.len() < 2 || bytes.len() % 2 != 0 {
        return false;
    }
    let sample = &bytes[..bytes.len().min(64)];
    let pairs = sample.len() / 2;
    let zeros = sample
        .chunks_exact(2)
        .filter(|pair| if big_endian { pair[0] == 0 } else { pair[1] == 0 })
        .count();
    zeros * 2 >= pairs
}

fn detect_line_ending(text: &str) -> LineEnding {
    match text.find(['\r', '\n']) {
        Some(idx) if text.as_bytes()[idx] == b'\n' => LineEnding::Lf,
        Some(idx) if text.as_bytes().get(idx + 1) == Some(&b'\n') => LineEnding::CrLf,
        Some(_) => LineEnding::Cr,
        None => LineEnding::Lf,
    }
}

fn normalize_newlines(input: &str) -> String {
    if !input.contains('\r') {
        return input.to_owned();
    }
    input.replace("\r\n", "\n").replace('\r', "\n")
}
