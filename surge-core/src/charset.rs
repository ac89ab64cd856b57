use crate::ValidationError;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// Character encodings understood when turning text into request bytes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Charset {
    #[default]
    Utf8,
    /// Big-endian with a leading byte order mark.
    Utf16,
    Utf16Be,
    Utf16Le,
    Latin1,
    Ascii,
}

impl Charset {
    pub fn name(&self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Utf16 => "UTF-16",
            Charset::Utf16Be => "UTF-16BE",
            Charset::Utf16Le => "UTF-16LE",
            Charset::Latin1 => "ISO-8859-1",
            Charset::Ascii => "US-ASCII",
        }
    }

    /// Encode `text`. Characters the charset cannot represent become `?`.
    ///
    /// UTF-8 text is borrowed as-is.
    pub fn encode<'a>(&self, text: &'a str) -> Cow<'a, [u8]> {
        match self {
            Charset::Utf8 => Cow::Borrowed(text.as_bytes()),
            Charset::Utf16 => {
                let mut out = Vec::with_capacity(2 + text.len() * 2);
                out.extend_from_slice(&[0xFE, 0xFF]);
                out.extend(text.encode_utf16().flat_map(u16::to_be_bytes));
                Cow::Owned(out)
            }
            Charset::Utf16Be => Cow::Owned(text.encode_utf16().flat_map(u16::to_be_bytes).collect()),
            Charset::Utf16Le => Cow::Owned(text.encode_utf16().flat_map(u16::to_le_bytes).collect()),
            Charset::Latin1 => Cow::Owned(narrow(text, 0xFF)),
            Charset::Ascii => {
                if text.is_ascii() {
                    Cow::Borrowed(text.as_bytes())
                } else {
                    Cow::Owned(narrow(text, 0x7F))
                }
            }
        }
    }
}

fn narrow(text: &str, max: u32) -> Vec<u8> {
    text.chars()
        .map(|c| {
            let code = c as u32;
            if code <= max {
                code as u8
            } else {
                b'?'
            }
        })
        .collect()
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Charset {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let charset = match s.trim().to_ascii_uppercase().replace('_', "-").as_str() {
            "UTF-8" | "UTF8" => Charset::Utf8,
            "UTF-16" | "UTF16" => Charset::Utf16,
            "UTF-16BE" => Charset::Utf16Be,
            "UTF-16LE" => Charset::Utf16Le,
            "ISO-8859-1" | "LATIN1" | "LATIN-1" => Charset::Latin1,
            "US-ASCII" | "ASCII" => Charset::Ascii,
            _ => return Err(ValidationError::UnknownCharset(s.to_string())),
        };
        Ok(charset)
    }
}

impl TryFrom<String> for Charset {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Charset> for String {
    fn from(charset: Charset) -> Self {
        charset.name().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_is_borrowed() {
        assert!(matches!(Charset::Utf8.encode("héllo"), Cow::Borrowed(_)));
    }

    #[test]
    fn utf16_variants() {
        assert_eq!(&*Charset::Utf16.encode("A"), &[0xFE, 0xFF, 0x00, 0x41]);
        assert_eq!(&*Charset::Utf16Be.encode("A"), &[0x00, 0x41]);
        assert_eq!(&*Charset::Utf16Le.encode("A"), &[0x41, 0x00]);
    }

    #[test]
    fn narrow_charsets_replace_unmappable() {
        assert_eq!(&*Charset::Latin1.encode("é€"), &[0xE9, b'?']);
        assert_eq!(&*Charset::Ascii.encode("aé"), b"a?");
    }

    #[test]
    fn parse_names() {
        assert_eq!("utf-8".parse::<Charset>().unwrap(), Charset::Utf8);
        assert_eq!("latin1".parse::<Charset>().unwrap(), Charset::Latin1);
        assert_eq!("UTF_16LE".parse::<Charset>().unwrap(), Charset::Utf16Le);
        assert!("EBCDIC".parse::<Charset>().is_err());
    }
}
