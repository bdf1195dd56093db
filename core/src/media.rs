//! Content envelopes: the parts a message is built from.
//!
//! A part is either plain text or a piece of media (image, audio, video,
//! document) that is referenced by URI or carried inline as base64.

use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

const DEFAULT_MIME: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    Text { text: String },
    Image(MediaSource),
    Audio(MediaSource),
    Video(MediaSource),
    Document(MediaSource),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    Document,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaSource {
    pub mime: String,
    #[serde(flatten)]
    pub location: Location,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<MediaMeta>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Uri(String),
    /// Base64 payload without the `data:` prefix.
    Data(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn media(kind: MediaKind, source: MediaSource) -> Self {
        match kind {
            MediaKind::Image => Self::Image(source),
            MediaKind::Audio => Self::Audio(source),
            MediaKind::Video => Self::Video(source),
            MediaKind::Document => Self::Document(source),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn kind(&self) -> Option<MediaKind> {
        match self {
            Self::Text { .. } => None,
            Self::Image(_) => Some(MediaKind::Image),
            Self::Audio(_) => Some(MediaKind::Audio),
            Self::Video(_) => Some(MediaKind::Video),
            Self::Document(_) => Some(MediaKind::Document),
        }
    }

    pub fn source(&self) -> Option<&MediaSource> {
        match self {
            Self::Text { .. } => None,
            Self::Image(s) | Self::Audio(s) | Self::Video(s) | Self::Document(s) => Some(s),
        }
    }

    /// Builds a media part from a URI, a `data:` URL, or a bare base64
    /// payload whose content type can be recognised from its leading bytes.
    pub fn from_uri_or_data(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::InvalidMedia("empty media reference".into()));
        }

        if let Some(rest) = input.strip_prefix("data:") {
            return Self::from_data_url(rest);
        }

        // Single-letter schemes are Windows drive letters, not URIs.
        if let Ok(url) = reqwest::Url::parse(input)
            && url.scheme().len() > 1
        {
            let mime = mime_from_path(url.path());
            return Ok(Self::media(
                kind_for_mime(mime),
                MediaSource::uri(input, mime),
            ));
        }

        let bytes = STANDARD.decode(input).map_err(|_| {
            Error::InvalidMedia(format!(
                "'{}' is neither a URI nor base64 data",
                preview(input)
            ))
        })?;
        let mime = sniff_mime(&bytes).ok_or_else(|| {
            Error::InvalidMedia("inline data has an unrecognised content type".into())
        })?;

        Ok(Self::media(kind_for_mime(mime), MediaSource::data(input, mime)))
    }

    fn from_data_url(rest: &str) -> Result<Self> {
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| Error::InvalidMedia("data URL has no payload".into()))?;
        let header = header
            .strip_suffix(";base64")
            .ok_or_else(|| Error::InvalidMedia("data URL must be base64 encoded".into()))?;

        let bytes = STANDARD
            .decode(payload)
            .map_err(|e| Error::InvalidMedia(format!("data URL payload: {e}")))?;

        let mime = if header.is_empty() {
            sniff_mime(&bytes).unwrap_or(DEFAULT_MIME).to_string()
        } else {
            header.to_string()
        };

        Ok(Self::media(
            kind_for_mime(&mime),
            MediaSource::data(payload, mime),
        ))
    }
}

impl MediaSource {
    pub fn uri(uri: impl Into<String>, mime: impl Into<String>) -> Self {
        Self {
            mime: mime.into(),
            location: Location::Uri(uri.into()),
            meta: None,
        }
    }

    pub fn data(base64: impl Into<String>, mime: impl Into<String>) -> Self {
        Self {
            mime: mime.into(),
            location: Location::Data(base64.into()),
            meta: None,
        }
    }

    pub fn with_meta(mut self, meta: MediaMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    /// URI for references, `data:` URL for inline payloads.
    pub fn to_url(&self) -> String {
        match &self.location {
            Location::Uri(uri) => uri.clone(),
            Location::Data(data) => format!("data:{};base64,{}", self.mime, data),
        }
    }
}

pub fn kind_for_mime(mime: &str) -> MediaKind {
    match mime.split('/').next() {
        Some("image") => MediaKind::Image,
        Some("audio") => MediaKind::Audio,
        Some("video") => MediaKind::Video,
        _ => MediaKind::Document,
    }
}

fn mime_from_path(path: &str) -> &'static str {
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "m4a" => "audio/mp4",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        "json" => "application/json",
        _ => DEFAULT_MIME,
    }
}

fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    let riff_kind = bytes.get(8..12);
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => Some("image/png"),
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        [b'G', b'I', b'F', b'8', ..] => Some("image/gif"),
        [b'%', b'P', b'D', b'F', ..] => Some("application/pdf"),
        [b'I', b'D', b'3', ..] => Some("audio/mpeg"),
        [b'R', b'I', b'F', b'F', ..] if riff_kind == Some(&b"WEBP"[..]) => Some("image/webp"),
        [b'R', b'I', b'F', b'F', ..] if riff_kind == Some(&b"WAVE"[..]) => Some("audio/wav"),
        [_, _, _, _, b'f', b't', b'y', b'p', ..] => Some("video/mp4"),
        _ => None,
    }
}

fn preview(input: &str) -> String {
    let head: String = input.chars().take(32).collect();
    if head.len() < input.len() {
        format!("{head}...")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn uri_with_image_extension() {
        let part = ContentPart::from_uri_or_data("https://example.com/cat.JPG").unwrap();
        assert_eq!(part.kind(), Some(MediaKind::Image));
        let source = part.source().unwrap();
        assert_eq!(source.mime, "image/jpeg");
        assert_eq!(
            source.location,
            Location::Uri("https://example.com/cat.JPG".into())
        );
    }

    #[test]
    fn uri_without_extension_is_document() {
        let part = ContentPart::from_uri_or_data("gs://bucket/object").unwrap();
        assert_eq!(part.kind(), Some(MediaKind::Document));
        assert_eq!(part.source().unwrap().mime, DEFAULT_MIME);
    }

    #[test]
    fn data_url_is_decoded_and_kept() {
        let payload = STANDARD.encode(b"RIFF\0\0\0\0WAVEfmt ");
        let part =
            ContentPart::from_uri_or_data(&format!("data:audio/wav;base64,{payload}")).unwrap();
        assert_eq!(part.kind(), Some(MediaKind::Audio));
        assert_eq!(part.source().unwrap().location, Location::Data(payload));
    }

    #[test]
    fn bare_base64_is_sniffed() {
        let payload = STANDARD.encode(PNG_HEADER);
        let part = ContentPart::from_uri_or_data(&payload).unwrap();
        assert_eq!(part.kind(), Some(MediaKind::Image));
        assert_eq!(
            part.source().unwrap().to_url(),
            format!("data:image/png;base64,{payload}")
        );
    }

    #[test]
    fn rejects_garbage() {
        for input in ["", "not a uri at all", "relative/path.png", "data:image/png,raw"] {
            let err = ContentPart::from_uri_or_data(input).unwrap_err();
            assert!(matches!(err, Error::InvalidMedia(_)), "{input}: {err}");
        }
    }

    #[test]
    fn rejects_unrecognised_inline_bytes() {
        let payload = STANDARD.encode(b"just some plain bytes");
        assert!(matches!(
            ContentPart::from_uri_or_data(&payload),
            Err(Error::InvalidMedia(_))
        ));
    }

    #[test]
    fn envelope_serializes_with_type_tag() {
        let part = ContentPart::media(
            MediaKind::Image,
            MediaSource::uri("https://example.com/a.png", "image/png").with_meta(MediaMeta {
                width: Some(640),
                height: Some(480),
                ..Default::default()
            }),
        );
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(value["type"], "image");
        assert_eq!(value["uri"], "https://example.com/a.png");
        assert_eq!(value["meta"]["width"], 640);

        let back: ContentPart = serde_json::from_value(value).unwrap();
        assert_eq!(back, part);
    }
}
