//! Request bodies and multipart composition.
//!
//! # Design
//! A request carries exactly one `BodyKind`, chosen by its constructor and
//! never changed afterwards. Multipart bodies record their parts in order
//! together with a boundary token that is unique per body and absent from
//! every part, so the host can serialize them with `MultipartBody::encode`
//! at send time.

use std::collections::BTreeMap;
use std::path::PathBuf;

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

/// Content type used for JSON metadata parts.
pub const METADATA_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Fallback content type for binary data of unknown kind.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// The payload of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyKind {
    Empty,
    StructuredPayload(serde_json::Value),
    BinaryData {
        data: Bytes,
        content_type: String,
        content_disposition: ContentDisposition,
    },
    FileUpload {
        file: PathBuf,
        content_type: String,
    },
    Multipart(MultipartBody),
}

impl BodyKind {
    pub fn is_empty(&self) -> bool {
        matches!(self, BodyKind::Empty)
    }

    /// Content type the host should send for this body, if any.
    pub fn content_type(&self) -> Option<String> {
        match self {
            BodyKind::Empty => None,
            BodyKind::StructuredPayload(_) => Some(METADATA_CONTENT_TYPE.to_string()),
            BodyKind::BinaryData { content_type, .. } | BodyKind::FileUpload { content_type, .. } => {
                Some(content_type.clone())
            }
            BodyKind::Multipart(multipart) => Some(multipart.content_type_header()),
        }
    }
}

/// Parameters of a `Content-Disposition` header (RFC 2183).
///
/// Keys are kept sorted so the rendered header is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentDisposition(BTreeMap<String, String>);

impl ContentDisposition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter. An empty value renders as a bare token.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Render as a header value, e.g. `zasset;conv_id=42`.
    pub fn header_value(&self) -> Option<String> {
        if self.0.is_empty() {
            return None;
        }
        let rendered: Vec<String> = self
            .0
            .iter()
            .map(|(key, value)| {
                if value.is_empty() {
                    key.clone()
                } else {
                    format!("{key}={value}")
                }
            })
            .collect();
        Some(rendered.join(";"))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ContentDisposition {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// One part of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartItem {
    pub content_type: String,
    pub data: Bytes,
    pub headers: Vec<(String, String)>,
}

impl MultipartItem {
    pub fn new(content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            data: data.into(),
            headers: Vec::new(),
        }
    }
}

/// Ordered parts plus the boundary they are serialized with.
#[derive(Debug, Clone)]
pub struct MultipartBody {
    boundary: String,
    parts: Vec<MultipartItem>,
}

impl MultipartBody {
    pub fn new(parts: Vec<MultipartItem>) -> Self {
        let boundary = unique_boundary(&parts);
        Self { boundary, parts }
    }

    /// Image part first, metadata part second.
    pub fn image_with_metadata(
        image: Bytes,
        metadata: Bytes,
        metadata_content_type: &str,
        media_content_type: &str,
    ) -> Self {
        Self::new(vec![
            MultipartItem::new(media_content_type, image),
            MultipartItem::new(metadata_content_type, metadata),
        ])
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn parts(&self) -> &[MultipartItem] {
        &self.parts
    }

    pub fn content_type_header(&self) -> String {
        format!("multipart/mixed; boundary={}", self.boundary)
    }

    /// Serialize the parts in recorded order.
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::new();
        for part in &self.parts {
            out.put_slice(format!("--{}\r\n", self.boundary).as_bytes());
            out.put_slice(format!("Content-Type: {}\r\n", part.content_type).as_bytes());
            out.put_slice(format!("Content-Length: {}\r\n", part.data.len()).as_bytes());
            for (key, value) in &part.headers {
                out.put_slice(format!("{key}: {value}\r\n").as_bytes());
            }
            out.put_slice(b"\r\n");
            out.put_slice(&part.data);
            out.put_slice(b"\r\n");
        }
        out.put_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        out.freeze()
    }
}

// Boundaries differ per instance; two bodies with the same parts are the same body.
impl PartialEq for MultipartBody {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
    }
}

fn unique_boundary(parts: &[MultipartItem]) -> String {
    loop {
        let candidate = format!("frontier{}", Uuid::new_v4().simple());
        let needle = candidate.as_bytes();
        let clashes = parts.iter().any(|part| {
            part.data.windows(needle.len()).any(|window| window == needle)
        });
        if !clashes {
            return candidate;
        }
    }
}

/// Guess an image content type from its leading bytes.
pub fn sniff_image_content_type(data: &[u8]) -> &'static str {
    if data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        "image/png"
    } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        "image/gif"
    } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        "image/webp"
    } else {
        OCTET_STREAM
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_and_metadata() -> MultipartBody {
        MultipartBody::image_with_metadata(
            Bytes::from(vec![0xFF; 10]),
            Bytes::from_static(br#"{"tag":"x"}"#),
            "application/json",
            "image/jpeg",
        )
    }

    #[test]
    fn image_part_precedes_metadata_part() {
        let body = image_and_metadata();
        let parts = body.parts();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].content_type, "image/jpeg");
        assert_eq!(parts[0].data.as_ref(), &[0xFF; 10]);
        assert_eq!(parts[1].content_type, "application/json");
        assert_eq!(parts[1].data.as_ref(), br#"{"tag":"x"}"#);
    }

    #[test]
    fn boundary_does_not_occur_in_parts() {
        let body = image_and_metadata();
        let needle = body.boundary().as_bytes();
        for part in body.parts() {
            assert!(!part.data.windows(needle.len()).any(|w| w == needle));
        }
    }

    #[test]
    fn boundary_is_unique_per_instance() {
        assert_ne!(image_and_metadata().boundary(), image_and_metadata().boundary());
    }

    #[test]
    fn bodies_with_same_parts_are_equal_despite_boundaries() {
        assert_eq!(image_and_metadata(), image_and_metadata());
    }

    #[test]
    fn encode_writes_parts_in_order() {
        let body = image_and_metadata();
        let encoded = body.encode();
        let boundary = body.boundary().as_bytes();
        let text = String::from_utf8_lossy(&encoded);
        let image_at = text.find("Content-Type: image/jpeg").unwrap();
        let metadata_at = text.find("Content-Type: application/json").unwrap();
        assert!(image_at < metadata_at);
        assert!(encoded.starts_with(b"--"));
        assert!(encoded[2..].starts_with(boundary));
        assert!(text.ends_with(&format!("--{}--\r\n", body.boundary())));
        assert!(text.contains("Content-Length: 10\r\n"));
    }

    #[test]
    fn content_type_header_names_boundary() {
        let body = image_and_metadata();
        assert_eq!(
            body.content_type_header(),
            format!("multipart/mixed; boundary={}", body.boundary())
        );
    }

    #[test]
    fn content_disposition_renders_sorted_parameters() {
        let disposition = ContentDisposition::new()
            .with("zasset", "")
            .with("conv_id", "42")
            .with("inline", "true");
        assert_eq!(
            disposition.header_value().as_deref(),
            Some("conv_id=42;inline=true;zasset")
        );
        assert!(ContentDisposition::new().header_value().is_none());
    }

    #[test]
    fn sniffs_common_image_formats() {
        assert_eq!(
            sniff_image_content_type(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0]),
            "image/png"
        );
        assert_eq!(sniff_image_content_type(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
        assert_eq!(sniff_image_content_type(b"GIF89a...."), "image/gif");
        assert_eq!(sniff_image_content_type(b"RIFF\0\0\0\0WEBPVP8 "), "image/webp");
        assert_eq!(sniff_image_content_type(b"plain"), OCTET_STREAM);
    }

    #[test]
    fn body_content_types() {
        assert!(BodyKind::Empty.content_type().is_none());
        assert_eq!(
            BodyKind::StructuredPayload(serde_json::json!({})).content_type().as_deref(),
            Some(METADATA_CONTENT_TYPE)
        );
        let multipart = image_and_metadata();
        let expected = multipart.content_type_header();
        assert_eq!(BodyKind::Multipart(multipart).content_type(), Some(expected));
    }
}
