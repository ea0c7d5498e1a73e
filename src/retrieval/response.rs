//! Fetched document responses and filename inference.

use std::path::Path;

use url::Url;

/// Extensions accepted as documents.
pub const DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "rtf", "txt", "tif", "tiff", "jpg", "jpeg", "png",
];

/// Filename used when neither the URL nor the response names the document.
pub const FALLBACK_FILENAME: &str = "document.pdf";

/// Result of an authenticated GET.
#[derive(Debug, Clone)]
pub struct DocumentResponse {
    pub url: Url,
    pub status: u16,
    pub content_type: Option<String>,
    /// Filename from `Content-Disposition`, if any.
    pub filename_hint: Option<String>,
    pub body: Vec<u8>,
}

impl DocumentResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Name to save under: a URL last segment carrying a document
    /// extension, then the disposition filename, then any URL last segment,
    /// then [`FALLBACK_FILENAME`].
    pub fn suggested_filename(&self) -> String {
        suggested_filename(&self.url, self.filename_hint.as_deref(), self.content_type.as_deref())
    }
}

/// Parse filename from Content-Disposition header value.
/// Parses both `filename="name.pdf"` and `filename*=UTF-8''name.pdf` formats.
pub fn parse_content_disposition_filename(header: &str) -> Option<String> {
    if let Some(start) = header.find("filename*=") {
        let rest = &header[start + 10..];
        if let Some(quote_start) = rest.find("''") {
            let encoded = rest[quote_start + 2..].split([';', ' ']).next()?;
            if let Ok(decoded) = urlencoding::decode(encoded) {
                let filename = decoded.trim().trim_matches('"').to_string();
                if !filename.is_empty() {
                    return Some(filename);
                }
            }
        }
    }

    if let Some(start) = header.find("filename=") {
        let rest = &header[start + 9..];
        let filename = if let Some(quoted) = rest.strip_prefix('"') {
            quoted.split('"').next()
        } else {
            rest.split([';', ' ']).next()
        };
        if let Some(name) = filename {
            let name = name.trim().to_string();
            if !name.is_empty() {
                return Some(name);
            }
        }
    }

    None
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn is_document_extension(ext: &str) -> bool {
    DOCUMENT_EXTENSIONS.contains(&ext)
}

/// Document extension indicated by a URL: its last path segment, or a
/// query value naming a file.
pub fn document_extension(url: &Url) -> Option<String> {
    let last = url
        .path_segments()
        .and_then(|mut segs| segs.next_back())
        .unwrap_or("");
    if let Some(ext) = extension_of(last).filter(|e| is_document_extension(e)) {
        return Some(ext);
    }
    url.query_pairs()
        .filter_map(|(_, v)| extension_of(&v))
        .find(|e| is_document_extension(e))
}

/// Whether a URL points at something worth fetching.
pub fn is_document_url(url: &Url) -> bool {
    document_extension(url).is_some()
}

/// Pick a recognised extension for a MIME type.
fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let essence = content_type.split(';').next()?.trim().to_ascii_lowercase();
    if essence == "application/pdf" {
        return Some("pdf");
    }
    mime_guess::get_mime_extensions_str(&essence)?
        .iter()
        .copied()
        .find(|e| is_document_extension(e))
}

pub fn suggested_filename(url: &Url, hint: Option<&str>, content_type: Option<&str>) -> String {
    let from_url = url
        .path_segments()
        .and_then(|mut segs| segs.next_back())
        .map(|seg| {
            urlencoding::decode(seg)
                .map(|c| c.into_owned())
                .unwrap_or_else(|_| seg.to_string())
        })
        .filter(|seg| !seg.trim().is_empty());

    let hint = hint.map(str::to_string).filter(|h| !h.trim().is_empty());
    let url_has_extension = from_url
        .as_deref()
        .and_then(extension_of)
        .is_some_and(|e| is_document_extension(&e));

    let name = if url_has_extension {
        from_url
    } else {
        hint.or(from_url)
    };
    let name = name
        .map(|n| sanitize_filename(&n))
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string());

    if extension_of(&name).is_some() {
        return name;
    }
    match content_type.and_then(extension_for_content_type) {
        Some(ext) => format!("{}.{}", name, ext),
        None => name,
    }
}

/// Sanitize a filename for safe filesystem storage.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = sanitized.trim().trim_matches('_').trim_start_matches('.');
    if trimmed.is_empty() {
        return FALLBACK_FILENAME.to_string();
    }
    if trimmed.chars().count() <= 100 {
        return trimmed.to_string();
    }

    // keep the extension when shortening
    match trimmed.rsplit_once('.') {
        Some((stem, ext)) if ext.len() <= 5 => {
            let stem: String = stem.chars().take(100 - ext.len() - 1).collect();
            format!("{}.{}", stem, ext)
        }
        _ => trimmed.chars().take(100).collect(),
    }
}
