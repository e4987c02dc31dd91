//! Chart artifact validation.
//!
//! When a module declares the `charts` capability, every emitted chart
//! is checked: the declared MIME must match the byte signature, the
//! dimensions must be plausible, and the declared series names must be
//! present. Deterministic pixel comparison (pinned backend + fonts +
//! image hash) exists as an opt-in flag and is disabled by default.

use serde::{Deserialize, Serialize};

/// Plausible dimension bounds in pixels.
const MIN_DIMENSION: u32 = 16;
const MAX_DIMENSION: u32 = 10_000;

/// One reason a chart artifact failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChartIssue {
    /// Byte signature does not match the declared MIME.
    SignatureMismatch { declared: String },
    /// Width or height outside the plausible range.
    ImplausibleDimensions { width: u32, height: u32 },
    /// The artifact declares no data series.
    MissingSeries,
    /// The byte stream is too short to carry a valid image.
    Truncated,
}

impl std::fmt::Display for ChartIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChartIssue::SignatureMismatch { declared } => {
                write!(f, "byte signature does not match declared MIME {declared}")
            }
            ChartIssue::ImplausibleDimensions { width, height } => {
                write!(f, "implausible chart dimensions {width}x{height}")
            }
            ChartIssue::MissingSeries => write!(f, "chart declares no data series"),
            ChartIssue::Truncated => write!(f, "chart byte stream is truncated"),
        }
    }
}

/// Content hash used by the deterministic-render mode: when rendering
/// backend and fonts are pinned, re-rendering the same data must
/// reproduce the same bytes.
#[must_use]
pub fn image_hash(bytes: &[u8]) -> String {
    crate::artifact::file_digest(bytes)
}

/// Deterministic-render comparison. Opt-in: callers that pin the
/// rendering stack pass the expected hash; `None` disables the check.
#[must_use]
pub fn check_pinned_render(bytes: &[u8], expected_hash: Option<&str>) -> bool {
    match expected_hash {
        Some(expected) => image_hash(bytes) == expected,
        None => true,
    }
}

fn png_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    // IHDR is the first chunk: width/height at fixed offsets 16..24.
    if bytes.len() < 24 {
        return None;
    }
    let width = u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
    let height = u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
    Some((width, height))
}

/// Walk the JPEG marker stream to the first frame header (SOF0..SOF15,
/// excluding DHT/JPG/DAC) and read its dimensions.
fn jpeg_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    if !bytes.starts_with(&[0xff, 0xd8]) {
        return None;
    }
    let mut i = 2;
    while i + 3 < bytes.len() {
        if bytes[i] != 0xff {
            return None;
        }
        let marker = bytes[i + 1];
        match marker {
            // Fill byte before a marker.
            0xff => i += 1,
            // Standalone markers carry no length field.
            0x01 | 0xd0..=0xd8 => i += 2,
            0xc0..=0xcf if marker != 0xc4 && marker != 0xc8 && marker != 0xcc => {
                if i + 9 > bytes.len() {
                    return None;
                }
                let height = u32::from(u16::from_be_bytes([bytes[i + 5], bytes[i + 6]]));
                let width = u32::from(u16::from_be_bytes([bytes[i + 7], bytes[i + 8]]));
                return Some((width, height));
            }
            _ => {
                if i + 4 > bytes.len() {
                    return None;
                }
                let len = u16::from_be_bytes([bytes[i + 2], bytes[i + 3]]) as usize;
                i += 2 + len;
            }
        }
    }
    None
}

/// Read a numeric `width="..."`/`height="..."` attribute pair from the
/// document head. SVGs sized purely by viewBox carry no such pair and
/// skip the dimension check.
fn svg_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(1024)]);
    let width = svg_attr(&head, "width")?;
    let height = svg_attr(&head, "height")?;
    Some((width, height))
}

fn svg_attr(text: &str, name: &str) -> Option<u32> {
    let needle = format!("{name}=\"");
    let mut from = 0;
    while let Some(rel) = text[from..].find(&needle) {
        let idx = from + rel;
        // Attribute boundary: skip e.g. stroke-width when reading width.
        let at_boundary = idx == 0
            || text[..idx]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_whitespace() || c == '<');
        if at_boundary {
            let rest = &text[idx + needle.len()..];
            let end = rest.find('"')?;
            let value: String = rest[..end]
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            return value.parse::<f64>().ok().map(|v| v.round() as u32);
        }
        from = idx + needle.len();
    }
    None
}

fn matches_signature(mime: &str, bytes: &[u8]) -> bool {
    match mime {
        "image/png" => bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]),
        "image/jpeg" => bytes.starts_with(&[0xff, 0xd8, 0xff]),
        "image/svg+xml" => {
            let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]);
            head.trim_start().starts_with("<?xml") || head.trim_start().starts_with("<svg")
        }
        _ => false,
    }
}

fn svg_has_series(bytes: &[u8], series: &[String]) -> bool {
    let text = String::from_utf8_lossy(bytes);
    series.iter().all(|name| text.contains(name.as_str()))
}

/// Validate one chart artifact; empty result means it passed.
#[must_use]
pub fn validate_chart(mime: &str, bytes: &[u8], series: &[String]) -> Vec<ChartIssue> {
    let mut issues = Vec::new();

    if bytes.len() < 8 {
        issues.push(ChartIssue::Truncated);
        return issues;
    }

    if !matches_signature(mime, bytes) {
        issues.push(ChartIssue::SignatureMismatch {
            declared: mime.to_string(),
        });
        return issues;
    }

    let dimensions = match mime {
        "image/png" => match png_dimensions(bytes) {
            Some(dims) => Some(dims),
            None => {
                issues.push(ChartIssue::Truncated);
                return issues;
            }
        },
        "image/jpeg" => match jpeg_dimensions(bytes) {
            Some(dims) => Some(dims),
            None => {
                issues.push(ChartIssue::Truncated);
                return issues;
            }
        },
        // SVG dimensions are optional attributes; absent means the
        // document scales and the check does not apply.
        "image/svg+xml" => svg_dimensions(bytes),
        _ => None,
    };
    if let Some((width, height)) = dimensions {
        if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&width)
            || !(MIN_DIMENSION..=MAX_DIMENSION).contains(&height)
        {
            issues.push(ChartIssue::ImplausibleDimensions { width, height });
        }
    }

    if series.is_empty() {
        issues.push(ChartIssue::MissingSeries);
    } else if mime == "image/svg+xml" && !svg_has_series(bytes, series) {
        issues.push(ChartIssue::MissingSeries);
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
        bytes.extend_from_slice(&13u32.to_be_bytes());
        bytes.extend_from_slice(b"IHDR");
        bytes.extend_from_slice(&width.to_be_bytes());
        bytes.extend_from_slice(&height.to_be_bytes());
        bytes.extend_from_slice(&[8, 2, 0, 0, 0]);
        bytes
    }

    #[test]
    fn valid_png_passes() {
        let issues = validate_chart("image/png", &png_bytes(640, 480), &["temp".to_string()]);
        assert!(issues.is_empty(), "{issues:?}");
    }

    #[test]
    fn mislabeled_mime_rejected() {
        let issues = validate_chart("image/jpeg", &png_bytes(640, 480), &["temp".to_string()]);
        assert_eq!(
            issues,
            vec![ChartIssue::SignatureMismatch {
                declared: "image/jpeg".to_string()
            }]
        );
    }

    #[test]
    fn absurd_dimensions_rejected() {
        let issues = validate_chart("image/png", &png_bytes(0, 99_999), &["temp".to_string()]);
        assert!(matches!(
            issues[0],
            ChartIssue::ImplausibleDimensions { .. }
        ));
    }

    fn jpeg_bytes(width: u16, height: u16) -> Vec<u8> {
        let mut bytes = vec![0xff, 0xd8];
        // APP0 segment the frame scan must skip over.
        bytes.extend_from_slice(&[0xff, 0xe0, 0x00, 0x04, 0x00, 0x00]);
        // SOF0: length, precision, height, width, component count.
        bytes.extend_from_slice(&[0xff, 0xc0, 0x00, 0x11, 0x08]);
        bytes.extend_from_slice(&height.to_be_bytes());
        bytes.extend_from_slice(&width.to_be_bytes());
        bytes.extend_from_slice(&[0x03, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        bytes
    }

    #[test]
    fn valid_jpeg_passes() {
        let issues = validate_chart("image/jpeg", &jpeg_bytes(640, 480), &["temp".to_string()]);
        assert!(issues.is_empty(), "{issues:?}");
    }

    #[test]
    fn absurd_jpeg_dimensions_rejected() {
        let issues = validate_chart("image/jpeg", &jpeg_bytes(0, 480), &["temp".to_string()]);
        assert_eq!(
            issues,
            vec![ChartIssue::ImplausibleDimensions {
                width: 0,
                height: 480
            }]
        );
    }

    #[test]
    fn jpeg_without_frame_header_is_truncated() {
        let issues = validate_chart(
            "image/jpeg",
            &[0xff, 0xd8, 0xff, 0xe0, 0x00, 0x02],
            &["temp".to_string()],
        );
        assert_eq!(issues, vec![ChartIssue::Truncated]);
    }

    #[test]
    fn svg_declared_dimensions_validated() {
        let good = br#"<svg width="640" height="480"><text>temp</text></svg>"#;
        assert!(validate_chart("image/svg+xml", good, &["temp".to_string()]).is_empty());

        let absurd = br#"<svg width="0" height="99999"><text>temp</text></svg>"#;
        let issues = validate_chart("image/svg+xml", absurd, &["temp".to_string()]);
        assert_eq!(
            issues,
            vec![ChartIssue::ImplausibleDimensions {
                width: 0,
                height: 99_999
            }]
        );
    }

    #[test]
    fn svg_stroke_width_is_not_a_dimension() {
        // Only a real width/height attribute pair triggers the check.
        let svg = br#"<svg viewBox="0 0 10 10"><path stroke-width="0" d="M0 0"/><text>temp</text></svg>"#;
        assert!(validate_chart("image/svg+xml", svg, &["temp".to_string()]).is_empty());
    }

    #[test]
    fn svg_series_names_checked() {
        let svg = br#"<svg><text>temperature</text></svg>"#;
        assert!(validate_chart("image/svg+xml", svg, &["temperature".to_string()]).is_empty());
        assert_eq!(
            validate_chart("image/svg+xml", svg, &["humidity".to_string()]),
            vec![ChartIssue::MissingSeries]
        );
    }

    #[test]
    fn empty_series_rejected() {
        let issues = validate_chart("image/png", &png_bytes(640, 480), &[]);
        assert_eq!(issues, vec![ChartIssue::MissingSeries]);
    }

    #[test]
    fn pinned_render_compares_hashes() {
        let bytes = png_bytes(640, 480);
        let hash = image_hash(&bytes);
        assert!(check_pinned_render(&bytes, Some(&hash)));
        assert!(!check_pinned_render(&bytes, Some("not-the-hash")));
        // Disabled by default.
        assert!(check_pinned_render(&bytes, None));
    }
}
