//! QR challenge rendering.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use qrcode::render::svg;
use qrcode::QrCode;

use linkhub_core::{Error, Result};

const MIN_DIMENSION: u32 = 256;

/// Render a QR payload as an SVG image data URL.
///
/// ```
/// let url = linkhub_session::qr::render_data_url("2@abc").unwrap();
/// assert!(url.starts_with("data:image/svg+xml;base64,"));
/// ```
pub fn render_data_url(payload: &str) -> Result<String> {
    let code = QrCode::new(payload.as_bytes())
        .map_err(|e| Error::Other(format!("Failed to encode QR payload: {}", e)))?;
    let image = code
        .render::<svg::Color>()
        .min_dimensions(MIN_DIMENSION, MIN_DIMENSION)
        .build();
    Ok(format!("data:image/svg+xml;base64,{}", STANDARD.encode(image)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_is_svg() {
        let url = render_data_url("2@abcdef,ghijkl,mnopqr").unwrap();
        let encoded = url.strip_prefix("data:image/svg+xml;base64,").unwrap();
        let svg = String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap();
        assert!(svg.contains("<svg"));
    }

    #[test]
    fn test_oversized_payload_fails() {
        let payload = "x".repeat(8000);
        assert!(render_data_url(&payload).is_err());
    }
}
