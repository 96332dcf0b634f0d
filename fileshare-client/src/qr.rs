use qrcode::{QrCode, render::unicode, types::QrError};

/// Renders `text` as a terminal QR code, two modules per character cell.
pub fn render_qr(text: &str) -> Result<String, QrError> {
    let code = QrCode::new(text.as_bytes())?;
    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}
