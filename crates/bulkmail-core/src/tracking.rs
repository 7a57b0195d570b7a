//! Open tracking pixel

use bulkmail_common::types::EmailLogId;

/// 1x1 transparent GIF served for every open request
pub const TRACKING_PIXEL: [u8; 43] = [
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

/// URL of the pixel for one email log entry
pub fn pixel_url(public_base_url: &str, log_id: EmailLogId) -> String {
    format!(
        "{}/api/track/open/{}",
        public_base_url.trim_end_matches('/'),
        log_id
    )
}

/// Append the pixel image to an HTML body
pub fn append_pixel(html: &str, url: &str) -> String {
    let img = format!(
        r#"<img src="{}" width="1" height="1" alt="" style="display:none" />"#,
        url
    );
    match html.rfind("</body>") {
        Some(idx) => format!("{}{}{}", &html[..idx], img, &html[idx..]),
        None => format!("{}{}", html, img),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pixel_is_gif() {
        assert_eq!(&TRACKING_PIXEL[..6], b"GIF89a");
        assert_eq!(TRACKING_PIXEL[42], 0x3b);
    }

    #[test]
    fn test_append_pixel_inside_body() {
        let id = uuid::Uuid::nil();
        let url = pixel_url("http://localhost:5000/", id);
        assert_eq!(
            url,
            "http://localhost:5000/api/track/open/00000000-0000-0000-0000-000000000000"
        );

        let html = append_pixel("<html><body><p>Hi</p></body></html>", &url);
        assert!(html.ends_with(&format!(
            r#"<img src="{}" width="1" height="1" alt="" style="display:none" /></body></html>"#,
            url
        )));
        assert_eq!(append_pixel("<p>Hi</p>", "u"), r#"<p>Hi</p><img src="u" width="1" height="1" alt="" style="display:none" />"#);
    }
}
