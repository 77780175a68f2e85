use url::Url;

use crate::error::RewindResult;

pub fn build_video_url(id: &str) -> String {
    format!("https://www.youtube.com/watch?v={id}")
}

pub fn build_video_live_url(id: &str) -> String {
    format!("https://www.youtube.com/live/{id}")
}

/// Appends `/sq/<n>` to a segment base URL.
pub fn build_segment_url(base: &Url, sq: u64) -> RewindResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
        .pop_if_empty()
        .extend(["sq", &sq.to_string()]);
    Ok(url)
}

/// Extracts the value of a path-encoded parameter, i.e. the path component
/// following `/<name>/`. Segment base URLs carry most of their request
/// parameters this way (`.../itag/244/.../dur/2.000/...`).
pub fn extract_parameter(path: &str, name: &str) -> Option<String> {
    let token = format!("/{name}/");
    let start = path.find(&token)? + token.len();
    let rest = &path[start..];
    let end = rest.find('/').unwrap_or(rest.len());
    Some(rest[..end].to_string())
}

pub fn format_server_address(port: u16) -> String {
    format!("http://localhost:{port}")
}

/// Decodes `%XX` escapes. Invalid escapes are kept as-is.
pub fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Some(byte) = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
