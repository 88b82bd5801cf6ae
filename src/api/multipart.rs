//! Minimal `multipart/form-data` body parser for the upload endpoints.

use anyhow::{anyhow, Result};

/// One form field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Part {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl Part {
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok().map(str::trim)
    }
}

/// Extract the boundary from a `multipart/form-data; boundary=...` header.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let mime = params.next()?.trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| unquote(value.trim()).to_string())
        .filter(|boundary| !boundary.is_empty())
}

pub fn parse(body: &[u8], boundary: &str) -> Result<Vec<Part>> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let mut close = b"\r\n".to_vec();
    close.extend_from_slice(&delimiter);

    let mut pos = find(body, &delimiter, 0).ok_or_else(|| anyhow!("multipart boundary not found"))?;
    let mut parts = Vec::new();
    loop {
        pos += delimiter.len();
        let rest = &body[pos..];
        if rest.starts_with(b"--") {
            return Ok(parts);
        }
        if !rest.starts_with(b"\r\n") {
            return Err(anyhow!("malformed multipart delimiter"));
        }
        pos += 2;

        let header_end =
            find(body, b"\r\n\r\n", pos).ok_or_else(|| anyhow!("unterminated multipart headers"))?;
        let headers = std::str::from_utf8(&body[pos..header_end])
            .map_err(|_| anyhow!("multipart headers are not utf-8"))?;
        let data_start = header_end + 4;
        let data_end = find(body, &close, data_start)
            .ok_or_else(|| anyhow!("multipart body is missing its closing boundary"))?;

        parts.push(parse_part(headers, body[data_start..data_end].to_vec())?);
        pos = data_end + 2;
    }
}

fn parse_part(headers: &str, data: Vec<u8>) -> Result<Part> {
    let mut name = None;
    let mut filename = None;
    let mut content_type = None;
    for line in headers.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key.eq_ignore_ascii_case("content-disposition") {
            for param in value.split(';').skip(1) {
                if let Some((k, v)) = param.trim().split_once('=') {
                    match k.trim().to_ascii_lowercase().as_str() {
                        "name" => name = Some(unquote(v.trim()).to_string()),
                        "filename" => filename = Some(unquote(v.trim()).to_string()),
                        _ => {}
                    }
                }
            }
        } else if key.eq_ignore_ascii_case("content-type") {
            content_type = Some(value.trim().to_string());
        }
    }
    let name = name.ok_or_else(|| anyhow!("multipart part without a name"))?;
    Ok(Part {
        name,
        filename,
        content_type,
        data,
    })
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|idx| idx + from)
}
