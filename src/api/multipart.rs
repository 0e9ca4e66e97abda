//! Minimal `multipart/form-data` reader for upload requests.

use anyhow::{anyhow, Result};

/// Upper bound on headers inside one part.
const MAX_PART_HEADER_BYTES: usize = 4096;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormPart {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// Extract the boundary from a `multipart/form-data` content type.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let mut params = split_params(content_type).into_iter();
    let mime = params.next()?;
    if !mime.trim().eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params
        .filter_map(|p| {
            let (k, v) = p.split_once('=')?;
            k.trim()
                .eq_ignore_ascii_case("boundary")
                .then(|| unquote(v.trim()).to_string())
        })
        .find(|b| !b.is_empty())
}

/// Split a header value on `;` outside double quotes.
fn split_params(value: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;
    for c in value.chars() {
        match c {
            _ if escaped => {
                current.push(c);
                escaped = false;
            }
            '\\' if in_quotes => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ';' if !in_quotes => out.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    out.push(current);
    out
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

/// Parse a multipart body into its parts, in order.
pub fn parse_multipart(body: &[u8], boundary: &str) -> Result<Vec<FormPart>> {
    let delimiter = format!("--{boundary}");
    let next_delimiter = format!("\r\n--{boundary}");
    let mut cursor = find(body, delimiter.as_bytes(), 0)
        .ok_or_else(|| anyhow!("multipart body has no opening boundary"))?
        + delimiter.len();

    let mut parts = Vec::new();
    loop {
        let rest = &body[cursor..];
        if rest.starts_with(b"--") {
            return Ok(parts);
        }
        if !rest.starts_with(b"\r\n") {
            return Err(anyhow!("malformed multipart boundary line"));
        }
        let header_start = cursor + 2;
        let header_end = find(body, b"\r\n\r\n", header_start)
            .ok_or_else(|| anyhow!("multipart part is missing its header terminator"))?;
        if header_end - header_start > MAX_PART_HEADER_BYTES {
            return Err(anyhow!("multipart part headers too large"));
        }
        let headers = String::from_utf8_lossy(&body[header_start..header_end]);
        let data_start = header_end + 4;
        let data_end = find(body, next_delimiter.as_bytes(), data_start)
            .ok_or_else(|| anyhow!("multipart body is missing its closing boundary"))?;

        if let Some(part) = build_part(&headers, &body[data_start..data_end]) {
            parts.push(part);
        }
        cursor = data_end + next_delimiter.len();
    }
}

fn build_part(headers: &str, data: &[u8]) -> Option<FormPart> {
    let mut name = None;
    let mut filename = None;
    let mut content_type = None;
    for line in headers.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key.eq_ignore_ascii_case("content-disposition") {
            for param in split_params(value).into_iter().skip(1) {
                let Some((k, v)) = param.split_once('=') else {
                    continue;
                };
                let v = unquote(v.trim()).to_string();
                match k.trim().to_ascii_lowercase().as_str() {
                    "name" => name = Some(v),
                    "filename" => filename = Some(v),
                    _ => {}
                }
            }
        } else if key.eq_ignore_ascii_case("content-type") {
            content_type = Some(value.trim().to_string());
        }
    }
    Some(FormPart {
        name: name?,
        filename,
        content_type,
        data: data.to_vec(),
    })
}
