// Slice-based STOMP frame parser (produces owned Vecs from input slices)

/// A frame cut out of the read buffer, before any text decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub command: Vec<u8>,
    pub headers: Vec<(Vec<u8>, Vec<u8>)>,
    pub body: Vec<u8>,
    /// Number of input bytes up to and including the NUL terminator.
    pub consumed: usize,
}

fn content_length(headers: &[(Vec<u8>, Vec<u8>)]) -> Result<Option<usize>, String> {
    // first occurrence wins, like every other repeated header
    let Some((_, v)) = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(b"content-length"))
    else {
        return Ok(None);
    };
    let s = std::str::from_utf8(v).map_err(|e| format!("content-length not utf8: {}", e))?;
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err("empty content-length".to_string());
    }
    trimmed
        .parse::<usize>()
        .map(Some)
        .map_err(|e| format!("invalid content-length '{}': {}", trimmed, e))
}

fn strip_cr(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

/// Parse a single STOMP frame from a raw byte slice.
///
/// Returns `Ok(Some(frame))` when a full frame was parsed, `Ok(None)` when
/// more bytes are required, and `Err` on protocol errors. Leading line feeds
/// are skipped; the codec reports them as heart-beats before calling here.
/// An EOL after the NUL is left in place for the next call.
pub fn parse_frame_slice(input: &[u8]) -> Result<Option<RawFrame>, String> {
    let len = input.len();
    let mut pos = 0usize;
    while pos < len && (input[pos] == b'\n' || input[pos] == b'\r') {
        pos += 1;
    }

    let Some(cmd_end) = input[pos..].iter().position(|&b| b == b'\n') else {
        return Ok(None);
    };
    let command = strip_cr(&input[pos..pos + cmd_end]).to_vec();
    if command.is_empty() {
        return Err("empty command line".to_string());
    }
    pos += cmd_end + 1;

    let mut headers: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    loop {
        if pos >= len {
            return Ok(None);
        }
        let Some(line_end) = input[pos..].iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };
        let line = strip_cr(&input[pos..pos + line_end]);
        pos += line_end + 1;
        if line.is_empty() {
            break;
        }
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            return Err(format!(
                "malformed header line: {:?}",
                String::from_utf8_lossy(line)
            ));
        };
        headers.push((line[..colon].to_vec(), line[colon + 1..].to_vec()));
    }

    let body_len = match content_length(&headers)? {
        Some(n) => {
            let Some(end) = pos.checked_add(n).and_then(|e| e.checked_add(1)) else {
                return Err(format!("content-length out of range: {}", n));
            };
            if end > len {
                return Ok(None);
            }
            if input[pos + n] != 0 {
                return Err("missing NUL terminator after content-length body".to_string());
            }
            n
        }
        None => match input[pos..].iter().position(|&b| b == 0) {
            Some(n) => n,
            None => return Ok(None),
        },
    };

    let body = input[pos..pos + body_len].to_vec();
    Ok(Some(RawFrame {
        command,
        headers,
        body,
        consumed: pos + body_len + 1,
    }))
}

/// Reverse the STOMP 1.2 header escapes (`\\`, `\r`, `\n`, `\c`).
///
/// Any other escape, or a trailing lone backslash, is an error.
pub fn unescape_header_value(input: &[u8]) -> Result<Vec<u8>, String> {
    let mut out = Vec::with_capacity(input.len());
    let mut iter = input.iter();
    while let Some(&b) = iter.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match iter.next() {
            Some(b'\\') => out.push(b'\\'),
            Some(b'r') => out.push(b'\r'),
            Some(b'n') => out.push(b'\n'),
            Some(b'c') => out.push(b':'),
            Some(&other) => {
                return Err(format!("invalid escape sequence '\\{}'", other as char));
            }
            None => return Err("incomplete escape sequence at end of header".to_string()),
        }
    }
    Ok(out)
}
