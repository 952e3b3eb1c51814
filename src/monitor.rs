//! MONITOR mode.
//!
//! Once `MONITOR` is acknowledged the server streams one simple string per
//! command it executes, outside any request/reply pairing:
//!
//! ```text
//! 1339518083.107412 [0 127.0.0.1:60866] "keys" "*"
//! ```

/// One command observed through a monitoring connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorEvent {
    /// Server timestamp as sent (seconds, with microseconds).
    pub time: String,
    /// Database and client address, e.g. `0 127.0.0.1:60866`.
    pub source: String,
    /// Command name and arguments, unescaped.
    pub args: Vec<String>,
}

impl MonitorEvent {
    /// Parse a monitor line. `None` when the line is not one.
    pub fn parse(line: &str) -> Option<Self> {
        let (time, rest) = line.split_once(' ')?;
        if time.is_empty() || !time.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
            return None;
        }
        let (source, rest) = rest.strip_prefix('[')?.split_once(']')?;
        Some(Self {
            time: time.to_string(),
            source: source.to_string(),
            args: parse_quoted(rest)?,
        })
    }
}

/// `"set" "k" "a\"b"` → `[set, k, a"b]`.
fn parse_quoted(mut rest: &str) -> Option<Vec<String>> {
    let mut args = Vec::new();
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return Some(args);
        }
        let body = rest.strip_prefix('"')?;
        let mut chars = body.char_indices();
        let mut arg = String::new();
        let end = loop {
            let (i, c) = chars.next()?;
            match c {
                '"' => break i,
                '\\' => match chars.next()?.1 {
                    'n' => arg.push('\n'),
                    'r' => arg.push('\r'),
                    't' => arg.push('\t'),
                    'a' => arg.push('\u{7}'),
                    'b' => arg.push('\u{8}'),
                    'x' => {
                        let hi = chars.next()?.1.to_digit(16)?;
                        let lo = chars.next()?.1.to_digit(16)?;
                        arg.push(char::from((hi * 16 + lo) as u8));
                    }
                    other => arg.push(other),
                },
                c => arg.push(c),
            }
        };
        args.push(arg);
        rest = &body[end + 1..];
    }
}

// ── Tests ──────────────────────────────────────────────────────────
