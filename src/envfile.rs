//! Dotenv-style settings files.
//!
//! One `KEY=value` per line; `#` starts a comment, an optional leading
//! `export ` is ignored, values may be single-quoted (literal) or
//! double-quoted (with `\n`, `\t`, `\\`, `\"` escapes). Variables already
//! present in the process environment are never overridden.

use std::path::Path;

/// Apply every assignment in `path` to the process environment.
/// Returns how many variables were set.
pub fn load(path: &Path) -> Result<usize, String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;

    let mut applied = 0;
    for (index, line) in text.lines().enumerate() {
        let parsed = parse_line(line).map_err(|e| format!("{}:{}: {}", path.display(), index + 1, e))?;
        let Some((key, value)) = parsed else { continue };
        if std::env::var_os(&key).is_none() {
            // Called before any other thread exists.
            unsafe {
                std::env::set_var(&key, value);
            }
            applied += 1;
        }
    }
    Ok(applied)
}

pub fn parse_line(line: &str) -> Result<Option<(String, String)>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);

    let (key, raw) = line
        .split_once('=')
        .ok_or_else(|| "missing '=' in assignment".to_string())?;
    let key = key.trim();
    if key.is_empty() {
        return Err("variable name cannot be empty".to_string());
    }
    if key.chars().any(char::is_whitespace) {
        return Err(format!("variable name contains whitespace: {}", key));
    }
    Ok(Some((key.to_string(), parse_value(raw.trim())?)))
}

fn parse_value(raw: &str) -> Result<String, String> {
    if let Some(rest) = raw.strip_prefix('"') {
        return unquote(rest, '"', true);
    }
    if let Some(rest) = raw.strip_prefix('\'') {
        return unquote(rest, '\'', false);
    }
    Ok(raw.split('#').next().unwrap_or_default().trim_end().to_string())
}

fn unquote(input: &str, quote: char, escapes: bool) -> Result<String, String> {
    let mut out = String::new();
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' if escapes => {
                let escaped = chars
                    .next()
                    .ok_or_else(|| "unterminated escape sequence".to_string())?;
                out.push(match escaped {
                    'n' => '\n',
                    'r' => '\r',
                    't' => '\t',
                    other => other,
                });
            }
            c if c == quote => {
                let rest = chars.as_str().trim();
                if rest.is_empty() || rest.starts_with('#') {
                    return Ok(out);
                }
                return Err(format!("unexpected characters after closing {} quote", quote));
            }
            c => out.push(c),
        }
    }
    Err(format!("unterminated {}-quoted value", quote))
}
