//! Repair-then-parse ladder for generator output.
//!
//! The upstream generator returns free text that is usually JSON and
//! sometimes truncated mid-stream, fence-wrapped, or littered with trailing
//! commas. Parsing is an ordered list of pure `&str -> Option<Value>`
//! strategies; the first hit wins and the strategy is reported so callers can
//! annotate degraded recoveries.

use serde_json::Value;

use ai_client::util::strip_code_blocks;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStrategy {
    Direct,
    Structural,
    BoundedSubstring,
    PartialArray,
}

impl RepairStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            RepairStrategy::Direct => "direct",
            RepairStrategy::Structural => "structural_repair",
            RepairStrategy::BoundedSubstring => "bounded_substring",
            RepairStrategy::PartialArray => "partial_array",
        }
    }

    /// Degraded recoveries may have dropped elements; callers annotate them.
    pub fn is_degraded(self) -> bool {
        matches!(
            self,
            RepairStrategy::BoundedSubstring | RepairStrategy::PartialArray
        )
    }
}

type ParseAttempt = fn(&str) -> Option<Value>;

const LADDER: &[(RepairStrategy, ParseAttempt)] = &[
    (RepairStrategy::Direct, parse_direct),
    (RepairStrategy::Structural, parse_structural),
    (RepairStrategy::BoundedSubstring, parse_bounded_substring),
    (RepairStrategy::PartialArray, parse_partial_array),
];

/// Parse generator output, repairing if needed. Returns the first strategy
/// that produced a value, or None when nothing could be recovered.
pub fn repair_parse(raw: &str) -> Option<(Value, RepairStrategy)> {
    for (strategy, attempt) in LADDER {
        if let Some(value) = attempt(raw) {
            return Some((value, *strategy));
        }
    }
    None
}

fn parse_direct(raw: &str) -> Option<Value> {
    serde_json::from_str(raw).ok()
}

fn parse_structural(raw: &str) -> Option<Value> {
    let repaired = repair_structure(strip_code_blocks(raw));
    serde_json::from_str(&repaired).ok()
}

/// Balance unclosed braces/brackets and drop trailing commas. String
/// literals are respected: brackets inside them don't touch the stack, and a
/// string cut off by truncation is closed first.
fn repair_structure(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in s.chars() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '{' => {
                stack.push('}');
                out.push(c);
            }
            '[' => {
                stack.push(']');
                out.push(c);
            }
            '}' | ']' => {
                // mismatched closers are dropped
                if stack.last() == Some(&c) {
                    stack.pop();
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }

    if in_string {
        out.push('"');
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }

    strip_trailing_commas(&out)
}

fn strip_trailing_commas(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let mut j = i + 1;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                let dangling = j >= chars.len() || chars[j] == '}' || chars[j] == ']';
                if !dangling {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }

    out
}

/// Best-effort substring between the outermost brace or bracket pair. The
/// container type is decided by whichever opener appears first, so a
/// truncated array is not mistaken for its first object.
fn parse_bounded_substring(raw: &str) -> Option<Value> {
    let s = strip_code_blocks(raw);
    let close = match (s.find('{'), s.find('[')) {
        (Some(obj), Some(arr)) if arr < obj => ']',
        (Some(_), _) => '}',
        (None, Some(_)) => ']',
        (None, None) => return None,
    };
    let start = s.find(if close == '}' { '{' } else { '[' })?;
    let end = s.rfind(close)?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&s[start..=end]).ok()
}

/// Salvage the complete top-level elements of a truncated array. Incomplete
/// trailing elements are dropped. Loses any wrapper object around the array.
fn parse_partial_array(raw: &str) -> Option<Value> {
    let s = strip_code_blocks(raw);
    let start = s.find('[')?;

    let mut elements = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for c in s[start + 1..].chars() {
        if in_string {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                current.push(c);
            }
            '{' | '[' => {
                depth += 1;
                current.push(c);
            }
            ']' if depth == 0 => break,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                current.push(c);
                if depth == 0 {
                    if let Ok(value) = serde_json::from_str::<Value>(current.trim()) {
                        elements.push(value);
                        current.clear();
                    }
                }
            }
            ',' if depth == 0 => current.clear(),
            _ => current.push(c),
        }
    }

    if elements.is_empty() {
        None
    } else {
        Some(Value::Array(elements))
    }
}
