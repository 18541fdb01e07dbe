//! Lightweight structural scanner for C source.
//!
//! Not a parser: it understands comments, string and character literals,
//! balanced delimiters and `for` statements, which is all loop extraction
//! needs. Comment masking preserves byte offsets so spans found in masked
//! text index the original text directly.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

static INDUCTION_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:(?:const|unsigned|signed|long|short|int|size_t|real_t|float|double)\s+)*([A-Za-z_]\w*)\s*=")
        .expect("valid induction variable regex")
});

/// A `for` statement located in masked source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSpan {
    /// Offset of the `for` keyword.
    pub start: usize,
    /// Offset one past the end of the loop body.
    pub end: usize,
    /// Text between the header parentheses.
    pub header: Range<usize>,
    /// The body, including braces when present.
    pub body: Range<usize>,
    pub induction_var: Option<String>,
}

impl LoopSpan {
    /// True when `other` lies strictly inside this loop.
    pub fn contains(&self, other: &LoopSpan) -> bool {
        self.start <= other.start && other.end <= self.end && self != other
    }
}

/// Structural queries the extractor needs from a scanner.
///
/// Swapping in a real C front end only requires another implementation of
/// this trait.
pub trait SourceScanner: Send + Sync {
    /// Replace comment bytes with spaces, keeping newlines and byte offsets.
    fn mask_comments(&self, source: &str) -> String;

    /// Offset of the delimiter closing the one at `open`, skipping literals.
    fn matching_close(&self, masked: &str, open: usize) -> Option<usize>;

    /// Every `for` statement in `masked`, in source order.
    fn find_loops(&self, masked: &str) -> Vec<LoopSpan>;
}

/// Brace and paren counting scanner.
#[derive(Debug, Clone, Copy, Default)]
pub struct BraceScanner;

#[derive(Clone, Copy, PartialEq, Eq)]
enum LexState {
    Code,
    LineComment,
    BlockComment,
    Str,
    Char,
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

impl BraceScanner {
    /// Byte offsets of `masked` that are real code (outside string and character literals).
    fn code_mask(masked: &str) -> Vec<bool> {
        let bytes = masked.as_bytes();
        let mut mask = vec![true; bytes.len()];
        let mut state = LexState::Code;
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            match state {
                LexState::Code => {
                    if b == b'"' {
                        state = LexState::Str;
                        mask[i] = false;
                    } else if b == b'\'' {
                        state = LexState::Char;
                        mask[i] = false;
                    }
                }
                LexState::Str | LexState::Char => {
                    mask[i] = false;
                    let close = if state == LexState::Str { b'"' } else { b'\'' };
                    if b == b'\\' && i + 1 < bytes.len() {
                        mask[i + 1] = false;
                        i += 1;
                    } else if b == close || b == b'\n' {
                        state = LexState::Code;
                    }
                }
                LexState::LineComment | LexState::BlockComment => {}
            }
            i += 1;
        }
        mask
    }

    fn skip_whitespace(bytes: &[u8], mut pos: usize) -> usize {
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        pos
    }

    fn is_keyword_at(bytes: &[u8], pos: usize, keyword: &[u8]) -> bool {
        let end = pos + keyword.len();
        end <= bytes.len()
            && &bytes[pos..end] == keyword
            && (pos == 0 || !is_ident_byte(bytes[pos - 1]))
            && (end == bytes.len() || !is_ident_byte(bytes[end]))
    }

    /// End (exclusive) of the statement starting at `pos`, for braceless loop bodies.
    fn statement_end(&self, masked: &str, code: &[bool], pos: usize) -> Option<usize> {
        let bytes = masked.as_bytes();
        if Self::is_keyword_at(bytes, pos, b"for") {
            return self.loop_at(masked, code, pos).map(|l| l.end);
        }
        if bytes.get(pos) == Some(&b'{') {
            return self.matching_close(masked, pos).map(|c| c + 1);
        }
        let mut depth = 0i32;
        for i in pos..bytes.len() {
            if !code[i] {
                continue;
            }
            match bytes[i] {
                b'(' | b'[' => depth += 1,
                b')' | b']' => depth -= 1,
                b';' if depth == 0 => return Some(i + 1),
                _ => {}
            }
        }
        None
    }

    fn loop_at(&self, masked: &str, code: &[bool], start: usize) -> Option<LoopSpan> {
        let bytes = masked.as_bytes();
        let open = Self::skip_whitespace(bytes, start + 3);
        if bytes.get(open) != Some(&b'(') {
            return None;
        }
        let close = self.matching_close(masked, open)?;
        let body_start = Self::skip_whitespace(bytes, close + 1);
        if body_start >= bytes.len() {
            return None;
        }
        let end = self.statement_end(masked, code, body_start)?;
        let header = open + 1..close;
        let induction_var = INDUCTION_VAR
            .captures(&masked[header.clone()])
            .map(|c| c[1].to_string());
        Some(LoopSpan {
            start,
            end,
            header,
            body: body_start..end,
            induction_var,
        })
    }
}

impl SourceScanner for BraceScanner {
    fn mask_comments(&self, source: &str) -> String {
        let bytes = source.as_bytes();
        let mut out = bytes.to_vec();
        let mut state = LexState::Code;
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            let next = bytes.get(i + 1).copied();
            match state {
                LexState::Code => match (b, next) {
                    (b'/', Some(b'/')) => {
                        state = LexState::LineComment;
                        out[i] = b' ';
                        out[i + 1] = b' ';
                        i += 1;
                    }
                    (b'/', Some(b'*')) => {
                        state = LexState::BlockComment;
                        out[i] = b' ';
                        out[i + 1] = b' ';
                        i += 1;
                    }
                    (b'"', _) => state = LexState::Str,
                    (b'\'', _) => state = LexState::Char,
                    _ => {}
                },
                LexState::LineComment => {
                    if b == b'\n' {
                        state = LexState::Code;
                    } else {
                        out[i] = b' ';
                    }
                }
                LexState::BlockComment => {
                    if b == b'*' && next == Some(b'/') {
                        out[i] = b' ';
                        out[i + 1] = b' ';
                        state = LexState::Code;
                        i += 1;
                    } else if b != b'\n' {
                        out[i] = b' ';
                    }
                }
                LexState::Str | LexState::Char => {
                    let close = if state == LexState::Str { b'"' } else { b'\'' };
                    if b == b'\\' {
                        i += 1;
                    } else if b == close || b == b'\n' {
                        state = LexState::Code;
                    }
                }
            }
            i += 1;
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    fn matching_close(&self, masked: &str, open: usize) -> Option<usize> {
        let bytes = masked.as_bytes();
        let (open_b, close_b) = match bytes.get(open)? {
            b'(' => (b'(', b')'),
            b'{' => (b'{', b'}'),
            b'[' => (b'[', b']'),
            _ => return None,
        };
        let code = Self::code_mask(masked);
        let mut depth = 0usize;
        for i in open..bytes.len() {
            if !code[i] {
                continue;
            }
            if bytes[i] == open_b {
                depth += 1;
            } else if bytes[i] == close_b {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
        }
        None
    }

    fn find_loops(&self, masked: &str) -> Vec<LoopSpan> {
        let bytes = masked.as_bytes();
        let code = Self::code_mask(masked);
        let mut loops = Vec::new();
        let mut i = 0;
        while i + 3 <= bytes.len() {
            if code[i] && Self::is_keyword_at(bytes, i, b"for") {
                if let Some(span) = self.loop_at(masked, &code, i) {
                    loops.push(span);
                }
                i += 3;
            } else {
                i += 1;
            }
        }
        loops
    }
}

/// Remove trailing whitespace and collapse runs of blank lines into one.
pub fn collapse_blank_lines(text: &str) -> String {
    let mut out = Vec::new();
    let mut previous_blank = false;
    for line in text.lines() {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            if !previous_blank && !out.is_empty() {
                out.push(String::new());
            }
            previous_blank = true;
        } else {
            out.push(trimmed.to_string());
            previous_blank = false;
        }
    }
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    out.join("\n")
}

/// Dedent `text` to its minimum common indentation and indent it by `indent`.
///
/// Tabs count as four spaces. Other leading whitespace is kept as content.
pub fn reindent(text: &str, indent: &str) -> String {
    let expanded: Vec<String> = text.lines().map(|l| l.replace('\t', "    ")).collect();
    let min_indent = expanded
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start_matches(' ').len())
        .min()
        .unwrap_or(0);
    expanded
        .iter()
        .map(|l| {
            if l.trim().is_empty() {
                String::new()
            } else {
                format!("{}{}", indent, l[min_indent..].trim_end())
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Offset of the first byte of the line containing `pos`.
pub fn line_start(text: &str, pos: usize) -> usize {
    text[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0)
}
