//! Minimal GLSL preprocessor for node sources that need one.
//!
//! Handles object-like `#define`/`#undef` and the conditional directives
//! (`#if`, `#ifdef`, `#ifndef`, `#elif`, `#else`, `#endif`). `#version`,
//! `#extension`, `#pragma` and function-like macros pass through untouched.
//! Removed lines become blank so line numbers in later errors still match.

use std::collections::{HashMap, HashSet};

use crate::error::AstError;

const MAX_EXPANSION_DEPTH: usize = 32;

struct Frame {
    parent_active: bool,
    taken: bool,
    active: bool,
    seen_else: bool,
}

pub fn preprocess(source: &str, defines: &HashMap<String, String>) -> Result<String, AstError> {
    let mut macros: HashMap<String, String> = defines.clone();
    let mut stack: Vec<Frame> = Vec::new();
    let mut out: Vec<String> = Vec::new();

    for (index, line) in join_continuations(source).into_iter().enumerate() {
        let line_no = index + 1;
        let err = |message: String| AstError::Preprocess { line: line_no, message };
        let active = stack.last().is_none_or(|f| f.active);

        let Some(directive) = line.trim_start().strip_prefix('#') else {
            out.push(if active { expand_line(&line, &macros) } else { String::new() });
            continue;
        };
        let directive = directive.trim_start();
        let (name, rest) = split_word(directive);
        let rest = strip_comment(rest).trim();

        match name {
            "ifdef" | "ifndef" => {
                let (ident, _) = split_word(rest);
                if ident.is_empty() {
                    return Err(err(format!("#{name} without a macro name")));
                }
                let defined = macros.contains_key(ident);
                let cond = if name == "ifdef" { defined } else { !defined };
                stack.push(Frame {
                    parent_active: active,
                    taken: cond,
                    active: active && cond,
                    seen_else: false,
                });
            }
            "if" => {
                let cond = active && eval_condition(rest, &macros).map_err(err)?;
                stack.push(Frame {
                    parent_active: active,
                    taken: cond,
                    active: cond,
                    seen_else: false,
                });
            }
            "elif" => {
                let frame = stack.last_mut().ok_or_else(|| err("#elif without #if".to_string()))?;
                if frame.seen_else {
                    return Err(err("#elif after #else".to_string()));
                }
                if frame.taken || !frame.parent_active {
                    frame.active = false;
                } else {
                    let cond = eval_condition(rest, &macros).map_err(err)?;
                    frame.active = cond;
                    frame.taken = cond;
                }
            }
            "else" => {
                let frame = stack.last_mut().ok_or_else(|| err("#else without #if".to_string()))?;
                if frame.seen_else {
                    return Err(err("duplicate #else".to_string()));
                }
                frame.seen_else = true;
                frame.active = frame.parent_active && !frame.taken;
                frame.taken = true;
            }
            "endif" => {
                stack.pop().ok_or_else(|| err("#endif without #if".to_string()))?;
            }
            _ if !active => {}
            "define" => {
                let (ident, value) = split_word(rest);
                if ident.is_empty() {
                    return Err(err("#define without a macro name".to_string()));
                }
                if value.starts_with('(') {
                    // function-like: left for the compiler
                    out.push(line.clone());
                    continue;
                }
                macros.insert(ident.to_string(), value.trim().to_string());
            }
            "undef" => {
                let (ident, _) = split_word(rest);
                macros.remove(ident);
            }
            _ => {
                out.push(line.clone());
                continue;
            }
        }
        out.push(String::new());
    }

    if !stack.is_empty() {
        return Err(AstError::Preprocess {
            line: out.len(),
            message: "unterminated conditional block".to_string(),
        });
    }
    Ok(out.join("\n"))
}

fn join_continuations(source: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut pending = String::new();
    let mut pending_count = 0;
    for raw in source.lines() {
        if let Some(head) = raw.strip_suffix('\\') {
            pending.push_str(head);
            pending_count += 1;
            continue;
        }
        pending.push_str(raw);
        lines.push(std::mem::take(&mut pending));
        // keep the line count stable
        for _ in 0..pending_count {
            lines.push(String::new());
        }
        pending_count = 0;
    }
    if !pending.is_empty() {
        lines.push(pending);
    }
    lines
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// First identifier-ish word and the remainder. The word is empty when the
/// text does not start with an identifier.
fn split_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    let end = text
        .char_indices()
        .find(|(_, c)| !is_ident_char(*c))
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    (&text[..end], &text[end..])
}

fn strip_comment(text: &str) -> &str {
    match text.find("//") {
        Some(i) => &text[..i],
        None => text,
    }
}

fn expand_line(line: &str, macros: &HashMap<String, String>) -> String {
    if macros.is_empty() {
        return line.to_string();
    }
    let mut active = HashSet::new();
    expand(line, macros, &mut active, 0)
}

fn expand(text: &str, macros: &HashMap<String, String>, expanding: &mut HashSet<String>, depth: usize) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        if c == '/' && text[start..].starts_with("//") {
            out.push_str(&text[start..]);
            break;
        }
        if is_ident_start(c) || c.is_ascii_digit() {
            let mut end = start + c.len_utf8();
            while let Some(&(i, next)) = chars.peek() {
                if !is_ident_char(next) && !(c.is_ascii_digit() && next == '.') {
                    break;
                }
                end = i + next.len_utf8();
                chars.next();
            }
            let word = &text[start..end];
            match macros.get(word) {
                Some(value) if is_ident_start(c) && depth < MAX_EXPANSION_DEPTH && !expanding.contains(word) => {
                    expanding.insert(word.to_string());
                    out.push_str(&expand(value, macros, expanding, depth + 1));
                    expanding.remove(word);
                }
                _ => out.push_str(word),
            }
            continue;
        }
        out.push(c);
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(i64),
    Op(&'static str),
    LParen,
    RParen,
}

const OPS: [&str; 16] = [
    "&&", "||", "==", "!=", "<=", ">=", "<", ">", "!", "+", "-", "*", "/", "%", "&", "|",
];

fn tokenize(text: &str, macros: &HashMap<String, String>, depth: usize) -> Result<Vec<Tok>, String> {
    let mut toks = Vec::new();
    let mut rest = text.trim();
    while !rest.is_empty() {
        let c = rest.chars().next().unwrap_or(' ');
        if c.is_whitespace() {
            rest = rest.trim_start();
            continue;
        }
        if c == '(' {
            toks.push(Tok::LParen);
            rest = &rest[1..];
            continue;
        }
        if c == ')' {
            toks.push(Tok::RParen);
            rest = &rest[1..];
            continue;
        }
        if c.is_ascii_digit() {
            let end = rest.find(|ch: char| !ch.is_ascii_alphanumeric()).unwrap_or(rest.len());
            let digits = rest[..end].trim_end_matches(['u', 'U', 'l', 'L']);
            let n = digits
                .parse::<i64>()
                .map_err(|_| format!("invalid integer `{}`", &rest[..end]))?;
            toks.push(Tok::Num(n));
            rest = &rest[end..];
            continue;
        }
        if is_ident_start(c) {
            let (word, after) = split_word(rest);
            rest = after;
            if word == "defined" {
                let trimmed = rest.trim_start();
                let (name, after) = if let Some(inner) = trimmed.strip_prefix('(') {
                    let (name, after) = split_word(inner);
                    let after = after
                        .trim_start()
                        .strip_prefix(')')
                        .ok_or_else(|| "missing `)` after defined".to_string())?;
                    (name, after)
                } else {
                    split_word(trimmed)
                };
                if name.is_empty() {
                    return Err("defined without a macro name".to_string());
                }
                toks.push(Tok::Num(macros.contains_key(name) as i64));
                rest = after;
            } else if let Some(value) = macros.get(word) {
                if depth >= MAX_EXPANSION_DEPTH {
                    return Err(format!("macro `{word}` expands too deeply"));
                }
                toks.extend(tokenize(value, macros, depth + 1)?);
            } else {
                toks.push(Tok::Num(0));
            }
            continue;
        }
        let op = OPS
            .iter()
            .find(|op| rest.starts_with(*op))
            .ok_or_else(|| format!("unexpected `{c}` in condition"))?;
        toks.push(Tok::Op(*op));
        rest = &rest[op.len()..];
    }
    Ok(toks)
}

struct ExprParser {
    toks: Vec<Tok>,
    pos: usize,
}

impl ExprParser {
    fn peek_op(&self) -> Option<&'static str> {
        match self.toks.get(self.pos) {
            Some(Tok::Op(op)) => Some(*op),
            _ => None,
        }
    }

    fn binary(&mut self, level: usize) -> Result<i64, String> {
        const LEVELS: [&[&str]; 8] = [
            &["||"],
            &["&&"],
            &["|"],
            &["&"],
            &["==", "!="],
            &["<", ">", "<=", ">="],
            &["+", "-"],
            &["*", "/", "%"],
        ];
        if level == LEVELS.len() {
            return self.unary();
        }
        let mut lhs = self.binary(level + 1)?;
        while let Some(op) = self.peek_op().filter(|op| LEVELS[level].contains(op)) {
            self.pos += 1;
            let rhs = self.binary(level + 1)?;
            lhs = match op {
                "||" => ((lhs != 0) || (rhs != 0)) as i64,
                "&&" => ((lhs != 0) && (rhs != 0)) as i64,
                "|" => lhs | rhs,
                "&" => lhs & rhs,
                "==" => (lhs == rhs) as i64,
                "!=" => (lhs != rhs) as i64,
                "<" => (lhs < rhs) as i64,
                ">" => (lhs > rhs) as i64,
                "<=" => (lhs <= rhs) as i64,
                ">=" => (lhs >= rhs) as i64,
                "+" => lhs.wrapping_add(rhs),
                "-" => lhs.wrapping_sub(rhs),
                "*" => lhs.wrapping_mul(rhs),
                "/" | "%" if rhs == 0 => return Err("division by zero".to_string()),
                "/" => lhs.wrapping_div(rhs),
                _ => lhs.wrapping_rem(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<i64, String> {
        match self.peek_op() {
            Some("!") => {
                self.pos += 1;
                Ok((self.unary()? == 0) as i64)
            }
            Some("-") => {
                self.pos += 1;
                Ok(self.unary()?.wrapping_neg())
            }
            Some("+") => {
                self.pos += 1;
                self.unary()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<i64, String> {
        let tok = self.toks.get(self.pos).cloned();
        self.pos += 1;
        match tok {
            Some(Tok::Num(n)) => Ok(n),
            Some(Tok::LParen) => {
                let v = self.binary(0)?;
                match self.toks.get(self.pos) {
                    Some(Tok::RParen) => {
                        self.pos += 1;
                        Ok(v)
                    }
                    _ => Err("missing `)`".to_string()),
                }
            }
            Some(other) => Err(format!("unexpected {other:?} in condition")),
            None => Err("incomplete condition".to_string()),
        }
    }
}

fn eval_condition(text: &str, macros: &HashMap<String, String>) -> Result<bool, String> {
    let toks = tokenize(text, macros, 0)?;
    if toks.is_empty() {
        return Err("#if without a condition".to_string());
    }
    let mut parser = ExprParser { toks, pos: 0 };
    let value = parser.binary(0)?;
    if parser.pos != parser.toks.len() {
        return Err("trailing tokens in condition".to_string());
    }
    Ok(value != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(src: &str) -> String {
        preprocess(src, &HashMap::new()).unwrap()
    }

    fn non_blank(s: &str) -> Vec<&str> {
        s.lines().map(str::trim).filter(|l| !l.is_empty()).collect()
    }

    #[test]
    fn ifdef_else_branches() {
        let src = "#define USE_MAP\n#ifdef USE_MAP\nvec4 a;\n#else\nvec4 b;\n#endif\n#ifndef USE_MAP\nvec4 c;\n#endif\n";
        assert_eq!(non_blank(&run(src)), vec!["vec4 a;"]);
    }

    #[test]
    fn if_expressions() {
        let src = "#define LIGHTS 3\n#if defined(LIGHTS) && LIGHTS > 2\nfloat x;\n#elif LIGHTS == 3\nfloat y;\n#else\nfloat z;\n#endif\n#if !defined USE_FOG || (1 + 1 == 3)\nfloat fog;\n#endif\n";
        assert_eq!(non_blank(&run(src)), vec!["float x;", "float fog;"]);
    }

    #[test]
    fn overflowing_division_wraps() {
        let src = "#if (-9223372036854775807 - 1) / -1 < 0\nfloat quotient;\n#endif\n#if (-9223372036854775807 - 1) % -1 == 0\nfloat remainder;\n#endif\n";
        assert_eq!(non_blank(&run(src)), vec!["float quotient;", "float remainder;"]);
    }

    #[test]
    fn nested_inactive_blocks_stay_inactive() {
        let src = "#if 0\n#if 1\nfloat a;\n#else\nfloat b;\n#endif\n#endif\nfloat c;\n";
        assert_eq!(non_blank(&run(src)), vec!["float c;"]);
    }

    #[test]
    fn object_macros_expand_and_undef() {
        let src = "#define SCALE 2.0\n#define DOUBLE SCALE * SCALE\nfloat x = DOUBLE;\n#undef SCALE\nfloat y = SCALE; // SCALE\n";
        assert_eq!(non_blank(&run(src)), vec!["float x = 2.0 * 2.0;", "float y = SCALE; // SCALE"]);
    }

    #[test]
    fn engine_defines_are_seeded() {
        let defines: HashMap<String, String> = [("USE_UV".to_string(), "1".to_string())].into_iter().collect();
        let out = preprocess("#if USE_UV\nin vec2 vUv;\n#endif\n", &defines).unwrap();
        assert_eq!(non_blank(&out), vec!["in vec2 vUv;"]);
    }

    #[test]
    fn passthrough_directives_are_kept() {
        let src = "#version 300 es\n#extension GL_OES_standard_derivatives : enable\n#define SQ(x) ((x) * (x))\nvoid main() {}\n";
        assert_eq!(
            non_blank(&run(src)),
            vec![
                "#version 300 es",
                "#extension GL_OES_standard_derivatives : enable",
                "#define SQ(x) ((x) * (x))",
                "void main() {}"
            ]
        );
    }

    #[test]
    fn line_numbers_are_preserved() {
        let out = run("#ifdef NOPE\nfloat a;\n#endif\nfloat b;\n");
        assert_eq!(out.lines().nth(3), Some("float b;"));
    }

    #[test]
    fn unbalanced_blocks_are_errors() {
        assert!(matches!(
            preprocess("#endif\n", &HashMap::new()),
            Err(AstError::Preprocess { line: 1, .. })
        ));
        assert!(matches!(
            preprocess("#ifdef A\nfloat a;\n", &HashMap::new()),
            Err(AstError::Preprocess { .. })
        ));
        assert!(matches!(
            preprocess("float a;\n#if 1 +\n#endif\n", &HashMap::new()),
            Err(AstError::Preprocess { line: 2, .. })
        ));
    }
}
