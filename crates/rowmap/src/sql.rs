//! SQL text scanning and rewriting.
//!
//! The binder never parses SQL. It recognizes a handful of placeholder forms:
//!
//! - `@name`, `:name`, `?name` - named parameter references
//! - `{=name}` - a literal token replaced by the member's invariant text
//! - `?name?` - a pseudo-positional reference rewritten to a bare `?`
//!
//! Patterns are compiled once and shared for the lifetime of the process.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use rowmap_core::{BindTarget, CommandKind, Error, Parameter, Result, UsageErrorKind};

fn compiled(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Result<&'static Regex> {
    cell.get_or_init(|| match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            tracing::warn!(pattern, error = %e, "SQL token pattern failed to compile");
            None
        }
    })
    .as_ref()
    .ok_or_else(|| Error::Custom(format!("invalid SQL token pattern: {}", pattern)))
}

macro_rules! static_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> Result<&'static Regex> {
            static CELL: OnceLock<Option<Regex>> = OnceLock::new();
            compiled(&CELL, $pattern)
        }
    };
}

static_regex!(reference_regex, r"[?@:]([\p{L}\p{N}_]+)");
static_regex!(literal_regex, r"\{=([\p{L}\p{N}_]+)\}");
static_regex!(pseudo_positional_regex, r"\?([\p{L}_][\p{L}\p{N}_]*)\?");
static_regex!(
    named_list_regex,
    r"([?@:])([\p{L}\p{N}_]+)((?i:\s+unknown)\b)?"
);
static_regex!(
    positional_list_regex,
    r"\?([\p{L}\p{N}_]+)\?((?i:\s+unknown)\b)?"
);

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn preceded_by_word(sql: &str, at: usize) -> bool {
    sql[..at].chars().next_back().is_some_and(is_word)
}

/// Whether the text uses anonymous placeholders: a `?`, `@` or `:` with no
/// identifier character (or `@`) on either side.
pub fn looks_positional(sql: &str) -> bool {
    let adjacent = |c: Option<char>| c.is_some_and(|c| is_word(c) || c == '@');
    let chars: Vec<char> = sql.chars().collect();
    chars.iter().enumerate().any(|(i, &c)| {
        matches!(c, '?' | '@' | ':')
            && !adjacent(i.checked_sub(1).map(|p| chars[p]))
            && !adjacent(chars.get(i + 1).copied())
    })
}

/// Lower-cased names referenced as `[?@:]name`.
pub fn referenced_names(sql: &str) -> Result<HashSet<String>> {
    Ok(reference_regex()?
        .captures_iter(sql)
        .map(|caps| caps[1].to_lowercase())
        .collect())
}

/// Whether the text contains a `?name?` token.
pub fn has_pseudo_positional(sql: &str) -> Result<bool> {
    Ok(pseudo_positional_regex()?.is_match(sql))
}

/// Expand every reference to list parameter `name` into `count` numbered references.
///
/// `(@ids)` style references become `(@ids1,@ids2,...)`; a reference followed
/// by the `unknown` optimizer hint becomes `@ids1 unknown,@ids2 unknown,...`.
/// An empty list becomes `(SELECT @ids WHERE 1 = 0)` unless hinted. With
/// `by_position` the `?ids?` form is rewritten instead.
pub fn expand_list(sql: &str, name: &str, count: usize, by_position: bool) -> Result<String> {
    let expanded = if by_position {
        positional_list_regex()?.replace_all(sql, |caps: &Captures<'_>| {
            if !caps[1].eq_ignore_ascii_case(name) {
                return caps[0].to_string();
            }
            let numbered = |i: usize| format!("?{}{}?", name, i);
            render_list(&caps[0], &format!("?{}?", name), caps.get(2), count, numbered)
        })
    } else {
        named_list_regex()?.replace_all(sql, |caps: &Captures<'_>| {
            if !caps[2].eq_ignore_ascii_case(name) {
                return caps[0].to_string();
            }
            let reference = format!("{}{}", &caps[1], &caps[2]);
            let numbered = |i: usize| format!("{}{}", reference, i);
            render_list(&caps[0], &reference, caps.get(3), count, numbered)
        })
    };
    Ok(expanded.into_owned())
}

fn render_list(
    matched: &str,
    reference: &str,
    hint: Option<regex::Match<'_>>,
    count: usize,
    numbered: impl Fn(usize) -> String,
) -> String {
    match (count, hint) {
        (0, Some(_)) => matched.to_string(),
        (0, None) => format!("(SELECT {} WHERE 1 = 0)", reference),
        (_, Some(hint)) => (1..=count)
            .map(|i| format!("{}{}", numbered(i), hint.as_str()))
            .collect::<Vec<_>>()
            .join(","),
        (_, None) => format!(
            "({})",
            (1..=count).map(numbered).collect::<Vec<_>>().join(",")
        ),
    }
}

/// Replace `{=name}` tokens with the text returned by `lookup`.
///
/// Tokens preceded by an identifier character, and tokens for which `lookup`
/// returns `None`, are left untouched.
pub fn substitute_literals<F>(sql: &str, mut lookup: F) -> Result<String>
where
    F: FnMut(&str) -> Result<Option<String>>,
{
    let mut out = String::with_capacity(sql.len());
    let mut last = 0;
    for caps in literal_regex()?.captures_iter(sql) {
        let Some(token) = caps.get(0) else {
            continue;
        };
        if preceded_by_word(sql, token.start()) {
            continue;
        }
        if let Some(text) = lookup(&caps[1])? {
            out.push_str(&sql[last..token.start()]);
            out.push_str(&text);
            last = token.end();
        }
    }
    out.push_str(&sql[last..]);
    Ok(out)
}

/// The names of the `{=name}` tokens in the text.
pub fn literal_tokens(sql: &str) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for caps in literal_regex()?.captures_iter(sql) {
        let Some(token) = caps.get(0) else {
            continue;
        };
        if !preceded_by_word(sql, token.start()) && !names.iter().any(|n: &String| n == &caps[1]) {
            names.push(caps[1].to_string());
        }
    }
    Ok(names)
}

/// Rewrite `?name?` tokens to `?` and reorder the bound parameters to match.
///
/// Only text commands are rewritten. Tokens with no bound parameter are left
/// as they are. When at least one token matched, the command keeps only the
/// matched parameters, in token order.
pub fn rewrite_pseudo_positional(target: &mut dyn BindTarget) -> Result<()> {
    if target.command_kind() != CommandKind::Text {
        return Ok(());
    }
    let regex = pseudo_positional_regex()?;
    let sql = target.command_text().to_string();
    if !regex.is_match(&sql) {
        return Ok(());
    }

    let mut pending: Vec<Parameter> = target.parameters().iter().cloned().collect();
    let mut consumed: HashSet<String> = HashSet::new();
    let mut ordered: Vec<Parameter> = Vec::new();
    let mut out = String::with_capacity(sql.len());
    let mut last = 0;

    for caps in regex.captures_iter(&sql) {
        let Some(token) = caps.get(0) else {
            continue;
        };
        let key = &caps[1];
        if !consumed.insert(key.to_string()) {
            return Err(Error::usage(
                UsageErrorKind::DuplicatePositional,
                "When passing parameters by position, each parameter can only be referenced once",
            ));
        }
        if let Some(i) = pending.iter().position(|p| p.name == key) {
            ordered.push(pending.remove(i));
            out.push_str(&sql[last..token.start()]);
            out.push('?');
            last = token.end();
        }
    }

    if ordered.is_empty() {
        return Ok(());
    }
    out.push_str(&sql[last..]);
    target.set_command_text(out);
    let parameters = target.parameters_mut();
    parameters.clear();
    for parameter in ordered {
        parameters.add(parameter);
    }
    Ok(())
}
