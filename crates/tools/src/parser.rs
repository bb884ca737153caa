//! Tool-Call Parser
//!
//! Extracts structured tool calls from model-generated text. Two dialects are
//! understood:
//!
//! - JSON inside `<tool_call>...</tool_call>` tags or ```` ```tool_call ````
//!   fences: `{"name": .., "arguments": {..}}`, also with `tool`/`parameters`
//!   keys, the `{"function": {..}}` envelope, string-encoded arguments, or an
//!   array of calls.
//! - XML: `<function=NAME><parameter=KEY>VALUE</parameter></function>`,
//!   inside or outside a `<tool_call>` tag.
//!
//! JSON blocks that fail to parse go through a cleanup cascade:
//! direct parse, then normalization (entities, smart quotes, bold markers,
//! bareword keys, unescaped backslashes, trailing commas), then escape
//! unwrapping. Structural rewrites only touch text outside string literals;
//! inside them only invalid backslash escapes are repaired.
//! Parsing never fails; an unparseable block is dropped with a diagnostic.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use orchestrator_llm::ToolDefinition;

use crate::executor::ToolResult;

const TOOL_CALL_OPEN: &str = "<tool_call>";
const FUNCTION_OPEN: &str = "<function=";

/// A tool call parsed from model output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedToolCall {
    /// The name of the tool to call
    pub name: String,
    /// Argument object
    pub arguments: Map<String, Value>,
}

impl ParsedToolCall {
    /// Arguments as a JSON value, for handing to the registry.
    pub fn arguments_value(&self) -> Value {
        Value::Object(self.arguments.clone())
    }
}

struct Patterns {
    block: Regex,
    function: Regex,
    parameter: Regex,
    bold_before_word: Regex,
    bold_after_word: Regex,
    bare_key: Regex,
    trailing_comma: Regex,
}

/// Compiled patterns (initialized once).
fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(Patterns {
                block: Regex::new(r"(?s)<tool_call>(.*?)</tool_call>|```tool_call(.*?)```").ok()?,
                function: Regex::new(r"(?s)<function=([^>]+)>(.*?)</function>").ok()?,
                parameter: Regex::new(r"(?s)<parameter=([^>]+)>(.*?)</parameter>").ok()?,
                bold_before_word: Regex::new(r"\*\*(\w)").ok()?,
                bold_after_word: Regex::new(r"(\w)\*\*").ok()?,
                bare_key: Regex::new(r"(?m)(^|[\{\s,])([A-Za-z_][A-Za-z0-9_-]*)\s*:").ok()?,
                trailing_comma: Regex::new(r",\s*([\]\}])").ok()?,
            })
        })
        .as_ref()
}

fn preview(text: &str) -> String {
    let flat = text.replace('\n', "\\n");
    match flat.char_indices().nth(200) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat,
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Parse every tool call in `text`, in order of appearance.
///
/// Returns an empty list for text without calls and for text whose calls
/// cannot be recovered.
pub fn parse_tool_calls(text: &str) -> Vec<ParsedToolCall> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let Some(patterns) = patterns() else {
        tracing::error!("ToolCallParser: patterns failed to compile");
        return Vec::new();
    };

    // Entity-encoded tags are decoded up front so the block scan can see them.
    let decoded;
    let source = if !text.contains(TOOL_CALL_OPEN) && text.contains("&lt;tool_call&gt;") {
        decoded = decode_html_entities(text);
        decoded.as_str()
    } else {
        text
    };

    let blocks = extract_blocks(patterns, source);
    let mut calls = Vec::new();

    if blocks.is_empty() {
        if source.contains(FUNCTION_OPEN) {
            calls.extend(parse_xml_functions(patterns, source));
        }
    } else {
        for (idx, block) in blocks.iter().enumerate() {
            let parsed = if block.contains(FUNCTION_OPEN) {
                parse_xml_functions(patterns, block)
            } else {
                parse_json_block(patterns, block)
            };
            if parsed.is_empty() {
                tracing::warn!(
                    "ToolCallParser: dropped block {} of {}: {}",
                    idx + 1,
                    blocks.len(),
                    preview(block)
                );
            }
            calls.extend(parsed);
        }
    }

    if calls.is_empty() {
        tracing::debug!("ToolCallParser: no tool calls in: {}", preview(source));
    } else {
        tracing::debug!(
            "ToolCallParser: parsed {}",
            calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", ")
        );
    }
    calls
}

/// Tagged and fenced block bodies in order, plus a trailing unclosed tag.
fn extract_blocks(patterns: &Patterns, text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut last_end = 0;
    for caps in patterns.block.captures_iter(text) {
        if let Some(body) = caps.get(1).or_else(|| caps.get(2)) {
            blocks.push(body.as_str().trim().to_string());
        }
        if let Some(whole) = caps.get(0) {
            last_end = whole.end();
        }
    }

    let rest = &text[last_end..];
    if let Some(start) = rest.find(TOOL_CALL_OPEN) {
        let tail = rest[start + TOOL_CALL_OPEN.len()..].trim();
        if !tail.is_empty() {
            blocks.push(tail.to_string());
        }
    }
    blocks
}

// ---------------------------------------------------------------------------
// JSON dialect
// ---------------------------------------------------------------------------

fn parse_json_block(patterns: &Patterns, block: &str) -> Vec<ParsedToolCall> {
    let block = block.replace("\r\n", "\n").replace('\r', "\n");
    match parse_json_lenient(patterns, block.trim()) {
        Some(value) => calls_from_value(patterns, value, true),
        None => Vec::new(),
    }
}

/// Run the cleanup cascade until something parses.
fn parse_json_lenient(patterns: &Patterns, raw: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        return Some(value);
    }
    let cleaned = clean_json_block(patterns, raw);
    if let Ok(value) = serde_json::from_str::<Value>(&cleaned) {
        tracing::debug!("ToolCallParser: block parsed after cleanup");
        return Some(value);
    }
    for candidate in [cleaned.as_str(), raw] {
        let unescaped = unescape_sequences(candidate);
        if let Ok(value) = serde_json::from_str::<Value>(&unescaped) {
            tracing::debug!("ToolCallParser: block parsed after unescaping");
            return Some(value);
        }
    }
    None
}

/// Normalize a block that is almost JSON.
fn clean_json_block(patterns: &Patterns, raw: &str) -> String {
    let mut s = decode_html_entities(raw);
    s = s
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    let mut out = String::with_capacity(s.len() + 16);
    for (is_literal, segment) in split_string_literals(&s) {
        if is_literal {
            out.push_str(&escape_invalid_backslashes(segment));
            continue;
        }
        let mut structure = patterns.bold_before_word.replace_all(segment, "$1").into_owned();
        structure = patterns.bold_after_word.replace_all(&structure, "$1").into_owned();
        structure = structure.replace("**:", ":");
        structure = patterns.bare_key.replace_all(&structure, "${1}\"${2}\":").into_owned();
        structure = patterns.trailing_comma.replace_all(&structure, "$1").into_owned();
        out.push_str(&structure);
    }
    out.trim().to_string()
}

/// Split `text` into alternating structure and string-literal segments.
/// Literal segments include their quotes; an unterminated literal runs to
/// the end of the text.
fn split_string_literals(text: &str) -> Vec<(bool, &str)> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut in_literal = false;
    let mut escaped = false;
    for (idx, ch) in text.char_indices() {
        if in_literal {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                segments.push((true, &text[start..=idx]));
                start = idx + 1;
                in_literal = false;
            }
        } else if ch == '"' {
            if start < idx {
                segments.push((false, &text[start..idx]));
            }
            start = idx;
            in_literal = true;
        }
    }
    if start < text.len() {
        segments.push((in_literal, &text[start..]));
    }
    segments
}

fn calls_from_value(patterns: &Patterns, value: Value, allow_nested: bool) -> Vec<ParsedToolCall> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| call_from_value(patterns, item))
            .collect(),
        // A call encoded once more as a JSON string
        Value::String(inner) if allow_nested => match parse_json_lenient(patterns, &inner) {
            Some(v) => calls_from_value(patterns, v, false),
            None => Vec::new(),
        },
        other => call_from_value(patterns, other).into_iter().collect(),
    }
}

fn call_from_value(patterns: &Patterns, value: Value) -> Option<ParsedToolCall> {
    let Value::Object(mut object) = value else {
        return None;
    };
    if matches!(object.get("function"), Some(Value::Object(_))) {
        if let Some(Value::Object(inner)) = object.remove("function") {
            object = inner;
        }
    }

    let name = ["name", "tool", "function"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|name| !name.is_empty())?
        .to_string();

    let raw_arguments = object
        .remove("arguments")
        .or_else(|| object.remove("parameters"))
        .unwrap_or(Value::Null);

    let arguments = match raw_arguments {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        Value::String(s) if s.trim().is_empty() => Map::new(),
        Value::String(s) => match parse_json_lenient(patterns, &s) {
            Some(Value::Object(map)) => map,
            _ => {
                tracing::warn!("ToolCallParser: arguments of '{}' are not an object: {}", name, preview(&s));
                return None;
            }
        },
        other => {
            tracing::warn!("ToolCallParser: arguments of '{}' are not an object: {}", name, other);
            return None;
        }
    };

    Some(ParsedToolCall { name, arguments })
}

// ---------------------------------------------------------------------------
// XML dialect
// ---------------------------------------------------------------------------

fn parse_xml_functions(patterns: &Patterns, text: &str) -> Vec<ParsedToolCall> {
    patterns
        .function
        .captures_iter(text)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().trim().to_string();
            if name.is_empty() {
                return None;
            }
            let body = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            let mut arguments = Map::new();
            for param in patterns.parameter.captures_iter(body) {
                let (Some(key), Some(value)) = (param.get(1), param.get(2)) else {
                    continue;
                };
                arguments.insert(
                    key.as_str().trim().to_string(),
                    Value::String(xml_parameter_value(value.as_str())),
                );
            }
            Some(ParsedToolCall { name, arguments })
        })
        .collect()
}

/// Literal `\n` sequences become line breaks; only outer whitespace is trimmed.
fn xml_parameter_value(raw: &str) -> String {
    raw.replace("\\n", "\n").trim().to_string()
}

// ---------------------------------------------------------------------------
// Text helpers
// ---------------------------------------------------------------------------

/// Decode named XML entities plus decimal and hex character references.
/// Unknown or malformed references are kept as written.
pub fn decode_html_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let decoded = after
            .find(';')
            .filter(|&semi| semi > 0 && semi <= 10)
            .and_then(|semi| decode_entity(&after[..semi]).map(|ch| (ch, semi)));
        match decoded {
            Some((ch, semi)) => {
                out.push(ch);
                rest = &after[semi + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "quot" => Some('"'),
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{00A0}'),
        _ => {
            let number = entity.strip_prefix('#')?;
            let code = match number.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => number.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// Double every backslash in a string literal that does not start a valid
/// JSON escape, so `C:\Users` survives while `\n` keeps its meaning.
fn escape_invalid_backslashes(literal: &str) -> String {
    let chars: Vec<char> = literal.chars().collect();
    let mut out = String::with_capacity(literal.len() + 8);
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        if ch != '\\' {
            out.push(ch);
            i += 1;
            continue;
        }
        let valid = match chars.get(i + 1) {
            Some('"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't') => true,
            Some('u') => chars.len() > i + 5 && chars[i + 2..i + 6].iter().all(char::is_ascii_hexdigit),
            _ => false,
        };
        if valid {
            out.push(ch);
            out.push(chars[i + 1]);
            i += 2;
        } else {
            out.push_str("\\\\");
            i += 1;
        }
    }
    out
}

/// Interpret backslash escapes (`\"`, `\\`, `\n`, `\t`, `\r`, `\/`, `\uXXXX`).
fn unescape_sequences(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Prompt helpers
// ---------------------------------------------------------------------------

/// Instructions for models that emit tool calls as text.
pub fn build_tool_call_instructions(tools: &[ToolDefinition]) -> String {
    let mut tool_descriptions = String::new();

    for tool in tools {
        tool_descriptions.push_str(&format!("### {}\n{}\n", tool.name, tool.description));

        if let Some(properties) = tool.input_schema.properties.as_ref() {
            if !properties.is_empty() {
                tool_descriptions.push_str("Parameters:\n");
                let required = tool.input_schema.required_names();
                let mut names: Vec<&String> = properties.keys().collect();
                names.sort();
                for name in names {
                    let schema = &properties[name];
                    let marker = if required.contains(name) {
                        "required"
                    } else {
                        "optional"
                    };
                    tool_descriptions.push_str(&format!(
                        "  - `{}` ({}, {}): {}\n",
                        name,
                        schema.schema_type,
                        marker,
                        schema.description.as_deref().unwrap_or("")
                    ));
                }
            }
        }
        tool_descriptions.push('\n');
    }

    format!(
        r#"## Tool Calling

You can call the tools below. To call one, output a block in this exact format:

<tool_call>{{"name": "tool_name", "arguments": {{"param": "value"}}}}</tool_call>

- The JSON must be valid.
- You may emit several blocks in one reply.
- After calling tools, stop and wait for their results. Never invent results.

## Available Tools

{tool_descriptions}"#
    )
}

/// Section folded into a step's running context for one tool result.
pub fn format_tool_result(tool_name: &str, result: &ToolResult) -> String {
    format!("[Tool {} result]\n{}", tool_name, result.to_content())
}
