//! Syntactic repair of malformed model output.
//!
//! Steps run in a fixed order and each is a no-op on input it does not
//! apply to: strip code fences, sanitize control characters, extract the
//! first JSON value, then (only when that fails to parse) patch the dangling
//! tail, balance brackets and drop trailing commas, up to
//! [`MAX_PATCH_ROUNDS`] times.

use serde_json::{Map, Value};
use tracing::debug;

use super::scanner::{CharClass, JsonScanner};

const MAX_PATCH_ROUNDS: usize = 2;

/// Envelope keys models wrap their answer in.
const ENVELOPE_KEYS: [&str; 2] = ["result", "data"];

/// Heal `raw` into text that parses as JSON, or `None` if it cannot be saved.
pub fn heal_text(raw: &str) -> Option<String> {
    let unfenced = strip_code_fences(raw);
    let sanitized = sanitize(unfenced);
    let extracted = extract_first_value(&sanitized)?;

    if is_valid_json(extracted) {
        return Some(extracted.to_string());
    }

    let mut text = extracted.to_string();
    for round in 1..=MAX_PATCH_ROUNDS {
        text = remove_trailing_commas(&balance(&patch_tail(&text)));
        if is_valid_json(&text) {
            debug!("Healed malformed JSON in {} round(s)", round);
            return Some(text);
        }
    }

    debug!("JSON unparsable after healing");
    None
}

/// Heal and parse, returning the answer object with any envelope removed.
pub fn parse_lenient(raw: &str) -> Option<Map<String, Value>> {
    let text = heal_text(raw)?;
    let value: Value = serde_json::from_str(&text).ok()?;
    unwrap_envelope(value)
}

fn is_valid_json(text: &str) -> bool {
    serde_json::from_str::<Value>(text).is_ok()
}

/// Unwrap `{"result": {...}}` / `{"data": {...}}`, take the first object of a
/// top-level array and decode double-encoded JSON strings.
fn unwrap_envelope(value: Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(mut map) => {
            if map.len() == 1 {
                for key in ENVELOPE_KEYS {
                    if map
                        .get(key)
                        .is_some_and(|inner| inner.is_object() || inner.is_array())
                        && let Some(inner) = map.remove(key)
                    {
                        return unwrap_envelope(inner);
                    }
                }
            }
            Some(map)
        }
        Value::Array(items) => items
            .into_iter()
            .find(Value::is_object)
            .and_then(unwrap_envelope),
        Value::String(text) => serde_json::from_str::<Value>(&text)
            .ok()
            .filter(|inner| !inner.is_string())
            .and_then(unwrap_envelope),
        _ => None,
    }
}

/// Remove markdown code fences and a language tag.
///
/// An opening fence only counts before the first `{` or `[`, and the closing
/// fence only outside string literals, so fences quoted inside the answer
/// are kept as content.
pub(crate) fn strip_code_fences(input: &str) -> &str {
    let trimmed = input.trim();
    let first_bracket = trimmed.find(['{', '[']).unwrap_or(trimmed.len());
    let Some(start) = trimmed[..first_bracket].find("```") else {
        return trimmed;
    };

    let after = &trimmed[start + 3..];
    let tag_line = after.find('\n').filter(|&newline| {
        after[..newline]
            .trim()
            .chars()
            .all(|c| c.is_ascii_alphanumeric())
    });
    let body = match tag_line {
        Some(newline) => &after[newline + 1..],
        None => after.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    let body = match find_structural_fence(body) {
        Some(end) => &body[..end],
        None => body,
    };
    body.trim()
}

/// Byte offset of the first "```" outside any string literal.
fn find_structural_fence(text: &str) -> Option<usize> {
    let mut scanner = JsonScanner::new();
    for (offset, c) in text.char_indices() {
        let class = scanner.step(c);
        if c == '`' && !class.in_literal() && text[offset..].starts_with("```") {
            return Some(offset);
        }
    }
    None
}

/// Drop BOMs and NULs; escape or drop raw control characters.
///
/// Inside string literals `\n`, `\r` and `\t` become escape sequences and
/// other controls are dropped. Outside strings only whitespace controls
/// survive.
pub(crate) fn sanitize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut scanner = JsonScanner::new();

    for c in input.chars() {
        if c == '\u{FEFF}' || c == '\0' {
            continue;
        }

        if c.is_control() {
            if scanner.in_string() {
                // After a bare backslash only the escape letter is needed.
                let escaped = scanner.escaped();
                let replacement = match c {
                    '\n' => Some('n'),
                    '\r' => Some('r'),
                    '\t' => Some('t'),
                    _ if escaped => Some('\\'),
                    _ => None,
                };
                if let Some(letter) = replacement {
                    if !escaped {
                        out.push('\\');
                    }
                    out.push(letter);
                    if escaped {
                        scanner.step(letter);
                    }
                }
            } else if matches!(c, '\n' | '\r' | '\t') {
                out.push(c);
            }
            continue;
        }

        scanner.step(c);
        out.push(c);
    }

    out
}

/// Slice from the first `{`/`[` to where its depth returns to zero, or to
/// the end of input when it never does.
pub(crate) fn extract_first_value(input: &str) -> Option<&str> {
    let start = input.find(['{', '['])?;
    let mut scanner = JsonScanner::new();
    let mut depth = 0usize;

    for (offset, c) in input[start..].char_indices() {
        if scanner.step(c).in_literal() {
            continue;
        }
        match c {
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&input[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    Some(&input[start..])
}

/// State at the end of a (possibly truncated) JSON text.
struct TailScan {
    in_string: bool,
    escaped: bool,
    /// Byte offset of the opening quote of the last string literal.
    last_string_start: Option<usize>,
    /// Whether that string literal sits in object-key position.
    last_string_is_key: bool,
}

fn scan_tail(text: &str) -> TailScan {
    let mut scanner = JsonScanner::new();
    let mut stack: Vec<char> = Vec::new();
    let mut prev: Option<char> = None;
    let mut tail = TailScan {
        in_string: false,
        escaped: false,
        last_string_start: None,
        last_string_is_key: false,
    };

    for (idx, c) in text.char_indices() {
        match scanner.step(c) {
            CharClass::OpenQuote => {
                tail.last_string_start = Some(idx);
                tail.last_string_is_key =
                    stack.last() == Some(&'{') && matches!(prev, Some('{') | Some(','));
            }
            CharClass::CloseQuote => prev = Some('"'),
            CharClass::StringContent => {}
            CharClass::Structural => {
                match c {
                    '{' | '[' => stack.push(c),
                    '}' | ']' => {
                        stack.pop();
                    }
                    _ => {}
                }
                if !c.is_whitespace() {
                    prev = Some(c);
                }
            }
        }
    }

    tail.in_string = scanner.in_string();
    tail.escaped = scanner.escaped();
    tail
}

/// Safe value for a key left without one.
fn default_for_key(key: &str) -> &'static str {
    match key {
        "unit" => "\"SERVING\"",
        "basis" => "\"PER_SERVING\"",
        _ => "null",
    }
}

fn trailing_token_start(text: &str) -> usize {
    text.char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+'))
        .last()
        .map(|(idx, _)| idx)
        .unwrap_or(text.len())
}

/// Repair whatever was cut off at the end of the text.
pub(crate) fn patch_tail(input: &str) -> String {
    let mut text = input.trim_end().to_string();

    let tail = scan_tail(&text);
    if tail.in_string {
        let Some(start) = tail.last_string_start else {
            return text;
        };
        if tail.last_string_is_key {
            text.truncate(start);
        } else {
            if tail.escaped {
                text.pop();
            }
            text.push('"');
            return text;
        }
    }

    truncate_whitespace(&mut text);

    let token_start = trailing_token_start(&text);
    if token_start < text.len() {
        let token = text[token_start..].to_string();
        if token.starts_with(|c: char| c.is_ascii_digit() || matches!(c, '-' | '+' | '.')) {
            while text.len() > token_start && text.ends_with(['.', '-', '+', 'e', 'E']) {
                text.pop();
            }
        } else if !matches!(token.as_str(), "true" | "false" | "null") {
            match ["true", "false", "null"]
                .into_iter()
                .find(|literal| literal.starts_with(token.as_str()))
            {
                Some(literal) => text.push_str(&literal[token.len()..]),
                None => {
                    text.truncate(token_start);
                    text.push_str("null");
                }
            }
        }
        truncate_whitespace(&mut text);
    }

    if text.ends_with(':') {
        let tail = scan_tail(&text);
        let key = tail
            .last_string_start
            .and_then(|start| {
                let before_colon = text[..text.len() - 1].trim_end();
                before_colon
                    .strip_suffix('"')
                    .and_then(|quoted| quoted.get(start + 1..))
            })
            .unwrap_or_default();
        let default = default_for_key(key);
        text.push_str(default);
        return text;
    }

    if text.ends_with('"') {
        let tail = scan_tail(&text);
        if tail.last_string_is_key
            && let Some(start) = tail.last_string_start
        {
            text.truncate(start);
            truncate_whitespace(&mut text);
        }
    }

    if text.ends_with(',') {
        text.pop();
    }

    text
}

fn truncate_whitespace(text: &mut String) {
    let len = text.trim_end().len();
    text.truncate(len);
}

/// Append closers for every unmatched opener, innermost first.
pub(crate) fn balance(input: &str) -> String {
    let mut scanner = JsonScanner::new();
    let mut stack: Vec<char> = Vec::new();

    for c in input.chars() {
        if scanner.step(c).in_literal() {
            continue;
        }
        match c {
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&c) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    let mut out = input.to_string();
    if scanner.in_string() {
        if scanner.escaped() {
            out.pop();
        }
        out.push('"');
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

/// Drop commas that directly precede `}` / `]` or the end of input.
pub(crate) fn remove_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut scanner = JsonScanner::new();
    let mut out = String::with_capacity(input.len());

    for (idx, &c) in chars.iter().enumerate() {
        if !scanner.step(c).in_literal() && c == ',' {
            let next = chars[idx + 1..].iter().find(|n| !n.is_whitespace());
            if matches!(next, None | Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn healed(raw: &str) -> Value {
        serde_json::from_str(&heal_text(raw).expect("heals")).expect("parses")
    }

    #[test]
    fn valid_json_passes_through() {
        let raw = r#"{"foodName":"rice","quantity":{"value":1,"unit":"SERVING"}}"#;
        assert_eq!(heal_text(raw).as_deref(), Some(raw));
    }

    #[test]
    fn strips_fences_and_prose() {
        let raw = "Sure! Here it is:\n```json\n{\"foodName\":\"bibimbap\"}\n```\nEnjoy.";
        assert_eq!(healed(raw), json!({"foodName": "bibimbap"}));

        let inline = "```json{\"a\":1}```";
        assert_eq!(healed(inline), json!({"a": 1}));
    }

    #[test]
    fn fences_inside_string_literals_are_content() {
        let raw = r#"{"foodName":"Sushi ``` roll","nutrients":{"sodiumMg":400}}"#;
        assert_eq!(heal_text(raw).as_deref(), Some(raw));

        let fenced = "```json\n{\"foodName\":\"a ``` b\",\"proteinG\":3}\n```";
        assert_eq!(healed(fenced), json!({"foodName": "a ``` b", "proteinG": 3}));
    }

    #[test]
    fn sanitize_escapes_newlines_inside_strings_only() {
        let raw = "{\"foodName\":\"kimchi\njjigae\",\n\"a\":\u{1}1}";
        let cleaned = sanitize(raw);
        assert_eq!(cleaned, "{\"foodName\":\"kimchi\\njjigae\",\n\"a\":1}");
        let value: Value = serde_json::from_str(&cleaned).unwrap();
        assert_eq!(value["foodName"], "kimchi\njjigae");
    }

    #[test]
    fn sanitize_drops_bom_nul_and_string_controls() {
        let raw = "\u{FEFF}{\"a\":\"x\u{7}y\0\"}";
        assert_eq!(sanitize(raw), "{\"a\":\"xy\"}");
    }

    #[test]
    fn sanitize_completes_escape_before_raw_newline() {
        let raw = "{\"a\":\"line\\\nnext\"}";
        let cleaned = sanitize(raw);
        assert_eq!(cleaned, "{\"a\":\"line\\nnext\"}");
        assert!(is_valid_json(&cleaned));
    }

    #[test]
    fn extract_stops_at_balanced_end() {
        assert_eq!(
            extract_first_value(r#"noise {"a":"}"} trailing {"b":2}"#),
            Some(r#"{"a":"}"}"#)
        );
        assert_eq!(extract_first_value(r#"x {"a":[1,2"#), Some(r#"{"a":[1,2"#));
        assert_eq!(extract_first_value("no json here"), None);
    }

    #[test]
    fn dangling_unit_gets_enum_default() {
        let text = heal_text(r#"{"quantity":{"value":2,"unit":"#).unwrap();
        assert!(text.contains(r#""unit":"SERVING""#));
        assert!(is_valid_json(&text));
    }

    #[test]
    fn dangling_basis_gets_enum_default() {
        let patched = patch_tail(r#"{"labelMeta":{"servingsPerContainer":3,"basis": "#);
        assert!(patched.ends_with(r#""basis":"PER_SERVING""#));
    }

    #[test]
    fn dangling_unknown_key_gets_null() {
        let patched = patch_tail(r#"{"foodName":"x","sugarG":"#);
        assert!(patched.ends_with(r#""sugarG":null"#));
    }

    #[test]
    fn truncated_quantity_scenario() {
        let value = healed(r#"{"foodName":"x","quantity":{"value":"#);
        assert_eq!(value["foodName"], "x");
        assert_eq!(value["quantity"]["value"], Value::Null);
    }

    #[test]
    fn unterminated_value_string_is_closed() {
        let value = healed(r#"{"foodName":"Kimchi fried ri"#);
        assert_eq!(value["foodName"], "Kimchi fried ri");
    }

    #[test]
    fn unterminated_key_is_dropped() {
        let value = healed(r#"{"foodName":"soup","nutri"#);
        assert_eq!(value, json!({"foodName": "soup"}));
    }

    #[test]
    fn colonless_key_is_dropped() {
        let value = healed(r#"{"foodName":"soup","nutrients" "#);
        assert_eq!(value, json!({"foodName": "soup"}));
    }

    #[test]
    fn partial_literals_and_numbers() {
        assert_eq!(healed(r#"{"a":tr"#), json!({"a": true}));
        assert_eq!(healed(r#"{"a":nu"#), json!({"a": null}));
        assert_eq!(healed(r#"{"a":12."#), json!({"a": 12}));
        assert_eq!(healed(r#"{"a":2e"#), json!({"a": 2}));
        assert_eq!(healed(r#"{"a":-"#), json!({"a": null}));
        assert_eq!(healed(r#"{"a":[1,2,"#), json!({"a": [1, 2]}));
    }

    #[test]
    fn balance_closes_in_reverse_order() {
        assert_eq!(balance(r#"{"a":[{"b":1"#), r#"{"a":[{"b":1}]}"#);
        assert_eq!(balance(r#"{"a":"[{"#), r#"{"a":"[{"}"#);
        assert_eq!(balance(r#"{"a":1}"#), r#"{"a":1}"#);
    }

    #[test]
    fn balance_appends_one_closer_per_unmatched_opener() {
        let input = r#"[{"x":[[{"y":"{["#;
        let balanced = balance(input);
        let appended = &balanced[input.len()..];
        assert_eq!(appended, r#""}]]}]"#);
        assert!(is_valid_json(&balanced));
    }

    #[test]
    fn trailing_commas_removed_outside_strings() {
        assert_eq!(
            remove_trailing_commas(r#"{"a":[1,2,],"b":"x,}",}"#),
            r#"{"a":[1,2],"b":"x,}"}"#
        );
    }

    #[test]
    fn healing_is_idempotent() {
        let inputs = [
            r#"{"foodName":"x","quantity":{"value":"#,
            "```json\n{\"a\":[1,2,\n```",
            r#"prefix {"nutrients":{"sodiumMg":12,"fatG":tr"#,
            r#"{"foodName":"a\"b","warnings":["LOW_CONFIDENCE","#,
        ];
        for input in inputs {
            let once = heal_text(input).unwrap();
            let twice = heal_text(&once).unwrap();
            assert_eq!(once, twice, "input: {input}");
        }
    }

    #[test]
    fn parse_lenient_unwraps_envelopes() {
        let map = parse_lenient(r#"{"result":{"data":{"foodName":"x"}}}"#).unwrap();
        assert_eq!(map.get("foodName"), Some(&json!("x")));

        let map = parse_lenient(r#"[1, {"foodName":"y"}]"#).unwrap();
        assert_eq!(map.get("foodName"), Some(&json!("y")));

        let map = parse_lenient(r#"{"result":"{\"foodName\":\"z\"}","other":1}"#).unwrap();
        assert!(map.contains_key("other"));

        assert!(parse_lenient("I cannot see any food.").is_none());
    }
}
