//! MI result values
//!
//! ```text
//! results → result ( "," result )*
//! result  → variable "=" value
//! value   → const | tuple | list
//! tuple   → "{}" | "{" result ( "," result )* "}"
//! list    → "[]" | "[" value ( "," value )* "]" | "[" result ( "," result )* "]"
//! ```
//!
//! A list of results keeps only the values: `stack=[frame={..},frame={..}]`
//! parses to a list of two tuples.

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiValue {
    Const(String),
    Tuple(MiResults),
    List(Vec<MiValue>),
}

impl MiValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MiValue::Const(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&MiResults> {
        match self {
            MiValue::Tuple(t) => Some(t),
            _ => None,
        }
    }

    /// List items. An empty tuple `{}` is also accepted as an empty list,
    /// GDB emits both.
    pub fn as_list(&self) -> Option<&[MiValue]> {
        match self {
            MiValue::List(items) => Some(items),
            MiValue::Tuple(t) if t.is_empty() => Some(&[]),
            _ => None,
        }
    }

    /// Field of a tuple value.
    pub fn get(&self, name: &str) -> Option<&MiValue> {
        self.as_tuple().and_then(|t| t.get(name))
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(MiValue::as_str)
    }
}

/// Ordered `name=value` pairs. Names may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MiResults(Vec<(String, MiValue)>);

impl MiResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: MiValue) {
        self.0.push((name.into(), value));
    }

    /// First value named `name`.
    pub fn get(&self, name: &str) -> Option<&MiValue> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(MiValue::as_str)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get_str(name).and_then(|s| s.parse().ok())
    }

    pub fn get_list(&self, name: &str) -> &[MiValue] {
        self.get(name).and_then(MiValue::as_list).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MiValue)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse a comma-separated result list (the text after `^done,`).
    pub fn parse(text: &str) -> Result<Self> {
        let mut parser = Parser::new(text);
        let results = parser.results_until(None)?;
        if !parser.at_end() {
            return Err(parser.error("trailing characters"));
        }
        Ok(results)
    }
}

/// Decode a C string literal including its quotes.
pub fn parse_cstring(text: &str) -> Result<String> {
    let mut parser = Parser::new(text);
    let value = parser.cstring()?;
    if !parser.at_end() {
        return Err(parser.error("trailing characters after string"));
    }
    Ok(value)
}

/// Quote an argument for an MI command line.
pub fn quote(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    for c in arg.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            bytes: text.as_bytes(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn error(&self, what: &str) -> Error {
        Error::Protocol(format!("MI parse error at offset {}: {}", self.pos, what))
    }

    fn expect(&mut self, byte: u8) -> Result<()> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", byte as char)))
        }
    }

    /// Results up to `close` (or end of input when `None`).
    fn results_until(&mut self, close: Option<u8>) -> Result<MiResults> {
        let mut results = MiResults::new();
        if self.peek() == close {
            return Ok(results);
        }
        loop {
            let (name, value) = self.result()?;
            results.push(name, value);
            match self.peek() {
                Some(b',') => self.pos += 1,
                next if next == close => return Ok(results),
                _ => return Err(self.error("expected ',' between results")),
            }
        }
    }

    fn result(&mut self) -> Result<(String, MiValue)> {
        let name = self.variable()?;
        self.expect(b'=')?;
        let value = self.value()?;
        Ok((name, value))
    }

    fn variable(&mut self) -> Result<String> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == b'=' || b == b',' || b == b'{' || b == b'[' || b == b'"' {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("expected a variable name"));
        }
        Ok(String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned())
    }

    fn value(&mut self) -> Result<MiValue> {
        match self.peek() {
            Some(b'"') => Ok(MiValue::Const(self.cstring()?)),
            Some(b'{') => {
                self.pos += 1;
                let results = self.results_until(Some(b'}'))?;
                self.expect(b'}')?;
                Ok(MiValue::Tuple(results))
            }
            Some(b'[') => {
                self.pos += 1;
                let items = self.list_items()?;
                self.expect(b']')?;
                Ok(MiValue::List(items))
            }
            _ => Err(self.error("expected a value")),
        }
    }

    fn list_items(&mut self) -> Result<Vec<MiValue>> {
        let mut items = Vec::new();
        if self.peek() == Some(b']') {
            return Ok(items);
        }
        loop {
            let item = match self.peek() {
                Some(b'"') | Some(b'{') | Some(b'[') => self.value()?,
                _ => self.result()?.1,
            };
            items.push(item);
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b']') => return Ok(items),
                _ => return Err(self.error("expected ',' or ']' in list")),
            }
        }
    }

    fn cstring(&mut self) -> Result<String> {
        self.expect(b'"')?;
        let mut out: Vec<u8> = Vec::new();
        loop {
            let Some(b) = self.peek() else {
                return Err(self.error("unterminated string"));
            };
            self.pos += 1;
            match b {
                b'"' => break,
                b'\\' => {
                    let Some(escaped) = self.peek() else {
                        return Err(self.error("dangling escape"));
                    };
                    self.pos += 1;
                    match escaped {
                        b'n' => out.push(b'\n'),
                        b't' => out.push(b'\t'),
                        b'r' => out.push(b'\r'),
                        b'e' => out.push(0x1b),
                        b'0'..=b'7' => {
                            // Up to three octal digits
                            let mut code = u32::from(escaped - b'0');
                            for _ in 0..2 {
                                match self.peek() {
                                    Some(d @ b'0'..=b'7') => {
                                        code = code * 8 + u32::from(d - b'0');
                                        self.pos += 1;
                                    }
                                    _ => break,
                                }
                            }
                            out.push((code & 0xff) as u8);
                        }
                        other => out.push(other),
                    }
                }
                other => out.push(other),
            }
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_breakpoint_tuple() {
        let results = MiResults::parse(
            r#"bkpt={number="1",type="breakpoint",enabled="y",file="main.c",fullname="/src/main.c",line="12",times="0"}"#,
        )
        .unwrap();
        let bkpt = results.get("bkpt").unwrap();
        assert_eq!(bkpt.get_str("number"), Some("1"));
        assert_eq!(bkpt.get_str("fullname"), Some("/src/main.c"));
        assert_eq!(bkpt.get_str("line"), Some("12"));
    }

    #[test]
    fn test_result_list_keeps_values() {
        let results = MiResults::parse(
            r#"stack=[frame={level="0",func="inner"},frame={level="1",func="main"}]"#,
        )
        .unwrap();
        let frames = results.get_list("stack");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].get_str("func"), Some("main"));
    }

    #[test]
    fn test_value_list_and_empty_containers() {
        let results =
            MiResults::parse(r#"ids=["1","2"],locals=[],args={}"#).unwrap();
        let ids: Vec<_> = results
            .get_list("ids")
            .iter()
            .filter_map(MiValue::as_str)
            .collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert!(results.get_list("locals").is_empty());
        assert!(results.get_list("args").is_empty());
    }

    #[test]
    fn test_cstring_escapes() {
        assert_eq!(parse_cstring(r#""a\"b\\c\n""#).unwrap(), "a\"b\\c\n");
        // Octal-escaped UTF-8 bytes for 'é'
        assert_eq!(parse_cstring(r#""caf\303\251""#).unwrap(), "café");
    }

    #[test]
    fn test_malformed_input_is_an_error() {
        assert!(MiResults::parse(r#"a="1"#).is_err());
        assert!(MiResults::parse(r#"a={b="1""#).is_err());
        assert!(MiResults::parse(r#"="1""#).is_err());
    }

    #[test]
    fn test_quote_roundtrips_through_cstring() {
        let raw = "x == \"a\\b\"\n";
        assert_eq!(parse_cstring(&quote(raw)).unwrap(), raw);
    }
}
