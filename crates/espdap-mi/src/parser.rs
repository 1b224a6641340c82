//! MI output-line parser
//!
//! Classifies one line of GDB output into a [`Record`]. The grammar, per
//! the GDB/MI documentation:
//!
//! ```text
//! [token] "^" result-class ( "," name "=" value )*     result record
//! [token] "*" async-class  ( "," name "=" value )*     exec-async notification
//! [token] "=" async-class  ( "," name "=" value )*     notify-async notification
//! [token] "+" async-class  ...                         status notification
//! "~" c-string | "@" c-string | "&" c-string           stream records
//! "(gdb)"                                              prompt, not a record
//! ```
//!
//! Values are c-strings, `{...}` tuples, or `[...]` lists. Lists may hold
//! bare values or `name=value` pairs.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::record::{
    MiValue, NotifyRecord, Record, ResultClass, ResultRecord, StreamKind, StreamRecord,
};

/// Parse one line of MI output.
///
/// Returns `Ok(None)` for the `(gdb)` prompt and blank lines, which
/// terminate an output block but carry no information.
pub fn parse_line(line: &str) -> Result<Option<Record>> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() || line == "(gdb)" || line == "(gdb) " {
        return Ok(None);
    }

    let mut cursor = Cursor::new(line);
    let token = cursor.take_token();

    let Some(marker) = cursor.next_char() else {
        return Err(Error::Parse(format!("truncated MI line: {line:?}")));
    };

    let record = match marker {
        '^' => {
            let class = ResultClass::parse(cursor.take_identifier())?;
            let fields = cursor.take_fields()?;
            Record::Result(ResultRecord {
                token,
                class,
                fields,
            })
        }
        // Status (`+`) notifications share the async-record shape.
        '*' | '=' | '+' => {
            let class = cursor.take_identifier().to_string();
            let fields = cursor.take_fields()?;
            Record::Notify(NotifyRecord { class, fields })
        }
        '~' => Record::Stream(StreamRecord {
            kind: StreamKind::Console,
            text: cursor.take_c_string()?,
        }),
        '@' => Record::Stream(StreamRecord {
            kind: StreamKind::Target,
            text: cursor.take_c_string()?,
        }),
        '&' => Record::Stream(StreamRecord {
            kind: StreamKind::Log,
            text: cursor.take_c_string()?,
        }),
        other => {
            return Err(Error::Parse(format!(
                "unexpected MI record marker `{other}` in {line:?}"
            )))
        }
    };

    Ok(Some(record))
}

struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn next_char(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    /// Leading decimal token, if any.
    fn take_token(&mut self) -> Option<u64> {
        let digits: usize = self
            .rest()
            .bytes()
            .take_while(|b| b.is_ascii_digit())
            .count();
        if digits == 0 {
            return None;
        }
        let token = self.rest()[..digits].parse().ok()?;
        self.pos += digits;
        Some(token)
    }

    /// Identifier: class names and field names (`stopped`, `thread-id`).
    fn take_identifier(&mut self) -> &'a str {
        let len = self
            .rest()
            .bytes()
            .take_while(|b| b.is_ascii_alphanumeric() || *b == b'-' || *b == b'_')
            .count();
        let ident = &self.rest()[..len];
        self.pos += len;
        ident
    }

    /// `( "," name "=" value )*` - the field list after a class name.
    fn take_fields(&mut self) -> Result<MiValue> {
        let mut fields = HashMap::new();
        while self.eat(',') {
            let name = self.take_identifier().to_string();
            if name.is_empty() || !self.eat('=') {
                return Err(Error::Parse(format!(
                    "expected `name=value` at {:?}",
                    self.rest()
                )));
            }
            fields.insert(name, self.take_value()?);
        }
        if !self.rest().is_empty() {
            return Err(Error::Parse(format!(
                "trailing input after fields: {:?}",
                self.rest()
            )));
        }
        Ok(MiValue::Tuple(fields))
    }

    fn take_value(&mut self) -> Result<MiValue> {
        match self.peek() {
            Some('"') => Ok(MiValue::String(self.take_c_string()?)),
            Some('{') => self.take_tuple(),
            Some('[') => self.take_list(),
            _ => Err(Error::Parse(format!(
                "expected value at {:?}",
                self.rest()
            ))),
        }
    }

    fn take_tuple(&mut self) -> Result<MiValue> {
        self.eat('{');
        let mut fields = HashMap::new();
        if !self.eat('}') {
            loop {
                let name = self.take_identifier().to_string();
                if name.is_empty() || !self.eat('=') {
                    return Err(Error::Parse(format!(
                        "expected `name=value` in tuple at {:?}",
                        self.rest()
                    )));
                }
                fields.insert(name, self.take_value()?);
                if !self.eat(',') {
                    break;
                }
            }
            if !self.eat('}') {
                return Err(Error::Parse("unterminated tuple".to_string()));
            }
        }
        Ok(MiValue::Tuple(fields))
    }

    fn take_list(&mut self) -> Result<MiValue> {
        self.eat('[');
        let mut items = Vec::new();
        if !self.eat(']') {
            loop {
                // A list element is either a bare value or a `name=value`
                // pair; pairs are kept as single-entry tuples.
                let item = match self.peek() {
                    Some('"') | Some('{') | Some('[') => self.take_value()?,
                    _ => {
                        let name = self.take_identifier().to_string();
                        if name.is_empty() || !self.eat('=') {
                            return Err(Error::Parse(format!(
                                "expected list element at {:?}",
                                self.rest()
                            )));
                        }
                        let value = self.take_value()?;
                        let mut pair = HashMap::new();
                        pair.insert(name, value);
                        MiValue::Tuple(pair)
                    }
                };
                items.push(item);
                if !self.eat(',') {
                    break;
                }
            }
            if !self.eat(']') {
                return Err(Error::Parse("unterminated list".to_string()));
            }
        }
        Ok(MiValue::List(items))
    }

    /// Quoted c-string with `\` escapes.
    fn take_c_string(&mut self) -> Result<String> {
        if !self.eat('"') {
            return Err(Error::Parse(format!(
                "expected string at {:?}",
                self.rest()
            )));
        }
        let mut out = String::new();
        loop {
            match self.next_char() {
                Some('"') => return Ok(out),
                Some('\\') => match self.next_char() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('0') => out.push('\0'),
                    Some(c) => out.push(c),
                    None => return Err(Error::Parse("unterminated escape".to_string())),
                },
                Some(c) => out.push(c),
                None => return Err(Error::Parse("unterminated string".to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Record {
        parse_line(line).unwrap().unwrap()
    }

    #[test]
    fn parses_done_with_token() {
        let record = parse("7^done");
        match record {
            Record::Result(r) => {
                assert_eq!(r.token, Some(7));
                assert_eq!(r.class, ResultClass::Done);
            }
            other => panic!("expected result record, got {other:?}"),
        }
    }

    #[test]
    fn parses_error_with_message() {
        let record = parse(r#"3^error,msg="No symbol \"foo\" in current context.""#);
        match record {
            Record::Result(r) => {
                assert_eq!(r.class, ResultClass::Error);
                assert_eq!(
                    r.error_message(),
                    Some(r#"No symbol "foo" in current context."#)
                );
            }
            other => panic!("expected result record, got {other:?}"),
        }
    }

    #[test]
    fn parses_stopped_notification() {
        let record = parse(
            r#"*stopped,reason="breakpoint-hit",bkptno="1",thread-id="1",frame={addr="0x400d1c2a",func="app_main"}"#,
        );
        match record {
            Record::Notify(n) => {
                assert_eq!(n.class, "stopped");
                assert_eq!(n.fields.get_str("thread-id"), Some("1"));
                assert_eq!(
                    n.fields.get("frame").and_then(|f| f.get_str("func")),
                    Some("app_main")
                );
            }
            other => panic!("expected notify record, got {other:?}"),
        }
    }

    #[test]
    fn parses_stack_list() {
        let record = parse(
            r#"12^done,stack=[frame={level="0",func="main",addr="0x1"},frame={level="1",func="start",addr="0x2"}]"#,
        );
        let Record::Result(r) = record else {
            panic!("expected result record");
        };
        let stack = r.fields.get("stack").and_then(MiValue::as_list).unwrap();
        assert_eq!(stack.len(), 2);
        let first = stack[0].get("frame").unwrap();
        assert_eq!(first.get_str("level"), Some("0"));
        assert_eq!(first.get_str("func"), Some("main"));
    }

    #[test]
    fn parses_console_stream_with_escapes() {
        let record = parse(r#"~"Reading symbols from app.elf...\n""#);
        match record {
            Record::Stream(s) => {
                assert_eq!(s.kind, StreamKind::Console);
                assert_eq!(s.text, "Reading symbols from app.elf...\n");
            }
            other => panic!("expected stream record, got {other:?}"),
        }
    }

    #[test]
    fn prompt_and_blank_lines_are_skipped() {
        assert_eq!(parse_line("(gdb)").unwrap(), None);
        assert_eq!(parse_line("").unwrap(), None);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_line("!nonsense").is_err());
    }

    #[test]
    fn parses_empty_list_and_tuple() {
        let record = parse(r#"^done,threads=[],frame={}"#);
        let Record::Result(r) = record else {
            panic!("expected result record");
        };
        assert_eq!(r.fields.get("threads").unwrap().as_list().unwrap().len(), 0);
        assert_eq!(r.token, None);
    }
}
