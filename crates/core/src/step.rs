//! Reader for ISO 10303-21 ("STEP physical file") exchange files, the
//! container format used by IFC models.
//!
//! Only the parts needed for triple extraction are kept: the schema named in
//! the HEADER section and the flat list of simple entity instances in the
//! DATA section. Complex (multi-class) instances and instances that fail to
//! parse are counted and skipped so that one odd record does not cost the
//! whole model.

use crate::error::IngestError;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub enum StepValue {
    Unset,
    Derived,
    Ref(u64),
    String(String),
    Enum(String),
    Integer(i64),
    Real(f64),
    Typed { name: String, value: Box<StepValue> },
    List(Vec<StepValue>),
}

impl StepValue {
    pub fn as_ref_id(&self) -> Option<u64> {
        match self {
            StepValue::Ref(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StepValue::String(value) => Some(value),
            _ => None,
        }
    }

    /// Reference ids held directly or inside a list.
    pub fn ref_ids(&self) -> Vec<u64> {
        match self {
            StepValue::Ref(id) => vec![*id],
            StepValue::List(items) => items.iter().filter_map(StepValue::as_ref_id).collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepEntity {
    pub id: u64,
    pub class: String,
    pub params: Vec<StepValue>,
}

impl StepEntity {
    pub fn param(&self, index: usize) -> Option<&StepValue> {
        self.params.get(index)
    }

    /// Non-empty string attribute at `index`.
    pub fn str_param(&self, index: usize) -> Option<&str> {
        self.param(index)
            .and_then(StepValue::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn ref_param(&self, index: usize) -> Option<u64> {
        self.param(index).and_then(StepValue::as_ref_id)
    }

    pub fn ref_params(&self, index: usize) -> Vec<u64> {
        self.param(index).map(StepValue::ref_ids).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct StepModel {
    pub schema: Option<String>,
    pub skipped_statements: usize,
    entities: BTreeMap<u64, StepEntity>,
}

impl StepModel {
    pub fn get(&self, id: u64) -> Option<&StepEntity> {
        self.entities.get(&id)
    }

    /// Entities in ascending instance-id order.
    pub fn entities(&self) -> impl Iterator<Item = &StepEntity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

pub fn read_step_file(path: &Path) -> Result<StepModel, IngestError> {
    let bytes = std::fs::read(path)?;
    parse_step(&String::from_utf8_lossy(&bytes))
}

#[derive(Clone, Copy)]
enum Section {
    Preamble,
    Header,
    Data,
    Done,
}

pub fn parse_step(text: &str) -> Result<StepModel, IngestError> {
    let text = text.trim_start_matches('\u{feff}');
    let statements = split_statements(text)?;
    let instance_re = Regex::new(r"(?s)^#(\d+)\s*=\s*(.*)$")?;

    let mut model = StepModel::default();
    let mut section = Section::Preamble;
    let mut saw_magic = false;
    let mut saw_data = false;

    for (number, statement) in statements.iter().enumerate() {
        let upper = statement.to_ascii_uppercase();

        match section {
            Section::Preamble => {
                if upper == "ISO-10303-21" {
                    saw_magic = true;
                } else if !saw_magic {
                    return Err(IngestError::NotStep(format!(
                        "expected ISO-10303-21 but found: {}",
                        truncate(statement)
                    )));
                } else if upper == "HEADER" {
                    section = Section::Header;
                } else if upper.starts_with("DATA") {
                    section = Section::Data;
                    saw_data = true;
                } else {
                    return Err(IngestError::NotStep(format!(
                        "unexpected statement outside a section: {}",
                        truncate(statement)
                    )));
                }
            }
            Section::Header => {
                if upper == "ENDSEC" {
                    section = Section::Preamble;
                    continue;
                }
                if let Ok((name, params)) = InstanceParser::new(statement).instance() {
                    if name == "FILE_SCHEMA" {
                        model.schema = params
                            .first()
                            .and_then(|value| match value {
                                StepValue::List(items) => items.first().cloned(),
                                other => Some(other.clone()),
                            })
                            .and_then(|value| value.as_str().map(str::to_string));
                    }
                }
            }
            Section::Data => {
                if upper == "ENDSEC" {
                    section = Section::Done;
                    continue;
                }
                let Some(captures) = instance_re.captures(statement) else {
                    return Err(IngestError::StepParse {
                        statement: number + 1,
                        details: format!("expected an entity instance: {}", truncate(statement)),
                    });
                };
                let (Some(id), Some(body)) = (captures.get(1), captures.get(2)) else {
                    model.skipped_statements += 1;
                    continue;
                };
                let Ok(id) = id.as_str().parse::<u64>() else {
                    model.skipped_statements += 1;
                    continue;
                };
                if body.as_str().trim_start().starts_with('(') {
                    model.skipped_statements += 1;
                    continue;
                }
                match InstanceParser::new(body.as_str()).instance() {
                    Ok((class, params)) => {
                        model.entities.insert(id, StepEntity { id, class, params });
                    }
                    Err(_) => model.skipped_statements += 1,
                }
            }
            Section::Done => {
                if upper == "END-ISO-10303-21" {
                    break;
                }
                if upper.starts_with("DATA") {
                    section = Section::Data;
                }
            }
        }
    }

    if !saw_magic {
        return Err(IngestError::NotStep("missing ISO-10303-21 header".to_string()));
    }
    if !saw_data {
        return Err(IngestError::NotStep("missing DATA section".to_string()));
    }

    Ok(model)
}

/// Splits on `;` outside of strings and `/* */` comments.
fn split_statements(text: &str) -> Result<Vec<String>, IngestError> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            current.push(c);
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    current.push('\'');
                    chars.next();
                } else {
                    in_string = false;
                }
            }
            continue;
        }

        match c {
            '\'' => {
                in_string = true;
                current.push(c);
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut previous = '\0';
                let mut closed = false;
                for inner in chars.by_ref() {
                    if previous == '*' && inner == '/' {
                        closed = true;
                        break;
                    }
                    previous = inner;
                }
                if !closed {
                    return Err(IngestError::StepParse {
                        statement: statements.len() + 1,
                        details: "unterminated comment".to_string(),
                    });
                }
            }
            ';' => {
                let statement = current.trim();
                if !statement.is_empty() {
                    statements.push(statement.to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }

    if in_string {
        return Err(IngestError::StepParse {
            statement: statements.len() + 1,
            details: "unterminated string".to_string(),
        });
    }

    Ok(statements)
}

fn truncate(statement: &str) -> String {
    statement.chars().take(80).collect()
}

/// Deepest list nesting accepted inside one instance.
const MAX_LIST_DEPTH: usize = 64;

struct InstanceParser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl InstanceParser {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            depth: 0,
        }
    }

    fn instance(&mut self) -> Result<(String, Vec<StepValue>), String> {
        self.skip_ws();
        let name = self.keyword();
        if name.is_empty() {
            return Err(format!("expected entity name at {}", self.pos));
        }
        self.skip_ws();
        let params = self.list()?;
        self.skip_ws();
        if self.pos != self.chars.len() {
            return Err(format!("trailing input at {}", self.pos));
        }
        Ok((name.to_ascii_uppercase(), params))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn keyword(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' || (c == '!' && out.is_empty()) {
                out.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        out
    }

    fn list(&mut self) -> Result<Vec<StepValue>, String> {
        if self.depth >= MAX_LIST_DEPTH {
            return Err(format!("lists nested deeper than {MAX_LIST_DEPTH} at {}", self.pos));
        }
        self.depth += 1;
        let items = self.list_items();
        self.depth -= 1;
        items
    }

    fn list_items(&mut self) -> Result<Vec<StepValue>, String> {
        if self.bump() != Some('(') {
            return Err(format!("expected '(' at {}", self.pos));
        }
        let mut items = Vec::new();
        self.skip_ws();
        if self.peek() == Some(')') {
            self.pos += 1;
            return Ok(items);
        }
        loop {
            items.push(self.value()?);
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some(')') => break,
                other => return Err(format!("expected ',' or ')' but found {other:?}")),
            }
        }
        Ok(items)
    }

    fn value(&mut self) -> Result<StepValue, String> {
        self.skip_ws();
        match self.peek() {
            Some('$') => {
                self.pos += 1;
                Ok(StepValue::Unset)
            }
            Some('*') => {
                self.pos += 1;
                Ok(StepValue::Derived)
            }
            Some('#') => {
                self.pos += 1;
                let digits = self.take_while(|c| c.is_ascii_digit());
                digits
                    .parse::<u64>()
                    .map(StepValue::Ref)
                    .map_err(|error| format!("bad reference #{digits}: {error}"))
            }
            Some('\'') => self.string(),
            Some('"') => {
                self.pos += 1;
                let raw = self.take_while(|c| c != '"');
                self.bump();
                Ok(StepValue::String(raw))
            }
            Some('.') => {
                self.pos += 1;
                let literal = self.take_while(|c| c != '.');
                if self.bump() != Some('.') {
                    return Err("unterminated enumeration".to_string());
                }
                Ok(StepValue::Enum(literal.trim().to_ascii_uppercase()))
            }
            Some('(') => Ok(StepValue::List(self.list()?)),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' => self.number(),
            Some(c) if c.is_ascii_alphabetic() || c == '!' => {
                let name = self.keyword().to_ascii_uppercase();
                self.skip_ws();
                let mut inner = self.list()?;
                let value = if inner.len() == 1 {
                    inner.remove(0)
                } else {
                    StepValue::List(inner)
                };
                Ok(StepValue::Typed {
                    name,
                    value: Box::new(value),
                })
            }
            Some(c) => Err(format!("unexpected character {c:?} at {}", self.pos)),
            None => Err("unexpected end of instance".to_string()),
        }
    }

    fn number(&mut self) -> Result<StepValue, String> {
        let literal =
            self.take_while(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'));
        let is_real = literal.contains(['.', 'e', 'E']);
        if !is_real {
            if let Ok(value) = literal.parse::<i64>() {
                return Ok(StepValue::Integer(value));
            }
        }
        literal
            .parse::<f64>()
            .map(StepValue::Real)
            .map_err(|error| format!("bad number {literal}: {error}"))
    }

    fn string(&mut self) -> Result<StepValue, String> {
        self.pos += 1;
        let mut raw = String::new();
        loop {
            match self.bump() {
                Some('\'') if self.peek() == Some('\'') => {
                    self.pos += 1;
                    raw.push('\'');
                }
                Some('\'') => break,
                Some(c) => raw.push(c),
                None => return Err("unterminated string".to_string()),
            }
        }
        Ok(StepValue::String(decode_step_string(&raw)))
    }

    fn take_while(&mut self, keep: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if !keep(c) {
                break;
            }
            out.push(c);
            self.pos += 1;
        }
        out
    }
}

/// Decodes the `\X\`, `\X2\`, `\X4\`, `\S\` and `\\` control directives of
/// STEP string literals.
pub fn decode_step_string(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    let mut out = String::with_capacity(raw.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '\\' {
            out.push(chars[i]);
            i += 1;
            continue;
        }

        let rest: String = chars[i..chars.len().min(i + 4)].iter().collect();
        if rest.starts_with("\\\\") {
            out.push('\\');
            i += 2;
        } else if rest.starts_with("\\X2\\") || rest.starts_with("\\X4\\") {
            let width = if rest.starts_with("\\X2\\") { 4 } else { 8 };
            i += 4;
            while i + width <= chars.len() && chars[i] != '\\' {
                let hex: String = chars[i..i + width].iter().collect();
                if let Some(decoded) = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32)
                {
                    out.push(decoded);
                }
                i += width;
            }
            let terminator: String = chars[i..chars.len().min(i + 4)].iter().collect();
            if terminator == "\\X0\\" {
                i += 4;
            }
        } else if rest.starts_with("\\X\\") && i + 5 <= chars.len() {
            let hex: String = chars[i + 3..i + 5].iter().collect();
            match u8::from_str_radix(&hex, 16) {
                Ok(byte) => out.push(char::from(byte)),
                Err(_) => out.push_str(&rest),
            }
            i += 5;
        } else if rest.starts_with("\\S\\") && i + 4 <= chars.len() {
            let shifted = u32::from(chars[i + 3]) + 128;
            out.push(char::from_u32(shifted).unwrap_or(chars[i + 3]));
            i += 4;
        } else {
            out.push('\\');
            i += 1;
        }
    }

    out
}
