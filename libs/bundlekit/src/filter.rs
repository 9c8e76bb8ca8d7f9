//! LDAP-style filter expressions over service properties.
//!
//! Listeners and lookups can narrow the registrations they see with a filter such as
//! `(objectclass=dyn greeter_sdk::api::Greeter)` or
//! `(&(objectclass=...)(service.ranking>=10))`.
//!
//! Supported grammar:
//!
//! ```text
//! filter = "(" ( "&" filter+ | "|" filter+ | "!" filter | item ) ")"
//! item   = attr ( "=" | "~=" | ">=" | "<=" ) value
//! ```
//!
//! - `(attr=*)` tests presence; any other unescaped `*` in an `=` value is a wildcard.
//! - Attribute names are case-insensitive; whitespace around attribute names and between
//!   filter components is ignored. Values are taken verbatim.
//! - `\` escapes the next character in a value.
//! - Array properties match when any element matches.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::service_registry::{OBJECTCLASS, Properties, type_identity};

/// Syntax error raised while parsing a filter expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("empty filter expression")]
    Empty,
    #[error("unexpected end of filter expression")]
    UnexpectedEnd,
    #[error("expected '{expected}' at offset {offset}")]
    Expected { expected: char, offset: usize },
    #[error("unexpected character '{found}' at offset {offset}")]
    Unexpected { found: char, offset: usize },
    #[error("missing attribute name at offset {offset}")]
    MissingAttribute { offset: usize },
    #[error("'{operator}' needs at least one operand at offset {offset}")]
    MissingOperand { operator: char, offset: usize },
    #[error("trailing input at offset {offset}")]
    Trailing { offset: usize },
}

/// Parsed filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equal { attr: String, value: String },
    /// `=` value containing wildcards, split on every unescaped `*`.
    Substring { attr: String, parts: Vec<String> },
    Present { attr: String },
    Approx { attr: String, value: String },
    GreaterEq { attr: String, value: String },
    LessEq { attr: String, value: String },
}

impl Filter {
    /// Parse a filter expression.
    ///
    /// # Errors
    /// Returns `FilterError` describing the first syntax problem and where it occurred.
    pub fn parse(src: &str) -> Result<Self, FilterError> {
        if src.trim().is_empty() {
            return Err(FilterError::Empty);
        }
        let mut parser = Parser { src, pos: 0 };
        let filter = parser.filter()?;
        parser.skip_ws();
        if parser.pos < src.len() {
            return Err(FilterError::Trailing { offset: parser.pos });
        }
        Ok(filter)
    }

    /// `(objectclass=<type identity of T>)`.
    #[must_use]
    pub fn object_class<T: ?Sized + 'static>() -> Self {
        Self::Equal {
            attr: OBJECTCLASS.to_owned(),
            value: type_identity::<T>().to_owned(),
        }
    }

    /// Evaluate the filter against a property set.
    #[must_use]
    pub fn matches(&self, props: &Properties) -> bool {
        match self {
            Self::And(items) => items.iter().all(|f| f.matches(props)),
            Self::Or(items) => items.iter().any(|f| f.matches(props)),
            Self::Not(inner) => !inner.matches(props),
            Self::Present { attr } => lookup(props, attr).is_some_and(|v| !v.is_null()),
            Self::Equal { attr, value } => any_scalar(props, attr, |s| {
                compare(s, value).is_some_and(Ordering::is_eq)
            }),
            Self::Substring { attr, parts } => {
                any_scalar(props, attr, |s| s.as_text().is_some_and(|t| glob(&t, parts)))
            }
            Self::Approx { attr, value } => {
                let wanted = normalize(value);
                any_scalar(props, attr, |s| s.as_text().is_some_and(|t| normalize(&t) == wanted))
            }
            Self::GreaterEq { attr, value } => any_scalar(props, attr, |s| {
                order(s, value).is_some_and(Ordering::is_ge)
            }),
            Self::LessEq { attr, value } => any_scalar(props, attr, |s| {
                order(s, value).is_some_and(Ordering::is_le)
            }),
        }
    }
}

impl FromStr for Filter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And(items) => write_group(f, '&', items),
            Self::Or(items) => write_group(f, '|', items),
            Self::Not(inner) => write!(f, "(!{inner})"),
            Self::Equal { attr, value } => write!(f, "({attr}={})", Escaped(value)),
            Self::Substring { attr, parts } => {
                write!(f, "({attr}=")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str("*")?;
                    }
                    write!(f, "{}", Escaped(part))?;
                }
                f.write_str(")")
            }
            Self::Present { attr } => write!(f, "({attr}=*)"),
            Self::Approx { attr, value } => write!(f, "({attr}~={})", Escaped(value)),
            Self::GreaterEq { attr, value } => write!(f, "({attr}>={})", Escaped(value)),
            Self::LessEq { attr, value } => write!(f, "({attr}<={})", Escaped(value)),
        }
    }
}

fn write_group(f: &mut fmt::Formatter<'_>, op: char, items: &[Filter]) -> fmt::Result {
    write!(f, "({op}")?;
    for item in items {
        write!(f, "{item}")?;
    }
    f.write_str(")")
}

struct Escaped<'a>(&'a str);

impl fmt::Display for Escaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.0.chars() {
            if matches!(c, '(' | ')' | '*' | '\\') {
                f.write_str("\\")?;
            }
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

// ===== parser =====

enum Op {
    Eq,
    Approx,
    Ge,
    Le,
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), FilterError> {
        match self.peek() {
            Some(c) if c == expected => {
                self.bump();
                Ok(())
            }
            Some(_) => Err(FilterError::Expected {
                expected,
                offset: self.pos,
            }),
            None => Err(FilterError::UnexpectedEnd),
        }
    }

    fn filter(&mut self) -> Result<Filter, FilterError> {
        self.skip_ws();
        self.expect('(')?;
        self.skip_ws();
        let filter = match self.peek() {
            Some('&') => {
                self.bump();
                Filter::And(self.operands('&')?)
            }
            Some('|') => {
                self.bump();
                Filter::Or(self.operands('|')?)
            }
            Some('!') => {
                self.bump();
                Filter::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(FilterError::UnexpectedEnd),
        };
        self.skip_ws();
        self.expect(')')?;
        Ok(filter)
    }

    fn operands(&mut self, operator: char) -> Result<Vec<Filter>, FilterError> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() != Some('(') {
                break;
            }
            items.push(self.filter()?);
        }
        if items.is_empty() {
            return Err(FilterError::MissingOperand {
                operator,
                offset: self.pos,
            });
        }
        Ok(items)
    }

    fn item(&mut self) -> Result<Filter, FilterError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, '=' | '~' | '<' | '>' | '(' | ')') {
                break;
            }
            self.bump();
        }
        let attr = self.src[start..self.pos].trim();
        if attr.is_empty() {
            return Err(FilterError::MissingAttribute { offset: start });
        }
        let attr = attr.to_ascii_lowercase();

        let op_offset = self.pos;
        let op = match self.bump() {
            Some('=') => Op::Eq,
            Some('~') => {
                self.expect('=')?;
                Op::Approx
            }
            Some('>') => {
                self.expect('=')?;
                Op::Ge
            }
            Some('<') => {
                self.expect('=')?;
                Op::Le
            }
            Some(found) => {
                return Err(FilterError::Unexpected {
                    found,
                    offset: op_offset,
                });
            }
            None => return Err(FilterError::UnexpectedEnd),
        };

        let parts = self.value()?;
        Ok(match op {
            Op::Eq if parts.len() == 2 && parts.iter().all(String::is_empty) => {
                Filter::Present { attr }
            }
            Op::Eq if parts.len() > 1 => Filter::Substring { attr, parts },
            Op::Eq => Filter::Equal {
                attr,
                value: parts.concat(),
            },
            Op::Approx => Filter::Approx {
                attr,
                value: parts.join("*"),
            },
            Op::Ge => Filter::GreaterEq {
                attr,
                value: parts.join("*"),
            },
            Op::Le => Filter::LessEq {
                attr,
                value: parts.join("*"),
            },
        })
    }

    /// Value up to the closing paren, split on unescaped `*`.
    fn value(&mut self) -> Result<Vec<String>, FilterError> {
        let mut parts = vec![String::new()];
        loop {
            let offset = self.pos;
            match self.peek() {
                None => return Err(FilterError::UnexpectedEnd),
                Some(')') => break,
                Some('(') => return Err(FilterError::Unexpected { found: '(', offset }),
                Some('*') => {
                    self.bump();
                    parts.push(String::new());
                }
                Some('\\') => {
                    self.bump();
                    let escaped = self.bump().ok_or(FilterError::UnexpectedEnd)?;
                    push_char(&mut parts, escaped);
                }
                Some(c) => {
                    self.bump();
                    push_char(&mut parts, c);
                }
            }
        }
        Ok(parts)
    }
}

fn push_char(parts: &mut [String], c: char) {
    if let Some(last) = parts.last_mut() {
        last.push(c);
    }
}

// ===== evaluation =====

/// Scalar view of a property value.
enum Scalar<'a> {
    Text(&'a str),
    Number(&'a serde_json::Number),
    Bool(bool),
}

impl Scalar<'_> {
    fn as_text(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some((*s).to_owned()),
            Self::Number(n) => Some(n.to_string()),
            Self::Bool(b) => Some(b.to_string()),
        }
    }
}

fn lookup<'a>(props: &'a Properties, attr: &str) -> Option<&'a serde_json::Value> {
    props
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(attr))
        .map(|(_, v)| v)
}

fn scalar(value: &serde_json::Value) -> Option<Scalar<'_>> {
    match value {
        serde_json::Value::String(s) => Some(Scalar::Text(s)),
        serde_json::Value::Number(n) => Some(Scalar::Number(n)),
        serde_json::Value::Bool(b) => Some(Scalar::Bool(*b)),
        _ => None,
    }
}

fn any_scalar(props: &Properties, attr: &str, pred: impl Fn(&Scalar<'_>) -> bool) -> bool {
    match lookup(props, attr) {
        Some(serde_json::Value::Array(items)) => items.iter().filter_map(scalar).any(|s| pred(&s)),
        Some(value) => scalar(value).is_some_and(|s| pred(&s)),
        None => false,
    }
}

/// Equality test for `=`: numbers compare numerically, everything else verbatim.
fn compare(prop: &Scalar<'_>, operand: &str) -> Option<Ordering> {
    match prop {
        Scalar::Text(s) => Some((*s).cmp(operand)),
        Scalar::Number(n) => {
            let rhs: f64 = operand.trim().parse().ok()?;
            n.as_f64()?.partial_cmp(&rhs)
        }
        Scalar::Bool(b) => {
            let rhs: bool = operand.trim().to_ascii_lowercase().parse().ok()?;
            Some(b.cmp(&rhs))
        }
    }
}

/// Ordering for `>=`/`<=`: numeric when both sides parse as numbers, lexical otherwise.
fn order(prop: &Scalar<'_>, operand: &str) -> Option<Ordering> {
    let lhs = prop.as_text()?;
    match (lhs.trim().parse::<f64>(), operand.trim().parse::<f64>()) {
        (Ok(a), Ok(b)) => a.partial_cmp(&b),
        _ => Some(lhs.as_str().cmp(operand)),
    }
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Wildcard match where `parts` are the literal segments between `*`s.
fn glob(text: &str, parts: &[String]) -> bool {
    let Some((first, rest)) = parts.split_first() else {
        return text.is_empty();
    };
    let Some(mut remaining) = text.strip_prefix(first.as_str()) else {
        return false;
    };
    let Some((last, middle)) = rest.split_last() else {
        return remaining.is_empty();
    };
    for part in middle {
        match remaining.find(part.as_str()) {
            Some(idx) => remaining = &remaining[idx + part.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last.as_str())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(pairs: &[(&str, serde_json::Value)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    #[test]
    fn parses_simple_equality() {
        let f = Filter::parse("(objectclass=demo.Greeter)").unwrap();
        assert_eq!(
            f,
            Filter::Equal {
                attr: "objectclass".into(),
                value: "demo.Greeter".into()
            }
        );
    }

    #[test]
    fn attribute_names_are_case_insensitive() {
        let f = Filter::parse("(ObjectClass=demo.Greeter)").unwrap();
        let p = props(&[("objectClass", json!("demo.Greeter"))]);
        assert!(f.matches(&p));
    }

    #[test]
    fn values_keep_inner_spaces() {
        let f = Filter::parse("( objectclass =dyn a::B)").unwrap();
        let p = props(&[("objectclass", json!("dyn a::B"))]);
        assert!(f.matches(&p));
    }

    #[test]
    fn composite_filters() {
        let f = Filter::parse("(&(objectclass=x)(|(vendor=acme)(!(tier=gold))))").unwrap();
        assert!(f.matches(&props(&[("objectclass", json!("x")), ("vendor", json!("acme"))])));
        assert!(f.matches(&props(&[("objectclass", json!("x")), ("tier", json!("silver"))])));
        assert!(!f.matches(&props(&[("objectclass", json!("x")), ("tier", json!("gold"))])));
        assert!(!f.matches(&props(&[("objectclass", json!("y"))])));
    }

    #[test]
    fn presence_and_wildcards() {
        let present = Filter::parse("(vendor=*)").unwrap();
        assert_eq!(
            present,
            Filter::Present {
                attr: "vendor".into()
            }
        );
        assert!(present.matches(&props(&[("vendor", json!("acme"))])));
        assert!(!present.matches(&props(&[])));

        let sub = Filter::parse("(name=gr*t*er)").unwrap();
        assert!(sub.matches(&props(&[("name", json!("greeter"))])));
        assert!(sub.matches(&props(&[("name", json!("grXtYer"))])));
        assert!(!sub.matches(&props(&[("name", json!("greet"))])));

        let prefix = Filter::parse("(name=hello*)").unwrap();
        assert!(prefix.matches(&props(&[("name", json!("hello world"))])));
    }

    #[test]
    fn numeric_ordering() {
        let ge = Filter::parse("(service.ranking>=10)").unwrap();
        assert!(ge.matches(&props(&[("service.ranking", json!(10))])));
        assert!(ge.matches(&props(&[("service.ranking", json!(100))])));
        assert!(!ge.matches(&props(&[("service.ranking", json!(9))])));

        let le = Filter::parse("(service.ranking<=-1)").unwrap();
        assert!(le.matches(&props(&[("service.ranking", json!(-5))])));
    }

    #[test]
    fn numeric_strings_order_numerically() {
        let ge = Filter::parse("(version>=9)").unwrap();
        assert!(ge.matches(&props(&[("version", json!("10"))])));
        assert!(!ge.matches(&props(&[("version", json!("8.5"))])));

        let le = Filter::parse("(weight<=2.5)").unwrap();
        assert!(le.matches(&props(&[("weight", json!("2"))])));
        assert!(!le.matches(&props(&[("weight", json!(" 3 "))])));
    }

    #[test]
    fn non_numeric_operands_order_lexically() {
        let le = Filter::parse("(size<=abc)").unwrap();
        assert!(le.matches(&props(&[("size", json!(5))])));

        let ge = Filter::parse("(size>=abc)").unwrap();
        assert!(!ge.matches(&props(&[("size", json!(5))])));
    }

    #[test]
    fn strings_order_lexically() {
        let ge = Filter::parse("(language>=en)").unwrap();
        assert!(ge.matches(&props(&[("language", json!("fr"))])));
        assert!(ge.matches(&props(&[("language", json!("en"))])));
        assert!(!ge.matches(&props(&[("language", json!("de"))])));

        let le = Filter::parse("(name<=m)").unwrap();
        assert!(le.matches(&props(&[("name", json!("john"))])));
        assert!(!le.matches(&props(&[("name", json!("zoe"))])));
    }

    #[test]
    fn approx_ignores_case_and_whitespace() {
        let f = Filter::parse("(vendor~=Acme Corp)").unwrap();
        assert!(f.matches(&props(&[("vendor", json!("ACMECORP"))])));
    }

    #[test]
    fn arrays_match_any_element() {
        let f = Filter::parse("(objectclass=b)").unwrap();
        assert!(f.matches(&props(&[("objectclass", json!(["a", "b"]))])));
        assert!(!f.matches(&props(&[("objectclass", json!(["a", "c"]))])));
    }

    #[test]
    fn escapes_round_trip_through_display() {
        let f = Filter::parse(r"(name=a\*b\(c\))").unwrap();
        assert_eq!(
            f,
            Filter::Equal {
                attr: "name".into(),
                value: "a*b(c)".into()
            }
        );
        assert_eq!(Filter::parse(&f.to_string()).unwrap(), f);
    }

    #[test]
    fn object_class_helper_matches_registry_identity() {
        trait Probe {}
        let f = Filter::object_class::<dyn Probe>();
        let p = props(&[(OBJECTCLASS, json!(type_identity::<dyn Probe>()))]);
        assert!(f.matches(&p));
        assert_eq!(Filter::parse(&f.to_string()).unwrap(), f);
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(Filter::parse(""), Err(FilterError::Empty));
        assert_eq!(
            Filter::parse("objectclass=x"),
            Err(FilterError::Expected {
                expected: '(',
                offset: 0
            })
        );
        assert_eq!(
            Filter::parse("(objectclass=x"),
            Err(FilterError::UnexpectedEnd)
        );
        assert_eq!(
            Filter::parse("(=x)"),
            Err(FilterError::MissingAttribute { offset: 1 })
        );
        assert_eq!(
            Filter::parse("(&)"),
            Err(FilterError::MissingOperand {
                operator: '&',
                offset: 2
            })
        );
        assert_eq!(
            Filter::parse("(a=b))"),
            Err(FilterError::Trailing { offset: 5 })
        );
        assert_eq!(
            Filter::parse("(a>b)"),
            Err(FilterError::Expected {
                expected: '=',
                offset: 3
            })
        );
        assert!(Filter::parse("(a=(b))").is_err());
    }
}
