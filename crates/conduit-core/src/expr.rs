//! Restricted boolean expressions over execution data.
//!
//! Grammar:
//!
//! ```text
//! or      := and ( "||" and )*
//! and     := unary ( "&&" unary )*
//! unary   := "!" unary | compare
//! compare := operand ( ( "==" | "!=" | ">" | ">=" | "<" | "<=" | "contains" ) operand )?
//! operand := number | string | true | false | null | {{path}} | path | "(" or ")"
//! ```
//!
//! Paths are dotted (`lead.score`, `items.0`) and resolve to `null` when
//! missing. There are no calls or assignments.

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;

use crate::error::{ConduitError, Result};
use crate::template::lookup;

/// A parsed condition, ready to evaluate any number of times.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    root: Expr,
}

impl Condition {
    pub fn parse(source: &str) -> Result<Self> {
        let invalid = |message: String| ConduitError::InvalidCondition {
            condition: source.to_string(),
            message,
        };
        let tokens = tokenize(source).map_err(invalid)?;
        if tokens.is_empty() {
            return Err(invalid("empty expression".into()));
        }
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.parse_or().map_err(invalid)?;
        if let Some(tok) = parser.peek() {
            return Err(invalid(format!("unexpected token {}", tok)));
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn evaluate(&self, data: &Value) -> bool {
        truthy(&self.root.eval(data))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parse and evaluate in one go.
pub fn evaluate(source: &str, data: &Value) -> Result<bool> {
    Ok(Condition::parse(source)?.evaluate(data))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Path(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, CmpOp, Box<Expr>),
}

impl Expr {
    fn eval(&self, data: &Value) -> Value {
        match self {
            Expr::Literal(v) => v.clone(),
            Expr::Path(p) => lookup(data, p).cloned().unwrap_or(Value::Null),
            Expr::Not(inner) => Value::Bool(!truthy(&inner.eval(data))),
            Expr::And(l, r) => Value::Bool(truthy(&l.eval(data)) && truthy(&r.eval(data))),
            Expr::Or(l, r) => Value::Bool(truthy(&l.eval(data)) || truthy(&r.eval(data))),
            Expr::Compare(l, op, r) => Value::Bool(compare(&l.eval(data), *op, &r.eval(data))),
        }
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}

/// Numbers, and strings that parse as numbers.
fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Number(_), _) | (_, Value::Number(_)) => {
            matches!((as_number(a), as_number(b)), (Some(x), Some(y)) if x == y)
        }
        _ => false,
    }
}

fn ordering(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn compare(a: &Value, op: CmpOp, b: &Value) -> bool {
    match op {
        CmpOp::Eq => loose_eq(a, b),
        CmpOp::Ne => !loose_eq(a, b),
        CmpOp::Gt => ordering(a, b) == Some(Ordering::Greater),
        CmpOp::Ge => matches!(ordering(a, b), Some(Ordering::Greater | Ordering::Equal)),
        CmpOp::Lt => ordering(a, b) == Some(Ordering::Less),
        CmpOp::Le => matches!(ordering(a, b), Some(Ordering::Less | Ordering::Equal)),
        CmpOp::Contains => match a {
            Value::String(s) => match b {
                Value::String(needle) => s.contains(needle.as_str()),
                Value::Null => false,
                other => s.contains(&other.to_string()),
            },
            Value::Array(items) => items.iter().any(|item| loose_eq(item, b)),
            Value::Object(map) => b.as_str().is_some_and(|k| map.contains_key(k)),
            _ => false,
        },
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Placeholder(String),
    Op(CmpOp),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{}", n),
            Token::Str(s) => write!(f, "'{}'", s),
            Token::Ident(s) => write!(f, "{}", s),
            Token::Placeholder(s) => write!(f, "{{{{{}}}}}", s),
            Token::Op(op) => write!(f, "{:?}", op),
            Token::And => write!(f, "&&"),
            Token::Or => write!(f, "||"),
            Token::Not => write!(f, "!"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

fn tokenize(src: &str) -> std::result::Result<Vec<Token>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Op(CmpOp::Eq));
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Op(CmpOp::Ne));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '>' | '<' => {
                let inclusive = next == Some('=');
                let op = match (c, inclusive) {
                    ('>', false) => CmpOp::Gt,
                    ('>', true) => CmpOp::Ge,
                    ('<', false) => CmpOp::Lt,
                    _ => CmpOp::Le,
                };
                tokens.push(Token::Op(op));
                i += if inclusive { 2 } else { 1 };
            }
            '{' if next == Some('{') => {
                let start = i + 2;
                let mut end = start;
                while end + 1 < chars.len() && !(chars[end] == '}' && chars[end + 1] == '}') {
                    end += 1;
                }
                if end + 1 >= chars.len() {
                    return Err("unterminated placeholder".into());
                }
                let key: String = chars[start..end].iter().collect::<String>().trim().to_string();
                if key.is_empty() || !key.chars().all(|c| is_ident_char(c) || c == '-') {
                    return Err(format!("invalid placeholder '{}'", key));
                }
                tokens.push(Token::Placeholder(key));
                i = end + 2;
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string literal".into()),
                        Some('\\') => {
                            if let Some(&escaped) = chars.get(i + 1) {
                                s.push(escaped);
                            }
                            i += 2;
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{}'", text))?;
                tokens.push(Token::Number(n));
            }
            c if is_ident_start(c) => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "contains" => Token::Op(CmpOp::Contains),
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

type ParseResult = std::result::Result<Expr, String>;

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn parse_or(&mut self) -> ParseResult {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ParseResult {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> ParseResult {
        let left = self.parse_operand()?;
        if let Some(Token::Op(op)) = self.peek().cloned() {
            self.pos += 1;
            let right = self.parse_operand()?;
            return Ok(Expr::Compare(Box::new(left), op, Box::new(right)));
        }
        Ok(left)
    }

    fn parse_operand(&mut self) -> ParseResult {
        match self.bump() {
            Some(Token::Number(n)) => Ok(Expr::Literal(
                serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            )),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Placeholder(p)) => Ok(Expr::Path(p)),
            Some(Token::Ident(word)) => Ok(match word.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" => Expr::Literal(Value::Null),
                _ => Expr::Path(word),
            }),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.bump() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("expected ')'".into()),
                }
            }
            Some(tok) => Err(format!("unexpected token {}", tok)),
            None => Err("unexpected end of expression".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(src: &str, data: &Value) -> bool {
        evaluate(src, data).unwrap()
    }

    #[test]
    fn placeholder_comparisons() {
        let data = json!({ "leadScore": 50, "tier": "gold" });
        assert!(!eval("{{leadScore}} >= 80", &data));
        assert!(eval("{{leadScore}} < 80", &data));
        assert!(eval("{{tier}} == 'gold'", &data));
        assert!(eval("tier != \"silver\"", &data));
    }

    #[test]
    fn numeric_strings_compare_as_numbers() {
        let data = json!({ "amount": "1200" });
        assert!(eval("{{amount}} > 999", &data));
        assert!(eval("{{amount}} == 1200", &data));
    }

    #[test]
    fn boolean_connectives_and_grouping() {
        let data = json!({ "a": 1, "b": 0, "lead": { "verified": true } });
        assert!(eval("{{a}} == 1 && lead.verified", &data));
        assert!(eval("!(b || {{a}} > 5)", &data));
        assert!(!eval("b && {{a}}", &data));
        assert!(eval("a > 0 and not b", &data));
    }

    #[test]
    fn missing_keys_are_null() {
        let data = json!({});
        assert!(!eval("{{score}} >= 80", &data));
        assert!(eval("{{score}} == null", &data));
        assert!(!eval("{{score}}", &data));
    }

    #[test]
    fn contains_on_strings_arrays_objects() {
        let data = json!({ "email": "ada@example.com", "tags": ["vip", "b2b"], "meta": { "src": 1 } });
        assert!(eval("{{email}} contains '@example'", &data));
        assert!(eval("tags contains 'vip'", &data));
        assert!(!eval("tags contains 'churned'", &data));
        assert!(eval("meta contains 'src'", &data));
    }

    #[test]
    fn rejects_malformed_input() {
        for bad in ["", "{{a}} >", "(a == 1", "a == 1 )", "{{a", "a = 1", "f(x)", "'open"] {
            let err = Condition::parse(bad).unwrap_err();
            assert!(
                matches!(err, ConduitError::InvalidCondition { .. }),
                "expected parse failure for {:?}",
                bad
            );
        }
    }

    #[test]
    fn parsed_condition_is_reusable() {
        let cond = Condition::parse("{{n}} > 2").unwrap();
        assert!(cond.evaluate(&json!({ "n": 3 })));
        assert!(!cond.evaluate(&json!({ "n": 1 })));
        assert_eq!(cond.to_string(), "{{n}} > 2");
    }
}
