//! Bounded condition language for `depends_on.condition` (spec.md §4.5
//! step 4). Deliberately not Turing-complete: field access, literals,
//! `==`/`!=`/`<`/`<=`/`>`/`>=`, `&&`/`||`/`!`, `len(...)`, and `in`
//! membership over the predecessor's parsed output. No loops, no
//! function calls beyond `len`, no assignment.

use serde_json::Value;
use std::fmt;

#[derive(Debug)]
pub enum ConditionError {
    Parse(String),
    Eval(String),
}

impl fmt::Display for ConditionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionError::Parse(msg) => write!(f, "condition parse error: {msg}"),
            ConditionError::Eval(msg) => write!(f, "condition eval error: {msg}"),
        }
    }
}

impl std::error::Error for ConditionError {}

/// Parses `raw` (a predecessor agent's `output_text`) as JSON, first
/// stripping a fenced code block if the whole body is wrapped in one.
/// Non-JSON output is wrapped as `{"text": raw, "raw": raw}` rather than
/// rejected outright (spec.md §4.5 step 5).
pub fn parse_predecessor_output(raw: &str) -> Value {
    let stripped = strip_fenced_code_block(raw);
    match serde_json::from_str::<Value>(stripped) {
        Ok(v) => v,
        Err(_) => serde_json::json!({ "text": raw, "raw": raw }),
    }
}

fn strip_fenced_code_block(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_alphabetic());
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    match rest.rfind("```") {
        Some(end) => rest[..end].trim(),
        None => rest.trim(),
    }
}

/// Evaluates `expr` against `predecessor_output`, bound to the
/// identifier `output` (e.g. `"output.ok == true"`).
pub fn evaluate(expr: &str, predecessor_output: &Value) -> Result<bool, ConditionError> {
    let root = serde_json::json!({ "output": predecessor_output });
    let tokens = tokenize(expr)?;
    let mut parser = Parser { tokens, pos: 0 };
    let ast = parser.parse_or()?;
    parser.expect_end()?;
    Ok(truthy(&ast.eval(&root)?))
}

#[derive(Debug, Clone)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    True,
    False,
    Null,
    Op(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    And,
    Or,
    Not,
    In,
    Len,
}

fn tokenize(src: &str) -> Result<Vec<Token>, ConditionError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op("!=".into()));
                    i += 2;
                } else {
                    tokens.push(Token::Not);
                    i += 1;
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op("==".into()));
                    i += 2;
                } else {
                    return Err(ConditionError::Parse("expected '=='".into()));
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op("<=".into()));
                    i += 2;
                } else {
                    tokens.push(Token::Op("<".into()));
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(">=".into()));
                    i += 2;
                } else {
                    tokens.push(Token::Op(">".into()));
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::And);
                    i += 2;
                } else {
                    return Err(ConditionError::Parse("expected '&&'".into()));
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::Or);
                    i += 2;
                } else {
                    return Err(ConditionError::Parse("expected '||'".into()));
                }
            }
            '"' | '\'' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(ConditionError::Parse("unterminated string".into()));
                }
                i += 1;
                tokens.push(Token::Str(s));
            }
            _ if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).is_some_and(|c| c.is_ascii_digit())) =>
            {
                let start = i;
                if c == '-' {
                    i += 1;
                }
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let s: String = chars[start..i].iter().collect();
                let n: f64 = s
                    .parse()
                    .map_err(|_| ConditionError::Parse(format!("bad number '{s}'")))?;
                tokens.push(Token::Number(n));
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let s: String = chars[start..i].iter().collect();
                tokens.push(match s.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    "in" => Token::In,
                    "len" => Token::Len,
                    _ => Token::Ident(s),
                });
            }
            other => return Err(ConditionError::Parse(format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.next();
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.parse_not()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.next();
            let rhs = self.parse_not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, ConditionError> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.next();
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ConditionError> {
        let lhs = self.parse_primary()?;
        if let Some(Token::Op(op)) = self.peek().cloned() {
            self.next();
            let rhs = self.parse_primary()?;
            return Ok(Expr::Cmp(Box::new(lhs), CmpOp::parse(&op)?, Box::new(rhs)));
        }
        if matches!(self.peek(), Some(Token::In)) {
            self.next();
            let items = self.parse_list()?;
            return Ok(Expr::In(Box::new(lhs), items));
        }
        Ok(lhs)
    }

    fn parse_list(&mut self) -> Result<Vec<Expr>, ConditionError> {
        self.expect_token(&Token::LBracket)?;
        let mut items = Vec::new();
        if !matches!(self.peek(), Some(Token::RBracket)) {
            loop {
                items.push(self.parse_primary()?);
                if matches!(self.peek(), Some(Token::Comma)) {
                    self.next();
                    continue;
                }
                break;
            }
        }
        self.expect_token(&Token::RBracket)?;
        Ok(items)
    }

    fn parse_primary(&mut self) -> Result<Expr, ConditionError> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(Expr::Field(name)),
            Some(Token::Number(n)) => Ok(Expr::Lit(serde_json::json!(n))),
            Some(Token::Str(s)) => Ok(Expr::Lit(serde_json::json!(s))),
            Some(Token::True) => Ok(Expr::Lit(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Lit(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Lit(Value::Null)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect_token(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Len) => {
                self.expect_token(&Token::LParen)?;
                let inner = self.parse_or()?;
                self.expect_token(&Token::RParen)?;
                Ok(Expr::Len(Box::new(inner)))
            }
            other => Err(ConditionError::Parse(format!(
                "unexpected token in expression: {other:?}"
            ))),
        }
    }

    fn expect_token(&mut self, want: &Token) -> Result<(), ConditionError> {
        match self.next() {
            Some(t) if std::mem::discriminant(&t) == std::mem::discriminant(want) => Ok(()),
            other => Err(ConditionError::Parse(format!(
                "expected {want:?}, found {other:?}"
            ))),
        }
    }

    fn expect_end(&self) -> Result<(), ConditionError> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(ConditionError::Parse("trailing tokens after expression".into()))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn parse(s: &str) -> Result<Self, ConditionError> {
        Ok(match s {
            "==" => CmpOp::Eq,
            "!=" => CmpOp::Ne,
            "<" => CmpOp::Lt,
            "<=" => CmpOp::Le,
            ">" => CmpOp::Gt,
            ">=" => CmpOp::Ge,
            other => return Err(ConditionError::Parse(format!("unknown operator '{other}'"))),
        })
    }
}

#[derive(Debug)]
enum Expr {
    Field(String),
    Lit(Value),
    Len(Box<Expr>),
    Not(Box<Expr>),
    Cmp(Box<Expr>, CmpOp, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    In(Box<Expr>, Vec<Expr>),
}

impl Expr {
    fn eval(&self, root: &Value) -> Result<Value, ConditionError> {
        match self {
            Expr::Field(path) => Ok(resolve_field(root, path)),
            Expr::Lit(v) => Ok(v.clone()),
            Expr::Len(inner) => {
                let v = inner.eval(root)?;
                let len = match &v {
                    Value::Array(a) => a.len(),
                    Value::String(s) => s.chars().count(),
                    Value::Object(o) => o.len(),
                    Value::Null => 0,
                    _ => {
                        return Err(ConditionError::Eval(
                            "len() needs an array, string, object or null".into(),
                        ))
                    }
                };
                Ok(serde_json::json!(len))
            }
            Expr::Not(inner) => Ok(Value::Bool(!truthy(&inner.eval(root)?))),
            Expr::Cmp(l, op, r) => {
                let lv = l.eval(root)?;
                let rv = r.eval(root)?;
                Ok(Value::Bool(compare(&lv, *op, &rv)))
            }
            Expr::And(l, r) => Ok(Value::Bool(truthy(&l.eval(root)?) && truthy(&r.eval(root)?))),
            Expr::Or(l, r) => Ok(Value::Bool(truthy(&l.eval(root)?) || truthy(&r.eval(root)?))),
            Expr::In(needle, haystack) => {
                let needle_v = needle.eval(root)?;
                for item in haystack {
                    if compare(&needle_v, CmpOp::Eq, &item.eval(root)?) {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
        }
    }
}

fn resolve_field(root: &Value, path: &str) -> Value {
    let mut current = root;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(v) => current = v,
            None => return Value::Null,
        }
    }
    current.clone()
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn compare(l: &Value, op: CmpOp, r: &Value) -> bool {
    match op {
        CmpOp::Eq => l == r,
        CmpOp::Ne => l != r,
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let (Some(lf), Some(rf)) = (l.as_f64(), r.as_f64()) else {
                return false;
            };
            match op {
                CmpOp::Lt => lf < rf,
                CmpOp::Le => lf <= rf,
                CmpOp::Gt => lf > rf,
                CmpOp::Ge => lf >= rf,
                _ => unreachable!(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_equality() {
        let out = serde_json::json!({"ok": true});
        assert!(evaluate("output.ok == true", &out).unwrap());
    }

    #[test]
    fn numeric_comparison() {
        let out = serde_json::json!({"score": 42});
        assert!(evaluate("output.score > 10", &out).unwrap());
        assert!(!evaluate("output.score > 100", &out).unwrap());
    }

    #[test]
    fn and_or_not() {
        let out = serde_json::json!({"ok": true, "count": 0});
        assert!(evaluate("output.ok && !(output.count > 0)", &out).unwrap());
        assert!(evaluate("output.ok || output.count > 0", &out).unwrap());
    }

    #[test]
    fn len_and_membership() {
        let out = serde_json::json!({"items": ["a", "b", "c"], "status": "done"});
        assert!(evaluate("len(output.items) == 3", &out).unwrap());
        assert!(evaluate("output.status in [\"done\", \"skipped\"]", &out).unwrap());
    }

    #[test]
    fn missing_field_is_null_and_falsy() {
        let out = serde_json::json!({});
        assert!(!evaluate("output.missing == true", &out).unwrap());
        assert!(evaluate("output.missing == null", &out).unwrap());
    }

    #[test]
    fn malformed_expression_is_a_parse_error() {
        let out = serde_json::json!({});
        assert!(evaluate("output.ok ===", &out).is_err());
        assert!(evaluate("(output.ok", &out).is_err());
    }

    #[test]
    fn parse_predecessor_output_strips_fences() {
        let raw = "```json\n{\"ok\": true}\n```";
        let v = parse_predecessor_output(raw);
        assert_eq!(v, serde_json::json!({"ok": true}));
    }

    #[test]
    fn parse_predecessor_output_wraps_plain_text() {
        let v = parse_predecessor_output("all good, no issues found");
        assert_eq!(v["text"], serde_json::json!("all good, no issues found"));
    }
}
