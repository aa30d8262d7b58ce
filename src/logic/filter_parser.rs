//! Recursive-descent parser for `$filter` expressions.
//!
//! Precedence, loosest first: `or`, `and`, `not`, comparison. Property paths
//! are left unbound here; binding against an entity type happens later so
//! this phase does not depend on the request path.

use chrono::{DateTime, Utc};
use serde_json::Number;

use crate::error::ParseError;
use crate::model::{
    ComparisonOp, FilterExpr, FilterFunction, FunctionCall, Literal, Operand, PropertyPath,
    ValueKind,
};

const OPTION: &str = "$filter";
const MAX_NESTING: usize = 32;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Comma,
    Ident(String),
    Literal(Literal),
}

fn err(reason: impl Into<String>) -> ParseError {
    ParseError::option(OPTION, reason)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '/' | '@' | '$')
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
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
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '\'' => {
                let (text, next) = read_quoted(&chars, i)?;
                tokens.push(Token::Literal(Literal::String(text)));
                i = next;
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || matches!(chars[i], '.' | ':' | '-' | '+'))
                {
                    i += 1;
                }
                let raw: String = chars[start..i].iter().collect();
                tokens.push(Token::Literal(parse_number_or_time(&raw)?));
            }
            c if is_ident_char(c) => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let lowered = word.to_ascii_lowercase();
                if (lowered == "geography" || lowered == "geometry") && chars.get(i) == Some(&'\'') {
                    let (wkt, next) = read_quoted(&chars, i)?;
                    tokens.push(Token::Literal(Literal::Geometry(wkt)));
                    i = next;
                    continue;
                }
                let token = match lowered.as_str() {
                    "true" => Token::Literal(Literal::Boolean(true)),
                    "false" => Token::Literal(Literal::Boolean(false)),
                    "null" => Token::Literal(Literal::Null),
                    _ => Token::Ident(word),
                };
                tokens.push(token);
            }
            other => return Err(err(format!("unexpected character '{}'", other))),
        }
    }
    Ok(tokens)
}

/// Reads a single-quoted string starting at `start`; `''` escapes a quote.
fn read_quoted(chars: &[char], start: usize) -> Result<(String, usize), ParseError> {
    let mut text = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == '\'' {
            if chars.get(i + 1) == Some(&'\'') {
                text.push('\'');
                i += 2;
                continue;
            }
            return Ok((text, i + 1));
        }
        text.push(chars[i]);
        i += 1;
    }
    Err(err("unterminated string literal"))
}

fn parse_number_or_time(raw: &str) -> Result<Literal, ParseError> {
    if raw.contains('T') || raw.matches('-').count() >= 2 {
        return DateTime::parse_from_rfc3339(raw)
            .map(|t| Literal::DateTime(t.with_timezone(&Utc)))
            .map_err(|_| err(format!("invalid date-time literal {}", raw)));
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Ok(Literal::Number(Number::from(n)));
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Literal::Number)
        .ok_or_else(|| err(format!("invalid numeric literal {}", raw)))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(word)) if word.eq_ignore_ascii_case(keyword))
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), ParseError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(err(format!("expected {}, found {}", what, describe(&token)))),
            None => Err(err(format!("expected {}, found end of input", what))),
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(err(format!("expression nested deeper than {}", MAX_NESTING)));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<FilterExpr<PropertyPath>, ParseError> {
        let mut left = self.parse_and()?;
        while self.peek_keyword("or") {
            self.pos += 1;
            let right = self.parse_and()?;
            left = FilterExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<FilterExpr<PropertyPath>, ParseError> {
        let mut left = self.parse_unary()?;
        while self.peek_keyword("and") {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = FilterExpr::and(left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<FilterExpr<PropertyPath>, ParseError> {
        if self.peek_keyword("not") {
            self.pos += 1;
            self.enter()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(FilterExpr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<FilterExpr<PropertyPath>, ParseError> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            self.enter()?;
            let inner = self.parse_or()?;
            self.depth -= 1;
            self.expect(Token::RParen, "')'")?;
            return Ok(inner);
        }

        let left = self.parse_operand()?;
        let op = match self.peek() {
            Some(Token::Ident(word)) => ComparisonOp::from_keyword(&word.to_ascii_lowercase()),
            _ => None,
        };
        match op {
            Some(op) => {
                self.pos += 1;
                let right = self.parse_operand()?;
                Ok(FilterExpr::Compare { op, left, right })
            }
            None => match left {
                Operand::Call(call) if call.function.result_kind() == ValueKind::Boolean => {
                    Ok(FilterExpr::Call(call))
                }
                _ => Err(err(match self.peek() {
                    Some(token) => format!("expected comparison operator, found {}", describe(token)),
                    None => "expected comparison operator, found end of input".to_string(),
                })),
            },
        }
    }

    fn parse_operand(&mut self) -> Result<Operand<PropertyPath>, ParseError> {
        match self.next() {
            Some(Token::Literal(literal)) => Ok(Operand::Literal(literal)),
            Some(Token::Ident(word)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let function = FilterFunction::from_name(&word)
                        .ok_or_else(|| err(format!("unknown function {}", word)))?;
                    self.enter()?;
                    let args = self.parse_arguments()?;
                    self.depth -= 1;
                    let (min, max) = function.arity();
                    if args.len() < min || args.len() > max {
                        return Err(err(format!(
                            "function {} takes {} argument(s), got {}",
                            function.name(),
                            if min == max { min.to_string() } else { format!("{}-{}", min, max) },
                            args.len()
                        )));
                    }
                    Ok(Operand::Call(FunctionCall { function, args }))
                } else if ComparisonOp::from_keyword(&word.to_ascii_lowercase()).is_some()
                    || ["and", "or", "not"].contains(&word.to_ascii_lowercase().as_str())
                {
                    Err(err(format!("unexpected keyword {}", word)))
                } else {
                    Ok(Operand::Property(PropertyPath::parse(&word)))
                }
            }
            Some(token) => Err(err(format!("expected operand, found {}", describe(&token)))),
            None => Err(err("expected operand, found end of input")),
        }
    }

    fn parse_arguments(&mut self) -> Result<Vec<Operand<PropertyPath>>, ParseError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.parse_operand()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                Some(token) => return Err(err(format!("expected ',' or ')', found {}", describe(&token)))),
                None => return Err(err("unclosed function call")),
            }
        }
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::LParen => "'('".to_string(),
        Token::RParen => "')'".to_string(),
        Token::Comma => "','".to_string(),
        Token::Ident(word) => format!("'{}'", word),
        Token::Literal(literal) => format!("literal {}", literal.to_json()),
    }
}

/// Parses a decoded `$filter` value into an unbound predicate tree.
pub fn parse_filter(input: &str) -> Result<FilterExpr<PropertyPath>, ParseError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(err("empty expression"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_or()?;
    if let Some(token) = parser.peek() {
        return Err(err(format!("unexpected {}", describe(token))));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(raw: &str) -> Operand<PropertyPath> {
        Operand::Property(PropertyPath::parse(raw))
    }

    #[test]
    fn test_simple_comparison() {
        let expr = parse_filter("name eq 'A'").unwrap();
        assert_eq!(
            expr,
            FilterExpr::Compare {
                op: ComparisonOp::Eq,
                left: path("name"),
                right: Operand::Literal(Literal::String("A".into())),
            }
        );
    }

    #[test]
    fn test_precedence_and_binds_tighter_than_or() {
        let expr = parse_filter("a eq 1 or b eq 2 and not c eq 3").unwrap();
        let FilterExpr::Or(left, right) = expr else {
            panic!("expected or at the root");
        };
        assert!(matches!(*left, FilterExpr::Compare { .. }));
        let FilterExpr::And(_, negated) = *right else {
            panic!("expected and on the right");
        };
        assert!(matches!(*negated, FilterExpr::Not(_)));
    }

    #[test]
    fn test_parentheses_override_precedence() {
        let expr = parse_filter("(a eq 1 or b eq 2) and c eq 3").unwrap();
        assert!(matches!(expr, FilterExpr::And(ref l, _) if matches!(**l, FilterExpr::Or(_, _))));
    }

    #[test]
    fn test_literals() {
        let expr = parse_filter("phenomenonTime ge 2024-05-01T10:00:00Z").unwrap();
        let FilterExpr::Compare { right: Operand::Literal(Literal::DateTime(t)), .. } = expr else {
            panic!("expected a date-time literal");
        };
        assert_eq!(t.to_rfc3339(), "2024-05-01T10:00:00+00:00");

        let expr = parse_filter("result lt -2.5").unwrap();
        assert!(matches!(
            expr,
            FilterExpr::Compare { right: Operand::Literal(Literal::Number(ref n)), .. } if n.as_f64() == Some(-2.5)
        ));

        let expr = parse_filter("name eq 'O''Brien'").unwrap();
        assert!(matches!(
            expr,
            FilterExpr::Compare { right: Operand::Literal(Literal::String(ref s)), .. } if s == "O'Brien"
        ));

        let expr = parse_filter("properties/active eq true").unwrap();
        assert!(matches!(
            expr,
            FilterExpr::Compare { left: Operand::Property(ref p), right: Operand::Literal(Literal::Boolean(true)), .. }
                if p.0 == vec!["properties", "active"]
        ));
    }

    #[test]
    fn test_functions() {
        let expr = parse_filter("startswith(name, 'Temp')").unwrap();
        assert!(matches!(expr, FilterExpr::Call(ref c) if c.function == FilterFunction::StartsWith));

        let expr = parse_filter("length(Thing/name) gt 3").unwrap();
        let FilterExpr::Compare { left: Operand::Call(call), .. } = expr else {
            panic!("expected a call operand");
        };
        assert_eq!(call.args, vec![path("Thing/name")]);

        let expr =
            parse_filter("geo.distance(location, geography'POINT(4.9 52.3)') lt 1000").unwrap();
        let FilterExpr::Compare { left: Operand::Call(call), .. } = expr else {
            panic!("expected a call operand");
        };
        assert_eq!(
            call.args[1],
            Operand::Literal(Literal::Geometry("POINT(4.9 52.3)".into()))
        );
    }

    #[test]
    fn test_errors_name_the_problem() {
        let e = parse_filter("length(name, 'x') eq 1").unwrap_err();
        assert!(e.to_string().contains("length takes 1 argument"));

        let e = parse_filter("frobnicate(name)").unwrap_err();
        assert!(e.to_string().contains("unknown function frobnicate"));

        let e = parse_filter("name 'A'").unwrap_err();
        assert!(e.to_string().contains("expected comparison operator"));

        let e = parse_filter("tolower(name)").unwrap_err();
        assert!(e.to_string().contains("expected comparison operator"));

        let e = parse_filter("name eq 'A").unwrap_err();
        assert!(e.to_string().contains("unterminated"));

        let e = parse_filter("(name eq 'A'").unwrap_err();
        assert!(e.to_string().contains("expected ')'"));

        assert!(parse_filter("").is_err());
        assert!(parse_filter("a eq 1 b").is_err());
    }

    #[test]
    fn test_nesting_guard() {
        let deep = format!("{}a eq 1{}", "(".repeat(40), ")".repeat(40));
        let e = parse_filter(&deep).unwrap_err();
        assert!(e.to_string().contains("nested deeper"));
    }
}
