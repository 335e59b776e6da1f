//! Action rule parser.
//!
//! ```text
//! action    := [expr '-->'] effect ((';' | ',') effect)* [';' | ',']
//! effect    := path '=' expr
//! expr      := product (('+' | '-') product)*
//! product   := unary ('*' unary)*
//! unary     := '-' unary | '~' unary | primary
//! primary   := number | 'dot' '(' expr ',' expr ')' | path | '(' expr ')'
//! path      := ident ('.' ident)*
//! ```
//!
//! Identifiers that start with an uppercase letter are symbols, everything
//! else is a module reference; resolution against a model happens later.

use crate::ast::{Action, Effect, Expr};
use crate::error::{Result, SpaError};

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Number(f32),
    Plus,
    Minus,
    Star,
    Tilde,
    LParen,
    RParen,
    Comma,
    Semi,
    Assign,
    Arrow,
    Dot,
    End,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    pos: usize,
    len: usize,
}

fn lex(text: &str) -> Result<Vec<Token>> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        let single = |tok| Token { tok, pos: start, len: 1 };
        match c {
            b'+' => out.push(single(Tok::Plus)),
            b'*' => out.push(single(Tok::Star)),
            b'~' => out.push(single(Tok::Tilde)),
            b'(' => out.push(single(Tok::LParen)),
            b')' => out.push(single(Tok::RParen)),
            b',' => out.push(single(Tok::Comma)),
            b';' => out.push(single(Tok::Semi)),
            b'=' => out.push(single(Tok::Assign)),
            b'.' => out.push(single(Tok::Dot)),
            b'-' => {
                if text[i..].starts_with("-->") {
                    out.push(Token {
                        tok: Tok::Arrow,
                        pos: start,
                        len: 3,
                    });
                    i += 3;
                    continue;
                }
                out.push(single(Tok::Minus));
            }
            b'0'..=b'9' => {
                let mut j = i;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                if j + 1 < bytes.len() && bytes[j] == b'.' && bytes[j + 1].is_ascii_digit() {
                    j += 1;
                    while j < bytes.len() && bytes[j].is_ascii_digit() {
                        j += 1;
                    }
                }
                if j < bytes.len() && (bytes[j] == b'e' || bytes[j] == b'E') {
                    let mut k = j + 1;
                    if k < bytes.len() && (bytes[k] == b'+' || bytes[k] == b'-') {
                        k += 1;
                    }
                    if k < bytes.len() && bytes[k].is_ascii_digit() {
                        while k < bytes.len() && bytes[k].is_ascii_digit() {
                            k += 1;
                        }
                        j = k;
                    }
                }
                let literal = &text[i..j];
                let value = literal
                    .parse::<f32>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| SpaError::Syntax {
                        message: "invalid number".into(),
                        fragment: literal.to_string(),
                        position: start,
                    })?;
                out.push(Token {
                    tok: Tok::Number(value),
                    pos: start,
                    len: j - i,
                });
                i = j;
                continue;
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let mut j = i;
                while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
                    j += 1;
                }
                out.push(Token {
                    tok: Tok::Ident(text[i..j].to_string()),
                    pos: start,
                    len: j - i,
                });
                i = j;
                continue;
            }
            _ => {
                let ch = text[i..].chars().next().unwrap_or('?');
                return Err(SpaError::Syntax {
                    message: format!("unexpected character '{ch}'"),
                    fragment: ch.to_string(),
                    position: start,
                });
            }
        }
        i += 1;
    }
    out.push(Token {
        tok: Tok::End,
        pos: text.len(),
        len: 0,
    });
    Ok(out)
}

struct Parser<'a> {
    text: &'a str,
    tokens: Vec<Token>,
    cursor: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Result<Self> {
        Ok(Self {
            text,
            tokens: lex(text)?,
            cursor: 0,
        })
    }

    fn peek(&self) -> &Tok {
        &self.tokens[self.cursor].tok
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        let i = (self.cursor + offset).min(self.tokens.len() - 1);
        &self.tokens[i].tok
    }

    fn bump(&mut self) -> Token {
        let t = self.tokens[self.cursor].clone();
        if self.cursor + 1 < self.tokens.len() {
            self.cursor += 1;
        }
        t
    }

    fn error_here(&self, message: impl Into<String>) -> SpaError {
        let t = &self.tokens[self.cursor];
        let fragment = if t.tok == Tok::End {
            // Show the tail so "a = b +" points at the dangling operator.
            let from = self.text.len().saturating_sub(8);
            self.text.get(from..).unwrap_or("").trim().to_string()
        } else {
            self.text[t.pos..t.pos + t.len].to_string()
        };
        SpaError::Syntax {
            message: message.into(),
            fragment,
            position: t.pos,
        }
    }

    fn expect(&mut self, tok: Tok, what: &str) -> Result<()> {
        if *self.peek() == tok {
            self.bump();
            Ok(())
        } else {
            Err(self.error_here(format!("expected {what}")))
        }
    }

    fn has_arrow(&self) -> Result<bool> {
        let arrows: Vec<&Token> = self.tokens.iter().filter(|t| t.tok == Tok::Arrow).collect();
        match arrows.len() {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(SpaError::Syntax {
                message: "more than one '-->' in action".into(),
                fragment: "-->".into(),
                position: arrows[1].pos,
            }),
        }
    }

    fn action(&mut self, index: usize) -> Result<Action> {
        let condition = if self.has_arrow()? {
            let c = self.expr()?;
            self.expect(Tok::Arrow, "'-->' after condition")?;
            Some(c)
        } else {
            None
        };

        let mut effects = Vec::new();
        loop {
            if *self.peek() == Tok::End {
                break;
            }
            effects.push(self.effect()?);
            match self.peek() {
                Tok::Semi | Tok::Comma => {
                    self.bump();
                }
                Tok::End => break,
                _ => return Err(self.error_here("expected ';' or end of action")),
            }
        }
        if effects.is_empty() {
            return Err(self.error_here("action has no effects"));
        }

        Ok(Action {
            index,
            name: None,
            source: self.text.trim().to_string(),
            condition,
            effects,
        })
    }

    fn effect(&mut self) -> Result<Effect> {
        let sink = match self.peek() {
            Tok::Ident(_) => self.path()?,
            _ => return Err(self.error_here("expected sink name")),
        };
        self.expect(Tok::Assign, "'=' after sink")?;
        let expr = self.expr()?;
        Ok(Effect { sink, expr })
    }

    fn path(&mut self) -> Result<String> {
        let mut out = match self.bump().tok {
            Tok::Ident(s) => s,
            _ => return Err(self.error_here("expected name")),
        };
        while *self.peek() == Tok::Dot {
            self.bump();
            match self.peek().clone() {
                Tok::Ident(s) => {
                    self.bump();
                    out.push('.');
                    out.push_str(&s);
                }
                _ => return Err(self.error_here("expected name after '.'")),
            }
        }
        Ok(out)
    }

    fn expr(&mut self) -> Result<Expr> {
        let mut terms = vec![self.product()?];
        loop {
            match self.peek() {
                Tok::Plus => {
                    self.bump();
                    terms.push(self.product()?);
                }
                Tok::Minus => {
                    self.bump();
                    let t = self.product()?;
                    terms.push(negate(t));
                }
                _ => break,
            }
        }
        if terms.len() == 1 {
            Ok(terms.remove(0))
        } else {
            Ok(Expr::Superpose(terms))
        }
    }

    fn product(&mut self) -> Result<Expr> {
        let mut lhs = self.unary()?;
        while *self.peek() == Tok::Star {
            self.bump();
            let rhs = self.unary()?;
            lhs = multiply(lhs, rhs);
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Tok::Minus => {
                self.bump();
                Ok(negate(self.unary()?))
            }
            Tok::Tilde => {
                self.bump();
                Ok(Expr::invert(self.unary()?))
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.peek().clone() {
            Tok::Number(k) => {
                self.bump();
                Ok(Expr::Scalar(k))
            }
            Tok::LParen => {
                self.bump();
                let e = self.expr()?;
                self.expect(Tok::RParen, "')'")?;
                Ok(e)
            }
            Tok::Ident(name) if name == "dot" && *self.peek_at(1) == Tok::LParen => {
                self.bump();
                self.bump();
                let a = self.expr()?;
                self.expect(Tok::Comma, "',' between dot() arguments")?;
                let b = self.expr()?;
                self.expect(Tok::RParen, "')' closing dot()")?;
                Ok(Expr::dot(a, b))
            }
            Tok::Ident(_) => {
                let path = self.path()?;
                if !path.contains('.') && crate::vocab::is_pointer_name(&path) {
                    Ok(Expr::Symbol(path))
                } else {
                    Ok(Expr::ModuleOutput(path))
                }
            }
            _ => Err(self.error_here("expected expression")),
        }
    }

    fn finish(&self) -> Result<()> {
        if *self.peek() != Tok::End {
            return Err(self.error_here("unexpected trailing input"));
        }
        Ok(())
    }
}

fn negate(e: Expr) -> Expr {
    match e {
        Expr::Scalar(k) => Expr::Scalar(-k),
        Expr::Scale(inner, k) => Expr::Scale(inner, -k),
        other => Expr::scale(other, -1.0),
    }
}

// Scalars fold into scales; two vectors bind.
fn multiply(lhs: Expr, rhs: Expr) -> Expr {
    match (lhs, rhs) {
        (Expr::Scalar(a), Expr::Scalar(b)) => Expr::Scalar(a * b),
        (Expr::Scalar(k), e) | (e, Expr::Scalar(k)) => match e {
            Expr::Scale(inner, j) => Expr::Scale(inner, j * k),
            e => Expr::scale(e, k),
        },
        (a, b) => Expr::bind(a, b),
    }
}

/// Parse one action rule. `index` becomes the action's channel index.
///
/// Parsing is pure: it never touches a model.
pub fn parse_action(text: &str, index: usize) -> Result<Action> {
    let mut p = Parser::new(text)?;
    let action = p.action(index)?;
    p.finish()?;
    Ok(action)
}

/// Parse a bare expression (no sink, no condition).
pub fn parse_expression(text: &str) -> Result<Expr> {
    let mut p = Parser::new(text)?;
    let e = p.expr()?;
    p.finish()?;
    Ok(e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflowing_literal_is_a_syntax_error() {
        let err = parse_action("a = 1e99 * B", 0).unwrap_err();
        match err {
            SpaError::Syntax { fragment, position, .. } => {
                assert_eq!(fragment, "1e99");
                assert_eq!(position, 4);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(parse_action("a = 1e9 * B", 0).is_ok());
    }

    #[test]
    fn parses_conditional_action() {
        let a = parse_action("dot(state, A) --> state = B", 0).unwrap();
        assert_eq!(
            a.condition,
            Some(Expr::dot(Expr::module("state"), Expr::symbol("A")))
        );
        assert_eq!(a.effects.len(), 1);
        assert_eq!(a.effects[0].sink, "state");
        assert_eq!(a.effects[0].expr, Expr::symbol("B"));
        assert_eq!(a.referenced_names(), vec!["state", "A", "state", "B"]);
    }

    #[test]
    fn parses_binding_effect() {
        let a = parse_action("b = a * CAT", 0).unwrap();
        assert!(a.condition.is_none());
        assert_eq!(
            a.effects[0].expr,
            Expr::bind(Expr::module("a"), Expr::symbol("CAT"))
        );
    }

    #[test]
    fn parses_multiple_effects_and_separators() {
        let a = parse_action("0.5 --> a = B; c = d, e.in = F;", 2).unwrap();
        assert_eq!(a.index, 2);
        assert_eq!(a.condition, Some(Expr::Scalar(0.5)));
        let sinks: Vec<&str> = a.effects.iter().map(|e| e.sink.as_str()).collect();
        assert_eq!(sinks, vec!["a", "c", "e.in"]);
    }

    #[test]
    fn precedence_and_scalars() {
        let e = parse_expression("A + 0.5 * b * ~C - D").unwrap();
        assert_eq!(
            e,
            Expr::Superpose(vec![
                Expr::symbol("A"),
                Expr::bind(
                    Expr::scale(Expr::module("b"), 0.5),
                    Expr::invert(Expr::symbol("C"))
                ),
                Expr::scale(Expr::symbol("D"), -1.0),
            ])
        );
        assert_eq!(parse_expression("2 * 3").unwrap(), Expr::Scalar(6.0));
        assert_eq!(
            parse_expression("-(A * 2)").unwrap(),
            Expr::scale(Expr::symbol("A"), -2.0)
        );
    }

    #[test]
    fn summed_condition() {
        let a = parse_action("dot(s, A) + 0.5 * dot(t, B) --> m = C", 0).unwrap();
        assert_eq!(
            a.condition,
            Some(Expr::Superpose(vec![
                Expr::dot(Expr::module("s"), Expr::symbol("A")),
                Expr::scale(Expr::dot(Expr::module("t"), Expr::symbol("B")), 0.5),
            ]))
        );
    }

    #[test]
    fn dotted_paths_are_module_references() {
        let e = parse_expression("vision.out * Ctx.port").unwrap();
        assert_eq!(
            e,
            Expr::bind(Expr::module("vision.out"), Expr::module("Ctx.port"))
        );
    }

    #[test]
    fn dangling_operator_reports_position() {
        let err = parse_action("a = b +", 0).unwrap_err();
        match err {
            SpaError::Syntax {
                position, fragment, ..
            } => {
                assert_eq!(position, 7);
                assert!(fragment.ends_with('+'));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unmatched_paren_and_bad_chars() {
        assert!(matches!(
            parse_action("a = (b * C", 0),
            Err(SpaError::Syntax { .. })
        ));
        let err = parse_action("a = b # C", 0).unwrap_err();
        assert!(matches!(err, SpaError::Syntax { position: 6, .. }));
        assert!(parse_action("dot(a, B) --> a = B --> c = D", 0).is_err());
        assert!(parse_action("dot(a, B) -->", 0).is_err());
        assert!(parse_action("a = B c = D", 0).is_err());
    }
}
