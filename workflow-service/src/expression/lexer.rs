// Expression Engine Lexer
// Tokenizes guard expressions and splits templates around ${{ }} spans

use std::fmt;

/// Lexical unit of a guard expression
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Null,
    True,
    False,
    Number(f64),
    String(String),
    Identifier(String),
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Eof,
}

impl Token {
    /// Source text of tokens that carry no payload
    fn fixed_text(&self) -> Option<&'static str> {
        let text = match self {
            Token::Null => "null",
            Token::True => "true",
            Token::False => "false",
            Token::Eq => "==",
            Token::Ne => "!=",
            Token::Lt => "<",
            Token::Le => "<=",
            Token::Gt => ">",
            Token::Ge => ">=",
            Token::And => "&&",
            Token::Or => "||",
            Token::Not => "!",
            Token::Dot => ".",
            Token::Comma => ",",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Eof => "end of expression",
            Token::Number(_) | Token::String(_) | Token::Identifier(_) => return None,
        };
        Some(text)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{}", n),
            Token::String(s) => write!(f, "'{}'", s),
            Token::Identifier(s) => f.write_str(s),
            other => f.write_str(other.fixed_text().unwrap_or_default()),
        }
    }
}

/// Unrecognized input at a character offset
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid character data at {position}: {message}")]
pub struct LexError {
    pub message: String,
    pub position: usize,
}

/// Lexer for workflow expressions
pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            chars: input.char_indices().peekable(),
            position: 0,
        }
    }

    /// Tokenize the entire input, always ending with `Token::Eof`
    pub fn tokenize(&mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();

        loop {
            let token = self.next_token()?;
            let done = token == Token::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }

        Ok(tokens)
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace();

        let Some(&(pos, ch)) = self.chars.peek() else {
            return Ok(Token::Eof);
        };

        self.position = pos;

        match ch {
            '.' => self.single(Token::Dot),
            ',' => self.single(Token::Comma),
            '(' => self.single(Token::LParen),
            ')' => self.single(Token::RParen),
            '[' => self.single(Token::LBracket),
            ']' => self.single(Token::RBracket),

            '=' => self.pair('=', Token::Eq, None, "expected '==' operator"),
            '!' => self.pair('=', Token::Ne, Some(Token::Not), ""),
            '<' => self.pair('=', Token::Le, Some(Token::Lt), ""),
            '>' => self.pair('=', Token::Ge, Some(Token::Gt), ""),
            '&' => self.pair('&', Token::And, None, "expected '&&' operator"),
            '|' => self.pair('|', Token::Or, None, "expected '||' operator"),

            '\'' => self.read_string(),
            '0'..='9' | '-' => self.read_number(),
            'a'..='z' | 'A'..='Z' | '_' => Ok(self.read_identifier()),

            _ => Err(LexError {
                message: format!("unexpected character: '{}'", ch),
                position: pos,
            }),
        }
    }

    fn single(&mut self, token: Token) -> Result<Token, LexError> {
        self.advance();
        Ok(token)
    }

    /// Lex a one- or two-character operator whose second character is `second`.
    fn pair(
        &mut self,
        second: char,
        double: Token,
        single: Option<Token>,
        message: &str,
    ) -> Result<Token, LexError> {
        let pos = self.position;
        self.advance();
        if self.peek_char() == Some(second) {
            self.advance();
            return Ok(double);
        }
        single.ok_or_else(|| LexError {
            message: message.to_string(),
            position: pos,
        })
    }

    fn advance(&mut self) -> Option<(usize, char)> {
        self.chars.next()
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn take_while(&mut self, keep: impl Fn(char) -> bool) -> String {
        let mut taken = String::new();
        while let Some(ch) = self.peek_char().filter(|c| keep(*c)) {
            taken.push(ch);
            self.advance();
        }
        taken
    }

    fn skip_whitespace(&mut self) {
        self.take_while(char::is_whitespace);
    }

    fn read_string(&mut self) -> Result<Token, LexError> {
        let start = self.position;
        self.advance(); // opening quote

        let mut value = String::new();

        loop {
            match self.advance() {
                Some((_, '\'')) => {
                    // '' is an escaped quote
                    if self.peek_char() == Some('\'') {
                        value.push('\'');
                        self.advance();
                    } else {
                        break;
                    }
                }
                Some((_, ch)) => value.push(ch),
                None => {
                    return Err(LexError {
                        message: "unterminated string".to_string(),
                        position: start,
                    });
                }
            }
        }

        Ok(Token::String(value))
    }

    fn read_number(&mut self) -> Result<Token, LexError> {
        let start = self.position;
        let sign = if self.peek_char() == Some('-') {
            self.advance();
            "-"
        } else {
            ""
        };
        let digits = self.take_while(|c| c.is_ascii_digit() || c == '.');
        let text = format!("{}{}", sign, digits);

        text.parse::<f64>().map(Token::Number).map_err(|_| LexError {
            message: format!("invalid number: {}", text),
            position: start,
        })
    }

    fn read_identifier(&mut self) -> Token {
        // Step ids and output names commonly contain dashes
        let ident = self.take_while(|c| c.is_alphanumeric() || c == '_' || c == '-');

        match ident.as_str() {
            "null" => Token::Null,
            "true" => Token::True,
            "false" => Token::False,
            _ => Token::Identifier(ident),
        }
    }
}

/// A piece of a template string
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Literal text copied through unchanged
    Text(String),
    /// The trimmed body of a `${{ ... }}` span
    Expression(String),
}

/// Split a template into literal text and `${{ }}` expression spans.
///
/// An opening `${{` without a matching `}}` is an error.
pub fn extract_expressions(input: &str) -> Result<Vec<Segment>, LexError> {
    let mut segments = Vec::new();
    let mut rest = input;
    let mut offset = 0;

    while let Some(open) = rest.find("${{") {
        if open > 0 {
            segments.push(Segment::Text(rest[..open].to_string()));
        }

        let body_start = open + 3;
        let Some(close) = find_closing(&rest[body_start..]) else {
            return Err(LexError {
                message: "unterminated '${{' expression".to_string(),
                position: offset + open,
            });
        };

        let body = rest[body_start..body_start + close].trim();
        segments.push(Segment::Expression(body.to_string()));

        let consumed = body_start + close + 2;
        offset += consumed;
        rest = &rest[consumed..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Text(rest.to_string()));
    }

    Ok(segments)
}

/// Find the `}}` that closes an expression body, skipping quoted strings.
fn find_closing(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut in_string = false;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => in_string = !in_string,
            b'}' if !in_string && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            _ => {}
        }
        i += 1;
    }

    None
}

/// Strip an optional `${{ }}` wrapper from a guard condition.
pub fn strip_delimiters(condition: &str) -> &str {
    let trimmed = condition.trim();
    trimmed
        .strip_prefix("${{")
        .and_then(|s| s.strip_suffix("}}"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(input: &str) -> Vec<Token> {
        Lexer::new(input).tokenize().unwrap()
    }

    #[test]
    fn test_lex_comparison() {
        assert_eq!(
            lex("matrix.rust == 'stable'"),
            vec![
                Token::Identifier("matrix".into()),
                Token::Dot,
                Token::Identifier("rust".into()),
                Token::Eq,
                Token::String("stable".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_dashed_identifier_and_operators() {
        assert_eq!(
            lex("!steps.read-msrv.outputs.content && a <= 1.5 || b != -2"),
            vec![
                Token::Not,
                Token::Identifier("steps".into()),
                Token::Dot,
                Token::Identifier("read-msrv".into()),
                Token::Dot,
                Token::Identifier("outputs".into()),
                Token::Dot,
                Token::Identifier("content".into()),
                Token::And,
                Token::Identifier("a".into()),
                Token::Le,
                Token::Number(1.5),
                Token::Or,
                Token::Identifier("b".into()),
                Token::Ne,
                Token::Number(-2.0),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_escaped_quote_and_keywords() {
        assert_eq!(
            lex("'it''s' null true false"),
            vec![
                Token::String("it's".into()),
                Token::Null,
                Token::True,
                Token::False,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_errors() {
        let err = Lexer::new("a = b").tokenize().unwrap_err();
        assert_eq!(err.position, 2);
        assert!(Lexer::new("'open").tokenize().is_err());
        assert!(Lexer::new("a & b").tokenize().is_err());
        assert!(Lexer::new("a # b").tokenize().is_err());
    }

    #[test]
    fn test_extract_expressions() {
        let segments = extract_expressions("rustup ${{ matrix.rust }} on ${{ matrix.os }}!").unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Text("rustup ".into()),
                Segment::Expression("matrix.rust".into()),
                Segment::Text(" on ".into()),
                Segment::Expression("matrix.os".into()),
                Segment::Text("!".into()),
            ]
        );
    }

    #[test]
    fn test_extract_expressions_skips_braces_in_strings() {
        let segments = extract_expressions("${{ format('{0}}}', 'x') }}").unwrap();
        assert_eq!(
            segments,
            vec![Segment::Expression("format('{0}}}', 'x')".into())]
        );
    }

    #[test]
    fn test_extract_plain_text_and_unterminated() {
        assert_eq!(
            extract_expressions("no expressions here").unwrap(),
            vec![Segment::Text("no expressions here".into())]
        );
        assert!(extract_expressions("").unwrap().is_empty());
        assert!(extract_expressions("broken ${{ matrix.os").is_err());
    }

    #[test]
    fn test_strip_delimiters() {
        assert_eq!(strip_delimiters("${{ success() }}"), "success()");
        assert_eq!(strip_delimiters("  matrix.os == 'a' "), "matrix.os == 'a'");
    }
}
