use radix_trie::Trie;
use thiserror::Error;

use super::token::{Token, TokenKind};
use super::util::StrCursor;

#[derive(Debug, Clone, Error)]
pub enum ScannerError {
    #[error("Unterminated string.")]
    UnterminatedString,

    #[error("Unexpected character.")]
    InvalidCharacter,
}

/// Lazily turns a source string into tokens. The scanner never allocates on
/// the object heap; lexemes are plain copies out of the source buffer.
pub struct Scanner<'a> {
    source: &'a str,
    cursor: StrCursor<'a>,
    start: usize,
    keywords: Trie<&'static str, TokenKind>,
    line: u64,
}

const KEYWORDS: [(&str, TokenKind); 16] = [
    ("and", TokenKind::And),
    ("class", TokenKind::Class),
    ("else", TokenKind::Else),
    ("false", TokenKind::False),
    ("for", TokenKind::For),
    ("fun", TokenKind::Fun),
    ("if", TokenKind::If),
    ("nil", TokenKind::Nil),
    ("or", TokenKind::Or),
    ("print", TokenKind::Print),
    ("return", TokenKind::Return),
    ("super", TokenKind::Super),
    ("this", TokenKind::This),
    ("true", TokenKind::True),
    ("var", TokenKind::Var),
    ("while", TokenKind::While),
];

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut keywords = Trie::new();
        for keyword in KEYWORDS.iter() {
            keywords.insert(keyword.0, keyword.1);
        }

        Self {
            source,
            cursor: StrCursor::new(source),
            start: 0,
            keywords,
            line: 1,
        }
    }

    pub fn line(&self) -> u64 {
        self.line
    }

    pub fn scan_token(&mut self) -> Result<Token, ScannerError> {
        self.skip_whitespace();
        self.start = self.cursor.index;

        if let Some(ch) = self.cursor.advance() {
            let token = match ch {
                '(' => self.create_token(TokenKind::ParenLeft),
                ')' => self.create_token(TokenKind::ParenRight),
                '{' => self.create_token(TokenKind::BraceLeft),
                '}' => self.create_token(TokenKind::BraceRight),
                ';' => self.create_token(TokenKind::Semicolon),
                ',' => self.create_token(TokenKind::Comma),
                '.' => self.create_token(TokenKind::Dot),
                '-' => self.create_token(TokenKind::Minus),
                '+' => self.create_token(TokenKind::Plus),
                '/' => self.create_token(TokenKind::Slash),
                '*' => self.create_token(TokenKind::Star),
                '!' => self.create_token_match('=', TokenKind::BangEqual, TokenKind::Bang),
                '=' => self.create_token_match('=', TokenKind::EqualEqual, TokenKind::Equal),
                '<' => self.create_token_match('=', TokenKind::LessEqual, TokenKind::Less),
                '>' => self.create_token_match('=', TokenKind::GreaterEqual, TokenKind::Greater),
                '"' => self.create_string_token()?,
                ch if ch.is_ascii_digit() => self.create_digit_token(),
                ch if ch.is_alphabetic() || ch == '_' => self.create_identifier_token(),
                _ => return Err(ScannerError::InvalidCharacter),
            };
            Ok(token)
        } else {
            Ok(self.create_token(TokenKind::EOF))
        }
    }

    fn match_token(&mut self, expected: char) -> bool {
        if let Some(ch) = self.cursor.peek() {
            if ch == expected {
                self.cursor.advance();
                return true;
            }
        }
        false
    }

    fn create_token(&self, kind: TokenKind) -> Token {
        let data = self.source[self.start..self.cursor.index].to_owned();
        Token::new(kind, data, self.line, self.start)
    }

    fn create_token_match(
        &mut self,
        matches: char,
        if_matches: TokenKind,
        otherwise: TokenKind,
    ) -> Token {
        if self.match_token(matches) {
            self.create_token(if_matches)
        } else {
            self.create_token(otherwise)
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.cursor.peek() {
            match ch {
                '\n' => {
                    self.line += 1;
                    self.cursor.advance();
                }
                '/' => {
                    if self.cursor.peek_next() == Some('/') {
                        // Comment runs to the end of the line. The newline is
                        // left for the next loop pass to count.
                        while let Some(ch) = self.cursor.peek() {
                            if ch == '\n' {
                                break;
                            }
                            self.cursor.advance();
                        }
                    } else {
                        return;
                    }
                }
                val if val.is_whitespace() => {
                    self.cursor.advance();
                }
                _ => return,
            }
        }
    }

    fn create_identifier_token(&mut self) -> Token {
        self.cursor
            .advance_when(|ch| ch.is_alphanumeric() || ch == '_');

        let identifier = &self.source[self.start..self.cursor.index];
        if let Some(kind) = self.keywords.get(identifier) {
            self.create_token(*kind)
        } else {
            self.create_token(TokenKind::Identifier)
        }
    }

    fn create_digit_token(&mut self) -> Token {
        let check_digit = |ch: char| ch.is_ascii_digit();

        self.cursor.advance_when(check_digit);

        // Check for a fractional part and scan that as well.
        if self.cursor.peek() == Some('.') {
            if let Some(ch) = self.cursor.peek_next() {
                if check_digit(ch) {
                    self.cursor.advance(); // Consume the dot.
                    self.cursor.advance_when(check_digit);
                }
            }
        }

        self.create_token(TokenKind::Number)
    }

    fn create_string_token(&mut self) -> Result<Token, ScannerError> {
        loop {
            if let Some(ch) = self.cursor.peek() {
                if ch == '\n' {
                    self.line += 1;
                }
                self.cursor.advance();
                if ch == '"' {
                    break;
                }
            } else {
                return Err(ScannerError::UnterminatedString);
            }
        }

        Ok(self.create_token(TokenKind::String))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut scanner = Scanner::new(source);
        let mut kinds = Vec::new();
        loop {
            let token = scanner.scan_token().unwrap();
            let kind = token.kind;
            kinds.push(kind);
            if kind == TokenKind::EOF {
                break;
            }
        }
        kinds
    }

    #[test]
    fn scan_punctuation() {
        assert_eq!(
            kinds("(){};,."),
            vec![
                TokenKind::ParenLeft,
                TokenKind::ParenRight,
                TokenKind::BraceLeft,
                TokenKind::BraceRight,
                TokenKind::Semicolon,
                TokenKind::Comma,
                TokenKind::Dot,
                TokenKind::EOF,
            ]
        );
    }

    #[test]
    fn scan_two_char_operators() {
        assert_eq!(
            kinds("! != = == < <= > >="),
            vec![
                TokenKind::Bang,
                TokenKind::BangEqual,
                TokenKind::Equal,
                TokenKind::EqualEqual,
                TokenKind::Less,
                TokenKind::LessEqual,
                TokenKind::Greater,
                TokenKind::GreaterEqual,
                TokenKind::EOF,
            ]
        );
    }

    #[test]
    fn scan_keywords_and_identifiers() {
        assert_eq!(
            kinds("class classy _under score99"),
            vec![
                TokenKind::Class,
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::EOF,
            ]
        );
    }

    #[test]
    fn scan_numbers() {
        let mut scanner = Scanner::new("12 12.5 12.");
        assert_eq!(scanner.scan_token().unwrap().data, "12");
        assert_eq!(scanner.scan_token().unwrap().data, "12.5");
        // The trailing dot belongs to the next token.
        assert_eq!(scanner.scan_token().unwrap().data, "12");
        assert_eq!(scanner.scan_token().unwrap().kind, TokenKind::Dot);
    }

    #[test]
    fn scan_string_keeps_quotes() {
        let mut scanner = Scanner::new("\"hello\"");
        let token = scanner.scan_token().unwrap();
        assert_eq!(token.kind, TokenKind::String);
        assert_eq!(token.data, "\"hello\"");
    }

    #[test]
    fn scan_unterminated_string() {
        let mut scanner = Scanner::new("\"hello");
        assert!(scanner.scan_token().is_err());
    }

    #[test]
    fn scan_comments_and_lines() {
        let mut scanner = Scanner::new("// nothing here\nvar");
        let token = scanner.scan_token().unwrap();
        assert_eq!(token.kind, TokenKind::Var);
        assert_eq!(token.line, 2);
    }

    #[test]
    fn scan_invalid_character() {
        let mut scanner = Scanner::new("@");
        assert!(scanner.scan_token().is_err());
        // The scanner keeps going afterwards.
        assert_eq!(scanner.scan_token().unwrap().kind, TokenKind::EOF);
    }
}
