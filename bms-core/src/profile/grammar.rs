#![allow(clippy::module_name_repetitions)]

//! Statement lexer and parser for profile strings.
//!
//! A profile is read one `CODE=VALUE;` statement at a time so the token
//! buffer stays small regardless of the profile length.

use core::fmt;
use core::ops::Range;

use heapless::Vec as HeaplessVec;
use regal::IncrementalError;
use regal::TokenCache;
use regal_macros::RegalLexer;
#[allow(deprecated)]
use winnow::error::ErrorKind;
use winnow::error::{ErrMode, ParserError};
use winnow::prelude::*;
use winnow::stream::Stream;

use super::ProfileErrorKind;

/// Tokens in a single statement; a well-formed one needs four.
pub const MAX_TOKENS: usize = 8;
const MAX_CACHE_RECORDS: usize = MAX_TOKENS * 2;

/// Longest value the persisted format allows.
pub const MAX_VALUE_LEN: usize = 5;

#[derive(RegalLexer, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TokenKind {
    /// Four-letter parameter code.
    #[regex(r"[A-Z][A-Z][A-Z][A-Z]")]
    Code,
    /// Retry budget such as `3X`, or `IX` for unlimited.
    #[regex(r"(?:[0-9]+|I)X", priority = 2)]
    Retry,
    /// Unsigned decimal, validated after lexing.
    #[regex(r"[0-9.]+")]
    Number,
    #[token("=")]
    Equals,
    #[token(";")]
    Semicolon,
    #[regex(r"[ \t\r\n]+", skip)]
    Whitespace,
    #[default]
    #[regex(r".", priority = 1024)]
    Error,
}

/// Token with its byte span inside the profile text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub lexeme: &'a str,
    pub span: Range<usize>,
}

pub type TokenBuffer<'a> = HeaplessVec<Token<'a>, MAX_TOKENS>;

/// Right-hand side of a statement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawValue<'a> {
    Number(&'a str),
    Retry(&'a str),
}

impl RawValue<'_> {
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            RawValue::Number(text) | RawValue::Retry(text) => text,
        }
    }
}

/// One parsed `CODE=VALUE;` statement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Statement<'a> {
    pub code: &'a str,
    pub code_span: Range<usize>,
    pub value: RawValue<'a>,
    pub value_span: Range<usize>,
}

/// Failure inside a statement, positioned relative to the whole profile.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatementError {
    pub kind: ProfileErrorKind,
    pub offset: usize,
}

impl StatementError {
    fn at(kind: ProfileErrorKind, token: Option<&Token<'_>>, end: usize) -> Self {
        Self {
            kind,
            offset: token.map_or(end, |token| token.span.start),
        }
    }
}

impl fmt::Display for StatementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at byte {}", self.kind, self.offset)
    }
}

type Input<'src, 'slice> = &'slice [Token<'src>];

#[allow(deprecated)]
impl<'src, 'slice> ParserError<Input<'src, 'slice>> for StatementError
where
    'src: 'slice,
{
    fn from_error_kind(input: &Input<'src, 'slice>, _kind: ErrorKind) -> Self {
        StatementError::at(
            ProfileErrorKind::InvalidValue,
            input.first(),
            input.last().map_or(0, |token| token.span.end),
        )
    }

    fn append(
        self,
        _input: &Input<'src, 'slice>,
        _token_start: &<Input<'src, 'slice> as Stream>::Checkpoint,
        _kind: ErrorKind,
    ) -> Self {
        self
    }

    fn or(self, other: Self) -> Self {
        other
    }
}

/// Tokenizes `source`, reporting spans offset by `base`.
pub fn lex(source: &str, base: usize) -> Result<TokenBuffer<'_>, StatementError> {
    let overflow = |at: usize| StatementError {
        kind: ProfileErrorKind::Lex,
        offset: base + at,
    };

    let compiled = TokenKind::lexer();
    let mut cache: TokenCache<TokenKind, MAX_CACHE_RECORDS> = TokenCache::new();
    let partial = cache
        .rebuild(compiled, source)
        .map_err(|error| match error {
            IncrementalError::TokenOverflow => overflow(source.len()),
            _ => overflow(0),
        })?;
    let mut buffer = TokenBuffer::new();

    for record in cache.tokens() {
        if record.skipped {
            continue;
        }
        let token = Token {
            kind: record.token,
            lexeme: &source[record.start..record.end],
            span: base + record.start..base + record.end,
        };
        buffer.push(token).map_err(|_| overflow(record.start))?;
    }

    if let Some(partial) = partial.filter(|partial| !partial.fragment.is_empty()) {
        let start = base + partial.start;
        let token = Token {
            kind: TokenKind::Error,
            lexeme: partial.fragment,
            span: start..start + partial.fragment.len(),
        };
        buffer.push(token).map_err(|_| overflow(partial.start))?;
    }

    Ok(buffer)
}

/// Parses the statement at the start of `source`.
///
/// `source` must end at (and include) the statement's `;`, or run to the end
/// of the profile when the delimiter is missing.
pub fn parse_statement(source: &str, base: usize) -> Result<Statement<'_>, StatementError> {
    let tokens = lex(source, base)?;
    let end = base + source.len();

    if let Some(token) = tokens.iter().find(|token| token.kind == TokenKind::Error) {
        return Err(StatementError::at(ProfileErrorKind::Lex, Some(token), end));
    }

    let mut input = tokens.as_slice();
    let statement = match statement(end).parse_next(&mut input) {
        Ok(statement) => statement,
        Err(ErrMode::Backtrack(error) | ErrMode::Cut(error)) => return Err(error),
        Err(ErrMode::Incomplete(_)) => {
            return Err(StatementError::at(
                ProfileErrorKind::MissingDelimiter,
                None,
                end,
            ));
        }
    };

    match input.first() {
        None => Ok(statement),
        Some(token) => Err(StatementError::at(
            ProfileErrorKind::MissingDelimiter,
            Some(token),
            end,
        )),
    }
}

fn statement<'src, 'slice>(
    end: usize,
) -> impl Parser<Input<'src, 'slice>, Statement<'src>, StatementError>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let code = expect_kind(TokenKind::Code, ProfileErrorKind::UnknownParameter, end)
            .parse_next(input)?;
        let _ = expect_kind(TokenKind::Equals, ProfileErrorKind::MissingEquals, end)
            .parse_next(input)?;
        let (value, value_span) = value(end).parse_next(input)?;
        let _ = expect_kind(TokenKind::Semicolon, ProfileErrorKind::MissingDelimiter, end)
            .parse_next(input)?;

        Ok(Statement {
            code: code.lexeme,
            code_span: code.span,
            value,
            value_span,
        })
    }
}

fn value<'src, 'slice>(
    end: usize,
) -> impl Parser<Input<'src, 'slice>, (RawValue<'src>, Range<usize>), StatementError>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| match input.split_first() {
        Some((token, rest)) if matches!(token.kind, TokenKind::Number | TokenKind::Retry) => {
            if token.lexeme.len() > MAX_VALUE_LEN {
                return Err(ErrMode::Cut(StatementError::at(
                    ProfileErrorKind::InvalidValue,
                    Some(token),
                    end,
                )));
            }
            *input = rest;
            let value = if token.kind == TokenKind::Retry {
                RawValue::Retry(token.lexeme)
            } else {
                RawValue::Number(token.lexeme)
            };
            Ok((value, token.span.clone()))
        }
        other => Err(ErrMode::Backtrack(StatementError::at(
            ProfileErrorKind::InvalidValue,
            other.map(|(token, _)| token),
            end,
        ))),
    }
}

fn expect_kind<'src, 'slice>(
    kind: TokenKind,
    failure: ProfileErrorKind,
    end: usize,
) -> impl Parser<Input<'src, 'slice>, Token<'src>, StatementError>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| match input.split_first() {
        Some((token, rest)) if token.kind == kind => {
            *input = rest;
            Ok(token.clone())
        }
        other => Err(ErrMode::Backtrack(StatementError::at(
            failure,
            other.map(|(token, _)| token),
            end,
        ))),
    }
}
