#![allow(clippy::module_name_repetitions)]

//! Command-line grammar for the diagnostics REPL.
//!
//! `regal` splits the line into words, `winnow` walks the word slice. Which
//! keywords exist and what follows them is decided by
//! [`catalog`](super::catalog).

use core::fmt;

use heapless::Vec as HeaplessVec;
use regal::IncrementalError;
use regal::TokenCache;
use regal_macros::RegalLexer;
#[allow(deprecated)]
use winnow::error::ErrorKind;
use winnow::error::{ErrMode, ParserError};
use winnow::prelude::*;
use winnow::stream::Stream;

use super::catalog::{self, Arguments, CommandTag};
use crate::profile::BuiltinProfile;

/// Words accepted on one line, end-of-line markers included.
pub const MAX_WORDS: usize = 24;

#[derive(RegalLexer, Clone, Copy, Debug, PartialEq, Eq, Default)]
enum Lexeme {
    #[regex(r"0[xX][0-9A-Fa-f]+", priority = 2)]
    Hex,
    #[regex(r"-?[0-9]+")]
    Decimal,
    #[regex(r"[A-Za-z][A-Za-z0-9-]*")]
    Word,
    #[token("=")]
    Assign,
    #[regex(r"[ \t]+", skip)]
    Blank,
    #[token("\r\n")]
    #[token("\n")]
    #[token("\r")]
    Newline,
    #[default]
    #[regex(r".", priority = 1024)]
    Stray,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Piece<'a> {
    lexeme: Lexeme,
    text: &'a str,
    /// Byte offset into the line.
    at: usize,
}

impl Piece<'_> {
    fn is_number(&self) -> bool {
        matches!(self.lexeme, Lexeme::Hex | Lexeme::Decimal)
    }
}

type Pieces<'a> = HeaplessVec<Piece<'a>, MAX_WORDS>;
type Input<'src, 'slice> = &'slice [Piece<'src>];

/// Why a line was refused; offsets are bytes into the line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyntaxError<'a> {
    TooLong,
    Lexer,
    /// `found` is `None` when the line ran out first.
    Expected {
        what: &'static str,
        found: Option<(usize, &'a str)>,
    },
    OutOfRange { at: usize, text: &'a str },
    Stray { at: usize, text: &'a str },
}

impl<'a> SyntaxError<'a> {
    fn expected(what: &'static str, piece: Option<&Piece<'a>>) -> Self {
        SyntaxError::Expected {
            what,
            found: piece.map(|piece| (piece.at, piece.text)),
        }
    }

    fn out_of_range(piece: &Piece<'a>) -> Self {
        SyntaxError::OutOfRange {
            at: piece.at,
            text: piece.text,
        }
    }
}

impl fmt::Display for SyntaxError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyntaxError::TooLong => write!(f, "more than {MAX_WORDS} words"),
            SyntaxError::Lexer => f.write_str("unreadable line"),
            SyntaxError::Expected { what, found: None } => write!(f, "missing {what}"),
            SyntaxError::Expected {
                what,
                found: Some((at, text)),
            } => write!(f, "wanted {what}, got `{text}` at column {at}"),
            SyntaxError::OutOfRange { at, text } => {
                write!(f, "`{text}` at column {at} does not fit")
            }
            SyntaxError::Stray { at, text } => write!(f, "stray `{text}` at column {at}"),
        }
    }
}

#[allow(deprecated)]
impl<'src, 'slice> ParserError<Input<'src, 'slice>> for SyntaxError<'src>
where
    'src: 'slice,
{
    fn from_error_kind(input: &Input<'src, 'slice>, _kind: ErrorKind) -> Self {
        SyntaxError::expected("word", input.first())
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

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Status,
    Faults,
    Afe(AfeCommand),
    Cycle { count: u16 },
    Press(PressKind),
    Profile(BuiltinProfile),
    History,
    Help(HelpCommand<'a>),
}

/// Register overrides for the simulated AFE; `None` leaves a field alone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AfeCommand {
    pub stat: Option<u8>,
    pub current: Option<i16>,
    pub vmin: Option<u16>,
    pub vmax: Option<u16>,
}

impl AfeCommand {
    /// `true` when the command only asks to display the registers.
    #[must_use]
    pub const fn is_query(&self) -> bool {
        self.stat.is_none() && self.current.is_none() && self.vmin.is_none() && self.vmax.is_none()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PressKind {
    Short,
    Long,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HelpCommand<'a> {
    pub topic: Option<&'a str>,
}

fn split(line: &str) -> Result<Pieces<'_>, SyntaxError<'_>> {
    let mut cache: TokenCache<Lexeme, { MAX_WORDS * 2 }> = TokenCache::new();
    let partial = cache
        .rebuild(Lexeme::lexer(), line)
        .map_err(|error| match error {
            IncrementalError::TokenOverflow => SyntaxError::TooLong,
            _ => SyntaxError::Lexer,
        })?;

    let mut pieces = Pieces::new();
    let words = cache
        .tokens()
        .into_iter()
        .filter(|record| !record.skipped)
        .map(|record| Piece {
            lexeme: record.token,
            text: &line[record.start..record.end],
            at: record.start,
        });
    let leftover = partial
        .filter(|partial| !partial.fragment.is_empty())
        .map(|partial| Piece {
            lexeme: Lexeme::Stray,
            text: partial.fragment,
            at: partial.start,
        });

    for piece in words.chain(leftover) {
        pieces.push(piece).map_err(|_| SyntaxError::TooLong)?;
    }
    Ok(pieces)
}

/// Parses one REPL line; a trailing newline is accepted.
pub fn parse(line: &str) -> Result<Command<'_>, SyntaxError<'_>> {
    let pieces = split(line)?;
    if let Some(stray) = pieces.iter().find(|piece| piece.lexeme == Lexeme::Stray) {
        return Err(SyntaxError::Stray {
            at: stray.at,
            text: stray.text,
        });
    }

    let mut rest = pieces.as_slice();
    let parsed = command(&mut rest).map_err(|error| match error {
        ErrMode::Backtrack(error) | ErrMode::Cut(error) => error,
        ErrMode::Incomplete(_) => SyntaxError::expected("word", rest.first()),
    })?;

    match rest.iter().find(|piece| piece.lexeme != Lexeme::Newline) {
        Some(extra) => Err(SyntaxError::expected("end of line", Some(extra))),
        None => Ok(parsed),
    }
}

type Step<'src, T> = Result<T, ErrMode<SyntaxError<'src>>>;

fn command<'src, 'slice>(input: &mut Input<'src, 'slice>) -> Step<'src, Command<'src>>
where
    'src: 'slice,
{
    let keyword = take(Lexeme::Word, "command").parse_next(input)?;
    let spec = catalog::find(keyword.text).ok_or(ErrMode::Backtrack(SyntaxError::expected(
        "command",
        Some(&keyword),
    )))?;

    let command = match (spec.tag, spec.arguments) {
        (CommandTag::Status, _) => Command::Status,
        (CommandTag::Faults, _) => Command::Faults,
        (CommandTag::History, _) => Command::History,
        (CommandTag::Afe, Arguments::Assignments { keys }) => Command::Afe(assignments(input, keys)?),
        (CommandTag::Cycle, _) => Command::Cycle {
            count: count(input)?.unwrap_or(1),
        },
        (CommandTag::Press, Arguments::OptionalKeyword { keywords }) => {
            match keyword_in(input, keywords, "short or long")? {
                Some(kind) if kind == "long" => Command::Press(PressKind::Long),
                _ => Command::Press(PressKind::Short),
            }
        }
        (CommandTag::Profile, _) => {
            let name = take(Lexeme::Word, "profile name").parse_next(input)?;
            let profile = BuiltinProfile::from_name(name.text).ok_or(ErrMode::Cut(
                SyntaxError::expected("profile name", Some(&name)),
            ))?;
            Command::Profile(profile)
        }
        (CommandTag::Help, _) => {
            let topic = match input.split_first() {
                Some((word, rest)) if word.lexeme == Lexeme::Word => {
                    *input = rest;
                    Some(word.text)
                }
                _ => None,
            };
            Command::Help(HelpCommand { topic })
        }
        _ => {
            return Err(ErrMode::Cut(SyntaxError::expected(
                "arguments",
                Some(&keyword),
            )));
        }
    };
    Ok(command)
}

fn assignments<'src, 'slice>(
    input: &mut Input<'src, 'slice>,
    keys: &'static [&'static str],
) -> Step<'src, AfeCommand>
where
    'src: 'slice,
{
    let mut afe = AfeCommand::default();

    while let Some((word, rest)) = input.split_first() {
        if word.lexeme == Lexeme::Newline {
            break;
        }
        let key = keys
            .iter()
            .copied()
            .find(|key| word.lexeme == Lexeme::Word && key.eq_ignore_ascii_case(word.text))
            .ok_or(ErrMode::Backtrack(SyntaxError::expected(
                "stat, current, vmin or vmax",
                Some(word),
            )))?;
        *input = rest;

        let _ = take(Lexeme::Assign, "=").parse_next(input)?;
        let literal = number(input)?;
        let value = integer(&literal).map_err(ErrMode::Cut)?;
        let fit = |_| ErrMode::Cut(SyntaxError::out_of_range(&literal));

        match key {
            "stat" => afe.stat = Some(u8::try_from(value).map_err(fit)?),
            "current" => afe.current = Some(i16::try_from(value).map_err(fit)?),
            "vmin" => afe.vmin = Some(u16::try_from(value).map_err(fit)?),
            _ => afe.vmax = Some(u16::try_from(value).map_err(fit)?),
        }
    }

    Ok(afe)
}

fn count<'src, 'slice>(input: &mut Input<'src, 'slice>) -> Step<'src, Option<u16>>
where
    'src: 'slice,
{
    match input.first() {
        Some(piece) if piece.is_number() => {
            let piece = number(input)?;
            let value = integer(&piece).map_err(ErrMode::Cut)?;
            u16::try_from(value)
                .map(Some)
                .map_err(|_| ErrMode::Cut(SyntaxError::out_of_range(&piece)))
        }
        Some(piece) if piece.lexeme != Lexeme::Newline => Err(ErrMode::Backtrack(
            SyntaxError::expected("cycle count", Some(piece)),
        )),
        _ => Ok(None),
    }
}

/// Optional keyword from `keywords`, returned in its catalog spelling.
fn keyword_in<'src, 'slice>(
    input: &mut Input<'src, 'slice>,
    keywords: &'static [&'static str],
    what: &'static str,
) -> Step<'src, Option<&'static str>>
where
    'src: 'slice,
{
    let Some((piece, rest)) = input.split_first() else {
        return Ok(None);
    };
    if piece.lexeme == Lexeme::Newline {
        return Ok(None);
    }

    let found = keywords
        .iter()
        .copied()
        .find(|keyword| piece.lexeme == Lexeme::Word && keyword.eq_ignore_ascii_case(piece.text))
        .ok_or(ErrMode::Backtrack(SyntaxError::expected(what, Some(piece))))?;
    *input = rest;
    Ok(Some(found))
}

fn number<'src, 'slice>(input: &mut Input<'src, 'slice>) -> Step<'src, Piece<'src>>
where
    'src: 'slice,
{
    match input.split_first() {
        Some((piece, rest)) if piece.is_number() => {
            *input = rest;
            Ok(*piece)
        }
        other => Err(ErrMode::Backtrack(SyntaxError::expected(
            "number",
            other.map(|(piece, _)| piece),
        ))),
    }
}

fn take<'src, 'slice>(
    lexeme: Lexeme,
    what: &'static str,
) -> impl Parser<Input<'src, 'slice>, Piece<'src>, SyntaxError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| match input.split_first() {
        Some((piece, rest)) if piece.lexeme == lexeme => {
            *input = rest;
            Ok(*piece)
        }
        other => Err(ErrMode::Backtrack(SyntaxError::expected(
            what,
            other.map(|(piece, _)| piece),
        ))),
    }
}

fn integer<'a>(piece: &Piece<'a>) -> Result<i32, SyntaxError<'a>> {
    let value = match piece.lexeme {
        Lexeme::Hex => u32::from_str_radix(&piece.text[2..], 16)
            .ok()
            .and_then(|value| i32::try_from(value).ok()),
        _ => piece.text.parse().ok(),
    };
    value.ok_or(SyntaxError::out_of_range(piece))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(input: &str) -> Command<'_> {
        parse(input).expect("command should parse")
    }

    #[test]
    fn parses_bare_commands() {
        assert_eq!(parse_ok("status"), Command::Status);
        assert_eq!(parse_ok("FAULTS"), Command::Faults);
        assert_eq!(parse_ok("history\r\n"), Command::History);
    }

    #[test]
    fn parses_afe_assignments() {
        match parse_ok("afe stat=0x84 current=-3600 vmax=10300") {
            Command::Afe(afe) => {
                assert_eq!(afe.stat, Some(0x84));
                assert_eq!(afe.current, Some(-3600));
                assert_eq!(afe.vmin, None);
                assert_eq!(afe.vmax, Some(10_300));
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(matches!(parse_ok("afe"), Command::Afe(afe) if afe.is_query()));
    }

    #[test]
    fn afe_rejects_out_of_range_values() {
        assert_eq!(
            parse("afe stat=300"),
            Err(SyntaxError::OutOfRange { at: 9, text: "300" })
        );
        assert!(matches!(
            parse("afe temp=1"),
            Err(SyntaxError::Expected {
                found: Some((4, "temp")),
                ..
            })
        ));
    }

    #[test]
    fn cycle_count_defaults_to_one() {
        assert_eq!(parse_ok("cycle"), Command::Cycle { count: 1 });
        assert_eq!(parse_ok("cycle 25"), Command::Cycle { count: 25 });
        assert!(parse("cycle -2").is_err());
    }

    #[test]
    fn press_defaults_to_short() {
        assert_eq!(parse_ok("press"), Command::Press(PressKind::Short));
        assert_eq!(parse_ok("press LONG"), Command::Press(PressKind::Long));
        assert!(parse("press twice").is_err());
    }

    #[test]
    fn profile_requires_known_name() {
        assert_eq!(
            parse_ok("profile LiC"),
            Command::Profile(BuiltinProfile::LithiumCapacitor)
        );
        assert_eq!(
            parse("profile"),
            Err(SyntaxError::Expected {
                what: "profile name",
                found: None,
            })
        );
        assert!(parse("profile nimh").is_err());
    }

    #[test]
    fn parses_help_topic() {
        assert_eq!(
            parse_ok("help afe"),
            Command::Help(HelpCommand { topic: Some("afe") })
        );
        assert_eq!(parse_ok("help"), Command::Help(HelpCommand { topic: None }));
    }

    #[test]
    fn rejects_trailing_words_and_symbols() {
        assert!(matches!(
            parse("status now"),
            Err(SyntaxError::Expected {
                what: "end of line",
                ..
            })
        ));
        assert_eq!(
            parse("cycle 3$"),
            Err(SyntaxError::Stray { at: 7, text: "$" })
        );
    }

    #[test]
    fn overlong_line_is_refused() {
        let line = "afe stat=1 stat=1 stat=1 stat=1 stat=1 stat=1 stat=1 stat=1 stat=1";
        assert_eq!(parse(line), Err(SyntaxError::TooLong));
    }
}
