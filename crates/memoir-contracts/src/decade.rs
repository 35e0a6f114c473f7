use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// A supported ten-year era, ordered by year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum Decade {
    Forties = 1940,
    Fifties = 1950,
    Sixties = 1960,
    Seventies = 1970,
    Eighties = 1980,
    Nineties = 1990,
    TwoThousands = 2000,
    TwentyTens = 2010,
    TwentyTwenties = 2020,
}

impl Decade {
    pub const ALL: [Decade; 9] = [
        Decade::Forties,
        Decade::Fifties,
        Decade::Sixties,
        Decade::Seventies,
        Decade::Eighties,
        Decade::Nineties,
        Decade::TwoThousands,
        Decade::TwentyTens,
        Decade::TwentyTwenties,
    ];

    pub const EARLIEST: Decade = Decade::Forties;
    pub const LATEST: Decade = Decade::TwentyTwenties;

    pub fn year(self) -> u16 {
        self as u16
    }

    /// Truncates `year` to its decade; `None` when that decade is unsupported.
    pub fn from_year(year: u16) -> Option<Self> {
        let decade = (year / 10) * 10;
        Self::ALL.into_iter().find(|value| value.year() == decade)
    }

    pub fn label(self) -> String {
        format!("{}s", self.year())
    }
}

impl fmt::Display for Decade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.year())
    }
}

impl Serialize for Decade {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.year())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "could not recognise a decade; name a year or decade between {} and {} (transcript: \"{transcript}\")",
    Decade::EARLIEST.year(),
    Decade::LATEST.year()
)]
pub struct ClassifyError {
    pub transcript: String,
}

const YEAR_PATTERN: &str = r"\b((?:19|20)[0-9]{2})";
const DECADE_SUFFIX_PATTERN: &str = r"\b([0-9]0)(?:ern?|s)\b";

// Order matters: compound forms precede the shorter forms they contain.
const KEYWORD_PATTERNS: &[(&str, Decade)] = &[
    (r"\bzweitausend(?:und)?zwanzig\w*", Decade::TwentyTwenties),
    (r"\bzweitausend(?:und)?zehn\w*", Decade::TwentyTens),
    (r"\bzweitausend\w*", Decade::TwoThousands),
    (r"(?:\b|hundert)vierzig\w*", Decade::Forties),
    (r"(?:\b|hundert)f(?:ü|ue|u)nfzig\w*", Decade::Fifties),
    (r"(?:\b|hundert)sechzig\w*", Decade::Sixties),
    (r"(?:\b|hundert)siebzig\w*", Decade::Seventies),
    (r"(?:\b|hundert)achtzig\w*", Decade::Eighties),
    (r"(?:\b|hundert)neunzig\w*", Decade::Nineties),
    (
        r"\btwo[\s-]+thousand[\s-]+(?:and[\s-]+)?twent(?:y|ies)\b|\btwenty[\s-]+twent(?:y|ies)\b|\b2020s\b",
        Decade::TwentyTwenties,
    ),
    (
        r"\btwo[\s-]+thousand[\s-]+(?:and[\s-]+)?tens?\b|\btwenty[\s-]+tens\b|\b2010s\b",
        Decade::TwentyTens,
    ),
    (
        r"\btwo[\s-]+thousands?\b|\b2000s\b|\bnoughties\b",
        Decade::TwoThousands,
    ),
    (r"\bfort(?:y|ies)\b", Decade::Forties),
    (r"\bfift(?:y|ies)\b", Decade::Fifties),
    (r"\bsixt(?:y|ies)\b", Decade::Sixties),
    (r"\bsevent(?:y|ies)\b", Decade::Seventies),
    (r"\beight(?:y|ies)\b", Decade::Eighties),
    (r"\bninet(?:y|ies)\b", Decade::Nineties),
];

fn year_regex() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(YEAR_PATTERN).ok()).as_ref()
}

fn decade_suffix_regex() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(DECADE_SUFFIX_PATTERN).ok())
        .as_ref()
}

fn keyword_regexes() -> &'static [(Regex, Decade)] {
    static CELL: OnceLock<Vec<(Regex, Decade)>> = OnceLock::new();
    CELL.get_or_init(|| {
        KEYWORD_PATTERNS
            .iter()
            .filter_map(|(pattern, decade)| Regex::new(pattern).ok().map(|re| (re, *decade)))
            .collect()
    })
}

/// Finds the decade a transcript talks about.
///
/// Stages run in order and the first supported hit wins: a four-digit year,
/// a numeric decade with a suffix ("70er", "80s"), then spelled-out German
/// and English keywords. Matching is case-insensitive.
pub fn classify_decade(text: &str) -> Result<Decade, ClassifyError> {
    let normalized = text.to_lowercase();
    year_decade(&normalized)
        .or_else(|| suffix_decade(&normalized))
        .or_else(|| keyword_decade(&normalized))
        .ok_or_else(|| ClassifyError {
            transcript: text.to_string(),
        })
}

fn year_decade(normalized: &str) -> Option<Decade> {
    year_regex()?
        .captures_iter(normalized)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u16>().ok())
        .find_map(Decade::from_year)
}

fn suffix_decade(normalized: &str) -> Option<Decade> {
    decade_suffix_regex()?
        .captures_iter(normalized)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u16>().ok())
        .find_map(|short| {
            let year = if short <= 20 { 2000 + short } else { 1900 + short };
            Decade::from_year(year)
        })
}

fn keyword_decade(normalized: &str) -> Option<Decade> {
    keyword_regexes()
        .iter()
        .find(|(pattern, _)| pattern.is_match(normalized))
        .map(|(_, decade)| *decade)
}
