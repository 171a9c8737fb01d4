use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

identifier!(PeriodId);

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Half {
    First,
    Second,
}

impl Half {
    pub fn number(self) -> i64 {
        match self {
            Half::First => 1,
            Half::Second => 2,
        }
    }

    pub fn from_number(n: i64) -> Option<Half> {
        match n {
            1 => Some(Half::First),
            2 => Some(Half::Second),
            _ => None,
        }
    }
}

/// An academic term, the scope of quotas and of the one-scholarship rule.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Term {
    pub year: i64,
    pub half: Half,
}

impl Term {
    pub fn new(year: i64, half: Half) -> Term {
        Term { year, half }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.year, self.half.number())
    }
}

impl FromStr for Term {
    type Err = Error;

    /// Parse a term written as `2025.1` or `2025.2`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::Validation(format!("invalid term {s:?}, expected YEAR.1 or YEAR.2"));
        let (year, half) = s.split_once('.').ok_or_else(invalid)?;
        let year = year.parse::<i64>().map_err(|_| invalid())?;
        let half = half
            .parse::<i64>()
            .ok()
            .and_then(Half::from_number)
            .ok_or_else(invalid)?;
        if !(1900..=9999).contains(&year) {
            return Err(invalid());
        }
        Ok(Term { year, half })
    }
}

/// Institution-wide scholarship ceiling for a term.
#[derive(Clone, Debug, Serialize)]
pub struct Quota {
    pub term: Term,
    pub total_scholarships: u32,
    pub version: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct InscriptionPeriod {
    pub id: PeriodId,
    pub term: Term,
    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
}

impl InscriptionPeriod {
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.opens_at <= now && now <= self.closes_at
    }
}

#[test]
fn test_parse_term() {
    assert_eq!(
        "2025.2".parse::<Term>().unwrap(),
        Term::new(2025, Half::Second)
    );
    assert_eq!(Term::new(2024, Half::First).to_string(), "2024.1");
    assert!("2025.3".parse::<Term>().is_err());
    assert!("2025".parse::<Term>().is_err());
    assert!("year.1".parse::<Term>().is_err());
}
