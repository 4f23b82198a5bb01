//! Cell address resolution ("BC23" -> row 23, column 55)
//!
//! Addresses are 1-based on both axes. Input is matched case-insensitively but
//! is not trimmed: callers pass the address exactly as it should be read.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

use crate::error::{FillError, Result};

/// Last row of an XLSX worksheet
pub const MAX_ROW: u32 = 1_048_576;
/// Last column of an XLSX worksheet ("XFD")
pub const MAX_COL: u32 = 16_384;

/// A 1-based (row, column) pair. Ordering is row-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellAddress {
    pub row: u32,
    pub col: u32,
}

impl CellAddress {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Whether the address fits inside an XLSX worksheet
    pub fn is_within_sheet_limits(&self) -> bool {
        (1..=MAX_ROW).contains(&self.row) && (1..=MAX_COL).contains(&self.col)
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_label(self.col), self.row)
    }
}

/// Resolve a cell reference like "A1" or "bc23" into a [`CellAddress`]
pub fn resolve(address: &str) -> Result<CellAddress> {
    static ADDRESS_RE: OnceLock<Regex> = OnceLock::new();
    let re = ADDRESS_RE.get_or_init(|| Regex::new(r"^([A-Z]+)([0-9]+)$").unwrap());

    let invalid = || FillError::InvalidAddress(address.to_string());
    let normalized = address.to_ascii_uppercase();
    let caps = re.captures(&normalized).ok_or_else(invalid)?;

    let col = decode_letters(&caps[1]).ok_or_else(invalid)?;
    let row = caps[2]
        .parse::<u32>()
        .ok()
        .filter(|row| *row >= 1)
        .ok_or_else(invalid)?;

    Ok(CellAddress { row, col })
}

/// Parse a bare column label like "D" or "aa" into its 1-based column number
pub fn parse_column(label: &str) -> Result<u32> {
    let normalized = label.to_ascii_uppercase();
    if normalized.is_empty() || !normalized.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(FillError::InvalidAddress(label.to_string()));
    }
    decode_letters(&normalized).ok_or_else(|| FillError::InvalidAddress(label.to_string()))
}

/// Render a 1-based column number as its letter label (1 -> "A", 27 -> "AA")
pub fn column_label(col: u32) -> String {
    let mut n = col;
    let mut letters = Vec::new();
    while n > 0 {
        n -= 1;
        letters.push(b'A' + (n % 26) as u8);
        n /= 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

// Bijective base-26: A=1 .. Z=26, AA=27. None on overflow.
fn decode_letters(letters: &str) -> Option<u32> {
    letters.bytes().try_fold(0u32, |acc, b| {
        acc.checked_mul(26)?.checked_add(u32::from(b - b'A') + 1)
    })
}

/// Inclusive rectangular range, normalized so `start` is the top-left corner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    pub start: CellAddress,
    pub end: CellAddress,
}

impl CellRange {
    pub fn new(a: CellAddress, b: CellAddress) -> Self {
        Self {
            start: CellAddress::new(a.row.min(b.row), a.col.min(b.col)),
            end: CellAddress::new(a.row.max(b.row), a.col.max(b.col)),
        }
    }

    /// Parse a range like "A1:B10"
    pub fn parse(range: &str) -> Result<Self> {
        let (first, second) = range
            .split_once(':')
            .ok_or_else(|| FillError::InvalidAddress(range.to_string()))?;
        Ok(Self::new(resolve(first)?, resolve(second)?))
    }

    /// Smallest range covering both `self` and `other`
    pub fn union(&self, other: &CellRange) -> CellRange {
        CellRange {
            start: CellAddress::new(
                self.start.row.min(other.start.row),
                self.start.col.min(other.start.col),
            ),
            end: CellAddress::new(
                self.end.row.max(other.end.row),
                self.end.col.max(other.end.col),
            ),
        }
    }

    pub fn contains(&self, addr: CellAddress) -> bool {
        (self.start.row..=self.end.row).contains(&addr.row)
            && (self.start.col..=self.end.col).contains(&addr.col)
    }

    /// Extend the range so it covers `addr`
    pub fn include(&self, addr: CellAddress) -> CellRange {
        self.union(&CellRange::new(addr, addr))
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}:{}", self.start, self.end)
        }
    }
}

/// Where a roster is read from: a whole column, or an explicit range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnSelection {
    Column(u32),
    Range(CellRange),
}

impl ColumnSelection {
    /// Parse either a column label ("D") or a range ("A1:B10"). Both must lie
    /// inside the sheet limits.
    pub fn parse(text: &str) -> Result<Self> {
        let selection = if text.contains(':') {
            let range = CellRange::parse(text)?;
            (range.start.is_within_sheet_limits() && range.end.is_within_sheet_limits())
                .then_some(ColumnSelection::Range(range))
        } else {
            Some(parse_column(text)?)
                .filter(|col| *col <= MAX_COL)
                .map(ColumnSelection::Column)
        };
        selection.ok_or_else(|| FillError::InvalidAddress(text.to_string()))
    }
}
