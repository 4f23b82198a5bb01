//! Moving A1-style formulas between cells

use regex::Regex;
use std::sync::OnceLock;

use crate::address::{self, MAX_COL, MAX_ROW};

/// Rewrite `formula` as if it were copied `rows` down and `cols` to the right.
///
/// `$`-anchored parts stay put and a reference pushed off the sheet becomes
/// `#REF!`. String literals and quoted sheet names are copied verbatim.
/// Whole-row and whole-column references (`A:A`, `1:1`) are not shifted.
pub(crate) fn translate(formula: &str, rows: i64, cols: i64) -> String {
    static REFERENCE_RE: OnceLock<Regex> = OnceLock::new();
    let re = REFERENCE_RE.get_or_init(|| Regex::new(r"(\$?)([A-Za-z]{1,3})(\$?)([0-9]+)").unwrap());

    let mut out = String::with_capacity(formula.len());
    let mut rest = formula;
    while let Some(first) = rest.chars().next() {
        if first == '"' || first == '\'' {
            // A doubled quote just ends one run and starts the next
            let end = rest[1..].find(first).map(|i| i + 2).unwrap_or(rest.len());
            out.push_str(&rest[..end]);
            rest = &rest[end..];
        } else {
            let end = rest.find(['"', '\'']).unwrap_or(rest.len());
            shift_references(re, &rest[..end], rows, cols, &mut out);
            rest = &rest[end..];
        }
    }
    out
}

fn shift_references(re: &Regex, segment: &str, rows: i64, cols: i64, out: &mut String) {
    let bytes = segment.as_bytes();
    let mut copied = 0;
    for caps in re.captures_iter(segment) {
        let Some(whole) = caps.get(0) else { continue };
        let joined_before = whole.start() > 0 && is_name_byte(bytes[whole.start() - 1]);
        let joined_after = bytes
            .get(whole.end())
            .is_some_and(|b| is_name_byte(*b) || *b == b'(');
        if joined_before || joined_after {
            continue;
        }

        let col_fixed = &caps[1];
        let row_fixed = &caps[3];
        let col = address::parse_column(&caps[2]).ok().filter(|c| *c <= MAX_COL);
        let row = caps[4].parse::<u32>().ok().filter(|r| (1..=MAX_ROW).contains(r));
        let (Some(col), Some(row)) = (col, row) else {
            // Past the sheet edge, so a name like ZZZ1 rather than a cell
            continue;
        };

        out.push_str(&segment[copied..whole.start()]);
        let col = if col_fixed.is_empty() { shift(col, cols, MAX_COL) } else { Some(col) };
        let row = if row_fixed.is_empty() { shift(row, rows, MAX_ROW) } else { Some(row) };
        match (col, row) {
            (Some(col), Some(row)) => {
                out.push_str(col_fixed);
                out.push_str(&address::column_label(col));
                out.push_str(row_fixed);
                out.push_str(&row.to_string());
            }
            _ => out.push_str("#REF!"),
        }
        copied = whole.end();
    }
    out.push_str(&segment[copied..]);
}

fn shift(value: u32, by: i64, max: u32) -> Option<u32> {
    u32::try_from(i64::from(value) + by)
        .ok()
        .filter(|moved| (1..=max).contains(moved))
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'.'
}
