//! Data skipping based on client predicate hints.
//!
//! Clients may attach sql-like hint strings to a query. The engine parses
//! them into [`Predicate`]s and drops data files that provably cannot
//! contain a matching row, based on partition values and per-file min/max
//! statistics. Hints are advisory only: an unparseable hint is ignored,
//! and a file is kept whenever information is missing.

use std::cmp::Ordering;
use std::fmt::Display;

use crate::reader::action::{FileStats, StatValue};
use crate::reader::TableFile;

/// Comparison operator of a predicate hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Equal (`=` or `==`).
    Eq,
    /// Not equal (`!=` or `<>`).
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Set membership.
    In,
    /// Negated set membership.
    NotIn,
}

/// A scalar literal in a predicate hint.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// Integer literal.
    Int(i64),
    /// Floating point literal.
    Float(f64),
    /// Quoted string literal.
    String(String),
}

impl Scalar {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            Scalar::String(s) => s.parse().ok(),
        }
    }
}

impl Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Float(v) => write!(f, "{v}"),
            Scalar::String(s) => write!(f, "{s}"),
        }
    }
}

/// A parsed predicate hint of the form `COL OP VALUE`.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    column: String,
    op: Op,
    values: Vec<Scalar>,
}

impl Predicate {
    /// Column the predicate constrains.
    pub fn column(&self) -> &str {
        &self.column
    }

    /// Operator of the predicate.
    pub fn op(&self) -> Op {
        self.op
    }

    fn value(&self) -> &Scalar {
        &self.values[0]
    }
}

/// Tolerance for numeric equality.
const EPSILON: f64 = 1e-4;

/// Parse a list of hint strings, ignoring the ones that do not parse.
pub fn parse_hints(hints: &[String]) -> Vec<Predicate> {
    hints
        .iter()
        .filter_map(|hint| {
            let parsed = parse_hint(hint);
            if parsed.is_none() {
                tracing::warn!(hint, "ignoring unparseable predicate hint");
            }
            parsed
        })
        .collect()
}

/// Parse a single hint string into a predicate.
pub fn parse_hint(hint: &str) -> Option<Predicate> {
    let s = hint.trim();
    let column_end = s
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-'))
        .unwrap_or(s.len());
    let column = &s[..column_end];
    if column.is_empty() {
        return None;
    }
    let rest = s[column_end..].trim_start();

    let (op, value_part) = parse_op(rest)?;
    let values = match op {
        Op::In | Op::NotIn => parse_list(value_part)?,
        _ => vec![parse_scalar(value_part)?],
    };

    Some(Predicate {
        column: column.to_owned(),
        op,
        values,
    })
}

fn parse_op(s: &str) -> Option<(Op, &str)> {
    if let Some(rest) = strip_keyword(s, "NOT") {
        let rest = strip_keyword(rest, "IN")?;
        return Some((Op::NotIn, rest));
    }
    if let Some(rest) = strip_keyword(s, "IN") {
        return Some((Op::In, rest));
    }
    for (symbol, op) in [
        (">=", Op::Ge),
        ("<=", Op::Le),
        ("==", Op::Eq),
        ("!=", Op::Ne),
        ("<>", Op::Ne),
        ("=", Op::Eq),
        (">", Op::Gt),
        ("<", Op::Lt),
    ] {
        if let Some(rest) = s.strip_prefix(symbol) {
            return Some((op, rest.trim_start()));
        }
    }
    None
}

/// Strip a case-insensitive keyword that must be followed by whitespace,
/// an opening parenthesis or the end of input.
fn strip_keyword<'a>(s: &'a str, keyword: &str) -> Option<&'a str> {
    if s.len() < keyword.len() || !s[..keyword.len()].eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = &s[keyword.len()..];
    if rest.is_empty() || rest.starts_with(|c: char| c.is_whitespace() || c == '(') {
        Some(rest.trim_start())
    } else {
        None
    }
}

fn parse_scalar(s: &str) -> Option<Scalar> {
    let s = s.trim();
    for quote in ['\'', '"'] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return Some(Scalar::String(s[1..s.len() - 1].to_owned()));
        }
    }
    if let Ok(i) = s.parse::<i64>() {
        return Some(Scalar::Int(i));
    }
    match s.parse::<f64>() {
        Ok(f) if f.is_finite() => Some(Scalar::Float(f)),
        _ => None,
    }
}

fn parse_list(s: &str) -> Option<Vec<Scalar>> {
    let inner = s.trim().strip_prefix('(')?.strip_suffix(')')?;
    let mut values = vec![];
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in inner.chars() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                }
            }
            None if c == '\'' || c == '"' => {
                current.push(c);
                quote = Some(c);
            }
            None if c == ',' => {
                values.push(parse_scalar(&current)?);
                current.clear();
            }
            None => current.push(c),
        }
    }
    if quote.is_some() {
        return None;
    }
    values.push(parse_scalar(&current)?);
    Some(values)
}

/// Drop the files that provably cannot contain a row matching all of the
/// predicates. Files are kept whenever information is missing.
pub fn prune(
    files: Vec<TableFile>,
    predicates: &[Predicate],
    partition_columns: &[String],
) -> Vec<TableFile> {
    if predicates.is_empty() {
        return files;
    }
    files
        .into_iter()
        .filter(|file| {
            predicates
                .iter()
                .all(|pred| may_match(file, pred, partition_columns))
        })
        .collect()
}

fn may_match(file: &TableFile, pred: &Predicate, partition_columns: &[String]) -> bool {
    if partition_columns.iter().any(|c| c == pred.column()) {
        match file.partition_values().get(pred.column()) {
            Some(Some(value)) => partition_may_match(value, pred),
            // a null or absent partition value carries no information
            _ => true,
        }
    } else if let Some(stats) = file.stats() {
        stats_may_match(stats, pred)
    } else {
        true
    }
}

fn partition_may_match(value: &str, pred: &Predicate) -> bool {
    match pred.op {
        Op::In => pred.values.iter().any(|v| is_equal(value, v)),
        Op::NotIn => !pred.values.iter().any(|v| is_equal(value, v)),
        op => {
            let Some(ord) = compare_value(value, pred.value()) else {
                return true;
            };
            match op {
                Op::Eq => ord == Ordering::Equal,
                Op::Ne => ord != Ordering::Equal,
                Op::Gt => ord == Ordering::Greater,
                Op::Ge => ord != Ordering::Less,
                Op::Lt => ord == Ordering::Less,
                Op::Le => ord != Ordering::Greater,
                Op::In | Op::NotIn => true,
            }
        }
    }
}

fn stats_may_match(stats: &FileStats, pred: &Predicate) -> bool {
    // inequality and set predicates cannot be decided from min/max alone
    if matches!(pred.op, Op::Ne | Op::In | Op::NotIn) {
        return true;
    }
    let (Some(min), Some(max)) = (
        stats.min_values.get(pred.column()),
        stats.max_values.get(pred.column()),
    ) else {
        return true;
    };

    let min_cmp = compare_stat(min, pred.value());
    let max_cmp = compare_stat(max, pred.value());
    match pred.op {
        Op::Eq => {
            // no match when value < min or value > max
            min_cmp != Some(Ordering::Greater) && max_cmp != Some(Ordering::Less)
        }
        Op::Gt => max_cmp.map_or(true, |c| c == Ordering::Greater),
        Op::Ge => max_cmp.map_or(true, |c| c != Ordering::Less),
        Op::Lt => min_cmp.map_or(true, |c| c == Ordering::Less),
        Op::Le => min_cmp.map_or(true, |c| c != Ordering::Greater),
        Op::Ne | Op::In | Op::NotIn => true,
    }
}

fn is_equal(value: &str, scalar: &Scalar) -> bool {
    compare_value(value, scalar) == Some(Ordering::Equal)
}

/// Compare a partition value against a literal: numeric when both parse
/// as numbers, lexicographic otherwise.
fn compare_value(value: &str, scalar: &Scalar) -> Option<Ordering> {
    if let (Ok(v), Some(s)) = (value.parse::<f64>(), scalar.as_f64()) {
        return Some(compare_f64(v, s));
    }
    Some(value.cmp(&scalar.to_string()))
}

/// Compare a statistics value against a literal, or `None` when the two
/// are not comparable.
fn compare_stat(stat: &StatValue, scalar: &Scalar) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (stat.as_f64(), scalar.as_f64()) {
        return Some(compare_f64(a, b));
    }
    match (stat.as_str(), scalar) {
        (Some(a), Scalar::String(b)) => Some(a.cmp(b.as_str())),
        _ => None,
    }
}

fn compare_f64(a: f64, b: f64) -> Ordering {
    if (a - b).abs() <= EPSILON {
        Ordering::Equal
    } else if a < b {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::reader::action::Add;

    use super::*;

    fn file(partition: &[(&str, &str)], stats: Option<&str>) -> TableFile {
        TableFile::new(Add {
            path: "part-0.parquet".to_owned(),
            partition_values: partition
                .iter()
                .map(|(k, v)| (k.to_string(), Some(v.to_string())))
                .collect(),
            size: 1024,
            modification_time: 0,
            data_change: true,
            stats: stats.map(|s| s.to_owned()),
            tags: None,
            deletion_vector: None,
        })
    }

    #[test]
    fn parse_simple_hints() {
        assert_eq!(
            parse_hint("year = 2024"),
            Some(Predicate {
                column: "year".to_owned(),
                op: Op::Eq,
                values: vec![Scalar::Int(2024)],
            })
        );
        assert_eq!(parse_hint("price >= 9.99").unwrap().op, Op::Ge);
        assert_eq!(parse_hint("price<>10").unwrap().op, Op::Ne);
        assert_eq!(
            parse_hint("date = '2021-04-28'").unwrap().values,
            vec![Scalar::String("2021-04-28".to_owned())]
        );
        assert_eq!(
            parse_hint("region in ('eu', 'us')").unwrap(),
            Predicate {
                column: "region".to_owned(),
                op: Op::In,
                values: vec![
                    Scalar::String("eu".to_owned()),
                    Scalar::String("us".to_owned())
                ],
            }
        );
        assert_eq!(parse_hint("id NOT IN (1,2,3)").unwrap().op, Op::NotIn);
    }

    #[test]
    fn unparseable_hints_are_rejected() {
        assert_eq!(parse_hint(""), None);
        assert_eq!(parse_hint("year"), None);
        assert_eq!(parse_hint("year ~ 2024"), None);
        assert_eq!(parse_hint("year = unquoted"), None);
        assert_eq!(parse_hint("year = "), None);
        assert_eq!(parse_hint("year IN 2024"), None);
        assert_eq!(parse_hint("year IN ('open"), None);
        // INFO is not the IN keyword
        assert_eq!(parse_hint("x INFO (1)"), None);
    }

    #[test]
    fn parse_hints_skips_bad_ones() {
        let hints = vec!["year = 2024".to_owned(), "nonsense".to_owned()];
        assert_eq!(parse_hints(&hints).len(), 1);
    }

    #[test]
    fn partition_pruning_on_equality() {
        let files = vec![
            file(&[("year", "2023")], None),
            file(&[("year", "2024")], None),
        ];
        let predicates = parse_hints(&["year = 2024".to_owned()]);
        let kept = prune(files, &predicates, &["year".to_owned()]);
        assert_eq!(kept.len(), 1);
        assert_eq!(
            kept[0].partition_values().get("year"),
            Some(&Some("2024".to_owned()))
        );
    }

    #[test]
    fn partition_pruning_on_membership() {
        let files = vec![
            file(&[("region", "eu")], None),
            file(&[("region", "us")], None),
            file(&[("region", "apac")], None),
        ];
        let predicates = parse_hints(&["region IN ('eu', 'us')".to_owned()]);
        let kept = prune(files, &predicates, &["region".to_owned()]);
        assert_eq!(kept.len(), 2);

        let files = vec![
            file(&[("region", "eu")], None),
            file(&[("region", "us")], None),
        ];
        let predicates = parse_hints(&["region NOT IN ('eu')".to_owned()]);
        let kept = prune(files, &predicates, &["region".to_owned()]);
        assert_eq!(kept.len(), 1);
        assert_eq!(
            kept[0].partition_values().get("region"),
            Some(&Some("us".to_owned()))
        );
    }

    #[test]
    fn partition_pruning_compares_numerically() {
        let files = vec![
            file(&[("year", "2023")], None),
            file(&[("year", "2024")], None),
        ];
        let predicates = parse_hints(&["year > 2023".to_owned()]);
        let kept = prune(files, &predicates, &["year".to_owned()]);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn min_max_pruning_on_ranges() {
        let low = file(
            &[],
            Some(r#"{"numRecords":10,"minValues":{"price":0},"maxValues":{"price":50},"nullCount":{"price":0}}"#),
        );
        let high = file(
            &[],
            Some(r#"{"numRecords":10,"minValues":{"price":100},"maxValues":{"price":200},"nullCount":{"price":0}}"#),
        );

        let predicates = parse_hints(&["price > 60".to_owned()]);
        let kept = prune(vec![low.clone(), high.clone()], &predicates, &[]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0], high);

        let predicates = parse_hints(&["price <= 20".to_owned()]);
        let kept = prune(vec![low.clone(), high.clone()], &predicates, &[]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0], low);

        let predicates = parse_hints(&["price = 75".to_owned()]);
        let kept = prune(vec![low, high], &predicates, &[]);
        assert!(kept.is_empty());
    }

    #[test]
    fn min_max_pruning_keeps_boundaries() {
        let f = file(
            &[],
            Some(r#"{"minValues":{"price":0},"maxValues":{"price":50},"nullCount":{}}"#),
        );
        // max == value: `>` cannot match, `>=` can
        assert!(prune(vec![f.clone()], &parse_hints(&["price > 50".to_owned()]), &[]).is_empty());
        assert_eq!(
            prune(vec![f.clone()], &parse_hints(&["price >= 50".to_owned()]), &[]).len(),
            1
        );
        // min == value: `<` cannot match, `<=` can
        assert!(prune(vec![f.clone()], &parse_hints(&["price < 0".to_owned()]), &[]).is_empty());
        assert_eq!(
            prune(vec![f], &parse_hints(&["price <= 0".to_owned()]), &[]).len(),
            1
        );
    }

    #[test]
    fn string_min_max_pruning() {
        let f = file(
            &[],
            Some(r#"{"minValues":{"date":"2024-01-01"},"maxValues":{"date":"2024-01-31"},"nullCount":{}}"#),
        );
        assert!(prune(
            vec![f.clone()],
            &parse_hints(&["date > '2024-02-01'".to_owned()]),
            &[]
        )
        .is_empty());
        assert_eq!(
            prune(
                vec![f],
                &parse_hints(&["date = '2024-01-15'".to_owned()]),
                &[]
            )
            .len(),
            1
        );
    }

    #[test]
    fn conservative_when_information_is_missing() {
        // no stats at all
        let f = file(&[], None);
        assert_eq!(
            prune(vec![f], &parse_hints(&["price > 60".to_owned()]), &[]).len(),
            1
        );
        // stats without the column
        let f = file(&[], Some(r#"{"minValues":{},"maxValues":{},"nullCount":{}}"#));
        assert_eq!(
            prune(vec![f], &parse_hints(&["price > 60".to_owned()]), &[]).len(),
            1
        );
        // inequality cannot be decided from min/max
        let f = file(
            &[],
            Some(r#"{"minValues":{"price":10},"maxValues":{"price":10},"nullCount":{}}"#),
        );
        assert_eq!(
            prune(vec![f], &parse_hints(&["price != 10".to_owned()]), &[]).len(),
            1
        );
        // type mismatch between stat and literal
        let f = file(
            &[],
            Some(r#"{"minValues":{"price":"low"},"maxValues":{"price":"high"},"nullCount":{}}"#),
        );
        assert_eq!(
            prune(vec![f], &parse_hints(&["price > 60".to_owned()]), &[]).len(),
            1
        );
    }

    #[test]
    fn predicates_combine_with_and() {
        let files = vec![
            file(&[("year", "2024"), ("region", "eu")], None),
            file(&[("year", "2024"), ("region", "us")], None),
            file(&[("year", "2023"), ("region", "eu")], None),
        ];
        let predicates = parse_hints(&["year = 2024".to_owned(), "region = 'eu'".to_owned()]);
        let kept = prune(
            files,
            &predicates,
            &["year".to_owned(), "region".to_owned()],
        );
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn numeric_equality_uses_tolerance() {
        let f = file(
            &[],
            Some(r#"{"minValues":{"price":10.00005},"maxValues":{"price":10.00005},"nullCount":{}}"#),
        );
        assert_eq!(
            prune(vec![f], &parse_hints(&["price = 10.0".to_owned()]), &[]).len(),
            1
        );
    }
}
