//! Dialect translation for model-proposed SQL.
//!
//! Rewrites are string-level and syntax-only: date-function renames,
//! interval normalization, string-function casing and `EXTRACT` accessors.
//! Each dialect's rewrite set is applied until the text stops changing, so
//! translating already-translated SQL is a no-op.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::{debug, warn};

use copilot_core::SqlDialect;

const MAX_PASSES: usize = 32;

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($re).unwrap());
    };
}

pattern!(CURRENT_DATE_CALL, r"(?i)\bCURRENT_DATE\s*\(\s*\)");
pattern!(CURRENT_DATE, r"(?i)\bCURRENT_DATE\b");
pattern!(TODAY_CALL, r"(?i)\btoday\s*\(\s*\)");
pattern!(NOW_CALL, r"(?i)\bNOW\s*\(\s*\)");
pattern!(
    TO_INTERVAL,
    r"(?i)\btoInterval(Day|Week|Month|Quarter|Year)\s*\(\s*(\d+)\s*\)"
);
pattern!(STRING_FN, r"(?i)\b(LENGTH|UPPER|LOWER)\s*\(");
pattern!(
    EXTRACT_PART,
    r"(?i)\bEXTRACT\s*\(\s*(YEAR|MONTH|DAY)\s+FROM\s+([^)]+?)\s*\)"
);
pattern!(PART_CALL, r"(?i)\b(YEAR|MONTH|DAY)\s*\(([^)]+)\)");
pattern!(CH_PART_CALL, r"\b(toYear|toMonth|toDayOfMonth)\s*\(([^)]+)\)");
pattern!(DATE_FORMAT, r"(?i)\bDATE_FORMAT\s*\(");
pattern!(
    DATE_MINUS_INTERVAL,
    r"(?i)\b(?:CURRENT_DATE|date\('now'\))\s*([-+])\s*INTERVAL\s+'?(\d+)'?\s+(DAY|WEEK|MONTH|YEAR)S?\b"
);

/// Translate `sql` into `dialect`'s function and keyword naming.
pub fn translate(sql: &str, dialect: SqlDialect) -> String {
    let mut current = sql.to_string();
    for _ in 0..MAX_PASSES {
        let next = match dialect {
            SqlDialect::ClickHouse => clickhouse_pass(&current),
            SqlDialect::DuckDb => duckdb_pass(&current),
            SqlDialect::Sqlite => sqlite_pass(&current),
        };
        if next == current {
            if next != sql {
                debug!(%dialect, "SQL translated");
            }
            return next;
        }
        current = next;
    }
    warn!(%dialect, "SQL translation did not settle");
    current
}

fn replace(re: &Regex, text: &str, rep: &str) -> String {
    re.replace_all(text, rep).into_owned()
}

fn replace_with<F>(re: &Regex, text: &str, f: F) -> String
where
    F: Fn(&Captures<'_>) -> String,
{
    re.replace_all(text, |caps: &Captures<'_>| f(caps)).into_owned()
}

fn interval_keyword(caps: &Captures<'_>) -> String {
    format!("INTERVAL {} {}", &caps[2], caps[1].to_ascii_uppercase())
}

fn lowercase_call(caps: &Captures<'_>) -> String {
    format!("{}(", caps[1].to_ascii_lowercase())
}

fn clickhouse_pass(sql: &str) -> String {
    let mut s = replace(&CURRENT_DATE_CALL, sql, "today()");
    s = replace(&CURRENT_DATE, &s, "today()");
    s = replace(&NOW_CALL, &s, "now()");
    s = replace_with(&TO_INTERVAL, &s, interval_keyword);
    s = replace_with(&STRING_FN, &s, lowercase_call);
    s = replace_with(&EXTRACT_PART, &s, |caps| {
        format!("{}({})", clickhouse_accessor(&caps[1]), &caps[2])
    });
    s = replace_with(&PART_CALL, &s, |caps| {
        format!("{}({})", clickhouse_accessor(&caps[1]), &caps[2])
    });
    replace(&DATE_FORMAT, &s, "formatDateTime(")
}

fn clickhouse_accessor(part: &str) -> &'static str {
    match part.to_ascii_uppercase().as_str() {
        "YEAR" => "toYear",
        "MONTH" => "toMonth",
        _ => "toDayOfMonth",
    }
}

fn duckdb_pass(sql: &str) -> String {
    let mut s = replace(&CURRENT_DATE_CALL, sql, "current_date");
    s = replace(&TODAY_CALL, &s, "current_date");
    s = replace(&NOW_CALL, &s, "now()");
    s = replace_with(&TO_INTERVAL, &s, interval_keyword);
    s = replace_with(&STRING_FN, &s, lowercase_call);
    s = replace_with(&EXTRACT_PART, &s, |caps| {
        format!("{}({})", caps[1].to_ascii_lowercase(), &caps[2])
    });
    s = replace_with(&CH_PART_CALL, &s, |caps| {
        format!("{}({})", duckdb_accessor(&caps[1]), &caps[2])
    });
    s = replace_with(&PART_CALL, &s, |caps| {
        format!("{}({})", caps[1].to_ascii_lowercase(), &caps[2])
    });
    replace(&DATE_FORMAT, &s, "strftime(")
}

fn duckdb_accessor(function: &str) -> &'static str {
    match function {
        "toYear" => "year",
        "toMonth" => "month",
        _ => "day",
    }
}

fn sqlite_pass(sql: &str) -> String {
    let mut s = replace(&CURRENT_DATE_CALL, sql, "CURRENT_DATE");
    s = replace(&TODAY_CALL, &s, "CURRENT_DATE");
    s = replace(&NOW_CALL, &s, "datetime('now')");
    s = replace_with(&TO_INTERVAL, &s, interval_keyword);
    s = replace_with(&DATE_MINUS_INTERVAL, &s, |caps| {
        let amount: u64 = caps[2].parse().unwrap_or(0);
        let (amount, unit) = match caps[3].to_ascii_uppercase().as_str() {
            "WEEK" => (amount.saturating_mul(7), "day"),
            "MONTH" => (amount, "month"),
            "YEAR" => (amount, "year"),
            _ => (amount, "day"),
        };
        format!("date('now', '{}{} {}')", &caps[1], amount, unit)
    });
    s = replace_with(&STRING_FN, &s, lowercase_call);
    s = replace_with(&EXTRACT_PART, &s, |caps| sqlite_accessor(&caps[1], &caps[2]));
    s = replace_with(&CH_PART_CALL, &s, |caps| {
        let part = match &caps[1] {
            "toYear" => "YEAR",
            "toMonth" => "MONTH",
            _ => "DAY",
        };
        sqlite_accessor(part, &caps[2])
    });
    replace_with(&PART_CALL, &s, |caps| sqlite_accessor(&caps[1], &caps[2]))
}

fn sqlite_accessor(part: &str, expr: &str) -> String {
    let format = match part.to_ascii_uppercase().as_str() {
        "YEAR" => "%Y",
        "MONTH" => "%m",
        _ => "%d",
    };
    format!("CAST(strftime('{format}', {expr}) AS INTEGER)")
}

static CH_UNSUPPORTED: &[(&str, &str)] = &[
    (r"(?i)\bCURRENT_TIMESTAMP\b", "CURRENT_TIMESTAMP - use now() instead"),
    (r"(?i)\bCURRENT_TIME\b", "CURRENT_TIME - use now() instead"),
    (r"(?i)\bILIKE\b", "ILIKE - use ilike() or lower() with LIKE"),
];

static DUCKDB_UNSUPPORTED: &[(&str, &str)] = &[
    (r"\bformatDateTime\s*\(", "formatDateTime() - use strftime() instead"),
    (r"\btoStartOf\w+\s*\(", "toStartOf*() - use date_trunc() instead"),
];

static SQLITE_UNSUPPORTED: &[(&str, &str)] = &[
    (r"(?i)\bDATE_TRUNC\s*\(", "DATE_TRUNC() - use strftime() or date() instead"),
    (r"(?i)\bILIKE\b", "ILIKE - use LIKE, which is case-insensitive for ASCII"),
    (r"(?i)\bINTERVAL\b", "INTERVAL arithmetic - use date(x, '+N unit') instead"),
    (r"\bformatDateTime\s*\(", "formatDateTime() - use strftime() instead"),
];

static COMPAT_RULES: LazyLock<Vec<(SqlDialect, Regex, &'static str)>> = LazyLock::new(|| {
    let mut rules = Vec::new();
    for (dialect, table) in [
        (SqlDialect::ClickHouse, CH_UNSUPPORTED),
        (SqlDialect::DuckDb, DUCKDB_UNSUPPORTED),
        (SqlDialect::Sqlite, SQLITE_UNSUPPORTED),
    ] {
        for (re, note) in table {
            rules.push((dialect, Regex::new(re).unwrap(), *note));
        }
    }
    rules
});

/// Constructs in already-translated SQL that `dialect` is known not to
/// support. Informational only.
pub fn compatibility_notes(sql: &str, dialect: SqlDialect) -> Vec<String> {
    COMPAT_RULES
        .iter()
        .filter(|(d, re, _)| *d == dialect && re.is_match(sql))
        .map(|(_, _, note)| format!("Unsupported construct: {note}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ch(sql: &str) -> String {
        translate(sql, SqlDialect::ClickHouse)
    }

    fn lite(sql: &str) -> String {
        translate(sql, SqlDialect::Sqlite)
    }

    fn duck(sql: &str) -> String {
        translate(sql, SqlDialect::DuckDb)
    }

    #[test]
    fn test_clickhouse_current_date() {
        assert_eq!(
            ch("SELECT * FROM retail_sales WHERE date >= CURRENT_DATE - INTERVAL 90 DAY"),
            "SELECT * FROM retail_sales WHERE date >= today() - INTERVAL 90 DAY"
        );
        assert_eq!(ch("SELECT CURRENT_DATE() FROM t"), "SELECT today() FROM t");
    }

    #[test]
    fn test_clickhouse_extract_and_parts() {
        assert_eq!(
            ch("SELECT EXTRACT(YEAR FROM date) AS y, month(date) FROM retail_sales"),
            "SELECT toYear(date) AS y, toMonth(date) FROM retail_sales"
        );
        assert_eq!(ch("SELECT DAY(date) FROM t"), "SELECT toDayOfMonth(date) FROM t");
    }

    #[test]
    fn test_clickhouse_misc() {
        assert_eq!(ch("SELECT toIntervalMonth(3)"), "SELECT INTERVAL 3 MONTH");
        assert_eq!(ch("SELECT UPPER (region), Length(sku)"), "SELECT upper(region), length(sku)");
        assert_eq!(
            ch("SELECT DATE_FORMAT(date, '%Y-%m') FROM t"),
            "SELECT formatDateTime(date, '%Y-%m') FROM t"
        );
        assert_eq!(ch("SELECT NOW()"), "SELECT now()");
    }

    #[test]
    fn test_sqlite_interval_arithmetic() {
        assert_eq!(
            lite("SELECT * FROM retail_sales WHERE date >= CURRENT_DATE - INTERVAL 90 DAY"),
            "SELECT * FROM retail_sales WHERE date >= date('now', '-90 day')"
        );
        assert_eq!(
            lite("SELECT * FROM t WHERE date >= today() - toIntervalWeek(2)"),
            "SELECT * FROM t WHERE date >= date('now', '-14 day')"
        );
        assert_eq!(
            lite("SELECT * FROM t WHERE date < current_date + interval '1' months"),
            "SELECT * FROM t WHERE date < date('now', '+1 month')"
        );
    }

    #[test]
    fn test_sqlite_extract() {
        assert_eq!(
            lite("SELECT EXTRACT(MONTH FROM date) AS m FROM retail_sales"),
            "SELECT CAST(strftime('%m', date) AS INTEGER) AS m FROM retail_sales"
        );
        assert_eq!(
            lite("SELECT toYear(date) FROM t"),
            "SELECT CAST(strftime('%Y', date) AS INTEGER) FROM t"
        );
    }

    #[test]
    fn test_duckdb_rewrites() {
        assert_eq!(
            duck("SELECT toYear(date), EXTRACT(DAY FROM date), today() FROM t"),
            "SELECT year(date), day(date), current_date FROM t"
        );
        assert_eq!(
            duck("SELECT DATE_FORMAT(date, '%Y') FROM t"),
            "SELECT strftime(date, '%Y') FROM t"
        );
    }

    #[test]
    fn test_nested_parts_settle() {
        let once = ch("SELECT YEAR(YEAR(x)) FROM t");
        assert_eq!(once, "SELECT toYear(toYear(x)) FROM t");
        assert_eq!(ch(&once), once);
    }

    #[test]
    fn test_plain_sql_untouched() {
        let sql = "SELECT sku, SUM(units) AS units FROM retail_sales GROUP BY sku ORDER BY units DESC LIMIT 10";
        for dialect in [SqlDialect::ClickHouse, SqlDialect::DuckDb, SqlDialect::Sqlite] {
            assert_eq!(translate(sql, dialect), sql);
        }
    }

    #[test]
    fn test_compatibility_notes() {
        let notes = compatibility_notes("SELECT CURRENT_TIMESTAMP FROM t", SqlDialect::ClickHouse);
        assert_eq!(notes.len(), 1);
        assert!(notes[0].contains("now()"));
        assert!(compatibility_notes("SELECT today() FROM t", SqlDialect::ClickHouse).is_empty());
        assert_eq!(
            compatibility_notes("SELECT DATE_TRUNC('month', date) FROM t", SqlDialect::Sqlite).len(),
            1
        );
    }

    fn sql_fragment() -> impl Strategy<Value = String> {
        let pieces = prop::sample::select(vec![
            "SELECT ", "FROM retail_sales ", "WHERE ", "date", "region", "CURRENT_DATE", "current_date()",
            "today()", "NOW()", " - INTERVAL 3 DAY", " + interval '2' weeks", "toIntervalMonth(4)",
            "EXTRACT(YEAR FROM ", "extract(month from ", "EXTRACT(DAY FROM ", "YEAR(", "month(", "Day(",
            "toYear(", "toDayOfMonth(", "UPPER(", "length (", "DATE_FORMAT(", ")", "(", ", ", " ",
            "'%Y-%m'", "sum(net_sales)",
        ]);
        prop::collection::vec(pieces, 0..24).prop_map(|parts| parts.concat())
    }

    proptest! {
        #[test]
        fn prop_translate_is_idempotent(sql in sql_fragment()) {
            for dialect in [SqlDialect::ClickHouse, SqlDialect::DuckDb, SqlDialect::Sqlite] {
                let once = translate(&sql, dialect);
                prop_assert_eq!(translate(&once, dialect), once);
            }
        }

        #[test]
        fn prop_translate_is_idempotent_for_arbitrary_text(sql in "[ -~]{0,60}") {
            for dialect in [SqlDialect::ClickHouse, SqlDialect::DuckDb, SqlDialect::Sqlite] {
                let once = translate(&sql, dialect);
                prop_assert_eq!(translate(&once, dialect), once);
            }
        }
    }
}
