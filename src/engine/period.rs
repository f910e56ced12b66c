// ==========================================
// 会计数据导入管道 - 会计期间解析
// ==========================================
// 格式: "YYYY-MM"（整月）或 "YYYY-MM-DD <sep> YYYY-MM-DD"，
//       sep ∈ {" a ", " to ", " - "}
// ==========================================

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

const RANGE_SEPARATORS: &[&str] = &[" a ", " to ", " - "];

impl Period {
    /// 解析期间字符串，无法识别返回 None
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        for sep in RANGE_SEPARATORS {
            if let Some((left, right)) = raw.split_once(sep) {
                let start = NaiveDate::parse_from_str(left.trim(), "%Y-%m-%d").ok()?;
                let end = NaiveDate::parse_from_str(right.trim(), "%Y-%m-%d").ok()?;
                if end < start {
                    return None;
                }
                return Some(Self { start, end });
            }
        }

        let (year, month) = raw.split_once('-')?;
        if year.len() != 4 || month.is_empty() || month.len() > 2 {
            return None;
        }
        let year: i32 = year.parse().ok()?;
        let month: u32 = month.parse().ok()?;
        let start = NaiveDate::from_ymd_opt(year, month, 1)?;
        Some(Self {
            start,
            end: last_day_of_month(start)?,
        })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} a {}", self.start, self.end)
    }
}

fn last_day_of_month(first: NaiveDate) -> Option<NaiveDate> {
    let (y, m) = if first.month() == 12 {
        (first.year() + 1, 1)
    } else {
        (first.year(), first.month() + 1)
    };
    NaiveDate::from_ymd_opt(y, m, 1)?.pred_opt()
}
