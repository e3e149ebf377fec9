use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Datelike, Days, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("cannot write ledger file {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// What the ledger says about one sender's request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditDecision {
    /// Negative credit, or a sender without a ledger entry.
    Unlimited,
    /// Positive credit; the contained value is what is left right now.
    Granted(i64),
    /// Credit is spent for this week.
    Exhausted,
}

/// On-disk shape. The week boundary is stored inside the record so a
/// ledger that goes untouched across a Monday still resets.
#[derive(Debug, Serialize, Deserialize)]
struct LedgerFile {
    week_start: NaiveDateTime,
    credits: HashMap<String, i64>,
}

/// Per-sender remaining-use counters with weekly reset semantics.
///
/// Loaded once per invocation: configured defaults first, then the
/// persisted values on top (persisted wins per key) as long as the
/// persisted record belongs to the current ISO week. Every consuming
/// decision is persisted immediately.
pub struct CreditLedger {
    path: PathBuf,
    week_start: NaiveDateTime,
    credits: HashMap<String, i64>,
}

/// Monday 00:00 of the week `now` falls in.
pub fn week_start_of(now: NaiveDateTime) -> NaiveDateTime {
    let days_into_week = now.date().weekday().num_days_from_monday();
    let monday = now
        .date()
        .checked_sub_days(Days::new(u64::from(days_into_week)))
        .unwrap_or(now.date());
    monday.and_time(NaiveTime::MIN)
}

impl CreditLedger {
    pub fn load(path: &Path, defaults: &[(String, i64)], now: NaiveDateTime) -> Self {
        let mut credits: HashMap<String, i64> = defaults.iter().cloned().collect();
        let week_start = week_start_of(now);

        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<LedgerFile>(&content) {
                Ok(stored) if stored.week_start >= week_start => {
                    credits.extend(stored.credits);
                }
                Ok(_) => {
                    tracing::info!("credit ledger is from a previous week, starting fresh");
                }
                Err(e) => {
                    tracing::info!(
                        "can't parse ledger file {}, using configured defaults: {}",
                        path.display(),
                        e
                    );
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::info!(
                    "can't open ledger file {}, using configured defaults: {}",
                    path.display(),
                    e
                );
            }
        }

        Self {
            path: path.to_path_buf(),
            week_start,
            credits,
        }
    }

    pub fn decide(&self, sender: &str) -> CreditDecision {
        match self.credits.get(sender) {
            None => CreditDecision::Unlimited,
            Some(c) if *c < 0 => CreditDecision::Unlimited,
            Some(0) => CreditDecision::Exhausted,
            Some(c) => CreditDecision::Granted(*c),
        }
    }

    /// Decrements a positive credit and persists the ledger. Unlimited
    /// senders are persisted unchanged.
    pub fn consume(&mut self, sender: &str) -> Result<(), LedgerError> {
        if let Some(c) = self.credits.get_mut(sender) {
            if *c > 0 {
                *c -= 1;
            }
        }
        self.persist()
    }

    fn persist(&self) -> Result<(), LedgerError> {
        let record = LedgerFile {
            week_start: self.week_start,
            credits: self.credits.clone(),
        };
        let body = serde_json::to_string(&record).expect("ledger record serializes");
        std::fs::write(&self.path, body).map_err(|e| LedgerError::Write {
            path: self.path.clone(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn defaults() -> Vec<(String, i64)> {
        vec![
            ("alice@example.com".into(), 2),
            ("bob@example.com".into(), -1),
        ]
    }

    #[test]
    fn week_start_is_monday_midnight() {
        // 2024-05-15 is a Wednesday.
        let start = week_start_of(at(2024, 5, 15, 17));
        assert_eq!(start, at(2024, 5, 13, 0));
        // A Monday is its own week start.
        assert_eq!(week_start_of(at(2024, 5, 13, 3)), at(2024, 5, 13, 0));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = CreditLedger::load(&dir.path().join("credits.json"), &defaults(), at(2024, 5, 15, 12));
        assert_eq!(ledger.decide("alice@example.com"), CreditDecision::Granted(2));
        assert_eq!(ledger.decide("bob@example.com"), CreditDecision::Unlimited);
        assert_eq!(ledger.decide("carol@example.com"), CreditDecision::Unlimited);
    }

    #[test]
    fn persisted_values_win_within_the_week() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credits.json");
        let now = at(2024, 5, 15, 12);

        let mut ledger = CreditLedger::load(&path, &defaults(), now);
        ledger.consume("alice@example.com").unwrap();

        let reloaded = CreditLedger::load(&path, &defaults(), at(2024, 5, 16, 9));
        assert_eq!(
            reloaded.decide("alice@example.com"),
            CreditDecision::Granted(1)
        );
    }

    #[test]
    fn stale_week_resets_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credits.json");

        let mut ledger = CreditLedger::load(&path, &defaults(), at(2024, 5, 15, 12));
        ledger.consume("alice@example.com").unwrap();
        ledger.consume("alice@example.com").unwrap();
        assert_eq!(ledger.decide("alice@example.com"), CreditDecision::Exhausted);

        // Next Monday the configured defaults apply again.
        let next_week = CreditLedger::load(&path, &defaults(), at(2024, 5, 20, 8));
        assert_eq!(
            next_week.decide("alice@example.com"),
            CreditDecision::Granted(2)
        );
    }

    #[test]
    fn unlimited_credit_never_runs_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credits.json");
        let mut ledger = CreditLedger::load(&path, &defaults(), at(2024, 5, 15, 12));
        for _ in 0..5 {
            ledger.consume("bob@example.com").unwrap();
        }
        assert_eq!(ledger.decide("bob@example.com"), CreditDecision::Unlimited);
    }
}
