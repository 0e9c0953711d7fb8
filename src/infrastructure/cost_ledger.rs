//! File-backed cost ledger
//!
//! Remaining budget lives in a one-line balance file; every charge and
//! top-up is appended to a CSV ledger (`Date,Task,Cost,Remaining Budget,Warnings`).

#![allow(clippy::uninlined_format_args)]

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{Local, NaiveDate};
use tracing::{info, warn};

use crate::application::budget::{BudgetError, BudgetGate, Charge, TaskKind};
use crate::infrastructure::config::{AffordabilityRule, BudgetConfig};

const LEDGER_HEADER: [&str; 5] = ["Date", "Task", "Cost", "Remaining Budget", "Warnings"];
const TOP_UP_TASK: &str = "Mid-Month Top-Up";
const LEDGER_DATE_FORMAT: &str = "%Y-%m-%d";

/// Estimated cost of a task
pub fn estimate(task: &TaskKind) -> f64 {
    match task {
        TaskKind::LlmCallSmall => 0.01,
        TaskKind::LlmCallMedium => 0.05,
        TaskKind::SdGeneration => 0.02,
        TaskKind::ScrapeApiCall => 0.005,
        TaskKind::Other(_) => 0.01,
    }
}

#[derive(Debug)]
struct LedgerState {
    remaining: f64,
}

/// [`BudgetGate`] backed by a balance file and a CSV ledger
#[derive(Debug)]
pub struct CostLedger {
    config: BudgetConfig,
    state: Mutex<LedgerState>,
}

impl CostLedger {
    /// Load the stored balance (or start from the initial budget) and make
    /// sure the ledger has its header
    pub fn open(config: BudgetConfig) -> Result<Self, BudgetError> {
        for path in [&config.ledger_file, &config.balance_file] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|source| io_error(parent, source))?;
            }
        }

        let remaining = load_balance(&config.balance_file)?.unwrap_or(config.initial_budget);
        let ledger = Self {
            config,
            state: Mutex::new(LedgerState { remaining }),
        };
        ledger.ensure_header()?;
        info!("💰 Budget ledger opened: £{:.2} remaining", remaining);
        Ok(ledger)
    }

    pub fn remaining(&self) -> f64 {
        self.state().map(|s| s.remaining).unwrap_or(0.0)
    }

    /// Apply the monthly top-up if `today` is the top-up day and it has not
    /// been applied on this date yet. Returns whether money was added.
    pub fn check_and_top_up(&self, today: NaiveDate) -> Result<bool, BudgetError> {
        use chrono::Datelike;

        if today.day() != self.config.top_up_day || self.topped_up_on(today)? {
            return Ok(false);
        }
        self.top_up(self.config.top_up_amount, today)?;
        Ok(true)
    }

    pub fn top_up(&self, amount: f64, today: NaiveDate) -> Result<(), BudgetError> {
        let mut state = self.state()?;
        state.remaining += amount;
        self.save_balance(state.remaining)?;
        self.append_row(&[
            today.format(LEDGER_DATE_FORMAT).to_string(),
            TOP_UP_TASK.to_string(),
            format!("+{}", amount),
            format_amount(state.remaining),
            String::new(),
        ])?;
        info!("💰 Mid-month top-up: added £{:.2}. New budget: £{:.2}", amount, state.remaining);
        Ok(())
    }

    fn affordable(&self, remaining: f64, estimate: f64, actual: f64) -> bool {
        match self.config.rule {
            AffordabilityRule::RemainingCoversEstimate => remaining - estimate >= 0.0,
            AffordabilityRule::StrictCeiling => remaining - estimate.max(actual) >= 0.0,
        }
    }

    fn topped_up_on(&self, day: NaiveDate) -> Result<bool, BudgetError> {
        let path = &self.config.ledger_file;
        if !path.exists() {
            return Ok(false);
        }
        let date = day.format(LEDGER_DATE_FORMAT).to_string();
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(|source| ledger_error(path, source))?;
        Ok(reader
            .records()
            .filter_map(Result::ok)
            .any(|row| row.get(0) == Some(date.as_str()) && row.get(1) == Some(TOP_UP_TASK)))
    }

    fn ensure_header(&self) -> Result<(), BudgetError> {
        let path = &self.config.ledger_file;
        let empty = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
        if empty {
            self.write_ledger(&LEDGER_HEADER.map(str::to_string))?;
        }
        Ok(())
    }

    fn append_row(&self, row: &[String; 5]) -> Result<(), BudgetError> {
        self.ensure_header()?;
        self.write_ledger(row)
    }

    fn write_ledger(&self, row: &[String; 5]) -> Result<(), BudgetError> {
        let path = &self.config.ledger_file;
        let mut buffer = Vec::new();
        {
            let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(&mut buffer);
            writer.write_record(row).map_err(|source| ledger_error(path, source))?;
            writer.flush().map_err(|source| io_error(path, source))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| io_error(path, source))?;
        file.write_all(&buffer).map_err(|source| io_error(path, source))
    }

    fn save_balance(&self, remaining: f64) -> Result<(), BudgetError> {
        let path = &self.config.balance_file;
        fs::write(path, remaining.to_string()).map_err(|source| io_error(path, source))
    }

    fn state(&self) -> Result<MutexGuard<'_, LedgerState>, BudgetError> {
        self.state.lock().map_err(|_| BudgetError::LockPoisoned)
    }
}

impl BudgetGate for CostLedger {
    fn estimate_cost(&self, task: &TaskKind) -> f64 {
        estimate(task)
    }

    fn can_afford(&self, task: &TaskKind) -> bool {
        let cost = estimate(task);
        self.affordable(self.remaining(), cost, cost)
    }

    fn log_cost(&self, task: &TaskKind, actual: Option<f64>) -> Result<Charge, BudgetError> {
        let estimated = estimate(task);
        let cost = actual.unwrap_or(estimated);
        let mut state = self.state()?;

        if !self.affordable(state.remaining, estimated, cost) {
            warn!("❌ Cannot afford {}. Remaining budget: £{:.2}", task, state.remaining);
            return Ok(Charge::Refused {
                remaining: state.remaining,
            });
        }

        state.remaining -= cost;
        self.save_balance(state.remaining)?;

        let warning = if state.remaining < self.config.alert_threshold {
            let message = format!("⚠️ Low budget! Only £{:.2} remaining.", state.remaining);
            warn!("{}", message);
            message
        } else {
            String::new()
        };

        self.append_row(&[
            Local::now().date_naive().format(LEDGER_DATE_FORMAT).to_string(),
            task.to_string(),
            cost.to_string(),
            format_amount(state.remaining),
            warning,
        ])?;

        Ok(Charge::Charged {
            cost,
            remaining: state.remaining,
        })
    }
}

fn load_balance(path: &Path) -> Result<Option<f64>, BudgetError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path).map_err(|source| io_error(path, source))?;
    content
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(Some)
        .ok_or_else(|| BudgetError::CorruptBalance {
            path: path.to_path_buf(),
            content,
        })
}

fn format_amount(value: f64) -> String {
    format!("{:.4}", value)
}

fn io_error(path: &Path, source: std::io::Error) -> BudgetError {
    BudgetError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn ledger_error(path: &Path, source: csv::Error) -> BudgetError {
    BudgetError::Ledger {
        path: path.to_path_buf(),
        source,
    }
}
