// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Tunable parameters. Each parameter is stored as a single file under
//! /run/lowmemorykiller/parameters so that it survives a daemon restart and
//! can be inspected from a shell.

use std::fmt::Display;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::bail;
use anyhow::Context;
use log::warn;

use crate::lmk::SelectionEngine;
use crate::lmk::ThresholdTable;

const PARAMETERS_DIR: &str = "run/lowmemorykiller/parameters";

// oom_score_adj floors. The legacy oom_adj floors 0, 1, 2, 4, 6, 15 scaled
// by 1000 / 17.
const DEFAULT_PRIORITY_FLOORS: [i32; 6] = [0, 58, 117, 235, 352, 882];
const DEFAULT_MIN_FREE_PAGES: [u64; 6] = [1536, 2048, 3072, 4096, 5120, 6144];
const DEFAULT_MIN_FILE_PAGES: [u64; 6] = [1536, 2048, 4096, 8192, 12288, 16384];
const DEFAULT_SWAP_FUDGE_PAGES: u64 = 512;
// DEFAULT_SEEKS * 16 of the kernel shrinker.
const DEFAULT_RECLAIM_COST_WEIGHT: u32 = 32;
const DEFAULT_DEATH_PENDING_TIMEOUT_MS: u64 = 1000;

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    UnknownParameter(String),
    InvalidValue { name: String, value: String },
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownParameter(name) => f.write_fmt(format_args!("unknown parameter {name}")),
            Self::InvalidValue { name, value } => {
                f.write_fmt(format_args!("invalid value {value:?} for {name}"))
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterName {
    PriorityFloors,
    MinFreePages,
    MinFilePages,
    BackgroundMinFreePages,
    CheckFilePages,
    SwapFudgePages,
    DebugVerbosity,
    ReclaimCostWeight,
    DeathPendingTimeoutMs,
    SwapAccounting,
    BackgroundProfile,
}

impl ParameterName {
    pub const ALL: [ParameterName; 11] = [
        Self::PriorityFloors,
        Self::MinFreePages,
        Self::MinFilePages,
        Self::BackgroundMinFreePages,
        Self::CheckFilePages,
        Self::SwapFudgePages,
        Self::DebugVerbosity,
        Self::ReclaimCostWeight,
        Self::DeathPendingTimeoutMs,
        Self::SwapAccounting,
        Self::BackgroundProfile,
    ];

    /// The key used on D-Bus and as the parameter file name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PriorityFloors => "priority_floors",
            Self::MinFreePages => "min_free_pages",
            Self::MinFilePages => "min_file_pages",
            Self::BackgroundMinFreePages => "background_min_free_pages",
            Self::CheckFilePages => "check_file_pages",
            Self::SwapFudgePages => "swap_fudge_pages",
            Self::DebugVerbosity => "debug_verbosity",
            Self::ReclaimCostWeight => "reclaim_cost_weight",
            Self::DeathPendingTimeoutMs => "death_pending_timeout_ms",
            Self::SwapAccounting => "swap_accounting",
            Self::BackgroundProfile => "background_profile",
        }
    }
}

impl FromStr for ParameterName {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|parameter| parameter.as_str() == name)
            .ok_or_else(|| Error::UnknownParameter(name.to_string()))
    }
}

/// Parses a comma separated list. The list ends at the first malformed
/// element.
pub fn parse_list<T: FromStr>(value: &str) -> Vec<T> {
    let value = value.trim();
    if value.is_empty() {
        return Vec::new();
    }
    value
        .split(',')
        .map_while(|element| element.trim().parse().ok())
        .collect()
}

fn format_list<T: ToString>(values: &[T]) -> String {
    values
        .iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "y" | "Y" | "true" => Some(true),
        "0" | "n" | "N" | "false" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameters {
    pub priority_floors: Vec<i32>,
    pub min_free_pages: Vec<u64>,
    pub min_file_pages: Vec<u64>,
    pub background_min_free_pages: Vec<u64>,
    pub check_file_pages: bool,
    pub swap_fudge_pages: u64,
    pub debug_verbosity: u32,
    pub reclaim_cost_weight: u32,
    pub death_pending_timeout_ms: u64,
    pub swap_accounting: bool,
    pub background_profile: bool,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            priority_floors: DEFAULT_PRIORITY_FLOORS.to_vec(),
            min_free_pages: DEFAULT_MIN_FREE_PAGES.to_vec(),
            min_file_pages: DEFAULT_MIN_FILE_PAGES.to_vec(),
            background_min_free_pages: DEFAULT_MIN_FREE_PAGES.to_vec(),
            check_file_pages: false,
            swap_fudge_pages: DEFAULT_SWAP_FUDGE_PAGES,
            debug_verbosity: 0,
            reclaim_cost_weight: DEFAULT_RECLAIM_COST_WEIGHT,
            death_pending_timeout_ms: DEFAULT_DEATH_PENDING_TIMEOUT_MS,
            swap_accounting: true,
            background_profile: true,
        }
    }
}

fn parse_scalar<T: FromStr>(name: ParameterName, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| Error::InvalidValue {
        name: name.as_str().to_string(),
        value: value.to_string(),
    })
}

fn parse_flag(name: ParameterName, value: &str) -> Result<bool> {
    parse_bool(value).ok_or_else(|| Error::InvalidValue {
        name: name.as_str().to_string(),
        value: value.to_string(),
    })
}

impl Parameters {
    /// Reads every parameter file under `root`. Missing or malformed files
    /// keep the default value.
    pub fn load(root: &Path) -> Self {
        let mut parameters = Self::default();
        let dir = root.join(PARAMETERS_DIR);
        for name in ParameterName::ALL {
            let path = dir.join(name.as_str());
            let value = match std::fs::read_to_string(&path) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Failed to read {}: {}", path.display(), e);
                    continue;
                }
            };
            if let Err(e) = parameters.set(name, &value) {
                warn!("Ignoring {}: {}", path.display(), e);
            }
        }
        parameters
    }

    pub fn get(&self, name: ParameterName) -> String {
        match name {
            ParameterName::PriorityFloors => format_list(&self.priority_floors),
            ParameterName::MinFreePages => format_list(&self.min_free_pages),
            ParameterName::MinFilePages => format_list(&self.min_file_pages),
            ParameterName::BackgroundMinFreePages => format_list(&self.background_min_free_pages),
            ParameterName::CheckFilePages => self.check_file_pages.to_string(),
            ParameterName::SwapFudgePages => self.swap_fudge_pages.to_string(),
            ParameterName::DebugVerbosity => self.debug_verbosity.to_string(),
            ParameterName::ReclaimCostWeight => self.reclaim_cost_weight.to_string(),
            ParameterName::DeathPendingTimeoutMs => self.death_pending_timeout_ms.to_string(),
            ParameterName::SwapAccounting => self.swap_accounting.to_string(),
            ParameterName::BackgroundProfile => self.background_profile.to_string(),
        }
    }

    /// Lists never fail to parse; they are clipped at the first malformed
    /// element. Scalars are rejected as a whole.
    pub fn set(&mut self, name: ParameterName, value: &str) -> Result<()> {
        match name {
            ParameterName::PriorityFloors => self.priority_floors = parse_list(value),
            ParameterName::MinFreePages => self.min_free_pages = parse_list(value),
            ParameterName::MinFilePages => self.min_file_pages = parse_list(value),
            ParameterName::BackgroundMinFreePages => {
                self.background_min_free_pages = parse_list(value)
            }
            ParameterName::CheckFilePages => self.check_file_pages = parse_flag(name, value)?,
            ParameterName::SwapFudgePages => self.swap_fudge_pages = parse_scalar(name, value)?,
            ParameterName::DebugVerbosity => self.debug_verbosity = parse_scalar(name, value)?,
            ParameterName::ReclaimCostWeight => {
                let weight: u32 = parse_scalar(name, value)?;
                if weight == 0 {
                    return Err(Error::InvalidValue {
                        name: name.as_str().to_string(),
                        value: value.to_string(),
                    });
                }
                self.reclaim_cost_weight = weight;
            }
            ParameterName::DeathPendingTimeoutMs => {
                self.death_pending_timeout_ms = parse_scalar(name, value)?
            }
            ParameterName::SwapAccounting => self.swap_accounting = parse_flag(name, value)?,
            ParameterName::BackgroundProfile => self.background_profile = parse_flag(name, value)?,
        }
        Ok(())
    }

    /// Writes the current value of `name` to its parameter file.
    pub fn store(&self, root: &Path, name: ParameterName) -> anyhow::Result<()> {
        let path = parameter_path(root, name);
        std::fs::write(&path, self.get(name))
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn foreground_table(&self) -> ThresholdTable {
        ThresholdTable::from_lists(
            &self.priority_floors,
            &self.min_free_pages,
            &self.min_file_pages,
        )
    }

    pub fn background_table(&self) -> ThresholdTable {
        ThresholdTable::from_lists(
            &self.priority_floors,
            &self.background_min_free_pages,
            &self.min_file_pages,
        )
    }

    /// Pushes every value into the running engine.
    pub fn apply(&self, engine: &SelectionEngine) {
        let tunables = engine.tunables();
        tunables.set_swap_fudge_pages(self.swap_fudge_pages);
        tunables.set_check_file_pages(self.check_file_pages);
        tunables.set_swap_accounting(self.swap_accounting);
        tunables.set_debug_verbosity(self.debug_verbosity);
        tunables.set_reclaim_cost_weight(self.reclaim_cost_weight);
        tunables.set_death_pending_timeout(Duration::from_millis(self.death_pending_timeout_ms));

        let profiles = engine.profiles();
        profiles.set_enabled(self.background_profile);
        profiles.update_tables(self.foreground_table(), self.background_table());
    }
}

fn parameter_path(root: &Path, name: ParameterName) -> PathBuf {
    root.join(PARAMETERS_DIR).join(name.as_str())
}

pub fn init_parameter_files() -> anyhow::Result<()> {
    init_parameter_files_impl(Path::new("/"))
}

/// Creates the missing parameter files with their default values.
fn init_parameter_files_impl(root: &Path) -> anyhow::Result<()> {
    let config_path = root.join(PARAMETERS_DIR);
    if !config_path.exists() {
        bail!(
            "The parameters directory {} doesn't exist.",
            config_path.display()
        );
    } else if !config_path.is_dir() {
        bail!(
            "The parameters directory {} is not a directory.",
            config_path.display()
        );
    }

    let defaults = Parameters::default();
    for name in ParameterName::ALL {
        let path = config_path.join(name.as_str());
        if !path.exists() {
            let mut file = File::create(&path)?;
            file.write_all(defaults.get(name).as_bytes())?;
        } else if !path.is_file() {
            bail!(
                "The parameter path {} is not a regular file.",
                path.display()
            );
        }
    }

    Ok(())
}
