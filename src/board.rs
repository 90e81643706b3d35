//! Board profiles: where the FPGA window lives and how the flash is laid out
use std::{
    fmt,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{
    APP_OFFSET, ASMI_REG_OFFSET, FACTORY_OFFSET, FLASH_SIZE, MAX_RPD_SIZE, SECTOR_SIZE,
};

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("failed to read board file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid board file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("board {0:?} not found")]
    NotFound(String),
    #[error("board file lists no boards")]
    Empty,
    #[error("board {name}: {reason}")]
    Invalid { name: String, reason: String },
}

/// Which image slot of the configuration flash to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Region {
    /// Golden image loaded when the application image is bad
    Factory,
    /// Application image
    App,
}

impl Default for Region {
    #[cfg(feature = "factory")]
    fn default() -> Self {
        Region::Factory
    }

    #[cfg(not(feature = "factory"))]
    fn default() -> Self {
        Region::App
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Region::Factory => write!(f, "factory"),
            Region::App => write!(f, "app"),
        }
    }
}

/// One board's FPGA bridge and flash layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Board {
    pub name: String,
    #[serde(default)]
    pub description: String,

    /// Memory device the FPGA window is mapped from
    #[serde(default = "default_mem_path")]
    pub mem_path: PathBuf,
    /// Offset of the window inside `mem_path`
    #[serde(deserialize_with = "parse_address_and_offset")]
    pub fpga_base: u64,
    #[serde(
        default = "default_fpga_window",
        deserialize_with = "parse_address_and_offset"
    )]
    pub fpga_window: u64,

    #[serde(
        default = "default_flash_size",
        deserialize_with = "parse_address_and_offset"
    )]
    pub flash_size: u64,
    /// Largest bitstream this FPGA density produces
    #[serde(
        default = "default_max_rpd_size",
        deserialize_with = "parse_address_and_offset"
    )]
    pub max_rpd_size: u64,
    #[serde(
        default = "default_factory_offset",
        deserialize_with = "parse_address_and_offset"
    )]
    pub factory_offset: u64,
    #[serde(
        default = "default_app_offset",
        deserialize_with = "parse_address_and_offset"
    )]
    pub app_offset: u64,
}

fn default_mem_path() -> PathBuf {
    PathBuf::from("/dev/mem")
}

fn default_fpga_window() -> u64 {
    0x1000
}

fn default_flash_size() -> u64 {
    FLASH_SIZE as u64
}

fn default_max_rpd_size() -> u64 {
    MAX_RPD_SIZE
}

fn default_factory_offset() -> u64 {
    FACTORY_OFFSET as u64
}

fn default_app_offset() -> u64 {
    APP_OFFSET as u64
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({} @ {:#x})",
            self.name,
            self.mem_path.display(),
            self.fpga_base
        )
    }
}

impl Board {
    pub fn offset(&self, region: Region) -> u32 {
        match region {
            Region::Factory => self.factory_offset as u32,
            Region::App => self.app_offset as u32,
        }
    }

    pub fn validate(&self) -> Result<(), BoardError> {
        let invalid = |reason: String| BoardError::Invalid {
            name: self.name.clone(),
            reason,
        };
        if self.flash_size > FLASH_SIZE as u64 {
            return Err(invalid(format!(
                "flash size {:#x} exceeds the 21-bit ASMI address space",
                self.flash_size
            )));
        }
        if (ASMI_REG_OFFSET + 4) as u64 > self.fpga_window {
            return Err(invalid(format!(
                "{:#x} byte window does not reach the ASMI register",
                self.fpga_window
            )));
        }
        for (region, offset) in [
            (Region::Factory, self.factory_offset),
            (Region::App, self.app_offset),
        ] {
            if offset % SECTOR_SIZE as u64 != 0 {
                return Err(invalid(format!(
                    "{region} offset {offset:#x} is not 64KiB aligned"
                )));
            }
            if offset
                .checked_add(self.max_rpd_size)
                .is_none_or(|end| end > self.flash_size)
            {
                return Err(invalid(format!(
                    "{region} image at {offset:#x} runs past the end of flash"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct BoardFile {
    boards: Vec<Board>,
}

pub struct BoardDB {
    boards: Vec<Board>,
}

impl BoardDB {
    /// Profiles compiled into the binary.
    pub fn load() -> Result<Self, BoardError> {
        Self::from_yaml(include_str!("../boards/ts-78xx.yaml"))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, BoardError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| BoardError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, BoardError> {
        let file: BoardFile = serde_yaml::from_str(raw)?;
        if file.boards.is_empty() {
            return Err(BoardError::Empty);
        }
        Ok(BoardDB {
            boards: file.boards,
        })
    }

    pub fn boards(&self) -> &[Board] {
        &self.boards
    }

    /// The named board, or the first one listed.
    pub fn find(&self, name: Option<&str>) -> Result<Board, BoardError> {
        let board = match name {
            Some(name) => self
                .boards
                .iter()
                .find(|b| b.name.eq_ignore_ascii_case(name))
                .ok_or_else(|| BoardError::NotFound(name.to_string()))?,
            None => self.boards.first().ok_or(BoardError::Empty)?,
        };
        log::debug!("using board profile {}", board);
        Ok(board.clone())
    }
}

/// Parse `0x` hex, plain decimal, or a decimal count of `K`/`KiB`/`KB` or
/// `M`/`MiB`/`MB`.
pub fn parse_number(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let err = || format!("error while parsing {:?}", s);
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u64::from_str_radix(&hex.replace('_', ""), 16).map_err(|_| err());
    }
    let (digits, scale) = [
        ("KiB", 1 << 10),
        ("KB", 1 << 10),
        ("K", 1 << 10),
        ("MiB", 1 << 20),
        ("MB", 1 << 20),
        ("M", 1 << 20),
    ]
    .iter()
    .find_map(|&(suffix, scale)| s.strip_suffix(suffix).map(|d| (d, scale)))
    .unwrap_or((s, 1u64));
    digits
        .replace('_', "")
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(scale))
        .ok_or_else(err)
}

fn parse_address_and_offset<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(n) => Ok(n),
        Raw::Str(s) => parse_number(&s).map_err(serde::de::Error::custom),
    }
}
