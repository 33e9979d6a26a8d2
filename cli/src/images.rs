//! Tape and disk image files named on the command line.
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::{event, Level};

/// An image file for one unit of a tape or disk controller, written
/// on the command line as `UNIT=FILE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFile {
    pub unit: u8,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BadUnitFile {
    MissingEquals(String),
    BadUnit(String),
}

impl Display for BadUnitFile {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            BadUnitFile::MissingEquals(s) => {
                write!(f, "'{s}' should have the form UNIT=FILE")
            }
            BadUnitFile::BadUnit(s) => write!(f, "'{s}' is not a unit number"),
        }
    }
}

impl Error for BadUnitFile {}

impl FromStr for UnitFile {
    type Err = BadUnitFile;

    fn from_str(s: &str) -> Result<UnitFile, BadUnitFile> {
        let (unit, path) = s
            .split_once('=')
            .ok_or_else(|| BadUnitFile::MissingEquals(s.to_string()))?;
        let unit = unit
            .trim()
            .parse::<u8>()
            .map_err(|_| BadUnitFile::BadUnit(unit.to_string()))?;
        if path.is_empty() {
            return Err(BadUnitFile::MissingEquals(s.to_string()));
        }
        Ok(UnitFile {
            unit,
            path: PathBuf::from(path),
        })
    }
}

impl UnitFile {
    /// Read the image.  A file which does not exist yet reads as an
    /// empty (blank) image, so that a new tape can be written.
    pub fn load(&self) -> Result<Vec<u8>, std::io::Error> {
        match fs::read(&self.path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                event!(
                    Level::INFO,
                    "{} does not exist; unit {} starts blank",
                    self.path.display(),
                    self.unit
                );
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    pub fn save(&self, data: &[u8]) -> Result<(), std::io::Error> {
        fs::write(&self.path, data)?;
        event!(
            Level::INFO,
            "saved unit {} to {} ({} bytes)",
            self.unit,
            self.path.display(),
            data.len()
        );
        Ok(())
    }
}

#[test]
fn test_parse_unit_file() {
    assert_eq!(
        "1=/tmp/tape.img".parse::<UnitFile>(),
        Ok(UnitFile {
            unit: 1,
            path: PathBuf::from("/tmp/tape.img")
        })
    );
    assert_eq!(
        "tape.img".parse::<UnitFile>(),
        Err(BadUnitFile::MissingEquals("tape.img".to_string()))
    );
    assert_eq!(
        "x=tape.img".parse::<UnitFile>(),
        Err(BadUnitFile::BadUnit("x".to_string()))
    );
    assert_eq!(
        "0=".parse::<UnitFile>(),
        Err(BadUnitFile::MissingEquals("0=".to_string()))
    );
}
