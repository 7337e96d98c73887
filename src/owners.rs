use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::Path;

use serde_derive::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::events::{CollaboratorError, OwnerDirectory};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OwnerRecord {
    pub plate: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub email: String,
}

/// Plates are compared upper-cased with whitespace removed.
pub fn normalize_plate(plate: &str) -> String {
    plate
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Owner lookup backed by a `plate,owner,email` CSV table.
#[derive(Debug, Clone, Default)]
pub struct CsvOwnerDirectory {
    records: HashMap<String, OwnerRecord>,
}

impl CsvOwnerDirectory {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let dir = Self::from_reader(file)?;

        debug!(
            path = %path.as_ref().display(),
            records = dir.len(),
            "owner directory loaded"
        );

        Ok(dir)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Self::from_reader(content.as_bytes())
    }

    /// Reads the table. The header row is required and may order the
    /// columns freely; rows without a plate are skipped.
    pub fn from_reader<R: io::Read>(rdr: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(rdr);
        let mut records = HashMap::new();

        let headers: csv::StringRecord =
            reader.headers()?.iter().map(str::to_lowercase).collect();

        if !headers.iter().any(|h| h == "plate") {
            warn!("owner table has no `plate` column");
            return Ok(Self { records });
        }

        reader.set_headers(headers);

        for row in reader.deserialize::<OwnerRecord>() {
            let mut rec = match row {
                Ok(rec) => rec,
                Err(err) => {
                    warn!(%err, "malformed owner row skipped");
                    continue;
                }
            };

            rec.plate = normalize_plate(&rec.plate);
            if rec.plate.is_empty() {
                continue;
            }

            records.insert(rec.plate.clone(), rec);
        }

        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl OwnerDirectory for CsvOwnerDirectory {
    fn lookup(&self, plate: &str) -> Result<Option<OwnerRecord>, CollaboratorError> {
        let key = normalize_plate(plate);

        if key.is_empty() {
            return Ok(None);
        }

        Ok(self.records.get(&key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "plate,owner,email\n\
                         ABC123,John Doe,john@example.com\n\
                         kl 07 ab 1234, Jane Roe ,jane@example.com\n\
                         ,Nobody,nobody@example.com\n";

    #[test]
    fn normalizes_plate() {
        assert_eq!(normalize_plate(" kl 07\tab 1234 "), "KL07AB1234");
    }

    #[test]
    fn finds_owner_regardless_of_spacing_and_case() {
        let dir = CsvOwnerDirectory::parse(TABLE).unwrap();

        assert_eq!(dir.len(), 2);

        let rec = dir.lookup("KL07 AB1234").unwrap().unwrap();
        assert_eq!(rec.owner, "Jane Roe");
        assert_eq!(rec.email, "jane@example.com");

        assert_eq!(dir.lookup("abc123").unwrap().unwrap().owner, "John Doe");
    }

    #[test]
    fn unknown_or_empty_plate_is_none() {
        let dir = CsvOwnerDirectory::parse(TABLE).unwrap();

        assert_eq!(dir.lookup("ZZZ000").unwrap(), None);
        assert_eq!(dir.lookup("   ").unwrap(), None);
    }

    #[test]
    fn header_columns_may_be_reordered() {
        let dir = CsvOwnerDirectory::parse("email,plate\nx@example.com,AB1\n").unwrap();
        let rec = dir.lookup("ab1").unwrap().unwrap();

        assert_eq!(rec.email, "x@example.com");
        assert_eq!(rec.owner, "");
    }

    #[test]
    fn quoted_fields_keep_their_commas() {
        let dir = CsvOwnerDirectory::parse(
            "Plate,Owner,Email\nAB1,\"Doe, John\",john@example.com\nCD2,\"Roe \"\"JR\"\"\",jr@example.com\n",
        )
        .unwrap();

        let rec = dir.lookup("ab1").unwrap().unwrap();
        assert_eq!(rec.owner, "Doe, John");
        assert_eq!(rec.email, "john@example.com");

        assert_eq!(dir.lookup("CD2").unwrap().unwrap().owner, "Roe \"JR\"");
    }

    #[test]
    fn table_without_plate_column_is_empty() {
        let dir = CsvOwnerDirectory::parse("owner,email\nAnn,ann@example.com\n").unwrap();

        assert!(dir.is_empty());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(CsvOwnerDirectory::load("/nonexistent/plate_owners.csv").is_err());
    }
}
