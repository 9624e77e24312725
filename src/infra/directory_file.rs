use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{
    domain::audience::CustomerProfile,
    usecases::contracts::{CustomerDirectory, DirectorySourceError},
};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CustomersFile {
    #[serde(default)]
    customers: Vec<CustomerProfile>,
}

/// Customer directory backed by a TOML file of `[[customers]]` tables.
/// The file is re-read on every query.
#[derive(Debug, Clone)]
pub struct FileCustomerDirectory {
    path: PathBuf,
}

impl FileCustomerDirectory {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl CustomerDirectory for FileCustomerDirectory {
    fn customers(&self) -> Result<Vec<CustomerProfile>, DirectorySourceError> {
        let raw = fs::read_to_string(&self.path).map_err(|error| {
            DirectorySourceError::Unavailable(format!("{}: {error}", self.path.display()))
        })?;
        let file: CustomersFile = toml::from_str(&raw).map_err(|error| {
            DirectorySourceError::InvalidData(format!("{}: {error}", self.path.display()))
        })?;

        tracing::debug!(
            path = %self.path.display(),
            customers = file.customers.len(),
            "customer directory loaded"
        );
        Ok(file.customers)
    }
}
