//! Raw data source port.

use crate::domain::error::PriceVaultError;
use crate::domain::records::RawPriceData;

/// Anything that produces raw observations for a symbol: files, vendor
/// feeds, test fixtures.
pub trait RawDataSource {
    /// Short tag stored with every row this source produces.
    fn source_name(&self) -> &str;

    fn fetch(&self, symbol: &str) -> Result<Vec<RawPriceData>, PriceVaultError>;
}
