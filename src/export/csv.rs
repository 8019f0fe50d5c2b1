use serde::Serialize;
use std::io::Write;

use crate::error::ImportExportError;

/// Write flat serializable rows as CSV with a header taken from the field names
pub fn write_records<T, W>(rows: &[&T], writer: W) -> Result<(), ImportExportError>
where
    T: Serialize,
    W: Write,
{
    let mut csv_writer = ::csv::Writer::from_writer(writer);

    for row in rows {
        csv_writer.serialize(row)?;
    }

    csv_writer.flush().map_err(::csv::Error::from)?;
    Ok(())
}
