use serde::Serialize;
use std::io::Write;

use crate::error::ImportExportError;

/// Export any serializable data structure as pretty JSON
pub fn write_json<T, W>(data: &T, mut writer: W) -> Result<(), ImportExportError>
where
    T: Serialize + ?Sized,
    W: Write,
{
    serde_json::to_writer_pretty(&mut writer, data)?;
    writeln!(writer).map_err(serde_json::Error::io)?;
    writer.flush().map_err(serde_json::Error::io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scaling::ScalingProfile;

    #[test]
    fn test_profile_json() {
        let profile = ScalingProfile::default();

        let mut buffer = Vec::new();
        write_json(&profile, &mut buffer).unwrap();

        let parsed: ScalingProfile = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(parsed.global_factor, profile.global_factor);
        assert!(buffer.ends_with(b"}\n"));
    }
}
