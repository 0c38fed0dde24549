//! Device alias loading: MAC address -> human friendly name

use log::{info, warn};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::AliasError;

/// Read aliases from a line oriented file where each line is `MAC|alias`.
///
/// MAC addresses are lowercased so lookups match the driver's address
/// formatting. Lines that do not split into exactly two fields are skipped
/// with a warning.
pub fn read_aliases(path: &Path) -> Result<HashMap<String, String>, AliasError> {
    let file = File::open(path).map_err(|source| AliasError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let aliases = parse_aliases(BufReader::new(file)).map_err(|source| AliasError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    info!("Loaded {} device aliases from {}", aliases.len(), path.display());
    Ok(aliases)
}

/// Parse alias lines from any buffered reader
pub fn parse_aliases<R: BufRead>(reader: R) -> std::io::Result<HashMap<String, String>> {
    let mut aliases = HashMap::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim_end_matches(['\r', '\t', '\n']);

        let fields: Vec<&str> = trimmed.split('|').collect();
        if fields.len() != 2 {
            warn!("Skipping malformed alias line {}: {:?}", index + 1, line);
            continue;
        }

        aliases.insert(fields[0].trim().to_lowercase(), fields[1].trim().to_string());
    }

    Ok(aliases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_skips_malformed_lines() {
        let input = "d8:82:aa:bb:cc:dd|Kitchen\nno-pipe-char\nfc:8a:aa:bb:cc:dd|Balcony\n";
        let aliases = parse_aliases(Cursor::new(input)).unwrap();

        assert_eq!(aliases.len(), 2);
        assert_eq!(aliases["d8:82:aa:bb:cc:dd"], "Kitchen");
        assert_eq!(aliases["fc:8a:aa:bb:cc:dd"], "Balcony");
    }

    #[test]
    fn test_parse_rejects_extra_separators() {
        let input = "aa:bb|One|Two\r\ncc:dd|Three\r\n";
        let aliases = parse_aliases(Cursor::new(input)).unwrap();

        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases["cc:dd"], "Three");
    }

    #[test]
    fn test_macs_are_lowercased() {
        let aliases = parse_aliases(Cursor::new("CB:15:AA:BB:CC:DD|Bedroom")).unwrap();
        assert_eq!(aliases["cb:15:aa:bb:cc:dd"], "Bedroom");
    }

    #[test]
    fn test_read_aliases_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "d8:82:aa:bb:cc:dd|Kitchen").unwrap();
        writeln!(file, "cb:15:aa:bb:cc:dd|Bedroom").unwrap();

        let aliases = read_aliases(file.path()).unwrap();
        assert_eq!(aliases.len(), 2);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = read_aliases(Path::new("/nonexistent/ruuvi_aliases.conf"));
        assert!(matches!(result, Err(AliasError::Open { .. })));
    }
}
