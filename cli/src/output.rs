//! Output helpers: bundle files, relocation maps and tables.

use std::io::Write;
use std::path::Path;

use cnab_oci_core::{Bundle, RelocationMap};
use comfy_table::{ContentArrangement, Table};

/// Create a styled table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// Relocation map as an ORIGINAL / RELOCATED table.
pub fn relocation_table(map: &RelocationMap) -> Table {
    let mut table = new_table(&["ORIGINAL", "RELOCATED"]);
    for (original, relocated) in map.iter() {
        table.add_row([original, relocated]);
    }
    table
}

/// Write the bundle's canonical JSON to `output`, or to standard output
/// when `output` is "-".
pub fn write_bundle(output: &str, bundle: &Bundle) -> Result<(), Box<dyn std::error::Error>> {
    let json = bundle.to_canonical_json()?;
    if output == "-" {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(&json)?;
        stdout.write_all(b"\n")?;
        return Ok(());
    }
    std::fs::write(output, &json).map_err(|e| format!("Failed to write {output}: {e}"))?;
    Ok(())
}

/// Write `value` to `path` as pretty-printed JSON.
pub fn write_json<T: serde::Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).map_err(|e| format!("Failed to write {}: {e}", path.display()))?;
    Ok(())
}
