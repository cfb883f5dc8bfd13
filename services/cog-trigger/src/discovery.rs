//! Subdataset discovery.
//!
//! Lists the image bands packed into an INSAT-3D HDF5 file by parsing the
//! plain `gdalinfo` listing. Lines look like:
//!
//! ```text
//!   SUBDATASET_3_NAME=HDF5:"/vsis3/raw/3RIMG_L1B.h5"://IMG_TIR1
//!   SUBDATASET_3_DESC=[1x2816x2805] //IMG_TIR1 (16-bit unsigned integer)
//! ```

use crate::gdal::GdalBinaries;
use crate::tool::ToolRunner;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const SUBDATASET_MARKER: &str = "SUBDATASET";
const NAME_MARKER: &str = "NAME";
const BAND_PREFIX: &str = "://IMG_";

/// Band identifier → GDAL access path
pub type Subdatasets = BTreeMap<String, String>;

/// One band found inside the source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubdatasetDescriptor {
    /// Band identifier, e.g. `VIS` for `//IMG_VIS`
    pub name: String,
    /// Tool-specific address of the band within the source file
    pub path: String,
}

/// Parse one `gdalinfo` line into a descriptor, if it declares an image band
pub fn parse_line(line: &str) -> Option<SubdatasetDescriptor> {
    if !(line.contains(SUBDATASET_MARKER) && line.contains(NAME_MARKER) && line.contains(BAND_PREFIX)) {
        return None;
    }

    let (_, value) = line.split_once('=')?;
    let value = value.trim();

    let (_, after_prefix) = value.split_once(BAND_PREFIX)?;
    let name = after_prefix.split('"').next().unwrap_or_default();
    if name.is_empty() {
        return None;
    }

    Some(SubdatasetDescriptor {
        name: name.to_string(),
        path: value.trim_matches('"').to_string(),
    })
}

/// Parse a full `gdalinfo` listing.
///
/// Band identifiers are expected to be unique; a repeated identifier replaces
/// the earlier entry.
pub fn parse_subdatasets(output: &str) -> Subdatasets {
    let mut subdatasets = Subdatasets::new();

    for descriptor in output.lines().filter_map(parse_line) {
        if let Some(previous) = subdatasets.insert(descriptor.name.clone(), descriptor.path) {
            warn!(
                band = %descriptor.name,
                replaced = %previous,
                "Duplicate band identifier, keeping the last declaration"
            );
        }
    }

    subdatasets
}

/// Run `gdalinfo` against `source` and collect its image bands.
///
/// Any tool failure yields an empty map, meaning "nothing to process".
#[instrument(skip_all, fields(source = %source))]
pub async fn discover_subdatasets(
    runner: &dyn ToolRunner,
    binaries: &GdalBinaries,
    source: &str,
    timeout: Duration,
) -> Subdatasets {
    let output = match runner.run(&binaries.info(source), timeout).await {
        Ok(output) => output,
        Err(e) => {
            warn!(error = %e, "Subdataset listing failed");
            return Subdatasets::new();
        }
    };

    let subdatasets = parse_subdatasets(&output);
    debug!(bands = ?subdatasets.keys().collect::<Vec<_>>(), "Parsed subdatasets");
    info!(count = subdatasets.len(), "Found {} subdatasets", subdatasets.len());

    subdatasets
}
