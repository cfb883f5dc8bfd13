use async_trait::async_trait;
use insat_cog_trigger::{
    handle_event, Config, GdalBinaries, Insat3dProcessor, MetadataRecord, MetadataTable,
    MetadataValue, ObjectUploader, ToolCommand, ToolError, ToolRunner, TriggerError,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted stand-in for the GDAL binaries
struct ScriptedGdal {
    bands: Vec<String>,
    failing_bands: HashSet<String>,
    metadata_ok: bool,
}

impl ScriptedGdal {
    fn new(bands: &[&str]) -> Self {
        Self {
            bands: bands.iter().map(|b| b.to_string()).collect(),
            failing_bands: HashSet::new(),
            metadata_ok: true,
        }
    }

    fn listing(&self, source: &str) -> String {
        let mut out = String::from("Driver: HDF5/Hierarchical Data Format Release 5\nSubdatasets:\n");
        for (i, band) in self.bands.iter().enumerate() {
            out.push_str(&format!(
                "  SUBDATASET_{n}_NAME=HDF5:\"{source}\"://IMG_{band}\n  SUBDATASET_{n}_DESC=[1x2816x2805] //IMG_{band} (16-bit unsigned integer)\n",
                n = i + 1,
            ));
        }
        out
    }
}

#[async_trait]
impl ToolRunner for ScriptedGdal {
    async fn run(&self, command: &ToolCommand, _timeout: Duration) -> Result<String, ToolError> {
        let program = command.program.file_name().unwrap().to_string_lossy().into_owned();

        match program.as_str() {
            "gdalinfo" if command.args[0] == "-json" => {
                if !self.metadata_ok {
                    return Err(ToolError::Timeout);
                }
                Ok(json!({
                    "metadata": {
                        "": {
                            "Unique_Id": "3RIMG_04JAN2024_0015",
                            "Acquisition_Date": "04JAN2024",
                            "Acquisition_Time_in_GMT": "0015",
                            "Nominal_Altitude(km)": 36000.0
                        }
                    }
                })
                .to_string())
            }
            "gdalinfo" => Ok(self.listing(&command.args[0])),
            "gdal_translate" => {
                let subdataset = &command.args[command.args.len() - 2];
                let output = &command.args[command.args.len() - 1];
                let band = subdataset.rsplit("IMG_").next().unwrap();

                std::fs::write(output, b"II*\0").unwrap();
                if self.failing_bands.contains(band) {
                    return Err(ToolError::Failed {
                        status: Some(1),
                        stderr: format!("ERROR 1: cannot read {band}"),
                    });
                }
                Ok(String::new())
            }
            other => panic!("unexpected program {other}"),
        }
    }
}

#[derive(Default)]
struct RecordingUploader {
    keys: Mutex<Vec<String>>,
}

#[async_trait]
impl ObjectUploader for RecordingUploader {
    async fn upload_file(
        &self,
        local_path: &Path,
        bucket: &str,
        key: &str,
        acl: &str,
    ) -> insat_cog_trigger::Result<()> {
        assert!(local_path.exists(), "artifact must exist while uploading");
        assert_eq!(bucket, "final-cog");
        assert_eq!(acl, "bucket-owner-full-control");
        self.keys.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingTable {
    records: Mutex<Vec<(String, MetadataRecord)>>,
    fail: bool,
}

#[async_trait]
impl MetadataTable for RecordingTable {
    async fn put_record(&self, table: &str, record: &MetadataRecord) -> insat_cog_trigger::Result<()> {
        if self.fail {
            return Err(TriggerError::Store("ProvisionedThroughputExceededException".to_string()));
        }
        self.records
            .lock()
            .unwrap()
            .push((table.to_string(), record.clone()));
        Ok(())
    }
}

struct Harness {
    processor: Insat3dProcessor,
    uploader: Arc<RecordingUploader>,
    table: Arc<RecordingTable>,
    scratch: tempfile::TempDir,
}

fn harness(gdal: ScriptedGdal, table: RecordingTable, max_workers: usize) -> Harness {
    let scratch = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.processing.temp_dir = scratch.path().display().to_string();
    config.processing.max_workers = max_workers;

    let uploader = Arc::new(RecordingUploader::default());
    let table = Arc::new(table);
    let processor = Insat3dProcessor::new(config, Arc::new(gdal), uploader.clone(), table.clone())
        .with_binaries(GdalBinaries {
            gdalinfo: PathBuf::from("/opt/gdal/bin/gdalinfo"),
            gdal_translate: PathBuf::from("/opt/gdal/bin/gdal_translate"),
        });

    Harness {
        processor,
        uploader,
        table,
        scratch,
    }
}

fn s3_event(bucket: &str, key: &str) -> Value {
    json!({
        "Records": [{
            "eventSource": "aws:s3",
            "eventName": "ObjectCreated:Put",
            "s3": {
                "bucket": { "name": bucket },
                "object": { "key": key, "size": 524288000 }
            }
        }]
    })
}

fn body(response: &insat_cog_trigger::InvocationResponse) -> Value {
    serde_json::from_str(&response.body).unwrap()
}

fn scratch_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

#[tokio::test]
async fn test_full_pipeline() {
    let h = harness(
        ScriptedGdal::new(&["MIR", "SWIR", "TIR1", "TIR2", "VIS", "WV"]),
        RecordingTable::default(),
        5,
    );

    let response = handle_event(
        &h.processor,
        &s3_event("raw-insat", "L1B/3RIMG_04JAN2024_0015_L1B_STD_V01R00.h5"),
    )
    .await;

    assert_eq!(response.status_code, 200);
    let body = body(&response);
    assert_eq!(body["metadata_processed"], json!(true));
    assert_eq!(
        body["processed_bands"],
        json!(["MIR", "SWIR", "TIR1", "TIR2", "VIS", "WV"])
    );

    let mut keys = h.uploader.keys.lock().unwrap().clone();
    keys.sort();
    assert_eq!(keys.len(), 6);
    assert_eq!(keys[0], "3RIMG_04JAN2024_0015_L1B_STD_V01R00/MIR_cog.tiff");

    let records = h.table.records.lock().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].0, "Files");
    assert_eq!(
        records[0].1.get("acquisition_timestamp"),
        Some(&MetadataValue::Text("04JAN2024T0015Z".to_string()))
    );
    assert_eq!(
        records[0].1.get("Nominal_Altitude(km)"),
        Some(&MetadataValue::Number(36000.0))
    );

    assert!(scratch_is_empty(h.scratch.path()));
}

#[tokio::test]
async fn test_partial_band_failures() {
    let bands: Vec<String> = (1..=12).map(|i| format!("B{i:02}")).collect();
    let band_refs: Vec<&str> = bands.iter().map(String::as_str).collect();
    let mut gdal = ScriptedGdal::new(&band_refs);
    gdal.failing_bands = ["B02", "B07", "B11"].iter().map(|b| b.to_string()).collect();

    let h = harness(gdal, RecordingTable::default(), 5);
    let response = handle_event(&h.processor, &s3_event("raw", "f.h5")).await;

    assert_eq!(response.status_code, 200);
    let processed = body(&response)["processed_bands"].as_array().unwrap().clone();
    assert_eq!(processed.len(), 9);
    assert!(!processed.contains(&json!("B07")));
    assert_eq!(h.uploader.keys.lock().unwrap().len(), 9);
    assert!(scratch_is_empty(h.scratch.path()));
}

#[tokio::test]
async fn test_no_subdatasets_is_failure() {
    let h = harness(ScriptedGdal::new(&[]), RecordingTable::default(), 5);

    let response = handle_event(&h.processor, &s3_event("raw", "empty.h5")).await;

    assert_eq!(response.status_code, 500);
    assert_eq!(body(&response)["error"], json!("No output files generated"));
    assert!(h.uploader.keys.lock().unwrap().is_empty());
    // Metadata is still written before discovery
    assert_eq!(h.table.records.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_all_bands_failing_is_failure() {
    let mut gdal = ScriptedGdal::new(&["VIS", "SWIR"]);
    gdal.failing_bands = ["VIS", "SWIR"].iter().map(|b| b.to_string()).collect();

    let h = harness(gdal, RecordingTable::default(), 2);
    let response = handle_event(&h.processor, &s3_event("raw", "f.h5")).await;

    assert_eq!(response.status_code, 500);
    assert!(scratch_is_empty(h.scratch.path()));
}

#[tokio::test]
async fn test_metadata_failure_does_not_block_bands() {
    let mut gdal = ScriptedGdal::new(&["VIS"]);
    gdal.metadata_ok = false;

    let h = harness(gdal, RecordingTable::default(), 5);
    let response = handle_event(&h.processor, &s3_event("raw", "f.h5")).await;

    assert_eq!(response.status_code, 200);
    let body = body(&response);
    assert_eq!(body["metadata_processed"], json!(false));
    assert_eq!(body["processed_bands"], json!(["VIS"]));
    assert!(h.table.records.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_store_fault_does_not_block_bands() {
    let table = RecordingTable {
        fail: true,
        ..Default::default()
    };
    let h = harness(ScriptedGdal::new(&["VIS", "WV"]), table, 5);

    let response = handle_event(&h.processor, &s3_event("raw", "f.h5")).await;

    assert_eq!(response.status_code, 200);
    assert_eq!(body(&response)["metadata_processed"], json!(false));
}

#[tokio::test]
async fn test_invalid_event_is_failure() {
    let h = harness(ScriptedGdal::new(&["VIS"]), RecordingTable::default(), 5);

    let response = handle_event(&h.processor, &json!({ "detail": "not a storage event" })).await;

    assert_eq!(response.status_code, 500);
    assert!(body(&response)["error"]
        .as_str()
        .unwrap()
        .contains("Invalid trigger event"));
    assert!(h.uploader.keys.lock().unwrap().is_empty());
}
