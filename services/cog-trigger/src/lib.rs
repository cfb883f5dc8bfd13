//! INSAT-3D COG Trigger
//!
//! Storage-triggered function for INSAT-3D Level-1B HDF5 products. When a new
//! file lands in the raw bucket, the function records its acquisition metadata
//! in DynamoDB and converts every embedded image band into a Cloud-Optimized
//! GeoTIFF in the destination bucket.
//!
//! ## Features
//!
//! - **Metadata Indexing**: `gdalinfo -json` output flattened into one DynamoDB
//!   record per file, with a synthesized acquisition timestamp
//! - **Band Discovery**: image subdatasets enumerated from the `gdalinfo` listing
//! - **Bounded Conversion**: `gdal_translate` to tiled, DEFLATE-compressed COGs
//!   with a fixed number of conversions in flight
//! - **Failure Isolation**: one band failing never affects the others
//!
//! ## Architecture
//!
//! ```text
//! S3 Event            GDAL (child processes)          Destinations
//! ┌──────────────┐    ┌──────────────────┐           ┌──────────────┐
//! │ ObjectCreated│───▶│ gdalinfo -json   │──────────▶│ DynamoDB     │
//! │ raw/*.h5     │    └──────────────────┘           │ Files table  │
//! └──────────────┘    ┌──────────────────┐           └──────────────┘
//!        │            │ gdalinfo         │
//!        └───────────▶│ (subdatasets)    │
//!                     └──────────────────┘
//!                              │
//!                              ▼
//!                     ┌──────────────────┐           ┌──────────────┐
//!                     │ gdal_translate   │──────────▶│ S3           │
//!                     │ x max_workers    │           │ {stem}/      │
//!                     └──────────────────┘           │  {band}_cog  │
//!                                                    └──────────────┘
//! ```

pub mod aws;
pub mod config;
pub mod converter;
pub mod discovery;
pub mod error;
pub mod event;
pub mod gdal;
pub mod handler;
pub mod metadata;
pub mod orchestrator;
pub mod processor;
pub mod storage;
pub mod tool;

pub use config::Config;
pub use converter::{BandConverter, BandProcessor, ConversionSettings};
pub use discovery::{discover_subdatasets, parse_subdatasets, SubdatasetDescriptor, Subdatasets};
pub use error::{Result, TriggerError};
pub use event::{S3Event, SourceFile};
pub use gdal::GdalBinaries;
pub use handler::{handle_event, InvocationResponse};
pub use metadata::{DynamoDbTable, MetadataRecord, MetadataTable, MetadataUploader, MetadataValue};
pub use orchestrator::{BandOrchestrator, ConversionResults};
pub use processor::{Insat3dProcessor, ProcessingOutcome};
pub use storage::{ObjectUploader, S3Uploader};
pub use tool::{ProcessRunner, ToolCommand, ToolError, ToolRunner};
