//! Parquet I/O for edge lists and score vectors
//!
//! Based on `DuckDB` (Raasveldt et al., SIGMOD 2019) columnar storage patterns.
//!
//! # Format
//!
//! - edge files: (`source`: Int32, `destination`: Int32)
//! - score files: (`vertex`: UInt32, `score`: Float32), one row per vertex

use super::EdgeList;
use anyhow::{ensure, Context, Result};
use arrow::array::{Array, Float32Array, Int32Array, UInt32Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

fn write_batch(path: &Path, schema: SchemaRef, batch: &RecordBatch) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;

    let props = WriterProperties::builder()
        .set_compression(parquet::basic::Compression::ZSTD(
            parquet::basic::ZstdLevel::try_new(3)?,
        ))
        .build();

    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

fn read_batches(path: &Path) -> Result<Vec<RecordBatch>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    reader
        .map(|batch| batch.context("Failed to decode record batch"))
        .collect()
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    let column = batch
        .column_by_name(name)
        .with_context(|| format!("Missing {name} column"))?;
    ensure!(column.null_count() == 0, "Column {name} contains nulls");
    column
        .as_any()
        .downcast_ref::<T>()
        .with_context(|| format!("Invalid {name} column type: {}", column.data_type()))
}

/// Read an edge list and deal it to `num_devices` devices
///
/// # Errors
///
/// Returns error if the file doesn't exist, a column is missing, has nulls,
/// or is not `Int32`
#[allow(clippy::unused_async)] // Async API for future I/O operations
pub async fn read_edge_parquet<P: AsRef<Path>>(path: P, num_devices: usize) -> Result<EdgeList> {
    let mut pairs = Vec::new();
    for batch in read_batches(path.as_ref())? {
        let sources: &Int32Array = column(&batch, "source")?;
        let destinations: &Int32Array = column(&batch, "destination")?;
        pairs.extend(sources.values().iter().copied().zip(destinations.values().iter().copied()));
    }
    Ok(EdgeList::from_pairs(&pairs, num_devices))
}

/// Write all devices' edges as one edge file
///
/// # Errors
///
/// Returns error if file I/O fails or Arrow conversion fails
#[allow(clippy::unused_async)] // Async API for future I/O operations
pub async fn write_edge_parquet<P: AsRef<Path>>(path: P, edges: &EdgeList) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("source", DataType::Int32, false),
        Field::new("destination", DataType::Int32, false),
    ]));

    let sources = Int32Array::from(edges.sources.concat());
    let destinations = Int32Array::from(edges.destinations.concat());
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![Arc::new(sources), Arc::new(destinations)],
    )
    .context("Failed to create edges RecordBatch")?;

    write_batch(path.as_ref(), schema, &batch)
}

/// Write one score per vertex
///
/// # Errors
///
/// Returns error if file I/O fails or Arrow conversion fails
#[allow(clippy::unused_async)] // Async API for future I/O operations
#[allow(clippy::cast_possible_truncation)] // Vertex ids are 32-bit
pub async fn write_scores_parquet<P: AsRef<Path>>(path: P, scores: &[f32]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("vertex", DataType::UInt32, false),
        Field::new("score", DataType::Float32, false),
    ]));

    let vertices = UInt32Array::from_iter_values((0..scores.len()).map(|v| v as u32));
    let scores = Float32Array::from(scores.to_vec());
    let batch = RecordBatch::try_new(schema.clone(), vec![Arc::new(vertices), Arc::new(scores)])
        .context("Failed to create scores RecordBatch")?;

    write_batch(path.as_ref(), schema, &batch)
}

/// Read a score file back into a dense vector indexed by vertex
///
/// # Errors
///
/// Returns error if the file doesn't exist, a column is invalid, or the
/// vertex ids are not exactly `0..n`
#[allow(clippy::unused_async)] // Async API for future I/O operations
pub async fn read_scores_parquet<P: AsRef<Path>>(path: P) -> Result<Vec<f32>> {
    let mut rows = Vec::new();
    for batch in read_batches(path.as_ref())? {
        let vertices: &UInt32Array = column(&batch, "vertex")?;
        let scores: &Float32Array = column(&batch, "score")?;
        rows.extend(vertices.values().iter().copied().zip(scores.values().iter().copied()));
    }

    let mut dense = vec![f32::NAN; rows.len()];
    for (vertex, score) in rows {
        let slot = dense
            .get_mut(vertex as usize)
            .with_context(|| format!("Vertex {vertex} out of range"))?;
        *slot = score;
    }
    ensure!(
        dense.iter().all(|s| !s.is_nan()),
        "Score file does not cover every vertex"
    );
    Ok(dense)
}
