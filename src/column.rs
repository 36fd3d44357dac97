//! Arrow column surface
//!
//! Performs the dataframe-layer checks on raw columns, in this order, and
//! forwards to [`SnmgEngine::pagerank`]:
//!
//! 1. one source and one destination column per device (`InvalidArgument`)
//! 2. equal lengths per device (`ColumnSizeMismatch`)
//! 3. equal element types (`UnsupportedDataType`)
//! 4. no nulls (`NullValuesUnsupported`)
//! 5. `Int32` elements (`UnsupportedDataType`)

use crate::config::PageRankConfig;
use crate::engine::SnmgEngine;
use crate::error::{Result, SnmgError};
use crate::storage::EdgeColumns;
use arrow::array::{Array, ArrayRef, Float32Array, Int32Array};
use arrow::datatypes::DataType;

fn int32_values(array: &ArrayRef) -> Result<&[i32]> {
    match array.as_any().downcast_ref::<Int32Array>() {
        Some(ids) => Ok(&ids.values()[..]),
        None => Err(SnmgError::UnsupportedDataType(
            array.data_type().to_string(),
        )),
    }
}

/// Check per-device Arrow columns and run `PageRank`
///
/// The result has one `Float32` score per vertex, indexed by vertex id.
///
/// # Errors
///
/// - [`SnmgError::InvalidArgument`] for a bad configuration, a column count
///   other than `config.num_devices`, or a negative vertex id
/// - [`SnmgError::ColumnSizeMismatch`], [`SnmgError::UnsupportedDataType`],
///   [`SnmgError::NullValuesUnsupported`] for malformed columns
/// - any device failure of the run
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use arrow::array::{ArrayRef, Int32Array};
/// use snmg_pagerank::{pagerank_columns, PageRankConfig, SnmgEngine};
/// use snmg_pagerank::device::DeviceTopology;
///
/// let src: ArrayRef = Arc::new(Int32Array::from(vec![0, 1, 2, 3]));
/// let dst: ArrayRef = Arc::new(Int32Array::from(vec![1, 2, 3, 0]));
///
/// let engine = SnmgEngine::new(DeviceTopology::new(1, 1));
/// let scores = pagerank_columns(&engine, &[src], &[dst], &PageRankConfig::default()).unwrap();
/// assert_eq!(scores.len(), 4);
/// ```
pub fn pagerank_columns(
    engine: &SnmgEngine,
    sources: &[ArrayRef],
    destinations: &[ArrayRef],
    config: &PageRankConfig,
) -> Result<Float32Array> {
    config.validate(engine.available_devices())?;

    if sources.len() != config.num_devices || destinations.len() != config.num_devices {
        return Err(SnmgError::invalid_argument(format!(
            "expected {} column pairs, got {} sources and {} destinations",
            config.num_devices,
            sources.len(),
            destinations.len()
        )));
    }

    for (device, (src, dst)) in sources.iter().zip(destinations).enumerate() {
        if src.len() != dst.len() {
            return Err(SnmgError::ColumnSizeMismatch {
                device,
                sources: src.len(),
                destinations: dst.len(),
            });
        }
    }

    for (src, dst) in sources.iter().zip(destinations) {
        if src.data_type() != dst.data_type() {
            return Err(SnmgError::UnsupportedDataType(format!(
                "source is {}, destination is {}",
                src.data_type(),
                dst.data_type()
            )));
        }
    }

    for (device, (src, dst)) in sources.iter().zip(destinations).enumerate() {
        if src.null_count() > 0 || dst.null_count() > 0 {
            return Err(SnmgError::NullValuesUnsupported { device });
        }
    }

    if let Some(other) = sources
        .iter()
        .map(|a| a.data_type())
        .find(|t| **t != DataType::Int32)
    {
        return Err(SnmgError::UnsupportedDataType(format!(
            "vertex ids must be Int32, got {other}"
        )));
    }

    let sources = sources.iter().map(int32_values).collect::<Result<Vec<_>>>()?;
    let destinations = destinations
        .iter()
        .map(int32_values)
        .collect::<Result<Vec<_>>>()?;

    let output = engine.pagerank(&EdgeColumns::new(sources, destinations), config)?;
    Ok(Float32Array::from(output.scores))
}
