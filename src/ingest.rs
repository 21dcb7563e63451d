//! Readers for the laboratory CSV exports.
//!
//! Lab files carry a block of instrument metadata above the data, a label row,
//! and a couple of identifier columns before the numeric block. Offsets are
//! zero-based and configurable through [`LabCsvLayout`].

use std::collections::HashMap;
use std::path::Path;

use log::{info, warn};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Deserializer, Serialize};

use crate::dataset::{PropertyMatrix, SpectralMatrix};
use crate::error::{PipelineError, PipelineResult};

/// Position of the label row and of the numeric block in a lab CSV file.
///
/// Omitted keys fall back to [`LabCsvLayout::spectra_default`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabCsvLayout {
    pub label_row: usize,
    pub first_data_row: usize,
    pub skip_columns: usize,
}

impl LabCsvLayout {
    /// Spectrum exports: wavelengths on row 9, readings from row 10.
    pub fn spectra_default() -> Self {
        Self {
            label_row: 9,
            first_data_row: 10,
            skip_columns: 2,
        }
    }

    /// Property exports: property names on row 8, values from row 10.
    pub fn properties_default() -> Self {
        Self {
            label_row: 8,
            first_data_row: 10,
            skip_columns: 2,
        }
    }
}

impl Default for LabCsvLayout {
    fn default() -> Self {
        Self::spectra_default()
    }
}

/// Keys present in a possibly partial layout table.
#[derive(Deserialize)]
struct LayoutOverrides {
    label_row: Option<usize>,
    first_data_row: Option<usize>,
    skip_columns: Option<usize>,
}

impl LayoutOverrides {
    fn over(self, base: LabCsvLayout) -> LabCsvLayout {
        LabCsvLayout {
            label_row: self.label_row.unwrap_or(base.label_row),
            first_data_row: self.first_data_row.unwrap_or(base.first_data_row),
            skip_columns: self.skip_columns.unwrap_or(base.skip_columns),
        }
    }
}

/// Deserializes a layout whose omitted keys come from
/// [`LabCsvLayout::properties_default`] rather than the spectra defaults.
pub(crate) fn properties_layout_or_default<'de, D>(deserializer: D) -> Result<LabCsvLayout, D::Error>
where
    D: Deserializer<'de>,
{
    LayoutOverrides::deserialize(deserializer).map(|keys| keys.over(LabCsvLayout::properties_default()))
}

/// Trimmed cells of a CSV file, row by row.
struct RawTable {
    rows: Vec<Vec<String>>,
}

impl RawTable {
    fn read(path: &Path) -> PipelineResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)?;
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(|cell| cell.trim().to_string()).collect());
        }
        Ok(Self { rows })
    }

    fn labels(&self, layout: &LabCsvLayout) -> PipelineResult<Vec<Option<String>>> {
        let row = self.rows.get(layout.label_row).ok_or_else(|| {
            PipelineError::Ingest(format!(
                "label row {} is missing ({} rows in file)",
                layout.label_row,
                self.rows.len()
            ))
        })?;
        Ok(row
            .iter()
            .skip(layout.skip_columns)
            .map(|cell| (!cell.is_empty()).then(|| cell.clone()))
            .collect())
    }

    /// Numeric block with NaN for empty cells and short rows.
    fn numeric_block(&self, layout: &LabCsvLayout, width: usize) -> PipelineResult<Array2<f64>> {
        let data_rows = self.rows.get(layout.first_data_row..).unwrap_or(&[]);
        let mut block = Array2::from_elem((data_rows.len(), width), f64::NAN);
        for (i, row) in data_rows.iter().enumerate() {
            for (j, cell) in row.iter().skip(layout.skip_columns).take(width).enumerate() {
                block[[i, j]] = parse_cell(cell).ok_or_else(|| {
                    PipelineError::Ingest(format!(
                        "non-numeric value {:?} at row {}, column {}",
                        cell,
                        layout.first_data_row + i,
                        layout.skip_columns + j
                    ))
                })?;
            }
        }
        Ok(block)
    }

    fn block_width(&self, layout: &LabCsvLayout) -> usize {
        self.rows
            .iter()
            .skip(layout.first_data_row)
            .map(|r| r.len().saturating_sub(layout.skip_columns))
            .max()
            .unwrap_or(0)
    }
}

fn parse_cell(cell: &str) -> Option<f64> {
    if cell.is_empty() || cell.eq_ignore_ascii_case("nan") {
        return Some(f64::NAN);
    }
    cell.parse::<f64>().ok()
}

fn label_or_position(labels: &[Option<String>], column: usize) -> String {
    labels
        .get(column)
        .cloned()
        .flatten()
        .unwrap_or_else(|| column.to_string())
}

/// Loads an aligned training set from the spectrum and property exports.
///
/// Spectral columns with any missing reading are dropped (with their labels),
/// both tables are cut to the shorter row count, rows with missing spectral
/// readings are dropped together with their properties, and remaining
/// missing property values become 0.
pub fn load_lab_dataset<P: AsRef<Path>, Q: AsRef<Path>>(
    spectrum_file: P,
    property_file: Q,
    spectra_layout: &LabCsvLayout,
    properties_layout: &LabCsvLayout,
) -> PipelineResult<(SpectralMatrix, PropertyMatrix)> {
    let spec_table = RawTable::read(spectrum_file.as_ref())?;
    let spec_labels = spec_table.labels(spectra_layout)?;
    let spec_width = spec_table.block_width(spectra_layout);
    let spectra = spec_table.numeric_block(spectra_layout, spec_width)?;

    let keep_columns: Vec<usize> = spectra
        .axis_iter(Axis(1))
        .enumerate()
        .filter(|(_, column)| column.iter().all(|v| !v.is_nan()))
        .map(|(j, _)| j)
        .collect();
    if keep_columns.len() < spec_width {
        warn!(
            "Dropped {} spectral columns containing missing readings.",
            spec_width - keep_columns.len()
        );
    }
    let spectra = spectra.select(Axis(1), &keep_columns);
    let wavelength_labels: Vec<String> = keep_columns
        .iter()
        .map(|&j| label_or_position(&spec_labels, j))
        .collect();

    let prop_table = RawTable::read(property_file.as_ref())?;
    let property_labels: Vec<String> = prop_table
        .labels(properties_layout)?
        .into_iter()
        .map_while(|label| label)
        .collect();
    if property_labels.is_empty() {
        return Err(PipelineError::Ingest(format!(
            "no property labels on row {}",
            properties_layout.label_row
        )));
    }
    let properties = prop_table.numeric_block(properties_layout, property_labels.len())?;

    let n_rows = spectra.nrows().min(properties.nrows());
    if spectra.nrows() != properties.nrows() {
        warn!(
            "Spectrum file has {} data rows and property file {}; keeping the first {}.",
            spectra.nrows(),
            properties.nrows(),
            n_rows
        );
    }
    let valid_rows: Vec<usize> = (0..n_rows)
        .filter(|&i| spectra.row(i).iter().all(|v| !v.is_nan()))
        .collect();
    let spectra = spectra.select(Axis(0), &valid_rows);
    let mut properties = properties.select(Axis(0), &valid_rows);
    let filled = properties.iter().filter(|v| v.is_nan()).count();
    if filled > 0 {
        warn!("Replaced {} missing property values with 0.", filled);
    }
    properties.mapv_inplace(|v| if v.is_nan() { 0.0 } else { v });

    info!(
        "Loaded {} samples: {} wavelengths, {} properties.",
        spectra.nrows(),
        spectra.ncols(),
        properties.ncols()
    );
    Ok((
        SpectralMatrix::new(spectra, wavelength_labels)?,
        PropertyMatrix::new(properties, property_labels)?,
    ))
}

/// Loads spectra for prediction. Columns that are empty in every row are
/// ignored; any other missing reading is an error since prediction must not
/// change the wavelength axis.
pub fn load_spectra<P: AsRef<Path>>(path: P, layout: &LabCsvLayout) -> PipelineResult<SpectralMatrix> {
    let table = RawTable::read(path.as_ref())?;
    let labels = table.labels(layout)?;
    let width = table.block_width(layout);
    let spectra = table.numeric_block(layout, width)?;

    let keep_columns: Vec<usize> = spectra
        .axis_iter(Axis(1))
        .enumerate()
        .filter(|(_, column)| !column.iter().all(|v| v.is_nan()))
        .map(|(j, _)| j)
        .collect();
    let spectra = spectra.select(Axis(1), &keep_columns);
    if let Some(((row, col), _)) = spectra.indexed_iter().find(|(_, v)| v.is_nan()) {
        return Err(PipelineError::Ingest(format!(
            "missing reading at data row {}, column {}",
            layout.first_data_row + row,
            layout.skip_columns + keep_columns[col]
        )));
    }
    let wavelength_labels = keep_columns
        .iter()
        .map(|&j| label_or_position(&labels, j))
        .collect();
    SpectralMatrix::new(spectra, wavelength_labels)
}

/// Reorders the columns of `spectra` to follow `expected_labels`.
///
/// # Errors
/// Returns a shape mismatch if a wavelength is missing from `spectra`.
pub fn align_to_wavelengths(
    spectra: &SpectralMatrix,
    expected_labels: &[String],
) -> PipelineResult<Array2<f64>> {
    if spectra.wavelength_labels() == expected_labels {
        return Ok(spectra.data().to_owned());
    }
    let positions: HashMap<&str, usize> = spectra
        .wavelength_labels()
        .iter()
        .enumerate()
        .map(|(j, label)| (label.as_str(), j))
        .collect();
    if positions.len() != spectra.n_wavelengths() {
        return Err(PipelineError::Ingest(
            "input spectra repeat a wavelength label; columns cannot be matched".to_string(),
        ));
    }
    let mut columns = Vec::with_capacity(expected_labels.len());
    for label in expected_labels {
        match positions.get(label.as_str()) {
            Some(&j) => columns.push(j),
            None => {
                warn!("Wavelength {} required by the model is missing from the input.", label);
                return Err(PipelineError::shape(
                    "wavelength alignment",
                    expected_labels.len(),
                    spectra.n_wavelengths(),
                ));
            }
        }
    }
    Ok(spectra.data().select(Axis(1), &columns))
}
