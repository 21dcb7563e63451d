//! Typed containers for the two aligned input matrices.
//!
//! Both containers are NaN-free by construction; ingestion is responsible for
//! dropping or filling missing values before data reaches the pipeline.

use ndarray::{Array2, ArrayView2, Axis};

use crate::error::{PipelineError, PipelineResult};

/// Spectral intensities, one row per sample, one column per wavelength.
#[derive(Debug, Clone)]
pub struct SpectralMatrix {
    data: Array2<f64>,
    wavelength_labels: Vec<String>,
}

impl SpectralMatrix {
    /// Wraps `data` with its wavelength axis labels.
    ///
    /// An empty label list is replaced by the column positions (`"0"`, `"1"`, ...).
    ///
    /// # Errors
    /// Returns an error if the label count differs from the column count or if
    /// any reading is not finite.
    pub fn new(data: Array2<f64>, wavelength_labels: Vec<String>) -> PipelineResult<Self> {
        let wavelength_labels = labels_or_positions(wavelength_labels, data.ncols());
        if wavelength_labels.len() != data.ncols() {
            return Err(PipelineError::shape(
                "wavelength labels",
                data.ncols(),
                wavelength_labels.len(),
            ));
        }
        ensure_finite(data.view(), "spectral matrix")?;
        Ok(Self {
            data,
            wavelength_labels,
        })
    }

    pub fn data(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    pub fn wavelength_labels(&self) -> &[String] {
        &self.wavelength_labels
    }

    pub fn n_samples(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_wavelengths(&self) -> usize {
        self.data.ncols()
    }

    /// Rows at `indices`, in the given order.
    pub fn select_rows(&self, indices: &[usize]) -> Array2<f64> {
        self.data.select(Axis(0), indices)
    }
}

/// Target property values, row-aligned with a [`SpectralMatrix`].
#[derive(Debug, Clone)]
pub struct PropertyMatrix {
    data: Array2<f64>,
    property_labels: Vec<String>,
}

impl PropertyMatrix {
    /// Wraps `data` with its property labels. Empty labels become `"0"`, `"1"`, ...
    pub fn new(data: Array2<f64>, property_labels: Vec<String>) -> PipelineResult<Self> {
        let property_labels = labels_or_positions(property_labels, data.ncols());
        if property_labels.len() != data.ncols() {
            return Err(PipelineError::shape(
                "property labels",
                data.ncols(),
                property_labels.len(),
            ));
        }
        ensure_finite(data.view(), "property matrix")?;
        Ok(Self {
            data,
            property_labels,
        })
    }

    pub fn data(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    pub fn property_labels(&self) -> &[String] {
        &self.property_labels
    }

    pub fn n_samples(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_properties(&self) -> usize {
        self.data.ncols()
    }
}

/// Checks that the two matrices describe the same samples.
pub fn check_alignment(spectra: &SpectralMatrix, properties: &PropertyMatrix) -> PipelineResult<()> {
    if spectra.n_samples() != properties.n_samples() {
        return Err(PipelineError::RowCountMismatch {
            spectra: spectra.n_samples(),
            properties: properties.n_samples(),
        });
    }
    Ok(())
}

fn labels_or_positions(labels: Vec<String>, width: usize) -> Vec<String> {
    if labels.is_empty() {
        (0..width).map(|i| i.to_string()).collect()
    } else {
        labels
    }
}

fn ensure_finite(data: ArrayView2<f64>, what: &str) -> PipelineResult<()> {
    if let Some(((row, col), _)) = data.indexed_iter().find(|(_, v)| !v.is_finite()) {
        return Err(PipelineError::NonFinite(format!(
            "{what} at row {row}, column {col}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn generates_positional_labels_when_missing() {
        let m = SpectralMatrix::new(array![[1.0, 2.0, 3.0]], vec![]).unwrap();
        assert_eq!(m.wavelength_labels(), &["0", "1", "2"]);
    }

    #[test]
    fn rejects_label_count_mismatch() {
        let err = PropertyMatrix::new(array![[1.0, 2.0]], vec!["a".into()]).unwrap_err();
        assert!(err.is_shape_mismatch());
    }

    #[test]
    fn rejects_nan_readings() {
        let err = SpectralMatrix::new(array![[1.0, f64::NAN]], vec![]).unwrap_err();
        assert!(matches!(err, PipelineError::NonFinite(_)));
    }

    #[test]
    fn alignment_requires_equal_row_counts() {
        let s = SpectralMatrix::new(array![[1.0, 2.0], [3.0, 4.0]], vec![]).unwrap();
        let p = PropertyMatrix::new(array![[1.0]], vec![]).unwrap();
        assert!(matches!(
            check_alignment(&s, &p),
            Err(PipelineError::RowCountMismatch { spectra: 2, properties: 1 })
        ));
    }
}
