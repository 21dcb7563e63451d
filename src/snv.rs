//! Standard Normal Variate row normalisation.
//!
//! SNV has no fitted state: every spectrum is centred and scaled with its own
//! mean and population standard deviation. The column-wise statistics kept in
//! [`SpectrumStats`] exist for auditing only and play no part in replay.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut1, Axis};
use rayon::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};

/// Rows whose standard deviation does not exceed this are only mean-centred.
pub const SNV_STD_EPSILON: f64 = 1e-8;

/// Normalises one spectrum in place.
///
/// Every SNV path in the crate (batch, single row, replay) funnels through this
/// function so that training and inference perform identical arithmetic.
pub fn normalize_row_in_place(mut row: ArrayViewMut1<f64>) {
    let n = row.len();
    if n == 0 {
        return;
    }
    let mean = row.sum() / n as f64;
    row.mapv_inplace(|x| x - mean);
    let variance = row.iter().map(|x| x * x).sum::<f64>() / n as f64;
    let std_dev = variance.sqrt();
    if std_dev > SNV_STD_EPSILON {
        row.mapv_inplace(|x| x / std_dev);
    }
}

/// SNV of a single spectrum.
pub fn snv_row(row: ArrayView1<f64>) -> Array1<f64> {
    let mut out = row.to_owned();
    normalize_row_in_place(out.view_mut());
    out
}

/// SNV of every row of `spectra`. Rows are independent, so they are processed in parallel.
pub fn apply_snv(spectra: ArrayView2<f64>) -> Array2<f64> {
    let mut normalized = spectra.to_owned();
    normalized
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .for_each(normalize_row_in_place);
    info!(
        "SNV applied to {} spectra of width {}.",
        normalized.nrows(),
        normalized.ncols()
    );
    normalized
}

/// Column-wise mean and population standard deviation of SNV-normalised spectra.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumStats {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl SpectrumStats {
    pub fn from_normalized(normalized: ArrayView2<f64>) -> Self {
        if normalized.nrows() == 0 {
            return Self {
                mean: vec![0.0; normalized.ncols()],
                std: vec![0.0; normalized.ncols()],
            };
        }
        let mean = normalized.map_axis(Axis(0), |column| column.mean().unwrap_or(0.0));
        let std = normalized.map_axis(Axis(0), |column| column.std(0.0));
        Self {
            mean: mean.to_vec(),
            std: std.to_vec(),
        }
    }

    pub fn width(&self) -> usize {
        self.mean.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn rescaled_rows_normalize_identically() {
        let spectra = array![
            [1.0, 2.0, 3.0, 4.0, 5.0],
            [2.0, 4.0, 6.0, 8.0, 10.0],
            [5.0, 4.0, 3.0, 2.0, 1.0]
        ];
        let normalized = apply_snv(spectra.view());
        let expected = [-1.414_213_56, -0.707_106_78, 0.0, 0.707_106_78, 1.414_213_56];
        for j in 0..5 {
            assert_abs_diff_eq!(normalized[[0, j]], expected[j], epsilon = 1e-6);
            assert_abs_diff_eq!(normalized[[1, j]], expected[j], epsilon = 1e-6);
            assert_abs_diff_eq!(normalized[[2, j]], -expected[j], epsilon = 1e-6);
        }
    }

    #[test]
    fn normalized_rows_have_zero_mean_unit_std() {
        let spectra = array![[0.3, 1.7, 2.2, 9.1], [10.0, 10.5, 9.5, 11.0]];
        let normalized = apply_snv(spectra.view());
        for row in normalized.rows() {
            assert_abs_diff_eq!(row.mean().unwrap(), 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(row.std(0.0), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn constant_row_is_only_centred() {
        let normalized = snv_row(array![4.0, 4.0, 4.0].view());
        assert_eq!(normalized, array![0.0, 0.0, 0.0]);

        let nearly_constant = array![1.0, 1.0 + 1e-10, 1.0];
        let out = snv_row(nearly_constant.view());
        assert!(out.iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn single_row_and_batch_paths_agree_bitwise() {
        let spectra = array![[0.11, 0.52, 0.93, 0.27], [3.0, 1.0, 4.0, 1.5]];
        let batch = apply_snv(spectra.view());
        for (i, row) in spectra.rows().into_iter().enumerate() {
            assert_eq!(snv_row(row), batch.row(i));
        }
    }

    #[test]
    fn audit_stats_are_columnwise() {
        let normalized = array![[1.0, -1.0], [-1.0, 1.0], [0.0, 0.0]];
        let stats = SpectrumStats::from_normalized(normalized.view());
        assert_eq!(stats.width(), 2);
        assert_abs_diff_eq!(stats.mean[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(stats.std[1], (2.0f64 / 3.0).sqrt(), epsilon = 1e-12);
    }
}
