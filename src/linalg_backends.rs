// src/linalg_backends.rs

use ndarray::{Array1, Array2, Axis};
use ndarray_linalg::{Eigh as NdLinalgEigh, QR as NdLinalgQR, SVDInto as NdLinalgSVDInto, UPLO};
use std::error::Error;

use crate::error::PipelineError;

/// A thread-safe wrapper for backend errors so they implement `Send` and `Sync`.
pub type ThreadSafeStdError = Box<dyn Error + Send + Sync + 'static>;

/// Output of a symmetric eigendecomposition.
#[derive(Debug)]
pub struct EighOutput {
    /// Eigenvalues, sorted in ascending order.
    pub eigenvalues: Array1<f64>,
    /// Eigenvectors as columns of the matrix.
    /// eigenvectors.column(i) corresponds to eigenvalues[i].
    pub eigenvectors: Array2<f64>,
}

/// Output of a Singular Value Decomposition.
#[derive(Debug)]
pub struct SVDOutput {
    pub u: Option<Array2<f64>>,
    pub s: Array1<f64>,
    pub vt: Option<Array2<f64>>,
}

/// Symmetric eigendecomposition (LAPACK DSYEV family). `matrix` must be symmetric.
pub trait BackendEigh {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput, ThreadSafeStdError>;
}

/// QR decomposition, focusing on retrieving the Q factor.
pub trait BackendQR {
    fn qr_q_factor(&self, matrix: &Array2<f64>) -> Result<Array2<f64>, ThreadSafeStdError>;
}

/// Singular Value Decomposition.
pub trait BackendSVD {
    fn svd_into(
        &self,
        matrix: Array2<f64>,
        compute_u: bool,
        compute_v: bool,
    ) -> Result<SVDOutput, ThreadSafeStdError>;
}

/// ndarray-linalg backed implementation; the LAPACK flavour is picked by cargo feature.
#[derive(Debug, Default, Copy, Clone)]
pub struct NdarrayLinAlgBackend;

fn to_dyn_error<E: Error + Send + Sync + 'static>(e: E) -> ThreadSafeStdError {
    Box::new(e)
}

impl BackendEigh for NdarrayLinAlgBackend {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput, ThreadSafeStdError> {
        let (eigenvalues, eigenvectors) = matrix.eigh(UPLO::Upper).map_err(to_dyn_error)?;
        Ok(EighOutput {
            eigenvalues,
            eigenvectors,
        })
    }
}

impl BackendQR for NdarrayLinAlgBackend {
    fn qr_q_factor(&self, matrix: &Array2<f64>) -> Result<Array2<f64>, ThreadSafeStdError> {
        let (q_factor, _r) = matrix.qr().map_err(to_dyn_error)?;
        Ok(q_factor)
    }
}

impl BackendSVD for NdarrayLinAlgBackend {
    fn svd_into(
        &self,
        matrix: Array2<f64>,
        compute_u: bool,
        compute_v: bool,
    ) -> Result<SVDOutput, ThreadSafeStdError> {
        let (u, s, vt) = matrix
            .svd_into(compute_u, compute_v)
            .map_err(to_dyn_error)?;
        Ok(SVDOutput { u, s, vt })
    }
}

/// Dispatches to the selected linear algebra backend.
///
/// Every decomposition in the crate goes through this provider so that the
/// backend can be swapped in one place.
#[derive(Debug, Default, Copy, Clone)]
pub struct LinAlgBackendProvider;

impl LinAlgBackendProvider {
    pub fn new() -> Self {
        Self
    }
}

impl BackendEigh for LinAlgBackendProvider {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput, ThreadSafeStdError> {
        NdarrayLinAlgBackend.eigh_upper(matrix)
    }
}

impl BackendQR for LinAlgBackendProvider {
    fn qr_q_factor(&self, matrix: &Array2<f64>) -> Result<Array2<f64>, ThreadSafeStdError> {
        NdarrayLinAlgBackend.qr_q_factor(matrix)
    }
}

impl BackendSVD for LinAlgBackendProvider {
    fn svd_into(
        &self,
        matrix: Array2<f64>,
        compute_u: bool,
        compute_v: bool,
    ) -> Result<SVDOutput, ThreadSafeStdError> {
        NdarrayLinAlgBackend.svd_into(matrix, compute_u, compute_v)
    }
}

pub(crate) fn backend_error(context: &str, e: ThreadSafeStdError) -> PipelineError {
    PipelineError::Linalg(format!("{context}: {e}"))
}

/// Eigenvalues below this floor are treated as zero when inverting.
const EIGENVALUE_FLOOR: f64 = 1e-12;

/// Solves `A X = B` for a symmetric positive (semi-)definite `A` through its
/// eigendecomposition, `X = V diag(1/lambda) V^T B`.
///
/// Directions whose eigenvalue falls below `EIGENVALUE_FLOOR` are dropped, which
/// yields the minimum-norm solution for rank-deficient systems.
pub fn solve_symmetric(
    backend: &impl BackendEigh,
    a: &Array2<f64>,
    b: &Array2<f64>,
) -> Result<Array2<f64>, PipelineError> {
    if a.nrows() != a.ncols() {
        return Err(PipelineError::shape("symmetric solve", a.nrows(), a.ncols()));
    }
    if b.nrows() != a.nrows() {
        return Err(PipelineError::shape("symmetric solve", a.nrows(), b.nrows()));
    }
    let EighOutput {
        eigenvalues,
        eigenvectors,
    } = backend
        .eigh_upper(a)
        .map_err(|e| backend_error("eigendecomposition of system matrix failed", e))?;

    let inverse_eigenvalues =
        eigenvalues.mapv(|lam| if lam > EIGENVALUE_FLOOR { 1.0 / lam } else { 0.0 });
    let mut projected = eigenvectors.t().dot(b);
    for (mut row, &inv) in projected
        .axis_iter_mut(Axis(0))
        .zip(inverse_eigenvalues.iter())
    {
        row.mapv_inplace(|v| v * inv);
    }
    Ok(eigenvectors.dot(&projected))
}
