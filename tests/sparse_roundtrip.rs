use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sparsedet::compress::{SparseDenseLinear, Storage};
use sparsedet::{Matrix, SparseConvertible, SparseDenseParameter, SparseDetError};

fn random_sparse(rng: &mut StdRng, rows: usize, cols: usize, density: f64) -> Matrix {
    let data = (0..rows * cols)
        .map(|_| {
            if rng.random_bool(density) {
                rng.random_range(-1.0f32..1.0)
            } else {
                0.0
            }
        })
        .collect();
    Matrix::from_vec(data, rows, cols).unwrap()
}

#[test]
fn dense_sparse_dense_is_exact() {
    let mut rng = StdRng::seed_from_u64(5);
    for &(rows, cols, density) in &[(1, 1, 1.0), (7, 13, 0.2), (32, 64, 0.05), (16, 16, 0.0)] {
        let m = random_sparse(&mut rng, rows, cols, density);
        let expected_nnz = m.as_slice().iter().filter(|&&v| v != 0.0).count();
        let mut p = SparseDenseParameter::dense(m.clone());
        p.to_sparse().unwrap();
        assert_eq!(p.nnz(), expected_nnz);
        match p.storage() {
            Storage::Sparse(coo) => {
                let positions: Vec<(usize, usize)> = coo.iter().map(|(r, c, _)| (r, c)).collect();
                let mut sorted = positions.clone();
                sorted.sort();
                assert_eq!(positions, sorted);
            }
            Storage::Dense(_) => panic!("expected sparse storage"),
        }
        p.to_dense().unwrap();
        assert_eq!(p.logical_matrix(), m);
    }
}

#[test]
fn sparse_forward_matches_dense_forward() {
    let mut rng = StdRng::seed_from_u64(9);
    let w = random_sparse(&mut rng, 24, 40, 0.1);
    let bias: Vec<f32> = (0..24).map(|_| rng.random_range(-1.0f32..1.0)).collect();
    let x_data: Vec<f32> = (0..5 * 40).map(|_| rng.random_range(-2.0f32..2.0)).collect();
    let x = Matrix::from_vec(x_data, 5, 40).unwrap();

    let mut layer = SparseDenseLinear::new(w, bias).unwrap();
    let dense = layer.forward(&x).unwrap();
    assert!(layer.set_sparse().unwrap());
    assert!(!layer.set_sparse().unwrap());
    let sparse = layer.forward(&x).unwrap();
    for (a, b) in dense.as_slice().iter().zip(sparse.as_slice()) {
        assert!((a - b).abs() < 1e-4);
    }
}

#[test]
fn repeated_transitions_fail_on_the_parameter() {
    let mut p = SparseDenseParameter::dense(Matrix::zeros(2, 2));
    assert_eq!(p.to_dense(), Err(SparseDetError::AlreadyDense));
    p.to_sparse().unwrap();
    assert_eq!(p.nnz(), 0);
    assert_eq!(p.to_sparse(), Err(SparseDetError::AlreadySparse));
}
