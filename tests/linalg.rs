mod common;

use approx::assert_relative_eq;
use errprop::linalg::{self, EigConfig};
use errprop::{CObs, CObsMatrix, Differentiation, Error, NumDiffConfig, Obs, ObsMatrix, Operand};

use common::{chain, gaussian, max_delta_diff};

const AUTO: Differentiation = Differentiation::Automatic;

fn numerical() -> Differentiation {
    Differentiation::Numerical(NumDiffConfig::default())
}

/// Matrix of records on chain "e" fluctuating by about 1% around `values`.
fn noisy(rows: usize, cols: usize, values: &[f64], seed: u64) -> ObsMatrix {
    let data = values
        .iter()
        .enumerate()
        .map(|(i, &v)| chain("e", gaussian(40, v, 0.01, seed + i as u64)))
        .collect();
    ObsMatrix::new(rows, cols, data).unwrap()
}

fn assert_same(a: &Obs, b: &Obs, tol: f64) {
    assert_relative_eq!(a.value(), b.value(), epsilon = tol);
    assert!(max_delta_diff(a, b, "e") < tol, "deltas differ by {}", max_delta_diff(a, b, "e"));
}

fn assert_same_all<'a>(a: impl IntoIterator<Item = &'a Obs>, b: impl IntoIterator<Item = &'a Obs>, tol: f64) {
    for (x, y) in a.into_iter().zip(b) {
        assert_same(x, y, tol);
    }
}

#[test]
fn inverse_agrees_across_modes() {
    let a: Operand = noisy(3, 3, &[4.0, 1.0, 0.5, 1.0, 3.0, 0.2, 0.5, 0.2, 2.0], 1).into();
    let auto = linalg::inv(&a, &AUTO).unwrap().into_array().unwrap();
    let num = linalg::inv(&a, &numerical()).unwrap().into_array().unwrap();
    assert_same_all(auto.iter(), num.iter(), 1e-9);
}

#[test]
fn product_with_inverse_is_exact_identity() {
    let a: Operand = noisy(2, 2, &[2.0, 0.5, -0.3, 1.5], 10).into();
    let a_inv = linalg::inv(&a, &AUTO).unwrap();
    let id = linalg::matmul(&[a, a_inv], &AUTO).unwrap().into_array().unwrap();
    for i in 0..2 {
        for j in 0..2 {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert_relative_eq!(id[(i, j)].value(), expected, epsilon = 1e-12);
            assert!(id[(i, j)].deltas("e").unwrap().iter().all(|d| d.abs() < 1e-12));
        }
    }
}

#[test]
fn determinants_agree_across_modes() {
    let a: Operand = noisy(3, 3, &[2.0, 0.3, 0.1, -0.4, 1.5, 0.2, 0.0, 0.6, 3.0], 20).into();
    assert_same(&linalg::det(&a, &AUTO).unwrap(), &linalg::det(&a, &numerical()).unwrap(), 1e-9);
    let logdet = linalg::slogdet(&a, &AUTO).unwrap();
    assert_same(&logdet, &linalg::slogdet(&a, &numerical()).unwrap(), 1e-9);
    let det = linalg::det(&a, &AUTO).unwrap();
    assert_relative_eq!(logdet.value(), det.value().abs().ln(), max_relative = 1e-12);
}

#[test]
fn cholesky_agrees_across_modes() {
    let a: Operand = noisy(2, 2, &[4.0, 1.0, 1.0, 3.0], 30).into();
    let auto = linalg::cholesky(&a, &AUTO).unwrap();
    let num = linalg::cholesky(&a, &numerical()).unwrap();
    assert_same_all(auto.iter(), num.iter(), 1e-9);
    assert_eq!(auto[(0, 1)].value(), 0.0);
    assert_relative_eq!(auto[(0, 0)].value(), a.as_array().unwrap()[(0, 0)].value().sqrt(), max_relative = 1e-14);
}

#[test]
fn symmetric_eigensystem_agrees_across_modes() {
    let a: Operand = noisy(3, 3, &[2.0, 0.5, 0.1, 0.5, 3.0, 0.3, 0.1, 0.3, 5.0], 40).into();
    let (w_auto, v_auto) = linalg::eigh(&a, &AUTO).unwrap();
    let (w_num, v_num) = linalg::eigh(&a, &numerical()).unwrap();
    assert_same_all(&w_auto, &w_num, 1e-8);
    assert_same_all(v_auto.iter(), v_num.iter(), 1e-8);
    assert!(w_auto.windows(2).all(|p| p[0].value() < p[1].value()));
}

#[test]
fn eigenvalues_sum_to_the_trace() {
    let m = noisy(3, 3, &[2.0, 0.5, 0.1, 0.5, 3.0, 0.3, 0.1, 0.3, 5.0], 50);
    let trace = &(&m[(0, 0)] + &m[(1, 1)]) + &m[(2, 2)];
    let (w, _) = linalg::eigh(&m.clone().into(), &AUTO).unwrap();
    let sum = &(&w[0] + &w[1]) + &w[2];
    assert_same(&sum, &trace, 1e-12);
}

#[test]
fn general_eigensystem_agrees_across_modes() {
    let a: Operand = noisy(2, 2, &[1.0, 0.5, 0.2, 3.0], 60).into();
    let (w_auto, v_auto) = linalg::eig(&a, &AUTO).unwrap();
    let (w_num, v_num) = linalg::eig(&a, &numerical()).unwrap();
    assert_same_all(&w_auto, &w_num, 1e-8);
    assert_same_all(v_auto.iter(), v_num.iter(), 1e-8);

    let config = EigConfig { offset: 0.0 };
    let (w_exact, _) = linalg::eig_with(&a, &AUTO, &config).unwrap();
    assert_same_all(&w_auto, &w_exact, 1e-12);
}

#[test]
fn complex_spectrum_is_unsupported() {
    let a: Operand = noisy(2, 2, &[0.0, -1.0, 1.0, 0.0], 70).into();
    let err = linalg::eig(&a, &AUTO).unwrap_err();
    assert!(matches!(err, Error::UnsupportedDifferentiation(_)));
    assert_eq!(err.code(), "linalg.complex_spectrum");
}

#[test]
fn singular_values_agree_across_modes() {
    let a: Operand = noisy(3, 2, &[3.0, 1.0, 1.0, 2.0, 0.5, 0.2], 80).into();
    let (u_auto, s_auto, v_auto) = linalg::svd(&a, &AUTO).unwrap();
    let (u_num, s_num, v_num) = linalg::svd(&a, &numerical()).unwrap();
    assert_eq!(u_auto.shape(), (3, 2));
    assert_eq!(v_auto.shape(), (2, 2));
    assert_same_all(&s_auto, &s_num, 1e-8);
    assert_same_all(u_auto.iter(), u_num.iter(), 1e-8);
    assert_same_all(v_auto.iter(), v_num.iter(), 1e-8);

    let s = nalgebra::DMatrix::from_diagonal(&nalgebra::DVector::from_iterator(
        2,
        s_auto.iter().map(Obs::value),
    ));
    let back = u_auto.values() * s * v_auto.values().transpose();
    assert!((back - a.as_array().unwrap().values()).norm() < 1e-12);
}

#[test]
fn pseudo_inverse_is_a_left_inverse() {
    let a: Operand = noisy(3, 2, &[1.0, 0.0, 0.5, 2.0, 1.0, 1.0], 90).into();
    let p = linalg::pinv(&a, &AUTO).unwrap();
    assert_eq!(p.shape(), (2, 3));
    assert_same_all(p.iter(), linalg::pinv(&a, &numerical()).unwrap().iter(), 1e-8);
    let id = p.values() * a.as_array().unwrap().values();
    assert!((id - nalgebra::DMatrix::<f64>::identity(2, 2)).norm() < 1e-12);
}

#[test]
fn complex_algebra_agrees_across_modes() {
    let re = noisy(2, 2, &[1.0, 0.5, -0.2, 2.0], 100);
    let im = noisy(2, 2, &[0.3, -0.1, 0.4, 0.2], 110);
    let z: Operand = CObsMatrix::from_parts(re.clone(), im).unwrap().into();
    let w: Operand = re.into();

    let prod_auto = linalg::matmul(&[z.clone(), w.clone()], &AUTO)
        .unwrap()
        .into_complex_array()
        .unwrap();
    let prod_num = linalg::matmul(&[z.clone(), w], &numerical())
        .unwrap()
        .into_complex_array()
        .unwrap();
    assert_same_all(prod_auto.real().iter(), prod_num.real().iter(), 1e-9);
    assert_same_all(prod_auto.imag().iter(), prod_num.imag().iter(), 1e-9);

    let inv_auto = linalg::inv(&z, &AUTO).unwrap().into_complex_array().unwrap();
    let inv_num = linalg::inv(&z, &numerical()).unwrap().into_complex_array().unwrap();
    assert_same_all(inv_auto.real().iter(), inv_num.real().iter(), 1e-9);
    assert_same_all(inv_auto.imag().iter(), inv_num.imag().iter(), 1e-9);

    let one = linalg::matmul(&[z, inv_auto.into()], &AUTO)
        .unwrap()
        .into_complex_array()
        .unwrap();
    assert_relative_eq!(one[(0, 0)].real.value(), 1.0, epsilon = 1e-12);
    assert_relative_eq!(one[(0, 0)].imag.value(), 0.0, epsilon = 1e-12);
    assert_relative_eq!(one[(1, 0)].real.value(), 0.0, epsilon = 1e-12);
}

#[test]
fn unsuitable_operands_are_rejected() {
    let z = CObsMatrix::new(1, 1, vec![CObs::from_real(Obs::constant(4.0))]).unwrap();
    let err = linalg::cholesky(&z.into(), &AUTO).unwrap_err();
    assert!(matches!(err, Error::TypeMismatch(_)));

    let err = linalg::inv(&Obs::constant(2.0).into(), &AUTO).unwrap_err();
    assert!(matches!(err, Error::TypeMismatch(_)));

    let wide: Operand = noisy(2, 3, &[1.0; 6], 120).into();
    let err = linalg::det(&wide, &AUTO).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch(_)));
    assert_eq!(err.code(), "linalg.not_square");
}

#[test]
fn singular_matrix_has_no_inverse() {
    let data = [1.0, 2.0, 2.0, 4.0].iter().map(|&v| Obs::constant(v)).collect();
    let a: Operand = ObsMatrix::new(2, 2, data).unwrap().into();
    let err = linalg::inv(&a, &AUTO).unwrap_err();
    assert!(matches!(err, Error::Singular(_)));
}
