mod common;

use approx::assert_relative_eq;
use errprop::{
    derive, Automatic, Dual64, Error, JacobianProvider, Manual, NumDiffConfig, Numerical, Obs,
};

use common::{chain, gaussian, max_delta_diff};

fn model_dual(x: &[Dual64]) -> Vec<Dual64> {
    vec![x[0] * x[1], x[0].sin() + x[1] * x[1]]
}

fn model(x: &[f64]) -> Vec<f64> {
    vec![x[0] * x[1], x[0].sin() + x[1] * x[1]]
}

fn model_jacobian(x: &[f64]) -> Vec<Vec<f64>> {
    vec![vec![x[1], x[0]], vec![x[0].cos(), 2.0 * x[1]]]
}

#[test]
fn strategies_agree_on_the_jacobian() {
    let x = [0.7, -1.3];
    let (va, ja) = Automatic::new(model_dual).eval_jacobian(&x).unwrap();
    let (vn, jn) = Numerical::new(model).eval_jacobian(&x).unwrap();
    let (vm, jm) = Manual::new(model, model_jacobian(&x)).eval_jacobian(&x).unwrap();
    let exact = model_jacobian(&x);
    for i in 0..2 {
        assert_eq!(va[i], vm[i]);
        assert_eq!(vn[i], vm[i]);
        for j in 0..2 {
            assert_relative_eq!(ja[i][j], exact[i][j], max_relative = 1e-14);
            assert_relative_eq!(jn[i][j], exact[i][j], epsilon = 1e-10);
            assert_eq!(jm[i][j], exact[i][j]);
        }
    }
}

#[test]
fn richardson_improves_on_a_single_difference() {
    let f = |x: &[f64]| vec![x[0].exp()];
    let single = NumDiffConfig {
        richardson_terms: 1,
        ..Default::default()
    };
    let (_, coarse) = Numerical::with_config(f, single).eval_jacobian(&[1.0]).unwrap();
    let (_, refined) = Numerical::new(f).eval_jacobian(&[1.0]).unwrap();
    let e = 1.0_f64.exp();
    assert!((refined[0][0] - e).abs() < (coarse[0][0] - e).abs());
    assert_relative_eq!(refined[0][0], e, max_relative = 1e-11);
}

#[test]
fn non_positive_step_is_rejected() {
    let cfg = NumDiffConfig {
        step: 0.0,
        ..Default::default()
    };
    let err = Numerical::with_config(model, cfg).eval_jacobian(&[1.0, 2.0]).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[test]
fn manual_jacobian_shape_is_checked() {
    let provider = Manual::new(model, vec![vec![1.0, 2.0]]);
    let err = provider.eval_jacobian(&[1.0, 2.0]).unwrap_err();
    assert_eq!(err.code(), "jacobian.manual_shape");
}

#[test]
fn infinite_automatic_derivative_is_unsupported() {
    let provider = Automatic::new(|x: &[Dual64]| vec![x[0].sqrt()]);
    let err = provider.eval_jacobian(&[0.0]).unwrap_err();
    assert!(matches!(err, Error::UnsupportedDifferentiation(_)));
    assert_eq!(err.code(), "jacobian.non_finite");
}

#[test]
fn derived_records_agree_across_strategies() {
    let a = chain("ens", gaussian(200, 0.7, 0.05, 11));
    let b = chain("ens", gaussian(200, -1.3, 0.05, 12));
    let auto = derive(&Automatic::new(model_dual), &[&a, &b]).unwrap();
    let num = derive(&Numerical::new(model), &[&a, &b]).unwrap();
    let manual_jac = model_jacobian(&[a.value(), b.value()]);
    let manual = derive(&Manual::new(model, manual_jac), &[&a, &b]).unwrap();
    for k in 0..2 {
        assert_eq!(auto[k].value(), manual[k].value());
        assert!(max_delta_diff(&auto[k], &manual[k], "ens") < 1e-14);
        assert!(max_delta_diff(&auto[k], &num[k], "ens") < 1e-10);
        assert_eq!(auto[k].r_value("ens"), num[k].r_value("ens"));
    }
}

#[test]
fn chain_values_use_the_chain_means() {
    let a = Obs::new(vec![vec![1.0, 3.0], vec![3.0, 5.0]], vec!["e|r1", "e|r2"]).unwrap();
    let sq = derive(&Automatic::new(|x: &[Dual64]| vec![x[0] * x[0]]), &[&a]).unwrap();
    assert_eq!(sq[0].value(), a.value() * a.value());
    assert_eq!(sq[0].r_value("e|r1"), Some(4.0));
    assert_eq!(sq[0].r_value("e|r2"), Some(16.0));
}
