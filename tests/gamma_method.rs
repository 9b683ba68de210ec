mod common;

use approx::assert_relative_eq;
use errprop::{estimate, EnsembleOverride, GammaConfig, Idl, Obs, WindowFallback, WindowMode};

use common::{ar1, chain, gaussian};

fn naive_error(samples: &[f64]) -> f64 {
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let ss: f64 = samples.iter().map(|x| (x - mean).powi(2)).sum();
    (ss / (n * (n - 1.0))).sqrt()
}

#[test]
fn s_zero_is_the_standard_error() {
    let samples = gaussian(1000, 0.3, 1.2, 21);
    let mut obs = chain("ens", samples.clone());
    let summary = obs.gamma_method(&GammaConfig::default().with_s(0.0)).unwrap();
    assert_relative_eq!(summary.dvalue, naive_error(&samples), max_relative = 1e-12);
    let e = &summary.ensembles["ens"];
    assert_eq!(e.mode, WindowMode::Unwindowed);
    assert_eq!(e.window, 0);
    assert_eq!(e.tauint, 0.5);
    assert_relative_eq!(e.ddvalue, e.dvalue * (0.5 / 1000.0_f64).sqrt(), max_relative = 1e-14);
}

#[test]
fn ar1_autocorrelation_time_is_recovered() {
    // τ_int = (1 + φ) / (2 (1 − φ)) = 4.5
    let obs = chain("ens", ar1(20_000, 0.8, 0.0, 1.0, 22));
    let summary = estimate(&obs, &GammaConfig::default()).unwrap();
    let e = &summary.ensembles["ens"];
    assert!(!e.degraded);
    assert!(e.tauint > 3.15 && e.tauint < 5.85, "tau_int = {}", e.tauint);
    assert!(e.dtauint > 0.0);
    assert!(e.window > 1);
    assert_eq!(e.rho[0], 1.0);
    assert_eq!(e.rho.len(), 10_000);
    // The correction raises the error well above the naive estimate.
    let naive = estimate(&obs, &GammaConfig::default().with_s(0.0)).unwrap();
    assert!(summary.dvalue > 2.0 * naive.dvalue);
}

#[test]
fn window_grows_with_s() {
    let obs = chain("ens", ar1(10_000, 0.9, 0.0, 1.0, 23));
    let at = |s: f64| {
        let summary = estimate(&obs, &GammaConfig::default().with_s(s)).unwrap();
        summary.ensembles["ens"].clone()
    };
    let (narrow, wide) = (at(1.0), at(4.0));
    assert!(!narrow.degraded && !wide.degraded);
    assert!(narrow.window < wide.window);
    // Longer windows see more of the slow decay.
    assert!(wide.tauint + 2.0 * wide.dtauint > narrow.tauint);
}

#[test]
fn exponential_tail_adds_to_the_error() {
    let obs = chain("ens", ar1(5_000, 0.95, 1.0, 0.5, 24));
    let with_tail = |tau_exp: f64| {
        estimate(&obs, &GammaConfig::default().with_tau_exp(tau_exp)).unwrap()
    };
    let tiny = with_tail(1e-9);
    let tail = with_tail(20.0);
    let naive = estimate(&obs, &GammaConfig::default().with_s(0.0)).unwrap();
    let e_tail = &tail.ensembles["ens"];
    let e_tiny = &tiny.ensembles["ens"];
    // The truncation point does not depend on τ_exp.
    assert_eq!(e_tail.window, e_tiny.window);
    assert!(tail.dvalue > tiny.dvalue);
    assert!(tiny.dvalue > naive.dvalue);
    assert!(matches!(e_tail.mode, WindowMode::ExponentialTail { tau_exp, .. } if tau_exp == 20.0));
    assert_relative_eq!(
        e_tail.ddvalue,
        e_tail.dvalue * ((e_tail.window as f64 + 0.5) / 5000.0).sqrt(),
        max_relative = 1e-14
    );
}

#[test]
fn tail_and_automatic_share_the_autocorrelation() {
    let obs = chain("ens", ar1(5_000, 0.95, 1.0, 0.5, 24));
    let n = 5_000.0;
    let bias = |w: usize| (1.0 + (2.0 * w as f64 + 1.0) / n) / (1.0 + 1.0 / n);
    let auto = estimate(&obs, &GammaConfig::default()).unwrap();
    let tail = estimate(&obs, &GammaConfig::default().with_tau_exp(20.0)).unwrap();
    let (a, t) = (&auto.ensembles["ens"], &tail.ensembles["ens"]);
    assert_eq!(a.rho, t.rho);
    assert_eq!(a.n_tauint, t.n_tauint);

    assert_relative_eq!(a.tauint, a.n_tauint[a.window] * bias(a.window), max_relative = 1e-14);
    let w = t.window;
    assert_relative_eq!(
        t.tauint,
        t.n_tauint[w] * bias(w) + 20.0 * t.rho[w + 1].abs(),
        max_relative = 1e-14
    );
    // Same Γ(0) and N, so the errors scale with sqrt(τ_int).
    assert_relative_eq!(
        tail.dvalue / auto.dvalue,
        (t.tauint / a.tauint).sqrt(),
        max_relative = 1e-12
    );
}

#[test]
fn irregular_chain_is_estimated_in_order() {
    let mut obs = Obs::with_idl(
        vec![vec![1.0, 1.4, 0.8, 1.1, 0.9]],
        vec!["ens"],
        vec![Idl::from_indices(vec![2, 9, 28, 29, 501]).unwrap()],
    )
    .unwrap();
    let summary = obs.gamma_method(&GammaConfig::default()).unwrap().clone();
    let e = &summary.ensembles["ens"];
    assert_eq!(e.n, 5);
    assert_eq!(e.window, 1);
    assert!(!summary.degraded);
    assert!(summary.dvalue.is_finite() && summary.dvalue > 0.0);
    assert!(obs.details().contains("(irregular range)"));
}

#[test]
fn failed_window_search_is_degraded() {
    // W_max = 1 leaves no candidate window.
    let obs = chain("ens", vec![1.0, 2.0, 0.5]);
    let unwindowed = estimate(&obs, &GammaConfig::default()).unwrap();
    assert!(unwindowed.degraded);
    assert!(unwindowed.ensembles["ens"].degraded);
    let plain = estimate(&obs, &GammaConfig::default().with_s(0.0)).unwrap();
    assert_eq!(unwindowed.dvalue, plain.dvalue);
    assert!(!plain.degraded);

    let last = estimate(
        &obs,
        &GammaConfig::default().with_fallback(WindowFallback::LastWindow),
    )
    .unwrap();
    assert!(last.degraded);
    assert_eq!(last.ensembles["ens"].window, 0);
}

#[test]
fn last_candidate_window_is_searched() {
    // W_max = 2: the single candidate W = 1 satisfies the criterion.
    let obs = chain("ens", vec![1.0, 2.0, 0.5, 1.5]);
    let summary = estimate(&obs, &GammaConfig::default()).unwrap();
    assert!(!summary.degraded);
    assert_eq!(summary.ensembles["ens"].window, 1);
    assert!(summary.dvalue.is_finite() && summary.dvalue > 0.0);
}

#[test]
fn fluctuation_free_and_constant_records() {
    let flat = chain("ens", vec![2.0; 50]);
    let summary = estimate(&flat, &GammaConfig::default()).unwrap();
    assert_eq!(summary.dvalue, 0.0);
    assert_eq!(summary.ddvalue, 0.0);

    let single = chain("ens", vec![2.0]);
    assert_eq!(estimate(&single, &GammaConfig::default()).unwrap().dvalue, 0.0);

    let mut c = Obs::constant(1.5);
    let summary = c.gamma_method(&GammaConfig::default()).unwrap();
    assert_eq!(summary.dvalue, 0.0);
    assert!(summary.ensembles.is_empty());
}

#[test]
fn independent_ensembles_add_in_quadrature() {
    let a = chain("a", ar1(2_000, 0.5, 1.0, 0.2, 25));
    let b = chain("b", ar1(3_000, 0.3, 2.0, 0.4, 26));
    let cfg = GammaConfig::default();
    let da = estimate(&a, &cfg).unwrap().dvalue;
    let db = estimate(&b, &cfg).unwrap().dvalue;
    let sum = estimate(&(&a + &b), &cfg).unwrap();
    assert_relative_eq!(sum.dvalue, (da * da + db * db).sqrt(), max_relative = 1e-12);
    assert_eq!(sum.ensembles.len(), 2);
}

#[test]
fn replica_offsets_count_as_fluctuations() {
    let r1 = gaussian(400, 1.0, 0.1, 27);
    let r2 = gaussian(600, 1.2, 0.1, 28);
    let obs = Obs::new(vec![r1.clone(), r2.clone()], vec!["ens|r1", "ens|r2"]).unwrap();
    let summary = estimate(&obs, &GammaConfig::default().with_s(0.0)).unwrap();
    let pooled: Vec<f64> = r1.into_iter().chain(r2).collect();
    assert_relative_eq!(summary.dvalue, naive_error(&pooled), max_relative = 1e-10);
    assert_eq!(summary.ensembles["ens"].n, 1000);
}

#[test]
fn per_ensemble_override_wins() {
    let a = chain("a", ar1(2_000, 0.5, 1.0, 0.2, 29));
    let b = chain("b", ar1(2_000, 0.5, 1.0, 0.2, 30));
    let cfg = GammaConfig::default().with_override(
        "b",
        EnsembleOverride {
            s: Some(0.0),
            ..Default::default()
        },
    );
    let summary = estimate(&(&a * &b), &cfg).unwrap();
    assert_eq!(summary.ensembles["a"].mode, WindowMode::Automatic { s: 2.0 });
    assert_eq!(summary.ensembles["b"].mode, WindowMode::Unwindowed);
}

#[test]
fn estimate_does_not_touch_the_record() {
    let obs = chain("ens", gaussian(100, 1.0, 0.1, 31));
    let before = obs.deltas("ens").unwrap().to_vec();
    let _ = estimate(&obs, &GammaConfig::default()).unwrap();
    assert!(obs.analysis().is_none());
    assert_eq!(obs.deltas("ens").unwrap(), before.as_slice());
}

#[test]
fn config_from_json_drives_the_estimate() {
    let cfg: GammaConfig = serde_json::from_str(r#"{"s": 0.0, "fallback": "last_window"}"#).unwrap();
    assert_eq!(cfg.fallback, WindowFallback::LastWindow);
    let samples = gaussian(200, 0.0, 1.0, 32);
    let summary = estimate(&chain("ens", samples.clone()), &cfg).unwrap();
    assert_relative_eq!(summary.dvalue, naive_error(&samples), max_relative = 1e-12);
}

#[test]
fn details_report_the_window() {
    let mut obs = chain("ens", ar1(1_000, 0.5, 1.0, 0.2, 33));
    obs.gamma_method(&GammaConfig::default()).unwrap();
    let details = obs.details();
    assert!(details.starts_with("Result\t "));
    assert!(details.contains(" t_int\t "));
    assert!(details.contains("S = 2.00"));
    assert!(!details.contains(" Ensemble errors:"));
}
