//! Poisson solver tests
//!
//! Every solver is run against the same 2D/3D Dirichlet Poisson problems and
//! checked against the true residual, not just its own convergence flag.

use fdm::blas::Blas;
use fdm::{
    mg_v_cycle, FdmBlas2, FdmBlas3, FdmCgSolver2, FdmIccgSolver2, FdmLinearSystem2,
    FdmMgLinearSystem2, FdmMgSolver2, FdmMgpcgSolver2, FdmVector2, LinearSystemSolver,
    MgLinearSystemSolver, MgParameters, RelaxSolver, Size2, Size3,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 5-point Laplacian with Dirichlet walls, scaled by 1/h^2.
fn fill_poisson2(a: &mut fdm::FdmMatrix2, h: f64) {
    let size = a.size();
    let inv_h2 = 1.0 / (h * h);
    a.par_for_each_index_mut(|i, j, row| {
        row.center = 4.0 * inv_h2;
        row.right = if i + 1 < size.x { -inv_h2 } else { 0.0 };
        row.up = if j + 1 < size.y { -inv_h2 } else { 0.0 };
    });
}

fn poisson2(n: usize) -> FdmLinearSystem2 {
    let size = Size2::new(n, n);
    let h = 1.0 / n as f64;
    let mut system = FdmLinearSystem2::new(size);
    fill_poisson2(&mut system.a, h);
    system.b.par_for_each_index_mut(|i, j, b| {
        let (x, y) = ((i as f64 + 0.5) * h, (j as f64 + 0.5) * h);
        *b = (std::f64::consts::PI * x).sin() * (std::f64::consts::PI * y).sin();
    });
    system
}

fn poisson_hierarchy2(n: usize, levels: usize) -> FdmMgLinearSystem2 {
    let flat = poisson2(n);
    let mut system = FdmMgLinearSystem2::default();
    system.resize_with_finest(flat.size(), levels);
    let mut h = 1.0 / n as f64;
    for a in system.a.levels.iter_mut() {
        fill_poisson2(a, h);
        h *= 2.0;
    }
    system.b.levels[0] = flat.b;
    system
}

fn residual_norm2(system: &FdmLinearSystem2) -> f64 {
    let mut r = FdmBlas2::vector_like(&system.b);
    FdmBlas2::residual(&system.a, &system.x, &system.b, &mut r);
    FdmBlas2::l2_norm(&r)
}

/// sin(pi x) sin(pi y) sampled at cell centres.
fn sine_bump2(n: usize) -> FdmVector2 {
    let h = 1.0 / n as f64;
    let mut v = FdmVector2::new(Size2::new(n, n));
    v.par_for_each_index_mut(|i, j, x| {
        let (px, py) = ((i as f64 + 0.5) * h, (j as f64 + 0.5) * h);
        *x = (std::f64::consts::PI * px).sin() * (std::f64::consts::PI * py).sin();
    });
    v
}

/// Poisson system whose right-hand side is `A * expected`.
fn manufactured_poisson2(n: usize) -> (FdmLinearSystem2, FdmVector2) {
    let mut system = poisson2(n);
    let expected = sine_bump2(n);
    FdmBlas2::mvm(&system.a, &expected, &mut system.b);
    (system, expected)
}

fn max_error2(x: &FdmVector2, expected: &FdmVector2) -> f64 {
    let mut diff = FdmVector2::new(x.size());
    FdmBlas2::axpy(-1.0, expected, x, &mut diff);
    FdmBlas2::l_inf_norm(&diff)
}

/// Test that CG and ICCG both recover a known 16x16 Poisson solution
#[test]
fn test_pcg_solves_16x16_poisson() {
    init_logs();

    let (mut system, expected) = manufactured_poisson2(16);
    let mut cg = FdmCgSolver2::with_params(200, 1e-9);
    let cg_result = cg.solve(&mut system);
    assert!(cg_result.converged, "CG failed: {:?}", cg_result);
    assert!(cg_result.iterations < 200, "CG ran out of iterations");
    assert!(residual_norm2(&system) < 1e-6, "CG residual {}", residual_norm2(&system));
    let cg_error = max_error2(&system.x, &expected);
    assert!(cg_error < 1e-7, "CG error {}", cg_error);

    let (mut system, expected) = manufactured_poisson2(16);
    let mut iccg = FdmIccgSolver2::with_params(200, 1e-9);
    let ic_result = iccg.solve(&mut system);
    assert!(ic_result.converged, "ICCG failed: {:?}", ic_result);
    assert!(ic_result.iterations < 200, "ICCG ran out of iterations");
    assert!(ic_result.iterations <= cg_result.iterations);
    let ic_error = max_error2(&system.x, &expected);
    assert!(ic_error < 1e-7, "ICCG error {}", ic_error);
}

/// Test that the relaxation solver reaches the same answer more slowly
#[test]
fn test_gauss_seidel_solves_16x16_poisson() {
    init_logs();

    let mut system = poisson2(16);
    let mut solver = RelaxSolver::<FdmBlas2>::gauss_seidel(5000, 10, 1e-6, 1.5, true);
    let result = solver.solve(&mut system);
    assert!(result.converged, "{:?}", result);
    assert!(residual_norm2(&system) <= 1e-6);
}

/// Test that the V-cycle residual never grows from one cycle to the next
#[test]
fn test_v_cycle_residual_is_non_increasing() {
    init_logs();

    let mut system = poisson_hierarchy2(32, 4);
    assert_eq!(system.number_of_levels(), 4);

    // Light smoothing keeps five cycles well above round-off
    let params = MgParameters {
        max_number_of_levels: 4,
        number_of_restriction_iter: 2,
        number_of_correction_iter: 2,
        number_of_final_iter: 2,
        ..MgParameters::default()
    };
    let mut buffer = system.x.zeros_like();

    let mut previous = FdmBlas2::l2_norm(&system.b.levels[0]);
    for cycle in 0..5 {
        let result = mg_v_cycle(&system.a, &params, &mut system.x, &mut system.b, &mut buffer);
        assert!(
            result.last_residual_norm <= previous,
            "cycle {}: residual grew from {} to {}",
            cycle,
            previous,
            result.last_residual_norm
        );
        previous = result.last_residual_norm;
    }
}

/// Test that the plain multigrid solver and MGPCG converge on the hierarchy
#[test]
fn test_multigrid_solvers_converge() {
    init_logs();

    let mut system = poisson_hierarchy2(32, 4);
    let mut mg = FdmMgSolver2::with_levels(4, 30, 1e-6, false);
    let result = mg.solve(&mut system);
    assert!(result.converged, "MG failed: {:?}", result);

    let mut system = poisson_hierarchy2(32, 4);
    let mut mgpcg = FdmMgpcgSolver2::with_levels(50, 4, 1e-8);
    let result = mgpcg.solve(&mut system);
    assert!(result.converged, "MGPCG failed: {:?}", result);
    assert!(result.iterations < 25, "MGPCG took {} iterations", result.iterations);
}

/// Test ICCG against random right-hand sides on a 3D domain
#[test]
fn test_iccg_random_rhs_3d() {
    init_logs();

    let size = Size3::new(10, 8, 6);
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..3 {
        let mut system = fdm::FdmLinearSystem3::new(size);
        system.a.par_for_each_index_mut(|i, j, k, row| {
            row.center = 6.0;
            row.right = if i + 1 < size.x { -1.0 } else { 0.0 };
            row.up = if j + 1 < size.y { -1.0 } else { 0.0 };
            row.front = if k + 1 < size.z { -1.0 } else { 0.0 };
        });
        for b in system.b.as_mut_slice() {
            *b = rng.gen_range(-1.0..1.0);
        }

        let mut solver = fdm::FdmIccgSolver3::with_params(300, 1e-10);
        let result = solver.solve(&mut system);
        assert!(result.converged);

        let mut r = FdmBlas3::vector_like(&system.b);
        FdmBlas3::residual(&system.a, &system.x, &system.b, &mut r);
        assert!(FdmBlas3::l2_norm(&r) < 1e-8);
    }
}
