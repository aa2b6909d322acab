//! Cell-centered scalar grids, scalar fields, and extrapolation into invalid regions.

use fdm::{Array3, Size3};
use glam::DVec3;

use crate::grid::{sample_array, trilinear_weights, BoundingBox3};

/// A scalar function of position.
pub trait ScalarField3: Send + Sync {
    fn sample(&self, x: DVec3) -> f64;

    /// Gradient at `x`. Defaults to central differences of `sample`.
    fn gradient(&self, x: DVec3) -> DVec3 {
        let h = 1e-4;
        let d = |e: DVec3| (self.sample(x + h * e) - self.sample(x - h * e)) / (2.0 * h);
        DVec3::new(d(DVec3::X), d(DVec3::Y), d(DVec3::Z))
    }
}

/// The same value everywhere.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConstantScalarField3(pub f64);

impl ScalarField3 for ConstantScalarField3 {
    fn sample(&self, _x: DVec3) -> f64 {
        self.0
    }

    fn gradient(&self, _x: DVec3) -> DVec3 {
        DVec3::ZERO
    }
}

/// Scalar samples at the cell centers of a grid.
#[derive(Clone, Debug, Default)]
pub struct CellCenteredScalarGrid3 {
    resolution: Size3,
    grid_spacing: DVec3,
    origin: DVec3,
    data: Array3<f64>,
}

impl CellCenteredScalarGrid3 {
    pub fn new(resolution: Size3, grid_spacing: DVec3, origin: DVec3, initial_value: f64) -> Self {
        assert!(
            grid_spacing.x > 0.0 && grid_spacing.y > 0.0 && grid_spacing.z > 0.0,
            "grid_spacing must be positive, got {}",
            grid_spacing
        );
        Self {
            resolution,
            grid_spacing,
            origin,
            data: Array3::with_value(resolution, initial_value),
        }
    }

    /// Reshape and refill with `initial_value`.
    pub fn resize(&mut self, resolution: Size3, grid_spacing: DVec3, origin: DVec3, initial_value: f64) {
        *self = Self::new(resolution, grid_spacing, origin, initial_value);
    }

    pub fn resolution(&self) -> Size3 {
        self.resolution
    }

    pub fn grid_spacing(&self) -> DVec3 {
        self.grid_spacing
    }

    pub fn origin(&self) -> DVec3 {
        self.origin
    }

    pub fn bounding_box(&self) -> BoundingBox3 {
        let Size3 { x, y, z } = self.resolution;
        BoundingBox3::new(
            self.origin,
            self.origin + self.grid_spacing * DVec3::new(x as f64, y as f64, z as f64),
        )
    }

    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array3<f64> {
        &mut self.data
    }

    pub fn data_origin(&self) -> DVec3 {
        self.origin + 0.5 * self.grid_spacing
    }

    pub fn data_position(&self, i: usize, j: usize, k: usize) -> DVec3 {
        self.data_origin() + self.grid_spacing * DVec3::new(i as f64, j as f64, k as f64)
    }

    /// Set every sample from a function of its position.
    pub fn fill<F>(&mut self, f: F)
    where
        F: Fn(DVec3) -> f64 + Sync + Send,
    {
        let origin = self.data_origin();
        let h = self.grid_spacing;
        self.data.par_for_each_index_mut(|i, j, k, value| {
            *value = f(origin + h * DVec3::new(i as f64, j as f64, k as f64));
        });
    }

    /// Central-difference gradient at a sample, one-sided at the edges.
    pub fn gradient_at_data_point(&self, i: usize, j: usize, k: usize) -> DVec3 {
        let size = self.resolution;
        let d = &self.data;
        let h = self.grid_spacing;

        let diff = |lo: (usize, usize, usize), hi: (usize, usize, usize), steps: usize, h: f64| {
            if steps == 0 {
                0.0
            } else {
                (d[hi] - d[lo]) / (steps as f64 * h)
            }
        };

        let (il, ir) = (i.saturating_sub(1), (i + 1).min(size.x - 1));
        let (jl, jr) = (j.saturating_sub(1), (j + 1).min(size.y - 1));
        let (kl, kr) = (k.saturating_sub(1), (k + 1).min(size.z - 1));

        DVec3::new(
            diff((il, j, k), (ir, j, k), ir - il, h.x),
            diff((i, jl, k), (i, jr, k), jr - jl, h.y),
            diff((i, j, kl), (i, j, kr), kr - kl, h.z),
        )
    }
}

impl ScalarField3 for CellCenteredScalarGrid3 {
    fn sample(&self, x: DVec3) -> f64 {
        sample_array(&self.data, self.data_origin(), self.grid_spacing, x)
    }

    fn gradient(&self, x: DVec3) -> DVec3 {
        if self.data.is_empty() {
            return DVec3::ZERO;
        }
        trilinear_weights(self.resolution, self.data_origin(), self.grid_spacing, x)
            .iter()
            .map(|&((i, j, k), w)| w * self.gradient_at_data_point(i, j, k))
            .sum()
    }
}

// ========== Extrapolation ==========

/// Fill invalid samples of `data` with the average of their valid neighbours,
/// growing the valid region by one layer per iteration.
pub fn extrapolate_in_place(data: &mut Array3<f64>, valid: &Array3<bool>, number_of_iterations: usize) {
    assert_eq!(
        data.size(),
        valid.size(),
        "extrapolation data and validity shapes differ"
    );
    let size = data.size();
    let mut valid0 = valid.clone();
    let mut valid1 = valid.clone();

    for _ in 0..number_of_iterations {
        let mut changed = false;
        valid0.for_each_index(|i, j, k| {
            if valid0[(i, j, k)] {
                return;
            }
            let mut sum = 0.0;
            let mut count = 0u32;
            let mut visit = |n: (usize, usize, usize)| {
                if valid0[n] {
                    sum += data[n];
                    count += 1;
                }
            };
            if i > 0 {
                visit((i - 1, j, k));
            }
            if i + 1 < size.x {
                visit((i + 1, j, k));
            }
            if j > 0 {
                visit((i, j - 1, k));
            }
            if j + 1 < size.y {
                visit((i, j + 1, k));
            }
            if k > 0 {
                visit((i, j, k - 1));
            }
            if k + 1 < size.z {
                visit((i, j, k + 1));
            }

            if count > 0 {
                data[(i, j, k)] = sum / count as f64;
                valid1[(i, j, k)] = true;
                changed = true;
            }
        });

        if !changed {
            break;
        }
        valid0.clone_from(&valid1);
    }
}

/// Copying form of [`extrapolate_in_place`]: `output` becomes `input` with the
/// invalid region filled.
pub fn extrapolate_to_region(
    input: &Array3<f64>,
    valid: &Array3<bool>,
    number_of_iterations: usize,
    output: &mut Array3<f64>,
) {
    output.clone_from(input);
    extrapolate_in_place(output, valid, number_of_iterations);
}
