//! Separable 2-D DCT/DCST Poisson solve for the density field.
//!
//! The pipeline: a forward DCT-II
//! of the bin density, a halving pass over the DC row and column, a
//! `4/(nx*ny)` rescale, a pointwise divide by `wx^2+wy^2` (DC forced to
//! zero), then three inverse transforms recover the potential and the two
//! force components. `wx(i) = pi*i/binCntX`; `wy(j)` carries an extra
//! `binSizeY/binSizeX` factor so non-square bins stay isotropic.
//!
//! All grids are x-major (`data[x * binCntY + y]`). The transforms
//! themselves live behind the `Fft2D` capability trait; `NaiveDctSolver`
//! implements them as the plain O(n^2) per-axis definitions, which is
//! plenty for the few-hundred-bins-per-axis grids this engine builds.

use std::f64::consts::PI;

use placer_common::{Dbu, Fft2D};

/// Stateless `Fft2D` implementation using the textbook transform sums.
#[derive(Debug, Default, Clone, Copy)]
pub struct NaiveDctSolver;

impl Fft2D for NaiveDctSolver {
    fn dct2d_forward(&self, data: &mut [f32], n1: usize, n2: usize) {
        apply_axis2(data, n1, n2, dct2_1d);
        apply_axis1(data, n1, n2, dct2_1d);
    }

    fn dct2d_inverse(&self, data: &mut [f32], n1: usize, n2: usize) {
        apply_axis2(data, n1, n2, idct_1d);
        apply_axis1(data, n1, n2, idct_1d);
    }

    fn dsct2d_inverse(&self, data: &mut [f32], n1: usize, n2: usize) {
        apply_axis2(data, n1, n2, idct_1d);
        apply_axis1(data, n1, n2, idst_1d);
    }

    fn dcst2d_inverse(&self, data: &mut [f32], n1: usize, n2: usize) {
        apply_axis2(data, n1, n2, idst_1d);
        apply_axis1(data, n1, n2, idct_1d);
    }
}

/// Runs `xform` along axis 2 (the contiguous y runs of an x-major grid).
fn apply_axis2(data: &mut [f32], n1: usize, n2: usize, xform: fn(&[f64], &mut [f64])) {
    let mut input = vec![0.0f64; n2];
    let mut output = vec![0.0f64; n2];
    for x in 0..n1 {
        let slice = &mut data[x * n2..(x + 1) * n2];
        for (i, v) in slice.iter().enumerate() {
            input[i] = *v as f64;
        }
        xform(&input, &mut output);
        for (v, o) in slice.iter_mut().zip(&output) {
            *v = *o as f32;
        }
    }
}

/// Runs `xform` along axis 1 (strided x runs).
fn apply_axis1(data: &mut [f32], n1: usize, n2: usize, xform: fn(&[f64], &mut [f64])) {
    let mut input = vec![0.0f64; n1];
    let mut output = vec![0.0f64; n1];
    for y in 0..n2 {
        for x in 0..n1 {
            input[x] = data[x * n2 + y] as f64;
        }
        xform(&input, &mut output);
        for x in 0..n1 {
            data[x * n2 + y] = output[x] as f32;
        }
    }
}

/// DCT-II, unnormalized: `X[k] = sum_j x[j] cos(pi (j+1/2) k / n)`.
fn dct2_1d(input: &[f64], output: &mut [f64]) {
    let n = input.len();
    for (k, out) in output.iter_mut().enumerate().take(n) {
        let mut sum = 0.0;
        for (j, &xj) in input.iter().enumerate() {
            sum += xj * (PI * (j as f64 + 0.5) * k as f64 / n as f64).cos();
        }
        *out = sum;
    }
}

/// DCT-III: `x[k] = sum_j X[j] cos(pi j (k+1/2) / n)`. The caller is
/// expected to have pre-halved the `j = 0` coefficient and applied the
/// `4/(n1*n2)` scale.
fn idct_1d(input: &[f64], output: &mut [f64]) {
    let n = input.len();
    for (k, out) in output.iter_mut().enumerate().take(n) {
        let mut sum = 0.0;
        for (j, &xj) in input.iter().enumerate() {
            sum += xj * (PI * j as f64 * (k as f64 + 0.5) / n as f64).cos();
        }
        *out = sum;
    }
}

/// DST-III: `x[k] = sum_{j=1..n} X[j mod n] sin(pi j (k+1/2) / n)`; slot 0
/// carries the `j = n` coefficient. In this engine that slot is always
/// zero (the sine axis' zero frequency is an exact zero of `phi * w`).
fn idst_1d(input: &[f64], output: &mut [f64]) {
    let n = input.len();
    for (k, out) in output.iter_mut().enumerate().take(n) {
        let mut sum = 0.0;
        for j in 1..=n {
            sum += input[j % n] * (PI * j as f64 * (k as f64 + 0.5) / n as f64).sin();
        }
        *out = sum;
    }
}

/// Per-bin Poisson solver state: the density input grid and the three
/// output grids, plus the precomputed frequency weights.
pub struct Fft {
    bin_cnt_x: usize,
    bin_cnt_y: usize,
    bin_density: Vec<f32>,
    electro_phi: Vec<f32>,
    electro_force_x: Vec<f32>,
    electro_force_y: Vec<f32>,
    wx: Vec<f32>,
    wx_sq: Vec<f32>,
    wy: Vec<f32>,
    wy_sq: Vec<f32>,
}

impl Fft {
    pub fn new(bin_cnt_x: usize, bin_cnt_y: usize, bin_size_x: Dbu, bin_size_y: Dbu) -> Self {
        let n = bin_cnt_x * bin_cnt_y;

        let wx: Vec<f32> = (0..bin_cnt_x)
            .map(|i| (PI * i as f64 / bin_cnt_x as f64) as f32)
            .collect();
        // The binSizeY/binSizeX factor keeps the field isotropic when the
        // bins are not square.
        let wy: Vec<f32> = (0..bin_cnt_y)
            .map(|j| {
                (PI * j as f64 / bin_cnt_y as f64) as f32 * bin_size_y as f32 / bin_size_x as f32
            })
            .collect();
        let wx_sq = wx.iter().map(|w| w * w).collect();
        let wy_sq = wy.iter().map(|w| w * w).collect();

        Self {
            bin_cnt_x,
            bin_cnt_y,
            bin_density: vec![0.0; n],
            electro_phi: vec![0.0; n],
            electro_force_x: vec![0.0; n],
            electro_force_y: vec![0.0; n],
            wx,
            wx_sq,
            wy,
            wy_sq,
        }
    }

    pub fn update_density(&mut self, x: usize, y: usize, density: f32) {
        self.bin_density[x * self.bin_cnt_y + y] = density;
    }

    pub fn electro_force(&self, x: usize, y: usize) -> (f32, f32) {
        let idx = x * self.bin_cnt_y + y;
        (self.electro_force_x[idx], self.electro_force_y[idx])
    }

    pub fn electro_phi(&self, x: usize, y: usize) -> f32 {
        self.electro_phi[x * self.bin_cnt_y + y]
    }

    /// The full density-to-field pipeline. Consumes the density grid most
    /// recently written through `update_density`.
    pub fn do_fft(&mut self, solver: &dyn Fft2D) {
        let (n1, n2) = (self.bin_cnt_x, self.bin_cnt_y);

        solver.dct2d_forward(&mut self.bin_density, n1, n2);

        for x in 0..n1 {
            self.bin_density[x * n2] *= 0.5;
        }
        for y in 0..n2 {
            self.bin_density[y] *= 0.5;
        }
        let scale = 4.0 / (n1 as f32 * n2 as f32);
        for v in self.bin_density.iter_mut() {
            *v *= scale;
        }

        for x in 0..n1 {
            let wx = self.wx[x];
            let wx2 = self.wx_sq[x];
            for y in 0..n2 {
                let wy = self.wy[y];
                let wy2 = self.wy_sq[y];
                let idx = x * n2 + y;

                let (phi, ex, ey) = if x == 0 && y == 0 {
                    (0.0, 0.0, 0.0)
                } else {
                    let phi = self.bin_density[idx] / (wx2 + wy2);
                    (phi, phi * wx, phi * wy)
                };
                self.electro_phi[idx] = phi;
                self.electro_force_x[idx] = ex;
                self.electro_force_y[idx] = ey;
            }
        }

        solver.dct2d_inverse(&mut self.electro_phi, n1, n2);
        solver.dsct2d_inverse(&mut self.electro_force_x, n1, n2);
        solver.dcst2d_inverse(&mut self.electro_force_y, n1, n2);
    }
}
