//! Dense transform matrices carried by emitted connections.
//!
//! A transform maps a source of `cols` dimensions onto a sink of `rows`
//! dimensions. Storage is a flat row-major `Vec<f32>` (`data[r * cols + c]`).

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpaError};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Transform {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Transform {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn identity(n: usize) -> Self {
        let mut t = Self::zeros(n, n);
        for i in 0..n {
            t.data[i * n + i] = 1.0;
        }
        t
    }

    /// Same value in every entry.
    pub fn filled(rows: usize, cols: usize, value: f32) -> Self {
        Self {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    /// Build from row-major data. Fails if the length does not match the shape.
    pub fn from_row_major(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(SpaError::mismatch(rows * cols, data.len(), "transform data"));
        }
        Ok(Self { rows, cols, data })
    }

    /// `v` as a `len × 1` column: feeds a scalar source into a vector sink.
    pub fn column(v: &[f32]) -> Self {
        Self {
            rows: v.len(),
            cols: 1,
            data: v.to_vec(),
        }
    }

    /// `v` as a `1 × len` row: projects a vector source onto a scalar sink.
    pub fn row(v: &[f32]) -> Self {
        Self {
            rows: 1,
            cols: v.len(),
            data: v.to_vec(),
        }
    }

    /// Fill a `rows × cols` matrix from a per-entry function.
    pub fn from_fn(rows: usize, cols: usize, f: impl Fn(usize, usize) -> f32 + Sync) -> Self {
        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            let mut data = vec![0.0; rows * cols];
            if cols > 0 {
                data.par_chunks_mut(cols).enumerate().for_each(|(r, row)| {
                    for (c, x) in row.iter_mut().enumerate() {
                        *x = f(r, c);
                    }
                });
            }
            Self { rows, cols, data }
        }
        #[cfg(not(feature = "parallel"))]
        {
            let mut data = Vec::with_capacity(rows * cols);
            for r in 0..rows {
                for c in 0..cols {
                    data.push(f(r, c));
                }
            }
            Self { rows, cols, data }
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.cols + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        self.data[row * self.cols + col] = value;
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn row_slice(&self, row: usize) -> &[f32] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn scaled(&self, k: f32) -> Self {
        Self {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|x| x * k).collect(),
        }
    }

    /// `self · rhs`.
    pub fn matmul(&self, rhs: &Transform) -> Result<Transform> {
        if self.cols != rhs.rows {
            return Err(SpaError::mismatch(self.cols, rhs.rows, "transform product"));
        }
        let inner = self.cols;
        Ok(Transform::from_fn(self.rows, rhs.cols, |r, c| {
            let mut acc = 0.0;
            for k in 0..inner {
                acc += self.data[r * inner + k] * rhs.data[k * rhs.cols + c];
            }
            acc
        }))
    }

    /// Element-wise sum; both operands must share a shape.
    pub fn add(&self, rhs: &Transform) -> Result<Transform> {
        if self.shape() != rhs.shape() {
            return Err(SpaError::mismatch(
                self.rows * self.cols,
                rhs.rows * rhs.cols,
                format!(
                    "transform sum {}x{} + {}x{}",
                    self.rows, self.cols, rhs.rows, rhs.cols
                ),
            ));
        }
        Ok(Transform {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().zip(&rhs.data).map(|(a, b)| a + b).collect(),
        })
    }

    /// Apply to a source vector, producing a sink vector.
    pub fn apply(&self, x: &[f32]) -> Result<Vec<f32>> {
        if x.len() != self.cols {
            return Err(SpaError::mismatch(self.cols, x.len(), "transform input"));
        }
        Ok((0..self.rows)
            .map(|r| crate::pointer::dot(self.row_slice(r), x))
            .collect())
    }

    pub fn approx_eq(&self, other: &Transform, tol: f32) -> bool {
        self.shape() == other.shape()
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(a, b)| (a - b).abs() <= tol)
    }
}
