//! Dense 2D/3D arrays with x-fastest storage.

use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::parallel;

/// Resolution of a 2D array.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub struct Size2 {
    pub x: usize,
    pub y: usize,
}

impl Size2 {
    pub const fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }

    /// Number of elements.
    pub const fn len(&self) -> usize {
        self.x * self.y
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn index(&self, i: usize, j: usize) -> usize {
        debug_assert!(i < self.x && j < self.y, "({}, {}) out of {:?}", i, j, self);
        j * self.x + i
    }

    #[inline]
    pub fn coords(&self, index: usize) -> (usize, usize) {
        (index % self.x, index / self.x)
    }
}

/// Resolution of a 3D array.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub struct Size3 {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl Size3 {
    pub const fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    /// Number of elements.
    pub const fn len(&self) -> usize {
        self.x * self.y * self.z
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Linear index: k * nx * ny + j * nx + i
    #[inline]
    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        debug_assert!(
            i < self.x && j < self.y && k < self.z,
            "({}, {}, {}) out of {:?}",
            i,
            j,
            k,
            self
        );
        (k * self.y + j) * self.x + i
    }

    #[inline]
    pub fn coords(&self, index: usize) -> (usize, usize, usize) {
        let i = index % self.x;
        let rest = index / self.x;
        (i, rest % self.y, rest / self.y)
    }
}

// ========== Array2 ==========

/// Dense 2D array.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Array2<T> {
    size: Size2,
    data: Vec<T>,
}

impl<T: Clone + Default> Array2<T> {
    /// Allocate an array filled with `T::default()`.
    pub fn new(size: Size2) -> Self {
        Self::with_value(size, T::default())
    }

    pub fn with_value(size: Size2, value: T) -> Self {
        Self {
            size,
            data: vec![value; size.len()],
        }
    }

    /// Reallocate for a new shape. Contents are reset when the shape changes.
    pub fn resize(&mut self, size: Size2) {
        if size != self.size {
            self.size = size;
            self.data = vec![T::default(); size.len()];
        }
    }
}

impl<T> Array2<T> {
    pub fn size(&self) -> Size2 {
        self.size
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn fill(&mut self, value: T)
    where
        T: Clone,
    {
        self.data.fill(value);
    }

    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(self, other);
    }

    /// Visit every (i, j) in storage order.
    pub fn for_each_index(&self, mut f: impl FnMut(usize, usize)) {
        for j in 0..self.size.y {
            for i in 0..self.size.x {
                f(i, j);
            }
        }
    }

    /// Write every element through the execution backend.
    pub fn par_for_each_index_mut<F>(&mut self, f: F)
    where
        T: Send,
        F: Fn(usize, usize, &mut T) + Sync + Send,
    {
        let size = self.size;
        parallel::for_each_mut(&mut self.data, |idx, value| {
            let (i, j) = size.coords(idx);
            f(i, j, value);
        });
    }
}

impl<T> Index<(usize, usize)> for Array2<T> {
    type Output = T;

    #[inline]
    fn index(&self, (i, j): (usize, usize)) -> &T {
        &self.data[self.size.index(i, j)]
    }
}

impl<T> IndexMut<(usize, usize)> for Array2<T> {
    #[inline]
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut T {
        let idx = self.size.index(i, j);
        &mut self.data[idx]
    }
}

// ========== Array3 ==========

/// Dense 3D array.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Array3<T> {
    size: Size3,
    data: Vec<T>,
}

impl<T: Clone + Default> Array3<T> {
    /// Allocate an array filled with `T::default()`.
    pub fn new(size: Size3) -> Self {
        Self::with_value(size, T::default())
    }

    pub fn with_value(size: Size3, value: T) -> Self {
        Self {
            size,
            data: vec![value; size.len()],
        }
    }

    /// Reallocate for a new shape. Contents are reset when the shape changes.
    pub fn resize(&mut self, size: Size3) {
        if size != self.size {
            self.size = size;
            self.data = vec![T::default(); size.len()];
        }
    }
}

impl<T> Array3<T> {
    pub fn size(&self) -> Size3 {
        self.size
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn fill(&mut self, value: T)
    where
        T: Clone,
    {
        self.data.fill(value);
    }

    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(self, other);
    }

    /// Visit every (i, j, k) in storage order.
    pub fn for_each_index(&self, mut f: impl FnMut(usize, usize, usize)) {
        for k in 0..self.size.z {
            for j in 0..self.size.y {
                for i in 0..self.size.x {
                    f(i, j, k);
                }
            }
        }
    }

    /// Write every element through the execution backend.
    pub fn par_for_each_index_mut<F>(&mut self, f: F)
    where
        T: Send,
        F: Fn(usize, usize, usize, &mut T) + Sync + Send,
    {
        let size = self.size;
        parallel::for_each_mut(&mut self.data, |idx, value| {
            let (i, j, k) = size.coords(idx);
            f(i, j, k, value);
        });
    }
}

impl<T> Index<(usize, usize, usize)> for Array3<T> {
    type Output = T;

    #[inline]
    fn index(&self, (i, j, k): (usize, usize, usize)) -> &T {
        &self.data[self.size.index(i, j, k)]
    }
}

impl<T> IndexMut<(usize, usize, usize)> for Array3<T> {
    #[inline]
    fn index_mut(&mut self, (i, j, k): (usize, usize, usize)) -> &mut T {
        let idx = self.size.index(i, j, k);
        &mut self.data[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_coords_roundtrip() {
        let size = Size3::new(5, 3, 4);
        for idx in 0..size.len() {
            let (i, j, k) = size.coords(idx);
            assert_eq!(size.index(i, j, k), idx);
        }
    }

    #[test]
    fn test_storage_is_x_fastest() {
        let mut a: Array3<i32> = Array3::new(Size3::new(3, 2, 2));
        a[(1, 0, 0)] = 7;
        a[(0, 1, 0)] = 8;
        a[(0, 0, 1)] = 9;
        assert_eq!(a.as_slice()[1], 7);
        assert_eq!(a.as_slice()[3], 8);
        assert_eq!(a.as_slice()[6], 9);
    }

    #[test]
    fn test_resize_resets_on_shape_change_only() {
        let mut a = Array2::with_value(Size2::new(2, 2), 1.0f64);
        a.resize(Size2::new(2, 2));
        assert!(a.as_slice().iter().all(|&v| v == 1.0));

        a.resize(Size2::new(3, 1));
        assert_eq!(a.len(), 3);
        assert!(a.as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_par_for_each_index_mut_sees_coords() {
        let mut a: Array3<(usize, usize, usize)> = Array3::new(Size3::new(4, 3, 2));
        a.par_for_each_index_mut(|i, j, k, v| *v = (i, j, k));
        a.for_each_index(|i, j, k| assert_eq!(a[(i, j, k)], (i, j, k)));
    }
}
