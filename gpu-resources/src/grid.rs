//! 核函数发射的线程块和网格尺寸。

use std::fmt;

/// 线程束宽度。
pub const WARP_SIZE: u32 = 32;
/// 每个线程块的线程数预算。
pub const THREADS_PER_BLOCK: u32 = 512;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Dim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dim3 {
    #[inline]
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }
}

impl From<u32> for Dim3 {
    #[inline]
    fn from(x: u32) -> Self {
        Self::new(x, 1, 1)
    }
}

impl From<(u32, u32)> for Dim3 {
    #[inline]
    fn from((x, y): (u32, u32)) -> Self {
        Self::new(x, y, 1)
    }
}

impl From<(u32, u32, u32)> for Dim3 {
    #[inline]
    fn from((x, y, z): (u32, u32, u32)) -> Self {
        Self::new(x, y, z)
    }
}

impl fmt::Display for Dim3 {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// 线程块规划参数。
#[derive(Clone, Debug)]
pub struct Config {
    pub threads_per_block: u32,
    pub warp_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threads_per_block: THREADS_PER_BLOCK,
            warp_size: WARP_SIZE,
        }
    }
}

impl Config {
    #[inline]
    pub fn block_2d(&self) -> Dim3 {
        block_size(self.threads_per_block, self.warp_size, 1)
    }

    #[inline]
    pub fn block_3d(&self, z: u32) -> Dim3 {
        block_size(self.threads_per_block, self.warp_size, z)
    }
}

/// 向上取整的整数除法。
///
/// # Panics
///
/// `den` 为 0 时 panic。
#[inline]
pub const fn div_round_up(num: u32, den: u32) -> u32 {
    num.div_ceil(den)
}

/// x 方向一个线程束，y 方向铺满线程预算。
#[inline]
pub fn block_size_2d() -> Dim3 {
    Config::default().block_2d()
}

/// z 方向 `z` 层，每层均分线程预算。
///
/// # Panics
///
/// `z` 为 0 时 panic。
#[inline]
pub fn block_size_3d(z: u32) -> Dim3 {
    Config::default().block_3d(z)
}

/// 以 `threads` 为线程预算、`warp` 为线程束宽度规划 `z` 层线程块。
///
/// `threads / z` 截断取整。
pub fn block_size(threads: u32, warp: u32, z: u32) -> Dim3 {
    let per_layer = threads / z;
    Dim3::new(warp, div_round_up(per_layer, warp), z)
}

/// 覆盖 `x * y * z` 问题规模所需的网格。
///
/// 每个方向恰好多出不到一个线程块。
pub fn grid_size(block: Dim3, x: u32, y: u32, z: u32) -> Dim3 {
    Dim3::new(
        div_round_up(x, block.x),
        div_round_up(y, block.y),
        div_round_up(z, block.z),
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_div_round_up() {
        assert_eq!(div_round_up(0, 7), 0);
        assert_eq!(div_round_up(1, 7), 1);
        assert_eq!(div_round_up(7, 7), 1);
        assert_eq!(div_round_up(8, 7), 2);
        assert_eq!(div_round_up(u32::MAX, 1), u32::MAX);
        assert_eq!(div_round_up(u32::MAX, 2), 1 << 31);

        let mut rng = rand::rng();
        for _ in 0..1000 {
            let a = rng.random_range(0..1 << 20);
            let b = rng.random_range(1..1 << 10);
            assert_eq!(div_round_up(a, b), (a as f64 / b as f64).ceil() as u32);
        }
    }

    #[test]
    #[should_panic]
    fn test_div_by_zero() {
        let den = std::hint::black_box(0);
        div_round_up(1, den);
    }

    #[test]
    fn test_block_size() {
        assert_eq!(block_size_2d(), Dim3::new(32, 16, 1));
        assert_eq!(block_size_3d(4), Dim3::new(32, 4, 4));
        assert_eq!(block_size(256, 32, 1), Dim3::new(32, 8, 1));
        assert_eq!(block_size(1024, 32, 3), Dim3::new(32, 11, 3));
        assert_eq!(block_size(64, 64, 1), Dim3::new(64, 1, 1));

        let config = Config {
            threads_per_block: 1024,
            warp_size: 64,
        };
        assert_eq!(config.block_2d(), Dim3::new(64, 16, 1));
        assert_eq!(config.block_3d(2), Dim3::new(64, 8, 2));
    }

    #[test]
    fn test_grid_size() {
        let block = Dim3::new(32, 8, 1);
        assert_eq!(grid_size(block, 1000, 1, 1), Dim3::new(32, 1, 1));
        assert_eq!(grid_size(block, 1024, 9, 3), Dim3::new(32, 2, 3));
        assert_eq!(grid_size(block, 0, 0, 0), Dim3::new(0, 0, 0));
    }

    #[test]
    fn test_grid_covers_problem() {
        let mut rng = rand::rng();
        for _ in 0..1000 {
            let block = Dim3::new(
                rng.random_range(1..=64),
                rng.random_range(1..=64),
                rng.random_range(1..=16),
            );
            let [x, y, z] = [0; 3].map(|_| rng.random_range(1..1 << 16));
            let grid = grid_size(block, x, y, z);
            for (g, b, n) in [(grid.x, block.x, x), (grid.y, block.y, y), (grid.z, block.z, z)] {
                assert!(g * b >= n, "{grid} x {block} < ({x}, {y}, {z})");
                assert!((g - 1) * b < n, "{grid} x {block} too large for ({x}, {y}, {z})");
            }
        }
    }

    #[test]
    fn test_dim3_from() {
        assert_eq!(Dim3::from(5), Dim3::new(5, 1, 1));
        assert_eq!(Dim3::from((5, 6)), Dim3::new(5, 6, 1));
        assert_eq!(Dim3::from((5, 6, 7)).to_string(), "(5, 6, 7)");
    }
}
