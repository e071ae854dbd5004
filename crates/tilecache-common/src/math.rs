//! Grid math helpers

/// Square a value (x²)
#[inline]
pub fn sqr<T: std::ops::Mul<Output = T> + Copy>(x: T) -> T {
    x * x
}

/// Align value to 4-byte boundary
#[inline]
pub fn align4(x: usize) -> usize {
    (x + 3) & !3
}

/// X offset of the neighbour cell in direction `dir`.
///
/// Directions are numbered 0 = -x, 1 = +z, 2 = +x, 3 = -z, matching the
/// bit order of the per-cell connectivity mask.
#[inline]
pub fn dir_offset_x(dir: usize) -> i32 {
    const OFFSET: [i32; 4] = [-1, 0, 1, 0];
    OFFSET[dir & 0x03]
}

/// Z offset of the neighbour cell in direction `dir`.
#[inline]
pub fn dir_offset_y(dir: usize) -> i32 {
    const OFFSET: [i32; 4] = [0, 1, 0, -1];
    OFFSET[dir & 0x03]
}

/// Direction pointing back to the cell we came from
#[inline]
pub fn opposite_dir(dir: usize) -> usize {
    (dir + 2) & 0x03
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opposite_dir_negates_offsets() {
        for dir in 0..4 {
            let dx = dir_offset_x(dir);
            let dy = dir_offset_y(dir);
            assert_eq!(dx.abs() + dy.abs(), 1);
            let back = opposite_dir(dir);
            assert_eq!(dir_offset_x(back), -dx);
            assert_eq!(dir_offset_y(back), -dy);
        }
    }

    #[test]
    fn test_align4() {
        assert_eq!(align4(0), 0);
        assert_eq!(align4(1), 4);
        assert_eq!(align4(60), 60);
        assert_eq!(align4(61), 64);
    }

    #[test]
    fn test_sqr() {
        assert_eq!(sqr(3), 9);
        assert_eq!(sqr(1.5f32), 2.25);
    }
}
