//! Seeded 2D simplex noise and its fractal sum.
//!
//! The permutation table is built once per [`SimplexNoise`] from an explicit
//! seed and never changes afterwards, so two instances built from the same
//! seed agree bit for bit and independent engines never share noise state.

use crate::prng::Xorshift32;

/// Noise seed used when nothing else is configured.
pub const DEFAULT_NOISE_SEED: u32 = 1337;

/// Skew factor for 2D simplex: (√3 − 1) / 2.
const F2: f64 = 0.366_025_403_784_438_6;
/// Unskew factor for 2D simplex: (3 − √3) / 6.
const G2: f64 = 0.211_324_865_405_187_1;

const GRADIENTS: [(f64, f64); 8] = [
    (1.0, 1.0),
    (-1.0, 1.0),
    (1.0, -1.0),
    (-1.0, -1.0),
    (1.0, 0.0),
    (-1.0, 0.0),
    (0.0, 1.0),
    (0.0, -1.0),
];

/// A shuffled bijection on [0, 255], doubled to 512 entries so lookups of the
/// form `perm[i + perm[j]]` never need a second wrap.
#[derive(Debug, Clone)]
pub struct PermutationTable {
    perm: [u8; 512],
    gradient_index: [u8; 512],
}

impl PermutationTable {
    /// Builds the table with a Fisher–Yates shuffle driven by [`Xorshift32`].
    pub fn new(seed: u32) -> Self {
        let mut p: [u8; 256] = std::array::from_fn(|i| i as u8);
        let mut rng = Xorshift32::new(seed);
        for i in (1..256).rev() {
            let j = (rng.next_f64() * (i + 1) as f64) as usize;
            p.swap(i, j);
        }

        let perm: [u8; 512] = std::array::from_fn(|i| p[i & 255]);
        let gradient_index: [u8; 512] = std::array::from_fn(|i| perm[i] % GRADIENTS.len() as u8);
        Self {
            perm,
            gradient_index,
        }
    }

    /// The first 256 entries (the underlying bijection).
    pub fn entries(&self) -> &[u8] {
        &self.perm[..256]
    }

    #[inline]
    fn perm(&self, i: usize) -> usize {
        self.perm[i] as usize
    }

    #[inline]
    fn gradient(&self, i: usize) -> (f64, f64) {
        GRADIENTS[self.gradient_index[i] as usize]
    }
}

/// Deterministic 2D simplex gradient noise.
#[derive(Debug, Clone)]
pub struct SimplexNoise {
    table: PermutationTable,
}

impl Default for SimplexNoise {
    fn default() -> Self {
        Self::new(DEFAULT_NOISE_SEED)
    }
}

impl SimplexNoise {
    /// Creates a noise generator whose permutation table is shuffled by `seed`.
    pub fn new(seed: u32) -> Self {
        Self {
            table: PermutationTable::new(seed),
        }
    }

    /// The permutation table this generator samples.
    pub fn table(&self) -> &PermutationTable {
        &self.table
    }

    /// Simplex noise at (x, y), roughly in [-1, 1].
    pub fn get(&self, x: f64, y: f64) -> f64 {
        let s = (x + y) * F2;
        let i = (x + s).floor();
        let j = (y + s).floor();
        let t = (i + j) * G2;
        let x0 = x - (i - t);
        let y0 = y - (j - t);

        let (i1, j1) = if x0 > y0 { (1, 0) } else { (0, 1) };

        let x1 = x0 - i1 as f64 + G2;
        let y1 = y0 - j1 as f64 + G2;
        let x2 = x0 - 1.0 + 2.0 * G2;
        let y2 = y0 - 1.0 + 2.0 * G2;

        let ii = (i as i64 & 255) as usize;
        let jj = (j as i64 & 255) as usize;
        let t = &self.table;
        let g0 = t.gradient(ii + t.perm(jj));
        let g1 = t.gradient(ii + i1 + t.perm(jj + j1));
        let g2 = t.gradient(ii + 1 + t.perm(jj + 1));

        70.0 * (corner(g0, x0, y0) + corner(g1, x1, y1) + corner(g2, x2, y2))
    }

    /// Sum of `|get(x·2^i, y·2^i)| · 0.5^i` for `i` in `[0, octaves)`.
    ///
    /// Never negative; zero octaves yields 0.
    pub fn fractal_sum(&self, x: f64, y: f64, octaves: u32) -> f64 {
        let mut sum = 0.0;
        let mut frequency = 1.0;
        let mut amplitude = 1.0;
        for _ in 0..octaves {
            sum += amplitude * self.get(x * frequency, y * frequency).abs();
            frequency *= 2.0;
            amplitude *= 0.5;
        }
        sum
    }
}

#[inline]
fn corner(g: (f64, f64), x: f64, y: f64) -> f64 {
    let t = 0.5 - x * x - y * y;
    if t <= 0.0 {
        return 0.0;
    }
    let t2 = t * t;
    t2 * t2 * (g.0 * x + g.1 * y)
}
