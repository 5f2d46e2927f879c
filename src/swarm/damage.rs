//! Initial plastic-strain seed and the lateral strain taper.

use crate::config::DamageConfig;
use crate::constants::STRAIN_TAPER_SHARPNESS;
use crate::math_utils::gaussian;
use crate::mesh::Grid;
use crate::swarm::ParticleSwarm;
use rand::Rng;

/// Random damage under a Gaussian envelope, `max * U(0,1) * g(x) * g(y)`.
///
/// The vertical envelope is much wider than the horizontal one, so the seed is
/// effectively a vertical band centred on `centre[0]`.
///
/// `g(s) = exp(-((s - c) / w)^2)` with `w` in metres. A profile written in
/// scaled coordinates as `exp(-(s' - c')^2 / width')`, with `s = L s'`, has
/// `w = L * sqrt(width')`, and a vertical denominator of `k' * width'` maps to
/// `vertical_width_factor = sqrt(k')`.
pub fn seed_damage(swarm: &mut ParticleSwarm, config: &DamageConfig, rng: &mut impl Rng) {
    let [cx, cy] = config.centre;
    let vertical_width = config.width * config.vertical_width_factor;
    // sequential so the draw order, and hence the seed, is reproducible
    for p in swarm.iter_mut() {
        let r: f64 = rng.random();
        let excluded = config.exclude_above.is_some_and(|top| p.position.y > top);
        p.plastic_strain = if excluded {
            0.0
        } else {
            config.max_damage
                * r
                * gaussian(p.position.x, cx, config.width)
                * gaussian(p.position.y, cy, vertical_width)
        };
    }
}

/// `(tanh(k z) + tanh(k (1 - z)) - tanh k)^4` with `z` the normalized x position:
/// close to 1 in the interior and 0 at both side walls.
pub fn strain_taper_factor(grid: &Grid, x: f64) -> f64 {
    let k = STRAIN_TAPER_SHARPNESS;
    let z = ((x - grid.min.x) / grid.width()).clamp(0.0, 1.0);
    ((k * z).tanh() + (k * (1.0 - z)).tanh() - k.tanh()).powi(4)
}

/// Damps accumulated plastic strain next to the side walls.
pub fn apply_strain_taper(swarm: &mut ParticleSwarm, grid: &Grid) {
    use rayon::prelude::*;
    swarm.par_iter_mut().for_each(|p| {
        p.plastic_strain *= strain_taper_factor(grid, p.position.x);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::MaterialId;
    use crate::swarm::Particle;
    use approx::assert_abs_diff_eq;
    use glam::DVec2;
    use more_asserts::{assert_ge, assert_le, assert_lt};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn grid() -> Grid {
        Grid::new(DVec2::new(0.0, -210.0e3), DVec2::new(720.0e3, 30.0e3), 24, 8).unwrap()
    }

    /// Every draw returns the same value so the envelope can be read off exactly.
    struct FixedDraw;

    impl rand::RngCore for FixedDraw {
        fn next_u32(&mut self) -> u32 {
            u32::MAX
        }

        fn next_u64(&mut self) -> u64 {
            u64::MAX
        }

        fn fill_bytes(&mut self, dst: &mut [u8]) {
            dst.fill(u8::MAX);
        }
    }

    #[test]
    fn test_seed_width_in_metres_maps_scaled_profile() {
        let r: f64 = FixedDraw.random();
        let length_scale = 100.0e3;
        // scaled form exp(-(x' - c')^2 / width'), vertical denominator 100 width'
        let scaled_width: f64 = 0.75;
        let config = DamageConfig {
            max_damage: 1.0,
            centre: [360.0e3, -40.0e3],
            width: length_scale * scaled_width.sqrt(),
            vertical_width_factor: 10.0,
            exclude_above: None,
        };

        let points = [
            DVec2::new(360.0e3, -40.0e3),
            DVec2::new(360.0e3 + config.width, -40.0e3),
            DVec2::new(300.0e3, -100.0e3),
            DVec2::new(450.0e3, 20.0e3),
        ];
        let mut swarm = ParticleSwarm::new();
        for p in points {
            swarm.insert(Particle::new(p, MaterialId(0), 1.0));
        }
        seed_damage(&mut swarm, &config, &mut FixedDraw);

        let scaled = |s: f64, c: f64, width: f64| {
            let d = (s - c) / length_scale;
            (-d * d / width).exp()
        };
        for (_, p) in swarm.iter() {
            let expected = r
                * scaled(p.position.x, 360.0e3, scaled_width)
                * scaled(p.position.y, -40.0e3, 100.0 * scaled_width);
            assert_abs_diff_eq!(p.plastic_strain, expected, epsilon = 1e-12);
        }
        // one width off centre is one e-fold down
        assert_abs_diff_eq!(swarm.get(1).unwrap().plastic_strain, r * (-1.0f64).exp(), epsilon = 1e-12);
    }

    #[test]
    fn test_taper_profile() {
        let g = grid();
        assert_abs_diff_eq!(strain_taper_factor(&g, 0.0), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(strain_taper_factor(&g, 720.0e3), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(strain_taper_factor(&g, 360.0e3), 1.0, epsilon = 1e-12);
        assert_lt!(strain_taper_factor(&g, 10.0e3), strain_taper_factor(&g, 30.0e3));
    }

    #[test]
    fn test_seed_is_bounded_and_excludes_air() {
        let mut swarm = ParticleSwarm::new();
        for k in 0..200 {
            let x = 720.0e3 * k as f64 / 200.0;
            swarm.insert(Particle::new(DVec2::new(x, -40.0e3), MaterialId(0), 1.0));
            swarm.insert(Particle::new(DVec2::new(x, 10.0e3), MaterialId(1), 1.0));
        }
        let config = DamageConfig::default();
        seed_damage(&mut swarm, &config, &mut StdRng::seed_from_u64(42));

        for (_, p) in swarm.iter() {
            assert_ge!(p.plastic_strain, 0.0);
            assert_le!(p.plastic_strain, config.max_damage);
            if p.position.y > 0.0 {
                assert_eq!(p.plastic_strain, 0.0);
            }
        }
        let centre: f64 = swarm
            .iter()
            .filter(|(_, p)| (p.position.x - 360.0e3).abs() < 50.0e3 && p.position.y < 0.0)
            .map(|(_, p)| p.plastic_strain)
            .sum();
        let edge: f64 = swarm
            .iter()
            .filter(|(_, p)| p.position.x < 100.0e3 && p.position.y < 0.0)
            .map(|(_, p)| p.plastic_strain)
            .sum();
        assert_lt!(edge, centre);
    }

    #[test]
    fn test_same_seed_same_damage() {
        let make = || {
            let mut s = ParticleSwarm::new();
            for k in 0..50 {
                s.insert(Particle::new(DVec2::new(300.0e3 + k as f64 * 1.0e3, -40.0e3), MaterialId(0), 1.0));
            }
            seed_damage(&mut s, &DamageConfig::default(), &mut StdRng::seed_from_u64(7));
            s.to_vec()
        };
        assert_eq!(make(), make());
    }
}
