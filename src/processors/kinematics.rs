//! Mass-weighted velocity statistics per Lagrangian bin.
//!
//! Every particle contributes eight scalar channels: `vx`, `vy`, `vz`, the
//! radial velocity, the three tangential components and the signed
//! rotational velocity in the x-y plane. Means and dispersions are taken per
//! channel and per bin, then the composite magnitudes are assembled:
//! means combine as a vector magnitude, dispersions add in quadrature.

use std::ops::Range;

use crate::core::particles::ParticleSet;

use super::shells::ShellPartition;

/// Number of per-particle velocity channels.
pub const N_CHANNELS: usize = 8;

const VX: usize = 0;
const VY: usize = 1;
const VZ: usize = 2;
const VR: usize = 3;
const VTX: usize = 4;
const VTY: usize = 5;
const VTZ: usize = 6;
const VROT: usize = 7;

/// Velocity statistics of every bin, one entry per bin in each field.
///
/// Field order matches the persisted column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VelocityStats {
    /// Magnitude of the 3D velocity
    pub abs: Vec<f64>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
    /// Radial velocity
    pub rad: Vec<f64>,
    /// Magnitude of the tangential velocity
    pub tan: Vec<f64>,
    /// Signed rotational velocity in the x-y plane
    pub rot: Vec<f64>,
}

impl VelocityStats {
    /// Names of the seven reported channels, in storage order.
    pub const CHANNELS: [&'static str; 7] = ["abs", "x", "y", "z", "rad", "tan", "rot"];

    /// All-zero statistics for `n_bins` bins.
    pub fn zeros(n_bins: usize) -> Self {
        Self {
            abs: vec![0.0; n_bins],
            x: vec![0.0; n_bins],
            y: vec![0.0; n_bins],
            z: vec![0.0; n_bins],
            rad: vec![0.0; n_bins],
            tan: vec![0.0; n_bins],
            rot: vec![0.0; n_bins],
        }
    }

    /// Channels in storage order.
    pub fn channels(&self) -> [&[f64]; 7] {
        [
            &self.abs, &self.x, &self.y, &self.z, &self.rad, &self.tan, &self.rot,
        ]
    }
}

/// Mean velocity and dispersion of every bin.
#[derive(Debug, Clone, PartialEq)]
pub struct BinKinematics {
    pub mean: VelocityStats,
    pub sigma: VelocityStats,
}

/// Eight velocity channels of one particle.
///
/// Position and velocity must already be relative to the cluster centre.
/// A particle at the centre has no radial direction: its radial velocity is
/// 0 and its whole velocity is tangential. A particle on the z-axis has no
/// rotational velocity.
pub fn velocity_channels(pos: &[f64; 3], vel: &[f64; 3]) -> [f64; N_CHANNELS] {
    let [rx, ry, rz] = *pos;
    let [vx, vy, vz] = *vel;

    let r = (rx * rx + ry * ry + rz * rz).sqrt();
    let rvxy = rx * vx + ry * vy;

    let (vr, vt) = if r > 0.0 {
        let vr = (rvxy + rz * vz) / r;
        (vr, [vx - vr * rx / r, vy - vr * ry / r, vz - vr * rz / r])
    } else {
        (0.0, [vx, vy, vz])
    };

    let rxy2 = rx * rx + ry * ry;
    let vrot = if rxy2 > 0.0 {
        let vrotx = vx - rvxy * rx / rxy2;
        let vroty = vy - rvxy * ry / rxy2;
        let speed = (vrotx * vrotx + vroty * vroty).sqrt();
        // sign of L_z = x vy - y vx: counter-clockwise is positive
        if rx * vy - ry * vx < 0.0 {
            -speed
        } else {
            speed
        }
    } else {
        0.0
    };

    [vx, vy, vz, vr, vt[0], vt[1], vt[2], vrot]
}

/// Mass-weighted mean and variance of one channel over `range`.
fn weighted_moments(
    mass: &[f64],
    values: &[[f64; N_CHANNELS]],
    channel: usize,
    range: &Range<usize>,
) -> (f64, f64) {
    let (mut m_sum, mut mv_sum) = (0.0, 0.0);
    for i in range.clone() {
        m_sum += mass[i];
        mv_sum += mass[i] * values[i][channel];
    }
    if m_sum == 0.0 {
        return (0.0, 0.0);
    }
    let mean = mv_sum / m_sum;

    let var_sum: f64 = range
        .clone()
        .map(|i| {
            let dv = values[i][channel] - mean;
            mass[i] * dv * dv
        })
        .sum();
    (mean, var_sum / m_sum)
}

/// Velocity means and dispersions for every bin of `partition`.
///
/// `particles` must be the same sorted population the partition was built
/// from. Empty bins report 0 for every channel.
pub fn aggregate(particles: &ParticleSet, partition: &ShellPartition) -> BinKinematics {
    let values: Vec<[f64; N_CHANNELS]> = particles
        .pos
        .iter()
        .zip(particles.vel.iter())
        .map(|(p, v)| velocity_channels(p, v))
        .collect();

    let n_bins = partition.n_bins();
    let mut mean = VelocityStats::zeros(n_bins);
    let mut sigma = VelocityStats::zeros(n_bins);

    for (bin, range) in partition.ranges.iter().enumerate() {
        if range.is_empty() {
            continue;
        }

        let mut mu = [0.0; N_CHANNELS];
        let mut var = [0.0; N_CHANNELS];
        for channel in 0..N_CHANNELS {
            (mu[channel], var[channel]) =
                weighted_moments(&particles.mass, &values, channel, range);
        }

        mean.x[bin] = mu[VX];
        mean.y[bin] = mu[VY];
        mean.z[bin] = mu[VZ];
        mean.abs[bin] = (mu[VX] * mu[VX] + mu[VY] * mu[VY] + mu[VZ] * mu[VZ]).sqrt();
        mean.rad[bin] = mu[VR];
        mean.tan[bin] = (mu[VTX] * mu[VTX] + mu[VTY] * mu[VTY] + mu[VTZ] * mu[VTZ]).sqrt();
        mean.rot[bin] = mu[VROT];

        sigma.x[bin] = var[VX].sqrt();
        sigma.y[bin] = var[VY].sqrt();
        sigma.z[bin] = var[VZ].sqrt();
        sigma.abs[bin] = (var[VX] + var[VY] + var[VZ]).sqrt();
        sigma.rad[bin] = var[VR].sqrt();
        sigma.tan[bin] = (var[VTX] + var[VTY] + var[VTZ]).sqrt();
        sigma.rot[bin] = var[VROT].sqrt();
    }

    BinKinematics { mean, sigma }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AverageMode;
    use crate::processors::shells::partition;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    fn sphere_partition(set: &ParticleSet, fractions: &[f64]) -> ShellPartition {
        partition(
            &set.mass,
            set.radius_squared().unwrap(),
            fractions,
            0.0,
            AverageMode::Sphere,
        )
    }

    fn sorted(set: &mut ParticleSet) -> ParticleSet {
        set.calc_r2();
        set.sorted_by_r2().unwrap()
    }

    #[test]
    fn test_velocity_channels_radial_and_tangential() {
        let ch = velocity_channels(&[2.0, 0.0, 0.0], &[3.0, 4.0, 0.0]);
        assert!(approx(ch[VR], 3.0));
        assert!(approx(ch[VTX], 0.0));
        assert!(approx(ch[VTY], 4.0));
        // counter-clockwise about z
        assert!(approx(ch[VROT], 4.0));

        let ch = velocity_channels(&[0.0, 2.0, 0.0], &[3.0, 0.0, 0.0]);
        // clockwise about z
        assert!(approx(ch[VROT], -3.0));
    }

    #[test]
    fn test_velocity_channels_at_center_and_on_axis() {
        let ch = velocity_channels(&[0.0, 0.0, 0.0], &[1.0, 2.0, 3.0]);
        assert_eq!(ch[VR], 0.0);
        assert_eq!([ch[VTX], ch[VTY], ch[VTZ]], [1.0, 2.0, 3.0]);
        assert_eq!(ch[VROT], 0.0);

        let ch = velocity_channels(&[0.0, 0.0, 5.0], &[1.0, 0.0, -2.0]);
        assert!(approx(ch[VR], -2.0));
        assert_eq!(ch[VROT], 0.0);
        assert!(ch.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_mean_magnitude_from_components() {
        // two particles moving along +x: mean (1, 0, 0), no dispersion
        let mut set = ParticleSet::new();
        set.push(1.0, [1.0, 0.0, 0.0], [1.0, 0.0, 0.0]);
        set.push(1.0, [0.0, 2.0, 0.0], [1.0, 0.0, 0.0]);
        let set = sorted(&mut set);
        let part = sphere_partition(&set, &[0.9]);

        let kin = aggregate(&set, &part);
        assert!(approx(kin.mean.x[0], 1.0));
        assert!(approx(kin.mean.abs[0], 1.0));
        assert!(approx(kin.sigma.abs[0], 0.0));
    }

    #[test]
    fn test_dispersion_adds_in_quadrature() {
        // mean velocity is zero; per-axis dispersions are 3, 4 and 0
        let mut set = ParticleSet::new();
        set.push(1.0, [1.0, 0.0, 0.0], [3.0, 4.0, 0.0]);
        set.push(1.0, [0.0, 2.0, 0.0], [-3.0, -4.0, 0.0]);
        let set = sorted(&mut set);
        let part = sphere_partition(&set, &[0.9]);

        let kin = aggregate(&set, &part);
        assert!(approx(kin.sigma.x[0], 3.0));
        assert!(approx(kin.sigma.y[0], 4.0));
        assert!(approx(kin.sigma.z[0], 0.0));
        assert!(approx(kin.sigma.abs[0], 5.0));
        assert!(approx(kin.mean.abs[0], 0.0));
    }

    #[test]
    fn test_counter_rotating_pair_cancels() {
        // mirror images about the x-axis, opposite sense of rotation
        let mut set = ParticleSet::new();
        set.push(1.0, [1.0, 1.0, 0.0], [-1.0, 1.0, 0.0]);
        set.push(1.0, [1.0, -1.0, 0.0], [-1.0, -1.0, 0.0]);
        let set = sorted(&mut set);

        let a = velocity_channels(&set.pos[0], &set.vel[0])[VROT];
        let b = velocity_channels(&set.pos[1], &set.vel[1])[VROT];
        assert!(a * b < 0.0);
        assert!(approx(a.abs(), b.abs()));

        let part = sphere_partition(&set, &[0.9]);
        let kin = aggregate(&set, &part);
        assert!(kin.mean.rot[0].abs() < 1e-12);
        // individual speeds survive in the dispersion
        assert!(approx(kin.sigma.rot[0], a.abs()));
    }

    #[test]
    fn test_mean_is_mass_weighted() {
        let mut set = ParticleSet::new();
        set.push(3.0, [1.0, 0.0, 0.0], [0.0, 0.0, 2.0]);
        set.push(1.0, [2.0, 0.0, 0.0], [0.0, 0.0, -2.0]);
        let set = sorted(&mut set);
        let part = sphere_partition(&set, &[0.99]);

        let kin = aggregate(&set, &part);
        // (3 * 2 + 1 * -2) / 4
        assert!(approx(kin.mean.z[0], 1.0));
        // variance: (3 * 1 + 1 * 9) / 4 = 3
        assert!(approx(kin.sigma.z[0], 3.0f64.sqrt()));
    }

    #[test]
    fn test_empty_bins_are_zero() {
        let mut set = ParticleSet::new();
        set.push(10.0, [1.0, 0.0, 0.0], [5.0, 0.0, 0.0]);
        set.push(1.0, [2.0, 0.0, 0.0], [1.0, 0.0, 0.0]);
        set.push(1.0, [3.0, 0.0, 0.0], [1.0, 0.0, 0.0]);
        let set = sorted(&mut set);
        let part = partition(
            &set.mass,
            set.radius_squared().unwrap(),
            &[0.2, 0.5],
            0.1,
            AverageMode::Shell,
        );

        let kin = aggregate(&set, &part);
        // second shell is empty, core bin is empty
        assert_eq!(kin.mean.x[1], 0.0);
        assert_eq!(kin.sigma.x[1], 0.0);
        assert_eq!(kin.mean.abs[2], 0.0);
        assert_eq!(kin.sigma.abs[2], 0.0);
        assert!(approx(kin.mean.x[0], 5.0));
    }

    /// Ten unit masses at x = 1..=10. The inner five move with `vx = 1`,
    /// the outer five with `vx = 3`. Inner particles drift by `vy = 0.5`;
    /// outer ones alternate `vy = +2, -2`.
    fn two_speed_line() -> ParticleSet {
        let mut set = ParticleSet::new();
        for x in 1..=10 {
            let vel = if x <= 5 {
                [1.0, 0.5, 0.0]
            } else if x % 2 == 0 {
                [3.0, 2.0, 0.0]
            } else {
                [3.0, -2.0, 0.0]
            };
            set.push(1.0, [x as f64, 0.0, 0.0], vel);
        }
        sorted(&mut set)
    }

    fn shell_partition(set: &ParticleSet) -> ShellPartition {
        partition(
            &set.mass,
            set.radius_squared().unwrap(),
            &[0.5, 0.9],
            2.5,
            AverageMode::Shell,
        )
    }

    #[test]
    fn test_shell_and_core_bins_use_their_own_particles() {
        let set = two_speed_line();
        let part = shell_partition(&set);
        assert_eq!(part.ranges, vec![0..5, 5..9, 0..2]);

        let kin = aggregate(&set, &part);
        for (bin, expected) in [1.0, 3.0, 1.0].into_iter().enumerate() {
            assert!(approx(kin.mean.x[bin], expected), "bin {bin}");
            // every particle sits on the +x axis, so vx is the radial velocity
            assert!(approx(kin.mean.rad[bin], expected), "bin {bin}");
            assert!(approx(kin.sigma.x[bin], 0.0), "bin {bin}");
            assert!(approx(kin.sigma.rad[bin], 0.0), "bin {bin}");
        }
    }

    #[test]
    fn test_tangential_statistics_per_shell() {
        let set = two_speed_line();
        let kin = aggregate(&set, &shell_partition(&set));

        // inner shell and core: uniform drift of 0.5 along y
        for bin in [0, 2] {
            assert!(approx(kin.mean.tan[bin], 0.5), "bin {bin}");
            assert!(approx(kin.sigma.tan[bin], 0.0), "bin {bin}");
            assert!(approx(kin.mean.rot[bin], 0.5), "bin {bin}");
            assert!(approx(kin.mean.abs[bin], 1.25f64.sqrt()), "bin {bin}");
        }

        // outer shell (x = 6..=9): vy cancels on average but spreads by 2
        assert!(approx(kin.mean.y[1], 0.0));
        assert!(approx(kin.mean.tan[1], 0.0));
        assert!(approx(kin.mean.rot[1], 0.0));
        assert!(approx(kin.sigma.y[1], 2.0));
        assert!(approx(kin.sigma.tan[1], 2.0));
        assert!(approx(kin.sigma.rot[1], 2.0));
        assert!(approx(kin.sigma.abs[1], 2.0));
        assert!(approx(kin.mean.abs[1], 3.0));
    }
}
