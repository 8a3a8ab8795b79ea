//! Columnar particle container.
//!
//! A [`ParticleSet`] stores one column per attribute. Derived columns
//! (`r2`, `density`) are attached once per computation; selections and
//! joins always produce new sets and never mutate the source.

use thiserror::Error;

/// Errors raised by particle set operations.
#[derive(Debug, Error, PartialEq)]
pub enum ParticleError {
    #[error("column '{column}' has {found} entries, expected {expected}")]
    LengthMismatch {
        column: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("required column '{0}' has not been computed")]
    MissingColumn(&'static str),
}

/// Position and velocity of a reference frame (the cluster centre).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Center {
    pub pos: [f64; 3],
    pub vel: [f64; 3],
}

/// Columnar record of per-particle attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticleSet {
    /// Particle masses
    pub mass: Vec<f64>,
    /// Positions
    pub pos: Vec<[f64; 3]>,
    /// Velocities
    pub vel: Vec<[f64; 3]>,
    /// Potential energy, if provided by the snapshot
    pub pot: Option<Vec<f64>>,
    /// Squared distance to the current origin
    pub r2: Option<Vec<f64>>,
    /// Local density estimate
    pub density: Option<Vec<f64>>,
}

impl ParticleSet {
    /// Creates an empty particle set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a particle set with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            mass: Vec::with_capacity(capacity),
            pos: Vec::with_capacity(capacity),
            vel: Vec::with_capacity(capacity),
            pot: None,
            r2: None,
            density: None,
        }
    }

    fn check_column(&self, column: &'static str, found: usize) -> Result<(), ParticleError> {
        if found != self.len() {
            return Err(ParticleError::LengthMismatch {
                column,
                expected: self.len(),
                found,
            });
        }
        Ok(())
    }

    /// Returns the number of particles.
    #[inline]
    pub fn len(&self) -> usize {
        self.mass.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mass.is_empty()
    }

    /// Append one particle. Derived columns are dropped since they no longer cover every particle.
    ///
    /// If the set carries potentials, the new particle gets a potential of 0.
    pub fn push(&mut self, mass: f64, pos: [f64; 3], vel: [f64; 3]) {
        if let Some(pot) = self.pot.as_mut() {
            pot.push(0.0);
        }
        self.push_kinematics(mass, pos, vel);
    }

    /// Append one particle together with its potential.
    ///
    /// The potential column is created on first use; earlier particles get 0.
    pub fn push_with_potential(&mut self, mass: f64, pos: [f64; 3], vel: [f64; 3], pot: f64) {
        let n = self.len();
        self.pot.get_or_insert_with(|| vec![0.0; n]).push(pot);
        self.push_kinematics(mass, pos, vel);
    }

    fn push_kinematics(&mut self, mass: f64, pos: [f64; 3], vel: [f64; 3]) {
        self.mass.push(mass);
        self.pos.push(pos);
        self.vel.push(vel);
        self.r2 = None;
        self.density = None;
    }

    /// Potential column or an error if the snapshot did not provide it.
    pub fn potential(&self) -> Result<&[f64], ParticleError> {
        self.pot.as_deref().ok_or(ParticleError::MissingColumn("pot"))
    }

    /// Squared radius column or an error if [`calc_r2`](Self::calc_r2) was not run.
    pub fn radius_squared(&self) -> Result<&[f64], ParticleError> {
        self.r2.as_deref().ok_or(ParticleError::MissingColumn("r2"))
    }

    /// Density column or an error if no density estimate was attached.
    pub fn densities(&self) -> Result<&[f64], ParticleError> {
        self.density
            .as_deref()
            .ok_or(ParticleError::MissingColumn("density"))
    }

    /// Attach a density estimate, one value per particle.
    pub fn set_density(&mut self, density: Vec<f64>) -> Result<(), ParticleError> {
        self.check_column("density", density.len())?;
        self.density = Some(density);
        Ok(())
    }

    /// Compute squared distances to the origin.
    pub fn calc_r2(&mut self) {
        self.r2 = Some(self.pos.iter().map(norm2).collect());
    }

    /// Move positions and velocities into the frame of `center`.
    ///
    /// Any previously computed `r2` refers to the old origin and is dropped.
    pub fn shift_to(&mut self, center: &Center) {
        for p in &mut self.pos {
            for axis in 0..3 {
                p[axis] -= center.pos[axis];
            }
        }
        for v in &mut self.vel {
            for axis in 0..3 {
                v[axis] -= center.vel[axis];
            }
        }
        self.r2 = None;
    }

    /// Select particles by index, keeping every column that is present.
    pub fn select(&self, indices: &[usize]) -> Self {
        fn pick<T: Copy>(column: &[T], indices: &[usize]) -> Vec<T> {
            indices.iter().map(|&i| column[i]).collect()
        }

        Self {
            mass: pick(&self.mass, indices),
            pos: pick(&self.pos, indices),
            vel: pick(&self.vel, indices),
            pot: self.pot.as_deref().map(|c| pick(c, indices)),
            r2: self.r2.as_deref().map(|c| pick(c, indices)),
            density: self.density.as_deref().map(|c| pick(c, indices)),
        }
    }

    /// Select particles where `mask` is true.
    pub fn select_where(&self, mask: &[bool]) -> Result<Self, ParticleError> {
        self.check_column("mask", mask.len())?;
        let indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &keep)| keep.then_some(i))
            .collect();
        Ok(self.select(&indices))
    }

    /// Concatenate two sets. Optional columns survive only if both sides carry them.
    pub fn join(&self, other: &ParticleSet) -> Self {
        fn concat<T: Copy>(a: &[T], b: &[T]) -> Vec<T> {
            let mut out = Vec::with_capacity(a.len() + b.len());
            out.extend_from_slice(a);
            out.extend_from_slice(b);
            out
        }

        fn concat_opt(a: &Option<Vec<f64>>, b: &Option<Vec<f64>>) -> Option<Vec<f64>> {
            match (a, b) {
                (Some(a), Some(b)) => Some(concat(a, b)),
                _ => None,
            }
        }

        Self {
            mass: concat(&self.mass, &other.mass),
            pos: concat(&self.pos, &other.pos),
            vel: concat(&self.vel, &other.vel),
            pot: concat_opt(&self.pot, &other.pot),
            r2: concat_opt(&self.r2, &other.r2),
            density: concat_opt(&self.density, &other.density),
        }
    }

    /// Indices that sort the set by ascending `r2`.
    ///
    /// The sort is stable, so equal radii keep their original order.
    pub fn argsort_r2(&self) -> Result<Vec<usize>, ParticleError> {
        let r2 = self.radius_squared()?;
        let mut order: Vec<usize> = (0..r2.len()).collect();
        order.sort_by(|&a, &b| r2[a].total_cmp(&r2[b]));
        Ok(order)
    }

    /// Copy of the set sorted by ascending `r2`.
    pub fn sorted_by_r2(&self) -> Result<Self, ParticleError> {
        let order = self.argsort_r2()?;
        Ok(self.select(&order))
    }
}

#[inline]
pub(crate) fn norm2(v: &[f64; 3]) -> f64 {
    v[0] * v[0] + v[1] * v[1] + v[2] * v[2]
}
