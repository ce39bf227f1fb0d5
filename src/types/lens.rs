//! Lens identity and per-lens storage

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};

/// One of the two independent peripherals that make up a pair of glasses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lens {
    Left,
    Right,
}

impl Lens {
    /// Both lenses in a stable order (left first).
    pub const ALL: [Lens; 2] = [Lens::Left, Lens::Right];

    /// The opposite lens.
    pub fn other(self) -> Lens {
        match self {
            Lens::Left => Lens::Right,
            Lens::Right => Lens::Left,
        }
    }

    /// Single-letter label used in console lines.
    pub fn short_label(self) -> &'static str {
        match self {
            Lens::Left => "L",
            Lens::Right => "R",
        }
    }
}

impl fmt::Display for Lens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lens::Left => f.write_str("left"),
            Lens::Right => f.write_str("right"),
        }
    }
}

/// Destination of an outbound write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Left,
    Right,
    Both,
}

impl Target {
    /// Lenses addressed by this target, left first.
    pub fn lenses(self) -> &'static [Lens] {
        match self {
            Target::Left => &[Lens::Left],
            Target::Right => &[Lens::Right],
            Target::Both => &Lens::ALL,
        }
    }

    pub fn includes(self, lens: Lens) -> bool {
        self.lenses().contains(&lens)
    }
}

impl From<Lens> for Target {
    fn from(lens: Lens) -> Self {
        match lens {
            Lens::Left => Target::Left,
            Lens::Right => Target::Right,
        }
    }
}

/// A value stored once per lens, indexable by [`Lens`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerLens<T> {
    pub left: T,
    pub right: T,
}

impl<T> PerLens<T> {
    pub fn new(left: T, right: T) -> Self {
        Self { left, right }
    }

    /// Build both entries from a per-lens constructor.
    pub fn from_fn(mut f: impl FnMut(Lens) -> T) -> Self {
        Self { left: f(Lens::Left), right: f(Lens::Right) }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Lens, &T)> {
        [(Lens::Left, &self.left), (Lens::Right, &self.right)].into_iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Lens, &mut T)> {
        [(Lens::Left, &mut self.left), (Lens::Right, &mut self.right)].into_iter()
    }
}

impl<T> Index<Lens> for PerLens<T> {
    type Output = T;

    fn index(&self, lens: Lens) -> &T {
        match lens {
            Lens::Left => &self.left,
            Lens::Right => &self.right,
        }
    }
}

impl<T> IndexMut<Lens> for PerLens<T> {
    fn index_mut(&mut self, lens: Lens) -> &mut T {
        match lens {
            Lens::Left => &mut self.left,
            Lens::Right => &mut self.right,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_target_covers_each_lens_once() {
        assert_eq!(Target::Both.lenses(), &[Lens::Left, Lens::Right]);
        assert!(Target::Left.includes(Lens::Left));
        assert!(!Target::Left.includes(Lens::Right));
        assert_eq!(Target::from(Lens::Right), Target::Right);
    }

    #[test]
    fn per_lens_indexing_and_iteration() {
        let mut counts = PerLens::from_fn(|lens| if lens == Lens::Left { 1 } else { 2 });
        counts[Lens::Right] += 10;
        assert_eq!(counts[Lens::Left], 1);
        assert_eq!(counts[Lens::Right], 12);
        let collected: Vec<_> = counts.iter().map(|(lens, v)| (lens, *v)).collect();
        assert_eq!(collected, vec![(Lens::Left, 1), (Lens::Right, 12)]);
    }

    #[test]
    fn lens_display_is_lowercase() {
        assert_eq!(Lens::Left.to_string(), "left");
        assert_eq!(Lens::Right.other(), Lens::Left);
        assert_eq!(Lens::Right.short_label(), "R");
    }
}
