use std::{fmt, str::FromStr};

use bevy::math::DVec2;

use crate::{
    error::{Result, TerrainError},
    side::Quadrant,
};

pub const KEY_DELIMITER: char = '/';

/// Address of a tile in the pyramid: the chain of quadrants from the root.
/// Printed as digits joined by `/`, with the root as the empty string.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuadKey {
    path: Vec<Quadrant>,
}

impl QuadKey {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses `""`, `"1/3"` and the same with a leading delimiter.
    pub fn parse(key: &str) -> Result<Self> {
        let trimmed = key.strip_prefix(KEY_DELIMITER).unwrap_or(key);
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        let path = trimmed
            .split(KEY_DELIMITER)
            .map(|segment| {
                let mut chars = segment.chars();
                match (chars.next(), chars.next()) {
                    (Some(digit), None) => Quadrant::from_digit(digit),
                    _ => None,
                }
            })
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| TerrainError::InvalidKey(key.to_string()))?;
        Ok(Self { path })
    }

    pub fn level(&self) -> usize {
        self.path.len()
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// Quadrant of this tile within its parent, None for the root.
    pub fn quadrant(&self) -> Option<Quadrant> {
        self.path.last().copied()
    }

    pub fn quadrants(&self) -> &[Quadrant] {
        &self.path
    }

    pub fn child(&self, quadrant: Quadrant) -> QuadKey {
        let mut path = Vec::with_capacity(self.path.len() + 1);
        path.extend_from_slice(&self.path);
        path.push(quadrant);
        QuadKey { path }
    }

    pub fn children(&self) -> [QuadKey; 4] {
        Quadrant::ALL.map(|q| self.child(q))
    }

    pub fn parent(&self) -> Option<QuadKey> {
        let (_, rest) = self.path.split_last()?;
        Some(QuadKey {
            path: rest.to_vec(),
        })
    }

    /// True for the key itself and every key below it.
    pub fn starts_with(&self, prefix: &QuadKey) -> bool {
        self.path.starts_with(&prefix.path)
    }

    pub fn is_ancestor_of(&self, other: &QuadKey) -> bool {
        other.level() > self.level() && other.starts_with(self)
    }

    /// Center of the tile in landscape coordinates, with the landscape
    /// centered on the origin.
    pub fn center(&self, world_width: f64, world_length: f64) -> DVec2 {
        let mut half = DVec2::new(world_width, world_length) / 2.0;
        let mut center = DVec2::ZERO;
        for quadrant in &self.path {
            half /= 2.0;
            let (dx, dy) = quadrant.direction();
            center += DVec2::new(dx * half.x, dy * half.y);
        }
        center
    }
}

impl fmt::Display for QuadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, quadrant) in self.path.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", KEY_DELIMITER)?;
            }
            write!(f, "{}", quadrant.digit())?;
        }
        Ok(())
    }
}

impl FromStr for QuadKey {
    type Err = TerrainError;

    fn from_str(s: &str) -> Result<Self> {
        QuadKey::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> QuadKey {
        QuadKey::parse(s).unwrap()
    }

    #[test]
    fn root_is_empty() {
        let root = QuadKey::root();
        assert_eq!(root.to_string(), "");
        assert_eq!(root.level(), 0);
        assert!(root.parent().is_none());
        assert!(root.quadrant().is_none());
        assert_eq!(key(""), root);
        assert_eq!(key("/"), root);
    }

    #[test]
    fn level_is_segment_count() {
        for s in ["1", "1/3", "4/4/2", "2/1/3/4/1"] {
            assert_eq!(key(s).level(), s.split('/').count());
            assert_eq!(key(s).to_string(), s);
        }
    }

    #[test]
    fn leading_delimiter_is_accepted() {
        assert_eq!(key("/1/3"), key("1/3"));
    }

    #[test]
    fn child_and_parent_round_trip() {
        let parent = key("2/4");
        for q in Quadrant::ALL {
            let child = parent.child(q);
            assert_eq!(child.to_string(), format!("2/4/{}", q.digit()));
            assert_eq!(child.parent(), Some(parent.clone()));
            assert_eq!(child.quadrant(), Some(q));
            assert_eq!(key(&child.to_string()), child);
        }
        assert_eq!(QuadKey::root().child(Quadrant::Southwest).to_string(), "3");
    }

    #[test]
    fn rejects_malformed_keys() {
        for s in ["5", "1//2", "12", "a", "1/", "1/0"] {
            assert!(matches!(QuadKey::parse(s), Err(TerrainError::InvalidKey(_))), "{}", s);
        }
    }

    #[test]
    fn prefixes() {
        assert!(key("1/2/3").starts_with(&key("1/2")));
        assert!(key("1/2").starts_with(&key("1/2")));
        assert!(!key("1/2").starts_with(&key("1/2/3")));
        assert!(key("1").is_ancestor_of(&key("1/4")));
        assert!(!key("1").is_ancestor_of(&key("1")));
        assert!(QuadKey::root().is_ancestor_of(&key("3")));
    }

    #[test]
    fn centers_follow_quadrants() {
        assert_eq!(key("1").center(8.0, 4.0), DVec2::new(-2.0, 1.0));
        assert_eq!(key("4").center(8.0, 4.0), DVec2::new(2.0, -1.0));
        assert_eq!(key("1/4").center(8.0, 4.0), DVec2::new(-1.0, 0.5));
        assert_eq!(QuadKey::root().center(8.0, 4.0), DVec2::ZERO);
    }
}
