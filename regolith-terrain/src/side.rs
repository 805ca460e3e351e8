use std::ops::{Index, IndexMut};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Top,
    Right,
    Bottom,
}

impl Side {
    pub const ALL: [Side; 4] = [Side::Left, Side::Top, Side::Right, Side::Bottom];

    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Top => Side::Bottom,
            Side::Right => Side::Left,
            Side::Bottom => Side::Top,
        }
    }

    /// Children of a node that touch this side of it.
    pub fn children(self) -> [Quadrant; 2] {
        match self {
            Side::Left => [Quadrant::Northwest, Quadrant::Southwest],
            Side::Top => [Quadrant::Northwest, Quadrant::Northeast],
            Side::Right => [Quadrant::Northeast, Quadrant::Southeast],
            Side::Bottom => [Quadrant::Southwest, Quadrant::Southeast],
        }
    }

    /// Left and right edges run along rows, top and bottom along columns.
    pub fn is_vertical(self) -> bool {
        matches!(self, Side::Left | Side::Right)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Quadrant {
    Northwest,
    Northeast,
    Southwest,
    Southeast,
}

impl Quadrant {
    pub const ALL: [Quadrant; 4] = [
        Quadrant::Northwest,
        Quadrant::Northeast,
        Quadrant::Southwest,
        Quadrant::Southeast,
    ];

    pub fn index(self) -> usize {
        match self {
            Quadrant::Northwest => 0,
            Quadrant::Northeast => 1,
            Quadrant::Southwest => 2,
            Quadrant::Southeast => 3,
        }
    }

    /// Digit used in tile keys, 1 to 4.
    pub fn digit(self) -> char {
        match self {
            Quadrant::Northwest => '1',
            Quadrant::Northeast => '2',
            Quadrant::Southwest => '3',
            Quadrant::Southeast => '4',
        }
    }

    pub fn from_digit(digit: char) -> Option<Quadrant> {
        match digit {
            '1' => Some(Quadrant::Northwest),
            '2' => Some(Quadrant::Northeast),
            '3' => Some(Quadrant::Southwest),
            '4' => Some(Quadrant::Southeast),
            _ => None,
        }
    }

    /// Signs of the offset of this quadrant's center from the parent center.
    pub fn direction(self) -> (f64, f64) {
        match self {
            Quadrant::Northwest => (-1.0, 1.0),
            Quadrant::Northeast => (1.0, 1.0),
            Quadrant::Southwest => (-1.0, -1.0),
            Quadrant::Southeast => (1.0, -1.0),
        }
    }

    /// Sibling sharing the given side, if the side is interior to the parent.
    pub fn sibling(self, side: Side) -> Option<Quadrant> {
        match (self, side) {
            (Quadrant::Northwest, Side::Right) => Some(Quadrant::Northeast),
            (Quadrant::Northwest, Side::Bottom) => Some(Quadrant::Southwest),
            (Quadrant::Northeast, Side::Left) => Some(Quadrant::Northwest),
            (Quadrant::Northeast, Side::Bottom) => Some(Quadrant::Southeast),
            (Quadrant::Southwest, Side::Top) => Some(Quadrant::Northwest),
            (Quadrant::Southwest, Side::Right) => Some(Quadrant::Southeast),
            (Quadrant::Southeast, Side::Left) => Some(Quadrant::Southwest),
            (Quadrant::Southeast, Side::Top) => Some(Quadrant::Northeast),
            _ => None,
        }
    }

    /// Child of the parent's neighbour across `side` that touches a node in
    /// this quadrant. Only quadrants on that outer side have one.
    pub fn neighbour_child(self, side: Side) -> Option<Quadrant> {
        match (side, self) {
            (Side::Left, Quadrant::Northwest) => Some(Quadrant::Northeast),
            (Side::Left, Quadrant::Southwest) => Some(Quadrant::Southeast),
            (Side::Top, Quadrant::Northwest) => Some(Quadrant::Southwest),
            (Side::Top, Quadrant::Northeast) => Some(Quadrant::Southeast),
            (Side::Right, Quadrant::Northeast) => Some(Quadrant::Northwest),
            (Side::Right, Quadrant::Southeast) => Some(Quadrant::Southwest),
            (Side::Bottom, Quadrant::Southwest) => Some(Quadrant::Northwest),
            (Side::Bottom, Quadrant::Southeast) => Some(Quadrant::Northeast),
            _ => None,
        }
    }

    /// Whether this quadrant covers the second half of the parent's edge on
    /// `side`. Edges are indexed top to bottom and left to right.
    pub fn on_far_half(self, side: Side) -> bool {
        matches!(
            (side, self),
            (Side::Left, Quadrant::Southwest)
                | (Side::Top, Quadrant::Northeast)
                | (Side::Right, Quadrant::Southeast)
                | (Side::Bottom, Quadrant::Southeast)
        )
    }
}

#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct NodeChildren<T> {
    pub northwest: T,
    pub northeast: T,
    pub southwest: T,
    pub southeast: T,
}

impl<T> NodeChildren<T> {
    pub fn from_array([northwest, northeast, southwest, southeast]: [T; 4]) -> Self {
        Self {
            northwest,
            northeast,
            southwest,
            southeast,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        [
            &self.northwest,
            &self.northeast,
            &self.southwest,
            &self.southeast,
        ]
        .into_iter()
    }
}

impl<T> Index<Quadrant> for NodeChildren<T> {
    type Output = T;

    fn index(&self, quadrant: Quadrant) -> &T {
        match quadrant {
            Quadrant::Northwest => &self.northwest,
            Quadrant::Northeast => &self.northeast,
            Quadrant::Southwest => &self.southwest,
            Quadrant::Southeast => &self.southeast,
        }
    }
}

impl<T> IndexMut<Quadrant> for NodeChildren<T> {
    fn index_mut(&mut self, quadrant: Quadrant) -> &mut T {
        match quadrant {
            Quadrant::Northwest => &mut self.northwest,
            Quadrant::Northeast => &mut self.northeast,
            Quadrant::Southwest => &mut self.southwest,
            Quadrant::Southeast => &mut self.southeast,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct NodeNeighbours<T> {
    pub left: T,
    pub top: T,
    pub right: T,
    pub bottom: T,
}

impl<T> NodeNeighbours<T> {
    pub fn from_fn(mut f: impl FnMut(Side) -> T) -> Self {
        Self {
            left: f(Side::Left),
            top: f(Side::Top),
            right: f(Side::Right),
            bottom: f(Side::Bottom),
        }
    }
}

impl<T> Index<Side> for NodeNeighbours<T> {
    type Output = T;

    fn index(&self, side: Side) -> &T {
        match side {
            Side::Left => &self.left,
            Side::Top => &self.top,
            Side::Right => &self.right,
            Side::Bottom => &self.bottom,
        }
    }
}

impl<T> IndexMut<Side> for NodeNeighbours<T> {
    fn index_mut(&mut self, side: Side) -> &mut T {
        match side {
            Side::Left => &mut self.left,
            Side::Top => &mut self.top,
            Side::Right => &mut self.right,
            Side::Bottom => &mut self.bottom,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digits_round_trip() {
        for q in Quadrant::ALL {
            assert_eq!(Quadrant::from_digit(q.digit()), Some(q));
        }
        assert_eq!(Quadrant::from_digit('0'), None);
        assert_eq!(Quadrant::from_digit('5'), None);
    }

    #[test]
    fn siblings_are_mutual() {
        for q in Quadrant::ALL {
            for side in Side::ALL {
                if let Some(s) = q.sibling(side) {
                    assert_eq!(s.sibling(side.opposite()), Some(q));
                }
            }
        }
    }

    #[test]
    fn neighbour_child_faces_back() {
        // The chosen child must be on the side of its parent facing the
        // asking node, in the same row or column.
        for side in Side::ALL {
            for q in Quadrant::ALL {
                match q.neighbour_child(side) {
                    Some(child) => {
                        assert!(side.opposite().children().contains(&child));
                        assert!(q.sibling(side).is_none());
                        let (qx, qy) = q.direction();
                        let (cx, cy) = child.direction();
                        if side.is_vertical() {
                            assert_eq!(qy, cy);
                        } else {
                            assert_eq!(qx, cx);
                        }
                    }
                    None => assert!(q.sibling(side).is_some()),
                }
            }
        }
    }

    #[test]
    fn far_half_matches_edge_order() {
        assert!(Quadrant::Southwest.on_far_half(Side::Left));
        assert!(!Quadrant::Northwest.on_far_half(Side::Left));
        assert!(Quadrant::Northeast.on_far_half(Side::Top));
        assert!(Quadrant::Southeast.on_far_half(Side::Right));
        assert!(Quadrant::Southeast.on_far_half(Side::Bottom));
        assert!(!Quadrant::Southwest.on_far_half(Side::Bottom));
    }

    #[test]
    fn containers_index_by_enum() {
        let mut children = NodeChildren::from_array([1, 2, 3, 4]);
        children[Quadrant::Southeast] = 40;
        assert_eq!(children.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3, 40]);
        let neighbours = NodeNeighbours::from_fn(|side| side == Side::Top);
        assert!(neighbours[Side::Top]);
        assert!(!neighbours[Side::Bottom]);
    }
}
