use std::{cmp::Ordering, fmt, num::Wrapping};

/// TCP sequence number with modulo-2^32 arithmetic and wraparound-aware ordering.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy, Hash)]
pub struct Seq32 {
    n: u32,
}

impl Seq32 {
    pub const fn from_u32(n: u32) -> Self {
        Seq32 { n }
    }

    pub const fn to_u32(self) -> u32 {
        self.n
    }

    #[must_use]
    pub fn add_usize(self, n: usize) -> Self {
        let s = Wrapping(self.n) + Wrapping(n as u32);
        Seq32 { n: s.0 }
    }

    /// Distance from `other` up to `self`.
    #[must_use]
    pub fn sub(self, other: Seq32) -> usize {
        let s = Wrapping(self.n) - Wrapping(other.n);
        s.0 as usize
    }

    pub fn advance(&mut self, n: usize) {
        *self = self.add_usize(n);
    }
}

impl From<u32> for Seq32 {
    fn from(n: u32) -> Self {
        Seq32::from_u32(n)
    }
}

impl fmt::Display for Seq32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.n)
    }
}

impl PartialOrd for Seq32 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Seq32 {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.n.cmp(&other.n) {
            Ordering::Less => match other.n - self.n <= u32::MAX / 2 {
                true => Ordering::Less,
                false => Ordering::Greater,
            },
            Ordering::Equal => Ordering::Equal,
            Ordering::Greater => match self.n - other.n <= u32::MAX / 2 {
                true => Ordering::Greater,
                false => Ordering::Less,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Seq32;

    #[test]
    fn cmp_wraparound() {
        let a = Seq32::from_u32(u32::MAX);
        let b = Seq32::from_u32(u32::MIN);
        assert!(a < b);
    }

    #[test]
    fn cmp_far() {
        let a = Seq32::from_u32(0);
        let b = Seq32::from_u32(i32::MAX as u32);
        let c = Seq32::from_u32(i32::MAX as u32 + 1);
        assert!(a < b);
        assert!(c < a);
    }

    #[test]
    fn add_wraparound() {
        let a = Seq32::from_u32(u32::MAX - 1);
        assert_eq!(a.add_usize(3).to_u32(), 1);
    }

    #[test]
    fn advance_by_payload() {
        let mut a = Seq32::from_u32(1000);
        a.advance(24);
        a.advance(1);
        assert_eq!(a.to_u32(), 1025);
        assert!(Seq32::from_u32(1000) < a);
    }

    #[test]
    fn sub_wraparound() {
        let a = Seq32::from_u32(0);
        let b = Seq32::from_u32(u32::MAX);
        assert_eq!(a.sub(b), 1);
        assert_eq!(b.sub(b), 0);
    }
}
