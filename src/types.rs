//! Core ID types shared by the tracker and the loop closure detector.

/// Timestamp in nanoseconds.
pub type Timestamp = u64;

/// Unique identifier for a (key)frame.
///
/// Frame ids are assigned sequentially by the front end; the loop closure
/// detector relies on them increasing strictly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FrameId(pub u64);

impl FrameId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Number of frames from `other` up to `self`, zero if `other` is later.
    pub fn gap_from(self, other: FrameId) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "F{}", self.0)
    }
}

/// Unique identifier for a tracked landmark.
///
/// Assigned by feature detection from a monotonically increasing counter;
/// a keypoint keeps its landmark id for as long as it is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LandmarkId(pub u64);

impl LandmarkId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for LandmarkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Unknown numeric tag for a configuration enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionError {
    pub option: &'static str,
    pub value: i32,
}

impl std::fmt::Display for OptionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown {} option: {}", self.option, self.value)
    }
}

impl std::error::Error for OptionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_id_ordering() {
        assert!(FrameId::new(3) < FrameId::new(10));
        assert_eq!(FrameId::new(10).gap_from(FrameId::new(3)), 7);
        assert_eq!(FrameId::new(3).gap_from(FrameId::new(10)), 0);
    }

    #[test]
    fn test_id_display() {
        assert_eq!(format!("{}", FrameId::new(42)), "F42");
        assert_eq!(format!("{}", LandmarkId::new(123)), "L123");
    }

    #[test]
    fn test_id_as_hashmap_key() {
        use std::collections::HashMap;

        let mut map: HashMap<LandmarkId, &str> = HashMap::new();
        map.insert(LandmarkId::new(1), "first");
        map.insert(LandmarkId::new(2), "second");

        assert_eq!(map.get(&LandmarkId::new(1)), Some(&"first"));
        assert_eq!(map.get(&LandmarkId::new(3)), None);
    }
}
