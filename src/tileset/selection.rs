//! Per-tile record of the previous traversal's decision

/// What the traversal decided for a tile in a given frame
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SelectionResult {
    /// Not visited, or the record is from an older frame
    #[default]
    None,
    /// Off-screen or excluded
    Culled,
    /// In the render list
    Rendered,
    /// Replaced by descendants
    Refined,
}

/// Selection record stamped with the frame that produced it
///
/// Reads are frame-checked: asking about a frame other than the stored one
/// answers `None`, so stale records never leak into a new frame. The
/// `kicked` flag marks a tile whose subtree was evicted from the render
/// list in favor of an ancestor; it accompanies `Rendered` (the evicted
/// tile itself) and `Refined` (the ancestors between it and the kicker).
#[derive(Clone, Copy, Debug, Default)]
pub struct TileSelectionState {
    frame_number: u32,
    result: SelectionResult,
    kicked: bool,
}

impl TileSelectionState {
    pub fn new(frame_number: u32, result: SelectionResult) -> Self {
        Self {
            frame_number,
            result,
            kicked: false,
        }
    }

    /// The decision ignoring any later kick
    pub fn original_result(&self, frame_number: u32) -> SelectionResult {
        if self.frame_number != frame_number {
            return SelectionResult::None;
        }
        self.result
    }

    /// Whether the tile actually made it to the render list this frame
    pub fn was_rendered(&self, frame_number: u32) -> bool {
        self.frame_number == frame_number && self.result == SelectionResult::Rendered && !self.kicked
    }

    pub fn was_kicked(&self, frame_number: u32) -> bool {
        self.frame_number == frame_number && self.kicked
    }

    /// Evict this tile's selection in favor of an ancestor
    pub fn kick(&mut self) {
        if matches!(
            self.result,
            SelectionResult::Rendered | SelectionResult::Refined
        ) {
            self.kicked = true;
        }
    }
}
