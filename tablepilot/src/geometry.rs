//! Table geometry in canvas coordinates.
//!
//! A table's box is positioned relative to the canvas origin. Every button and
//! readout box is stored relative to the table box origin, so moving the table
//! box translates the whole layout at once.

use serde::{Deserialize, Serialize};

/// Fixed offset between the canvas' rendered position and where it accepts clicks.
pub const TRANSFORM_OFFSET: Point = Point { x: 17, y: 0 };

/// Default drift tolerance before the layout is translated (pixels, per axis)
pub const DEFAULT_DRIFT_TOLERANCE_PX: u32 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }

    pub fn add(self, other: Point) -> Self {
        self.offset(other.x, other.y)
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Axis-aligned rectangle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn translate(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            ..self
        }
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x
            && point.y >= self.y
            && i64::from(point.x) < i64::from(self.x) + i64::from(self.width)
            && i64::from(point.y) < i64::from(self.y) + i64::from(self.height)
    }

    /// Whether a region fits inside a `width` x `height` box anchored at (0, 0).
    fn fits_within(&self, width: u32, height: u32) -> bool {
        self.x >= 0
            && self.y >= 0
            && i64::from(self.x) + i64::from(self.width) <= i64::from(width)
            && i64::from(self.y) + i64::from(self.height) <= i64::from(height)
    }
}

/// Clickable targets on a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Button {
    Blue,
    Red,
    Confirm,
    Cancel,
}

impl std::fmt::Display for Button {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Button::Blue => write!(f, "blue"),
            Button::Red => write!(f, "red"),
            Button::Confirm => write!(f, "confirm"),
            Button::Cancel => write!(f, "cancel"),
        }
    }
}

/// Layout of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableGeometry {
    /// Table box, relative to the canvas origin
    pub table: Region,

    /// Blue team button, relative to the table box
    pub blue_button: Point,

    /// Red team button, relative to the table box
    pub red_button: Point,

    /// Confirm button, relative to the table box
    pub confirm_button: Point,

    /// Cancel button, relative to the table box
    pub cancel_button: Point,

    /// Countdown timer readout, relative to the table box
    pub timer: Region,

    /// Blue score readout, relative to the table box
    pub blue_score: Region,

    /// Red score readout, relative to the table box
    pub red_score: Region,
}

impl TableGeometry {
    /// Validate that every relative element lies inside the table box
    pub fn validate(&self) -> Result<(), String> {
        if self.table.is_empty() {
            return Err("Table region must have a non-zero size".to_string());
        }

        let bounds = Region::new(0, 0, self.table.width, self.table.height);
        for (name, point) in [
            ("blue_button", self.blue_button),
            ("red_button", self.red_button),
            ("confirm_button", self.confirm_button),
            ("cancel_button", self.cancel_button),
        ] {
            if !bounds.contains(point) {
                return Err(format!(
                    "{name} {point} lies outside the {}x{} table region",
                    self.table.width, self.table.height
                ));
            }
        }

        for (name, region) in [
            ("timer", self.timer),
            ("blue_score", self.blue_score),
            ("red_score", self.red_score),
        ] {
            if region.is_empty() {
                return Err(format!("{name} region must have a non-zero size"));
            }
            if !region.fits_within(self.table.width, self.table.height) {
                return Err(format!("{name} region lies outside the table region"));
            }
        }

        Ok(())
    }

    pub fn button(&self, button: Button) -> Point {
        match button {
            Button::Blue => self.blue_button,
            Button::Red => self.red_button,
            Button::Confirm => self.confirm_button,
            Button::Cancel => self.cancel_button,
        }
    }

    /// Absolute click position for a button.
    ///
    /// # Arguments
    ///
    /// * `canvas` - Canvas origin on the page
    /// * `button` - Target button
    ///
    /// # Returns
    ///
    /// * `Point` - canvas origin + table origin + button offset + [`TRANSFORM_OFFSET`]
    pub fn click_point(&self, canvas: Point, button: Button) -> Point {
        canvas
            .add(self.table.origin())
            .add(self.button(button))
            .add(TRANSFORM_OFFSET)
    }

    /// Table box in canvas coordinates (what gets captured)
    pub fn capture_region(&self) -> Region {
        self.table
    }

    /// Displacement of an observed anchor from the stored table origin, if it
    /// exceeds `tolerance` on either axis.
    pub fn drift(&self, observed: Point, tolerance: u32) -> Option<(i32, i32)> {
        let dx = observed.x - self.table.x;
        let dy = observed.y - self.table.y;
        if dx.unsigned_abs() > tolerance || dy.unsigned_abs() > tolerance {
            Some((dx, dy))
        } else {
            None
        }
    }

    /// Move the table box; relative elements follow.
    pub fn translate(&mut self, dx: i32, dy: i32) {
        self.table = self.table.translate(dx, dy);
    }
}
