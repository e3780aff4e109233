//! Slice selection carried in the query string of a Zarr location.

use crate::error::FormatError;

/// Per-axis indices requested by `x=`, `y=` and `z=`.
///
/// `x` selects axis 0, `y` axis 1 and `z` axis 2 of the stored array.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SliceSelection {
    pub x: Option<usize>,
    pub y: Option<usize>,
    pub z: Option<usize>,
}

impl SliceSelection {
    /// Split `location` into the store URL and the requested selection.
    ///
    /// Empty parameters are treated as absent. Unrelated parameters are
    /// ignored.
    pub fn parse(location: &str) -> Result<(String, Self), FormatError> {
        let (base, query) = match location.split_once('?') {
            Some((base, query)) => (base, query),
            None => (location, ""),
        };
        let query = query.split('#').next().unwrap_or("");

        let mut selection = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let slot = match &*key {
                "x" => &mut selection.x,
                "y" => &mut selection.y,
                "z" => &mut selection.z,
                _ => continue,
            };
            if value.is_empty() {
                continue;
            }
            let index = value.trim().parse::<usize>().map_err(|_| {
                FormatError::Zarr(format!("invalid {key} index {value:?}"))
            })?;
            *slot = Some(index);
        }
        Ok((base.to_string(), selection))
    }

    /// Clamp every index to the last valid position of its axis.
    ///
    /// Requests beyond the end read the final slice instead of failing.
    pub fn clamp_to(self, shape: &[usize]) -> Self {
        let clamp = |index: Option<usize>, axis: usize| -> Option<usize> {
            let index = index?;
            match shape.get(axis) {
                Some(&extent) if extent > 0 && index >= extent => Some(extent - 1),
                _ => Some(index),
            }
        };
        Self {
            x: clamp(self.x, 0),
            y: clamp(self.y, 1),
            z: clamp(self.z, 2),
        }
    }

    /// Selection vector for an array of `rank` axes. Axes past the third are
    /// always read whole.
    pub fn to_axes(self, rank: usize) -> Vec<Option<usize>> {
        let mut axes = vec![None; rank];
        for (axis, index) in [self.x, self.y, self.z].into_iter().enumerate() {
            if axis < rank {
                axes[axis] = index;
            }
        }
        axes
    }
}
