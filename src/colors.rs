use std::collections::{BTreeMap, HashMap};

/// Series colors, handed out in order and then cycled.
pub const PALETTE: [&str; 10] = [
    "#5B8FF9", "#5AD8A6", "#5D7092", "#F6BD16", "#E8684A", "#6DC8EC", "#9270CA", "#FF9D4D",
    "#269A99", "#FF99C3",
];

/// Stable color per series name for the lifetime of one view.
/// A name keeps the color it was first given, even after it stops appearing.
#[derive(Debug, Default, Clone)]
pub struct ColorRegistry {
    assigned: HashMap<String, &'static str>,
}

impl ColorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn color_for(&mut self, name: &str) -> &'static str {
        if let Some(color) = self.assigned.get(name) {
            return *color;
        }
        let color = PALETTE[self.assigned.len() % PALETTE.len()];
        self.assigned.insert(name.to_string(), color);
        color
    }

    /// Colors for `names`, assigning new ones in iteration order.
    pub fn colors_for<'a, I>(&mut self, names: I) -> BTreeMap<String, String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        names
            .into_iter()
            .map(|name| (name.to_string(), self.color_for(name).to_string()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.assigned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }
}
