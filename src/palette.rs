//! Colors used by the map figures.

/// Qualitative palette cycled across top routes (ColorBrewer Set3).
pub const SET3: [&str; 12] = [
    "rgb(141,211,199)",
    "rgb(255,255,179)",
    "rgb(190,186,218)",
    "rgb(251,128,114)",
    "rgb(128,177,211)",
    "rgb(253,180,98)",
    "rgb(179,222,105)",
    "rgb(252,205,229)",
    "rgb(217,217,217)",
    "rgb(188,128,189)",
    "rgb(204,235,197)",
    "rgb(255,237,111)",
];

/// Sequential scale for pickup density.
pub const DENSITY_SCALE: &str = "YlOrRd";

/// Fill for zones touched by a displayed route.
pub const TOUCHED_ZONE_FILL: &str = "#A0A0A0";

pub const MAP_STYLE: &str = "carto-positron";

pub fn route_color(index: usize) -> &'static str {
    SET3[index % SET3.len()]
}
