//! PNG centile figures.
//!
//! - y-axis padding rule (`ylim`)
//! - colours, cohort order and axis labels (`palette`)
//! - font lookup and registration (`fonts`)
//! - panel assembly and drawing (`figure`)

pub mod figure;
pub mod fonts;
pub mod palette;
pub mod ylim;

pub use figure::{CentileOverlay, FigureStyle, Observation, Panel, build_panels, render_figure};
pub use fonts::{FontSource, resolve_font};
