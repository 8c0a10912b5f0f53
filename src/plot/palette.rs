//! Colours, cohort ordering and axis labels for the centile figures.

use plotters::style::RGBColor;

use crate::domain::Stratum;

/// Six-step `rocket_r` palette (light to dark).
pub const ROCKET_R: [RGBColor; 6] = [
    RGBColor(246, 180, 143),
    RGBColor(243, 118, 81),
    RGBColor(225, 51, 66),
    RGBColor(173, 23, 89),
    RGBColor(112, 31, 87),
    RGBColor(53, 25, 62),
];

/// Cohorts in legend order; the n-th cohort takes the n-th palette colour.
pub const COHORT_ORDER: [&str; 6] = ["MYRNA", "BCP", "ABCD", "GESTE", "BANDA", "PING"];

/// Colour for cohorts outside [`COHORT_ORDER`].
pub const UNKNOWN_COHORT: RGBColor = RGBColor(150, 150, 150);

/// Band and dashed-line colour for a single (non-stratified) fit.
pub const BAND_COLOR: RGBColor = ROCKET_R[0];
/// Median line colour for a single fit.
pub const MEDIAN_COLOR: RGBColor = ROCKET_R[5];

pub fn cohort_color(cohort: &str) -> RGBColor {
    COHORT_ORDER
        .iter()
        .position(|c| *c == cohort)
        .map(|idx| ROCKET_R[idx])
        .unwrap_or(UNKNOWN_COHORT)
}

pub fn stratum_color(stratum: Stratum) -> RGBColor {
    match stratum {
        Stratum::LowB => ROCKET_R[1],
        Stratum::HighB => ROCKET_R[4],
    }
}

/// Axis label for a metric column; unknown metrics are labelled by name.
pub fn metric_label(metric: &str) -> &str {
    match metric {
        "fa" => "FA",
        "md" => "MD (mm²/s)",
        "rd" => "RD (mm²/s)",
        "ad" => "AD (mm²/s)",
        "afd_fixel" | "afd_fixel_lowb" | "afd_fixel_highb" => "Fixel-based AFD",
        "GlobalEfficiency" => "Global Efficiency",
        "LocalEfficiency" => "Local Efficiency",
        "AverageStrength" => "Average Strength",
        "Modularity" => "Modularity",
        "AverageBetweennessCentrality" => "Average BC",
        "RichClubCoefficient" => "Rich Club Coefficient",
        other => other,
    }
}
