//! Centile figure composition.
//!
//! Layout: two rows by `max(2, n_metrics)` columns plus a legend column on
//! the right. The top row scatters the raw observations (colour = cohort,
//! marker = sex); the bottom row draws the fitted 5th/50th/95th centiles with
//! a shaded 5–95 band. A stratified metric gets one band per acquisition
//! stratum.
//!
//! All panel data (observations, limits, centile tables) is prepared by
//! [`build_panels`]; [`render_figure`] only draws.

use std::collections::BTreeMap;
use std::error::Error;
use std::path::Path;

use plotters::coord::Shift;
use plotters::coord::types::RangedCoordf64;
use plotters::prelude::*;
use plotters::series::DashedLineSeries;

use crate::domain::{AGE_COLUMN, COHORT_COLUMN, SEX_COLUMN, Sex, StratificationRule, Stratum};
use crate::error::AppError;
use crate::io::centiles::CentileTable;
use crate::io::table::ObservationTable;
use crate::partition::Partition;
use crate::plot::fonts::FontSource;
use crate::plot::palette::{
    BAND_COLOR, COHORT_ORDER, MEDIAN_COLOR, cohort_color, metric_label, stratum_color,
};
use crate::plot::ylim::{YLimits, padded_limits};

/// Lower, median and upper centile levels drawn on every panel.
pub const LOWER_PROB: f64 = 0.05;
pub const MEDIAN_PROB: f64 = 0.5;
pub const UPPER_PROB: f64 = 0.95;

/// Ages always shown on the x axis (years).
const MIN_AGE_SPAN: (f64, f64) = (0.0, 18.0);

type Area<'a> = DrawingArea<BitMapBackend<'a>, Shift>;
type Chart<'a, 'b> = ChartContext<'a, BitMapBackend<'b>, Cartesian2d<RangedCoordf64, RangedCoordf64>>;

/// Rendering options for one figure.
#[derive(Debug, Clone)]
pub struct FigureStyle {
    pub font: FontSource,
    pub width: u32,
    pub height: u32,
}

/// One raw observation in the scatter row.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub age: f64,
    pub value: f64,
    pub cohort: String,
    pub sex: Sex,
}

/// Fitted centiles drawn in the bottom row.
#[derive(Debug, Clone)]
pub enum CentileOverlay {
    Single(CentileTable),
    Stratified(Vec<(Stratum, CentileTable)>),
}

/// Everything needed to draw one figure column.
#[derive(Debug, Clone)]
pub struct Panel {
    pub metric: String,
    pub observations: Vec<Observation>,
    pub limits: YLimits,
    pub overlay: CentileOverlay,
}

impl Panel {
    pub fn is_stratified(&self) -> bool {
        matches!(self.overlay, CentileOverlay::Stratified(_))
    }
}

/// Observations of `metric` with their cohort and sex.
pub fn observations(table: &ObservationTable, metric: &str) -> Result<Vec<Observation>, AppError> {
    let ages = table.numeric_column(AGE_COLUMN)?;
    let values = table.numeric_column(metric)?;
    let cohorts = table.text_column(COHORT_COLUMN)?;
    let sexes = table.text_column(SEX_COLUMN)?;

    Ok(ages
        .into_iter()
        .zip(values)
        .zip(cohorts.into_iter().zip(sexes))
        .filter_map(|((age, value), (cohort, sex))| {
            Some(Observation {
                age: age?,
                value: value?,
                cohort: cohort.to_string(),
                sex: Sex::from_label(sex),
            })
        })
        .collect())
}

/// Assemble one panel per metric from the partition and its centile results.
pub fn build_panels(
    partition: &Partition,
    metrics: &[String],
    centiles: &BTreeMap<String, CentileTable>,
    rule: Option<&StratificationRule>,
) -> Result<Vec<Panel>, AppError> {
    let lookup = |name: &str| -> Result<CentileTable, AppError> {
        let table = centiles.get(name).ok_or_else(|| {
            AppError::new(
                4,
                format!(
                    "Partition {}: no centile results for {name} (expected {name}{}).",
                    partition.key,
                    crate::domain::CENTILES_SUFFIX
                ),
            )
        })?;
        for prob in [LOWER_PROB, MEDIAN_PROB, UPPER_PROB] {
            table.require_column(prob)?;
        }
        Ok(table.clone())
    };

    metrics
        .iter()
        .map(|metric| {
            let observations = observations(&partition.table, metric)?;
            let limits = padded_limits(observations.iter().map(|o| o.value)).map_err(|e| {
                AppError::new(4, format!("Partition {}, {metric}: {}", partition.key, e.message()))
            })?;

            let stratified = rule.is_some_and(|r| r.applies_to(metric));
            if stratified && partition.strata.is_empty() {
                return Err(AppError::new(
                    4,
                    format!(
                        "Partition {}: {metric} is stratified but the partition has no strata.",
                        partition.key
                    ),
                ));
            }
            let overlay = if stratified {
                let strata = partition
                    .strata
                    .iter()
                    .map(|s| lookup(&s.metric).map(|t| (s.stratum, t)))
                    .collect::<Result<Vec<_>, _>>()?;
                CentileOverlay::Stratified(strata)
            } else {
                CentileOverlay::Single(lookup(metric)?)
            };

            Ok(Panel {
                metric: metric.clone(),
                observations,
                limits,
                overlay,
            })
        })
        .collect()
}

/// Draw `panels` to a PNG at `path`.
pub fn render_figure(path: &Path, panels: &[Panel], style: &FigureStyle) -> Result<(), AppError> {
    if panels.is_empty() {
        return Err(AppError::new(4, "Nothing to plot: no metric panels."));
    }
    style.font.register()?;
    draw_figure(path, panels, style).map_err(|e| {
        AppError::new(4, format!("Failed to render figure '{}': {e}", path.display()))
    })?;
    log::info!("Wrote {}", path.display());
    Ok(())
}

fn draw_figure(path: &Path, panels: &[Panel], style: &FigureStyle) -> Result<(), Box<dyn Error>> {
    let family = style.font.family.as_str();
    let root = BitMapBackend::new(path, (style.width, style.height)).into_drawing_area();
    root.fill(&WHITE)?;

    let legend_width = (style.width as f64 * 0.14) as u32;
    let (plots, legend) = root.split_horizontally(style.width.saturating_sub(legend_width));

    let ncols = panels.len().max(2);
    let cells = plots.split_evenly((2, ncols));
    let x_range = age_range(panels);

    for (col, panel) in panels.iter().enumerate() {
        draw_scatter(&cells[col], panel, x_range, family)?;
        draw_centiles(&cells[ncols + col], panel, x_range, family)?;
    }

    let letter = text(family, 36.0);
    cells[0].draw(&Text::new("a", (6, 4), letter.clone()))?;
    cells[ncols].draw(&Text::new("b", (6, 4), letter))?;

    draw_legend(&legend, panels, family)?;
    root.present()?;
    Ok(())
}

fn text(family: &str, size: f64) -> TextStyle<'_> {
    (family, size).into_font().color(&BLACK)
}

/// X range covering 0–18 years and every plotted age.
fn age_range(panels: &[Panel]) -> (f64, f64) {
    let mut lo = MIN_AGE_SPAN.0;
    let mut hi = MIN_AGE_SPAN.1;
    for panel in panels {
        let obs = panel.observations.iter().map(|o| o.age);
        let fitted: Vec<f64> = match &panel.overlay {
            CentileOverlay::Single(t) => t.ages.clone(),
            CentileOverlay::Stratified(s) => s.iter().flat_map(|(_, t)| t.ages.iter().copied()).collect(),
        };
        for age in obs.chain(fitted) {
            lo = lo.min(age.floor());
            hi = hi.max(age.ceil());
        }
    }
    (lo, hi)
}

fn build_chart<'a, 'b>(
    area: &'a Area<'b>,
    x_range: (f64, f64),
    limits: YLimits,
) -> Result<Chart<'a, 'b>, Box<dyn Error>> {
    Ok(ChartBuilder::on(area)
        .margin(12)
        .margin_left(48)
        .x_label_area_size(48)
        .y_label_area_size(96)
        .build_cartesian_2d(x_range.0..x_range.1, limits.min..limits.max)?)
}

fn draw_mesh(chart: &mut Chart<'_, '_>, panel: &Panel, x_desc: &str, x_range: (f64, f64), family: &str) -> Result<(), Box<dyn Error>> {
    let limits = panel.limits;
    let fmt_x = |v: &f64| format!("{v:.0}");
    let fmt_y = move |v: &f64| {
        if limits.use_scientific() {
            format!("{v:.1e}")
        } else {
            format!("{:.*}", limits.decimals as usize, v)
        }
    };
    let x_ticks = ((x_range.1 - x_range.0) / 2.0).round() as usize + 1;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .disable_y_mesh()
        .x_labels(x_ticks)
        .y_labels(6)
        .x_label_formatter(&fmt_x)
        .y_label_formatter(&fmt_y)
        .x_desc(x_desc)
        .y_desc(metric_label(&panel.metric))
        .label_style(text(family, 18.0))
        .axis_desc_style(text(family, 22.0))
        .axis_style(BLACK.stroke_width(2))
        .draw()?;
    Ok(())
}

fn draw_scatter(area: &Area<'_>, panel: &Panel, x_range: (f64, f64), family: &str) -> Result<(), Box<dyn Error>> {
    let mut chart = build_chart(area, x_range, panel.limits)?;
    draw_mesh(&mut chart, panel, "", x_range, family)?;

    let of_sex = |sex: Sex| panel.observations.iter().filter(move |o| o.sex == sex);
    chart.draw_series(
        of_sex(Sex::Male).map(|o| Circle::new((o.age, o.value), 5, cohort_color(&o.cohort).filled())),
    )?;
    chart.draw_series(
        of_sex(Sex::Female).map(|o| Cross::new((o.age, o.value), 5, cohort_color(&o.cohort).stroke_width(3))),
    )?;
    chart.draw_series(
        of_sex(Sex::Other)
            .map(|o| TriangleMarker::new((o.age, o.value), 5, cohort_color(&o.cohort).filled())),
    )?;
    Ok(())
}

fn draw_centiles(area: &Area<'_>, panel: &Panel, x_range: (f64, f64), family: &str) -> Result<(), Box<dyn Error>> {
    let mut chart = build_chart(area, x_range, panel.limits)?;
    draw_mesh(&mut chart, panel, "Age (years)", x_range, family)?;

    match &panel.overlay {
        CentileOverlay::Single(table) => {
            draw_band(&mut chart, table, panel.limits, BAND_COLOR, MEDIAN_COLOR, 0.4)?
        }
        CentileOverlay::Stratified(strata) => {
            for (stratum, table) in strata {
                let color = stratum_color(*stratum);
                draw_band(&mut chart, table, panel.limits, color, color, 0.2)?;
            }
        }
    }
    Ok(())
}

fn draw_band(
    chart: &mut Chart<'_, '_>,
    table: &CentileTable,
    limits: YLimits,
    band: RGBColor,
    median: RGBColor,
    alpha: f64,
) -> Result<(), Box<dyn Error>> {
    // Curves are held inside the observation-based limits.
    let series = |prob: f64| -> Result<Vec<(f64, f64)>, AppError> {
        Ok(table
            .require_column(prob)?
            .into_iter()
            .map(|(age, v)| (age, v.clamp(limits.min, limits.max)))
            .collect())
    };
    let lower = series(LOWER_PROB)?;
    let mid = series(MEDIAN_PROB)?;
    let upper = series(UPPER_PROB)?;

    let mut outline = lower.clone();
    outline.extend(upper.iter().rev().copied());
    chart.draw_series(std::iter::once(Polygon::new(outline, band.mix(alpha).filled())))?;

    for curve in [&lower, &upper] {
        chart.draw_series(DashedLineSeries::new(
            curve.iter().copied(),
            12,
            8,
            band.stroke_width(3),
        ))?;
    }
    chart.draw_series(LineSeries::new(mid.iter().copied(), median.stroke_width(3)))?;
    Ok(())
}

fn draw_legend(area: &Area<'_>, panels: &[Panel], family: &str) -> Result<(), Box<dyn Error>> {
    let (_, height) = area.dim_in_pixel();
    let row = ((height as f64 / 28.0) as i32).max(18);
    let x = 10;
    let label_x = x + 56;
    let title = text(family, 24.0);
    let label = text(family, 20.0);
    let mut y = (height as f64 * 0.1) as i32;

    let put_label = |y: i32, s: &str| area.draw(&Text::new(s.to_string(), (label_x, y - 10), label.clone()));

    // Sex
    area.draw(&Text::new("Sex", (x, y - 12), title.clone()))?;
    y += row;
    area.draw(&Circle::new((x + 20, y), 7, BLACK.filled()))?;
    put_label(y, Sex::Male.display_name())?;
    y += row;
    area.draw(&Cross::new((x + 20, y), 7, BLACK.stroke_width(3)))?;
    put_label(y, Sex::Female.display_name())?;
    let has_other = panels
        .iter()
        .any(|p| p.observations.iter().any(|o| o.sex == Sex::Other));
    if has_other {
        y += row;
        area.draw(&TriangleMarker::new((x + 20, y), 7, BLACK.filled()))?;
        put_label(y, Sex::Other.display_name())?;
    }

    // Cohort
    y += row * 2;
    area.draw(&Text::new("Cohort", (x, y - 12), title.clone()))?;
    for cohort in COHORT_ORDER {
        y += row;
        area.draw(&Circle::new((x + 20, y), 7, cohort_color(cohort).filled()))?;
        area.draw(&Circle::new((x + 20, y), 7, RGBColor(105, 105, 105).stroke_width(1)))?;
        put_label(y, cohort)?;
    }

    // Centile meaning
    y += row * 2;
    area.draw(&PathElement::new(vec![(x, y), (x + 40, y)], BLACK.stroke_width(4)))?;
    put_label(y, "Median")?;
    y += row;
    area.draw(&PathElement::new(vec![(x, y), (x + 16, y)], BLACK.stroke_width(4)))?;
    area.draw(&PathElement::new(vec![(x + 24, y), (x + 40, y)], BLACK.stroke_width(4)))?;
    put_label(y, "5th/95th Percentiles")?;

    // Acquisition strata
    if panels.iter().any(Panel::is_stratified) {
        y += row * 2;
        for stratum in [Stratum::HighB, Stratum::LowB] {
            area.draw(&PathElement::new(
                vec![(x, y), (x + 40, y)],
                stratum_color(stratum).stroke_width(4),
            ))?;
            put_label(y, stratum.display_name())?;
            y += row;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::partition_by_bundle;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn centile_table(metric: &str) -> CentileTable {
        let mut rows = Vec::new();
        for age in [0.0, 6.0, 12.0, 18.0] {
            rows.push((age, LOWER_PROB, Some(0.3)));
            rows.push((age, MEDIAN_PROB, Some(0.4)));
            rows.push((age, UPPER_PROB, Some(0.5)));
        }
        CentileTable::from_long(metric, &rows).unwrap()
    }

    fn partition(rule: Option<&StratificationRule>) -> Partition {
        let headers = strings(&["bundle", "fa", "afd_fixel", "age", "sex", "cohort"]);
        let rows = [
            ["AF_L", "0.41", "0.30", "2", "M", "BCP"],
            ["AF_L", "0.52", "0.35", "9.5", "F", "PING"],
            ["AF_L", "0.47", "0.33", "21", "x", "ABCD"],
        ]
        .iter()
        .map(|r| strings(r))
        .collect();
        let table = ObservationTable::from_rows(headers, rows).unwrap();
        let metrics = strings(&["fa", "afd_fixel"]);
        partition_by_bundle(&table, None, &metrics, rule)
            .unwrap()
            .remove(0)
    }

    #[test]
    fn observations_carry_cohort_and_sex() {
        let part = partition(None);
        let obs = observations(&part.table, "fa").unwrap();
        assert_eq!(obs.len(), 3);
        assert_eq!(obs[1].sex, Sex::Female);
        assert_eq!(obs[2].sex, Sex::Other);
        assert_eq!(obs[0].cohort, "BCP");
    }

    #[test]
    fn panels_use_strata_for_the_stratified_metric() {
        let rule = StratificationRule::default();
        let part = partition(Some(&rule));
        let mut centiles = BTreeMap::new();
        for name in ["fa", "afd_fixel_lowb", "afd_fixel_highb"] {
            centiles.insert(name.to_string(), centile_table(name));
        }

        let panels = build_panels(&part, &strings(&["fa", "afd_fixel"]), &centiles, Some(&rule)).unwrap();
        assert_eq!(panels.len(), 2);
        assert!(!panels[0].is_stratified());
        match &panels[1].overlay {
            CentileOverlay::Stratified(strata) => {
                let kinds: Vec<_> = strata.iter().map(|(s, _)| *s).collect();
                assert_eq!(kinds, [Stratum::LowB, Stratum::HighB]);
            }
            CentileOverlay::Single(_) => panic!("expected stratified overlay"),
        }
        for obs in &panels[0].observations {
            assert!(panels[0].limits.contains(obs.value));
        }
    }

    #[test]
    fn stratified_metric_never_falls_back_to_a_single_band() {
        let rule = StratificationRule::default();
        let part = partition(None);
        let mut centiles = BTreeMap::new();
        centiles.insert("afd_fixel".to_string(), centile_table("afd_fixel"));

        let err = build_panels(&part, &strings(&["afd_fixel"]), &centiles, Some(&rule)).unwrap_err();
        assert_eq!(err.exit_code(), 4);
        assert!(err.message().contains("AF_L"));
    }

    #[test]
    fn missing_centile_results_are_reported() {
        let part = partition(None);
        let centiles = BTreeMap::new();
        let err = build_panels(&part, &strings(&["fa"]), &centiles, None).unwrap_err();
        assert_eq!(err.exit_code(), 4);
        assert!(err.message().contains("fa_centiles_by_age.csv"));
    }

    #[test]
    fn x_axis_covers_childhood_and_older_subjects() {
        let part = partition(None);
        let mut centiles = BTreeMap::new();
        centiles.insert("fa".to_string(), centile_table("fa"));
        let panels = build_panels(&part, &strings(&["fa"]), &centiles, None).unwrap();
        assert_eq!(age_range(&panels), (0.0, 21.0));
    }
}
