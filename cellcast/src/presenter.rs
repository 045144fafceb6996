//! Turns a prediction result into what the dashboard draws: chart points, the
//! capacity axis range, the summary card, the cycle-range caption and the
//! insight list. Everything here is recomputed from the result on each render.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::model::PredictionResult;

pub const X_AXIS_LABEL: &str = "Charge Cycles";
pub const Y_AXIS_LABEL: &str = "Capacity (mAh)";
pub const SUMMARY_TITLE: &str = "Predicted Capacity";
pub const INSIGHTS_TITLE: &str = "Personalized Battery Advice";
pub const INSIGHT_BULLET: &str = "⚡";

/// Minimum headroom above and below the series, so a flat line stays visible.
pub const MIN_AXIS_PADDING: f64 = 0.1;
/// Headroom as a fraction of the capacity spread.
pub const AXIS_PADDING_RATIO: f64 = 0.1;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChartPoint {
    pub cycle: i64,
    pub capacity: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AxisBound {
    Value(f64),
    /// Left to the charting backend.
    Auto,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct YDomain {
    pub lower: f64,
    pub upper: AxisBound,
}

impl YDomain {
    pub fn from_points(points: &[ChartPoint]) -> Self {
        let Some((min, max)) = capacity_range(points) else {
            return Self {
                lower: 0.0,
                upper: AxisBound::Auto,
            };
        };
        let padding = axis_padding(min, max);
        Self {
            lower: (min - padding).max(0.0),
            upper: AxisBound::Value(max + padding),
        }
    }

    /// Both bounds, when the upper one is fixed.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        match self.upper {
            AxisBound::Value(upper) => Some((self.lower, upper)),
            AxisBound::Auto => None,
        }
    }
}

pub fn axis_padding(min: f64, max: f64) -> f64 {
    ((max - min) * AXIS_PADDING_RATIO).max(MIN_AXIS_PADDING)
}

fn capacity_range(points: &[ChartPoint]) -> Option<(f64, f64)> {
    let first = points.first()?.capacity;
    Some(points.iter().fold((first, first), |(lo, hi), p| {
        (lo.min(p.capacity), hi.max(p.capacity))
    }))
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Summary {
    pub final_prediction: Option<f64>,
    pub first_cycle: Option<i64>,
    pub last_cycle: Option<i64>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SummaryCard {
    pub capacity: f64,
    pub cycle: i64,
}

impl Summary {
    pub fn from_result(result: &PredictionResult) -> Self {
        let first = result.predictions.first();
        let last = result.predictions.last();
        Self {
            final_prediction: last.map(|p| p.capacity),
            first_cycle: first.map(|p| p.cycle),
            last_cycle: last.map(|p| p.cycle),
        }
    }

    /// Present whenever both figures exist, zero values included.
    pub fn card(&self) -> Option<SummaryCard> {
        Some(SummaryCard {
            capacity: self.final_prediction?,
            cycle: self.last_cycle?,
        })
    }

    pub fn cycle_range(&self) -> Option<(i64, i64)> {
        Some((self.first_cycle?, self.last_cycle?))
    }

    pub fn caption(&self) -> Option<String> {
        self.cycle_range()
            .map(|(first, last)| format!("Showing predictions from cycle {first} to {last}"))
    }
}

pub fn format_capacity_tick(value: f64) -> String {
    format!("{value:.2}")
}

pub fn format_tooltip(cycle: i64, capacity: f64) -> (String, String) {
    (format!("Cycle: {cycle}"), format!("{capacity:.2} mAh"))
}

#[derive(Clone, Debug, PartialEq)]
pub struct DashboardView {
    pub file_name: String,
    pub points: Vec<ChartPoint>,
    pub y_domain: YDomain,
    pub summary: Summary,
    pub insights: Vec<String>,
}

impl DashboardView {
    pub fn from_result(file_name: &str, result: &PredictionResult) -> Self {
        let points: Vec<ChartPoint> = result
            .predictions
            .iter()
            .map(|p| ChartPoint {
                cycle: p.cycle,
                capacity: p.capacity,
            })
            .collect();
        let y_domain = YDomain::from_points(&points);
        Self {
            file_name: file_name.to_string(),
            points,
            y_domain,
            summary: Summary::from_result(result),
            insights: result.insights().to_vec(),
        }
    }

    pub fn has_insights(&self) -> bool {
        !self.insights.is_empty()
    }

    pub fn insight_bullets(&self) -> Vec<String> {
        self.insights
            .iter()
            .map(|tip| format!("{INSIGHT_BULLET} {tip}"))
            .collect()
    }

    /// Cycle span for the x axis; a single point gets one cycle either side.
    pub fn x_range(&self) -> Option<(i64, i64)> {
        let first = self.points.first()?.cycle;
        let (lo, hi) = self
            .points
            .iter()
            .fold((first, first), |(lo, hi), p| (lo.min(p.cycle), hi.max(p.cycle)));
        if lo == hi {
            Some((lo - 1, hi + 1))
        } else {
            Some((lo, hi))
        }
    }

    /// Plain-text dashboard for terminals and logs.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Prediction for: {}", self.file_name);
        let _ = writeln!(out);

        match self.y_domain.bounds() {
            Some((lower, upper)) => {
                let _ = writeln!(
                    out,
                    "{} axis: {} .. {}",
                    Y_AXIS_LABEL,
                    format_capacity_tick(lower),
                    format_capacity_tick(upper)
                );
            }
            None => {
                let _ = writeln!(out, "{} axis: 0.00 .. auto", Y_AXIS_LABEL);
            }
        }
        if self.points.is_empty() {
            let _ = writeln!(out, "(no predicted points)");
        } else {
            let _ = writeln!(out, "{:>8}  {:>12}", "cycle", "capacity");
            for point in &self.points {
                let _ = writeln!(
                    out,
                    "{:>8}  {:>12}",
                    point.cycle,
                    format_capacity_tick(point.capacity)
                );
            }
        }

        if let Some(caption) = self.summary.caption() {
            let _ = writeln!(out);
            let _ = writeln!(out, "{caption}");
        }

        if let Some(card) = self.summary.card() {
            let _ = writeln!(out);
            let _ = writeln!(out, "{SUMMARY_TITLE}: {:.2}", card.capacity);
            let _ = writeln!(out, "  at cycle {}", card.cycle);
        }

        if self.has_insights() {
            let _ = writeln!(out);
            let _ = writeln!(out, "{INSIGHTS_TITLE}");
            for bullet in self.insight_bullets() {
                let _ = writeln!(out, "  {bullet}");
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Prediction, PredictionMeta};

    fn result(points: &[(i64, f64)], insights: &[&str]) -> PredictionResult {
        PredictionResult {
            predictions: points
                .iter()
                .map(|&(cycle, capacity)| Prediction { cycle, capacity })
                .collect(),
            meta: PredictionMeta {
                insights: insights.iter().map(|s| s.to_string()).collect(),
            },
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn flat_series_gets_minimum_padding() {
        let view = DashboardView::from_result("a.csv", &result(&[(1, 10.0), (2, 10.0)], &[]));
        let (lower, upper) = view.y_domain.bounds().unwrap();
        assert!(close(axis_padding(10.0, 10.0), 0.1));
        assert!(close(lower, 9.9), "lower {lower}");
        assert!(close(upper, 10.1), "upper {upper}");
    }

    #[test]
    fn padding_scales_with_spread_and_clamps_at_zero() {
        let points = [
            ChartPoint { cycle: 1, capacity: 0.5 },
            ChartPoint { cycle: 2, capacity: 20.5 },
        ];
        let domain = YDomain::from_points(&points);
        assert_eq!(domain.lower, 0.0);
        match domain.upper {
            AxisBound::Value(upper) => assert!(close(upper, 22.5)),
            AxisBound::Auto => panic!("expected a fixed upper bound"),
        }
    }

    #[test]
    fn two_point_series_derivations() {
        let view = DashboardView::from_result("cell.csv", &result(&[(1, 5.0), (2, 4.5)], &[]));
        assert_eq!(
            view.points,
            vec![
                ChartPoint { cycle: 1, capacity: 5.0 },
                ChartPoint { cycle: 2, capacity: 4.5 },
            ]
        );
        assert_eq!(view.summary.final_prediction, Some(4.5));
        assert_eq!(view.summary.first_cycle, Some(1));
        assert_eq!(view.summary.last_cycle, Some(2));
        assert_eq!(view.summary.card(), Some(SummaryCard { capacity: 4.5, cycle: 2 }));
        assert_eq!(
            view.summary.caption().as_deref(),
            Some("Showing predictions from cycle 1 to 2")
        );
    }

    #[test]
    fn source_order_is_preserved() {
        let view = DashboardView::from_result("x.csv", &result(&[(5, 1.0), (3, 2.0), (4, 1.5)], &[]));
        let cycles: Vec<i64> = view.points.iter().map(|p| p.cycle).collect();
        assert_eq!(cycles, vec![5, 3, 4]);
        assert_eq!(view.summary.cycle_range(), Some((5, 4)));
        assert_eq!(view.x_range(), Some((3, 5)));
    }

    #[test]
    fn empty_result_has_auto_domain_and_no_summary() {
        let view = DashboardView::from_result("empty.csv", &result(&[], &[]));
        assert!(view.points.is_empty());
        assert_eq!(
            view.y_domain,
            YDomain {
                lower: 0.0,
                upper: AxisBound::Auto
            }
        );
        assert_eq!(view.summary, Summary::default());
        assert!(view.summary.card().is_none());
        assert!(view.summary.caption().is_none());
        assert!(view.x_range().is_none());
        let text = view.render_text();
        assert!(text.contains("(no predicted points)"));
        assert!(!text.contains(SUMMARY_TITLE));
        assert!(!text.contains("Showing predictions"));
    }

    #[test]
    fn zero_values_still_render_card_and_caption() {
        let view = DashboardView::from_result("z.csv", &result(&[(0, 0.0)], &[]));
        assert_eq!(view.summary.card(), Some(SummaryCard { capacity: 0.0, cycle: 0 }));
        assert_eq!(
            view.summary.caption().as_deref(),
            Some("Showing predictions from cycle 0 to 0")
        );
        assert_eq!(view.y_domain.bounds(), Some((0.0, 0.1)));
    }

    #[test]
    fn single_insight_renders_one_bullet() {
        let view = DashboardView::from_result("a.csv", &result(&[(1, 3.0)], &["Avoid full discharge"]));
        assert_eq!(view.insight_bullets(), vec!["⚡ Avoid full discharge".to_string()]);
        let text = view.render_text();
        assert_eq!(text.matches('⚡').count(), 1);
        assert!(text.contains(INSIGHTS_TITLE));
    }

    #[test]
    fn no_insights_renders_no_list() {
        let parsed = PredictionResult::from_json(r#"{"predictions":[{"cycle":1,"capacity":3.0}]}"#)
            .unwrap();
        let view = DashboardView::from_result("a.csv", &parsed);
        assert!(!view.has_insights());
        assert!(view.insight_bullets().is_empty());
        assert!(!view.render_text().contains(INSIGHTS_TITLE));
    }

    #[test]
    fn text_dashboard_lists_points_and_summary() {
        let view = DashboardView::from_result(
            "cell.csv",
            &result(&[(100, 1800.0), (150, 1750.0)], &["Keep it cool"]),
        );
        let text = view.render_text();
        assert!(text.starts_with("Prediction for: cell.csv\n"));
        assert!(text.contains("Capacity (mAh) axis: 1745.00 .. 1805.00"));
        assert!(text.contains("     150       1750.00"));
        assert!(text.contains("Predicted Capacity: 1750.00\n  at cycle 150"));
        assert!(text.contains("Showing predictions from cycle 100 to 150"));
        assert!(text.contains("⚡ Keep it cool"));
    }

    #[test]
    fn formatting_helpers() {
        assert_eq!(format_capacity_tick(4.5), "4.50");
        assert_eq!(
            format_tooltip(12, 3.14159),
            ("Cycle: 12".to_string(), "3.14 mAh".to_string())
        );
    }
}
