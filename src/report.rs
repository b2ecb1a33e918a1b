use crate::errors::{ResearchError, ResearchResult};
use crate::models::*;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

pub const REPORT_FILENAME: &str = "robustness_report.md";
pub const SUMMARY_FILENAME: &str = "robustness_summary.json";

const CHART_WIDTH: f64 = 800.0;
const CHART_HEIGHT: f64 = 320.0;
const MARGIN_LEFT: f64 = 70.0;
const MARGIN_RIGHT: f64 = 20.0;
const MARGIN_TOP: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 70.0;
const Y_TICKS: usize = 5;

/// Everything the suite hands to the report writers.
pub struct SuiteReport<'a> {
    pub experiment_id: &'a str,
    pub baseline_metrics: &'a PerformanceMetrics,
    pub aggregated_metrics: &'a AggregatedMetrics,
    pub walk_forward_results: &'a [WalkForwardRow],
    pub parameter_grid_results: &'a [ParameterGridRow],
    pub cost_stress_results: &'a [CostStressRow],
    pub regime_results: &'a [RegimeRow],
    pub artifact_paths: &'a [PathBuf],
}

fn write_file(path: &Path, contents: &str) -> ResearchResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ResearchError::artifact(parent, e))?;
    }
    fs::write(path, contents).map_err(|e| ResearchError::artifact(path, e))
}

pub fn format_float(value: f64) -> String {
    format!("{:.6}", value)
}

/// Markdown table lines, or `_No rows_` when there is nothing to show.
pub fn markdown_table(columns: &[&str], rows: &[Vec<String>]) -> Vec<String> {
    if rows.is_empty() {
        return vec!["_No rows_".to_string()];
    }
    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(format!("| {} |", columns.join(" | ")));
    lines.push(format!("| {} |", vec!["---"; columns.len()].join(" | ")));
    for row in rows {
        lines.push(format!("| {} |", row.join(" | ")));
    }
    lines
}

fn metric_cells(metrics: &PerformanceMetrics) -> impl Iterator<Item = String> {
    metrics.entries().into_iter().map(|(_, value)| format_float(value))
}

fn with_metric_columns(leading: &[&'static str]) -> Vec<&'static str> {
    leading.iter().copied().chain(METRIC_KEYS).collect()
}

pub fn render_markdown_report(report: &SuiteReport, generated_at: DateTime<Utc>) -> String {
    let mut lines = vec![
        format!("# Robustness Report: {}", report.experiment_id),
        String::new(),
        format!("Generated: {}", generated_at.to_rfc3339()),
        String::new(),
        "## Baseline Metrics".to_string(),
    ];
    let baseline_rows: Vec<Vec<String>> = report
        .baseline_metrics
        .entries()
        .iter()
        .map(|(key, value)| vec![key.to_string(), format_float(*value)])
        .collect();
    lines.extend(markdown_table(&["metric", "value"], &baseline_rows));

    lines.extend([String::new(), "## Aggregated Metrics".to_string()]);
    let aggregate_rows: Vec<Vec<String>> = report
        .aggregated_metrics
        .entries()
        .iter()
        .map(|(key, value)| vec![key.to_string(), format_float(*value)])
        .collect();
    lines.extend(markdown_table(&["metric", "value"], &aggregate_rows));

    lines.extend([String::new(), "## Walk-Forward Splits".to_string()]);
    let walk_forward_rows: Vec<Vec<String>> = report
        .walk_forward_results
        .iter()
        .map(|row| {
            [
                row.split.to_string(),
                row.start.clone(),
                row.end.clone(),
                row.observation_count.to_string(),
            ]
            .into_iter()
            .chain(metric_cells(&row.metrics))
            .collect()
        })
        .collect();
    lines.extend(markdown_table(
        &with_metric_columns(&["split", "start", "end", "observation_count"]),
        &walk_forward_rows,
    ));

    lines.extend([String::new(), "## Parameter Grid Sensitivity".to_string()]);
    let grid_rows: Vec<Vec<String>> = report
        .parameter_grid_results
        .iter()
        .map(|row| {
            std::iter::once(row.parameter_set.clone())
                .chain(metric_cells(&row.metrics))
                .collect()
        })
        .collect();
    lines.extend(markdown_table(
        &with_metric_columns(&["parameter_set"]),
        &grid_rows,
    ));

    lines.extend([String::new(), "## Cost Stress Test".to_string()]);
    let cost_rows: Vec<Vec<String>> = report
        .cost_stress_results
        .iter()
        .map(|row| {
            std::iter::once(format_float(row.cost_bps))
                .chain(metric_cells(&row.metrics))
                .collect()
        })
        .collect();
    lines.extend(markdown_table(&with_metric_columns(&["cost_bps"]), &cost_rows));

    lines.extend([String::new(), "## Regime Splits".to_string()]);
    let regime_rows: Vec<Vec<String>> = report
        .regime_results
        .iter()
        .map(|row| {
            [row.regime.as_str().to_string(), row.observation_count.to_string()]
                .into_iter()
                .chain(metric_cells(&row.metrics))
                .collect()
        })
        .collect();
    lines.extend(markdown_table(
        &with_metric_columns(&["regime", "observation_count"]),
        &regime_rows,
    ));

    lines.extend([String::new(), "## Artifacts".to_string()]);
    for path in report.artifact_paths {
        lines.push(format!("- {}", path.display()));
    }

    lines.join("\n") + "\n"
}

pub fn write_markdown_report(report: &SuiteReport, output_dir: &Path) -> ResearchResult<PathBuf> {
    let path = output_dir.join(REPORT_FILENAME);
    write_file(&path, &render_markdown_report(report, Utc::now()))?;
    Ok(path)
}

/// Summary payload; keys come out sorted because `serde_json::Map` is ordered.
pub fn summary_value(report: &SuiteReport, report_path: &Path) -> ResearchResult<serde_json::Value> {
    let artifact_paths: Vec<String> = report
        .artifact_paths
        .iter()
        .map(|path| path.display().to_string())
        .collect();
    Ok(json!({
        "experiment_id": report.experiment_id,
        "baseline_metrics": serde_json::to_value(report.baseline_metrics)?,
        "aggregated_metrics": serde_json::to_value(report.aggregated_metrics)?,
        "walk_forward_results": serde_json::to_value(report.walk_forward_results)?,
        "parameter_grid_results": serde_json::to_value(report.parameter_grid_results)?,
        "cost_stress_results": serde_json::to_value(report.cost_stress_results)?,
        "regime_results": serde_json::to_value(report.regime_results)?,
        "artifact_paths": artifact_paths,
        "report_path": report_path.display().to_string(),
    }))
}

pub fn write_summary_json(
    report: &SuiteReport,
    report_path: &Path,
    output_dir: &Path,
) -> ResearchResult<PathBuf> {
    let path = output_dir.join(SUMMARY_FILENAME);
    let payload = serde_json::to_string_pretty(&summary_value(report, report_path)?)?;
    write_file(&path, &(payload + "\n"))?;
    Ok(path)
}

/// Metrics plus exposure and turnover statistics of a single backtest.
pub fn write_backtest_metrics(
    experiment_id: &str,
    strategy_name: &str,
    result: &BacktestResult,
    path: &Path,
) -> ResearchResult<()> {
    let payload = json!({
        "experiment_id": experiment_id,
        "strategy": strategy_name,
        "start": result.dates.first().map(|d| d.format("%Y-%m-%d").to_string()),
        "end": result.dates.last().map(|d| d.format("%Y-%m-%d").to_string()),
        "observation_count": result.dates.len(),
        "final_equity": result.final_equity(),
        "metrics": serde_json::to_value(result.metrics)?,
        "exposure_stats": serde_json::to_value(result.exposure_stats)?,
        "turnover_stats": serde_json::to_value(result.turnover_stats)?,
    });
    write_file(path, &(serde_json::to_string_pretty(&payload)? + "\n"))
}

/// Daily series of a backtest, one row per date, one position column per symbol.
pub fn write_daily_csv(result: &BacktestResult, path: &Path) -> ResearchResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ResearchError::artifact(parent, e))?;
    }
    let to_artifact = |e: csv::Error| ResearchError::artifact(path, e.into());
    let mut writer = csv::Writer::from_path(path).map_err(to_artifact)?;

    let mut header = vec![
        "date".to_string(),
        "daily_return".to_string(),
        "equity".to_string(),
        "turnover".to_string(),
        "gross_exposure".to_string(),
    ];
    header.extend(result.positions.symbols.iter().map(|s| format!("position_{}", s)));
    writer.write_record(&header).map_err(to_artifact)?;

    let gross_exposure = result.gross_exposure();
    for (t, date) in result.dates.iter().enumerate() {
        let mut record = vec![
            date.format("%Y-%m-%d").to_string(),
            result.daily_returns[t].to_string(),
            result.equity_curve[t].to_string(),
            result.turnover[t].to_string(),
            gross_exposure[t].to_string(),
        ];
        record.extend(result.positions.rows[t].iter().map(|p| p.to_string()));
        writer.write_record(&record).map_err(to_artifact)?;
    }
    writer
        .flush()
        .map_err(|e| ResearchError::artifact(path, e))
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Value range padded so a flat series still spans a visible band.
fn value_range(values: &[f64], include_zero: bool) -> (f64, f64) {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return (0.0, 1.0);
    }
    let mut low = finite.iter().copied().fold(f64::INFINITY, f64::min);
    let mut high = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if include_zero {
        low = low.min(0.0);
        high = high.max(0.0);
    }
    if high - low < 1e-12 {
        let pad = (high.abs() * 0.1).max(1.0);
        low -= pad;
        high += pad;
    }
    (low, high)
}

struct ChartFrame {
    title: String,
    x_label: String,
    y_label: String,
    y_min: f64,
    y_max: f64,
}

impl ChartFrame {
    fn plot_width() -> f64 {
        CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT
    }

    fn plot_height() -> f64 {
        CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM
    }

    fn y_px(&self, value: f64) -> f64 {
        MARGIN_TOP + (self.y_max - value) / (self.y_max - self.y_min) * Self::plot_height()
    }

    /// Wraps the plot body with axes, grid lines, tick labels and titles.
    fn render(&self, body: &str, x_ticks: &[(f64, String)]) -> String {
        let mut svg = String::new();
        let bottom = MARGIN_TOP + Self::plot_height();
        let right = MARGIN_LEFT + Self::plot_width();
        let _ = writeln!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}" font-family="sans-serif" font-size="11">"#,
            w = CHART_WIDTH,
            h = CHART_HEIGHT
        );
        let _ = writeln!(
            svg,
            r#"<rect x="0" y="0" width="{}" height="{}" fill="white"/>"#,
            CHART_WIDTH, CHART_HEIGHT
        );
        let _ = writeln!(
            svg,
            r#"<text x="{}" y="22" text-anchor="middle" font-size="14">{}</text>"#,
            CHART_WIDTH / 2.0,
            escape_xml(&self.title)
        );

        for tick in 0..=Y_TICKS {
            let value = self.y_min + (self.y_max - self.y_min) * tick as f64 / Y_TICKS as f64;
            let y = self.y_px(value);
            let _ = writeln!(
                svg,
                r##"<line x1="{l:.2}" y1="{y:.2}" x2="{r:.2}" y2="{y:.2}" stroke="#cccccc" stroke-dasharray="4 3" stroke-width="0.7"/>"##,
                l = MARGIN_LEFT,
                r = right,
                y = y
            );
            let _ = writeln!(
                svg,
                r#"<text x="{:.2}" y="{:.2}" text-anchor="end">{:.3}</text>"#,
                MARGIN_LEFT - 6.0,
                y + 4.0,
                value
            );
        }

        for (x, label) in x_ticks {
            let y = bottom + 14.0;
            if label.len() > 8 {
                let _ = writeln!(
                    svg,
                    r#"<text x="{x:.2}" y="{y:.2}" text-anchor="end" transform="rotate(-35 {x:.2} {y:.2})">{label}</text>"#,
                    x = x,
                    y = y,
                    label = escape_xml(label)
                );
            } else {
                let _ = writeln!(
                    svg,
                    r#"<text x="{:.2}" y="{:.2}" text-anchor="middle">{}</text>"#,
                    x,
                    y,
                    escape_xml(label)
                );
            }
        }

        svg.push_str(body);
        let _ = writeln!(
            svg,
            r##"<line x1="{l:.2}" y1="{t:.2}" x2="{l:.2}" y2="{b:.2}" stroke="#333333"/>"##,
            l = MARGIN_LEFT,
            t = MARGIN_TOP,
            b = bottom
        );
        let _ = writeln!(
            svg,
            r##"<line x1="{l:.2}" y1="{b:.2}" x2="{r:.2}" y2="{b:.2}" stroke="#333333"/>"##,
            l = MARGIN_LEFT,
            r = right,
            b = bottom
        );
        let _ = writeln!(
            svg,
            r#"<text x="{:.2}" y="{:.2}" text-anchor="middle">{}</text>"#,
            MARGIN_LEFT + Self::plot_width() / 2.0,
            CHART_HEIGHT - 8.0,
            escape_xml(&self.x_label)
        );
        let _ = writeln!(
            svg,
            r#"<text x="16" y="{y:.2}" text-anchor="middle" transform="rotate(-90 16 {y:.2})">{}</text>"#,
            escape_xml(&self.y_label),
            y = MARGIN_TOP + Self::plot_height() / 2.0
        );
        svg.push_str("</svg>\n");
        svg
    }
}

/// Vertical bar chart with one bar per label, anchored at zero.
pub fn render_bar_chart(
    title: &str,
    x_label: &str,
    y_label: &str,
    labels: &[String],
    values: &[f64],
    color: &str,
) -> String {
    let (y_min, y_max) = value_range(values, true);
    let frame = ChartFrame {
        title: title.to_string(),
        x_label: x_label.to_string(),
        y_label: y_label.to_string(),
        y_min,
        y_max,
    };
    let slot = ChartFrame::plot_width() / labels.len().max(1) as f64;
    let zero = frame.y_px(0.0);
    let mut body = String::new();
    let mut ticks = Vec::with_capacity(labels.len());
    for (idx, (label, value)) in labels.iter().zip(values).enumerate() {
        let value = if value.is_finite() { *value } else { 0.0 };
        let x = MARGIN_LEFT + idx as f64 * slot + slot * 0.2;
        let y = frame.y_px(value);
        let _ = writeln!(
            body,
            r#"<rect x="{:.2}" y="{:.2}" width="{:.2}" height="{:.2}" fill="{}"/>"#,
            x,
            y.min(zero),
            slot * 0.6,
            (y - zero).abs(),
            color
        );
        ticks.push((MARGIN_LEFT + (idx as f64 + 0.5) * slot, label.clone()));
    }
    frame.render(&body, &ticks)
}

/// Polyline through `(x, y)` points on linear axes.
pub fn render_line_chart(
    title: &str,
    x_label: &str,
    y_label: &str,
    points: &[(f64, f64)],
    x_ticks: &[(f64, String)],
    color: &str,
    markers: bool,
) -> String {
    let xs: Vec<f64> = points.iter().map(|(x, _)| *x).collect();
    let ys: Vec<f64> = points.iter().map(|(_, y)| *y).collect();
    let (x_min, x_max) = value_range(&xs, false);
    let (y_min, y_max) = value_range(&ys, false);
    let frame = ChartFrame {
        title: title.to_string(),
        x_label: x_label.to_string(),
        y_label: y_label.to_string(),
        y_min,
        y_max,
    };
    let x_px = |x: f64| MARGIN_LEFT + (x - x_min) / (x_max - x_min) * ChartFrame::plot_width();

    let coordinates: Vec<(f64, f64)> = points
        .iter()
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|(x, y)| (x_px(*x), frame.y_px(*y)))
        .collect();
    let mut body = String::new();
    let polyline = coordinates
        .iter()
        .map(|(x, y)| format!("{:.2},{:.2}", x, y))
        .collect::<Vec<_>>()
        .join(" ");
    let _ = writeln!(
        body,
        r#"<polyline points="{}" fill="none" stroke="{}" stroke-width="1.5"/>"#,
        polyline, color
    );
    if markers {
        for (x, y) in &coordinates {
            let _ = writeln!(
                body,
                r#"<circle cx="{:.2}" cy="{:.2}" r="3" fill="{}"/>"#,
                x, y, color
            );
        }
    }
    let ticks: Vec<(f64, String)> = x_ticks
        .iter()
        .map(|(x, label)| (x_px(*x), label.clone()))
        .collect();
    frame.render(&body, &ticks)
}

fn save_chart(path: PathBuf, svg: &str) -> ResearchResult<PathBuf> {
    write_file(&path, svg)?;
    Ok(path)
}

pub fn save_equity_curve_chart(
    dates: &[DateTime<Utc>],
    equity_curve: &[f64],
    path: PathBuf,
) -> ResearchResult<PathBuf> {
    let points: Vec<(f64, f64)> = equity_curve
        .iter()
        .enumerate()
        .map(|(idx, value)| (idx as f64, *value))
        .collect();
    let mut ticks = Vec::new();
    if let (Some(first), Some(last)) = (dates.first(), dates.last()) {
        ticks.push((0.0, first.format("%Y-%m-%d").to_string()));
        if dates.len() > 1 {
            ticks.push(((dates.len() - 1) as f64, last.format("%Y-%m-%d").to_string()));
        }
    }
    let svg = render_line_chart("Equity Curve", "Date", "Equity", &points, &ticks, "#0f3d3e", false);
    save_chart(path, &svg)
}

pub fn save_walk_forward_chart(rows: &[WalkForwardRow], path: PathBuf) -> ResearchResult<PathBuf> {
    let labels: Vec<String> = rows.iter().map(|row| format!("S{}", row.split)).collect();
    let values: Vec<f64> = rows.iter().map(|row| row.metrics.sharpe_ratio).collect();
    let svg = render_bar_chart(
        "Walk-Forward Sharpe Ratio",
        "Split",
        "Sharpe Ratio",
        &labels,
        &values,
        "#22577A",
    );
    save_chart(path, &svg)
}

pub fn save_parameter_grid_chart(
    rows: &[ParameterGridRow],
    path: PathBuf,
) -> ResearchResult<PathBuf> {
    let labels: Vec<String> = rows.iter().map(|row| row.parameter_set.clone()).collect();
    let values: Vec<f64> = rows.iter().map(|row| row.metrics.sharpe_ratio).collect();
    let svg = render_bar_chart(
        "Parameter Grid Sensitivity (Sharpe)",
        "Parameter Set",
        "Sharpe Ratio",
        &labels,
        &values,
        "#38A3A5",
    );
    save_chart(path, &svg)
}

pub fn save_cost_stress_chart(rows: &[CostStressRow], path: PathBuf) -> ResearchResult<PathBuf> {
    let points: Vec<(f64, f64)> = rows
        .iter()
        .map(|row| (row.cost_bps, row.metrics.sharpe_ratio))
        .collect();
    let ticks: Vec<(f64, String)> = rows
        .iter()
        .map(|row| (row.cost_bps, format!("{}", row.cost_bps)))
        .collect();
    let svg = render_line_chart(
        "Cost Stress Test (Sharpe vs Cost)",
        "Transaction Cost (bps)",
        "Sharpe Ratio",
        &points,
        &ticks,
        "#2B9348",
        true,
    );
    save_chart(path, &svg)
}

pub fn save_regime_chart(rows: &[RegimeRow], path: PathBuf) -> ResearchResult<PathBuf> {
    let labels: Vec<String> = rows.iter().map(|row| row.regime.as_str().to_string()).collect();
    let values: Vec<f64> = rows.iter().map(|row| row.metrics.annualized_return).collect();
    let svg = render_bar_chart(
        "Regime Split Annualized Return",
        "Regime",
        "Annualized Return",
        &labels,
        &values,
        "#D4A373",
    );
    save_chart(path, &svg)
}
