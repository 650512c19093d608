//! HTML popup fragments for map markers
//!
//! A single-day range renders a short summary block; anything longer renders a
//! table with one column per date and one row per statistic. Values are only
//! formatted here, never recomputed.

use chrono::NaiveDate;

use crate::aggregate::DateRange;
use crate::data::{DailyStat, Location};

/// Placeholder for a date without statistics
pub const MISSING_CELL: &str = "NA";

/// Statistic rows of the multi-day table, in display order
const TABLE_ROWS: [(&str, fn(&DailyStat) -> f64); 4] = [
    ("Temp. min (°C)", temp_min),
    ("Temp. max (°C)", temp_max),
    ("Temp. moyenne (°C)", temp_mean),
    ("Précipitations (mm)", precip_sum),
];

fn temp_min(stat: &DailyStat) -> f64 {
    stat.temp_min
}

fn temp_max(stat: &DailyStat) -> f64 {
    stat.temp_max
}

fn temp_mean(stat: &DailyStat) -> f64 {
    stat.temp_mean
}

fn precip_sum(stat: &DailyStat) -> f64 {
    stat.precip_sum
}

/// Shape of the popups for a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportLayout {
    /// Summary of one day
    SingleDay(NaiveDate),
    /// Table with one column per date of the range, ascending
    MultiDay(Vec<NaiveDate>),
}

impl ReportLayout {
    /// Picks the layout for `range`
    pub fn for_range(range: &DateRange) -> Self {
        if range.is_single_day() {
            ReportLayout::SingleDay(range.start())
        } else {
            ReportLayout::MultiDay(range.dates())
        }
    }
}

/// Escapes text for inclusion in HTML
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn heading(location: &Location) -> String {
    let mut html = format!("<h4>{}</h4>", escape_html(&location.label));
    if let Some(commune) = location.commune.as_ref().filter(|c| !c.is_unknown()) {
        html.push_str(&format!(
            "<p class=\"commune\">{} ({})</p>",
            escape_html(&commune.name),
            escape_html(&commune.department)
        ));
    }
    html
}

fn format_value(value: Option<f64>) -> String {
    value.map_or_else(|| MISSING_CELL.to_string(), |v| format!("{:.1}", v))
}

/// Renders the popup for one location
///
/// # Arguments
/// * `location` - The location the popup belongs to
/// * `stats` - Daily statistics; rows for other locations are ignored
/// * `layout` - Single-day block or multi-day table
///
/// # Returns
/// An HTML fragment wrapped in `<div class="meteo-popup">`. A table cell for a
/// date without statistics reads `NA`.
pub fn build_report(location: &Location, stats: &[DailyStat], layout: &ReportLayout) -> String {
    let own: Vec<&DailyStat> = stats.iter().filter(|s| s.location == location.id).collect();
    let mut html = String::from("<div class=\"meteo-popup\">");
    html.push_str(&heading(location));

    match layout {
        ReportLayout::SingleDay(date) => {
            let stat = own.iter().find(|s| s.date == *date);
            html.push_str(&format!(
                "<p class=\"date\">{}</p><ul>",
                date.format("%d/%m/%Y")
            ));
            html.push_str(&format!(
                "<li>Temp. moyenne : {} °C</li>",
                format_value(stat.map(|s| s.temp_mean))
            ));
            html.push_str(&format!(
                "<li>Temp. min : {} °C</li>",
                format_value(stat.map(|s| s.temp_min))
            ));
            html.push_str(&format!(
                "<li>Temp. max : {} °C</li>",
                format_value(stat.map(|s| s.temp_max))
            ));
            html.push_str(&format!(
                "<li>Précipitations : {} mm</li>",
                format_value(stat.map(|s| s.precip_sum))
            ));
            if let Some(humidity) = stat.and_then(|s| s.humidity_mean) {
                html.push_str(&format!("<li>Humidité : {:.1} %</li>", humidity));
            }
            html.push_str("</ul>");
        }
        ReportLayout::MultiDay(dates) => {
            html.push_str("<table><thead><tr><th></th>");
            for date in dates {
                html.push_str(&format!("<th>{}</th>", date.format("%d/%m")));
            }
            html.push_str("</tr></thead><tbody>");
            for (label, value_of) in TABLE_ROWS {
                html.push_str(&format!("<tr><th>{}</th>", label));
                for date in dates {
                    let value = own.iter().find(|s| s.date == *date).map(|s| value_of(s));
                    html.push_str(&format!("<td>{}</td>", format_value(value)));
                }
                html.push_str("</tr>");
            }
            html.push_str("</tbody></table>");
        }
    }

    html.push_str("</div>");
    html
}
