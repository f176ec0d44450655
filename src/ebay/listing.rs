use crate::analysis::AnalysisRecord;
use crate::config::ListingDefaults;
use crate::ebay::schema::{HeaderSchema, canonical_column};
use crate::ebay::taxonomy::{Condition, category_id_for, category_name_for, find_category};
use crate::photos::join_photos;
use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashMap;

pub const FALLBACK_PRICE: &str = "34.99";
pub const MAX_TITLE_CHARS: usize = 79;

const PROMO_CLOSING: &str =
    "Ships fast and packed with care. Check out our store for more vintage and streetwear finds!";

/// One CSV row: every schema column exactly once, in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingRow {
    cells: Vec<(String, String)>,
}

impl ListingRow {
    /// Projects File Exchange keyed values onto `schema`. Columns without a
    /// value are empty strings.
    pub fn project(schema: &HeaderSchema, values: &[(&str, String)]) -> Self {
        let by_key: HashMap<String, &String> = values
            .iter()
            .map(|(column, value)| (canonical_column(column), value))
            .collect();
        let cells = schema
            .columns
            .iter()
            .map(|column| {
                let value = by_key
                    .get(&canonical_column(column))
                    .map(|v| v.to_string())
                    .unwrap_or_default();
                (column.clone(), value)
            })
            .collect();
        Self { cells }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(_, value)| value.as_str())
    }
}

impl Serialize for ListingRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (column, value) in &self.cells {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// Per-export values shared by every row.
#[derive(Debug, Clone)]
pub struct RowContext<'a> {
    pub condition: Condition,
    pub photos_per_item: usize,
    pub defaults: &'a ListingDefaults,
    pub schedule_time: Option<String>,
}

/// Category ID for a record: keyword lookup on the category text, then on
/// the title.
pub fn category_for(record: &AnalysisRecord) -> &'static str {
    match find_category(&record.category_text) {
        Some(entry) => entry.id,
        None => category_id_for(&record.title),
    }
}

pub fn build_row(
    record: &AnalysisRecord,
    researched_price: Option<f64>,
    ctx: &RowContext<'_>,
    schema: &HeaderSchema,
) -> ListingRow {
    let photos = join_photos(&record.photos, ctx.photos_per_item, schema.photo_separator);
    let category_id = category_for(record);
    let common = |title: String, description: String, price: String| {
        vec![
            ("Action", "Add".to_string()),
            ("Category ID", category_id.to_string()),
            ("Category name", category_name_for(category_id).to_string()),
            ("Title", title),
            ("Schedule Time", ctx.schedule_time.clone().unwrap_or_default()),
            ("Start price", price),
            ("Quantity", "1".to_string()),
            ("Item photo URL", photos.clone()),
            ("Condition ID", ctx.condition.condition_id().to_string()),
            ("Description", description),
            ("Format", "FixedPrice".to_string()),
            ("Duration", "GTC".to_string()),
            ("Location", ctx.defaults.location.clone()),
            ("Max dispatch time", "2".to_string()),
            ("Shipping profile name", ctx.defaults.shipping_profile.clone()),
            ("Return profile name", ctx.defaults.return_profile.clone()),
            ("Payment profile name", ctx.defaults.payment_profile.clone()),
        ]
    };

    if let Some(error) = &record.error {
        let description = format!("<p>Analysis failed: {}</p>", escape_html(error));
        return ListingRow::project(
            schema,
            &common(String::new(), description, FALLBACK_PRICE.to_string()),
        );
    }

    let title = build_title(&record.brand, &record.title, &record.size, &record.color);
    let price = resolve_price(&record.price_estimate, researched_price);
    let mut values = common(title.clone(), build_description_html(&title, record), price);
    values.extend([
        ("C:Style", record.style.clone()),
        ("C:Brand", record.brand.clone()),
        ("C:Color", record.color.clone()),
        ("C:Size", record.size.clone()),
        ("C:Type", record.category_text.clone()),
        ("C:Features", record.features.clone()),
        ("C:Material", record.material.clone()),
        ("C:Pattern", record.pattern.clone()),
        ("C:Vintage", vintage_flag(&record.style).to_string()),
    ]);
    ListingRow::project(schema, &values)
}

/// Brand, title, size and color, skipping empty parts, capped at 79 chars.
pub fn build_title(brand: &str, title: &str, size: &str, color: &str) -> String {
    let joined = [brand, title, size, color]
        .iter()
        .flat_map(|part| part.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ");
    truncate_chars(&joined, MAX_TITLE_CHARS)
}

fn truncate_chars(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((idx, _)) => value[..idx].trim_end().to_string(),
        None => value.to_string(),
    }
}

/// `"$20-$35"` → `"20"`; anything without a positive number → `"34.99"`.
pub fn clean_price(raw: &str) -> String {
    usable_price(raw).unwrap_or_else(|| FALLBACK_PRICE.to_string())
}

fn usable_price(raw: &str) -> Option<String> {
    let first = raw.split('-').next().unwrap_or_default();
    let digits: String = first
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let digits = digits.trim_matches('.').to_string();
    match digits.parse::<f64>() {
        Ok(value) if value > 0.0 && value.is_finite() => Some(digits),
        _ => None,
    }
}

/// Model price when usable, else the researched median, else the fallback.
pub fn resolve_price(model_price: &str, researched: Option<f64>) -> String {
    if let Some(price) = usable_price(model_price) {
        return price;
    }
    match researched {
        Some(value) if value > 0.0 => format!("{value:.2}"),
        _ => clean_price(model_price),
    }
}

pub fn has_usable_price(model_price: &str) -> bool {
    usable_price(model_price).is_some()
}

pub fn build_description_html(title: &str, record: &AnalysisRecord) -> String {
    let mut html = format!(
        "<p><center><h4>{}</h4></center></p>",
        escape_html(title)
    );
    if !record.description.trim().is_empty() {
        html.push_str(&format!("<p>{}</p>", escape_html(record.description.trim())));
    }

    let details = [
        ("Brand", &record.brand),
        ("Category", &record.category_text),
        ("Features", &record.features),
        ("Size", &record.size),
        ("Material", &record.material),
    ];
    let items: String = details
        .iter()
        .filter(|(_, value)| !value.trim().is_empty())
        .map(|(label, value)| format!("<li><b>{label}:</b> {}</li>", escape_html(value.trim())))
        .collect();
    if !items.is_empty() {
        html.push_str(&format!("<ul>{items}</ul>"));
    }
    html.push_str(&format!("<p>{PROMO_CLOSING}</p>"));
    html
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn vintage_flag(style: &str) -> &'static str {
    let style = style.to_lowercase();
    if style.contains("90") || style.contains("y2k") || style.contains("vintage") {
        "Yes"
    } else {
        ""
    }
}

/// 22:00 New York time on the day after `now`, as a UTC timestamp.
/// April through October count as daylight time (UTC-4), otherwise UTC-5.
pub fn schedule_time_next_day(now: DateTime<Utc>) -> String {
    let next_day = now.date_naive() + Duration::days(1);
    let offset_hours = if (4..=10).contains(&now.month()) { 4 } else { 5 };
    let local = next_day.and_time(NaiveTime::from_hms_opt(22, 0, 0).unwrap_or_default());
    let utc = Utc.from_utc_datetime(&local) + Duration::hours(offset_hours);
    utc.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
