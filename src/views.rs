// src/views.rs

//! Terminal renderings of the public listing, the detail page and the
//! admin table.

use std::fmt::Write;

use crate::models::MeasurementRecord;

/// One card of the public listing.
pub fn render_card(record: &MeasurementRecord) -> String {
    let mut out = String::new();
    let id = record.id.as_deref().unwrap_or("-");
    let _ = writeln!(out, "{}  [{}]", record.title, id);
    let _ = writeln!(out, "  {} | Normal: {}", record.category, record.normal_value);
    match record.cover() {
        Some(cover) if record.images.len() > 1 => {
            let _ = writeln!(
                out,
                "  Image: {} (+{} more)",
                cover.caption,
                record.images.len() - 1
            );
        }
        Some(cover) => {
            let _ = writeln!(out, "  Image: {}", cover.caption);
        }
        None => {
            let _ = writeln!(out, "  No image");
        }
    }
    out
}

/// Public listing for an already filtered result set.
pub fn render_listing(records: &[MeasurementRecord], query: &str) -> String {
    if records.is_empty() {
        let query = query.trim();
        return if query.is_empty() {
            "No measurements found\n".to_string()
        } else {
            format!(
                "No measurements found\nNo measurements found for \"{}\". Try adjusting your search terms.\n",
                query
            )
        };
    }
    records
        .iter()
        .map(render_card)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Full detail page of one record.
pub fn render_detail(record: &MeasurementRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", record.category);
    let _ = writeln!(out, "{}", record.title);
    let _ = writeln!(out);

    if record.images.is_empty() {
        let _ = writeln!(out, "Images: none");
    } else {
        let _ = writeln!(out, "Images:");
        for (i, image) in record.images.iter().enumerate() {
            let _ = writeln!(out, "  {}. {}  <{}>", i + 1, image.caption, image.url);
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Normal Value");
    let _ = writeln!(out, "  {}", record.normal_value);
    let _ = writeln!(out);
    let _ = writeln!(out, "Description");
    for line in record.description.lines() {
        let _ = writeln!(out, "  {}", line);
    }

    if !record.search_terms.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Related Terms");
        let _ = writeln!(out, "  {}", record.search_terms.join(" · "));
    }
    out
}

/// Admin table: one row per record with its image count and id.
pub fn render_admin_table(records: &[MeasurementRecord]) -> String {
    const HEADERS: [&str; 5] = ["Title", "Category", "Normal Value", "Images", "Id"];

    let rows: Vec<[String; 5]> = records
        .iter()
        .map(|r| {
            [
                r.title.clone(),
                r.category.clone(),
                r.normal_value.clone(),
                format!("{} images", r.images.len()),
                r.id.clone().unwrap_or_default(),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(|h| h.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let format_row = |cells: &[&str]| -> String {
        cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = width))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = String::new();
    let _ = writeln!(out, "{}", format_row(&HEADERS));
    let _ = writeln!(
        out,
        "{}",
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-")
    );
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        let _ = writeln!(out, "{}", format_row(&cells));
    }
    out
}
