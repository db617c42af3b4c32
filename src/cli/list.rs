use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Attribute, Cell, Table};
use serde_json::json;
use terraform_provider_gcrane::provider::ListDataSourceModel;
use terraform_provider_gcrane::settings::Settings;

use super::{configured_host, interruptible_context, report};

const DATA_SOURCE_TYPE: &str = "gcrane_list";

fn format_millis(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .filter(|_| ms > 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn join(values: impl IntoIterator<Item = impl AsRef<str>>) -> String {
    let joined = values
        .into_iter()
        .map(|v| v.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    if joined.is_empty() {
        "-".to_string()
    } else {
        joined
    }
}

/// Read `gcrane_list` for a repository and print it as a table or JSON
pub async fn handle_list(settings: &Settings, repository: &str, as_json: bool) -> Result<()> {
    let host = configured_host(settings).await?;

    let response = host
        .read_data_source(
            &interruptible_context(),
            DATA_SOURCE_TYPE,
            json!({ "repository": repository }),
        )
        .await;
    report(&response.diagnostics)?;

    let Some(state) = response.state else {
        return Ok(());
    };
    if as_json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    let model: ListDataSourceModel =
        serde_json::from_value(state).context("Failed to parse list result")?;

    for images in &model.images {
        if images.manifests.is_empty() {
            println!("Tags: {}", join(&images.tags));
        } else {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec![
                    Cell::new("DIGEST").add_attribute(Attribute::Bold),
                    Cell::new("TAGS").add_attribute(Attribute::Bold),
                    Cell::new("MEDIA TYPE").add_attribute(Attribute::Bold),
                    Cell::new("SIZE").add_attribute(Attribute::Bold),
                    Cell::new("CREATED").add_attribute(Attribute::Bold),
                    Cell::new("UPLOADED").add_attribute(Attribute::Bold),
                ]);

            for (digest, image) in &images.manifests {
                table.add_row(vec![
                    Cell::new(digest),
                    Cell::new(join(&image.tags)),
                    Cell::new(&image.media_type),
                    Cell::new(image.image_size_bytes),
                    Cell::new(format_millis(image.time_created_ms)),
                    Cell::new(format_millis(image.time_uploaded_ms)),
                ]);
            }
            println!("{}", table);
        }

        if !images.children.is_empty() {
            println!("Child repositories: {}", join(&images.children));
        }
    }
    Ok(())
}
